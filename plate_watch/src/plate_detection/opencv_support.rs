//! Conversions between [`Frame`] and OpenCV matrices.

use image::RgbaImage;
use opencv::core::Rect;
use opencv::imgproc::cvt_color;
use opencv::imgproc::COLOR_BGR2RGBA;
use opencv::imgproc::COLOR_RGBA2BGR;
use opencv::imgproc::COLOR_RGBA2GRAY;
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;
use opencv::prelude::MatTraitConstManual;

use super::{Frame, PlateRect};
use crate::error::{CaptureError, PlateError};

fn rgba_mat(frame: &Frame) -> Result<Mat, PlateError> {
    let flat = Mat::from_slice(frame.image().as_raw().as_slice())?;
    let shaped = flat.reshape(4, frame.height() as i32)?;
    Ok(shaped.try_clone()?)
}

pub fn to_gray(frame: &Frame) -> Result<Mat, PlateError> {
    let rgba = rgba_mat(frame)?;
    let mut grey = Mat::default();
    cvt_color(&rgba, &mut grey, COLOR_RGBA2GRAY, 0)?;
    Ok(grey)
}

pub fn to_bgr(frame: &Frame) -> Result<Mat, PlateError> {
    let rgba = rgba_mat(frame)?;
    let mut bgr = Mat::default();
    cvt_color(&rgba, &mut bgr, COLOR_RGBA2BGR, 0)?;
    Ok(bgr)
}

/// Builds a frame from a BGR capture.
pub fn from_bgr(image: &Mat) -> Result<Frame, CaptureError> {
    let mut rgba = Mat::default();
    cvt_color(image, &mut rgba, COLOR_BGR2RGBA, 0)?;
    let width = rgba.cols() as u32;
    let height = rgba.rows() as u32;
    let bytes = rgba.data_bytes()?.to_vec();
    let image = RgbaImage::from_raw(width, height, bytes)
        .ok_or(CaptureError::InvalidFrame { width, height })?;
    Ok(Frame::new(image))
}

pub fn to_rect(rect: &PlateRect) -> Rect {
    Rect::new(rect.x, rect.y, rect.width, rect.height)
}

pub fn from_rect(rect: &Rect) -> PlateRect {
    PlateRect::new(rect.x, rect.y, rect.width, rect.height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::Scalar;
    use opencv::core::CV_8UC1;
    use opencv::core::CV_8UC3;

    #[test]
    fn bgr_capture_becomes_frame() {
        let image = Mat::new_rows_cols_with_default(3, 4, CV_8UC3, Scalar::all(0.0)).unwrap();
        let frame = from_bgr(&image).unwrap();
        assert_eq!((frame.width(), frame.height()), (4, 3));
    }

    #[test]
    fn unusable_capture_is_a_capture_error() {
        let image = Mat::new_rows_cols_with_default(3, 4, CV_8UC1, Scalar::all(0.0)).unwrap();
        let err: CaptureError = from_bgr(&image).unwrap_err();
        assert!(matches!(err, CaptureError::Unavailable(_)));
    }
}
