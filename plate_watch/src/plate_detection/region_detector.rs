use std::collections::VecDeque;

use super::{Frame, PlateRect};
use crate::error::PlateError;

/// Finds at most one candidate plate region in a frame.
///
/// Implementations make no promise about false positives; the pipeline
/// applies its own geometric filter to whatever comes back.
pub trait RegionDetector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Option<PlateRect>, PlateError>;
}

/// Replays a fixed list of detections, then keeps returning the last one.
#[derive(Debug, Default)]
pub struct StaticRegionDetector {
    script: VecDeque<Option<PlateRect>>,
    last: Option<PlateRect>,
}

impl StaticRegionDetector {
    pub fn new<I: IntoIterator<Item = Option<PlateRect>>>(script: I) -> Self {
        Self {
            script: script.into_iter().collect(),
            last: None,
        }
    }

    /// Always reports `rect`.
    pub fn always(rect: PlateRect) -> Self {
        Self::new([Some(rect)])
    }
}

impl RegionDetector for StaticRegionDetector {
    fn detect(&mut self, _frame: &Frame) -> Result<Option<PlateRect>, PlateError> {
        if let Some(next) = self.script.pop_front() {
            self.last = next;
        }
        Ok(self.last)
    }
}

#[cfg(feature = "opencv")]
pub use contour::ContourRegionDetector;

#[cfg(feature = "opencv")]
mod contour {
    use opencv::core::Point;
    use opencv::core::Size;
    use opencv::core::Vector;
    use opencv::core::BORDER_DEFAULT;
    use opencv::imgproc::approx_poly_dp;
    use opencv::imgproc::arc_length;
    use opencv::imgproc::bounding_rect;
    use opencv::imgproc::canny;
    use opencv::imgproc::contour_area;
    use opencv::imgproc::equalize_hist;
    use opencv::imgproc::find_contours;
    use opencv::imgproc::gaussian_blur;
    use opencv::imgproc::CHAIN_APPROX_SIMPLE;
    use opencv::imgproc::RETR_EXTERNAL;
    use opencv::prelude::Mat;

    use super::RegionDetector;
    use crate::config::DetectorConfig;
    use crate::error::PlateError;
    use crate::plate_detection::opencv_support::{from_rect, to_gray};
    use crate::plate_detection::{Frame, PlateRect};

    /// Edge and contour based detector: the first four-cornered contour with
    /// a plate-like area wins.
    pub struct ContourRegionDetector {
        config: DetectorConfig,
    }

    impl ContourRegionDetector {
        pub fn new(config: DetectorConfig) -> Self {
            Self { config }
        }

        fn edges(&self, frame: &Frame) -> Result<Mat, PlateError> {
            let grey = to_gray(frame)?;

            let mut blurred = Mat::default();
            let kernel = self.config.blur_kernel;
            gaussian_blur(
                &grey,
                &mut blurred,
                Size::new(kernel, kernel),
                0.0,
                0.0,
                BORDER_DEFAULT,
            )?;

            let mut equalized = Mat::default();
            equalize_hist(&blurred, &mut equalized)?;

            let mut edges = Mat::default();
            canny(
                &equalized,
                &mut edges,
                self.config.canny_low,
                self.config.canny_high,
                3,
                false,
            )?;
            Ok(edges)
        }
    }

    impl RegionDetector for ContourRegionDetector {
        fn detect(&mut self, frame: &Frame) -> Result<Option<PlateRect>, PlateError> {
            let edges = self.edges(frame)?;

            let mut contours = Vector::<Vector<Point>>::new();
            find_contours(
                &edges,
                &mut contours,
                RETR_EXTERNAL,
                CHAIN_APPROX_SIMPLE,
                Point::new(0, 0),
            )?;

            for contour in contours.iter() {
                let area = contour_area(&contour, false)?;
                let epsilon = self.config.epsilon_factor * arc_length(&contour, true)?;
                let mut approx = Vector::<Point>::new();
                approx_poly_dp(&contour, &mut approx, epsilon, true)?;

                if approx.len() == 4 && area > self.config.min_area && area < self.config.max_area
                {
                    let rect = bounding_rect(&approx)?;
                    return Ok(Some(from_rect(&rect)));
                }
            }
            Ok(None)
        }
    }
}
