pub mod bounding_box_render;
pub mod frame_pipeline;
pub mod history;
#[cfg(feature = "opencv")]
pub mod opencv_support;
pub mod plate_text;
pub mod region_detector;
#[cfg(feature = "tesseract")]
pub mod tesseract_ocr;
pub mod text_recognizer;
pub mod video_reader;

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use image::RgbaImage;

use crate::error::PlateError;

/// How long a detection stays on screen after it was made.
pub const FRESHNESS_WINDOW: Duration = Duration::from_millis(1000);

/// Axis aligned rectangle in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlateRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl PlateRect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Width over height, `None` for a degenerate rectangle.
    pub fn aspect_ratio(&self) -> Option<f64> {
        if self.height <= 0 || self.width <= 0 {
            return None;
        }
        Some(self.width as f64 / self.height as f64)
    }

    fn fits_in(&self, width: u32, height: u32) -> bool {
        self.x >= 0
            && self.y >= 0
            && self.width > 0
            && self.height > 0
            && (self.x as i64 + self.width as i64) <= width as i64
            && (self.y as i64 + self.height as i64) <= height as i64
    }
}

/// A still image sampled from the live feed.
#[derive(Debug, Clone)]
pub struct Frame {
    image: RgbaImage,
}

impl Frame {
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    pub fn blank(width: u32, height: u32) -> Self {
        Self::new(RgbaImage::new(width, height))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Copy of the pixels under `rect`, which must lie inside the frame.
    pub fn crop(&self, rect: &PlateRect) -> Result<Frame, PlateError> {
        if !rect.fits_in(self.width(), self.height()) {
            return Err(PlateError::RegionOutOfBounds {
                rect: *rect,
                width: self.width(),
                height: self.height(),
            });
        }
        let sub = image::imageops::crop_imm(
            &self.image,
            rect.x as u32,
            rect.y as u32,
            rect.width as u32,
            rect.height as u32,
        )
        .to_image();
        Ok(Frame::new(sub))
    }
}

/// The one plate currently shown on the overlay.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivePlate {
    pub text: Option<String>,
    pub region: Option<PlateRect>,
    pub detected_at: Option<Instant>,
}

impl ActivePlate {
    pub fn is_fresh(&self, now: Instant) -> bool {
        match (self.region, self.detected_at) {
            (Some(_), Some(detected_at)) => {
                now.saturating_duration_since(detected_at) < FRESHNESS_WINDOW
            }
            _ => false,
        }
    }
}

/// Shared handle to the active plate. The pipeline writes, renderers take
/// snapshots.
#[derive(Debug, Clone, Default)]
pub struct SharedPlate {
    inner: Arc<RwLock<ActivePlate>>,
}

impl SharedPlate {
    pub fn snapshot(&self) -> ActivePlate {
        match self.inner.read() {
            Ok(plate) => plate.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn update<F: FnOnce(&mut ActivePlate)>(&self, f: F) {
        match self.inner.write() {
            Ok(mut plate) => f(&mut plate),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

/// Emitted once per distinct plate text per session.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPlateEvent {
    pub text: String,
    pub time: DateTime<Local>,
}

impl NewPlateEvent {
    pub fn new(text: String) -> Self {
        Self {
            text,
            time: Local::now(),
        }
    }
}
