use std::time::Duration;

use thiserror::Error;

use crate::plate_detection::PlateRect;

/// Failure of a single detection, recognition or drawing step.
///
/// None of these are fatal: the pipeline logs them and the next sampling
/// tick starts a fresh attempt.
#[derive(Debug, Error)]
pub enum PlateError {
    #[error("text recognition failed: {0}")]
    Recognition(String),
    #[error("text recognition did not finish within {0:?}")]
    RecognitionTimeout(Duration),
    #[error("text recognizer is still busy with a previous request")]
    RecognizerBusy,
    #[error("region {rect:?} is outside of the {width}x{height} frame")]
    RegionOutOfBounds {
        rect: PlateRect,
        width: u32,
        height: u32,
    },
    #[cfg(feature = "opencv")]
    #[error("opencv error: {0}")]
    OpenCv(#[from] opencv::Error),
}

/// Errors from the capture shell. Permission problems are kept apart from
/// everything else so the caller can ask the user to re-enable the camera.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera access denied: {0}")]
    PermissionDenied(String),
    #[error("camera unavailable: {0}")]
    Unavailable(String),
    #[error("captured image does not match its {width}x{height} size")]
    InvalidFrame { width: u32, height: u32 },
    #[error("end of stream")]
    EndOfStream,
}

#[cfg(feature = "opencv")]
impl From<opencv::Error> for CaptureError {
    fn from(err: opencv::Error) -> Self {
        CaptureError::Unavailable(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Camera(#[from] CaptureError),
    #[error("cannot build the processing graph: {0}")]
    Graph(String),
}

impl SessionError {
    /// True when the user can fix the problem by granting camera access.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, SessionError::Camera(CaptureError::PermissionDenied(_)))
    }
}
