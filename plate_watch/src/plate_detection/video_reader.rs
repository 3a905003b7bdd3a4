use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::channel::Sender;
use rusted_pipe::channels::typed_write_channel::WriteChannel1;
use rusted_pipe::graph::processor::ProcessorWriter;
use rusted_pipe::graph::processor::SourceProcessor;
use rusted_pipe::DataVersion;
use rusted_pipe::RustedPipeError;
use tracing::{error, info, warn};

use super::Frame;
use crate::error::CaptureError;
use crate::utils::FpsLimiter;

/// Live image source behind the pipeline.
pub trait FrameSource: Send {
    /// Checks that the device can be used. A denied permission is reported
    /// as [`CaptureError::PermissionDenied`].
    fn open(&mut self) -> Result<(), CaptureError>;
    /// Blocks until the next image is available.
    fn read(&mut self) -> Result<Frame, CaptureError>;
}

/// Plays back a fixed list of frames, looping if asked to.
#[derive(Debug, Default)]
pub struct FrameReplay {
    frames: Vec<Frame>,
    queue: VecDeque<Frame>,
    do_loop: bool,
    denied: bool,
}

impl FrameReplay {
    pub fn new(frames: Vec<Frame>, do_loop: bool) -> Self {
        Self {
            queue: frames.iter().cloned().collect(),
            frames,
            do_loop,
            denied: false,
        }
    }

    /// A source that refuses access, like a camera the user blocked.
    pub fn denied() -> Self {
        Self {
            denied: true,
            ..Self::default()
        }
    }
}

impl FrameSource for FrameReplay {
    fn open(&mut self) -> Result<(), CaptureError> {
        if self.denied {
            return Err(CaptureError::PermissionDenied("replay source is blocked".into()));
        }
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, CaptureError> {
        if self.queue.is_empty() && self.do_loop {
            self.queue.extend(self.frames.iter().cloned());
        }
        self.queue.pop_front().ok_or(CaptureError::EndOfStream)
    }
}

/// Graph source that reads an opened [`FrameSource`] at a fixed pace.
///
/// When the source runs dry the node clears `running` and signals
/// `finished` before ending its stream.
pub struct CaptureNode<S> {
    source: S,
    fps_limiter: FpsLimiter,
    running: Arc<AtomicBool>,
    finished: Sender<()>,
}

impl<S: FrameSource> CaptureNode<S> {
    pub fn new(source: S, fps: usize, running: Arc<AtomicBool>, finished: Sender<()>) -> Self {
        Self {
            source,
            fps_limiter: FpsLimiter::new(fps),
            running,
            finished,
        }
    }

    fn end(&self) -> Result<(), RustedPipeError> {
        self.running.store(false, Ordering::Release);
        self.finished.try_send(()).ok();
        Err(RustedPipeError::EndOfStream())
    }
}

impl<S: FrameSource> SourceProcessor for CaptureNode<S> {
    type OUTPUT = WriteChannel1<Frame>;
    fn handle(&mut self, mut output: ProcessorWriter<Self::OUTPUT>) -> Result<(), RustedPipeError> {
        if !self.running.load(Ordering::Acquire) {
            return self.end();
        }
        let frame = match self.source.read() {
            Ok(frame) => frame,
            Err(CaptureError::EndOfStream) => {
                info!("Source ended");
                return self.end();
            }
            Err(e) => {
                error!(error = %e, "Capture failed");
                return self.end();
            }
        };

        let frame_ts = DataVersion::from_now();
        if let Err(e) = output.writer.c1().write(frame, &frame_ts) {
            warn!(error = ?e, "Cannot hand frame to the graph");
        }

        self.fps_limiter.wait();
        Ok(())
    }
}

// The graph only ever drives a source from its own worker thread.
unsafe impl<S: FrameSource> Sync for CaptureNode<S> {}

#[cfg(feature = "opencv")]
pub use capture::VideoReader;

#[cfg(feature = "opencv")]
mod capture {
    use opencv::prelude::Mat;
    use opencv::prelude::MatTraitConst;
    use opencv::prelude::VideoCaptureTrait;
    use opencv::prelude::VideoCaptureTraitConst;
    use opencv::videoio::VideoCapture;
    use opencv::videoio::CAP_ANY;
    use opencv::videoio::CAP_PROP_FRAME_HEIGHT;
    use opencv::videoio::CAP_PROP_FRAME_WIDTH;
    use tracing::{debug, info};

    use super::FrameSource;
    use crate::config::CaptureConfig;
    use crate::error::CaptureError;
    use crate::plate_detection::opencv_support::from_bgr;
    use crate::plate_detection::Frame;

    enum Device {
        Camera(i32),
        File(String),
    }

    /// Camera or video file reader.
    pub struct VideoReader {
        device: Device,
        capture: Option<VideoCapture>,
        width: u32,
        height: u32,
        do_loop: bool,
    }

    impl VideoReader {
        pub fn from_config(config: &CaptureConfig) -> Self {
            let device = match config.source.parse::<i32>() {
                Ok(index) => Device::Camera(index),
                Err(_) => Device::File(config.source.clone()),
            };
            Self {
                device,
                capture: None,
                width: config.width,
                height: config.height,
                do_loop: config.loop_video,
            }
        }

        fn make_capture(&self) -> Result<VideoCapture, CaptureError> {
            match &self.device {
                Device::Camera(index) => {
                    let mut capture = VideoCapture::new(*index, CAP_ANY)?;
                    if !capture.is_opened()? {
                        return Err(CaptureError::PermissionDenied(format!(
                            "cannot open camera {index}"
                        )));
                    }
                    // Only a hint, the driver picks the closest mode.
                    capture.set(CAP_PROP_FRAME_WIDTH, self.width as f64)?;
                    capture.set(CAP_PROP_FRAME_HEIGHT, self.height as f64)?;
                    Ok(capture)
                }
                Device::File(path) => {
                    let capture = VideoCapture::from_file(path, CAP_ANY)?;
                    if !capture.is_opened()? {
                        return Err(CaptureError::Unavailable(format!("cannot open {path}")));
                    }
                    Ok(capture)
                }
            }
        }

        fn grab(&mut self) -> Result<Option<Mat>, CaptureError> {
            let capture = match self.capture.as_mut() {
                Some(capture) => capture,
                None => return Err(CaptureError::Unavailable("reader not opened".into())),
            };
            let mut image = Mat::default();
            let grabbed = capture.read(&mut image)?;
            if !grabbed || image.empty() {
                return Ok(None);
            }
            Ok(Some(image))
        }
    }

    impl FrameSource for VideoReader {
        fn open(&mut self) -> Result<(), CaptureError> {
            let capture = self.make_capture()?;
            let width = capture.get(CAP_PROP_FRAME_WIDTH)?;
            let height = capture.get(CAP_PROP_FRAME_HEIGHT)?;
            info!(width, height, "Capture opened");
            self.capture = Some(capture);
            Ok(())
        }

        fn read(&mut self) -> Result<Frame, CaptureError> {
            let image = match self.grab()? {
                Some(image) => image,
                None if self.do_loop && matches!(self.device, Device::File(_)) => {
                    debug!("Rewinding video");
                    self.capture = Some(self.make_capture()?);
                    self.grab()?.ok_or(CaptureError::EndOfStream)?
                }
                None => return Err(CaptureError::EndOfStream),
            };
            from_bgr(&image)
        }
    }
}
