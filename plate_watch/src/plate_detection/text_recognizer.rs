use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::warn;

use super::Frame;
use crate::config::RecognizerConfig;
use crate::error::PlateError;

/// Tesseract page segmentation mode. Plates are read as one line of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSegMode {
    SingleLine,
}

impl PageSegMode {
    /// Numeric value of the `tessedit_pageseg_mode` variable.
    pub fn tesseract_value(&self) -> &'static str {
        match self {
            PageSegMode::SingleLine => "7",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionOptions {
    pub language: String,
    pub char_whitelist: String,
    pub page_seg_mode: PageSegMode,
}

impl Default for RecognitionOptions {
    fn default() -> Self {
        Self::from_config(&RecognizerConfig::default())
    }
}

impl RecognitionOptions {
    pub fn from_config(config: &RecognizerConfig) -> Self {
        Self {
            language: config.language.clone(),
            char_whitelist: config.whitelist.clone(),
            page_seg_mode: PageSegMode::SingleLine,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    pub confidence: Option<f32>,
}

impl Recognition {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confidence: None,
        }
    }
}

/// Reads the text printed in an image region.
pub trait TextRecognizer: Send {
    fn recognize(
        &mut self,
        region: &Frame,
        options: &RecognitionOptions,
    ) -> Result<Recognition, PlateError>;
}

/// Returns canned OCR output in order and repeats the last answer.
#[derive(Debug, Default)]
pub struct ScriptedRecognizer {
    script: VecDeque<Result<String, String>>,
    last: Option<Result<String, String>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedRecognizer {
    pub fn new<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: texts.into_iter().map(|t| Ok(t.into())).collect(),
            ..Default::default()
        }
    }

    /// A recognizer whose every call fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            script: VecDeque::from([Err(message.into())]),
            ..Default::default()
        }
    }

    /// Counter of `recognize` calls that stays readable after the
    /// recognizer has been moved into a pipeline.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl TextRecognizer for ScriptedRecognizer {
    fn recognize(
        &mut self,
        _region: &Frame,
        _options: &RecognitionOptions,
    ) -> Result<Recognition, PlateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(next) = self.script.pop_front() {
            self.last = Some(next);
        }
        match &self.last {
            Some(Ok(text)) => Ok(Recognition::text(text.clone())),
            Some(Err(message)) => Err(PlateError::Recognition(message.clone())),
            None => Ok(Recognition::text("")),
        }
    }
}

struct RecognitionRequest {
    region: Frame,
    options: RecognitionOptions,
}

/// Runs another recognizer on its own thread and bounds how long a caller
/// waits for it.
///
/// A request that times out keeps the worker busy until it returns; calls
/// made meanwhile fail fast with [`PlateError::RecognizerBusy`] instead of
/// piling up behind it.
pub struct TimeoutRecognizer {
    requests: Option<Sender<RecognitionRequest>>,
    responses: Receiver<Result<Recognition, PlateError>>,
    abandoned: usize,
    timeout: Duration,
    worker: Option<JoinHandle<()>>,
}

impl TimeoutRecognizer {
    pub fn spawn<R>(mut inner: R, timeout: Duration) -> Result<Self, PlateError>
    where
        R: TextRecognizer + 'static,
    {
        let (request_s, request_r) = bounded::<RecognitionRequest>(1);
        let (response_s, response_r) = unbounded();

        let worker = thread::Builder::new()
            .name("ocr_worker".to_string())
            .spawn(move || {
                for request in request_r {
                    let result = inner.recognize(&request.region, &request.options);
                    if response_s.send(result).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| PlateError::Recognition(format!("cannot start ocr worker: {e}")))?;

        Ok(Self {
            requests: Some(request_s),
            responses: response_r,
            abandoned: 0,
            timeout,
            worker: Some(worker),
        })
    }

    /// Discards answers to requests whose callers already gave up.
    fn drain_abandoned(&mut self) {
        while self.abandoned > 0 {
            match self.responses.try_recv() {
                Ok(_) => self.abandoned -= 1,
                Err(_) => break,
            }
        }
    }
}

impl TextRecognizer for TimeoutRecognizer {
    fn recognize(
        &mut self,
        region: &Frame,
        options: &RecognitionOptions,
    ) -> Result<Recognition, PlateError> {
        self.drain_abandoned();
        if self.abandoned > 0 {
            return Err(PlateError::RecognizerBusy);
        }

        let requests = self
            .requests
            .as_ref()
            .ok_or_else(|| PlateError::Recognition("ocr worker stopped".into()))?;
        let request = RecognitionRequest {
            region: region.clone(),
            options: options.clone(),
        };
        match requests.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => return Err(PlateError::RecognizerBusy),
            Err(TrySendError::Disconnected(_)) => {
                return Err(PlateError::Recognition("ocr worker stopped".into()))
            }
        }

        match self.responses.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                self.abandoned += 1;
                Err(PlateError::RecognitionTimeout(self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(PlateError::Recognition("ocr worker stopped".into()))
            }
        }
    }
}

impl Drop for TimeoutRecognizer {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop.
        self.requests.take();
        self.drain_abandoned();
        if self.abandoned > 0 {
            warn!("Leaving ocr worker behind, a recognition is still running");
            return;
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("ocr worker panicked");
            }
        }
    }
}
