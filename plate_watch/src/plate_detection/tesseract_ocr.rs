use leptess::tesseract::TessApi;
use opencv::imgproc::adaptive_threshold;
use opencv::imgproc::ADAPTIVE_THRESH_GAUSSIAN_C;
use opencv::imgproc::THRESH_BINARY;
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;
use opencv::prelude::MatTraitConstManual;
use std::ffi::CString;
use tracing::debug;

use super::opencv_support::to_gray;
use super::text_recognizer::{Recognition, RecognitionOptions, TextRecognizer};
use super::Frame;
use crate::config::DetectorConfig;
use crate::error::PlateError;

fn c_string(value: &str) -> Result<CString, PlateError> {
    CString::new(value).map_err(|e| PlateError::Recognition(format!("bad tesseract value: {e}")))
}

/// Tesseract backed recognizer. Regions are binarized with an adaptive
/// threshold before they are handed to the OCR engine.
pub struct TesseractRecognizer {
    ocr: TessApi,
    data_path: String,
    applied: Option<RecognitionOptions>,
    block_size: i32,
    threshold_c: f64,
}

impl TesseractRecognizer {
    pub fn new(
        data_path: &str,
        options: &RecognitionOptions,
        detector: &DetectorConfig,
    ) -> Result<Self, PlateError> {
        let ocr = Self::init(data_path, &options.language)?;
        let mut recognizer = Self {
            ocr,
            data_path: data_path.to_string(),
            applied: None,
            block_size: detector.threshold_block_size,
            threshold_c: detector.threshold_c,
        };
        recognizer.apply_options(options)?;
        Ok(recognizer)
    }

    fn init(data_path: &str, language: &str) -> Result<TessApi, PlateError> {
        TessApi::new(Some(data_path), language).map_err(|e| {
            PlateError::Recognition(format!("cannot load tesseract '{language}': {e:?}"))
        })
    }

    fn set_variable(&mut self, name: &str, value: &str) -> Result<(), PlateError> {
        let name_cstr = c_string(name)?;
        let value_cstr = c_string(value)?;
        self.ocr
            .raw
            .set_variable(&name_cstr, &value_cstr)
            .map_err(|e| PlateError::Recognition(format!("cannot set {name}: {e:?}")))
    }

    /// Pushes options into tesseract, only when they differ from the last
    /// ones applied.
    fn apply_options(&mut self, options: &RecognitionOptions) -> Result<(), PlateError> {
        if self.applied.as_ref() == Some(options) {
            return Ok(());
        }
        let language_changed = self
            .applied
            .as_ref()
            .map_or(false, |applied| applied.language != options.language);
        if language_changed {
            self.ocr = Self::init(&self.data_path, &options.language)?;
        }
        self.set_variable("tessedit_char_whitelist", &options.char_whitelist)?;
        self.set_variable(
            "tessedit_pageseg_mode",
            options.page_seg_mode.tesseract_value(),
        )?;
        self.applied = Some(options.clone());
        Ok(())
    }

    fn binarize(&self, region: &Frame) -> Result<Mat, PlateError> {
        let grey = to_gray(region)?;
        let mut processed = Mat::default();
        adaptive_threshold(
            &grey,
            &mut processed,
            255.0,
            ADAPTIVE_THRESH_GAUSSIAN_C,
            THRESH_BINARY,
            self.block_size,
            self.threshold_c,
        )?;
        Ok(processed)
    }
}

// TessApi holds raw pointers into the tesseract library; the recognizer is
// only ever driven from one thread at a time.
unsafe impl Send for TesseractRecognizer {}

impl TextRecognizer for TesseractRecognizer {
    fn recognize(
        &mut self,
        region: &Frame,
        options: &RecognitionOptions,
    ) -> Result<Recognition, PlateError> {
        self.apply_options(options)?;
        let processed = self.binarize(region)?;

        let cols = processed.cols();
        let rows = processed.rows();
        self.ocr
            .raw
            .set_image(processed.data_bytes()?, cols, rows, 1, cols)
            .map_err(|e| PlateError::Recognition(format!("cannot set image: {e:?}")))?;
        let text = self
            .ocr
            .get_utf8_text()
            .map_err(|e| PlateError::Recognition(format!("invalid ocr output: {e:?}")))?;
        let confidence = self.ocr.mean_text_conf();

        debug!(text = text.trim(), confidence, "OCR");
        Ok(Recognition {
            text,
            confidence: Some(confidence as f32),
        })
    }
}
