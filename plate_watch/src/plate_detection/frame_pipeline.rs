use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crossbeam::channel::Sender;
use rusted_pipe::channels::read_channel::InputGenerator;
use rusted_pipe::channels::typed_read_channel::ReadChannel1;
use rusted_pipe::graph::processor::TerminalProcessor;
use rusted_pipe::RustedPipeError;
use tracing::{debug, info, warn};

use super::plate_text::read_plate;
use super::region_detector::RegionDetector;
use super::text_recognizer::{RecognitionOptions, TextRecognizer};
use super::{ActivePlate, Frame, NewPlateEvent, PlateRect, SharedPlate};
use crate::error::PlateError;
use crate::metrics::{self, outcome};
use crate::utils::FpsLimiter;

/// Narrowest plate shape accepted, width over height.
pub const MIN_ASPECT_RATIO: f64 = 2.0;
/// Widest plate shape accepted, width over height.
pub const MAX_ASPECT_RATIO: f64 = 5.0;

/// Plate-like geometry: aspect ratio within `[2.0, 5.0]`.
pub fn accepts_geometry(rect: &PlateRect) -> bool {
    rect.aspect_ratio()
        .map_or(false, |ratio| (MIN_ASPECT_RATIO..=MAX_ASPECT_RATIO).contains(&ratio))
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Held for the whole of one frame; releases the processing flag on drop,
/// whichever way the cycle ends.
struct ProcessingGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Turns sampled frames into at most one plate read each.
///
/// Only one frame is processed at a time. A call made while another one is
/// in flight returns immediately and the frame is dropped.
pub struct FramePipeline {
    detector: Mutex<Box<dyn RegionDetector>>,
    recognizer: Mutex<Box<dyn TextRecognizer>>,
    options: RecognitionOptions,
    processing: AtomicBool,
    plate: SharedPlate,
    seen: Mutex<HashSet<String>>,
}

impl FramePipeline {
    pub fn new<D, R>(detector: D, recognizer: R) -> Self
    where
        D: RegionDetector + 'static,
        R: TextRecognizer + 'static,
    {
        Self::with_options(detector, recognizer, RecognitionOptions::default())
    }

    pub fn with_options<D, R>(detector: D, recognizer: R, options: RecognitionOptions) -> Self
    where
        D: RegionDetector + 'static,
        R: TextRecognizer + 'static,
    {
        Self {
            detector: Mutex::new(Box::new(detector)),
            recognizer: Mutex::new(Box::new(recognizer)),
            options,
            processing: AtomicBool::new(false),
            plate: SharedPlate::default(),
            seen: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    pub fn active_plate(&self) -> ActivePlate {
        self.plate.snapshot()
    }

    /// Handle for readers that outlive a borrow of the pipeline.
    pub fn shared_plate(&self) -> SharedPlate {
        self.plate.clone()
    }

    pub fn seen_count(&self) -> usize {
        lock(&self.seen).len()
    }

    fn try_begin(&self) -> Option<ProcessingGuard<'_>> {
        self.processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ProcessingGuard {
                flag: &self.processing,
            })
    }

    /// Runs detection and recognition on `frame`.
    ///
    /// Returns an event only the first time a given plate text is read.
    /// Provider failures are logged and swallowed; the next frame is a
    /// fresh attempt.
    pub fn process_frame(&self, frame: &Frame) -> Option<NewPlateEvent> {
        let _guard = match self.try_begin() {
            Some(guard) => guard,
            None => {
                debug!("Frame dropped, previous frame still in flight");
                metrics::record_outcome(outcome::BUSY);
                return None;
            }
        };

        if frame.is_empty() {
            debug!("Skipping empty frame");
            return None;
        }

        match self.run_cycle(frame) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Processing error");
                metrics::record_outcome(outcome::ERROR);
                None
            }
        }
    }

    fn run_cycle(&self, frame: &Frame) -> Result<Option<NewPlateEvent>, PlateError> {
        let region = lock(&self.detector).detect(frame)?;
        let Some(region) = region else {
            metrics::record_outcome(outcome::NO_REGION);
            return Ok(None);
        };

        if !accepts_geometry(&region) {
            debug!(?region, ratio = ?region.aspect_ratio(), "Region rejected by geometry");
            metrics::record_outcome(outcome::REJECTED_GEOMETRY);
            return Ok(None);
        }

        // The box goes on screen before recognition finishes.
        self.plate.update(|plate| {
            plate.region = Some(region);
            plate.detected_at = Some(Instant::now());
        });

        let cropped = frame.crop(&region)?;
        let timer = metrics::RECOGNITION_SECONDS.start_timer();
        let recognition = lock(&self.recognizer).recognize(&cropped, &self.options)?;
        timer.observe_duration();

        let Some(text) = read_plate(&recognition.text) else {
            debug!(raw = recognition.text.trim(), "Unresolved read");
            metrics::record_outcome(outcome::UNREAD);
            return Ok(None);
        };

        self.plate.update(|plate| plate.text = Some(text.clone()));
        metrics::record_outcome(outcome::PLATE);

        if !lock(&self.seen).insert(text.clone()) {
            debug!(plate = %text, "Plate seen again");
            return Ok(None);
        }

        metrics::NEW_PLATES.inc();
        info!(plate = %text, confidence = ?recognition.confidence, "New plate detected");
        Ok(Some(NewPlateEvent::new(text)))
    }
}

/// Graph stage that feeds sampled frames to a [`FramePipeline`] and forwards
/// new plates to `events`.
///
/// At most one frame per sampling interval gets through; the rest are
/// skipped.
pub struct PlateReaderNode {
    pipeline: FramePipeline,
    sampler: FpsLimiter,
    events: Sender<NewPlateEvent>,
}

impl PlateReaderNode {
    pub fn new(
        pipeline: FramePipeline,
        sample_interval: Duration,
        events: Sender<NewPlateEvent>,
    ) -> Self {
        Self {
            pipeline,
            sampler: FpsLimiter::with_period(sample_interval),
            events,
        }
    }

    fn offer(&mut self, frame: &Frame) {
        if !self.sampler.ready() {
            metrics::SKIPPED_FRAMES.inc();
            return;
        }
        if let Some(event) = self.pipeline.process_frame(frame) {
            if self.events.send(event).is_err() {
                debug!("Nobody is listening for plate events");
            }
        }
    }
}

impl TerminalProcessor for PlateReaderNode {
    type INPUT = ReadChannel1<Frame>;
    fn handle(
        &mut self,
        mut input: <Self::INPUT as InputGenerator>::INPUT,
    ) -> Result<(), RustedPipeError> {
        if let Some(frame) = input.c1_owned() {
            self.offer(&frame.data);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plate_detection::region_detector::StaticRegionDetector;
    use crate::plate_detection::text_recognizer::{PageSegMode, Recognition, ScriptedRecognizer};
    use crossbeam::channel::{bounded, Receiver, Sender};
    use image::Rgba;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    fn plate_rect() -> PlateRect {
        PlateRect::new(100, 50, 200, 60)
    }

    fn frame() -> Frame {
        Frame::blank(640, 480)
    }

    #[test]
    fn geometry_bounds_are_inclusive() {
        assert!(accepts_geometry(&PlateRect::new(0, 0, 100, 50)));
        assert!(accepts_geometry(&PlateRect::new(0, 0, 250, 50)));
        assert!(!accepts_geometry(&PlateRect::new(0, 0, 99, 50)));
        assert!(!accepts_geometry(&PlateRect::new(0, 0, 251, 50)));
        assert!(!accepts_geometry(&PlateRect::new(0, 0, 50, 0)));
    }

    #[test]
    fn valid_read_sets_text_and_emits_once() {
        let pipeline = FramePipeline::new(
            StaticRegionDetector::always(plate_rect()),
            ScriptedRecognizer::new(["A B-123 XY"]),
        );

        let event = pipeline.process_frame(&frame()).unwrap();
        assert_eq!(event.text, "AB123XY");

        let plate = pipeline.active_plate();
        assert_eq!(plate.text.as_deref(), Some("AB123XY"));
        assert_eq!(plate.region, Some(plate_rect()));
        assert!(plate.detected_at.is_some());

        for _ in 0..5 {
            assert!(pipeline.process_frame(&frame()).is_none());
        }
        assert_eq!(pipeline.seen_count(), 1);
    }

    #[test]
    fn re_read_refreshes_timestamp_without_event() {
        let pipeline = FramePipeline::new(
            StaticRegionDetector::always(plate_rect()),
            ScriptedRecognizer::new(["AB123XY"]),
        );
        pipeline.process_frame(&frame()).unwrap();
        let first = pipeline.active_plate().detected_at.unwrap();
        thread::sleep(std::time::Duration::from_millis(5));
        assert!(pipeline.process_frame(&frame()).is_none());
        assert!(pipeline.active_plate().detected_at.unwrap() > first);
    }

    #[test]
    fn invalid_read_updates_region_only() {
        let pipeline = FramePipeline::new(
            StaticRegionDetector::always(plate_rect()),
            ScriptedRecognizer::new(["1234567"]),
        );
        assert!(pipeline.process_frame(&frame()).is_none());

        let plate = pipeline.active_plate();
        assert_eq!(plate.text, None);
        assert_eq!(plate.region, Some(plate_rect()));
        assert_eq!(pipeline.seen_count(), 0);
    }

    #[test]
    fn unread_keeps_previous_text() {
        let pipeline = FramePipeline::new(
            StaticRegionDetector::always(plate_rect()),
            ScriptedRecognizer::new(["AB123XY", "??"]),
        );
        pipeline.process_frame(&frame()).unwrap();
        assert!(pipeline.process_frame(&frame()).is_none());
        assert_eq!(pipeline.active_plate().text.as_deref(), Some("AB123XY"));
    }

    #[test]
    fn square_region_never_reaches_recognizer() {
        let ocr = ScriptedRecognizer::new(["AB123XY"]);
        let calls = ocr.call_counter();
        let pipeline =
            FramePipeline::new(StaticRegionDetector::always(PlateRect::new(10, 10, 80, 80)), ocr);

        assert!(pipeline.process_frame(&frame()).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(pipeline.active_plate(), ActivePlate::default());
    }

    #[test]
    fn no_region_leaves_state_alone() {
        let ocr = ScriptedRecognizer::new(["AB123XY"]);
        let calls = ocr.call_counter();
        let pipeline = FramePipeline::new(StaticRegionDetector::default(), ocr);

        assert!(pipeline.process_frame(&frame()).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(pipeline.active_plate(), ActivePlate::default());
        assert!(!pipeline.is_busy());
    }

    #[test]
    fn empty_frame_is_ignored() {
        let ocr = ScriptedRecognizer::new(["AB123XY"]);
        let calls = ocr.call_counter();
        let pipeline = FramePipeline::new(StaticRegionDetector::always(plate_rect()), ocr);
        assert!(pipeline.process_frame(&Frame::blank(0, 0)).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(pipeline.active_plate(), ActivePlate::default());
    }

    #[test]
    fn recognizer_failure_releases_the_lock() {
        let pipeline = FramePipeline::new(
            StaticRegionDetector::always(plate_rect()),
            ScriptedRecognizer::failing("engine crashed"),
        );
        assert!(pipeline.process_frame(&frame()).is_none());
        assert!(!pipeline.is_busy());
        assert_eq!(pipeline.active_plate().text, None);
        assert_eq!(pipeline.seen_count(), 0);
        // Every tick is a new attempt.
        assert!(pipeline.process_frame(&frame()).is_none());
        assert!(!pipeline.is_busy());
    }

    #[test]
    fn region_outside_frame_is_an_error_not_a_panic() {
        let ocr = ScriptedRecognizer::new(["AB123XY"]);
        let calls = ocr.call_counter();
        let pipeline =
            FramePipeline::new(StaticRegionDetector::always(PlateRect::new(600, 10, 90, 30)), ocr);
        assert!(pipeline.process_frame(&frame()).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!pipeline.is_busy());
    }

    #[test]
    fn distinct_plates_each_emit_once() {
        let pipeline = FramePipeline::new(
            StaticRegionDetector::always(plate_rect()),
            ScriptedRecognizer::new(["AB123XY", "CD45Z", "AB123XY", "CD45Z", "E1F"]),
        );
        let events: Vec<String> = (0..5)
            .filter_map(|_| pipeline.process_frame(&frame()))
            .map(|event| event.text)
            .collect();
        assert_eq!(events, ["AB123XY", "CD45Z", "E1F"]);
    }

    type Received = Arc<Mutex<Vec<(u32, u32, Rgba<u8>, RecognitionOptions)>>>;

    /// Remembers the region and options of every call.
    struct SpyRecognizer {
        received: Received,
    }

    impl TextRecognizer for SpyRecognizer {
        fn recognize(
            &mut self,
            region: &Frame,
            options: &RecognitionOptions,
        ) -> Result<Recognition, PlateError> {
            let corner = *region.image().get_pixel(0, 0);
            lock(&self.received).push((region.width(), region.height(), corner, options.clone()));
            Ok(Recognition::text("AB123XY"))
        }
    }

    #[test]
    fn recognizer_gets_the_region_and_plate_options() {
        let received = Received::default();
        let pipeline = FramePipeline::new(
            StaticRegionDetector::always(plate_rect()),
            SpyRecognizer {
                received: received.clone(),
            },
        );

        // Mark the region's top-left pixel so the crop origin is visible.
        let mut image = image::RgbaImage::new(640, 480);
        image.put_pixel(100, 50, Rgba([255, 0, 0, 255]));
        pipeline.process_frame(&Frame::new(image)).unwrap();

        let received = lock(&received);
        assert_eq!(received.len(), 1);
        let (width, height, corner, options) = &received[0];
        assert_eq!((*width, *height), (200, 60));
        assert_eq!(*corner, Rgba([255, 0, 0, 255]));
        assert_eq!(options.language, "eng");
        assert_eq!(options.char_whitelist, "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789");
        assert_eq!(options.page_seg_mode, PageSegMode::SingleLine);
    }

    struct GatedRecognizer {
        entered: Sender<()>,
        release: Receiver<()>,
        calls: Arc<AtomicUsize>,
    }

    impl TextRecognizer for GatedRecognizer {
        fn recognize(
            &mut self,
            _region: &Frame,
            _options: &RecognitionOptions,
        ) -> Result<Recognition, PlateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.send(()).ok();
            self.release.recv().ok();
            Ok(Recognition::text("AB123XY"))
        }
    }

    #[test]
    fn reader_node_samples_once_per_interval() {
        let ocr = ScriptedRecognizer::new(["AB123XY", "CD45Z"]);
        let calls = ocr.call_counter();
        let pipeline = FramePipeline::new(StaticRegionDetector::always(plate_rect()), ocr);
        let (events_s, events_r) = crossbeam::channel::unbounded();
        let mut node = PlateReaderNode::new(pipeline, Duration::from_millis(50), events_s);

        node.offer(&frame());
        node.offer(&frame());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(events_r.try_recv().unwrap().text, "AB123XY");

        thread::sleep(Duration::from_millis(60));
        node.offer(&frame());
        assert_eq!(events_r.try_recv().unwrap().text, "CD45Z");
        assert!(events_r.try_recv().is_err());
    }

    #[test]
    fn overlapping_call_is_a_no_op() {
        let (entered_s, entered_r) = bounded(1);
        let (release_s, release_r) = bounded(1);
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = Arc::new(FramePipeline::new(
            StaticRegionDetector::always(plate_rect()),
            GatedRecognizer {
                entered: entered_s,
                release: release_r,
                calls: calls.clone(),
            },
        ));

        let worker = {
            let pipeline = pipeline.clone();
            thread::spawn(move || pipeline.process_frame(&frame()))
        };
        entered_r.recv().unwrap();
        assert!(pipeline.is_busy());

        let before = pipeline.active_plate();
        assert!(pipeline.process_frame(&frame()).is_none());
        assert_eq!(pipeline.active_plate(), before);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        release_s.send(()).unwrap();
        let event = worker.join().unwrap();
        assert_eq!(event.map(|e| e.text).as_deref(), Some("AB123XY"));
        assert_eq!(pipeline.seen_count(), 1);
        assert!(!pipeline.is_busy());
    }
}
