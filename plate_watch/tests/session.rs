use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use plate_watch::error::PlateError;
use plate_watch::plate_detection::bounding_box_render::{OverlayRenderer, RecordingCanvas};
use plate_watch::plate_detection::frame_pipeline::FramePipeline;
use plate_watch::plate_detection::region_detector::StaticRegionDetector;
use plate_watch::plate_detection::text_recognizer::{
    Recognition, RecognitionOptions, ScriptedRecognizer, TextRecognizer,
};
use plate_watch::plate_detection::video_reader::FrameReplay;
use plate_watch::plate_detection::{Frame, PlateRect};
use plate_watch::session::{Session, SessionSettings};

fn settings() -> SessionSettings {
    SessionSettings {
        capture_fps: 100,
        sample_interval: Duration::from_millis(10),
        render_fps: 100,
    }
}

fn pipeline() -> FramePipeline {
    FramePipeline::new(
        StaticRegionDetector::always(PlateRect::new(100, 50, 200, 60)),
        ScriptedRecognizer::new(["AB123XY"]),
    )
}

#[test]
fn live_session_reports_plate_once_and_renders() {
    let renders = Arc::new(AtomicUsize::new(0));
    let counter = renders.clone();
    let mut session = Session::start(
        FrameReplay::new(vec![Frame::blank(640, 480)], true),
        pipeline(),
        OverlayRenderer::default(),
        RecordingCanvas::default(),
        move |_canvas: &mut RecordingCanvas| {
            counter.fetch_add(1, Ordering::SeqCst);
        },
        settings(),
    )
    .unwrap();

    let event = session
        .events()
        .recv_timeout(Duration::from_secs(5))
        .unwrap();
    assert_eq!(event.text, "AB123XY");

    std::thread::sleep(Duration::from_millis(200));
    session.stop();

    assert!(session.events().try_recv().is_err());
    assert!(renders.load(Ordering::SeqCst) > 0);
    assert_eq!(
        session.active_plate().snapshot().text.as_deref(),
        Some("AB123XY")
    );
}

#[test]
fn session_ends_with_its_source() {
    let session = Session::start(
        FrameReplay::new(vec![Frame::blank(64, 48); 3], false),
        pipeline(),
        OverlayRenderer::default(),
        RecordingCanvas::default(),
        |_canvas: &mut RecordingCanvas| {},
        settings(),
    )
    .unwrap();
    session.wait_until_finished();
    assert!(!session.is_running());
}

#[test]
fn denied_camera_is_reported_before_starting() {
    let err = Session::start(
        FrameReplay::denied(),
        pipeline(),
        OverlayRenderer::default(),
        RecordingCanvas::default(),
        |_canvas: &mut RecordingCanvas| {},
        settings(),
    )
    .err()
    .unwrap();
    assert!(err.is_permission_denied());
}

struct SlowRecognizer {
    delay: Duration,
}

impl TextRecognizer for SlowRecognizer {
    fn recognize(
        &mut self,
        _region: &Frame,
        _options: &RecognitionOptions,
    ) -> Result<Recognition, PlateError> {
        std::thread::sleep(self.delay);
        Ok(Recognition::text("CD45Z"))
    }
}

#[test]
fn plate_from_the_last_frame_is_not_lost() {
    let pipeline = FramePipeline::new(
        StaticRegionDetector::always(PlateRect::new(100, 50, 200, 60)),
        SlowRecognizer {
            delay: Duration::from_millis(400),
        },
    );
    let mut session = Session::start(
        FrameReplay::new(vec![Frame::blank(640, 480)], false),
        pipeline,
        OverlayRenderer::default(),
        RecordingCanvas::default(),
        |_canvas: &mut RecordingCanvas| {},
        settings(),
    )
    .unwrap();

    let mut plates = Vec::new();
    session.run(|event| plates.push(event.text));

    assert_eq!(plates, ["CD45Z"]);
    assert!(!session.is_running());
}
