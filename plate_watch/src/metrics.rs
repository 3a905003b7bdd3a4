use lazy_static::lazy_static;
use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, Encoder, Histogram, IntCounter, IntCounterVec, Registry,
    TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref FRAME_OUTCOMES: IntCounterVec = register_int_counter_vec_with_registry!(
        "plate_watch_frame_outcomes_total",
        "Sampled frames by pipeline outcome",
        &["outcome"],
        REGISTRY
    )
    .expect("frame outcome counter");
    pub static ref SKIPPED_FRAMES: IntCounter = register_int_counter_with_registry!(
        "plate_watch_skipped_frames_total",
        "Captured frames that arrived between two sampling ticks",
        REGISTRY
    )
    .expect("skipped frame counter");
    pub static ref NEW_PLATES: IntCounter = register_int_counter_with_registry!(
        "plate_watch_new_plates_total",
        "Distinct plates reported in this session",
        REGISTRY
    )
    .expect("new plate counter");
    pub static ref RECOGNITION_SECONDS: Histogram = register_histogram_with_registry!(
        "plate_watch_recognition_seconds",
        "Time spent in text recognition",
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
        REGISTRY
    )
    .expect("recognition histogram");
}

/// Label values for [`FRAME_OUTCOMES`].
pub mod outcome {
    pub const BUSY: &str = "busy";
    pub const NO_REGION: &str = "no_region";
    pub const REJECTED_GEOMETRY: &str = "rejected_geometry";
    pub const UNREAD: &str = "unread";
    pub const PLATE: &str = "plate";
    pub const ERROR: &str = "error";
}

pub fn record_outcome(label: &str) {
    FRAME_OUTCOMES.with_label_values(&[label]).inc();
}

/// Current metrics in the prometheus text format.
pub fn gather() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        return format!("# failed to encode metrics: {e}\n");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
