use std::io::BufRead;
use std::path::PathBuf;

use plate_watch::config::Config;
use plate_watch::error::SessionError;
use plate_watch::metrics;
use plate_watch::plate_detection::bounding_box_render::{MatCanvas, OverlayRenderer};
use plate_watch::plate_detection::frame_pipeline::FramePipeline;
use plate_watch::plate_detection::history::PlateHistory;
use plate_watch::plate_detection::region_detector::ContourRegionDetector;
use plate_watch::plate_detection::tesseract_ocr::TesseractRecognizer;
use plate_watch::plate_detection::text_recognizer::{RecognitionOptions, TimeoutRecognizer};
use plate_watch::plate_detection::video_reader::VideoReader;
use plate_watch::session::{Session, SessionSettings};
use tracing::{error, info, warn};

fn build_pipeline(config: &Config) -> Result<FramePipeline, String> {
    let options = RecognitionOptions::from_config(&config.recognizer);
    let tesseract =
        TesseractRecognizer::new(&config.recognizer.data_path, &options, &config.detector)
            .map_err(|e| e.to_string())?;
    let recognizer =
        TimeoutRecognizer::spawn(tesseract, config.pipeline.recognition_timeout())
            .map_err(|e| e.to_string())?;
    let detector = ContourRegionDetector::new(config.detector.clone());
    Ok(FramePipeline::with_options(detector, recognizer, options))
}

fn setup_session(config: &Config, pipeline: FramePipeline) -> Result<Session, SessionError> {
    let source = VideoReader::from_config(&config.capture);
    let canvas = match config.render.output.as_deref() {
        Some(path) => MatCanvas::with_save_to_file(path, config.render.fps as f64),
        None => MatCanvas::new(),
    };
    Session::start(
        source,
        pipeline,
        OverlayRenderer::default(),
        canvas,
        |canvas: &mut MatCanvas| {
            if let Err(e) = canvas.finish() {
                warn!(error = %e, "Cannot write rendered frame");
            }
        },
        SessionSettings::from_config(config),
    )
}

/// Shows the manual enable prompt. Returns false when the user gave up.
fn wait_for_camera_enable() -> bool {
    eprintln!("Camera access required. Grant access, then press Enter to enable the camera.");
    let mut line = String::new();
    matches!(std::io::stdin().lock().read_line(&mut line), Ok(n) if n > 0)
}

fn main() {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = match &config_path {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config from {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        source = config.capture.source,
        sample_ms = config.pipeline.sample_interval_ms,
        timeout_ms = config.pipeline.recognition_timeout_ms,
        "Starting plate watch"
    );

    let mut session = loop {
        let pipeline = match build_pipeline(&config) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                error!(error = %e, "Cannot set up the recognizer");
                std::process::exit(1);
            }
        };
        match setup_session(&config, pipeline) {
            Ok(session) => break session,
            Err(e) if e.is_permission_denied() => {
                warn!(error = %e, "Camera not available");
                if !wait_for_camera_enable() {
                    std::process::exit(1);
                }
            }
            Err(e) => {
                error!(error = %e, "Error initializing camera");
                std::process::exit(1);
            }
        }
    };

    let mut history = PlateHistory::with_capacity(config.history.capacity);
    session.run(|event| {
        history.push(event);
        println!("Detected plates ({}):\n{history}", history.len());
    });

    if history.is_empty() {
        info!("No plates detected");
    }
    info!("Done");
    info!("\n{}", metrics::gather());
}
