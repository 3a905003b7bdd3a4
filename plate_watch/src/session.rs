//! Wires a frame source, the plate reader and the overlay renderer into a
//! running `rusted_pipe` graph.
//!
//! ```text
//! capture --+--> plate_reader --> events
//!           +--> overlay      --> canvas
//! ```
//!
//! Both consumers read through a one-frame buffer that never blocks the
//! capture node, so frames that arrive while a consumer is busy are dropped
//! instead of queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{bounded, unbounded, Receiver, RecvTimeoutError};
use rusted_pipe::buffers::synchronizers::timestamp::TimestampSynchronizer;
use rusted_pipe::graph::build::{link, Graph};
use rusted_pipe::graph::metrics::Metrics;
use rusted_pipe::graph::processor::{SourceNode, TerminalNode};
use tracing::info;

use crate::config::Config;
use crate::error::SessionError;
use crate::plate_detection::bounding_box_render::{Canvas, OverlayNode, OverlayRenderer};
use crate::plate_detection::frame_pipeline::{FramePipeline, PlateReaderNode};
use crate::plate_detection::video_reader::{CaptureNode, FrameSource};
use crate::plate_detection::{NewPlateEvent, SharedPlate};

const EVENT_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub capture_fps: usize,
    pub sample_interval: Duration,
    pub render_fps: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            capture_fps: config.capture.fps,
            sample_interval: config.pipeline.sample_interval(),
            render_fps: config.render.fps,
        }
    }
}

fn graph_error<E: std::fmt::Debug>(err: E) -> SessionError {
    SessionError::Graph(format!("{err:?}"))
}

pub struct Session {
    running: Arc<AtomicBool>,
    graph: Option<Graph>,
    events: Receiver<NewPlateEvent>,
    finished: Receiver<()>,
    plate: SharedPlate,
}

impl Session {
    /// Opens `source`, builds the graph and starts every node.
    ///
    /// Nothing is started when the source cannot be opened; a denied camera
    /// comes back as [`CaptureError::PermissionDenied`] so the caller can
    /// ask the user to re-enable it and try again.
    ///
    /// [`CaptureError::PermissionDenied`]: crate::error::CaptureError::PermissionDenied
    pub fn start<S, C, F>(
        mut source: S,
        pipeline: FramePipeline,
        renderer: OverlayRenderer,
        canvas: C,
        on_render: F,
        settings: SessionSettings,
    ) -> Result<Session, SessionError>
    where
        S: FrameSource + 'static,
        C: Canvas + Send + 'static,
        F: FnMut(&mut C) + Send + 'static,
    {
        source.open()?;

        let running = Arc::new(AtomicBool::new(true));
        let plate = pipeline.shared_plate();
        let (event_s, event_r) = unbounded::<NewPlateEvent>();
        let (finished_s, finished_r) = bounded::<()>(1);

        // Node that reads frames from the camera or file
        let mut capture_node = SourceNode::create_common(
            "capture".to_string(),
            Box::new(CaptureNode::new(
                source,
                settings.capture_fps,
                running.clone(),
                finished_s,
            )),
        );

        // Node that samples frames and looks for plates in them.
        let plate_reader_node = TerminalNode::create_common(
            "plate_reader".to_string(),
            Box::new(PlateReaderNode::new(
                pipeline,
                settings.sample_interval,
                event_s,
            )),
            false,
            1,
            1,
            Box::new(TimestampSynchronizer::default()),
            true,
        );

        // Node that draws the active plate on top of the live frames.
        let overlay_node = TerminalNode::create_common(
            "overlay".to_string(),
            Box::new(OverlayNode::new(
                renderer,
                canvas,
                on_render,
                plate.clone(),
                settings.render_fps,
            )),
            false,
            1,
            1,
            Box::new(TimestampSynchronizer::default()),
            true,
        );

        // Frame -> PlateReader
        link(
            capture_node.write_channel.writer.c1(),
            plate_reader_node
                .read_channel
                .channels
                .write()
                .map_err(graph_error)?
                .c1(),
        )
        .map_err(graph_error)?;

        // Frame -> Overlay
        link(
            capture_node.write_channel.writer.c1(),
            overlay_node
                .read_channel
                .channels
                .write()
                .map_err(graph_error)?
                .c1(),
        )
        .map_err(graph_error)?;

        let mut graph = Graph::new(Metrics::no_metrics());
        graph.start_terminal_node(plate_reader_node);
        graph.start_terminal_node(overlay_node);
        graph.start_source_node(capture_node);

        info!(
            sample_ms = settings.sample_interval.as_millis() as u64,
            render_fps = settings.render_fps,
            "Session started"
        );
        Ok(Session {
            running,
            graph: Some(graph),
            events: event_r,
            finished: finished_r,
            plate,
        })
    }

    /// New plates, in detection order.
    pub fn events(&self) -> &Receiver<NewPlateEvent> {
        &self.events
    }

    pub fn active_plate(&self) -> SharedPlate {
        self.plate.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Blocks until the source runs out of frames.
    pub fn wait_until_finished(&self) {
        self.finished.recv().ok();
    }

    /// Hands every new plate to `on_event` until the source has ended and the
    /// graph is stopped, including a plate read from the last frame in flight.
    pub fn run<H: FnMut(NewPlateEvent)>(&mut self, mut on_event: H) {
        loop {
            match self.events.recv_timeout(EVENT_POLL) {
                Ok(event) => on_event(event),
                // Stopping drops the plate reader and with it the event
                // sender, so the next receive reports the disconnect.
                Err(RecvTimeoutError::Timeout) if self.graph.is_some() => {
                    if !self.is_running() {
                        self.stop();
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    /// Stops every node and waits for them.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(graph) = self.graph.take() {
            graph.stop(true, None);
            info!("Session stopped");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}
