use std::time::Instant;

use image::Rgba;
use rusted_pipe::channels::read_channel::InputGenerator;
use rusted_pipe::channels::typed_read_channel::ReadChannel1;
use rusted_pipe::graph::processor::TerminalProcessor;
use rusted_pipe::RustedPipeError;
use tracing::warn;

use super::{ActivePlate, Frame, PlateRect, SharedPlate};
use crate::error::PlateError;
use crate::utils::FpsLimiter;

/// 2D drawing surface the overlay is painted on.
pub trait Canvas {
    /// Clears the surface and draws `frame` at the origin, resizing the
    /// surface to the frame if needed.
    fn draw_frame(&mut self, frame: &Frame) -> Result<(), PlateError>;
    fn stroke_rect(
        &mut self,
        rect: &PlateRect,
        color: Rgba<u8>,
        line_width: i32,
    ) -> Result<(), PlateError>;
    fn fill_rect(&mut self, rect: &PlateRect, color: Rgba<u8>) -> Result<(), PlateError>;
    /// Rendered width of `text` in pixels.
    fn measure_text(&self, text: &str, font_px: i32) -> Result<i32, PlateError>;
    /// Draws `text` with its bottom-left corner at `(x, y)`.
    fn fill_text(
        &mut self,
        text: &str,
        x: i32,
        y: i32,
        font_px: i32,
        color: Rgba<u8>,
    ) -> Result<(), PlateError>;
}

#[derive(Debug, Clone)]
pub struct OverlayStyle {
    pub box_color: Rgba<u8>,
    pub line_width: i32,
    pub font_px: i32,
    pub label_color: Rgba<u8>,
    pub label_background: Rgba<u8>,
    pub placeholder: String,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            box_color: Rgba([0x3b, 0x82, 0xf6, 255]),
            line_width: 3,
            font_px: 24,
            label_color: Rgba([0x3b, 0x82, 0xf6, 255]),
            label_background: Rgba([30, 41, 59, 230]),
            placeholder: "Detecting...".to_string(),
        }
    }
}

/// Paints the live frame plus the active plate while it is fresh. Never
/// touches the plate state.
#[derive(Debug, Clone, Default)]
pub struct OverlayRenderer {
    style: OverlayStyle,
}

impl OverlayRenderer {
    pub fn new(style: OverlayStyle) -> Self {
        Self { style }
    }

    /// Returns whether a plate overlay was drawn on top of the frame.
    pub fn render_tick<C: Canvas + ?Sized>(
        &self,
        canvas: &mut C,
        frame: &Frame,
        plate: &ActivePlate,
        now: Instant,
    ) -> Result<bool, PlateError> {
        canvas.draw_frame(frame)?;

        let Some(rect) = plate.region.filter(|_| plate.is_fresh(now)) else {
            return Ok(false);
        };

        canvas.stroke_rect(&rect, self.style.box_color, self.style.line_width)?;

        let text = plate.text.as_deref().unwrap_or(&self.style.placeholder);
        let text_width = canvas.measure_text(text, self.style.font_px)?;
        let header = PlateRect::new(rect.x - 5, rect.y - 34, text_width + 10, 30);
        canvas.fill_rect(&header, self.style.label_background)?;
        canvas.fill_text(
            text,
            rect.x,
            rect.y - 10,
            self.style.font_px,
            self.style.label_color,
        )?;
        Ok(true)
    }
}

/// Graph stage that paints every incoming frame with the current plate
/// snapshot, at most `fps` times a second. `on_render` sees the canvas after
/// each paint.
pub struct OverlayNode<C, F> {
    renderer: OverlayRenderer,
    canvas: C,
    on_render: F,
    plate: SharedPlate,
    fps_limiter: FpsLimiter,
}

impl<C, F> OverlayNode<C, F>
where
    C: Canvas + Send,
    F: FnMut(&mut C) + Send,
{
    pub fn new(
        renderer: OverlayRenderer,
        canvas: C,
        on_render: F,
        plate: SharedPlate,
        fps: usize,
    ) -> Self {
        Self {
            renderer,
            canvas,
            on_render,
            plate,
            fps_limiter: FpsLimiter::new(fps),
        }
    }

    fn paint(&mut self, frame: &Frame) {
        if !self.fps_limiter.ready() {
            return;
        }
        let snapshot = self.plate.snapshot();
        match self
            .renderer
            .render_tick(&mut self.canvas, frame, &snapshot, Instant::now())
        {
            Ok(_) => (self.on_render)(&mut self.canvas),
            Err(e) => warn!(error = %e, "Render error"),
        }
    }
}

impl<C, F> TerminalProcessor for OverlayNode<C, F>
where
    C: Canvas + Send,
    F: FnMut(&mut C) + Send,
{
    type INPUT = ReadChannel1<Frame>;
    fn handle(
        &mut self,
        mut input: <Self::INPUT as InputGenerator>::INPUT,
    ) -> Result<(), RustedPipeError> {
        if let Some(frame) = input.c1_owned() {
            self.paint(&frame.data);
        }
        Ok(())
    }
}

// The graph only ever drives a processor from its own worker thread.
unsafe impl<C: Send, F: Send> Sync for OverlayNode<C, F> {}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    Frame { width: u32, height: u32 },
    StrokeRect { rect: PlateRect, color: Rgba<u8>, line_width: i32 },
    FillRect { rect: PlateRect, color: Rgba<u8> },
    Text { text: String, x: i32, y: i32 },
}

/// Canvas that only records what would have been drawn.
#[derive(Debug, Default)]
pub struct RecordingCanvas {
    pub commands: Vec<DrawCommand>,
}

impl RecordingCanvas {
    /// Fixed-advance estimate, 0.6 of the font size per character.
    pub fn text_width(text: &str, font_px: i32) -> i32 {
        text.chars().count() as i32 * font_px * 3 / 5
    }
}

impl Canvas for RecordingCanvas {
    fn draw_frame(&mut self, frame: &Frame) -> Result<(), PlateError> {
        self.commands.clear();
        self.commands.push(DrawCommand::Frame {
            width: frame.width(),
            height: frame.height(),
        });
        Ok(())
    }

    fn stroke_rect(
        &mut self,
        rect: &PlateRect,
        color: Rgba<u8>,
        line_width: i32,
    ) -> Result<(), PlateError> {
        self.commands.push(DrawCommand::StrokeRect {
            rect: *rect,
            color,
            line_width,
        });
        Ok(())
    }

    fn fill_rect(&mut self, rect: &PlateRect, color: Rgba<u8>) -> Result<(), PlateError> {
        self.commands.push(DrawCommand::FillRect { rect: *rect, color });
        Ok(())
    }

    fn measure_text(&self, text: &str, font_px: i32) -> Result<i32, PlateError> {
        Ok(Self::text_width(text, font_px))
    }

    fn fill_text(
        &mut self,
        text: &str,
        x: i32,
        y: i32,
        _font_px: i32,
        _color: Rgba<u8>,
    ) -> Result<(), PlateError> {
        self.commands.push(DrawCommand::Text {
            text: text.to_string(),
            x,
            y,
        });
        Ok(())
    }
}

#[cfg(feature = "opencv")]
pub use mat_canvas::MatCanvas;

#[cfg(feature = "opencv")]
mod mat_canvas {
    use image::Rgba;
    use opencv::core::add_weighted;
    use opencv::core::Point;
    use opencv::core::Scalar;
    use opencv::core::Size;
    use opencv::imgproc::get_text_size;
    use opencv::imgproc::put_text;
    use opencv::imgproc::rectangle;
    use opencv::imgproc::FILLED;
    use opencv::imgproc::FONT_HERSHEY_SIMPLEX;
    use opencv::imgproc::LINE_8;
    use opencv::prelude::Mat;
    use opencv::prelude::MatTraitConst;
    use opencv::videoio::VideoWriter;
    use opencv::videoio::VideoWriterTrait;
    use tracing::warn;

    use super::Canvas;
    use crate::error::PlateError;
    use crate::plate_detection::opencv_support::{to_bgr, to_rect};
    use crate::plate_detection::{Frame, PlateRect};

    const TEXT_THICKNESS: i32 = 2;

    fn scalar(color: Rgba<u8>) -> Scalar {
        let [r, g, b, _] = color.0;
        Scalar::new(b as f64, g as f64, r as f64, 0.0)
    }

    // Hershey simplex glyphs are about 22px tall at scale 1.
    fn font_scale(font_px: i32) -> f64 {
        font_px as f64 / 22.0
    }

    /// Draws on an OpenCV BGR image, optionally recording every finished
    /// image to a video file.
    pub struct MatCanvas {
        image: Mat,
        output: Option<String>,
        fps: f64,
        writer: Option<VideoWriter>,
    }

    impl MatCanvas {
        pub fn new() -> Self {
            Self {
                image: Mat::default(),
                output: None,
                fps: 25.0,
                writer: None,
            }
        }

        pub fn with_save_to_file(path: &str, fps: f64) -> Self {
            Self {
                output: Some(path.to_string()),
                fps,
                ..Self::new()
            }
        }

        pub fn image(&self) -> &Mat {
            &self.image
        }

        /// Hands the painted image to the video writer, if any.
        pub fn finish(&mut self) -> Result<(), PlateError> {
            let Some(path) = self.output.as_deref() else {
                return Ok(());
            };
            if self.writer.is_none() {
                let size = Size::new(self.image.cols(), self.image.rows());
                self.writer = Some(VideoWriter::new(
                    path,
                    VideoWriter::fourcc('M', 'J', 'P', 'G')?,
                    self.fps,
                    size,
                    true,
                )?);
            }
            if let Some(writer) = self.writer.as_mut() {
                writer.write(&self.image)?;
            }
            Ok(())
        }
    }

    impl Default for MatCanvas {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Drop for MatCanvas {
        fn drop(&mut self) {
            if let Some(writer) = self.writer.as_mut() {
                if let Err(e) = writer.release() {
                    warn!(error = %e, "Cannot release video writer");
                }
            }
        }
    }

    impl Canvas for MatCanvas {
        fn draw_frame(&mut self, frame: &Frame) -> Result<(), PlateError> {
            self.image = to_bgr(frame)?;
            Ok(())
        }

        fn stroke_rect(
            &mut self,
            rect: &PlateRect,
            color: Rgba<u8>,
            line_width: i32,
        ) -> Result<(), PlateError> {
            rectangle(
                &mut self.image,
                to_rect(rect),
                scalar(color),
                line_width,
                LINE_8,
                0,
            )?;
            Ok(())
        }

        fn fill_rect(&mut self, rect: &PlateRect, color: Rgba<u8>) -> Result<(), PlateError> {
            let alpha = color.0[3] as f64 / 255.0;
            if color.0[3] == 255 {
                rectangle(&mut self.image, to_rect(rect), scalar(color), FILLED, LINE_8, 0)?;
                return Ok(());
            }
            let mut overlay = self.image.try_clone()?;
            rectangle(&mut overlay, to_rect(rect), scalar(color), FILLED, LINE_8, 0)?;
            let mut blended = Mat::default();
            add_weighted(&overlay, alpha, &self.image, 1.0 - alpha, 0.0, &mut blended, -1)?;
            self.image = blended;
            Ok(())
        }

        fn measure_text(&self, text: &str, font_px: i32) -> Result<i32, PlateError> {
            let mut baseline = 0;
            let size = get_text_size(
                text,
                FONT_HERSHEY_SIMPLEX,
                font_scale(font_px),
                TEXT_THICKNESS,
                &mut baseline,
            )?;
            Ok(size.width)
        }

        fn fill_text(
            &mut self,
            text: &str,
            x: i32,
            y: i32,
            font_px: i32,
            color: Rgba<u8>,
        ) -> Result<(), PlateError> {
            put_text(
                &mut self.image,
                text,
                Point::new(x, y),
                FONT_HERSHEY_SIMPLEX,
                font_scale(font_px),
                scalar(color),
                TEXT_THICKNESS,
                LINE_8,
                false,
            )?;
            Ok(())
        }
    }
}
