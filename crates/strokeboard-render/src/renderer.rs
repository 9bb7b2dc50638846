//! Renderer trait abstraction.

use kurbo::Size;
use peniko::Color;
use strokeboard_core::engine::EngineState;
use strokeboard_core::presence::CursorMarker;
use strokeboard_core::stroke::Stroke;
use thiserror::Error;

/// Renderer errors.
#[derive(Debug, Error)]
pub enum RendererError {
    #[error("Render failed: {0}")]
    RenderFailed(String),
    #[error("Surface error: {0}")]
    Surface(String),
}

/// Result type for renderer operations.
pub type RenderResult<T> = Result<T, RendererError>;

/// Context for a single render frame.
pub struct RenderContext<'a> {
    /// Engine snapshot to draw.
    pub state: &'a EngineState,
    /// Stroke being drawn, if any.
    pub in_flight: Option<&'a Stroke>,
    /// Viewport size in pixels.
    pub viewport_size: Size,
    /// Remote cursors, already in screen space.
    pub markers: &'a [CursorMarker],
    pub background: Color,
}

impl<'a> RenderContext<'a> {
    pub fn new(state: &'a EngineState, viewport_size: Size) -> Self {
        Self {
            state,
            in_flight: None,
            viewport_size,
            markers: &[],
            background: Color::from_rgba8(250, 250, 250, 255),
        }
    }

    pub fn with_in_flight(mut self, stroke: Option<&'a Stroke>) -> Self {
        self.in_flight = stroke;
        self
    }

    pub fn with_markers(mut self, markers: &'a [CursorMarker]) -> Self {
        self.markers = markers;
        self
    }

    pub fn with_background(mut self, color: Color) -> Self {
        self.background = color;
        self
    }
}

/// What a frame actually did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// The settled surface was cleared and replayed this frame.
    pub settled_replayed: bool,
    /// Strokes drawn into the settled surface (zero when not replayed).
    pub settled_strokes_drawn: usize,
    /// An in-flight stroke was drawn into the live surface.
    pub live_drawn: bool,
    pub markers_drawn: usize,
}

/// Trait for rendering backends.
pub trait Renderer: Send + Sync {
    /// Bring every surface up to date with `ctx`.
    ///
    /// Called once per display frame. Implementations should only replay
    /// committed strokes when their content or the view changed.
    fn render_frame(&mut self, ctx: &RenderContext) -> RenderResult<FrameStats>;
}
