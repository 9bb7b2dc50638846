//! Pan/zoom transform between screen space and canvas logical space.
//!
//! The mapping is `canvas = (client - origin - pan) / zoom`, where `origin`
//! is the top-left of the drawing container in client coordinates.

use kurbo::{Affine, Point, Vec2};
use serde::{Deserialize, Serialize};

/// Map a client-space point to canvas logical space.
pub fn screen_to_canvas(client: Point, origin: Point, zoom: f64, pan: Vec2) -> Point {
    Point::new(
        (client.x - origin.x - pan.x) / zoom,
        (client.y - origin.y - pan.y) / zoom,
    )
}

/// Inverse of [`screen_to_canvas`].
pub fn canvas_to_screen(canvas: Point, origin: Point, zoom: f64, pan: Vec2) -> Point {
    Point::new(
        canvas.x * zoom + pan.x + origin.x,
        canvas.y * zoom + pan.y + origin.y,
    )
}

/// Direction of a discrete zoom input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoomDirection {
    In,
    Out,
}

/// View transform state: pan offset in screen pixels and zoom factor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    /// Current translation offset (pan), in screen pixels.
    pub pan: Vec2,
    /// Current zoom factor (1.0 = 100%).
    pub zoom: f64,
    /// Minimum allowed zoom level.
    pub min_zoom: f64,
    /// Maximum allowed zoom level.
    pub max_zoom: f64,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            pan: Vec2::ZERO,
            zoom: 1.0,
            min_zoom: 0.25,
            max_zoom: 4.0,
        }
    }
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a camera with explicit zoom bounds. Bounds that are not
    /// finite, positive and ordered fall back to the defaults.
    pub fn with_bounds(min_zoom: f64, max_zoom: f64) -> Self {
        let usable = min_zoom.is_finite() && max_zoom.is_finite() && min_zoom > 0.0 && min_zoom <= max_zoom;
        if !usable {
            log::warn!("Ignoring zoom bounds [{}, {}]", min_zoom, max_zoom);
            return Self::default();
        }
        Self {
            min_zoom,
            max_zoom,
            zoom: 1.0_f64.max(min_zoom).min(max_zoom),
            ..Self::default()
        }
    }

    /// Canvas-to-surface transform, relative to the container origin.
    pub fn transform(&self) -> Affine {
        Affine::translate(self.pan) * Affine::scale(self.zoom)
    }

    /// Surface-to-canvas transform, relative to the container origin.
    pub fn inverse_transform(&self) -> Affine {
        Affine::scale(1.0 / self.zoom) * Affine::translate(-self.pan)
    }

    /// Convert a client point to canvas coordinates.
    pub fn screen_to_canvas(&self, client: Point, origin: Point) -> Point {
        screen_to_canvas(client, origin, self.zoom, self.pan)
    }

    /// Convert a canvas point to client coordinates.
    pub fn canvas_to_screen(&self, canvas: Point, origin: Point) -> Point {
        canvas_to_screen(canvas, origin, self.zoom, self.pan)
    }

    /// Set the zoom factor, clamped to the bounds.
    pub fn set_zoom(&mut self, zoom: f64) {
        if zoom.is_finite() {
            // Bounds are public fields and may be inverted.
            self.zoom = zoom.max(self.min_zoom).min(self.max_zoom);
        }
    }

    /// Apply one fixed zoom step.
    pub fn step_zoom(&mut self, direction: ZoomDirection, step: f64) {
        let next = match direction {
            ZoomDirection::In => self.zoom + step,
            ZoomDirection::Out => self.zoom - step,
        };
        self.set_zoom(next);
    }

    /// Set the pan offset.
    pub fn set_pan(&mut self, pan: Vec2) {
        if pan.x.is_finite() && pan.y.is_finite() {
            self.pan = pan;
        }
    }

    /// Accumulate a drag delta (screen pixels) into the pan offset.
    pub fn pan_by(&mut self, delta: Vec2) {
        self.set_pan(self.pan + delta);
    }

    /// Reset to identity pan and 100% zoom.
    pub fn reset(&mut self) {
        self.pan = Vec2::ZERO;
        self.zoom = 1.0_f64.max(self.min_zoom).min(self.max_zoom);
    }
}
