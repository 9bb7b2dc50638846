//! Strokeboard Render Library
//!
//! Renderer abstraction and a CPU raster implementation for Strokeboard.
//! Frames are split into a settled surface (committed strokes), a live
//! surface (the stroke being drawn) and a presence overlay.

mod renderer;
mod skia_impl;

pub use renderer::{FrameStats, RenderContext, RenderResult, Renderer, RendererError};
pub use skia_impl::SkiaRenderer;
