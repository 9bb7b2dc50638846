//! Board configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Tunables for the drawing engine and its control surface.
///
/// Every field has a default, so a partial JSON document only needs to
/// name the values it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    /// Smallest allowed brush width.
    pub min_brush_width: f64,
    /// Largest allowed brush width.
    pub max_brush_width: f64,
    /// Increment used by the brush-width shortcuts.
    pub brush_step: f64,
    /// Brush width for a fresh engine.
    pub default_brush_width: f64,
    /// Brush color for a fresh engine (`#rrggbb`).
    pub default_color: String,
    /// Smallest allowed zoom factor.
    pub min_zoom: f64,
    /// Largest allowed zoom factor.
    pub max_zoom: f64,
    /// Zoom change per discrete zoom input (wheel notch, shortcut).
    pub zoom_step: f64,
    /// Maximum undo (and redo) depth kept per author.
    pub undo_capacity: usize,
    /// Name prefix for new layers.
    pub default_layer_name: String,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            min_brush_width: 1.0,
            max_brush_width: 50.0,
            brush_step: 1.0,
            default_brush_width: 4.0,
            default_color: "#000000".to_string(),
            min_zoom: 0.25,
            max_zoom: 4.0,
            zoom_step: 0.1,
            undo_capacity: 100,
            default_layer_name: "Layer".to_string(),
        }
    }
}

impl BoardConfig {
    /// Parse a config from JSON and validate it.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the bounds are usable: finite, positive and ordered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !positive(self.min_brush_width) || !positive(self.max_brush_width) || self.min_brush_width > self.max_brush_width {
            return Err(ConfigError::Invalid(format!(
                "brush bounds [{}, {}]",
                self.min_brush_width, self.max_brush_width
            )));
        }
        if !positive(self.min_zoom) || !positive(self.max_zoom) || self.min_zoom > self.max_zoom {
            return Err(ConfigError::Invalid(format!(
                "zoom bounds [{}, {}]",
                self.min_zoom, self.max_zoom
            )));
        }
        if !positive(self.brush_step) {
            return Err(ConfigError::Invalid(format!("brush_step {}", self.brush_step)));
        }
        if !positive(self.zoom_step) {
            return Err(ConfigError::Invalid(format!("zoom_step {}", self.zoom_step)));
        }
        if !self.default_brush_width.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "default_brush_width {}",
                self.default_brush_width
            )));
        }
        if self.undo_capacity == 0 {
            return Err(ConfigError::Invalid("undo_capacity must be positive".to_string()));
        }
        Ok(())
    }

    /// Clamp a brush width into the configured bounds.
    pub fn clamp_brush_width(&self, width: f64) -> f64 {
        width.max(self.min_brush_width).min(self.max_brush_width)
    }

    /// Clamp a zoom factor into the configured bounds.
    pub fn clamp_zoom(&self, zoom: f64) -> f64 {
        zoom.max(self.min_zoom).min(self.max_zoom)
    }
}

fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}
