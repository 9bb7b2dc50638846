//! Serializable board contents.

use serde::{Deserialize, Serialize};

use crate::engine::DrawingEngine;
use crate::layer::Layer;
use crate::stroke::{Stroke, new_id, now_millis};

/// Everything needed to restore a board: its layers and committed strokes,
/// plus the canvas size it was drawn at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub id: String,
    pub layers: Vec<Layer>,
    /// Committed strokes in commit order.
    pub strokes: Vec<Stroke>,
    pub canvas_width: u32,
    pub canvas_height: u32,
    /// Epoch milliseconds.
    pub last_modified: i64,
}

impl BoardSnapshot {
    /// Capture the engine's layers and strokes under a fresh id.
    pub fn capture(engine: &DrawingEngine, canvas_width: u32, canvas_height: u32) -> Self {
        let state = engine.state();
        Self {
            id: new_id(),
            layers: state.sorted_layers().into_iter().cloned().collect(),
            strokes: state.strokes.values().cloned().collect(),
            canvas_width,
            canvas_height,
            last_modified: now_millis(),
        }
    }

    /// Replace the engine's layers and strokes with this snapshot's.
    /// A snapshot without layers leaves the engine untouched.
    pub fn apply_to(&self, engine: &mut DrawingEngine) {
        if self.layers.is_empty() {
            log::warn!("Snapshot {} has no layers, not applied", self.id);
            return;
        }
        engine.set_layers(self.layers.clone());
        engine.set_strokes(self.strokes.clone());
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
