//! Wire records stored in the shared store, and their conversion to the model.

use kurbo::Point;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::layer::{Layer, LayerId};
use crate::stroke::{SerializableColor, Stroke, StrokeId, ToolKind};

/// Reasons a record cannot be turned into a model value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error("record has no id")]
    MissingId,
    #[error("stroke {0} has no points")]
    EmptyPoints(String),
    #[error("stroke {0} has an odd coordinate count")]
    OddPoints(String),
    #[error("stroke {0} has a non-finite coordinate")]
    NonFinite(String),
    #[error("stroke {0} has unknown tool {1:?}")]
    UnknownTool(String, String),
    #[error("stroke {0} has invalid color {1:?}")]
    BadColor(String, String),
    #[error("stroke {0} has invalid width {1}")]
    BadWidth(String, f64),
}

/// A stroke as stored remotely: points flattened to `[x0, y0, x1, y1, ...]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeRecord {
    pub id: StrokeId,
    pub points: Vec<f64>,
    pub color: String,
    pub width: f64,
    pub layer_id: LayerId,
    pub tool: String,
    pub author_id: String,
    pub author_name: String,
    pub created_at: i64,
}

impl From<&Stroke> for StrokeRecord {
    fn from(stroke: &Stroke) -> Self {
        Self {
            id: stroke.id.clone(),
            points: stroke.points.iter().flat_map(|p| [p.x, p.y]).collect(),
            color: stroke.color.to_hex(),
            width: stroke.width,
            layer_id: stroke.layer_id.clone(),
            tool: stroke.tool.as_str().to_string(),
            author_id: stroke.author_id.clone(),
            author_name: stroke.author_name.clone(),
            created_at: stroke.created_at,
        }
    }
}

impl TryFrom<StrokeRecord> for Stroke {
    type Error = RecordError;

    fn try_from(record: StrokeRecord) -> Result<Self, Self::Error> {
        if record.id.is_empty() {
            return Err(RecordError::MissingId);
        }
        if record.points.is_empty() {
            return Err(RecordError::EmptyPoints(record.id));
        }
        if record.points.len() % 2 != 0 {
            return Err(RecordError::OddPoints(record.id));
        }
        if record.points.iter().any(|c| !c.is_finite()) {
            return Err(RecordError::NonFinite(record.id));
        }
        let Some(tool) = ToolKind::parse(&record.tool) else {
            return Err(RecordError::UnknownTool(record.id, record.tool));
        };
        let Some(color) = SerializableColor::try_from_hex(&record.color) else {
            return Err(RecordError::BadColor(record.id, record.color));
        };
        if !record.width.is_finite() || record.width <= 0.0 {
            return Err(RecordError::BadWidth(record.id, record.width));
        }

        let points = record
            .points
            .chunks_exact(2)
            .map(|xy| Point::new(xy[0], xy[1]))
            .collect();
        Ok(Stroke {
            id: record.id,
            points,
            color,
            width: record.width,
            layer_id: record.layer_id,
            tool,
            author_id: record.author_id,
            author_name: record.author_name,
            created_at: record.created_at,
        })
    }
}

/// A layer as stored remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerRecord {
    pub id: LayerId,
    pub name: String,
    pub visible: bool,
    pub order: i64,
}

impl From<&Layer> for LayerRecord {
    fn from(layer: &Layer) -> Self {
        Self {
            id: layer.id.clone(),
            name: layer.name.clone(),
            visible: layer.visible,
            order: layer.order,
        }
    }
}

impl TryFrom<LayerRecord> for Layer {
    type Error = RecordError;

    fn try_from(record: LayerRecord) -> Result<Self, Self::Error> {
        if record.id.is_empty() {
            return Err(RecordError::MissingId);
        }
        Ok(Layer {
            id: record.id,
            name: record.name,
            visible: record.visible,
            order: record.order,
        })
    }
}
