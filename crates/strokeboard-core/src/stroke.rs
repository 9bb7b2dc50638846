//! Freehand strokes, the unit of drawing.

use kurbo::{BezPath, Point, Rect};
use peniko::Color;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::layer::LayerId;

/// Globally unique stroke identifier (uuid string).
pub type StrokeId = String;

/// Generate a fresh stroke or layer id.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Drawing tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Paint with the brush color.
    #[default]
    Draw,
    /// Clear pixels of the stroke's layer.
    Erase,
}

impl ToolKind {
    /// Stable wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            ToolKind::Draw => "draw",
            ToolKind::Erase => "erase",
        }
    }

    /// Parse a wire name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "draw" => Some(ToolKind::Draw),
            "erase" => Some(ToolKind::Erase),
            _ => None,
        }
    }
}

/// Serializable color representation (RGBA8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializableColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl SerializableColor {
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn black() -> Self {
        Self::new(0, 0, 0, 255)
    }

    /// Parse `#rgb`, `#rrggbb` or `#rrggbbaa`. Anything else is black.
    pub fn from_hex(color: &str) -> Self {
        Self::try_from_hex(color).unwrap_or_else(Self::black)
    }

    /// Strict variant of [`SerializableColor::from_hex`].
    pub fn try_from_hex(color: &str) -> Option<Self> {
        let hex = color.trim().strip_prefix('#')?;
        if !hex.is_ascii() {
            return None;
        }
        let channel = |s: &str| u8::from_str_radix(s, 16).ok();
        match hex.len() {
            3 => Some(Self::new(
                channel(&hex[0..1])? * 17,
                channel(&hex[1..2])? * 17,
                channel(&hex[2..3])? * 17,
                255,
            )),
            6 | 8 => {
                let a = if hex.len() == 8 { channel(&hex[6..8])? } else { 255 };
                Some(Self::new(
                    channel(&hex[0..2])?,
                    channel(&hex[2..4])?,
                    channel(&hex[4..6])?,
                    a,
                ))
            }
            _ => None,
        }
    }

    /// Format as `#rrggbb`, or `#rrggbbaa` when not opaque.
    pub fn to_hex(&self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

impl Default for SerializableColor {
    fn default() -> Self {
        Self::black()
    }
}

impl From<Color> for SerializableColor {
    fn from(color: Color) -> Self {
        let rgba = color.to_rgba8();
        Self {
            r: rgba.r,
            g: rgba.g,
            b: rgba.b,
            a: rgba.a,
        }
    }
}

impl From<SerializableColor> for Color {
    fn from(color: SerializableColor) -> Self {
        Color::from_rgba8(color.r, color.g, color.b, color.a)
    }
}

/// One continuous drawing or erasing gesture.
///
/// Points are appended only while the stroke is in flight; once committed
/// to the engine a stroke is never mutated, only removed or re-added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub id: StrokeId,
    /// Points in canvas logical units.
    pub points: Vec<Point>,
    pub color: SerializableColor,
    pub width: f64,
    pub layer_id: LayerId,
    pub tool: ToolKind,
    pub author_id: String,
    pub author_name: String,
    /// Epoch milliseconds.
    pub created_at: i64,
}

impl Stroke {
    /// Check if the stroke renders as a single dot.
    pub fn is_dot(&self) -> bool {
        self.points.len() == 1
    }

    /// Bounding box of the points, grown by half the width.
    pub fn bounds(&self) -> Rect {
        let Some(first) = self.points.first() else {
            return Rect::ZERO;
        };
        let rect = self
            .points
            .iter()
            .fold(Rect::from_points(*first, *first), |r, p| r.union_pt(*p));
        rect.inflate(self.width / 2.0, self.width / 2.0)
    }

    /// Polyline through the points.
    pub fn to_path(&self) -> BezPath {
        let mut path = BezPath::new();
        let mut points = self.points.iter();
        if let Some(first) = points.next() {
            path.move_to(*first);
            for point in points {
                path.line_to(*point);
            }
        }
        path
    }
}
