//! Remote cursors: screen-space markers for other participants.

use std::collections::BTreeMap;

use kurbo::Point;

use crate::camera::Camera;
use crate::store::Participant;
use crate::stroke::{SerializableColor, ToolKind};

/// Marker colours handed out per connection.
const PALETTE: [SerializableColor; 8] = [
    SerializableColor { r: 0xe0, g: 0x3e, b: 0x3e, a: 0xff },
    SerializableColor { r: 0x1c, g: 0x7e, b: 0xd6, a: 0xff },
    SerializableColor { r: 0x2f, g: 0x9e, b: 0x44, a: 0xff },
    SerializableColor { r: 0xf0, g: 0x8c, b: 0x00, a: 0xff },
    SerializableColor { r: 0x7b, g: 0x4d, b: 0xd6, a: 0xff },
    SerializableColor { r: 0x0c, g: 0xa6, b: 0x78, a: 0xff },
    SerializableColor { r: 0xd6, g: 0x33, b: 0x6c, a: 0xff },
    SerializableColor { r: 0x5c, g: 0x5f, b: 0x66, a: 0xff },
];

/// FNV-1a, so a connection keeps its colour across sessions and replicas.
fn palette_color(connection_id: &str) -> SerializableColor {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in connection_id.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    PALETTE[hash as usize % PALETTE.len()]
}

/// One remote cursor, ready to draw.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorMarker {
    pub connection_id: String,
    /// Position in client coordinates.
    pub position: Point,
    pub label: String,
    pub color: SerializableColor,
    pub tool: ToolKind,
    /// The participant's brush colour, for a tool swatch next to the label.
    pub brush_color: SerializableColor,
}

/// Keeps one marker per connected participant with a cursor on the board.
#[derive(Debug, Clone, Default)]
pub struct PresenceOverlay {
    markers: BTreeMap<String, CursorMarker>,
    /// Flattened view of `markers`, rebuilt on update.
    sorted: Vec<CursorMarker>,
}

impl PresenceOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild markers from the current participant list. Participants that
    /// disconnected or have no cursor lose their marker.
    pub fn update(&mut self, participants: &[Participant], camera: &Camera, origin: Point) -> &[CursorMarker] {
        self.markers.retain(|id, _| {
            participants
                .iter()
                .any(|p| &p.connection_id == id && p.presence.cursor.is_some())
        });

        for participant in participants {
            let Some(cursor) = participant.presence.cursor else {
                continue;
            };
            let presence = &participant.presence;
            let label = if presence.user_name.is_empty() {
                "Anonymous".to_string()
            } else {
                presence.user_name.clone()
            };
            let marker = CursorMarker {
                connection_id: participant.connection_id.clone(),
                position: camera.canvas_to_screen(cursor, origin),
                label,
                color: palette_color(&participant.connection_id),
                tool: presence.active_tool,
                brush_color: SerializableColor::from_hex(&presence.active_color),
            };
            self.markers.insert(participant.connection_id.clone(), marker);
        }

        self.sorted = self.markers.values().cloned().collect();
        &self.sorted
    }

    /// Markers from the last update, sorted by connection id.
    pub fn markers(&self) -> &[CursorMarker] {
        &self.sorted
    }

    pub fn clear(&mut self) {
        self.markers.clear();
        self.sorted.clear();
    }
}
