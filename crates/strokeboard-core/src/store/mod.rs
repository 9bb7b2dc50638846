//! Shared-store interface: the replicated board the bridge reconciles against.
//!
//! The store is the external collaborator of the board. It exposes:
//! ```text
//! strokes      keyed map  stroke id -> StrokeRecord (points flattened)
//! layers       keyed map  layer id  -> LayerRecord
//! layer_order  list of layer ids, bottom first
//! presence     per-participant cursor, tool, colour, name
//! status       connecting / connected / reconnecting / disconnected
//! ```

mod crdt;
mod memory;
mod record;

pub use crdt::{LAYER_ORDER_KEY, LAYERS_KEY, LoroStore, STROKES_KEY};
pub use memory::MemoryStore;
pub use record::{LayerRecord, RecordError, StrokeRecord};

use kurbo::Point;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::layer::LayerId;
use crate::stroke::{StrokeId, ToolKind};

/// Shared-store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable")]
    Unavailable,
    #[error("Lock error: {0}")]
    Lock(String),
    #[error("Loro error: {0}")]
    Loro(#[from] loro::LoroError),
    #[error("Export error: {0}")]
    Encode(String),
}

/// Result type for shared-store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Connectivity of this client to the shared store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

impl ConnectionStatus {
    pub fn is_connected(self) -> bool {
        self == ConnectionStatus::Connected
    }
}

/// Ephemeral per-participant state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Presence {
    /// Cursor in canvas space, `None` while outside the board.
    pub cursor: Option<Point>,
    pub active_tool: ToolKind,
    /// Hex colour.
    pub active_color: String,
    pub user_name: String,
}

/// Another participant as seen through the presence channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    /// Identity of the participant's connection (not the user).
    pub connection_id: String,
    pub presence: Presence,
}

/// Access to the replicated board.
///
/// Methods take `&self`: implementations synchronise internally, so the
/// store can be shared between the bridge and a network session.
pub trait SharedStore {
    /// Ids of every stroke in the store.
    fn stroke_ids(&self) -> StoreResult<Vec<StrokeId>>;

    /// Every stroke record, in no particular order.
    fn strokes(&self) -> StoreResult<Vec<StrokeRecord>>;

    /// Every layer record, in no particular order.
    fn layers(&self) -> StoreResult<Vec<LayerRecord>>;

    /// Explicit layer ordering, bottom first.
    fn layer_order(&self) -> StoreResult<Vec<LayerId>>;

    /// Insert or overwrite strokes.
    fn put_strokes(&self, strokes: &[StrokeRecord]) -> StoreResult<()>;

    /// Delete strokes by id. Unknown ids are ignored.
    fn delete_strokes(&self, ids: &[StrokeId]) -> StoreResult<()>;

    /// Delete every stroke in one operation.
    fn clear_strokes(&self) -> StoreResult<()>;

    /// Insert or overwrite layers (every field).
    fn put_layers(&self, layers: &[LayerRecord]) -> StoreResult<()>;

    /// Delete layers by id. Unknown ids are ignored.
    fn delete_layers(&self, ids: &[LayerId]) -> StoreResult<()>;

    /// Replace the layer ordering list.
    fn set_layer_order(&self, order: &[LayerId]) -> StoreResult<()>;

    /// Publish this participant's presence.
    fn set_presence(&self, presence: &Presence) -> StoreResult<()>;

    /// Every other connected participant.
    fn others(&self) -> Vec<Participant>;

    fn status(&self) -> ConnectionStatus;
}
