//! Strokeboard Core Library
//!
//! Platform-agnostic drawing engine, shared-store reconciliation and
//! collaboration plumbing for the Strokeboard whiteboard.

pub mod bridge;
pub mod camera;
pub mod config;
pub mod engine;
pub mod history;
pub mod interaction;
pub mod layer;
pub mod presence;
pub mod session;
pub mod shortcuts;
pub mod storage;
pub mod store;
pub mod stroke;
pub mod sync;

pub use bridge::{PushPlan, PushReport, ReconciliationBridge};
pub use camera::{Camera, ZoomDirection, canvas_to_screen, screen_to_canvas};
pub use config::{BoardConfig, ConfigError};
pub use engine::{DrawingEngine, EngineState};
pub use interaction::{CanvasInteraction, Modifiers, MouseButton, PointerEvent};
pub use layer::{Layer, LayerId};
pub use presence::{CursorMarker, PresenceOverlay};
pub use session::{CollabSession, SessionConfig};
pub use shortcuts::{Command, ShortcutRegistry};
pub use storage::{BoardSnapshot, Storage, StorageError};
pub use store::{ConnectionStatus, LoroStore, MemoryStore, Participant, Presence, SharedStore, StoreError};
pub use stroke::{SerializableColor, Stroke, StrokeId, ToolKind};
pub use sync::{NativeWebSocket, SyncError, SyncEvent, Transport};
