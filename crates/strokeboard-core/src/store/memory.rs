//! In-process shared store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;

use super::{
    ConnectionStatus, LayerRecord, Participant, Presence, SharedStore, StoreError, StoreResult,
    StrokeRecord,
};
use crate::layer::LayerId;
use crate::stroke::{StrokeId, new_id};

#[derive(Debug, Default)]
struct Replica {
    strokes: IndexMap<StrokeId, StrokeRecord>,
    layers: HashMap<LayerId, LayerRecord>,
    layer_order: Vec<LayerId>,
    presence: BTreeMap<String, Presence>,
}

#[derive(Debug, Clone, Copy)]
struct Link {
    status: ConnectionStatus,
    unavailable: bool,
}

/// A replica shared by every connection created from it with [`MemoryStore::peer`].
///
/// Used for solo mode and for exercising the bridge without a network.
#[derive(Debug)]
pub struct MemoryStore {
    replica: Arc<RwLock<Replica>>,
    connection_id: String,
    link: RwLock<Link>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty replica with one connected connection.
    pub fn new() -> Self {
        Self::attach(Arc::new(RwLock::new(Replica::default())))
    }

    fn attach(replica: Arc<RwLock<Replica>>) -> Self {
        Self {
            replica,
            connection_id: new_id(),
            link: RwLock::new(Link {
                status: ConnectionStatus::Connected,
                unavailable: false,
            }),
        }
    }

    /// Open another connection to the same replica.
    pub fn peer(&self) -> Self {
        Self::attach(Arc::clone(&self.replica))
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        if let Ok(mut link) = self.link.write() {
            link.status = status;
        }
    }

    /// Make every read and write on this connection fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut link) = self.link.write() {
            link.unavailable = unavailable;
        }
    }

    /// Drop this connection's presence, as a disconnect would.
    pub fn disconnect(&self) {
        if let Ok(mut replica) = self.replica.write() {
            replica.presence.remove(&self.connection_id);
        }
        self.set_status(ConnectionStatus::Disconnected);
    }

    fn check(&self) -> StoreResult<()> {
        let link = self
            .link
            .read()
            .map_err(|e| StoreError::Lock(e.to_string()))?;
        if link.unavailable {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&Replica) -> T) -> StoreResult<T> {
        self.check()?;
        let replica = self
            .replica
            .read()
            .map_err(|e| StoreError::Lock(e.to_string()))?;
        Ok(f(&replica))
    }

    fn write<T>(&self, f: impl FnOnce(&mut Replica) -> T) -> StoreResult<T> {
        self.check()?;
        let mut replica = self
            .replica
            .write()
            .map_err(|e| StoreError::Lock(e.to_string()))?;
        Ok(f(&mut replica))
    }
}

impl SharedStore for MemoryStore {
    fn stroke_ids(&self) -> StoreResult<Vec<StrokeId>> {
        self.read(|r| r.strokes.keys().cloned().collect())
    }

    fn strokes(&self) -> StoreResult<Vec<StrokeRecord>> {
        self.read(|r| r.strokes.values().cloned().collect())
    }

    fn layers(&self) -> StoreResult<Vec<LayerRecord>> {
        self.read(|r| r.layers.values().cloned().collect())
    }

    fn layer_order(&self) -> StoreResult<Vec<LayerId>> {
        self.read(|r| r.layer_order.clone())
    }

    fn put_strokes(&self, strokes: &[StrokeRecord]) -> StoreResult<()> {
        self.write(|r| {
            for stroke in strokes {
                r.strokes.insert(stroke.id.clone(), stroke.clone());
            }
        })
    }

    fn delete_strokes(&self, ids: &[StrokeId]) -> StoreResult<()> {
        self.write(|r| {
            for id in ids {
                r.strokes.shift_remove(id);
            }
        })
    }

    fn clear_strokes(&self) -> StoreResult<()> {
        self.write(|r| r.strokes.clear())
    }

    fn put_layers(&self, layers: &[LayerRecord]) -> StoreResult<()> {
        self.write(|r| {
            for layer in layers {
                r.layers.insert(layer.id.clone(), layer.clone());
            }
        })
    }

    fn delete_layers(&self, ids: &[LayerId]) -> StoreResult<()> {
        self.write(|r| {
            for id in ids {
                r.layers.remove(id);
            }
            r.layer_order.retain(|id| !ids.contains(id));
        })
    }

    fn set_layer_order(&self, order: &[LayerId]) -> StoreResult<()> {
        self.write(|r| r.layer_order = order.to_vec())
    }

    fn set_presence(&self, presence: &Presence) -> StoreResult<()> {
        let id = self.connection_id.clone();
        self.write(|r| {
            r.presence.insert(id, presence.clone());
        })
    }

    fn others(&self) -> Vec<Participant> {
        self.read(|r| {
            r.presence
                .iter()
                .filter(|(id, _)| **id != self.connection_id)
                .map(|(id, presence)| Participant {
                    connection_id: id.clone(),
                    presence: presence.clone(),
                })
                .collect()
        })
        .unwrap_or_default()
    }

    fn status(&self) -> ConnectionStatus {
        self.link
            .read()
            .map(|link| link.status)
            .unwrap_or(ConnectionStatus::Disconnected)
    }
}
