//! Shared store backed by a Loro document.
//!
//! # Schema
//!
//! ```text
//! LoroDoc
//! ├── "strokes":     LoroMap<StrokeId, LoroMap>  (one map per stroke, write-once)
//! ├── "layers":      LoroMap<LayerId, LoroMap>   (fields overwritten in place)
//! └── "layer_order": LoroList<String>            (layer ids, bottom first)
//! ```
//!
//! Each stroke map holds `id`, `points` (a flat `LoroList` of doubles),
//! `color`, `width`, `layer_id`, `tool`, `author_id`, `author_name` and
//! `created_at`. Layer maps hold `id`, `name`, `visible` and `order`, each
//! field written individually so concurrent edits resolve last-write-wins
//! per field.
//!
//! Presence is not part of the document: the network session feeds remote
//! presence into an ephemeral table and drains the local presence.

use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use loro::{ExportMode, LoroDoc, LoroList, LoroMap, LoroMapValue, LoroValue, VersionVector};

use super::{
    ConnectionStatus, LayerRecord, Participant, Presence, SharedStore, StoreError, StoreResult,
    StrokeRecord,
};
use crate::layer::LayerId;
use crate::stroke::StrokeId;

/// Key for the strokes map in the document.
pub const STROKES_KEY: &str = "strokes";
/// Key for the layers map in the document.
pub const LAYERS_KEY: &str = "layers";
/// Key for the layer ordering list in the document.
pub const LAYER_ORDER_KEY: &str = "layer_order";

const KEY_ID: &str = "id";
const KEY_POINTS: &str = "points";
const KEY_COLOR: &str = "color";
const KEY_WIDTH: &str = "width";
const KEY_LAYER_ID: &str = "layer_id";
const KEY_TOOL: &str = "tool";
const KEY_AUTHOR_ID: &str = "author_id";
const KEY_AUTHOR_NAME: &str = "author_name";
const KEY_CREATED_AT: &str = "created_at";
const KEY_NAME: &str = "name";
const KEY_VISIBLE: &str = "visible";
const KEY_ORDER: &str = "order";

fn get_double(map: &LoroMapValue, key: &str) -> Option<f64> {
    match map.get(key)? {
        LoroValue::Double(d) => Some(*d),
        LoroValue::I64(i) => Some(*i as f64),
        _ => None,
    }
}

fn get_i64(map: &LoroMapValue, key: &str) -> Option<i64> {
    match map.get(key)? {
        LoroValue::I64(i) => Some(*i),
        LoroValue::Double(d) => Some(*d as i64),
        _ => None,
    }
}

fn get_string(map: &LoroMapValue, key: &str) -> Option<String> {
    match map.get(key)? {
        LoroValue::String(s) => Some(s.to_string()),
        _ => None,
    }
}

fn get_bool(map: &LoroMapValue, key: &str) -> Option<bool> {
    match map.get(key)? {
        LoroValue::Bool(b) => Some(*b),
        _ => None,
    }
}

fn stroke_from_loro(map: &LoroMapValue) -> Option<StrokeRecord> {
    let points = match map.get(KEY_POINTS)? {
        LoroValue::List(list) => list
            .iter()
            .map(|v| match v {
                LoroValue::Double(d) => Some(*d),
                LoroValue::I64(i) => Some(*i as f64),
                _ => None,
            })
            .collect::<Option<Vec<f64>>>()?,
        _ => return None,
    };
    Some(StrokeRecord {
        id: get_string(map, KEY_ID)?,
        points,
        color: get_string(map, KEY_COLOR)?,
        width: get_double(map, KEY_WIDTH)?,
        layer_id: get_string(map, KEY_LAYER_ID)?,
        tool: get_string(map, KEY_TOOL)?,
        author_id: get_string(map, KEY_AUTHOR_ID).unwrap_or_default(),
        author_name: get_string(map, KEY_AUTHOR_NAME).unwrap_or_default(),
        created_at: get_i64(map, KEY_CREATED_AT).unwrap_or_default(),
    })
}

fn layer_from_loro(map: &LoroMapValue) -> Option<LayerRecord> {
    Some(LayerRecord {
        id: get_string(map, KEY_ID)?,
        name: get_string(map, KEY_NAME).unwrap_or_default(),
        visible: get_bool(map, KEY_VISIBLE).unwrap_or(true),
        order: get_i64(map, KEY_ORDER)?,
    })
}

fn stroke_to_loro(stroke: &StrokeRecord, map: &LoroMap) -> loro::LoroResult<()> {
    map.insert(KEY_ID, stroke.id.as_str())?;
    let points = map.insert_container(KEY_POINTS, LoroList::new())?;
    for coord in &stroke.points {
        points.push(*coord)?;
    }
    map.insert(KEY_COLOR, stroke.color.as_str())?;
    map.insert(KEY_WIDTH, stroke.width)?;
    map.insert(KEY_LAYER_ID, stroke.layer_id.as_str())?;
    map.insert(KEY_TOOL, stroke.tool.as_str())?;
    map.insert(KEY_AUTHOR_ID, stroke.author_id.as_str())?;
    map.insert(KEY_AUTHOR_NAME, stroke.author_name.as_str())?;
    map.insert(KEY_CREATED_AT, stroke.created_at)?;
    Ok(())
}

/// Values of every entry in a container map, skipping anything that is not a map.
fn map_entries(map: &LoroMap) -> Vec<(String, LoroMapValue)> {
    let LoroValue::Map(entries) = map.get_deep_value() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|(key, value)| match value {
            LoroValue::Map(inner) => Some((key.clone(), inner.clone())),
            _ => None,
        })
        .collect()
}

/// A [`SharedStore`] over a local Loro replica.
pub struct LoroStore {
    doc: LoroDoc,
    status: RwLock<ConnectionStatus>,
    connection_id: RwLock<Option<String>>,
    remote_presence: RwLock<BTreeMap<String, Presence>>,
    /// Local presence waiting to be sent by the session.
    outgoing_presence: RwLock<Option<Presence>>,
}

impl Default for LoroStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LoroStore {
    /// Create an empty replica. Status starts as `Connecting`.
    pub fn new() -> Self {
        Self {
            doc: LoroDoc::new(),
            status: RwLock::new(ConnectionStatus::Connecting),
            connection_id: RwLock::new(None),
            remote_presence: RwLock::new(BTreeMap::new()),
            outgoing_presence: RwLock::new(None),
        }
    }

    /// Create a replica from a snapshot.
    pub fn from_snapshot(bytes: &[u8]) -> StoreResult<Self> {
        let store = Self::new();
        store.import(bytes)?;
        Ok(store)
    }

    /// The underlying LoroDoc.
    pub fn loro_doc(&self) -> &LoroDoc {
        &self.doc
    }

    fn strokes_map(&self) -> LoroMap {
        self.doc.get_map(STROKES_KEY)
    }

    fn layers_map(&self) -> LoroMap {
        self.doc.get_map(LAYERS_KEY)
    }

    fn layer_order_list(&self) -> LoroList {
        self.doc.get_list(LAYER_ORDER_KEY)
    }

    /// Export the full document state.
    pub fn export_snapshot(&self) -> StoreResult<Vec<u8>> {
        self.doc
            .export(ExportMode::Snapshot)
            .map_err(|e| StoreError::Encode(e.to_string()))
    }

    /// Export the operations not covered by `since`.
    pub fn export_updates_since(&self, since: &VersionVector) -> StoreResult<Vec<u8>> {
        self.doc
            .export(ExportMode::updates(since))
            .map_err(|e| StoreError::Encode(e.to_string()))
    }

    /// Merge a snapshot or update from another replica.
    pub fn import(&self, bytes: &[u8]) -> StoreResult<()> {
        self.doc.import(bytes)?;
        Ok(())
    }

    /// Current version vector.
    pub fn version(&self) -> VersionVector {
        self.doc.oplog_vv()
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        if let Ok(mut current) = self.status.write() {
            *current = status;
        }
    }

    /// Record the connection id assigned by the relay.
    pub fn set_connection_id(&self, id: Option<String>) {
        if let Ok(mut current) = self.connection_id.write() {
            *current = id;
        }
    }

    pub fn connection_id(&self) -> Option<String> {
        self.connection_id.read().ok().and_then(|id| id.clone())
    }

    /// Store a remote participant's presence.
    pub fn apply_remote_presence(&self, connection_id: &str, presence: Presence) {
        if let Ok(mut table) = self.remote_presence.write() {
            table.insert(connection_id.to_string(), presence);
        }
    }

    /// Forget a remote participant.
    pub fn remove_participant(&self, connection_id: &str) {
        if let Ok(mut table) = self.remote_presence.write() {
            table.remove(connection_id);
        }
    }

    /// Forget every remote participant.
    pub fn clear_participants(&self) {
        if let Ok(mut table) = self.remote_presence.write() {
            table.clear();
        }
    }

    /// Take the local presence published since the last call.
    pub fn take_outgoing_presence(&self) -> Option<Presence> {
        self.outgoing_presence.write().ok().and_then(|mut p| p.take())
    }

    fn with_commit<T>(&self, f: impl FnOnce() -> loro::LoroResult<T>) -> StoreResult<T> {
        let result = f()?;
        self.doc.commit();
        Ok(result)
    }
}

impl SharedStore for LoroStore {
    fn stroke_ids(&self) -> StoreResult<Vec<StrokeId>> {
        match self.strokes_map().get_value() {
            LoroValue::Map(map) => Ok(map.keys().cloned().collect()),
            _ => Ok(Vec::new()),
        }
    }

    fn strokes(&self) -> StoreResult<Vec<StrokeRecord>> {
        Ok(map_entries(&self.strokes_map())
            .into_iter()
            .filter_map(|(key, map)| {
                let record = stroke_from_loro(&map);
                if record.is_none() {
                    log::warn!("Skipping malformed stroke record {}", key);
                }
                record
            })
            .collect())
    }

    fn layers(&self) -> StoreResult<Vec<LayerRecord>> {
        Ok(map_entries(&self.layers_map())
            .into_iter()
            .filter_map(|(key, map)| {
                let record = layer_from_loro(&map);
                if record.is_none() {
                    log::warn!("Skipping malformed layer record {}", key);
                }
                record
            })
            .collect())
    }

    fn layer_order(&self) -> StoreResult<Vec<LayerId>> {
        let LoroValue::List(list) = self.layer_order_list().get_value() else {
            return Ok(Vec::new());
        };
        // Concurrent rewrites of the list merge into repeated ids; the
        // first occurrence wins.
        let mut seen = HashSet::new();
        Ok(list
            .iter()
            .filter_map(|v| match v {
                LoroValue::String(s) => Some(s.to_string()),
                _ => None,
            })
            .filter(|id| seen.insert(id.clone()))
            .collect())
    }

    fn put_strokes(&self, strokes: &[StrokeRecord]) -> StoreResult<()> {
        let map = self.strokes_map();
        self.with_commit(|| {
            for stroke in strokes {
                let entry = map.insert_container(&stroke.id, LoroMap::new())?;
                stroke_to_loro(stroke, &entry)?;
            }
            Ok(())
        })
    }

    fn delete_strokes(&self, ids: &[StrokeId]) -> StoreResult<()> {
        let map = self.strokes_map();
        self.with_commit(|| {
            for id in ids {
                map.delete(id)?;
            }
            Ok(())
        })
    }

    fn clear_strokes(&self) -> StoreResult<()> {
        let ids = self.stroke_ids()?;
        self.delete_strokes(&ids)
    }

    fn put_layers(&self, layers: &[LayerRecord]) -> StoreResult<()> {
        let map = self.layers_map();
        self.with_commit(|| {
            for layer in layers {
                let entry = map.get_or_create_container(&layer.id, LoroMap::new())?;
                entry.insert(KEY_ID, layer.id.as_str())?;
                entry.insert(KEY_NAME, layer.name.as_str())?;
                entry.insert(KEY_VISIBLE, layer.visible)?;
                entry.insert(KEY_ORDER, layer.order)?;
            }
            Ok(())
        })
    }

    fn delete_layers(&self, ids: &[LayerId]) -> StoreResult<()> {
        let map = self.layers_map();
        let order = self.layer_order()?;
        let list = self.layer_order_list();
        self.with_commit(|| {
            for id in ids {
                map.delete(id)?;
            }
            for (index, id) in order.iter().enumerate().rev() {
                if ids.contains(id) {
                    list.delete(index, 1)?;
                }
            }
            Ok(())
        })
    }

    fn set_layer_order(&self, order: &[LayerId]) -> StoreResult<()> {
        let list = self.layer_order_list();
        self.with_commit(|| {
            let len = list.len();
            if len > 0 {
                list.delete(0, len)?;
            }
            for id in order {
                list.push(id.as_str())?;
            }
            Ok(())
        })
    }

    fn set_presence(&self, presence: &Presence) -> StoreResult<()> {
        let mut outgoing = self
            .outgoing_presence
            .write()
            .map_err(|e| StoreError::Lock(e.to_string()))?;
        *outgoing = Some(presence.clone());
        Ok(())
    }

    fn others(&self) -> Vec<Participant> {
        let own = self.connection_id();
        let Ok(table) = self.remote_presence.read() else {
            return Vec::new();
        };
        table
            .iter()
            .filter(|(id, _)| own.as_deref() != Some(id.as_str()))
            .map(|(id, presence)| Participant {
                connection_id: id.clone(),
                presence: presence.clone(),
            })
            .collect()
    }

    fn status(&self) -> ConnectionStatus {
        self.status
            .read()
            .map(|s| *s)
            .unwrap_or(ConnectionStatus::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, layer: &str) -> StrokeRecord {
        StrokeRecord {
            id: id.to_string(),
            points: vec![1.0, 2.0, 3.5, 4.5],
            color: "#112233".to_string(),
            width: 6.0,
            layer_id: layer.to_string(),
            tool: "draw".to_string(),
            author_id: "x".to_string(),
            author_name: "X".to_string(),
            created_at: 1_700_000_000_000,
        }
    }

    fn layer(id: &str, order: i64) -> LayerRecord {
        LayerRecord {
            id: id.to_string(),
            name: format!("Layer {}", id),
            visible: true,
            order,
        }
    }

    #[test]
    fn test_strokes_roundtrip_through_doc() {
        let store = LoroStore::new();
        store.put_strokes(&[record("s1", "l1")]).unwrap();
        assert_eq!(store.stroke_ids().unwrap(), vec!["s1".to_string()]);
        assert_eq!(store.strokes().unwrap(), vec![record("s1", "l1")]);

        store.delete_strokes(&["s1".to_string()]).unwrap();
        assert!(store.strokes().unwrap().is_empty());
    }

    #[test]
    fn test_clear_strokes() {
        let store = LoroStore::new();
        store
            .put_strokes(&[record("s1", "l1"), record("s2", "l1"), record("s3", "l1")])
            .unwrap();
        store.clear_strokes().unwrap();
        assert!(store.stroke_ids().unwrap().is_empty());
    }

    #[test]
    fn test_layers_and_order() {
        let store = LoroStore::new();
        store.put_layers(&[layer("a", 0), layer("b", 1)]).unwrap();
        store.set_layer_order(&["a".to_string(), "b".to_string()]).unwrap();

        let mut renamed = layer("a", 2);
        renamed.name = "Ink".to_string();
        store.put_layers(&[renamed.clone()]).unwrap();
        store.set_layer_order(&["b".to_string(), "a".to_string()]).unwrap();

        let mut layers = store.layers().unwrap();
        layers.sort_by(|x, y| x.id.cmp(&y.id));
        assert_eq!(layers, vec![renamed, layer("b", 1)]);
        assert_eq!(store.layer_order().unwrap(), vec!["b".to_string(), "a".to_string()]);

        store.delete_layers(&["b".to_string()]).unwrap();
        assert_eq!(store.layer_order().unwrap(), vec!["a".to_string()]);
        assert_eq!(store.layers().unwrap().len(), 1);
    }

    #[test]
    fn test_snapshot_and_incremental_updates() {
        let a = LoroStore::new();
        a.put_strokes(&[record("s1", "l1")]).unwrap();
        let b = LoroStore::from_snapshot(&a.export_snapshot().unwrap()).unwrap();
        assert_eq!(b.stroke_ids().unwrap(), vec!["s1".to_string()]);

        let seen = b.version();
        a.put_strokes(&[record("s2", "l1")]).unwrap();
        b.import(&a.export_updates_since(&seen).unwrap()).unwrap();
        let mut ids = b.stroke_ids().unwrap();
        ids.sort();
        assert_eq!(ids, vec!["s1".to_string(), "s2".to_string()]);
    }

    #[test]
    fn test_concurrent_reorders_do_not_duplicate_ids() {
        let a = LoroStore::new();
        a.put_layers(&[layer("l1", 0), layer("l2", 1)]).unwrap();
        a.set_layer_order(&["l1".to_string(), "l2".to_string()]).unwrap();
        let b = LoroStore::from_snapshot(&a.export_snapshot().unwrap()).unwrap();

        let base = a.version();
        a.set_layer_order(&["l2".to_string(), "l1".to_string()]).unwrap();
        b.set_layer_order(&["l2".to_string(), "l1".to_string()]).unwrap();
        a.import(&b.export_updates_since(&base).unwrap()).unwrap();
        b.import(&a.export_updates_since(&base).unwrap()).unwrap();

        let order = a.layer_order().unwrap();
        assert_eq!(order.len(), 2);
        assert_eq!(order, b.layer_order().unwrap());
    }

    #[test]
    fn test_malformed_records_are_skipped() {
        let store = LoroStore::new();
        store.put_strokes(&[record("good", "l1")]).unwrap();
        let bad = store
            .strokes_map()
            .insert_container("bad", LoroMap::new())
            .unwrap();
        bad.insert(KEY_ID, "bad").unwrap();
        store.loro_doc().commit();

        let strokes = store.strokes().unwrap();
        assert_eq!(strokes.len(), 1);
        assert_eq!(strokes[0].id, "good");
        assert_eq!(store.stroke_ids().unwrap().len(), 2);
    }

    #[test]
    fn test_presence_tables() {
        let store = LoroStore::new();
        store.set_connection_id(Some("me".to_string()));
        store.apply_remote_presence("me", Presence::default());
        store.apply_remote_presence(
            "peer",
            Presence {
                user_name: "Grace".to_string(),
                ..Presence::default()
            },
        );
        let others = store.others();
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].presence.user_name, "Grace");

        store.remove_participant("peer");
        assert!(store.others().is_empty());

        let presence = Presence {
            user_name: "Me".to_string(),
            ..Presence::default()
        };
        store.set_presence(&presence).unwrap();
        assert_eq!(store.take_outgoing_presence(), Some(presence));
        assert_eq!(store.take_outgoing_presence(), None);
    }
}
