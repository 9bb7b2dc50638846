//! Layers: named, orderable, toggleable groupings of strokes.

use serde::{Deserialize, Serialize};

use crate::stroke::new_id;

/// Layer identifier (uuid string).
pub type LayerId = String;

/// A layer.
///
/// `order` is a comparable field rather than a list position: compositing
/// and listing both sort by it, and reordering swaps two values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub visible: bool,
    pub order: i64,
}

impl Layer {
    /// Create a visible layer with a fresh id.
    pub fn new(name: impl Into<String>, order: i64) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            visible: true,
            order,
        }
    }
}

/// Sort key used everywhere layers are ordered. Ties break on id so the
/// order stays total even if two replicas picked the same `order`.
pub(crate) fn layer_sort_key(layer: &Layer) -> (i64, &str) {
    (layer.order, layer.id.as_str())
}

/// Content fingerprint of a set of layers: every `(id, name, visible,
/// order)` in sorted order. Two layer sets with equal fingerprints are
/// equal field-for-field.
pub fn layer_fingerprint<'a>(layers: impl IntoIterator<Item = &'a Layer>) -> String {
    let mut sorted: Vec<&Layer> = layers.into_iter().collect();
    sorted.sort_by(|a, b| layer_sort_key(a).cmp(&layer_sort_key(b)));
    let mut key = String::new();
    for layer in sorted {
        key.push_str(&layer.id);
        key.push('\u{1f}');
        key.push_str(&layer.name);
        key.push('\u{1f}');
        key.push(if layer.visible { '1' } else { '0' });
        key.push('\u{1f}');
        key.push_str(&layer.order.to_string());
        key.push('\u{1e}');
    }
    key
}
