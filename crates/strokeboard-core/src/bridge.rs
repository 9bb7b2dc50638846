//! Reconciliation between the drawing engine and a shared store.
//!
//! Remote to local: two primitive keys summarise the remote board (the
//! sorted stroke ids, and the layer fingerprint plus the ordering list).
//! Full records are read and applied through the engine's bulk setters
//! only when a key changes.
//!
//! Local to remote: the local stroke ids are diffed against the baseline
//! (what the store is known to hold). Strokes are immutable, so the id
//! diff is exact. Layers mutate in place and are pushed as a full upsert
//! whenever their fingerprint moves.
//!
//! Applying remote state leaves the local ids equal to the new baseline,
//! so the next diff is empty and nothing is echoed back.

use std::collections::HashSet;

use kurbo::Point;

use crate::engine::DrawingEngine;
use crate::layer::{Layer, LayerId, layer_fingerprint};
use crate::store::{LayerRecord, Presence, SharedStore, StoreResult, StrokeRecord};
use crate::stroke::{Stroke, StrokeId};

/// Last-acknowledged remote state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Baseline {
    pub stroke_ids: HashSet<StrokeId>,
    pub layer_ids: HashSet<LayerId>,
    pub layer_fingerprint: String,
}

/// Layer changes to write.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerPush {
    /// Every local layer, bottom first.
    pub upsert: Vec<LayerRecord>,
    /// Layers in the baseline that no longer exist locally.
    pub removed: Vec<LayerId>,
    /// Layer ids bottom first.
    pub order: Vec<LayerId>,
    pub fingerprint: String,
}

/// Everything a push would write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushPlan {
    /// Local strokes missing from the baseline, in commit order.
    pub added: Vec<StrokeId>,
    /// Baseline strokes missing locally, sorted.
    pub removed: Vec<StrokeId>,
    /// The whole baseline was removed: write one clear instead of `removed`.
    pub clear_all: bool,
    pub layers: Option<LayerPush>,
}

impl PushPlan {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && !self.clear_all && self.layers.is_none()
    }
}

/// What a push actually wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
    pub added: usize,
    pub removed: usize,
    pub cleared: bool,
    pub layers: bool,
}

/// Two-way synchroniser between one engine and one store.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationBridge {
    baseline: Baseline,
    observed_strokes_key: Option<String>,
    observed_layers_key: Option<String>,
    last_presence: Option<Presence>,
    /// Set after the first successful pull.
    joined: bool,
}

fn strokes_key(mut ids: Vec<StrokeId>) -> String {
    ids.sort();
    ids.join(",")
}

fn layers_key(layers: &[Layer], order: &[LayerId]) -> String {
    format!("{}#{}", layer_fingerprint(layers), order.join(","))
}

fn decode_layers(records: Vec<LayerRecord>) -> Vec<Layer> {
    records
        .into_iter()
        .filter_map(|record| match Layer::try_from(record) {
            Ok(layer) => Some(layer),
            Err(err) => {
                log::warn!("Skipping remote layer: {}", err);
                None
            }
        })
        .collect()
}

fn decode_strokes(records: Vec<StrokeRecord>) -> Vec<Stroke> {
    records
        .into_iter()
        .filter_map(|record| match Stroke::try_from(record) {
            Ok(stroke) => Some(stroke),
            Err(err) => {
                log::warn!("Skipping remote stroke: {}", err);
                None
            }
        })
        .collect()
}

impl ReconciliationBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn baseline(&self) -> &Baseline {
        &self.baseline
    }

    /// Whether a pull has succeeded at least once.
    pub fn has_joined(&self) -> bool {
        self.joined
    }

    fn layers_pending(&self, engine: &DrawingEngine) -> bool {
        self.joined && layer_fingerprint(engine.state().layers.values()) != self.baseline.layer_fingerprint
    }

    /// Compute the local-to-remote diff without writing anything.
    pub fn plan_push(&self, engine: &DrawingEngine) -> PushPlan {
        let state = engine.state();

        let added: Vec<StrokeId> = state
            .strokes
            .keys()
            .filter(|id| !self.baseline.stroke_ids.contains(*id))
            .cloned()
            .collect();
        let mut removed: Vec<StrokeId> = self
            .baseline
            .stroke_ids
            .iter()
            .filter(|id| !state.strokes.contains_key(*id))
            .cloned()
            .collect();
        removed.sort();
        let clear_all = state.strokes.is_empty() && !self.baseline.stroke_ids.is_empty();

        let fingerprint = layer_fingerprint(state.layers.values());
        let layers = (fingerprint != self.baseline.layer_fingerprint).then(|| {
            let sorted = state.sorted_layers();
            let mut removed: Vec<LayerId> = self
                .baseline
                .layer_ids
                .iter()
                .filter(|id| !state.layers.contains_key(*id))
                .cloned()
                .collect();
            removed.sort();
            LayerPush {
                upsert: sorted.iter().map(|l| LayerRecord::from(*l)).collect(),
                removed,
                order: sorted.iter().map(|l| l.id.clone()).collect(),
                fingerprint,
            }
        });

        PushPlan {
            added,
            removed,
            clear_all,
            layers,
        }
    }

    /// Write local changes to the store. The baseline advances only for
    /// writes that succeeded, so anything that failed shows up again in the
    /// next plan.
    pub fn push<S>(&mut self, engine: &DrawingEngine, store: &S) -> StoreResult<PushReport>
    where
        S: SharedStore + ?Sized,
    {
        let plan = self.plan_push(engine);
        let mut report = PushReport::default();
        if plan.is_empty() {
            return Ok(report);
        }

        // Layers first, so peers never see strokes on a layer they lack.
        if let Some(layers) = plan.layers {
            store.put_layers(&layers.upsert)?;
            if !layers.removed.is_empty() {
                store.delete_layers(&layers.removed)?;
            }
            store.set_layer_order(&layers.order)?;
            self.baseline.layer_ids = layers.order.iter().cloned().collect();
            self.baseline.layer_fingerprint = layers.fingerprint;
            report.layers = true;
        }

        if plan.clear_all {
            store.clear_strokes()?;
            report.removed = self.baseline.stroke_ids.len();
            report.cleared = true;
            self.baseline.stroke_ids.clear();
        } else if !plan.removed.is_empty() {
            store.delete_strokes(&plan.removed)?;
            for id in &plan.removed {
                self.baseline.stroke_ids.remove(id);
            }
            report.removed = plan.removed.len();
        }

        if !plan.added.is_empty() {
            let state = engine.state();
            let records: Vec<StrokeRecord> = plan
                .added
                .iter()
                .filter_map(|id| state.strokes.get(id))
                .map(StrokeRecord::from)
                .collect();
            store.put_strokes(&records)?;
            self.baseline.stroke_ids.extend(plan.added.iter().cloned());
            report.added = records.len();
        }

        log::debug!(
            "Pushed {} added, {} removed (clear: {}, layers: {})",
            report.added,
            report.removed,
            report.cleared,
            report.layers
        );
        Ok(report)
    }

    /// Apply remote changes to the engine. Returns true if engine state changed.
    ///
    /// Local changes not yet pushed survive a pull: unpushed strokes are kept
    /// and locally removed strokes stay removed. A pending local layer edit
    /// defers the remote layer set until it has been pushed.
    pub fn pull<S>(&mut self, engine: &mut DrawingEngine, store: &S) -> StoreResult<bool>
    where
        S: SharedStore + ?Sized,
    {
        let remote_ids = store.stroke_ids()?;
        let strokes_key = strokes_key(remote_ids.clone());
        let remote_layers = decode_layers(store.layers()?);
        let remote_order = store.layer_order()?;
        let layers_key = layers_key(&remote_layers, &remote_order);

        let strokes_changed = self.observed_strokes_key.as_deref() != Some(strokes_key.as_str());
        let layers_changed = self.observed_layers_key.as_deref() != Some(layers_key.as_str());
        if !strokes_changed && !layers_changed {
            return Ok(false);
        }

        let mut changed = false;
        let mut layers_applied = false;
        if layers_changed {
            if remote_layers.is_empty() {
                // Room without layers yet: ours get pushed.
                self.observed_layers_key = Some(layers_key);
            } else if self.layers_pending(engine) {
                log::debug!("Deferring remote layers until local layer edits are pushed");
            } else {
                changed |= self.apply_layers(engine, remote_layers);
                self.observed_layers_key = Some(layers_key);
                layers_applied = true;
            }
        }

        if strokes_changed || layers_applied {
            let records = store.strokes()?;
            changed |= self.apply_strokes(engine, decode_strokes(records), &remote_ids);
            self.observed_strokes_key = Some(strokes_key);
        }

        self.joined = true;
        Ok(changed)
    }

    fn apply_layers(&mut self, engine: &mut DrawingEngine, remote: Vec<Layer>) -> bool {
        let fingerprint = layer_fingerprint(&remote);
        let remote_ids: HashSet<LayerId> = remote.iter().map(|l| l.id.clone()).collect();

        let mut layers = remote;
        if !self.joined {
            // First contact: keep local layers that already carry strokes.
            let state = engine.state();
            layers.extend(
                state
                    .layers
                    .values()
                    .filter(|l| !remote_ids.contains(&l.id))
                    .filter(|l| state.strokes.values().any(|s| s.layer_id == l.id))
                    .cloned(),
            );
        }

        self.baseline.layer_ids = remote_ids;
        self.baseline.layer_fingerprint = fingerprint;

        if layer_fingerprint(&layers) == layer_fingerprint(engine.state().layers.values()) {
            return false;
        }
        engine.set_layers(layers);
        true
    }

    fn apply_strokes(&mut self, engine: &mut DrawingEngine, remote: Vec<Stroke>, remote_ids: &[StrokeId]) -> bool {
        let state = engine.state();
        let pending_added: HashSet<StrokeId> = state
            .strokes
            .keys()
            .filter(|id| !self.baseline.stroke_ids.contains(*id))
            .cloned()
            .collect();
        let pending_removed: HashSet<StrokeId> = self
            .baseline
            .stroke_ids
            .iter()
            .filter(|id| !state.strokes.contains_key(*id))
            .cloned()
            .collect();

        let remote_set: HashSet<&str> = remote_ids.iter().map(String::as_str).collect();
        let mut merged: Vec<Stroke> = remote
            .into_iter()
            .filter(|s| !pending_removed.contains(&s.id))
            .collect();
        merged.extend(
            state
                .strokes
                .values()
                .filter(|s| pending_added.contains(&s.id) && !remote_set.contains(s.id.as_str()))
                .cloned(),
        );

        let merged_ids: HashSet<&str> = merged.iter().map(|s| s.id.as_str()).collect();
        let local_ids: HashSet<&str> = state.strokes.keys().map(String::as_str).collect();
        let changed = merged_ids != local_ids;
        if changed {
            engine.set_strokes(merged);
        }

        let mut baseline: HashSet<StrokeId> = engine
            .state()
            .strokes
            .keys()
            .filter(|id| !pending_added.contains(*id))
            .cloned()
            .collect();
        baseline.extend(
            pending_removed
                .into_iter()
                .filter(|id| remote_set.contains(id.as_str())),
        );
        self.baseline.stroke_ids = baseline;
        changed
    }

    /// One reconciliation round: push local changes, then pull remote ones.
    /// The very first round pulls first so a fresh client adopts the room's
    /// layers instead of seeding its default layer into it. Store failures
    /// are logged and retried on the next round. Returns true if the engine
    /// changed.
    pub fn sync<S>(&mut self, engine: &mut DrawingEngine, store: &S) -> bool
    where
        S: SharedStore + ?Sized,
    {
        let mut changed = false;
        if !self.joined {
            changed |= self.pull_logged(engine, store);
        }
        if let Err(err) = self.push(engine, store) {
            log::warn!("Push to shared store failed: {}", err);
        }
        changed |= self.pull_logged(engine, store);
        changed
    }

    fn pull_logged<S>(&mut self, engine: &mut DrawingEngine, store: &S) -> bool
    where
        S: SharedStore + ?Sized,
    {
        self.pull(engine, store).unwrap_or_else(|err| {
            log::warn!("Pull from shared store failed: {}", err);
            false
        })
    }

    /// Mirror local tool, colour, name and cursor into the presence channel.
    /// Sends only when something changed. Returns true if presence was sent.
    pub fn sync_presence<S>(
        &mut self,
        engine: &DrawingEngine,
        cursor: Option<Point>,
        user_name: &str,
        store: &S,
    ) -> StoreResult<bool>
    where
        S: SharedStore + ?Sized,
    {
        let state = engine.state();
        let presence = Presence {
            cursor,
            active_tool: state.tool,
            active_color: state.color.to_hex(),
            user_name: user_name.to_string(),
        };
        if self.last_presence.as_ref() == Some(&presence) {
            return Ok(false);
        }
        store.set_presence(&presence)?;
        self.last_presence = Some(presence);
        Ok(true)
    }
}
