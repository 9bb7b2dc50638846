//! Drawing engine: owns all board state and every mutation of it.
//!
//! The engine is driven by a single logical thread. Invalid inputs (a
//! move with no active stroke, removing the last layer, undo on an empty
//! stack) are silent no-ops, since duplicate and late pointer events are
//! routine.

use std::collections::HashMap;

use indexmap::IndexMap;
use kurbo::{Point, Vec2};

use crate::camera::{Camera, ZoomDirection};
use crate::config::BoardConfig;
use crate::history::AuthorHistory;
use crate::layer::{Layer, LayerId, layer_sort_key};
use crate::stroke::{SerializableColor, Stroke, StrokeId, ToolKind, new_id, now_millis};

/// All engine-owned board state. Other components only ever see `&EngineState`.
#[derive(Debug, Clone)]
pub struct EngineState {
    /// Committed strokes keyed by id, in commit order.
    pub strokes: IndexMap<StrokeId, Stroke>,
    /// Layers keyed by id.
    pub layers: HashMap<LayerId, Layer>,
    /// Layer new strokes are drawn on. Always a live layer.
    pub active_layer_id: LayerId,
    pub tool: ToolKind,
    pub color: SerializableColor,
    pub brush_width: f64,
    /// Pan and zoom.
    pub camera: Camera,
    /// Bumped whenever the committed stroke set changes.
    pub strokes_revision: u64,
    /// Bumped whenever any layer field changes.
    pub layers_revision: u64,
}

impl EngineState {
    /// Layers in ascending compositing order (bottom first).
    pub fn sorted_layers(&self) -> Vec<&Layer> {
        let mut layers: Vec<&Layer> = self.layers.values().collect();
        layers.sort_by(|a, b| layer_sort_key(a).cmp(&layer_sort_key(b)));
        layers
    }

    /// Committed strokes bucketed by layer id, each bucket in commit order.
    pub fn strokes_by_layer(&self) -> HashMap<&str, Vec<&Stroke>> {
        let mut buckets: HashMap<&str, Vec<&Stroke>> = HashMap::new();
        for stroke in self.strokes.values() {
            buckets.entry(stroke.layer_id.as_str()).or_default().push(stroke);
        }
        buckets
    }

    /// Ids of visible layers in compositing order.
    pub fn visible_layer_ids(&self) -> Vec<&str> {
        self.sorted_layers()
            .into_iter()
            .filter(|l| l.visible)
            .map(|l| l.id.as_str())
            .collect()
    }

    pub fn layer(&self, id: &str) -> Option<&Layer> {
        self.layers.get(id)
    }

    pub fn stroke(&self, id: &str) -> Option<&Stroke> {
        self.strokes.get(id)
    }
}

/// Pointer lifecycle: `Idle -> Drawing -> Idle`.
#[derive(Debug, Clone, Default)]
enum PointerState {
    #[default]
    Idle,
    /// A stroke is being drawn by this session.
    Drawing(Stroke),
}

/// The drawing engine.
#[derive(Debug, Clone)]
pub struct DrawingEngine {
    state: EngineState,
    pointer: PointerState,
    history: AuthorHistory,
    config: BoardConfig,
}

impl Default for DrawingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DrawingEngine {
    /// Create an engine with the default config and one empty layer.
    pub fn new() -> Self {
        Self::with_config(BoardConfig::default())
    }

    /// Create an engine with the given config and one empty layer.
    ///
    /// An invalid config is replaced by [`BoardConfig::default`].
    pub fn with_config(config: BoardConfig) -> Self {
        let config = match config.validate() {
            Ok(()) => config,
            Err(e) => {
                log::warn!("{}; using default board config", e);
                BoardConfig::default()
            }
        };
        let layer = Layer::new(format!("{} 1", config.default_layer_name), 0);
        let active_layer_id = layer.id.clone();
        let mut layers = HashMap::new();
        layers.insert(layer.id.clone(), layer);

        let state = EngineState {
            strokes: IndexMap::new(),
            layers,
            active_layer_id,
            tool: ToolKind::default(),
            color: SerializableColor::from_hex(&config.default_color),
            brush_width: config.clamp_brush_width(config.default_brush_width),
            camera: Camera::with_bounds(config.min_zoom, config.max_zoom),
            strokes_revision: 0,
            layers_revision: 0,
        };

        Self {
            state,
            pointer: PointerState::Idle,
            history: AuthorHistory::new(config.undo_capacity),
            config,
        }
    }

    /// Read-only view of the board state.
    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    /// The stroke currently being drawn, if any.
    pub fn in_flight(&self) -> Option<&Stroke> {
        match &self.pointer {
            PointerState::Drawing(stroke) => Some(stroke),
            PointerState::Idle => None,
        }
    }

    pub fn is_drawing(&self) -> bool {
        matches!(self.pointer, PointerState::Drawing(_))
    }

    fn touch_strokes(&mut self) {
        self.state.strokes_revision = self.state.strokes_revision.wrapping_add(1);
    }

    fn touch_layers(&mut self) {
        self.state.layers_revision = self.state.layers_revision.wrapping_add(1);
    }

    // --- Pointer lifecycle ---

    /// Begin a stroke at `point` (canvas space). Ignored while a stroke is
    /// already in flight, since devices can emit duplicate down events.
    /// Returns true if a stroke was started.
    pub fn pointer_down(&mut self, point: Point, author_id: &str, author_name: &str) -> bool {
        if self.is_drawing() {
            log::debug!("pointer_down ignored: stroke already in flight");
            return false;
        }
        let mut points = Vec::with_capacity(64);
        points.push(point);
        self.pointer = PointerState::Drawing(Stroke {
            id: new_id(),
            points,
            color: self.state.color,
            width: self.state.brush_width,
            layer_id: self.state.active_layer_id.clone(),
            tool: self.state.tool,
            author_id: author_id.to_string(),
            author_name: author_name.to_string(),
            created_at: now_millis(),
        });
        true
    }

    /// Append a point to the in-flight stroke. Returns false if none is active.
    pub fn pointer_move(&mut self, point: Point) -> bool {
        match &mut self.pointer {
            PointerState::Drawing(stroke) => {
                stroke.points.push(point);
                true
            }
            PointerState::Idle => false,
        }
    }

    /// Commit the in-flight stroke. This is the only operation that grows
    /// the stroke set from local input.
    pub fn pointer_up(&mut self) -> Option<Stroke> {
        let PointerState::Drawing(mut stroke) = std::mem::take(&mut self.pointer) else {
            return None;
        };
        if stroke.points.is_empty() {
            return None;
        }
        if !self.state.layers.contains_key(&stroke.layer_id) {
            // The target layer was removed mid-gesture.
            stroke.layer_id = self.state.active_layer_id.clone();
        }
        stroke.points.shrink_to_fit();
        self.state.strokes.insert(stroke.id.clone(), stroke.clone());
        self.history.record(stroke.clone());
        self.touch_strokes();
        Some(stroke)
    }

    /// Discard the in-flight stroke without committing it.
    pub fn cancel_stroke(&mut self) {
        self.pointer = PointerState::Idle;
    }

    // --- Undo / redo ---

    /// Remove the author's most recent stroke that is still on the board.
    pub fn undo(&mut self, author_id: &str) -> bool {
        while let Some(stroke) = self.history.pop_undo(author_id) {
            if let Some(removed) = self.state.strokes.shift_remove(&stroke.id) {
                self.history.push_redo(removed);
                self.touch_strokes();
                return true;
            }
            log::debug!("undo skipped stale stroke {}", stroke.id);
        }
        false
    }

    /// Restore the author's most recently undone stroke.
    pub fn redo(&mut self, author_id: &str) -> bool {
        while let Some(stroke) = self.history.pop_redo(author_id) {
            if !self.state.layers.contains_key(&stroke.layer_id)
                || self.state.strokes.contains_key(&stroke.id)
            {
                log::debug!("redo skipped stroke {}", stroke.id);
                continue;
            }
            self.state.strokes.insert(stroke.id.clone(), stroke.clone());
            self.history.push_undo(stroke);
            self.touch_strokes();
            return true;
        }
        false
    }

    /// Whether [`undo`](Self::undo) would remove something. Entries whose
    /// stroke is already gone do not count.
    pub fn can_undo(&self, author_id: &str) -> bool {
        self.history
            .undo_entries(author_id)
            .any(|stroke| self.state.strokes.contains_key(&stroke.id))
    }

    /// Whether [`redo`](Self::redo) would restore something.
    pub fn can_redo(&self, author_id: &str) -> bool {
        self.history.redo_entries(author_id).any(|stroke| {
            self.state.layers.contains_key(&stroke.layer_id) && !self.state.strokes.contains_key(&stroke.id)
        })
    }

    pub fn undo_depth(&self, author_id: &str) -> usize {
        self.history.undo_depth(author_id)
    }

    pub fn redo_depth(&self, author_id: &str) -> usize {
        self.history.redo_depth(author_id)
    }

    // --- Stroke removal ---

    /// Delete one committed stroke.
    pub fn delete_stroke(&mut self, id: &str) -> Option<Stroke> {
        let removed = self.state.strokes.shift_remove(id)?;
        self.touch_strokes();
        Some(removed)
    }

    /// Remove every committed stroke and forget all undo history.
    pub fn clear_strokes(&mut self) {
        if self.state.strokes.is_empty() {
            return;
        }
        self.state.strokes.clear();
        self.history.clear_all();
        self.touch_strokes();
    }

    // --- Setters ---

    pub fn set_tool(&mut self, tool: ToolKind) {
        self.state.tool = tool;
    }

    pub fn set_color(&mut self, color: SerializableColor) {
        self.state.color = color;
    }

    /// Set the brush width, clamped to the configured bounds.
    pub fn set_brush_width(&mut self, width: f64) {
        if width.is_finite() {
            self.state.brush_width = self.config.clamp_brush_width(width);
        }
    }

    /// Grow or shrink the brush by `steps` brush steps.
    pub fn adjust_brush_width(&mut self, steps: f64) {
        self.set_brush_width(self.state.brush_width + steps * self.config.brush_step);
    }

    /// Make `id` the active layer. Ignored if the layer does not exist.
    pub fn set_active_layer(&mut self, id: &str) -> bool {
        if !self.state.layers.contains_key(id) {
            return false;
        }
        self.state.active_layer_id = id.to_string();
        true
    }

    /// Set the zoom factor, clamped to the configured bounds.
    pub fn set_zoom(&mut self, zoom: f64) {
        self.state.camera.set_zoom(zoom);
    }

    pub fn zoom_by_step(&mut self, direction: ZoomDirection) {
        self.state.camera.step_zoom(direction, self.config.zoom_step);
    }

    pub fn set_pan(&mut self, pan: Vec2) {
        self.state.camera.set_pan(pan);
    }

    pub fn pan_by(&mut self, delta: Vec2) {
        self.state.camera.pan_by(delta);
    }

    pub fn reset_view(&mut self) {
        self.state.camera.reset();
    }

    // --- Layers ---

    /// Add a layer on top of all others and make it active.
    pub fn add_layer(&mut self, name: Option<&str>) -> LayerId {
        let order = self
            .state
            .layers
            .values()
            .map(|l| l.order)
            .max()
            .map_or(0, |max| max + 1);
        let name = match name {
            Some(name) => name.to_string(),
            None => format!(
                "{} {}",
                self.config.default_layer_name,
                self.state.layers.len() + 1
            ),
        };
        let layer = Layer::new(name, order);
        let id = layer.id.clone();
        self.state.layers.insert(id.clone(), layer);
        self.state.active_layer_id = id.clone();
        self.touch_layers();
        id
    }

    /// Remove a layer and every stroke on it. The last layer cannot be removed.
    pub fn remove_layer(&mut self, id: &str) -> bool {
        if self.state.layers.len() <= 1 || !self.state.layers.contains_key(id) {
            return false;
        }
        self.state.layers.remove(id);
        let before = self.state.strokes.len();
        self.state.strokes.retain(|_, s| s.layer_id != id);
        if self.state.strokes.len() != before {
            self.touch_strokes();
        }
        if self.state.active_layer_id == id {
            self.repoint_active_layer();
        }
        self.touch_layers();
        true
    }

    pub fn toggle_visibility(&mut self, id: &str) -> bool {
        let Some(layer) = self.state.layers.get_mut(id) else {
            return false;
        };
        layer.visible = !layer.visible;
        self.touch_layers();
        true
    }

    pub fn rename_layer(&mut self, id: &str, name: &str) -> bool {
        let Some(layer) = self.state.layers.get_mut(id) else {
            return false;
        };
        if layer.name == name {
            return false;
        }
        layer.name = name.to_string();
        self.touch_layers();
        true
    }

    /// Move a layer one step towards the top of the stack.
    pub fn move_layer_up(&mut self, id: &str) -> bool {
        self.swap_with_neighbor(id, 1)
    }

    /// Move a layer one step towards the bottom of the stack.
    pub fn move_layer_down(&mut self, id: &str) -> bool {
        self.swap_with_neighbor(id, -1)
    }

    /// Transpose `order` with the adjacent layer in sorted order.
    fn swap_with_neighbor(&mut self, id: &str, direction: isize) -> bool {
        let mut sorted: Vec<(i64, String)> = self
            .state
            .sorted_layers()
            .into_iter()
            .map(|l| (l.order, l.id.clone()))
            .collect();
        let Some(pos) = sorted.iter().position(|(_, lid)| lid == id) else {
            return false;
        };
        let Some(neighbor) = pos.checked_add_signed(direction).filter(|&n| n < sorted.len()) else {
            return false;
        };

        if sorted[pos].0 == sorted[neighbor].0 {
            // Tied orders (only from conflicting replicas): renumber first so
            // the swap actually changes the ordering.
            for (i, (order, lid)) in sorted.iter_mut().enumerate() {
                *order = i as i64;
                if let Some(layer) = self.state.layers.get_mut(lid.as_str()) {
                    layer.order = *order;
                }
            }
        }

        let (a_order, a_id) = sorted[pos].clone();
        let (b_order, b_id) = sorted[neighbor].clone();
        if let Some(layer) = self.state.layers.get_mut(&a_id) {
            layer.order = b_order;
        }
        if let Some(layer) = self.state.layers.get_mut(&b_id) {
            layer.order = a_order;
        }
        self.touch_layers();
        true
    }

    /// Point the active layer at the top-most layer.
    fn repoint_active_layer(&mut self) {
        if let Some(top) = self.state.sorted_layers().last() {
            self.state.active_layer_id = top.id.clone();
        }
    }

    // --- Bulk replacement (remote state and snapshot loading only) ---

    /// Replace the committed stroke set. Undo/redo stacks are untouched:
    /// remote strokes are not the local author's to undo. Strokes with no
    /// points or a dangling layer are skipped.
    pub(crate) fn set_strokes(&mut self, strokes: Vec<Stroke>) {
        let mut strokes: Vec<Stroke> = strokes
            .into_iter()
            .filter(|s| {
                let keep = !s.points.is_empty() && self.state.layers.contains_key(&s.layer_id);
                if !keep {
                    log::debug!("set_strokes skipped stroke {}", s.id);
                }
                keep
            })
            .collect();
        strokes.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        self.state.strokes = strokes.into_iter().map(|s| (s.id.clone(), s)).collect();
        self.touch_strokes();
    }

    /// Replace the layer set. An empty list is rejected to keep at least one
    /// layer; strokes on layers that disappeared are dropped.
    pub(crate) fn set_layers(&mut self, layers: Vec<Layer>) {
        if layers.is_empty() {
            log::warn!("set_layers rejected: empty layer list");
            return;
        }
        self.state.layers = layers.into_iter().map(|l| (l.id.clone(), l)).collect();
        if !self.state.layers.contains_key(&self.state.active_layer_id) {
            self.repoint_active_layer();
        }
        let before = self.state.strokes.len();
        let layers = &self.state.layers;
        self.state.strokes.retain(|_, s| layers.contains_key(&s.layer_id));
        if self.state.strokes.len() != before {
            self.touch_strokes();
        }
        self.touch_layers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draw(engine: &mut DrawingEngine, author: &str, points: &[(f64, f64)]) -> Stroke {
        let (first, rest) = points.split_first().unwrap();
        assert!(engine.pointer_down(Point::new(first.0, first.1), author, &author.to_uppercase()));
        for &(x, y) in rest {
            engine.pointer_move(Point::new(x, y));
        }
        engine.pointer_up().unwrap()
    }

    #[test]
    fn test_new_engine_has_one_active_layer() {
        let engine = DrawingEngine::new();
        assert_eq!(engine.state().layers.len(), 1);
        assert!(engine.state().layers.contains_key(&engine.state().active_layer_id));
        assert!(engine.state().strokes.is_empty());
        assert!(!engine.is_drawing());
    }

    #[test]
    fn test_pointer_lifecycle() {
        let mut engine = DrawingEngine::new();
        engine.set_color(SerializableColor::from_hex("#ff0000"));
        engine.set_brush_width(8.0);
        let stroke = draw(&mut engine, "x", &[(0.0, 0.0), (5.0, 5.0), (10.0, 0.0)]);

        assert_eq!(engine.state().strokes.len(), 1);
        assert_eq!(stroke.points.len(), 3);
        assert_eq!(stroke.color, SerializableColor::new(255, 0, 0, 255));
        assert_eq!(stroke.width, 8.0);
        assert_eq!(stroke.layer_id, engine.state().active_layer_id);
        assert_eq!(stroke.author_name, "X");
        assert!(!engine.is_drawing());
    }

    #[test]
    fn test_duplicate_pointer_down_is_ignored() {
        let mut engine = DrawingEngine::new();
        assert!(engine.pointer_down(Point::new(1.0, 1.0), "x", "X"));
        let id = engine.in_flight().unwrap().id.clone();
        assert!(!engine.pointer_down(Point::new(9.0, 9.0), "x", "X"));
        assert_eq!(engine.in_flight().unwrap().id, id);
        assert_eq!(engine.in_flight().unwrap().points.len(), 1);
    }

    #[test]
    fn test_move_and_up_without_down_are_noops() {
        let mut engine = DrawingEngine::new();
        assert!(!engine.pointer_move(Point::new(1.0, 1.0)));
        assert!(engine.pointer_up().is_none());
        assert!(engine.state().strokes.is_empty());
        assert_eq!(engine.state().strokes_revision, 0);
    }

    #[test]
    fn test_zero_point_commit_is_noop() {
        let mut engine = DrawingEngine::new();
        engine.pointer_down(Point::ZERO, "x", "X");
        if let PointerState::Drawing(stroke) = &mut engine.pointer {
            stroke.points.clear();
        }
        assert!(engine.pointer_up().is_none());
        assert!(engine.state().strokes.is_empty());
        assert_eq!(engine.undo_depth("x"), 0);
        assert!(!engine.is_drawing());
    }

    #[test]
    fn test_single_point_stroke_commits() {
        let mut engine = DrawingEngine::new();
        let stroke = draw(&mut engine, "x", &[(3.0, 4.0)]);
        assert!(stroke.is_dot());
        assert_eq!(engine.state().strokes.len(), 1);
    }

    #[test]
    fn test_cancel_discards_in_flight() {
        let mut engine = DrawingEngine::new();
        engine.pointer_down(Point::ZERO, "x", "X");
        engine.cancel_stroke();
        assert!(engine.pointer_up().is_none());
        assert!(engine.state().strokes.is_empty());
    }

    #[test]
    fn test_per_author_undo_scoping() {
        let mut engine = DrawingEngine::new();
        let a1 = draw(&mut engine, "x", &[(0.0, 0.0)]);
        let a2 = draw(&mut engine, "y", &[(1.0, 1.0)]);
        let a3 = draw(&mut engine, "x", &[(2.0, 2.0)]);

        assert!(engine.undo("x"));
        assert!(engine.state().stroke(&a3.id).is_none());
        assert!(engine.state().stroke(&a2.id).is_some());

        assert!(engine.undo("x"));
        assert!(engine.state().stroke(&a1.id).is_none());
        assert!(engine.state().stroke(&a2.id).is_some());
        assert!(!engine.undo("x"));

        assert!(engine.undo("y"));
        assert!(engine.state().strokes.is_empty());
    }

    #[test]
    fn test_undo_y_only_removes_y() {
        let mut engine = DrawingEngine::new();
        let a1 = draw(&mut engine, "x", &[(0.0, 0.0)]);
        let a2 = draw(&mut engine, "y", &[(1.0, 1.0)]);
        let a3 = draw(&mut engine, "x", &[(2.0, 2.0)]);

        assert!(engine.undo("y"));
        assert!(engine.state().stroke(&a2.id).is_none());
        assert!(engine.state().stroke(&a1.id).is_some());
        assert!(engine.state().stroke(&a3.id).is_some());
    }

    #[test]
    fn test_redo_restores_and_new_stroke_invalidates() {
        let mut engine = DrawingEngine::new();
        let a1 = draw(&mut engine, "x", &[(0.0, 0.0)]);
        assert!(engine.undo("x"));
        assert!(engine.can_redo("x"));

        assert!(engine.redo("x"));
        assert!(engine.state().stroke(&a1.id).is_some());
        assert!(engine.undo("x"));

        draw(&mut engine, "x", &[(5.0, 5.0)]);
        assert!(!engine.can_redo("x"));
        assert!(!engine.redo("x"));
        assert_eq!(engine.state().strokes.len(), 1);
    }

    #[test]
    fn test_other_author_commit_keeps_redo() {
        let mut engine = DrawingEngine::new();
        draw(&mut engine, "x", &[(0.0, 0.0)]);
        engine.undo("x");
        draw(&mut engine, "y", &[(1.0, 1.0)]);
        assert!(engine.can_redo("x"));
    }

    #[test]
    fn test_undo_skips_strokes_removed_elsewhere() {
        let mut engine = DrawingEngine::new();
        let a1 = draw(&mut engine, "x", &[(0.0, 0.0)]);
        let a2 = draw(&mut engine, "x", &[(1.0, 1.0)]);
        engine.delete_stroke(&a2.id);

        assert!(engine.undo("x"));
        assert!(engine.state().stroke(&a1.id).is_none());
        assert!(!engine.undo("x"));
    }

    #[test]
    fn test_can_undo_ignores_stale_entries() {
        let mut engine = DrawingEngine::new();
        let a1 = draw(&mut engine, "x", &[(0.0, 0.0)]);
        engine.delete_stroke(&a1.id);
        assert_eq!(engine.undo_depth("x"), 1);
        assert!(!engine.can_undo("x"));
        assert!(!engine.undo("x"));

        let layer = engine.add_layer(Some("Ink"));
        let a2 = draw(&mut engine, "x", &[(1.0, 1.0)]);
        assert_eq!(a2.layer_id, layer);
        assert!(engine.can_undo("x"));
        assert!(engine.undo("x"));
        assert!(engine.can_redo("x"));

        assert!(engine.remove_layer(&layer));
        assert!(!engine.can_redo("x"));
        assert!(!engine.redo("x"));
    }

    #[test]
    fn test_invalid_config_falls_back_to_defaults() {
        let inverted = BoardConfig {
            min_brush_width: 60.0,
            min_zoom: 5.0,
            max_zoom: 2.0,
            ..BoardConfig::default()
        };
        let mut engine = DrawingEngine::with_config(inverted);
        assert_eq!(engine.config(), &BoardConfig::default());
        assert_eq!(engine.state().brush_width, 4.0);

        engine.set_brush_width(500.0);
        assert_eq!(engine.state().brush_width, 50.0);
        engine.set_zoom(10.0);
        assert_eq!(engine.state().camera.zoom, 4.0);

        let nan_step = BoardConfig {
            zoom_step: f64::NAN,
            ..BoardConfig::default()
        };
        let mut engine = DrawingEngine::with_config(nan_step);
        engine.zoom_by_step(ZoomDirection::In);
        assert!(engine.state().camera.zoom.is_finite());
    }

    #[test]
    fn test_brush_and_zoom_clamping() {
        let mut engine = DrawingEngine::new();
        engine.set_brush_width(0.0);
        assert_eq!(engine.state().brush_width, 1.0);
        engine.set_brush_width(500.0);
        assert_eq!(engine.state().brush_width, 50.0);
        engine.adjust_brush_width(-3.0);
        assert_eq!(engine.state().brush_width, 47.0);

        engine.set_zoom(0.0);
        assert_eq!(engine.state().camera.zoom, 0.25);
        engine.set_zoom(10.0);
        assert_eq!(engine.state().camera.zoom, 4.0);
    }

    #[test]
    fn test_stroke_uses_current_tool_and_layer() {
        let mut engine = DrawingEngine::new();
        let layer = engine.add_layer(Some("Ink"));
        engine.set_tool(ToolKind::Erase);
        let stroke = draw(&mut engine, "x", &[(0.0, 0.0), (1.0, 0.0)]);
        assert_eq!(stroke.tool, ToolKind::Erase);
        assert_eq!(stroke.layer_id, layer);
    }

    #[test]
    fn test_set_active_layer_requires_live_layer() {
        let mut engine = DrawingEngine::new();
        let original = engine.state().active_layer_id.clone();
        assert!(!engine.set_active_layer("missing"));
        assert_eq!(engine.state().active_layer_id, original);
    }

    #[test]
    fn test_add_layer_goes_on_top() {
        let mut engine = DrawingEngine::new();
        let bottom = engine.state().active_layer_id.clone();
        let top = engine.add_layer(None);
        let sorted: Vec<&str> = engine.state().sorted_layers().iter().map(|l| l.id.as_str()).collect();
        assert_eq!(sorted, vec![bottom.as_str(), top.as_str()]);
        assert_eq!(engine.state().layers[&top].name, "Layer 2");
        assert_eq!(engine.state().active_layer_id, top);
    }

    #[test]
    fn test_layer_cascade() {
        let mut engine = DrawingEngine::new();
        let first = engine.state().active_layer_id.clone();
        let keep = draw(&mut engine, "x", &[(0.0, 0.0)]);
        let second = engine.add_layer(None);
        draw(&mut engine, "x", &[(1.0, 1.0)]);
        draw(&mut engine, "y", &[(2.0, 2.0)]);

        assert!(engine.remove_layer(&second));
        assert_eq!(engine.state().strokes.len(), 1);
        assert!(engine.state().stroke(&keep.id).is_some());
        assert_eq!(engine.state().active_layer_id, first);
    }

    #[test]
    fn test_last_layer_cannot_be_removed() {
        let mut engine = DrawingEngine::new();
        draw(&mut engine, "x", &[(0.0, 0.0)]);
        let only = engine.state().active_layer_id.clone();
        let revision = engine.state().layers_revision;

        assert!(!engine.remove_layer(&only));
        assert_eq!(engine.state().layers.len(), 1);
        assert_eq!(engine.state().strokes.len(), 1);
        assert_eq!(engine.state().layers_revision, revision);
    }

    #[test]
    fn test_toggle_and_rename() {
        let mut engine = DrawingEngine::new();
        let id = engine.state().active_layer_id.clone();
        assert!(engine.toggle_visibility(&id));
        assert!(!engine.state().layers[&id].visible);
        assert!(engine.state().visible_layer_ids().is_empty());
        assert!(engine.rename_layer(&id, "Background"));
        assert_eq!(engine.state().layers[&id].name, "Background");
        assert!(!engine.rename_layer("missing", "x"));
    }

    #[test]
    fn test_move_up_and_down_swap_orders() {
        let mut engine = DrawingEngine::new();
        let a = engine.state().active_layer_id.clone();
        let b = engine.add_layer(None);
        let c = engine.add_layer(None);

        assert!(engine.move_layer_up(&a));
        let ids: Vec<String> = engine.state().sorted_layers().iter().map(|l| l.id.clone()).collect();
        assert_eq!(ids, vec![b.clone(), a.clone(), c.clone()]);

        assert!(!engine.move_layer_up(&c));
        assert!(!engine.move_layer_down(&b));

        assert!(engine.move_layer_down(&c));
        let ids: Vec<String> = engine.state().sorted_layers().iter().map(|l| l.id.clone()).collect();
        assert_eq!(ids, vec![b, c, a]);
    }

    #[test]
    fn test_move_with_tied_orders_still_reorders() {
        let mut engine = DrawingEngine::new();
        let mut first = Layer::new("A", 5);
        first.id = "a".to_string();
        let mut second = Layer::new("B", 5);
        second.id = "b".to_string();
        engine.set_layers(vec![first, second]);

        assert!(engine.move_layer_up("a"));
        let ids: Vec<&str> = engine.state().sorted_layers().iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_set_strokes_leaves_history_alone() {
        let mut engine = DrawingEngine::new();
        let mine = draw(&mut engine, "x", &[(0.0, 0.0)]);
        let mut remote = mine.clone();
        remote.id = "remote".to_string();
        remote.author_id = "y".to_string();

        engine.set_strokes(vec![mine.clone(), remote]);
        assert_eq!(engine.state().strokes.len(), 2);
        assert_eq!(engine.undo_depth("x"), 1);
        assert_eq!(engine.undo_depth("y"), 0);
        assert!(!engine.undo("y"));
    }

    #[test]
    fn test_set_strokes_skips_malformed_and_orders_by_creation() {
        let mut engine = DrawingEngine::new();
        let layer = engine.state().active_layer_id.clone();
        let make = |id: &str, created_at: i64, points: Vec<Point>, layer_id: &str| Stroke {
            id: id.to_string(),
            points,
            color: SerializableColor::black(),
            width: 2.0,
            layer_id: layer_id.to_string(),
            tool: ToolKind::Draw,
            author_id: "y".to_string(),
            author_name: "Y".to_string(),
            created_at,
        };
        engine.set_strokes(vec![
            make("late", 20, vec![Point::ZERO], &layer),
            make("empty", 5, Vec::new(), &layer),
            make("orphan", 1, vec![Point::ZERO], "gone"),
            make("early", 10, vec![Point::ZERO], &layer),
        ]);
        let ids: Vec<&str> = engine.state().strokes.keys().map(|k| k.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
    }

    #[test]
    fn test_set_layers_rejects_empty_and_repoints_active() {
        let mut engine = DrawingEngine::new();
        let original = engine.state().active_layer_id.clone();
        draw(&mut engine, "x", &[(0.0, 0.0)]);

        engine.set_layers(Vec::new());
        assert_eq!(engine.state().layers.len(), 1);

        let low = Layer::new("Low", 0);
        let high = Layer::new("High", 3);
        let high_id = high.id.clone();
        engine.set_layers(vec![low, high]);
        assert!(!engine.state().layers.contains_key(&original));
        assert_eq!(engine.state().active_layer_id, high_id);
        assert!(engine.state().strokes.is_empty());
    }

    #[test]
    fn test_commit_after_layer_vanished_rehomes_stroke() {
        let mut engine = DrawingEngine::new();
        let doomed = engine.add_layer(None);
        engine.pointer_down(Point::ZERO, "x", "X");
        assert!(engine.remove_layer(&doomed));
        let stroke = engine.pointer_up().unwrap();
        assert_eq!(stroke.layer_id, engine.state().active_layer_id);
    }

    #[test]
    fn test_clear_strokes_resets_history() {
        let mut engine = DrawingEngine::new();
        draw(&mut engine, "x", &[(0.0, 0.0)]);
        draw(&mut engine, "y", &[(0.0, 0.0)]);
        engine.clear_strokes();
        assert!(engine.state().strokes.is_empty());
        assert!(!engine.can_undo("x"));
        assert!(!engine.undo("y"));
    }

    #[test]
    fn test_revisions_track_content_changes() {
        let mut engine = DrawingEngine::new();
        let s0 = engine.state().strokes_revision;
        let l0 = engine.state().layers_revision;
        engine.set_tool(ToolKind::Erase);
        engine.set_zoom(2.0);
        assert_eq!(engine.state().strokes_revision, s0);
        assert_eq!(engine.state().layers_revision, l0);

        draw(&mut engine, "x", &[(0.0, 0.0)]);
        assert!(engine.state().strokes_revision > s0);
        let id = engine.state().active_layer_id.clone();
        engine.toggle_visibility(&id);
        assert!(engine.state().layers_revision > l0);
    }
}
