//! Per-author undo/redo stacks.

use std::collections::{HashMap, VecDeque};

use crate::stroke::Stroke;

/// Undo and redo stacks for one author.
#[derive(Debug, Clone, Default)]
struct AuthorStacks {
    undo: VecDeque<Stroke>,
    redo: VecDeque<Stroke>,
}

/// Undo/redo history keyed by author id.
///
/// Each stack is bounded; past capacity the oldest entry is evicted.
#[derive(Debug, Clone)]
pub struct AuthorHistory {
    authors: HashMap<String, AuthorStacks>,
    capacity: usize,
}

fn push_bounded(stack: &mut VecDeque<Stroke>, stroke: Stroke, capacity: usize) {
    stack.push_back(stroke);
    while stack.len() > capacity {
        stack.pop_front();
    }
}

impl AuthorHistory {
    /// Create an empty history with the given per-stack capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            authors: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record a freshly committed stroke: push it for undo and invalidate
    /// the author's redo stack.
    pub fn record(&mut self, stroke: Stroke) {
        let capacity = self.capacity;
        let stacks = self.authors.entry(stroke.author_id.clone()).or_default();
        stacks.redo.clear();
        push_bounded(&mut stacks.undo, stroke, capacity);
    }

    pub fn pop_undo(&mut self, author_id: &str) -> Option<Stroke> {
        self.authors.get_mut(author_id)?.undo.pop_back()
    }

    pub fn pop_redo(&mut self, author_id: &str) -> Option<Stroke> {
        self.authors.get_mut(author_id)?.redo.pop_back()
    }

    /// Push onto the undo stack without touching redo (used by redo).
    pub fn push_undo(&mut self, stroke: Stroke) {
        let capacity = self.capacity;
        let stacks = self.authors.entry(stroke.author_id.clone()).or_default();
        push_bounded(&mut stacks.undo, stroke, capacity);
    }

    pub fn push_redo(&mut self, stroke: Stroke) {
        let capacity = self.capacity;
        let stacks = self.authors.entry(stroke.author_id.clone()).or_default();
        push_bounded(&mut stacks.redo, stroke, capacity);
    }

    pub fn undo_depth(&self, author_id: &str) -> usize {
        self.authors.get(author_id).map_or(0, |s| s.undo.len())
    }

    pub fn redo_depth(&self, author_id: &str) -> usize {
        self.authors.get(author_id).map_or(0, |s| s.redo.len())
    }

    /// The author's undo entries, most recent first.
    pub fn undo_entries(&self, author_id: &str) -> impl Iterator<Item = &Stroke> {
        self.authors.get(author_id).into_iter().flat_map(|s| s.undo.iter().rev())
    }

    /// The author's redo entries, most recent first.
    pub fn redo_entries(&self, author_id: &str) -> impl Iterator<Item = &Stroke> {
        self.authors.get(author_id).into_iter().flat_map(|s| s.redo.iter().rev())
    }

    /// Forget one author's history.
    pub fn clear(&mut self, author_id: &str) {
        self.authors.remove(author_id);
    }

    /// Forget every author's history.
    pub fn clear_all(&mut self) {
        self.authors.clear();
    }
}
