//! Keyboard control surface: key bindings and the commands they trigger.

use crate::camera::ZoomDirection;
use crate::engine::DrawingEngine;
use crate::interaction::Modifiers;
use crate::stroke::ToolKind;

/// Engine-level commands reachable from the keyboard or toolbar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SelectTool(ToolKind),
    IncreaseBrush,
    DecreaseBrush,
    Undo,
    Redo,
    ZoomIn,
    ZoomOut,
    ResetView,
    CancelStroke,
    ClearBoard,
}

impl Command {
    /// Resolve a key press. `key` is the logical key name (`"z"`, `"["`, `"Escape"`).
    pub fn from_key(key: &str, modifiers: Modifiers) -> Option<Self> {
        let key = if key.chars().count() == 1 {
            key.to_ascii_lowercase()
        } else {
            key.to_string()
        };

        if modifiers.command() {
            return match key.as_str() {
                "z" if modifiers.shift => Some(Command::Redo),
                "z" => Some(Command::Undo),
                "y" => Some(Command::Redo),
                "=" | "+" => Some(Command::ZoomIn),
                "-" => Some(Command::ZoomOut),
                "0" => Some(Command::ResetView),
                _ => None,
            };
        }

        match key.as_str() {
            "b" | "p" => Some(Command::SelectTool(ToolKind::Draw)),
            "e" => Some(Command::SelectTool(ToolKind::Erase)),
            "]" => Some(Command::IncreaseBrush),
            "[" => Some(Command::DecreaseBrush),
            "Escape" => Some(Command::CancelStroke),
            _ => None,
        }
    }
}

impl DrawingEngine {
    /// Run a command on behalf of `author_id`. Returns false if it had no effect
    /// worth reporting (nothing to undo, nothing to redo).
    pub fn execute(&mut self, command: Command, author_id: &str) -> bool {
        match command {
            Command::SelectTool(tool) => self.set_tool(tool),
            Command::IncreaseBrush => self.adjust_brush_width(1.0),
            Command::DecreaseBrush => self.adjust_brush_width(-1.0),
            Command::Undo => return self.undo(author_id),
            Command::Redo => return self.redo(author_id),
            Command::ZoomIn => self.zoom_by_step(ZoomDirection::In),
            Command::ZoomOut => self.zoom_by_step(ZoomDirection::Out),
            Command::ResetView => self.reset_view(),
            Command::CancelStroke => self.cancel_stroke(),
            Command::ClearBoard => self.clear_strokes(),
        }
        true
    }
}

/// A keyboard shortcut definition.
#[derive(Debug, Clone)]
pub struct Shortcut {
    pub key: &'static str,
    pub ctrl: bool,
    pub shift: bool,
    pub description: &'static str,
}

impl Shortcut {
    pub const fn new(key: &'static str, ctrl: bool, shift: bool, description: &'static str) -> Self {
        Self {
            key,
            ctrl,
            shift,
            description,
        }
    }

    /// Display form, e.g. "Ctrl+Shift+Z".
    pub fn format(&self) -> String {
        let mut parts = Vec::new();
        if self.ctrl {
            parts.push("Ctrl");
        }
        if self.shift {
            parts.push("Shift");
        }
        parts.push(self.key);
        parts.join("+")
    }
}

/// Registry of all keyboard shortcuts.
pub struct ShortcutRegistry;

impl ShortcutRegistry {
    pub fn all() -> Vec<Shortcut> {
        vec![
            Shortcut::new("B", false, false, "Brush"),
            Shortcut::new("P", false, false, "Brush"),
            Shortcut::new("E", false, false, "Eraser"),
            Shortcut::new("]", false, false, "Increase brush width"),
            Shortcut::new("[", false, false, "Decrease brush width"),
            Shortcut::new("Z", true, false, "Undo your last stroke"),
            Shortcut::new("Z", true, true, "Redo"),
            Shortcut::new("Y", true, false, "Redo"),
            Shortcut::new("=", true, false, "Zoom in"),
            Shortcut::new("-", true, false, "Zoom out"),
            Shortcut::new("0", true, false, "Reset view"),
            Shortcut::new("Escape", false, false, "Cancel current stroke"),
            Shortcut::new("Space+Drag", false, false, "Pan the canvas"),
        ]
    }
}
