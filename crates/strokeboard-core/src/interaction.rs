//! Canvas pointer routing: turns raw pointer events into engine calls.

use kurbo::{Point, Vec2};
use serde::{Deserialize, Serialize};

use crate::camera::ZoomDirection;
use crate::engine::DrawingEngine;
use crate::stroke::Stroke;

/// Mouse button identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Modifier keys state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
    pub meta: bool,
}

impl Modifiers {
    /// Ctrl on most platforms, Cmd on macOS.
    pub fn command(&self) -> bool {
        self.ctrl || self.meta
    }
}

/// Pointer event in client (screen) coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PointerEvent {
    Down { position: Point, button: MouseButton },
    Up { position: Point, button: MouseButton },
    Move { position: Point },
    Scroll { position: Point, delta: Vec2 },
    /// Pointer left the drawing container.
    Leave,
    /// The platform cancelled the gesture (touch interrupted, focus lost).
    Cancel,
}

#[derive(Debug, Clone, Copy)]
struct PanDrag {
    button: MouseButton,
    last: Point,
}

/// Routes pointer input to the engine.
///
/// Primary-button gestures draw; middle-button gestures (or primary with
/// the pan modifier held) pan; wheel notches zoom by one step.
#[derive(Debug, Clone, Default)]
pub struct CanvasInteraction {
    /// Top-left of the drawing container in client coordinates.
    origin: Point,
    pan_modifier: bool,
    drag: Option<PanDrag>,
    /// Last pointer position in canvas space, `None` once the pointer left.
    cursor: Option<Point>,
}

impl CanvasInteraction {
    pub fn new(origin: Point) -> Self {
        Self {
            origin,
            ..Self::default()
        }
    }

    pub fn set_origin(&mut self, origin: Point) {
        self.origin = origin;
    }

    pub fn origin(&self) -> Point {
        self.origin
    }

    /// Hold or release the pan modifier (typically Space).
    pub fn set_pan_modifier(&mut self, held: bool) {
        self.pan_modifier = held;
    }

    pub fn is_panning(&self) -> bool {
        self.drag.is_some()
    }

    /// Last known cursor in canvas space.
    pub fn cursor(&self) -> Option<Point> {
        self.cursor
    }

    fn to_canvas(&self, engine: &DrawingEngine, position: Point) -> Point {
        engine.state().camera.screen_to_canvas(position, self.origin)
    }

    /// Feed one pointer event. Returns the stroke committed by this event, if any.
    pub fn handle(
        &mut self,
        engine: &mut DrawingEngine,
        event: PointerEvent,
        author_id: &str,
        author_name: &str,
    ) -> Option<Stroke> {
        match event {
            PointerEvent::Down { position, button } => {
                let pans = button == MouseButton::Middle
                    || (button == MouseButton::Left && self.pan_modifier);
                if pans {
                    self.drag = Some(PanDrag {
                        button,
                        last: position,
                    });
                } else if button == MouseButton::Left && self.drag.is_none() {
                    let point = self.to_canvas(engine, position);
                    engine.pointer_down(point, author_id, author_name);
                }
                self.cursor = Some(self.to_canvas(engine, position));
                None
            }
            PointerEvent::Move { position } => {
                if let Some(drag) = &mut self.drag {
                    let delta = position - drag.last;
                    drag.last = position;
                    engine.pan_by(delta);
                } else if engine.is_drawing() {
                    let point = self.to_canvas(engine, position);
                    engine.pointer_move(point);
                }
                self.cursor = Some(self.to_canvas(engine, position));
                None
            }
            PointerEvent::Up { position, button } => {
                self.cursor = Some(self.to_canvas(engine, position));
                if self.drag.is_some_and(|d| d.button == button) {
                    self.drag = None;
                    return None;
                }
                if button == MouseButton::Left {
                    return engine.pointer_up();
                }
                None
            }
            PointerEvent::Scroll { position, delta } => {
                if delta.y < 0.0 {
                    engine.zoom_by_step(ZoomDirection::In);
                } else if delta.y > 0.0 {
                    engine.zoom_by_step(ZoomDirection::Out);
                }
                self.cursor = Some(self.to_canvas(engine, position));
                None
            }
            PointerEvent::Leave => {
                self.cursor = None;
                None
            }
            PointerEvent::Cancel => {
                self.drag = None;
                engine.cancel_stroke();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn down(x: f64, y: f64, button: MouseButton) -> PointerEvent {
        PointerEvent::Down {
            position: Point::new(x, y),
            button,
        }
    }

    fn up(x: f64, y: f64, button: MouseButton) -> PointerEvent {
        PointerEvent::Up {
            position: Point::new(x, y),
            button,
        }
    }

    fn mv(x: f64, y: f64) -> PointerEvent {
        PointerEvent::Move {
            position: Point::new(x, y),
        }
    }

    #[test]
    fn test_left_drag_draws_in_canvas_space() {
        let mut engine = DrawingEngine::new();
        engine.set_zoom(2.0);
        let mut input = CanvasInteraction::new(Point::new(10.0, 20.0));

        input.handle(&mut engine, down(10.0, 20.0, MouseButton::Left), "x", "X");
        input.handle(&mut engine, mv(30.0, 40.0), "x", "X");
        let stroke = input
            .handle(&mut engine, up(30.0, 40.0, MouseButton::Left), "x", "X")
            .unwrap();

        assert_eq!(stroke.points, vec![Point::new(0.0, 0.0), Point::new(10.0, 10.0)]);
        assert_eq!(engine.state().strokes.len(), 1);
    }

    #[test]
    fn test_middle_drag_pans() {
        let mut engine = DrawingEngine::new();
        let mut input = CanvasInteraction::new(Point::ZERO);

        input.handle(&mut engine, down(100.0, 100.0, MouseButton::Middle), "x", "X");
        assert!(input.is_panning());
        input.handle(&mut engine, mv(110.0, 90.0), "x", "X");
        input.handle(&mut engine, mv(130.0, 95.0), "x", "X");
        input.handle(&mut engine, up(130.0, 95.0, MouseButton::Middle), "x", "X");

        assert_eq!(engine.state().camera.pan, Vec2::new(30.0, -5.0));
        assert!(engine.state().strokes.is_empty());
        assert!(!input.is_panning());
    }

    #[test]
    fn test_pan_modifier_turns_primary_into_pan() {
        let mut engine = DrawingEngine::new();
        let mut input = CanvasInteraction::new(Point::ZERO);
        input.set_pan_modifier(true);

        input.handle(&mut engine, down(0.0, 0.0, MouseButton::Left), "x", "X");
        input.handle(&mut engine, mv(5.0, 5.0), "x", "X");
        assert!(input.handle(&mut engine, up(5.0, 5.0, MouseButton::Left), "x", "X").is_none());
        assert!(!engine.is_drawing());
        assert_eq!(engine.state().camera.pan, Vec2::new(5.0, 5.0));
    }

    #[test]
    fn test_wheel_zooms_by_step() {
        let mut engine = DrawingEngine::new();
        let mut input = CanvasInteraction::new(Point::ZERO);
        input.handle(
            &mut engine,
            PointerEvent::Scroll {
                position: Point::ZERO,
                delta: Vec2::new(0.0, -1.0),
            },
            "x",
            "X",
        );
        assert!((engine.state().camera.zoom - 1.1).abs() < 1e-9);
    }

    #[test]
    fn test_leave_clears_cursor_and_cancel_discards() {
        let mut engine = DrawingEngine::new();
        let mut input = CanvasInteraction::new(Point::ZERO);
        input.handle(&mut engine, down(1.0, 1.0, MouseButton::Left), "x", "X");
        assert_eq!(input.cursor(), Some(Point::new(1.0, 1.0)));

        input.handle(&mut engine, PointerEvent::Leave, "x", "X");
        assert_eq!(input.cursor(), None);
        assert!(engine.is_drawing());

        input.handle(&mut engine, PointerEvent::Cancel, "x", "X");
        assert!(!engine.is_drawing());
        assert!(engine.state().strokes.is_empty());
    }
}
