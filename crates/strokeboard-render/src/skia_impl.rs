//! tiny-skia based CPU renderer.

use kurbo::{Point, Size};
use peniko::Color;
use strokeboard_core::engine::EngineState;
use strokeboard_core::presence::CursorMarker;
use strokeboard_core::stroke::{SerializableColor, Stroke, ToolKind};
use tiny_skia::{BlendMode, FillRule, LineCap, LineJoin, Paint, PathBuilder, Pixmap, PixmapPaint, Transform};

use crate::renderer::{FrameStats, RenderContext, RenderResult, Renderer, RendererError};

/// Colour of an eraser stroke while it is still being drawn.
const ERASE_PREVIEW: SerializableColor = SerializableColor {
    r: 0x80,
    g: 0x80,
    b: 0x80,
    a: 0x60,
};

/// Everything the settled surface depends on. The surface is replayed
/// only when this changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SettledKey {
    strokes_revision: u64,
    layers_revision: u64,
    zoom: u64,
    pan_x: u64,
    pan_y: u64,
    width: u32,
    height: u32,
    background: [u8; 4],
}

impl SettledKey {
    fn new(ctx: &RenderContext, width: u32, height: u32) -> Self {
        let camera = &ctx.state.camera;
        let bg = SerializableColor::from(ctx.background);
        Self {
            strokes_revision: ctx.state.strokes_revision,
            layers_revision: ctx.state.layers_revision,
            zoom: camera.zoom.to_bits(),
            pan_x: camera.pan.x.to_bits(),
            pan_y: camera.pan.y.to_bits(),
            width,
            height,
            background: [bg.r, bg.g, bg.b, bg.a],
        }
    }
}

struct Surfaces {
    settled: Pixmap,
    live: Pixmap,
    overlay: Pixmap,
    /// One layer at a time, so erasing never reaches other layers.
    scratch: Pixmap,
}

impl Surfaces {
    fn new(width: u32, height: u32) -> RenderResult<Self> {
        let pixmap = || {
            Pixmap::new(width, height)
                .ok_or_else(|| RendererError::Surface(format!("cannot allocate {}x{} surface", width, height)))
        };
        Ok(Self {
            settled: pixmap()?,
            live: pixmap()?,
            overlay: pixmap()?,
            scratch: pixmap()?,
        })
    }

    fn matches(&self, width: u32, height: u32) -> bool {
        self.settled.width() == width && self.settled.height() == height
    }
}

/// CPU renderer keeping settled, live and overlay surfaces.
#[derive(Default)]
pub struct SkiaRenderer {
    surfaces: Option<Surfaces>,
    settled_key: Option<SettledKey>,
}

fn surface_size(size: Size) -> RenderResult<(u32, u32)> {
    if !size.width.is_finite() || !size.height.is_finite() || size.width < 1.0 || size.height < 1.0 {
        return Err(RendererError::Surface(format!(
            "invalid viewport {}x{}",
            size.width, size.height
        )));
    }
    Ok((size.width.ceil() as u32, size.height.ceil() as u32))
}

fn skia_color(color: SerializableColor) -> tiny_skia::Color {
    tiny_skia::Color::from_rgba8(color.r, color.g, color.b, color.a)
}

fn camera_transform(state: &EngineState) -> Transform {
    let camera = &state.camera;
    let zoom = camera.zoom as f32;
    Transform::from_row(zoom, 0.0, 0.0, zoom, camera.pan.x as f32, camera.pan.y as f32)
}

/// Draw one stroke with round caps and joins. A single point becomes a
/// disc of radius `width / 2`. Returns false if the geometry was empty.
fn draw_stroke(
    pixmap: &mut Pixmap,
    stroke: &Stroke,
    color: SerializableColor,
    blend_mode: BlendMode,
    transform: Transform,
) -> bool {
    let mut paint = Paint::default();
    paint.anti_alias = true;
    paint.blend_mode = blend_mode;
    paint.set_color(skia_color(color));

    if stroke.is_dot() {
        let center = stroke.points[0];
        let Some(path) = PathBuilder::from_circle(center.x as f32, center.y as f32, (stroke.width / 2.0) as f32)
        else {
            return false;
        };
        pixmap.fill_path(&path, &paint, FillRule::Winding, transform, None);
        return true;
    }

    let mut builder = PathBuilder::new();
    let mut points = stroke.points.iter();
    let Some(first) = points.next() else {
        return false;
    };
    builder.move_to(first.x as f32, first.y as f32);
    for point in points {
        builder.line_to(point.x as f32, point.y as f32);
    }
    let Some(path) = builder.finish() else {
        return false;
    };
    let style = tiny_skia::Stroke {
        width: stroke.width as f32,
        line_cap: LineCap::Round,
        line_join: LineJoin::Round,
        ..Default::default()
    };
    pixmap.stroke_path(&path, &paint, &style, transform, None);
    true
}

/// Cursor arrow with its tip at `position`, plus a swatch of the
/// participant's brush.
fn draw_marker(pixmap: &mut Pixmap, marker: &CursorMarker) -> bool {
    let Point { x, y } = marker.position;
    let (x, y) = (x as f32, y as f32);

    let mut builder = PathBuilder::new();
    builder.move_to(x, y);
    builder.line_to(x, y + 18.0);
    builder.line_to(x + 14.0, y + 14.0);
    builder.close();
    let Some(arrow) = builder.finish() else {
        return false;
    };

    let mut paint = Paint::default();
    paint.anti_alias = true;
    paint.set_color(skia_color(marker.color));
    pixmap.fill_path(&arrow, &paint, FillRule::Winding, Transform::identity(), None);

    // White outline keeps the arrow visible on any stroke colour.
    paint.set_color(tiny_skia::Color::WHITE);
    let outline = tiny_skia::Stroke {
        width: 1.5,
        ..Default::default()
    };
    pixmap.stroke_path(&arrow, &paint, &outline, Transform::identity(), None);

    if let Some(swatch) = PathBuilder::from_circle(x + 18.0, y + 22.0, 4.0) {
        if marker.tool == ToolKind::Erase {
            paint.set_color(skia_color(marker.color));
            pixmap.stroke_path(&swatch, &paint, &outline, Transform::identity(), None);
        } else {
            paint.set_color(skia_color(marker.brush_color));
            pixmap.fill_path(&swatch, &paint, FillRule::Winding, Transform::identity(), None);
        }
    }
    true
}

impl SkiaRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed strokes over the background, from the last frame.
    pub fn settled(&self) -> Option<&Pixmap> {
        self.surfaces.as_ref().map(|s| &s.settled)
    }

    /// The in-flight stroke only, on a transparent surface.
    pub fn live(&self) -> Option<&Pixmap> {
        self.surfaces.as_ref().map(|s| &s.live)
    }

    /// Remote cursor markers on a transparent surface.
    pub fn overlay(&self) -> Option<&Pixmap> {
        self.surfaces.as_ref().map(|s| &s.overlay)
    }

    /// Force the next frame to replay the settled surface.
    pub fn invalidate(&mut self) {
        self.settled_key = None;
    }

    /// Settled and live surfaces composited and encoded as PNG.
    pub fn export_png(&self) -> RenderResult<Vec<u8>> {
        let surfaces = self
            .surfaces
            .as_ref()
            .ok_or_else(|| RendererError::Surface("no frame rendered yet".to_string()))?;
        let mut image = surfaces.settled.clone();
        image.draw_pixmap(
            0,
            0,
            surfaces.live.as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            None,
        );
        image
            .encode_png()
            .map_err(|e| RendererError::RenderFailed(format!("PNG encoding failed: {}", e)))
    }

    fn render_settled(surfaces: &mut Surfaces, state: &EngineState, background: Color) -> usize {
        surfaces.settled.fill(skia_color(SerializableColor::from(background)));
        let transform = camera_transform(state);
        let by_layer = state.strokes_by_layer();
        let mut drawn = 0;

        for layer in state.sorted_layers() {
            if !layer.visible {
                continue;
            }
            let Some(strokes) = by_layer.get(layer.id.as_str()) else {
                continue;
            };
            surfaces.scratch.fill(tiny_skia::Color::TRANSPARENT);
            for stroke in strokes {
                let blend_mode = match stroke.tool {
                    ToolKind::Draw => BlendMode::SourceOver,
                    ToolKind::Erase => BlendMode::DestinationOut,
                };
                if draw_stroke(&mut surfaces.scratch, stroke, stroke.color, blend_mode, transform) {
                    drawn += 1;
                }
            }
            surfaces.settled.draw_pixmap(
                0,
                0,
                surfaces.scratch.as_ref(),
                &PixmapPaint::default(),
                Transform::identity(),
                None,
            );
        }
        drawn
    }
}

impl Renderer for SkiaRenderer {
    fn render_frame(&mut self, ctx: &RenderContext) -> RenderResult<FrameStats> {
        let (width, height) = surface_size(ctx.viewport_size)?;
        if !self.surfaces.as_ref().is_some_and(|s| s.matches(width, height)) {
            log::debug!("Allocating {}x{} surfaces", width, height);
            self.surfaces = Some(Surfaces::new(width, height)?);
            self.settled_key = None;
        }
        let Some(surfaces) = self.surfaces.as_mut() else {
            return Err(RendererError::Surface("surfaces missing".to_string()));
        };

        let mut stats = FrameStats::default();

        let key = SettledKey::new(ctx, width, height);
        if self.settled_key != Some(key) {
            stats.settled_strokes_drawn = Self::render_settled(surfaces, ctx.state, ctx.background);
            stats.settled_replayed = true;
            self.settled_key = Some(key);
        }

        surfaces.live.fill(tiny_skia::Color::TRANSPARENT);
        if let Some(stroke) = ctx.in_flight {
            let color = match stroke.tool {
                ToolKind::Draw => stroke.color,
                ToolKind::Erase => ERASE_PREVIEW,
            };
            stats.live_drawn = draw_stroke(
                &mut surfaces.live,
                stroke,
                color,
                BlendMode::SourceOver,
                camera_transform(ctx.state),
            );
        }

        surfaces.overlay.fill(tiny_skia::Color::TRANSPARENT);
        for marker in ctx.markers {
            if draw_marker(&mut surfaces.overlay, marker) {
                stats.markers_drawn += 1;
            }
        }

        Ok(stats)
    }
}
