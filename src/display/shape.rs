//! Vector paths.
//!
//! [`Graphics`] is a retained command list. Commands are grouped into
//! segments: changing the fill or the stroke closes the current segment and
//! starts a new path, the same way a canvas context needs a fresh
//! `beginPath` when the style changes.

use resvg::tiny_skia::{self, LineCap, LineJoin, Path, PathBuilder};

use crate::color::Color;
use crate::geom::Rect;
use crate::raster::{Canvas, DrawState};
use crate::tree::Scene;

use super::Content;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrokeStyle {
    pub width: f32,
    pub cap: LineCap,
    pub join: LineJoin,
    pub miter_limit: f32,
}

impl Default for StrokeStyle {
    fn default() -> Self {
        Self {
            width: 1.0,
            cap: LineCap::Butt,
            join: LineJoin::Miter,
            miter_limit: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Fill(Option<Color>),
    Stroke(Option<Color>),
    StrokeStyle(StrokeStyle),
    MoveTo(f32, f32),
    LineTo(f32, f32),
    QuadTo(f32, f32, f32, f32),
    CubicTo(f32, f32, f32, f32, f32, f32),
    Rect(f32, f32, f32, f32),
    RoundRect(f32, f32, f32, f32, f32),
    Circle(f32, f32, f32),
    Ellipse(f32, f32, f32, f32),
    Close,
}

/// A path with the fill and stroke it is painted with.
#[derive(Debug, Clone)]
pub(crate) struct Segment {
    pub path: Path,
    pub fill: Option<Color>,
    pub stroke: Option<(Color, StrokeStyle)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graphics {
    commands: Vec<Command>,
}

impl Graphics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn clear(&mut self) -> &mut Self {
        self.commands.clear();
        self
    }

    pub fn append(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    pub fn begin_fill(&mut self, color: Color) -> &mut Self {
        self.append(Command::Fill(Some(color)))
    }

    pub fn end_fill(&mut self) -> &mut Self {
        self.append(Command::Fill(None))
    }

    pub fn begin_stroke(&mut self, color: Color) -> &mut Self {
        self.append(Command::Stroke(Some(color)))
    }

    pub fn end_stroke(&mut self) -> &mut Self {
        self.append(Command::Stroke(None))
    }

    pub fn set_stroke_style(&mut self, width: f32) -> &mut Self {
        self.append(Command::StrokeStyle(StrokeStyle {
            width,
            ..StrokeStyle::default()
        }))
    }

    pub fn move_to(&mut self, x: f32, y: f32) -> &mut Self {
        self.append(Command::MoveTo(x, y))
    }

    pub fn line_to(&mut self, x: f32, y: f32) -> &mut Self {
        self.append(Command::LineTo(x, y))
    }

    pub fn quadratic_curve_to(&mut self, cpx: f32, cpy: f32, x: f32, y: f32) -> &mut Self {
        self.append(Command::QuadTo(cpx, cpy, x, y))
    }

    pub fn bezier_curve_to(
        &mut self,
        cp1x: f32,
        cp1y: f32,
        cp2x: f32,
        cp2y: f32,
        x: f32,
        y: f32,
    ) -> &mut Self {
        self.append(Command::CubicTo(cp1x, cp1y, cp2x, cp2y, x, y))
    }

    pub fn rect(&mut self, x: f32, y: f32, w: f32, h: f32) -> &mut Self {
        self.append(Command::Rect(x, y, w, h))
    }

    pub fn round_rect(&mut self, x: f32, y: f32, w: f32, h: f32, radius: f32) -> &mut Self {
        self.append(Command::RoundRect(x, y, w, h, radius))
    }

    pub fn circle(&mut self, x: f32, y: f32, radius: f32) -> &mut Self {
        self.append(Command::Circle(x, y, radius))
    }

    /// Ellipse inscribed in the given box.
    pub fn ellipse(&mut self, x: f32, y: f32, w: f32, h: f32) -> &mut Self {
        self.append(Command::Ellipse(x, y, w, h))
    }

    pub fn close_path(&mut self) -> &mut Self {
        self.append(Command::Close)
    }

    /// Builder shorthand for a filled rectangle.
    pub fn filled_rect(color: Color, x: f32, y: f32, w: f32, h: f32) -> Self {
        let mut g = Self::new();
        g.begin_fill(color).rect(x, y, w, h);
        g
    }

    /// Builder shorthand for a filled circle.
    pub fn filled_circle(color: Color, x: f32, y: f32, radius: f32) -> Self {
        let mut g = Self::new();
        g.begin_fill(color).circle(x, y, radius);
        g
    }

    /// Splits the commands into styled segments.
    pub(crate) fn segments(&self) -> Vec<Segment> {
        let mut out = Vec::new();
        let mut fill = None;
        let mut stroke = None;
        let mut style = StrokeStyle::default();
        let mut pb = PathBuilder::new();

        for cmd in &self.commands {
            match cmd {
                Command::Fill(c) => {
                    commit(&mut out, &mut pb, fill, stroke.map(|s| (s, style)));
                    fill = *c;
                }
                Command::Stroke(c) => {
                    commit(&mut out, &mut pb, fill, stroke.map(|s| (s, style)));
                    stroke = *c;
                }
                Command::StrokeStyle(s) => {
                    commit(&mut out, &mut pb, fill, stroke.map(|c| (c, style)));
                    style = *s;
                }
                geometry => push_geometry(&mut pb, geometry),
            }
        }
        commit(&mut out, &mut pb, fill, stroke.map(|s| (s, style)));
        out
    }

    /// All geometry as one path, ignoring styles. Used for clipping and
    /// mask hit tests.
    pub(crate) fn as_path(&self) -> Option<Path> {
        let mut pb = PathBuilder::new();
        for cmd in &self.commands {
            push_geometry(&mut pb, cmd);
        }
        pb.finish()
    }

    /// Bounds of the painted geometry, including half the stroke width.
    pub fn bounds(&self) -> Option<Rect> {
        let mut out: Option<Rect> = None;
        for seg in self.segments() {
            if seg.fill.is_none() && seg.stroke.is_none() {
                continue;
            }
            let b = seg.path.bounds();
            let mut r = Rect::new(
                b.left() as f64,
                b.top() as f64,
                b.width() as f64,
                b.height() as f64,
            );
            if let Some((_, style)) = seg.stroke {
                let half = style.width as f64 / 2.0;
                r.pad(half, half, half, half);
            }
            match out.as_mut() {
                Some(o) => {
                    o.extend(r.x, r.y, r.width, r.height);
                }
                None => out = Some(r),
            }
        }
        out
    }
}

fn commit(
    out: &mut Vec<Segment>,
    pb: &mut PathBuilder,
    fill: Option<Color>,
    stroke: Option<(Color, StrokeStyle)>,
) {
    let finished = std::mem::replace(pb, PathBuilder::new()).finish();
    if let Some(path) = finished {
        out.push(Segment { path, fill, stroke });
    }
}

fn push_geometry(pb: &mut PathBuilder, cmd: &Command) {
    match *cmd {
        Command::MoveTo(x, y) => pb.move_to(x, y),
        Command::LineTo(x, y) => pb.line_to(x, y),
        Command::QuadTo(cx, cy, x, y) => pb.quad_to(cx, cy, x, y),
        Command::CubicTo(c1x, c1y, c2x, c2y, x, y) => pb.cubic_to(c1x, c1y, c2x, c2y, x, y),
        Command::Rect(x, y, w, h) => {
            if let Some(r) = tiny_skia::Rect::from_xywh(x, y, w, h) {
                pb.push_rect(r);
            }
        }
        Command::RoundRect(x, y, w, h, radius) => push_round_rect(pb, x, y, w, h, radius),
        Command::Circle(x, y, r) => pb.push_circle(x, y, r),
        Command::Ellipse(x, y, w, h) => {
            if let Some(r) = tiny_skia::Rect::from_xywh(x, y, w, h) {
                pb.push_oval(r);
            }
        }
        Command::Close => pb.close(),
        Command::Fill(_) | Command::Stroke(_) | Command::StrokeStyle(_) => {}
    }
}

fn push_round_rect(pb: &mut PathBuilder, x: f32, y: f32, w: f32, h: f32, radius: f32) {
    let r = radius.min(w.abs() / 2.0).min(h.abs() / 2.0).max(0.0);
    // Cubic approximation of a quarter circle.
    let k = r * 0.552_284_8;
    let (x2, y2) = (x + w, y + h);
    pb.move_to(x + r, y);
    pb.line_to(x2 - r, y);
    pb.cubic_to(x2 - r + k, y, x2, y + r - k, x2, y + r);
    pb.line_to(x2, y2 - r);
    pb.cubic_to(x2, y2 - r + k, x2 - r + k, y2, x2 - r, y2);
    pb.line_to(x + r, y2);
    pb.cubic_to(x + r - k, y2, x, y2 - r + k, x, y2 - r);
    pb.line_to(x, y + r);
    pb.cubic_to(x, y + r - k, x + r - k, y, x + r, y);
    pb.close();
}

/// Leaf that draws a [`Graphics`] list. Also the only node kind usable as a
/// mask.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Shape {
    pub graphics: Graphics,
}

impl Shape {
    pub fn new(graphics: Graphics) -> Self {
        Self { graphics }
    }
}

impl Content for Shape {
    fn has_content(&self, _scene: &Scene) -> bool {
        !self.graphics.is_empty()
    }

    fn bounds(&self, _scene: &Scene) -> Option<Rect> {
        self.graphics.bounds()
    }

    fn draw(&self, _scene: &Scene, canvas: &mut Canvas, state: &DrawState) -> bool {
        for seg in self.graphics.segments() {
            if let Some(color) = seg.fill {
                canvas.fill_path(&seg.path, color, state);
            }
            if let Some((color, style)) = seg.stroke {
                canvas.stroke_path(&seg.path, color, &style, state);
            }
        }
        true
    }
}
