use cosmic_text::{Attrs, Buffer, Family, FontSystem, Metrics, Shaping, SwashCache};
use resvg::tiny_skia::Pixmap;

use crate::color::Color;
use crate::geom::Rect;
use crate::raster::{Canvas, DrawState};
use crate::tree::Scene;

use super::bitmap::premultiply;
use super::Content;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextAlign {
    #[default]
    Left,
    Start,
    Center,
    End,
    Right,
}

impl TextAlign {
    /// Fraction of the line width the text is shifted left by.
    pub fn offset(self) -> f64 {
        match self {
            TextAlign::Left | TextAlign::Start => 0.0,
            TextAlign::Center => -0.5,
            TextAlign::End | TextAlign::Right => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextBaseline {
    #[default]
    Top,
    Hanging,
    Middle,
    Alphabetic,
    Ideographic,
    Bottom,
}

impl TextBaseline {
    /// Fraction of the line height the text is shifted up by.
    pub fn offset(self) -> f64 {
        match self {
            TextBaseline::Top => 0.0,
            TextBaseline::Hanging => -0.01,
            TextBaseline::Middle => -0.4,
            TextBaseline::Alphabetic => -0.8,
            TextBaseline::Ideographic => -0.85,
            TextBaseline::Bottom => -1.0,
        }
    }
}

/// Font database and glyph cache shared by every text node in a scene.
///
/// Created on first use; replace it with [`Scene::set_text_context`] to
/// load custom fonts.
pub struct TextContext {
    font_system: FontSystem,
    swash_cache: SwashCache,
}

impl TextContext {
    pub fn new() -> Self {
        Self::with_font_system(FontSystem::new())
    }

    pub fn with_font_system(font_system: FontSystem) -> Self {
        Self {
            font_system,
            swash_cache: SwashCache::new(),
        }
    }

    pub fn font_system_mut(&mut self) -> &mut FontSystem {
        &mut self.font_system
    }

    fn layout(&mut self, text: &Text, content: &str) -> Buffer {
        let line_height = text.line_height.unwrap_or(text.font_size * 1.2);
        let metrics = Metrics::new(text.font_size, line_height);
        let mut buffer = Buffer::new(&mut self.font_system, metrics);

        buffer.set_size(&mut self.font_system, text.line_width, None);
        let attrs = match text.family.as_deref() {
            Some(name) => Attrs::new().family(Family::Name(name)),
            None => Attrs::new().family(Family::SansSerif),
        };
        buffer.set_text(&mut self.font_system, content, &attrs, Shaping::Advanced, None);
        buffer.shape_until_scroll(&mut self.font_system, true);
        buffer
    }

    /// Width and height of the laid out text block.
    pub fn measure(&mut self, text: &Text) -> (f32, f32) {
        let buffer = self.layout(text, &text.text);
        let mut width = 0.0f32;
        let mut height = 0.0f32;
        for run in buffer.layout_runs() {
            width = width.max(run.line_w);
            height += run.line_height;
        }
        (width, height)
    }

    /// Approximate line height: the width of an "M" scaled by 1.2.
    pub fn measured_line_height(&mut self, text: &Text) -> f32 {
        let buffer = self.layout(text, "M");
        let width = buffer
            .layout_runs()
            .map(|run| run.line_w)
            .fold(0.0f32, f32::max);
        width * 1.2
    }

    /// Renders the text block into a premultiplied pixmap sized to fit.
    pub fn rasterize(&mut self, text: &Text) -> Option<Pixmap> {
        let (width, height) = self.measure(text);
        let (w, h) = (width.ceil() as u32, height.ceil() as u32);
        if w == 0 || h == 0 {
            return None;
        }

        let buffer = self.layout(text, &text.text);
        let mut rgba = vec![0u8; (w * h * 4) as usize];
        let c = text.color;
        let color = cosmic_text::Color::rgba(
            (c.r * 255.0) as u8,
            (c.g * 255.0) as u8,
            (c.b * 255.0) as u8,
            (c.a * 255.0) as u8,
        );

        buffer.draw(
            &mut self.font_system,
            &mut self.swash_cache,
            color,
            |x, y, gw, gh, color| {
                for py in y.max(0)..(y + gh as i32).min(h as i32) {
                    for px in x.max(0)..(x + gw as i32).min(w as i32) {
                        let i = ((py as u32 * w + px as u32) * 4) as usize;
                        blend_over(&mut rgba[i..i + 4], color);
                    }
                }
            },
        );

        premultiply(&mut rgba);
        Pixmap::from_vec(rgba, resvg::tiny_skia::IntSize::from_wh(w, h)?)
    }
}

impl Default for TextContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TextContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextContext").finish_non_exhaustive()
    }
}

fn blend_over(dst: &mut [u8], src: cosmic_text::Color) {
    let sa = src.a() as u32;
    if sa == 0 {
        return;
    }
    let da = dst[3] as u32;
    let out_a = sa + da * (255 - sa) / 255;
    if out_a == 0 {
        return;
    }
    for (d, s) in dst[..3].iter_mut().zip([src.r(), src.g(), src.b()]) {
        let v = (s as u32 * sa + *d as u32 * da * (255 - sa) / 255) / out_a;
        *d = v.min(255) as u8;
    }
    dst[3] = out_a as u8;
}

/// A single- or multi-line text leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct Text {
    pub text: String,
    pub font_size: f32,
    /// Font family name; sans-serif when unset.
    pub family: Option<String>,
    pub color: Color,
    pub align: TextAlign,
    pub baseline: TextBaseline,
    /// Distance between lines; `1.2 * font_size` when unset.
    pub line_height: Option<f32>,
    /// Wrapping width.
    pub line_width: Option<f32>,
    /// Clamps the reported width.
    pub max_width: Option<f32>,
}

impl Text {
    pub fn new(text: impl Into<String>, font_size: f32, color: Color) -> Self {
        Self {
            text: text.into(),
            font_size,
            family: None,
            color,
            align: TextAlign::default(),
            baseline: TextBaseline::default(),
            line_height: None,
            line_width: None,
            max_width: None,
        }
    }

    pub fn with_align(mut self, align: TextAlign) -> Self {
        self.align = align;
        self
    }

    pub fn with_baseline(mut self, baseline: TextBaseline) -> Self {
        self.baseline = baseline;
        self
    }

    /// Places a measured block relative to the node origin.
    pub(crate) fn place(&self, width: f64, height: f64, line_height: f64) -> Rect {
        let w = match self.max_width {
            Some(max) if (max as f64) < width => max as f64,
            _ => width,
        };
        Rect::new(
            w * self.align.offset(),
            line_height * self.baseline.offset(),
            w,
            height,
        )
    }

    fn line_height_for(&self, ctx: &mut TextContext) -> f64 {
        match self.line_height {
            Some(lh) => lh as f64,
            None => ctx.measured_line_height(self) as f64,
        }
    }
}

impl Content for Text {
    fn has_content(&self, _scene: &Scene) -> bool {
        !self.text.is_empty()
    }

    fn bounds(&self, scene: &Scene) -> Option<Rect> {
        scene.with_text_context(|ctx| {
            let (w, h) = ctx.measure(self);
            let lh = self.line_height_for(ctx);
            Some(self.place(w as f64, h as f64, lh))
        })
    }

    fn draw(&self, scene: &Scene, canvas: &mut Canvas, state: &DrawState) -> bool {
        let rendered = scene.with_text_context(|ctx| {
            let pixmap = ctx.rasterize(self)?;
            let lh = self.line_height_for(ctx);
            Some((pixmap, lh))
        });
        let Some((pixmap, lh)) = rendered else {
            return true;
        };

        let (w, h) = (pixmap.width() as f64, pixmap.height() as f64);
        let mut dst = self.place(w, h, lh);
        dst.width = w;
        let src = Rect::new(0.0, 0.0, w, h);
        canvas.draw_pixmap(pixmap.as_ref(), src, dst, state);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_place_applies_align_and_baseline() {
        let t = Text::new("hi", 10.0, Color::BLACK)
            .with_align(TextAlign::Center)
            .with_baseline(TextBaseline::Bottom);
        assert_eq!(t.place(40.0, 12.0, 12.0), Rect::new(-20.0, -12.0, 40.0, 12.0));
    }

    #[test]
    fn test_max_width_clamps_reported_width() {
        let mut t = Text::new("hello", 10.0, Color::BLACK).with_align(TextAlign::Right);
        t.max_width = Some(30.0);
        assert_eq!(t.place(50.0, 12.0, 12.0), Rect::new(-30.0, 0.0, 30.0, 12.0));
    }

    #[test]
    fn test_blend_over_accumulates_coverage() {
        let mut px = [0u8; 4];
        blend_over(&mut px, cosmic_text::Color::rgba(255, 0, 0, 128));
        assert_eq!(px[0], 255);
        assert_eq!(px[3], 128);
        blend_over(&mut px, cosmic_text::Color::rgba(255, 0, 0, 255));
        assert_eq!(px[3], 255);
    }
}
