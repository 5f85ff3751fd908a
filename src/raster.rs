//! Immediate-mode drawing into a [`Surface`].
//!
//! [`DrawState`] plays the role of a 2D context's save/restore stack: each
//! child gets a copy of its parent's state with its own transform, alpha,
//! blend mode, shadow and mask folded in. Drawing walks children in list
//! order so later siblings paint over earlier ones.

use std::rc::Rc;

use resvg::tiny_skia::{
    FillRule, FilterQuality, Mask, Paint, Path, Pattern, PixmapRef, SpreadMode, Stroke, Transform,
};

use crate::color::Color;
use crate::display::shape::StrokeStyle;
use crate::display::{BlendMode, ImageSource, NodeKind, Shadow};
use crate::filters::blur::blur_pixels;
use crate::geom::Rect;
use crate::surface::Surface;
use crate::transform::Transform2D;
use crate::tree::{NodeId, Scene};

/// Current drawing state, inherited from parent to child.
#[derive(Clone)]
pub struct DrawState {
    pub transform: Transform2D,
    pub alpha: f64,
    pub blend: BlendMode,
    pub shadow: Option<Shadow>,
    pub clip: Option<Rc<Mask>>,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            transform: Transform2D::IDENTITY,
            alpha: 1.0,
            blend: BlendMode::SourceOver,
            shadow: None,
            clip: None,
        }
    }
}

impl DrawState {
    pub fn with_transform(transform: Transform2D) -> Self {
        Self {
            transform,
            ..Self::default()
        }
    }

    fn paint_alpha(&self) -> f32 {
        self.alpha.clamp(0.0, 1.0) as f32
    }
}

impl std::fmt::Debug for DrawState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrawState")
            .field("transform", &self.transform)
            .field("alpha", &self.alpha)
            .field("blend", &self.blend)
            .field("shadow", &self.shadow)
            .field("clipped", &self.clip.is_some())
            .finish()
    }
}

/// Drawing operations over a borrowed surface.
pub struct Canvas<'a> {
    surface: &'a mut Surface,
}

impl<'a> Canvas<'a> {
    pub fn new(surface: &'a mut Surface) -> Self {
        Self { surface }
    }

    pub fn width(&self) -> u32 {
        self.surface.width()
    }

    pub fn height(&self) -> u32 {
        self.surface.height()
    }

    pub fn surface(&self) -> &Surface {
        self.surface
    }

    pub fn surface_mut(&mut self) -> &mut Surface {
        self.surface
    }

    /// Draws `src` of `pixmap` into the local rectangle `dst`.
    pub fn draw_pixmap(&mut self, pixmap: PixmapRef, src: Rect, dst: Rect, state: &DrawState) {
        if src.is_empty() || dst.is_empty() {
            return;
        }
        let Some(rect) = resvg::tiny_skia::Rect::from_xywh(
            dst.x as f32,
            dst.y as f32,
            dst.width as f32,
            dst.height as f32,
        ) else {
            return;
        };

        let sx = dst.width / src.width;
        let sy = dst.height / src.height;
        let pattern_ts = Transform::from_row(
            sx as f32,
            0.0,
            0.0,
            sy as f32,
            (dst.x - src.x * sx) as f32,
            (dst.y - src.y * sy) as f32,
        );
        let ts = state.transform.to_skia();
        let aligned = is_pixel_aligned(&ts.pre_concat(pattern_ts));
        let quality = if aligned {
            FilterQuality::Nearest
        } else {
            FilterQuality::Bilinear
        };

        let paint = Paint {
            shader: Pattern::new(pixmap, SpreadMode::Pad, quality, state.paint_alpha(), pattern_ts),
            blend_mode: state.blend.to_skia(),
            anti_alias: !aligned,
            ..Paint::default()
        };
        self.surface
            .pixmap_mut()
            .fill_rect(rect, &paint, ts, state.clip.as_deref());
    }

    /// Draws an image source, tainting the surface if the image is unclean.
    pub fn draw_image(&mut self, image: &ImageSource, src: Rect, dst: Rect, state: &DrawState) {
        let Some(pixmap) = image.pixmap() else {
            return;
        };
        if !image.origin_clean() {
            self.surface.taint();
        }
        self.draw_pixmap(pixmap.as_ref(), src, dst, state);
    }

    /// Draws a whole surface at the local rectangle `dst`, carrying over its
    /// taint.
    pub fn draw_surface(&mut self, surface: &Surface, dst: Rect, state: &DrawState) {
        if surface.is_tainted() {
            self.surface.taint();
        }
        let src = Rect::new(0.0, 0.0, surface.width() as f64, surface.height() as f64);
        self.draw_pixmap(surface.pixmap().as_ref(), src, dst, state);
    }

    pub fn fill_path(&mut self, path: &Path, color: Color, state: &DrawState) {
        let paint = self.solid_paint(color, state);
        self.surface.pixmap_mut().fill_path(
            path,
            &paint,
            FillRule::Winding,
            state.transform.to_skia(),
            state.clip.as_deref(),
        );
    }

    pub fn stroke_path(&mut self, path: &Path, color: Color, style: &StrokeStyle, state: &DrawState) {
        let paint = self.solid_paint(color, state);
        let stroke = Stroke {
            width: style.width,
            line_cap: style.cap,
            line_join: style.join,
            miter_limit: style.miter_limit,
            ..Stroke::default()
        };
        self.surface.pixmap_mut().stroke_path(
            path,
            &paint,
            &stroke,
            state.transform.to_skia(),
            state.clip.as_deref(),
        );
    }

    fn solid_paint(&self, color: Color, state: &DrawState) -> Paint<'static> {
        let mut paint = Paint::default();
        paint.set_color(color.with_alpha(color.a * state.paint_alpha()).to_skia());
        paint.blend_mode = state.blend.to_skia();
        paint.anti_alias = true;
        paint
    }

    /// Intersects the current clip with `path` placed by `transform`.
    pub fn clip(&self, current: Option<&Mask>, path: &Path, transform: &Transform2D) -> Option<Mask> {
        let ts = transform.to_skia();
        match current {
            Some(mask) => {
                let mut mask = mask.clone();
                mask.intersect_path(path, FillRule::Winding, true, ts);
                Some(mask)
            }
            None => {
                let mut mask = Mask::new(self.width(), self.height())?;
                mask.fill_path(path, FillRule::Winding, true, ts);
                Some(mask)
            }
        }
    }
}

pub(crate) fn is_pixel_aligned(ts: &Transform) -> bool {
    ts.sx == 1.0
        && ts.sy == 1.0
        && ts.kx == 0.0
        && ts.ky == 0.0
        && ts.tx.fract() == 0.0
        && ts.ty.fract() == 0.0
}

impl Scene {
    /// Draws the node's own output in the current state: its cache if it has
    /// one (unless `ignore_cache`), otherwise its children or content.
    pub(crate) fn draw_node(
        &self,
        id: NodeId,
        canvas: &mut Canvas,
        state: &DrawState,
        ignore_cache: bool,
    ) -> bool {
        let Some(node) = self.node(id) else {
            return false;
        };
        if !ignore_cache {
            if let Some(cache) = node.cache() {
                if cache.draw(canvas, state) {
                    return true;
                }
            }
        }
        match &node.kind {
            NodeKind::Container => {
                for &child in self.children(id) {
                    self.draw_child(child, canvas, state);
                }
                true
            }
            kind => kind
                .content()
                .is_some_and(|content| content.draw(self, canvas, state)),
        }
    }

    /// Draws a visible child with its own properties applied on top of the
    /// parent's state.
    pub(crate) fn draw_child(&self, id: NodeId, canvas: &mut Canvas, parent: &DrawState) {
        if !self.is_visible(id) {
            return;
        }
        self.draw_subtree(id, canvas, parent);
    }

    /// Like [`Scene::draw_child`] without the visibility check. Used for the
    /// root of a stage.
    pub(crate) fn draw_subtree(&self, id: NodeId, canvas: &mut Canvas, parent: &DrawState) {
        let Some(state) = self.child_state(id, canvas, parent) else {
            return;
        };
        if let Some(shadow) = state.shadow.filter(|s| s.color.a > 0.0) {
            self.draw_shadow(id, canvas, &state, &shadow);
        }
        self.draw_node(id, canvas, &state, false);
    }

    /// The parent's state with the node's mask, matrix, alpha, blend mode
    /// and shadow folded in. `None` when the mask clips everything away.
    pub(crate) fn child_state(
        &self,
        id: NodeId,
        canvas: &Canvas,
        parent: &DrawState,
    ) -> Option<DrawState> {
        let node = self.node(id)?;
        let mut state = parent.clone();

        if let Some(mask) = node.mask.and_then(|m| self.node(m)) {
            if let NodeKind::Shape(shape) = &mask.kind {
                if let Some(path) = shape.graphics.as_path() {
                    let mut mtx = parent.transform;
                    mtx.append_matrix(&mask.matrix());
                    let clip = canvas.clip(parent.clip.as_deref(), &path, &mtx)?;
                    state.clip = Some(Rc::new(clip));
                }
            }
        }

        state.transform.append_matrix(&node.matrix());
        state.alpha *= node.alpha;
        if let Some(blend) = node.blend_mode {
            state.blend = blend;
        }
        if let Some(shadow) = node.shadow {
            state.shadow = Some(shadow);
        }
        Some(state)
    }

    /// Renders the node into a scratch layer, tints and blurs it, then
    /// composites it at the shadow offset.
    fn draw_shadow(&self, id: NodeId, canvas: &mut Canvas, state: &DrawState, shadow: &Shadow) {
        let Ok(mut layer) = Surface::new(canvas.width(), canvas.height()) else {
            return;
        };
        let layer_state = DrawState {
            shadow: None,
            blend: BlendMode::SourceOver,
            ..state.clone()
        };
        self.draw_node(id, &mut Canvas::new(&mut layer), &layer_state, false);

        let c = shadow.color;
        let (w, h) = (layer.width(), layer.height());
        let data = layer.pixmap_mut().data_mut();
        for px in data.chunks_exact_mut(4) {
            let a = px[3] as f32 / 255.0 * c.a;
            px[0] = (c.r * a * 255.0).round() as u8;
            px[1] = (c.g * a * 255.0).round() as u8;
            px[2] = (c.b * a * 255.0).round() as u8;
            px[3] = (a * 255.0).round() as u8;
        }
        let radius = (shadow.blur / 2.0).round() as u32;
        if radius > 0 {
            blur_pixels(data, w, h, radius, radius, 3);
        }

        let composite = DrawState {
            transform: Transform2D::new(1.0, 0.0, 0.0, 1.0, shadow.offset_x, shadow.offset_y),
            alpha: 1.0,
            blend: state.blend,
            shadow: None,
            clip: state.clip.clone(),
        };
        let dst = Rect::new(0.0, 0.0, w as f64, h as f64);
        canvas.draw_surface(&layer, dst, &composite);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::{Graphics, Node};

    fn red_square(x: f64) -> Node {
        Node::shape(Graphics::filled_rect(Color::rgb(1.0, 0.0, 0.0), 0.0, 0.0, 10.0, 10.0))
            .with_position(x, 0.0)
    }

    #[test]
    fn test_children_draw_in_list_order() {
        let mut scene = Scene::new();
        let root = scene.insert(Node::container());
        scene.spawn_child(root, red_square(0.0)).unwrap();
        let mut blue = Node::shape(Graphics::filled_rect(Color::rgb(0.0, 0.0, 1.0), 0.0, 0.0, 10.0, 10.0));
        blue.x = 5.0;
        scene.spawn_child(root, blue).unwrap();

        let mut surface = Surface::new(20, 10).unwrap();
        scene.draw_subtree(root, &mut Canvas::new(&mut surface), &DrawState::default());
        assert_eq!(surface.pixel(2, 5).unwrap(), Some([255, 0, 0, 255]));
        assert_eq!(surface.pixel(7, 5).unwrap(), Some([0, 0, 255, 255]));
    }

    #[test]
    fn test_alpha_multiplies_down_the_tree() {
        let mut scene = Scene::new();
        let root = scene.insert(Node::container().with_alpha(0.5));
        scene.spawn_child(root, red_square(0.0).with_alpha(0.5)).unwrap();

        let mut surface = Surface::new(10, 10).unwrap();
        scene.draw_subtree(root, &mut Canvas::new(&mut surface), &DrawState::default());
        let px = surface.pixel(5, 5).unwrap().unwrap();
        assert!((63..=65).contains(&px[3]), "alpha was {}", px[3]);
    }

    #[test]
    fn test_mask_clips_in_parent_space() {
        let mut scene = Scene::new();
        let root = scene.insert(Node::container());
        let mask = scene.insert(Node::shape(Graphics::filled_rect(Color::BLACK, 0.0, 0.0, 5.0, 10.0)));
        let mut square = red_square(0.0);
        square.mask = Some(mask);
        scene.spawn_child(root, square).unwrap();

        let mut surface = Surface::new(10, 10).unwrap();
        scene.draw_subtree(root, &mut Canvas::new(&mut surface), &DrawState::default());
        assert_eq!(surface.pixel(2, 5).unwrap().map(|p| p[3]), Some(255));
        assert_eq!(surface.pixel(7, 5).unwrap().map(|p| p[3]), Some(0));
    }

    #[test]
    fn test_shadow_draws_offset_copy() {
        let mut scene = Scene::new();
        let root = scene.insert(Node::container());
        let mut square = red_square(0.0);
        square.shadow = Some(Shadow::new(Color::BLACK, 10.0, 0.0, 0.0));
        scene.spawn_child(root, square).unwrap();

        let mut surface = Surface::new(20, 10).unwrap();
        scene.draw_subtree(root, &mut Canvas::new(&mut surface), &DrawState::default());
        assert_eq!(surface.pixel(15, 5).unwrap(), Some([0, 0, 0, 255]));
        assert_eq!(surface.pixel(5, 5).unwrap(), Some([255, 0, 0, 255]));
    }
}
