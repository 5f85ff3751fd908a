//! The raster renderer.
//!
//! A [`Stage`] owns the target [`Surface`] and the root container of a
//! scene. Each [`Stage::update`] ticks the tree, clears the target and draws
//! every visible node with a plain recursive walk.

use std::rc::Rc;

use resvg::tiny_skia::PathBuilder;

use crate::color::Color;
use crate::display::{ImageSource, Node};
use crate::error::{Result, StageError};
use crate::events::{Event, FrameData};
use crate::geom::Rect;
use crate::raster::{Canvas, DrawState};
use crate::surface::Surface;
use crate::tree::{NodeId, Scene};

#[derive(Debug)]
pub struct Stage {
    root: NodeId,
    surface: Surface,
    /// Clear the target at the start of every update.
    pub auto_clear: bool,
    /// Tick the tree at the start of every update.
    pub tick_on_update: bool,
    /// Restricts clearing and drawing to this area of the target.
    pub draw_rect: Option<Rect>,
}

impl Stage {
    /// Creates a stage with a fresh root container in `scene`.
    pub fn new(scene: &mut Scene, width: u32, height: u32) -> Result<Self> {
        let root = scene.insert(Node::container().with_name("stage"));
        Self::with_root(scene, root, width, height)
    }

    /// Uses an existing container as the root.
    pub fn with_root(scene: &Scene, root: NodeId, width: u32, height: u32) -> Result<Self> {
        match scene.node(root) {
            None => return Err(StageError::UnknownNode(root)),
            Some(node) if !node.kind.is_container() => return Err(StageError::NotAContainer(root)),
            Some(_) => {}
        }
        Ok(Self {
            root,
            surface: Surface::new(width, height)?,
            auto_clear: true,
            tick_on_update: true,
            draw_rect: None,
        })
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn width(&self) -> u32 {
        self.surface.width()
    }

    pub fn height(&self) -> u32 {
        self.surface.height()
    }

    /// Resizes the target, clearing it.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.surface.resize(width, height)
    }

    /// Ticks, clears and draws the whole tree, bracketed by `drawstart` and
    /// `drawend` on the root. A listener that prevents `drawstart` skips the
    /// draw. Invalidated caches are re-rendered before drawing.
    pub fn update(&mut self, scene: &mut Scene, frame: &FrameData) -> Result<()> {
        if self.tick_on_update {
            self.tick(scene, frame);
        }
        if !self.begin_draw(scene) {
            return Ok(());
        }
        if self.auto_clear {
            self.clear();
        }
        scene.refresh_invalid_caches(self.root)?;
        self.draw(scene);
        self.end_draw(scene);
        Ok(())
    }

    /// Propagates a tick through the tree. Cancelled by preventing
    /// `tickstart` on the root.
    pub fn tick(&self, scene: &mut Scene, frame: &FrameData) {
        let root_ticks = scene.node(self.root).is_some_and(|n| n.tick_enabled);
        if !root_ticks {
            return;
        }
        let mut start = Event::new("tickstart").cancelable().with_frame(frame.clone());
        if !scene.dispatch_event(self.root, &mut start) {
            log::debug!("tick cancelled by a tickstart listener");
            return;
        }
        scene.tick(self.root, frame);
        scene.dispatch_event(self.root, &mut Event::new("tickend").with_frame(frame.clone()));
    }

    /// Clears the draw rect, or the whole target.
    pub fn clear(&mut self) {
        match self.draw_rect {
            Some(rect) => self.surface.clear_rect(rect),
            None => self.surface.clear(),
        }
    }

    /// Draws the tree over the current contents of the target.
    pub fn draw(&mut self, scene: &Scene) {
        let mut canvas = Canvas::new(&mut self.surface);
        let mut state = DrawState::default();
        if let Some(rect) = self.draw_rect {
            let area = resvg::tiny_skia::Rect::from_xywh(
                rect.x as f32,
                rect.y as f32,
                rect.width as f32,
                rect.height as f32,
            );
            // an empty draw rect draws nothing
            let Some(area) = area else {
                return;
            };
            let clip = PathBuilder::from_rect(area);
            match canvas.clip(None, &clip, &state.transform) {
                Some(mask) => state.clip = Some(Rc::new(mask)),
                None => return,
            }
        }
        scene.draw_subtree(self.root, &mut canvas, &state);
    }

    /// Base64 PNG of the target, composited over `background` when given.
    pub fn to_data_url(&self, background: Option<Color>) -> Result<String> {
        with_background(&self.surface, background)?.to_data_url()
    }

    /// Snapshot of the target as an image. Unclean when the target is
    /// tainted.
    pub fn to_image(&self) -> ImageSource {
        ImageSource::from_pixmap(self.surface.pixmap().clone())
            .with_origin_clean(!self.surface.is_tainted())
    }

    /// Dispatches a cancelable `drawstart`. Returns `false` if prevented.
    pub(crate) fn begin_draw(&self, scene: &mut Scene) -> bool {
        scene.dispatch_event(self.root, &mut Event::new("drawstart").cancelable())
    }

    pub(crate) fn end_draw(&self, scene: &mut Scene) {
        scene.dispatch_event(self.root, &mut Event::new("drawend"));
        scene.sync_dom_proxies(self.root);
    }
}

/// Copy of `surface` drawn over a solid `background`.
pub(crate) fn with_background(surface: &Surface, background: Option<Color>) -> Result<Surface> {
    let Some(color) = background else {
        return Ok(surface.clone());
    };
    let mut out = Surface::new(surface.width(), surface.height())?;
    out.fill(color);
    out.draw_surface(surface, resvg::tiny_skia::Transform::identity());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::Graphics;
    use std::cell::RefCell;

    fn red_square(x: f64, y: f64) -> Node {
        let mut g = Graphics::new();
        g.begin_fill(Color::rgb(1.0, 0.0, 0.0)).rect(0.0, 0.0, 10.0, 10.0);
        Node::shape(g).with_position(x, y)
    }

    #[test]
    fn test_update_draws_children() {
        let mut scene = Scene::new();
        let mut stage = Stage::new(&mut scene, 40, 40).unwrap();
        scene.spawn_child(stage.root(), red_square(5.0, 5.0)).unwrap();
        stage.update(&mut scene, &FrameData::default()).unwrap();

        assert_eq!(stage.surface().pixel(7, 7).unwrap(), Some([255, 0, 0, 255]));
        assert_eq!(stage.surface().pixel(20, 20).unwrap(), Some([0, 0, 0, 0]));
    }

    #[test]
    fn test_update_refreshes_invalidated_caches() {
        let mut scene = Scene::new();
        let mut stage = Stage::new(&mut scene, 20, 20).unwrap();
        let id = scene.spawn_child(stage.root(), red_square(0.0, 0.0)).unwrap();
        scene.cache(id, 0.0, 0.0, 10.0, 10.0, 1.0).unwrap();

        let mut blue = Graphics::new();
        blue.begin_fill(Color::rgb(0.0, 0.0, 1.0)).rect(0.0, 0.0, 10.0, 10.0);
        scene.node_mut(id).unwrap().kind = Node::shape(blue).kind;
        stage.update(&mut scene, &FrameData::default()).unwrap();
        assert_eq!(stage.surface().pixel(2, 2).unwrap(), Some([255, 0, 0, 255]));

        scene.invalidate_cache(id).unwrap();
        stage.update(&mut scene, &FrameData::default()).unwrap();
        assert_eq!(stage.surface().pixel(2, 2).unwrap(), Some([0, 0, 255, 255]));
    }

    #[test]
    fn test_prevented_drawstart_skips_draw() {
        let mut scene = Scene::new();
        let mut stage = Stage::new(&mut scene, 20, 20).unwrap();
        scene.spawn_child(stage.root(), red_square(0.0, 0.0)).unwrap();
        scene.add_listener(stage.root(), "drawstart", Box::new(|e: &mut Event| e.prevent_default()));
        stage.update(&mut scene, &FrameData::default()).unwrap();
        assert_eq!(stage.surface().pixel(2, 2).unwrap(), Some([0, 0, 0, 0]));
    }

    #[test]
    fn test_prevented_tickstart_skips_tick() {
        let mut scene = Scene::new();
        let stage = Stage::new(&mut scene, 4, 4).unwrap();
        let child = scene.spawn_child(stage.root(), Node::container()).unwrap();
        let ticks = Rc::new(RefCell::new(0));
        let seen = ticks.clone();
        scene.add_listener(child, "tick", Box::new(move |_| *seen.borrow_mut() += 1));

        stage.tick(&mut scene, &FrameData::with_delta(16.0));
        assert_eq!(*ticks.borrow(), 1);

        scene.add_listener(stage.root(), "tickstart", Box::new(|e: &mut Event| e.prevent_default()));
        stage.tick(&mut scene, &FrameData::with_delta(16.0));
        assert_eq!(*ticks.borrow(), 1);
    }

    #[test]
    fn test_draw_rect_limits_clear_and_draw() {
        let mut scene = Scene::new();
        let mut stage = Stage::new(&mut scene, 20, 20).unwrap();
        scene.spawn_child(stage.root(), red_square(0.0, 0.0)).unwrap();
        stage.update(&mut scene, &FrameData::default()).unwrap();

        scene.node_mut(stage.root()).unwrap().x = 10.0;
        stage.draw_rect = Some(Rect::new(0.0, 0.0, 5.0, 20.0));
        stage.update(&mut scene, &FrameData::default()).unwrap();

        // cleared inside the rect, untouched outside it
        assert_eq!(stage.surface().pixel(2, 2).unwrap(), Some([0, 0, 0, 0]));
        assert_eq!(stage.surface().pixel(7, 2).unwrap(), Some([255, 0, 0, 255]));
        // the moved square is clipped away
        assert_eq!(stage.surface().pixel(12, 2).unwrap(), Some([0, 0, 0, 0]));
    }

    #[test]
    fn test_data_url_with_background() {
        let mut scene = Scene::new();
        let stage = Stage::new(&mut scene, 2, 2).unwrap();
        let bg = with_background(stage.surface(), Some(Color::rgb(0.0, 0.0, 1.0))).unwrap();
        assert_eq!(bg.pixel(0, 0).unwrap(), Some([0, 0, 255, 255]));
        assert!(stage
            .to_data_url(Some(Color::rgb(0.0, 0.0, 1.0)))
            .unwrap()
            .starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_with_root_rejects_leaves() {
        let mut scene = Scene::new();
        let leaf = scene.insert(red_square(0.0, 0.0));
        assert!(matches!(
            Stage::with_root(&scene, leaf, 4, 4),
            Err(StageError::NotAContainer(_))
        ));
    }
}
