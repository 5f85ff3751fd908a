//! Per-node bitmap caches.
//!
//! A cache renders a node's subtree once into an offscreen surface, runs
//! the node's filters over it, and from then on the node draws that surface
//! instead of walking its subtree. The cache is only refreshed when
//! [`Scene::update_cache`] is called.

use std::cell::RefCell;

use crate::display::BlendMode;
use crate::error::{Result, StageError};
use crate::filters::filter_padding;
use crate::geom::Rect;
use crate::raster::{Canvas, DrawState};
use crate::surface::Surface;
use crate::transform::Transform2D;
use crate::tree::{NodeId, Scene};

/// Where the cached pixels live.
#[derive(Debug)]
pub enum CacheSurface {
    /// A CPU surface, drawn by the raster path and uploaded by StageGL.
    Raster(Surface),
    /// A render texture owned by a StageGL renderer. Only that renderer can
    /// draw it.
    Texture { width: u32, height: u32 },
}

#[derive(Debug)]
pub struct BitmapCache {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    scale: f64,
    /// Top-left of the filter padding, in cache pixels.
    filter_off_x: f64,
    filter_off_y: f64,
    draw_width: u32,
    draw_height: u32,
    cache_id: u64,
    /// Refresh on the next draw.
    invalid: bool,
    surface: Option<CacheSurface>,
    data_url: RefCell<Option<(u64, String)>>,
}

impl BitmapCache {
    /// Sets up the region; the first render happens separately. Width and
    /// height are clamped to at least 1.
    pub(crate) fn new(x: f64, y: f64, width: f64, height: f64, scale: f64) -> Self {
        Self {
            x,
            y,
            width: width.ceil().max(1.0),
            height: height.ceil().max(1.0),
            scale: if scale > 0.0 { scale } else { 1.0 },
            filter_off_x: 0.0,
            filter_off_y: 0.0,
            draw_width: 0,
            draw_height: 0,
            cache_id: 0,
            invalid: false,
            surface: None,
            data_url: RefCell::new(None),
        }
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Incremented on every render; 0 before the first one. Re-caching a
    /// node continues from its previous cache's count.
    pub fn cache_id(&self) -> u64 {
        self.cache_id
    }

    /// Continues the render count of a cache this one replaces.
    pub(crate) fn continue_from(mut self, previous: Option<&BitmapCache>) -> Self {
        if let Some(previous) = previous {
            self.cache_id = previous.cache_id;
        }
        self
    }

    /// Whether the cache waits for a refresh on the next draw.
    pub fn is_invalid(&self) -> bool {
        self.invalid
    }

    /// Size of the backing surface, filter padding included.
    pub fn draw_size(&self) -> (u32, u32) {
        (self.draw_width, self.draw_height)
    }

    /// Offset from the region origin to the surface origin, in cache pixels.
    pub fn filter_offset(&self) -> (f64, f64) {
        (self.filter_off_x, self.filter_off_y)
    }

    /// The raster surface, if this cache has one.
    pub fn surface(&self) -> Option<&Surface> {
        match &self.surface {
            Some(CacheSurface::Raster(s)) => Some(s),
            _ => None,
        }
    }

    pub fn is_texture(&self) -> bool {
        matches!(self.surface, Some(CacheSurface::Texture { .. }))
    }

    /// Area the cached image covers in the node's local space.
    pub fn bounds(&self) -> Rect {
        Rect::new(
            self.x + self.filter_off_x / self.scale,
            self.y + self.filter_off_y / self.scale,
            self.draw_width as f64 / self.scale,
            self.draw_height as f64 / self.scale,
        )
    }

    /// Recomputes padding and surface size for the given filter padding.
    /// Returns whether the size changed.
    pub(crate) fn layout(&mut self, padding: Rect) -> bool {
        let w = ((self.width * self.scale).ceil() + padding.width).max(1.0) as u32;
        let h = ((self.height * self.scale).ceil() + padding.height).max(1.0) as u32;
        self.filter_off_x = padding.x;
        self.filter_off_y = padding.y;
        let changed = (w, h) != (self.draw_width, self.draw_height);
        self.draw_width = w;
        self.draw_height = h;
        changed
    }

    /// Maps the node's local space into cache pixels.
    pub(crate) fn render_transform(&self) -> Transform2D {
        let mut m = Transform2D::new(
            self.scale,
            0.0,
            0.0,
            self.scale,
            -self.filter_off_x,
            -self.filter_off_y,
        );
        m.translate(-self.x, -self.y);
        m
    }

    /// Records that a GPU renderer holds the pixels.
    pub(crate) fn mark_texture(&mut self) {
        self.surface = Some(CacheSurface::Texture {
            width: self.draw_width,
            height: self.draw_height,
        });
        self.cache_id += 1;
        self.invalid = false;
    }

    /// Stores pixels rendered elsewhere, e.g. read back from a GPU target.
    pub(crate) fn set_raster(&mut self, surface: Surface) {
        self.surface = Some(CacheSurface::Raster(surface));
        self.cache_id += 1;
        self.invalid = false;
    }

    /// Draws the cached surface in `state`. Returns `false` when there is
    /// nothing the raster path can draw.
    pub fn draw(&self, canvas: &mut Canvas, state: &DrawState) -> bool {
        let Some(surface) = self.surface() else {
            return false;
        };
        canvas.draw_surface(surface, self.bounds(), state);
        true
    }

    /// Base64 PNG of the cached pixels, re-encoded only after a new render.
    pub fn data_url(&self) -> Result<Option<String>> {
        let Some(surface) = self.surface() else {
            return Ok(None);
        };
        if let Some((id, url)) = self.data_url.borrow().as_ref() {
            if *id == self.cache_id {
                return Ok(Some(url.clone()));
            }
        }
        let url = surface.to_data_url()?;
        *self.data_url.borrow_mut() = Some((self.cache_id, url.clone()));
        Ok(Some(url))
    }
}

impl Scene {
    /// Caches the node's rendering of the local region `(x, y, width,
    /// height)` at `scale`, then renders it once.
    pub fn cache(&mut self, id: NodeId, x: f64, y: f64, width: f64, height: f64, scale: f64) -> Result<()> {
        let node = self.node_mut(id).ok_or(StageError::UnknownNode(id))?;
        let previous = node.cache.take();
        node.cache = Some(BitmapCache::new(x, y, width, height, scale).continue_from(previous.as_ref()));
        if previous.is_some() {
            self.notify_cache_released(id);
        }
        self.update_cache(id, None)
    }

    /// Marks the cache for a refresh the next time a renderer draws it.
    pub fn invalidate_cache(&mut self, id: NodeId) -> Result<()> {
        let node = self.node_mut(id).ok_or(StageError::UnknownNode(id))?;
        let cache = node.cache.as_mut().ok_or(StageError::NoCache)?;
        cache.invalid = true;
        Ok(())
    }

    /// Re-renders every invalidated cache under `id`, innermost first.
    pub(crate) fn refresh_invalid_caches(&mut self, id: NodeId) -> Result<()> {
        let children = self.children(id).to_vec();
        for child in children {
            self.refresh_invalid_caches(child)?;
        }
        if self.node(id).and_then(|n| n.cache()).is_some_and(|c| c.invalid) {
            self.update_cache(id, None)?;
        }
        Ok(())
    }

    /// Re-renders the cache. With `composite` the new rendering is drawn over
    /// the old pixels using that blend mode instead of replacing them.
    pub fn update_cache(&mut self, id: NodeId, composite: Option<BlendMode>) -> Result<()> {
        let node = self.node_mut(id).ok_or(StageError::UnknownNode(id))?;
        let mut cache = node.cache.take().ok_or(StageError::NoCache)?;
        let result = self.render_cache(id, &mut cache, composite);
        if let Some(node) = self.node_mut(id) {
            node.cache = Some(cache);
        }
        result
    }

    fn render_cache(&self, id: NodeId, cache: &mut BitmapCache, composite: Option<BlendMode>) -> Result<()> {
        let node = self.node(id).ok_or(StageError::UnknownNode(id))?;
        let padding = filter_padding(&node.filters);
        cache.layout(padding);
        let (w, h) = cache.draw_size();
        cache.invalid = false;

        let surface = match cache.surface.take() {
            Some(CacheSurface::Raster(mut s)) => {
                s.resize(w, h)?;
                s
            }
            _ => Surface::new(w, h)?,
        };
        let mut surface = surface;
        if composite.is_none() {
            surface.clear();
        }

        let state = DrawState {
            transform: cache.render_transform(),
            blend: composite.unwrap_or(BlendMode::SourceOver),
            ..DrawState::default()
        };
        self.draw_node(id, &mut Canvas::new(&mut surface), &state, true);

        if !node.filters.is_empty() {
            let applied = surface.with_pixels(|px, w, h| {
                let mut any = false;
                for filter in &node.filters {
                    if filter.apply(px, w, h) {
                        any = true;
                    } else {
                        log::debug!("filter {filter:?} did not apply to cache of {id:?}");
                    }
                }
                any
            });
            match applied {
                Ok(_) => {}
                Err(err) if self.strict() => {
                    cache.surface = Some(CacheSurface::Raster(surface));
                    cache.cache_id += 1;
                    return Err(err);
                }
                Err(err) => log::warn!("filters skipped for {id:?}: {err}"),
            }
        }

        cache.surface = Some(CacheSurface::Raster(surface));
        cache.cache_id += 1;
        Ok(())
    }

    /// Drops the node's cache. Does nothing if there is none.
    pub fn uncache(&mut self, id: NodeId) {
        if let Some(node) = self.node_mut(id) {
            if node.cache.take().is_some() {
                self.notify_cache_released(id);
            }
        }
    }

    /// Data URL of the node's cache, or `None` if it is not cached on the
    /// CPU.
    pub fn cache_data_url(&self, id: NodeId) -> Result<Option<String>> {
        match self.node(id).and_then(|n| n.cache()) {
            Some(cache) => cache.data_url(),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use crate::display::{Graphics, Node};
    use crate::filters::{BlurFilter, ColorFilter};

    fn red_square() -> Node {
        Node::shape(Graphics::filled_rect(Color::rgb(1.0, 0.0, 0.0), 0.0, 0.0, 10.0, 10.0))
    }

    #[test]
    fn test_update_before_cache_fails() {
        let mut scene = Scene::new();
        let id = scene.insert(red_square());
        assert!(matches!(scene.update_cache(id, None), Err(StageError::NoCache)));
    }

    #[test]
    fn test_update_bumps_generation_and_keeps_size() {
        let mut scene = Scene::new();
        let id = scene.insert(red_square());
        scene.cache(id, 0.0, 0.0, 10.0, 10.0, 1.0).unwrap();
        let cache = scene.node(id).unwrap().cache().unwrap();
        assert_eq!(cache.cache_id(), 1);
        assert_eq!(cache.draw_size(), (10, 10));

        scene.update_cache(id, None).unwrap();
        scene.update_cache(id, None).unwrap();
        let cache = scene.node(id).unwrap().cache().unwrap();
        assert_eq!(cache.cache_id(), 3);
        assert_eq!(cache.draw_size(), (10, 10));
    }

    #[test]
    fn test_recache_continues_generation() {
        let mut scene = Scene::new();
        let id = scene.insert(red_square());
        let released = scene.watch_released_caches();
        scene.cache(id, 0.0, 0.0, 10.0, 10.0, 1.0).unwrap();
        assert!(released.borrow().is_empty());

        scene.cache(id, 0.0, 0.0, 4.0, 4.0, 1.0).unwrap();
        assert_eq!(scene.node(id).unwrap().cache().unwrap().cache_id(), 2);
        scene.uncache(id);
        assert_eq!(*released.borrow(), vec![id, id]);
    }

    #[test]
    fn test_invalidated_cache_refreshes_on_walk() {
        let mut scene = Scene::new();
        let root = scene.insert(Node::container());
        let id = scene.spawn_child(root, red_square()).unwrap();
        assert!(matches!(scene.invalidate_cache(id), Err(StageError::NoCache)));
        scene.cache(id, 0.0, 0.0, 10.0, 10.0, 1.0).unwrap();

        scene.node_mut(id).unwrap().kind =
            Node::shape(Graphics::filled_rect(Color::rgb(0.0, 0.0, 1.0), 0.0, 0.0, 10.0, 10.0)).kind;
        scene.invalidate_cache(id).unwrap();
        assert!(scene.node(id).unwrap().cache().unwrap().is_invalid());
        scene.refresh_invalid_caches(root).unwrap();

        let cache = scene.node(id).unwrap().cache().unwrap();
        assert!(!cache.is_invalid());
        assert_eq!(cache.cache_id(), 2);
        assert_eq!(cache.surface().unwrap().pixel(5, 5).unwrap(), Some([0, 0, 255, 255]));
    }

    #[test]
    fn test_scale_and_region() {
        let mut scene = Scene::new();
        let id = scene.insert(red_square());
        scene.cache(id, 5.0, 0.0, 5.0, 10.0, 2.0).unwrap();
        let cache = scene.node(id).unwrap().cache().unwrap();
        assert_eq!(cache.draw_size(), (10, 20));
        assert_eq!(cache.bounds(), Rect::new(5.0, 0.0, 5.0, 10.0));
        let px = cache.surface().unwrap().pixel(9, 19).unwrap();
        assert_eq!(px, Some([255, 0, 0, 255]));
    }

    #[test]
    fn test_filters_pad_and_apply() {
        let mut scene = Scene::new();
        let mut node = red_square();
        node.filters.push(Box::new(BlurFilter::new(4.0, 4.0, 1)));
        node.filters.push(Box::new(ColorFilter::tint(0, 0, 255)));
        let id = scene.insert(node);
        scene.cache(id, 0.0, 0.0, 10.0, 10.0, 1.0).unwrap();

        let cache = scene.node(id).unwrap().cache().unwrap();
        assert_eq!(cache.draw_size(), (20, 20));
        assert_eq!(cache.bounds(), Rect::new(-5.0, -5.0, 20.0, 20.0));
        let center = cache.surface().unwrap().pixel(10, 10).unwrap().unwrap();
        assert_eq!(&center[..3], &[0, 0, 255]);
    }

    #[test]
    fn test_cached_node_draws_cache() {
        let mut scene = Scene::new();
        let id = scene.insert(red_square());
        scene.cache(id, 0.0, 0.0, 5.0, 10.0, 1.0).unwrap();

        let mut surface = Surface::new(10, 10).unwrap();
        scene.draw_subtree(id, &mut Canvas::new(&mut surface), &DrawState::default());
        assert_eq!(surface.pixel(2, 2).unwrap().map(|p| p[3]), Some(255));
        assert_eq!(surface.pixel(7, 2).unwrap().map(|p| p[3]), Some(0));
        assert_eq!(scene.bounds(id), Some(Rect::new(0.0, 0.0, 5.0, 10.0)));
    }

    #[test]
    fn test_data_url_memoized_per_generation() {
        let mut scene = Scene::new();
        let id = scene.insert(red_square());
        assert_eq!(scene.cache_data_url(id).unwrap(), None);
        scene.cache(id, 0.0, 0.0, 10.0, 10.0, 1.0).unwrap();
        let first = scene.cache_data_url(id).unwrap().unwrap();
        assert!(first.starts_with("data:image/png;base64,"));
        assert_eq!(scene.cache_data_url(id).unwrap().unwrap(), first);

        scene.uncache(id);
        assert!(!scene.node(id).unwrap().is_cached());
    }
}
