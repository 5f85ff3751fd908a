//! StageGL, the batching renderer.
//!
//! [`StageGL`] draws the same tree a [`Stage`] does, but collects every
//! textured leaf into cards and hands them to a [`GpuBackend`] a batch at a
//! time. Vector shapes and text reach the GPU through caches: a node cached
//! with [`StageGL::cache_node`] renders into a pair of render textures once
//! and is drawn as a single card from then on.
//!
//! When no backend can be created the renderer keeps working through the
//! wrapped [`Stage`], so callers see the same interface either way.
//!
//! ```no_run
//! use stagecraft::prelude::*;
//!
//! let mut scene = Scene::new();
//! let mut stage = StageGL::new(&mut scene, 640, 480, StageGLOptions::default())?;
//! stage.set_clear_color_css("#102030")?;
//! stage.update(&mut scene, &FrameData::with_delta(16.0))?;
//! # Ok::<(), StageError>(())
//! ```

pub mod backend;
pub mod batch;
pub mod options;
mod renderer;
pub mod shaders;
pub mod software;
pub mod textures;
pub mod wgpu_backend;

pub use backend::{GpuBackend, ProgramDesc, Projection, ShaderBindings, TextureHandle};
pub use batch::{BatchBuffers, BatchVertex, UvRect};
pub use options::{StageGLOptions, DEFAULT_MAX_BATCH_SIZE, DEFAULT_PURGE_COUNT, DEFAULT_TEXTURE_UNITS};
pub use software::SoftwareBackend;
pub use wgpu_backend::WgpuBackend;

use self::renderer::GlContext;
use crate::cache::BitmapCache;
use crate::color::Color;
use crate::display::{ImageId, ImageSource, NodeKind};
use crate::error::{Result, StageError};
use crate::events::FrameData;
use crate::render_stats::BatchStats;
use crate::stage::{with_background, Stage};
use crate::surface::Surface;
use crate::tree::{NodeId, Scene};

#[derive(Debug)]
pub struct StageGL {
    stage: Stage,
    options: StageGLOptions,
    /// `None` when running on the raster fallback.
    gl: Option<GlContext>,
}

impl StageGL {
    /// Creates a renderer on a headless wgpu device, or on the raster path
    /// when no adapter is available.
    pub fn new(scene: &mut Scene, width: u32, height: u32, options: StageGLOptions) -> Result<Self> {
        match WgpuBackend::new(width, height) {
            Ok(backend) => Self::with_backend(scene, width, height, options, Box::new(backend)),
            Err(err) => {
                log::warn!("StageGL falling back to raster rendering: {err}");
                Self::raster(scene, width, height, options)
            }
        }
    }

    /// Creates a renderer drawing through `backend`.
    pub fn with_backend(
        scene: &mut Scene,
        width: u32,
        height: u32,
        options: StageGLOptions,
        backend: Box<dyn GpuBackend>,
    ) -> Result<Self> {
        let stage = Stage::new(scene, width, height)?;
        let gl = GlContext::new(backend, width, height, &options, scene.watch_released_caches())?;
        Ok(Self {
            stage,
            options,
            gl: Some(gl),
        })
    }

    /// Creates a renderer that only uses the raster path.
    pub fn raster(scene: &mut Scene, width: u32, height: u32, options: StageGLOptions) -> Result<Self> {
        Ok(Self {
            stage: Stage::new(scene, width, height)?,
            options,
            gl: None,
        })
    }

    /// Whether a GPU backend is drawing.
    pub fn is_webgl(&self) -> bool {
        self.gl.is_some()
    }

    pub fn backend_name(&self) -> Option<&str> {
        self.gl.as_ref().map(|gl| gl.backend_name())
    }

    pub fn options(&self) -> &StageGLOptions {
        &self.options
    }

    /// The wrapped raster stage. Its surface is only drawn to on the
    /// fallback path.
    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn stage_mut(&mut self) -> &mut Stage {
        &mut self.stage
    }

    pub fn root(&self) -> NodeId {
        self.stage.root()
    }

    pub fn width(&self) -> u32 {
        self.stage.width()
    }

    pub fn height(&self) -> u32 {
        self.stage.height()
    }

    /// Ticks, clears and draws the tree. See [`Stage::update`] for the
    /// events involved. With `preserve_buffer` the target is never cleared.
    pub fn update(&mut self, scene: &mut Scene, frame: &FrameData) -> Result<()> {
        if self.gl.is_none() {
            return self.stage.update(scene, frame);
        }
        if self.stage.tick_on_update {
            self.stage.tick(scene, frame);
        }
        if !self.stage.begin_draw(scene) {
            return Ok(());
        }
        if self.stage.auto_clear && !self.options.preserve_buffer {
            self.clear()?;
        }
        self.draw(scene)?;
        self.stage.end_draw(scene);

        if let (Some(period), Some(gl)) = (self.options.auto_purge, self.gl.as_mut()) {
            let check_every = u64::from(period / 2).max(1);
            if gl.draw_id() % check_every == 0 {
                gl.purge(u64::from(period));
            }
        }
        Ok(())
    }

    /// Propagates a tick through the tree without drawing.
    pub fn tick(&self, scene: &mut Scene, frame: &FrameData) {
        self.stage.tick(scene, frame);
    }

    /// Clears the target to the clear color.
    pub fn clear(&mut self) -> Result<()> {
        match self.gl.as_mut() {
            Some(gl) => gl.clear(),
            None => {
                self.stage.clear();
                Ok(())
            }
        }
    }

    /// Draws the tree over the current contents of the target. Caches
    /// marked with [`Scene::invalidate_cache`] are re-rendered first.
    pub fn draw(&mut self, scene: &mut Scene) -> Result<()> {
        match self.gl.as_mut() {
            Some(gl) => gl.draw(scene, self.stage.root()),
            None => {
                scene.refresh_invalid_caches(self.stage.root())?;
                self.stage.draw(scene);
                Ok(())
            }
        }
    }

    /// Sets the viewport used to map card positions onto the target.
    pub fn update_viewport(&mut self, width: u32, height: u32) {
        if let Some(gl) = self.gl.as_mut() {
            gl.set_viewport(width, height);
        }
    }

    /// Resizes the target and the viewport, clearing the target.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.stage.resize(width, height)?;
        if let Some(gl) = self.gl.as_mut() {
            gl.resize(width, height)?;
        }
        Ok(())
    }

    pub fn clear_color(&self) -> Color {
        self.gl.as_ref().map_or(self.options.clear_color, |gl| gl.clear_color)
    }

    pub fn set_clear_color(&mut self, color: Color) {
        self.options.clear_color = color;
        if let Some(gl) = self.gl.as_mut() {
            gl.clear_color = color;
        }
    }

    /// Parses `"#RGB"`, `"#RRGGBB"`, `"#RRGGBBAA"`, `"rgb(..)"` or
    /// `"rgba(..)"`.
    pub fn set_clear_color_css(&mut self, color: &str) -> Result<()> {
        self.set_clear_color(Color::parse(color)?);
        Ok(())
    }

    /// Sets the clear color from a packed `0xRRGGBBAA`.
    pub fn set_clear_color_packed(&mut self, rgba: u32) {
        self.set_clear_color(Color::from_rgba_u32(rgba));
    }

    // -- caching -----------------------------------------------------------

    /// Caches the node into a pair of render textures and draws it as one
    /// card from then on. Falls back to [`Scene::cache`] on the raster path.
    #[allow(clippy::too_many_arguments)]
    pub fn cache_node(
        &mut self,
        scene: &mut Scene,
        id: NodeId,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        scale: f64,
    ) -> Result<()> {
        if self.gl.is_none() {
            return scene.cache(id, x, y, width, height, scale);
        }
        let node = scene.node_mut(id).ok_or(StageError::UnknownNode(id))?;
        let previous = node.cache.take();
        node.cache = Some(BitmapCache::new(x, y, width, height, scale).continue_from(previous.as_ref()));
        self.update_cache_node(scene, id)
    }

    /// Re-renders a cache made with [`StageGL::cache_node`].
    pub fn update_cache_node(&mut self, scene: &mut Scene, id: NodeId) -> Result<()> {
        match self.gl.as_mut() {
            Some(gl) => gl.refresh_cache(scene, id),
            None => scene.update_cache(id, None),
        }
    }

    /// Drops the node's cache and frees its textures.
    pub fn uncache_node(&mut self, scene: &mut Scene, id: NodeId) {
        if let Some(gl) = self.gl.as_mut() {
            gl.release_cache(id);
        }
        scene.uncache(id);
    }

    /// The render texture the next render of `id`'s cache would draw into,
    /// created at `width` x `height` if needed.
    pub fn get_target_render_texture(&mut self, id: NodeId, width: u32, height: u32) -> Result<TextureHandle> {
        let gl = self
            .gl
            .as_mut()
            .ok_or_else(|| StageError::NoBackend("render textures need a GPU backend".into()))?;
        gl.target_render_texture(id, width, height)
    }

    // -- texture management -----------------------------------------------

    /// Evicts textures not drawn in the last `count` draws, by default
    /// [`DEFAULT_PURGE_COUNT`]. Render textures are kept.
    pub fn purge_textures(&mut self, count: Option<u64>) {
        if let Some(gl) = self.gl.as_mut() {
            gl.purge(count.unwrap_or(DEFAULT_PURGE_COUNT));
        }
    }

    /// Frees every texture the node and its descendants use: caches, bitmap
    /// images and sprite sheet images. They are uploaded again if drawn.
    pub fn release_texture(&mut self, scene: &mut Scene, id: NodeId) {
        let children = scene.children(id).to_vec();
        for child in children {
            self.release_texture(scene, child);
        }
        if scene.node(id).is_some_and(|n| n.is_cached()) {
            self.uncache_node(scene, id);
        }
        let Some(gl) = self.gl.as_mut() else {
            return;
        };
        let mut images: Vec<ImageId> = match scene.node(id).map(|n| &n.kind) {
            Some(NodeKind::Bitmap(bitmap)) => vec![bitmap.image],
            Some(NodeKind::Sprite(sprite)) => {
                let sheet = sprite.sheet();
                (0..sheet.num_frames())
                    .filter_map(|i| sheet.frame(i).map(|f| f.image))
                    .collect()
            }
            _ => Vec::new(),
        };
        images.sort();
        images.dedup();
        for image in images {
            gl.release_image(image);
        }
    }

    /// Frees the texture uploaded from `image`.
    pub fn release_image(&mut self, image: ImageId) {
        if let Some(gl) = self.gl.as_mut() {
            gl.release_image(image);
        }
    }

    /// Keeps new textures out of `slot`, or lets them in again.
    pub fn protect_texture_slot(&mut self, slot: usize, lock: bool) -> Result<()> {
        match self.gl.as_mut() {
            Some(gl) => gl.protect_slot(slot, lock),
            None => Ok(()),
        }
    }

    /// Recompiles the batch program for `count` simultaneous textures,
    /// stepping down if the backend rejects it.
    pub fn update_simultaneous_texture_count(&mut self, count: usize) -> Result<()> {
        self.options.texture_units = count.max(1);
        match self.gl.as_mut() {
            Some(gl) => gl.set_texture_units(count.max(1)),
            None => Ok(()),
        }
    }

    /// Texture slots of the compiled program. 0 on the raster path.
    pub fn texture_units(&self) -> usize {
        self.gl.as_ref().map_or(0, |gl| gl.texture_units())
    }

    /// Textures currently resident, render textures included.
    pub fn texture_count(&self) -> usize {
        self.gl.as_ref().map_or(0, |gl| gl.texture_count())
    }

    /// Snapshot of the batch counters.
    pub fn stats(&self) -> BatchStats {
        self.gl.as_ref().map(|gl| gl.stats()).unwrap_or_default()
    }

    pub fn reset_stats(&mut self) {
        if let Some(gl) = self.gl.as_mut() {
            gl.reset_stats();
        }
    }

    // -- export ------------------------------------------------------------

    /// Copy of the target's pixels.
    pub fn snapshot(&mut self) -> Result<Surface> {
        match self.gl.as_mut() {
            Some(gl) => gl.read_screen(),
            None => Ok(self.stage.surface().clone()),
        }
    }

    /// Base64 PNG of the target, composited over `background` when given.
    pub fn to_data_url(&mut self, background: Option<Color>) -> Result<String> {
        let surface = self.snapshot()?;
        with_background(&surface, background)?.to_data_url()
    }

    /// The target as an image, unclean if anything unclean was drawn.
    pub fn to_image(&mut self) -> Result<ImageSource> {
        let surface = self.snapshot()?;
        let clean = !surface.is_tainted() && !self.gl.as_ref().is_some_and(|gl| gl.is_tainted());
        Ok(ImageSource::from_pixmap(surface.pixmap().clone()).with_origin_clean(clean))
    }
}
