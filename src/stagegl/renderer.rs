//! The batching core behind [`StageGL`](super::StageGL).
//!
//! A [`GlContext`] owns the backend, the shared card buffers and the texture
//! table. A draw walks the tree once, turning every visible leaf (or cached
//! node) into a card and flushing whenever the buffers or the texture slots
//! run out.

use std::collections::HashMap;

use resvg::tiny_skia::Pixmap;

use super::backend::{GpuBackend, ProgramDesc, Projection, ShaderBindings, TextureHandle};
use super::batch::{BatchBuffers, UvRect};
use super::options::StageGLOptions;
use super::textures::{RenderSide, ResidentTexture, TextureKey, TextureTable};
use crate::cache::BitmapCache;
use crate::color::Color;
use crate::display::{ImageId, ImageSource, NodeKind};
use crate::error::{Result, StageError};
use crate::filters::filter_padding;
use crate::geom::Rect;
use crate::raster::{Canvas, DrawState};
use crate::render_stats::{BatchStats, FlushReason};
use crate::surface::Surface;
use crate::transform::Transform2D;
use crate::tree::{NodeId, ReleasedCaches, Scene};

/// Texture units dropped on every failed compile.
const UNIT_RETRY_STEP: usize = 4;

/// A node's ping-pong render textures.
#[derive(Debug, Default, Clone, Copy)]
struct RenderPair {
    /// Side holding the finished cache image.
    last: Option<RenderSide>,
    /// The cache image contains pixels from an unclean image.
    tainted: bool,
}

/// Where a card's pixels come from.
enum CardSource<'a> {
    /// Upload `pixmap` unless the resident copy is already at `version`.
    Pixels { pixmap: &'a Pixmap, version: u64 },
    /// Already on the GPU.
    Resident,
}

struct Card<'a> {
    key: TextureKey,
    source: CardSource<'a>,
    rect: Rect,
    uv: UvRect,
    tainted: bool,
}

pub(crate) struct GlContext {
    backend: Box<dyn GpuBackend>,
    bindings: ShaderBindings,
    buffers: BatchBuffers,
    textures: TextureTable,
    /// Bound to every empty slot.
    base_texture: TextureHandle,
    render_pairs: HashMap<NodeId, RenderPair>,
    /// Caches the scene dropped; their textures go before the next use.
    released: ReleasedCaches,
    /// Current render target, `None` for the default one.
    target: Option<TextureHandle>,
    batch_id: u64,
    draw_id: u64,
    is_drawing: u32,
    projection: Projection,
    pub(crate) clear_color: Color,
    stats: BatchStats,
    vocal_debug: bool,
    antialias: bool,
    transparent: bool,
    cache_controlled: bool,
    /// The current target holds pixels from an unclean image.
    tainted: bool,
}

impl GlContext {
    pub(crate) fn new(
        mut backend: Box<dyn GpuBackend>,
        width: u32,
        height: u32,
        options: &StageGLOptions,
        released: ReleasedCaches,
    ) -> Result<Self> {
        if backend.target_size() != (width, height) {
            backend.resize_target(width, height)?;
        }
        let bindings = compile_with_retry(backend.as_mut(), options.texture_units, options.antialias)?;
        let base_texture = backend.create_texture(1, 1)?;
        log::info!(
            "StageGL on {} backend, {} texture units, {} cards per batch",
            backend.name(),
            bindings.texture_units,
            options.batch_size
        );
        let textures = TextureTable::new(bindings.texture_units, backend.max_texture_units());
        Ok(Self {
            backend,
            bindings,
            buffers: BatchBuffers::new(options.batch_size),
            textures,
            base_texture,
            render_pairs: HashMap::new(),
            released,
            target: None,
            batch_id: 1,
            draw_id: 0,
            is_drawing: 0,
            projection: Projection {
                width,
                height,
                flip_y: false,
            },
            clear_color: options.clear_color,
            stats: BatchStats::default(),
            vocal_debug: options.vocal_debug,
            antialias: options.antialias,
            transparent: options.transparent,
            cache_controlled: options.cache_controlled,
            tainted: false,
        })
    }

    pub(crate) fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub(crate) fn texture_units(&self) -> usize {
        self.bindings.texture_units
    }

    pub(crate) fn draw_id(&self) -> u64 {
        self.draw_id
    }

    pub(crate) fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub(crate) fn is_tainted(&self) -> bool {
        self.tainted
    }

    pub(crate) fn stats(&self) -> BatchStats {
        BatchStats {
            resident_textures: self.textures.len(),
            draw_id: self.draw_id,
            batch_id: self.batch_id,
            ..self.stats.clone()
        }
    }

    pub(crate) fn reset_stats(&mut self) {
        self.stats.reset();
    }

    /// Rebuilds the batch program for a new slot count.
    pub(crate) fn set_texture_units(&mut self, units: usize) -> Result<()> {
        self.flush(FlushReason::Final)?;
        self.bindings = compile_with_retry(self.backend.as_mut(), units, self.antialias)?;
        self.textures.resize_slots(self.bindings.texture_units);
        Ok(())
    }

    pub(crate) fn set_viewport(&mut self, width: u32, height: u32) {
        self.projection = Projection {
            width,
            height,
            flip_y: false,
        };
    }

    pub(crate) fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.backend.resize_target(width, height)?;
        self.set_viewport(width, height);
        self.tainted = false;
        Ok(())
    }

    /// Clears the default target to the clear color, opaque unless the
    /// renderer is transparent.
    pub(crate) fn clear(&mut self) -> Result<()> {
        self.bind_target(None)?;
        let color = if self.transparent {
            self.clear_color
        } else {
            self.clear_color.with_alpha(1.0)
        };
        self.backend.clear(color);
        self.tainted = false;
        Ok(())
    }

    /// Draws `root` onto the default target.
    /// Invalidated caches met on the way are re-rendered in place.
    pub(crate) fn draw(&mut self, scene: &mut Scene, root: NodeId) -> Result<()> {
        self.release_dropped_caches();
        let Some(node) = scene.node(root) else {
            return Err(StageError::UnknownNode(root));
        };
        let mtx = node.matrix();
        let alpha = node.alpha;
        self.bind_target(None)?;
        self.batch_draw(scene, root, &mtx, alpha, false)
    }

    fn bind_target(&mut self, target: Option<TextureHandle>) -> Result<()> {
        self.backend.set_render_target(target)?;
        self.target = target;
        Ok(())
    }

    pub(crate) fn protect_slot(&mut self, slot: usize, lock: bool) -> Result<()> {
        self.textures.protect(slot, lock)
    }

    pub(crate) fn read_screen(&mut self) -> Result<Surface> {
        let pixmap = self.backend.read_pixels(None)?;
        let mut surface = Surface::from_pixmap(pixmap);
        if self.tainted {
            surface.taint();
        }
        Ok(surface)
    }

    // -- batching --------------------------------------------------------

    fn batch_draw(
        &mut self,
        scene: &mut Scene,
        id: NodeId,
        mtx: &Transform2D,
        alpha: f64,
        ignore_cache: bool,
    ) -> Result<()> {
        if self.is_drawing > 0 {
            self.flush(FlushReason::Nested)?;
        }
        self.is_drawing += 1;
        self.draw_id += 1;
        let result = self
            .append_node(scene, id, mtx, alpha, ignore_cache)
            .and_then(|_| self.flush(FlushReason::Final));
        self.is_drawing -= 1;
        result
    }

    fn append_node(
        &mut self,
        scene: &mut Scene,
        id: NodeId,
        mtx: &Transform2D,
        alpha: f64,
        ignore_cache: bool,
    ) -> Result<()> {
        if !ignore_cache && scene.node(id).and_then(|n| n.cache()).is_some_and(|c| c.is_invalid()) {
            log::debug!("refreshing invalidated cache of {id:?} mid-draw");
            self.refresh_cache(scene, id)?;
        }

        let children = {
            let scene: &Scene = scene;
            let Some(node) = scene.node(id) else {
                return Ok(());
            };

            if !ignore_cache {
                if let Some(cache) = node.cache().filter(|c| c.cache_id() > 0) {
                    return match self.cache_card(id, cache) {
                        Some(card) => self.append_card(scene, card, mtx, alpha),
                        None => {
                            log::debug!("cache of {id:?} has no texture, skipped");
                            Ok(())
                        }
                    };
                }
            }

            if !matches!(node.kind, NodeKind::Container | NodeKind::Empty) {
                let card = match &node.kind {
                    NodeKind::Bitmap(bitmap) => scene.image(bitmap.image).and_then(|image| {
                        let (src, dst) = bitmap.clipped_source(image)?;
                        image_card(bitmap.image, image, dst, src)
                    }),
                    NodeKind::Sprite(sprite) => sprite.current().and_then(|frame| {
                        let image = scene.image(frame.image)?;
                        let dst = Rect::new(-frame.reg_x, -frame.reg_y, frame.rect.width, frame.rect.height);
                        image_card(frame.image, image, dst, frame.rect)
                    }),
                    kind => {
                        log::debug!("{} {id:?} needs a cache to draw with StageGL", kind.type_name());
                        None
                    }
                };
                return match card {
                    Some(card) => self.append_card(scene, card, mtx, alpha),
                    None => Ok(()),
                };
            }

            scene
                .children(id)
                .iter()
                .filter(|&&child| scene.is_visible(child))
                .filter_map(|&child| {
                    let child_node = scene.node(child)?;
                    let mut child_mtx = *mtx;
                    child_mtx.append_matrix(&child_node.matrix());
                    Some((child, child_mtx, alpha * child_node.alpha))
                })
                .collect::<Vec<_>>()
        };

        for (child, child_mtx, child_alpha) in children {
            self.append_node(scene, child, &child_mtx, child_alpha, false)?;
        }
        Ok(())
    }

    /// Re-renders the node's cache, putting it back on the node even when
    /// the render fails.
    pub(crate) fn refresh_cache(&mut self, scene: &mut Scene, id: NodeId) -> Result<()> {
        let node = scene.node_mut(id).ok_or(StageError::UnknownNode(id))?;
        let mut cache = node.cache.take().ok_or(StageError::NoCache)?;
        let result = self.render_cache(scene, id, &mut cache);
        if let Some(node) = scene.node_mut(id) {
            node.cache = Some(cache);
        }
        result
    }

    fn cache_card<'a>(&self, id: NodeId, cache: &'a BitmapCache) -> Option<Card<'a>> {
        if let Some(surface) = cache.surface() {
            return Some(Card {
                key: TextureKey::Cache(id),
                source: CardSource::Pixels {
                    pixmap: surface.pixmap(),
                    version: cache.cache_id(),
                },
                rect: cache.bounds(),
                uv: UvRect::FULL,
                tainted: surface.is_tainted(),
            });
        }
        let pair = self.render_pairs.get(&id)?;
        Some(Card {
            key: TextureKey::RenderTarget(id, pair.last?),
            source: CardSource::Resident,
            rect: cache.bounds(),
            uv: UvRect::FULL,
            tainted: pair.tainted,
        })
    }

    fn append_card(&mut self, scene: &Scene, card: Card<'_>, mtx: &Transform2D, alpha: f64) -> Result<()> {
        if self.buffers.is_full() {
            self.flush(FlushReason::VertexOverflow)?;
        }
        match self.make_resident(card.key, &card.source) {
            Ok(true) => {}
            Ok(false) => {
                log::debug!("{:?} is not resident, card skipped", card.key);
                return Ok(());
            }
            Err(err) if scene.strict() => return Err(err),
            Err(err) => {
                log::warn!("upload of {:?} failed, card skipped: {err}", card.key);
                return Ok(());
            }
        }
        let slot = self.bind_slot(card.key)?;
        self.buffers.push_card(mtx, card.rect, card.uv, slot, alpha as f32);
        if card.tainted {
            self.tainted = true;
        }
        Ok(())
    }

    /// Uploads the card's pixels if the table has no current copy. `false`
    /// when there is nothing to upload and nothing resident.
    fn make_resident(&mut self, key: TextureKey, source: &CardSource<'_>) -> Result<bool> {
        let resident = self.textures.get(key).map(|t| (t.handle, t.version, (t.width, t.height)));
        let (pixmap, version) = match (resident, source) {
            (Some(_), CardSource::Resident) => return Ok(true),
            (None, CardSource::Resident) => return Ok(false),
            (Some((_, current, size)), CardSource::Pixels { pixmap, version })
                if current == *version && size == (pixmap.width(), pixmap.height()) =>
            {
                return Ok(true)
            }
            (_, CardSource::Pixels { pixmap, version }) => (*pixmap, *version),
        };

        let handle = match resident {
            Some((handle, _, size)) if size == (pixmap.width(), pixmap.height()) => handle,
            Some((handle, _, _)) => {
                self.backend.resize_texture(handle, pixmap.width(), pixmap.height())?;
                handle
            }
            None => self.backend.create_texture(pixmap.width(), pixmap.height())?,
        };
        if let Err(err) = self.backend.upload_texture(handle, pixmap) {
            if resident.is_none() {
                self.backend.delete_texture(handle);
            }
            return Err(err);
        }
        match self.textures.get_mut(key) {
            Some(texture) => {
                texture.width = pixmap.width();
                texture.height = pixmap.height();
                texture.version = version;
            }
            None => self
                .textures
                .insert(key, ResidentTexture::new(handle, pixmap.width(), pixmap.height(), version)),
        }
        self.stats.record_upload();
        log::trace!("uploaded {key:?} ({}x{})", pixmap.width(), pixmap.height());
        Ok(true)
    }

    /// Puts the texture in a slot, flushing if every slot is taken by the
    /// current batch.
    fn bind_slot(&mut self, key: TextureKey) -> Result<usize> {
        let slot = match self.textures.bound_slot(key) {
            Some(slot) => slot,
            None => {
                let slot = match self.textures.find_free_slot(self.batch_id) {
                    Ok(slot) => slot,
                    Err(start) => {
                        self.flush(FlushReason::TextureOverflow)?;
                        self.textures.first_unprotected_from(start)
                    }
                };
                self.textures.assign(slot, key);
                slot
            }
        };
        self.textures.touch(key, self.draw_id, self.batch_id);
        Ok(slot)
    }

    fn flush(&mut self, reason: FlushReason) -> Result<()> {
        if self.buffers.is_empty() {
            return Ok(());
        }
        let cards = self.buffers.card_count();
        if self.vocal_debug {
            log::debug!("flush ({reason}): {cards} cards, batch {}", self.batch_id);
        } else {
            log::trace!("flush ({reason}): {cards} cards, batch {}", self.batch_id);
        }
        let slots = self.textures.slot_handles(self.base_texture);
        let result = self.backend.draw_batch(self.buffers.vertices(), &slots, self.projection);
        self.stats.record_flush(reason, cards);
        self.batch_id += 1;
        self.buffers.clear();
        result
    }

    // -- caches ------------------------------------------------------------

    /// Renders the node into its render textures and runs its filters.
    pub(crate) fn render_cache(&mut self, scene: &mut Scene, id: NodeId, cache: &mut BitmapCache) -> Result<()> {
        self.release_dropped_caches();
        let node = scene.node(id).ok_or(StageError::UnknownNode(id))?;
        cache.layout(filter_padding(&node.filters));

        // cards already batched belong to the outer target
        if self.is_drawing > 0 {
            self.flush(FlushReason::Nested)?;
        }
        let saved_target = self.target;
        let saved_slots = self.textures.backup_slots();
        let saved_projection = self.projection;
        let saved_tainted = std::mem::replace(&mut self.tainted, false);

        let result = self.render_cache_passes(scene, id, cache);

        let cache_tainted = self.tainted;
        self.textures.restore_slots(saved_slots);
        self.projection = saved_projection;
        self.tainted = saved_tainted;
        let reset = self.bind_target(saved_target);

        let side = result?;
        reset?;
        self.render_pairs.insert(
            id,
            RenderPair {
                last: Some(side),
                tainted: cache_tainted,
            },
        );

        if self.cache_controlled {
            let handle = self.render_texture(id, side, cache.draw_size())?;
            let mut surface = Surface::from_pixmap(self.backend.read_pixels(Some(handle))?);
            if cache_tainted {
                surface.taint();
            }
            cache.set_raster(surface);
        } else {
            cache.mark_texture();
        }
        Ok(())
    }

    /// Returns the side holding the finished image.
    fn render_cache_passes(&mut self, scene: &mut Scene, id: NodeId, cache: &BitmapCache) -> Result<RenderSide> {
        let size = cache.draw_size();
        let flips = self.backend.flips_render_targets();

        let mut current = self
            .render_pairs
            .get(&id)
            .and_then(|pair| pair.last)
            .map_or(RenderSide::A, RenderSide::other);
        let target = self.render_texture(id, current, size)?;
        self.bind_target(Some(target))?;
        self.projection = Projection {
            width: size.0,
            height: size.1,
            flip_y: flips,
        };
        self.backend.clear(Color::TRANSPARENT);
        if needs_raster(scene, id, true) {
            log::debug!("cache of {id:?} holds shapes or text, rendered on the CPU");
            let mut surface = Surface::new(size.0, size.1)?;
            let state = DrawState {
                transform: cache.render_transform(),
                ..DrawState::default()
            };
            scene.draw_node(id, &mut Canvas::new(&mut surface), &state, true);
            if surface.is_tainted() {
                self.tainted = true;
            }
            self.backend.upload_texture(target, surface.pixmap())?;
            self.stats.record_upload();
        } else {
            self.batch_draw(scene, id, &cache.render_transform(), 1.0, true)?;
            self.bind_target(Some(target))?;
        }

        let scene: &Scene = scene;
        let node = scene.node(id).ok_or(StageError::UnknownNode(id))?;
        // whether the current side is stored upside down
        let mut inverted = false;
        for filter in &node.filters {
            let source = self.render_texture(id, current, size)?;
            let dest = self.render_texture(id, current.other(), size)?;
            self.bind_target(Some(dest))?;

            if let Some(shader) = filter.shader() {
                if self.backend.draw_cover(source, Some(&shader), false)? {
                    self.stats.record_cover();
                    inverted ^= flips;
                    current = current.other();
                    continue;
                }
            }

            if self.tainted {
                if scene.strict() {
                    return Err(StageError::Tainted);
                }
                log::warn!("filter {filter:?} skipped on {id:?}: cache is tainted");
                continue;
            }
            let mut pixmap = self.backend.read_pixels(Some(source))?;
            if inverted {
                flip_rows(&mut pixmap);
            }
            let mut surface = Surface::from_pixmap(pixmap);
            if !surface.with_pixels(|px, w, h| filter.apply(px, w, h))? {
                log::debug!("filter {filter:?} rejected the cache of {id:?}");
                continue;
            }
            self.backend.upload_texture(dest, surface.pixmap())?;
            self.stats.record_upload();
            inverted = false;
            current = current.other();
        }

        if inverted {
            let source = self.render_texture(id, current, size)?;
            let dest = self.render_texture(id, current.other(), size)?;
            self.bind_target(Some(dest))?;
            self.backend.draw_cover(source, None, !flips)?;
            self.stats.record_cover();
            current = current.other();
        }
        Ok(current)
    }

    /// The node's render texture on `side`, created or resized to `size`.
    fn render_texture(&mut self, id: NodeId, side: RenderSide, size: (u32, u32)) -> Result<TextureHandle> {
        let (width, height) = size;
        let key = TextureKey::RenderTarget(id, side);
        let render_err = |err: StageError| StageError::RenderTexture(err.to_string());
        if let Some(texture) = self.textures.get(key) {
            let handle = texture.handle;
            if (texture.width, texture.height) != size {
                self.backend.resize_texture(handle, width, height).map_err(render_err)?;
                if let Some(texture) = self.textures.get_mut(key) {
                    texture.width = width;
                    texture.height = height;
                }
            }
            return Ok(handle);
        }
        let handle = self.backend.create_texture(width, height).map_err(render_err)?;
        self.textures.insert(key, ResidentTexture::new(handle, width, height, 0));
        log::debug!("render texture {key:?} created ({width}x{height})");
        Ok(handle)
    }

    /// The render texture a new cache render of `id` would draw into.
    pub(crate) fn target_render_texture(&mut self, id: NodeId, width: u32, height: u32) -> Result<TextureHandle> {
        let side = self
            .render_pairs
            .get(&id)
            .and_then(|pair| pair.last)
            .map_or(RenderSide::A, RenderSide::other);
        self.render_texture(id, side, (width, height))
    }

    /// Frees the node's render textures and uploaded cache surface.
    pub(crate) fn release_cache(&mut self, id: NodeId) {
        self.render_pairs.remove(&id);
        for key in [
            TextureKey::RenderTarget(id, RenderSide::A),
            TextureKey::RenderTarget(id, RenderSide::B),
            TextureKey::Cache(id),
        ] {
            self.kill_texture(key);
        }
    }

    // -- residency -------------------------------------------------------

    /// Evicts textures unused for more than `count` draws.
    pub(crate) fn purge(&mut self, count: u64) {
        self.release_dropped_caches();
        let stale = self.textures.stale(self.draw_id, count);
        if !stale.is_empty() {
            log::debug!("purging {} textures unused for {count} draws", stale.len());
        }
        for key in stale {
            self.kill_texture(key);
        }
    }

    /// Frees the GPU side of every cache the scene dropped since the last
    /// call.
    fn release_dropped_caches(&mut self) {
        let released = std::mem::take(&mut *self.released.borrow_mut());
        for id in released {
            log::trace!("cache of {id:?} dropped by the scene");
            self.release_cache(id);
        }
    }

    pub(crate) fn release_image(&mut self, image: ImageId) {
        self.kill_texture(TextureKey::Image(image));
    }

    fn kill_texture(&mut self, key: TextureKey) {
        if let Some(texture) = self.textures.remove(key) {
            self.backend.delete_texture(texture.handle);
            self.stats.record_eviction();
            log::trace!("evicted {key:?}");
        }
    }
}

impl std::fmt::Debug for GlContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlContext")
            .field("backend", &self.backend.name())
            .field("texture_units", &self.bindings.texture_units)
            .field("textures", &self.textures.len())
            .field("draw_id", &self.draw_id)
            .field("batch_id", &self.batch_id)
            .finish_non_exhaustive()
    }
}

/// Card for a loaded image. `None` until the image has pixels.
fn image_card<'a>(id: ImageId, image: &'a ImageSource, dst: Rect, src: Rect) -> Option<Card<'a>> {
    let pixmap = image.pixmap()?;
    Some(Card {
        key: TextureKey::Image(id),
        source: CardSource::Pixels {
            pixmap,
            version: image.version(),
        },
        rect: dst,
        uv: UvRect::from_texels(src, image.width(), image.height()),
        tainted: !image.origin_clean(),
    })
}

/// Whether the subtree has uncached leaves only the raster path can draw.
fn needs_raster(scene: &Scene, id: NodeId, ignore_cache: bool) -> bool {
    let Some(node) = scene.node(id) else {
        return false;
    };
    if !ignore_cache && node.is_cached() {
        return false;
    }
    match &node.kind {
        NodeKind::Shape(_) | NodeKind::Text(_) => true,
        NodeKind::Container => scene
            .children(id)
            .iter()
            .any(|&child| scene.is_visible(child) && needs_raster(scene, child, false)),
        _ => false,
    }
}

/// Compiles the batch program, dropping texture units after each failure.
/// Failing with a single unit is fatal.
fn compile_with_retry(backend: &mut dyn GpuBackend, requested: usize, antialias: bool) -> Result<ShaderBindings> {
    let mut units = requested.min(backend.max_texture_units()).max(1);
    loop {
        match backend.compile(ProgramDesc {
            texture_units: units,
            antialias,
        }) {
            Ok(bindings) => return Ok(bindings),
            Err(err) if units > 1 => {
                let next = units.saturating_sub(UNIT_RETRY_STEP).max(1);
                log::warn!("batch program failed with {units} texture units, retrying with {next}: {err}");
                units = next;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Mirrors the pixmap vertically in place.
fn flip_rows(pixmap: &mut Pixmap) {
    let stride = pixmap.width() as usize * 4;
    let height = pixmap.height() as usize;
    let data = pixmap.data_mut();
    for row in 0..height / 2 {
        let (top, bottom) = data.split_at_mut((height - 1 - row) * stride);
        top[row * stride..(row + 1) * stride].swap_with_slice(&mut bottom[..stride]);
    }
}
