//! CPU rasterizer implementing [`GpuBackend`] with tiny-skia.
//!
//! Each card becomes a quad path filled with a pattern of its texture. The
//! pattern transform is solved from three of the card's corners, so any
//! affine placement works. Filter shaders are not supported; StageGL runs
//! those filters on the CPU instead.

use std::collections::HashMap;

use resvg::tiny_skia::{
    FillRule, FilterQuality, Paint, PathBuilder, Pattern, Pixmap, PixmapPaint, SpreadMode,
    Transform,
};

use super::backend::{GpuBackend, ProgramDesc, Projection, ShaderBindings, TextureHandle};
use super::batch::{BatchVertex, VERTICES_PER_CARD};
use crate::color::Color;
use crate::error::{Result, StageError};
use crate::filters::FilterShader;
use crate::raster::is_pixel_aligned;

const SCREEN: TextureHandle = TextureHandle::new(0);

pub struct SoftwareBackend {
    /// Every texture, the default target included under [`SCREEN`].
    pixmaps: HashMap<TextureHandle, Pixmap>,
    next_id: u64,
    render_target: Option<TextureHandle>,
    max_units: usize,
    compile_limit: usize,
    max_texture_size: u32,
    flipped_targets: bool,
    program: Option<ProgramDesc>,
    draw_calls: usize,
}

impl SoftwareBackend {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let screen = new_pixmap(width, height)?;
        Ok(Self {
            pixmaps: HashMap::from([(SCREEN, screen)]),
            next_id: 1,
            render_target: None,
            max_units: 16,
            compile_limit: usize::MAX,
            max_texture_size: 8192,
            flipped_targets: false,
            program: None,
            draw_calls: 0,
        })
    }

    pub fn with_max_texture_units(mut self, units: usize) -> Self {
        self.max_units = units.max(1);
        self
    }

    /// Programs with more texture units than this fail to compile.
    pub fn with_compile_limit(mut self, units: usize) -> Self {
        self.compile_limit = units;
        self
    }

    pub fn with_max_texture_size(mut self, size: u32) -> Self {
        self.max_texture_size = size.max(1);
        self
    }

    /// Store render textures bottom-up, the way GL framebuffers do.
    pub fn with_flipped_targets(mut self, flipped: bool) -> Self {
        self.flipped_targets = flipped;
        self
    }

    /// Batches and covers drawn so far.
    pub fn draw_calls(&self) -> usize {
        self.draw_calls
    }

    /// Live textures, the default target excluded.
    pub fn texture_count(&self) -> usize {
        self.pixmaps.len() - 1
    }

    fn current(&self) -> TextureHandle {
        self.render_target.unwrap_or(SCREEN)
    }

    /// Whether the current target mirrors what is drawn into it.
    fn target_flips(&self) -> bool {
        self.render_target.is_some() && self.flipped_targets
    }

    fn take_target(&mut self) -> Result<(TextureHandle, Pixmap)> {
        let handle = self.current();
        let pixmap = self
            .pixmaps
            .remove(&handle)
            .ok_or_else(|| StageError::Gpu(format!("render target {handle:?} is gone")))?;
        Ok((handle, pixmap))
    }

    /// `scale` maps viewport units onto target pixels.
    fn draw_card(
        &self,
        target: &mut Pixmap,
        card: &[BatchVertex],
        slots: &[TextureHandle],
        scale: (f32, f32),
        flip: bool,
        antialias: bool,
    ) {
        let slot = card[0].texture_index as usize;
        let Some(texture) = slots.get(slot).and_then(|h| self.pixmaps.get(h)) else {
            log::trace!("card samples unbound slot {slot}");
            return;
        };
        let alpha = card[0].alpha.clamp(0.0, 1.0);
        if alpha <= 0.0 {
            return;
        }

        let height = target.height() as f32;
        let place = |v: &BatchVertex| {
            let [x, y] = v.position;
            let (x, y) = (x * scale.0, y * scale.1);
            if flip {
                (x, height - y)
            } else {
                (x, y)
            }
        };
        let (lt, lb, rt, rb) = (place(&card[0]), place(&card[1]), place(&card[2]), place(&card[5]));

        let (tw, th) = (texture.width() as f32, texture.height() as f32);
        let du = (card[2].uv[0] - card[0].uv[0]) * tw;
        let dv = (card[1].uv[1] - card[0].uv[1]) * th;
        if du == 0.0 || dv == 0.0 {
            return;
        }
        let sx = (rt.0 - lt.0) / du;
        let ky = (rt.1 - lt.1) / du;
        let kx = (lb.0 - lt.0) / dv;
        let sy = (lb.1 - lt.1) / dv;
        let (px, py) = (card[0].uv[0] * tw, card[0].uv[1] * th);
        let pattern_ts = Transform::from_row(
            sx,
            ky,
            kx,
            sy,
            lt.0 - (sx * px + kx * py),
            lt.1 - (ky * px + sy * py),
        );

        let mut pb = PathBuilder::new();
        pb.move_to(lt.0, lt.1);
        pb.line_to(rt.0, rt.1);
        pb.line_to(rb.0, rb.1);
        pb.line_to(lb.0, lb.1);
        pb.close();
        let Some(path) = pb.finish() else {
            return;
        };

        let smooth = antialias && !is_pixel_aligned(&pattern_ts);
        let quality = if smooth {
            FilterQuality::Bilinear
        } else {
            FilterQuality::Nearest
        };
        let paint = Paint {
            shader: Pattern::new(texture.as_ref(), SpreadMode::Pad, quality, alpha, pattern_ts),
            anti_alias: smooth,
            ..Paint::default()
        };
        target.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
    }
}

fn new_pixmap(width: u32, height: u32) -> Result<Pixmap> {
    Pixmap::new(width.max(1), height.max(1)).ok_or(StageError::InvalidSize { width, height })
}

impl GpuBackend for SoftwareBackend {
    fn name(&self) -> &str {
        "software"
    }

    fn max_texture_units(&self) -> usize {
        self.max_units
    }

    fn max_texture_size(&self) -> u32 {
        self.max_texture_size
    }

    fn flips_render_targets(&self) -> bool {
        self.flipped_targets
    }

    fn compile(&mut self, program: ProgramDesc) -> Result<ShaderBindings> {
        let units = program.texture_units;
        if units > self.compile_limit || units > self.max_units || units == 0 {
            return Err(StageError::ShaderCompile {
                units,
                message: format!(
                    "{units} samplers requested, program limit is {}",
                    self.compile_limit.min(self.max_units)
                ),
            });
        }
        self.program = Some(program);
        Ok(ShaderBindings::for_units(units))
    }

    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureHandle> {
        if width > self.max_texture_size || height > self.max_texture_size {
            return Err(StageError::Gpu(format!(
                "texture {width}x{height} exceeds {}",
                self.max_texture_size
            )));
        }
        let handle = TextureHandle::new(self.next_id);
        self.next_id += 1;
        self.pixmaps.insert(handle, new_pixmap(width, height)?);
        Ok(handle)
    }

    fn upload_texture(&mut self, texture: TextureHandle, pixmap: &Pixmap) -> Result<()> {
        let slot = self
            .pixmaps
            .get_mut(&texture)
            .ok_or_else(|| StageError::Gpu(format!("upload to unknown texture {texture:?}")))?;
        *slot = pixmap.clone();
        Ok(())
    }

    fn resize_texture(&mut self, texture: TextureHandle, width: u32, height: u32) -> Result<()> {
        let slot = self
            .pixmaps
            .get_mut(&texture)
            .ok_or_else(|| StageError::Gpu(format!("resize of unknown texture {texture:?}")))?;
        if (slot.width(), slot.height()) != (width.max(1), height.max(1)) {
            *slot = new_pixmap(width, height)?;
        }
        Ok(())
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        if texture == SCREEN {
            return;
        }
        self.pixmaps.remove(&texture);
        if self.render_target == Some(texture) {
            self.render_target = None;
        }
    }

    fn texture_size(&self, texture: TextureHandle) -> Option<(u32, u32)> {
        self.pixmaps.get(&texture).map(|p| (p.width(), p.height()))
    }

    fn resize_target(&mut self, width: u32, height: u32) -> Result<()> {
        self.pixmaps.insert(SCREEN, new_pixmap(width, height)?);
        Ok(())
    }

    fn target_size(&self) -> (u32, u32) {
        self.texture_size(SCREEN).unwrap_or((0, 0))
    }

    fn set_render_target(&mut self, target: Option<TextureHandle>) -> Result<()> {
        if let Some(handle) = target {
            if !self.pixmaps.contains_key(&handle) {
                return Err(StageError::Gpu(format!("unknown render target {handle:?}")));
            }
        }
        self.render_target = target;
        Ok(())
    }

    fn clear(&mut self, color: Color) {
        let handle = self.current();
        if let Some(pixmap) = self.pixmaps.get_mut(&handle) {
            pixmap.fill(color.to_skia());
        }
    }

    fn draw_batch(
        &mut self,
        vertices: &[BatchVertex],
        slots: &[TextureHandle],
        projection: Projection,
    ) -> Result<()> {
        let antialias = self.program.is_some_and(|p| p.antialias);
        let flip = projection.flip_y ^ self.target_flips();
        let (handle, mut target) = self.take_target()?;
        let scale = (
            target.width() as f32 / projection.width.max(1) as f32,
            target.height() as f32 / projection.height.max(1) as f32,
        );
        for card in vertices.chunks_exact(VERTICES_PER_CARD) {
            self.draw_card(&mut target, card, slots, scale, flip, antialias);
        }
        self.pixmaps.insert(handle, target);
        self.draw_calls += 1;
        Ok(())
    }

    fn draw_cover(
        &mut self,
        source: TextureHandle,
        shader: Option<&FilterShader>,
        flip_y: bool,
    ) -> Result<bool> {
        if shader.is_some() {
            return Ok(false);
        }
        if source == self.current() {
            return Err(StageError::Gpu("a texture cannot be drawn into itself".into()));
        }
        let flip = flip_y ^ self.target_flips();
        let (handle, mut target) = self.take_target()?;
        if let Some(src) = self.pixmaps.get(&source) {
            let sx = target.width() as f32 / src.width() as f32;
            let sy = target.height() as f32 / src.height() as f32;
            let ts = if flip {
                Transform::from_row(sx, 0.0, 0.0, -sy, 0.0, target.height() as f32)
            } else {
                Transform::from_scale(sx, sy)
            };
            target.fill(resvg::tiny_skia::Color::TRANSPARENT);
            let paint = PixmapPaint {
                quality: FilterQuality::Nearest,
                ..PixmapPaint::default()
            };
            target.draw_pixmap(0, 0, src.as_ref(), &paint, ts, None);
        }
        self.pixmaps.insert(handle, target);
        self.draw_calls += 1;
        Ok(true)
    }

    fn read_pixels(&mut self, target: Option<TextureHandle>) -> Result<Pixmap> {
        let handle = target.unwrap_or(SCREEN);
        self.pixmaps
            .get(&handle)
            .cloned()
            .ok_or_else(|| StageError::Gpu(format!("read from unknown texture {handle:?}")))
    }
}

impl std::fmt::Debug for SoftwareBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareBackend")
            .field("target_size", &self.target_size())
            .field("textures", &self.texture_count())
            .field("max_units", &self.max_units)
            .field("flipped_targets", &self.flipped_targets)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Rect;
    use crate::stagegl::batch::{BatchBuffers, UvRect};
    use crate::transform::Transform2D;

    fn checker() -> Pixmap {
        // 2x2: red, green / blue, white
        let mut p = Pixmap::new(2, 2).unwrap();
        let px = [
            [255, 0, 0, 255],
            [0, 255, 0, 255],
            [0, 0, 255, 255],
            [255, 255, 255, 255],
        ];
        for (dst, src) in p.data_mut().chunks_exact_mut(4).zip(px) {
            dst.copy_from_slice(&src);
        }
        p
    }

    fn rgba(p: &Pixmap, x: u32, y: u32) -> [u8; 4] {
        let c = p.pixel(x, y).unwrap();
        [c.red(), c.green(), c.blue(), c.alpha()]
    }

    fn backend_with_checker() -> (SoftwareBackend, TextureHandle) {
        let mut backend = SoftwareBackend::new(8, 8).unwrap();
        backend.compile(ProgramDesc { texture_units: 2, antialias: false }).unwrap();
        let tex = backend.create_texture(2, 2).unwrap();
        backend.upload_texture(tex, &checker()).unwrap();
        (backend, tex)
    }

    const PROJ: Projection = Projection {
        width: 8,
        height: 8,
        flip_y: false,
    };

    #[test]
    fn test_card_is_scaled_into_place() {
        let (mut backend, tex) = backend_with_checker();
        let mut buffers = BatchBuffers::new(4);
        let mut mtx = Transform2D::IDENTITY;
        mtx.scale(2.0, 2.0);
        buffers.push_card(&mtx, Rect::new(0.0, 0.0, 2.0, 2.0), UvRect::FULL, 1, 1.0);
        backend.draw_batch(buffers.vertices(), &[SCREEN, tex], PROJ).unwrap();

        let out = backend.read_pixels(None).unwrap();
        assert_eq!(rgba(&out, 1, 1), [255, 0, 0, 255]);
        assert_eq!(rgba(&out, 3, 0), [0, 255, 0, 255]);
        assert_eq!(rgba(&out, 0, 3), [0, 0, 255, 255]);
        assert_eq!(rgba(&out, 3, 3), [255, 255, 255, 255]);
        assert_eq!(rgba(&out, 5, 5), [0, 0, 0, 0]);
    }

    #[test]
    fn test_viewport_smaller_than_target_scales_up() {
        let (mut backend, tex) = backend_with_checker();
        let mut buffers = BatchBuffers::new(1);
        buffers.push_card(&Transform2D::IDENTITY, Rect::new(0.0, 0.0, 2.0, 2.0), UvRect::FULL, 0, 1.0);
        let proj = Projection { width: 4, height: 4, ..PROJ };
        backend.draw_batch(buffers.vertices(), &[tex], proj).unwrap();

        let out = backend.read_pixels(None).unwrap();
        assert_eq!(rgba(&out, 1, 1), [255, 0, 0, 255]);
        assert_eq!(rgba(&out, 3, 3), [255, 255, 255, 255]);
        assert_eq!(rgba(&out, 5, 5), [0, 0, 0, 0]);
    }

    #[test]
    fn test_uv_subrect_and_alpha() {
        let (mut backend, tex) = backend_with_checker();
        let mut buffers = BatchBuffers::new(1);
        let uv = UvRect::from_texels(Rect::new(1.0, 1.0, 1.0, 1.0), 2, 2);
        buffers.push_card(&Transform2D::IDENTITY, Rect::new(0.0, 0.0, 1.0, 1.0), uv, 0, 0.5);
        backend.draw_batch(buffers.vertices(), &[tex], PROJ).unwrap();

        let out = backend.read_pixels(None).unwrap();
        let px = rgba(&out, 0, 0);
        assert!((127..=128).contains(&px[3]));
        assert_eq!(px[0], px[3]);
    }

    #[test]
    fn test_projection_flip() {
        let (mut backend, tex) = backend_with_checker();
        let mut buffers = BatchBuffers::new(1);
        buffers.push_card(&Transform2D::IDENTITY, Rect::new(0.0, 0.0, 2.0, 2.0), UvRect::FULL, 0, 1.0);
        let proj = Projection { flip_y: true, ..PROJ };
        backend.draw_batch(buffers.vertices(), &[tex], proj).unwrap();

        let out = backend.read_pixels(None).unwrap();
        // top row of the texture lands on the bottom row of the target
        assert_eq!(rgba(&out, 0, 7), [255, 0, 0, 255]);
        assert_eq!(rgba(&out, 0, 6), [0, 0, 255, 255]);
    }

    #[test]
    fn test_cover_into_flipped_target_mirrors() {
        let mut flipped = SoftwareBackend::new(2, 2).unwrap().with_flipped_targets(true);
        let src = flipped.create_texture(2, 2).unwrap();
        flipped.upload_texture(src, &checker()).unwrap();
        let dst = flipped.create_texture(2, 2).unwrap();
        flipped.set_render_target(Some(dst)).unwrap();
        assert!(flipped.draw_cover(src, None, false).unwrap());
        let out = flipped.read_pixels(Some(dst)).unwrap();
        assert_eq!(rgba(&out, 0, 0), [0, 0, 255, 255]);

        // plain targets copy upright
        let (mut backend, tex) = backend_with_checker();
        let dst = backend.create_texture(2, 2).unwrap();
        backend.set_render_target(Some(dst)).unwrap();
        backend.draw_cover(tex, None, false).unwrap();
        assert_eq!(rgba(&backend.read_pixels(Some(dst)).unwrap(), 0, 0), [255, 0, 0, 255]);
    }

    #[test]
    fn test_cover_rejects_shaders_and_self_copies() {
        let (mut backend, tex) = backend_with_checker();
        let shader = FilterShader::new("", Vec::new());
        assert!(!backend.draw_cover(tex, Some(&shader), false).unwrap());
        backend.set_render_target(Some(tex)).unwrap();
        assert!(backend.draw_cover(tex, None, false).is_err());
    }

    #[test]
    fn test_compile_limit() {
        let mut backend = SoftwareBackend::new(1, 1).unwrap().with_compile_limit(4);
        assert!(backend.compile(ProgramDesc { texture_units: 8, antialias: false }).is_err());
        let bindings = backend.compile(ProgramDesc { texture_units: 4, antialias: false }).unwrap();
        assert_eq!(bindings.sampler_binding, 4);
    }

    #[test]
    fn test_oversized_texture_rejected() {
        let mut backend = SoftwareBackend::new(1, 1).unwrap().with_max_texture_size(16);
        assert!(backend.create_texture(17, 1).is_err());
        let tex = backend.create_texture(16, 16).unwrap();
        assert_eq!(backend.texture_count(), 1);
        backend.delete_texture(tex);
        assert_eq!(backend.texture_count(), 0);
    }
}
