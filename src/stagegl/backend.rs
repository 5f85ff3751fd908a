//! The rasterizer interface StageGL batches against.

use resvg::tiny_skia::Pixmap;

use super::batch::BatchVertex;
use crate::color::Color;
use crate::error::Result;
use crate::filters::FilterShader;

/// Opaque texture name handed out by a backend.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(u64);

impl TextureHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// How batch positions map onto the current target.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Projection {
    pub width: u32,
    pub height: u32,
    /// Mirror vertically, `y' = height - y`.
    pub flip_y: bool,
}

/// Parameters of the batch program.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ProgramDesc {
    pub texture_units: usize,
    /// Bilinear sampling for cards that are not pixel aligned.
    pub antialias: bool,
}

/// What a compiled batch program expects, returned by
/// [`GpuBackend::compile`] and kept next to the program rather than on it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderBindings {
    pub texture_units: usize,
    /// Bytes per vertex.
    pub vertex_stride: usize,
    /// Vertex attribute names by shader location.
    pub attributes: [&'static str; 4],
    /// Binding of the sampler, right after the texture bindings.
    pub sampler_binding: u32,
    /// Binding of the projection uniform.
    pub projection_binding: u32,
}

impl ShaderBindings {
    pub fn for_units(texture_units: usize) -> Self {
        Self {
            texture_units,
            vertex_stride: std::mem::size_of::<BatchVertex>(),
            attributes: ["position", "uv", "texture_index", "alpha"],
            sampler_binding: texture_units as u32,
            projection_binding: texture_units as u32 + 1,
        }
    }
}

/// A rasterizer that can draw textured card batches into a default target
/// or into textures.
///
/// Textures hold premultiplied RGBA. Every draw composites source-over.
pub trait GpuBackend {
    fn name(&self) -> &str;

    /// Most texture slots a program may sample at once.
    fn max_texture_units(&self) -> usize;

    /// Largest width or height a texture may have.
    fn max_texture_size(&self) -> u32;

    /// Whether drawing into a render texture stores rows bottom-up, so that
    /// every pass through a texture mirrors the image.
    fn flips_render_targets(&self) -> bool {
        false
    }

    /// Builds the batch program. Fails when the program cannot be built for
    /// that many texture units.
    fn compile(&mut self, program: ProgramDesc) -> Result<ShaderBindings>;

    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureHandle>;

    /// Replaces the texture's pixels, resizing it to the pixmap.
    fn upload_texture(&mut self, texture: TextureHandle, pixmap: &Pixmap) -> Result<()>;

    /// Resizes and clears the texture. Does nothing if the size is unchanged.
    fn resize_texture(&mut self, texture: TextureHandle, width: u32, height: u32) -> Result<()>;

    fn delete_texture(&mut self, texture: TextureHandle);

    fn texture_size(&self, texture: TextureHandle) -> Option<(u32, u32)>;

    /// Resizes the default target, clearing it.
    fn resize_target(&mut self, width: u32, height: u32) -> Result<()>;

    fn target_size(&self) -> (u32, u32);

    /// Redirects drawing into a texture, or back to the default target.
    fn set_render_target(&mut self, target: Option<TextureHandle>) -> Result<()>;

    /// Fills the current target.
    fn clear(&mut self, color: Color);

    /// Draws every card in `vertices`, six vertices each. A card samples
    /// `slots[texture_index]`.
    fn draw_batch(
        &mut self,
        vertices: &[BatchVertex],
        slots: &[TextureHandle],
        projection: Projection,
    ) -> Result<()>;

    /// Clears the current target and stretches `source` over all of it,
    /// through `shader` when given. Returns `false` if the backend cannot
    /// run that shader; the target is left untouched then.
    fn draw_cover(
        &mut self,
        source: TextureHandle,
        shader: Option<&FilterShader>,
        flip_y: bool,
    ) -> Result<bool>;

    /// Copies a texture, or the default target, back to the CPU.
    fn read_pixels(&mut self, target: Option<TextureHandle>) -> Result<Pixmap>;
}
