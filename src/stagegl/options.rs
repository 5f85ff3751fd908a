use crate::color::Color;

/// Cards a batch holds before it is flushed.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 10_000;

/// Texture slots requested when compiling the batch program.
pub const DEFAULT_TEXTURE_UNITS: usize = 8;

/// Draws a texture may go unused before [`StageGL::purge_textures`] evicts it
/// when no count is given.
///
/// [`StageGL::purge_textures`]: super::StageGL::purge_textures
pub const DEFAULT_PURGE_COUNT: u64 = 100;

/// Construction options for [`StageGL`](super::StageGL).
#[derive(Debug, Clone, PartialEq)]
pub struct StageGLOptions {
    /// Sample non-pixel-aligned cards bilinearly. Nearest otherwise.
    pub antialias: bool,
    /// Keep the clear color's alpha. When false the target is cleared opaque.
    pub transparent: bool,
    /// Never clear the target in `update`, whatever `auto_clear` says.
    pub preserve_buffer: bool,
    /// Purge textures unused for this many draws, checked every half period.
    pub auto_purge: Option<u32>,
    pub batch_size: usize,
    pub texture_units: usize,
    pub clear_color: Color,
    /// Log every flush at debug instead of trace.
    pub vocal_debug: bool,
    /// Render caches into the renderer's own target and read them back as
    /// raster surfaces instead of keeping them as render textures.
    pub cache_controlled: bool,
}

impl Default for StageGLOptions {
    fn default() -> Self {
        Self {
            antialias: false,
            transparent: false,
            preserve_buffer: false,
            auto_purge: Some(1200),
            batch_size: DEFAULT_MAX_BATCH_SIZE,
            texture_units: DEFAULT_TEXTURE_UNITS,
            clear_color: Color::TRANSPARENT,
            vocal_debug: false,
            cache_controlled: false,
        }
    }
}

impl StageGLOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_antialias(mut self, antialias: bool) -> Self {
        self.antialias = antialias;
        self
    }

    pub fn with_transparent(mut self, transparent: bool) -> Self {
        self.transparent = transparent;
        self
    }

    pub fn with_preserve_buffer(mut self, preserve: bool) -> Self {
        self.preserve_buffer = preserve;
        self
    }

    pub fn with_auto_purge(mut self, auto_purge: Option<u32>) -> Self {
        self.auto_purge = auto_purge;
        self
    }

    /// Clamped to at least one card.
    pub fn with_batch_size(mut self, cards: usize) -> Self {
        self.batch_size = cards.max(1);
        self
    }

    pub fn with_texture_units(mut self, units: usize) -> Self {
        self.texture_units = units.max(1);
        self
    }

    pub fn with_clear_color(mut self, color: Color) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_vocal_debug(mut self, vocal: bool) -> Self {
        self.vocal_debug = vocal;
        self
    }

    pub fn with_cache_controlled(mut self, controlled: bool) -> Self {
        self.cache_controlled = controlled;
        self
    }
}
