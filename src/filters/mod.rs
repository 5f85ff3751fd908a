//! Post-processing filters applied when a node's cache is rendered.
//!
//! Each filter works on a straight-alpha RGBA buffer in place. Filters that
//! enlarge the drawn area (blur) report the extra padding through
//! [`Filter::bounds`]; the cache grows its surface by the union of those
//! rects before drawing.

pub mod alpha_map;
pub mod blur;
pub mod color;
pub mod color_matrix;

pub use alpha_map::AlphaMapFilter;
pub use blur::BlurFilter;
pub use color::ColorFilter;
pub use color_matrix::ColorMatrixFilter;

use crate::geom::Rect;

/// Fragment stage a GPU backend can run instead of [`Filter::apply`].
#[derive(Debug, Clone, PartialEq)]
pub struct FilterShader {
    /// WGSL statements reading and reassigning `color` (straight alpha,
    /// 0..1). `params` is an `array<vec4<f32>, 8>` uniform.
    pub body: String,
    /// At most [`FilterShader::MAX_PARAMS`] values; missing ones are zero.
    pub params: Vec<[f32; 4]>,
}

impl FilterShader {
    pub const MAX_PARAMS: usize = 8;

    pub fn new(body: impl Into<String>, params: Vec<[f32; 4]>) -> Self {
        Self {
            body: body.into(),
            params,
        }
    }

    /// Params padded with zeros to the uniform array length.
    pub fn padded_params(&self) -> [[f32; 4]; Self::MAX_PARAMS] {
        let mut out = [[0.0; 4]; Self::MAX_PARAMS];
        for (slot, p) in out.iter_mut().zip(&self.params) {
            *slot = *p;
        }
        out
    }
}

pub trait Filter {
    /// Transforms `pixels` in place. Returns `false` when the filter could not
    /// run; the buffer is then left as it was.
    fn apply(&self, pixels: &mut [u8], width: u32, height: u32) -> bool;

    /// Extra area this filter draws into, relative to the unfiltered rect.
    fn bounds(&self) -> Option<Rect> {
        None
    }

    /// GPU equivalent of [`Filter::apply`], if there is one.
    fn shader(&self) -> Option<FilterShader> {
        None
    }

    fn box_clone(&self) -> Box<dyn Filter>;
}

impl Clone for Box<dyn Filter> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

impl std::fmt::Debug for dyn Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter")
            .field("bounds", &self.bounds())
            .finish_non_exhaustive()
    }
}

/// Union of every filter's padding rect, starting from an empty rect at the
/// origin.
pub fn filter_padding(filters: &[Box<dyn Filter>]) -> Rect {
    let mut out = Rect::default();
    for b in filters.iter().filter_map(|f| f.bounds()) {
        out.extend(b.x, b.y, b.width, b.height);
    }
    out
}

pub(crate) fn clamp_channel(v: f64) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}
