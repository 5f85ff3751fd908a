use super::{clamp_channel, Filter, FilterShader};

/// A 4x5 color transform. Row `i` produces output channel `i` (r, g, b, a)
/// from `r, g, b, a` and a constant in 0..255 channel units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorMatrixFilter {
    pub matrix: [f64; 20],
}

const IDENTITY: [f64; 20] = [
    1.0, 0.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 0.0, 1.0, 0.0,
];

// Luminance weights for desaturation.
const LUMA_R: f64 = 0.3086;
const LUMA_G: f64 = 0.6094;
const LUMA_B: f64 = 0.0820;

impl Default for ColorMatrixFilter {
    fn default() -> Self {
        Self { matrix: IDENTITY }
    }
}

impl ColorMatrixFilter {
    pub fn new(matrix: [f64; 20]) -> Self {
        Self { matrix }
    }

    /// Adds `value` (-255..255) to each color channel.
    pub fn brightness(value: f64) -> Self {
        let v = value.clamp(-255.0, 255.0);
        let mut m = IDENTITY;
        m[4] = v;
        m[9] = v;
        m[14] = v;
        Self::new(m)
    }

    /// 0 is greyscale, 1 leaves colors unchanged, above 1 oversaturates.
    pub fn saturation(value: f64) -> Self {
        let s = value.max(0.0);
        let inv = 1.0 - s;
        let (r, g, b) = (inv * LUMA_R, inv * LUMA_G, inv * LUMA_B);
        Self::new([
            r + s, g, b, 0.0, 0.0, //
            r, g + s, b, 0.0, 0.0, //
            r, g, b + s, 0.0, 0.0, //
            0.0, 0.0, 0.0, 1.0, 0.0,
        ])
    }

    /// Scales color channels around mid-grey; 1 leaves them unchanged.
    pub fn contrast(value: f64) -> Self {
        let c = value.max(0.0);
        let offset = 128.0 * (1.0 - c);
        Self::new([
            c, 0.0, 0.0, 0.0, offset, //
            0.0, c, 0.0, 0.0, offset, //
            0.0, 0.0, c, 0.0, offset, //
            0.0, 0.0, 0.0, 1.0, 0.0,
        ])
    }

    /// Applies `other` after this matrix.
    pub fn then(&self, other: &ColorMatrixFilter) -> Self {
        let (a, b) = (&other.matrix, &self.matrix);
        let mut out = [0.0; 20];
        for row in 0..4 {
            for col in 0..5 {
                let mut v = (0..4).map(|k| a[row * 5 + k] * b[k * 5 + col]).sum::<f64>();
                if col == 4 {
                    v += a[row * 5 + 4];
                }
                out[row * 5 + col] = v;
            }
        }
        Self::new(out)
    }
}

impl Filter for ColorMatrixFilter {
    fn apply(&self, pixels: &mut [u8], _width: u32, _height: u32) -> bool {
        let m = &self.matrix;
        for px in pixels.chunks_exact_mut(4) {
            let (r, g, b, a) = (px[0] as f64, px[1] as f64, px[2] as f64, px[3] as f64);
            for (i, out) in px.iter_mut().enumerate() {
                let row = &m[i * 5..i * 5 + 5];
                *out = clamp_channel(r * row[0] + g * row[1] + b * row[2] + a * row[3] + row[4]);
            }
        }
        true
    }

    fn shader(&self) -> Option<FilterShader> {
        let m = &self.matrix;
        let column = |c: usize| [m[c] as f32, m[5 + c] as f32, m[10 + c] as f32, m[15 + c] as f32];
        let mut offsets = column(4);
        for v in offsets.iter_mut() {
            *v /= 255.0;
        }
        Some(FilterShader::new(
            "color = clamp(params[0] * color.r + params[1] * color.g + params[2] * color.b \
             + params[3] * color.a + params[4], vec4<f32>(0.0), vec4<f32>(1.0));",
            vec![column(0), column(1), column(2), column(3), offsets],
        ))
    }

    fn box_clone(&self) -> Box<dyn Filter> {
        Box::new(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_noop() {
        let mut px = [12, 34, 56, 78];
        ColorMatrixFilter::default().apply(&mut px, 1, 1);
        assert_eq!(px, [12, 34, 56, 78]);
    }

    #[test]
    fn test_zero_saturation_is_grey() {
        let mut px = [255, 0, 0, 255];
        ColorMatrixFilter::saturation(0.0).apply(&mut px, 1, 1);
        assert_eq!(px[0], px[1]);
        assert_eq!(px[1], px[2]);
        assert_eq!(px[3], 255);
    }

    #[test]
    fn test_then_composes_in_order() {
        let both = ColorMatrixFilter::brightness(10.0).then(&ColorMatrixFilter::contrast(2.0));
        let mut a = [100, 100, 100, 255];
        let mut b = a;
        both.apply(&mut a, 1, 1);
        ColorMatrixFilter::brightness(10.0).apply(&mut b, 1, 1);
        ColorMatrixFilter::contrast(2.0).apply(&mut b, 1, 1);
        assert_eq!(a, b);
    }
}
