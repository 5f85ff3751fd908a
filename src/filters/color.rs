use super::{clamp_channel, Filter, FilterShader};

/// Multiplies each channel and then adds an offset: `c * mult + offset`.
/// Offsets are in 0..255 channel units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorFilter {
    pub red_multiplier: f64,
    pub green_multiplier: f64,
    pub blue_multiplier: f64,
    pub alpha_multiplier: f64,
    pub red_offset: f64,
    pub green_offset: f64,
    pub blue_offset: f64,
    pub alpha_offset: f64,
}

impl Default for ColorFilter {
    fn default() -> Self {
        Self::multipliers(1.0, 1.0, 1.0, 1.0)
    }
}

impl ColorFilter {
    pub fn multipliers(red: f64, green: f64, blue: f64, alpha: f64) -> Self {
        Self {
            red_multiplier: red,
            green_multiplier: green,
            blue_multiplier: blue,
            alpha_multiplier: alpha,
            red_offset: 0.0,
            green_offset: 0.0,
            blue_offset: 0.0,
            alpha_offset: 0.0,
        }
    }

    pub fn with_offsets(mut self, red: f64, green: f64, blue: f64, alpha: f64) -> Self {
        self.red_offset = red;
        self.green_offset = green;
        self.blue_offset = blue;
        self.alpha_offset = alpha;
        self
    }

    /// Replaces the color while keeping alpha: a flat tint.
    pub fn tint(red: u8, green: u8, blue: u8) -> Self {
        Self::multipliers(0.0, 0.0, 0.0, 1.0).with_offsets(red as f64, green as f64, blue as f64, 0.0)
    }
}

impl Filter for ColorFilter {
    fn apply(&self, pixels: &mut [u8], _width: u32, _height: u32) -> bool {
        for px in pixels.chunks_exact_mut(4) {
            px[0] = clamp_channel(px[0] as f64 * self.red_multiplier + self.red_offset);
            px[1] = clamp_channel(px[1] as f64 * self.green_multiplier + self.green_offset);
            px[2] = clamp_channel(px[2] as f64 * self.blue_multiplier + self.blue_offset);
            px[3] = clamp_channel(px[3] as f64 * self.alpha_multiplier + self.alpha_offset);
        }
        true
    }

    fn shader(&self) -> Option<FilterShader> {
        Some(FilterShader::new(
            "color = clamp(color * params[0] + params[1], vec4<f32>(0.0), vec4<f32>(1.0));",
            vec![
                [
                    self.red_multiplier as f32,
                    self.green_multiplier as f32,
                    self.blue_multiplier as f32,
                    self.alpha_multiplier as f32,
                ],
                [
                    (self.red_offset / 255.0) as f32,
                    (self.green_offset / 255.0) as f32,
                    (self.blue_offset / 255.0) as f32,
                    (self.alpha_offset / 255.0) as f32,
                ],
            ],
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
    fn test_multiply_then_offset() {
        let mut px = [100, 100, 100, 200];
        let f = ColorFilter::multipliers(0.5, 1.0, 2.0, 0.5).with_offsets(10.0, 0.0, 0.0, 0.0);
        assert!(f.apply(&mut px, 1, 1));
        assert_eq!(px, [60, 100, 200, 100]);
    }

    #[test]
    fn test_results_clamp() {
        let mut px = [200, 10, 0, 255];
        ColorFilter::multipliers(2.0, 1.0, 1.0, 1.0)
            .with_offsets(0.0, -50.0, 0.0, 0.0)
            .apply(&mut px, 1, 1);
        assert_eq!(px, [255, 0, 0, 255]);
    }

    #[test]
    fn test_tint_keeps_alpha() {
        let mut px = [1, 2, 3, 77];
        ColorFilter::tint(255, 0, 128).apply(&mut px, 1, 1);
        assert_eq!(px, [255, 0, 128, 77]);
    }
}
