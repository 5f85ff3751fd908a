use crate::error::{Result, StageError};

/// Straight (non-premultiplied) RGBA color with components in 0..=1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// `0xRRGGBB`, fully opaque.
    pub const fn from_hex(hex: u32) -> Self {
        Self {
            r: ((hex >> 16) & 0xFF) as f32 / 255.0,
            g: ((hex >> 8) & 0xFF) as f32 / 255.0,
            b: (hex & 0xFF) as f32 / 255.0,
            a: 1.0,
        }
    }

    /// `0xRRGGBBAA`.
    pub const fn from_rgba_u32(value: u32) -> Self {
        Self {
            r: ((value >> 24) & 0xFF) as f32 / 255.0,
            g: ((value >> 16) & 0xFF) as f32 / 255.0,
            b: ((value >> 8) & 0xFF) as f32 / 255.0,
            a: (value & 0xFF) as f32 / 255.0,
        }
    }

    pub const WHITE: Color = Color::rgb(1.0, 1.0, 1.0);
    pub const BLACK: Color = Color::rgb(0.0, 0.0, 0.0);
    pub const TRANSPARENT: Color = Color::rgba(0.0, 0.0, 0.0, 0.0);

    /// Parses a CSS-style color string.
    ///
    /// Accepts `#RGB`, `#RRGGBB`, `#RRGGBBAA`, `rgb(r, g, b)`,
    /// `rgba(r, g, b, a)` (channels 0..=255, alpha 0..=1) and the keywords
    /// `transparent`, `black` and `white`.
    pub fn parse(input: &str) -> Result<Color> {
        let s = input.trim();
        let invalid = || StageError::InvalidColor(input.to_string());

        if let Some(hex) = s.strip_prefix('#') {
            let digits = hex
                .chars()
                .map(|c| c.to_digit(16).map(|d| d as u8))
                .collect::<Option<Vec<u8>>>()
                .ok_or_else(invalid)?;
            let pair = |i: usize| (digits[i] << 4 | digits[i + 1]) as f32 / 255.0;
            return match digits.len() {
                3 => Ok(Color::rgb(
                    (digits[0] * 17) as f32 / 255.0,
                    (digits[1] * 17) as f32 / 255.0,
                    (digits[2] * 17) as f32 / 255.0,
                )),
                6 => Ok(Color::rgb(pair(0), pair(2), pair(4))),
                8 => Ok(Color::rgba(pair(0), pair(2), pair(4), pair(6))),
                _ => Err(invalid()),
            };
        }

        let lower = s.to_ascii_lowercase();
        let (body, has_alpha) = if let Some(rest) = lower.strip_prefix("rgba(") {
            (rest, true)
        } else if let Some(rest) = lower.strip_prefix("rgb(") {
            (rest, false)
        } else {
            return match lower.as_str() {
                "transparent" => Ok(Color::TRANSPARENT),
                "black" => Ok(Color::BLACK),
                "white" => Ok(Color::WHITE),
                _ => Err(invalid()),
            };
        };

        let body = body.strip_suffix(')').ok_or_else(invalid)?;
        let parts = body
            .split(',')
            .map(|p| p.trim().parse::<f32>())
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(|_| invalid())?;

        match (parts.as_slice(), has_alpha) {
            ([r, g, b], false) => Ok(Color::rgb(*r / 255.0, *g / 255.0, *b / 255.0)),
            ([r, g, b, a], true) => Ok(Color::rgba(*r / 255.0, *g / 255.0, *b / 255.0, *a)),
            _ => Err(invalid()),
        }
    }

    pub fn with_alpha(self, a: f32) -> Self {
        Self { a, ..self }
    }

    pub fn to_skia(self) -> resvg::tiny_skia::Color {
        resvg::tiny_skia::Color::from_rgba(
            self.r.clamp(0.0, 1.0),
            self.g.clamp(0.0, 1.0),
            self.b.clamp(0.0, 1.0),
            self.a.clamp(0.0, 1.0),
        )
        .unwrap_or(resvg::tiny_skia::Color::TRANSPARENT)
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::TRANSPARENT
    }
}
