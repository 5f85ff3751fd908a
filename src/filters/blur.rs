use crate::geom::Rect;

use super::Filter;

/// Box blur, repeated `quality` times (1 to 3) to approach a gaussian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlurFilter {
    pub blur_x: f64,
    pub blur_y: f64,
    pub quality: u32,
}

impl BlurFilter {
    pub fn new(blur_x: f64, blur_y: f64, quality: u32) -> Self {
        Self {
            blur_x: blur_x.max(0.0),
            blur_y: blur_y.max(0.0),
            quality: quality.max(1),
        }
    }
}

impl Filter for BlurFilter {
    fn apply(&self, pixels: &mut [u8], width: u32, height: u32) -> bool {
        let radius_x = (self.blur_x as u32) >> 1;
        let radius_y = (self.blur_y as u32) >> 1;
        if radius_x == 0 && radius_y == 0 {
            return false;
        }
        let iterations = self.quality.clamp(1, 3);
        blur_pixels(pixels, width, height, radius_x, radius_y, iterations);
        true
    }

    fn bounds(&self) -> Option<Rect> {
        let (x, y) = (self.blur_x.trunc(), self.blur_y.trunc());
        if x <= 0.0 && y <= 0.0 {
            return None;
        }
        let q = (self.quality as f64).powf(0.2);
        let (px, py) = (x * q + 1.0, y * q + 1.0);
        let mut rect = Rect::default();
        rect.pad(py, px, py, px);
        Some(rect)
    }

    fn box_clone(&self) -> Box<dyn Filter> {
        Box::new(*self)
    }
}

/// Separable box blur over an RGBA buffer, clamping at the edges. Works on
/// premultiplied or straight data alike.
pub fn blur_pixels(
    data: &mut [u8],
    width: u32,
    height: u32,
    radius_x: u32,
    radius_y: u32,
    iterations: u32,
) {
    let (w, h) = (width as usize, height as usize);
    if w == 0 || h == 0 || data.len() < w * h * 4 {
        return;
    }
    let mut line = Vec::with_capacity(w.max(h) * 4);
    for _ in 0..iterations {
        if radius_x > 0 {
            for y in 0..h {
                blur_line(data, y * w * 4, 4, w, radius_x as usize, &mut line);
            }
        }
        if radius_y > 0 {
            for x in 0..w {
                blur_line(data, x * 4, w * 4, h, radius_y as usize, &mut line);
            }
        }
    }
}

/// Blurs `len` pixels starting at byte `start`, `stride` bytes apart.
fn blur_line(data: &mut [u8], start: usize, stride: usize, len: usize, radius: usize, line: &mut Vec<u8>) {
    line.clear();
    for i in 0..len {
        let p = start + i * stride;
        line.extend_from_slice(&data[p..p + 4]);
    }

    let last = len as isize - 1;
    let at = |i: isize| i.clamp(0, last) as usize * 4;
    let div = (2 * radius + 1) as u32;
    let r = radius as isize;

    let mut sum = [0u32; 4];
    for k in -r..=r {
        let o = at(k);
        for c in 0..4 {
            sum[c] += line[o + c] as u32;
        }
    }
    for i in 0..len {
        let p = start + i * stride;
        for c in 0..4 {
            data[p + c] = ((sum[c] + div / 2) / div) as u8;
        }
        let add = at(i as isize + r + 1);
        let sub = at(i as isize - r);
        for c in 0..4 {
            sum[c] += line[add + c] as u32;
            sum[c] -= line[sub + c] as u32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_pixel_spreads() {
        let mut px = vec![0u8; 5 * 4];
        px[8..12].copy_from_slice(&[255, 255, 255, 255]);
        assert!(BlurFilter::new(2.0, 0.0, 1).apply(&mut px, 5, 1));
        let alphas: Vec<u8> = px.chunks(4).map(|p| p[3]).collect();
        assert_eq!(alphas, vec![0, 85, 85, 85, 0]);
    }

    #[test]
    fn test_small_blur_is_rejected() {
        let mut px = vec![255u8; 4];
        assert!(!BlurFilter::new(1.0, 1.0, 1).apply(&mut px, 1, 1));
    }

    #[test]
    fn test_uniform_image_is_unchanged() {
        let mut px = vec![40u8; 6 * 6 * 4];
        blur_pixels(&mut px, 6, 6, 2, 2, 3);
        assert!(px.iter().all(|&v| v == 40));
    }

    #[test]
    fn test_bounds_padding() {
        assert_eq!(BlurFilter::new(0.0, 0.0, 1).bounds(), None);
        assert_eq!(
            BlurFilter::new(10.0, 4.0, 1).bounds(),
            Some(Rect::new(-11.0, -5.0, 22.0, 10.0))
        );
    }
}
