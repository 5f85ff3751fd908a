//! Pixel surfaces for the raster path, caches and hit testing.
//!
//! A [`Surface`] is a premultiplied RGBA pixmap plus a taint flag. Drawing
//! an image whose origin is not clean taints the surface; from then on every
//! pixel read fails with [`StageError::Tainted`].

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use resvg::tiny_skia::{Pixmap, PixmapPaint, Transform};

use crate::color::Color;
use crate::display::bitmap::{demultiply, premultiply};
use crate::error::{Result, StageError};
use crate::geom::Rect;

#[derive(Clone)]
pub struct Surface {
    pixmap: Pixmap,
    tainted: bool,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let pixmap = Pixmap::new(width, height).ok_or(StageError::InvalidSize { width, height })?;
        Ok(Self {
            pixmap,
            tainted: false,
        })
    }

    pub fn from_pixmap(pixmap: Pixmap) -> Self {
        Self {
            pixmap,
            tainted: false,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    pub fn pixmap_mut(&mut self) -> &mut Pixmap {
        &mut self.pixmap
    }

    /// Replaces the backing pixmap with a cleared one of the new size. Does
    /// nothing when the size is unchanged.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width == self.width() && height == self.height() {
            return Ok(());
        }
        self.pixmap = Pixmap::new(width, height).ok_or(StageError::InvalidSize { width, height })?;
        self.tainted = false;
        Ok(())
    }

    /// Clears every pixel. Also lifts the taint, since nothing unclean is
    /// left on the surface.
    pub fn clear(&mut self) {
        self.pixmap.fill(resvg::tiny_skia::Color::TRANSPARENT);
        self.tainted = false;
    }

    /// Clears a rectangle, leaving the rest untouched.
    pub fn clear_rect(&mut self, rect: Rect) {
        let (w, h) = (self.width() as i64, self.height() as i64);
        let x0 = (rect.x.floor() as i64).clamp(0, w);
        let y0 = (rect.y.floor() as i64).clamp(0, h);
        let x1 = ((rect.x + rect.width).ceil() as i64).clamp(0, w);
        let y1 = ((rect.y + rect.height).ceil() as i64).clamp(0, h);
        let stride = w as usize * 4;
        let data = self.pixmap.data_mut();
        for y in y0..y1 {
            let row = y as usize * stride;
            data[row + x0 as usize * 4..row + x1 as usize * 4].fill(0);
        }
    }

    pub fn fill(&mut self, color: Color) {
        self.pixmap.fill(color.to_skia());
    }

    pub fn taint(&mut self) {
        self.tainted = true;
    }

    pub fn is_tainted(&self) -> bool {
        self.tainted
    }

    fn check_readable(&self) -> Result<()> {
        if self.tainted {
            Err(StageError::Tainted)
        } else {
            Ok(())
        }
    }

    /// One premultiplied RGBA pixel, or `None` outside the surface.
    pub fn pixel(&self, x: u32, y: u32) -> Result<Option<[u8; 4]>> {
        self.check_readable()?;
        Ok(self.pixmap.pixel(x, y).map(|p| {
            [p.red(), p.green(), p.blue(), p.alpha()]
        }))
    }

    /// Straight-alpha RGBA copy of the whole surface.
    pub fn read_pixels(&self) -> Result<Vec<u8>> {
        self.check_readable()?;
        let mut data = self.pixmap.data().to_vec();
        demultiply(&mut data);
        Ok(data)
    }

    /// Hands the straight-alpha pixels to `f` and writes them back
    /// afterwards. Filters run through this.
    pub fn with_pixels<F>(&mut self, f: F) -> Result<bool>
    where
        F: FnOnce(&mut [u8], u32, u32) -> bool,
    {
        let mut data = self.read_pixels()?;
        let (w, h) = (self.width(), self.height());
        let changed = f(&mut data, w, h);
        if changed {
            premultiply(&mut data);
            self.pixmap.data_mut().copy_from_slice(&data);
        }
        Ok(changed)
    }

    /// Draws another surface on top with the given transform.
    pub fn draw_surface(&mut self, other: &Surface, transform: Transform) {
        self.pixmap
            .draw_pixmap(0, 0, other.pixmap.as_ref(), &PixmapPaint::default(), transform, None);
        if other.tainted {
            self.tainted = true;
        }
    }

    pub fn to_png(&self) -> Result<Vec<u8>> {
        let data = self.read_pixels()?;
        let (width, height) = (self.width(), self.height());
        let img = image::RgbaImage::from_raw(width, height, data)
            .ok_or(StageError::InvalidSize { width, height })?;
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
        Ok(bytes)
    }

    /// Base64 PNG `data:` URL of the surface.
    pub fn to_data_url(&self) -> Result<String> {
        let png = self.to_png()?;
        Ok(format!("data:image/png;base64,{}", BASE64_STANDARD.encode(png)))
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("tainted", &self.tainted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tainted_surface_rejects_reads() {
        let mut s = Surface::new(2, 2).unwrap();
        assert!(s.pixel(0, 0).is_ok());
        s.taint();
        assert!(matches!(s.pixel(0, 0), Err(StageError::Tainted)));
        assert!(matches!(s.to_data_url(), Err(StageError::Tainted)));
        s.clear();
        assert!(s.read_pixels().is_ok());
    }

    #[test]
    fn test_clear_rect_leaves_outside() {
        let mut s = Surface::new(4, 1).unwrap();
        s.fill(Color::WHITE);
        s.clear_rect(Rect::new(1.0, 0.0, 2.0, 1.0));
        assert_eq!(s.pixel(0, 0).unwrap(), Some([255, 255, 255, 255]));
        assert_eq!(s.pixel(1, 0).unwrap(), Some([0, 0, 0, 0]));
        assert_eq!(s.pixel(3, 0).unwrap(), Some([255, 255, 255, 255]));
    }

    #[test]
    fn test_data_url_is_png() {
        let s = Surface::new(3, 3).unwrap();
        let url = s.to_data_url().unwrap();
        assert!(url.starts_with("data:image/png;base64,iVBORw0KGgo"));
    }

    #[test]
    fn test_with_pixels_round_trip() {
        let mut s = Surface::new(1, 1).unwrap();
        s.fill(Color::rgba(1.0, 0.0, 0.0, 0.5));
        let changed = s
            .with_pixels(|px, _, _| {
                assert_eq!(px[0], 255);
                px[1] = 255;
                true
            })
            .unwrap();
        assert!(changed);
        let p = s.pixel(0, 0).unwrap().unwrap();
        assert_eq!(p[3], 128);
        assert!(p[1] >= 127 && p[1] <= 129);
    }
}
