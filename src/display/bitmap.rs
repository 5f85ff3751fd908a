//! Image sources and the bitmap leaf.

use resvg::tiny_skia::{IntSize, Pixmap};

use crate::color::Color;
use crate::error::{Result, StageError};
use crate::geom::Rect;
use crate::raster::{Canvas, DrawState};
use crate::tree::Scene;

use super::Content;

/// Handle to an image registered with [`Scene::add_image`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(pub(crate) u32);

/// Pixels for bitmaps, sprite frames and filter maps.
///
/// Pixel data is premultiplied RGBA. An image may be registered before its
/// pixels exist (`pending`); nodes drawing it stay invisible until
/// [`ImageSource::complete`] is called.
#[derive(Clone)]
pub struct ImageSource {
    width: u32,
    height: u32,
    pixmap: Option<Pixmap>,
    origin_clean: bool,
    version: u64,
}

impl ImageSource {
    /// Takes straight-alpha RGBA bytes.
    pub fn from_rgba(width: u32, height: u32, mut data: Vec<u8>) -> Result<Self> {
        premultiply(&mut data);
        let size = IntSize::from_wh(width, height).ok_or(StageError::InvalidSize { width, height })?;
        let pixmap = Pixmap::from_vec(data, size).ok_or(StageError::InvalidSize { width, height })?;
        Ok(Self::from_pixmap(pixmap))
    }

    pub fn from_pixmap(pixmap: Pixmap) -> Self {
        Self {
            width: pixmap.width(),
            height: pixmap.height(),
            pixmap: Some(pixmap),
            origin_clean: true,
            version: 0,
        }
    }

    /// Decodes PNG, JPEG, GIF or WebP bytes.
    pub fn from_encoded(bytes: &[u8]) -> Result<Self> {
        let img = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = img.dimensions();
        Self::from_rgba(width, height, img.into_raw())
    }

    /// Rasterizes an SVG document at the given scale.
    pub fn from_svg(bytes: &[u8], scale: f32) -> Result<Self> {
        let tree = resvg::usvg::Tree::from_data(bytes, &resvg::usvg::Options::default())
            .map_err(|e| StageError::Svg(e.to_string()))?;
        let size = tree.size();
        let width = (size.width() * scale).ceil() as u32;
        let height = (size.height() * scale).ceil() as u32;

        let mut pixmap =
            Pixmap::new(width, height).ok_or(StageError::InvalidSize { width, height })?;
        let transform = resvg::tiny_skia::Transform::from_scale(scale, scale);
        resvg::render(&tree, transform, &mut pixmap.as_mut());
        Ok(Self::from_pixmap(pixmap))
    }

    /// A single-color image, handy for placeholders.
    pub fn solid(width: u32, height: u32, color: Color) -> Result<Self> {
        let mut pixmap =
            Pixmap::new(width, height).ok_or(StageError::InvalidSize { width, height })?;
        pixmap.fill(color.to_skia());
        Ok(Self::from_pixmap(pixmap))
    }

    /// An image whose pixels have not arrived yet.
    pub fn pending(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixmap: None,
            origin_clean: true,
            version: 0,
        }
    }

    /// Supplies (or replaces) the pixels. Renderers re-upload the image on
    /// their next encounter.
    pub fn complete(&mut self, pixmap: Pixmap) {
        self.width = pixmap.width();
        self.height = pixmap.height();
        self.pixmap = Some(pixmap);
        self.version += 1;
    }

    /// Marks the image as coming from another origin. Drawing it taints the
    /// target surface, after which pixel reads from that surface fail.
    pub fn with_origin_clean(mut self, clean: bool) -> Self {
        self.origin_clean = clean;
        self
    }

    pub fn is_loaded(&self) -> bool {
        self.pixmap.is_some()
    }

    pub fn origin_clean(&self) -> bool {
        self.origin_clean
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixmap(&self) -> Option<&Pixmap> {
        self.pixmap.as_ref()
    }

    /// Incremented every time the pixels change.
    pub fn version(&self) -> u64 {
        self.version
    }
}

impl std::fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageSource")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("loaded", &self.is_loaded())
            .field("origin_clean", &self.origin_clean)
            .finish()
    }
}

/// Converts straight-alpha RGBA bytes to premultiplied in place.
pub fn premultiply(data: &mut [u8]) {
    for px in data.chunks_exact_mut(4) {
        let a = px[3] as u16;
        if a == 255 {
            continue;
        }
        for c in &mut px[..3] {
            *c = ((*c as u16 * a + 127) / 255) as u8;
        }
    }
}

/// Converts premultiplied RGBA bytes back to straight alpha in place.
pub fn demultiply(data: &mut [u8]) {
    for px in data.chunks_exact_mut(4) {
        let a = px[3] as u32;
        if a == 255 {
            continue;
        }
        if a == 0 {
            px[..3].fill(0);
            continue;
        }
        for c in &mut px[..3] {
            *c = ((*c as u32 * 255 + a / 2) / a).min(255) as u8;
        }
    }
}

/// Leaf that draws an image, optionally a sub-rectangle of it.
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    pub image: ImageId,
    pub source_rect: Option<Rect>,
}

impl Bitmap {
    pub fn new(image: ImageId) -> Self {
        Self {
            image,
            source_rect: None,
        }
    }

    pub fn with_source_rect(mut self, rect: Rect) -> Self {
        self.source_rect = Some(rect);
        self
    }

    /// Source rectangle clipped to the image, and where it lands locally.
    pub(crate) fn clipped_source(&self, image: &ImageSource) -> Option<(Rect, Rect)> {
        let (iw, ih) = (image.width() as f64, image.height() as f64);
        let Some(rect) = self.source_rect else {
            return Some((Rect::new(0.0, 0.0, iw, ih), Rect::new(0.0, 0.0, iw, ih)));
        };

        let (mut x1, mut y1) = (rect.x, rect.y);
        let (mut x2, mut y2) = (x1 + rect.width, y1 + rect.height);
        let (mut x, mut y) = (0.0, 0.0);
        if x1 < 0.0 {
            x -= x1;
            x1 = 0.0;
        }
        if x2 > iw {
            x2 = iw;
        }
        if y1 < 0.0 {
            y -= y1;
            y1 = 0.0;
        }
        if y2 > ih {
            y2 = ih;
        }
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((
            Rect::new(x1, y1, x2 - x1, y2 - y1),
            Rect::new(x, y, x2 - x1, y2 - y1),
        ))
    }
}

impl Content for Bitmap {
    fn has_content(&self, scene: &Scene) -> bool {
        scene.image(self.image).is_some_and(ImageSource::is_loaded)
    }

    fn bounds(&self, scene: &Scene) -> Option<Rect> {
        let image = scene.image(self.image)?;
        Some(match self.source_rect {
            Some(r) => Rect::new(0.0, 0.0, r.width, r.height),
            None => Rect::new(0.0, 0.0, image.width() as f64, image.height() as f64),
        })
    }

    fn draw(&self, scene: &Scene, canvas: &mut Canvas, state: &DrawState) -> bool {
        let Some(image) = scene.image(self.image) else {
            return true;
        };
        if let Some((src, dst)) = self.clipped_source(image) {
            canvas.draw_image(image, src, dst, state);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_premultiply_round_trip() {
        let mut px = vec![200, 100, 50, 128];
        premultiply(&mut px);
        assert_eq!(px, vec![100, 50, 25, 128]);
        demultiply(&mut px);
        assert!((px[0] as i32 - 200).abs() <= 2);
        assert_eq!(px[3], 128);
    }

    #[test]
    fn test_pending_image_is_not_loaded() {
        let mut img = ImageSource::pending(4, 4);
        assert!(!img.is_loaded());
        img.complete(Pixmap::new(8, 2).unwrap());
        assert!(img.is_loaded());
        assert_eq!((img.width(), img.height()), (8, 2));
        assert_eq!(img.version(), 1);
    }

    #[test]
    fn test_source_rect_is_clipped() {
        let img = ImageSource::pending(10, 10);
        let bmp = Bitmap::new(ImageId(0)).with_source_rect(Rect::new(-2.0, 5.0, 6.0, 10.0));
        let (src, dst) = bmp.clipped_source(&img).unwrap();
        assert_eq!(src, Rect::new(0.0, 5.0, 4.0, 5.0));
        assert_eq!(dst, Rect::new(2.0, 0.0, 4.0, 5.0));
    }
}
