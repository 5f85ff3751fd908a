use std::rc::Rc;

use crate::display::bitmap::demultiply;
use crate::display::ImageSource;

use super::Filter;

/// Replaces each pixel's alpha with the red channel of a map image,
/// stretched to the filtered area.
///
/// The map is captured when the filter is built. A map that is not loaded
/// yet, or whose origin is not clean, makes [`Filter::apply`] fail.
#[derive(Clone)]
pub struct AlphaMapFilter {
    map: Option<Rc<MapPixels>>,
}

struct MapPixels {
    width: u32,
    height: u32,
    /// Straight RGBA.
    data: Vec<u8>,
}

impl AlphaMapFilter {
    pub fn new(map: &ImageSource) -> Self {
        let pixels = map.pixmap().filter(|_| map.origin_clean()).map(|pixmap| {
            let mut data = pixmap.data().to_vec();
            demultiply(&mut data);
            Rc::new(MapPixels {
                width: pixmap.width(),
                height: pixmap.height(),
                data,
            })
        });
        Self { map: pixels }
    }
}

impl std::fmt::Debug for AlphaMapFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlphaMapFilter")
            .field("ready", &self.map.is_some())
            .finish()
    }
}

impl Filter for AlphaMapFilter {
    fn apply(&self, pixels: &mut [u8], width: u32, height: u32) -> bool {
        let Some(map) = self.map.as_deref() else {
            log::debug!("alpha map not readable, filter skipped");
            return false;
        };
        if width == 0 || height == 0 {
            return true;
        }
        let x_ratio = map.width as f64 / width as f64;
        let y_ratio = map.height as f64 / height as f64;
        for y in 0..height as usize {
            let sy = (y as f64 * y_ratio) as usize;
            for x in 0..width as usize {
                let sx = (x as f64 * x_ratio) as usize;
                let src = (sy * map.width as usize + sx) * 4;
                let dst = (y * width as usize + x) * 4;
                pixels[dst + 3] = map.data[src];
            }
        }
        true
    }

    fn box_clone(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }
}
