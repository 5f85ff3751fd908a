//! Points and rectangles in scene units.

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn set_values(&mut self, x: f64, y: f64, width: f64, height: f64) -> &mut Self {
        *self = Self::new(x, y, width, height);
        self
    }

    /// Grows this rectangle in place so it also covers the given one.
    pub fn extend(&mut self, x: f64, y: f64, width: f64, height: f64) -> &mut Self {
        if x + width > self.x + self.width {
            self.width = x + width - self.x;
        }
        if y + height > self.y + self.height {
            self.height = y + height - self.y;
        }
        if x < self.x {
            self.width += self.x - x;
            self.x = x;
        }
        if y < self.y {
            self.height += self.y - y;
            self.y = y;
        }
        self
    }

    pub fn pad(&mut self, top: f64, left: f64, bottom: f64, right: f64) -> &mut Self {
        self.x -= left;
        self.y -= top;
        self.width += left + right;
        self.height += top + bottom;
        self
    }

    /// Whether the given point (or rectangle, with a size) lies inside.
    pub fn contains(&self, x: f64, y: f64, width: f64, height: f64) -> bool {
        x >= self.x
            && x + width <= self.x + self.width
            && y >= self.y
            && y + height <= self.y + self.height
    }

    pub fn union(&self, other: &Rect) -> Rect {
        let mut out = *self;
        out.extend(other.x, other.y, other.width, other.height);
        out
    }

    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);
        if x2 <= x1 || y2 <= y1 {
            None
        } else {
            Some(Rect::new(x1, y1, x2 - x1, y2 - y1))
        }
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        other.x <= self.x + self.width
            && self.x <= other.x + other.width
            && other.y <= self.y + self.height
            && self.y <= other.y + other.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}
