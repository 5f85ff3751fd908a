use crate::geom::Point;

/// Degrees to radians.
pub const DEG_TO_RAD: f64 = std::f64::consts::PI / 180.0;

/// Tolerance used by [`Transform2D::decompose`] when deciding whether the two
/// skew angles describe a plain rotation.
pub const DECOMPOSE_EPSILON: f64 = 0.00001;

/// A 2D affine transform stored as the six values of a 3x3 matrix:
///
/// ```text
/// | a  c  tx |
/// | b  d  ty |
/// | 0  0  1  |
/// ```
///
/// Every operation mutates in place and returns `&mut Self` so calls chain.
/// Callers that need to keep a snapshot clone the value first.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform2D {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

/// Result of [`Transform2D::decompose`]. Angles are in degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Decomposed {
    pub x: f64,
    pub y: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    pub rotation: f64,
    pub skew_x: f64,
    pub skew_y: f64,
}

impl Transform2D {
    /// Identity matrix (no transformation)
    pub const IDENTITY: Self = Self {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    pub const fn new(a: f64, b: f64, c: f64, d: f64, tx: f64, ty: f64) -> Self {
        Self { a, b, c, d, tx, ty }
    }

    pub fn set_values(&mut self, a: f64, b: f64, c: f64, d: f64, tx: f64, ty: f64) -> &mut Self {
        *self = Self::new(a, b, c, d, tx, ty);
        self
    }

    /// Right-multiplies the given matrix onto this one: the result applies
    /// `other` first, then `self`.
    pub fn append(&mut self, a: f64, b: f64, c: f64, d: f64, tx: f64, ty: f64) -> &mut Self {
        let (a1, b1, c1, d1) = (self.a, self.b, self.c, self.d);
        if a != 1.0 || b != 0.0 || c != 0.0 || d != 1.0 {
            self.a = a1 * a + c1 * b;
            self.b = b1 * a + d1 * b;
            self.c = a1 * c + c1 * d;
            self.d = b1 * c + d1 * d;
        }
        self.tx = a1 * tx + c1 * ty + self.tx;
        self.ty = b1 * tx + d1 * ty + self.ty;
        self
    }

    /// Left-multiplies the given matrix onto this one: the result applies
    /// `self` first, then `other`.
    pub fn prepend(&mut self, a: f64, b: f64, c: f64, d: f64, tx: f64, ty: f64) -> &mut Self {
        let (a1, c1, tx1) = (self.a, self.c, self.tx);
        self.a = a * a1 + c * self.b;
        self.b = b * a1 + d * self.b;
        self.c = a * c1 + c * self.d;
        self.d = b * c1 + d * self.d;
        self.tx = a * tx1 + c * self.ty + tx;
        self.ty = b * tx1 + d * self.ty + ty;
        self
    }

    pub fn append_matrix(&mut self, m: &Transform2D) -> &mut Self {
        self.append(m.a, m.b, m.c, m.d, m.tx, m.ty)
    }

    pub fn prepend_matrix(&mut self, m: &Transform2D) -> &mut Self {
        self.prepend(m.a, m.b, m.c, m.d, m.tx, m.ty)
    }

    /// Appends the transform described by standard node properties.
    ///
    /// When either skew is non-zero the skew and the scale/rotation are
    /// appended as two separate matrices; a single combined formula does not
    /// hold with both skew axes set.
    #[allow(clippy::too_many_arguments)]
    pub fn append_transform(
        &mut self,
        x: f64,
        y: f64,
        scale_x: f64,
        scale_y: f64,
        rotation: f64,
        skew_x: f64,
        skew_y: f64,
        reg_x: f64,
        reg_y: f64,
    ) -> &mut Self {
        let (cos, sin) = rotation_cos_sin(rotation);

        if skew_x != 0.0 || skew_y != 0.0 {
            let skew_x = skew_x * DEG_TO_RAD;
            let skew_y = skew_y * DEG_TO_RAD;
            self.append(skew_y.cos(), skew_y.sin(), -skew_x.sin(), skew_x.cos(), x, y);
            self.append(cos * scale_x, sin * scale_x, -sin * scale_y, cos * scale_y, 0.0, 0.0);
        } else {
            self.append(cos * scale_x, sin * scale_x, -sin * scale_y, cos * scale_y, x, y);
        }

        if reg_x != 0.0 || reg_y != 0.0 {
            self.tx -= reg_x * self.a + reg_y * self.c;
            self.ty -= reg_x * self.b + reg_y * self.d;
        }
        self
    }

    /// Prepends the transform described by standard node properties.
    ///
    /// The registration offset is applied first, then scale/rotation, then
    /// skew, which is the reverse order of [`append_transform`](Self::append_transform).
    #[allow(clippy::too_many_arguments)]
    pub fn prepend_transform(
        &mut self,
        x: f64,
        y: f64,
        scale_x: f64,
        scale_y: f64,
        rotation: f64,
        skew_x: f64,
        skew_y: f64,
        reg_x: f64,
        reg_y: f64,
    ) -> &mut Self {
        let (cos, sin) = rotation_cos_sin(rotation);

        if reg_x != 0.0 || reg_y != 0.0 {
            self.tx -= reg_x;
            self.ty -= reg_y;
        }

        if skew_x != 0.0 || skew_y != 0.0 {
            let skew_x = skew_x * DEG_TO_RAD;
            let skew_y = skew_y * DEG_TO_RAD;
            self.prepend(cos * scale_x, sin * scale_x, -sin * scale_y, cos * scale_y, 0.0, 0.0);
            self.prepend(skew_y.cos(), skew_y.sin(), -skew_x.sin(), skew_x.cos(), x, y);
        } else {
            self.prepend(cos * scale_x, sin * scale_x, -sin * scale_y, cos * scale_y, x, y);
        }
        self
    }

    /// Rotates by `angle` degrees.
    pub fn rotate(&mut self, angle: f64) -> &mut Self {
        let angle = angle * DEG_TO_RAD;
        let cos = angle.cos();
        let sin = angle.sin();
        let (a1, b1) = (self.a, self.b);
        self.a = a1 * cos + self.c * sin;
        self.b = b1 * cos + self.d * sin;
        self.c = -a1 * sin + self.c * cos;
        self.d = -b1 * sin + self.d * cos;
        self
    }

    /// Skews by the given angles in degrees.
    pub fn skew(&mut self, skew_x: f64, skew_y: f64) -> &mut Self {
        let skew_x = skew_x * DEG_TO_RAD;
        let skew_y = skew_y * DEG_TO_RAD;
        self.append(skew_y.cos(), skew_y.sin(), -skew_x.sin(), skew_x.cos(), 0.0, 0.0)
    }

    pub fn scale(&mut self, x: f64, y: f64) -> &mut Self {
        self.a *= x;
        self.b *= x;
        self.c *= y;
        self.d *= y;
        self
    }

    pub fn translate(&mut self, x: f64, y: f64) -> &mut Self {
        self.tx += self.a * x + self.c * y;
        self.ty += self.b * x + self.d * y;
        self
    }

    pub fn identity(&mut self) -> &mut Self {
        *self = Self::IDENTITY;
        self
    }

    /// Inverts in place.
    ///
    /// There is no determinant guard: a singular matrix produces NaN or
    /// infinite components.
    pub fn invert(&mut self) -> &mut Self {
        let (a1, b1, c1, d1, tx1) = (self.a, self.b, self.c, self.d, self.tx);
        let n = a1 * d1 - b1 * c1;

        self.a = d1 / n;
        self.b = -b1 / n;
        self.c = -c1 / n;
        self.d = a1 / n;
        self.tx = (c1 * self.ty - d1 * tx1) / n;
        self.ty = -(a1 * self.ty - b1 * tx1) / n;
        self
    }

    /// Exact comparison against the identity matrix.
    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    pub fn equals(&self, other: &Transform2D) -> bool {
        self == other
    }

    pub fn transform_point(&self, x: f64, y: f64) -> Point {
        Point::new(
            x * self.a + y * self.c + self.tx,
            x * self.b + y * self.d + self.ty,
        )
    }

    /// Splits the matrix into translation, scale, rotation and skew.
    ///
    /// Scale magnitudes are always non-negative. If the two skew angles agree
    /// within [`DECOMPOSE_EPSILON`] (relative) the result is reported as a
    /// rotation with zero skew, otherwise as independent skews with zero
    /// rotation.
    pub fn decompose(&self) -> Decomposed {
        let mut out = Decomposed {
            x: self.tx,
            y: self.ty,
            scale_x: (self.a * self.a + self.b * self.b).sqrt(),
            scale_y: (self.c * self.c + self.d * self.d).sqrt(),
            ..Decomposed::default()
        };

        let skew_x = (-self.c).atan2(self.d);
        let skew_y = self.b.atan2(self.a);

        let delta = (1.0 - skew_x / skew_y).abs();
        if delta < DECOMPOSE_EPSILON {
            out.rotation = skew_y / DEG_TO_RAD;
            if self.a < 0.0 && self.d >= 0.0 {
                out.rotation += if out.rotation <= 0.0 { 180.0 } else { -180.0 };
            }
        } else {
            out.skew_x = skew_x / DEG_TO_RAD;
            out.skew_y = skew_y / DEG_TO_RAD;
        }
        out
    }

    /// Converts to the single-precision transform used by the rasterizer.
    pub fn to_skia(&self) -> resvg::tiny_skia::Transform {
        resvg::tiny_skia::Transform::from_row(
            self.a as f32,
            self.b as f32,
            self.c as f32,
            self.d as f32,
            self.tx as f32,
            self.ty as f32,
        )
    }
}

impl Default for Transform2D {
    fn default() -> Self {
        Self::IDENTITY
    }
}

fn rotation_cos_sin(rotation: f64) -> (f64, f64) {
    if rotation % 360.0 != 0.0 {
        let r = rotation * DEG_TO_RAD;
        (r.cos(), r.sin())
    } else {
        (1.0, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn matrix_approx_eq(m: &Transform2D, n: &Transform2D) -> bool {
        approx_eq(m.a, n.a)
            && approx_eq(m.b, n.b)
            && approx_eq(m.c, n.c)
            && approx_eq(m.d, n.d)
            && approx_eq(m.tx, n.tx)
            && approx_eq(m.ty, n.ty)
    }

    #[test]
    fn test_identity() {
        let mut t = Transform2D::new(2.0, 3.0, 4.0, 5.0, 6.0, 7.0);
        t.identity();
        assert!(t.is_identity());
        assert_eq!(t, Transform2D::new(1.0, 0.0, 0.0, 1.0, 0.0, 0.0));
    }

    #[test]
    fn test_append_identity_is_noop() {
        let original = Transform2D::new(1.5, 0.2, -0.3, 2.0, 10.0, -4.0);
        let mut t = original;
        t.append_matrix(&Transform2D::IDENTITY);
        assert_eq!(t, original);
    }

    #[test]
    fn test_append_is_not_commutative() {
        let mut ab = Transform2D::IDENTITY;
        ab.translate(10.0, 0.0).scale(2.0, 2.0);

        let mut ba = Transform2D::IDENTITY;
        ba.scale(2.0, 2.0).translate(10.0, 0.0);

        assert!(!matrix_approx_eq(&ab, &ba));
        assert!(approx_eq(ab.tx, 10.0));
        assert!(approx_eq(ba.tx, 20.0));
    }

    #[test]
    fn test_prepend_applies_after_self() {
        let mut t = Transform2D::IDENTITY;
        t.scale(2.0, 2.0);
        t.prepend(1.0, 0.0, 0.0, 1.0, 5.0, 5.0);
        let p = t.transform_point(1.0, 1.0);
        assert!(approx_eq(p.x, 7.0));
        assert!(approx_eq(p.y, 7.0));
    }

    #[test]
    fn test_double_invert_round_trips() {
        let original = Transform2D::new(1.5, 0.2, -0.3, 2.0, 10.0, -4.0);
        let mut t = original;
        t.invert().invert();
        assert!(matrix_approx_eq(&t, &original));
    }

    #[test]
    fn test_invert_undoes_transform() {
        let mut t = Transform2D::IDENTITY;
        t.append_transform(20.0, 30.0, 2.0, 3.0, 45.0, 0.0, 0.0, 5.0, 5.0);
        let mut inv = t;
        inv.invert();
        let p = t.transform_point(3.0, 4.0);
        let back = inv.transform_point(p.x, p.y);
        assert!((back.x - 3.0).abs() < 1e-9);
        assert!((back.y - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_invert_singular_is_not_finite() {
        let mut t = Transform2D::new(0.0, 0.0, 0.0, 0.0, 1.0, 1.0);
        t.invert();
        assert!(!t.a.is_finite());
    }

    #[test]
    fn test_append_transform_pure_scale_keeps_translation() {
        let mut t = Transform2D::new(1.0, 0.0, 0.0, 1.0, 10.0, 10.0);
        t.append_transform(0.0, 0.0, 2.0, 2.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        assert_eq!(t, Transform2D::new(2.0, 0.0, 0.0, 2.0, 10.0, 10.0));
    }

    #[test]
    fn test_append_transform_registration_offsets() {
        let mut t = Transform2D::IDENTITY;
        t.append_transform(100.0, 50.0, 2.0, 2.0, 0.0, 0.0, 0.0, 10.0, 5.0);
        let p = t.transform_point(10.0, 5.0);
        assert!(approx_eq(p.x, 100.0));
        assert!(approx_eq(p.y, 50.0));
    }

    #[test]
    fn test_append_transform_rotation() {
        let mut t = Transform2D::IDENTITY;
        t.append_transform(0.0, 0.0, 1.0, 1.0, 90.0, 0.0, 0.0, 0.0, 0.0);
        let p = t.transform_point(1.0, 0.0);
        assert!(approx_eq(p.x, 0.0));
        assert!(approx_eq(p.y, 1.0));
    }

    #[test]
    fn test_prepend_transform_matches_append_on_identity() {
        let mut appended = Transform2D::IDENTITY;
        appended.append_transform(5.0, 6.0, 2.0, 3.0, 30.0, 0.0, 0.0, 0.0, 0.0);
        let mut prepended = Transform2D::IDENTITY;
        prepended.prepend_transform(5.0, 6.0, 2.0, 3.0, 30.0, 0.0, 0.0, 0.0, 0.0);
        assert!(matrix_approx_eq(&appended, &prepended));
    }

    #[test]
    fn test_skew_uses_two_appends() {
        let mut t = Transform2D::IDENTITY;
        t.append_transform(0.0, 0.0, 1.0, 1.0, 0.0, 30.0, 0.0, 0.0, 0.0);
        assert!(approx_eq(t.c, -(30.0 * DEG_TO_RAD).sin()));
        assert!(approx_eq(t.d, (30.0 * DEG_TO_RAD).cos()));
    }

    #[test]
    fn test_decompose_rotation() {
        let mut t = Transform2D::IDENTITY;
        t.append_transform(10.0, 20.0, 2.0, 3.0, 30.0, 0.0, 0.0, 0.0, 0.0);
        let d = t.decompose();
        assert!(approx_eq(d.x, 10.0));
        assert!(approx_eq(d.y, 20.0));
        assert!(approx_eq(d.scale_x, 2.0));
        assert!(approx_eq(d.scale_y, 3.0));
        assert!((d.rotation - 30.0).abs() < 1e-6);
        assert_eq!(d.skew_x, 0.0);
        assert_eq!(d.skew_y, 0.0);
    }

    #[test]
    fn test_decompose_skew() {
        let mut t = Transform2D::IDENTITY;
        t.append_transform(0.0, 0.0, 1.0, 1.0, 0.0, 20.0, 40.0, 0.0, 0.0);
        let d = t.decompose();
        assert_eq!(d.rotation, 0.0);
        assert!((d.skew_x - 20.0).abs() < 1e-6);
        assert!((d.skew_y - 40.0).abs() < 1e-6);
    }

    #[test]
    fn test_decompose_epsilon_boundary() {
        // skew angles within the relative epsilon collapse to a rotation
        let mut close = Transform2D::IDENTITY;
        close.append_transform(0.0, 0.0, 1.0, 1.0, 0.0, 30.0, 30.0 * (1.0 + 5e-6), 0.0, 0.0);
        let d = close.decompose();
        assert_eq!(d.skew_x, 0.0);
        assert!((d.rotation - 30.0).abs() < 1e-3);

        let mut apart = Transform2D::IDENTITY;
        apart.append_transform(0.0, 0.0, 1.0, 1.0, 0.0, 30.0, 30.0 * (1.0 + 5e-5), 0.0, 0.0);
        let d = apart.decompose();
        assert_eq!(d.rotation, 0.0);
        assert!(d.skew_x != 0.0);
    }

    #[test]
    fn test_decompose_mirror_reports_skew() {
        // a horizontal mirror cannot be expressed as a rotation, so it is
        // reported through the skew angles
        let t = Transform2D::new(-1.0, 0.0, 0.0, 1.0, 0.0, 0.0);
        let d = t.decompose();
        assert_eq!(d.rotation, 0.0);
        assert!(approx_eq(d.skew_y, 180.0));
        assert!(approx_eq(d.scale_x, 1.0));
    }

    #[test]
    fn test_rotate_and_translate() {
        let mut t = Transform2D::IDENTITY;
        t.rotate(90.0).translate(1.0, 0.0);
        assert!(approx_eq(t.tx, 0.0));
        assert!(approx_eq(t.ty, 1.0));
    }
}
