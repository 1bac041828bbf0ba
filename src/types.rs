use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub};

/// Point or direction in up to three dimensions.
///
/// Lower-dimensional networks keep the unused trailing components at zero,
/// so 1-D and 2-D runs share the same arithmetic as 3-D ones. Serialized as a
/// plain array (`[x, y]`, `[x, y, z]`, ...).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct Vector {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector {
    pub const ZERO: Vector = Vector {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn xy(x: f64, y: f64) -> Self {
        Self { x, y, z: 0.0 }
    }

    /// Unit vector along one axis.
    pub fn axis(index: usize) -> Self {
        let mut v = Self::ZERO;
        v.set(index, 1.0);
        v
    }

    pub fn get(&self, index: usize) -> f64 {
        match index {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }

    pub fn set(&mut self, index: usize, value: f64) {
        match index {
            0 => self.x = value,
            1 => self.y = value,
            _ => self.z = value,
        }
    }

    pub fn dot(self, other: Vector) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(self, other: Vector) -> Vector {
        Vector::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn norm_sq(self) -> f64 {
        self.dot(self)
    }

    pub fn norm(self) -> f64 {
        self.norm_sq().sqrt()
    }

    pub fn distance(self, other: Vector) -> f64 {
        (self - other).norm()
    }

    pub fn distance_sq(self, other: Vector) -> f64 {
        (self - other).norm_sq()
    }

    /// Unit vector in the same direction, or `None` for (near) zero or
    /// non-finite input.
    pub fn normalized(self) -> Option<Vector> {
        let n = self.norm();
        if n.is_finite() && n > 1e-12 {
            Some(self / n)
        } else {
            None
        }
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// True when every component at or past `dimension` is zero.
    pub fn fits_dimension(self, dimension: usize) -> bool {
        (dimension..3).all(|i| self.get(i) == 0.0)
    }

    /// Copy with components at or past `dimension` zeroed.
    pub fn truncated(self, dimension: usize) -> Vector {
        let mut v = self;
        for i in dimension..3 {
            v.set(i, 0.0);
        }
        v
    }

    /// Angle in radians between two non-zero vectors.
    pub fn angle_to(self, other: Vector) -> f64 {
        let denom = self.norm() * other.norm();
        if denom <= 0.0 {
            return 0.0;
        }
        (self.dot(other) / denom).clamp(-1.0, 1.0).acos()
    }

    /// Shortest distance from `self` to the straight piece `a`-`b`.
    pub fn distance_to_piece(self, a: Vector, b: Vector) -> f64 {
        let ab = b - a;
        let len_sq = ab.norm_sq();
        if len_sq <= 0.0 {
            return self.distance(a);
        }
        let t = ((self - a).dot(ab) / len_sq).clamp(0.0, 1.0);
        self.distance(a + ab * t)
    }

    pub fn componentwise_min(self, other: Vector) -> Vector {
        Vector::new(self.x.min(other.x), self.y.min(other.y), self.z.min(other.z))
    }

    pub fn componentwise_max(self, other: Vector) -> Vector {
        Vector::new(self.x.max(other.x), self.y.max(other.y), self.z.max(other.z))
    }
}

impl Add for Vector {
    type Output = Vector;
    fn add(self, rhs: Vector) -> Vector {
        Vector::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vector {
    fn add_assign(&mut self, rhs: Vector) {
        self.x += rhs.x;
        self.y += rhs.y;
        self.z += rhs.z;
    }
}

impl Sub for Vector {
    type Output = Vector;
    fn sub(self, rhs: Vector) -> Vector {
        Vector::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vector {
    type Output = Vector;
    fn mul(self, rhs: f64) -> Vector {
        Vector::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Div<f64> for Vector {
    type Output = Vector;
    fn div(self, rhs: f64) -> Vector {
        Vector::new(self.x / rhs, self.y / rhs, self.z / rhs)
    }
}

impl Neg for Vector {
    type Output = Vector;
    fn neg(self) -> Vector {
        Vector::new(-self.x, -self.y, -self.z)
    }
}

impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3}, {:.3})", self.x, self.y, self.z)
    }
}

impl TryFrom<Vec<f64>> for Vector {
    type Error = String;

    fn try_from(values: Vec<f64>) -> Result<Self, Self::Error> {
        if values.len() > 3 {
            return Err(format!(
                "expected at most 3 coordinates, got {}",
                values.len()
            ));
        }
        let mut v = Vector::ZERO;
        for (i, value) in values.into_iter().enumerate() {
            v.set(i, value);
        }
        Ok(v)
    }
}

impl From<Vector> for Vec<f64> {
    fn from(v: Vector) -> Self {
        vec![v.x, v.y, v.z]
    }
}

/// Headings of the two children produced when a tip with unit `heading`
/// splits by `half_angle` on each side.
///
/// In 2-D the split plane is fixed; in 3-D `azimuth` rotates the split plane
/// around the parent heading. In 1-D the only available directions are the
/// heading and its reverse.
pub fn split_heading(
    heading: Vector,
    half_angle: f64,
    azimuth: f64,
    dimension: usize,
) -> [Vector; 2] {
    if dimension <= 1 {
        return [heading, -heading];
    }
    let side = if dimension == 2 {
        Vector::xy(-heading.y, heading.x)
    } else {
        let (u, v) = perpendicular_basis(heading);
        u * azimuth.cos() + v * azimuth.sin()
    };
    let (s, c) = half_angle.sin_cos();
    [heading * c + side * s, heading * c - side * s]
}

/// Orthonormal pair spanning the plane perpendicular to unit `axis`.
pub fn perpendicular_basis(axis: Vector) -> (Vector, Vector) {
    // Cross with the coordinate axis least aligned with `axis`
    let helper = if axis.x.abs() <= axis.y.abs() && axis.x.abs() <= axis.z.abs() {
        Vector::axis(0)
    } else if axis.y.abs() <= axis.z.abs() {
        Vector::axis(1)
    } else {
        Vector::axis(2)
    };
    let u = axis.cross(helper).normalized().unwrap_or(Vector::axis(1));
    let v = axis.cross(u);
    (u, v)
}

/// Stable identifier of a walker (tip) inside one network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WalkerId(pub usize);

/// Stable identifier of a segment inside one network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentId(pub usize);

impl fmt::Display for WalkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

    #[test]
    fn normalized_rejects_zero() {
        assert!(Vector::ZERO.normalized().is_none());
        let n = Vector::xy(3.0, 4.0).normalized().unwrap();
        assert!((n.norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn split_2d_is_symmetric() {
        let h = Vector::xy(0.0, 1.0);
        let [a, b] = split_heading(h, FRAC_PI_4, 0.0, 2);
        assert!((a.angle_to(h) - FRAC_PI_4).abs() < 1e-12);
        assert!((b.angle_to(h) - FRAC_PI_4).abs() < 1e-12);
        assert!((a.angle_to(b) - FRAC_PI_2).abs() < 1e-12);
        assert!(a.fits_dimension(2) && b.fits_dimension(2));
    }

    #[test]
    fn split_3d_keeps_unit_length() {
        let h = Vector::new(1.0, 1.0, 1.0).normalized().unwrap();
        for azimuth in [0.0, 1.0, PI] {
            let [a, b] = split_heading(h, 0.3, azimuth, 3);
            assert!((a.norm() - 1.0).abs() < 1e-12);
            assert!((b.norm() - 1.0).abs() < 1e-12);
            assert!((a.angle_to(h) - 0.3).abs() < 1e-9);
            assert!((b.angle_to(h) - 0.3).abs() < 1e-9);
        }
    }

    #[test]
    fn split_1d_reverses() {
        let h = Vector::axis(0);
        assert_eq!(split_heading(h, 0.5, 0.0, 1), [h, -h]);
    }

    #[test]
    fn piece_distance_clamps_to_endpoints() {
        let a = Vector::xy(0.0, 0.0);
        let b = Vector::xy(2.0, 0.0);
        assert!((Vector::xy(1.0, 1.0).distance_to_piece(a, b) - 1.0).abs() < 1e-12);
        assert!((Vector::xy(3.0, 0.0).distance_to_piece(a, b) - 1.0).abs() < 1e-12);
        assert!((Vector::xy(-1.0, 0.0).distance_to_piece(a, a) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn deserializes_short_arrays() {
        let v: Vector = serde_json::from_str("[1.5, -2.0]").unwrap();
        assert_eq!(v, Vector::xy(1.5, -2.0));
        assert!(serde_json::from_str::<Vector>("[1, 2, 3, 4]").is_err());
    }
}
