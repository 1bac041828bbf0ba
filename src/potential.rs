//! External guidance potential: value and gradient for any position.

use serde::{Deserialize, Serialize};

use crate::error::{BarwError, Result};
use crate::types::Vector;

/// Step used by the default finite-difference gradient.
pub const DEFAULT_FD_STEP: f64 = 1e-4;

/// Scalar guidance field. Implementations must be deterministic and free of
/// side effects for a fixed configuration.
pub trait Potential {
    fn value(&self, position: Vector, time: f64) -> Result<f64>;

    /// Central-difference gradient over the three axes. Fields with an
    /// analytic gradient should override this.
    fn gradient(&self, position: Vector, time: f64) -> Result<Vector> {
        let mut grad = Vector::ZERO;
        for axis in 0..3 {
            let h = Vector::axis(axis) * DEFAULT_FD_STEP;
            let plus = self.value(position + h, time)?;
            let minus = self.value(position - h, time)?;
            grad.set(axis, (plus - minus) / (2.0 * DEFAULT_FD_STEP));
        }
        Ok(grad)
    }
}

/// Axis-aligned box; trailing axes of lower-dimensional runs are zero on
/// both corners.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: Vector,
    pub max: Vector,
}

impl Bounds {
    pub fn contains(&self, p: Vector) -> bool {
        (0..3).all(|i| p.get(i) >= self.min.get(i) && p.get(i) <= self.max.get(i))
    }

    pub fn clamp(&self, p: Vector) -> Vector {
        p.componentwise_max(self.min).componentwise_min(self.max)
    }

    pub fn is_ordered(&self) -> bool {
        (0..3).all(|i| self.min.get(i) <= self.max.get(i))
    }

    pub fn encloses(&self, other: &Bounds) -> bool {
        self.contains(other.min) && self.contains(other.max)
    }
}

/// What a query outside the domain returns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryPolicy {
    /// Evaluate at the nearest point of the domain.
    #[default]
    Clamp,
    /// Zero value and zero gradient.
    Zero,
    /// Fail with `OutOfDomain`.
    Fail,
}

/// Precomputed potential on a regular grid, multilinearly interpolated.
///
/// `values` is laid out x-fastest: index = i + nx * (j + ny * k).
/// Unused axes have extent 1.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampledField {
    pub origin: Vector,
    pub spacing: f64,
    pub shape: [usize; 3],
    pub values: Vec<f64>,
}

impl SampledField {
    pub fn extent(&self) -> Bounds {
        let mut max = self.origin;
        for axis in 0..3 {
            let cells = self.shape[axis].saturating_sub(1) as f64;
            max.set(axis, self.origin.get(axis) + cells * self.spacing);
        }
        Bounds {
            min: self.origin,
            max,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.spacing.is_finite() && self.spacing > 0.0) {
            return Err(BarwError::config("sampled field spacing must be positive"));
        }
        if self.shape.iter().any(|&n| n == 0) {
            return Err(BarwError::config("sampled field shape entries must be at least 1"));
        }
        let expected: usize = self.shape.iter().product();
        if self.values.len() != expected {
            return Err(BarwError::config(format!(
                "sampled field has {} values, shape {:?} needs {}",
                self.values.len(),
                self.shape,
                expected
            )));
        }
        if self.values.iter().any(|v| !v.is_finite()) {
            return Err(BarwError::config("sampled field contains non-finite values"));
        }
        Ok(())
    }

    fn at(&self, i: usize, j: usize, k: usize) -> f64 {
        let [nx, ny, _] = self.shape;
        self.values[i + nx * (j + ny * k)]
    }

    /// Interpolated value; `p` must already lie inside the extent.
    pub fn interpolate(&self, p: Vector) -> f64 {
        let mut base = [0usize; 3];
        let mut frac = [0.0f64; 3];
        for axis in 0..3 {
            let n = self.shape[axis];
            if n < 2 {
                continue;
            }
            let t = ((p.get(axis) - self.origin.get(axis)) / self.spacing).max(0.0);
            let i = (t.floor() as usize).min(n - 2);
            base[axis] = i;
            frac[axis] = (t - i as f64).clamp(0.0, 1.0);
        }
        let mut acc = 0.0;
        for corner in 0..8usize {
            let mut weight = 1.0;
            let mut idx = base;
            for axis in 0..3 {
                let upper = (corner >> axis) & 1 == 1;
                if self.shape[axis] < 2 {
                    if upper {
                        weight = 0.0;
                    }
                    continue;
                }
                if upper {
                    idx[axis] += 1;
                    weight *= frac[axis];
                } else {
                    weight *= 1.0 - frac[axis];
                }
            }
            if weight != 0.0 {
                acc += weight * self.at(idx[0], idx[1], idx[2]);
            }
        }
        acc
    }

    /// Central differences at half a cell, one-sided against the edges.
    pub fn gradient_at(&self, p: Vector) -> Vector {
        let extent = self.extent();
        let h = self.spacing * 0.5;
        let mut grad = Vector::ZERO;
        for axis in 0..3 {
            if self.shape[axis] < 2 {
                continue;
            }
            let mut hi = p;
            let mut lo = p;
            hi.set(axis, (p.get(axis) + h).min(extent.max.get(axis)));
            lo.set(axis, (p.get(axis) - h).max(extent.min.get(axis)));
            let span = hi.get(axis) - lo.get(axis);
            if span > 0.0 {
                grad.set(axis, (self.interpolate(hi) - self.interpolate(lo)) / span);
            }
        }
        grad
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    /// No guidance.
    None,
    /// Linear potential `g · p` with constant gradient `g`.
    Uniform { gradient: Vector },
    /// Cone `-strength * |p - center|`; climbing it leads to `center`.
    Radial { center: Vector, strength: f64 },
    /// Gaussian bump of height `amplitude` and standard width `width`.
    Gaussian {
        center: Vector,
        amplitude: f64,
        width: f64,
    },
    /// Precomputed array.
    Sampled(SampledField),
}

/// Configured guidance field with its domain handling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GuidanceField {
    pub kind: FieldKind,
    /// Defined domain. Sampled fields default to their grid extent; other
    /// kinds are unbounded when absent.
    #[serde(default)]
    pub domain: Option<Bounds>,
    #[serde(default)]
    pub boundary: BoundaryPolicy,
    /// Field strength ramps linearly from zero to full over this time.
    #[serde(default)]
    pub ramp_time: Option<f64>,
}

impl Default for GuidanceField {
    fn default() -> Self {
        Self::uniform(Vector::xy(0.0, 1.0))
    }
}

impl GuidanceField {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            domain: None,
            boundary: BoundaryPolicy::default(),
            ramp_time: None,
        }
    }

    pub fn none() -> Self {
        Self::new(FieldKind::None)
    }

    pub fn uniform(gradient: Vector) -> Self {
        Self::new(FieldKind::Uniform { gradient })
    }

    pub fn with_domain(mut self, domain: Bounds, boundary: BoundaryPolicy) -> Self {
        self.domain = Some(domain);
        self.boundary = boundary;
        self
    }

    pub fn effective_domain(&self) -> Option<Bounds> {
        match (&self.domain, &self.kind) {
            (Some(d), _) => Some(*d),
            (None, FieldKind::Sampled(s)) => Some(s.extent()),
            (None, _) => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(domain) = &self.domain {
            if !domain.min.is_finite() || !domain.max.is_finite() || !domain.is_ordered() {
                return Err(BarwError::config("guidance domain bounds must be finite and ordered"));
            }
        }
        if let Some(ramp) = self.ramp_time {
            if !(ramp.is_finite() && ramp > 0.0) {
                return Err(BarwError::config("ramp_time must be positive"));
            }
        }
        match &self.kind {
            FieldKind::None => {}
            FieldKind::Uniform { gradient } => {
                if !gradient.is_finite() {
                    return Err(BarwError::config("uniform gradient must be finite"));
                }
            }
            FieldKind::Radial { center, strength } => {
                if !center.is_finite() || !strength.is_finite() {
                    return Err(BarwError::config("radial field parameters must be finite"));
                }
            }
            FieldKind::Gaussian {
                center,
                amplitude,
                width,
            } => {
                if !center.is_finite() || !amplitude.is_finite() {
                    return Err(BarwError::config("gaussian field parameters must be finite"));
                }
                if !(width.is_finite() && *width > 0.0) {
                    return Err(BarwError::config("gaussian width must be positive"));
                }
            }
            FieldKind::Sampled(sampled) => {
                sampled.validate()?;
                if let Some(domain) = &self.domain {
                    if !sampled.extent().encloses(domain) {
                        return Err(BarwError::config(
                            "guidance domain must lie inside the sampled grid",
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Where to evaluate a query at `position`, or `None` for a zero answer.
    fn resolve(&self, position: Vector) -> Result<Option<Vector>> {
        if !position.is_finite() {
            return Err(BarwError::OutOfDomain { position });
        }
        let Some(domain) = self.effective_domain() else {
            return Ok(Some(position));
        };
        if domain.contains(position) {
            return Ok(Some(position));
        }
        tracing::trace!(%position, policy = ?self.boundary, "potential query outside domain");
        match self.boundary {
            BoundaryPolicy::Clamp => Ok(Some(domain.clamp(position))),
            BoundaryPolicy::Zero => Ok(None),
            BoundaryPolicy::Fail => Err(BarwError::OutOfDomain { position }),
        }
    }

    fn ramp(&self, time: f64) -> f64 {
        match self.ramp_time {
            Some(ramp) => (time / ramp).clamp(0.0, 1.0),
            None => 1.0,
        }
    }

    fn raw_value(&self, p: Vector) -> f64 {
        match &self.kind {
            FieldKind::None => 0.0,
            FieldKind::Uniform { gradient } => gradient.dot(p),
            FieldKind::Radial { center, strength } => -strength * p.distance(*center),
            FieldKind::Gaussian {
                center,
                amplitude,
                width,
            } => amplitude * (-p.distance_sq(*center) / (2.0 * width * width)).exp(),
            FieldKind::Sampled(sampled) => sampled.interpolate(p),
        }
    }

    fn raw_gradient(&self, p: Vector) -> Vector {
        match &self.kind {
            FieldKind::None => Vector::ZERO,
            FieldKind::Uniform { gradient } => *gradient,
            FieldKind::Radial { center, strength } => match (p - *center).normalized() {
                Some(outward) => outward * -strength,
                None => Vector::ZERO,
            },
            FieldKind::Gaussian { center, width, .. } => {
                (p - *center) * (-self.raw_value(p) / (width * width))
            }
            FieldKind::Sampled(sampled) => sampled.gradient_at(p),
        }
    }
}

impl Potential for GuidanceField {
    fn value(&self, position: Vector, time: f64) -> Result<f64> {
        Ok(match self.resolve(position)? {
            Some(p) => self.raw_value(p) * self.ramp(time),
            None => 0.0,
        })
    }

    fn gradient(&self, position: Vector, time: f64) -> Result<Vector> {
        Ok(match self.resolve(position)? {
            Some(p) => self.raw_gradient(p) * self.ramp(time),
            None => Vector::ZERO,
        })
    }
}
