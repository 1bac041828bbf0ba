//! Transition rules: per-step heading bias, branching and death
//! probabilities for an active walker.

use ::rand as external_rand;
use external_rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};

use crate::config::SimulationConfig;
use crate::error::{BarwError, Result};
use crate::network::{Network, Split};
use crate::potential::{FieldKind, GuidanceField, Potential};
use crate::types::Vector;
use crate::walker::Walker;

/// Capability interface the simulation loop drives.
///
/// Probabilities are per step of fixed duration. Every random draw goes
/// through the generator passed in, so the loop controls the draw order.
pub trait TransitionRules {
    /// New unit heading for a walker that moves this step.
    fn step_bias<R: Rng + ?Sized>(
        &self,
        walker: &Walker,
        network: &Network,
        rng: &mut R,
    ) -> Result<Vector>;

    /// Chance in [0, 1] that the walker branches this step.
    fn branch_probability(&self, walker: &Walker, network: &Network) -> Result<f64>;

    /// Chance in [0, 1] that the walker terminates this step.
    fn death_probability(&self, walker: &Walker, network: &Network) -> Result<f64>;

    /// Split used when the walker branches.
    fn sample_split<R: Rng + ?Sized>(&self, walker: &Walker, network: &Network, rng: &mut R)
        -> Split;

    /// Field the rules steer by, if any; used for alignment reporting.
    fn potential(&self) -> Option<&dyn Potential> {
        None
    }
}

/// How configured rates are read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateUnits {
    /// Already a probability per step.
    #[default]
    PerStep,
    /// Events per unit time, converted with p = 1 - exp(-rate * dt).
    PerUnitTime,
}

impl RateUnits {
    pub fn to_step_probability(self, rate: f64, dt: f64) -> f64 {
        match self {
            RateUnits::PerStep => rate,
            RateUnits::PerUnitTime => 1.0 - (-rate * dt).exp(),
        }
    }
}

/// Distribution of the angle between a parent heading and each child.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SplitAngle {
    Fixed { half_angle: f64 },
    Uniform { min: f64, max: f64 },
}

impl Default for SplitAngle {
    fn default() -> Self {
        SplitAngle::Uniform {
            min: PI / 10.0,
            max: PI / 2.0,
        }
    }
}

impl SplitAngle {
    pub fn validate(&self) -> Result<()> {
        let in_range = |a: f64| a.is_finite() && a > 0.0 && a < PI;
        match *self {
            SplitAngle::Fixed { half_angle } if !in_range(half_angle) => Err(
                BarwError::config("split half_angle must lie in (0, pi)"),
            ),
            SplitAngle::Uniform { min, max } if !(in_range(min) && in_range(max)) => Err(
                BarwError::config("split bounds must lie in (0, pi)"),
            ),
            SplitAngle::Uniform { min, max } if min > max => {
                Err(BarwError::config("split min must not exceed max"))
            }
            _ => Ok(()),
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match *self {
            SplitAngle::Fixed { half_angle } => half_angle,
            SplitAngle::Uniform { min, max } => rng.gen_range(min..=max),
        }
    }
}

/// Random perturbation added to the heading before normalization.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NoiseModel {
    None,
    /// Isotropic Gaussian vector with per-axis standard deviation `sigma`.
    Gaussian { sigma: f64 },
    /// Uniform point in the ball of the given radius.
    UniformBall { radius: f64 },
}

impl Default for NoiseModel {
    fn default() -> Self {
        NoiseModel::Gaussian { sigma: 0.1 }
    }
}

impl NoiseModel {
    pub fn validate(&self) -> Result<()> {
        match *self {
            NoiseModel::Gaussian { sigma } if !(sigma.is_finite() && sigma >= 0.0) => {
                Err(BarwError::config("noise sigma must be non-negative"))
            }
            NoiseModel::UniformBall { radius } if !(radius.is_finite() && radius >= 0.0) => {
                Err(BarwError::config("noise radius must be non-negative"))
            }
            _ => Ok(()),
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, dimension: usize, rng: &mut R) -> Vector {
        let mut v = Vector::ZERO;
        match *self {
            NoiseModel::None => {}
            NoiseModel::Gaussian { sigma } => {
                for axis in 0..dimension {
                    let z: f64 = rng.sample(StandardNormal);
                    v.set(axis, z * sigma);
                }
            }
            NoiseModel::UniformBall { radius } => loop {
                for axis in 0..dimension {
                    v.set(axis, rng.gen_range(-1.0..=1.0));
                }
                if v.norm_sq() <= 1.0 {
                    v = v * radius;
                    break;
                }
            },
        }
        v
    }
}

/// Steering from nearby network nodes: `strength` times the normalized sum
/// of unit vectors toward them. Negative strength repels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Avoidance {
    pub strength: f64,
    pub radius: f64,
}

/// Density-dependent modulation of branching and death.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContactInhibition {
    pub radius: f64,
    /// Node count above which the tip counts as crowded.
    pub threshold: usize,
    /// Fraction of the branching probability removed when crowded.
    pub branch_suppression: f64,
    /// Relative branching boost when not crowded.
    #[serde(default)]
    pub branch_boost: f64,
    /// Added to the death probability when crowded.
    #[serde(default)]
    pub death_increase: f64,
}

/// Self-interaction variants.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Interaction {
    None,
    Avoidance(Avoidance),
    ContactInhibition(ContactInhibition),
    Combined {
        avoidance: Avoidance,
        inhibition: ContactInhibition,
    },
}

impl Default for Interaction {
    fn default() -> Self {
        Interaction::Avoidance(Avoidance {
            strength: -0.1,
            radius: 3.0,
        })
    }
}

impl Interaction {
    pub fn avoidance(&self) -> Option<&Avoidance> {
        match self {
            Interaction::Avoidance(a) | Interaction::Combined { avoidance: a, .. } => Some(a),
            _ => None,
        }
    }

    pub fn inhibition(&self) -> Option<&ContactInhibition> {
        match self {
            Interaction::ContactInhibition(c) | Interaction::Combined { inhibition: c, .. } => {
                Some(c)
            }
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(a) = self.avoidance() {
            if !a.strength.is_finite() {
                return Err(BarwError::config("avoidance strength must be finite"));
            }
            if !(a.radius.is_finite() && a.radius > 0.0) {
                return Err(BarwError::config("avoidance radius must be positive"));
            }
        }
        if let Some(c) = self.inhibition() {
            if !(c.radius.is_finite() && c.radius > 0.0) {
                return Err(BarwError::config("inhibition radius must be positive"));
            }
            if !(0.0..=1.0).contains(&c.branch_suppression) {
                return Err(BarwError::config("branch_suppression must lie in [0, 1]"));
            }
            if !(c.branch_boost.is_finite() && c.branch_boost >= 0.0) {
                return Err(BarwError::config("branch_boost must be non-negative"));
            }
            if !(0.0..=1.0).contains(&c.death_increase) {
                return Err(BarwError::config("death_increase must lie in [0, 1]"));
            }
        }
        Ok(())
    }
}

/// Standard rule set: persistence + guidance + self-interaction + noise.
#[derive(Clone, Debug, PartialEq)]
pub struct RuleSet {
    /// Per-step branching probability before modulation.
    pub branch_probability: f64,
    /// Per-step death probability before modulation.
    pub death_probability: f64,
    pub persistence: f64,
    pub guidance_strength: f64,
    /// Relative change of branching per unit of potential value.
    pub guidance_branch_coupling: f64,
    pub field: GuidanceField,
    pub interaction: Interaction,
    pub noise: NoiseModel,
    pub split: SplitAngle,
    /// Time per step, used to evaluate time-dependent fields.
    pub dt: f64,
}

impl RuleSet {
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            branch_probability: config
                .rate_units
                .to_step_probability(config.branch_rate, config.dt),
            death_probability: config
                .rate_units
                .to_step_probability(config.death_rate, config.dt),
            persistence: config.persistence,
            guidance_strength: config.guidance_strength,
            guidance_branch_coupling: config.guidance_branch_coupling,
            field: config.field.clone(),
            interaction: config.interaction,
            noise: config.noise,
            split: config.split,
            dt: config.dt,
        }
    }

    fn field_time(&self, network: &Network) -> f64 {
        network.time() as f64 * self.dt
    }

    /// Whether the walker's neighbourhood is crowded under contact inhibition.
    fn crowded(&self, walker: &Walker, network: &Network) -> Option<bool> {
        self.interaction
            .inhibition()
            .map(|c| network.local_density(walker, c.radius) > c.threshold)
    }
}

impl TransitionRules for RuleSet {
    fn step_bias<R: Rng + ?Sized>(
        &self,
        walker: &Walker,
        network: &Network,
        rng: &mut R,
    ) -> Result<Vector> {
        let dimension = network.dimension();
        let mut combined = walker.heading * self.persistence;

        if self.guidance_strength != 0.0 {
            let grad = self
                .field
                .gradient(walker.position, self.field_time(network))?;
            combined += grad.truncated(dimension) * self.guidance_strength;
        }

        if let Some(avoidance) = self.interaction.avoidance() {
            let pull = network
                .nearby_nodes(walker, avoidance.radius)
                .into_iter()
                .filter_map(|node| (node - walker.position).normalized())
                .fold(Vector::ZERO, |acc, u| acc + u);
            if let Some(dir) = pull.normalized() {
                combined += dir * avoidance.strength;
            }
        }

        combined += self.noise.sample(dimension, rng);

        // Cancelling terms leave the heading unchanged
        Ok(combined
            .truncated(dimension)
            .normalized()
            .unwrap_or(walker.heading))
    }

    fn branch_probability(&self, walker: &Walker, network: &Network) -> Result<f64> {
        let mut p = self.branch_probability;
        if self.guidance_branch_coupling != 0.0 {
            let value = self
                .field
                .value(walker.position, self.field_time(network))?;
            p *= (1.0 + self.guidance_branch_coupling * value).max(0.0);
        }
        if let (Some(crowded), Some(c)) = (
            self.crowded(walker, network),
            self.interaction.inhibition(),
        ) {
            p *= if crowded {
                1.0 - c.branch_suppression
            } else {
                1.0 + c.branch_boost
            };
        }
        Ok(p.clamp(0.0, 1.0))
    }

    fn death_probability(&self, walker: &Walker, network: &Network) -> Result<f64> {
        let mut p = self.death_probability;
        if let (Some(true), Some(c)) = (
            self.crowded(walker, network),
            self.interaction.inhibition(),
        ) {
            p += c.death_increase;
        }
        Ok(p.clamp(0.0, 1.0))
    }

    fn sample_split<R: Rng + ?Sized>(
        &self,
        _walker: &Walker,
        network: &Network,
        rng: &mut R,
    ) -> Split {
        let half_angle = self.split.sample(rng);
        let azimuth = if network.dimension() == 3 {
            rng.gen_range(0.0..TAU)
        } else {
            0.0
        };
        Split {
            half_angle,
            azimuth,
        }
    }

    fn potential(&self) -> Option<&dyn Potential> {
        match self.field.kind {
            FieldKind::None => None,
            _ => Some(&self.field),
        }
    }
}
