// Global configuration and defaults

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{BarwError, Result};
use crate::potential::GuidanceField;
use crate::rules::{Interaction, NoiseModel, RateUnits, SplitAngle};
use crate::types::Vector;

/// Files searched by `from_default_paths`, in order.
pub const DEFAULT_CONFIG_PATHS: [&str; 3] = ["barw.yaml", "barw.yml", "barw.json"];

/// Index cells a single step or contact radius may span along one axis.
pub const MAX_CELLS_PER_REACH: f64 = 64.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeedConfig {
    pub position: Vector,
    pub heading: Vector,
}

// Configuration struct for simulation parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    // Geometry
    pub dimension: usize,
    pub seeds: Vec<SeedConfig>,
    pub step_size: f64,
    pub dt: f64,

    // Growth & branching
    pub rate_units: RateUnits,
    pub branch_rate: f64,
    pub death_rate: f64,
    pub split: SplitAngle,
    pub persistence: f64,
    pub noise: NoiseModel,

    // Guidance
    pub guidance_strength: f64,
    pub guidance_branch_coupling: f64,
    pub field: GuidanceField,

    // Self-interaction
    pub interaction: Interaction,

    // Annihilation
    pub annihilation_distance: f64,

    // Randomness & stopping
    pub rng_seed: Option<u64>,
    pub max_steps: u64,
    pub max_active_walkers: usize,
    pub max_segments: usize,
    pub max_wall_time_secs: Option<f64>,

    // Spatial index
    pub index_cell_size: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            dimension: 2,
            seeds: vec![SeedConfig {
                position: Vector::xy(100.0, 100.0),
                heading: Vector::xy(0.0, 1.0),
            }],
            step_size: 1.0,
            dt: 1.0,
            rate_units: RateUnits::PerStep,
            branch_rate: 0.05,
            death_rate: 0.0,
            split: SplitAngle::default(),
            persistence: 1.0,
            noise: NoiseModel::default(),
            guidance_strength: 0.1,
            guidance_branch_coupling: 0.0,
            field: GuidanceField::default(),
            interaction: Interaction::default(),
            annihilation_distance: 1.5,
            rng_seed: Some(42),
            max_steps: 200,
            max_active_walkers: 10_000,
            max_segments: 100_000,
            max_wall_time_secs: None,
            index_cell_size: 4.0,
        }
    }
}

fn positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(BarwError::config(format!("{name} must be positive, got {value}")))
    }
}

fn non_negative(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(BarwError::config(format!(
            "{name} must be non-negative, got {value}"
        )))
    }
}

impl SimulationConfig {
    /// Load from a YAML or JSON file, chosen by extension (YAML otherwise).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| BarwError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_err = |message: String| BarwError::Parse {
            path: path.to_path_buf(),
            message,
        };
        let config: SimulationConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&text).map_err(|e| parse_err(e.to_string()))?,
            _ => serde_yaml::from_str(&text).map_err(|e| parse_err(e.to_string()))?,
        };
        config.validate()?;
        tracing::info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// First loadable file among `DEFAULT_CONFIG_PATHS`, else defaults.
    pub fn from_default_paths() -> Self {
        for candidate in DEFAULT_CONFIG_PATHS {
            if !Path::new(candidate).exists() {
                continue;
            }
            match Self::from_file(candidate) {
                Ok(config) => return config,
                Err(e) => tracing::warn!(path = candidate, error = %e, "ignoring config file"),
            }
        }
        Self::default()
    }

    pub fn seed_positions(&self) -> Vec<Vector> {
        self.seeds.iter().map(|s| s.position).collect()
    }

    pub fn seed_headings(&self) -> Vec<Vector> {
        self.seeds.iter().map(|s| s.heading).collect()
    }

    /// Reject inconsistent settings before any stochastic step is taken.
    pub fn validate(&self) -> Result<()> {
        if !(1..=3).contains(&self.dimension) {
            return Err(BarwError::config(format!(
                "dimension must be 1, 2 or 3, got {}",
                self.dimension
            )));
        }
        if self.seeds.is_empty() {
            return Err(BarwError::config("at least one seed is required"));
        }
        for (i, seed) in self.seeds.iter().enumerate() {
            if !seed.position.is_finite() || !seed.heading.is_finite() {
                return Err(BarwError::config(format!("seed {i} is not finite")));
            }
            if !seed.position.fits_dimension(self.dimension)
                || !seed.heading.fits_dimension(self.dimension)
            {
                return Err(BarwError::config(format!(
                    "seed {i} has components beyond dimension {}",
                    self.dimension
                )));
            }
            if seed.heading.normalized().is_none() {
                return Err(BarwError::config(format!("seed {i} heading is zero")));
            }
        }

        positive("step_size", self.step_size)?;
        positive("dt", self.dt)?;
        positive("annihilation_distance", self.annihilation_distance)?;
        positive("index_cell_size", self.index_cell_size)?;
        let finest = self.step_size.max(self.annihilation_distance) / MAX_CELLS_PER_REACH;
        if self.index_cell_size < finest {
            return Err(BarwError::config(format!(
                "index_cell_size must be at least {finest}, got {}",
                self.index_cell_size
            )));
        }
        non_negative("branch_rate", self.branch_rate)?;
        non_negative("death_rate", self.death_rate)?;
        non_negative("persistence", self.persistence)?;
        if self.rate_units == RateUnits::PerStep {
            if self.branch_rate > 1.0 || self.death_rate > 1.0 {
                return Err(BarwError::config(
                    "per-step branch/death probabilities must not exceed 1",
                ));
            }
            if self.branch_rate + self.death_rate > 1.0 {
                tracing::warn!("branch and death probabilities sum above 1; death is drawn first");
            }
        }
        if !self.guidance_strength.is_finite() || !self.guidance_branch_coupling.is_finite() {
            return Err(BarwError::config("guidance coefficients must be finite"));
        }

        self.split.validate()?;
        self.noise.validate()?;
        self.interaction.validate()?;
        self.field.validate()?;

        if self.max_steps == 0 {
            return Err(BarwError::config("max_steps must be at least 1"));
        }
        if self.max_active_walkers < self.seeds.len() {
            return Err(BarwError::config(
                "max_active_walkers must admit every seed",
            ));
        }
        if self.max_segments < self.seeds.len() {
            return Err(BarwError::config("max_segments must admit every seed"));
        }
        if let Some(secs) = self.max_wall_time_secs {
            positive("max_wall_time_secs", secs)?;
        }
        Ok(())
    }
}
