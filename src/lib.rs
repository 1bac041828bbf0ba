//! Branching and annihilating random walks as a model of network growth.
//!
//! Walkers move through a guidance potential, split into two children and
//! are removed when they come close to another tip or to an existing trace.

pub mod config;
pub mod ensemble;
pub mod error;
pub mod network;
pub mod observables;
pub mod potential;
pub mod rules;
pub mod simulation;
pub mod spatial;
pub mod types;
pub mod walker;

pub use config::{SeedConfig, SimulationConfig};
pub use error::{BarwError, ResourceLimit, Result};
pub use network::{Collision, Network, Segment, Split};
pub use observables::{NetworkSnapshot, NetworkSummary, StepRecord};
pub use potential::{BoundaryPolicy, Bounds, FieldKind, GuidanceField, Potential};
pub use rules::{RuleSet, TransitionRules};
pub use simulation::{RunReport, Simulation, StepOutcome, StopReason};
pub use types::{SegmentId, Vector, WalkerId};
pub use walker::{Walker, WalkerStatus};
