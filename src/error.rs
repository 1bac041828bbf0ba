//! Error types for the BARW engine.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::types::{Vector, WalkerId};
use crate::walker::WalkerStatus;

/// Resource bound that stopped a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceLimit {
    /// Active walker count would exceed `max_active_walkers`.
    ActiveWalkers(usize),
    /// Total segment count would exceed `max_segments`.
    Segments(usize),
}

impl fmt::Display for ResourceLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceLimit::ActiveWalkers(cap) => write!(f, "active walker cap of {cap}"),
            ResourceLimit::Segments(cap) => write!(f, "segment cap of {cap}"),
        }
    }
}

/// Main error type for the engine.
#[derive(Error, Debug)]
pub enum BarwError {
    /// Potential queried outside its domain under the `fail` boundary policy,
    /// or at a non-finite position under any policy.
    #[error("position {position} is outside the guidance domain")]
    OutOfDomain { position: Vector },

    /// Mutation attempted on a walker that is no longer active.
    #[error("invalid transition: walker {walker} is {status}, not active")]
    InvalidTransition {
        walker: WalkerId,
        status: WalkerStatus,
    },

    /// Identifier that does not belong to this network.
    #[error("unknown walker {0}")]
    UnknownWalker(WalkerId),

    /// A resource cap was hit.
    #[error("resource exceeded: {0}")]
    ResourceExceeded(ResourceLimit),

    /// Rejected at setup time, before any stochastic step.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// Exported network data that cannot be rebuilt into a valid tree.
    #[error("invalid snapshot: {0}")]
    Snapshot(String),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, BarwError>;

impl BarwError {
    #[must_use]
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    #[must_use]
    pub fn snapshot<S: Into<String>>(msg: S) -> Self {
        Self::Snapshot(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BarwError::config("negative branch rate");
        assert_eq!(err.to_string(), "configuration error: negative branch rate");
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = BarwError::InvalidTransition {
            walker: WalkerId(3),
            status: WalkerStatus::Annihilated,
        };
        assert_eq!(
            err.to_string(),
            "invalid transition: walker w3 is annihilated, not active"
        );
    }

    #[test]
    fn test_resource_display() {
        let err = BarwError::ResourceExceeded(ResourceLimit::ActiveWalkers(64));
        assert!(err.to_string().contains("active walker cap of 64"));
    }
}
