use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{SegmentId, Vector, WalkerId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalkerStatus {
    Active,
    /// Split into two children; the tip position is now a branch point.
    Branched,
    /// Died on its own (death event).
    Terminated,
    /// Removed by contact with another tip or an existing segment.
    Annihilated,
}

impl WalkerStatus {
    pub fn is_active(self) -> bool {
        matches!(self, WalkerStatus::Active)
    }
}

impl fmt::Display for WalkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WalkerStatus::Active => "active",
            WalkerStatus::Branched => "branched",
            WalkerStatus::Terminated => "terminated",
            WalkerStatus::Annihilated => "annihilated",
        };
        f.write_str(s)
    }
}

/// Growing tip of the network.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Walker {
    pub id: WalkerId,
    pub position: Vector,
    /// Unit vector.
    pub heading: Vector,
    /// Segment this walker traces; it owns exactly one for its lifetime.
    pub segment: SegmentId,
    pub parent: Option<WalkerId>,
    pub status: WalkerStatus,
    /// 0 for seeded walkers, parent generation + 1 for branch children.
    pub generation: u32,
    pub born_at: u64,
    pub ended_at: Option<u64>,
}

impl Walker {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}
