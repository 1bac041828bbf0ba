//! Read-only views over a network: per-step records, run summaries,
//! heading statistics and a serializable snapshot.

use serde::{Deserialize, Serialize};

use crate::error::{BarwError, Result};
use crate::network::{Network, Segment};
use crate::potential::Potential;
use crate::walker::{Walker, WalkerStatus};

/// Counts recorded after every step.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: u64,
    pub time: f64,
    /// Active walkers when the step began.
    pub tips_at_start: usize,
    pub active_tips: usize,
    pub total_segments: usize,
    pub total_length: f64,
    pub branch_events: usize,
    pub deaths: usize,
    pub collisions: usize,
    pub annihilations: usize,
    /// Branches sampled but not applied because of a resource cap.
    pub capped_branches: usize,
}

/// Aggregate description of a network.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkSummary {
    pub time: u64,
    pub walkers: usize,
    pub active: usize,
    pub branched: usize,
    pub terminated: usize,
    pub annihilated: usize,
    pub segments: usize,
    pub branch_events: u64,
    pub total_length: f64,
    pub mean_segment_length: f64,
    pub max_generation: u32,
    /// Branch events per active tip-step over the recorded history.
    pub branching_rate: f64,
}

impl NetworkSummary {
    pub fn from_network(network: &Network, history: &[StepRecord]) -> Self {
        let mut summary = NetworkSummary {
            time: network.time(),
            walkers: network.walkers().len(),
            segments: network.segments().len(),
            branch_events: network.branch_events(),
            total_length: network.total_length(),
            ..Default::default()
        };
        for walker in network.walkers() {
            match walker.status {
                WalkerStatus::Active => summary.active += 1,
                WalkerStatus::Branched => summary.branched += 1,
                WalkerStatus::Terminated => summary.terminated += 1,
                WalkerStatus::Annihilated => summary.annihilated += 1,
            }
            summary.max_generation = summary.max_generation.max(walker.generation);
        }
        if summary.segments > 0 {
            summary.mean_segment_length = summary.total_length / summary.segments as f64;
        }
        let tip_steps: usize = history.iter().map(|r| r.tips_at_start).sum();
        let branches: usize = history.iter().map(|r| r.branch_events).sum();
        if tip_steps > 0 {
            summary.branching_rate = branches as f64 / tip_steps as f64;
        }
        summary
    }
}

/// Active tips over time, one entry per recorded step.
pub fn active_tip_series(history: &[StepRecord]) -> Vec<(u64, usize)> {
    history.iter().map(|r| (r.step, r.active_tips)).collect()
}

/// Direction of one trace piece in the xy plane.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeAngle {
    /// Angle from the +x axis in degrees, in (-180, 180].
    pub degrees: f64,
    pub generation: u32,
}

/// Heading of every trace piece, labelled with its walker's generation.
/// Empty for one-dimensional networks.
pub fn node_angles(network: &Network) -> Vec<NodeAngle> {
    if network.dimension() < 2 {
        return Vec::new();
    }
    let mut angles = Vec::new();
    for segment in network.segments() {
        let generation = network
            .walker(segment.owner)
            .map_or(0, |w| w.generation);
        for (a, b) in segment.pieces() {
            let d = b - a;
            if d.x == 0.0 && d.y == 0.0 {
                continue;
            }
            angles.push(NodeAngle {
                degrees: d.y.atan2(d.x).to_degrees(),
                generation,
            });
        }
    }
    angles
}

/// Length-weighted mean cosine between trace pieces and the potential
/// gradient at their midpoints.
///
/// Pieces outside the potential's domain or where the gradient vanishes are
/// skipped. `None` when nothing is left to average.
pub fn guidance_alignment(
    network: &Network,
    potential: &dyn Potential,
    time: f64,
) -> Result<Option<f64>> {
    let mut weighted = 0.0;
    let mut weight = 0.0;
    for segment in network.segments() {
        for (a, b) in segment.pieces() {
            let d = b - a;
            let length = d.norm();
            let Some(dir) = d.normalized() else {
                continue;
            };
            let grad = match potential.gradient((a + b) * 0.5, time) {
                Ok(g) => g,
                Err(BarwError::OutOfDomain { .. }) => continue,
                Err(e) => return Err(e),
            };
            let Some(grad) = grad.normalized() else {
                continue;
            };
            weighted += dir.dot(grad) * length;
            weight += length;
        }
    }
    Ok((weight > 0.0).then(|| weighted / weight))
}

/// Serializable copy of a network's full state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub dimension: usize,
    pub time: u64,
    pub index_cell_size: f64,
    pub walkers: Vec<Walker>,
    pub segments: Vec<Segment>,
}

impl NetworkSnapshot {
    pub fn capture(network: &Network) -> Self {
        Self {
            dimension: network.dimension(),
            time: network.time(),
            index_cell_size: network.index_cell_size(),
            walkers: network.walkers().to_vec(),
            segments: network.segments().to_vec(),
        }
    }

    /// Rebuild a live network, checking every structural invariant.
    pub fn into_network(self) -> Result<Network> {
        Network::restore(
            self.dimension,
            self.time,
            self.walkers,
            self.segments,
            self.index_cell_size,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Split;
    use crate::potential::GuidanceField;
    use crate::types::Vector;

    fn grown() -> Network {
        let mut net = Network::seed(2, &[Vector::ZERO], &[Vector::xy(1.0, 0.0)], 4.0).unwrap();
        net.advance_walker(crate::types::WalkerId(0), Vector::xy(1.0, 0.0), Vector::xy(1.0, 0.0))
            .unwrap();
        let (a, b) = net
            .branch(
                crate::types::WalkerId(0),
                Split {
                    half_angle: std::f64::consts::FRAC_PI_4,
                    azimuth: 0.0,
                },
            )
            .unwrap();
        for id in [a, b] {
            let w = net.walker(id).unwrap().clone();
            net.advance_walker(id, w.position + w.heading, w.heading)
                .unwrap();
        }
        net.terminate(a).unwrap();
        net
    }

    #[test]
    fn summary_counts_statuses() {
        let net = grown();
        let history = vec![
            StepRecord {
                tips_at_start: 1,
                ..Default::default()
            },
            StepRecord {
                tips_at_start: 1,
                branch_events: 1,
                ..Default::default()
            },
        ];
        let s = NetworkSummary::from_network(&net, &history);
        assert_eq!(s.walkers, 3);
        assert_eq!(s.active, 1);
        assert_eq!(s.branched, 1);
        assert_eq!(s.terminated, 1);
        assert_eq!(s.max_generation, 1);
        assert!((s.total_length - 3.0).abs() < 1e-12);
        assert!((s.mean_segment_length - 1.0).abs() < 1e-12);
        assert!((s.branching_rate - 0.5).abs() < 1e-12);
    }

    #[test]
    fn angles_follow_pieces() {
        let angles = node_angles(&grown());
        assert_eq!(angles.len(), 3);
        assert_eq!(angles[0].degrees, 0.0);
        assert_eq!(angles[0].generation, 0);
        let mut child: Vec<f64> = angles[1..].iter().map(|a| a.degrees.round()).collect();
        child.sort_by(f64::total_cmp);
        assert_eq!(child, vec![-45.0, 45.0]);
    }

    #[test]
    fn alignment_is_length_weighted_cosine() {
        let net = grown();
        let field = GuidanceField::uniform(Vector::xy(1.0, 0.0));
        let a = guidance_alignment(&net, &field, 0.0).unwrap().unwrap();
        let expected = (1.0 + 2.0 * std::f64::consts::FRAC_1_SQRT_2) / 3.0;
        assert!((a - expected).abs() < 1e-9);
        assert_eq!(
            guidance_alignment(&net, &GuidanceField::none(), 0.0).unwrap(),
            None
        );
    }

    #[test]
    fn snapshot_survives_json() {
        let net = grown();
        let json = serde_json::to_string(&NetworkSnapshot::capture(&net)).unwrap();
        let back: NetworkSnapshot = serde_json::from_str(&json).unwrap();
        let rebuilt = back.into_network().unwrap();
        assert_eq!(rebuilt.walkers(), net.walkers());
        assert_eq!(rebuilt.active_ids(), net.active_ids());
        assert!((rebuilt.total_length() - net.total_length()).abs() < 1e-12);
    }

    #[test]
    fn series_tracks_active_tips() {
        let history = vec![
            StepRecord {
                step: 1,
                active_tips: 2,
                ..Default::default()
            },
            StepRecord {
                step: 2,
                active_tips: 0,
                ..Default::default()
            },
        ];
        assert_eq!(active_tip_series(&history), vec![(1, 2), (2, 0)]);
    }
}
