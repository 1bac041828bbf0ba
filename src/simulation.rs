use ::rand as external_rand;
use external_rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

use crate::config::SimulationConfig;
use crate::error::{BarwError, ResourceLimit, Result};
use crate::network::{Network, Split};
use crate::observables::{guidance_alignment, NetworkSummary, StepRecord};
use crate::rules::{RuleSet, TransitionRules};
use crate::types::{Vector, WalkerId};

/// Why a run ended. Every variant is a normal, reportable outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// No active walkers left.
    Extinct,
    /// `max_steps` reached.
    StepBudget,
    /// A branch would have crossed a resource cap; it was not applied.
    ResourceExceeded(ResourceLimit),
    /// `max_wall_time_secs` elapsed.
    WallTime,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Extinct => f.write_str("no active walkers"),
            StopReason::StepBudget => f.write_str("step budget exhausted"),
            StopReason::ResourceExceeded(limit) => write!(f, "reached {limit}"),
            StopReason::WallTime => f.write_str("wall time exhausted"),
        }
    }
}

/// Outcome sampled for one walker, applied after the whole pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StepOutcome {
    Move { heading: Vector },
    Branch(Split),
    Terminate,
}

/// Final state of a run as seen by the outer layers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    /// Generator seed; re-running with it reproduces the run bit for bit.
    pub seed: u64,
    pub stop_reason: StopReason,
    pub steps: u64,
    pub summary: NetworkSummary,
    /// Length-weighted alignment of the network with the guidance gradient.
    pub guidance_alignment: Option<f64>,
    pub history: Vec<StepRecord>,
}

impl RunReport {
    /// Turn a resource stop into an error for callers that treat it as one.
    pub fn ensure_within_limits(&self) -> Result<&Self> {
        match self.stop_reason {
            StopReason::ResourceExceeded(limit) => Err(BarwError::ResourceExceeded(limit)),
            _ => Ok(self),
        }
    }
}

// Simulation - owns the network, the rule set and the single generator
pub struct Simulation<T: TransitionRules = RuleSet> {
    pub config: SimulationConfig,
    pub rules: T,
    network: Network,
    rng: ChaCha8Rng,
    seed: u64,
    history: Vec<StepRecord>,
    stop_reason: Option<StopReason>,
    started: Option<Instant>,
}

impl Simulation<RuleSet> {
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let rules = RuleSet::from_config(&config);
        Self::with_rules(config, rules)
    }
}

impl<T: TransitionRules> Simulation<T> {
    /// Build a simulation driven by custom rules.
    pub fn with_rules(config: SimulationConfig, rules: T) -> Result<Self> {
        config.validate()?;
        let network = Network::seed(
            config.dimension,
            &config.seed_positions(),
            &config.seed_headings(),
            config.index_cell_size,
        )?;
        let seed = match config.rng_seed {
            Some(seed) => seed,
            None => {
                let seed = external_rand::random::<u64>();
                tracing::warn!(seed, "no rng_seed configured; drew one from entropy");
                seed
            }
        };
        Ok(Self {
            config,
            rules,
            network,
            rng: ChaCha8Rng::seed_from_u64(seed),
            seed,
            history: Vec::new(),
            stop_reason: None,
            started: None,
        })
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn history(&self) -> &[StepRecord] {
        &self.history
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    /// Sample an outcome for every active walker against the state at the
    /// start of the step. Walkers are visited in ascending id; each draws
    /// death, then branch, then (split | heading noise).
    fn plan(&mut self) -> Result<Vec<(WalkerId, StepOutcome)>> {
        let network = &self.network;
        let rng = &mut self.rng;
        let mut plan = Vec::with_capacity(network.active_count());
        for walker in network.active_walkers() {
            let p_death = self.rules.death_probability(walker, network)?;
            if rng.gen::<f64>() < p_death {
                plan.push((walker.id, StepOutcome::Terminate));
                continue;
            }
            let p_branch = self.rules.branch_probability(walker, network)?;
            if rng.gen::<f64>() < p_branch {
                let split = self.rules.sample_split(walker, network, rng);
                plan.push((walker.id, StepOutcome::Branch(split)));
                continue;
            }
            let heading = self.rules.step_bias(walker, network, rng)?;
            plan.push((walker.id, StepOutcome::Move { heading }));
        }
        Ok(plan)
    }

    fn cap_for_branch(&self) -> Option<ResourceLimit> {
        if self.network.active_count() + 1 > self.config.max_active_walkers {
            return Some(ResourceLimit::ActiveWalkers(self.config.max_active_walkers));
        }
        if self.network.segments().len() + 2 > self.config.max_segments {
            return Some(ResourceLimit::Segments(self.config.max_segments));
        }
        None
    }

    /// Advance the whole network by one step.
    ///
    /// Returns the stop reason once the run is over; further calls are
    /// no-ops returning the same reason.
    pub fn step(&mut self) -> Result<Option<StopReason>> {
        if let Some(reason) = self.stop_reason {
            return Ok(Some(reason));
        }
        let started = *self.started.get_or_insert_with(Instant::now);
        let tips_at_start = self.network.active_count();
        let plan = self.plan()?;

        let step_size = self.config.step_size;
        let mut record = StepRecord {
            step: 0,
            time: 0.0,
            tips_at_start,
            ..Default::default()
        };
        let mut capped = None;
        for (id, outcome) in plan {
            match outcome {
                StepOutcome::Terminate => {
                    self.network.terminate(id)?;
                    record.deaths += 1;
                }
                StepOutcome::Move { heading } => {
                    let position = self.network.walker(id).map(|w| w.position);
                    let position = position.ok_or(BarwError::UnknownWalker(id))?;
                    self.network
                        .advance_walker(id, position + heading * step_size, heading)?;
                }
                StepOutcome::Branch(split) => {
                    if let Some(limit) = self.cap_for_branch() {
                        capped = Some(limit);
                        record.capped_branches += 1;
                        continue;
                    }
                    let (a, b) = self.network.branch(id, split)?;
                    // Children leave the branch point straight along their split headings
                    for child in [a, b] {
                        let (position, heading) = self
                            .network
                            .walker(child)
                            .map(|w| (w.position, w.heading))
                            .ok_or(BarwError::UnknownWalker(child))?;
                        self.network
                            .advance_walker(child, position + heading * step_size, heading)?;
                    }
                    record.branch_events += 1;
                }
            }
        }

        let collisions = self
            .network
            .detect_collisions(self.config.annihilation_distance);
        let victims = self.network.annihilate_all(&collisions)?;
        record.collisions = collisions.len();
        record.annihilations = victims.len();

        self.network.tick();
        record.step = self.network.time();
        record.time = self.network.time() as f64 * self.config.dt;
        record.active_tips = self.network.active_count();
        record.total_segments = self.network.segments().len();
        record.total_length = self.network.total_length();
        tracing::debug!(
            step = record.step,
            active = record.active_tips,
            branches = record.branch_events,
            deaths = record.deaths,
            annihilated = record.annihilations,
            "step"
        );
        self.history.push(record);

        let reason = if let Some(limit) = capped {
            Some(StopReason::ResourceExceeded(limit))
        } else if self.network.active_count() == 0 {
            Some(StopReason::Extinct)
        } else if self.network.time() >= self.config.max_steps {
            Some(StopReason::StepBudget)
        } else {
            match self.config.max_wall_time_secs {
                Some(secs) if started.elapsed().as_secs_f64() >= secs => Some(StopReason::WallTime),
                _ => None,
            }
        };
        if let Some(reason) = reason {
            tracing::info!(
                %reason,
                step = self.network.time(),
                walkers = self.network.walkers().len(),
                "simulation stopped"
            );
            self.stop_reason = Some(reason);
        }
        Ok(reason)
    }

    /// Step until a stop condition holds.
    pub fn run(&mut self) -> Result<RunReport> {
        tracing::info!(
            seed = self.seed,
            seeds = self.network.active_count(),
            max_steps = self.config.max_steps,
            "starting simulation"
        );
        let reason = loop {
            if let Some(reason) = self.step()? {
                break reason;
            }
        };
        self.report(reason)
    }

    fn report(&self, stop_reason: StopReason) -> Result<RunReport> {
        let alignment = match self.rules.potential() {
            Some(field) => guidance_alignment(
                &self.network,
                field,
                self.network.time() as f64 * self.config.dt,
            )?,
            None => None,
        };
        Ok(RunReport {
            seed: self.seed,
            stop_reason,
            steps: self.network.time(),
            summary: NetworkSummary::from_network(&self.network, &self.history),
            guidance_alignment: alignment,
            history: self.history.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::potential::GuidanceField;
    use crate::rules::{Interaction, NoiseModel, SplitAngle};
    use crate::walker::WalkerStatus;

    fn base_config() -> SimulationConfig {
        SimulationConfig {
            seeds: vec![crate::config::SeedConfig {
                position: Vector::ZERO,
                heading: Vector::xy(0.0, 1.0),
            }],
            branch_rate: 0.0,
            death_rate: 0.0,
            noise: NoiseModel::None,
            interaction: Interaction::None,
            field: GuidanceField::none(),
            guidance_strength: 0.0,
            max_steps: 10,
            ..Default::default()
        }
    }

    #[test]
    fn straight_walk_reaches_step_budget() {
        let mut sim = Simulation::new(base_config()).unwrap();
        let report = sim.run().unwrap();
        assert_eq!(report.stop_reason, StopReason::StepBudget);
        assert_eq!(report.steps, 10);
        let w = &sim.network().walkers()[0];
        assert!((w.position - Vector::xy(0.0, 10.0)).norm() < 1e-9);
        assert_eq!(report.history.len(), 10);
        assert!((report.summary.total_length - 10.0).abs() < 1e-9);
    }

    #[test]
    fn certain_death_ends_run() {
        let config = SimulationConfig {
            death_rate: 1.0,
            ..base_config()
        };
        let mut sim = Simulation::new(config).unwrap();
        let report = sim.run().unwrap();
        assert_eq!(report.stop_reason, StopReason::Extinct);
        assert_eq!(report.steps, 1);
        assert_eq!(sim.network().walkers()[0].status, WalkerStatus::Terminated);
        // Stepping a finished run changes nothing
        assert_eq!(sim.step().unwrap(), Some(StopReason::Extinct));
        assert_eq!(sim.network().time(), 1);
    }

    #[test]
    fn branch_children_step_away_from_branch_point() {
        let config = SimulationConfig {
            branch_rate: 1.0,
            split: SplitAngle::Fixed { half_angle: 0.5 },
            max_steps: 1,
            ..base_config()
        };
        let mut sim = Simulation::new(config).unwrap();
        sim.run().unwrap();
        let net = sim.network();
        assert_eq!(net.active_count(), 2);
        for w in net.active_walkers() {
            let seg = net.segment(w.segment).unwrap();
            assert_eq!(seg.start(), Vector::ZERO);
            assert!((seg.length - 1.0).abs() < 1e-12);
        }
        net.check_invariants().unwrap();
    }

    #[test]
    fn configuration_errors_fail_before_running() {
        let config = SimulationConfig {
            death_rate: -1.0,
            ..base_config()
        };
        assert!(matches!(
            Simulation::new(config),
            Err(BarwError::Configuration(_))
        ));
    }

    #[test]
    fn resource_stop_converts_to_error_on_request() {
        let config = SimulationConfig {
            branch_rate: 1.0,
            max_active_walkers: 3,
            max_steps: 50,
            ..base_config()
        };
        let report = Simulation::new(config).unwrap().run().unwrap();
        assert_eq!(
            report.stop_reason,
            StopReason::ResourceExceeded(ResourceLimit::ActiveWalkers(3))
        );
        assert!(matches!(
            report.ensure_within_limits(),
            Err(BarwError::ResourceExceeded(_))
        ));
    }

    #[test]
    fn wall_time_budget_stops_run() {
        let config = SimulationConfig {
            max_steps: 1_000_000_000,
            max_wall_time_secs: Some(1e-9),
            ..base_config()
        };
        let report = Simulation::new(config).unwrap().run().unwrap();
        assert_eq!(report.stop_reason, StopReason::WallTime);
        assert!(report.steps < 1_000_000_000);
        assert_eq!(report.summary.active, 1);
    }

    #[test]
    fn out_of_domain_under_fail_policy_is_reported() {
        use crate::potential::{BoundaryPolicy, Bounds};
        let config = SimulationConfig {
            guidance_strength: 1.0,
            field: GuidanceField::uniform(Vector::xy(1.0, 0.0)).with_domain(
                Bounds {
                    min: Vector::xy(-1.0, -1.0),
                    max: Vector::xy(1.0, 0.5),
                },
                BoundaryPolicy::Fail,
            ),
            ..base_config()
        };
        let mut sim = Simulation::new(config).unwrap();
        assert!(sim.step().unwrap().is_none());
        let before = sim.network().walkers()[0].clone();
        assert!(matches!(sim.step(), Err(BarwError::OutOfDomain { .. })));
        // Planning failed, so nothing was applied
        assert_eq!(sim.network().walkers()[0], before);
    }
}
