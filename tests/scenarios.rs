use barwsim::potential::GuidanceField;
use barwsim::rules::{Interaction, NoiseModel, SplitAngle};
use barwsim::{
    NetworkSnapshot, ResourceLimit, SeedConfig, Simulation, SimulationConfig, StopReason, Vector,
    WalkerStatus,
};

fn seed(position: Vector, heading: Vector) -> SeedConfig {
    SeedConfig { position, heading }
}

/// Deterministic walkers: no noise, no interaction, no guidance.
fn ballistic(seeds: Vec<SeedConfig>) -> SimulationConfig {
    SimulationConfig {
        seeds,
        branch_rate: 0.0,
        death_rate: 0.0,
        noise: NoiseModel::None,
        interaction: Interaction::None,
        guidance_strength: 0.0,
        field: GuidanceField::none(),
        ..Default::default()
    }
}

#[test]
fn same_seed_reproduces_run() {
    let config = SimulationConfig {
        branch_rate: 0.08,
        death_rate: 0.01,
        max_steps: 80,
        rng_seed: Some(2024),
        ..Default::default()
    };
    let mut a = Simulation::new(config.clone()).unwrap();
    let mut b = Simulation::new(config).unwrap();
    let ra = a.run().unwrap();
    let rb = b.run().unwrap();

    assert_eq!(ra.history, rb.history);
    assert_eq!(ra.summary, rb.summary);
    assert_eq!(a.network().walkers(), b.network().walkers());
    assert_eq!(a.network().segments(), b.network().segments());
}

#[test]
fn different_seeds_diverge() {
    let config = SimulationConfig {
        branch_rate: 0.1,
        max_steps: 50,
        ..Default::default()
    };
    let run = |seed| {
        let mut c = config.clone();
        c.rng_seed = Some(seed);
        let mut sim = Simulation::new(c).unwrap();
        sim.run().unwrap();
        sim.network().walkers().to_vec()
    };
    assert_ne!(run(1), run(2));
}

#[test]
fn constant_gradient_straightens_single_walker() {
    let config = SimulationConfig {
        guidance_strength: 0.5,
        field: GuidanceField::uniform(Vector::xy(1.0, 0.0)),
        max_steps: 30,
        ..ballistic(vec![seed(Vector::ZERO, Vector::xy(0.0, 1.0))])
    };
    let mut sim = Simulation::new(config).unwrap();
    let report = sim.run().unwrap();
    assert_eq!(report.stop_reason, StopReason::StepBudget);

    let net = sim.network();
    assert_eq!(net.walkers().len(), 1);
    assert_eq!(net.segments().len(), 1);
    let walker = &net.walkers()[0];
    assert!(walker.heading.angle_to(Vector::xy(1.0, 0.0)) < 1e-3);

    let (a, b) = net.segments()[0].pieces().last().unwrap();
    assert!((b - a).angle_to(Vector::xy(1.0, 0.0)) < 1e-3);
    assert!(report.guidance_alignment.unwrap() > 0.8);
}

#[test]
fn head_on_walkers_annihilate_on_schedule() {
    let gap = 10.0;
    let threshold = 1.5;
    let config = SimulationConfig {
        annihilation_distance: threshold,
        step_size: 1.0,
        max_steps: 100,
        ..ballistic(vec![
            seed(Vector::ZERO, Vector::xy(1.0, 0.0)),
            seed(Vector::xy(gap, 0.0), Vector::xy(-1.0, 0.0)),
        ])
    };
    // Closing speed is two steps per step
    let expected = (1..).find(|k| gap - 2.0 * (*k as f64) < threshold).unwrap();

    let mut sim = Simulation::new(config).unwrap();
    let report = sim.run().unwrap();
    assert_eq!(report.stop_reason, StopReason::Extinct);
    assert_eq!(report.steps, expected);

    let walkers = sim.network().walkers();
    assert!(walkers
        .iter()
        .all(|w| w.status == WalkerStatus::Annihilated));
    assert_eq!(walkers[0].ended_at, walkers[1].ended_at);
    assert_eq!(report.history.last().unwrap().annihilations, 2);
}

#[test]
fn parallel_walkers_never_meet() {
    let config = SimulationConfig {
        max_steps: 40,
        ..ballistic(vec![
            seed(Vector::ZERO, Vector::xy(0.0, 1.0)),
            seed(Vector::xy(5.0, 0.0), Vector::xy(0.0, 1.0)),
        ])
    };
    let report = Simulation::new(config).unwrap().run().unwrap();
    assert_eq!(report.stop_reason, StopReason::StepBudget);
    assert_eq!(report.summary.active, 2);
}

#[test]
fn runaway_branching_stops_at_walker_cap() {
    let cap = 16;
    let config = SimulationConfig {
        branch_rate: 1.0,
        annihilation_distance: 0.01,
        max_active_walkers: cap,
        max_steps: 1_000,
        rng_seed: Some(9),
        ..Default::default()
    };
    let mut sim = Simulation::new(config).unwrap();
    let report = sim.run().unwrap();
    assert_eq!(
        report.stop_reason,
        StopReason::ResourceExceeded(ResourceLimit::ActiveWalkers(cap))
    );
    assert!(report.history.iter().all(|r| r.active_tips <= cap));
    assert!(sim.network().active_count() <= cap);
    assert!(report.history.last().unwrap().capped_branches > 0);
    sim.network().check_invariants().unwrap();
}

#[test]
fn runaway_branching_stops_at_segment_cap() {
    let config = SimulationConfig {
        branch_rate: 1.0,
        annihilation_distance: 0.01,
        max_segments: 10,
        max_steps: 1_000,
        ..Default::default()
    };
    let mut sim = Simulation::new(config).unwrap();
    let report = sim.run().unwrap();
    assert_eq!(
        report.stop_reason,
        StopReason::ResourceExceeded(ResourceLimit::Segments(10))
    );
    assert!(sim.network().segments().len() <= 10);
}

#[test]
fn three_dimensional_growth_keeps_tree_shape() {
    let config = SimulationConfig {
        dimension: 3,
        seeds: vec![seed(Vector::ZERO, Vector::new(0.0, 0.0, 1.0))],
        field: GuidanceField::uniform(Vector::new(0.0, 0.0, 1.0)),
        branch_rate: 0.1,
        max_steps: 60,
        ..Default::default()
    };
    let mut sim = Simulation::new(config).unwrap();
    sim.run().unwrap();
    let net = sim.network();
    net.check_invariants().unwrap();
    assert!(net.branch_events() > 0);
    assert!(net.walkers().iter().all(|w| w.position.fits_dimension(3)));
}

#[test]
fn one_dimensional_walkers_stay_on_the_line() {
    let config = SimulationConfig {
        dimension: 1,
        seeds: vec![seed(Vector::ZERO, Vector::axis(0))],
        field: GuidanceField::uniform(Vector::axis(0)),
        branch_rate: 0.2,
        max_steps: 40,
        ..Default::default()
    };
    let mut sim = Simulation::new(config).unwrap();
    sim.run().unwrap();
    let net = sim.network();
    net.check_invariants().unwrap();
    for segment in net.segments() {
        assert!(segment.points.iter().all(|p| p.y == 0.0 && p.z == 0.0));
    }
}

#[test]
fn fixed_split_children_diverge_by_half_angle() {
    let half_angle = 0.4;
    let config = SimulationConfig {
        branch_rate: 1.0,
        split: SplitAngle::Fixed { half_angle },
        max_steps: 1,
        ..ballistic(vec![seed(Vector::ZERO, Vector::xy(0.0, 1.0))])
    };
    let mut sim = Simulation::new(config).unwrap();
    sim.run().unwrap();
    let net = sim.network();
    let parent = &net.walkers()[0];
    assert_eq!(parent.status, WalkerStatus::Branched);
    for child in net.active_walkers() {
        assert_eq!(child.parent, Some(parent.id));
        assert!((child.heading.angle_to(parent.heading) - half_angle).abs() < 1e-9);
    }
}

#[test]
fn finished_network_round_trips_through_snapshot() {
    let config = SimulationConfig {
        branch_rate: 0.1,
        death_rate: 0.01,
        max_steps: 60,
        ..Default::default()
    };
    let mut sim = Simulation::new(config).unwrap();
    sim.run().unwrap();
    let json = serde_json::to_string(&NetworkSnapshot::capture(sim.network())).unwrap();
    let snapshot: NetworkSnapshot = serde_json::from_str(&json).unwrap();
    let rebuilt = snapshot.into_network().unwrap();
    assert_eq!(rebuilt.walkers(), sim.network().walkers());
    assert_eq!(rebuilt.segments(), sim.network().segments());
    assert_eq!(rebuilt.branch_events(), sim.network().branch_events());
    assert_eq!(rebuilt.active_ids(), sim.network().active_ids());
}
