use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use barwsim::ensemble::{run_ensemble, EnsembleStats};
use barwsim::observables::{active_tip_series, node_angles, NetworkSnapshot, NodeAngle};
use barwsim::{RunReport, Simulation, SimulationConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (YAML or JSON). If not specified, searches for barw.yaml, barw.yml, or barw.json in current directory.
    #[arg(short, long)]
    config: Option<String>,

    /// Override the generator seed
    #[arg(long)]
    seed: Option<u64>,

    /// Override the step budget
    #[arg(long)]
    steps: Option<u64>,

    /// Independent realizations to run in parallel
    #[arg(short, long, default_value_t = 1)]
    realizations: usize,

    /// Write a JSON report here
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Serialize)]
struct SingleRun<'a> {
    report: &'a RunReport,
    snapshot: NetworkSnapshot,
    node_angles: Vec<NodeAngle>,
}

#[derive(Serialize)]
struct EnsembleRun<'a> {
    stats: &'a EnsembleStats,
    reports: &'a [RunReport],
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Args) -> Result<SimulationConfig, Box<dyn std::error::Error>> {
    let mut config = if let Some(path) = args.config.as_deref() {
        // User specified a config file
        SimulationConfig::from_file(path)
            .map_err(|e| format!("Failed to load config from {}: {}", path, e))?
    } else {
        // Try default paths
        SimulationConfig::from_default_paths()
    };
    if let Some(seed) = args.seed {
        config.rng_seed = Some(seed);
    }
    if let Some(steps) = args.steps {
        config.max_steps = steps;
    }
    config.validate()?;
    Ok(config)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), Box<dyn std::error::Error>> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), value)?;
    tracing::info!(path = %path.display(), "wrote report");
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let args = Args::parse();
    let config = load_config(&args)?;

    if args.realizations > 1 {
        let reports = run_ensemble(&config, args.realizations)?;
        let stats = EnsembleStats::from_reports(&reports);
        println!("Realizations: {}", stats.realizations);
        println!("Extinct: {}", stats.extinct);
        println!(
            "Final active tips: {:.2} ± {:.2}",
            stats.final_active.mean, stats.final_active.std_dev
        );
        println!(
            "Total length: {:.2} ± {:.2}",
            stats.total_length.mean, stats.total_length.std_dev
        );
        println!(
            "Branching rate: {:.4} ± {:.4}",
            stats.branching_rate.mean, stats.branching_rate.std_dev
        );
        if let Some(path) = &args.output {
            write_json(
                path,
                &EnsembleRun {
                    stats: &stats,
                    reports: &reports,
                },
            )?;
        }
        return Ok(());
    }

    let mut sim = Simulation::new(config)?;
    let report = sim.run()?;
    let s = &report.summary;
    println!("Seed: {}", report.seed);
    println!("Stopped after {} steps: {}", report.steps, report.stop_reason);
    println!(
        "Walkers: {} (active {}, branched {}, terminated {}, annihilated {})",
        s.walkers, s.active, s.branched, s.terminated, s.annihilated
    );
    println!(
        "Segments: {}  total length {:.2}  mean {:.2}",
        s.segments, s.total_length, s.mean_segment_length
    );
    println!(
        "Branch events: {}  rate {:.4}  max generation {}",
        s.branch_events, s.branching_rate, s.max_generation
    );
    if let Some(alignment) = report.guidance_alignment {
        println!("Guidance alignment: {:.3}", alignment);
    }
    if let Some((step, active)) = active_tip_series(&report.history)
        .into_iter()
        .max_by_key(|&(_, active)| active)
    {
        println!("Peak active tips: {} at step {}", active, step);
    }

    if let Some(path) = &args.output {
        write_json(
            path,
            &SingleRun {
                report: &report,
                snapshot: NetworkSnapshot::capture(sim.network()),
                node_angles: node_angles(sim.network()),
            },
        )?;
    }
    Ok(())
}
