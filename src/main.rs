use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use web_time::Instant;

use cosmology::FmmSimulation;
use cosmology::initial::{InitialConditions, IntensityMap};
use cosmology::shared::{Simulation, SimulationSettings};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Start {
    Colliding,
    Sphere,
    Gaussian,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Fast multipole gravitational N-body simulation", long_about = None)]
struct Args {
    /// Number of particles.
    #[arg(short = 'n', long, default_value_t = 1_000_000)]
    particles: usize,

    /// Number of steps to run.
    #[arg(short, long, default_value_t = 100)]
    steps: usize,

    /// Time step.
    #[arg(long, default_value_t = 5e-3)]
    dt: f64,

    /// Multipole order.
    #[arg(short, long, default_value_t = 4, value_parser = clap::value_parser!(u8).range(0..=4))]
    order: u8,

    /// Multipole acceptance distance in units of the cell size.
    #[arg(short, long, default_value_t = 1.2)]
    acceptance: f64,

    /// Maximum number of particles in a leaf.
    #[arg(long, default_value_t = 16)]
    leaf_size: usize,

    #[arg(long, default_value_t = 64)]
    max_depth: usize,

    /// Relative cost of a multipole conversion against one particle pair.
    #[arg(long, default_value_t = 40.0)]
    cost_factor: f64,

    #[arg(long, value_enum, default_value_t = Start::Colliding)]
    start: Start,

    /// PGM image used as particle density. Falls back to `--start` if unusable.
    #[arg(short, long)]
    image: Option<PathBuf>,

    /// Compare against direct summation every this many steps; 0 disables the check.
    #[arg(long, default_value_t = 0)]
    precision_every: usize,

    /// Particles sampled by the precision check.
    #[arg(long, default_value_t = 1000)]
    precision_samples: usize,

    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn initial_conditions(args: &Args) -> InitialConditions {
    let fallback = match args.start {
        Start::Colliding => InitialConditions::CollidingSpheres,
        Start::Sphere => InitialConditions::UniformSphere { radius: 1.0 },
        Start::Gaussian => InitialConditions::GaussianCube,
    };
    let Some(path) = &args.image else {
        return fallback;
    };
    match IntensityMap::load_pgm(path) {
        Ok(map) => InitialConditions::Image(map),
        Err(err) => {
            debug_assert!(err.is_recoverable());
            warn!("{err}; using {:?} initial conditions instead", args.start);
            fallback
        }
    }
}

fn run<const N: usize>(args: &Args, settings: SimulationSettings<f32>) -> Result<()> {
    let mut sim = FmmSimulation::<f32, u64, N>::new(settings).context("invalid settings")?;
    sim.init_conditions(&initial_conditions(args))
        .context("failed to set up initial conditions")?;

    let start = Instant::now();
    for step in 1..=args.steps {
        sim.advance().with_context(|| format!("step {step} failed"))?;
        if args.precision_every > 0 && step % args.precision_every == 0 {
            sim.precision_test(args.precision_samples)?;
        }
        if step % 10 == 0 || step == args.steps {
            let particles = sim.particles();
            info!(
                "step {step}: t = {:.3}, energy {:.6e}",
                sim.elapsed(),
                particles.kinetic_energy() + particles.potential_energy()
            );
        }
    }

    let elapsed = start.elapsed();
    info!(
        "{} steps in {:.3}s ({:.3}s per step)",
        args.steps,
        elapsed.as_secs_f64(),
        elapsed.as_secs_f64() / args.steps.max(1) as f64
    );
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let settings = SimulationSettings {
        num_particles: args.particles,
        dt: args.dt as f32,
        max_depth: args.max_depth,
        max_leaf_size: args.leaf_size,
        acceptance_distance: args.acceptance,
        cost_factor: args.cost_factor,
        seed: args.seed,
        ..Default::default()
    };

    match args.order {
        0 => run::<0>(&args, settings),
        1 => run::<1>(&args, settings),
        2 => run::<2>(&args, settings),
        3 => run::<3>(&args, settings),
        _ => run::<4>(&args, settings),
    }
}
