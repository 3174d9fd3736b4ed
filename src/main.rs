use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fractal_tree::{
    generate_deterministic, generate_stochastic, walk, BatchOutput, GenerationConfig, GenerationTimer,
    LinearCurve, Result, Schedule, StochasticSettings, ValueRange, WalkOutcome, WalkSettings,
};

/// Generate fractal branch trees into a flat buffer and report on them.
#[derive(Parser, Debug)]
#[command(name = "fractal-tree", version)]
struct Args {
    /// Children per branch
    #[arg(long, default_value_t = 2)]
    splits: u32,

    /// Generation rounds (root = round 1)
    #[arg(long, default_value_t = 4)]
    depth: u32,

    /// Trees packed into one buffer
    #[arg(long, default_value_t = 1)]
    generations: u32,

    /// Fixed tilt in degrees (deterministic)
    #[arg(long, default_value_t = 30.0)]
    angle: f32,

    /// Fixed branch size (deterministic)
    #[arg(long, default_value_t = 1.0)]
    size: f32,

    /// Use ranged random tilt/size instead of fixed values
    #[arg(long)]
    stochastic: bool,

    #[arg(long, default_value_t = 0.0)]
    angle_min: f32,

    #[arg(long, default_value_t = 45.0)]
    angle_max: f32,

    #[arg(long, default_value_t = 0.5)]
    size_min: f32,

    #[arg(long, default_value_t = 1.0)]
    size_max: f32,

    /// Size multiplier at the deepest level (linear taper from 1.0)
    #[arg(long, default_value_t = 1.0)]
    taper: f32,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Generate regions on the worker pool
    #[arg(long)]
    parallel: bool,

    /// Time this many runs instead of a single generation
    #[arg(long)]
    runs: Option<usize>,

    /// Also run the instantiation walk
    #[arg(long)]
    instantiate: bool,
}

impl Args {
    fn config(&self) -> GenerationConfig {
        GenerationConfig::new(self.splits, self.depth)
            .with_generations(self.generations)
            .with_angle(self.angle)
            .with_size(self.size)
    }

    fn schedule(&self) -> Schedule {
        if self.parallel {
            Schedule::Parallel
        } else {
            Schedule::Sequential
        }
    }
}

fn generate(args: &Args, cfg: &GenerationConfig, settings: Option<&StochasticSettings<LinearCurve>>) -> Result<BatchOutput> {
    match settings {
        Some(s) => generate_stochastic(cfg, s, args.seed, args.schedule()),
        None => generate_deterministic(cfg, args.schedule()),
    }
}

fn run(args: &Args) -> Result<()> {
    let cfg = args.config();
    let settings = if args.stochastic {
        Some(StochasticSettings::new(
            ValueRange::new(args.angle_min, args.angle_max)?,
            ValueRange::new(args.size_min, args.size_max)?,
            LinearCurve {
                start: 1.0,
                end: args.taper,
            },
        )?)
    } else {
        None
    };

    if let Some(runs) = args.runs {
        let report = GenerationTimer::new(runs)
            .with_instantiation(args.instantiate)
            .run(|| generate(args, &cfg, settings.as_ref()))?;
        println!("{report}");
        return Ok(());
    }

    let out = generate(args, &cfg, settings.as_ref())?;
    out.buffer.validate()?;

    let plan = out.buffer.plan();
    info!(
        capacity_per_tree = plan.capacity_per_tree,
        total = plan.total,
        bytes = out.buffer.branch_bytes().len() + out.buffer.connection_bytes().len(),
        ms = out.timings.total,
        "buffer ready"
    );

    if args.instantiate {
        let mut deepest = 0;
        let outcome = walk(&out.buffer, &WalkSettings::default(), |i| deepest = deepest.max(i.depth))?;
        match outcome {
            WalkOutcome::NothingGenerated => info!("nothing generated"),
            WalkOutcome::Walked { trees, instances } => {
                info!(trees, instances, deepest, "instantiation walk complete")
            }
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fractal_tree=info")))
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "generation failed");
            ExitCode::FAILURE
        }
    }
}
