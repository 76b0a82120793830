//! trajectory-irt - command-line entry point
//!
//! Fits the ordinal latent-trait model to a case/period panel and writes
//! summaries, diagnostics and plots to the output directory.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use trajectory_irt::config::Config;
use trajectory_irt::pipeline::Pipeline;

#[derive(Parser, Debug)]
#[command(name = "trajectory-irt")]
#[command(about = "Bayesian ordinal latent-trait trajectories for panel data")]
#[command(version)]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "TRAJECTORY_IRT_CONFIG")]
    config: PathBuf,

    /// Output directory (overrides output.dir)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Random seed (overrides sampler.seed)
    #[arg(long)]
    seed: Option<u64>,

    /// Number of chains (overrides sampler.chains)
    #[arg(long)]
    chains: Option<usize>,

    /// Kept iterations per chain before thinning (overrides sampler.iterations)
    #[arg(long)]
    iterations: Option<usize>,

    /// Warmup iterations per chain (overrides sampler.warmup)
    #[arg(long)]
    warmup: Option<usize>,

    /// Debug logging unless RUST_LOG is set
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reindex the panel and write long.csv and codebook.csv
    Prepare,
    /// Prepare, sample and summarise
    Fit,
    /// Render trajectory plots from an existing trajectories.csv
    Plot {
        /// Defaults to <output>/trajectories.csv
        #[arg(long)]
        trajectories: Option<PathBuf>,
    },
    /// Fit, then render trajectory and diagnostic plots
    Run,
}

impl Args {
    fn load_config(&self) -> Result<Config> {
        let mut config = Config::from_path(&self.config)?;
        if let Some(dir) = &self.output {
            config.output.dir = dir.clone();
        }
        if let Some(seed) = self.seed {
            config.sampler.seed = seed;
        }
        if let Some(chains) = self.chains {
            config.sampler.chains = chains;
        }
        if let Some(iterations) = self.iterations {
            config.sampler.iterations = iterations;
        }
        if let Some(warmup) = self.warmup {
            config.sampler.warmup = warmup;
        }
        config
            .validate()
            .context("Invalid command-line override")?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose {
        "trajectory_irt=debug"
    } else {
        "trajectory_irt=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = args.load_config()?;
    info!("Loaded config {}", args.config.display());
    let pipeline = Pipeline::new(config);

    match &args.command {
        Command::Prepare => {
            let data = pipeline.prepare()?;
            info!(
                units = data.units.len(),
                items = data.items.len(),
                observations = data.observations.len(),
                "Prepared data in {}",
                pipeline.output_dir().display()
            );
        }
        Command::Fit => {
            let data = pipeline.prepare()?;
            pipeline.fit(&data)?;
        }
        Command::Plot { trajectories } => {
            let written = pipeline.plot_from_csv(trajectories.as_deref())?;
            info!("Wrote {} plots", written.len());
        }
        Command::Run => {
            pipeline.run()?;
        }
    }

    Ok(())
}
