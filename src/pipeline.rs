use crate::config::Config;
use crate::convergence::Convergence;
use crate::data::{Panel, PreparedData};
use crate::plot;
use crate::sampler::{self, Draws};
use crate::summary::{self, ParameterSummary, TrajectoryPoint};
use anyhow::{bail, Context, Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

/// Everything a fit produces.
#[derive(Debug, Clone)]
pub struct FitOutput {
    pub draws: Draws,
    pub summaries: Vec<ParameterSummary>,
    pub trajectories: Vec<TrajectoryPoint>,
    pub convergence: Convergence,
}

/// Runs the stages against one configuration.  All files land under
/// `output.dir`:
///
/// | file | stage |
/// |---|---|
/// | `long.csv`, `codebook.csv` | prepare |
/// | `draws.csv`, `parameters.csv`, `trajectories.csv`, `convergence.csv` | fit |
/// | `plots/` | plot |
pub struct Pipeline {
    config: Config,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Pipeline { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.output.dir
    }

    fn output_file(&self, name: &str) -> PathBuf {
        self.output_dir().join(name)
    }

    fn ensure_output_dir(&self) -> Result<(), Error> {
        fs::create_dir_all(self.output_dir())
            .with_context(|| format!("Failed to create {}", self.output_dir().display()))
    }

    /// Loads the panel, reindexes it and writes the long data and codebook.
    pub fn prepare(&self) -> Result<PreparedData, Error> {
        self.ensure_output_dir()?;
        let panel = Panel::from_csv(&self.config.data.path, &self.config.data)?;
        let data = panel.prepare()?;
        data.write_long_csv(&self.output_file("long.csv"))?;
        data.write_codebook_csv(&self.output_file("codebook.csv"))?;
        Ok(data)
    }

    /// Samples the posterior and writes draws, summaries and convergence.
    /// In strict mode an unconverged fit is an error, after its files are
    /// written.
    pub fn fit(&self, data: &PreparedData) -> Result<FitOutput, Error> {
        self.ensure_output_dir()?;
        let settings = &self.config.sampler;
        let sampler = sampler::from_config(settings, self.output_dir())?;

        let started = Instant::now();
        let draws = sampler.sample(data, &self.config.model, settings)?;
        info!(
            chains = draws.num_chains(),
            draws = draws.num_draws(),
            parameters = draws.parameters.len(),
            "Sampling finished in {:.1?}",
            started.elapsed()
        );
        draws.write_csv(&self.output_file("draws.csv"))?;

        let summaries = summary::summarize(&draws)?;
        let trajectories = summary::trajectories(data, &summaries)?;
        summary::write_parameters_csv(&self.output_file("parameters.csv"), &summaries)?;
        summary::write_trajectories_csv(&self.output_file("trajectories.csv"), &trajectories)?;

        let convergence = Convergence::assess(&summaries, settings.rhat_threshold);
        convergence.write_csv(&self.output_file("convergence.csv"), &summaries)?;
        convergence.report();
        if settings.strict_convergence && !convergence.is_converged() {
            bail!(
                "{} parameters did not converge (R hat > {})",
                convergence.flagged.len(),
                settings.rhat_threshold
            );
        }

        Ok(FitOutput {
            draws,
            summaries,
            trajectories,
            convergence,
        })
    }

    /// Renders trajectory plots from a `trajectories.csv` written earlier.
    pub fn plot_from_csv(&self, path: Option<&Path>) -> Result<Vec<PathBuf>, Error> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.output_file("trajectories.csv"));
        let points = summary::read_trajectories_csv(&path)?;
        if points.is_empty() {
            bail!("{} has no rows", path.display());
        }
        plot::render_trajectories(&self.output_file("plots"), &points, &self.config.plot)
    }

    /// Trajectory and diagnostic plots for a fresh fit.
    pub fn plot(&self, fit: &FitOutput) -> Result<Vec<PathBuf>, Error> {
        let dir = self.output_file("plots");
        let mut written = plot::render_trajectories(&dir, &fit.trajectories, &self.config.plot)?;
        written.extend(plot::render_diagnostics(
            &dir,
            &fit.summaries,
            &fit.draws,
            self.config.sampler.rhat_threshold,
            &self.config.plot,
        )?);
        Ok(written)
    }

    /// prepare, fit and plot.
    pub fn run(&self) -> Result<FitOutput, Error> {
        let data = self.prepare()?;
        let fit = self.fit(&data)?;
        self.plot(&fit)?;
        info!("Wrote results to {}", self.output_dir().display());
        Ok(fit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DataConfig, OutputConfig, SamplerConfig};

    fn config(output: &Path) -> Config {
        let d = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        Config {
            data: DataConfig {
                path: d.join("test/data/panel.csv"),
                indicators: ["killings", "torture", "disappearances", "imprisonment"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                ..DataConfig::default()
            },
            sampler: SamplerConfig {
                chains: 2,
                warmup: 100,
                iterations: 100,
                seed: 5,
                ..SamplerConfig::default()
            },
            output: OutputConfig {
                dir: output.to_path_buf(),
            },
            ..Config::default()
        }
    }

    #[test]
    fn run_writes_every_output() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(config(dir.path()));
        let fit = pipeline.run().unwrap();

        for name in [
            "long.csv",
            "codebook.csv",
            "draws.csv",
            "parameters.csv",
            "trajectories.csv",
            "convergence.csv",
            "plots/trajectories.svg",
            "plots/cases/Sri_Lanka.svg",
            "plots/rhat.svg",
            "plots/trace_sigma.svg",
        ] {
            assert!(dir.path().join(name).exists(), "missing {}", name);
        }
        // 26 case-periods in the fixture
        assert_eq!(fit.trajectories.len(), 26);
        assert!(fit
            .trajectories
            .iter()
            .all(|p| p.lower <= p.mean && p.mean <= p.upper));
    }

    #[test]
    fn plot_from_csv_rerenders_trajectories() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(config(dir.path()));
        let data = pipeline.prepare().unwrap();
        pipeline.fit(&data).unwrap();
        let written = pipeline.plot_from_csv(None).unwrap();
        assert_eq!(written.len(), 4);
    }

    #[test]
    fn strict_mode_fails_unconverged_fit() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        // far too short to converge
        config.sampler.warmup = 0;
        config.sampler.iterations = 8;
        config.sampler.rhat_threshold = 1.0001;
        config.sampler.strict_convergence = true;
        let pipeline = Pipeline::new(config);
        let data = pipeline.prepare().unwrap();
        assert!(pipeline.fit(&data).is_err());
        assert!(dir.path().join("convergence.csv").exists());
    }

    #[test]
    fn missing_panel_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.data.path = dir.path().join("nope.csv");
        assert!(Pipeline::new(config).prepare().is_err());
    }
}
