use anyhow::{bail, Context, Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level configuration, usually read from a YAML file.
///
/// ```yaml
/// data:
///   path: data/panel.csv
///   indicators: [killings, torture, disappearances]
/// sampler:
///   chains: 4
///   seed: 42
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub data: DataConfig,
    pub model: ModelConfig,
    pub sampler: SamplerConfig,
    pub output: OutputConfig,
    pub plot: PlotConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DataConfig {
    pub path: PathBuf,
    pub case_column: String,
    pub time_column: String,
    pub indicators: Vec<String>,
    /// Cell values treated as missing, compared after trimming whitespace.
    pub missing_codes: Vec<String>,
    pub min_categories: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            path: PathBuf::from("data/panel.csv"),
            case_column: "case".to_string(),
            time_column: "year".to_string(),
            indicators: Vec::new(),
            missing_codes: ["", "NA", ".", "-99", "-999"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            min_categories: 2,
        }
    }
}

/// Prior scales of the latent trajectory model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    /// Half-normal scale of the random-walk innovation sd.
    pub sigma_scale: f64,
    /// Normal sd of every cutpoint.
    pub cut_scale: f64,
    /// Log-scale sd of the lognormal discrimination prior.
    pub discrimination_scale: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            sigma_scale: 0.5,
            cut_scale: 5.0,
            discrimination_scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Native,
    CmdStan,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SamplerConfig {
    pub backend: Backend,
    pub chains: usize,
    pub warmup: usize,
    /// Kept draws per chain, before thinning.
    pub iterations: usize,
    pub thin: usize,
    pub seed: u64,
    pub rhat_threshold: f64,
    /// Fail the run instead of warning when any R hat exceeds the threshold.
    pub strict_convergence: bool,
    pub cmdstan: CmdStanConfig,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        SamplerConfig {
            backend: Backend::Native,
            chains: 4,
            warmup: 1000,
            iterations: 1000,
            thin: 1,
            seed: 20130901,
            rhat_threshold: 1.1,
            strict_convergence: false,
            cmdstan: CmdStanConfig::default(),
        }
    }
}

impl SamplerConfig {
    /// Number of draws each chain keeps after thinning.  At least 4 pass
    /// validation, but split ESS needs 8: with 4 to 7 kept draws every
    /// ESS is recorded as `NaN`.
    pub fn kept_draws(&self) -> usize {
        (self.iterations + self.thin - 1) / self.thin
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CmdStanConfig {
    /// Compiled model executable, built from `models/ordinal_trajectory.stan`.
    pub executable: Option<PathBuf>,
    /// Where data and per-chain output files go; defaults to `<output>/cmdstan`.
    pub workdir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            dir: PathBuf::from("output"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PlotConfig {
    pub width: f64,
    pub height: f64,
    pub facet_columns: usize,
    pub trace_parameters: Vec<String>,
}

impl Default for PlotConfig {
    fn default() -> Self {
        PlotConfig {
            width: 640.0,
            height: 400.0,
            facet_columns: 4,
            trace_parameters: vec!["sigma".to_string()],
        }
    }
}

impl Config {
    pub fn from_path(path: &Path) -> Result<Config, Error> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Config::from_yaml_str(&text)
            .with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Config, Error> {
        let config: Config = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.data.indicators.is_empty() {
            bail!("data.indicators must name at least one column");
        }
        if self.data.min_categories < 2 {
            bail!("data.min_categories must be at least 2");
        }
        let s = &self.sampler;
        if s.chains == 0 {
            bail!("sampler.chains must be at least 1");
        }
        if s.thin == 0 {
            bail!("sampler.thin must be at least 1");
        }
        if s.kept_draws() < 4 {
            bail!(
                "sampler.iterations / sampler.thin must leave at least 4 draws, got {}",
                s.kept_draws()
            );
        }
        if !(s.rhat_threshold > 1.0) {
            bail!("sampler.rhat_threshold must exceed 1, got {}", s.rhat_threshold);
        }
        if s.backend == Backend::CmdStan && s.cmdstan.executable.is_none() {
            bail!("sampler.cmdstan.executable is required for the cmdstan backend");
        }
        let m = &self.model;
        for (name, value) in [
            ("model.sigma_scale", m.sigma_scale),
            ("model.cut_scale", m.cut_scale),
            ("model.discrimination_scale", m.discrimination_scale),
        ] {
            if !(value > 0.0 && value.is_finite()) {
                bail!("{} must be positive, got {}", name, value);
            }
        }
        if self.plot.facet_columns == 0 {
            bail!("plot.facet_columns must be at least 1");
        }
        Ok(())
    }
}
