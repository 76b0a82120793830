use crate::config::{Backend, ModelConfig, SamplerConfig};
use crate::data::PreparedData;
use crate::utils::shortest_chain;
use crate::Array2;
use anyhow::{anyhow, bail, Context, Error, Result};
use std::path::Path;

pub mod cmdstan;
pub mod native;

pub use cmdstan::CmdStanSampler;
pub use native::NativeSampler;

/// Something that turns prepared data into posterior draws.
pub trait Sampler {
    fn sample(
        &self,
        data: &PreparedData,
        model: &ModelConfig,
        settings: &SamplerConfig,
    ) -> Result<Draws, Error>;
}

/// Picks the backend named in the configuration.  CmdStan files go to
/// `sampler.cmdstan.workdir`, or `<output_dir>/cmdstan` when unset.
pub fn from_config(
    settings: &SamplerConfig,
    output_dir: &Path,
) -> Result<Box<dyn Sampler>, Error> {
    match settings.backend {
        Backend::Native => Ok(Box::new(NativeSampler)),
        Backend::CmdStan => {
            let executable = settings
                .cmdstan
                .executable
                .clone()
                .ok_or_else(|| anyhow!("cmdstan backend needs sampler.cmdstan.executable"))?;
            let workdir = settings
                .cmdstan
                .workdir
                .clone()
                .unwrap_or_else(|| output_dir.join("cmdstan"));
            Ok(Box::new(CmdStanSampler::new(executable, workdir)))
        }
    }
}

/// Kept posterior draws.  `chains[c][p]` holds every draw of parameter
/// `parameters[p]` in chain `c`.
#[derive(Debug, Clone, PartialEq)]
pub struct Draws {
    pub parameters: Vec<String>,
    pub chains: Vec<Array2>,
}

impl Draws {
    pub fn new(parameters: Vec<String>, chains: Vec<Array2>) -> Result<Draws, Error> {
        if chains.is_empty() {
            bail!("No chains in draws");
        }
        for (c, chain) in chains.iter().enumerate() {
            if chain.len() != parameters.len() {
                bail!(
                    "Chain {} has {} parameters, expected {}",
                    c + 1,
                    chain.len(),
                    parameters.len()
                );
            }
        }
        Ok(Draws { parameters, chains })
    }

    pub fn num_chains(&self) -> usize {
        self.chains.len()
    }

    /// Draws per chain, taking the shortest chain.
    pub fn num_draws(&self) -> usize {
        self.chains
            .iter()
            .filter_map(|c| shortest_chain(c).ok())
            .min()
            .unwrap_or(0)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.parameters.iter().position(|p| p == name)
    }

    /// Per-chain draws of the parameter at position `p`.
    pub fn chains_at(&self, p: usize) -> Array2 {
        self.chains.iter().map(|c| c[p].clone()).collect()
    }

    /// Per-chain draws of a named parameter.
    pub fn parameter(&self, name: &str) -> Result<Array2, Error> {
        let p = self
            .index_of(name)
            .ok_or_else(|| anyhow!("Unknown parameter '{}'", name))?;
        Ok(self.chains_at(p))
    }

    /// Writes one row per chain and draw, one column per parameter.
    pub fn write_csv(&self, path: &Path) -> Result<(), Error> {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let mut header = vec!["chain".to_string(), "draw".to_string()];
        header.extend(self.parameters.iter().cloned());
        writer.write_record(&header)?;
        let num_draws = self.num_draws();
        for (c, chain) in self.chains.iter().enumerate() {
            for i in 0..num_draws {
                let mut record = vec![(c + 1).to_string(), (i + 1).to_string()];
                record.extend(chain.iter().map(|draws| draws[i].to_string()));
                writer.write_record(&record)?;
            }
        }
        writer.flush()?;
        Ok(())
    }
}
