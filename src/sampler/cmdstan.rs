//! Backend that hands the prepared data to a compiled CmdStan model
//! (`models/ordinal_trajectory.stan`) and reads its per-chain CSV output.
use super::{Draws, Sampler};
use crate::config::{ModelConfig, SamplerConfig};
use crate::data::PreparedData;
use crate::model::parameter_names;
use crate::Array2;
use anyhow::{anyhow, bail, Context, Error, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Data block of the Stan model, 1-based.
#[derive(Debug, Serialize, PartialEq)]
pub struct StanData {
    #[serde(rename = "N")]
    pub n: usize,
    #[serde(rename = "J")]
    pub j: usize,
    #[serde(rename = "M")]
    pub m: usize,
    pub unit: Vec<usize>,
    pub item: Vec<usize>,
    pub y: Vec<usize>,
    #[serde(rename = "K")]
    pub k: Vec<usize>,
    pub n_cut: usize,
    pub cut_start: Vec<usize>,
    pub prev: Vec<usize>,
    pub gap: Vec<f64>,
    pub sigma_scale: f64,
    pub cut_scale: f64,
    pub discrimination_scale: f64,
}

impl StanData {
    pub fn new(data: &PreparedData, model: &ModelConfig) -> Self {
        let k: Vec<usize> = data.items.iter().map(|i| i.num_categories()).collect();
        let mut cut_start = Vec::with_capacity(k.len());
        let mut next = 1;
        for categories in &k {
            cut_start.push(next);
            next += categories - 1;
        }
        StanData {
            n: data.units.len(),
            j: data.items.len(),
            m: data.observations.len(),
            unit: data.observations.iter().map(|o| o.unit + 1).collect(),
            item: data.observations.iter().map(|o| o.item + 1).collect(),
            y: data.observations.iter().map(|o| o.category).collect(),
            n_cut: data.num_cutpoints(),
            cut_start,
            k,
            prev: data.units.iter().map(|u| u.prev.map_or(0, |p| p + 1)).collect(),
            gap: data.units.iter().map(|u| u.gap).collect(),
            sigma_scale: model.sigma_scale,
            cut_scale: model.cut_scale,
            discrimination_scale: model.discrimination_scale,
        }
    }
}

/// CmdStan column for each name in [`parameter_names`].  Cutpoints live
/// in one flat `tau` vector on the Stan side.
pub fn stan_columns(data: &PreparedData) -> Vec<String> {
    let mut columns = vec!["sigma".to_string()];
    columns.extend((1..=data.items.len()).map(|j| format!("alpha.{}", j)));
    columns.extend((1..=data.num_cutpoints()).map(|i| format!("tau.{}", i)));
    columns.extend((1..=data.units.len()).map(|n| format!("theta.{}", n)));
    columns
}

/// Reads one CmdStan output CSV, returning draws for `columns` in order.
pub fn read_stan_csv<R: io::Read>(reader: R, columns: &[String]) -> Result<Array2, Error> {
    let mut reader = csv::ReaderBuilder::new()
        .comment(Some(b'#'))
        .from_reader(reader);
    let header: HashMap<String, usize> = reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(i, h)| (h.to_string(), i))
        .collect();
    let positions = columns
        .iter()
        .map(|c| {
            header
                .get(c)
                .copied()
                .ok_or_else(|| anyhow!("Column '{}' missing from CmdStan output", c))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut draws: Array2 = vec![Vec::new(); columns.len()];
    for record in reader.records() {
        let record = record?;
        for (p, &idx) in positions.iter().enumerate() {
            let cell = record.get(idx).unwrap_or("");
            let value = cell
                .parse::<f64>()
                .map_err(|_| anyhow!("Bad value '{}' in column {}", cell, columns[p]))?;
            draws[p].push(value);
        }
    }
    Ok(draws)
}

/// Runs a compiled CmdStan executable once per chain.
#[derive(Debug, Clone)]
pub struct CmdStanSampler {
    executable: PathBuf,
    workdir: PathBuf,
}

impl CmdStanSampler {
    pub fn new(executable: PathBuf, workdir: PathBuf) -> Self {
        CmdStanSampler {
            executable,
            workdir,
        }
    }

    /// Command line for one chain; CmdStan offsets its RNG stream by `id`.
    pub fn arguments(
        &self,
        settings: &SamplerConfig,
        chain: usize,
        data_file: &Path,
        output_file: &Path,
    ) -> Vec<String> {
        vec![
            "sample".to_string(),
            format!("num_samples={}", settings.iterations),
            format!("num_warmup={}", settings.warmup),
            format!("thin={}", settings.thin),
            format!("id={}", chain + 1),
            "random".to_string(),
            format!("seed={}", settings.seed),
            "data".to_string(),
            format!("file={}", data_file.display()),
            "output".to_string(),
            format!("file={}", output_file.display()),
            "refresh=0".to_string(),
        ]
    }

    fn run_chain(
        &self,
        settings: &SamplerConfig,
        chain: usize,
        data_file: &Path,
        workdir: &Path,
        columns: &[String],
    ) -> Result<Array2, Error> {
        let output_file = workdir.join(format!("output-{}.csv", chain + 1));
        let args = self.arguments(settings, chain, data_file, &output_file);
        debug!(chain = chain + 1, ?args, "Running {}", self.executable.display());
        let output = Command::new(&self.executable)
            .args(&args)
            .output()
            .with_context(|| format!("Failed to run {}", self.executable.display()))?;
        if !output.status.success() {
            bail!(
                "CmdStan chain {} exited with {}: {}",
                chain + 1,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        let file = fs::File::open(&output_file)
            .with_context(|| format!("Missing CmdStan output {}", output_file.display()))?;
        read_stan_csv(file, columns)
            .with_context(|| format!("Failed to parse {}", output_file.display()))
    }
}

impl Sampler for CmdStanSampler {
    fn sample(
        &self,
        data: &PreparedData,
        model: &ModelConfig,
        settings: &SamplerConfig,
    ) -> Result<Draws, Error> {
        let workdir = &self.workdir;
        fs::create_dir_all(&workdir)
            .with_context(|| format!("Failed to create {}", workdir.display()))?;
        let data_file = workdir.join("data.json");
        let json = serde_json::to_string(&StanData::new(data, model))?;
        fs::write(&data_file, json)
            .with_context(|| format!("Failed to write {}", data_file.display()))?;
        info!(
            chains = settings.chains,
            seed = settings.seed,
            "Starting CmdStan {}",
            self.executable.display()
        );

        let columns = stan_columns(data);
        let chains = (0..settings.chains)
            .into_par_iter()
            .map(|c| self.run_chain(settings, c, &data_file, workdir, &columns))
            .collect::<Result<Vec<Array2>, Error>>()?;
        Draws::new(parameter_names(data), chains)
    }
}
