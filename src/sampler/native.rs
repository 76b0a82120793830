//! Adaptive Metropolis-within-Gibbs sampler.
//!
//! Every scalar coordinate (each `theta[n]`, each item coordinate and
//! `log sigma`) gets its own Gaussian random-walk proposal.  During warmup
//! the log proposal scale of every coordinate is nudged after each batch
//! toward an acceptance rate of 0.44 (Roberts and Rosenthal, 2009); the
//! scales are frozen once warmup ends so kept draws come from a valid
//! Markov chain.
use super::{Draws, Sampler};
use crate::config::{ModelConfig, SamplerConfig};
use crate::data::PreparedData;
use crate::model::{parameter_names, OrdinalTrajectoryModel, Params};
use crate::Array2;
use anyhow::{bail, Error, Result};
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use tracing::{debug, info};

const TARGET_ACCEPTANCE: f64 = 0.44;
const BATCH_SIZE: usize = 50;

/// Runs chains in parallel on the rayon thread pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeSampler;

impl Sampler for NativeSampler {
    fn sample(
        &self,
        data: &PreparedData,
        model: &ModelConfig,
        settings: &SamplerConfig,
    ) -> Result<Draws, Error> {
        let model = OrdinalTrajectoryModel::new(data, model);
        info!(
            chains = settings.chains,
            warmup = settings.warmup,
            iterations = settings.iterations,
            thin = settings.thin,
            seed = settings.seed,
            "Starting native sampler"
        );
        let chains = (0..settings.chains)
            .into_par_iter()
            .map(|c| run_chain(&model, settings, c))
            .collect::<Result<Vec<Array2>, Error>>()?;
        Draws::new(parameter_names(data), chains)
    }
}

/// Random-walk proposal with a batch-adapted scale.
#[derive(Debug, Clone)]
struct Proposal {
    log_scale: f64,
    accepted: usize,
    proposed: usize,
}

impl Proposal {
    fn new() -> Self {
        Proposal {
            log_scale: 0.0,
            accepted: 0,
            proposed: 0,
        }
    }

    /// Metropolis step on one coordinate.  `log_density` evaluates the
    /// terms that depend on it.
    fn step<R, F>(&mut self, rng: &mut R, current: f64, log_density: F) -> f64
    where
        R: Rng,
        F: Fn(f64) -> f64,
    {
        let z: f64 = rng.sample(StandardNormal);
        let candidate = current + self.log_scale.exp() * z;
        let log_ratio = log_density(candidate) - log_density(current);
        self.proposed += 1;
        if log_ratio.is_finite() && rng.gen::<f64>().ln() < log_ratio {
            self.accepted += 1;
            candidate
        } else {
            current
        }
    }

    fn acceptance_rate(&self) -> f64 {
        if self.proposed == 0 {
            0.0
        } else {
            self.accepted as f64 / self.proposed as f64
        }
    }

    fn adapt(&mut self, batch: usize) {
        let delta = (0.01f64).max(1.0 / (batch as f64).sqrt()).min(1.0);
        if self.acceptance_rate() > TARGET_ACCEPTANCE {
            self.log_scale += delta;
        } else {
            self.log_scale -= delta;
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.accepted = 0;
        self.proposed = 0;
    }
}

struct ChainState {
    params: Params,
    theta: Vec<Proposal>,
    items: Vec<Vec<Proposal>>,
    sigma: Proposal,
}

impl ChainState {
    fn proposals(&mut self) -> impl Iterator<Item = &mut Proposal> {
        self.theta
            .iter_mut()
            .chain(self.items.iter_mut().flatten())
            .chain(std::iter::once(&mut self.sigma))
    }

    fn mean_acceptance(&mut self) -> f64 {
        let (sum, count) = self
            .proposals()
            .fold((0.0, 0usize), |(s, n), p| (s + p.acceptance_rate(), n + 1));
        sum / count as f64
    }
}

/// Seeds chain `c` by jumping the base generator `c` times, giving
/// non-overlapping streams for a fixed seed.
fn chain_rng(seed: u64, chain: usize) -> Xoshiro256PlusPlus {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    for _ in 0..chain {
        rng.jump();
    }
    rng
}

fn sweep<R: Rng>(model: &OrdinalTrajectoryModel, state: &mut ChainState, rng: &mut R) {
    let num_units = state.params.theta.len();
    for n in 0..num_units {
        let current = state.params.theta[n];
        let params = &state.params;
        let next = state.theta[n].step(rng, current, |v| model.unit_log_density(params, n, v));
        state.params.theta[n] = next;
    }

    for j in 0..state.params.items.len() {
        for d in 0..state.params.items[j].dim() {
            let current = state.params.items[j].coordinate(d);
            let params = &state.params;
            let next = state.items[j][d].step(rng, current, |v| {
                let mut item = params.items[j].clone();
                item.set_coordinate(d, v);
                model.item_log_density(params, j, &item)
            });
            state.params.items[j].set_coordinate(d, next);
        }
    }

    let current = state.params.log_sigma;
    let params = &state.params;
    let next = state
        .sigma
        .step(rng, current, |v| model.sigma_log_density(params, v));
    state.params.log_sigma = next;
}

fn run_chain(
    model: &OrdinalTrajectoryModel,
    settings: &SamplerConfig,
    chain: usize,
) -> Result<Array2, Error> {
    let mut rng = chain_rng(settings.seed, chain);
    let params = model.initial(&mut rng);
    if !model.log_posterior(&params).is_finite() {
        bail!("Chain {}: initial log density is not finite", chain + 1);
    }
    let mut state = ChainState {
        theta: vec![Proposal::new(); params.theta.len()],
        items: params
            .items
            .iter()
            .map(|i| vec![Proposal::new(); i.dim()])
            .collect(),
        sigma: Proposal::new(),
        params,
    };

    for iter in 1..=settings.warmup {
        sweep(model, &mut state, &mut rng);
        if iter % BATCH_SIZE == 0 {
            let batch = iter / BATCH_SIZE;
            debug!(
                chain = chain + 1,
                iteration = iter,
                acceptance = state.mean_acceptance(),
                "Warmup batch"
            );
            state.proposals().for_each(|p| p.adapt(batch));
        }
    }
    state.proposals().for_each(|p| p.reset());

    let num_parameters = parameter_names(model.data()).len();
    let mut draws: Array2 = vec![Vec::with_capacity(settings.kept_draws()); num_parameters];
    for iter in 0..settings.iterations {
        sweep(model, &mut state, &mut rng);
        if iter % settings.thin == 0 {
            for (p, value) in state.params.constrained().into_iter().enumerate() {
                draws[p].push(value);
            }
        }
    }
    info!(
        chain = chain + 1,
        acceptance = %format!("{:.3}", state.mean_acceptance()),
        draws = settings.kept_draws(),
        "Chain finished"
    );
    Ok(draws)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataConfig;
    use crate::data::Panel;
    use crate::utils::{flatten, mean};
    use std::path::PathBuf;

    fn fixture() -> PreparedData {
        let d = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        let config = DataConfig {
            indicators: ["killings", "torture", "disappearances", "imprisonment"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ..DataConfig::default()
        };
        Panel::from_csv(&d.join("test/data/panel.csv"), &config)
            .unwrap()
            .prepare()
            .unwrap()
    }

    fn settings(seed: u64) -> SamplerConfig {
        SamplerConfig {
            chains: 2,
            warmup: 100,
            iterations: 60,
            thin: 2,
            seed,
            ..SamplerConfig::default()
        }
    }

    #[test]
    fn same_seed_gives_identical_draws() {
        let data = fixture();
        let a = NativeSampler
            .sample(&data, &ModelConfig::default(), &settings(3))
            .unwrap();
        let b = NativeSampler
            .sample(&data, &ModelConfig::default(), &settings(3))
            .unwrap();
        assert_eq!(a, b);
        let c = NativeSampler
            .sample(&data, &ModelConfig::default(), &settings(4))
            .unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn draws_have_expected_shape_and_constraints() {
        let data = fixture();
        let draws = NativeSampler
            .sample(&data, &ModelConfig::default(), &settings(3))
            .unwrap();
        assert_eq!(draws.num_chains(), 2);
        assert_eq!(draws.num_draws(), 30);
        assert_eq!(draws.parameters, parameter_names(&data));

        let sigma = flatten(&draws.parameter("sigma").unwrap());
        assert!(sigma.iter().all(|s| *s > 0.0));
        for c in 0..draws.num_chains() {
            let lower = &draws.chains[c][draws.index_of("tau[1,1]").unwrap()];
            let upper = &draws.chains[c][draws.index_of("tau[1,2]").unwrap()];
            assert!(lower.iter().zip(upper).all(|(l, u)| l < u));
        }
        // Chains must differ from one another.
        assert_ne!(draws.chains[0], draws.chains[1]);
    }

    #[test]
    fn high_indicator_cases_score_higher() {
        // Sri Lanka is coded at the top of most scales, Colombia mostly low
        // in the late nineties.
        let data = fixture();
        let settings = SamplerConfig {
            chains: 2,
            warmup: 600,
            iterations: 600,
            seed: 11,
            ..SamplerConfig::default()
        };
        let draws = NativeSampler
            .sample(&data, &ModelConfig::default(), &settings)
            .unwrap();
        let index = data.unit_index();
        let theta_mean = |case: &str, year: i64| {
            let n = index[&(case, year)];
            mean(&flatten(&draws.parameter(&format!("theta[{}]", n + 1)).unwrap())).unwrap()
        };
        assert!(theta_mean("Sri Lanka", 1997) > theta_mean("Colombia", 1997));
    }

    #[test]
    fn proposal_adapts_toward_target() {
        let mut proposal = Proposal::new();
        proposal.accepted = 9;
        proposal.proposed = 10;
        proposal.adapt(1);
        assert!(proposal.log_scale > 0.0);
        assert_eq!(proposal.proposed, 0);

        let mut proposal = Proposal::new();
        proposal.accepted = 1;
        proposal.proposed = 10;
        proposal.adapt(4);
        assert_abs_diff_eq!(proposal.log_scale, -0.5);
    }
}
