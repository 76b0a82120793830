use crate::utils::{mean, sample_variance, shortest_chain, split_chains, trim_chains};
use crate::Array1;
use anyhow::{bail, Error, Result};

/// Computes the potential scale reduction (Rhat) for the specified
/// parameter across all kept samples.  Chains are trimmed from the
/// back to match the length of the shortest chain.
///
/// See more details in Stan reference manual section
/// ["Potential Scale Reduction"](https://mc-stan.org/docs/2_24/reference-manual/notation-for-samples-chains-and-draws.html#potential-scale-reduction).
pub fn potential_scale_reduction_factor(chains: &[Array1]) -> Result<f64, Error> {
    let n = shortest_chain(chains)?;
    if chains.len() < 2 {
        bail!("Rhat needs at least two chains, got {}", chains.len());
    }
    if n < 2 {
        bail!("Rhat needs at least two draws per chain, got {}", n);
    }

    let mut chain_means = Vec::with_capacity(chains.len());
    let mut chain_vars = Vec::with_capacity(chains.len());
    for chain in chains {
        let draws = &chain[..n];
        chain_means.push(mean(draws)?);
        chain_vars.push(sample_variance(draws)?);
    }

    let n = n as f64;
    let var_between = n * sample_variance(&chain_means)?;
    let var_within = mean(&chain_vars)?;
    Ok(((var_between / var_within + n - 1.0) / n).sqrt())
}

/// Computes the split potential scale reduction (Rhat) for the
/// specified parameter across all kept samples.  When the number of
/// total draws N is odd, the (N+1)/2th draw is ignored.
///
/// Splitting makes the statistic sensitive to drift within a single chain,
/// which is why the summaries report this variant.
///
/// Based on the reference implementation in Stan v2.24.0,
/// `src/stan/analyze/mcmc/compute_potential_scale_reduction.hpp`.
pub fn split_potential_scale_reduction_factor(chains: &[Array1]) -> Result<f64, Error> {
    let split = split_chains(trim_chains(chains)?)?;
    potential_scale_reduction_factor(&split)
}
