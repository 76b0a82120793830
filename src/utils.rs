use crate::{Array1, Array2};
use anyhow::{anyhow, bail, Error, Result};

/// Compute the arithmetic mean of an array.
pub fn mean(arr: &[f64]) -> Result<f64, Error> {
    if arr.is_empty() {
        return Err(anyhow!("Can't take mean of empty array"));
    }
    let sum = arr.iter().sum::<f64>();
    let count = arr.len() as f64;
    Ok(sum / count)
}

/// Compute the sample variance of an array using Bessel's correction.
pub fn sample_variance(arr: &[f64]) -> Result<f64, Error> {
    if arr.len() < 2 {
        bail!("Sample variance needs at least two values, got {}", arr.len());
    }
    let xbar = mean(arr)?;
    Ok(arr.iter().map(|x| (x - xbar).powi(2)).sum::<f64>() / (arr.len() as f64 - 1.0))
}

/// Length of the shortest chain, or an error when there are no chains.
pub fn shortest_chain(chains: &[Array1]) -> Result<usize, Error> {
    chains
        .iter()
        .map(|c| c.len())
        .min()
        .ok_or_else(|| anyhow!("No chains supplied"))
}

/// Trims every chain from the back to the length of the shortest one.
pub fn trim_chains(chains: &[Array1]) -> Result<Array2, Error> {
    let num_draws = shortest_chain(chains)?;
    Ok(chains.iter().map(|c| c[..num_draws].to_vec()).collect())
}

/// Splits each chain into two chains of equal length.  When the
/// number of total draws N is odd, the (N+1)/2th draw is ignored.
///
/// See more details in Stan reference manual section
/// ["Effective Sample Size"](http://mc-stan.org/users/documentation).
///
/// Chains are expected to be of equal length; use [`trim_chains`] first.
pub fn split_chains(chains: Array2) -> Result<Array2, Error> {
    if chains.is_empty() {
        return Err(anyhow!("Can't split empty array of chains"));
    }
    let num_draws = shortest_chain(&chains)?;
    if num_draws < 1 {
        return Err(anyhow!("No samples to split"));
    }
    let half = num_draws / 2;
    let offset = num_draws % 2;
    let mut split_draws = Vec::with_capacity(chains.len() * 2);
    for chain in chains {
        split_draws.push(chain[..half].to_vec());
        split_draws.push(chain[(half + offset)..num_draws].to_vec());
    }
    Ok(split_draws)
}

/// Concatenates all chains into a single vector of draws.
pub fn flatten(chains: &[Array1]) -> Array1 {
    chains.iter().flatten().copied().collect()
}

/// Quantile of an already sorted slice, interpolating linearly between
/// order statistics (type 7 in Hyndman and Fan, the R and numpy default).
pub fn quantile(sorted: &[f64], p: f64) -> Result<f64, Error> {
    if sorted.is_empty() {
        bail!("Can't take quantile of empty array");
    }
    if !(0.0..=1.0).contains(&p) {
        bail!("Quantile probability {} outside [0, 1]", p);
    }
    let h = (sorted.len() - 1) as f64 * p;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    Ok(sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo]))
}
