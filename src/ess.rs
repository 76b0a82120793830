use crate::utils::{flatten, mean, sample_variance, split_chains, trim_chains};
use crate::{Array1, Array2};
use anyhow::{anyhow, bail, Error, Result};
use arima::acf;

/// Computes the effective sample size (ESS) for the specified
/// parameter across all kept samples.  The value returned is the
/// minimum of ESS and the number_total_draws * log10(number_total_draws).
///
/// Chains are trimmed from the back to match the
/// length of the shortest chain.  Note that the effective sample size
/// can not be estimated with fewer than four draws.
///
/// See more details in Stan reference manual section
/// ["Effective Sample Size"](http://mc-stan.org/users/documentation)
///
/// # Arguments
/// * `chains` - Slice of chains, each of which is a vector of draws for
///              the same parameter
pub fn compute_effective_sample_size(chains: &[Array1]) -> Result<f64, Error> {
    let chains = trim_chains(chains)?;
    let num_chains = chains.len();
    let num_draws = chains[0].len();

    if num_draws < 4 {
        bail!("Must have at least 4 samples to compute ESS");
    }
    if let Some(bad) = chains.iter().flatten().find(|x| !x.is_finite()) {
        bail!("All values must be finite to compute ESS (found {})", bad);
    }
    let first = chains[0][0];
    if chains.iter().flatten().all(|x| (x - first).abs() < 1e-10) {
        bail!("No ESS when elements are all constant (value={})", first);
    }

    let mut chain_acov: Array2 = Vec::with_capacity(num_chains);
    let mut chain_mean: Array1 = Vec::with_capacity(num_chains);
    let mut chain_var: Array1 = Vec::with_capacity(num_chains);
    for chain in chains.iter() {
        let acov = acf::acf(chain, None, true)
            .map_err(|e| anyhow!("Autocovariance failed: {:?}", e))?;
        chain_mean.push(mean(chain)?);
        chain_var.push(acov[0] * num_draws as f64 / (num_draws as f64 - 1.0));
        chain_acov.push(acov);
    }

    let mean_var = mean(&chain_var)?;
    let mut var_plus = mean_var * (num_draws as f64 - 1.0) / num_draws as f64;
    if num_chains > 1 {
        var_plus += sample_variance(&chain_mean)?;
    }

    // Combined autocorrelation estimate at a given lag across chains.
    let rho_hat_at = |lag: usize| -> Result<f64, Error> {
        let acov: Array1 = chain_acov.iter().map(|a| a[lag]).collect();
        Ok(1.0 - (mean_var - mean(&acov)?) / var_plus)
    };

    let mut rho_hat_s: Array1 = vec![0.0; num_draws];
    let mut rho_hat_even = 1.0;
    rho_hat_s[0] = rho_hat_even;
    let mut rho_hat_odd = rho_hat_at(1)?;
    rho_hat_s[1] = rho_hat_odd;

    // Geyer's initial positive sequence.  The last pair of
    // autocorrelations is left out as a bias term that reduces
    // variance for antithetic chains.
    let mut s = 1;
    while s < (num_draws - 4) && (rho_hat_even + rho_hat_odd) > 0.0 {
        rho_hat_even = rho_hat_at(s + 1)?;
        rho_hat_odd = rho_hat_at(s + 2)?;
        if (rho_hat_even + rho_hat_odd) >= 0.0 {
            rho_hat_s[s + 1] = rho_hat_even;
            rho_hat_s[s + 2] = rho_hat_odd;
        }
        s += 2;
    }

    let max_s = s;
    if rho_hat_even > 0.0 {
        rho_hat_s[max_s + 1] = rho_hat_even;
    }

    // Initial monotone sequence
    let mut s = 1;
    while max_s >= 3 && s <= (max_s - 3) {
        if (rho_hat_s[s + 1] + rho_hat_s[s + 2]) > (rho_hat_s[s - 1] + rho_hat_s[s]) {
            rho_hat_s[s + 1] = (rho_hat_s[s - 1] + rho_hat_s[s]) / 2.0;
            rho_hat_s[s + 2] = rho_hat_s[s + 1];
        }
        s += 2;
    }

    let num_total_draws = num_chains as f64 * num_draws as f64;
    let tau_hat: f64 =
        -1.0 + 2.0 * rho_hat_s.iter().take(max_s).sum::<f64>() + rho_hat_s[max_s + 1];
    Ok((num_total_draws / tau_hat).min(num_total_draws * num_total_draws.log10()))
}

/// Computes the split effective sample size (ESS) for the specified
/// parameter across all kept samples.  When the number of total draws N
/// is odd, the (N+1)/2th draw is ignored.
///
/// Based on the reference implementation in Stan v2.24.0,
/// `src/stan/analyze/mcmc/compute_effective_sample_size.hpp`.
pub fn compute_split_effective_sample_size(chains: &[Array1]) -> Result<f64, Error> {
    let split = split_chains(trim_chains(chains)?)?;
    compute_effective_sample_size(&split)
}

/// Computes the Monte Carlo Standard Error (MCSE) for the specified parameter
/// across all samples, which is the standard deviation of the samples over the
/// square root of effective sample size.
///
/// See the Stan reference manual section
/// ["Estimation of MCMC Standard Error"](https://mc-stan.org/docs/2_24/reference-manual/effective-sample-size-section.html#estimation-of-mcmc-standard-error)
pub fn compute_estimated_mcse(chains: &[Array1]) -> Result<f64, Error> {
    let ess = compute_effective_sample_size(chains)?;
    let var = sample_variance(&flatten(&trim_chains(chains)?))?;
    Ok((var / ess).sqrt())
}
