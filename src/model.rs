//! Random-walk ordinal latent trait model.
//!
//! For unit `n` (a case in one period), item `j` and observation `m`:
//!
//! ```text
//! theta[n] ~ N(0, 1)                                  first period of a case
//! theta[n] ~ N(theta[prev(n)], sigma^2 * gap(n))      otherwise
//! sigma    ~ HalfNormal(sigma_scale)
//! alpha[j] ~ LogNormal(0, discrimination_scale)
//! tau[j,k] ~ N(0, cut_scale),  tau[j,1] < ... < tau[j,K_j - 1]
//! y[m]     ~ OrderedLogistic(alpha[item] * theta[unit], tau[item])
//! ```
//!
//! Densities are evaluated on the unconstrained scale (`log sigma`,
//! `log alpha`, first cutpoint plus log increments) with Jacobian terms,
//! and without normalising constants that cancel in Metropolis ratios.
//! `models/ordinal_trajectory.stan` encodes the same model for CmdStan.
use crate::config::ModelConfig;
use crate::data::PreparedData;
use rand::Rng;

/// Item parameters on the unconstrained scale.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemParams {
    pub log_alpha: f64,
    /// `cut_raw[0]` is the first cutpoint, `cut_raw[k]` the log of the
    /// distance between cutpoints `k` and `k + 1`.
    pub cut_raw: Vec<f64>,
}

impl ItemParams {
    pub fn alpha(&self) -> f64 {
        self.log_alpha.exp()
    }

    pub fn cutpoints(&self) -> Vec<f64> {
        let mut cuts = Vec::with_capacity(self.cut_raw.len());
        let mut acc = 0.0;
        for (k, raw) in self.cut_raw.iter().enumerate() {
            acc = if k == 0 { *raw } else { acc + raw.exp() };
            cuts.push(acc);
        }
        cuts
    }

    /// Number of unconstrained coordinates.
    pub fn dim(&self) -> usize {
        1 + self.cut_raw.len()
    }

    pub fn coordinate(&self, d: usize) -> f64 {
        if d == 0 {
            self.log_alpha
        } else {
            self.cut_raw[d - 1]
        }
    }

    pub fn set_coordinate(&mut self, d: usize, value: f64) {
        if d == 0 {
            self.log_alpha = value;
        } else {
            self.cut_raw[d - 1] = value;
        }
    }
}

/// Full parameter state of one chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Params {
    pub theta: Vec<f64>,
    pub log_sigma: f64,
    pub items: Vec<ItemParams>,
}

impl Params {
    /// Constrained values in the order of [`parameter_names`].
    pub fn constrained(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(1 + self.items.len() * 3 + self.theta.len());
        out.push(self.log_sigma.exp());
        out.extend(self.items.iter().map(|i| i.alpha()));
        for item in &self.items {
            out.extend(item.cutpoints());
        }
        out.extend(self.theta.iter().copied());
        out
    }
}

/// Output names of the model parameters, 1-based like Stan:
/// `sigma`, `alpha[j]`, `tau[j,k]`, `theta[n]`.
pub fn parameter_names(data: &PreparedData) -> Vec<String> {
    let mut names = vec!["sigma".to_string()];
    names.extend((1..=data.items.len()).map(|j| format!("alpha[{}]", j)));
    for (j, item) in data.items.iter().enumerate() {
        names.extend((1..item.num_categories()).map(|k| format!("tau[{},{}]", j + 1, k)));
    }
    names.extend((1..=data.units.len()).map(|n| format!("theta[{}]", n)));
    names
}

/// `log(1 / (1 + exp(-x)))` without overflow.
pub fn log_inv_logit(x: f64) -> f64 {
    if x >= 0.0 {
        -(-x).exp().ln_1p()
    } else {
        x - x.exp().ln_1p()
    }
}

/// `log(1 - exp(x))` for `x <= 0`.
pub fn log1m_exp(x: f64) -> f64 {
    if x > -std::f64::consts::LN_2 {
        (-x.exp_m1()).ln()
    } else {
        (-x.exp()).ln_1p()
    }
}

/// Log probability of category `y` (1-based) under an ordered logistic
/// with linear predictor `eta` and increasing `cuts`.
pub fn ordered_logistic_lpmf(y: usize, eta: f64, cuts: &[f64]) -> f64 {
    let k = cuts.len() + 1;
    debug_assert!(y >= 1 && y <= k);
    if y == 1 {
        log_inv_logit(cuts[0] - eta)
    } else if y == k {
        log_inv_logit(eta - cuts[k - 2])
    } else {
        // F(eta - c[y-1]) - F(eta - c[y]) with the larger term factored out
        let upper = log_inv_logit(eta - cuts[y - 2]);
        let lower = log_inv_logit(eta - cuts[y - 1]);
        upper + log1m_exp(lower - upper)
    }
}

fn normal_lpdf(x: f64, mu: f64, sd: f64) -> f64 {
    let z = (x - mu) / sd;
    -0.5 * z * z - sd.ln()
}

/// Log posterior of the model given prepared data and prior scales.
pub struct OrdinalTrajectoryModel<'a> {
    data: &'a PreparedData,
    priors: ModelConfig,
}

impl<'a> OrdinalTrajectoryModel<'a> {
    pub fn new(data: &'a PreparedData, priors: &ModelConfig) -> Self {
        OrdinalTrajectoryModel {
            data,
            priors: priors.clone(),
        }
    }

    pub fn data(&self) -> &PreparedData {
        self.data
    }

    /// Random starting point; cutpoints start ordered and spread around zero.
    pub fn initial<R: Rng>(&self, rng: &mut R) -> Params {
        let theta = (0..self.data.units.len())
            .map(|_| rng.gen_range(-1.0..1.0))
            .collect();
        let items = self
            .data
            .items
            .iter()
            .map(|item| {
                let mut cut_raw = vec![rng.gen_range(-1.5..-0.5)];
                cut_raw.extend((1..item.num_categories() - 1).map(|_| rng.gen_range(-0.5..0.5)));
                ItemParams {
                    log_alpha: rng.gen_range(-0.5..0.5),
                    cut_raw,
                }
            })
            .collect();
        Params {
            theta,
            log_sigma: rng.gen_range(-2.0..0.0),
            items,
        }
    }

    fn theta_prior_mean_sd(&self, params: &Params, sigma: f64, n: usize) -> (f64, f64) {
        let unit = &self.data.units[n];
        match unit.prev {
            Some(p) => (params.theta[p], sigma * unit.gap.sqrt()),
            None => (0.0, 1.0),
        }
    }

    /// Terms of the log posterior that involve `theta[n]`, evaluated at
    /// `value`.
    pub fn unit_log_density(&self, params: &Params, n: usize, value: f64) -> f64 {
        let sigma = params.log_sigma.exp();
        let (mu, sd) = self.theta_prior_mean_sd(params, sigma, n);
        let mut lp = normal_lpdf(value, mu, sd);
        if let Some(next) = self.data.next_unit(n) {
            let sd = sigma * self.data.units[next].gap.sqrt();
            lp += normal_lpdf(params.theta[next], value, sd);
        }
        for &m in self.data.unit_observations(n) {
            let obs = self.data.observations[m];
            let item = &params.items[obs.item];
            lp += ordered_logistic_lpmf(obs.category, item.alpha() * value, &item.cutpoints());
        }
        lp
    }

    /// Terms of the log posterior that involve item `j`, evaluated at `item`.
    pub fn item_log_density(&self, params: &Params, j: usize, item: &ItemParams) -> f64 {
        let alpha = item.alpha();
        let cuts = item.cutpoints();
        let log_alpha_sd = self.priors.discrimination_scale;
        // lognormal prior on alpha plus the log Jacobian is normal on log alpha
        let mut lp = -0.5 * (item.log_alpha / log_alpha_sd).powi(2);
        for c in &cuts {
            lp += -0.5 * (c / self.priors.cut_scale).powi(2);
        }
        lp += item.cut_raw.iter().skip(1).sum::<f64>();
        for &m in self.data.item_observations(j) {
            let obs = self.data.observations[m];
            lp += ordered_logistic_lpmf(obs.category, alpha * params.theta[obs.unit], &cuts);
        }
        lp
    }

    /// Terms of the log posterior that involve `sigma`, evaluated at
    /// `log_sigma`.
    pub fn sigma_log_density(&self, params: &Params, log_sigma: f64) -> f64 {
        let sigma = log_sigma.exp();
        let mut lp = -0.5 * (sigma / self.priors.sigma_scale).powi(2) + log_sigma;
        for (n, unit) in self.data.units.iter().enumerate() {
            if let Some(p) = unit.prev {
                lp += normal_lpdf(params.theta[n], params.theta[p], sigma * unit.gap.sqrt());
            }
        }
        lp
    }

    /// Unnormalised log posterior on the unconstrained scale.
    pub fn log_posterior(&self, params: &Params) -> f64 {
        let sigma = params.log_sigma.exp();
        let mut lp = -0.5 * (sigma / self.priors.sigma_scale).powi(2) + params.log_sigma;
        for n in 0..self.data.units.len() {
            let (mu, sd) = self.theta_prior_mean_sd(params, sigma, n);
            lp += normal_lpdf(params.theta[n], mu, sd);
        }
        for (j, item) in params.items.iter().enumerate() {
            lp += self.item_log_density(params, j, item);
        }
        lp
    }
}
