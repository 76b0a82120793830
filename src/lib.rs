//! Fits a Bayesian ordinal latent-trait model to panel data on conflict cases.
//!
//! A panel CSV holds one row per case and period with several ordinal
//! indicators, any of which may be missing.  The crate reindexes the
//! indicators into a ragged long format, samples the posterior of a
//! random-walk latent trajectory model (natively or through CmdStan),
//! checks convergence with split R hat and effective sample size, writes
//! posterior summaries to CSV and renders SVG plots per case.
#[cfg(test)]
#[macro_use]
extern crate approx;

/// Pipeline configuration loaded from YAML
pub mod config;
/// Convergence assessment over parameter summaries
pub mod convergence;
/// Panel loading and reindexing into observations
pub mod data;
/// Effective Sample Size (ESS)
pub mod ess;
/// Ordinal latent trajectory model and its log density
pub mod model;
/// Stages tying data, sampler, summaries and plots together
pub mod pipeline;
/// SVG rendering of trajectories and diagnostics
pub mod plot;
/// Gelman-Rubin split potential scale reduction (Rhat)
pub mod rhat;
/// Posterior draws and the samplers that produce them
pub mod sampler;
/// Posterior summaries and CSV output
pub mod summary;
/// Chain splitting and small statistics helpers
pub mod utils;

/// One-dimensional vector of numeric values
pub type Array1 = Vec<f64>;
/// Two dimensional vector of vectors of numeric values
pub type Array2 = Vec<Array1>;
