use crate::data::PreparedData;
use crate::ess::compute_split_effective_sample_size;
use crate::rhat::split_potential_scale_reduction_factor;
use crate::sampler::Draws;
use crate::utils::{flatten, quantile, trim_chains};
use crate::Array1;
use anyhow::{anyhow, Context, Error, Result};
use average::Variance;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Lower and upper probabilities of the 95% credible interval.
pub const INTERVAL: (f64, f64) = (0.025, 0.975);

/// Posterior summary of one parameter over all chains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSummary {
    pub parameter: String,
    pub mean: f64,
    pub sd: f64,
    pub median: f64,
    pub lower: f64,
    pub upper: f64,
    /// Split R hat; `NaN` when it can't be computed (e.g. constant draws).
    pub rhat: f64,
    /// Split effective sample size; `NaN` when it can't be computed.
    pub ess: f64,
}

/// Latent value of one case in one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub case: String,
    pub time: i64,
    pub mean: f64,
    pub sd: f64,
    pub median: f64,
    pub lower: f64,
    pub upper: f64,
    pub rhat: f64,
    pub n_observed: usize,
}

impl ParameterSummary {
    pub fn from_chains(parameter: &str, chains: &[Array1]) -> Result<ParameterSummary, Error> {
        let chains = trim_chains(chains)?;
        let mut pooled = flatten(&chains);
        if pooled.is_empty() {
            return Err(anyhow!("No draws for {}", parameter));
        }
        let moments: Variance = pooled.iter().copied().collect();
        pooled.sort_by(|a, b| a.total_cmp(b));

        let rhat = split_potential_scale_reduction_factor(&chains).unwrap_or_else(|e| {
            debug!(parameter, error = %e, "No R hat");
            f64::NAN
        });
        let ess = compute_split_effective_sample_size(&chains).unwrap_or_else(|e| {
            debug!(parameter, error = %e, "No ESS");
            f64::NAN
        });

        Ok(ParameterSummary {
            parameter: parameter.to_string(),
            mean: moments.mean(),
            sd: if pooled.len() > 1 {
                moments.sample_variance().sqrt()
            } else {
                0.0
            },
            median: quantile(&pooled, 0.5)?,
            lower: quantile(&pooled, INTERVAL.0)?,
            upper: quantile(&pooled, INTERVAL.1)?,
            rhat,
            ess,
        })
    }
}

/// Summarises every parameter in `draws`, in draw order.
pub fn summarize(draws: &Draws) -> Result<Vec<ParameterSummary>, Error> {
    (0..draws.parameters.len())
        .into_par_iter()
        .map(|p| ParameterSummary::from_chains(&draws.parameters[p], &draws.chains_at(p)))
        .collect()
}

/// Joins the `theta[n]` summaries back onto their case and period.
pub fn trajectories(
    data: &PreparedData,
    summaries: &[ParameterSummary],
) -> Result<Vec<TrajectoryPoint>, Error> {
    let by_name: HashMap<&str, &ParameterSummary> = summaries
        .iter()
        .map(|s| (s.parameter.as_str(), s))
        .collect();
    let observed = data.observed_counts();
    data.units
        .iter()
        .enumerate()
        .map(|(n, unit)| {
            let name = format!("theta[{}]", n + 1);
            let s = by_name
                .get(name.as_str())
                .ok_or_else(|| anyhow!("No summary for {}", name))?;
            Ok(TrajectoryPoint {
                case: unit.case.clone(),
                time: unit.time,
                mean: s.mean,
                sd: s.sd,
                median: s.median,
                lower: s.lower,
                upper: s.upper,
                rhat: s.rhat,
                n_observed: observed[n],
            })
        })
        .collect()
}

fn write_records<T: Serialize>(path: &Path, records: &[T]) -> Result<(), Error> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_parameters_csv(path: &Path, summaries: &[ParameterSummary]) -> Result<(), Error> {
    write_records(path, summaries)
}

pub fn write_trajectories_csv(path: &Path, points: &[TrajectoryPoint]) -> Result<(), Error> {
    write_records(path, points)
}

pub fn read_trajectories_csv(path: &Path) -> Result<Vec<TrajectoryPoint>, Error> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let points = reader
        .deserialize()
        .collect::<Result<Vec<TrajectoryPoint>, csv::Error>>()
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Item, Observation, Unit};

    #[test]
    fn summary_statistics_of_pooled_draws() {
        let chains = vec![vec![1.0, 2.0, 3.0, 4.0], vec![2.0, 3.0, 4.0, 5.0]];
        let s = ParameterSummary::from_chains("sigma", &chains).unwrap();
        assert_eq!(s.parameter, "sigma");
        assert_abs_diff_eq!(s.mean, 3.0);
        // sample sd of the eight pooled draws
        assert_abs_diff_eq!(s.sd, 1.3093073414159544, epsilon = 1e-12);
        assert_abs_diff_eq!(s.median, 3.0);
        // np.percentile(..., [2.5, 97.5])
        assert_abs_diff_eq!(s.lower, 1.175, epsilon = 1e-12);
        assert_abs_diff_eq!(s.upper, 4.825, epsilon = 1e-12);
        assert_abs_diff_eq!(s.rhat, 1.957890020745122, epsilon = 1e-12);
        // split halves have two draws each, too few for ESS
        assert!(s.ess.is_nan());
    }

    #[test]
    fn ess_needs_eight_draws_per_chain() {
        let chains = vec![
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
            vec![2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
        ];
        let s = ParameterSummary::from_chains("sigma", &chains).unwrap();
        // four split chains of four draws: tau hat is 2 over 16 draws
        assert_abs_diff_eq!(s.ess, 8.0, epsilon = 1e-12);
        assert!(s.rhat.is_finite());
    }

    #[test]
    fn constant_draws_record_nan_diagnostics() {
        let chains = vec![vec![2.0; 6], vec![2.0; 6]];
        let s = ParameterSummary::from_chains("alpha[1]", &chains).unwrap();
        assert_abs_diff_eq!(s.mean, 2.0);
        assert_abs_diff_eq!(s.sd, 0.0);
        assert!(s.ess.is_nan());
        assert!(s.rhat.is_nan());
    }

    #[test]
    fn trajectories_join_case_and_period() {
        let units = vec![
            Unit {
                case: "a".to_string(),
                time: 2000,
                prev: None,
                gap: 1.0,
            },
            Unit {
                case: "a".to_string(),
                time: 2001,
                prev: Some(0),
                gap: 1.0,
            },
        ];
        let items = vec![Item {
            name: "x".to_string(),
            codes: vec![0, 1],
        }];
        let observations = vec![Observation {
            unit: 1,
            item: 0,
            category: 2,
        }];
        let data = PreparedData::new(units, items, observations);
        let draws = Draws::new(
            vec!["sigma".to_string(), "theta[1]".to_string(), "theta[2]".to_string()],
            vec![
                vec![vec![0.5, 0.6, 0.7, 0.8], vec![-1.0, -0.5, 0.0, 0.5], vec![1.0, 1.5, 2.0, 2.5]],
                vec![vec![0.4, 0.6, 0.5, 0.7], vec![-0.5, 0.0, 0.5, 1.0], vec![1.5, 2.0, 2.5, 3.0]],
            ],
        )
        .unwrap();
        let summaries = summarize(&draws).unwrap();
        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[2].parameter, "theta[2]");

        let points = trajectories(&data, &summaries).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].time, 2001);
        assert_eq!(points[0].n_observed, 0);
        assert_eq!(points[1].n_observed, 1);
        assert_abs_diff_eq!(points[1].mean, 2.0);
        assert!(points[1].lower < points[1].mean && points[1].mean < points[1].upper);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trajectories.csv");
        write_trajectories_csv(&path, &points).unwrap();
        let back = read_trajectories_csv(&path).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[1].case, "a");
        assert_abs_diff_eq!(back[1].upper, points[1].upper, epsilon = 1e-12);
    }

    #[test]
    fn missing_theta_summary_is_an_error() {
        let data = PreparedData::new(
            vec![Unit {
                case: "a".to_string(),
                time: 1,
                prev: None,
                gap: 1.0,
            }],
            vec![Item {
                name: "x".to_string(),
                codes: vec![0, 1],
            }],
            vec![],
        );
        assert!(trajectories(&data, &[]).is_err());
    }
}
