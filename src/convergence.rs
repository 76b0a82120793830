use crate::summary::ParameterSummary;
use anyhow::{Context, Error, Result};
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

/// How many offending parameters to name in a log line.
const LOG_LIMIT: usize = 10;

/// R hat check over all summarised parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Convergence {
    pub threshold: f64,
    pub max_rhat: f64,
    pub min_ess: f64,
    /// Parameters whose R hat exceeds the threshold or could not be computed,
    /// worst first.
    pub flagged: Vec<(String, f64)>,
}

#[derive(Serialize)]
struct ConvergenceRecord<'a> {
    parameter: &'a str,
    rhat: f64,
    ess: f64,
    converged: bool,
}

fn converged(rhat: f64, threshold: f64) -> bool {
    rhat.is_finite() && rhat <= threshold
}

impl Convergence {
    pub fn assess(summaries: &[ParameterSummary], threshold: f64) -> Convergence {
        let max_rhat = summaries
            .iter()
            .map(|s| s.rhat)
            .filter(|r| r.is_finite())
            .fold(f64::NAN, f64::max);
        let min_ess = summaries
            .iter()
            .map(|s| s.ess)
            .filter(|e| e.is_finite())
            .fold(f64::NAN, f64::min);
        let mut flagged: Vec<(String, f64)> = summaries
            .iter()
            .filter(|s| !converged(s.rhat, threshold))
            .map(|s| (s.parameter.clone(), s.rhat))
            .collect();
        // NaN sorts first: those parameters could not be assessed at all
        flagged.sort_by(|a, b| b.1.total_cmp(&a.1));
        Convergence {
            threshold,
            max_rhat,
            min_ess,
            flagged,
        }
    }

    pub fn is_converged(&self) -> bool {
        self.flagged.is_empty()
    }

    /// Logs the outcome; a warning names the worst parameters.
    pub fn report(&self) {
        if self.is_converged() {
            info!(
                max_rhat = %format!("{:.4}", self.max_rhat),
                min_ess = %format!("{:.1}", self.min_ess),
                "All parameters converged (R hat <= {})",
                self.threshold
            );
            return;
        }
        let worst: Vec<String> = self
            .flagged
            .iter()
            .take(LOG_LIMIT)
            .map(|(p, r)| format!("{}={:.3}", p, r))
            .collect();
        warn!(
            flagged = self.flagged.len(),
            max_rhat = %format!("{:.4}", self.max_rhat),
            "R hat above {} for: {}{}",
            self.threshold,
            worst.join(", "),
            if self.flagged.len() > LOG_LIMIT { ", ..." } else { "" }
        );
    }

    /// One row per parameter with its R hat, ESS and verdict.
    pub fn write_csv(
        &self,
        path: &Path,
        summaries: &[ParameterSummary],
    ) -> Result<(), Error> {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        for s in summaries {
            writer.serialize(ConvergenceRecord {
                parameter: &s.parameter,
                rhat: s.rhat,
                ess: s.ess,
                converged: converged(s.rhat, self.threshold),
            })?;
        }
        writer.flush()?;
        Ok(())
    }
}
