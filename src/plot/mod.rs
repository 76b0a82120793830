//! Substantive and diagnostic plots, rendered as standalone SVG files.
use crate::config::PlotConfig;
use crate::sampler::Draws;
use crate::summary::{ParameterSummary, TrajectoryPoint};
use crate::Array1;
use anyhow::{Context, Error, Result};
use average::{Max, Min};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub mod svg;

use svg::{ticks, Canvas, Frame, SvgTheme};

const MARGIN_LEFT: f64 = 64.0;
const MARGIN_RIGHT: f64 = 20.0;
const MARGIN_TOP: f64 = 36.0;
const MARGIN_BOTTOM: f64 = 56.0;

/// Finite extent of a set of values, padded by 5% on each side.
fn extent<I: IntoIterator<Item = f64>>(values: I) -> (f64, f64) {
    let values: Array1 = values.into_iter().filter(|v| v.is_finite()).collect();
    if values.is_empty() {
        return (-1.0, 1.0);
    }
    let min: Min = values.iter().copied().collect();
    let max: Max = values.iter().copied().collect();
    let (lo, hi) = (min.min(), max.max());
    let pad = if hi > lo { (hi - lo) * 0.05 } else { 0.5 };
    (lo - pad, hi + pad)
}

/// File-system friendly name for a case.
pub fn file_stem(case: &str) -> String {
    let stem: String = case
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    let stem = stem.trim_matches('_').to_string();
    if stem.is_empty() {
        "case".to_string()
    } else {
        stem
    }
}

/// File names for `cases`, suffixing `-2`, `-3`, ... when two names
/// clean up to the same stem.
pub fn unique_stems<'a, I: IntoIterator<Item = &'a str>>(cases: I) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    cases
        .into_iter()
        .map(|case| {
            let base = file_stem(case);
            let mut stem = base.clone();
            let mut n = 1;
            while !used.insert(stem.clone()) {
                n += 1;
                stem = format!("{}-{}", base, n);
            }
            stem
        })
        .collect()
}

/// Groups trajectory points by case, each sorted by time, in first-seen
/// case order.
pub fn group_by_case(points: &[TrajectoryPoint]) -> Vec<(String, Vec<TrajectoryPoint>)> {
    let mut groups: Vec<(String, Vec<TrajectoryPoint>)> = Vec::new();
    for p in points {
        match groups.iter_mut().find(|(case, _)| *case == p.case) {
            Some((_, group)) => group.push(p.clone()),
            None => groups.push((p.case.clone(), vec![p.clone()])),
        }
    }
    for (_, group) in groups.iter_mut() {
        group.sort_by_key(|p| p.time);
    }
    groups
}

/// Draws the band and mean line of one case into `frame`.
fn draw_trajectory(
    canvas: &mut Canvas,
    frame: &Frame,
    points: &[TrajectoryPoint],
    theme: &SvgTheme,
) {
    let mut band: Vec<(f64, f64)> = points
        .iter()
        .map(|p| frame.point(p.time as f64, p.upper))
        .collect();
    band.extend(points.iter().rev().map(|p| frame.point(p.time as f64, p.lower)));
    canvas.polygon(&band, &theme.band, 0.6);

    let line: Vec<(f64, f64)> = points
        .iter()
        .map(|p| frame.point(p.time as f64, p.mean))
        .collect();
    canvas.polyline(&line, &theme.line, 2.0);
    for (p, at) in points.iter().zip(&line) {
        // hollow marker for periods with no observed indicator
        let fill = if p.n_observed == 0 {
            theme.background.as_str()
        } else {
            theme.line.as_str()
        };
        canvas.circle(*at, 2.5, fill);
    }
}

/// Posterior mean trajectory of one case with its 95% credible band.
pub fn trajectory_svg(case: &str, points: &[TrajectoryPoint], config: &PlotConfig) -> String {
    let theme = SvgTheme::light();
    let (width, height) = (config.width, config.height);
    let mut canvas = Canvas::new(width, height, &theme);

    let x = extent(points.iter().map(|p| p.time as f64));
    let y = extent(points.iter().flat_map(|p| [p.lower, p.upper]));
    let frame = Frame::new(
        MARGIN_LEFT,
        MARGIN_TOP,
        width - MARGIN_LEFT - MARGIN_RIGHT,
        height - MARGIN_TOP - MARGIN_BOTTOM,
        x,
        y,
    );
    canvas.axes(
        &frame,
        &ticks(x.0, x.1, 6),
        &ticks(y.0, y.1, 5),
        ("Year", "Latent trait (theta)"),
        11.0,
        &theme,
    );
    if y.0 < 0.0 && y.1 > 0.0 {
        let zero = frame.y.map(0.0);
        canvas.line((frame.left, zero), (frame.left + frame.width, zero), &theme.axis, 0.5);
    }
    draw_trajectory(&mut canvas, &frame, points, &theme);
    canvas.text((width / 2.0, 22.0), case, 15.0, "middle", &theme.text, &theme);
    canvas.finish()
}

/// Small multiples of every case on a shared y-axis.
pub fn facet_svg(cases: &[(String, Vec<TrajectoryPoint>)], config: &PlotConfig) -> String {
    let theme = SvgTheme::light();
    let columns = config.facet_columns.max(1).min(cases.len().max(1));
    let rows = (cases.len() + columns - 1) / columns;
    let cell_width = config.width / 2.0;
    let cell_height = config.height / 2.0;
    let width = cell_width * columns as f64;
    let height = cell_height * rows.max(1) as f64;
    let mut canvas = Canvas::new(width, height, &theme);

    let y = extent(
        cases
            .iter()
            .flat_map(|(_, points)| points.iter().flat_map(|p| [p.lower, p.upper])),
    );
    for (i, (case, points)) in cases.iter().enumerate() {
        let left = (i % columns) as f64 * cell_width;
        let top = (i / columns) as f64 * cell_height;
        let x = extent(points.iter().map(|p| p.time as f64));
        let frame = Frame::new(
            left + 44.0,
            top + 24.0,
            cell_width - 56.0,
            cell_height - 52.0,
            x,
            y,
        );
        canvas.open_group();
        canvas.axes(&frame, &ticks(x.0, x.1, 4), &ticks(y.0, y.1, 4), ("", ""), 9.0, &theme);
        draw_trajectory(&mut canvas, &frame, points, &theme);
        canvas.text(
            (left + cell_width / 2.0, top + 16.0),
            case,
            12.0,
            "middle",
            &theme.text,
            &theme,
        );
        canvas.close_group();
    }
    canvas.finish()
}

/// R hat of every parameter, sorted, against the convergence threshold.
pub fn rhat_svg(summaries: &[ParameterSummary], threshold: f64, config: &PlotConfig) -> String {
    let theme = SvgTheme::light();
    let (width, height) = (config.width, config.height);
    let mut canvas = Canvas::new(width, height, &theme);

    let mut rhats: Array1 = summaries
        .iter()
        .map(|s| s.rhat)
        .filter(|r| r.is_finite())
        .collect();
    rhats.sort_by(|a, b| a.total_cmp(b));
    let x = (1.0, rhats.len().max(1) as f64);
    let (lo, hi) = extent(rhats.iter().copied().chain([1.0, threshold]));
    let y = (lo.min(0.99), hi);
    let frame = Frame::new(
        MARGIN_LEFT,
        MARGIN_TOP,
        width - MARGIN_LEFT - MARGIN_RIGHT,
        height - MARGIN_TOP - MARGIN_BOTTOM,
        x,
        y,
    );
    canvas.axes(
        &frame,
        &ticks(x.0, x.1, 6),
        &ticks(y.0, y.1, 5),
        ("Parameter rank", "Split R hat"),
        11.0,
        &theme,
    );
    let limit = frame.y.map(threshold);
    canvas.dashed_line((frame.left, limit), (frame.left + frame.width, limit), &theme.threshold);
    for (i, r) in rhats.iter().enumerate() {
        let fill = if *r > threshold {
            theme.threshold.as_str()
        } else {
            theme.line.as_str()
        };
        canvas.circle(frame.point(i as f64 + 1.0, *r), 2.0, fill);
    }
    let title = format!(
        "R hat for {} parameters (threshold {})",
        summaries.len(),
        threshold
    );
    canvas.text((width / 2.0, 22.0), &title, 14.0, "middle", &theme.text, &theme);
    canvas.finish()
}

/// Per-chain trace of one parameter over kept draws.
pub fn trace_svg(parameter: &str, chains: &[Array1], config: &PlotConfig) -> String {
    let theme = SvgTheme::light();
    let (width, height) = (config.width, config.height);
    let mut canvas = Canvas::new(width, height, &theme);

    let num_draws = chains.iter().map(|c| c.len()).max().unwrap_or(1);
    let x = (1.0, num_draws.max(2) as f64);
    let y = extent(chains.iter().flatten().copied());
    let frame = Frame::new(
        MARGIN_LEFT,
        MARGIN_TOP,
        width - MARGIN_LEFT - MARGIN_RIGHT,
        height - MARGIN_TOP - MARGIN_BOTTOM,
        x,
        y,
    );
    canvas.axes(
        &frame,
        &ticks(x.0, x.1, 6),
        &ticks(y.0, y.1, 5),
        ("Draw", parameter),
        11.0,
        &theme,
    );
    for (c, chain) in chains.iter().enumerate() {
        let line: Vec<(f64, f64)> = chain
            .iter()
            .enumerate()
            .map(|(i, v)| frame.point(i as f64 + 1.0, *v))
            .collect();
        canvas.polyline(&line, theme.chain_color(c), 1.0);
    }
    let title = format!("Trace of {} ({} chains)", parameter, chains.len());
    canvas.text((width / 2.0, 22.0), &title, 14.0, "middle", &theme.text, &theme);
    canvas.finish()
}

fn write_svg(path: &Path, svg: &str) -> Result<(), Error> {
    fs::write(path, svg).with_context(|| format!("Failed to write {}", path.display()))
}

/// Writes `cases/<case>.svg` for every case plus `trajectories.svg`.
/// Clashing file names are made unique with [`unique_stems`].
pub fn render_trajectories(
    dir: &Path,
    points: &[TrajectoryPoint],
    config: &PlotConfig,
) -> Result<Vec<PathBuf>, Error> {
    let case_dir = dir.join("cases");
    fs::create_dir_all(&case_dir)
        .with_context(|| format!("Failed to create {}", case_dir.display()))?;
    let cases = group_by_case(points);
    let stems = unique_stems(cases.iter().map(|(case, _)| case.as_str()));
    let mut written = Vec::with_capacity(cases.len() + 1);
    for ((case, case_points), stem) in cases.iter().zip(&stems) {
        if stem != &file_stem(case) {
            warn!(case = %case, "File name clashes with another case, writing {}.svg", stem);
        }
        let path = case_dir.join(format!("{}.svg", stem));
        write_svg(&path, &trajectory_svg(case, case_points, config))?;
        written.push(path);
    }
    let path = dir.join("trajectories.svg");
    write_svg(&path, &facet_svg(&cases, config))?;
    written.push(path);
    info!(cases = cases.len(), "Rendered trajectory plots to {}", dir.display());
    Ok(written)
}

/// Writes `rhat.svg` and one `trace_<parameter>.svg` per configured
/// parameter.  Unknown trace parameters are skipped with a warning.
pub fn render_diagnostics(
    dir: &Path,
    summaries: &[ParameterSummary],
    draws: &Draws,
    threshold: f64,
    config: &PlotConfig,
) -> Result<Vec<PathBuf>, Error> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let mut written = Vec::new();
    let path = dir.join("rhat.svg");
    write_svg(&path, &rhat_svg(summaries, threshold, config))?;
    written.push(path);
    for parameter in &config.trace_parameters {
        let chains = match draws.parameter(parameter) {
            Ok(chains) => chains,
            Err(e) => {
                warn!(parameter = %parameter, "Skipping trace plot: {}", e);
                continue;
            }
        };
        let path = dir.join(format!("trace_{}.svg", file_stem(parameter)));
        write_svg(&path, &trace_svg(parameter, &chains, config))?;
        written.push(path);
    }
    info!(plots = written.len(), "Rendered diagnostic plots to {}", dir.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(case: &str, time: i64, mean: f64, n_observed: usize) -> TrajectoryPoint {
        TrajectoryPoint {
            case: case.to_string(),
            time,
            mean,
            sd: 0.3,
            median: mean,
            lower: mean - 0.6,
            upper: mean + 0.6,
            rhat: 1.01,
            n_observed,
        }
    }

    fn points() -> Vec<TrajectoryPoint> {
        vec![
            point("Sri Lanka", 2001, 1.2, 3),
            point("Colombia", 2000, -0.4, 2),
            point("Sri Lanka", 2000, 0.9, 0),
            point("Colombia", 2001, -0.1, 4),
        ]
    }

    #[test]
    fn file_stems_are_safe() {
        assert_eq!(file_stem("Sri Lanka"), "Sri_Lanka");
        assert_eq!(file_stem("../etc/passwd"), "etc_passwd");
        assert_eq!(file_stem("Côte d'Ivoire"), "Côte_d_Ivoire");
        assert_eq!(file_stem("///"), "case");
        assert_eq!(file_stem("alpha[1]"), "alpha_1");
    }

    #[test]
    fn clashing_stems_get_suffixes() {
        let stems = unique_stems(["Congo (DRC)", "Congo_(DRC)", "Chad", "Congo  DRC-2"]);
        assert_eq!(stems, vec!["Congo__DRC", "Congo__DRC-2", "Chad", "Congo__DRC-2-2"]);
    }

    #[test]
    fn clashing_cases_keep_separate_plots() {
        let dir = tempfile::tempdir().unwrap();
        let points = vec![
            point("Congo (DRC)", 2000, 0.5, 1),
            point("Congo_(DRC)", 2000, -0.5, 1),
        ];
        let written = render_trajectories(dir.path(), &points, &PlotConfig::default()).unwrap();
        assert_eq!(written.len(), 3);
        assert!(written.iter().all(|p| p.exists()));
        let on_disk = fs::read_dir(dir.path().join("cases")).unwrap().count();
        assert_eq!(on_disk, 2);
        let second = fs::read_to_string(dir.path().join("cases/Congo__DRC-2.svg")).unwrap();
        assert!(second.contains(">Congo_(DRC)</text>"));
    }

    #[test]
    fn groups_sort_each_case_by_time() {
        let groups = group_by_case(&points());
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "Sri Lanka");
        let times: Vec<i64> = groups[0].1.iter().map(|p| p.time).collect();
        assert_eq!(times, vec![2000, 2001]);
    }

    #[test]
    fn trajectory_svg_has_band_line_and_title() {
        let groups = group_by_case(&points());
        let svg = trajectory_svg("Sri Lanka", &groups[0].1, &PlotConfig::default());
        assert!(svg.starts_with("<svg"));
        assert!(svg.ends_with("</svg>"));
        assert!(svg.contains("<polygon"));
        assert!(svg.contains("<polyline"));
        assert!(svg.contains(">Sri Lanka</text>"));
        assert_eq!(svg.matches("<circle").count(), 2);
    }

    #[test]
    fn facet_svg_has_one_panel_per_case() {
        let groups = group_by_case(&points());
        let svg = facet_svg(&groups, &PlotConfig::default());
        assert_eq!(svg.matches("<g>").count(), 2);
        assert!(svg.contains(">Colombia</text>"));
    }

    #[test]
    fn rhat_svg_marks_threshold() {
        let summaries: Vec<ParameterSummary> = [1.0, 1.02, 1.3, f64::NAN]
            .iter()
            .enumerate()
            .map(|(i, r)| ParameterSummary {
                parameter: format!("theta[{}]", i + 1),
                mean: 0.0,
                sd: 1.0,
                median: 0.0,
                lower: -1.0,
                upper: 1.0,
                rhat: *r,
                ess: 100.0,
            })
            .collect();
        let svg = rhat_svg(&summaries, 1.1, &PlotConfig::default());
        assert!(svg.contains("stroke-dasharray"));
        assert_eq!(svg.matches("<circle").count(), 3);
        assert!(svg.contains("R hat for 4 parameters"));
    }

    #[test]
    fn render_writes_expected_files() {
        let dir = tempfile::tempdir().unwrap();
        let written = render_trajectories(dir.path(), &points(), &PlotConfig::default()).unwrap();
        assert_eq!(written.len(), 3);
        assert!(dir.path().join("cases/Sri_Lanka.svg").exists());
        assert!(dir.path().join("cases/Colombia.svg").exists());
        assert!(dir.path().join("trajectories.svg").exists());

        let draws = Draws::new(
            vec!["sigma".to_string()],
            vec![vec![vec![0.5, 0.6, 0.4, 0.55]], vec![vec![0.45, 0.5, 0.62, 0.58]]],
        )
        .unwrap();
        let summaries = crate::summary::summarize(&draws).unwrap();
        let config = PlotConfig {
            trace_parameters: vec!["sigma".to_string(), "tau[9,9]".to_string()],
            ..PlotConfig::default()
        };
        let written = render_diagnostics(dir.path(), &summaries, &draws, 1.1, &config).unwrap();
        assert_eq!(written.len(), 2);
        assert!(dir.path().join("trace_sigma.svg").exists());
    }
}
