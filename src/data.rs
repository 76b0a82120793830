use crate::config::DataConfig;
use anyhow::{anyhow, bail, Context, Error, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

/// One case-period row of the raw panel.  `values` follows the order of
/// the configured indicators; `None` marks a missing cell.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelRow {
    pub case: String,
    pub time: i64,
    pub values: Vec<Option<i64>>,
}

/// Raw panel as read from CSV.
#[derive(Debug, Clone)]
pub struct Panel {
    pub indicators: Vec<String>,
    pub rows: Vec<PanelRow>,
    min_categories: usize,
}

/// Unit of observation: one case in one period.
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub case: String,
    pub time: i64,
    /// Previous period of the same case, if any.
    pub prev: Option<usize>,
    /// Time elapsed since `prev`; 1.0 for the first period.
    pub gap: f64,
}

/// An indicator kept for estimation.  `codes[k]` is the raw code of
/// category `k + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub name: String,
    pub codes: Vec<i64>,
}

impl Item {
    pub fn num_categories(&self) -> usize {
        self.codes.len()
    }
}

/// A single non-missing indicator value.  `category` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub unit: usize,
    pub item: usize,
    pub category: usize,
}

/// Ragged long-format data handed to the samplers.
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub units: Vec<Unit>,
    pub items: Vec<Item>,
    pub observations: Vec<Observation>,
    by_unit: Vec<Vec<usize>>,
    by_item: Vec<Vec<usize>>,
    next: Vec<Option<usize>>,
}

#[derive(Serialize)]
struct LongRecord<'a> {
    case: &'a str,
    time: i64,
    indicator: &'a str,
    code: i64,
    category: usize,
}

#[derive(Serialize)]
struct CodebookRecord<'a> {
    indicator: &'a str,
    code: i64,
    category: usize,
    count: usize,
}

impl Panel {
    pub fn from_csv(path: &Path, config: &DataConfig) -> Result<Panel, Error> {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .with_context(|| format!("Failed to open panel {}", path.display()))?;
        let panel = Panel::from_csv_reader(reader, config)
            .with_context(|| format!("Failed to read panel {}", path.display()))?;
        info!(
            rows = panel.rows.len(),
            indicators = panel.indicators.len(),
            "Loaded panel from {}",
            path.display()
        );
        Ok(panel)
    }

    pub fn from_reader<R: io::Read>(reader: R, config: &DataConfig) -> Result<Panel, Error> {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        Panel::from_csv_reader(reader, config)
    }

    fn from_csv_reader<R: io::Read>(
        mut reader: csv::Reader<R>,
        config: &DataConfig,
    ) -> Result<Panel, Error> {
        let headers = reader.headers()?.clone();
        let column = |name: &str| -> Result<usize, Error> {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| anyhow!("Column '{}' not found in header", name))
        };
        let case_idx = column(&config.case_column)?;
        let time_idx = column(&config.time_column)?;
        let indicator_idx = config
            .indicators
            .iter()
            .map(|name| column(name))
            .collect::<Result<Vec<_>, _>>()?;

        let mut rows = Vec::new();
        for (i, record) in reader.records().enumerate() {
            // header is line 1
            let line = i + 2;
            let record = record?;
            let field = |idx: usize| record.get(idx).unwrap_or("");

            let case = field(case_idx);
            if case.is_empty() {
                bail!("Line {}: empty {} value", line, config.case_column);
            }
            let time = field(time_idx).parse::<i64>().map_err(|_| {
                anyhow!(
                    "Line {}: {} value '{}' is not an integer",
                    line,
                    config.time_column,
                    field(time_idx)
                )
            })?;
            let mut values = Vec::with_capacity(indicator_idx.len());
            for (name, &idx) in config.indicators.iter().zip(&indicator_idx) {
                let cell = field(idx);
                if config.missing_codes.iter().any(|m| m == cell) {
                    values.push(None);
                    continue;
                }
                let code = cell.parse::<i64>().map_err(|_| {
                    anyhow!("Line {}: {} value '{}' is not an integer code", line, name, cell)
                })?;
                values.push(Some(code));
            }
            rows.push(PanelRow {
                case: case.to_string(),
                time,
                values,
            });
        }

        Ok(Panel {
            indicators: config.indicators.clone(),
            rows,
            min_categories: config.min_categories,
        })
    }

    /// Sorts units, reindexes categories and drops missing cells.
    pub fn prepare(&self) -> Result<PreparedData, Error> {
        if self.rows.is_empty() {
            bail!("Panel has no rows");
        }
        let mut order: Vec<usize> = (0..self.rows.len()).collect();
        order.sort_by(|&a, &b| {
            let (ra, rb) = (&self.rows[a], &self.rows[b]);
            ra.case.cmp(&rb.case).then(ra.time.cmp(&rb.time))
        });

        let mut units: Vec<Unit> = Vec::with_capacity(order.len());
        for &row_idx in &order {
            let row = &self.rows[row_idx];
            let (prev, gap) = match units.last() {
                Some(last) if last.case == row.case => {
                    if last.time == row.time {
                        bail!("Duplicate period {} for case '{}'", row.time, row.case);
                    }
                    (Some(units.len() - 1), (row.time - last.time) as f64)
                }
                _ => (None, 1.0),
            };
            units.push(Unit {
                case: row.case.clone(),
                time: row.time,
                prev,
                gap,
            });
        }

        // a single category carries no cutpoint
        let min_categories = self.min_categories.max(2);
        let mut items = Vec::new();
        let mut item_columns = Vec::new();
        for (col, name) in self.indicators.iter().enumerate() {
            let codes: BTreeSet<i64> = self.rows.iter().filter_map(|r| r.values[col]).collect();
            if codes.len() < min_categories {
                warn!(
                    indicator = %name,
                    categories = codes.len(),
                    "Dropping indicator with too few observed categories"
                );
                continue;
            }
            debug!(indicator = %name, codes = ?codes, "Reindexed indicator");
            items.push(Item {
                name: name.clone(),
                codes: codes.into_iter().collect(),
            });
            item_columns.push(col);
        }
        if items.is_empty() {
            bail!("No indicator has at least {} observed categories", min_categories);
        }

        let mut observations = Vec::new();
        for (unit, &row_idx) in order.iter().enumerate() {
            let row = &self.rows[row_idx];
            for (item, (&col, codebook)) in item_columns.iter().zip(&items).enumerate() {
                if let Some(code) = row.values[col] {
                    let category = codebook
                        .codes
                        .binary_search(&code)
                        .map_err(|_| anyhow!("Code {} missing from codebook", code))?
                        + 1;
                    observations.push(Observation {
                        unit,
                        item,
                        category,
                    });
                }
            }
        }

        let prepared = PreparedData::new(units, items, observations);
        info!(
            units = prepared.units.len(),
            cases = prepared.cases().len(),
            items = prepared.items.len(),
            observations = prepared.observations.len(),
            "Prepared panel"
        );
        Ok(prepared)
    }
}

impl PreparedData {
    pub fn new(units: Vec<Unit>, items: Vec<Item>, observations: Vec<Observation>) -> Self {
        let mut by_unit = vec![Vec::new(); units.len()];
        let mut by_item = vec![Vec::new(); items.len()];
        for (m, obs) in observations.iter().enumerate() {
            by_unit[obs.unit].push(m);
            by_item[obs.item].push(m);
        }
        let mut next = vec![None; units.len()];
        for (n, unit) in units.iter().enumerate() {
            if let Some(p) = unit.prev {
                next[p] = Some(n);
            }
        }
        PreparedData {
            units,
            items,
            observations,
            by_unit,
            by_item,
            next,
        }
    }

    /// Indices into `observations` for one unit.
    pub fn unit_observations(&self, unit: usize) -> &[usize] {
        &self.by_unit[unit]
    }

    /// Indices into `observations` for one item.
    pub fn item_observations(&self, item: usize) -> &[usize] {
        &self.by_item[item]
    }

    /// Following period of the same case, if any.
    pub fn next_unit(&self, unit: usize) -> Option<usize> {
        self.next[unit]
    }

    /// Case names in unit order, each with its range of unit indices.
    pub fn cases(&self) -> Vec<(String, std::ops::Range<usize>)> {
        let mut cases: Vec<(String, std::ops::Range<usize>)> = Vec::new();
        for (n, unit) in self.units.iter().enumerate() {
            match cases.last_mut() {
                Some((case, range)) if *case == unit.case => range.end = n + 1,
                _ => cases.push((unit.case.clone(), n..n + 1)),
            }
        }
        cases
    }

    /// Total number of cutpoints over all items.
    pub fn num_cutpoints(&self) -> usize {
        self.items.iter().map(|i| i.num_categories() - 1).sum()
    }

    pub fn write_long_csv(&self, path: &Path) -> Result<(), Error> {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        for obs in &self.observations {
            let unit = &self.units[obs.unit];
            let item = &self.items[obs.item];
            writer.serialize(LongRecord {
                case: &unit.case,
                time: unit.time,
                indicator: &item.name,
                code: item.codes[obs.category - 1],
                category: obs.category,
            })?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn write_codebook_csv(&self, path: &Path) -> Result<(), Error> {
        let mut counts: BTreeMap<(usize, usize), usize> = BTreeMap::new();
        for obs in &self.observations {
            *counts.entry((obs.item, obs.category)).or_default() += 1;
        }
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        for (j, item) in self.items.iter().enumerate() {
            for (k, &code) in item.codes.iter().enumerate() {
                writer.serialize(CodebookRecord {
                    indicator: &item.name,
                    code,
                    category: k + 1,
                    count: counts.get(&(j, k + 1)).copied().unwrap_or(0),
                })?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Number of observed indicators per unit.
    pub fn observed_counts(&self) -> Vec<usize> {
        self.by_unit.iter().map(|m| m.len()).collect()
    }

    /// Lookup from (case, time) to unit index.
    pub fn unit_index(&self) -> HashMap<(&str, i64), usize> {
        self.units
            .iter()
            .enumerate()
            .map(|(n, u)| ((u.case.as_str(), u.time), n))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config(indicators: &[&str]) -> DataConfig {
        DataConfig {
            indicators: indicators.iter().map(|s| s.to_string()).collect(),
            ..DataConfig::default()
        }
    }

    const PANEL: &str = "\
case,year,killings,torture,note
beta,2001,3,,x
alpha,2002,1,0,y
alpha,2000,5,1,z
beta,2000,NA,1,
alpha,2001,-99,NA,
";

    #[test]
    fn reads_missing_codes_as_none() {
        let panel = Panel::from_reader(PANEL.as_bytes(), &config(&["killings", "torture"])).unwrap();
        assert_eq!(panel.rows.len(), 5);
        assert_eq!(panel.rows[0].values, vec![Some(3), None]);
        assert_eq!(panel.rows[3].values, vec![None, Some(1)]);
        assert_eq!(panel.rows[4].values, vec![None, None]);
    }

    #[test]
    fn prepare_sorts_units_and_links_periods() {
        let panel = Panel::from_reader(PANEL.as_bytes(), &config(&["killings", "torture"])).unwrap();
        let data = panel.prepare().unwrap();
        let keys: Vec<(&str, i64)> = data.units.iter().map(|u| (u.case.as_str(), u.time)).collect();
        assert_eq!(
            keys,
            vec![("alpha", 2000), ("alpha", 2001), ("alpha", 2002), ("beta", 2000), ("beta", 2001)]
        );
        assert_eq!(data.units[0].prev, None);
        assert_eq!(data.units[1].prev, Some(0));
        assert_eq!(data.units[3].prev, None);
        assert_eq!(data.next_unit(0), Some(1));
        assert_eq!(data.next_unit(2), None);
        assert_eq!(
            data.cases(),
            vec![("alpha".to_string(), 0..3), ("beta".to_string(), 3..5)]
        );
    }

    #[test]
    fn prepare_reindexes_codes_to_contiguous_categories() {
        let panel = Panel::from_reader(PANEL.as_bytes(), &config(&["killings", "torture"])).unwrap();
        let data = panel.prepare().unwrap();
        assert_eq!(data.items[0].codes, vec![1, 3, 5]);
        assert_eq!(data.items[1].codes, vec![0, 1]);
        assert_eq!(data.num_cutpoints(), 3);
        // alpha 2000 has killings = 5 (category 3) and torture = 1 (category 2)
        let first: Vec<Observation> = data
            .unit_observations(0)
            .iter()
            .map(|&m| data.observations[m])
            .collect();
        assert_eq!(
            first,
            vec![
                Observation { unit: 0, item: 0, category: 3 },
                Observation { unit: 0, item: 1, category: 2 },
            ]
        );
        // alpha 2001 is entirely missing but still a unit
        assert!(data.unit_observations(1).is_empty());
        assert_eq!(data.observations.len(), 6);
        assert_eq!(data.observed_counts(), vec![2, 0, 2, 1, 1]);
    }

    #[test]
    fn gaps_follow_time_differences() {
        let csv = "case,year,x\na,1990,1\na,1993,2\na,1994,1\n";
        let data = Panel::from_reader(csv.as_bytes(), &config(&["x"]))
            .unwrap()
            .prepare()
            .unwrap();
        let gaps: Vec<f64> = data.units.iter().map(|u| u.gap).collect();
        assert_eq!(gaps, vec![1.0, 3.0, 1.0]);
    }

    #[test]
    fn drops_single_category_indicators() {
        let csv = "case,year,x,y\na,1,1,4\na,2,2,4\n";
        let data = Panel::from_reader(csv.as_bytes(), &config(&["x", "y"]))
            .unwrap()
            .prepare()
            .unwrap();
        assert_eq!(data.items.len(), 1);
        assert_eq!(data.items[0].name, "x");

        let csv = "case,year,y\na,1,4\na,2,4\n";
        let panel = Panel::from_reader(csv.as_bytes(), &config(&["y"])).unwrap();
        assert!(panel.prepare().is_err());
    }

    #[test]
    fn single_category_indicators_dropped_even_when_allowed() {
        let csv = "case,year,x,y\na,1,1,4\na,2,2,4\n";
        let config = DataConfig {
            min_categories: 1,
            ..config(&["x", "y"])
        };
        let data = Panel::from_reader(csv.as_bytes(), &config)
            .unwrap()
            .prepare()
            .unwrap();
        assert_eq!(data.items.len(), 1);
        assert_eq!(data.items[0].name, "x");
        assert_eq!(crate::model::parameter_names(&data).len(), 1 + 1 + 1 + 2);
    }

    #[test]
    fn rejects_bad_input() {
        let cfg = config(&["x"]);
        assert!(Panel::from_reader("case,year\na,1\n".as_bytes(), &cfg).is_err());
        assert!(Panel::from_reader("case,year,x\na,one,1\n".as_bytes(), &cfg).is_err());
        assert!(Panel::from_reader("case,year,x\na,1,high\n".as_bytes(), &cfg).is_err());
        assert!(Panel::from_reader("case,year,x\n,1,1\n".as_bytes(), &cfg).is_err());
        let dup = Panel::from_reader("case,year,x\na,1,1\na,1,2\n".as_bytes(), &cfg).unwrap();
        assert!(dup.prepare().is_err());
    }

    #[test]
    fn reads_fixture_and_writes_long_and_codebook() {
        let d = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        let cfg = config(&["killings", "torture", "disappearances", "imprisonment"]);
        let data = Panel::from_csv(&d.join("test/data/panel.csv"), &cfg)
            .unwrap()
            .prepare()
            .unwrap();
        assert_eq!(data.cases().len(), 3);

        let dir = tempfile::tempdir().unwrap();
        let long = dir.path().join("long.csv");
        let codebook = dir.path().join("codebook.csv");
        data.write_long_csv(&long).unwrap();
        data.write_codebook_csv(&codebook).unwrap();

        let mut reader = csv::Reader::from_path(&long).unwrap();
        assert_eq!(
            reader.headers().unwrap(),
            vec!["case", "time", "indicator", "code", "category"]
        );
        assert_eq!(reader.records().count(), data.observations.len());

        let mut reader = csv::Reader::from_path(&codebook).unwrap();
        let total: usize = reader
            .records()
            .map(|r| r.unwrap()[3].parse::<usize>().unwrap())
            .sum();
        assert_eq!(total, data.observations.len());
    }
}
