use std::{io, path::Path};

use anyhow::{bail, Context};
use nalgebra::DVector;
use tracing::debug;

use crate::{CoefficientError, CoefficientResult};

use super::{check_observation, CoefficientSource, PredictionMode};

/// One recorded observation and the coefficients chosen for it
#[derive(Debug, Clone, PartialEq)]
pub struct TableEntry {
    pub observation: DVector<f64>,
    pub coefficients: DVector<f64>,
}

/// Nearest neighbour lookup over recorded `(observation, coefficients)` pairs
#[derive(Debug, Clone, PartialEq)]
pub struct TableCoefficients {
    entries: Vec<TableEntry>,
    observation_dim: usize,
    coefficient_dim: usize,
}

impl TableCoefficients {
    pub fn new(entries: Vec<TableEntry>) -> CoefficientResult<Self> {
        let observation_dim = entries.first().map_or(0, |it| it.observation.len());
        let coefficient_dim = entries.first().map_or(0, |it| it.coefficients.len());

        for entry in &entries {
            check_observation(observation_dim, &entry.observation)?;
            super::check_coefficients(coefficient_dim, &entry.coefficients)?;

            if entry.observation.iter().any(|it| !it.is_finite()) {
                return Err(CoefficientError::NonFinite);
            }
        }

        Ok(Self {
            entries,
            observation_dim,
            coefficient_dim,
        })
    }

    pub fn entries(&self) -> &[TableEntry] {
        &self.entries
    }

    /// Reads a table with `obs_*` feature columns (in column order) and `z1..zK` target
    /// columns (in suffix order). Other columns are ignored.
    pub fn from_reader<R: io::Read>(reader: R) -> anyhow::Result<Self> {
        let mut csv = csv::Reader::from_reader(reader);
        let headers = csv.headers().context("Read table header")?.clone();

        let features = headers
            .iter()
            .enumerate()
            .filter(|(_, name)| name.starts_with("obs_"))
            .map(|(column, _)| column)
            .collect::<Vec<_>>();

        let mut targets = headers
            .iter()
            .enumerate()
            .filter_map(|(column, name)| {
                let suffix = name.strip_prefix('z')?.parse::<usize>().ok()?;
                Some((suffix, column))
            })
            .collect::<Vec<_>>();
        targets.sort_unstable();

        if features.is_empty() {
            bail!("Table has no obs_* columns");
        }
        if targets.is_empty() {
            bail!("Table has no z1..zK columns");
        }
        for (expected, (suffix, _)) in (1..).zip(&targets) {
            if *suffix != expected {
                bail!("Table targets are not contiguous, expected z{expected}, found z{suffix}");
            }
        }

        let mut entries = Vec::new();
        for (row, record) in csv.records().enumerate() {
            let record = record.context("Parse table record")?;

            let parse = |column: usize| -> anyhow::Result<f64> {
                let field = record.get(column).unwrap_or_default();
                field
                    .trim()
                    .parse::<f64>()
                    .with_context(|| format!("Parse {:?} in row {row}", &headers[column]))
            };

            let observation = features
                .iter()
                .map(|&column| parse(column))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let coefficients = targets
                .iter()
                .map(|&(_, column)| parse(column))
                .collect::<anyhow::Result<Vec<_>>>()?;

            entries.push(TableEntry {
                observation: DVector::from_vec(observation),
                coefficients: DVector::from_vec(coefficients),
            });
        }

        if entries.is_empty() {
            bail!("Table has no rows");
        }

        debug!(
            rows = entries.len(),
            features = features.len(),
            targets = targets.len(),
            "Loaded coefficient table"
        );

        Self::new(entries).context("Validate table")
    }
}

pub fn read_table<P: AsRef<Path>>(path: P) -> anyhow::Result<TableCoefficients> {
    let file = std::fs::File::open(path).context("Open coefficient table")?;
    TableCoefficients::from_reader(file)
}

impl CoefficientSource for TableCoefficients {
    fn observation_dim(&self) -> usize {
        self.observation_dim
    }

    fn coefficient_dim(&self) -> usize {
        self.coefficient_dim
    }

    fn predict(
        &mut self,
        observation: &DVector<f64>,
        _mode: PredictionMode,
    ) -> CoefficientResult<DVector<f64>> {
        check_observation(self.observation_dim, observation)?;

        // First entry wins on ties
        let mut best: Option<(f64, &TableEntry)> = None;
        for entry in &self.entries {
            let distance = (&entry.observation - observation).norm_squared();

            if best.map_or(true, |(best, _)| distance < best) {
                best = Some((distance, entry));
            }
        }

        match best {
            Some((_, entry)) => Ok(entry.coefficients.clone()),
            None => Ok(DVector::zeros(self.coefficient_dim)),
        }
    }
}
