use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ComputeError;
use crate::table::{TARGET_COLUMN, Table};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Centroid {
    label: f64,
    mean: Vec<f64>,
    count: usize,
}

/// Deterministic nearest-centroid classifier.
///
/// Model:
/// - One centroid per distinct `y` label: the per-feature mean of its rows.
/// - A row is assigned the label of the closest centroid (squared Euclidean
///   distance); ties go to the smaller label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearestCentroid {
    features: Vec<String>,
    centroids: Vec<Centroid>,
}

impl NearestCentroid {
    pub fn fit(table: &Table) -> Result<Self, ComputeError> {
        let mut table = table.clone();
        let labels = table.drop_column(TARGET_COLUMN).ok_or_else(|| {
            ComputeError::InvalidInput(format!("training data has no '{TARGET_COLUMN}' column"))
        })?;

        if labels.is_empty() {
            return Err(ComputeError::InvalidInput(
                "training data has no rows".to_string(),
            ));
        }
        if table.columns().is_empty() {
            return Err(ComputeError::InvalidInput(
                "training data has no feature columns".to_string(),
            ));
        }
        if labels.iter().any(|y| !y.is_finite()) {
            return Err(ComputeError::InvalidInput(format!(
                "column '{TARGET_COLUMN}' contains non-finite labels"
            )));
        }

        let features: Vec<String> = table.column_names().map(str::to_string).collect();
        let mut distinct: Vec<f64> = labels.clone();
        distinct.sort_by(f64::total_cmp);
        distinct.dedup();

        let centroids = distinct
            .into_iter()
            .map(|label| {
                let rows: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == label).collect();
                let mean = table
                    .columns()
                    .iter()
                    .map(|column| mean(rows.iter().map(|&i| column.values[i])))
                    .collect();
                Centroid {
                    label,
                    mean,
                    count: rows.len(),
                }
            })
            .collect::<Vec<_>>();

        debug!(
            rows = labels.len(),
            features = features.len(),
            classes = centroids.len(),
            "fitted nearest-centroid model"
        );
        Ok(Self {
            features,
            centroids,
        })
    }

    /// Predict a label per row. Extra columns (including `y`) are ignored.
    pub fn predict(&self, table: &Table) -> Result<Table, ComputeError> {
        let columns = self
            .features
            .iter()
            .map(|name| {
                table.column(name).ok_or_else(|| {
                    ComputeError::InvalidInput(format!("prediction data has no '{name}' column"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let predictions = (0..table.row_count())
            .map(|row| {
                let point: Vec<f64> = columns.iter().map(|c| c[row]).collect();
                self.nearest(&point)
            })
            .collect();

        Ok(Table::single(TARGET_COLUMN, predictions))
    }

    fn nearest(&self, point: &[f64]) -> f64 {
        let mut best: Option<(f64, f64)> = None;
        for centroid in &self.centroids {
            let d = squared_distance(point, &centroid.mean);
            match best {
                Some((best_d, _)) if best_d <= d => {}
                _ => best = Some((d, centroid.label)),
            }
        }
        best.map_or(0.0, |(_, label)| label)
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn labels(&self) -> impl Iterator<Item = f64> + '_ {
        self.centroids.iter().map(|c| c.label)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ComputeError> {
        serde_json::from_slice(bytes).map_err(|e| ComputeError::Decode {
            what: "model",
            reason: e.to_string(),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ComputeError> {
        serde_json::to_vec(self).map_err(|e| ComputeError::Encode {
            what: "model",
            reason: e.to_string(),
        })
    }
}

fn mean(xs: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = xs.fold((0.0, 0usize), |(sum, n), x| (sum + x, n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
