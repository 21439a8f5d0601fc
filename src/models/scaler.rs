//! Per-column standardization fitted on training rows only

use serde::{Deserialize, Serialize};

/// Column means and scales learned from a training matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl StandardScaler {
    /// Fit on rows of equal width. A constant column keeps scale 1.0.
    pub fn fit(rows: &[Vec<f64>]) -> Self {
        let width = rows.first().map_or(0, |r| r.len());
        let n = rows.len().max(1) as f64;

        let mut means = vec![0.0; width];
        for row in rows {
            for (m, x) in means.iter_mut().zip(row) {
                *m += x;
            }
        }
        for m in &mut means {
            *m /= n;
        }

        let mut scales = vec![0.0; width];
        for row in rows {
            for ((s, x), m) in scales.iter_mut().zip(row).zip(&means) {
                *s += (x - m).powi(2);
            }
        }
        for s in &mut scales {
            let std = (*s / n).sqrt();
            *s = if std > 0.0 && std.is_finite() { std } else { 1.0 };
        }

        Self { means, scales }
    }

    /// Standardize one row
    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.means.iter().zip(&self.scales))
            .map(|(x, (m, s))| (x - m) / s)
            .collect()
    }

    /// Standardize every row
    pub fn transform_all(&self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        rows.iter().map(|r| self.transform(r)).collect()
    }

    pub fn means(&self) -> &[f64] {
        &self.means
    }

    pub fn scales(&self) -> &[f64] {
        &self.scales
    }
}
