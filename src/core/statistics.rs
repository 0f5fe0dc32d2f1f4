use ndarray::Array2;
use serde::Serialize;
use std::fmt;

/// Summary of the finite cells of one grid
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GridStatistics {
    pub valid: usize,
    pub missing: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    /// Population standard deviation
    pub std: Option<f64>,
    pub range: Option<f64>,
}

impl GridStatistics {
    pub fn from_grid(grid: &Array2<f64>) -> Self {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;

        for &v in grid.iter().filter(|v| v.is_finite()) {
            count += 1;
            sum += v;
            min = min.min(v);
            max = max.max(v);
        }

        let missing = grid.len() - count;
        if count == 0 {
            return Self {
                valid: 0,
                missing,
                min: None,
                max: None,
                mean: None,
                std: None,
                range: None,
            };
        }

        let mean = sum / count as f64;
        // Two-pass variance keeps precision for geoid-sized offsets
        let variance = grid
            .iter()
            .filter(|v| v.is_finite())
            .map(|v| (v - mean) * (v - mean))
            .sum::<f64>()
            / count as f64;

        Self {
            valid: count,
            missing,
            min: Some(min),
            max: Some(max),
            mean: Some(mean),
            std: Some(variance.sqrt()),
            range: Some(max - min),
        }
    }
}

impl fmt::Display for GridStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.min, self.max, self.mean, self.std) {
            (Some(min), Some(max), Some(mean), Some(std)) => write!(
                f,
                "min {:.4} max {:.4} mean {:.4} std {:.4} ({} valid, {} missing)",
                min, max, mean, std, self.valid, self.missing
            ),
            _ => write!(f, "no valid cells ({} missing)", self.missing),
        }
    }
}
