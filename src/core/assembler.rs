//! Potential to geoid-height conversion and assembly of correction outputs.

use crate::core::ellipsoid::Ellipsoid;
use crate::core::statistics::GridStatistics;
use crate::types::{CorrectionMode, GeoidError, GeoidResult, GridAxes, SourceKind};
use chrono::{DateTime, Utc};
use ndarray::{Array2, Zip};
use std::collections::BTreeMap;
use std::time::Duration;

/// Floor on normal gravity in Bruns' formula (m/s²)
pub const MIN_NORMAL_GRAVITY: f64 = 1e-8;

/// Bruns' formula, ΔN = V / γ(lat), row by row.
///
/// Cells that are invalid in `mask` come out as NaN whatever the potential.
pub fn potential_to_geoid(
    potential: &Array2<f64>,
    axes: &GridAxes,
    ellipsoid: &Ellipsoid,
    mask: &Array2<bool>,
) -> GeoidResult<Array2<f64>> {
    let shape = axes.shape();
    for (name, dim) in [("potential", potential.dim()), ("validity mask", mask.dim())] {
        if dim != shape {
            return Err(GeoidError::ShapeMismatch {
                layer: name.to_string(),
                expected: shape,
                got: dim,
            });
        }
    }

    let gamma = ellipsoid.normal_gravity_deg(&axes.lats);
    let mut delta_n = Array2::from_elem(shape, f64::NAN);

    for ((i, j), out) in delta_n.indexed_iter_mut() {
        if mask[[i, j]] {
            *out = potential[[i, j]] / gamma[i].max(MIN_NORMAL_GRAVITY);
        }
    }
    Ok(delta_n)
}

/// Output of one correction request. Every grid shares `axes`.
#[derive(Debug, Clone)]
pub struct CorrectionResult {
    pub mode: CorrectionMode,
    pub axes: GridAxes,
    pub original_geoid: Array2<f64>,
    /// Input layer behind each source family, converted to meters
    pub inputs: BTreeMap<SourceKind, Array2<f64>>,
    /// ΔN per computed source family (m)
    pub corrections: BTreeMap<SourceKind, Array2<f64>>,
    pub source_counts: BTreeMap<SourceKind, usize>,
    pub total_correction: Array2<f64>,
    /// Present for single and combined modes
    pub corrected_geoid: Option<Array2<f64>>,
    /// Present for residual mode
    pub residual_geoid: Option<Array2<f64>>,
    pub computed_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl CorrectionResult {
    /// Look up an output grid by name.
    ///
    /// Single-type modes also answer to `correction`.
    pub fn grid(&self, name: &str) -> Option<&Array2<f64>> {
        match name {
            "original_geoid" => Some(&self.original_geoid),
            "total_correction" => Some(&self.total_correction),
            "corrected_geoid" => self.corrected_geoid.as_ref(),
            "residual_geoid" => self.residual_geoid.as_ref(),
            "correction" => self.single_correction(),
            other => self
                .corrections
                .iter()
                .find(|(kind, _)| kind.correction_name() == other)
                .or_else(|| self.inputs.iter().find(|(kind, _)| kind.input_name() == other))
                .map(|(_, grid)| grid),
        }
    }

    /// All output grids in presentation order.
    ///
    /// Input layers come first, then the per-type corrections. Single-type
    /// modes repeat their correction as `correction`.
    pub fn named_grids(&self) -> Vec<(&'static str, &Array2<f64>)> {
        let mut grids = vec![("original_geoid", &self.original_geoid)];
        for (kind, grid) in &self.inputs {
            grids.push((kind.input_name(), grid));
        }
        for (kind, grid) in &self.corrections {
            grids.push((kind.correction_name(), grid));
        }
        if let Some(correction) = self.single_correction() {
            grids.push(("correction", correction));
        }
        grids.push(("total_correction", &self.total_correction));
        if let Some(corrected) = &self.corrected_geoid {
            grids.push(("corrected_geoid", corrected));
        }
        if let Some(residual) = &self.residual_geoid {
            grids.push(("residual_geoid", residual));
        }
        grids
    }

    /// The corrected or residual geoid, whichever the mode produced
    pub fn output_geoid(&self) -> &Array2<f64> {
        self.residual_geoid
            .as_ref()
            .or(self.corrected_geoid.as_ref())
            .unwrap_or(&self.original_geoid)
    }

    fn single_correction(&self) -> Option<&Array2<f64>> {
        if self.mode.is_single() {
            self.corrections.values().next()
        } else {
            None
        }
    }

    pub fn total_sources(&self) -> usize {
        self.source_counts.values().sum()
    }

    pub fn summary(&self) -> Vec<(&'static str, GridStatistics)> {
        self.named_grids()
            .into_iter()
            .map(|(name, grid)| (name, GridStatistics::from_grid(grid)))
            .collect()
    }
}

/// Collects per-type potential grids and assembles the final result
pub struct CorrectionAssembler<'a> {
    mode: CorrectionMode,
    axes: &'a GridAxes,
    ellipsoid: &'a Ellipsoid,
    mask: &'a Array2<bool>,
    expected: Vec<SourceKind>,
    inputs: BTreeMap<SourceKind, Array2<f64>>,
    corrections: BTreeMap<SourceKind, Array2<f64>>,
    source_counts: BTreeMap<SourceKind, usize>,
}

impl<'a> CorrectionAssembler<'a> {
    pub fn new(
        mode: CorrectionMode,
        expected: Vec<SourceKind>,
        axes: &'a GridAxes,
        ellipsoid: &'a Ellipsoid,
        mask: &'a Array2<bool>,
    ) -> Self {
        Self {
            mode,
            axes,
            ellipsoid,
            mask,
            expected,
            inputs: BTreeMap::new(),
            corrections: BTreeMap::new(),
            source_counts: BTreeMap::new(),
        }
    }

    /// Keep the meter-valued input layer a family was built from
    pub fn add_input(&mut self, kind: SourceKind, layer: Array2<f64>) -> GeoidResult<()> {
        if layer.dim() != self.axes.shape() {
            return Err(GeoidError::ShapeMismatch {
                layer: kind.input_name().to_string(),
                expected: self.axes.shape(),
                got: layer.dim(),
            });
        }
        self.inputs.insert(kind, layer);
        Ok(())
    }

    /// Convert one family's potential grid to ΔN and keep it
    pub fn add_potential(
        &mut self,
        kind: SourceKind,
        potential: &Array2<f64>,
        n_sources: usize,
    ) -> GeoidResult<()> {
        let delta_n = potential_to_geoid(potential, self.axes, self.ellipsoid, self.mask)?;
        self.source_counts.insert(kind, n_sources);
        self.corrections.insert(kind, delta_n);
        Ok(())
    }

    /// Combine the per-type corrections and subtract them from the geoid
    pub fn finish(
        self,
        original_geoid: &Array2<f64>,
        elapsed: Duration,
    ) -> GeoidResult<CorrectionResult> {
        if let Some(missing) = self.expected.iter().find(|k| !self.corrections.contains_key(k)) {
            return Err(GeoidError::InvalidGrid(format!(
                "{} correction was never computed for {} mode",
                missing, self.mode
            )));
        }
        if original_geoid.dim() != self.axes.shape() {
            return Err(GeoidError::ShapeMismatch {
                layer: "geoid".to_string(),
                expected: self.axes.shape(),
                got: original_geoid.dim(),
            });
        }

        let mut total: Array2<f64> = Array2::zeros(self.axes.shape());
        for grid in self.corrections.values() {
            total += grid;
        }

        let mut output: Array2<f64> = Array2::zeros(self.axes.shape());
        Zip::from(&mut output)
            .and(original_geoid)
            .and(&total)
            .for_each(|out, &n, &dn| *out = n - dn);

        let (corrected_geoid, residual_geoid) = match self.mode {
            CorrectionMode::Residual => (None, Some(output)),
            _ => (Some(output), None),
        };

        log::info!(
            "Assembled {} correction from {} source families",
            self.mode,
            self.corrections.len()
        );

        Ok(CorrectionResult {
            mode: self.mode,
            axes: self.axes.clone(),
            original_geoid: original_geoid.clone(),
            inputs: self.inputs,
            corrections: self.corrections,
            source_counts: self.source_counts,
            total_correction: total,
            corrected_geoid,
            residual_geoid,
            computed_at: Utc::now(),
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn setup() -> (GridAxes, Ellipsoid, Array2<bool>) {
        let axes = GridAxes::new(0.0, 1.0, 0.0, 1.0, 1.0).unwrap();
        let mut mask = Array2::from_elem((2, 2), true);
        mask[[1, 1]] = false;
        (axes, Ellipsoid::wgs84(), mask)
    }

    #[test]
    fn test_bruns_formula() {
        let (axes, ell, mask) = setup();
        let potential = Array2::from_elem((2, 2), 9.8);
        let dn = potential_to_geoid(&potential, &axes, &ell, &mask).unwrap();

        assert_relative_eq!(dn[[0, 0]], 9.8 / ell.normal_gravity(0.0), max_relative = 1e-12);
        assert_relative_eq!(
            dn[[1, 0]],
            9.8 / ell.normal_gravity(1.0_f64.to_radians()),
            max_relative = 1e-12
        );
        assert!(dn[[1, 1]].is_nan());
    }

    #[test]
    fn test_combined_assembly() {
        let (axes, ell, mask) = setup();
        let geoid = Array2::from_elem((2, 2), 40.0);
        let kinds = vec![SourceKind::Topographic, SourceKind::Crustal];
        let mut assembler = CorrectionAssembler::new(CorrectionMode::Combined, kinds, &axes, &ell, &mask);

        assembler
            .add_potential(SourceKind::Topographic, &Array2::from_elem((2, 2), 10.0), 3)
            .unwrap();
        assembler
            .add_potential(SourceKind::Crustal, &Array2::from_elem((2, 2), -4.0), 2)
            .unwrap();
        let result = assembler.finish(&geoid, Duration::from_millis(5)).unwrap();

        let topo = result.grid("topographic_correction").unwrap();
        let crust = result.grid("crustal_correction").unwrap();
        let corrected = result.corrected_geoid.as_ref().unwrap();
        assert_relative_eq!(result.total_correction[[0, 1]], topo[[0, 1]] + crust[[0, 1]]);
        assert_relative_eq!(corrected[[0, 1]] + result.total_correction[[0, 1]], 40.0);
        assert!(corrected[[1, 1]].is_nan());
        assert!(result.residual_geoid.is_none());
        assert!(result.grid("correction").is_none());
        assert_eq!(result.total_sources(), 5);

        let names: Vec<_> = result.named_grids().iter().map(|(n, _)| *n).collect();
        assert_eq!(
            names,
            vec![
                "original_geoid",
                "topographic_correction",
                "crustal_correction",
                "total_correction",
                "corrected_geoid"
            ]
        );
    }

    #[test]
    fn test_residual_and_single_naming() {
        let (axes, ell, mask) = setup();
        let geoid = Array2::from_elem((2, 2), 10.0);

        let mut assembler = CorrectionAssembler::new(
            CorrectionMode::Residual,
            vec![SourceKind::Topographic],
            &axes,
            &ell,
            &mask,
        );
        assembler
            .add_potential(SourceKind::Topographic, &Array2::zeros((2, 2)), 0)
            .unwrap();
        let result = assembler.finish(&geoid, Duration::ZERO).unwrap();
        assert!(result.corrected_geoid.is_none());
        assert_eq!(result.residual_geoid.as_ref().unwrap()[[0, 0]], 10.0);
        assert_eq!(result.output_geoid(), result.residual_geoid.as_ref().unwrap());
        assert!(result.grid("correction").is_none());

        let mut assembler = CorrectionAssembler::new(
            CorrectionMode::Sedimentary,
            vec![SourceKind::Sedimentary],
            &axes,
            &ell,
            &mask,
        );
        assembler
            .add_input(SourceKind::Sedimentary, Array2::from_elem((2, 2), 3000.0))
            .unwrap();
        assembler
            .add_potential(SourceKind::Sedimentary, &Array2::from_elem((2, 2), 1.0), 4)
            .unwrap();
        let result = assembler.finish(&geoid, Duration::ZERO).unwrap();
        assert_eq!(result.grid("correction"), result.grid("sedimentary_correction"));
        assert_eq!(result.grid("total_correction"), result.grid("sedimentary_correction"));
        assert_eq!(result.grid("sedimentary_thickness").unwrap()[[0, 0]], 3000.0);
        assert_eq!(result.output_geoid(), result.corrected_geoid.as_ref().unwrap());

        let names: Vec<_> = result.named_grids().iter().map(|(n, _)| *n).collect();
        assert_eq!(
            names,
            vec![
                "original_geoid",
                "sedimentary_thickness",
                "sedimentary_correction",
                "correction",
                "total_correction",
                "corrected_geoid"
            ]
        );
    }

    #[test]
    fn test_input_layer_shape_checked() {
        let (axes, ell, mask) = setup();
        let mut assembler = CorrectionAssembler::new(
            CorrectionMode::Topographic,
            vec![SourceKind::Topographic],
            &axes,
            &ell,
            &mask,
        );
        let err = assembler
            .add_input(SourceKind::Topographic, Array2::zeros((3, 2)))
            .unwrap_err();
        assert!(matches!(err, GeoidError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_missing_family_rejected() {
        let (axes, ell, mask) = setup();
        let assembler = CorrectionAssembler::new(
            CorrectionMode::Crustal,
            vec![SourceKind::Crustal],
            &axes,
            &ell,
            &mask,
        );
        assert!(assembler.finish(&Array2::zeros((2, 2)), Duration::ZERO).is_err());
    }
}
