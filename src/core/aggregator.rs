use crate::config::SourceParams;
use crate::core::ellipsoid::Ellipsoid;
use crate::core::sources::SourceTesseroid;
use crate::core::tesseroid::{ObservationPoint, PreparedTesseroid};
use crate::types::{GeoidError, GeoidResult, GridAxes};
use ndarray::Array2;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Flattened (row-major) observation geometry for one grid.
///
/// Invalid observations carry a NaN radius and are never evaluated.
#[derive(Debug, Clone)]
pub struct ObservationSet {
    sin_lat: Vec<f64>,
    cos_lat: Vec<f64>,
    lon: Vec<f64>, // radians
    radius: Vec<f64>,
    valid: Array2<bool>,
}

impl ObservationSet {
    /// Observation points at the physical surface of every grid cell.
    ///
    /// radius = ellipsoidal radius + elevation + geoid height. A cell is valid
    /// when its geoid height is finite and, if an elevation layer is given,
    /// its elevation is finite too.
    pub fn from_grid(
        axes: &GridAxes,
        ellipsoid: &Ellipsoid,
        geoid: &Array2<f64>,
        elevation: Option<&Array2<f64>>,
    ) -> GeoidResult<Self> {
        let shape = axes.shape();
        if geoid.dim() != shape {
            return Err(GeoidError::ShapeMismatch {
                layer: "geoid".to_string(),
                expected: shape,
                got: geoid.dim(),
            });
        }
        if let Some(elev) = elevation {
            if elev.dim() != shape {
                return Err(GeoidError::ShapeMismatch {
                    layer: "elevation".to_string(),
                    expected: shape,
                    got: elev.dim(),
                });
            }
        }

        let (n_lat, n_lon) = shape;
        let n = n_lat * n_lon;
        let row_radii = ellipsoid.radii_deg(&axes.lats);

        let mut sin_lat = Vec::with_capacity(n);
        let mut cos_lat = Vec::with_capacity(n);
        let mut lon = Vec::with_capacity(n);
        let mut radius = Vec::with_capacity(n);
        let mut valid = Array2::from_elem(shape, false);

        for i in 0..n_lat {
            let lat_rad = axes.lats[i].to_radians();
            let (s, c) = lat_rad.sin_cos();
            for j in 0..n_lon {
                let n_val = geoid[[i, j]];
                let h_val = elevation.map_or(0.0, |e| e[[i, j]]);
                let ok = n_val.is_finite() && h_val.is_finite();

                sin_lat.push(s);
                cos_lat.push(c);
                lon.push(axes.lons[j].to_radians());
                radius.push(if ok { row_radii[i] + h_val + n_val } else { f64::NAN });
                valid[[i, j]] = ok;
            }
        }

        let n_valid = valid.iter().filter(|v| **v).count();
        log::debug!("Observation set: {} cells, {} valid", n, n_valid);
        if n_valid == 0 {
            log::warn!("No valid observation cells; every output cell will be missing");
        }

        Ok(Self {
            sin_lat,
            cos_lat,
            lon,
            radius,
            valid,
        })
    }

    /// Scattered observation points, laid out as a single row
    pub fn from_points(points: &[ObservationPoint]) -> Self {
        let n = points.len();
        let mut valid = Array2::from_elem((1, n), false);
        for (k, p) in points.iter().enumerate() {
            valid[[0, k]] = p.radius.is_finite();
        }

        Self {
            sin_lat: points.iter().map(|p| p.lat.sin()).collect(),
            cos_lat: points.iter().map(|p| p.lat.cos()).collect(),
            lon: points.iter().map(|p| p.lon).collect(),
            radius: points
                .iter()
                .map(|p| if p.radius.is_finite() { p.radius } else { f64::NAN })
                .collect(),
            valid,
        }
    }

    pub fn len(&self) -> usize {
        self.radius.len()
    }

    pub fn is_empty(&self) -> bool {
        self.radius.is_empty()
    }

    /// Validity mask in grid shape
    pub fn valid_mask(&self) -> &Array2<bool> {
        &self.valid
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|v| **v).count()
    }

    /// Observation radius at a flat index (NaN when invalid)
    pub fn radius(&self, idx: usize) -> f64 {
        self.radius[idx]
    }
}

/// Progress report emitted after each completed batch
#[derive(Debug, Clone, Copy)]
pub struct BatchProgress {
    pub batch: usize,
    pub n_batches: usize,
    pub completed: usize,
    pub total: usize,
    pub elapsed: Duration,
}

impl BatchProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

/// Optional hooks for a long aggregation: progress and cooperative
/// cancellation, both handled only at batch boundaries
#[derive(Default, Clone, Copy)]
pub struct AggregationControl<'a> {
    pub progress: Option<&'a (dyn Fn(BatchProgress) + Sync)>,
    pub cancel: Option<&'a AtomicBool>,
}

impl<'a> AggregationControl<'a> {
    pub fn with_progress(mut self, progress: &'a (dyn Fn(BatchProgress) + Sync)) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancel(mut self, cancel: &'a AtomicBool) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.map_or(false, |flag| flag.load(Ordering::Relaxed))
    }
}

/// Sums in-cutoff tesseroid contributions at every observation point
#[derive(Debug, Clone, Copy)]
pub struct PotentialAggregator {
    cutoff_deg: f64,
    cos_cutoff: f64,
    batch_size: usize,
}

impl PotentialAggregator {
    pub fn new(cutoff_deg: f64, batch_size: usize) -> Self {
        Self {
            cutoff_deg,
            cos_cutoff: cutoff_deg.to_radians().cos(),
            batch_size: batch_size.max(1),
        }
    }

    pub fn from_params(params: &SourceParams) -> Self {
        Self::new(params.cutoff_deg, params.batch_size)
    }

    pub fn cutoff_deg(&self) -> f64 {
        self.cutoff_deg
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Potential (m²/s²) at every observation; NaN where the observation is invalid
    pub fn aggregate(&self, observations: &ObservationSet, sources: &[SourceTesseroid]) -> Vec<f64> {
        let prepared = prepare_sources(sources);
        let total = observations.len();
        let mut potentials = vec![f64::NAN; total];

        for (b, chunk) in potentials.chunks_mut(self.batch_size).enumerate() {
            self.aggregate_batch(observations, &prepared, b * self.batch_size, chunk);
        }
        potentials
    }

    /// Same as [`aggregate`](Self::aggregate) with progress reporting and
    /// cancellation between batches. A cancelled run returns no partial output.
    pub fn aggregate_with(
        &self,
        observations: &ObservationSet,
        sources: &[SourceTesseroid],
        control: &AggregationControl<'_>,
    ) -> GeoidResult<Vec<f64>> {
        let prepared = prepare_sources(sources);
        let total = observations.len();
        let n_batches = (total + self.batch_size - 1) / self.batch_size;
        let report_every = (n_batches / 10).max(1);
        let mut potentials = vec![f64::NAN; total];

        log::debug!(
            "Aggregating {} sources over {} observations in {} batches (cutoff {}°)",
            prepared.len(),
            total,
            n_batches,
            self.cutoff_deg
        );

        let start_time = Instant::now();
        for (b, chunk) in potentials.chunks_mut(self.batch_size).enumerate() {
            let start = b * self.batch_size;
            if control.is_cancelled() {
                log::warn!("Aggregation cancelled at batch {}/{}", b, n_batches);
                return Err(GeoidError::Cancelled { completed: start, total });
            }

            self.aggregate_batch(observations, &prepared, start, chunk);

            let progress = BatchProgress {
                batch: b + 1,
                n_batches,
                completed: start + chunk.len(),
                total,
                elapsed: start_time.elapsed(),
            };
            if let Some(callback) = control.progress {
                callback(progress);
            }
            if (b + 1) % report_every == 0 || b + 1 == n_batches {
                log::info!("Potential aggregation progress: {:.1}%", progress.fraction() * 100.0);
            }
        }

        Ok(potentials)
    }

    /// Single-threaded reference path; results are identical to the parallel one
    pub fn aggregate_sequential(
        &self,
        observations: &ObservationSet,
        sources: &[SourceTesseroid],
    ) -> Vec<f64> {
        let prepared = prepare_sources(sources);
        (0..observations.len())
            .map(|idx| self.potential_at(observations, idx, &prepared))
            .collect()
    }

    /// Evaluate one contiguous batch of observations starting at `start`
    #[cfg(feature = "parallel")]
    fn aggregate_batch(
        &self,
        observations: &ObservationSet,
        sources: &[PreparedTesseroid],
        start: usize,
        out: &mut [f64],
    ) {
        use rayon::prelude::*;

        out.par_iter_mut().enumerate().for_each(|(k, slot)| {
            *slot = self.potential_at(observations, start + k, sources);
        });
    }

    #[cfg(not(feature = "parallel"))]
    fn aggregate_batch(
        &self,
        observations: &ObservationSet,
        sources: &[PreparedTesseroid],
        start: usize,
        out: &mut [f64],
    ) {
        for (k, slot) in out.iter_mut().enumerate() {
            *slot = self.potential_at(observations, start + k, sources);
        }
    }

    #[inline]
    fn potential_at(&self, observations: &ObservationSet, idx: usize, sources: &[PreparedTesseroid]) -> f64 {
        let r_obs = observations.radius[idx];
        if r_obs.is_nan() {
            return f64::NAN;
        }

        let sin_lat = observations.sin_lat[idx];
        let cos_lat = observations.cos_lat[idx];
        let lon = observations.lon[idx];

        let mut sum = 0.0;
        for src in sources {
            if !src.is_valid() {
                continue;
            }
            let cos_psi = src.cos_psi(sin_lat, cos_lat, lon);
            if cos_psi < self.cos_cutoff {
                continue;
            }
            sum += src.potential(cos_psi, r_obs);
        }
        sum
    }
}

fn prepare_sources(sources: &[SourceTesseroid]) -> Vec<PreparedTesseroid> {
    sources.iter().map(PreparedTesseroid::new).collect()
}

/// Reshape a flat potential vector back onto the grid
pub fn to_grid(potentials: Vec<f64>, shape: (usize, usize)) -> GeoidResult<Array2<f64>> {
    Array2::from_shape_vec(shape, potentials)
        .map_err(|e| GeoidError::InvalidGrid(format!("Failed to reshape potential grid: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tesseroid::tesseroid_potential;
    use approx::assert_relative_eq;
    use std::sync::atomic::AtomicUsize;

    const R: f64 = 6_371_000.0;

    fn points() -> Vec<ObservationPoint> {
        vec![
            ObservationPoint::from_degrees(0.0, 0.0, R + 100.0),
            ObservationPoint::from_degrees(0.5, 0.5, R + 50.0),
            ObservationPoint::from_degrees(0.0, 0.0, f64::NAN),
            ObservationPoint::from_degrees(20.0, 20.0, R),
        ]
    }

    fn sources() -> Vec<SourceTesseroid> {
        vec![
            SourceTesseroid::new(0.2, 0.1, R - 2000.0, R, 2670.0, 0.1, 0.1),
            SourceTesseroid::new(0.4, 0.6, R - 500.0, R, -200.0, 0.1, 0.1),
        ]
    }

    #[test]
    fn test_sum_of_contributions() {
        let pts = points();
        let obs = ObservationSet::from_points(&pts);
        let srcs = sources();
        let result = PotentialAggregator::new(5.0, 2).aggregate(&obs, &srcs);

        let expected: f64 = srcs.iter().map(|s| tesseroid_potential(&pts[0], s)).sum();
        assert_relative_eq!(result[0], expected, max_relative = 1e-12);
        assert!(result[2].is_nan());
        // Both sources are beyond 5° from the last point
        assert_eq!(result[3], 0.0);
    }

    #[test]
    fn test_cutoff_excludes_far_sources() {
        let pts = vec![ObservationPoint::from_degrees(0.0, 0.0, R)];
        let obs = ObservationSet::from_points(&pts);
        let near = SourceTesseroid::new(0.5, 0.0, R - 1000.0, R, 2670.0, 0.1, 0.1);
        let far = |rho| SourceTesseroid::new(8.0, 0.0, R - 1000.0, R, rho, 0.1, 0.1);

        let agg = PotentialAggregator::new(4.0, 10);
        let a = agg.aggregate(&obs, &[near, far(2670.0)]);
        let b = agg.aggregate(&obs, &[near, far(-1.0e9)]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_source_radii_skipped() {
        let pts = vec![ObservationPoint::from_degrees(0.0, 0.0, R)];
        let obs = ObservationSet::from_points(&pts);
        let mut bad = sources()[0];
        bad.r1 = f64::NAN;
        let result = PotentialAggregator::new(5.0, 1).aggregate(&obs, &[bad]);
        assert_eq!(result[0], 0.0);
    }

    #[test]
    fn test_from_params() {
        let agg = PotentialAggregator::from_params(&SourceParams::new(0.01, 7.5, 250));
        assert_eq!(agg.cutoff_deg(), 7.5);
        assert_eq!(agg.batch_size(), 250);
        assert_eq!(PotentialAggregator::new(7.5, 0).batch_size(), 1);
    }

    #[test]
    fn test_batching_does_not_change_results() {
        let pts: Vec<ObservationPoint> = (0..23)
            .map(|k| ObservationPoint::from_degrees(k as f64 * 0.05, 0.3, R + k as f64))
            .collect();
        let obs = ObservationSet::from_points(&pts);
        let srcs = sources();

        let reference = PotentialAggregator::new(3.0, 23).aggregate_sequential(&obs, &srcs);
        for batch in [1, 4, 7, 23, 100] {
            let result = PotentialAggregator::new(3.0, batch).aggregate(&obs, &srcs);
            assert_eq!(result, reference, "batch size {}", batch);
        }
    }

    #[test]
    fn test_progress_and_cancellation() {
        let obs = ObservationSet::from_points(&points());
        let srcs = sources();
        let agg = PotentialAggregator::new(5.0, 1);

        let calls = AtomicUsize::new(0);
        let progress = |p: BatchProgress| {
            calls.fetch_add(1, Ordering::Relaxed);
            assert!(p.completed <= p.total);
        };
        let control = AggregationControl::default().with_progress(&progress);
        let result = agg.aggregate_with(&obs, &srcs, &control).unwrap();
        assert_eq!(result.len(), 4);
        assert_eq!(calls.load(Ordering::Relaxed), 4);

        let cancel = AtomicBool::new(true);
        let control = AggregationControl::default().with_cancel(&cancel);
        match agg.aggregate_with(&obs, &srcs, &control) {
            Err(GeoidError::Cancelled { completed, total }) => {
                assert_eq!(completed, 0);
                assert_eq!(total, 4);
            }
            other => panic!("expected cancellation, got {:?}", other.map(|v| v.len())),
        }
    }

    #[test]
    fn test_observation_set_from_grid() {
        let axes = GridAxes::new(0.0, 1.0, 0.0, 1.0, 1.0).unwrap();
        let ell = Ellipsoid::wgs84();
        let geoid = Array2::from_shape_vec((2, 2), vec![10.0, f64::NAN, 12.0, 13.0]).unwrap();
        let elevation = Array2::from_shape_vec((2, 2), vec![100.0, 0.0, f64::NAN, 50.0]).unwrap();

        let obs = ObservationSet::from_grid(&axes, &ell, &geoid, Some(&elevation)).unwrap();
        assert_eq!(obs.len(), 4);
        assert_eq!(obs.valid_count(), 2);
        assert!(obs.valid_mask()[[0, 0]]);
        assert!(!obs.valid_mask()[[0, 1]]);
        assert!(!obs.valid_mask()[[1, 0]]);
        assert_relative_eq!(obs.radius(0), ell.radius(0.0) + 110.0, max_relative = 1e-12);
        assert!(obs.radius(2).is_nan());

        let no_elev = ObservationSet::from_grid(&axes, &ell, &geoid, None).unwrap();
        assert_eq!(no_elev.valid_count(), 3);
    }
}
