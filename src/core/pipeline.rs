use crate::config::CorrectionConfig;
use crate::core::aggregator::{to_grid, AggregationControl, ObservationSet, PotentialAggregator};
use crate::core::assembler::{CorrectionAssembler, CorrectionResult};
use crate::core::ellipsoid::Ellipsoid;
use crate::core::sources::{thickness_in_meters, SourceBuilder, CRUST_KM_THRESHOLD, SEDIMENT_KM_THRESHOLD};
use crate::types::{CorrectionMode, GeoidError, GeoidGrids, GeoidResult, InputLayer, SourceKind};
use ndarray::Array2;
use std::borrow::Cow;
use std::fmt;
use std::time::Instant;

/// Stages a correction request moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionStage {
    Idle,
    BuildingSources(SourceKind),
    AggregatingPotential(SourceKind),
    Assembling,
    Done,
}

impl fmt::Display for CorrectionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrectionStage::Idle => write!(f, "idle"),
            CorrectionStage::BuildingSources(kind) => write!(f, "building {} sources", kind),
            CorrectionStage::AggregatingPotential(kind) => write!(f, "aggregating {} potential", kind),
            CorrectionStage::Assembling => write!(f, "assembling"),
            CorrectionStage::Done => write!(f, "done"),
        }
    }
}

/// Geoid correction engine.
///
/// Holds only configuration; every call to [`compute`](Self::compute) builds
/// its sources and buffers from scratch and never touches the caller's grids.
#[derive(Debug, Clone, Default)]
pub struct GeoidCorrector {
    config: CorrectionConfig,
    ellipsoid: Ellipsoid,
}

impl GeoidCorrector {
    pub fn new(config: CorrectionConfig) -> Self {
        Self {
            config,
            ellipsoid: Ellipsoid::wgs84(),
        }
    }

    /// Engine with default densities and parameters on WGS84
    pub fn standard() -> Self {
        Self::new(CorrectionConfig::default())
    }

    pub fn with_ellipsoid(mut self, ellipsoid: Ellipsoid) -> Self {
        self.ellipsoid = ellipsoid;
        self
    }

    pub fn config(&self) -> &CorrectionConfig {
        &self.config
    }

    pub fn ellipsoid(&self) -> &Ellipsoid {
        &self.ellipsoid
    }

    pub fn compute(&self, mode: CorrectionMode, grids: &GeoidGrids) -> GeoidResult<CorrectionResult> {
        self.compute_with(mode, grids, &AggregationControl::default())
    }

    /// Run one correction request with progress/cancellation hooks.
    ///
    /// All validation happens before any source is built. A failure at any
    /// later point (cancellation included) returns no result at all.
    pub fn compute_with(
        &self,
        mode: CorrectionMode,
        grids: &GeoidGrids,
        control: &AggregationControl<'_>,
    ) -> GeoidResult<CorrectionResult> {
        let start = Instant::now();
        let mut stage = CorrectionStage::Idle;
        log::debug!("Correction request: {} ({})", mode, stage);

        self.validate_request(mode, grids)?;

        let axes = &grids.axes;
        let shape = axes.shape();
        let kinds = mode.source_kinds(grids);
        log::info!(
            "Computing {} correction on a {}x{} grid ({}° spacing), sources: {:?}",
            mode,
            shape.0,
            shape.1,
            axes.dx_deg,
            kinds
        );

        let observations = ObservationSet::from_grid(axes, &self.ellipsoid, &grids.geoid, grids.elevation.as_ref())?;
        let builder = SourceBuilder::new(axes, &self.ellipsoid, &grids.geoid, grids.elevation.as_ref());
        let mut assembler = CorrectionAssembler::new(
            mode,
            kinds.clone(),
            axes,
            &self.ellipsoid,
            observations.valid_mask(),
        );

        for kind in kinds {
            stage = CorrectionStage::BuildingSources(kind);
            log::info!("Stage: {}", stage);
            let layer = self.source_layer(mode, kind, grids)?;
            let sources = builder.build(kind, &layer, &self.config)?;
            assembler.add_input(kind, layer.into_owned())?;

            stage = CorrectionStage::AggregatingPotential(kind);
            log::info!("Stage: {}", stage);
            let kind_start = Instant::now();
            let aggregator = PotentialAggregator::from_params(self.config.params(kind));
            let potentials = aggregator.aggregate_with(&observations, &sources, control)?;
            log::info!(
                "{} potential from {} sources in {:.2?}",
                kind,
                sources.len(),
                kind_start.elapsed()
            );

            assembler.add_potential(kind, &to_grid(potentials, shape)?, sources.len())?;
        }

        stage = CorrectionStage::Assembling;
        log::info!("Stage: {}", stage);
        let result = assembler.finish(&grids.geoid, start.elapsed())?;

        stage = CorrectionStage::Done;
        log::info!("Stage: {} ({} correction in {:.2?})", stage, mode, result.elapsed);
        Ok(result)
    }

    /// Configuration and input checks, fatal before any computation
    fn validate_request(&self, mode: CorrectionMode, grids: &GeoidGrids) -> GeoidResult<()> {
        self.config.validate()?;
        grids.validate()?;

        for &layer in mode.required_layers() {
            if grids.layer(layer).is_none() {
                return Err(GeoidError::MissingInput { mode, layer });
            }
        }
        Ok(())
    }

    /// Input grid driving one source family, in meters. Thickness layers are
    /// unit-converted into an engine-owned copy.
    fn source_layer<'g>(
        &self,
        mode: CorrectionMode,
        kind: SourceKind,
        grids: &'g GeoidGrids,
    ) -> GeoidResult<Cow<'g, Array2<f64>>> {
        let (layer, grid) = match kind {
            SourceKind::Topographic => (InputLayer::Elevation, grids.elevation.as_ref()),
            SourceKind::Crustal => (InputLayer::CrustalThickness, grids.crustal_thickness.as_ref()),
            SourceKind::Sedimentary => (InputLayer::SedimentThickness, grids.sediment_thickness.as_ref()),
        };
        let grid = grid.ok_or(GeoidError::MissingInput { mode, layer })?;

        Ok(match kind {
            SourceKind::Topographic => Cow::Borrowed(grid),
            SourceKind::Crustal => Cow::Owned(thickness_in_meters(
                grid,
                self.config.crust_units,
                CRUST_KM_THRESHOLD,
                "crustal thickness",
            )),
            SourceKind::Sedimentary => Cow::Owned(thickness_in_meters(
                grid,
                self.config.sediment_units,
                SEDIMENT_KM_THRESHOLD,
                "sediment thickness",
            )),
        })
    }
}

/// Convenience wrapper: one request with the given configuration on WGS84
pub fn compute_correction(
    mode: CorrectionMode,
    grids: &GeoidGrids,
    config: &CorrectionConfig,
) -> GeoidResult<CorrectionResult> {
    GeoidCorrector::new(config.clone()).compute(mode, grids)
}
