//! Core correction engine modules

pub mod ellipsoid;
pub mod sources;
pub mod tesseroid;
pub mod aggregator;
pub mod assembler;
pub mod statistics;
pub mod pipeline;

// Re-export main types
pub use ellipsoid::{Ellipsoid, ellipsoidal_radius, normal_gravity, GRAVITATIONAL_CONSTANT};
pub use sources::{SourceTesseroid, SourceBuilder, thickness_in_meters};
pub use tesseroid::{ObservationPoint, PreparedTesseroid, tesseroid_potential};
pub use aggregator::{ObservationSet, PotentialAggregator, AggregationControl, BatchProgress};
pub use assembler::{CorrectionAssembler, CorrectionResult, potential_to_geoid};
pub use statistics::GridStatistics;
pub use pipeline::{GeoidCorrector, CorrectionStage, compute_correction};
