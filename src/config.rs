//! Correction configuration: densities, reference crust, per-type source
//! parameters and thickness unit handling.

use crate::types::{GeoidError, GeoidResult, SourceKind};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// How thickness layers are expressed on input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThicknessUnits {
    /// Guess from the data range (small maxima are taken as kilometres)
    Auto,
    Meters,
    Kilometers,
}

impl Default for ThicknessUnits {
    fn default() -> Self {
        ThicknessUnits::Auto
    }
}

/// Per correction type source selection and execution parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceParams {
    /// Cells whose anomaly magnitude is below this value produce no source (m)
    pub min_anomaly: f64,
    /// Sources farther than this great-circle angle are ignored (degrees)
    pub cutoff_deg: f64,
    /// Observations per batch; execution strategy only
    pub batch_size: usize,
}

impl SourceParams {
    pub fn new(min_anomaly: f64, cutoff_deg: f64, batch_size: usize) -> Self {
        Self {
            min_anomaly,
            cutoff_deg,
            batch_size,
        }
    }

    fn validate(&self, kind: SourceKind) -> GeoidResult<()> {
        if !self.min_anomaly.is_finite() {
            return Err(GeoidError::Config(format!(
                "{} minimum anomaly must be finite, got {}",
                kind, self.min_anomaly
            )));
        }
        if !self.cutoff_deg.is_finite() || self.cutoff_deg <= 0.0 || self.cutoff_deg > 180.0 {
            return Err(GeoidError::Config(format!(
                "{} angular cutoff must lie in (0, 180] degrees, got {}",
                kind, self.cutoff_deg
            )));
        }
        if self.batch_size == 0 {
            return Err(GeoidError::Config(format!(
                "{} batch size must be at least 1",
                kind
            )));
        }
        Ok(())
    }
}

/// Full configuration of a correction request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    /// Topographic rock density (kg/m³)
    pub rock_density: f64,
    /// Sea water density, used for cells below the ellipsoid (kg/m³)
    pub water_density: f64,
    /// Crust density (kg/m³)
    pub crust_density: f64,
    /// Upper mantle density (kg/m³)
    pub mantle_density: f64,
    /// Sediment minus crust density contrast, usually negative (kg/m³)
    pub sediment_density_contrast: f64,
    /// Reference crustal thickness (km)
    pub reference_crust_thickness_km: f64,

    pub topographic: SourceParams,
    pub crustal: SourceParams,
    pub sedimentary: SourceParams,

    pub crust_units: ThicknessUnits,
    pub sediment_units: ThicknessUnits,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            rock_density: 2670.0,
            water_density: 1030.0,
            crust_density: 3000.0,
            mantle_density: 3300.0,
            sediment_density_contrast: -200.0,
            reference_crust_thickness_km: 43.0,
            topographic: SourceParams::new(0.01, 12.0, 5000),
            crustal: SourceParams::new(1000.0, 4.0, 5000),
            sedimentary: SourceParams::new(0.5, 12.0, 4000),
            crust_units: ThicknessUnits::Auto,
            sediment_units: ThicknessUnits::Auto,
        }
    }
}

impl CorrectionConfig {
    /// Parameters for one source family
    pub fn params(&self, kind: SourceKind) -> &SourceParams {
        match kind {
            SourceKind::Topographic => &self.topographic,
            SourceKind::Crustal => &self.crustal,
            SourceKind::Sedimentary => &self.sedimentary,
        }
    }

    pub fn params_mut(&mut self, kind: SourceKind) -> &mut SourceParams {
        match kind {
            SourceKind::Topographic => &mut self.topographic,
            SourceKind::Crustal => &mut self.crustal,
            SourceKind::Sedimentary => &mut self.sedimentary,
        }
    }

    /// Reference crustal thickness in meters
    pub fn reference_crust_thickness_m(&self) -> f64 {
        self.reference_crust_thickness_km * 1000.0
    }

    /// Mantle minus crust density contrast (kg/m³)
    pub fn moho_density_contrast(&self) -> f64 {
        self.mantle_density - self.crust_density
    }

    /// Reject non-physical or unusable values
    pub fn validate(&self) -> GeoidResult<()> {
        let densities = [
            ("rock density", self.rock_density),
            ("water density", self.water_density),
            ("crust density", self.crust_density),
            ("mantle density", self.mantle_density),
            ("sediment density contrast", self.sediment_density_contrast),
        ];
        for (name, value) in densities {
            if !value.is_finite() {
                return Err(GeoidError::Config(format!("{} must be finite, got {}", name, value)));
            }
        }

        if !self.reference_crust_thickness_km.is_finite() || self.reference_crust_thickness_km <= 0.0 {
            return Err(GeoidError::Config(format!(
                "reference crustal thickness must be positive, got {} km",
                self.reference_crust_thickness_km
            )));
        }

        self.topographic.validate(SourceKind::Topographic)?;
        self.crustal.validate(SourceKind::Crustal)?;
        self.sedimentary.validate(SourceKind::Sedimentary)?;
        Ok(())
    }

    /// Load a configuration from a JSON file; missing fields take defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> GeoidResult<Self> {
        log::info!("Loading correction config: {}", path.as_ref().display());
        let reader = BufReader::new(File::open(path.as_ref())?);
        let config: CorrectionConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty-printed JSON
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> GeoidResult<()> {
        let writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CorrectionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reference_crust_thickness_m(), 43_000.0);
        assert_eq!(config.moho_density_contrast(), 300.0);
        assert_eq!(config.params(SourceKind::Sedimentary).batch_size, 4000);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = CorrectionConfig::default();
        config.crustal.batch_size = 0;
        assert!(matches!(config.validate(), Err(GeoidError::Config(_))));

        let mut config = CorrectionConfig::default();
        config.topographic.cutoff_deg = 0.0;
        assert!(config.validate().is_err());

        let mut config = CorrectionConfig::default();
        config.rock_density = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "rock_density": 2700.0, "crust_units": "kilometers" }"#;
        let config: CorrectionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.rock_density, 2700.0);
        assert_eq!(config.crust_units, ThicknessUnits::Kilometers);
        assert_eq!(config.water_density, 1030.0);
        assert_eq!(config.sedimentary.cutoff_deg, 12.0);
    }
}
