use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tolerance used when checking that coordinate spacing is uniform (degrees)
pub const SPACING_TOLERANCE_DEG: f64 = 1e-6;

/// Regular longitude/latitude lattice shared by every layer of a request.
///
/// Cell centres are stored in ascending order. Row index = latitude,
/// column index = longitude, so every layer has shape `(lats.len(), lons.len())`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridAxes {
    pub lons: Vec<f64>,  // degrees, ascending
    pub lats: Vec<f64>,  // degrees, ascending
    pub dx_deg: f64,     // uniform spacing in both axes
}

impl GridAxes {
    /// Build axes from bounds and spacing (both bounds inclusive)
    pub fn new(
        lon_min: f64,
        lon_max: f64,
        lat_min: f64,
        lat_max: f64,
        dx_deg: f64,
    ) -> GeoidResult<Self> {
        if !dx_deg.is_finite() || dx_deg <= 0.0 {
            return Err(GeoidError::InvalidGrid(format!(
                "grid spacing must be positive and finite, got {}",
                dx_deg
            )));
        }
        check_bounds("longitude", lon_min, lon_max)?;
        check_bounds("latitude", lat_min, lat_max)?;

        let lons = Self::axis_nodes(lon_min, lon_max, dx_deg);
        let lats = Self::axis_nodes(lat_min, lat_max, dx_deg);
        Self::from_coordinates(lons, lats)
    }

    /// Build axes from explicit cell-centre coordinates
    pub fn from_coordinates(lons: Vec<f64>, lats: Vec<f64>) -> GeoidResult<Self> {
        let dx_lon = uniform_spacing("longitude", &lons)?;
        let dx_lat = uniform_spacing("latitude", &lats)?;

        if (dx_lon - dx_lat).abs() > SPACING_TOLERANCE_DEG {
            return Err(GeoidError::InvalidGrid(format!(
                "longitude spacing {} differs from latitude spacing {}",
                dx_lon, dx_lat
            )));
        }

        let lat_lo = lats[0];
        let lat_hi = lats[lats.len() - 1];
        if lat_lo < -90.0 || lat_hi > 90.0 {
            return Err(GeoidError::InvalidGrid(format!(
                "latitudes must lie within [-90, 90], got [{}, {}]",
                lat_lo, lat_hi
            )));
        }

        Ok(Self { lons, lats, dx_deg: dx_lon })
    }

    /// Grid shape as (rows, cols) = (n_lat, n_lon)
    pub fn shape(&self) -> (usize, usize) {
        (self.lats.len(), self.lons.len())
    }

    /// Total number of cells
    pub fn len(&self) -> usize {
        self.lats.len() * self.lons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn axis_nodes(min: f64, max: f64, dx: f64) -> Vec<f64> {
        let n = ((max - min) / dx + SPACING_TOLERANCE_DEG).floor() as usize + 1;
        (0..n).map(|i| min + i as f64 * dx).collect()
    }
}

fn check_bounds(axis: &str, min: f64, max: f64) -> GeoidResult<()> {
    if !min.is_finite() || !max.is_finite() || min >= max {
        return Err(GeoidError::InvalidGrid(format!(
            "degenerate {} bounds: min {} must be below max {}",
            axis, min, max
        )));
    }
    Ok(())
}

fn uniform_spacing(axis: &str, nodes: &[f64]) -> GeoidResult<f64> {
    if nodes.len() < 2 {
        return Err(GeoidError::InvalidGrid(format!(
            "{} axis needs at least two nodes, got {}",
            axis,
            nodes.len()
        )));
    }
    check_bounds(axis, nodes[0], nodes[nodes.len() - 1])?;

    let dx = nodes[1] - nodes[0];
    if !dx.is_finite() || dx <= 0.0 {
        return Err(GeoidError::InvalidGrid(format!(
            "{} nodes must be strictly ascending",
            axis
        )));
    }
    for pair in nodes.windows(2) {
        let step = pair[1] - pair[0];
        if (step - dx).abs() > SPACING_TOLERANCE_DEG {
            return Err(GeoidError::InvalidGrid(format!(
                "non-uniform {} spacing: {} vs {}",
                axis, step, dx
            )));
        }
    }
    Ok(dx)
}

/// Co-registered input layers for one correction request.
///
/// All layers are in meters (thickness layers may arrive in kilometres, see
/// [`crate::config::ThicknessUnits`]) and use NaN for missing cells.
#[derive(Debug, Clone)]
pub struct GeoidGrids {
    pub axes: GridAxes,
    pub geoid: Array2<f64>,
    pub elevation: Option<Array2<f64>>,
    pub crustal_thickness: Option<Array2<f64>>,
    pub sediment_thickness: Option<Array2<f64>>,
}

impl GeoidGrids {
    /// Create a request holding only the geoid layer
    pub fn new(axes: GridAxes, geoid: Array2<f64>) -> Self {
        Self {
            axes,
            geoid,
            elevation: None,
            crustal_thickness: None,
            sediment_thickness: None,
        }
    }

    pub fn with_elevation(mut self, elevation: Array2<f64>) -> Self {
        self.elevation = Some(elevation);
        self
    }

    pub fn with_crustal_thickness(mut self, thickness: Array2<f64>) -> Self {
        self.crustal_thickness = Some(thickness);
        self
    }

    pub fn with_sediment_thickness(mut self, thickness: Array2<f64>) -> Self {
        self.sediment_thickness = Some(thickness);
        self
    }

    /// Look up a layer by its canonical name
    pub fn layer(&self, layer: InputLayer) -> Option<&Array2<f64>> {
        match layer {
            InputLayer::Geoid => Some(&self.geoid),
            InputLayer::Elevation => self.elevation.as_ref(),
            InputLayer::CrustalThickness => self.crustal_thickness.as_ref(),
            InputLayer::SedimentThickness => self.sediment_thickness.as_ref(),
        }
    }

    /// Check that every supplied layer matches the axes
    pub fn validate(&self) -> GeoidResult<()> {
        let expected = self.axes.shape();
        for layer in InputLayer::ALL {
            if let Some(grid) = self.layer(layer) {
                if grid.dim() != expected {
                    return Err(GeoidError::ShapeMismatch {
                        layer: layer.name().to_string(),
                        expected,
                        got: grid.dim(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Input layer identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputLayer {
    Geoid,
    Elevation,
    CrustalThickness,
    SedimentThickness,
}

impl InputLayer {
    pub const ALL: [InputLayer; 4] = [
        InputLayer::Geoid,
        InputLayer::Elevation,
        InputLayer::CrustalThickness,
        InputLayer::SedimentThickness,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            InputLayer::Geoid => "geoid",
            InputLayer::Elevation => "elevation",
            InputLayer::CrustalThickness => "crustal_thickness",
            InputLayer::SedimentThickness => "sediment_thickness",
        }
    }
}

impl fmt::Display for InputLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Mass anomaly class that produces one family of source tesseroids
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    Topographic,
    Crustal,
    Sedimentary,
}

impl SourceKind {
    /// Name of the per-type correction grid in a result
    pub fn correction_name(&self) -> &'static str {
        match self {
            SourceKind::Topographic => "topographic_correction",
            SourceKind::Crustal => "crustal_correction",
            SourceKind::Sedimentary => "sedimentary_correction",
        }
    }

    /// Name of the meter-converted input layer in a result
    pub fn input_name(&self) -> &'static str {
        match self {
            SourceKind::Topographic => "topography",
            SourceKind::Crustal => "crustal_thickness",
            SourceKind::Sedimentary => "sedimentary_thickness",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Topographic => write!(f, "topographic"),
            SourceKind::Crustal => write!(f, "crustal"),
            SourceKind::Sedimentary => write!(f, "sedimentary"),
        }
    }
}

/// Requested correction, resolved once at request entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CorrectionMode {
    Topographic,
    Crustal,
    Sedimentary,
    /// Sum of topographic + crustal (+ sedimentary when supplied)
    Combined,
    /// Same arithmetic as `Combined`, labelled as a residual geoid
    Residual,
}

impl CorrectionMode {
    pub const ALL: [CorrectionMode; 5] = [
        CorrectionMode::Topographic,
        CorrectionMode::Crustal,
        CorrectionMode::Sedimentary,
        CorrectionMode::Combined,
        CorrectionMode::Residual,
    ];

    /// Layers that must be present for this mode
    pub fn required_layers(&self) -> &'static [InputLayer] {
        match self {
            CorrectionMode::Topographic => &[InputLayer::Geoid, InputLayer::Elevation],
            CorrectionMode::Crustal => &[InputLayer::Geoid, InputLayer::CrustalThickness],
            CorrectionMode::Sedimentary => &[InputLayer::Geoid, InputLayer::SedimentThickness],
            CorrectionMode::Combined | CorrectionMode::Residual => &[
                InputLayer::Geoid,
                InputLayer::Elevation,
                InputLayer::CrustalThickness,
            ],
        }
    }

    /// Source families to compute, in evaluation order
    pub fn source_kinds(&self, grids: &GeoidGrids) -> Vec<SourceKind> {
        match self {
            CorrectionMode::Topographic => vec![SourceKind::Topographic],
            CorrectionMode::Crustal => vec![SourceKind::Crustal],
            CorrectionMode::Sedimentary => vec![SourceKind::Sedimentary],
            CorrectionMode::Combined | CorrectionMode::Residual => {
                let mut kinds = vec![SourceKind::Topographic, SourceKind::Crustal];
                if grids.sediment_thickness.is_some() {
                    kinds.push(SourceKind::Sedimentary);
                }
                kinds
            }
        }
    }

    /// Whether the mode reports a single per-type correction
    pub fn is_single(&self) -> bool {
        matches!(
            self,
            CorrectionMode::Topographic | CorrectionMode::Crustal | CorrectionMode::Sedimentary
        )
    }
}

impl fmt::Display for CorrectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrectionMode::Topographic => write!(f, "topographic"),
            CorrectionMode::Crustal => write!(f, "crustal"),
            CorrectionMode::Sedimentary => write!(f, "sedimentary"),
            CorrectionMode::Combined => write!(f, "combined"),
            CorrectionMode::Residual => write!(f, "residual"),
        }
    }
}

impl FromStr for CorrectionMode {
    type Err = GeoidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "topographic" | "topo" => Ok(CorrectionMode::Topographic),
            "crustal" | "crust" => Ok(CorrectionMode::Crustal),
            "sedimentary" | "sediment" => Ok(CorrectionMode::Sedimentary),
            "combined" => Ok(CorrectionMode::Combined),
            "residual" => Ok(CorrectionMode::Residual),
            other => Err(GeoidError::Config(format!(
                "unknown correction mode '{}'; expected one of topographic, crustal, \
                 sedimentary, combined, residual",
                other
            ))),
        }
    }
}

/// Error types for geoid correction
#[derive(Debug, thiserror::Error)]
pub enum GeoidError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Invalid grid: {0}")]
    InvalidGrid(String),

    #[error("Shape mismatch for {layer}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        layer: String,
        expected: (usize, usize),
        got: (usize, usize),
    },

    #[error("{mode} correction requires the {layer} layer")]
    MissingInput {
        mode: CorrectionMode,
        layer: InputLayer,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Computation cancelled after {completed} of {total} observations")]
    Cancelled { completed: usize, total: usize },

    #[cfg(feature = "geotiff")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

/// Result type for geoid correction operations
pub type GeoidResult<T> = Result<T, GeoidError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axes_from_bounds() {
        let axes = GridAxes::new(10.0, 12.0, -1.0, 0.0, 0.5).unwrap();
        assert_eq!(axes.lons, vec![10.0, 10.5, 11.0, 11.5, 12.0]);
        assert_eq!(axes.lats, vec![-1.0, -0.5, 0.0]);
        assert_eq!(axes.shape(), (3, 5));
        assert_eq!(axes.len(), 15);
    }

    #[test]
    fn test_degenerate_bounds_rejected() {
        assert!(matches!(
            GridAxes::new(5.0, 5.0, 0.0, 1.0, 0.1),
            Err(GeoidError::InvalidGrid(_))
        ));
        assert!(matches!(
            GridAxes::new(0.0, 1.0, 2.0, 1.0, 0.1),
            Err(GeoidError::InvalidGrid(_))
        ));
        assert!(GridAxes::new(0.0, 1.0, 0.0, 1.0, 0.0).is_err());
    }

    #[test]
    fn test_irregular_coordinates_rejected() {
        let lons = vec![0.0, 1.0, 2.5];
        let lats = vec![0.0, 1.0];
        assert!(GridAxes::from_coordinates(lons, lats).is_err());

        // Different spacing per axis
        assert!(GridAxes::from_coordinates(vec![0.0, 1.0], vec![0.0, 0.5]).is_err());

        // Out of latitude range
        assert!(GridAxes::from_coordinates(vec![0.0, 1.0], vec![90.0, 91.0]).is_err());
    }

    #[test]
    fn test_shape_validation() {
        let axes = GridAxes::new(0.0, 1.0, 0.0, 1.0, 0.5).unwrap();
        let grids = GeoidGrids::new(axes, Array2::zeros((3, 3)))
            .with_elevation(Array2::zeros((3, 2)));

        match grids.validate() {
            Err(GeoidError::ShapeMismatch { layer, expected, got }) => {
                assert_eq!(layer, "elevation");
                assert_eq!(expected, (3, 3));
                assert_eq!(got, (3, 2));
            }
            other => panic!("expected shape mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_mode_source_kinds() {
        let axes = GridAxes::new(0.0, 1.0, 0.0, 1.0, 0.5).unwrap();
        let grids = GeoidGrids::new(axes, Array2::zeros((3, 3)));
        assert_eq!(
            CorrectionMode::Combined.source_kinds(&grids),
            vec![SourceKind::Topographic, SourceKind::Crustal]
        );

        let grids = grids.with_sediment_thickness(Array2::zeros((3, 3)));
        assert_eq!(CorrectionMode::Residual.source_kinds(&grids).len(), 3);
        assert_eq!(
            CorrectionMode::Sedimentary.source_kinds(&grids),
            vec![SourceKind::Sedimentary]
        );
    }

    #[test]
    fn test_mode_parsing() {
        for mode in CorrectionMode::ALL {
            let parsed: CorrectionMode = mode.to_string().parse().unwrap();
            assert_eq!(parsed, mode);
        }
        assert_eq!("Topo".parse::<CorrectionMode>().unwrap(), CorrectionMode::Topographic);
        assert!("bouguer".parse::<CorrectionMode>().is_err());
    }

    #[test]
    fn test_error_display() {
        let e = GeoidError::MissingInput {
            mode: CorrectionMode::Crustal,
            layer: InputLayer::CrustalThickness,
        };
        assert_eq!(e.to_string(), "crustal correction requires the crustal_thickness layer");
    }
}
