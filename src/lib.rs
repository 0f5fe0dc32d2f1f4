//! tessgeoid: tesseroid forward modelling of geoid corrections
//!
//! Computes the geoid-height effect of known mass anomalies (topography and
//! bathymetry, Moho undulations relative to a reference crust, sediment
//! layers) with a second-order tesseroid approximation, and removes it from
//! a gridded geoid to give corrected or residual geoid surfaces.

pub mod types;
pub mod config;
pub mod core;
pub mod io;

// Re-export main types and functions for easier access
pub use types::{
    CorrectionMode, GeoidError, GeoidGrids, GeoidResult, GridAxes, InputLayer, SourceKind,
};
pub use config::{CorrectionConfig, SourceParams, ThicknessUnits};
pub use crate::core::{
    compute_correction, AggregationControl, BatchProgress, CorrectionResult, Ellipsoid,
    GeoidCorrector, GridStatistics,
};
pub use io::{GridReader, GridWriter};

#[cfg(feature = "python")]
mod python {
    use crate::{CorrectionConfig, CorrectionMode, GeoidCorrector, GeoidError, GeoidGrids, GridAxes};
    use numpy::{IntoPyArray, PyReadonlyArray1, PyReadonlyArray2};
    use pyo3::prelude::*;
    use pyo3::types::PyDict;

    fn value_error(e: impl std::fmt::Display) -> PyErr {
        PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("{}", e))
    }

    fn runtime_error(e: GeoidError) -> PyErr {
        PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", e))
    }

    /// Compute a geoid correction; returns a dict of numpy arrays keyed by grid name
    #[pyfunction]
    #[pyo3(signature = (
        mode,
        lons,
        lats,
        geoid,
        elevation = None,
        crustal_thickness = None,
        sediment_thickness = None,
        config_json = None
    ))]
    #[allow(clippy::too_many_arguments)]
    fn compute_correction<'py>(
        py: Python<'py>,
        mode: &str,
        lons: PyReadonlyArray1<f64>,
        lats: PyReadonlyArray1<f64>,
        geoid: PyReadonlyArray2<f64>,
        elevation: Option<PyReadonlyArray2<f64>>,
        crustal_thickness: Option<PyReadonlyArray2<f64>>,
        sediment_thickness: Option<PyReadonlyArray2<f64>>,
        config_json: Option<&str>,
    ) -> PyResult<&'py PyDict> {
        let mode: CorrectionMode = mode.parse().map_err(value_error)?;
        let axes = GridAxes::from_coordinates(lons.as_array().to_vec(), lats.as_array().to_vec())
            .map_err(value_error)?;

        let mut grids = GeoidGrids::new(axes, geoid.as_array().to_owned());
        grids.elevation = elevation.map(|a| a.as_array().to_owned());
        grids.crustal_thickness = crustal_thickness.map(|a| a.as_array().to_owned());
        grids.sediment_thickness = sediment_thickness.map(|a| a.as_array().to_owned());

        let config = match config_json {
            Some(json) => serde_json::from_str::<CorrectionConfig>(json).map_err(value_error)?,
            None => CorrectionConfig::default(),
        };

        let result = py
            .allow_threads(|| GeoidCorrector::new(config).compute(mode, &grids))
            .map_err(runtime_error)?;

        let dict = PyDict::new(py);
        dict.set_item("lons", result.axes.lons.clone().into_pyarray(py))?;
        dict.set_item("lats", result.axes.lats.clone().into_pyarray(py))?;
        for (name, grid) in result.named_grids() {
            dict.set_item(name, grid.clone().into_pyarray(py))?;
        }
        Ok(dict)
    }

    /// Python module definition
    #[pymodule]
    fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_function(wrap_pyfunction!(compute_correction, m)?)?;
        Ok(())
    }
}
