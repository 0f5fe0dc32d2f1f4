use crate::config::{CorrectionConfig, ThicknessUnits};
use crate::core::ellipsoid::Ellipsoid;
use crate::types::{GeoidError, GeoidResult, GridAxes, SourceKind};
use ndarray::Array2;

/// Crustal thickness maxima below this are taken as kilometres
pub const CRUST_KM_THRESHOLD: f64 = 100.0;

/// Sediment thickness maxima below this are taken as kilometres
pub const SEDIMENT_KM_THRESHOLD: f64 = 50.0;

/// Smallest radial separation accepted between Moho and reference Moho (m)
const MIN_MOHO_SEPARATION: f64 = 1e-6;

/// One spherical-prism mass element.
///
/// Invariant: `r1 <= r2`. Any sign lives in `density`, which may be a
/// density contrast rather than an absolute density.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceTesseroid {
    pub lat_deg: f64,  // centre latitude
    pub lon_deg: f64,  // centre longitude
    pub r1: f64,       // inner radius (m)
    pub r2: f64,       // outer radius (m)
    pub density: f64,  // kg/m³
    pub dlat_deg: f64, // latitudinal extent
    pub dlon_deg: f64, // longitudinal extent
}

impl SourceTesseroid {
    /// Create a source; the radii are reordered so that `r1 <= r2`
    pub fn new(
        lat_deg: f64,
        lon_deg: f64,
        r1: f64,
        r2: f64,
        density: f64,
        dlat_deg: f64,
        dlon_deg: f64,
    ) -> Self {
        Self {
            lat_deg,
            lon_deg,
            r1: r1.min(r2),
            r2: r1.max(r2),
            density,
            dlat_deg,
            dlon_deg,
        }
    }

    /// Radial thickness r2 − r1
    pub fn thickness(&self) -> f64 {
        self.r2 - self.r1
    }
}

/// Builds source tesseroids for one request.
///
/// Holds the surface geometry shared by every builder variant: the
/// ellipsoidal radius of each grid row and the geoid/elevation values with
/// missing cells replaced by zero.
pub struct SourceBuilder<'a> {
    axes: &'a GridAxes,
    row_radii: Vec<f64>,
    geoid: &'a Array2<f64>,
    elevation: Option<&'a Array2<f64>>,
}

impl<'a> SourceBuilder<'a> {
    pub fn new(
        axes: &'a GridAxes,
        ellipsoid: &Ellipsoid,
        geoid: &'a Array2<f64>,
        elevation: Option<&'a Array2<f64>>,
    ) -> Self {
        Self {
            axes,
            row_radii: ellipsoid.radii_deg(&axes.lats),
            geoid,
            elevation,
        }
    }

    /// Ellipsoidal radius of grid row `i`
    pub fn ellipsoid_radius(&self, i: usize) -> f64 {
        self.row_radii[i]
    }

    /// Geoid height at a cell, 0 where missing
    fn geoid_safe(&self, i: usize, j: usize) -> f64 {
        let n = self.geoid[[i, j]];
        if n.is_finite() { n } else { 0.0 }
    }

    /// Elevation at a cell, 0 where missing or when no elevation layer is supplied
    fn elevation_safe(&self, i: usize, j: usize) -> f64 {
        match self.elevation {
            Some(elev) if elev[[i, j]].is_finite() => elev[[i, j]],
            _ => 0.0,
        }
    }

    /// Radius of the physical surface: ellipsoid + elevation + geoid
    pub fn surface_radius(&self, i: usize, j: usize) -> f64 {
        self.row_radii[i] + self.elevation_safe(i, j) + self.geoid_safe(i, j)
    }

    fn source_at(&self, i: usize, j: usize, r_a: f64, r_b: f64, density: f64) -> SourceTesseroid {
        SourceTesseroid::new(
            self.axes.lats[i],
            self.axes.lons[j],
            r_a,
            r_b,
            density,
            self.axes.dx_deg,
            self.axes.dx_deg,
        )
    }

    /// Dispatch to the builder for `kind`; `layer` is the elevation grid for
    /// topography and the thickness grid (meters) otherwise
    pub fn build(
        &self,
        kind: SourceKind,
        layer: &Array2<f64>,
        config: &CorrectionConfig,
    ) -> GeoidResult<Vec<SourceTesseroid>> {
        if layer.dim() != self.axes.shape() {
            return Err(GeoidError::ShapeMismatch {
                layer: kind.to_string(),
                expected: self.axes.shape(),
                got: layer.dim(),
            });
        }

        let params = config.params(kind);
        let sources = match kind {
            SourceKind::Topographic => self.topographic(
                layer,
                params.min_anomaly,
                config.rock_density,
                config.water_density,
            ),
            SourceKind::Crustal => self.crustal(
                layer,
                config.reference_crust_thickness_m(),
                config.moho_density_contrast(),
                params.min_anomaly,
            ),
            SourceKind::Sedimentary => self.sedimentary(
                layer,
                config.sediment_density_contrast,
                params.min_anomaly,
            ),
        };

        log::info!("Built {} {} source tesseroids", sources.len(), kind);
        Ok(sources)
    }

    /// Topographic masses between the ellipsoid and the physical surface.
    ///
    /// Land cells (H >= 0) use the rock density, cells below the ellipsoid
    /// use the water density.
    pub fn topographic(
        &self,
        elevation: &Array2<f64>,
        min_height: f64,
        rock_density: f64,
        water_density: f64,
    ) -> Vec<SourceTesseroid> {
        let mut sources = Vec::new();

        for ((i, j), &h) in elevation.indexed_iter() {
            if !h.is_finite() || h.abs() <= min_height {
                continue;
            }

            let r_bottom = self.row_radii[i];
            let r_top = r_bottom + h + self.geoid_safe(i, j);
            let density = if h >= 0.0 { rock_density } else { water_density };

            sources.push(self.source_at(i, j, r_top, r_bottom, density));
        }

        sources
    }

    /// Moho undulation masses between the actual and the reference Moho.
    ///
    /// Thin crust places mantle where the reference model has crust (mass
    /// excess, `+Δρ`); thick crust does the opposite (`−Δρ`).
    pub fn crustal(
        &self,
        thickness: &Array2<f64>,
        reference_thickness: f64,
        density_contrast: f64,
        min_anomaly: f64,
    ) -> Vec<SourceTesseroid> {
        let mut sources = Vec::new();
        let mut degenerate = 0usize;

        for ((i, j), &t) in thickness.indexed_iter() {
            if !t.is_finite() {
                continue;
            }
            let anomaly = t - reference_thickness;
            if anomaly.abs() < min_anomaly {
                continue;
            }

            let r_surface = self.surface_radius(i, j);
            let r_moho = r_surface - t;
            let r_ref_moho = r_surface - reference_thickness;

            if r_moho <= 0.0 || r_ref_moho <= 0.0 || (r_ref_moho - r_moho).abs() < MIN_MOHO_SEPARATION {
                degenerate += 1;
                continue;
            }

            let density = if t < reference_thickness {
                density_contrast
            } else {
                -density_contrast
            };
            sources.push(self.source_at(i, j, r_moho, r_ref_moho, density));
        }

        if degenerate > 0 {
            log::debug!("Skipped {} degenerate crustal cells", degenerate);
        }
        sources
    }

    /// Sediment layers hanging below the physical surface
    pub fn sedimentary(
        &self,
        thickness: &Array2<f64>,
        density_contrast: f64,
        min_thickness: f64,
    ) -> Vec<SourceTesseroid> {
        let mut sources = Vec::new();

        for ((i, j), &s) in thickness.indexed_iter() {
            // NaN fails the comparison and is skipped with the thin cells
            if !(s > min_thickness) {
                continue;
            }

            let r_top = self.surface_radius(i, j);
            let r_bottom = r_top - s;
            if r_bottom >= r_top {
                continue;
            }

            sources.push(self.source_at(i, j, r_bottom, r_top, density_contrast));
        }

        sources
    }
}

/// Return a copy of a thickness grid expressed in meters.
///
/// With [`ThicknessUnits::Auto`] the grid is assumed to be in kilometres when
/// its largest finite magnitude is below `km_threshold`. This is a guess, not
/// a unit tag: data that genuinely straddles the threshold is misread silently,
/// so callers with known units should say so explicitly.
pub fn thickness_in_meters(
    grid: &Array2<f64>,
    units: ThicknessUnits,
    km_threshold: f64,
    label: &str,
) -> Array2<f64> {
    match units {
        ThicknessUnits::Meters => grid.clone(),
        ThicknessUnits::Kilometers => grid.mapv(|v| v * 1000.0),
        ThicknessUnits::Auto => {
            let max_abs = grid
                .iter()
                .filter(|v| v.is_finite())
                .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v.abs(), |m| m.max(v.abs()))));

            match max_abs {
                Some(max_abs) if max_abs < km_threshold => {
                    log::warn!(
                        "{} maximum |value| {:.3} is below {}; assuming kilometres and converting to meters",
                        label,
                        max_abs,
                        km_threshold
                    );
                    grid.mapv(|v| v * 1000.0)
                }
                _ => grid.clone(),
            }
        }
    }
}
