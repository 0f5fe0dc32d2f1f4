//! Second-order tesseroid potential (Heck & Seitz series expansion).
//!
//! The potential of a spherical prism is expanded about its geometric centre:
//! the zero-order term is the point-mass potential `1/l0`, the second-order
//! terms add the curvature of `1/l` along radius, latitude and longitude,
//! each weighted by the squared extent of the prism over 24.

use super::ellipsoid::GRAVITATIONAL_CONSTANT;
use super::sources::SourceTesseroid;

/// Floor applied to the source/observation distance (m)
pub const MIN_DISTANCE: f64 = 1e-12;

/// Below this sin(ψ) the angular second-order terms are dropped
pub const MIN_SIN_PSI: f64 = 1e-12;

/// Observation point on or above the reference surface
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObservationPoint {
    pub lat: f64,    // radians
    pub lon: f64,    // radians
    pub radius: f64, // meters from the geocentre
}

impl ObservationPoint {
    pub fn from_degrees(lat_deg: f64, lon_deg: f64, radius: f64) -> Self {
        Self {
            lat: lat_deg.to_radians(),
            lon: lon_deg.to_radians(),
            radius,
        }
    }
}

/// Source tesseroid in radians with cached trigonometry, ready for the inner loop
#[derive(Debug, Clone, Copy)]
pub struct PreparedTesseroid {
    pub sin_lat: f64,
    pub cos_lat: f64,
    pub lon: f64,
    pub r1: f64,
    pub r2: f64,
    pub density: f64,
    pub dlat: f64, // radians
    pub dlon: f64, // radians
}

impl PreparedTesseroid {
    pub fn new(source: &SourceTesseroid) -> Self {
        let lat = source.lat_deg.to_radians();
        Self {
            sin_lat: lat.sin(),
            cos_lat: lat.cos(),
            lon: source.lon_deg.to_radians(),
            r1: source.r1,
            r2: source.r2,
            density: source.density,
            dlat: source.dlat_deg.to_radians(),
            dlon: source.dlon_deg.to_radians(),
        }
    }

    /// Radii are NaN for sources that must be skipped
    #[inline]
    pub fn is_valid(&self) -> bool {
        !self.r1.is_nan() && !self.r2.is_nan()
    }

    /// Cosine of the great-circle angle to an observation
    #[inline]
    pub fn cos_psi(&self, sin_lat_o: f64, cos_lat_o: f64, lon_o: f64) -> f64 {
        sin_lat_o * self.sin_lat + cos_lat_o * self.cos_lat * (lon_o - self.lon).cos()
    }

    /// Potential at an observation radius, given the precomputed cos(ψ)
    #[inline]
    pub fn potential(&self, cos_psi: f64, r_obs: f64) -> f64 {
        let cos_psi = cos_psi.clamp(-1.0, 1.0);
        let psi = cos_psi.acos();

        let r_t = 0.5 * (self.r1 + self.r2);
        let l0_sq = r_obs * r_obs + r_t * r_t - 2.0 * r_obs * r_t * cos_psi;
        if l0_sq <= 0.0 {
            return 0.0;
        }
        let l0 = l0_sq.sqrt().max(MIN_DISTANCE);

        let l0_5 = l0_sq.powf(2.5);
        let k000 = 1.0 / l0;
        let k200 = (3.0 * (r_obs - r_t * cos_psi).powi(2) - l0_sq) / l0_5;

        let sin_psi = psi.sin();
        let (k020, k002) = if sin_psi > MIN_SIN_PSI {
            (
                (3.0 * (r_t * psi).powi(2) - l0_sq) / l0_5,
                (3.0 * (r_t * sin_psi).powi(2) - l0_sq) / l0_5,
            )
        } else {
            (0.0, 0.0)
        };

        let dr = self.r2 - self.r1;
        let kernel = k000
            + (dr * dr / 24.0) * k200
            + (self.dlat * self.dlat / 24.0) * k020
            + (self.dlon * self.dlon / 24.0) * k002;

        // cos(lat) >= 0 for any latitude in [-90, 90]; the floor only guards malformed input
        let cos_lat_t = self.cos_lat.max(0.0);
        let volume = r_t * r_t * cos_lat_t * dr * self.dlat * self.dlon;

        GRAVITATIONAL_CONSTANT * self.density * volume * kernel
    }
}

/// Potential of one source tesseroid at one observation point (m²/s²)
pub fn tesseroid_potential(obs: &ObservationPoint, source: &SourceTesseroid) -> f64 {
    let prepared = PreparedTesseroid::new(source);
    let cos_psi = prepared.cos_psi(obs.lat.sin(), obs.lat.cos(), obs.lon);
    prepared.potential(cos_psi, obs.radius)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const R: f64 = 6_371_000.0;

    fn block(lat: f64, lon: f64, r1: f64, r2: f64, density: f64) -> SourceTesseroid {
        SourceTesseroid::new(lat, lon, r1, r2, density, 0.1, 0.1)
    }

    #[test]
    fn test_far_field_matches_point_mass() {
        let src = block(0.0, 0.0, R - 1000.0, R, 2670.0);
        let obs = ObservationPoint::from_degrees(0.0, 5.0, R);

        let prepared = PreparedTesseroid::new(&src);
        let r_t = R - 500.0;
        let mass = 2670.0 * r_t * r_t * prepared.dlat * prepared.dlon * 1000.0;
        let psi = 5.0_f64.to_radians();
        let dist = (R * R + r_t * r_t - 2.0 * R * r_t * psi.cos()).sqrt();

        let v = tesseroid_potential(&obs, &src);
        assert_relative_eq!(v, GRAVITATIONAL_CONSTANT * mass / dist, max_relative = 1e-3);
    }

    #[test]
    fn test_linear_in_density() {
        let obs = ObservationPoint::from_degrees(10.2, 20.1, R + 100.0);
        let base = block(10.0, 20.0, R - 3000.0, R, 1.0);
        let v1 = tesseroid_potential(&obs, &base);

        for scale in [-2.5, 0.5, 3.0, 1000.0] {
            let scaled = block(10.0, 20.0, R - 3000.0, R, scale);
            assert_relative_eq!(tesseroid_potential(&obs, &scaled), scale * v1, max_relative = 1e-12);
        }

        let zero = block(10.0, 20.0, R - 3000.0, R, 0.0);
        assert_eq!(tesseroid_potential(&obs, &zero), 0.0);
    }

    #[test]
    fn test_zero_separation_is_finite() {
        let src = block(45.0, 7.0, R, R + 2000.0, 2670.0);
        let obs = ObservationPoint::from_degrees(45.0, 7.0, R + 2500.0);
        let v = tesseroid_potential(&obs, &src);
        assert!(v.is_finite());
        assert!(v > 0.0);
    }

    #[test]
    fn test_cosine_overshoot_is_clamped() {
        let src = PreparedTesseroid::new(&block(0.0, 0.0, R - 10.0, R, 1000.0));
        let v = src.potential(1.0 + 1e-12, R + 50.0);
        assert!(v.is_finite());
        let v = src.potential(-1.0 - 1e-12, R + 50.0);
        assert!(v.is_finite());
    }

    #[test]
    fn test_coincident_centre_contributes_nothing() {
        let src = block(0.0, 0.0, R - 100.0, R + 100.0, 2670.0);
        let obs = ObservationPoint::from_degrees(0.0, 0.0, R);
        assert_eq!(tesseroid_potential(&obs, &src), 0.0);
    }

    #[test]
    fn test_zero_thickness_contributes_nothing() {
        let src = block(0.0, 0.0, R, R, 2670.0);
        let obs = ObservationPoint::from_degrees(0.5, 0.5, R + 10.0);
        assert_eq!(tesseroid_potential(&obs, &src), 0.0);
    }

    #[test]
    fn test_negative_density_mass_deficit() {
        let obs = ObservationPoint::from_degrees(1.0, 1.0, R);
        let excess = tesseroid_potential(&obs, &block(1.0, 1.2, R - 5000.0, R, 300.0));
        let deficit = tesseroid_potential(&obs, &block(1.0, 1.2, R - 5000.0, R, -300.0));
        assert!(excess > 0.0);
        assert_relative_eq!(deficit, -excess);
    }
}
