use serde::{Deserialize, Serialize};

/// Newtonian gravitational constant (m³ kg⁻¹ s⁻²)
pub const GRAVITATIONAL_CONSTANT: f64 = 6.67430e-11;

/// Biaxial reference ellipsoid with Somigliana normal gravity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ellipsoid {
    /// Semi-major axis (m)
    pub semi_major: f64,
    /// Semi-minor axis (m)
    pub semi_minor: f64,
    /// Normal gravity at the equator (m/s²)
    pub gamma_equator: f64,
    /// Somigliana constant k
    pub somigliana_k: f64,
}

impl Default for Ellipsoid {
    fn default() -> Self {
        Self::wgs84()
    }
}

impl Ellipsoid {
    /// WGS84 semi-axes with the corresponding Somigliana constants
    pub fn wgs84() -> Self {
        Self {
            semi_major: 6_378_137.0,
            semi_minor: 6_356_752.314245,
            gamma_equator: 9.7803253359,
            somigliana_k: 0.00193185265241,
        }
    }

    /// First eccentricity squared, e² = 1 − (b/a)²
    pub fn eccentricity_squared(&self) -> f64 {
        let ratio = self.semi_minor / self.semi_major;
        1.0 - ratio * ratio
    }

    /// Ellipsoidal radius at geodetic latitude (radians)
    ///
    /// r = a·√(1−e²) / √(1 − e²·sin²φ)
    pub fn radius(&self, lat_rad: f64) -> f64 {
        let e2 = self.eccentricity_squared();
        let sin_lat = lat_rad.sin();
        self.semi_major * (1.0 - e2).sqrt() / (1.0 - e2 * sin_lat * sin_lat).sqrt()
    }

    /// Normal gravity at geodetic latitude (radians), Somigliana closed form
    ///
    /// γ = γ_e·(1 + k·sin²φ) / √(1 − e²·sin²φ)
    pub fn normal_gravity(&self, lat_rad: f64) -> f64 {
        let e2 = self.eccentricity_squared();
        let s2 = lat_rad.sin().powi(2);
        self.gamma_equator * (1.0 + self.somigliana_k * s2) / (1.0 - e2 * s2).sqrt()
    }

    /// Ellipsoidal radius for each latitude in degrees
    pub fn radii_deg(&self, lats_deg: &[f64]) -> Vec<f64> {
        lats_deg.iter().map(|lat| self.radius(lat.to_radians())).collect()
    }

    /// Normal gravity for each latitude in degrees
    pub fn normal_gravity_deg(&self, lats_deg: &[f64]) -> Vec<f64> {
        lats_deg.iter().map(|lat| self.normal_gravity(lat.to_radians())).collect()
    }
}

/// Ellipsoidal radius on WGS84 at latitude in degrees
pub fn ellipsoidal_radius(lat_deg: f64) -> f64 {
    Ellipsoid::wgs84().radius(lat_deg.to_radians())
}

/// WGS84 normal gravity at latitude in degrees
pub fn normal_gravity(lat_deg: f64) -> f64 {
    Ellipsoid::wgs84().normal_gravity(lat_deg.to_radians())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_radius_limits() {
        let ell = Ellipsoid::wgs84();
        let e2 = ell.eccentricity_squared();

        // Equator: a·√(1−e²) = b
        assert_relative_eq!(ell.radius(0.0), ell.semi_minor, max_relative = 1e-12);
        // Pole: a·√(1−e²)/√(1−e²) = a
        assert_relative_eq!(
            ell.radius(std::f64::consts::FRAC_PI_2),
            ell.semi_major,
            max_relative = 1e-12
        );
        assert!(e2 > 0.0066 && e2 < 0.0067);
    }

    #[test]
    fn test_normal_gravity() {
        let ell = Ellipsoid::wgs84();
        assert_relative_eq!(ell.normal_gravity(0.0), 9.7803253359, max_relative = 1e-12);

        // Polar gravity on WGS84 is about 9.8322 m/s²
        let polar = ell.normal_gravity(std::f64::consts::FRAC_PI_2);
        assert!((polar - 9.8322).abs() < 1e-3, "polar gravity {}", polar);
    }

    #[test]
    fn test_symmetry_in_latitude() {
        for lat in [5.0, 33.3, 61.0, 89.9] {
            assert_relative_eq!(ellipsoidal_radius(lat), ellipsoidal_radius(-lat));
            assert_relative_eq!(normal_gravity(lat), normal_gravity(-lat));
        }
    }

    #[test]
    fn test_vectorised_helpers() {
        let ell = Ellipsoid::default();
        let lats = [-45.0, 0.0, 45.0];
        let radii = ell.radii_deg(&lats);
        let gammas = ell.normal_gravity_deg(&lats);
        assert_eq!(radii.len(), 3);
        assert_relative_eq!(radii[1], ellipsoidal_radius(0.0));
        assert_relative_eq!(gammas[2], normal_gravity(45.0));
    }
}
