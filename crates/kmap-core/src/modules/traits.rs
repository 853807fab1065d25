use crate::domain::{KmapResult, ScalarMap};
use crate::modules::slicing::SlicedStack;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AkType {
    #[serde(alias = "no")]
    None,
    #[default]
    Toroid,
    Nanoesca,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarization {
    #[default]
    P,
    S,
    CircularLeft,
    CircularRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Symmetrization {
    #[default]
    None,
    TwoFold,
    ThreeFold,
    FourFold,
}

/// Experimental geometry a simulated map is computed for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryParameters {
    /// Kinetic energy in eV.
    pub e_kin: f64,
    /// Euler angles of the molecule in degrees.
    pub phi: f64,
    pub theta: f64,
    pub psi: f64,
    /// Angle of incidence of the light in degrees.
    pub alpha: f64,
    /// Azimuth of the light in degrees.
    pub beta: f64,
    pub ak_type: AkType,
    pub polarization: Polarization,
    pub symmetrization: Symmetrization,
}

impl Default for GeometryParameters {
    fn default() -> Self {
        Self {
            e_kin: 28.0,
            phi: 0.0,
            theta: 0.0,
            psi: 0.0,
            alpha: 60.0,
            beta: 90.0,
            ak_type: AkType::Toroid,
            polarization: Polarization::P,
            symmetrization: Symmetrization::None,
        }
    }
}

/// Source of simulated reference maps, one per orbital identifier.
pub trait OrbitalMapProvider {
    fn compute_map(&self, orbital_id: &str, geometry: &GeometryParameters) -> KmapResult<ScalarMap>;
}

/// Source of the measured sliced stack.
pub trait SlicedDataSource {
    fn load(&self) -> KmapResult<SlicedStack>;
}

impl<T> OrbitalMapProvider for &T
where
    T: OrbitalMapProvider + ?Sized,
{
    fn compute_map(&self, orbital_id: &str, geometry: &GeometryParameters) -> KmapResult<ScalarMap> {
        (**self).compute_map(orbital_id, geometry)
    }
}
