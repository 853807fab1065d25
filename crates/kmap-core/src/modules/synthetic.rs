//! Binding-energy stacks built from simulated orbital maps.
//!
//! Each orbital contributes its map, resampled onto a square momentum grid,
//! weighted by a normalized Gaussian centred on its binding energy. The
//! energy axis extends three widths past the outermost orbitals and is
//! sampled six times finer than the width.

use crate::common::constants::{horizon_radius, FWHM_PER_SIGMA};
use crate::domain::{Axis, DecompositionError, Grid, KmapResult, ScalarMap};
use crate::modules::slicing::SlicedStack;
use crate::numerics::GridResampler;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use tracing::info;

const EXTEND_WIDTHS: f64 = 3.0;
const SAMPLES_PER_WIDTH: f64 = 6.0;

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticOrbital {
    pub name: String,
    /// Binding energy in eV, negative below the Fermi level.
    pub binding_energy: f64,
    /// Scale applied to the orbital's map.
    pub weight: f64,
    pub map: ScalarMap,
}

impl SyntheticOrbital {
    pub fn new(name: impl Into<String>, binding_energy: f64, map: ScalarMap) -> Self {
        Self {
            name: name.into(),
            binding_energy,
            weight: 1.0,
            map,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

/// Light source used to place the photoemission horizon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhotonSource {
    pub photon_energy: f64,
    pub work_function: f64,
}

impl PhotonSource {
    pub fn kinetic_energy(&self, binding_energy: f64) -> f64 {
        self.photon_energy - self.work_function + binding_energy
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisSettings {
    pub name: String,
    /// Width σ of the Gaussian energy broadening in eV.
    pub broadening: f64,
    pub k_range: [f64; 2],
    pub k_points: usize,
    /// Points beyond the horizon become NaN when set.
    #[serde(default)]
    pub horizon: Option<PhotonSource>,
}

/// Gaussian of width `sigma` centred on `center`, normalized to unit area.
pub fn gaussian_weight(energy: f64, center: f64, sigma: f64) -> f64 {
    let norm = 1.0 / (2.0 * PI * sigma * sigma).sqrt();
    norm * (-(energy - center).powi(2) / (2.0 * sigma * sigma)).exp()
}

/// Energy axis covering all orbitals.
pub fn energy_axis(binding_energies: &[f64], broadening: f64) -> KmapResult<Axis> {
    if !(broadening.is_finite() && broadening > 0.0) {
        return Err(DecompositionError::invalid_configuration(format!(
            "energy broadening must be positive, got {broadening}"
        )));
    }
    let (lowest, highest) = binding_energies
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(low, high), &energy| {
            (low.min(energy), high.max(energy))
        });
    if !(lowest.is_finite() && highest.is_finite()) {
        return Err(DecompositionError::invalid_configuration(
            "binding energies must be finite and non-empty",
        ));
    }

    let extend = EXTEND_WIDTHS * broadening;
    let (start, stop) = (lowest - extend, highest + extend);
    let spacing = broadening / SAMPLES_PER_WIDTH;
    let count = ((stop - start) / spacing).floor() as usize + 1;
    Ok(Axis::new("-BE", "eV", [start, stop], count))
}

pub fn synthesize_stack(
    orbitals: &[SyntheticOrbital],
    settings: &SynthesisSettings,
    resampler: &GridResampler,
) -> KmapResult<SlicedStack> {
    if orbitals.is_empty() {
        return Err(DecompositionError::invalid_configuration(
            "at least one orbital is needed to synthesize a stack",
        ));
    }
    if settings.k_points < 2 || settings.k_range[0] >= settings.k_range[1] {
        return Err(DecompositionError::invalid_grid(format!(
            "momentum axis needs an increasing range and at least two points, got {:?} with {}",
            settings.k_range, settings.k_points
        )));
    }

    let energies: Vec<f64> = orbitals.iter().map(|orbital| orbital.binding_energy).collect();
    let energy = energy_axis(&energies, settings.broadening)?;
    let ky = Axis::new("ky", "1/Å", settings.k_range, settings.k_points);
    let kx = Axis::new("kx", "1/Å", settings.k_range, settings.k_points);
    let grid = Grid::from_axes(&kx, &ky)?;
    let plane = grid.len();
    let binding = energy.coordinates();

    info!(
        name = %settings.name,
        orbitals = orbitals.len(),
        slices = binding.len(),
        k_points = settings.k_points,
        "synthesizing stack"
    );

    let mut data = vec![0.0; binding.len() * plane];
    for orbital in orbitals {
        let resampled = resampler.resample(&orbital.map, &grid);
        for (slice, &energy) in binding.iter().enumerate() {
            let scale = orbital.weight
                * gaussian_weight(energy, orbital.binding_energy, settings.broadening);
            let target = &mut data[slice * plane..(slice + 1) * plane];
            for (cell, &value) in target.iter_mut().zip(resampled.values()) {
                if value.is_finite() {
                    *cell += scale * value;
                }
            }
        }
    }

    if let Some(source) = &settings.horizon {
        for (slice, &energy) in binding.iter().enumerate() {
            let radius = horizon_radius(source.kinetic_energy(energy));
            for flat in 0..plane {
                let (x, y) = grid.point(flat);
                if x.hypot(y) > radius {
                    data[slice * plane + flat] = f64::NAN;
                }
            }
        }
    }

    let mut metadata = BTreeMap::from([
        ("energy_broadening".to_string(), settings.broadening.to_string()),
        (
            "energy_fwhm".to_string(),
            (FWHM_PER_SIGMA * settings.broadening).to_string(),
        ),
    ]);
    if let Some(source) = &settings.horizon {
        metadata.insert("photon_energy".to_string(), source.photon_energy.to_string());
        metadata.insert("work_function".to_string(), source.work_function.to_string());
    }
    for orbital in orbitals {
        metadata.insert(
            format!("orbital.{}", orbital.name),
            orbital.binding_energy.to_string(),
        );
    }

    Ok(SlicedStack::new(settings.name.clone(), [energy, ky, kx], data)?.with_metadata(metadata))
}
