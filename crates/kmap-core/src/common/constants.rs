//! Physical constants used when building momentum grids and horizons.

/// `sqrt(2 mₑ) / ħ` in Å⁻¹ eV⁻¹ᐟ²: free-electron momentum is
/// `k = ELECTRON_K_FACTOR * sqrt(E_kin)`.
pub const ELECTRON_K_FACTOR: f64 = 0.512_316_72_f64;
/// Gaussian FWHM = `FWHM_PER_SIGMA * σ`.
pub const FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949_3_f64;

/// Radius of the photoemission horizon for electrons of kinetic energy
/// `e_kin` (eV). Negative energies have no horizon and give 0.
pub fn horizon_radius(e_kin: f64) -> f64 {
    if e_kin <= 0.0 {
        return 0.0;
    }
    ELECTRON_K_FACTOR * e_kin.sqrt()
}
