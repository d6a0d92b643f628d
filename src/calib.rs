//! Grating monochromator energy calibration.
//!
//! Pure transforms between grating pitch (µrad) and photon energy (eV),
//! parameterized by the slowly varying pre-mirror pitch (µrad). The two
//! directions come from independent closed-form derivations of the same
//! optical geometry and are *not* literal inverses of each other; round-trip
//! error on the order of millionths of a µrad is expected and tolerated by
//! the scan setup logic.
//!
//! The constants are the experiment calibration and must not be "cleaned
//! up": changing a digit moves the beamline.

use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI};

/// Planck's constant, J·s.
const PLANCK: f64 = 6.626_070_15e-34;
/// Speed of light, m/s.
const LIGHT_SPEED: f64 = 299_792_458.0;
/// Elementary charge, C.
const ELEMENTARY_CHARGE: f64 = 1.602_176_634e-19;
/// Wavelength[mm] = EV_MM / Energy[eV], used by the arcsin-form inverse.
const EV_MM: f64 = 0.001_239_842;

/// Optical calibration constants for the grating monochromator.
///
/// All angles are design values in radians; mechanical offsets are in µrad
/// to match the motor readbacks they are subtracted from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonoCalibration {
    /// Grating ruling density in lines per meter.
    pub line_density: f64,
    /// Incoming beam angle from the upstream mirror, radians.
    pub incidence_angle: f64,
    /// Exit trajectory design angle, radians.
    pub exit_angle: f64,
    /// Grating pitch mechanical offset, µrad.
    pub grating_offset: f64,
    /// Pre-mirror pitch mechanical offset, µrad.
    pub mirror_offset: f64,
    /// Diffraction order.
    pub diffraction_order: f64,
}

impl Default for MonoCalibration {
    fn default() -> Self {
        Self {
            line_density: 5e4,
            incidence_angle: 0.03662,
            exit_angle: 0.1221413,
            grating_offset: 63358.0,
            mirror_offset: 90641.0,
            diffraction_order: 1.0,
        }
    }
}

impl MonoCalibration {
    /// Photon energy (eV) for a grating pitch and pre-mirror pitch (µrad).
    ///
    /// Returns a non-finite value at the singular configuration where the
    /// incidence and diffraction angles have equal sines; setup-time callers
    /// must treat that as fatal, the live update path drops it.
    pub fn energy_from_pitch(&self, grating_urad: f64, mirror_urad: f64) -> f64 {
        let g = (grating_urad - self.grating_offset) * 1e-6;
        let p = (mirror_urad - self.mirror_offset) * 1e-6;

        let alpha = FRAC_PI_2 - g + 2.0 * p - self.incidence_angle;
        let beta = FRAC_PI_2 + g - self.exit_angle;

        PLANCK * LIGHT_SPEED * self.line_density
            / (ELEMENTARY_CHARGE * (alpha.sin() - beta.sin()))
    }

    /// Grating pitch (µrad) that selects a photon energy (eV) at the given
    /// pre-mirror pitch (µrad).
    ///
    /// Arcsin-based closed form; an energy outside the reachable band makes
    /// the arcsin argument leave `[-1, 1]` and the result non-finite.
    pub fn pitch_from_energy(&self, energy_ev: f64, mirror_urad: f64) -> f64 {
        let p_m2 = (mirror_urad - self.mirror_offset) * 1e-6;
        // Ruling density in lines/mm to pair with the eV·mm constant.
        let d0 = self.line_density * 1e-3;
        let a0 = self.diffraction_order * d0 * EV_MM / energy_ev;

        let half_in = 0.5 * self.incidence_angle;
        let half_out = 0.5 * self.exit_angle;
        let p_g = p_m2 - half_in + half_out
            - (0.5 * a0 / (0.5 * PI + p_m2 - half_in - half_out).cos()).asin();

        (p_g + self.grating_offset * 1e-6) * 1e6
    }

    /// Grating pitch (µrad) at which `energy_from_pitch` diverges for the
    /// given pre-mirror pitch (µrad).
    ///
    /// Useful for validating requested trajectories against the forbidden
    /// configuration.
    pub fn singular_pitch(&self, mirror_urad: f64) -> f64 {
        let p = (mirror_urad - self.mirror_offset) * 1e-6;
        let g = (2.0 * p - self.incidence_angle + self.exit_angle) / 2.0;
        g * 1e6 + self.grating_offset
    }
}

/// Photon energy (eV) for a grating and pre-mirror pitch (µrad), using the
/// default calibration. Standalone entry point for offline calculations.
pub fn compute_energy(grating_urad: f64, mirror_urad: f64) -> f64 {
    MonoCalibration::default().energy_from_pitch(grating_urad, mirror_urad)
}

/// Grating pitch (µrad) for a photon energy (eV) and pre-mirror pitch
/// (µrad), using the default calibration.
pub fn compute_pitch(energy_ev: f64, mirror_urad: f64) -> f64 {
    MonoCalibration::default().pitch_from_energy(energy_ev, mirror_urad)
}
