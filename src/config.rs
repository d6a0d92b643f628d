//! Beamline configuration.
//!
//! Layered figment configuration: built-in defaults, then an optional TOML
//! file, then `MONO_SCAN_`-prefixed environment variables (nested keys
//! separated by `__`, e.g. `MONO_SCAN_SCAN__GRATING_SPEED`). Calibration
//! constants default to the current experiment calibration and should only
//! be overridden when the optics are re-measured.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::calib::MonoCalibration;
use crate::error::{ScanError, ScanResult};

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "mono-scan.toml";

/// Process-variable names of the externally wired channels.
///
/// The library never opens these itself; they document the operator-side
/// wiring and let deployment glue construct the right signals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Grating pitch readback.
    pub grating_pitch: String,
    /// Pre-mirror pitch readback.
    pub pre_mirror_pitch: String,
    /// Photon energy request destination.
    pub energy_request: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            grating_pitch: "SP1K1:MONO:MMS:G_PI.RBV".into(),
            pre_mirror_pitch: "SP1K1:MONO:MMS:M_PI.RBV".into(),
            energy_request: "RIX:USER:MCC:EPHOTK:VER".into(),
        }
    }
}

/// Scan parameter defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanDefaults {
    /// Grating sweep speed, µrad/sec.
    pub grating_speed: f64,
    /// Minimum energy change worth a new request, eV.
    pub request_tolerance_ev: f64,
    /// Settle delay between stepped-scan points.
    #[serde(with = "humantime_serde")]
    pub settle: Duration,
    /// Simulated axis stepper cadence.
    #[serde(with = "humantime_serde")]
    pub sim_tick: Duration,
}

impl Default for ScanDefaults {
    fn default() -> Self {
        Self {
            grating_speed: 0.5,
            request_tolerance_ev: 5.0,
            settle: Duration::ZERO,
            sim_tick: Duration::from_millis(100),
        }
    }
}

/// Complete beamline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BeamlineConfig {
    /// Optical calibration constants.
    pub calibration: MonoCalibration,
    /// External channel names.
    pub channels: ChannelConfig,
    /// Scan parameter defaults.
    pub scan: ScanDefaults,
}

impl BeamlineConfig {
    /// Load from the default file (if present) and the environment.
    pub fn load() -> ScanResult<Self> {
        Self::from_file(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Load from a specific TOML file (if present) and the environment.
    pub fn from_file(path: &Path) -> ScanResult<Self> {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("MONO_SCAN_").split("__"))
            .extract()
            .map_err(|e| ScanError::Config(e.to_string()))
    }
}
