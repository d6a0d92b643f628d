//! Energy-tracking scan coordination for a grating monochromator beamline.
//!
//! This library drives a grating-pitch axis through a scan trajectory while
//! continuously converting the live pitch readback into a photon-energy
//! request for the accelerator, and brackets the whole motion with a
//! state-checked acquisition start/stop.
//!
//! The hardware seams are deliberately thin: anything that can report a
//! position through a watch channel can act as the grating axis, and the
//! crate ships simulated implementations for dry runs and tests.

pub mod calib;
pub mod config;
pub mod error;
pub mod hardware;
pub mod scan;

pub use calib::{compute_energy, compute_pitch, MonoCalibration};
pub use config::BeamlineConfig;
pub use error::{ScanError, ScanResult};
pub use scan::coordinator::{
    DurationScanParams, NdScanParams, ScanCoordinator, ScanDevices,
};
pub use scan::sequencer::{MotionSpec, Sequencer, StepSequencer};
