//! Custom error types for scan coordination.
//!
//! `ScanError` mirrors the failure taxonomy of the scan lifecycle: problems
//! that must abort before any motion (configuration, acquisition state,
//! calibration singularities) are separate variants from motion failures
//! surfaced mid-scan, so callers can tell a refused scan from a broken one.
//! Collaborator errors (hardware traits return `anyhow::Result`) pass
//! through the `Device` variant via `?`.

use thiserror::Error;

use crate::hardware::DaqState;

/// Convenience alias for results using the scan error type.
pub type ScanResult<T> = std::result::Result<T, ScanError>;

/// Errors raised by scan setup, execution, and teardown.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Malformed scan request, rejected before any hardware motion.
    #[error("Scan configuration error: {0}")]
    Config(String),

    /// The acquisition session was not in the `configured` state at start.
    #[error(
        "DAQ must be in configured state to run energy scan! \
         Currently in {0} state."
    )]
    AcquisitionNotReady(DaqState),

    /// The optical calibration produced a non-finite value during setup.
    #[error("Calibration singularity: {context} gave non-finite {value}")]
    CalibrationSingularity {
        /// What was being computed when the transform diverged.
        context: String,
        /// The offending result.
        value: f64,
    },

    /// The axis failed to reach a commanded point (e.g. stopped externally).
    #[error("Motion failed: {0}")]
    Motion(String),

    /// Error from an external collaborator (axis, signal, DAQ control).
    #[error("Device error: {0}")]
    Device(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ScanError::Config("either ev or urad bounds required".into());
        assert_eq!(
            err.to_string(),
            "Scan configuration error: either ev or urad bounds required"
        );
    }

    #[test]
    fn test_acquisition_error_names_state() {
        let err = ScanError::AcquisitionNotReady(DaqState::Running);
        assert!(err.to_string().contains("running"));
        assert!(err.to_string().contains("configured"));
    }
}
