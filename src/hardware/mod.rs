//! Hardware seams consumed by the scan coordinator.
//!
//! Hardware-agnostic interfaces for the three external resources a scan
//! touches: the grating pitch axis, scalar process signals (pre-mirror
//! readback, energy request), and the acquisition control. Implementations
//! handle protocol-specific details; the coordinator only reads positions
//! and issues commands through these traits.
//!
//! Position updates are distributed through a `tokio::sync::watch` channel:
//! subscribers always observe the latest position, updates coalesce under
//! load, and a position write is visible to every subscriber before the
//! owning move reports completion.

pub mod sim;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;

/// Acquisition session state, as reported by the external DAQ control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DaqState {
    /// Configured and idle; the only state a scan may start from.
    Configured,
    /// Run startup in progress.
    Starting,
    /// Actively taking data.
    Running,
    /// Run paused by an operator.
    Paused,
    /// Faulted; needs operator intervention.
    Error,
}

impl DaqState {
    /// State name as the external control spells it.
    pub fn as_str(&self) -> &'static str {
        match self {
            DaqState::Configured => "configured",
            DaqState::Starting => "starting",
            DaqState::Running => "running",
            DaqState::Paused => "paused",
            DaqState::Error => "error",
        }
    }
}

impl std::fmt::Display for DaqState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single motion axis (the grating pitch, or an outer scan motor).
///
/// ## Position units
/// Abstract motor units; for the grating pitch these are µrad.
///
/// ## Motion
/// `move_to` resolves when the axis arrives (including any settle delay) and
/// errors if the move is interrupted. `stop` aborts the in-flight move, which
/// must then report failure promptly.
#[async_trait]
pub trait MotionAxis: Send + Sync {
    /// Axis name, for logs.
    fn name(&self) -> &str;

    /// Last known readback position, `None` until first known.
    fn position(&self) -> Option<f64>;

    /// Move to an absolute position and wait for arrival.
    async fn move_to(&self, target: f64) -> Result<()>;

    /// Abort any in-flight motion.
    async fn stop(&self);

    /// Current commanded velocity, units/sec.
    async fn velocity(&self) -> Result<f64>;

    /// Set the commanded velocity, units/sec.
    async fn set_velocity(&self, velocity: f64) -> Result<()>;

    /// Set the post-move settle delay.
    async fn set_settle_delay(&self, delay: Duration) -> Result<()>;

    /// Subscribe to position updates.
    ///
    /// The receiver observes every position the axis publishes, latest value
    /// wins. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> watch::Receiver<Option<f64>>;
}

/// A scalar process value.
///
/// `write` has fire-and-forget semantics: it resolves once the value is
/// accepted for transport, not when any downstream consumer acts on it.
#[async_trait]
pub trait ScalarSignal: Send + Sync {
    /// Signal name, for logs.
    fn name(&self) -> &str;

    /// Read the current value.
    async fn read(&self) -> Result<f64>;

    /// Write a value, without waiting for acknowledgment.
    async fn write(&self, value: f64) -> Result<()>;
}

/// Control interface of the external acquisition session.
///
/// The coordinator never creates the session; it only observes and
/// transitions it.
#[async_trait]
pub trait AcquisitionControl: Send + Sync {
    /// Current session state.
    async fn state(&self) -> Result<DaqState>;

    /// Request a state transition.
    async fn set_state(&self, target: DaqState) -> Result<()>;

    /// Set whether the next run records data.
    async fn set_record(&self, record: bool) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daq_state_spelling() {
        assert_eq!(DaqState::Configured.as_str(), "configured");
        assert_eq!(DaqState::Running.to_string(), "running");
    }

    #[test]
    fn test_daq_state_serde_round_trip() {
        let json = serde_json::to_string(&DaqState::Paused).unwrap();
        assert_eq!(json, "\"paused\"");
        let state: DaqState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, DaqState::Paused);
    }
}
