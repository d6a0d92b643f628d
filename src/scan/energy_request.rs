//! Live energy requests driven by the grating position.
//!
//! Utility for requesting energy changes during a scan. After `start`, every
//! grating position update is converted to a photon energy (with a fresh
//! pre-mirror read) and pushed to the energy-request channel, until `stop`.
//! It is up to the accelerator side to decide how to honor the requests.
//!
//! The pump runs on its own task and never blocks the scan body: each update
//! is a bounded computation plus a fire-and-forget write, and any per-update
//! failure is logged and dropped rather than aborting the scan.

use std::sync::Arc;
use std::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::calib::MonoCalibration;
use crate::hardware::{MotionAxis, ScalarSignal};

/// Default request tolerance in eV: only ask for a move if the energy
/// changed by more than this since the last request.
pub const DEFAULT_TOLERANCE_EV: f64 = 5.0;

/// Pushes calibrated energy requests while the grating moves.
///
/// At most one pump is active per handler instance: `start` first stops any
/// prior pump, `stop` is idempotent and safe to call when never started.
pub struct EnergyRequestHandler {
    calib: MonoCalibration,
    tolerance_ev: f64,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl EnergyRequestHandler {
    /// Create a handler with the default request tolerance.
    pub fn new(calib: MonoCalibration) -> Self {
        Self::with_tolerance(calib, DEFAULT_TOLERANCE_EV)
    }

    /// Create a handler with an explicit request tolerance in eV.
    ///
    /// A tolerance of zero forwards every position update.
    pub fn with_tolerance(calib: MonoCalibration, tolerance_ev: f64) -> Self {
        Self {
            calib,
            tolerance_ev,
            pump: Mutex::new(None),
        }
    }

    /// Start requesting energy changes for every grating position update.
    ///
    /// Re-subscribing first unsubscribes any prior pump, so a handler never
    /// has two active subscriptions.
    pub fn start(
        &self,
        axis: &dyn MotionAxis,
        mirror: Arc<dyn ScalarSignal>,
        request: Arc<dyn ScalarSignal>,
    ) {
        self.stop();
        info!(axis = axis.name(), "starting energy requester");

        let mut rx = axis.subscribe();
        let calib = self.calib;
        let tolerance = self.tolerance_ev;
        let handle = tokio::spawn(async move {
            let mut last_sent: Option<f64> = None;
            while rx.changed().await.is_ok() {
                let Some(pitch) = *rx.borrow_and_update() else {
                    continue;
                };
                let mirror_urad = match mirror.read().await {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(signal = mirror.name(), "dropping update, mirror read failed: {e:#}");
                        continue;
                    }
                };
                let energy = calib.energy_from_pitch(pitch, mirror_urad);
                if !energy.is_finite() {
                    warn!(pitch, mirror_urad, "dropping non-finite energy");
                    continue;
                }
                if let Some(prev) = last_sent {
                    if (energy - prev).abs() <= tolerance {
                        continue;
                    }
                }
                // Fire-and-forget: only the most recent value matters.
                if let Err(e) = request.write(energy).await {
                    warn!(signal = request.name(), "energy request dropped: {e:#}");
                    continue;
                }
                last_sent = Some(energy);
            }
        });

        if let Ok(mut pump) = self.pump.lock() {
            *pump = Some(handle);
        }
    }

    /// Stop requesting. Idempotent.
    pub fn stop(&self) {
        if let Ok(mut pump) = self.pump.lock() {
            if let Some(handle) = pump.take() {
                info!("stopping energy requester");
                handle.abort();
            }
        }
    }

    /// Whether a pump is currently installed.
    pub fn is_active(&self) -> bool {
        self.pump
            .lock()
            .map(|pump| pump.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }
}

impl Drop for EnergyRequestHandler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::sim::{SimSignal, SimulatedAxis};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use tokio::task::yield_now;

    const MIRROR: f64 = 143_253.0;

    /// Mirror signal whose reads always fail.
    struct BrokenSignal;

    #[async_trait]
    impl ScalarSignal for BrokenSignal {
        fn name(&self) -> &str {
            "broken_mirror"
        }
        async fn read(&self) -> Result<f64> {
            Err(anyhow!("disconnected"))
        }
        async fn write(&self, _value: f64) -> Result<()> {
            Err(anyhow!("disconnected"))
        }
    }

    async fn settle() {
        // Let the pump task drain pending watch updates.
        for _ in 0..20 {
            yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_updates_follow_position() {
        let axis = SimulatedAxis::new("grating", 10.0);
        let mirror = Arc::new(SimSignal::new("pre_mirror", MIRROR));
        let request = Arc::new(SimSignal::new("energy_request", 0.0));

        let handler = EnergyRequestHandler::with_tolerance(MonoCalibration::default(), 0.0);
        handler.start(&axis, mirror.clone(), request.clone());

        axis.move_to(155_000.0).await.unwrap();
        settle().await;

        let history = request.history().await;
        assert!(!history.is_empty());
        let expected = MonoCalibration::default().energy_from_pitch(155_000.0, MIRROR);
        let last = history.last().copied().unwrap();
        assert!((last - expected).abs() < 1e-9, "last={last} expected={expected}");

        handler.stop();
        assert!(!handler.is_active());
    }

    #[tokio::test]
    async fn test_tolerance_suppresses_small_changes() {
        let axis = SimulatedAxis::new("grating", 10.0);
        let mirror = Arc::new(SimSignal::new("pre_mirror", MIRROR));
        let request = Arc::new(SimSignal::new("energy_request", 0.0));

        let handler = EnergyRequestHandler::new(MonoCalibration::default());
        handler.start(&axis, mirror, request.clone());

        // ~0.1 eV apart at this pitch, well inside the 5 eV tolerance.
        axis.move_to(155_000.0).await.unwrap();
        settle().await;
        axis.move_to(155_001.0).await.unwrap();
        settle().await;

        assert_eq!(request.history().await.len(), 1);
        handler.stop();
    }

    #[tokio::test]
    async fn test_mirror_read_failure_drops_update_only() {
        let axis = SimulatedAxis::new("grating", 10.0);
        let request = Arc::new(SimSignal::new("energy_request", 0.0));

        let handler = EnergyRequestHandler::with_tolerance(MonoCalibration::default(), 0.0);
        handler.start(&axis, Arc::new(BrokenSignal), request.clone());

        axis.move_to(155_000.0).await.unwrap();
        settle().await;

        // Updates dropped, pump still alive.
        assert!(request.history().await.is_empty());
        assert!(handler.is_active());
        handler.stop();
    }

    #[tokio::test]
    async fn test_restart_replaces_pump() {
        let axis = SimulatedAxis::new("grating", 10.0);
        let mirror = Arc::new(SimSignal::new("pre_mirror", MIRROR));
        let request = Arc::new(SimSignal::new("energy_request", 0.0));

        let handler = EnergyRequestHandler::with_tolerance(MonoCalibration::default(), 0.0);
        handler.start(&axis, mirror.clone(), request.clone());
        handler.start(&axis, mirror, request.clone());

        axis.move_to(155_000.0).await.unwrap();
        settle().await;

        // A single pump serviced the update; no duplicate writes per change.
        let history = request.history().await;
        assert_eq!(history.len(), 1);

        handler.stop();
        handler.stop(); // idempotent
    }
}
