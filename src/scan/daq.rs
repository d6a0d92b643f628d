//! Acquisition lifecycle bracket around a scan.
//!
//! State-checked start/stop for the external acquisition session. A scan may
//! only start from the `configured` state; teardown returns a run this scan
//! started back to `configured` and is safe to call no matter how the scan
//! ended, while a foreign run that refused the scan is never touched. With
//! no control attached (dry runs) all operations are no-ops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::error::{ScanError, ScanResult};
use crate::hardware::{AcquisitionControl, DaqState};

/// Start/stop wrapper around the external acquisition session.
pub struct DaqLifecycle {
    control: Option<Arc<dyn AcquisitionControl>>,
    record: Option<bool>,
    started: AtomicBool,
}

impl DaqLifecycle {
    /// Bracket the given session, optionally forcing the record flag before
    /// each start.
    pub fn new(control: Arc<dyn AcquisitionControl>, record: Option<bool>) -> Self {
        Self {
            control: Some(control),
            record,
            started: AtomicBool::new(false),
        }
    }

    /// No-acquisition mode: start and stop touch nothing.
    pub fn disabled() -> Self {
        Self {
            control: None,
            record: None,
            started: AtomicBool::new(false),
        }
    }

    /// Whether a session is attached.
    pub fn is_enabled(&self) -> bool {
        self.control.is_some()
    }

    /// Check that a scan may start, without transitioning anything.
    ///
    /// Fails with [`ScanError::AcquisitionNotReady`] unless the session is in
    /// exactly the `configured` state. Called before any motion command so a
    /// busy session refuses the scan while everything is still parked.
    pub async fn ensure_ready(&self) -> ScanResult<()> {
        let Some(control) = &self.control else {
            return Ok(());
        };
        let state = control.state().await?;
        if state != DaqState::Configured {
            return Err(ScanError::AcquisitionNotReady(state));
        }
        Ok(())
    }

    /// Start the acquisition.
    ///
    /// Re-checks the `configured` state, sets the record flag when one was
    /// requested, then transitions to `running` and remembers that this scan
    /// owns the run.
    pub async fn start(&self) -> ScanResult<()> {
        self.ensure_ready().await?;
        let Some(control) = &self.control else {
            return Ok(());
        };
        if let Some(record) = self.record {
            info!(record, "setting DAQ record flag");
            control.set_record(record).await?;
        }
        info!("starting the DAQ");
        control.set_state(DaqState::Running).await?;
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    /// Stop the run this lifecycle started, if any.
    ///
    /// Only acts when a prior `start` succeeded; a foreign run that refused
    /// the scan is left untouched. Transitions `{starting, paused, running}`
    /// back to `configured`. Always invoked during teardown regardless of
    /// how the scan terminated.
    pub async fn stop(&self) -> ScanResult<()> {
        let Some(control) = &self.control else {
            return Ok(());
        };
        if !self.started.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        if matches!(
            control.state().await?,
            DaqState::Starting | DaqState::Paused | DaqState::Running
        ) {
            info!("stopping the DAQ");
            control.set_state(DaqState::Configured).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::sim::SimDaq;

    #[tokio::test]
    async fn test_start_requires_configured() {
        let daq = SimDaq::with_state(DaqState::Running);
        let lifecycle = DaqLifecycle::new(Arc::new(daq.clone()), None);

        let result = lifecycle.start().await;
        assert!(matches!(
            result,
            Err(ScanError::AcquisitionNotReady(DaqState::Running))
        ));
        // No transition was requested.
        assert!(daq.transitions().await.is_empty());
    }

    #[tokio::test]
    async fn test_start_sets_record_then_runs() {
        let daq = SimDaq::new();
        let lifecycle = DaqLifecycle::new(Arc::new(daq.clone()), Some(true));

        lifecycle.start().await.unwrap();
        assert_eq!(daq.record_flag().await, Some(true));
        assert_eq!(daq.state().await.unwrap(), DaqState::Running);
    }

    #[tokio::test]
    async fn test_start_without_record_flag_leaves_it_alone() {
        let daq = SimDaq::new();
        let lifecycle = DaqLifecycle::new(Arc::new(daq.clone()), None);

        lifecycle.start().await.unwrap();
        assert_eq!(daq.record_flag().await, None);
    }

    #[tokio::test]
    async fn test_ensure_ready_checks_without_transitions() {
        let daq = SimDaq::with_state(DaqState::Paused);
        let lifecycle = DaqLifecycle::new(Arc::new(daq.clone()), None);

        let result = lifecycle.ensure_ready().await;
        assert!(matches!(
            result,
            Err(ScanError::AcquisitionNotReady(DaqState::Paused))
        ));
        assert!(daq.transitions().await.is_empty());

        assert!(DaqLifecycle::disabled().ensure_ready().await.is_ok());
    }

    #[tokio::test]
    async fn test_stop_returns_own_run_to_configured() {
        for interim in [DaqState::Starting, DaqState::Paused, DaqState::Running] {
            let daq = SimDaq::new();
            let lifecycle = DaqLifecycle::new(Arc::new(daq.clone()), None);
            lifecycle.start().await.unwrap();
            // Operator-side transition mid-scan; still our run to stop.
            daq.set_state(interim).await.unwrap();

            lifecycle.stop().await.unwrap();
            assert_eq!(daq.state().await.unwrap(), DaqState::Configured);
        }
    }

    #[tokio::test]
    async fn test_stop_leaves_foreign_run_alone() {
        let daq = SimDaq::with_state(DaqState::Running);
        let lifecycle = DaqLifecycle::new(Arc::new(daq.clone()), None);

        assert!(lifecycle.start().await.is_err());
        lifecycle.stop().await.unwrap();

        // The foreign run is still going; nothing was transitioned.
        assert_eq!(daq.state().await.unwrap(), DaqState::Running);
        assert!(daq.transitions().await.is_empty());
    }

    #[tokio::test]
    async fn test_stop_is_noop_otherwise() {
        for state in [DaqState::Configured, DaqState::Error] {
            let daq = SimDaq::with_state(state);
            let lifecycle = DaqLifecycle::new(Arc::new(daq.clone()), None);
            lifecycle.stop().await.unwrap();
            assert_eq!(daq.state().await.unwrap(), state);
            assert!(daq.transitions().await.is_empty());
        }
    }

    #[tokio::test]
    async fn test_disabled_mode_touches_nothing() {
        let lifecycle = DaqLifecycle::disabled();
        assert!(!lifecycle.is_enabled());
        lifecycle.start().await.unwrap();
        lifecycle.stop().await.unwrap();
    }
}
