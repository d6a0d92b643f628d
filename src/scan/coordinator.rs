//! Scan composition and lifecycle.
//!
//! `ScanCoordinator` glues the trajectory helpers, the energy request
//! handler, the acquisition bracket, and the sequencer into the two scan
//! families: duration (fly/stepped oscillation) scans and multi-dimensional
//! scans with one full energy sweep per outer step.
//!
//! The lifecycle is staged: `Idle -> Setup -> Running -> Teardown ->
//! Done/Error`. Teardown runs unconditionally once the axis velocity has
//! been snapshotted - energy requests stop, the DAQ returns to `configured`,
//! the original velocity is restored - and the originating failure
//! propagates unmodified afterwards.

use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::calib::MonoCalibration;
use crate::error::{ScanError, ScanResult};
use crate::hardware::{AcquisitionControl, MotionAxis, ScalarSignal};
use crate::scan::daq::DaqLifecycle;
use crate::scan::energy_request::{EnergyRequestHandler, DEFAULT_TOLERANCE_EV};
use crate::scan::sequencer::{MotionSpec, Sequencer, StepHook};
use crate::scan::trajectory;

/// Explicitly constructed bundle of the devices a scan touches.
///
/// Passed in rather than discovered, so nothing about a scan depends on
/// process-wide state.
#[derive(Clone)]
pub struct ScanDevices {
    /// The grating pitch axis (µrad).
    pub grating: Arc<dyn MotionAxis>,
    /// Pre-mirror pitch readback (µrad), re-read on every energy update.
    pub pre_mirror: Arc<dyn ScalarSignal>,
    /// Energy request destination (eV), written fire-and-forget.
    pub energy_request: Arc<dyn ScalarSignal>,
    /// Acquisition control; `None` means no DAQ is wired at all.
    pub acquisition: Option<Arc<dyn AcquisitionControl>>,
}

/// Parameters for a duration (fly or stepped oscillation) scan.
#[derive(Debug, Clone)]
pub struct DurationScanParams {
    /// Scan bounds in eV. Provide either this or `urad_bounds`, not both.
    pub ev_bounds: Option<[f64; 2]>,
    /// Scan bounds in grating µrad. Provide either this or `ev_bounds`.
    pub urad_bounds: Option<[f64; 2]>,
    /// How long to keep oscillating across the trajectory.
    pub duration: Duration,
    /// Grating speed during the sweep, µrad/sec.
    pub grating_speed: f64,
    /// Extra interior steps between the bounds (0 = pure fly scan).
    pub extra_steps: usize,
    /// Settle delay applied to the grating for the scan.
    pub settle: Duration,
    /// Whether the DAQ records this run.
    pub record: bool,
    /// Run without touching the DAQ when false.
    pub use_acquisition: bool,
}

impl Default for DurationScanParams {
    fn default() -> Self {
        Self {
            ev_bounds: None,
            urad_bounds: None,
            duration: Duration::ZERO,
            grating_speed: 0.5,
            extra_steps: 0,
            settle: Duration::ZERO,
            record: true,
            use_acquisition: true,
        }
    }
}

/// Parameters for a multi-dimensional scan (outer motion supplied
/// separately as a [`MotionSpec`]).
#[derive(Debug, Clone)]
pub struct NdScanParams {
    /// Energy sweep bounds in eV. Provide either this or `urad_bounds`.
    pub ev_bounds: Option<[f64; 2]>,
    /// Energy sweep bounds in grating µrad.
    pub urad_bounds: Option<[f64; 2]>,
    /// Grating speed during each sweep, µrad/sec.
    pub grating_speed: f64,
    /// Whether the DAQ records this run.
    pub record: bool,
    /// Run without touching the DAQ when false.
    pub use_acquisition: bool,
}

impl Default for NdScanParams {
    fn default() -> Self {
        Self {
            ev_bounds: None,
            urad_bounds: None,
            grating_speed: 0.5,
            record: true,
            use_acquisition: true,
        }
    }
}

/// Scan lifecycle phase, observable for dashboards and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    /// No scan in progress.
    Idle,
    /// Validating bounds and positioning the axis; no acquisition yet.
    Setup,
    /// Sequencer owns the trajectory; energy requests and DAQ live.
    Running,
    /// Unstaging resources, unconditionally.
    Teardown,
    /// Last scan completed.
    Done,
    /// Last scan failed; the error was propagated after teardown.
    Error,
}

/// Composes trajectory, energy tracking, acquisition, and sequencing into
/// complete scans.
///
/// One coordinator drives one grating axis; running two scans concurrently
/// against the same axis is a caller error, not defended against.
pub struct ScanCoordinator {
    devices: ScanDevices,
    calib: MonoCalibration,
    sequencer: Arc<dyn Sequencer>,
    request_tolerance_ev: f64,
    phase: watch::Sender<ScanPhase>,
}

impl ScanCoordinator {
    /// Create a coordinator with the default energy-request tolerance.
    pub fn new(
        devices: ScanDevices,
        calib: MonoCalibration,
        sequencer: Arc<dyn Sequencer>,
    ) -> Self {
        let (phase, _) = watch::channel(ScanPhase::Idle);
        Self {
            devices,
            calib,
            sequencer,
            request_tolerance_ev: DEFAULT_TOLERANCE_EV,
            phase,
        }
    }

    /// Override the energy-request tolerance in eV (0 forwards every update).
    pub fn with_request_tolerance(mut self, tolerance_ev: f64) -> Self {
        self.request_tolerance_ev = tolerance_ev;
        self
    }

    /// Subscribe to lifecycle phase changes.
    pub fn phase(&self) -> watch::Receiver<ScanPhase> {
        self.phase.subscribe()
    }

    fn set_phase(&self, phase: ScanPhase) {
        debug!(?phase, "scan phase");
        self.phase.send_replace(phase);
    }

    /// Oscillate the grating across the bounds for a fixed duration while
    /// energy requests track the motion.
    ///
    /// With `extra_steps > 0` the bounds expand into a stepped trajectory,
    /// rotated to start from the point nearest the current position.
    pub async fn run_duration_scan(&self, params: DurationScanParams) -> ScanResult<()> {
        self.set_phase(ScanPhase::Setup);
        let bounds = self
            .resolve(params.ev_bounds, params.urad_bounds)
            .await
            .map_err(|e| self.fail(e))?;
        let mut points = trajectory::expand(bounds, params.extra_steps);
        if params.extra_steps > 0 {
            if let Some(current) = self.devices.grating.position() {
                points = trajectory::rebase_to_current(&points, current);
            }
        }
        debug!(?points, "scan trajectory");

        let daq = self.daq(params.record, params.use_acquisition);
        let handler =
            EnergyRequestHandler::with_tolerance(self.calib, self.request_tolerance_ev);

        // From here on teardown must run no matter what.
        let original_velocity = self
            .devices
            .grating
            .velocity()
            .await
            .map_err(|e| self.fail(ScanError::Device(e)))?;

        let result = self
            .duration_body(&params, &points, &daq, &handler)
            .await;
        self.finish(result, &handler, &daq, original_velocity).await
    }

    /// Walk an outer motion spec, performing one full end-to-end energy
    /// sweep at every step.
    pub async fn run_nd_scan(&self, outer: MotionSpec, params: NdScanParams) -> ScanResult<()> {
        self.set_phase(ScanPhase::Setup);
        // All configuration checks come before any motion.
        outer.validate().map_err(|e| self.fail(e))?;
        let bounds = self
            .resolve(params.ev_bounds, params.urad_bounds)
            .await
            .map_err(|e| self.fail(e))?;

        let daq = self.daq(params.record, params.use_acquisition);
        let handler =
            EnergyRequestHandler::with_tolerance(self.calib, self.request_tolerance_ev);

        let original_velocity = self
            .devices
            .grating
            .velocity()
            .await
            .map_err(|e| self.fail(ScanError::Device(e)))?;

        let result = self.nd_body(outer, &params, bounds, &daq, &handler).await;
        self.finish(result, &handler, &daq, original_velocity).await
    }

    async fn duration_body(
        &self,
        params: &DurationScanParams,
        points: &[f64],
        daq: &DaqLifecycle,
        handler: &EnergyRequestHandler,
    ) -> ScanResult<()> {
        // A busy acquisition refuses the scan before any motion command.
        daq.ensure_ready().await?;
        self.setup_grating(points[0], params.grating_speed, params.settle)
            .await?;

        self.set_phase(ScanPhase::Running);
        daq.start().await?;
        handler.start(
            &*self.devices.grating,
            self.devices.pre_mirror.clone(),
            self.devices.energy_request.clone(),
        );

        self.sequencer
            .duration_scan(
                self.devices.grating.clone(),
                points.to_vec(),
                params.duration,
            )
            .await?;
        Ok(())
    }

    async fn nd_body(
        &self,
        outer: MotionSpec,
        params: &NdScanParams,
        bounds: [f64; 2],
        daq: &DaqLifecycle,
        handler: &EnergyRequestHandler,
    ) -> ScanResult<()> {
        // A busy acquisition refuses the scan before any motion command.
        daq.ensure_ready().await?;
        self.setup_grating(bounds[0], params.grating_speed, Duration::ZERO)
            .await?;

        self.set_phase(ScanPhase::Running);
        daq.start().await?;
        handler.start(
            &*self.devices.grating,
            self.devices.pre_mirror.clone(),
            self.devices.energy_request.clone(),
        );

        // One full end-to-end sweep of the energy axis per outer step.
        let grating = self.devices.grating.clone();
        let hook: StepHook = Box::new(move || {
            let grating = grating.clone();
            async move {
                grating.move_to(bounds[1]).await?;
                grating.move_to(bounds[0]).await?;
                Ok(())
            }
            .boxed()
        });

        self.sequencer.nd_scan(outer, hook).await?;
        Ok(())
    }

    /// Pre-scan axis staging, in order: settle delay, approach the first
    /// point at the current velocity, then apply the scan speed.
    async fn setup_grating(
        &self,
        first_point: f64,
        grating_speed: f64,
        settle: Duration,
    ) -> ScanResult<()> {
        let grating = &self.devices.grating;
        info!(?settle, "setting step settle delay");
        grating.set_settle_delay(settle).await?;
        info!(first_point, "moving to the start position");
        grating
            .move_to(first_point)
            .await
            .map_err(|e| ScanError::Motion(format!("approach to {first_point} failed: {e:#}")))?;
        info!(grating_speed, "setting grating speed");
        grating.set_velocity(grating_speed).await?;
        Ok(())
    }

    /// Unconditional teardown, then propagate the scan body's result.
    ///
    /// Teardown order: stop energy requests, stop the DAQ, restore the
    /// snapshotted velocity. A teardown failure is logged and only surfaced
    /// when the body itself succeeded.
    async fn finish(
        &self,
        result: ScanResult<()>,
        handler: &EnergyRequestHandler,
        daq: &DaqLifecycle,
        original_velocity: f64,
    ) -> ScanResult<()> {
        self.set_phase(ScanPhase::Teardown);
        handler.stop();

        let mut teardown_err: Option<ScanError> = None;
        if let Err(e) = daq.stop().await {
            error!("teardown: failed to stop the DAQ: {e}");
            teardown_err.get_or_insert(e);
        }
        if let Err(e) = self.devices.grating.set_velocity(original_velocity).await {
            error!("teardown: failed to restore velocity: {e:#}");
            teardown_err.get_or_insert(ScanError::Device(e));
        }

        match (result, teardown_err) {
            (Ok(()), None) => {
                self.set_phase(ScanPhase::Done);
                Ok(())
            }
            (Ok(()), Some(td)) => {
                self.set_phase(ScanPhase::Error);
                Err(td)
            }
            // The originating failure wins over any teardown failure.
            (Err(e), _) => {
                self.set_phase(ScanPhase::Error);
                Err(e)
            }
        }
    }

    fn fail(&self, e: ScanError) -> ScanError {
        self.set_phase(ScanPhase::Error);
        e
    }

    fn daq(&self, record: bool, use_acquisition: bool) -> DaqLifecycle {
        match (&self.devices.acquisition, use_acquisition) {
            (Some(control), true) => DaqLifecycle::new(control.clone(), Some(record)),
            _ => DaqLifecycle::disabled(),
        }
    }

    async fn resolve(
        &self,
        ev_bounds: Option<[f64; 2]>,
        urad_bounds: Option<[f64; 2]>,
    ) -> ScanResult<[f64; 2]> {
        // The pre-mirror is only consulted when energy bounds need
        // converting.
        let mirror_urad = if ev_bounds.is_some() {
            self.devices.pre_mirror.read().await?
        } else {
            0.0
        };
        trajectory::resolve_bounds(ev_bounds, urad_bounds, mirror_urad, &self.calib)
    }
}
