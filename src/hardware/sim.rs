//! Simulated hardware implementations.
//!
//! Stand-ins for the real beamline devices, used for dry runs and tests.
//! All simulated devices use async-safe operations (`tokio::time::sleep`,
//! never `std::thread::sleep`), so paused-clock tests run instantly.
//!
//! # Available simulators
//!
//! - [`SimulatedAxis`] - motion axis stepping toward its goal at a fixed
//!   cadence on a background task
//! - [`SimSignal`] - watch-backed scalar signal that records its writes
//! - [`SimDaq`] - in-memory acquisition state machine

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::sleep;
use tracing::debug;

use crate::hardware::{AcquisitionControl, DaqState, MotionAxis, ScalarSignal};

/// Default stepper cadence.
const DEFAULT_TICK: Duration = Duration::from_millis(100);

// =============================================================================
// SimulatedAxis
// =============================================================================

struct AxisInner {
    name: String,
    tick: Duration,
    position: watch::Sender<Option<f64>>,
    velocity: RwLock<f64>,
    settle: RwLock<Duration>,
    /// Stop flag of the in-flight move, if any.
    active: Mutex<Option<Arc<AtomicBool>>>,
}

/// Simulated motion axis.
///
/// Starts with no known position; the first commanded move sets the position
/// immediately. Subsequent moves advance the position toward the goal by
/// `velocity x tick` every tick (default 0.1 s) on a background task,
/// snapping to the goal once within one step. An external [`stop`] is
/// observed within one tick and fails the in-flight move.
///
/// Position updates are published through the watch channel before the move
/// future resolves, so a subscriber never sees "done" ahead of the position
/// that completed it.
///
/// [`stop`]: MotionAxis::stop
#[derive(Clone)]
pub struct SimulatedAxis {
    inner: Arc<AxisInner>,
}

impl SimulatedAxis {
    /// Create a new axis with unset position and the given velocity in
    /// units/sec.
    pub fn new(name: impl Into<String>, velocity: f64) -> Self {
        let (position, _) = watch::channel(None);
        Self {
            inner: Arc::new(AxisInner {
                name: name.into(),
                tick: DEFAULT_TICK,
                position,
                velocity: RwLock::new(velocity),
                settle: RwLock::new(Duration::ZERO),
                active: Mutex::new(None),
            }),
        }
    }

    /// Create an axis already at a known position.
    pub fn with_position(name: impl Into<String>, velocity: f64, position: f64) -> Self {
        let axis = Self::new(name, velocity);
        axis.inner.position.send_replace(Some(position));
        axis
    }

    /// Override the stepper cadence (default 0.1 s).
    pub fn with_tick(mut self, tick: Duration) -> Self {
        // Only reachable before the axis is shared.
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.tick = tick;
        }
        self
    }

    /// Cancel the in-flight move, if any, and install a fresh stop flag.
    async fn arm_move(&self) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        let mut active = self.inner.active.lock().await;
        if let Some(prev) = active.replace(flag.clone()) {
            prev.store(true, Ordering::Release);
        }
        flag
    }
}

#[async_trait]
impl MotionAxis for SimulatedAxis {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn position(&self) -> Option<f64> {
        *self.inner.position.borrow()
    }

    async fn move_to(&self, target: f64) -> Result<()> {
        match self.position() {
            // First commanded position lands immediately.
            None => {
                self.inner.position.send_replace(Some(target));
                return Ok(());
            }
            Some(current) if current == target => return Ok(()),
            Some(_) => {}
        }

        let stop = self.arm_move().await;
        let inner = self.inner.clone();
        let stepper = tokio::spawn(async move {
            loop {
                if stop.load(Ordering::Acquire) {
                    return false;
                }
                let current = inner.position.borrow().unwrap_or(target);
                let velocity = *inner.velocity.read().await;
                let step = if velocity > 0.0 {
                    velocity * inner.tick.as_secs_f64()
                } else {
                    1.0
                };
                let delta = target - current;
                if delta.abs() <= step {
                    // The last partial step still costs a tick, so even a
                    // short move takes nonzero simulated time.
                    sleep(inner.tick).await;
                    if stop.load(Ordering::Acquire) {
                        return false;
                    }
                    inner.position.send_replace(Some(target));
                    return true;
                }
                inner.position.send_replace(Some(current + step * delta.signum()));
                sleep(inner.tick).await;
            }
        });

        let arrived = stepper
            .await
            .map_err(|e| anyhow!("{}: stepper task failed: {e}", self.inner.name))?;
        if !arrived {
            return Err(anyhow!(
                "{}: move to {target} interrupted",
                self.inner.name
            ));
        }

        let settle = *self.inner.settle.read().await;
        if settle > Duration::ZERO {
            sleep(settle).await;
        }
        debug!(axis = %self.inner.name, target, "arrived");
        Ok(())
    }

    async fn stop(&self) {
        if let Some(flag) = self.inner.active.lock().await.take() {
            flag.store(true, Ordering::Release);
        }
    }

    async fn velocity(&self) -> Result<f64> {
        Ok(*self.inner.velocity.read().await)
    }

    async fn set_velocity(&self, velocity: f64) -> Result<()> {
        *self.inner.velocity.write().await = velocity;
        Ok(())
    }

    async fn set_settle_delay(&self, delay: Duration) -> Result<()> {
        *self.inner.settle.write().await = delay;
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<Option<f64>> {
        self.inner.position.subscribe()
    }
}

// =============================================================================
// SimSignal
// =============================================================================

/// Watch-backed scalar signal that records every accepted write.
///
/// The write history makes assertions about the energy-request stream easy in
/// tests and dry runs.
#[derive(Clone)]
pub struct SimSignal {
    name: Arc<String>,
    value: watch::Sender<f64>,
    writes: Arc<Mutex<Vec<f64>>>,
}

impl SimSignal {
    /// Create a signal holding an initial value.
    pub fn new(name: impl Into<String>, initial: f64) -> Self {
        let (value, _) = watch::channel(initial);
        Self {
            name: Arc::new(name.into()),
            value,
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// All values written so far, oldest first.
    pub async fn history(&self) -> Vec<f64> {
        self.writes.lock().await.clone()
    }
}

#[async_trait]
impl ScalarSignal for SimSignal {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self) -> Result<f64> {
        Ok(*self.value.borrow())
    }

    async fn write(&self, value: f64) -> Result<()> {
        self.writes.lock().await.push(value);
        self.value.send_replace(value);
        Ok(())
    }
}

// =============================================================================
// SimDaq
// =============================================================================

/// In-memory acquisition state machine.
#[derive(Clone)]
pub struct SimDaq {
    state: Arc<RwLock<DaqState>>,
    record: Arc<RwLock<Option<bool>>>,
    transitions: Arc<Mutex<Vec<DaqState>>>,
}

impl SimDaq {
    /// Create a session in the `configured` state.
    pub fn new() -> Self {
        Self::with_state(DaqState::Configured)
    }

    /// Create a session in an arbitrary starting state.
    pub fn with_state(state: DaqState) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
            record: Arc::new(RwLock::new(None)),
            transitions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Last record flag set, if any.
    pub async fn record_flag(&self) -> Option<bool> {
        *self.record.read().await
    }

    /// All state transitions requested so far, oldest first.
    pub async fn transitions(&self) -> Vec<DaqState> {
        self.transitions.lock().await.clone()
    }
}

impl Default for SimDaq {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AcquisitionControl for SimDaq {
    async fn state(&self) -> Result<DaqState> {
        Ok(*self.state.read().await)
    }

    async fn set_state(&self, target: DaqState) -> Result<()> {
        self.transitions.lock().await.push(target);
        *self.state.write().await = target;
        Ok(())
    }

    async fn set_record(&self, record: bool) -> Result<()> {
        *self.record.write().await = Some(record);
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test]
    async fn test_first_move_sets_position_immediately() {
        let axis = SimulatedAxis::new("sim", 10.0);
        assert_eq!(axis.position(), None);

        axis.move_to(150_000.0).await.unwrap();
        assert_eq!(axis.position(), Some(150_000.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_steps_at_velocity_and_terminates_at_goal() {
        let axis = SimulatedAxis::with_position("sim", 10.0, 0.0);

        let start = Instant::now();
        axis.move_to(25.0).await.unwrap();

        // velocity 10 x 0.1 s tick = 1 unit per tick, so 25 units is well
        // over three ticks of travel.
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert_eq!(axis.position(), Some(25.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_delay_extends_move() {
        let axis = SimulatedAxis::with_position("sim", 10.0, 0.0);
        axis.set_settle_delay(Duration::from_millis(500)).await.unwrap();

        let start = Instant::now();
        axis.move_to(1.0).await.unwrap();

        // One tick of travel plus the settle delay.
        assert!(start.elapsed() >= Duration::from_millis(600));
        assert_eq!(axis.position(), Some(1.0));
    }

    #[tokio::test]
    async fn test_move_to_current_position_is_noop() {
        let axis = SimulatedAxis::with_position("sim", 10.0, 5.0);
        axis.move_to(5.0).await.unwrap();
        assert_eq!(axis.position(), Some(5.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_fails_in_flight_move() {
        let axis = SimulatedAxis::with_position("sim", 10.0, 0.0);

        let mover = axis.clone();
        let handle = tokio::spawn(async move { mover.move_to(1000.0).await });

        tokio::time::sleep(Duration::from_millis(350)).await;
        axis.stop().await;

        let result = handle.await.unwrap();
        assert!(result.is_err());
        // Partway there, not at the goal.
        let position = axis.position().unwrap();
        assert!(position > 0.0 && position < 1000.0, "at {position}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_move_cancels_previous() {
        let axis = SimulatedAxis::with_position("sim", 10.0, 0.0);

        let mover = axis.clone();
        let first = tokio::spawn(async move { mover.move_to(1000.0).await });
        tokio::time::sleep(Duration::from_millis(250)).await;

        axis.move_to(axis.position().unwrap() + 2.0).await.unwrap();
        assert!(first.await.unwrap().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_position_visible_before_done() {
        let axis = SimulatedAxis::with_position("sim", 10.0, 0.0);
        let rx = axis.subscribe();

        axis.move_to(3.0).await.unwrap();
        // The subscriber must already see the final position once the move
        // has reported done.
        assert_eq!(*rx.borrow(), Some(3.0));
    }

    #[tokio::test]
    async fn test_sim_signal_records_writes() {
        let signal = SimSignal::new("energy_request", 0.0);
        signal.write(500.0).await.unwrap();
        signal.write(510.0).await.unwrap();

        assert_eq!(signal.read().await.unwrap(), 510.0);
        assert_eq!(signal.history().await, vec![500.0, 510.0]);
    }

    #[tokio::test]
    async fn test_sim_daq_tracks_transitions() {
        let daq = SimDaq::new();
        assert_eq!(daq.state().await.unwrap(), DaqState::Configured);

        daq.set_record(true).await.unwrap();
        daq.set_state(DaqState::Running).await.unwrap();

        assert_eq!(daq.record_flag().await, Some(true));
        assert_eq!(daq.transitions().await, vec![DaqState::Running]);
    }
}
