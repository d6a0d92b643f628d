//! Scan trajectory execution.
//!
//! The coordinator treats the sequencer as a black box: it hands over motion
//! points and an optional per-step hook and yields control until the
//! trajectory completes. [`StepSequencer`] is the built-in implementation;
//! deployments with their own execution engine implement [`Sequencer`]
//! instead.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::future::{try_join_all, BoxFuture};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{ScanError, ScanResult};
use crate::hardware::MotionAxis;

/// Hook run once per outer step, after the outer axes arrive.
///
/// For energy scans this performs one full end-to-end sweep of the grating.
pub type StepHook = Box<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// One outer axis with a start/stop range.
pub struct AxisRange {
    /// The axis to move.
    pub axis: Arc<dyn MotionAxis>,
    /// First position (absolute, or an offset for relative specs).
    pub start: f64,
    /// Last position (absolute, or an offset for relative specs).
    pub stop: f64,
}

/// One outer axis with an explicit point list.
pub struct AxisPoints {
    /// The axis to move.
    pub axis: Arc<dyn MotionAxis>,
    /// Positions to visit, in order.
    pub points: Vec<f64>,
}

/// One grid dimension.
pub struct AxisGrid {
    /// The axis to move.
    pub axis: Arc<dyn MotionAxis>,
    /// First position.
    pub start: f64,
    /// Last position.
    pub stop: f64,
    /// Number of points along this dimension.
    pub num: usize,
}

/// Outer motion for a multi-dimensional scan.
///
/// `Linear` and `Relative` move every axis through its own range in
/// lockstep; `Relative` offsets from each axis's position at scan start and
/// returns the axes there afterwards. `List` zips explicit per-axis point
/// lists. `Grid` walks the cartesian mesh with the first axis slowest,
/// optionally snaking the inner axes instead of resetting them each pass.
pub enum MotionSpec {
    /// Zipped start/stop ranges with a shared point count.
    Linear {
        /// Axes with their absolute ranges.
        axes: Vec<AxisRange>,
        /// Number of steps.
        num: usize,
    },
    /// Like `Linear`, but ranges are offsets from the current positions.
    Relative {
        /// Axes with their relative ranges.
        axes: Vec<AxisRange>,
        /// Number of steps.
        num: usize,
    },
    /// Zipped explicit point lists (all the same length).
    List {
        /// Axes with their point lists.
        axes: Vec<AxisPoints>,
    },
    /// Cartesian mesh, first axis slowest.
    Grid {
        /// Grid dimensions, slowest first.
        axes: Vec<AxisGrid>,
        /// Sweep inner axes back and forth instead of resetting.
        snake: bool,
    },
}

impl MotionSpec {
    /// Validate the spec before any hardware motion.
    ///
    /// Configuration problems (no axes, zero points, ragged lists) are fatal
    /// and must be raised before the scan starts moving anything.
    pub fn validate(&self) -> ScanResult<()> {
        let config = |msg: String| Err(ScanError::Config(msg));
        match self {
            MotionSpec::Linear { axes, num } | MotionSpec::Relative { axes, num } => {
                if axes.is_empty() {
                    return config("motion spec has no axes".into());
                }
                if *num == 0 {
                    return config("motion spec needs at least one step".into());
                }
            }
            MotionSpec::List { axes } => {
                if axes.is_empty() {
                    return config("motion spec has no axes".into());
                }
                let len = axes[0].points.len();
                if len == 0 {
                    return config("motion spec has an empty point list".into());
                }
                if axes.iter().any(|a| a.points.len() != len) {
                    return config("point lists must all be the same length".into());
                }
            }
            MotionSpec::Grid { axes, .. } => {
                if axes.is_empty() {
                    return config("motion spec has no axes".into());
                }
                if axes.iter().any(|a| a.num == 0) {
                    return config("every grid dimension needs at least one point".into());
                }
            }
        }
        Ok(())
    }
}

/// Black-box trajectory executor consumed by the scan coordinator.
#[async_trait]
pub trait Sequencer: Send + Sync {
    /// Oscillate `axis` across `points` repeatedly until `duration` elapses.
    async fn duration_scan(
        &self,
        axis: Arc<dyn MotionAxis>,
        points: Vec<f64>,
        duration: Duration,
    ) -> Result<()>;

    /// Walk the outer motion, running `per_step` at every step.
    async fn nd_scan(&self, motion: MotionSpec, per_step: StepHook) -> Result<()>;
}

/// Built-in step-at-a-time sequencer.
///
/// Moves the outer axes of each step concurrently, then runs the per-step
/// hook. Duration scans complete whole passes over the trajectory and check
/// the clock between passes.
#[derive(Debug, Default, Clone, Copy)]
pub struct StepSequencer;

impl StepSequencer {
    /// Create a sequencer.
    pub fn new() -> Self {
        Self
    }

    async fn run_rows(
        &self,
        axes: &[Arc<dyn MotionAxis>],
        rows: Vec<Vec<f64>>,
        per_step: &StepHook,
    ) -> Result<()> {
        for (step, row) in rows.iter().enumerate() {
            debug!(step, positions = ?row, "outer step");
            try_join_all(
                axes.iter()
                    .zip(row.iter())
                    .map(|(axis, &target)| axis.move_to(target)),
            )
            .await
            .with_context(|| format!("outer motion failed at step {step}"))?;
            per_step().await.with_context(|| format!("step {step} failed"))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Sequencer for StepSequencer {
    async fn duration_scan(
        &self,
        axis: Arc<dyn MotionAxis>,
        points: Vec<f64>,
        duration: Duration,
    ) -> Result<()> {
        if points.is_empty() {
            bail!("duration scan needs at least one point");
        }
        let deadline = Instant::now() + duration;
        let mut pass = 0usize;
        while Instant::now() < deadline {
            for &point in &points {
                axis.move_to(point)
                    .await
                    .with_context(|| format!("pass {pass}: move to {point} failed"))?;
            }
            pass += 1;
        }
        debug!(passes = pass, "duration elapsed");
        Ok(())
    }

    async fn nd_scan(&self, motion: MotionSpec, per_step: StepHook) -> Result<()> {
        motion.validate()?;
        match motion {
            MotionSpec::Linear { axes, num } => {
                let rows = zipped_rows(&axes, num);
                let axes: Vec<_> = axes.into_iter().map(|a| a.axis).collect();
                self.run_rows(&axes, rows, &per_step).await
            }
            MotionSpec::Relative { axes, num } => {
                let mut origins = Vec::with_capacity(axes.len());
                for range in &axes {
                    let Some(origin) = range.axis.position() else {
                        bail!(
                            "relative scan: {} has no known position",
                            range.axis.name()
                        );
                    };
                    origins.push(origin);
                }
                let rows: Vec<Vec<f64>> = (0..num)
                    .map(|i| {
                        axes.iter()
                            .zip(origins.iter())
                            .map(|(range, &origin)| {
                                origin + interpolate(range.start, range.stop, i, num)
                            })
                            .collect()
                    })
                    .collect();
                let axes: Vec<_> = axes.into_iter().map(|a| a.axis).collect();
                let result = self.run_rows(&axes, rows, &per_step).await;
                // Return every axis to where it started, even after a
                // failure, like a relative scan is expected to.
                for (axis, &origin) in axes.iter().zip(origins.iter()) {
                    if let Err(e) = axis.move_to(origin).await {
                        warn!(axis = axis.name(), "failed to restore position: {e:#}");
                    }
                }
                result
            }
            MotionSpec::List { axes } => {
                let steps = axes[0].points.len();
                let rows: Vec<Vec<f64>> = (0..steps)
                    .map(|i| axes.iter().map(|a| a.points[i]).collect())
                    .collect();
                let axes: Vec<_> = axes.into_iter().map(|a| a.axis).collect();
                self.run_rows(&axes, rows, &per_step).await
            }
            MotionSpec::Grid { axes, snake } => {
                let rows = mesh_rows(&axes, snake);
                let axes: Vec<_> = axes.into_iter().map(|a| a.axis).collect();
                self.run_rows(&axes, rows, &per_step).await
            }
        }
    }
}

/// Position `i` of `num` evenly spaced offsets across `[start, stop]`.
fn interpolate(start: f64, stop: f64, i: usize, num: usize) -> f64 {
    if num == 1 {
        return start;
    }
    start + (stop - start) * (i as f64) / ((num - 1) as f64)
}

/// Rows for zipped linear motion: every axis walks its own range in lockstep.
fn zipped_rows(axes: &[AxisRange], num: usize) -> Vec<Vec<f64>> {
    (0..num)
        .map(|i| {
            axes.iter()
                .map(|range| interpolate(range.start, range.stop, i, num))
                .collect()
        })
        .collect()
}

/// Rows for the cartesian mesh, first axis slowest. With `snake`, each inner
/// axis alternates direction on successive passes instead of flying back.
fn mesh_rows(axes: &[AxisGrid], snake: bool) -> Vec<Vec<f64>> {
    let mut rows: Vec<Vec<f64>> = vec![Vec::new()];
    for (dim, grid) in axes.iter().enumerate() {
        let points: Vec<f64> = (0..grid.num)
            .map(|i| interpolate(grid.start, grid.stop, i, grid.num))
            .collect();
        let mut expanded = Vec::with_capacity(rows.len() * points.len());
        for (pass, row) in rows.iter().enumerate() {
            let reverse = snake && dim > 0 && pass % 2 == 1;
            let ordered: Box<dyn Iterator<Item = &f64>> = if reverse {
                Box::new(points.iter().rev())
            } else {
                Box::new(points.iter())
            };
            for point in ordered {
                let mut next = row.clone();
                next.push(*point);
                expanded.push(next);
            }
        }
        rows = expanded;
    }
    rows
}
