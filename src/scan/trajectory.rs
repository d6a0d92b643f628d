//! Scan trajectory synthesis.
//!
//! Pure helpers that turn user-supplied bounds into the motion points a scan
//! oscillates over: bound resolution (energy or pitch, exactly one),
//! interior-step expansion with a mirrored partial return path, and rotation
//! of a stepped trajectory to start from the axis's current position.

use tracing::debug;

use crate::calib::MonoCalibration;
use crate::error::{ScanError, ScanResult};

/// Resolve the scan bounds in grating-pitch µrad.
///
/// Exactly one of `ev_bounds` / `urad_bounds` must be supplied. Pitch bounds
/// are used verbatim; energy bounds are converted through the calibration at
/// the given pre-mirror pitch and validated finite.
pub fn resolve_bounds(
    ev_bounds: Option<[f64; 2]>,
    urad_bounds: Option<[f64; 2]>,
    mirror_urad: f64,
    calib: &MonoCalibration,
) -> ScanResult<[f64; 2]> {
    match (ev_bounds, urad_bounds) {
        (None, None) => Err(ScanError::Config(
            "either ev_bounds or urad_bounds must be provided".into(),
        )),
        (Some(_), Some(_)) => Err(ScanError::Config(
            "provide ev_bounds or urad_bounds, not both".into(),
        )),
        (None, Some(urad)) => Ok(urad),
        (Some(ev), None) => {
            let mut urad = [0.0; 2];
            for (slot, &energy) in urad.iter_mut().zip(ev.iter()) {
                let pitch = calib.pitch_from_energy(energy, mirror_urad);
                if !pitch.is_finite() {
                    return Err(ScanError::CalibrationSingularity {
                        context: format!("pitch for {energy} eV"),
                        value: pitch,
                    });
                }
                *slot = pitch;
            }
            debug!(?ev, ?urad, mirror_urad, "resolved energy bounds");
            Ok(urad)
        }
    }
}

/// Expand two bounds into a stepped trajectory.
///
/// With `extra_steps > 0`, interpolates `extra_steps + 2` points across the
/// bounds and appends the interior points in reverse order, producing a
/// forward sweep plus its partial return path. With `extra_steps == 0` the
/// bounds come back unchanged (a pure two-point sweep).
pub fn expand(bounds: [f64; 2], extra_steps: usize) -> Vec<f64> {
    if extra_steps == 0 {
        return bounds.to_vec();
    }
    let total = extra_steps + 2;
    let span = bounds[1] - bounds[0];
    let mut points: Vec<f64> = (0..total)
        .map(|i| bounds[0] + span * (i as f64) / ((total - 1) as f64))
        .collect();
    // Interior points, excluding both ends, walked back.
    let returning: Vec<f64> = points[1..total - 1].iter().rev().copied().collect();
    points.extend(returning);
    points
}

/// Rotate a trajectory so the point nearest `current` comes first.
///
/// Avoids wasted travel to an arbitrary first point when the axis is already
/// in the middle of the trajectory. Only applied to stepped trajectories.
pub fn rebase_to_current(points: &[f64], current: f64) -> Vec<f64> {
    if points.is_empty() {
        return Vec::new();
    }
    let mut nearest = 0;
    let mut best = f64::INFINITY;
    for (i, &p) in points.iter().enumerate() {
        let dist = (p - current).abs();
        if dist < best {
            best = dist;
            nearest = i;
        }
    }
    let mut rotated = Vec::with_capacity(points.len());
    rotated.extend_from_slice(&points[nearest..]);
    rotated.extend_from_slice(&points[..nearest]);
    rotated
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIRROR: f64 = 143_253.0;

    fn assert_close(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len(), "{actual:?} vs {expected:?}");
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 0.01, "{actual:?} vs {expected:?}");
        }
    }

    #[test]
    fn test_resolve_requires_exactly_one_kind() {
        let calib = MonoCalibration::default();
        assert!(matches!(
            resolve_bounds(None, None, MIRROR, &calib),
            Err(ScanError::Config(_))
        ));
        assert!(matches!(
            resolve_bounds(
                Some([500.0, 600.0]),
                Some([150_000.0, 151_000.0]),
                MIRROR,
                &calib
            ),
            Err(ScanError::Config(_))
        ));
    }

    #[test]
    fn test_resolve_pitch_bounds_verbatim() {
        let calib = MonoCalibration::default();
        let bounds =
            resolve_bounds(None, Some([150_000.0, 151_000.0]), MIRROR, &calib).unwrap();
        assert_eq!(bounds, [150_000.0, 151_000.0]);
    }

    #[test]
    fn test_resolve_converts_energy_bounds() {
        let calib = MonoCalibration::default();
        let bounds = resolve_bounds(Some([500.0, 600.0]), None, MIRROR, &calib).unwrap();
        for (pitch, ev) in bounds.iter().zip([500.0, 600.0]) {
            assert!((calib.energy_from_pitch(*pitch, MIRROR) - ev).abs() < 0.01);
        }
    }

    #[test]
    fn test_resolve_rejects_unreachable_energy() {
        let calib = MonoCalibration::default();
        let result = resolve_bounds(Some([1.0, 600.0]), None, MIRROR, &calib);
        assert!(matches!(
            result,
            Err(ScanError::CalibrationSingularity { .. })
        ));
    }

    #[test]
    fn test_expand_zero_steps_unchanged() {
        assert_eq!(expand([0.0, 10.0], 0), vec![0.0, 10.0]);
    }

    #[test]
    fn test_expand_adds_mirrored_interior() {
        let points = expand([0.0, 10.0], 2);
        assert_close(&points, &[0.0, 3.33, 6.67, 10.0, 6.67, 3.33]);
    }

    #[test]
    fn test_expand_single_interior_step() {
        let points = expand([0.0, 10.0], 1);
        assert_close(&points, &[0.0, 5.0, 10.0, 5.0]);
    }

    #[test]
    fn test_rebase_rotates_to_nearest() {
        assert_eq!(rebase_to_current(&[0.0, 5.0, 10.0], 6.0), vec![5.0, 10.0, 0.0]);
        assert_eq!(rebase_to_current(&[0.0, 5.0, 10.0], 9.0), vec![10.0, 0.0, 5.0]);
        // Already nearest to the first point: unchanged order.
        assert_eq!(rebase_to_current(&[0.0, 5.0, 10.0], -3.0), vec![0.0, 5.0, 10.0]);
    }
}
