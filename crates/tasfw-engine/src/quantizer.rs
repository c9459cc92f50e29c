//! Mapping a desired facing yaw onto a raw controller stick coordinate.
//!
//! The simulation processes the raw stick before turning it into an intended
//! direction:
//!
//! 1. Each axis inside the deadzone (`|v| < 8`) becomes 0, every other value
//!    is pulled 6 units towards 0.
//! 2. The adjusted vector is clipped to magnitude 64.
//! 3. The intended yaw is `atan2(x, -y)` in 16-bit angle units, offset by the
//!    camera yaw.
//!
//! [`quantize`] searches every raw coordinate and returns the one whose
//! intended yaw is closest to the target. It is a pure function of its
//! [`StickQuery`].
//!
//! # Tie-breaking
//!
//! Candidates are ranked by, in order:
//!
//! - absolute angular error,
//! - the side preferred by [`TieBreak`] (yaw grows counter-clockwise),
//! - larger magnitude,
//! - lowest raw `x`, then lowest raw `y`.
//!
//! so equal queries always return the same coordinate.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Largest stick magnitude after processing.
pub const MAX_MAGNITUDE: f32 = 64.0;

const DEADZONE: i32 = 8;
const DEADZONE_PULL: i32 = 6;

// ---------------------------------------------------------------------------
// Query / result
// ---------------------------------------------------------------------------

/// Which side of the target wins when two candidates are equally close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TieBreak {
    /// Prefer a yaw clockwise of the target (smaller yaw).
    Clockwise,
    /// Prefer a yaw counter-clockwise of the target (larger yaw).
    CounterClockwise,
}

/// Parameters of one quantization.
#[derive(Debug, Clone, PartialEq)]
pub struct StickQuery {
    /// Desired intended yaw.
    pub target_yaw: i16,
    /// Camera yaw the stick is relative to.
    pub camera_yaw: i16,
    /// Candidates whose processed magnitude exceeds this are skipped.
    pub max_magnitude: f32,
    /// Mandatory tie-break policy.
    pub tie_break: TieBreak,
    /// Reject candidates whose error exceeds this many angle units.
    pub tolerance: Option<u16>,
    /// Raw coordinates that may not be chosen.
    pub exclude: HashSet<(i8, i8)>,
}

impl StickQuery {
    /// Full-magnitude query with no tolerance or exclusions.
    pub fn new(target_yaw: i16, camera_yaw: i16, tie_break: TieBreak) -> Self {
        Self {
            target_yaw,
            camera_yaw,
            max_magnitude: MAX_MAGNITUDE,
            tie_break,
            tolerance: None,
            exclude: HashSet::new(),
        }
    }
}

/// The chosen raw coordinate and what the simulation will make of it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StickChoice {
    /// Raw stick X to write into the controller.
    pub stick_x: i8,
    /// Raw stick Y to write into the controller.
    pub stick_y: i8,
    /// Resulting intended yaw.
    pub yaw: i16,
    /// Signed error `yaw - target`, wrapped to the shortest arc.
    pub error: i32,
    /// Processed magnitude in `0.0..=64.0`.
    pub magnitude: f32,
}

// ---------------------------------------------------------------------------
// Stick processing
// ---------------------------------------------------------------------------

fn adjust_axis(v: i32) -> i32 {
    if v >= DEADZONE {
        v - DEADZONE_PULL
    } else if v <= -DEADZONE {
        v + DEADZONE_PULL
    } else {
        0
    }
}

/// Raw stick to the adjusted (pre-clip) vector.
pub fn adjust_stick(stick_x: i8, stick_y: i8) -> (i32, i32) {
    (adjust_axis(stick_x.into()), adjust_axis(stick_y.into()))
}

/// Processed magnitude of a raw stick coordinate.
pub fn stick_magnitude(stick_x: i8, stick_y: i8) -> f32 {
    let (x, y) = adjust_stick(stick_x, stick_y);
    ((x * x + y * y) as f32).sqrt().min(MAX_MAGNITUDE)
}

/// Intended yaw for a raw stick coordinate, or `None` inside the deadzone.
pub fn intended_yaw(stick_x: i8, stick_y: i8, camera_yaw: i16) -> Option<i16> {
    let (x, y) = adjust_stick(stick_x, stick_y);
    if x == 0 && y == 0 {
        return None;
    }
    let angle = f64::from(x).atan2(f64::from(-y));
    let units = (angle * 32768.0 / std::f64::consts::PI).round() as i32;
    Some((units as i16).wrapping_add(camera_yaw))
}

/// Signed shortest-arc difference `a - b`.
pub fn yaw_delta(a: i16, b: i16) -> i32 {
    i32::from(a.wrapping_sub(b))
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

fn rank(a: &StickChoice, b: &StickChoice, tie_break: TieBreak) -> Ordering {
    let side = |c: &StickChoice| -> u8 {
        let preferred = match tie_break {
            TieBreak::Clockwise => c.error <= 0,
            TieBreak::CounterClockwise => c.error >= 0,
        };
        u8::from(!preferred)
    };
    a.error
        .abs()
        .cmp(&b.error.abs())
        .then_with(|| side(a).cmp(&side(b)))
        .then_with(|| b.magnitude.total_cmp(&a.magnitude))
        .then_with(|| a.stick_x.cmp(&b.stick_x))
        .then_with(|| a.stick_y.cmp(&b.stick_y))
}

/// The best raw stick coordinate for `query`, or `None` if every
/// coordinate is excluded, too strong, or outside the tolerance.
pub fn quantize(query: &StickQuery) -> Option<StickChoice> {
    let mut best: Option<StickChoice> = None;

    for stick_x in i8::MIN..=i8::MAX {
        for stick_y in i8::MIN..=i8::MAX {
            if query.exclude.contains(&(stick_x, stick_y)) {
                continue;
            }
            let Some(yaw) = intended_yaw(stick_x, stick_y, query.camera_yaw) else {
                continue;
            };
            let magnitude = stick_magnitude(stick_x, stick_y);
            if magnitude > query.max_magnitude {
                continue;
            }
            let error = yaw_delta(yaw, query.target_yaw);
            if query
                .tolerance
                .is_some_and(|t| error.unsigned_abs() > u32::from(t))
            {
                continue;
            }

            let candidate = StickChoice {
                stick_x,
                stick_y,
                yaw,
                error,
                magnitude,
            };
            let better = match &best {
                None => true,
                Some(current) => rank(&candidate, current, query.tie_break) == Ordering::Less,
            };
            if better {
                best = Some(candidate);
            }
        }
    }

    best
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- 1. Stick processing ------------------------------------------------

    #[test]
    fn deadzone_and_pull() {
        assert_eq!(adjust_stick(7, -7), (0, 0));
        assert_eq!(adjust_stick(8, -8), (2, -2));
        assert_eq!(adjust_stick(127, -128), (121, -122));
        assert_eq!(intended_yaw(3, 3, 0), None);
    }

    #[test]
    fn cardinal_directions() {
        // Pulling down faces the camera's own yaw, pushing up faces away.
        assert_eq!(intended_yaw(0, -64, 0), Some(0));
        assert_eq!(intended_yaw(0, 64, 0), Some(i16::MIN));
        assert_eq!(intended_yaw(64, 0, 0), Some(0x4000));
        assert_eq!(intended_yaw(-64, 0, 0), Some(-0x4000));
        assert_eq!(intended_yaw(0, -64, 0x1000), Some(0x1000));
    }

    #[test]
    fn magnitude_is_clipped() {
        assert_eq!(stick_magnitude(127, 127), MAX_MAGNITUDE);
        assert_eq!(stick_magnitude(38, 0), 32.0);
    }

    // -- 2. Exact hits ------------------------------------------------------

    #[test]
    fn exact_cardinal_target_prefers_full_magnitude() {
        let choice = quantize(&StickQuery::new(0x4000, 0, TieBreak::Clockwise)).unwrap();
        assert_eq!(choice.error, 0);
        assert_eq!(choice.yaw, 0x4000);
        assert_eq!(choice.magnitude, MAX_MAGNITUDE);
        // Every x >= 70 reaches full magnitude and every |y| < 8 is dead;
        // the lowest coordinate wins.
        assert_eq!((choice.stick_x, choice.stick_y), (70, -7));
    }

    #[test]
    fn camera_yaw_offsets_target() {
        let choice = quantize(&StickQuery::new(0x2000, 0x2000, TieBreak::Clockwise)).unwrap();
        assert_eq!(choice.error, 0);
        let (x, y) = adjust_stick(choice.stick_x, choice.stick_y);
        assert_eq!(x, 0);
        assert!(y < 0);
        assert_eq!(choice.magnitude, MAX_MAGNITUDE);
    }

    // -- 3. Tie-break -------------------------------------------------------

    fn straddling_query(tie_break: TieBreak) -> StickQuery {
        // With every deadzone x excluded, facing straight at the camera is
        // unreachable and the two nearest coordinates sit symmetrically on
        // either side of it.
        let mut query = StickQuery::new(0, 0, tie_break);
        for x in -7..=7 {
            for y in i8::MIN..=i8::MAX {
                query.exclude.insert((x, y));
            }
        }
        query
    }

    #[test]
    fn tie_break_picks_requested_side() {
        let cw = quantize(&straddling_query(TieBreak::Clockwise)).unwrap();
        let ccw = quantize(&straddling_query(TieBreak::CounterClockwise)).unwrap();

        assert_eq!(cw.error.abs(), ccw.error.abs());
        assert!(cw.error < 0, "clockwise choice should lie below the target");
        assert!(ccw.error > 0);
        assert_eq!(cw.stick_x, -ccw.stick_x);
        assert_eq!(cw.stick_y, ccw.stick_y);
        assert_eq!(cw.yaw, -ccw.yaw);
    }

    #[test]
    fn tie_break_is_deterministic() {
        let query = straddling_query(TieBreak::CounterClockwise);
        let first = quantize(&query);
        for _ in 0..3 {
            assert_eq!(quantize(&query), first);
        }
    }

    // -- 4. Constraints -----------------------------------------------------

    #[test]
    fn magnitude_bound_limits_choice() {
        let mut query = StickQuery::new(0x4000, 0, TieBreak::Clockwise);
        query.max_magnitude = 10.0;
        let choice = quantize(&query).unwrap();
        assert!(choice.magnitude <= 10.0);
        assert_eq!(choice.stick_x, 16);
    }

    #[test]
    fn tolerance_can_reject_everything() {
        let mut query = straddling_query(TieBreak::Clockwise);
        query.tolerance = Some(10);
        assert_eq!(quantize(&query), None);
    }
}
