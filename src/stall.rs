//! Stall factor for sections that are streamed in late.
//!
//! While an animation's section data is missing the pose comes from the
//! zeroframe cache alone. Once the data arrives the cache keeps being
//! cross-faded in for a short while so the switch isn't visible.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::math::simple_spline;

/// How long the cache keeps fading out after the data becomes resident.
pub const STALL_FADE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StallTracker {
    missing_since: Option<Instant>,
}

impl StallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_stalled(&self) -> bool {
        self.missing_since.is_some()
    }

    /// Record whether the data was resident at `now` and return the stall
    /// factor for the current decode: 1.0 while missing, easing down to 0.0
    /// over [`STALL_FADE`] once it is back.
    pub fn observe(&mut self, resident: bool, now: Instant) -> f32 {
        if !resident {
            if self.missing_since.is_none() {
                debug!("animation data missing, decoding from the zeroframe cache");
            }
            self.missing_since = Some(now);
            return 1.0;
        }

        let Some(since) = self.missing_since else { return 0.0 };
        // a time before the stall was recorded counts as no stall
        let stall = match now.checked_duration_since(since) {
            Some(elapsed) => {
                let remaining = (STALL_FADE.as_secs_f32() - elapsed.as_secs_f32()) / STALL_FADE.as_secs_f32();
                simple_spline(remaining.clamp(0.0, 1.0))
            }
            None => 0.0,
        };
        if stall <= 0.0 {
            self.missing_since = None;
        }
        stall
    }
}
