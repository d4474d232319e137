//! Fixed-timestep scheduling on an integer millisecond clock.
//!
//! Wall-clock time feeds a lag accumulator once per render iteration. At most
//! **one** logical tick is released per iteration: a backlog is carried over
//! instead of being caught up, so a slow machine falls behind real time rather
//! than spiralling into several updates per frame.
//!
//! The tick interval is `1000 / 60` truncated to 16ms. The resulting ~4% drift
//! against a true 60Hz is accepted.

use std::time::Instant;

/// Logical update rate in Hz.
pub const TICK_RATE: u32 = 60;

/// Fixed tick interval in milliseconds (integer-truncated).
pub const TICK_MS: u32 = 1000 / TICK_RATE;

/// Source of wall-clock milliseconds. Readings may wrap; only differences matter.
pub trait Clock {
    fn now_ms(&mut self) -> u32;
}

/// Monotonic clock measured from construction.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&mut self) -> u32 {
        // Truncation wraps after ~49 days; `wrapping_sub` in the scheduler absorbs it.
        self.origin.elapsed().as_millis() as u32
    }
}

pub struct FrameScheduler {
    previous_ms: u32,
    lag_ms: u32,
    stepped: bool,
}

impl FrameScheduler {
    pub fn new(start_ms: u32) -> Self {
        Self {
            previous_ms: start_ms,
            lag_ms: 0,
            stepped: false,
        }
    }

    /// Feed the wall time elapsed since the previous iteration into the accumulator.
    pub fn begin_frame(&mut self, now_ms: u32) {
        let elapsed = now_ms.wrapping_sub(self.previous_ms);
        self.previous_ms = now_ms;
        self.lag_ms = self.lag_ms.saturating_add(elapsed);
        self.stepped = false;

        if self.lag_ms >= TICK_MS * 4 {
            log::trace!(
                "Falling behind: {}ms of backlog ({} ticks)",
                self.lag_ms,
                self.lag_ms / TICK_MS
            );
        }
    }

    /// Release the frame's logical tick, if one is due. Returns true at most once
    /// between two `begin_frame` calls.
    pub fn should_step(&mut self) -> bool {
        if !self.stepped && self.lag_ms >= TICK_MS {
            self.lag_ms -= TICK_MS;
            self.stepped = true;
            true
        } else {
            false
        }
    }

    /// Fraction of the next tick already elapsed, handed to the draw call.
    /// Held just below 1.0 while a backlog is being carried.
    pub fn interpolation(&self) -> f64 {
        let fraction = self.lag_ms as f64 / TICK_MS as f64;
        fraction.min(1.0 - f64::EPSILON)
    }
}

/// Instantaneous frames per second for an iteration that took `iteration_ms`.
/// One millisecond is added to the denominator so a sub-millisecond frame stays finite.
pub fn instantaneous_fps(iteration_ms: u32) -> f64 {
    1000.0 / (iteration_ms as f64 + 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_interval_is_truncated_to_16ms() {
        assert_eq!(TICK_MS, 16);
    }

    #[test]
    fn first_iteration_has_no_tick() {
        let mut scheduler = FrameScheduler::new(1000);
        scheduler.begin_frame(1000);
        assert!(!scheduler.should_step());
        assert_eq!(scheduler.lag_ms, 0);
        assert_eq!(scheduler.interpolation(), 0.0);
    }

    #[test]
    fn exact_deltas_produce_one_tick_each_and_no_lag() {
        let mut scheduler = FrameScheduler::new(0);
        let mut now = 0;
        let mut ticks = 0;
        for _ in 0..100 {
            now += 16;
            scheduler.begin_frame(now);
            if scheduler.should_step() {
                ticks += 1;
            }
        }
        assert_eq!(ticks, 100);
        assert_eq!(scheduler.lag_ms, 0);
    }

    #[test]
    fn leftover_lag_sets_interpolation_fraction() {
        let mut scheduler = FrameScheduler::new(0);
        scheduler.begin_frame(24);
        assert!(scheduler.should_step());
        assert_eq!(scheduler.lag_ms, 8);
        assert!((scheduler.interpolation() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn backlog_is_not_caught_up_in_one_frame() {
        let mut scheduler = FrameScheduler::new(0);
        scheduler.begin_frame(100);
        assert!(scheduler.should_step());
        assert!(!scheduler.should_step());
        assert_eq!(scheduler.lag_ms, 84);
        assert!(scheduler.interpolation() < 1.0);

        // Backlog drains one tick per frame once the load goes away.
        scheduler.begin_frame(100);
        assert!(scheduler.should_step());
        assert_eq!(scheduler.lag_ms, 68);
    }

    #[test]
    fn arbitrary_deltas_keep_invariants() {
        let mut scheduler = FrameScheduler::new(0);
        let mut seed: u32 = 0x2545_f491;
        let mut now: u32 = 0;
        let mut total_elapsed: u64 = 0;
        let mut total_steps: u64 = 0;
        for _ in 0..10_000 {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let delta = seed % 40;
            now = now.wrapping_add(delta);
            total_elapsed += delta as u64;
            scheduler.begin_frame(now);

            let mut steps = 0;
            while scheduler.should_step() {
                steps += 1;
            }
            assert!(steps <= 1);
            total_steps += steps;
            let fraction = scheduler.interpolation();
            assert!((0.0..1.0).contains(&fraction));
        }
        assert_eq!(
            total_elapsed,
            total_steps * TICK_MS as u64 + scheduler.lag_ms as u64
        );
    }

    #[test]
    fn clock_wraparound_measures_forward_delta() {
        let mut scheduler = FrameScheduler::new(u32::MAX - 5);
        scheduler.begin_frame(10);
        assert_eq!(scheduler.lag_ms, 16);
        assert!(scheduler.should_step());
    }

    #[test]
    fn fps_has_one_millisecond_epsilon() {
        assert_eq!(instantaneous_fps(0), 1000.0);
        assert!((instantaneous_fps(15) - 62.5).abs() < 1e-9);
    }
}
