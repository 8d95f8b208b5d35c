//! Fixed-interval scheduler for periodic broadcasts.
//!
//! Bandwidth is bounded by the interval alone: a ticker fires at most once
//! per `advance`, however long the frame was, and carries the remainder so
//! the long-run rate stays exact.

#[derive(Debug, Clone)]
pub struct Ticker {
    interval: f32,
    accumulated: f32,
}

impl Ticker {
    /// A ticker firing every `interval` seconds. The first advance fires
    /// immediately so new state goes out without waiting a full period.
    pub fn new(interval: f32) -> Self {
        let interval = interval.max(f32::EPSILON);
        Self {
            interval,
            accumulated: interval,
        }
    }

    pub fn interval(&self) -> f32 {
        self.interval
    }

    /// Account for `dt` seconds. Returns `true` when the ticker fires.
    pub fn advance(&mut self, dt: f32) -> bool {
        self.accumulated += dt.max(0.0);
        if self.accumulated < self.interval {
            return false;
        }
        self.accumulated = (self.accumulated - self.interval).min(self.interval);
        true
    }

    /// Make the next `advance` fire regardless of elapsed time.
    pub fn trigger(&mut self) {
        self.accumulated = self.accumulated.max(self.interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_immediately_then_on_interval() {
        let mut t = Ticker::new(0.25);
        assert!(t.advance(0.0));
        assert!(!t.advance(0.1));
        assert!(!t.advance(0.1));
        assert!(t.advance(0.1));
    }

    #[test]
    fn long_frames_fire_once() {
        let mut t = Ticker::new(0.1);
        t.advance(0.0);
        assert!(t.advance(5.0));
        // Backlog is capped at one interval.
        assert!(t.advance(0.0));
        assert!(!t.advance(0.0));
    }

    #[test]
    fn rate_is_exact_over_many_frames() {
        let mut t = Ticker::new(0.25);
        t.advance(0.0);
        let fired = (0..400).filter(|_| t.advance(1.0 / 64.0)).count();
        // 400 / 64 = 6.25 s at 4 Hz.
        assert_eq!(fired, 25);
    }

    #[test]
    fn trigger_forces_next_fire() {
        let mut t = Ticker::new(10.0);
        t.advance(0.0);
        assert!(!t.advance(1.0));
        t.trigger();
        assert!(t.advance(0.0));
    }
}
