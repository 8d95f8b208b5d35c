//! Frame-rate independent smoothing for shadow entities.
//!
//! Receivers never jump straight to a reported position. Each tick the
//! displayed value moves toward the latest report by `1 - e^(-k·dt)` of the
//! remaining gap, unless the report is far enough away to count as a teleport.

use crate::types::Vec2;
use std::f32::consts::{PI, TAU};

/// Fraction of the remaining gap closed over `dt` seconds at rate `k`.
pub fn smoothing_factor(k: f32, dt: f32) -> f32 {
    if dt <= 0.0 || k <= 0.0 {
        return 0.0;
    }
    1.0 - (-k * dt).exp()
}

/// Wrap an angle into `(-PI, PI]`.
pub fn wrap_angle(a: f32) -> f32 {
    let wrapped = (a + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

/// Signed shortest rotation from `from` to `to`.
pub fn angle_delta(from: f32, to: f32) -> f32 {
    wrap_angle(to - from)
}

/// Move `from` toward `to` by `t` of the shortest arc. Never blends
/// numerically across the wrap point.
pub fn approach_angle(from: f32, to: f32, t: f32) -> f32 {
    wrap_angle(from + angle_delta(from, to) * t.clamp(0.0, 1.0))
}

/// Displayed vs. target state for one shadow entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Smoothed {
    pub displayed: Vec2,
    pub target: Vec2,
    pub displayed_heading: f32,
    pub target_heading: f32,
}

impl Smoothed {
    /// Start settled at `position`.
    pub fn at(position: Vec2, heading: f32) -> Self {
        Self {
            displayed: position,
            target: position,
            displayed_heading: heading,
            target_heading: heading,
        }
    }

    /// Accept a new report. Returns `true` when the report snapped.
    pub fn report(&mut self, position: Vec2, heading: f32, snap_distance: f32) -> bool {
        self.target = position;
        self.target_heading = heading;
        if self.displayed.distance(position) > snap_distance {
            self.displayed = position;
            self.displayed_heading = heading;
            return true;
        }
        false
    }

    /// Advance the displayed state toward the target.
    pub fn step(&mut self, k: f32, dt: f32) {
        let t = smoothing_factor(k, dt);
        self.displayed = self.displayed + (self.target - self.displayed) * t;
        self.displayed_heading = approach_angle(self.displayed_heading, self.target_heading, t);
    }

    pub fn is_settled(&self) -> bool {
        self.displayed.distance(self.target) < 1e-3
            && angle_delta(self.displayed_heading, self.target_heading).abs() < 1e-3
    }
}
