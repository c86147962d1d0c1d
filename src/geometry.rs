//! Planar vector math shared by collision, steering, combat and AI.

use std::f32::consts::{PI, TAU};
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn from_angle(angle: f32) -> Self {
        Self::new(angle.cos(), angle.sin())
    }

    pub fn length(self) -> f32 {
        self.length_sq().sqrt()
    }

    pub fn length_sq(self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    pub fn distance(self, other: Self) -> f32 {
        (self - other).length()
    }

    pub fn distance_sq(self, other: Self) -> f32 {
        (self - other).length_sq()
    }

    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y
    }

    pub fn angle(self) -> f32 {
        self.y.atan2(self.x)
    }

    pub fn normalize_or_zero(self) -> Self {
        let len = self.length();
        if len <= f32::EPSILON || !len.is_finite() {
            return Self::ZERO;
        }
        Self::new(self.x / len, self.y / len)
    }

    /// Counter-clockwise perpendicular.
    pub fn perp(self) -> Self {
        Self::new(-self.y, self.x)
    }

    pub fn rotate(self, angle: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self::new(self.x * cos - self.y * sin, self.x * sin + self.y * cos)
    }

    pub fn clamp_length(self, max: f32) -> Self {
        let len = self.length();
        if len > max && len > 0.0 {
            self * (max / len)
        } else {
            self
        }
    }

    pub fn lerp(self, other: Self, t: f32) -> Self {
        self + (other - self) * t
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Moves toward `target` by at most `max_step` without overshooting.
    pub fn move_toward(self, target: Self, max_step: f32) -> Self {
        let delta = target - self;
        let dist = delta.length();
        if dist <= max_step || dist <= f32::EPSILON {
            return target;
        }
        self + delta * (max_step / dist)
    }
}

impl Add for Vec2 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Vec2 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl SubAssign for Vec2 {
    fn sub_assign(&mut self, rhs: Self) {
        self.x -= rhs.x;
        self.y -= rhs.y;
    }
}

impl Mul<f32> for Vec2 {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl Neg for Vec2 {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

/// Wraps an angle into `(-PI, PI]`.
pub fn wrap_angle(angle: f32) -> f32 {
    let a = (angle + PI).rem_euclid(TAU) - PI;
    if a <= -PI {
        a + TAU
    } else {
        a.min(PI)
    }
}

/// Rotates `current` toward `target` by at most `max_step` radians.
pub fn rotate_toward(current: f32, target: f32, max_step: f32) -> f32 {
    let diff = wrap_angle(target - current);
    if diff.abs() <= max_step {
        wrap_angle(target)
    } else {
        wrap_angle(current + max_step * diff.signum())
    }
}

/// Parameter `t` in `[0, 1]` of the first point where segment `a -> b`
/// enters a circle, or `None` if it misses. A segment starting inside the
/// circle reports `t = 0`.
pub fn segment_circle_entry(a: Vec2, b: Vec2, center: Vec2, radius: f32) -> Option<f32> {
    let d = b - a;
    let m = a - center;
    let c = m.length_sq() - radius * radius;
    if c <= 0.0 {
        return Some(0.0);
    }
    let dd = d.length_sq();
    if dd <= f32::EPSILON {
        return None;
    }
    let bq = m.dot(d);
    if bq > 0.0 {
        return None;
    }
    let disc = bq * bq - dd * c;
    if disc < 0.0 {
        return None;
    }
    let t = (-bq - disc.sqrt()) / dd;
    if (0.0..=1.0).contains(&t) {
        Some(t)
    } else {
        None
    }
}

pub fn point_segment_distance_sq(p: Vec2, a: Vec2, b: Vec2) -> f32 {
    let ab = b - a;
    let len_sq = ab.length_sq();
    if len_sq <= f32::EPSILON {
        return p.distance_sq(a);
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    p.distance_sq(a + ab * t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_angle_stays_in_half_open_range() {
        // Odd multiples of PI land on the seam; rounding may pick either side.
        for odd in [PI, -PI, 3.0 * PI, -3.0 * PI, 101.0 * PI] {
            let w = wrap_angle(odd);
            assert!(w > -PI && w <= PI, "{odd} -> {w}");
            assert!((w.abs() - PI).abs() < 1e-4, "{odd} -> {w}");
        }
        assert_eq!(wrap_angle(PI), PI);
        assert!((wrap_angle(0.5) - 0.5).abs() < 1e-6);
        assert!((wrap_angle(-0.5 - TAU) + 0.5).abs() < 1e-5);
    }

    #[test]
    fn wrap_angle_preserves_direction() {
        for step in -200..200 {
            let angle = step as f32 * 0.173;
            let w = wrap_angle(angle);
            assert!(w > -PI && w <= PI, "{angle} -> {w}");
            assert!(Vec2::from_angle(w).distance(Vec2::from_angle(angle)) < 1e-3);
        }
    }

    #[test]
    fn rotate_toward_takes_short_way_round() {
        let next = rotate_toward(PI - 0.1, -PI + 0.1, 0.05);
        assert!(next > PI - 0.1 || next < -PI + 0.2);
        assert!((rotate_toward(0.0, 0.02, 0.05) - 0.02).abs() < 1e-6);
    }

    #[test]
    fn segment_circle_entry_finds_first_contact() {
        let t = segment_circle_entry(
            Vec2::new(0.0, 0.0),
            Vec2::new(100.0, 0.0),
            Vec2::new(50.0, 0.0),
            10.0,
        )
        .expect("segment crosses circle");
        assert!((t - 0.4).abs() < 1e-4);
        assert!(segment_circle_entry(
            Vec2::new(0.0, 20.0),
            Vec2::new(100.0, 20.0),
            Vec2::new(50.0, 0.0),
            10.0
        )
        .is_none());
    }

    #[test]
    fn move_toward_never_overshoots() {
        let p = Vec2::new(0.0, 0.0).move_toward(Vec2::new(3.0, 4.0), 10.0);
        assert_eq!(p, Vec2::new(3.0, 4.0));
        let q = Vec2::new(0.0, 0.0).move_toward(Vec2::new(3.0, 4.0), 2.5);
        assert!((q.length() - 2.5).abs() < 1e-5);
    }
}
