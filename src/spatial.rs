//! Collision world: circle obstacles, oriented boxes and the arena boundary.
//!
//! Player movement, enemy steering, projectiles, line-of-sight and the
//! navigation grid all query the same `SpatialEnvironment`, so every system
//! agrees on what is blocked.

use serde::Serialize;

use crate::constants::{CLEAR_POSITION_ATTEMPTS, MAX_MOVE_SUBSTEP};
use crate::geometry::{point_segment_distance_sq, segment_circle_entry, Vec2};
use crate::rng::Rng;

pub type ShapeId = u32;

const RESOLVE_PASSES: usize = 4;
const SKIN: f32 = 0.01;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CircleObstacle {
    pub center: Vec2,
    pub radius: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoxTags {
    pub trench: bool,
    /// Blocks enemies only; players and shots pass.
    pub keepout: bool,
    /// Moved at runtime (shields, ability walls); ignored by the navigation grid.
    pub dynamic: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrientedBox {
    pub id: ShapeId,
    pub center: Vec2,
    pub half_width: f32,
    pub half_height: f32,
    pub angle: f32,
    pub tags: BoxTags,
}

impl OrientedBox {
    fn to_local(&self, p: Vec2) -> Vec2 {
        (p - self.center).rotate(-self.angle)
    }

    fn closest_local(&self, local: Vec2) -> Vec2 {
        Vec2::new(
            local.x.clamp(-self.half_width, self.half_width),
            local.y.clamp(-self.half_height, self.half_height),
        )
    }

    pub fn overlaps_circle(&self, p: Vec2, radius: f32) -> bool {
        let local = self.to_local(p);
        if local.x.abs() > self.half_width + radius || local.y.abs() > self.half_height + radius {
            return false;
        }
        local.distance_sq(self.closest_local(local)) < radius * radius
    }

    /// Push-out vector and surface normal (world space) for an overlapping
    /// circle that moved here from `prev`. When `prev` was in front of a face
    /// the circle is pushed back out through that face, which keeps a body
    /// that overshot the middle of a thin wall on its original side.
    fn penetration(&self, prev: Vec2, p: Vec2, radius: f32) -> Option<(Vec2, Vec2)> {
        let local = self.to_local(p);
        if local.x.abs() >= self.half_width + radius || local.y.abs() >= self.half_height + radius {
            return None;
        }
        let closest = self.closest_local(local);
        let diff = local - closest;
        let dist_sq = diff.length_sq();
        if dist_sq > 1e-8 && dist_sq >= radius * radius {
            return None;
        }

        let from = self.to_local(prev);
        let (normal, depth) = if from.y.abs() >= self.half_height && from.x.abs() < self.half_width {
            let side = sign(from.y);
            (
                Vec2::new(0.0, side),
                self.half_height + radius - local.y * side,
            )
        } else if from.x.abs() >= self.half_width && from.y.abs() < self.half_height {
            let side = sign(from.x);
            (
                Vec2::new(side, 0.0),
                self.half_width + radius - local.x * side,
            )
        } else if dist_sq > 1e-8 {
            let dist = dist_sq.sqrt();
            (diff * (1.0 / dist), radius - dist)
        } else {
            // Started inside: leave through the shallowest face.
            let px = self.half_width - local.x.abs();
            let py = self.half_height - local.y.abs();
            if px < py {
                (Vec2::new(sign(local.x), 0.0), px + radius)
            } else {
                (Vec2::new(0.0, sign(local.y)), py + radius)
            }
        };
        let world_normal = normal.rotate(self.angle);
        Some((world_normal * (depth + SKIN), world_normal))
    }

    /// Slab test of segment `a -> b`; returns entry parameter in `[0, 1]`.
    pub fn segment_entry(&self, a: Vec2, b: Vec2) -> Option<f32> {
        let la = self.to_local(a);
        let lb = self.to_local(b);
        let d = lb - la;
        let mut t_min = 0.0_f32;
        let mut t_max = 1.0_f32;
        for (origin, dir, half) in [
            (la.x, d.x, self.half_width),
            (la.y, d.y, self.half_height),
        ] {
            if dir.abs() < 1e-8 {
                if origin.abs() > half {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / dir;
            let mut t1 = (-half - origin) * inv;
            let mut t2 = (half - origin) * inv;
            if t1 > t2 {
                std::mem::swap(&mut t1, &mut t2);
            }
            t_min = t_min.max(t1);
            t_max = t_max.min(t2);
            if t_min > t_max {
                return None;
            }
        }
        Some(t_min)
    }
}

fn sign(v: f32) -> f32 {
    if v < 0.0 {
        -1.0
    } else {
        1.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Boundary {
    Circle {
        center: Vec2,
        radius: f32,
    },
    #[serde(rename_all = "camelCase")]
    Rect {
        center: Vec2,
        half_width: f32,
        half_height: f32,
    },
}

impl Boundary {
    pub fn center(&self) -> Vec2 {
        match *self {
            Boundary::Circle { center, .. } | Boundary::Rect { center, .. } => center,
        }
    }

    pub fn contains_circle(&self, p: Vec2, radius: f32) -> bool {
        match *self {
            Boundary::Circle {
                center,
                radius: bound,
            } => p.distance(center) + radius <= bound,
            Boundary::Rect {
                center,
                half_width,
                half_height,
            } => {
                let d = p - center;
                d.x - radius >= -half_width
                    && d.x + radius <= half_width
                    && d.y - radius >= -half_height
                    && d.y + radius <= half_height
            }
        }
    }

    pub fn clamp_circle(&self, p: Vec2, radius: f32) -> Vec2 {
        match *self {
            Boundary::Circle {
                center,
                radius: bound,
            } => {
                let d = p - center;
                let max = (bound - radius).max(0.0);
                if d.length() <= max {
                    p
                } else {
                    center + d.normalize_or_zero() * max
                }
            }
            Boundary::Rect {
                center,
                half_width,
                half_height,
            } => {
                let hx = (half_width - radius).max(0.0);
                let hy = (half_height - radius).max(0.0);
                Vec2::new(
                    p.x.clamp(center.x - hx, center.x + hx),
                    p.y.clamp(center.y - hy, center.y + hy),
                )
            }
        }
    }

    /// Axis-aligned extent as `(min, max)`.
    pub fn extent(&self) -> (Vec2, Vec2) {
        match *self {
            Boundary::Circle { center, radius } => (
                center - Vec2::new(radius, radius),
                center + Vec2::new(radius, radius),
            ),
            Boundary::Rect {
                center,
                half_width,
                half_height,
            } => (
                center - Vec2::new(half_width, half_height),
                center + Vec2::new(half_width, half_height),
            ),
        }
    }
}

/// Which shapes a query should see.
#[derive(Clone, Copy, Debug, Default)]
pub struct QueryFilter {
    /// Skip this box (an enemy's own shield).
    pub ignore: Option<ShapeId>,
    /// Enemy bodies are also blocked by keep-out boxes.
    pub enemy: bool,
    /// Only shapes that never move (navigation grid builds).
    pub static_only: bool,
}

impl QueryFilter {
    pub fn enemy() -> Self {
        Self {
            enemy: true,
            ..Self::default()
        }
    }

    pub fn enemy_ignoring(shape: Option<ShapeId>) -> Self {
        Self {
            ignore: shape,
            enemy: true,
            static_only: false,
        }
    }

    pub fn navigation() -> Self {
        Self {
            ignore: None,
            enemy: true,
            static_only: true,
        }
    }

    fn sees(&self, b: &OrientedBox) -> bool {
        if self.ignore == Some(b.id) || (self.static_only && b.tags.dynamic) {
            return false;
        }
        !b.tags.keepout || self.enemy
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MoveResult {
    pub pos: Vec2,
    pub blocked: bool,
    /// Normal of the last surface touched; zero when unobstructed.
    pub normal: Vec2,
}

impl MoveResult {
    /// Removes the velocity component pointing into the touched surface.
    pub fn slide_velocity(&self, velocity: Vec2) -> Vec2 {
        if !self.blocked {
            return velocity;
        }
        let into = velocity.dot(self.normal);
        if into < 0.0 {
            velocity - self.normal * into
        } else {
            velocity
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SpatialEnvironment {
    pub boundary: Boundary,
    circles: Vec<CircleObstacle>,
    boxes: Vec<OrientedBox>,
    #[serde(skip)]
    next_shape_id: ShapeId,
    #[serde(skip)]
    static_revision: u64,
}

impl SpatialEnvironment {
    pub fn new(boundary: Boundary) -> Self {
        Self {
            boundary,
            circles: Vec::new(),
            boxes: Vec::new(),
            next_shape_id: 1,
            static_revision: 0,
        }
    }

    pub fn circles(&self) -> &[CircleObstacle] {
        &self.circles
    }

    pub fn boxes(&self) -> &[OrientedBox] {
        &self.boxes
    }

    /// Bumped whenever a non-dynamic shape is added or removed.
    pub fn static_revision(&self) -> u64 {
        self.static_revision
    }

    pub fn add_circle(&mut self, center: Vec2, radius: f32) {
        self.circles.push(CircleObstacle { center, radius });
        self.static_revision += 1;
    }

    pub fn add_box(
        &mut self,
        center: Vec2,
        half_width: f32,
        half_height: f32,
        angle: f32,
        tags: BoxTags,
    ) -> ShapeId {
        let id = self.next_shape_id;
        self.next_shape_id += 1;
        self.boxes.push(OrientedBox {
            id,
            center,
            half_width,
            half_height,
            angle,
            tags,
        });
        if !tags.dynamic {
            self.static_revision += 1;
        }
        id
    }

    pub fn remove_shape(&mut self, id: ShapeId) -> bool {
        let Some(idx) = self.boxes.iter().position(|b| b.id == id) else {
            return false;
        };
        let removed = self.boxes.swap_remove(idx);
        if !removed.tags.dynamic {
            self.static_revision += 1;
        }
        true
    }

    pub fn set_box_transform(&mut self, id: ShapeId, center: Vec2, angle: f32) {
        if let Some(b) = self.boxes.iter_mut().find(|b| b.id == id) {
            b.center = center;
            b.angle = angle;
        }
    }

    pub fn shape(&self, id: ShapeId) -> Option<&OrientedBox> {
        self.boxes.iter().find(|b| b.id == id)
    }

    pub fn is_inside_bounds(&self, p: Vec2, radius: f32) -> bool {
        self.boundary.contains_circle(p, radius)
    }

    pub fn circle_hits_any(&self, p: Vec2, radius: f32) -> bool {
        self.circle_hits(p, radius, &QueryFilter::default())
    }

    pub fn circle_hits(&self, p: Vec2, radius: f32, filter: &QueryFilter) -> bool {
        self.circles.iter().any(|c| {
            let min = c.radius + radius;
            p.distance_sq(c.center) < min * min
        }) || self
            .boxes
            .iter()
            .any(|b| filter.sees(b) && b.overlaps_circle(p, radius))
    }

    pub fn line_hits_any(&self, a: Vec2, b: Vec2) -> bool {
        self.circles
            .iter()
            .any(|c| point_segment_distance_sq(c.center, a, b) < c.radius * c.radius)
            || self
                .boxes
                .iter()
                .any(|bx| !bx.tags.keepout && bx.segment_entry(a, b).is_some())
    }

    /// Fraction along `a -> b` where the segment first touches a sight-blocking shape.
    pub fn line_hit_t(&self, a: Vec2, b: Vec2) -> Option<f32> {
        let circle_t = self
            .circles
            .iter()
            .filter_map(|c| segment_circle_entry(a, b, c.center, c.radius));
        let box_t = self
            .boxes
            .iter()
            .filter(|bx| !bx.tags.keepout)
            .filter_map(|bx| bx.segment_entry(a, b));
        circle_t.chain(box_t).min_by(f32::total_cmp)
    }

    pub fn resolve_circle_move(&self, pos: Vec2, radius: f32, delta: Vec2) -> MoveResult {
        self.resolve_circle_move_filtered(pos, radius, delta, &QueryFilter::default())
    }

    /// Attempts `pos + delta` and pushes the circle back out of anything it
    /// overlaps. The tangential part of the motion survives, so bodies slide
    /// along walls. Callers moving more than `MAX_MOVE_SUBSTEP` per tick go
    /// through [`SpatialEnvironment::move_circle`].
    pub fn resolve_circle_move_filtered(
        &self,
        pos: Vec2,
        radius: f32,
        delta: Vec2,
        filter: &QueryFilter,
    ) -> MoveResult {
        let mut next = pos + delta;
        let mut blocked = false;
        let mut normal = Vec2::ZERO;

        for _ in 0..RESOLVE_PASSES {
            let mut adjusted = false;
            for c in &self.circles {
                let d = next - c.center;
                let min = c.radius + radius;
                let dist_sq = d.length_sq();
                if dist_sq >= min * min {
                    continue;
                }
                let n = if dist_sq > 1e-8 {
                    d * (1.0 / dist_sq.sqrt())
                } else {
                    let back = (-delta).normalize_or_zero();
                    if back == Vec2::ZERO {
                        Vec2::new(1.0, 0.0)
                    } else {
                        back
                    }
                };
                next = c.center + n * (min + SKIN);
                normal = n;
                blocked = true;
                adjusted = true;
            }
            for b in &self.boxes {
                if !filter.sees(b) {
                    continue;
                }
                if let Some((push, n)) = b.penetration(pos, next, radius) {
                    next += push;
                    normal = n;
                    blocked = true;
                    adjusted = true;
                }
            }
            if !adjusted {
                break;
            }
        }

        if !self.boundary.contains_circle(next, radius) {
            let clamped = self.boundary.clamp_circle(next, radius);
            normal = (clamped - next).normalize_or_zero();
            next = clamped;
            blocked = true;
        }

        MoveResult {
            pos: next,
            blocked,
            normal,
        }
    }

    /// Substepped move: splits `delta` into pieces no longer than
    /// `MAX_MOVE_SUBSTEP` so fast bodies cannot skip over thin walls.
    pub fn move_circle(
        &self,
        pos: Vec2,
        radius: f32,
        delta: Vec2,
        filter: &QueryFilter,
    ) -> MoveResult {
        let dist = delta.length();
        if !delta.is_finite() || dist <= f32::EPSILON {
            return MoveResult {
                pos,
                blocked: false,
                normal: Vec2::ZERO,
            };
        }
        let steps = (dist / MAX_MOVE_SUBSTEP).ceil().max(1.0) as usize;
        let step = delta * (1.0 / steps as f32);
        let mut result = MoveResult {
            pos,
            blocked: false,
            normal: Vec2::ZERO,
        };
        for _ in 0..steps {
            let r = self.resolve_circle_move_filtered(result.pos, radius, step, filter);
            if r.blocked {
                result.blocked = true;
                result.normal = r.normal;
            }
            result.pos = r.pos;
        }
        result
    }

    pub fn is_clear(&self, p: Vec2, radius: f32, filter: &QueryFilter) -> bool {
        self.is_inside_bounds(p, radius) && !self.circle_hits(p, radius, filter)
    }

    /// Searches outward from `near` for a spot where a circle fits. Falls back
    /// to `near` clamped into the boundary, or the boundary centre, when the
    /// attempt budget runs out.
    pub fn find_clear_position(
        &self,
        near: Vec2,
        radius: f32,
        search_radius: f32,
        rng: &mut Rng,
        filter: &QueryFilter,
    ) -> Vec2 {
        if self.is_clear(near, radius, filter) {
            return near;
        }
        for attempt in 0..CLEAR_POSITION_ATTEMPTS {
            let reach = search_radius * (attempt + 1) as f32 / CLEAR_POSITION_ATTEMPTS as f32;
            let candidate = near + Vec2::from_angle(rng.angle()) * reach.max(radius);
            if self.is_clear(candidate, radius, filter) {
                return candidate;
            }
        }
        let clamped = self.boundary.clamp_circle(near, radius);
        if !self.circle_hits(clamped, radius, filter) {
            return clamped;
        }
        self.boundary.center()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_4;

    fn arena() -> SpatialEnvironment {
        SpatialEnvironment::new(Boundary::Rect {
            center: Vec2::ZERO,
            half_width: 500.0,
            half_height: 500.0,
        })
    }

    #[test]
    fn bounds_check_uses_full_circle() {
        let env = arena();
        assert!(env.is_inside_bounds(Vec2::new(480.0, 0.0), 20.0));
        assert!(!env.is_inside_bounds(Vec2::new(481.0, 0.0), 20.0));
        let round = SpatialEnvironment::new(Boundary::Circle {
            center: Vec2::ZERO,
            radius: 100.0,
        });
        assert!(round.is_inside_bounds(Vec2::new(0.0, 90.0), 10.0));
        assert!(!round.is_inside_bounds(Vec2::new(60.0, 60.0), 20.0));
    }

    #[test]
    fn rotated_box_overlap_uses_local_frame() {
        let mut env = arena();
        env.add_box(Vec2::ZERO, 100.0, 5.0, FRAC_PI_4, BoxTags::default());
        assert!(env.circle_hits_any(Vec2::new(50.0, 50.0), 2.0));
        // Inside the world-space AABB of the box but far from the rotated slab.
        assert!(!env.circle_hits_any(Vec2::new(50.0, -50.0), 2.0));
    }

    #[test]
    fn moving_into_wall_slides_along_it() {
        let mut env = arena();
        env.add_box(Vec2::new(0.0, 30.0), 200.0, 5.0, 0.0, BoxTags::default());
        let r = env.resolve_circle_move(Vec2::new(0.0, 10.0), 10.0, Vec2::new(8.0, 8.0));
        assert!(r.blocked);
        assert!(r.pos.x > 7.9);
        assert!(r.pos.y <= 15.0 + 0.1);
        let v = r.slide_velocity(Vec2::new(1.0, 1.0));
        assert!(v.y.abs() < 1e-4);
        assert!((v.x - 1.0).abs() < 1e-4);
    }

    #[test]
    fn circle_obstacle_pushes_out_radially() {
        let mut env = arena();
        env.add_circle(Vec2::new(50.0, 0.0), 20.0);
        let r = env.resolve_circle_move(Vec2::new(20.0, 0.0), 10.0, Vec2::new(5.0, 0.0));
        assert!(r.blocked);
        assert!(r.pos.distance(Vec2::new(50.0, 0.0)) >= 30.0);
    }

    #[test]
    fn substeps_never_tunnel_through_thin_rotated_wall() {
        let mut env = arena();
        let angle = 0.3_f32;
        env.add_box(Vec2::ZERO, 150.0, 2.0, angle, BoxTags::default());
        let normal = Vec2::from_angle(angle).perp();
        let start = normal * -30.0;
        let delta = normal * 60.0;

        let single = env.resolve_circle_move(start, 5.0, delta);
        assert!(!single.blocked);
        assert!(single.pos.dot(normal) > 0.0);

        let sub = env.move_circle(start, 5.0, delta, &QueryFilter::default());
        assert!(sub.blocked);
        assert!(sub.pos.dot(normal) < 0.0);
    }

    #[test]
    fn line_tests_see_boxes_and_circles() {
        let mut env = arena();
        env.add_circle(Vec2::new(0.0, 0.0), 10.0);
        assert!(env.line_hits_any(Vec2::new(-50.0, 0.0), Vec2::new(50.0, 0.0)));
        assert!(!env.line_hits_any(Vec2::new(-50.0, 20.0), Vec2::new(50.0, 20.0)));
        let id = env.add_box(Vec2::new(0.0, 100.0), 40.0, 4.0, 0.0, BoxTags::default());
        let t = env
            .line_hit_t(Vec2::new(0.0, 50.0), Vec2::new(0.0, 150.0))
            .expect("box blocks");
        assert!((t - 0.46).abs() < 1e-3);
        assert!(env.remove_shape(id));
        assert!(env.line_hit_t(Vec2::new(0.0, 50.0), Vec2::new(0.0, 150.0)).is_none());
    }

    #[test]
    fn keepout_blocks_enemies_only() {
        let mut env = arena();
        let tags = BoxTags {
            keepout: true,
            ..BoxTags::default()
        };
        env.add_box(Vec2::ZERO, 50.0, 50.0, 0.0, tags);
        assert!(!env.circle_hits_any(Vec2::ZERO, 5.0));
        assert!(env.circle_hits(Vec2::ZERO, 5.0, &QueryFilter::enemy()));
        assert!(!env.line_hits_any(Vec2::new(-100.0, 0.0), Vec2::new(100.0, 0.0)));
    }

    #[test]
    fn clear_position_falls_back_deterministically() {
        let mut env = SpatialEnvironment::new(Boundary::Circle {
            center: Vec2::ZERO,
            radius: 40.0,
        });
        env.add_circle(Vec2::ZERO, 60.0);
        let mut rng = Rng::new(3);
        let p = env.find_clear_position(Vec2::new(10.0, 0.0), 10.0, 30.0, &mut rng, &QueryFilter::default());
        assert_eq!(p, Vec2::ZERO);
    }

    #[test]
    fn dynamic_boxes_do_not_bump_static_revision() {
        let mut env = arena();
        let dynamic = BoxTags {
            dynamic: true,
            ..BoxTags::default()
        };
        let id = env.add_box(Vec2::ZERO, 5.0, 5.0, 0.0, dynamic);
        env.set_box_transform(id, Vec2::new(10.0, 0.0), 1.0);
        assert_eq!(env.static_revision(), 0);
        assert_eq!(env.shape(id).map(|b| b.center), Some(Vec2::new(10.0, 0.0)));
        env.add_box(Vec2::ZERO, 5.0, 5.0, 0.0, BoxTags::default());
        assert_eq!(env.static_revision(), 1);
    }
}
