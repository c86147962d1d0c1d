//! Ring-formation steering for the group of enemies chasing one target.

use std::collections::BTreeMap;
use std::f32::consts::TAU;

use crate::constants::{RING_SLOT_ARC, SEPARATION_PADDING, STRAFE_FACTOR};
use crate::entities::{EnemyId, PlayerId, TroopId};
use crate::geometry::{wrap_angle, Vec2};
use crate::spatial::{QueryFilter, ShapeId, SpatialEnvironment};

const CONTACT_TOLERANCE: f32 = 2.0;
const RETREAT_RATIO: f32 = 0.8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SteeringTarget {
    Player(PlayerId),
    Troop(TroopId),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SteeringAgent {
    pub id: EnemyId,
    pub pos: Vec2,
    pub radius: f32,
    pub speed: f32,
    pub breathing_room: f32,
    pub strafe: bool,
    pub kb_time: f32,
    pub ignore_shape: Option<ShapeId>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SteeringOutcome {
    pub id: EnemyId,
    pub pos: Vec2,
}

/// True when an agent parked at its standoff ring counts as touching its
/// target. Contact damage and steering share this threshold.
pub fn in_contact_range(
    agent_pos: Vec2,
    agent_radius: f32,
    breathing_room: f32,
    target_pos: Vec2,
    target_radius: f32,
) -> bool {
    let reach = agent_radius + target_radius + breathing_room + CONTACT_TOLERANCE;
    agent_pos.distance_sq(target_pos) <= reach * reach
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirectorConfig {
    pub separation_padding: f32,
    pub ring_slots: bool,
    pub slot_arc: f32,
    pub strafe_factor: f32,
}

impl Default for DirectorConfig {
    fn default() -> Self {
        Self {
            separation_padding: SEPARATION_PADDING,
            ring_slots: true,
            slot_arc: RING_SLOT_ARC,
            strafe_factor: STRAFE_FACTOR,
        }
    }
}

/// Spreads the agents chasing one target around it. Slot assignments persist
/// across ticks so agents do not swap places every frame.
#[derive(Clone, Debug)]
pub struct DirectorSteering {
    pub target: SteeringTarget,
    config: DirectorConfig,
    slots: BTreeMap<EnemyId, usize>,
}

impl DirectorSteering {
    pub fn new(target: SteeringTarget, config: DirectorConfig) -> Self {
        Self {
            target,
            config,
            slots: BTreeMap::new(),
        }
    }

    pub fn slot_count(&self) -> usize {
        ((TAU / self.config.slot_arc.max(0.05)).floor() as usize).max(1)
    }

    pub fn slot_of(&self, id: EnemyId) -> Option<usize> {
        self.slots.get(&id).copied()
    }

    fn slot_angle(&self, slot: usize) -> f32 {
        slot as f32 * TAU / self.slot_count() as f32
    }

    fn assign_slots(&mut self, target_pos: Vec2, agents: &[&SteeringAgent]) {
        self.slots.retain(|id, _| agents.iter().any(|a| a.id == *id));
        let count = self.slot_count();
        for agent in agents {
            if self.slots.contains_key(&agent.id) {
                continue;
            }
            let bearing = (agent.pos - target_pos).angle();
            let mut usage = vec![0usize; count];
            for slot in self.slots.values() {
                usage[*slot % count] += 1;
            }
            let least = usage.iter().copied().min().unwrap_or(0);
            let best = (0..count)
                .filter(|slot| usage[*slot] == least)
                .min_by(|a, b| {
                    let da = wrap_angle(self.slot_angle(*a) - bearing).abs();
                    let db = wrap_angle(self.slot_angle(*b) - bearing).abs();
                    da.total_cmp(&db)
                })
                .unwrap_or(0);
            self.slots.insert(agent.id, best);
        }
    }

    /// Advances every agent not under knockback by one tick.
    pub fn step(
        &mut self,
        target_pos: Vec2,
        target_radius: f32,
        agents: &[SteeringAgent],
        env: &SpatialEnvironment,
        dt: f32,
    ) -> Vec<SteeringOutcome> {
        let active: Vec<&SteeringAgent> = agents.iter().filter(|a| a.kb_time <= 0.0).collect();
        if self.config.ring_slots {
            self.assign_slots(target_pos, &active);
        }

        let mut proposed: Vec<Vec2> = Vec::with_capacity(active.len());
        for agent in &active {
            let standoff = agent.radius + target_radius + agent.breathing_room;
            let offset = agent.pos - target_pos;
            let dist = offset.length();
            let max_step = agent.speed.max(0.0) * dt;

            let next = if dist > standoff + CONTACT_TOLERANCE {
                let goal = match self.slots.get(&agent.id) {
                    Some(slot) if self.config.ring_slots => {
                        target_pos + Vec2::from_angle(self.slot_angle(*slot)) * standoff
                    }
                    _ => target_pos + offset.normalize_or_zero() * standoff,
                };
                // Close in on the target first, fan out onto the slot near the ring.
                let aim = if dist > standoff * 2.0 {
                    target_pos.lerp(goal, 0.5)
                } else {
                    goal
                };
                agent.pos.move_toward(aim, max_step)
            } else if dist < standoff * RETREAT_RATIO && agent.breathing_room > agent.radius {
                let away = offset.normalize_or_zero();
                agent.pos.move_toward(target_pos + away * standoff, max_step)
            } else if agent.strafe {
                let tangent = offset.normalize_or_zero().perp();
                let orbit = agent.pos + tangent * (max_step * self.config.strafe_factor);
                target_pos + (orbit - target_pos).normalize_or_zero() * dist.max(standoff * RETREAT_RATIO)
            } else {
                agent.pos
            };
            proposed.push(next);
        }

        self.separate(&active, &mut proposed);

        active
            .iter()
            .zip(proposed)
            .map(|(agent, next)| {
                let filter = QueryFilter::enemy_ignoring(agent.ignore_shape);
                let moved = env.move_circle(agent.pos, agent.radius, next - agent.pos, &filter);
                SteeringOutcome {
                    id: agent.id,
                    pos: moved.pos,
                }
            })
            .collect()
    }

    fn separate(&self, agents: &[&SteeringAgent], proposed: &mut [Vec2]) {
        let padding = self.config.separation_padding;
        for i in 0..proposed.len() {
            for j in (i + 1)..proposed.len() {
                let min = agents[i].radius + agents[j].radius + padding;
                let d = proposed[j] - proposed[i];
                let dist = d.length();
                if dist >= min {
                    continue;
                }
                let dir = if dist > 1e-4 {
                    d * (1.0 / dist)
                } else {
                    // Coincident: split along a direction derived from the ids.
                    Vec2::from_angle((agents[i].id.0 as f32 * 2.399) % TAU)
                };
                let push = dir * ((min - dist) * 0.5);
                proposed[i] -= push;
                proposed[j] += push;
            }
        }
    }
}
