//! Per-kind decision making. Each behaviour looks at a read-only view of the
//! room and returns a [`Plan`]; applying it is the controller's job.

use crate::combat::{in_cone, Explosion};
use crate::constants::*;
use crate::entities::{
    ArtilleryState, Behavior, BoomerState, BossState, ChargerPhase, ChargerState, DamageSource,
    EnemyId, EntityRegistries, LickerPhase, LickerState, PlayerId, RangedMode, RangedState,
    TurretState, VictimRef, WallGuyState,
};
use crate::geometry::{rotate_toward, wrap_angle, Vec2};
use crate::rng::Rng;
use crate::spatial::SpatialEnvironment;
use crate::steering::SteeringTarget;
use crate::types::{EnemyKind, RuntimeEvent};

use super::targeting::{Target, TargetRef};
use super::AiTuning;

/// What one enemy knows about itself while planning.
#[derive(Clone, Copy, Debug)]
pub struct EnemyFrame {
    pub id: EnemyId,
    pub kind: EnemyKind,
    pub pos: Vec2,
    pub radius: f32,
    pub facing: f32,
    pub health_fraction: f32,
    pub target: Option<Target>,
    pub dt: f32,
    pub now_ms: u64,
}

impl EnemyFrame {
    fn source(&self) -> DamageSource {
        DamageSource::Enemy(self.id)
    }

    fn standoff(&self, target: &Target, breathing_room: f32) -> f32 {
        self.radius + target.radius + breathing_room
    }
}

pub struct WorldView<'a> {
    pub regs: &'a EntityRegistries,
    pub env: &'a SpatialEnvironment,
    pub tuning: &'a AiTuning,
}

impl WorldView<'_> {
    fn clear_shot(&self, from: Vec2, to: Vec2) -> bool {
        !self.env.line_hits_any(from, to)
    }

    fn live_player(&self, id: PlayerId) -> Option<(Vec2, f32)> {
        self.regs
            .players
            .get(&id)
            .filter(|p| !p.downed)
            .map(|p| (p.pos, p.radius))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Movement {
    Steer {
        target: SteeringTarget,
        breathing_room: f32,
        strafe: bool,
    },
    MoveTo(Vec2),
    Hold,
    Wander,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    Shoot { direction: Vec2 },
    Shell { aim: Vec2 },
    Damage { victim: VictimRef, amount: f32 },
    Explode(Explosion),
    Despawn,
    Cone { facing: f32 },
    Slam { at: Vec2 },
    PlaceShield { center: Vec2, angle: f32 },
    Ensnare { victim: PlayerId, remaining: f32 },
    Pull { victim: PlayerId, remaining: f32 },
    Release { victim: PlayerId },
    Dash { velocity: Vec2, duration: f32 },
    Reinforcements { count: usize },
    Notify(RuntimeEvent),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Plan {
    pub movement: Movement,
    pub facing: Option<f32>,
    pub actions: Vec<Action>,
}

impl Plan {
    fn moving(movement: Movement) -> Self {
        Self {
            movement,
            facing: None,
            actions: Vec::new(),
        }
    }

    fn hold() -> Self {
        Self::moving(Movement::Hold)
    }
}

pub trait EnemyBehavior {
    fn plan(&mut self, frame: &EnemyFrame, world: &WorldView<'_>, rng: &mut Rng) -> Plan;
}

/// Default movement toward a target: ring steering for living targets,
/// straight approach plus chewing for structures, wandering without one.
fn pursue(frame: &EnemyFrame, breathing_room: f32, strafe: bool) -> Plan {
    let Some(target) = frame.target else {
        return Plan::moving(Movement::Wander);
    };
    match target.reference {
        TargetRef::Structure(victim) => {
            let mut plan = Plan::moving(Movement::MoveTo(target.pos));
            if target.distance_from(frame.pos) <= frame.standoff(&target, MELEE_BREATHING_ROOM + 2.0) {
                plan.movement = Movement::Hold;
                plan.actions.push(Action::Damage {
                    victim,
                    amount: OBJECTIVE_DAMAGE_PER_SEC * frame.dt,
                });
            }
            plan
        }
        reference => match reference.steering() {
            Some(steer) => Plan::moving(Movement::Steer {
                target: steer,
                breathing_room,
                strafe,
            }),
            None => Plan::moving(Movement::Wander),
        },
    }
}

impl EnemyBehavior for Behavior {
    fn plan(&mut self, frame: &EnemyFrame, world: &WorldView<'_>, rng: &mut Rng) -> Plan {
        match self {
            Behavior::Basic => pursue(frame, MELEE_BREATHING_ROOM, false),
            Behavior::Ranged(state) => state.plan(frame, world, rng),
            Behavior::Boomer(state) => state.plan(frame, world, rng),
            Behavior::Licker(state) => state.plan(frame, world, rng),
            Behavior::Charger(state) => state.plan(frame, world, rng),
            Behavior::WallGuy(state) => state.plan(frame, world, rng),
            Behavior::Turret(state) => state.plan(frame, world, rng),
            Behavior::Artillery(state) => state.plan(frame, world, rng),
            Behavior::Boss(state) => state.plan(frame, world, rng),
        }
    }
}

impl EnemyBehavior for RangedState {
    fn plan(&mut self, frame: &EnemyFrame, world: &WorldView<'_>, rng: &mut Rng) -> Plan {
        if frame.now_ms >= self.next_mode_roll_ms {
            self.mode = if rng.bool(world.tuning.ranged_rush_chance) {
                RangedMode::Rush
            } else {
                RangedMode::Kite
            };
            self.next_mode_roll_ms = frame.now_ms + RANGED_MODE_REROLL_MS;
        }
        self.shot_timer = (self.shot_timer - frame.dt).max(0.0);

        let (breathing_room, strafe, min_range) = match self.mode {
            RangedMode::Kite => (RANGED_BREATHING_ROOM, true, RANGED_MIN_RANGE),
            RangedMode::Rush => (MELEE_BREATHING_ROOM, false, 0.0),
        };
        let mut plan = pursue(frame, breathing_room, strafe);
        let Some(target) = frame.target else {
            return plan;
        };
        if matches!(target.reference, TargetRef::Structure(_)) {
            return plan;
        }
        let dist = target.distance_from(frame.pos);
        let aim = (target.pos - frame.pos).angle();
        plan.facing = Some(aim);
        if self.shot_timer > 0.0 || dist < min_range || dist > RANGED_MAX_RANGE {
            return plan;
        }
        if !world.clear_shot(frame.pos, target.pos) {
            return plan;
        }
        if self.shots_left <= 0 {
            self.shots_left = rng.int(RANGED_BURST_MIN, RANGED_BURST_MAX);
        }
        plan.actions.push(Action::Shoot {
            direction: Vec2::from_angle(aim),
        });
        self.shots_left -= 1;
        self.shot_timer = if self.shots_left > 0 {
            RANGED_SHOT_GAP
        } else {
            rng.range(RANGED_BURST_PAUSE_MIN, RANGED_BURST_PAUSE_MAX)
        };
        plan
    }
}

impl EnemyBehavior for BoomerState {
    fn plan(&mut self, frame: &EnemyFrame, _world: &WorldView<'_>, _rng: &mut Rng) -> Plan {
        if let Some(fuse) = self.fuse {
            // Armed fuses burn down whatever happens to the target.
            let left = fuse - frame.dt;
            if left > 0.0 {
                self.fuse = Some(left);
                return Plan::hold();
            }
            self.fuse = Some(0.0);
            let mut plan = Plan::hold();
            plan.actions.push(Action::Explode(Explosion {
                center: frame.pos,
                inner_radius: BOOMER_INNER_RADIUS,
                blast_radius: BOOMER_BLAST_RADIUS,
                center_damage: BOOMER_CENTER_DAMAGE,
                edge_damage: BOOMER_EDGE_DAMAGE,
                source: frame.source(),
                knockback: 180.0,
            }));
            plan.actions.push(Action::Despawn);
            return plan;
        }

        let mut plan = pursue(frame, MELEE_BREATHING_ROOM, false);
        if let Some(target) = frame.target {
            let arm_at = frame.radius + target.radius + BOOMER_ARM_MARGIN;
            if target.distance_from(frame.pos) <= arm_at {
                self.fuse = Some(BOOMER_FUSE);
                plan = Plan::hold();
            }
        }
        plan
    }
}

impl EnemyBehavior for LickerState {
    fn plan(&mut self, frame: &EnemyFrame, world: &WorldView<'_>, _rng: &mut Rng) -> Plan {
        match self.phase {
            LickerPhase::Idle => {
                let Some(target) = frame.target else {
                    return Plan::moving(Movement::Wander);
                };
                let mut plan = pursue(frame, LICKER_GRAPPLE_RANGE * 0.6, false);
                if let TargetRef::Player(victim) = target.reference {
                    let dist = target.distance_from(frame.pos);
                    if dist <= LICKER_GRAPPLE_RANGE && world.clear_shot(frame.pos, target.pos) {
                        self.phase = LickerPhase::Extending { victim, reach: 0.0 };
                        plan = Plan::hold();
                    }
                }
                plan
            }
            LickerPhase::Extending { victim, reach } => {
                let Some((pos, radius)) = world.live_player(victim) else {
                    self.phase = LickerPhase::Cooldown {
                        remaining: LICKER_COOLDOWN * 0.5,
                    };
                    return Plan::hold();
                };
                let reach = reach + LICKER_TONGUE_SPEED * frame.dt;
                let mut plan = Plan::hold();
                plan.facing = Some((pos - frame.pos).angle());
                if reach + radius >= pos.distance(frame.pos) {
                    self.phase = LickerPhase::Attached {
                        victim,
                        remaining: LICKER_ENSNARE_TIME,
                    };
                    plan.actions.push(Action::Ensnare {
                        victim,
                        remaining: LICKER_ENSNARE_TIME,
                    });
                } else if reach > LICKER_GRAPPLE_RANGE * 1.25 {
                    self.phase = LickerPhase::Cooldown {
                        remaining: LICKER_COOLDOWN * 0.5,
                    };
                } else {
                    self.phase = LickerPhase::Extending { victim, reach };
                }
                plan
            }
            LickerPhase::Attached { victim, remaining } => {
                let remaining = remaining - frame.dt;
                let mut plan = Plan::hold();
                let alive = world.live_player(victim);
                if alive.is_none() || remaining <= 0.0 {
                    self.phase = LickerPhase::Cooldown {
                        remaining: LICKER_COOLDOWN,
                    };
                    plan.actions.push(Action::Release { victim });
                    return plan;
                }
                if let Some((pos, _)) = alive {
                    plan.facing = Some((pos - frame.pos).angle());
                }
                self.phase = LickerPhase::Attached { victim, remaining };
                plan.actions.push(Action::Pull { victim, remaining });
                plan.actions.push(Action::Damage {
                    victim: VictimRef::Player(victim),
                    amount: LICKER_DRAIN_PER_SEC * frame.dt,
                });
                plan
            }
            LickerPhase::Cooldown { remaining } => {
                let remaining = remaining - frame.dt;
                self.phase = if remaining <= 0.0 {
                    LickerPhase::Idle
                } else {
                    LickerPhase::Cooldown { remaining }
                };
                pursue(frame, LICKER_GRAPPLE_RANGE * 0.6, false)
            }
        }
    }
}

impl EnemyBehavior for ChargerState {
    fn plan(&mut self, frame: &EnemyFrame, world: &WorldView<'_>, _rng: &mut Rng) -> Plan {
        self.cooldown = (self.cooldown - frame.dt).max(0.0);
        match &mut self.phase {
            ChargerPhase::Ready => {
                let mut plan = pursue(frame, MELEE_BREATHING_ROOM, false);
                let Some(target) = frame.target else {
                    return plan;
                };
                if matches!(target.reference, TargetRef::Structure(_)) || self.cooldown > 0.0 {
                    return plan;
                }
                let dist = target.distance_from(frame.pos);
                let adjacent = dist <= frame.standoff(&target, MELEE_BREATHING_ROOM) + 10.0;
                if dist <= CHARGER_DASH_RANGE && !adjacent && world.clear_shot(frame.pos, target.pos) {
                    let direction = (target.pos - frame.pos).normalize_or_zero();
                    self.phase = ChargerPhase::Windup {
                        remaining: CHARGER_WINDUP,
                        direction,
                    };
                    plan = Plan::hold();
                    plan.facing = Some(direction.angle());
                    plan.actions.push(Action::Notify(RuntimeEvent::ChargerWindup {
                        enemy_id: frame.id.to_string(),
                        dx: direction.x,
                        dy: direction.y,
                    }));
                }
                plan
            }
            ChargerPhase::Windup { remaining, direction } => {
                *remaining -= frame.dt;
                let mut plan = Plan::hold();
                plan.facing = Some(direction.angle());
                if *remaining <= 0.0 {
                    plan.actions.push(Action::Dash {
                        velocity: *direction * CHARGER_DASH_SPEED,
                        duration: CHARGER_DASH_TIME,
                    });
                    self.phase = ChargerPhase::Dashing {
                        remaining: CHARGER_DASH_TIME,
                        hit: Default::default(),
                    };
                }
                plan
            }
            ChargerPhase::Dashing { remaining, hit } => {
                *remaining -= frame.dt;
                let mut plan = Plan::hold();
                let reach = frame.radius + 4.0;
                let players = world
                    .regs
                    .players
                    .values()
                    .filter(|p| !p.downed)
                    .map(|p| (VictimRef::Player(p.id), p.pos, p.radius));
                let troops = world
                    .regs
                    .troops
                    .values()
                    .filter(|t| t.alive)
                    .map(|t| (VictimRef::Troop(t.id), t.pos, t.radius));
                for (victim, pos, radius) in players.chain(troops) {
                    if pos.distance(frame.pos) <= reach + radius && hit.insert(victim) {
                        plan.actions.push(Action::Damage {
                            victim,
                            amount: CHARGER_DASH_DAMAGE,
                        });
                    }
                }
                if *remaining <= 0.0 {
                    self.phase = ChargerPhase::Ready;
                    self.cooldown = CHARGER_COOLDOWN;
                }
                plan
            }
        }
    }
}

impl EnemyBehavior for WallGuyState {
    fn plan(&mut self, frame: &EnemyFrame, _world: &WorldView<'_>, _rng: &mut Rng) -> Plan {
        self.attack_cooldown = (self.attack_cooldown - frame.dt).max(0.0);
        let mut plan = pursue(frame, MELEE_BREATHING_ROOM, false);
        let facing = match frame.target {
            Some(target) => rotate_toward(
                frame.facing,
                (target.pos - frame.pos).angle(),
                SHIELD_TURN_RATE * frame.dt,
            ),
            None => frame.facing,
        };
        plan.facing = Some(facing);
        let forward = Vec2::from_angle(facing);
        plan.actions.push(Action::PlaceShield {
            center: frame.pos + forward * (frame.radius + SHIELD_OFFSET),
            angle: facing,
        });

        let Some(target) = frame.target else {
            return plan;
        };
        let range = frame.radius + SHIELD_CONE_RANGE + target.radius;
        if self.attack_cooldown <= 0.0
            && in_cone(frame.pos, facing, range, SHIELD_CONE_HALF_ANGLE, target.pos)
        {
            self.attack_cooldown = SHIELD_ATTACK_COOLDOWN;
            let at = frame.pos + forward * (frame.radius + SHIELD_CONE_RANGE * 0.6);
            plan.actions.push(Action::Cone { facing });
            plan.actions.push(Action::Slam { at });
            plan.actions.push(Action::Notify(RuntimeEvent::ShieldSlam {
                enemy_id: frame.id.to_string(),
                x: at.x,
                y: at.y,
            }));
        }
        plan
    }
}

/// Rotates toward a living target that is in range and visible.
fn track(frame: &EnemyFrame, world: &WorldView<'_>, range: f32, min_range: f32, turn_rate: f32) -> Option<(Target, f32)> {
    let target = frame.target?;
    if matches!(target.reference, TargetRef::Structure(_)) {
        return None;
    }
    let dist = target.distance_from(frame.pos);
    if dist > range || dist < min_range || !world.clear_shot(frame.pos, target.pos) {
        return None;
    }
    let facing = rotate_toward(frame.facing, (target.pos - frame.pos).angle(), turn_rate * frame.dt);
    Some((target, facing))
}

impl EnemyBehavior for TurretState {
    fn plan(&mut self, frame: &EnemyFrame, world: &WorldView<'_>, _rng: &mut Rng) -> Plan {
        self.cooldown = (self.cooldown - frame.dt).max(0.0);
        let mut plan = Plan::hold();
        let Some((target, facing)) = track(frame, world, TURRET_RANGE, 0.0, TURRET_TURN_RATE) else {
            return plan;
        };
        plan.facing = Some(facing);
        let error = wrap_angle((target.pos - frame.pos).angle() - facing).abs();
        if self.cooldown <= 0.0 && error <= TURRET_AIM_TOLERANCE {
            plan.actions.push(Action::Shoot {
                direction: Vec2::from_angle(facing),
            });
            self.cooldown = TURRET_COOLDOWN;
        }
        plan
    }
}

impl EnemyBehavior for ArtilleryState {
    fn plan(&mut self, frame: &EnemyFrame, world: &WorldView<'_>, rng: &mut Rng) -> Plan {
        self.cooldown = (self.cooldown - frame.dt).max(0.0);
        self.shot_timer = (self.shot_timer - frame.dt).max(0.0);
        let mut plan = Plan::hold();
        let Some((target, facing)) = track(
            frame,
            world,
            ARTILLERY_RANGE,
            ARTILLERY_MIN_RANGE,
            ARTILLERY_TURN_RATE,
        ) else {
            return plan;
        };
        plan.facing = Some(facing);

        if self.shots_left <= 0 {
            let aimed = wrap_angle((target.pos - frame.pos).angle() - facing).abs() <= TURRET_AIM_TOLERANCE;
            if self.cooldown <= 0.0 && aimed {
                self.shots_left = ARTILLERY_BURST;
                self.shot_timer = 0.0;
            } else {
                return plan;
            }
        }
        if self.shot_timer <= 0.0 {
            let offset = Vec2::from_angle(rng.angle()) * rng.range(ARTILLERY_RING_MIN, ARTILLERY_RING_MAX);
            plan.actions.push(Action::Shell {
                aim: target.pos + offset,
            });
            self.shots_left -= 1;
            self.shot_timer = ARTILLERY_SHOT_GAP;
            if self.shots_left <= 0 {
                self.cooldown = ARTILLERY_COOLDOWN;
            }
        }
        plan
    }
}

impl EnemyBehavior for BossState {
    fn plan(&mut self, frame: &EnemyFrame, world: &WorldView<'_>, rng: &mut Rng) -> Plan {
        self.dash_cooldown = (self.dash_cooldown - frame.dt).max(0.0);
        self.shot_timer = (self.shot_timer - frame.dt).max(0.0);
        self.burst_remaining = (self.burst_remaining - frame.dt).max(0.0);

        let mut reinforcements = Vec::new();
        while let Some(threshold) = BOSS_HEALTH_THRESHOLDS.get(self.thresholds_crossed) {
            if frame.health_fraction > *threshold {
                break;
            }
            self.thresholds_crossed += 1;
            reinforcements.push(Action::Reinforcements {
                count: BOSS_REINFORCEMENTS,
            });
        }

        let mut plan = match frame.target {
            None => Plan::moving(Movement::Wander),
            Some(target) if matches!(target.reference, TargetRef::Structure(_)) => {
                pursue(frame, MELEE_BREATHING_ROOM, false)
            }
            Some(target) => self.engage(frame, world, rng, target),
        };
        plan.actions.extend(reinforcements);
        plan
    }
}

impl BossState {
    fn engage(&mut self, frame: &EnemyFrame, world: &WorldView<'_>, rng: &mut Rng, target: Target) -> Plan {
        let dist = target.distance_from(frame.pos);
        if dist > BOSS_ACTIVATION_RANGE {
            return Plan::hold();
        }
        let mut plan = pursue(frame, 120.0, true);
        let aim = (target.pos - frame.pos).angle();
        plan.facing = Some(aim);

        if self.dash_cooldown <= 0.0 {
            let threat = world
                .regs
                .players
                .values()
                .filter(|p| !p.downed)
                .map(|p| p.pos)
                .chain(world.regs.troops.values().filter(|t| t.alive).map(|t| t.pos))
                .filter(|p| p.distance(frame.pos) <= BOSS_THREAT_RANGE + frame.radius)
                .min_by(|a, b| a.distance(frame.pos).total_cmp(&b.distance(frame.pos)));
            if let Some(threat) = threat {
                let away = (frame.pos - threat).normalize_or_zero();
                let away = if away == Vec2::ZERO {
                    Vec2::from_angle(rng.angle())
                } else {
                    away
                };
                plan.actions.push(Action::Dash {
                    velocity: away * BOSS_DASH_SPEED,
                    duration: BOSS_DASH_TIME,
                });
                self.dash_cooldown = BOSS_DASH_COOLDOWN;
            }
        }

        if self.shot_timer > 0.0 || !world.clear_shot(frame.pos, target.pos) {
            return plan;
        }
        if self.burst_remaining <= 0.0 && rng.bool(world.tuning.boss_burst_chance) {
            self.burst_remaining = BOSS_BURST_WINDOW;
        }
        if self.burst_remaining > 0.0 {
            let spread = rng.range(-BOSS_BURST_SPREAD, BOSS_BURST_SPREAD);
            plan.actions.push(Action::Shoot {
                direction: Vec2::from_angle(aim + spread),
            });
            self.shot_timer = BOSS_BURST_SHOT_INTERVAL;
        } else {
            plan.actions.push(Action::Shoot {
                direction: Vec2::from_angle(aim),
            });
            self.shot_timer = BOSS_SHOT_INTERVAL;
        }
        plan
    }
}
