//! Enemy decision layer.
//!
//! Every tick each enemy picks a target, its behaviour plans movement and
//! actions against a read-only view, and the controller then applies the
//! plan: actions go through the combat resolver, movement through director
//! steering, the navmesh, or a straight move.

mod behaviors;
mod targeting;

use std::collections::BTreeMap;

use tracing::debug;

use crate::combat::{self, TickContext};
use crate::constants::*;
use crate::entities::{
    Behavior, DamageSource, Enemy, EnemyId, Faction, Hazard, HazardId, Projectile, ProjectileId,
    ProjectileKind, VictimRef,
};
use crate::geometry::Vec2;
use crate::navigation::{has_walkable_line, NavigationGrid};
use crate::rng::Rng;
use crate::spatial::{BoxTags, QueryFilter, SpatialEnvironment};
use crate::steering::{DirectorConfig, DirectorSteering, SteeringAgent, SteeringTarget};
use crate::types::{HazardKind, RuntimeEvent};

pub use behaviors::{Action, EnemyBehavior, EnemyFrame, Movement, Plan, WorldView};
pub use targeting::{roll_objective_mode, select_target, Target, TargetRef};

/// Probability knobs for enemy decisions. Tunable behaviour, not invariants.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AiTuning {
    pub objective_chance: f32,
    pub objective_reroll_ms: u64,
    pub troop_penalty: f32,
    pub ranged_rush_chance: f32,
    pub boss_burst_chance: f32,
}

impl Default for AiTuning {
    fn default() -> Self {
        Self {
            objective_chance: OBJECTIVE_MODE_CHANCE,
            objective_reroll_ms: OBJECTIVE_REROLL_MS,
            troop_penalty: TROOP_DISTANCE_PENALTY,
            ranged_rush_chance: RANGED_RUSH_CHANCE,
            boss_burst_chance: BOSS_BURST_CHANCE,
        }
    }
}

#[derive(Debug, Default)]
pub struct AiController {
    pub tuning: AiTuning,
    director_config: DirectorConfig,
    directors: BTreeMap<SteeringTarget, DirectorSteering>,
}

impl AiController {
    pub fn new(tuning: AiTuning) -> Self {
        Self {
            tuning,
            director_config: DirectorConfig::default(),
            directors: BTreeMap::new(),
        }
    }

    pub fn director_count(&self) -> usize {
        self.directors.len()
    }

    pub fn reset(&mut self) {
        self.directors.clear();
    }

    pub fn update(&mut self, ctx: &mut TickContext<'_>, nav: &mut NavigationGrid) {
        let ids: Vec<EnemyId> = ctx.regs.enemies.keys().copied().collect();
        let mut groups: BTreeMap<SteeringTarget, Vec<SteeringAgent>> = BTreeMap::new();

        for id in ids {
            let Some(plan) = self.decide(ctx, id) else {
                continue;
            };
            let movement = plan.movement;
            self.apply(ctx, id, plan);
            self.move_enemy(ctx, nav, id, movement, &mut groups);
        }

        let dt = ctx.dt;
        for (target, agents) in &groups {
            let Some((target_pos, target_radius)) = steering_target_body(ctx, *target) else {
                continue;
            };
            let director = self
                .directors
                .entry(*target)
                .or_insert_with(|| DirectorSteering::new(*target, self.director_config));
            for outcome in director.step(target_pos, target_radius, agents, ctx.env, dt) {
                if let Some(enemy) = ctx.regs.enemies.get_mut(&outcome.id) {
                    enemy.pos = outcome.pos;
                }
            }
        }
        self.directors.retain(|target, _| groups.contains_key(target));
    }

    /// Target selection plus the behaviour's plan. The behaviour state is
    /// cloned out, planned against a read-only view, then written back.
    fn decide(&self, ctx: &mut TickContext<'_>, id: EnemyId) -> Option<Plan> {
        let now_ms = ctx.now_ms;
        let enemy = ctx.regs.enemies.get_mut(&id)?;
        if !enemy.alive {
            return None;
        }
        roll_objective_mode(&mut enemy.objective_mode, now_ms, ctx.rng, &self.tuning);
        let objective_active = enemy.objective_mode.active;
        let (kind, pos) = (enemy.kind, enemy.pos);
        let mut behavior = enemy.behavior.clone();

        if let Some(pre) = enemy.pre_aggro {
            let player_near = ctx
                .regs
                .players
                .values()
                .any(|p| p.is_targetable() && p.pos.distance(pos) <= PRE_AGGRO_PLAYER_DIST);
            let arrived = pre.goal.distance(pos) <= PRE_AGGRO_RELEASE_DIST;
            if player_near || arrived || now_ms >= pre.until_ms {
                if let Some(enemy) = ctx.regs.enemies.get_mut(&id) {
                    enemy.pre_aggro = None;
                }
            }
        }

        let target = select_target(kind, pos, objective_active, ctx.regs, &self.tuning);
        let enemy = ctx.regs.enemies.get(&id)?;
        let frame = EnemyFrame {
            id,
            kind,
            pos,
            radius: enemy.radius,
            facing: enemy.facing,
            health_fraction: enemy.health_fraction(),
            target: if enemy.pre_aggro.is_some() { None } else { target },
            dt: ctx.dt,
            now_ms,
        };
        let pre_aggro_goal = enemy.pre_aggro.map(|p| p.goal);

        let world = WorldView {
            regs: &*ctx.regs,
            env: &*ctx.env,
            tuning: &self.tuning,
        };
        let mut plan = behavior.plan(&frame, &world, ctx.rng);
        if let Some(goal) = pre_aggro_goal {
            if plan.movement == Movement::Wander {
                plan.movement = Movement::MoveTo(goal);
            }
        }
        if let Some(enemy) = ctx.regs.enemies.get_mut(&id) {
            enemy.behavior = behavior;
            match plan.facing {
                Some(facing) => enemy.facing = facing,
                None => {
                    if let Some(target) = frame.target {
                        enemy.facing = (target.pos - pos).angle();
                    }
                }
            }
        }
        Some(plan)
    }

    fn apply(&self, ctx: &mut TickContext<'_>, id: EnemyId, plan: Plan) {
        let source = DamageSource::Enemy(id);
        for action in plan.actions {
            let Some((pos, radius, facing)) = ctx
                .regs
                .enemies
                .get(&id)
                .map(|e| (e.pos, e.radius, e.facing))
            else {
                return;
            };
            match action {
                Action::Shoot { direction } => {
                    let dir = direction.normalize_or_zero();
                    combat::spawn_projectile(
                        ctx.regs,
                        Projectile {
                            id: ProjectileId(0),
                            source,
                            faction: Faction::Hostile,
                            kind: ProjectileKind::Bullet,
                            pos: pos + dir * (radius + PROJECTILE_RADIUS + 1.0),
                            vel: dir * ENEMY_BULLET_SPEED,
                            radius: PROJECTILE_RADIUS,
                            damage: ENEMY_BULLET_DAMAGE,
                            life: ENEMY_BULLET_LIFE,
                            pierce: 0,
                            hits: Vec::new(),
                        },
                    );
                }
                Action::Shell { aim } => {
                    let dir = Vec2::from_angle(facing);
                    let flight = pos.distance(aim) / ARTILLERY_SHELL_SPEED;
                    combat::spawn_projectile(
                        ctx.regs,
                        Projectile {
                            id: ProjectileId(0),
                            source,
                            faction: Faction::Hostile,
                            kind: ProjectileKind::Shell {
                                aim,
                                turn_rate: ARTILLERY_SHELL_TURN_RATE,
                            },
                            pos: pos + dir * (radius + PROJECTILE_RADIUS),
                            vel: dir * ARTILLERY_SHELL_SPEED,
                            radius: PROJECTILE_RADIUS,
                            damage: 0.0,
                            life: flight * 2.0 + 1.0,
                            pierce: 0,
                            hits: Vec::new(),
                        },
                    );
                }
                Action::Damage { victim, amount } => {
                    combat::damage(ctx, victim, amount, source);
                }
                Action::Explode(blast) => {
                    combat::apply_explosion(ctx, &blast);
                    combat::spawn_hazard(
                        ctx.regs,
                        combat::lingering_hazard(HazardKind::Acid, blast.center, source),
                    );
                }
                Action::Despawn => {
                    combat::kill_enemy(ctx, id, source);
                    return;
                }
                Action::Cone { facing } => {
                    combat::cone_attack(
                        ctx,
                        pos,
                        facing,
                        radius + SHIELD_CONE_RANGE,
                        SHIELD_CONE_HALF_ANGLE,
                        SHIELD_ATTACK_DAMAGE,
                        source,
                    );
                }
                Action::Slam { at } => {
                    combat::spawn_hazard(
                        ctx.regs,
                        Hazard {
                            id: HazardId(0),
                            kind: HazardKind::Slam,
                            source,
                            pos: at,
                            radius: SHIELD_CONE_RANGE * 0.5,
                            dps: 0.0,
                            burst_damage: SHIELD_ATTACK_DAMAGE,
                            slow: None,
                            remaining: SLAM_HAZARD_LIFE,
                            fired: false,
                        },
                    );
                }
                Action::PlaceShield { center, angle } => {
                    place_shield(ctx.regs.enemies.get_mut(&id), ctx.env, center, angle);
                }
                Action::Ensnare { victim, remaining } => {
                    if let Some(player) = ctx.regs.players.get_mut(&victim) {
                        player.ensnared_by.insert(id, remaining);
                        ctx.events.push(RuntimeEvent::Ensnared {
                            player_id: victim.to_string(),
                            enemy_id: id.to_string(),
                        });
                    }
                }
                Action::Pull { victim, remaining } => {
                    let step = LICKER_PULL_SPEED * ctx.dt;
                    let env: &SpatialEnvironment = &*ctx.env;
                    if let Some(player) = ctx.regs.players.get_mut(&victim) {
                        let standoff = radius + player.radius + 4.0;
                        if player.pos.distance(pos) > standoff {
                            let delta = (pos - player.pos).normalize_or_zero() * step;
                            player.pos = env
                                .move_circle(player.pos, player.radius, delta, &QueryFilter::default())
                                .pos;
                        }
                        player.ensnared_by.insert(id, remaining);
                    }
                }
                Action::Release { victim } => {
                    if let Some(player) = ctx.regs.players.get_mut(&victim) {
                        if player.ensnared_by.remove(&id).is_some() {
                            ctx.events.push(RuntimeEvent::Released {
                                player_id: victim.to_string(),
                                enemy_id: id.to_string(),
                            });
                        }
                    }
                }
                Action::Dash { velocity, duration } => {
                    if let Some(enemy) = ctx.regs.enemies.get_mut(&id) {
                        enemy.knockback.start(velocity, duration);
                    }
                }
                Action::Reinforcements { count } => {
                    debug!(enemy = %id, count, "boss reinforcements requested");
                    ctx.spawn_requests
                        .push(combat::SpawnRequest::Reinforcements { near: pos, count });
                }
                Action::Notify(event) => ctx.events.push(event),
            }
        }
    }

    fn move_enemy(
        &self,
        ctx: &mut TickContext<'_>,
        nav: &mut NavigationGrid,
        id: EnemyId,
        movement: Movement,
        groups: &mut BTreeMap<SteeringTarget, Vec<SteeringAgent>>,
    ) {
        let dt = ctx.dt;
        let now_ms = ctx.now_ms;
        let steer_body = match movement {
            Movement::Steer { target, .. } => steering_target_body(ctx, target),
            _ => None,
        };
        let env: &SpatialEnvironment = &*ctx.env;
        let Some(enemy) = ctx.regs.enemies.get_mut(&id) else {
            return;
        };
        if enemy.kind.is_stationary() || enemy.knockback.is_active() {
            return;
        }
        let filter = QueryFilter::enemy_ignoring(enemy.shield_shape());
        match movement {
            Movement::Hold => {}
            Movement::Wander => wander(enemy, env, ctx.rng, dt, &filter),
            Movement::MoveTo(goal) => {
                if has_walkable_line(env, enemy.pos, goal, enemy.radius, &filter) {
                    enemy.path.clear();
                    step_toward(enemy, env, goal, dt, &filter);
                } else {
                    follow_path(enemy, env, nav, goal, now_ms, dt, &filter);
                }
            }
            Movement::Steer {
                target,
                breathing_room,
                strafe,
            } => {
                let Some((target_pos, _)) = steer_body else {
                    return;
                };
                if !has_walkable_line(env, enemy.pos, target_pos, enemy.radius, &filter) {
                    follow_path(enemy, env, nav, target_pos, now_ms, dt, &filter);
                    return;
                }
                enemy.path.clear();
                groups.entry(target).or_default().push(SteeringAgent {
                    id,
                    pos: enemy.pos,
                    radius: enemy.radius,
                    speed: enemy.effective_speed(),
                    breathing_room,
                    strafe,
                    kb_time: enemy.knockback.remaining,
                    ignore_shape: enemy.shield_shape(),
                });
            }
        }
    }
}

fn steering_target_body(ctx: &TickContext<'_>, target: SteeringTarget) -> Option<(Vec2, f32)> {
    match target {
        SteeringTarget::Player(id) => ctx.regs.victim_body(VictimRef::Player(id)),
        SteeringTarget::Troop(id) => ctx.regs.victim_body(VictimRef::Troop(id)),
    }
}

/// Keeps a wall guy's shield box in front of it, creating the shape on first use.
fn place_shield(enemy: Option<&mut Enemy>, env: &mut SpatialEnvironment, center: Vec2, angle: f32) {
    let Some(enemy) = enemy else {
        return;
    };
    let Behavior::WallGuy(state) = &mut enemy.behavior else {
        return;
    };
    match state.shield {
        Some(shape) if env.shape(shape).is_some() => env.set_box_transform(shape, center, angle),
        _ => {
            let tags = BoxTags {
                dynamic: true,
                ..BoxTags::default()
            };
            state.shield = Some(env.add_box(center, SHIELD_HALF_WIDTH, SHIELD_HALF_HEIGHT, angle, tags));
        }
    }
}

fn step_toward(enemy: &mut Enemy, env: &SpatialEnvironment, goal: Vec2, dt: f32, filter: &QueryFilter) {
    let next = enemy.pos.move_toward(goal, enemy.effective_speed() * dt);
    enemy.pos = env.move_circle(enemy.pos, enemy.radius, next - enemy.pos, filter).pos;
}

/// Waypoint following for when the straight line is blocked. Falls back to a
/// direct step if no path exists.
fn follow_path(
    enemy: &mut Enemy,
    env: &SpatialEnvironment,
    nav: &mut NavigationGrid,
    goal: Vec2,
    now_ms: u64,
    dt: f32,
    filter: &QueryFilter,
) {
    let stale = enemy.path.current().is_none()
        || enemy.path.goal.distance(goal) > NAV_WAYPOINT_REACHED * 4.0
        || now_ms.saturating_sub(enemy.path.computed_at_ms) >= NAV_REPATH_MS;
    if stale {
        enemy.path.clear();
        enemy.path.goal = goal;
        enemy.path.computed_at_ms = now_ms;
        if let Some(waypoints) = nav.find_path(enemy.pos, goal) {
            enemy.path.waypoints = waypoints;
            // The first waypoint is the cell we are standing in.
            enemy.path.next = usize::from(enemy.path.waypoints.len() > 1);
        }
    }
    let Some(waypoint) = enemy.path.current() else {
        step_toward(enemy, env, goal, dt, filter);
        return;
    };
    step_toward(enemy, env, waypoint, dt, filter);
    if enemy.pos.distance(waypoint) <= NAV_WAYPOINT_REACHED {
        enemy.path.next += 1;
    }
}

fn wander(enemy: &mut Enemy, env: &SpatialEnvironment, rng: &mut Rng, dt: f32, filter: &QueryFilter) {
    if enemy.wander.pause > 0.0 {
        enemy.wander.pause -= dt;
        return;
    }
    let goal = match enemy.wander.goal {
        Some(goal) => goal,
        None => {
            let reach = rng.range(WANDER_RADIUS * 0.3, WANDER_RADIUS);
            let goal = env
                .boundary
                .clamp_circle(enemy.pos + Vec2::from_angle(rng.angle()) * reach, enemy.radius);
            enemy.wander.goal = Some(goal);
            goal
        }
    };
    let next = enemy
        .pos
        .move_toward(goal, enemy.effective_speed() * WANDER_SPEED_FACTOR * dt);
    let moved = env.move_circle(enemy.pos, enemy.radius, next - enemy.pos, filter);
    enemy.pos = moved.pos;
    if moved.blocked || enemy.pos.distance(goal) <= 4.0 {
        enemy.wander.goal = None;
        enemy.wander.pause = rng.range(WANDER_PAUSE_MIN, WANDER_PAUSE_MAX);
    }
}
