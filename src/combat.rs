//! Damage resolution over the live registries.
//!
//! Nothing in here keeps state between calls. Every path that removes an
//! entity goes through one of the `remove_*` hooks so reverse references
//! (ensnares, revive channels, shield shapes) are always cleaned up.

use std::collections::BTreeMap;

use tracing::debug;

use crate::constants::{
    armor_factor, ACID_DPS, ACID_LIFE, ACID_RADIUS, ACID_SLOW, ARTILLERY_BLAST_RADIUS, ARTILLERY_CENTER_DAMAGE, ARTILLERY_EDGE_DAMAGE,
    ARTILLERY_INNER_RADIUS, LICKER_COOLDOWN, MINE_BLAST_RADIUS, MINE_CENTER_DAMAGE,
    FIRE_DPS, FIRE_LIFE, FIRE_RADIUS, MELEE_BREATHING_ROOM, MINE_EDGE_DAMAGE, MINE_INNER_RADIUS,
};
use crate::entities::{
    ChestState, DamageSource, DotStack, Enemy, EnemyId, EntityRegistries, Faction, GroundItem, Hazard, HazardId,
    Knockback, LickerPhase, LootDrop, Player, PlayerId, Projectile, ProjectileKind, Slow, TroopId,
    VictimRef, AbilityId, Behavior,
};
use crate::geometry::{rotate_toward, segment_circle_entry, Vec2};
use crate::rng::Rng;
use crate::spatial::{QueryFilter, SpatialEnvironment};
use crate::steering::in_contact_range;
use crate::types::{EnemyKind, HazardKind, RuntimeEvent};

const DOT_EPSILON: f32 = 1e-4;

/// Something that died this tick and may leave loot behind.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Kill {
    pub victim: VictimRef,
    pub enemy_kind: Option<EnemyKind>,
    pub pos: Vec2,
    pub by: DamageSource,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SpawnRequest {
    Reinforcements { near: Vec2, count: usize },
}

/// Everything one simulation tick mutates, handed explicitly to each stage.
pub struct TickContext<'a> {
    pub regs: &'a mut EntityRegistries,
    pub env: &'a mut SpatialEnvironment,
    pub rng: &'a mut Rng,
    pub events: &'a mut Vec<RuntimeEvent>,
    pub dt: f32,
    pub now_ms: u64,
    pub kills: Vec<Kill>,
    pub spawn_requests: Vec<SpawnRequest>,
}

impl<'a> TickContext<'a> {
    pub fn new(
        regs: &'a mut EntityRegistries,
        env: &'a mut SpatialEnvironment,
        rng: &'a mut Rng,
        events: &'a mut Vec<RuntimeEvent>,
        dt: f32,
        now_ms: u64,
    ) -> Self {
        Self {
            regs,
            env,
            rng,
            events,
            dt,
            now_ms,
            kills: Vec::new(),
            spawn_requests: Vec::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DamageOutcome {
    pub applied: f32,
    pub killed: bool,
}

pub fn mitigate(raw: f32, armor_percent: f32) -> f32 {
    if !raw.is_finite() || raw <= 0.0 {
        return 0.0;
    }
    raw * armor_factor(armor_percent)
}

/// Applies `raw` damage to one victim: armor for players and enemies, health
/// clamping, and death bookkeeping when health runs out.
pub fn damage(ctx: &mut TickContext<'_>, victim: VictimRef, raw: f32, source: DamageSource) -> DamageOutcome {
    if !raw.is_finite() || raw <= 0.0 {
        return DamageOutcome::default();
    }
    match victim {
        VictimRef::Player(id) => {
            let Some(player) = ctx.regs.players.get_mut(&id) else {
                return DamageOutcome::default();
            };
            if player.is_invulnerable() || player.downed {
                return DamageOutcome::default();
            }
            let applied = player.take_damage(mitigate(raw, player.stats.armor));
            let killed = player.health <= 0.0;
            if killed {
                down_player(ctx, id);
            }
            DamageOutcome { applied, killed }
        }
        VictimRef::Enemy(id) => {
            let Some(enemy) = ctx.regs.enemies.get_mut(&id) else {
                return DamageOutcome::default();
            };
            if !enemy.alive {
                return DamageOutcome::default();
            }
            let applied = mitigate(raw, enemy.armor).min(enemy.health);
            enemy.health -= applied;
            let killed = enemy.health <= 0.0;
            if killed {
                enemy.alive = false;
                kill_enemy(ctx, id, source);
            }
            DamageOutcome { applied, killed }
        }
        VictimRef::Troop(id) => {
            let Some(troop) = ctx.regs.troops.get_mut(&id) else {
                return DamageOutcome::default();
            };
            let applied = raw.min(troop.health);
            troop.health -= applied;
            let killed = troop.health <= 0.0;
            if killed {
                let pos = troop.pos;
                remove_troop(ctx.regs, id);
                ctx.kills.push(Kill {
                    victim,
                    enemy_kind: None,
                    pos,
                    by: source,
                });
            }
            DamageOutcome { applied, killed }
        }
        VictimRef::Npc(id) => {
            let Some(npc) = ctx.regs.npcs.get_mut(&id) else {
                return DamageOutcome::default();
            };
            let applied = raw.min(npc.health);
            npc.health -= applied;
            let killed = npc.health <= 0.0;
            if killed {
                let pos = npc.pos;
                ctx.regs.npcs.remove(&id);
                ctx.kills.push(Kill {
                    victim,
                    enemy_kind: None,
                    pos,
                    by: source,
                });
            }
            DamageOutcome { applied, killed }
        }
        VictimRef::Ability(id) => {
            let Some(ability) = ctx.regs.abilities.get_mut(&id) else {
                return DamageOutcome::default();
            };
            let applied = raw.min(ability.health);
            ability.health -= applied;
            let killed = ability.health <= 0.0;
            if killed {
                remove_ability(ctx.regs, ctx.env, id);
                ctx.events.push(RuntimeEvent::AbilityExpired {
                    ability_id: id.to_string(),
                });
            }
            DamageOutcome { applied, killed }
        }
        VictimRef::Chest(id) => {
            let Some(chest) = ctx.regs.chests.get_mut(&id) else {
                return DamageOutcome::default();
            };
            if chest.state == ChestState::Opened {
                return DamageOutcome::default();
            }
            let applied = raw.min(chest.health);
            chest.health -= applied;
            let killed = chest.health <= 0.0;
            if killed {
                chest.state = ChestState::Opened;
                let pos = chest.pos;
                ctx.kills.push(Kill {
                    victim,
                    enemy_kind: None,
                    pos,
                    by: source,
                });
            }
            DamageOutcome { applied, killed }
        }
        VictimRef::Objective(id) => {
            let Some(objective) = ctx.regs.objectives.get_mut(&id) else {
                return DamageOutcome::default();
            };
            if !objective.is_vulnerable() {
                return DamageOutcome::default();
            }
            let applied = raw.min(objective.health);
            objective.health -= applied;
            let killed = objective.health <= 0.0;
            if killed {
                objective.destroyed = true;
                ctx.events.push(RuntimeEvent::ObjectiveDestroyed {
                    objective_id: id.to_string(),
                });
            }
            DamageOutcome { applied, killed }
        }
    }
}

/// Zero health: the player is downed until revived.
pub fn down_player(ctx: &mut TickContext<'_>, id: PlayerId) {
    let Some(player) = ctx.regs.players.get_mut(&id) else {
        return;
    };
    if player.downed {
        return;
    }
    player.downed = true;
    player.health = 0.0;
    player.dots.clear();
    player.slows.clear();
    player.knockback = Knockback::default();
    if player.dash.remaining > 0.0 {
        player.dash.remaining = 0.0;
        player.invulnerable_sources = player.invulnerable_sources.saturating_sub(1);
    }
    player.revive = None;
    release_ensnares_on(ctx.regs, id);
    ctx.events.push(RuntimeEvent::PlayerDowned {
        player_id: id.to_string(),
    });
}

/// Lets go of `victim` from every licker holding or reaching for it.
fn release_ensnares_on(regs: &mut EntityRegistries, victim: PlayerId) {
    for enemy in regs.enemies.values_mut() {
        if let Behavior::Licker(state) = &mut enemy.behavior {
            if state.victim() == Some(victim) {
                state.phase = LickerPhase::Cooldown {
                    remaining: LICKER_COOLDOWN,
                };
            }
        }
    }
    if let Some(player) = regs.players.get_mut(&victim) {
        player.ensnared_by.clear();
    }
}

pub fn kill_enemy(ctx: &mut TickContext<'_>, id: EnemyId, by: DamageSource) {
    let Some(enemy) = remove_enemy(ctx.regs, ctx.env, id) else {
        return;
    };
    if let DamageSource::Player(pid) = by {
        if let Some(player) = ctx.regs.players.get_mut(&pid) {
            player.kills += 1;
        }
    }
    debug!(enemy = %id, kind = ?enemy.kind, "enemy killed");
    ctx.events.push(RuntimeEvent::EnemyKilled {
        enemy_id: id.to_string(),
        kind: enemy.kind,
        x: enemy.pos.x,
        y: enemy.pos.y,
    });
    ctx.kills.push(Kill {
        victim: VictimRef::Enemy(id),
        enemy_kind: Some(enemy.kind),
        pos: enemy.pos,
        by,
    });
}

/// The single removal hook for enemies. Clears every ensnare pointing at the
/// enemy and drops its shield shape from the collision world.
pub fn remove_enemy(
    regs: &mut EntityRegistries,
    env: &mut SpatialEnvironment,
    id: EnemyId,
) -> Option<Enemy> {
    let mut enemy = regs.enemies.remove(&id)?;
    enemy.alive = false;
    enemy.dots.clear();
    for player in regs.players.values_mut() {
        player.ensnared_by.remove(&id);
    }
    if let Some(shape) = enemy.shield_shape() {
        env.remove_shape(shape);
    }
    Some(enemy)
}

/// Removal hook for players: releases grapples, cancels revive channels the
/// player was part of, orphans their troops, tears down their abilities and
/// drops any carried item.
pub fn remove_player(
    regs: &mut EntityRegistries,
    env: &mut SpatialEnvironment,
    id: PlayerId,
    now_ms: u64,
) -> Option<Player> {
    release_ensnares_on(regs, id);
    let player = regs.players.remove(&id)?;
    for other in regs.players.values_mut() {
        if other.revive.map(|r| r.reviver) == Some(id) {
            other.revive = None;
        }
    }
    for troop in regs.troops.values_mut() {
        if troop.owner == Some(id) {
            troop.owner = None;
        }
    }
    let owned: Vec<AbilityId> = regs
        .abilities
        .values()
        .filter(|ability| ability.owner == id)
        .map(|ability| ability.id)
        .collect();
    for ability in owned {
        remove_ability(regs, env, ability);
    }
    if let Some(name) = player.carried_item.clone() {
        let item_id = crate::entities::ItemId(regs.alloc());
        regs.items.insert(
            item_id,
            GroundItem {
                id: item_id,
                pos: player.pos,
                drop: LootDrop::Carried(name),
                dropped_at_ms: now_ms,
            },
        );
    }
    Some(player)
}

pub fn remove_troop(regs: &mut EntityRegistries, id: TroopId) {
    regs.troops.remove(&id);
}

pub fn remove_ability(regs: &mut EntityRegistries, env: &mut SpatialEnvironment, id: AbilityId) {
    if let Some(ability) = regs.abilities.remove(&id) {
        if let Some(shape) = ability.shape {
            env.remove_shape(shape);
        }
    }
}

/// Per-victim contact damage accumulated over one tick, applied once per
/// victim through armor mitigation.
#[derive(Debug, Default)]
pub struct ContactLedger {
    totals: BTreeMap<VictimRef, (f32, DamageSource)>,
}

impl ContactLedger {
    pub fn add(&mut self, victim: VictimRef, amount: f32, source: DamageSource) {
        if !amount.is_finite() || amount <= 0.0 {
            return;
        }
        let entry = self.totals.entry(victim).or_insert((0.0, source));
        entry.0 += amount;
    }

    pub fn total(&self, victim: VictimRef) -> f32 {
        self.totals.get(&victim).map_or(0.0, |(v, _)| *v)
    }

    pub fn apply(self, ctx: &mut TickContext<'_>) {
        for (victim, (amount, source)) in self.totals {
            damage(ctx, victim, amount, source);
        }
    }
}

fn touching(a: Vec2, ra: f32, b: Vec2, rb: f32) -> bool {
    let min = ra + rb;
    a.distance_sq(b) <= min * min
}

fn enemy_reaches(enemy_pos: Vec2, enemy_radius: f32, pos: Vec2, radius: f32) -> bool {
    in_contact_range(enemy_pos, enemy_radius, MELEE_BREATHING_ROOM, pos, radius)
}

/// Melee enemies hurt players, troops and NPCs once they reach their
/// steering standoff; troops hurt enemies they overlap.
pub fn apply_contact_damage(ctx: &mut TickContext<'_>) {
    let dt = ctx.dt;
    let mut ledger = ContactLedger::default();
    for enemy in ctx.regs.enemies.values() {
        if !enemy.alive || enemy.contact_dps <= 0.0 || enemy.kind.is_stationary() {
            continue;
        }
        if let Behavior::Licker(state) = &enemy.behavior {
            if matches!(state.phase, LickerPhase::Attached { .. }) {
                continue;
            }
        }
        let source = DamageSource::Enemy(enemy.id);
        let amount = enemy.contact_dps * dt;
        for player in ctx.regs.players.values() {
            if !player.downed && enemy_reaches(enemy.pos, enemy.radius, player.pos, player.radius) {
                ledger.add(VictimRef::Player(player.id), amount, source);
            }
        }
        for troop in ctx.regs.troops.values() {
            if troop.alive && enemy_reaches(enemy.pos, enemy.radius, troop.pos, troop.radius) {
                ledger.add(VictimRef::Troop(troop.id), amount, source);
            }
        }
        for npc in ctx.regs.npcs.values() {
            if npc.alive && enemy_reaches(enemy.pos, enemy.radius, npc.pos, npc.radius) {
                ledger.add(VictimRef::Npc(npc.id), amount, source);
            }
        }
    }
    for troop in ctx.regs.troops.values() {
        if !troop.alive {
            continue;
        }
        for enemy in ctx.regs.enemies.values() {
            if enemy.alive && touching(troop.pos, troop.radius + 4.0, enemy.pos, enemy.radius) {
                ledger.add(
                    VictimRef::Enemy(enemy.id),
                    troop.contact_dps * dt,
                    DamageSource::Troop(troop.id),
                );
                break;
            }
        }
    }
    ledger.apply(ctx);
}

/// Advances independent DOT stacks by `dt`. Each stack contributes for the
/// part of `dt` it was still alive; expired stacks are dropped.
pub fn tick_dots(stacks: &mut Vec<DotStack>, dt: f32) -> f32 {
    let mut total = 0.0;
    for stack in stacks.iter_mut() {
        let active = stack.remaining.min(dt).max(0.0);
        total += stack.rate * active;
        stack.remaining -= dt;
    }
    stacks.retain(|s| s.remaining > DOT_EPSILON);
    total
}

pub fn add_dot(regs: &mut EntityRegistries, victim: VictimRef, stack: DotStack) {
    if !stack.rate.is_finite() || !stack.remaining.is_finite() || stack.remaining <= 0.0 {
        return;
    }
    match victim {
        VictimRef::Player(id) => {
            if let Some(p) = regs.players.get_mut(&id) {
                if !p.downed {
                    p.dots.push(stack);
                }
            }
        }
        VictimRef::Enemy(id) => {
            if let Some(e) = regs.enemies.get_mut(&id) {
                e.dots.push(stack);
            }
        }
        VictimRef::Troop(id) => {
            if let Some(t) = regs.troops.get_mut(&id) {
                t.dots.push(stack);
            }
        }
        _ => {}
    }
}

pub fn apply_dots(ctx: &mut TickContext<'_>) {
    let dt = ctx.dt;
    let mut pending: Vec<(VictimRef, f32, DamageSource)> = Vec::new();
    for player in ctx.regs.players.values_mut() {
        if let Some(source) = player.dots.first().map(|s| s.source) {
            let amount = tick_dots(&mut player.dots, dt);
            pending.push((VictimRef::Player(player.id), amount, source));
        }
    }
    for enemy in ctx.regs.enemies.values_mut() {
        if let Some(source) = enemy.dots.first().map(|s| s.source) {
            let amount = tick_dots(&mut enemy.dots, dt);
            pending.push((VictimRef::Enemy(enemy.id), amount, source));
        }
    }
    for troop in ctx.regs.troops.values_mut() {
        if let Some(source) = troop.dots.first().map(|s| s.source) {
            let amount = tick_dots(&mut troop.dots, dt);
            pending.push((VictimRef::Troop(troop.id), amount, source));
        }
    }
    for (victim, amount, source) in pending {
        damage(ctx, victim, amount, source);
    }
}

/// Displaces by `velocity * min(remaining, dt)` through the substepped
/// resolver, then counts the timer down.
pub fn step_knockback(
    env: &SpatialEnvironment,
    pos: Vec2,
    radius: f32,
    kb: &mut Knockback,
    dt: f32,
    filter: &QueryFilter,
) -> Vec2 {
    if !kb.is_active() {
        return pos;
    }
    let active = kb.remaining.min(dt);
    let moved = env.move_circle(pos, radius, kb.velocity * active, filter);
    kb.velocity = moved.slide_velocity(kb.velocity);
    kb.remaining -= dt;
    if kb.remaining <= 0.0 {
        kb.remaining = 0.0;
        kb.velocity = Vec2::ZERO;
    }
    moved.pos
}

pub fn apply_knockbacks(ctx: &mut TickContext<'_>) {
    let dt = ctx.dt;
    let env: &SpatialEnvironment = ctx.env;
    for player in ctx.regs.players.values_mut() {
        if player.knockback.is_active() {
            player.pos = step_knockback(env, player.pos, player.radius, &mut player.knockback, dt, &QueryFilter::default());
        }
    }
    for enemy in ctx.regs.enemies.values_mut() {
        if enemy.knockback.is_active() {
            if enemy.kind.is_stationary() {
                enemy.knockback = Knockback::default();
                continue;
            }
            let filter = QueryFilter::enemy_ignoring(enemy.shield_shape());
            enemy.pos = step_knockback(env, enemy.pos, enemy.radius, &mut enemy.knockback, dt, &filter);
        }
    }
    for troop in ctx.regs.troops.values_mut() {
        if troop.knockback.is_active() {
            troop.pos = step_knockback(env, troop.pos, troop.radius, &mut troop.knockback, dt, &QueryFilter::default());
        }
    }
}

pub fn push_knockback(regs: &mut EntityRegistries, victim: VictimRef, velocity: Vec2, duration: f32) {
    match victim {
        VictimRef::Player(id) => {
            if let Some(p) = regs.players.get_mut(&id) {
                if !p.downed && !p.is_invulnerable() {
                    p.knockback.start(velocity, duration);
                }
            }
        }
        VictimRef::Enemy(id) => {
            if let Some(e) = regs.enemies.get_mut(&id) {
                if !e.kind.is_stationary() && e.kind != EnemyKind::Boss {
                    e.knockback.start(velocity, duration);
                }
            }
        }
        VictimRef::Troop(id) => {
            if let Some(t) = regs.troops.get_mut(&id) {
                t.knockback.start(velocity, duration);
            }
        }
        _ => {}
    }
}

/// Full damage inside `inner`, then linear in distance from the centre down
/// to `edge` damage at the blast radius, zero beyond it.
pub fn explosion_damage(dist: f32, inner: f32, blast: f32, center: f32, edge: f32) -> f32 {
    if !dist.is_finite() || dist > blast || blast <= 0.0 {
        return 0.0;
    }
    if dist <= inner {
        return center;
    }
    let t = (dist / blast).clamp(0.0, 1.0);
    center + (edge - center) * t
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Explosion {
    pub center: Vec2,
    pub inner_radius: f32,
    pub blast_radius: f32,
    pub center_damage: f32,
    pub edge_damage: f32,
    pub source: DamageSource,
    pub knockback: f32,
}

impl Explosion {
    pub fn artillery(center: Vec2, source: DamageSource) -> Self {
        Self {
            center,
            inner_radius: ARTILLERY_INNER_RADIUS,
            blast_radius: ARTILLERY_BLAST_RADIUS,
            center_damage: ARTILLERY_CENTER_DAMAGE,
            edge_damage: ARTILLERY_EDGE_DAMAGE,
            source,
            knockback: 120.0,
        }
    }

    pub fn mine(center: Vec2, source: DamageSource) -> Self {
        Self {
            center,
            inner_radius: MINE_INNER_RADIUS,
            blast_radius: MINE_BLAST_RADIUS,
            center_damage: MINE_CENTER_DAMAGE,
            edge_damage: MINE_EDGE_DAMAGE,
            source,
            knockback: 200.0,
        }
    }
}

/// Damages every eligible victim in range; returns who was hit.
pub fn apply_explosion(ctx: &mut TickContext<'_>, blast: &Explosion) -> Vec<VictimRef> {
    let mut hit = Vec::new();
    for victim in ctx.regs.victims_for(blast.source.faction()) {
        let Some((pos, _)) = ctx.regs.victim_body(victim) else {
            continue;
        };
        let dist = pos.distance(blast.center);
        let amount = explosion_damage(
            dist,
            blast.inner_radius,
            blast.blast_radius,
            blast.center_damage,
            blast.edge_damage,
        );
        if amount <= 0.0 {
            continue;
        }
        damage(ctx, victim, amount, blast.source);
        if blast.knockback > 0.0 {
            let dir = (pos - blast.center).normalize_or_zero();
            push_knockback(ctx.regs, victim, dir * blast.knockback, 0.2);
        }
        hit.push(victim);
    }
    ctx.events.push(RuntimeEvent::Explosion {
        x: blast.center.x,
        y: blast.center.y,
        radius: blast.blast_radius,
    });
    hit
}

fn segment_entry_for(
    regs: &EntityRegistries,
    env: &SpatialEnvironment,
    victim: VictimRef,
    from: Vec2,
    to: Vec2,
    pad: f32,
) -> Option<f32> {
    if let VictimRef::Ability(id) = victim {
        if let Some(shape) = regs.abilities.get(&id).and_then(|a| a.shape) {
            return env.shape(shape).and_then(|b| b.segment_entry(from, to));
        }
    }
    let (pos, radius) = regs.victim_body(victim)?;
    segment_circle_entry(from, to, pos, radius + pad)
}

/// Victims along `from -> to` that are reached before any wall, nearest first.
fn swept_hits(
    regs: &EntityRegistries,
    env: &SpatialEnvironment,
    faction: Faction,
    from: Vec2,
    to: Vec2,
    pad: f32,
    skip: &[VictimRef],
) -> (Vec<(f32, VictimRef)>, Option<f32>) {
    let wall_t = env.line_hit_t(from, to);
    let limit = wall_t.unwrap_or(f32::INFINITY);
    let mut hits: Vec<(f32, VictimRef)> = regs
        .victims_for(faction)
        .into_iter()
        .filter(|v| !skip.contains(v))
        .filter_map(|v| segment_entry_for(regs, env, v, from, to, pad).map(|t| (t, v)))
        .filter(|(t, _)| *t <= limit)
        .collect();
    hits.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    (hits, wall_t)
}

/// Instant shot along a ray. The first victim before a wall takes the hit.
pub fn fire_hitscan(
    ctx: &mut TickContext<'_>,
    origin: Vec2,
    direction: Vec2,
    range: f32,
    raw: f32,
    source: DamageSource,
    knockback: Option<(f32, f32)>,
) -> Option<VictimRef> {
    let dir = direction.normalize_or_zero();
    if dir == Vec2::ZERO || !origin.is_finite() {
        return None;
    }
    let end = origin + dir * range;
    let (hits, _) = swept_hits(ctx.regs, ctx.env, source.faction(), origin, end, 0.0, &[]);
    let (_, victim) = *hits.first()?;
    damage(ctx, victim, raw, source);
    if let Some((speed, time)) = knockback {
        push_knockback(ctx.regs, victim, dir * speed, time);
    }
    Some(victim)
}

pub fn spawn_projectile(regs: &mut EntityRegistries, mut projectile: Projectile) {
    if !projectile.pos.is_finite() || !projectile.vel.is_finite() {
        return;
    }
    projectile.id = crate::entities::ProjectileId(regs.alloc());
    regs.projectiles.insert(projectile.id, projectile);
}

/// Moves projectiles with a swept test against victims and walls. Bullets
/// stop at the first victim (unless piercing) or wall; shells fly over
/// everything and burst at their aim point.
pub fn update_projectiles(ctx: &mut TickContext<'_>) {
    let dt = ctx.dt;
    let ids: Vec<_> = ctx.regs.projectiles.keys().copied().collect();
    for id in ids {
        let Some(mut p) = ctx.regs.projectiles.remove(&id) else {
            continue;
        };
        p.life -= dt;

        if let ProjectileKind::Shell { aim, turn_rate } = p.kind {
            let speed = p.vel.length();
            let heading = rotate_toward(p.vel.angle(), (aim - p.pos).angle(), turn_rate * dt);
            p.vel = Vec2::from_angle(heading) * speed;
            let step = speed * dt;
            let arrived = p.pos.distance(aim) <= step.max(p.radius);
            if arrived || p.life <= 0.0 {
                let at = if arrived { aim } else { p.pos };
                apply_explosion(ctx, &Explosion::artillery(at, p.source));
                spawn_hazard(ctx.regs, lingering_hazard(HazardKind::Fire, at, p.source));
                continue;
            }
            p.pos += p.vel * dt;
            ctx.regs.projectiles.insert(id, p);
            continue;
        }

        if p.life <= 0.0 {
            continue;
        }
        let from = p.pos;
        let to = from + p.vel * dt;
        if !to.is_finite() {
            continue;
        }
        let (hits, wall_t) = swept_hits(ctx.regs, ctx.env, p.faction, from, to, p.radius, &p.hits);
        let mut consumed = false;
        for (_, victim) in hits {
            damage(ctx, victim, p.damage, p.source);
            p.hits.push(victim);
            if p.pierce == 0 {
                consumed = true;
                break;
            }
            p.pierce -= 1;
        }
        if consumed || wall_t.is_some() {
            continue;
        }
        p.pos = to;
        ctx.regs.projectiles.insert(id, p);
    }
}

/// Cone melee in front of an attacker. Hits players and troops directly;
/// returns the victims hit.
pub fn cone_attack(
    ctx: &mut TickContext<'_>,
    origin: Vec2,
    facing: f32,
    range: f32,
    half_angle: f32,
    raw: f32,
    source: DamageSource,
) -> Vec<VictimRef> {
    let mut victims = Vec::new();
    for player in ctx.regs.players.values() {
        if !player.downed && in_cone(origin, facing, range + player.radius, half_angle, player.pos) {
            victims.push(VictimRef::Player(player.id));
        }
    }
    for troop in ctx.regs.troops.values() {
        if troop.alive && in_cone(origin, facing, range + troop.radius, half_angle, troop.pos) {
            victims.push(VictimRef::Troop(troop.id));
        }
    }
    for victim in &victims {
        damage(ctx, *victim, raw, source);
        if let Some((pos, _)) = ctx.regs.victim_body(*victim) {
            let dir = (pos - origin).normalize_or_zero();
            push_knockback(ctx.regs, *victim, dir * 220.0, 0.15);
        }
    }
    victims
}

pub fn in_cone(origin: Vec2, facing: f32, range: f32, half_angle: f32, point: Vec2) -> bool {
    let offset = point - origin;
    let dist = offset.length();
    if dist > range {
        return false;
    }
    if dist <= f32::EPSILON {
        return true;
    }
    crate::geometry::wrap_angle(offset.angle() - facing).abs() <= half_angle
}

/// Acid puddles (boomers) and fires (shell bursts) left behind on the ground.
pub fn lingering_hazard(kind: HazardKind, pos: Vec2, source: DamageSource) -> Hazard {
    let (radius, dps, slow, life) = match kind {
        HazardKind::Acid => (ACID_RADIUS, ACID_DPS, Some(ACID_SLOW), ACID_LIFE),
        HazardKind::Fire => (FIRE_RADIUS, FIRE_DPS, None, FIRE_LIFE),
        HazardKind::Slam => (0.0, 0.0, None, 0.0),
    };
    Hazard {
        id: HazardId(0),
        kind,
        source,
        pos,
        radius,
        dps,
        burst_damage: 0.0,
        slow,
        remaining: life,
        fired: false,
    }
}

pub fn spawn_hazard(regs: &mut EntityRegistries, mut hazard: Hazard) {
    if !hazard.pos.is_finite() || hazard.remaining <= 0.0 {
        return;
    }
    hazard.id = HazardId(regs.alloc());
    regs.hazards.insert(hazard.id, hazard);
}

/// Timed area effects. Slams only reach structures (abilities, objectives,
/// chests); acid and fire tick on everything of the opposing faction.
pub fn update_hazards(ctx: &mut TickContext<'_>) {
    let dt = ctx.dt;
    let ids: Vec<_> = ctx.regs.hazards.keys().copied().collect();
    for id in ids {
        let Some(mut hazard) = ctx.regs.hazards.remove(&id) else {
            continue;
        };
        let victims: Vec<VictimRef> = ctx
            .regs
            .victims_for(hazard.source.faction())
            .into_iter()
            .filter(|v| {
                hazard.kind != HazardKind::Slam
                    || matches!(
                        v,
                        VictimRef::Ability(_) | VictimRef::Objective(_) | VictimRef::Chest(_)
                    )
            })
            .filter(|v| {
                ctx.regs
                    .victim_body(*v)
                    .is_some_and(|(pos, r)| touching(pos, r, hazard.pos, hazard.radius))
            })
            .collect();

        for victim in &victims {
            if !hazard.fired && hazard.burst_damage > 0.0 {
                damage(ctx, *victim, hazard.burst_damage, hazard.source);
            }
            if hazard.dps > 0.0 {
                damage(ctx, *victim, hazard.dps * dt, hazard.source);
            }
            if let (Some(factor), VictimRef::Player(pid)) = (hazard.slow, victim) {
                if let Some(player) = ctx.regs.players.get_mut(pid) {
                    player.slows.push(Slow {
                        factor,
                        remaining: 0.25,
                    });
                }
            }
        }
        hazard.fired = true;
        hazard.remaining -= dt;
        if hazard.remaining > 0.0 {
            ctx.regs.hazards.insert(id, hazard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{BOOMER_BLAST_RADIUS, BOOMER_CENTER_DAMAGE, BOOMER_EDGE_DAMAGE, BOOMER_INNER_RADIUS, PROJECTILE_RADIUS};
    use crate::entities::{Ability, Chest, Hazard, HazardId, LickerState, Troop};
    use crate::spatial::{BoxTags, Boundary};
    use crate::types::AbilityKind;
    use proptest::prelude::*;
    use crate::rng::Rng;

    struct World {
        regs: EntityRegistries,
        env: SpatialEnvironment,
        rng: Rng,
        events: Vec<RuntimeEvent>,
    }

    impl World {
        fn new() -> Self {
            Self {
                regs: EntityRegistries::new(),
                env: SpatialEnvironment::new(Boundary::Rect {
                    center: Vec2::ZERO,
                    half_width: 1_000.0,
                    half_height: 1_000.0,
                }),
                rng: Rng::new(11),
                events: Vec::new(),
            }
        }

        fn ctx(&mut self, dt: f32) -> TickContext<'_> {
            TickContext::new(&mut self.regs, &mut self.env, &mut self.rng, &mut self.events, dt, 0)
        }

        fn player(&mut self, pos: Vec2) -> PlayerId {
            let id = PlayerId(self.regs.alloc());
            self.regs.players.insert(id, Player::new(id, "p".into(), pos));
            id
        }

        fn enemy(&mut self, kind: EnemyKind, pos: Vec2) -> EnemyId {
            let id = EnemyId(self.regs.alloc());
            self.regs.enemies.insert(id, Enemy::new(id, kind, pos, 0));
            id
        }
    }

    fn grapple(world: &mut World, licker: EnemyId, victim: PlayerId) {
        if let Some(enemy) = world.regs.enemies.get_mut(&licker) {
            enemy.behavior = Behavior::Licker(LickerState {
                phase: LickerPhase::Attached {
                    victim,
                    remaining: 2.0,
                },
            });
        }
        if let Some(player) = world.regs.players.get_mut(&victim) {
            player.ensnared_by.insert(licker, 2.0);
        }
    }

    #[test]
    fn armor_example_caps_at_quarter_damage() {
        assert!((mitigate(100.0, 500.0) - 25.0).abs() < 1e-4);
        assert_eq!(mitigate(f32::NAN, 10.0), 0.0);
        assert_eq!(mitigate(-5.0, 10.0), 0.0);
    }

    proptest! {
        #[test]
        fn mitigated_damage_never_below_quarter(raw in 0.0f32..10_000.0, armor in 0.0f32..100_000.0) {
            let applied = mitigate(raw, armor);
            prop_assert!(applied >= raw * 0.25 - 1e-3);
            prop_assert!(applied <= raw + 1e-3);
        }
    }

    #[test]
    fn explosion_falloff_matches_reference_points() {
        let mut world = World::new();
        let near = world.player(Vec2::new(0.0, 0.0));
        let mid = world.player(Vec2::new(50.0, 0.0));
        let edge = world.player(Vec2::new(0.0, 100.0));
        let outside = world.player(Vec2::new(-101.0, 0.0));
        let boomer = world.enemy(EnemyKind::Boomer, Vec2::new(500.0, 500.0));
        let blast = Explosion {
            center: Vec2::ZERO,
            inner_radius: BOOMER_INNER_RADIUS,
            blast_radius: BOOMER_BLAST_RADIUS,
            center_damage: BOOMER_CENTER_DAMAGE,
            edge_damage: BOOMER_EDGE_DAMAGE,
            source: DamageSource::Enemy(boomer),
            knockback: 0.0,
        };
        let mut ctx = world.ctx(0.0);
        let hit = apply_explosion(&mut ctx, &blast);
        assert_eq!(hit.len(), 3);
        let taken = |id: PlayerId| 100.0 - world.regs.players[&id].health;
        assert!((taken(near) - 65.0).abs() < 0.5);
        assert!((taken(mid) - 40.0).abs() < 0.5);
        assert!((taken(edge) - 15.0).abs() < 0.5);
        assert_eq!(taken(outside), 0.0);
    }

    #[test]
    fn contact_damage_sums_before_applying_once() {
        let mut world = World::new();
        let player = world.player(Vec2::ZERO);
        world.enemy(EnemyKind::Basic, Vec2::new(30.0, 0.0));
        world.enemy(EnemyKind::Basic, Vec2::new(-30.0, 0.0));
        world.enemy(EnemyKind::Basic, Vec2::new(300.0, 0.0));
        if let Some(p) = world.regs.players.get_mut(&player) {
            p.stats.armor = 50.0;
        }
        let mut ctx = world.ctx(0.5);
        apply_contact_damage(&mut ctx);
        // Two basics at 12 dps for half a second, halved by armor.
        let lost = 100.0 - world.regs.players[&player].health;
        assert!((lost - 6.0).abs() < 1e-3);
    }

    #[test]
    fn dot_stacks_expire_independently() {
        let source = DamageSource::World;
        let mut stacks = vec![
            DotStack {
                source,
                remaining: 1.0,
                rate: 10.0,
            },
            DotStack {
                source,
                remaining: 3.0,
                rate: 2.0,
            },
        ];
        let first = tick_dots(&mut stacks, 0.5);
        assert!((first - 6.0).abs() < 1e-4);
        let second = tick_dots(&mut stacks, 1.0);
        // Short stack had 0.5s left.
        assert!((second - (5.0 + 2.0)).abs() < 1e-4);
        assert_eq!(stacks.len(), 1);
        let third = tick_dots(&mut stacks, 1.0);
        assert!((third - 2.0).abs() < 1e-4);
        let tail = tick_dots(&mut stacks, 2.0);
        assert!((tail - 1.0).abs() < 1e-4);
        assert!(stacks.is_empty());
        assert_eq!(tick_dots(&mut stacks, 1.0), 0.0);
    }

    #[test]
    fn downed_player_loses_dots() {
        let mut world = World::new();
        let player = world.player(Vec2::ZERO);
        add_dot(
            &mut world.regs,
            VictimRef::Player(player),
            DotStack {
                source: DamageSource::World,
                remaining: 10.0,
                rate: 1_000.0,
            },
        );
        let mut ctx = world.ctx(0.5);
        apply_dots(&mut ctx);
        let p = &world.regs.players[&player];
        assert!(p.downed);
        assert_eq!(p.health, 0.0);
        assert!(p.dots.is_empty());
    }

    #[test]
    fn knockback_decays_to_zero_and_respects_walls() {
        let mut world = World::new();
        world
            .env
            .add_box(Vec2::new(60.0, 0.0), 5.0, 100.0, 0.0, BoxTags::default());
        let mut kb = Knockback::default();
        kb.start(Vec2::new(1_000.0, 0.0), 0.25);
        let mut pos = Vec2::ZERO;
        for _ in 0..10 {
            pos = step_knockback(&world.env, pos, 10.0, &mut kb, 0.05, &QueryFilter::default());
        }
        assert!(pos.x <= 45.0 + 0.1);
        assert!(!kb.is_active());
        assert_eq!(kb.velocity, Vec2::ZERO);
    }

    #[test]
    fn ensnare_cleared_on_every_licker_death_path() {
        // Plain damage.
        let mut world = World::new();
        let victim = world.player(Vec2::ZERO);
        let licker = world.enemy(EnemyKind::Licker, Vec2::new(200.0, 0.0));
        grapple(&mut world, licker, victim);
        let mut ctx = world.ctx(0.0);
        damage(&mut ctx, VictimRef::Enemy(licker), 1_000.0, DamageSource::Player(victim));
        assert!(world.regs.players[&victim].ensnared_by.is_empty());
        assert!(!world.regs.enemies.contains_key(&licker));

        // Friendly explosion.
        let mut world = World::new();
        let victim = world.player(Vec2::ZERO);
        let licker = world.enemy(EnemyKind::Licker, Vec2::new(200.0, 0.0));
        grapple(&mut world, licker, victim);
        let mine = AbilityId(99);
        let mut ctx = world.ctx(0.0);
        apply_explosion(
            &mut ctx,
            &Explosion {
                center: Vec2::new(200.0, 0.0),
                inner_radius: 10.0,
                blast_radius: 50.0,
                center_damage: 500.0,
                edge_damage: 500.0,
                source: DamageSource::Ability(mine),
                knockback: 0.0,
            },
        );
        assert!(world.regs.players[&victim].ensnared_by.is_empty());
        assert_eq!(world.regs.players[&victim].health, 100.0);

        // Troop contact.
        let mut world = World::new();
        let victim = world.player(Vec2::ZERO);
        let licker = world.enemy(EnemyKind::Licker, Vec2::new(200.0, 0.0));
        grapple(&mut world, licker, victim);
        if let Some(e) = world.regs.enemies.get_mut(&licker) {
            e.health = 0.1;
        }
        let troop = TroopId(world.regs.alloc());
        world
            .regs
            .troops
            .insert(troop, Troop::new(troop, None, Vec2::new(230.0, 0.0)));
        let mut ctx = world.ctx(0.5);
        apply_contact_damage(&mut ctx);
        assert!(!world.regs.enemies.contains_key(&licker));
        assert!(world.regs.players[&victim].ensnared_by.is_empty());

        // DOT.
        let mut world = World::new();
        let victim = world.player(Vec2::ZERO);
        let licker = world.enemy(EnemyKind::Licker, Vec2::new(200.0, 0.0));
        grapple(&mut world, licker, victim);
        add_dot(
            &mut world.regs,
            VictimRef::Enemy(licker),
            DotStack {
                source: DamageSource::Player(victim),
                remaining: 5.0,
                rate: 1_000.0,
            },
        );
        let mut ctx = world.ctx(0.5);
        apply_dots(&mut ctx);
        assert!(world.regs.players[&victim].ensnared_by.is_empty());
        assert_eq!(world.regs.players[&victim].kills, 1);
    }

    #[test]
    fn removing_victim_player_releases_licker() {
        let mut world = World::new();
        let victim = world.player(Vec2::ZERO);
        let licker = world.enemy(EnemyKind::Licker, Vec2::new(200.0, 0.0));
        grapple(&mut world, licker, victim);
        if let Some(p) = world.regs.players.get_mut(&victim) {
            p.carried_item = Some("fuel cell".into());
        }
        let removed = remove_player(&mut world.regs, &mut world.env, victim, 0);
        assert!(removed.is_some());
        let state = &world.regs.enemies[&licker].behavior;
        assert!(matches!(
            state,
            Behavior::Licker(LickerState {
                phase: LickerPhase::Cooldown { .. }
            })
        ));
        assert_eq!(world.regs.items.len(), 1);
    }

    #[test]
    fn leaving_player_takes_their_abilities_along() {
        let mut world = World::new();
        let owner = world.player(Vec2::ZERO);
        let other = world.player(Vec2::new(100.0, 0.0));
        let wall = world.env.add_box(
            Vec2::new(40.0, 0.0),
            40.0,
            6.0,
            0.0,
            BoxTags {
                dynamic: true,
                ..BoxTags::default()
            },
        );
        for (owner, shape) in [(owner, Some(wall)), (other, None)] {
            let id = AbilityId(world.regs.alloc());
            world.regs.abilities.insert(
                id,
                Ability {
                    id,
                    kind: if shape.is_some() { AbilityKind::ShieldWall } else { AbilityKind::Turret },
                    owner,
                    pos: Vec2::new(40.0, 0.0),
                    facing: 0.0,
                    radius: 20.0,
                    health: 50.0,
                    health_max: 50.0,
                    expires_at_ms: None,
                    shape,
                    cooldown: 0.0,
                    arm_remaining: 0.0,
                },
            );
        }
        assert!(remove_player(&mut world.regs, &mut world.env, owner, 0).is_some());
        assert_eq!(world.regs.abilities.len(), 1);
        assert!(world.regs.abilities.values().all(|a| a.owner == other));
        assert!(world.env.shape(wall).is_none());
    }

    #[test]
    fn parked_melee_enemy_counts_as_contact() {
        let mut world = World::new();
        let player = world.player(Vec2::ZERO);
        // Parked exactly on its steering ring: radius 18 + 20 + breathing room.
        world.enemy(EnemyKind::Basic, Vec2::new(18.0 + 20.0 + MELEE_BREATHING_ROOM, 0.0));
        let mut ctx = world.ctx(1.0);
        apply_contact_damage(&mut ctx);
        assert!(world.regs.players[&player].health < 100.0);
    }

    #[test]
    fn removing_wallguy_drops_its_shield_shape() {
        let mut world = World::new();
        let wallguy = world.enemy(EnemyKind::WallGuy, Vec2::ZERO);
        let dynamic = BoxTags {
            dynamic: true,
            ..BoxTags::default()
        };
        let shape = world.env.add_box(Vec2::new(30.0, 0.0), 6.0, 30.0, 0.0, dynamic);
        if let Some(Behavior::WallGuy(state)) = world.regs.enemies.get_mut(&wallguy).map(|e| &mut e.behavior) {
            state.shield = Some(shape);
        }
        assert!(remove_enemy(&mut world.regs, &mut world.env, wallguy).is_some());
        assert!(world.env.shape(shape).is_none());
    }

    #[test]
    fn fast_bullet_hits_victim_between_frames() {
        let mut world = World::new();
        let player = world.player(Vec2::new(100.0, 0.0));
        spawn_projectile(
            &mut world.regs,
            Projectile {
                id: crate::entities::ProjectileId(0),
                source: DamageSource::World,
                faction: Faction::Hostile,
                kind: ProjectileKind::Bullet,
                pos: Vec2::ZERO,
                vel: Vec2::new(6_000.0, 0.0),
                radius: PROJECTILE_RADIUS,
                damage: 10.0,
                life: 1.0,
                pierce: 0,
                hits: Vec::new(),
            },
        );
        let mut ctx = world.ctx(0.1);
        update_projectiles(&mut ctx);
        assert_eq!(world.regs.players[&player].health, 90.0);
        assert!(world.regs.projectiles.is_empty());
    }

    #[test]
    fn walls_consume_bullets_before_victims_behind_them() {
        let mut world = World::new();
        let player = world.player(Vec2::new(100.0, 0.0));
        world
            .env
            .add_box(Vec2::new(50.0, 0.0), 4.0, 40.0, 0.0, BoxTags::default());
        spawn_projectile(
            &mut world.regs,
            Projectile {
                id: crate::entities::ProjectileId(0),
                source: DamageSource::World,
                faction: Faction::Hostile,
                kind: ProjectileKind::Bullet,
                pos: Vec2::ZERO,
                vel: Vec2::new(2_000.0, 0.0),
                radius: PROJECTILE_RADIUS,
                damage: 10.0,
                life: 1.0,
                pierce: 0,
                hits: Vec::new(),
            },
        );
        let mut ctx = world.ctx(0.1);
        update_projectiles(&mut ctx);
        assert_eq!(world.regs.players[&player].health, 100.0);
        assert!(world.regs.projectiles.is_empty());
    }

    #[test]
    fn hitscan_picks_nearest_enemy_and_pushes_it() {
        let mut world = World::new();
        let shooter = world.player(Vec2::ZERO);
        let near = world.enemy(EnemyKind::Basic, Vec2::new(100.0, 0.0));
        let far = world.enemy(EnemyKind::Basic, Vec2::new(200.0, 0.0));
        let mut ctx = world.ctx(0.0);
        let hit = fire_hitscan(
            &mut ctx,
            Vec2::ZERO,
            Vec2::new(1.0, 0.0),
            600.0,
            10.0,
            DamageSource::Player(shooter),
            Some((100.0, 0.1)),
        );
        assert_eq!(hit, Some(VictimRef::Enemy(near)));
        assert_eq!(world.regs.enemies[&near].health, 30.0);
        assert!(world.regs.enemies[&near].knockback.is_active());
        assert_eq!(world.regs.enemies[&far].health, 40.0);
    }

    #[test]
    fn slam_hazard_only_reaches_structures() {
        let mut world = World::new();
        let player = world.player(Vec2::ZERO);
        let ability = AbilityId(world.regs.alloc());
        world.regs.abilities.insert(
            ability,
            Ability {
                id: ability,
                kind: AbilityKind::Turret,
                owner: player,
                pos: Vec2::new(10.0, 0.0),
                facing: 0.0,
                radius: 20.0,
                health: 100.0,
                health_max: 100.0,
                expires_at_ms: None,
                shape: None,
                cooldown: 0.0,
                arm_remaining: 0.0,
            },
        );
        let chest = crate::entities::ChestId(world.regs.alloc());
        world.regs.chests.insert(
            chest,
            Chest {
                id: chest,
                pos: Vec2::new(-10.0, 0.0),
                radius: 16.0,
                health: 30.0,
                health_max: 30.0,
                state: ChestState::Closed,
            },
        );
        let hazard = HazardId(world.regs.alloc());
        world.regs.hazards.insert(
            hazard,
            Hazard {
                id: hazard,
                kind: HazardKind::Slam,
                source: DamageSource::Enemy(EnemyId(500)),
                pos: Vec2::ZERO,
                radius: 40.0,
                dps: 0.0,
                burst_damage: 40.0,
                slow: None,
                remaining: 0.2,
                fired: false,
            },
        );
        let mut ctx = world.ctx(0.1);
        update_hazards(&mut ctx);
        let kills = std::mem::take(&mut ctx.kills);
        assert_eq!(world.regs.players[&player].health, 100.0);
        assert_eq!(world.regs.abilities[&ability].health, 60.0);
        assert_eq!(world.regs.chests[&chest].state, ChestState::Opened);
        assert_eq!(kills.len(), 1);

        // Burst only lands once.
        let mut ctx = world.ctx(0.05);
        update_hazards(&mut ctx);
        assert_eq!(world.regs.abilities[&ability].health, 60.0);
    }

    #[test]
    fn cone_attack_respects_facing() {
        let mut world = World::new();
        let front = world.player(Vec2::new(60.0, 0.0));
        let behind = world.player(Vec2::new(-60.0, 0.0));
        let mut ctx = world.ctx(0.0);
        let hit = cone_attack(&mut ctx, Vec2::ZERO, 0.0, 90.0, 0.6, 20.0, DamageSource::World);
        assert_eq!(hit, vec![VictimRef::Player(front)]);
        assert_eq!(world.regs.players[&behind].health, 100.0);
    }
}
