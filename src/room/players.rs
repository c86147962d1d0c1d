use super::*;

use crate::entities::{DamageSource, DashState, ReviveChannel};
use crate::geometry::Vec2;
use crate::spatial::QueryFilter;

/// Consumes each player's buffered input: status timers, stamina, dash,
/// movement and the weapon.
pub(super) fn update_players(ctx: &mut TickContext<'_>) {
    let ids: Vec<PlayerId> = ctx.regs.players.keys().copied().collect();
    for id in ids {
        move_player(ctx, id);
        fire_weapon(ctx, id);
    }
}

fn move_player(ctx: &mut TickContext<'_>, id: PlayerId) {
    let dt = ctx.dt;
    let now_ms = ctx.now_ms;
    let env: &SpatialEnvironment = &*ctx.env;
    let Some(player) = ctx.regs.players.get_mut(&id) else {
        return;
    };

    player.aim = player.input.aim;
    player.in_dialogue = player.input.dialogue_open;
    player.evil_progress = player.input.evil_progress;
    for slow in &mut player.slows {
        slow.remaining -= dt;
    }
    player.slows.retain(|s| s.remaining > 0.0);
    player.fire_cooldown = (player.fire_cooldown - dt).max(0.0);

    if player.downed {
        return;
    }

    let wish = player.input.move_vector();
    if player.input.dash {
        player.input.dash = false;
        try_start_dash(player, wish, now_ms);
    }

    if player.dash.remaining > 0.0 {
        let active = player.dash.remaining.min(dt);
        let delta = player.dash.direction * DASH_SPEED * active;
        player.pos = env
            .move_circle(player.pos, player.radius, delta, &QueryFilter::default())
            .pos;
        player.dash.remaining -= dt;
        if player.dash.remaining <= 0.0 {
            player.dash.remaining = 0.0;
            player.invulnerable_sources = player.invulnerable_sources.saturating_sub(1);
        }
        return;
    }

    // Knockback owns the body while it lasts.
    if player.knockback.is_active() {
        return;
    }

    let exhausted = now_ms < player.exhausted_until_ms;
    let sprinting = player.input.sprint && !exhausted && wish != Vec2::ZERO;
    if sprinting {
        player.stamina = (player.stamina - STAMINA_DRAIN_PER_SEC * dt).max(0.0);
        if player.stamina <= 0.0 {
            player.exhausted_until_ms = now_ms + STAMINA_EXHAUST_LOCK_MS;
        }
    } else if !exhausted {
        player.stamina = (player.stamina + STAMINA_RECHARGE_PER_SEC * dt).min(player.stamina_max);
    }

    if wish == Vec2::ZERO {
        return;
    }
    let mut speed = player.base_speed * player.stats.speed_multiplier * player.slow_factor();
    if sprinting {
        speed *= SPRINT_MULTIPLIER;
    }
    if !player.ensnared_by.is_empty() {
        speed *= ENSNARED_SPEED_MULTIPLIER;
    }
    player.pos = env
        .move_circle(player.pos, player.radius, wish * speed * dt, &QueryFilter::default())
        .pos;
}

fn try_start_dash(player: &mut Player, wish: Vec2, now_ms: u64) {
    if player.dash.remaining > 0.0
        || now_ms < player.dash.ready_at_ms
        || player.stamina < DASH_STAMINA_COST
        || !player.ensnared_by.is_empty()
    {
        return;
    }
    let direction = if wish == Vec2::ZERO {
        Vec2::from_angle(player.aim)
    } else {
        wish
    };
    player.stamina -= DASH_STAMINA_COST;
    player.dash = DashState {
        remaining: DASH_DURATION,
        direction,
        ready_at_ms: now_ms + DASH_COOLDOWN_MS,
    };
    player.invulnerable_sources += 1;
}

fn fire_weapon(ctx: &mut TickContext<'_>, id: PlayerId) {
    let Some(player) = ctx.regs.players.get(&id) else {
        return;
    };
    if !player.input.fire || player.downed || player.in_dialogue || player.fire_cooldown > 0.0 {
        return;
    }
    let origin = player.pos;
    let aim = player.aim;
    let stats = player.stats;

    let crit = ctx.rng.bool(stats.crit_chance);
    let raw = if crit {
        stats.attack_power * stats.crit_multiplier
    } else {
        stats.attack_power
    };
    combat::fire_hitscan(
        ctx,
        origin,
        Vec2::from_angle(aim),
        WEAPON_RANGE,
        raw,
        DamageSource::Player(id),
        Some((WEAPON_KNOCKBACK_SPEED, WEAPON_KNOCKBACK_TIME)),
    );
    if let Some(player) = ctx.regs.players.get_mut(&id) {
        player.fire_cooldown = fire_interval(stats.attack_speed);
    }
}

/// Advances accepted revive channels; a channel breaks when the reviver
/// leaves, goes down or walks out of range.
pub(super) fn update_revives(ctx: &mut TickContext<'_>, dt_ms: u64) {
    let ids: Vec<PlayerId> = ctx.regs.players.keys().copied().collect();
    for id in ids {
        let Some(channel) = ctx.regs.players.get(&id).and_then(|p| p.revive) else {
            continue;
        };
        let Some(pos) = ctx.regs.players.get(&id).map(|p| p.pos) else {
            continue;
        };
        let reviver_ok = ctx.regs.players.get(&channel.reviver).is_some_and(|r| {
            !r.downed && r.pos.distance(pos) <= REVIVE_RANGE + r.radius
        });
        let Some(player) = ctx.regs.players.get_mut(&id) else {
            continue;
        };
        if !player.downed || !reviver_ok {
            player.revive = None;
            continue;
        }
        if !channel.accepted {
            continue;
        }
        let elapsed_ms = channel.elapsed_ms + dt_ms;
        if elapsed_ms < REVIVE_CHANNEL_MS {
            player.revive = Some(ReviveChannel {
                elapsed_ms,
                ..channel
            });
            continue;
        }
        player.revive = None;
        player.downed = false;
        player.health = (player.health_max * REVIVE_HEALTH_FRACTION).clamp(1.0, player.health_max);
        ctx.events.push(RuntimeEvent::PlayerRevived {
            player_id: id.to_string(),
            by: channel.reviver.to_string(),
        });
    }
}
