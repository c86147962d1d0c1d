use super::*;

use std::f32::consts::FRAC_PI_2;

use crate::combat::Explosion;
use crate::entities::{
    Ability, AbilityId, DamageSource, Faction, Projectile, ProjectileId, ProjectileKind,
};
use crate::geometry::Vec2;
use crate::spatial::{BoxTags, QueryFilter};
use crate::types::AbilityKind;

const MAX_ABILITIES_PER_PLAYER: usize = 3;

impl Room {
    /// Places an ability in front of the caster.
    pub fn spawn_ability(&mut self, player: PlayerId, kind: AbilityKind) -> Result<AbilityId, CommandError> {
        let caster = self.regs.players.get(&player).ok_or(CommandError::UnknownPlayer)?;
        if self.scene != Scene::Level {
            return Err(CommandError::InvalidState("abilities only work in a level"));
        }
        if caster.downed {
            return Err(CommandError::InvalidState("downed"));
        }
        let owned = self
            .regs
            .abilities
            .values()
            .filter(|a| a.owner == player)
            .count();
        if owned >= MAX_ABILITIES_PER_PLAYER {
            return Err(CommandError::NotAllowed("ability limit reached"));
        }

        let facing = caster.aim;
        let ahead = caster.pos + Vec2::from_angle(facing) * (caster.radius + STRUCTURE_RADIUS + 10.0);
        let pos = self.env.find_clear_position(
            ahead,
            STRUCTURE_RADIUS,
            80.0,
            &mut self.rng,
            &QueryFilter::default(),
        );
        let id = AbilityId(self.regs.alloc());
        let now = self.now_ms;
        let (health, expires_at_ms) = match kind {
            AbilityKind::ShieldWall => (SHIELD_WALL_HEALTH, Some(now + SHIELD_WALL_LIFE_MS)),
            AbilityKind::Turret => (ABILITY_TURRET_HEALTH, Some(now + ABILITY_TURRET_LIFE_MS)),
            AbilityKind::Mine => (1.0, None),
            AbilityKind::HealingBox => (HEALING_BOX_HEALTH, Some(now + HEALING_BOX_LIFE_MS)),
            AbilityKind::Attractor => (ATTRACTOR_HEALTH, None),
        };
        let shape = (kind == AbilityKind::ShieldWall).then(|| {
            self.env.add_box(
                pos,
                SHIELD_WALL_HALF_WIDTH,
                SHIELD_WALL_HALF_HEIGHT,
                facing + FRAC_PI_2,
                BoxTags {
                    dynamic: true,
                    ..BoxTags::default()
                },
            )
        });
        self.regs.abilities.insert(
            id,
            Ability {
                id,
                kind,
                owner: player,
                pos,
                facing,
                radius: STRUCTURE_RADIUS,
                health,
                health_max: health,
                expires_at_ms,
                shape,
                cooldown: 0.0,
                arm_remaining: if kind == AbilityKind::Mine { MINE_ARM_TIME } else { 0.0 },
            },
        );
        debug!(room = %self.id, ability = %id, ?kind, "ability placed");
        Ok(id)
    }
}

/// Expires abilities and runs their per-kind effect.
pub(super) fn update_abilities(ctx: &mut TickContext<'_>) {
    let ids: Vec<AbilityId> = ctx.regs.abilities.keys().copied().collect();
    for id in ids {
        let Some(ability) = ctx.regs.abilities.get(&id) else {
            continue;
        };
        let kind = ability.kind;
        let expired = ability.expires_at_ms.is_some_and(|at| ctx.now_ms >= at);
        if expired || !ability.is_alive() {
            expire(ctx, id);
            continue;
        }
        match kind {
            AbilityKind::ShieldWall => {}
            AbilityKind::Turret => turret(ctx, id),
            AbilityKind::Mine => mine(ctx, id),
            AbilityKind::HealingBox => healing_box(ctx, id),
            AbilityKind::Attractor => {
                let drain = ATTRACTOR_DRAIN_PER_SEC * ctx.dt;
                let depleted = ctx.regs.abilities.get_mut(&id).is_some_and(|a| {
                    a.health = (a.health - drain).max(0.0);
                    a.health <= 0.0
                });
                if depleted {
                    expire(ctx, id);
                }
            }
        }
    }
}

fn expire(ctx: &mut TickContext<'_>, id: AbilityId) {
    combat::remove_ability(ctx.regs, ctx.env, id);
    ctx.events.push(RuntimeEvent::AbilityExpired {
        ability_id: id.to_string(),
    });
}

fn turret(ctx: &mut TickContext<'_>, id: AbilityId) {
    let dt = ctx.dt;
    let Some(ability) = ctx.regs.abilities.get_mut(&id) else {
        return;
    };
    ability.cooldown = (ability.cooldown - dt).max(0.0);
    if ability.cooldown > 0.0 {
        return;
    }
    let pos = ability.pos;
    let env: &SpatialEnvironment = &*ctx.env;
    let target = ctx
        .regs
        .enemies
        .values()
        .filter(|e| e.alive)
        .map(|e| (e.pos.distance_sq(pos), e.id, e.pos))
        .filter(|(d, _, _)| *d <= ABILITY_TURRET_RANGE * ABILITY_TURRET_RANGE)
        .filter(|(_, _, at)| !env.line_hits_any(pos, *at))
        .min_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    let Some((_, _, at)) = target else {
        return;
    };
    let dir = (at - pos).normalize_or_zero();
    if let Some(ability) = ctx.regs.abilities.get_mut(&id) {
        ability.facing = dir.angle();
        ability.cooldown = ABILITY_TURRET_COOLDOWN;
    }
    combat::spawn_projectile(
        ctx.regs,
        Projectile {
            id: ProjectileId(0),
            source: DamageSource::Ability(id),
            faction: Faction::Friendly,
            kind: ProjectileKind::Bullet,
            pos: pos + dir * (STRUCTURE_RADIUS + PROJECTILE_RADIUS + 1.0),
            vel: dir * ABILITY_TURRET_BULLET_SPEED,
            radius: PROJECTILE_RADIUS,
            damage: ABILITY_TURRET_DAMAGE,
            life: ABILITY_TURRET_RANGE / ABILITY_TURRET_BULLET_SPEED,
            pierce: 0,
            hits: Vec::new(),
        },
    );
}

fn mine(ctx: &mut TickContext<'_>, id: AbilityId) {
    let dt = ctx.dt;
    let Some(ability) = ctx.regs.abilities.get_mut(&id) else {
        return;
    };
    if ability.arm_remaining > 0.0 {
        ability.arm_remaining = (ability.arm_remaining - dt).max(0.0);
        return;
    }
    let pos = ability.pos;
    let triggered = ctx.regs.enemies.values().any(|e| {
        let reach = MINE_TRIGGER_RADIUS + e.radius;
        e.alive && e.pos.distance_sq(pos) <= reach * reach
    });
    if triggered {
        combat::apply_explosion(ctx, &Explosion::mine(pos, DamageSource::Ability(id)));
        expire(ctx, id);
    }
}

fn healing_box(ctx: &mut TickContext<'_>, id: AbilityId) {
    let Some(pos) = ctx.regs.abilities.get(&id).map(|a| a.pos) else {
        return;
    };
    let amount = HEALING_BOX_RATE * ctx.dt;
    for player in ctx.regs.players.values_mut() {
        let reach = HEALING_BOX_RADIUS + player.radius;
        if player.pos.distance_sq(pos) <= reach * reach {
            player.heal(amount);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Enemy, EnemyId};
    use crate::room::tests::level_room;
    use crate::types::EnemyKind;

    fn quiet_level(seed: u32) -> (Room, PlayerId) {
        let (mut room, ids) = level_room(seed, 1);
        room.regs.enemies.clear();
        room.regs.projectiles.clear();
        (room, ids[0])
    }

    fn place_enemy(room: &mut Room, kind: EnemyKind, pos: Vec2) -> EnemyId {
        let id = EnemyId(room.regs.alloc());
        room.regs.enemies.insert(id, Enemy::new(id, kind, pos, room.now_ms));
        id
    }

    #[test]
    fn abilities_need_a_level_and_a_living_caster() {
        let mut room = Room::with_defaults("lobby", 1, RoomConfig::default());
        let id = room.add_player("a").expect("space");
        assert_eq!(
            room.spawn_ability(id, AbilityKind::Mine),
            Err(CommandError::InvalidState("abilities only work in a level"))
        );
        assert_eq!(
            room.spawn_ability(PlayerId(999), AbilityKind::Mine),
            Err(CommandError::UnknownPlayer)
        );
    }

    #[test]
    fn shield_wall_shape_goes_away_on_expiry() {
        let (mut room, player) = quiet_level(11);
        let boxes_before = room.env.boxes().len();
        let wall = room.spawn_ability(player, AbilityKind::ShieldWall).expect("placed");
        assert_eq!(room.env.boxes().len(), boxes_before + 1);
        room.now_ms += SHIELD_WALL_LIFE_MS;
        room.step(TICK_MS);
        assert!(!room.regs.abilities.contains_key(&wall));
        assert_eq!(room.env.boxes().len(), boxes_before);
        assert!(room
            .drain_events()
            .iter()
            .any(|e| matches!(e, RuntimeEvent::AbilityExpired { .. })));
    }

    #[test]
    fn armed_mine_detonates_under_an_enemy() {
        let (mut room, player) = quiet_level(12);
        let mine = room.spawn_ability(player, AbilityKind::Mine).expect("placed");
        let at = room.regs.abilities[&mine].pos;
        let target = place_enemy(&mut room, EnemyKind::DefenseTurret, at + Vec2::new(500.0, 0.0));

        room.step(TICK_MS);
        assert!(room.regs.abilities.contains_key(&mine), "unarmed mine holds");

        if let Some(enemy) = room.regs.enemies.get_mut(&target) {
            enemy.pos = at + Vec2::new(10.0, 0.0);
        }
        let arm_ticks = (MINE_ARM_TIME * 1000.0) as u64 / TICK_MS + 2;
        for _ in 0..arm_ticks {
            room.step(TICK_MS);
            if !room.regs.abilities.contains_key(&mine) {
                break;
            }
        }
        assert!(!room.regs.abilities.contains_key(&mine));
        assert!(room
            .drain_events()
            .iter()
            .any(|e| matches!(e, RuntimeEvent::Explosion { .. })));
    }

    #[test]
    fn attractor_drains_itself() {
        let (mut room, player) = quiet_level(13);
        let id = room.spawn_ability(player, AbilityKind::Attractor).expect("placed");
        room.step(TICK_MS);
        let ability = &room.regs.abilities[&id];
        assert!(ability.health < ability.health_max);
        assert_eq!(ability.expires_at_ms, None);
    }

    #[test]
    fn healing_box_heals_nearby_players() {
        let (mut room, player) = quiet_level(14);
        room.regs.players.get_mut(&player).expect("player").health = 50.0;
        room.spawn_ability(player, AbilityKind::HealingBox).expect("placed");
        for _ in 0..5 {
            room.regs.enemies.clear();
            room.step(TICK_MS);
        }
        assert!(room.regs.players[&player].health > 50.0);
    }

    #[test]
    fn turret_fires_at_enemies_in_sight() {
        let (mut room, player) = quiet_level(15);
        let turret = room.spawn_ability(player, AbilityKind::Turret).expect("placed");
        let at = room.regs.abilities[&turret].pos;
        let offset = Vec2::from_angle(room.regs.abilities[&turret].facing) * 120.0;
        place_enemy(&mut room, EnemyKind::DefenseTurret, at + offset);
        room.step(TICK_MS);
        assert!(room
            .regs
            .projectiles
            .values()
            .any(|p| p.source == DamageSource::Ability(turret)));
    }

    #[test]
    fn caster_is_limited() {
        let (mut room, player) = quiet_level(16);
        for _ in 0..MAX_ABILITIES_PER_PLAYER {
            room.spawn_ability(player, AbilityKind::Attractor).expect("placed");
        }
        assert!(matches!(
            room.spawn_ability(player, AbilityKind::Attractor),
            Err(CommandError::NotAllowed(_))
        ));
    }
}
