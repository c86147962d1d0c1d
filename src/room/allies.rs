use super::*;

use crate::entities::{Troop, TroopId};
use crate::geometry::Vec2;
use crate::spatial::QueryFilter;

const MAX_TROOPS_PER_PLAYER: usize = 2;

impl Room {
    /// Calls in an allied troop next to `owner`.
    pub fn spawn_troop(&mut self, owner: PlayerId) -> Result<TroopId, CommandError> {
        let player = self.regs.players.get(&owner).ok_or(CommandError::UnknownPlayer)?;
        if self.scene != Scene::Level {
            return Err(CommandError::InvalidState("troops only deploy in a level"));
        }
        if player.downed {
            return Err(CommandError::InvalidState("downed"));
        }
        let near = player.pos;
        let owned = self
            .regs
            .troops
            .values()
            .filter(|t| t.owner == Some(owner))
            .count();
        if owned >= MAX_TROOPS_PER_PLAYER {
            return Err(CommandError::NotAllowed("troop limit reached"));
        }
        let pos = self.env.find_clear_position(
            near + Vec2::new(TROOP_FOLLOW_DIST, 0.0),
            TROOP_RADIUS,
            120.0,
            &mut self.rng,
            &QueryFilter::default(),
        );
        let id = TroopId(self.regs.alloc());
        self.regs.troops.insert(id, Troop::new(id, Some(owner), pos));
        debug!(room = %self.id, troop = %id, owner = %owner, "troop deployed");
        Ok(id)
    }
}

/// Troops close on the nearest enemy in aggro range and otherwise trail
/// their owner. Contact damage is resolved by the combat stage.
pub(super) fn update_troops(ctx: &mut TickContext<'_>) {
    let dt = ctx.dt;
    let env: &SpatialEnvironment = &*ctx.env;
    let enemies: Vec<(Vec2, f32)> = ctx
        .regs
        .enemies
        .values()
        .filter(|e| e.alive)
        .map(|e| (e.pos, e.radius))
        .collect();
    let owners: BTreeMap<PlayerId, Vec2> = ctx
        .regs
        .players
        .values()
        .map(|p| (p.id, p.pos))
        .collect();

    for troop in ctx.regs.troops.values_mut() {
        if !troop.alive || troop.knockback.is_active() {
            continue;
        }
        let prey = enemies
            .iter()
            .map(|(pos, radius)| (pos.distance(troop.pos), *pos, *radius))
            .filter(|(d, _, _)| *d <= TROOP_AGGRO_RANGE)
            .min_by(|a, b| a.0.total_cmp(&b.0));
        let goal = match prey {
            Some((dist, pos, radius)) => {
                let contact = troop.radius + radius;
                (dist > contact).then_some((pos, dist - contact))
            }
            None => troop
                .owner
                .and_then(|owner| owners.get(&owner))
                .map(|pos| (*pos, pos.distance(troop.pos)))
                .filter(|(_, d)| *d > TROOP_FOLLOW_DIST)
                .map(|(pos, d)| (pos, d - TROOP_FOLLOW_DIST)),
        };
        let Some((target, gap)) = goal else {
            continue;
        };
        let step = (troop.speed * dt).min(gap);
        let delta = (target - troop.pos).normalize_or_zero() * step;
        troop.pos = env
            .move_circle(troop.pos, troop.radius, delta, &QueryFilter::default())
            .pos;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Enemy, EnemyId};
    use crate::room::tests::level_room;
    use crate::types::EnemyKind;

    #[test]
    fn troop_trails_owner_and_hunts_enemies() {
        let (mut room, ids) = level_room(31, 1);
        let owner = ids[0];
        room.regs.enemies.clear();
        let troop = room.spawn_troop(owner).expect("deployed");
        let home = room.regs.players[&owner].pos;
        room.regs.troops.get_mut(&troop).expect("troop").pos = home + Vec2::new(250.0, 0.0);
        room.step(TICK_MS);
        let after = room.regs.troops[&troop].pos;
        assert!(after.distance(home) < 250.0);

        room.regs.enemies.clear();
        let prey = EnemyId(room.regs.alloc());
        let troop_pos = room.regs.troops[&troop].pos;
        room.regs.enemies.insert(
            prey,
            Enemy::new(prey, EnemyKind::DefenseTurret, troop_pos + Vec2::new(0.0, 150.0), room.now_ms),
        );
        room.step(TICK_MS);
        let moved = room.regs.troops[&troop].pos;
        assert!(moved.y > troop_pos.y);
    }

    #[test]
    fn troops_are_limited_and_orphaned_on_leave() {
        let (mut room, ids) = level_room(32, 2);
        let owner = ids[0];
        for _ in 0..MAX_TROOPS_PER_PLAYER {
            room.spawn_troop(owner).expect("deployed");
        }
        assert!(room.spawn_troop(owner).is_err());
        room.remove_player(owner);
        assert!(room.regs.troops.values().all(|t| t.owner.is_none()));
    }
}
