use super::*;

use crate::combat::SpawnRequest;
use crate::entities::{Enemy, EnemyId, PreAggro};
use crate::geometry::Vec2;
use crate::spatial::QueryFilter;
use crate::types::EnemyKind;

const SPAWN_SEARCH_RADIUS: f32 = 160.0;
const SPAWN_POINT_ATTEMPTS: usize = 12;

#[derive(Clone, Debug, Default)]
pub(super) struct SpawnState {
    pub next_ambient_ms: u64,
}

impl Room {
    /// Fixed enemies from the layout plus the opening population.
    pub(super) fn populate_level(&mut self) {
        let fixed = self.layout.fixed_enemies.clone();
        for (kind, pos) in fixed {
            self.spawn_enemy(kind, pos, false);
        }
        let count = get_initial_enemy_count(self.mode.level_type, self.regs.players.len().max(1));
        for _ in 0..count {
            let kind = self.mode.pick_kind(&mut self.rng);
            let near = self.pick_spawn_point();
            self.spawn_enemy(kind, near, true);
        }
        self.spawns.next_ambient_ms = self.now_ms + self.mode.ambient_interval_ms;
    }

    /// Places one enemy at the nearest clear spot to `near`. Fresh spawns
    /// can be handed a pre-aggro goal at the closest player.
    pub(super) fn spawn_enemy(&mut self, kind: EnemyKind, near: Vec2, pre_aggro: bool) -> EnemyId {
        let id = EnemyId(self.regs.alloc());
        let mut enemy = Enemy::new(id, kind, near, self.now_ms);
        enemy.pos = self.env.find_clear_position(
            near,
            enemy.radius,
            SPAWN_SEARCH_RADIUS,
            &mut self.rng,
            &QueryFilter::enemy(),
        );
        if pre_aggro && !kind.is_stationary() {
            let goal = self
                .regs
                .players
                .values()
                .filter(|p| p.is_targetable())
                .min_by(|a, b| {
                    a.pos
                        .distance_sq(enemy.pos)
                        .total_cmp(&b.pos.distance_sq(enemy.pos))
                })
                .map(|p| p.pos);
            enemy.pre_aggro = goal.map(|goal| PreAggro {
                goal,
                until_ms: self.now_ms + PRE_AGGRO_MAX_MS,
            });
        }
        self.regs.enemies.insert(id, enemy);
        self.events.push(RuntimeEvent::EnemySpawned {
            enemy_id: id.to_string(),
            kind,
        });
        id
    }

    /// A layout spawn point far enough from every player, or the farthest
    /// one when none qualifies.
    fn pick_spawn_point(&mut self) -> Vec2 {
        let points = &self.layout.enemy_spawns;
        if points.is_empty() {
            return self.env.boundary.center();
        }
        let player_positions: Vec<Vec2> = self.regs.players.values().map(|p| p.pos).collect();
        let nearest_player = |p: Vec2| {
            player_positions
                .iter()
                .map(|q| q.distance(p))
                .fold(f32::INFINITY, f32::min)
        };
        for _ in 0..SPAWN_POINT_ATTEMPTS {
            let candidate = points[self.rng.pick_index(points.len())];
            if nearest_player(candidate) >= SPAWN_MIN_PLAYER_DIST {
                return candidate;
            }
        }
        points
            .iter()
            .copied()
            .max_by(|a, b| nearest_player(*a).total_cmp(&nearest_player(*b)))
            .unwrap_or_else(|| self.env.boundary.center())
    }

    /// Trickles enemies in on the mode's interval, up to the party-size cap.
    pub(super) fn update_ambient_spawns(&mut self) {
        if self.mission.phase != MissionPhase::InProgress || self.now_ms < self.spawns.next_ambient_ms {
            return;
        }
        self.spawns.next_ambient_ms = self.now_ms + self.mode.ambient_interval_ms;
        let cap = get_ambient_enemy_cap(self.regs.players.len());
        if self.regs.enemies.len() >= cap {
            return;
        }
        let kind = self.mode.pick_kind(&mut self.rng);
        let near = self.pick_spawn_point();
        self.spawn_enemy(kind, near, true);
    }

    /// Spawns a burst of enemies around `near` (or spawn points when `None`).
    pub(super) fn spawn_horde(&mut self, count: usize, near: Option<Vec2>) -> usize {
        for _ in 0..count {
            let kind = self.mode.pick_kind(&mut self.rng);
            let at = match near {
                Some(center) => center + Vec2::from_angle(self.rng.angle()) * self.rng.range(60.0, 160.0),
                None => self.pick_spawn_point(),
            };
            self.spawn_enemy(kind, at, true);
        }
        info!(room = %self.id, count, "horde spawned");
        self.events.push(RuntimeEvent::HordeSpawned { count });
        count
    }

    pub(super) fn handle_spawn_requests(&mut self, requests: Vec<SpawnRequest>) {
        for request in requests {
            match request {
                SpawnRequest::Reinforcements { near, count } => {
                    self.spawn_horde(count, Some(near));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::tests::level_room;
    use crate::types::LevelType;

    #[test]
    fn opening_population_matches_party_size() {
        let (room, _) = level_room(51, 2);
        let expected = get_initial_enemy_count(LevelType::Survival, 2) + room.layout.fixed_enemies.len();
        assert_eq!(room.regs.enemies.len(), expected);
        for enemy in room.regs.enemies.values() {
            assert!(room.env.is_inside_bounds(enemy.pos, enemy.radius));
        }
    }

    #[test]
    fn fresh_spawns_head_for_a_player() {
        let (room, _) = level_room(52, 1);
        let with_goal = room
            .regs
            .enemies
            .values()
            .filter(|e| e.pre_aggro.is_some())
            .count();
        assert!(with_goal > 0);
        for enemy in room.regs.enemies.values() {
            if let Some(pre) = enemy.pre_aggro {
                assert_eq!(pre.until_ms, room.now_ms + PRE_AGGRO_MAX_MS);
            }
        }
    }

    #[test]
    fn ambient_spawns_respect_the_cap() {
        let (mut room, _) = level_room(53, 1);
        let cap = get_ambient_enemy_cap(1);
        while room.regs.enemies.len() < cap {
            let at = room.pick_spawn_point();
            room.spawn_enemy(EnemyKind::Basic, at, false);
        }
        room.spawns.next_ambient_ms = 0;
        room.update_ambient_spawns();
        assert_eq!(room.regs.enemies.len(), cap);
    }

    #[test]
    fn reinforcement_requests_become_hordes() {
        let (mut room, _) = level_room(54, 1);
        let before = room.regs.enemies.len();
        room.handle_spawn_requests(vec![SpawnRequest::Reinforcements {
            near: Vec2::ZERO,
            count: 4,
        }]);
        assert_eq!(room.regs.enemies.len(), before + 4);
        assert!(room
            .drain_events()
            .iter()
            .any(|e| matches!(e, RuntimeEvent::HordeSpawned { count: 4 })));
    }
}
