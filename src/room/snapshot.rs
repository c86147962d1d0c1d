use super::*;

use serde_json::{Map, Value};

use crate::entities::{Faction, Player, ProjectileKind};
use crate::geometry::Vec2;
use crate::types::{
    AbilityView, ChestView, EnemyView, EntitySnapshot, FullState, GroundItemView, HazardView,
    NpcView, ObjectiveView, PlayerDelta, PlayerView, ProjectileView, StateDelta, StatsView,
    TroopView, UiSnapshot, WorldInit,
};

/// What the last delta told clients, per player and per field.
#[derive(Debug)]
pub(super) struct SnapshotState {
    last: BTreeMap<PlayerId, Map<String, Value>>,
    frames_since_full: u32,
    pending_full: bool,
}

impl Default for SnapshotState {
    fn default() -> Self {
        Self {
            last: BTreeMap::new(),
            frames_since_full: 0,
            pending_full: true,
        }
    }
}

impl SnapshotState {
    /// The next delta goes out as a full resync.
    pub fn force_full(&mut self) {
        self.pending_full = true;
    }
}

impl Room {
    fn player_view(&self, player: &Player) -> PlayerView {
        PlayerView {
            id: player.id.to_string(),
            name: player.name.clone(),
            x: player.pos.x,
            y: player.pos.y,
            radius: player.radius,
            aim: player.aim,
            health: player.health,
            health_max: player.health_max,
            stamina: player.stamina,
            stamina_max: player.stamina_max,
            exhausted: self.now_ms < player.exhausted_until_ms,
            stats: StatsView {
                armor: player.stats.armor,
                attack_speed: player.stats.attack_speed,
                attack_power: player.stats.attack_power,
                crit_chance: player.stats.crit_chance,
                crit_multiplier: player.stats.crit_multiplier,
                speed_multiplier: player.stats.speed_multiplier,
            },
            coins: player.coins,
            kills: player.kills,
            inventory: player.inventory.iter().map(|i| i.name.clone()).collect(),
            carried_item: player.carried_item.clone(),
            downed: player.downed,
            revive_progress: player
                .revive
                .map(|r| (r.elapsed_ms as f32 / REVIVE_CHANNEL_MS as f32).min(1.0)),
            ensnared: !player.ensnared_by.is_empty(),
            slowed: !player.slows.is_empty(),
            invulnerable: player.is_invulnerable(),
            dashing: player.dash.remaining > 0.0,
            in_dialogue: player.in_dialogue,
            invisible: player.invisible,
            evil_progress: player.evil_progress,
            cosmetic: player.cosmetic.clone(),
            last_input_seq: player.input.seq,
        }
    }

    pub fn get_full_state(&self) -> FullState {
        FullState {
            tick: self.tick,
            now_ms: self.now_ms,
            players: self.regs.players.values().map(|p| self.player_view(p)).collect(),
        }
    }

    /// Player fields changed since the previous call. Every
    /// `full_resync_frames` calls, and after a scene change, everything is
    /// sent regardless.
    pub fn get_state_delta(&mut self) -> StateDelta {
        let current: BTreeMap<PlayerId, Map<String, Value>> = self
            .regs
            .players
            .values()
            .map(|p| (p.id, self.player_fields(p)))
            .collect();
        let removed: Vec<String> = self
            .snapshots
            .last
            .keys()
            .filter(|id| !current.contains_key(id))
            .map(ToString::to_string)
            .collect();

        let state = &mut self.snapshots;
        let full = state.pending_full || state.frames_since_full + 1 >= self.config.full_resync_frames;
        let players = if full {
            state.frames_since_full = 0;
            state.pending_full = false;
            current
                .iter()
                .map(|(id, fields)| PlayerDelta {
                    id: id.to_string(),
                    fields: fields.clone(),
                })
                .collect()
        } else {
            state.frames_since_full += 1;
            current
                .iter()
                .filter_map(|(id, fields)| {
                    let before = state.last.get(id);
                    let changed: Map<String, Value> = fields
                        .iter()
                        .filter(|(key, value)| before.and_then(|b| b.get(*key)) != Some(*value))
                        .map(|(key, value)| (key.clone(), value.clone()))
                        .collect();
                    (!changed.is_empty()).then(|| PlayerDelta {
                        id: id.to_string(),
                        fields: changed,
                    })
                })
                .collect()
        };
        state.last = current;
        StateDelta {
            tick: self.tick,
            full,
            players,
            removed,
        }
    }

    fn player_fields(&self, player: &Player) -> Map<String, Value> {
        match serde_json::to_value(self.player_view(player)) {
            Ok(Value::Object(fields)) => fields,
            Ok(_) | Err(_) => {
                warn!(room = %self.id, player = %player.id, "player view did not serialize to an object");
                Map::new()
            }
        }
    }

    /// Everything within the interest radius of `viewer`, plus kinds that
    /// are visible from anywhere.
    pub fn entity_snapshot(&self, viewer: PlayerId) -> Option<EntitySnapshot> {
        let center = self.regs.players.get(&viewer)?.pos;
        let radius_sq = self.config.interest_radius * self.config.interest_radius;
        let near = |pos: Vec2| pos.distance_sq(center) <= radius_sq;

        Some(EntitySnapshot {
            tick: self.tick,
            enemies: self
                .regs
                .enemies
                .values()
                .filter(|e| e.alive && (e.kind.always_visible() || near(e.pos)))
                .map(|e| EnemyView {
                    id: e.id.to_string(),
                    kind: e.kind,
                    x: e.pos.x,
                    y: e.pos.y,
                    radius: e.radius,
                    facing: e.facing,
                    health: e.health,
                    health_max: e.health_max,
                    state: e.behavior.label(),
                })
                .collect(),
            troops: self
                .regs
                .troops
                .values()
                .filter(|t| t.alive && near(t.pos))
                .map(|t| TroopView {
                    id: t.id.to_string(),
                    owner: t.owner.map(|o| o.to_string()),
                    x: t.pos.x,
                    y: t.pos.y,
                    health: t.health,
                    health_max: t.health_max,
                })
                .collect(),
            npcs: self
                .regs
                .npcs
                .values()
                .filter(|n| n.alive && near(n.pos))
                .map(|n| NpcView {
                    id: n.id.to_string(),
                    name: n.name.clone(),
                    x: n.pos.x,
                    y: n.pos.y,
                    health: n.health,
                })
                .collect(),
            projectiles: self
                .regs
                .projectiles
                .values()
                .filter(|p| near(p.pos))
                .map(|p| ProjectileView {
                    id: p.id.to_string(),
                    x: p.pos.x,
                    y: p.pos.y,
                    vx: p.vel.x,
                    vy: p.vel.y,
                    hostile: p.faction == Faction::Hostile,
                    shell: matches!(p.kind, ProjectileKind::Shell { .. }),
                })
                .collect(),
            abilities: self
                .regs
                .abilities
                .values()
                .filter(|a| near(a.pos))
                .map(|a| AbilityView {
                    id: a.id.to_string(),
                    kind: a.kind,
                    owner: a.owner.to_string(),
                    x: a.pos.x,
                    y: a.pos.y,
                    health: a.health,
                    health_max: a.health_max,
                    expires_at_ms: a.expires_at_ms,
                })
                .collect(),
            chests: self
                .regs
                .chests
                .values()
                .filter(|c| near(c.pos))
                .map(|c| ChestView {
                    id: c.id.to_string(),
                    x: c.pos.x,
                    y: c.pos.y,
                    phase: c.state.phase(),
                    health: c.health,
                })
                .collect(),
            items: self
                .regs
                .items
                .values()
                .filter(|i| near(i.pos))
                .map(|i| GroundItemView {
                    id: i.id.to_string(),
                    x: i.pos.x,
                    y: i.pos.y,
                    label: i.drop.label(),
                })
                .collect(),
            hazards: self
                .regs
                .hazards
                .values()
                .filter(|h| near(h.pos))
                .map(|h| HazardView {
                    id: h.id.to_string(),
                    kind: h.kind,
                    x: h.pos.x,
                    y: h.pos.y,
                    radius: h.radius,
                })
                .collect(),
            objectives: self
                .regs
                .objectives
                .values()
                .filter(|o| !o.destroyed)
                .map(|o| ObjectiveView {
                    id: o.id.to_string(),
                    name: o.name.clone(),
                    x: o.pos.x,
                    y: o.pos.y,
                    health: o.health,
                    health_max: o.health_max,
                    vulnerable: o.is_vulnerable(),
                })
                .collect(),
        })
    }

    pub fn ui_snapshot(&self) -> UiSnapshot {
        UiSnapshot {
            scene: self.scene,
            level_type: self.mode.level_type,
            phase: self.mission.phase,
            lobby_countdown_ms: self.mission.lobby_countdown_ms,
            survival_remaining_ms: self.survival_remaining_ms(),
            extraction_countdown_ms: self.mission.extraction_countdown_ms,
            extraction_unlocked: self.extraction_unlocked(),
            enemy_count: self.regs.enemies.len(),
            kills: self.regs.players.values().map(|p| p.kills).sum(),
            nav_generation: self.nav.generation(),
        }
    }

    /// The static world a freshly joined (or scene-changed) client needs.
    pub fn world_init(&self, player: PlayerId) -> WorldInit {
        WorldInit {
            room_id: self.id.clone(),
            player_id: player.to_string(),
            scene: self.scene,
            level_type: self.mode.level_type,
            seed: self.seed,
            tick_rate: self.config.tick_rate,
            boundary: self.env.boundary,
            circles: self.env.circles().to_vec(),
            boxes: self.env.boxes().to_vec(),
            navmesh: self.nav.mesh().cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Enemy, EnemyId};
    use crate::room::tests::level_room;
    use crate::types::EnemyKind;

    #[test]
    fn delta_carries_only_the_changed_field() {
        let mut room = Room::with_defaults("delta", 71, RoomConfig::default());
        let a = room.add_player("a").expect("space");
        let b = room.add_player("b").expect("space");
        let first = room.get_state_delta();
        assert!(first.full);
        assert_eq!(first.players.len(), 2);

        let quiet = room.get_state_delta();
        assert!(!quiet.full);
        assert!(quiet.players.is_empty());

        room.regs.players.get_mut(&b).expect("b").coins = 12;
        let delta = room.get_state_delta();
        assert!(!delta.full);
        assert_eq!(delta.players.len(), 1);
        assert_eq!(delta.players[0].id, b.to_string());
        assert_eq!(delta.players[0].fields.len(), 1);
        assert_eq!(delta.players[0].fields.get("coins"), Some(&Value::from(12)));

        room.remove_player(a);
        let after_leave = room.get_state_delta();
        assert_eq!(after_leave.removed, vec![a.to_string()]);
    }

    #[test]
    fn full_resync_fires_on_schedule() {
        let config = RoomConfig {
            full_resync_frames: 4,
            ..RoomConfig::default()
        };
        let mut room = Room::with_defaults("resync", 72, config);
        room.add_player("a").expect("space");
        let fulls: Vec<bool> = (0..9).map(|_| room.get_state_delta().full).collect();
        assert_eq!(
            fulls,
            vec![true, false, false, false, true, false, false, false, true]
        );
    }

    #[test]
    fn scene_change_forces_a_full_delta() {
        let mut room = Room::with_defaults("scene", 73, RoomConfig::default());
        room.add_player("a").expect("space");
        room.get_state_delta();
        room.enter_level();
        assert!(room.get_state_delta().full);
    }

    #[test]
    fn far_entities_are_filtered_per_viewer() {
        let (mut room, ids) = level_room(74, 1);
        let viewer = ids[0];
        room.regs.enemies.clear();
        let center = room.regs.players[&viewer].pos;
        let far = center + Vec2::new(room.config.interest_radius * 3.0, 0.0);
        for (kind, pos) in [
            (EnemyKind::Basic, center + Vec2::new(50.0, 0.0)),
            (EnemyKind::Basic, far),
            (EnemyKind::Boss, far),
        ] {
            let id = EnemyId(room.regs.alloc());
            room.regs.enemies.insert(id, Enemy::new(id, kind, pos, room.now_ms));
        }
        let snapshot = room.entity_snapshot(viewer).expect("viewer exists");
        let kinds: Vec<EnemyKind> = snapshot.enemies.iter().map(|e| e.kind).collect();
        assert_eq!(kinds.len(), 2);
        assert!(kinds.contains(&EnemyKind::Boss));
        assert_eq!(snapshot.objectives.len(), room.regs.objectives.len());
        assert!(room.entity_snapshot(PlayerId(9999)).is_none());
    }
}
