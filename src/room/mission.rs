use super::*;

use crate::entities::{Chest, ChestId, ChestState, DashState, Knockback, Npc, NpcId, Objective, ObjectiveId};
use crate::geometry::Vec2;
use crate::spatial::QueryFilter;
use crate::types::{EnemyKind, LevelType};

#[derive(Clone, Debug)]
pub(super) struct MissionState {
    pub phase: MissionPhase,
    pub lobby_countdown_ms: Option<u64>,
    pub level_started_ms: u64,
    pub extraction_countdown_ms: Option<u64>,
}

impl Default for MissionState {
    fn default() -> Self {
        Self {
            phase: MissionPhase::Lobby,
            lobby_countdown_ms: None,
            level_started_ms: 0,
            extraction_countdown_ms: None,
        }
    }
}

impl Room {
    /// Lobby countdown, failure checks and the extraction countdown.
    pub(super) fn update_mission(&mut self, dt_ms: u64) {
        match self.scene {
            Scene::Lobby => {
                let Some(remaining) = self.mission.lobby_countdown_ms else {
                    return;
                };
                if self.regs.players.is_empty() {
                    self.mission.lobby_countdown_ms = None;
                } else if remaining <= dt_ms {
                    self.enter_level();
                } else {
                    self.mission.lobby_countdown_ms = Some(remaining - dt_ms);
                }
            }
            Scene::Level => {
                if self.mission.phase != MissionPhase::InProgress {
                    return;
                }
                let everyone_down =
                    !self.regs.players.is_empty() && self.regs.players.values().all(|p| p.downed);
                let objectives_lost = !self.regs.objectives.is_empty()
                    && self.regs.objectives.values().all(|o| o.destroyed);
                if everyone_down || objectives_lost {
                    self.end_mission(MissionPhase::Failed);
                    return;
                }
                let Some(remaining) = self.mission.extraction_countdown_ms else {
                    return;
                };
                if !self.anyone_in_extraction_zone() {
                    self.mission.extraction_countdown_ms = None;
                    self.events.push(RuntimeEvent::Toast {
                        message: "extraction aborted: zone abandoned".to_string(),
                    });
                } else if remaining <= dt_ms {
                    self.end_mission(MissionPhase::Extracted);
                } else {
                    self.mission.extraction_countdown_ms = Some(remaining - dt_ms);
                }
            }
        }
    }

    pub fn survival_remaining_ms(&self) -> u64 {
        if self.scene != Scene::Level {
            return self.mode.survival_ms;
        }
        let elapsed = self.now_ms.saturating_sub(self.mission.level_started_ms);
        self.mode.survival_ms.saturating_sub(elapsed)
    }

    /// Extraction opens once the survival timer runs out, or on boss levels
    /// as soon as no boss is left standing.
    pub fn extraction_unlocked(&self) -> bool {
        if self.scene != Scene::Level || self.mission.phase != MissionPhase::InProgress {
            return false;
        }
        let boss_down = self.mode.level_type == LevelType::Boss
            && !self
                .regs
                .enemies
                .values()
                .any(|e| e.kind == EnemyKind::Boss && e.alive);
        self.survival_remaining_ms() == 0 || boss_down
    }

    pub fn extraction_zone(&self) -> Option<Vec2> {
        self.layout.extraction_zone
    }

    pub(super) fn in_extraction_zone(&self, pos: Vec2) -> bool {
        self.layout
            .extraction_zone
            .is_some_and(|zone| zone.distance(pos) <= self.mode.extraction_radius)
    }

    fn anyone_in_extraction_zone(&self) -> bool {
        self.regs
            .players
            .values()
            .any(|p| !p.downed && self.in_extraction_zone(p.pos))
    }

    pub(super) fn enter_level(&mut self) {
        let layout = self.world.level(self.mode.level_type, self.seed);
        self.load_layout(layout, Scene::Level);
        self.mission.phase = MissionPhase::InProgress;
        self.mission.lobby_countdown_ms = None;
        self.mission.extraction_countdown_ms = None;
        self.mission.level_started_ms = self.now_ms;
        self.populate_level();
        info!(
            room = %self.id,
            level = ?self.mode.level_type,
            players = self.regs.players.len(),
            enemies = self.regs.enemies.len(),
            "level started"
        );
    }

    pub(super) fn enter_lobby(&mut self) {
        let layout = self.world.lobby();
        self.load_layout(layout, Scene::Lobby);
        self.mission.lobby_countdown_ms = None;
        self.mission.extraction_countdown_ms = None;
        info!(room = %self.id, "back in lobby");
    }

    /// Ends the run and returns everyone to the lobby, keeping the result.
    pub(super) fn end_mission(&mut self, result: MissionPhase) {
        info!(room = %self.id, ?result, tick = self.tick, "mission ended");
        self.events.push(RuntimeEvent::MissionEnded { phase: result });
        self.enter_lobby();
        self.mission.phase = result;
    }

    /// Swaps the collision world and resets every player onto a spawn.
    fn load_layout(&mut self, layout: WorldLayout, scene: Scene) {
        self.regs.clear_world();
        self.env = layout.build_environment();
        self.nav.invalidate();
        self.ai.reset();
        self.layout = layout;
        self.scene = scene;

        let ids: Vec<PlayerId> = self.regs.players.keys().copied().collect();
        for (index, id) in ids.into_iter().enumerate() {
            let spawn = self.layout.player_spawn(index);
            let pos = self.env.find_clear_position(
                spawn,
                PLAYER_RADIUS,
                120.0,
                &mut self.rng,
                &QueryFilter::default(),
            );
            if let Some(player) = self.regs.players.get_mut(&id) {
                player.pos = pos;
                player.downed = false;
                player.health = player.health_max;
                player.stamina = player.stamina_max;
                player.revive = None;
                player.ensnared_by.clear();
                player.slows.clear();
                player.dots.clear();
                player.knockback = Knockback::default();
                player.dash = DashState::default();
                player.invulnerable_sources = 0;
                player.carried_item = None;
            }
        }
        self.populate_layout();
        self.snapshots.force_full();
        self.events.push(RuntimeEvent::SceneChanged { scene });
    }

    /// Npcs, chests and objectives from the current layout.
    pub(super) fn populate_layout(&mut self) {
        for (name, pos) in self.layout.npcs.clone() {
            let id = NpcId(self.regs.alloc());
            self.regs.npcs.insert(
                id,
                Npc {
                    id,
                    name,
                    pos,
                    radius: NPC_RADIUS,
                    health: NPC_HEALTH,
                    health_max: NPC_HEALTH,
                    alive: true,
                },
            );
        }
        for pos in self.layout.chests.clone() {
            let id = ChestId(self.regs.alloc());
            self.regs.chests.insert(
                id,
                Chest {
                    id,
                    pos,
                    radius: STRUCTURE_RADIUS,
                    health: CHEST_HEALTH,
                    health_max: CHEST_HEALTH,
                    state: ChestState::Closed,
                },
            );
        }
        for objective in self.layout.objectives.clone() {
            let id = ObjectiveId(self.regs.alloc());
            self.regs.objectives.insert(
                id,
                Objective {
                    id,
                    name: objective.name,
                    pos: objective.pos,
                    radius: objective.radius,
                    health: objective.health,
                    health_max: objective.health,
                    vulnerable: objective.vulnerable,
                    destroyed: false,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::tests::level_room;

    #[test]
    fn lobby_countdown_starts_the_level() {
        let mut room = Room::with_defaults("m", 61, RoomConfig::default());
        let player = room.add_player("a").expect("space");
        room.start_lobby_countdown(player).expect("lobby");
        let ticks = LOBBY_COUNTDOWN_MS / TICK_MS + 1;
        for _ in 0..ticks {
            room.step(TICK_MS);
        }
        assert_eq!(room.scene(), Scene::Level);
        assert_eq!(room.phase(), MissionPhase::InProgress);
        assert!(!room.regs.enemies.is_empty());
        assert!(room
            .drain_events()
            .iter()
            .any(|e| matches!(e, RuntimeEvent::SceneChanged { scene: Scene::Level })));
    }

    #[test]
    fn party_wipe_fails_the_mission() {
        let (mut room, ids) = level_room(62, 2);
        for id in &ids {
            let player = room.regs.players.get_mut(id).expect("player");
            player.downed = true;
            player.health = 0.0;
        }
        room.step(TICK_MS);
        assert_eq!(room.scene(), Scene::Lobby);
        assert_eq!(room.phase(), MissionPhase::Failed);
        assert!(room.regs.enemies.is_empty());
        assert!(room.regs.players.values().all(|p| !p.downed && p.health == p.health_max));
    }

    #[test]
    fn losing_every_objective_fails_the_mission() {
        let (mut room, _) = level_room(63, 1);
        assert!(!room.regs.objectives.is_empty());
        for objective in room.regs.objectives.values_mut() {
            objective.destroyed = true;
        }
        room.step(TICK_MS);
        assert_eq!(room.phase(), MissionPhase::Failed);
    }

    #[test]
    fn extraction_needs_the_timer_and_the_zone() {
        let (mut room, ids) = level_room(64, 1);
        let player = ids[0];
        assert!(!room.extraction_unlocked());
        assert!(room.start_extraction(player).is_err());

        room.mission.level_started_ms = 0;
        room.now_ms = room.mode.survival_ms + 1;
        assert!(room.extraction_unlocked());
        assert_eq!(room.start_extraction(player), Err(CommandError::OutOfRange));

        let zone = room.layout.extraction_zone.expect("survival has a zone");
        room.regs.players.get_mut(&player).expect("player").pos = zone;
        room.start_extraction(player).expect("in zone");

        let ticks = EXTRACTION_COUNTDOWN_MS / TICK_MS + 2;
        for _ in 0..ticks {
            room.regs.enemies.clear();
            room.regs.projectiles.clear();
            room.regs.hazards.clear();
            room.regs.players.get_mut(&player).expect("player").pos = zone;
            room.step(TICK_MS);
            if room.scene() == Scene::Lobby {
                break;
            }
        }
        assert_eq!(room.phase(), MissionPhase::Extracted);
    }

    #[test]
    fn leaving_the_zone_aborts_extraction() {
        let (mut room, ids) = level_room(65, 1);
        let player = ids[0];
        room.now_ms = room.mode.survival_ms + 1;
        let zone = room.layout.extraction_zone.expect("zone");
        room.regs.players.get_mut(&player).expect("player").pos = zone;
        room.start_extraction(player).expect("in zone");
        room.regs.players.get_mut(&player).expect("player").pos = Vec2::ZERO;
        room.step(TICK_MS);
        assert_eq!(room.mission.extraction_countdown_ms, None);
    }
}
