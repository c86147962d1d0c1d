//! One game session: owns every registry, the collision world and the
//! collaborators, and advances them one fixed tick at a time.

use std::collections::BTreeMap;
use std::mem;

use tracing::{debug, info, warn};

use crate::ai::{AiController, AiTuning};
use crate::combat::{self, TickContext};
use crate::config::RoomConfig;
use crate::constants::*;
use crate::entities::{EntityRegistries, Player, PlayerId};
use crate::error::CommandError;
use crate::navigation::NavigationGrid;
use crate::rng::Rng;
use crate::spatial::SpatialEnvironment;
use crate::types::{MissionPhase, RuntimeEvent, Scene};
use crate::world::{DefaultLoot, LootTable, ModeConfig, SeededWorld, WorldLayout, WorldSource};

mod abilities;
mod allies;
mod commands;
mod loot;
mod mission;
mod players;
mod snapshot;
mod spawn_system;

use self::mission::MissionState;
use self::snapshot::SnapshotState;
use self::spawn_system::SpawnState;

pub struct Room {
    pub id: String,
    config: RoomConfig,
    seed: u32,
    scene: Scene,
    tick: u64,
    now_ms: u64,
    rng: Rng,
    env: SpatialEnvironment,
    nav: NavigationGrid,
    regs: EntityRegistries,
    ai: AiController,
    events: Vec<RuntimeEvent>,
    world: Box<dyn WorldSource>,
    loot: Box<dyn LootTable>,
    mode: ModeConfig,
    layout: WorldLayout,
    mission: MissionState,
    spawns: SpawnState,
    snapshots: SnapshotState,
    joined: usize,
}

impl Room {
    pub fn new(
        id: impl Into<String>,
        seed: u32,
        config: RoomConfig,
        world: Box<dyn WorldSource>,
        loot: Box<dyn LootTable>,
    ) -> Self {
        let layout = world.lobby();
        let env = layout.build_environment();
        let mode = ModeConfig::for_level(config.level_type);
        let mut room = Self {
            id: id.into(),
            seed,
            scene: Scene::Lobby,
            tick: 0,
            now_ms: 0,
            rng: Rng::new(seed),
            env,
            nav: NavigationGrid::new(),
            regs: EntityRegistries::new(),
            ai: AiController::new(AiTuning::default()),
            events: Vec::new(),
            world,
            loot,
            mode,
            layout,
            mission: MissionState::default(),
            spawns: SpawnState::default(),
            snapshots: SnapshotState::default(),
            joined: 0,
            config,
        };
        room.populate_layout();
        info!(room = %room.id, seed, "room created");
        room
    }

    /// A room with the seeded world and default loot table.
    pub fn with_defaults(id: impl Into<String>, seed: u32, config: RoomConfig) -> Self {
        Self::new(id, seed, config, Box::new(SeededWorld), Box::new(DefaultLoot))
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    pub fn scene(&self) -> Scene {
        self.scene
    }

    pub fn phase(&self) -> MissionPhase {
        self.mission.phase
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub fn registries(&self) -> &EntityRegistries {
        &self.regs
    }

    pub fn environment(&self) -> &SpatialEnvironment {
        &self.env
    }

    pub fn player_count(&self) -> usize {
        self.regs.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regs.players.is_empty()
    }

    pub fn add_player(&mut self, name: &str) -> Result<PlayerId, CommandError> {
        if self.regs.players.len() >= self.config.max_players {
            return Err(CommandError::RoomFull);
        }
        let id = PlayerId(self.regs.alloc());
        let spawn = self.layout.player_spawn(self.joined);
        self.joined += 1;
        let pos = self.env.find_clear_position(
            spawn,
            PLAYER_RADIUS,
            120.0,
            &mut self.rng,
            &Default::default(),
        );
        self.regs
            .players
            .insert(id, Player::new(id, name.to_string(), pos));
        info!(room = %self.id, player = %id, name, "player joined");
        self.events.push(RuntimeEvent::PlayerJoined {
            player_id: id.to_string(),
            name: name.to_string(),
        });
        Ok(id)
    }

    /// Removes a player through the shared removal hook; returns whether it existed.
    pub fn remove_player(&mut self, id: PlayerId) -> bool {
        let Some(player) = combat::remove_player(&mut self.regs, &mut self.env, id, self.now_ms) else {
            return false;
        };
        info!(room = %self.id, player = %id, name = %player.name, "player left");
        self.events.push(RuntimeEvent::PlayerLeft {
            player_id: id.to_string(),
        });
        true
    }

    /// Advances the simulation by one fixed step.
    pub fn step(&mut self, dt_ms: u64) {
        self.tick += 1;
        self.now_ms = self.now_ms.saturating_add(dt_ms);
        let dt = dt_ms as f32 / 1000.0;
        let in_level = self.scene == Scene::Level;
        if in_level {
            self.nav.ensure(&self.env, self.seed, self.mode.level_type);
        }

        let mut ctx = TickContext::new(
            &mut self.regs,
            &mut self.env,
            &mut self.rng,
            &mut self.events,
            dt,
            self.now_ms,
        );
        players::update_players(&mut ctx);
        players::update_revives(&mut ctx, dt_ms);
        if in_level {
            combat::apply_contact_damage(&mut ctx);
            combat::apply_dots(&mut ctx);
            combat::update_hazards(&mut ctx);
            combat::apply_knockbacks(&mut ctx);
            self.ai.update(&mut ctx, &mut self.nav);
            combat::update_projectiles(&mut ctx);
            abilities::update_abilities(&mut ctx);
            allies::update_troops(&mut ctx);
            loot::update_chests(&mut ctx, dt_ms);
        }
        let kills = mem::take(&mut ctx.kills);
        let requests = mem::take(&mut ctx.spawn_requests);

        self.place_loot(kills);
        self.handle_spawn_requests(requests);
        if in_level {
            self.update_ambient_spawns();
        }
        self.update_mission(dt_ms);
    }

    pub fn drain_events(&mut self) -> Vec<RuntimeEvent> {
        mem::take(&mut self.events)
    }
}
