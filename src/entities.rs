//! Entity records and the registries that own them.
//!
//! Every entity is addressed by a small integer handle. The `"enemy_12"` style
//! string only exists at the wire boundary (`Display` / `parse_wire`).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::constants::*;
use crate::geometry::Vec2;
use crate::spatial::ShapeId;
use crate::types::{AbilityKind, ChestPhase, EnemyKind, HazardKind};

macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u32);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            pub fn parse_wire(raw: &str) -> Option<Self> {
                parse_wire_id(raw, $prefix).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }
    };
}

define_id!(PlayerId, "player");
define_id!(EnemyId, "enemy");
define_id!(TroopId, "troop");
define_id!(NpcId, "npc");
define_id!(AbilityId, "ability");
define_id!(ChestId, "chest");
define_id!(ItemId, "item");
define_id!(ProjectileId, "proj");
define_id!(HazardId, "hazard");
define_id!(ObjectiveId, "objective");

fn parse_wire_id(raw: &str, prefix: &str) -> Option<u32> {
    let rest = raw.strip_prefix(prefix)?.strip_prefix('_')?;
    rest.parse().ok()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Faction {
    Friendly,
    Hostile,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DamageSource {
    Player(PlayerId),
    Enemy(EnemyId),
    Troop(TroopId),
    Ability(AbilityId),
    Hazard(HazardId),
    World,
}

impl DamageSource {
    pub fn faction(self) -> Faction {
        match self {
            DamageSource::Enemy(_) => Faction::Hostile,
            DamageSource::Hazard(_) | DamageSource::World => Faction::Hostile,
            _ => Faction::Friendly,
        }
    }
}

/// Anything combat can damage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum VictimRef {
    Player(PlayerId),
    Enemy(EnemyId),
    Troop(TroopId),
    Npc(NpcId),
    Ability(AbilityId),
    Chest(ChestId),
    Objective(ObjectiveId),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DotStack {
    pub source: DamageSource,
    pub remaining: f32,
    pub rate: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Knockback {
    pub velocity: Vec2,
    pub remaining: f32,
}

impl Knockback {
    pub fn is_active(&self) -> bool {
        self.remaining > 0.0
    }

    pub fn start(&mut self, velocity: Vec2, duration: f32) {
        if velocity.is_finite() && duration > 0.0 {
            self.velocity = velocity;
            self.remaining = duration;
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Slow {
    pub factor: f32,
    pub remaining: f32,
}

/// Latest input from a client; consumed by the next tick.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlayerInput {
    pub seq: u32,
    pub client_time_ms: u64,
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub sprint: bool,
    pub dash: bool,
    pub fire: bool,
    pub aim: f32,
    pub dialogue_open: bool,
    pub evil_progress: f32,
}

impl PlayerInput {
    pub fn move_vector(&self) -> Vec2 {
        let x = f32::from(u8::from(self.right)) - f32::from(u8::from(self.left));
        let y = f32::from(u8::from(self.down)) - f32::from(u8::from(self.up));
        Vec2::new(x, y).normalize_or_zero()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StatBonus {
    pub armor: f32,
    pub attack_speed: f32,
    pub attack_power: f32,
    pub crit_chance: f32,
    pub crit_multiplier: f32,
    pub speed_multiplier: f32,
    pub health_max: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InventoryItem {
    pub name: String,
    pub bonus: StatBonus,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DerivedStats {
    pub armor: f32,
    pub attack_speed: f32,
    pub attack_power: f32,
    pub crit_chance: f32,
    pub crit_multiplier: f32,
    pub speed_multiplier: f32,
    pub health_max: f32,
}

impl Default for DerivedStats {
    fn default() -> Self {
        Self::from_inventory(&[])
    }
}

impl DerivedStats {
    pub fn from_inventory(items: &[InventoryItem]) -> Self {
        let mut total = StatBonus::default();
        for item in items {
            let b = item.bonus;
            total.armor += b.armor;
            total.attack_speed += b.attack_speed;
            total.attack_power += b.attack_power;
            total.crit_chance += b.crit_chance;
            total.crit_multiplier += b.crit_multiplier;
            total.speed_multiplier += b.speed_multiplier;
            total.health_max += b.health_max;
        }
        Self {
            armor: finite_or_zero(total.armor).clamp(0.0, ARMOR_CAP),
            attack_speed: (1.0 + finite_or_zero(total.attack_speed)).clamp(0.1, ATTACK_SPEED_CAP),
            attack_power: (BASE_ATTACK_POWER + finite_or_zero(total.attack_power)).max(0.0),
            crit_chance: (BASE_CRIT_CHANCE + finite_or_zero(total.crit_chance))
                .clamp(0.0, CRIT_CHANCE_CAP),
            crit_multiplier: (BASE_CRIT_MULTIPLIER + finite_or_zero(total.crit_multiplier))
                .clamp(1.0, CRIT_MULTIPLIER_CAP),
            speed_multiplier: (1.0 + finite_or_zero(total.speed_multiplier)).clamp(0.5, 2.0),
            health_max: (PLAYER_HEALTH + finite_or_zero(total.health_max)).max(1.0),
        }
    }
}

fn finite_or_zero(v: f32) -> f32 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DashState {
    pub remaining: f32,
    pub direction: Vec2,
    pub ready_at_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReviveChannel {
    pub reviver: PlayerId,
    pub accepted: bool,
    pub elapsed_ms: u64,
}

#[derive(Clone, Debug)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub cosmetic: String,
    pub pos: Vec2,
    pub radius: f32,
    pub health: f32,
    pub health_max: f32,
    pub stamina: f32,
    pub stamina_max: f32,
    pub exhausted_until_ms: u64,
    pub base_speed: f32,
    pub aim: f32,
    pub input: PlayerInput,
    pub input_received_ms: u64,
    pub inventory: Vec<InventoryItem>,
    pub stats: DerivedStats,
    pub coins: u32,
    pub kills: u32,
    pub ensnared_by: BTreeMap<EnemyId, f32>,
    pub slows: Vec<Slow>,
    pub invulnerable_sources: u32,
    pub knockback: Knockback,
    pub dash: DashState,
    pub fire_cooldown: f32,
    pub in_dialogue: bool,
    pub invisible: bool,
    pub evil_progress: f32,
    pub dots: Vec<DotStack>,
    pub downed: bool,
    pub revive: Option<ReviveChannel>,
    pub carried_item: Option<String>,
}

impl Player {
    pub fn new(id: PlayerId, name: String, pos: Vec2) -> Self {
        let stats = DerivedStats::default();
        Self {
            id,
            name,
            cosmetic: "default".to_string(),
            pos,
            radius: PLAYER_RADIUS,
            health: stats.health_max,
            health_max: stats.health_max,
            stamina: STAMINA_MAX,
            stamina_max: STAMINA_MAX,
            exhausted_until_ms: 0,
            base_speed: PLAYER_SPEED,
            aim: 0.0,
            input: PlayerInput::default(),
            input_received_ms: 0,
            inventory: Vec::new(),
            stats,
            coins: 0,
            kills: 0,
            ensnared_by: BTreeMap::new(),
            slows: Vec::new(),
            invulnerable_sources: 0,
            knockback: Knockback::default(),
            dash: DashState::default(),
            fire_cooldown: 0.0,
            in_dialogue: false,
            invisible: false,
            evil_progress: 0.0,
            dots: Vec::new(),
            downed: false,
            revive: None,
            carried_item: None,
        }
    }

    /// Enemies ignore downed, invisible and talking players.
    pub fn is_targetable(&self) -> bool {
        !self.downed && !self.invisible && !self.in_dialogue && self.health > 0.0
    }

    pub fn is_invulnerable(&self) -> bool {
        self.invulnerable_sources > 0
    }

    pub fn slow_factor(&self) -> f32 {
        self.slows
            .iter()
            .map(|s| s.factor)
            .fold(1.0_f32, f32::min)
            .clamp(0.1, 1.0)
    }

    /// Recomputes derived stats after an inventory change, keeping the health
    /// ratio and the `0 <= health <= max` invariant.
    pub fn recompute_stats(&mut self) {
        let ratio = if self.health_max > 0.0 {
            self.health / self.health_max
        } else {
            1.0
        };
        self.stats = DerivedStats::from_inventory(&self.inventory);
        self.health_max = self.stats.health_max;
        self.health = (ratio * self.health_max).clamp(0.0, self.health_max);
    }

    /// Applies already-mitigated damage; returns the amount taken.
    pub fn take_damage(&mut self, amount: f32) -> f32 {
        if !amount.is_finite() || amount <= 0.0 || self.downed {
            return 0.0;
        }
        let before = self.health;
        self.health = (self.health - amount).clamp(0.0, self.health_max);
        before - self.health
    }

    pub fn heal(&mut self, amount: f32) -> f32 {
        if !amount.is_finite() || amount <= 0.0 || self.downed {
            return 0.0;
        }
        let before = self.health;
        self.health = (self.health + amount).clamp(0.0, self.health_max);
        self.health - before
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EnemyStats {
    pub radius: f32,
    pub health: f32,
    pub speed: f32,
    pub contact_dps: f32,
    pub armor: f32,
}

pub fn enemy_stats(kind: EnemyKind) -> EnemyStats {
    let (radius, health, speed, contact_dps, armor) = match kind {
        EnemyKind::Basic => (18.0, 40.0, 150.0, 12.0, 0.0),
        EnemyKind::Projectile => (16.0, 30.0, 140.0, 6.0, 0.0),
        EnemyKind::Boomer => (20.0, 35.0, 175.0, 0.0, 0.0),
        EnemyKind::Licker => (18.0, 45.0, 130.0, 8.0, 0.0),
        EnemyKind::BigBoy => (30.0, 160.0, 110.0, 18.0, 20.0),
        EnemyKind::WallGuy => (24.0, 120.0, 95.0, 10.0, 30.0),
        EnemyKind::DefenseTurret => (22.0, 150.0, 0.0, 0.0, 40.0),
        EnemyKind::ArtilleryGun => (26.0, 200.0, 0.0, 0.0, 40.0),
        EnemyKind::Boss => (48.0, 2_000.0, 120.0, 25.0, 25.0),
    };
    EnemyStats {
        radius,
        health,
        speed,
        contact_dps,
        armor,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangedMode {
    Kite,
    Rush,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RangedState {
    pub mode: RangedMode,
    pub next_mode_roll_ms: u64,
    pub shots_left: i32,
    pub shot_timer: f32,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct BoomerState {
    pub fuse: Option<f32>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LickerPhase {
    Idle,
    Extending { victim: PlayerId, reach: f32 },
    Attached { victim: PlayerId, remaining: f32 },
    Cooldown { remaining: f32 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct LickerState {
    pub phase: LickerPhase,
}

impl LickerState {
    pub fn victim(&self) -> Option<PlayerId> {
        match self.phase {
            LickerPhase::Extending { victim, .. } | LickerPhase::Attached { victim, .. } => {
                Some(victim)
            }
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChargerPhase {
    Ready,
    Windup { remaining: f32, direction: Vec2 },
    Dashing { remaining: f32, hit: BTreeSet<VictimRef> },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChargerState {
    pub phase: ChargerPhase,
    pub cooldown: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WallGuyState {
    pub shield: Option<ShapeId>,
    pub attack_cooldown: f32,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct TurretState {
    pub cooldown: f32,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct ArtilleryState {
    pub shots_left: i32,
    pub shot_timer: f32,
    pub cooldown: f32,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct BossState {
    pub dash_cooldown: f32,
    pub shot_timer: f32,
    pub burst_remaining: f32,
    pub thresholds_crossed: usize,
}

/// Per-kind behavioural state.
#[derive(Clone, Debug, PartialEq)]
pub enum Behavior {
    Basic,
    Ranged(RangedState),
    Boomer(BoomerState),
    Licker(LickerState),
    Charger(ChargerState),
    WallGuy(WallGuyState),
    Turret(TurretState),
    Artillery(ArtilleryState),
    Boss(BossState),
}

impl Behavior {
    pub fn for_kind(kind: EnemyKind) -> Self {
        match kind {
            EnemyKind::Basic => Behavior::Basic,
            EnemyKind::Projectile => Behavior::Ranged(RangedState {
                mode: RangedMode::Kite,
                next_mode_roll_ms: 0,
                shots_left: 0,
                shot_timer: RANGED_BURST_PAUSE_MIN,
            }),
            EnemyKind::Boomer => Behavior::Boomer(BoomerState::default()),
            EnemyKind::Licker => Behavior::Licker(LickerState {
                phase: LickerPhase::Idle,
            }),
            EnemyKind::BigBoy => Behavior::Charger(ChargerState {
                phase: ChargerPhase::Ready,
                cooldown: CHARGER_COOLDOWN * 0.5,
            }),
            EnemyKind::WallGuy => Behavior::WallGuy(WallGuyState {
                shield: None,
                attack_cooldown: 0.0,
            }),
            EnemyKind::DefenseTurret => Behavior::Turret(TurretState::default()),
            EnemyKind::ArtilleryGun => Behavior::Artillery(ArtilleryState {
                shots_left: 0,
                shot_timer: 0.0,
                cooldown: ARTILLERY_COOLDOWN * 0.5,
            }),
            EnemyKind::Boss => Behavior::Boss(BossState {
                shot_timer: BOSS_SHOT_INTERVAL,
                ..BossState::default()
            }),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Behavior::Basic => "chase",
            Behavior::Ranged(s) => match s.mode {
                RangedMode::Kite => "kite",
                RangedMode::Rush => "rush",
            },
            Behavior::Boomer(s) => {
                if s.fuse.is_some() {
                    "armed"
                } else {
                    "chase"
                }
            }
            Behavior::Licker(s) => match s.phase {
                LickerPhase::Idle => "stalk",
                LickerPhase::Extending { .. } => "tongue",
                LickerPhase::Attached { .. } => "grapple",
                LickerPhase::Cooldown { .. } => "recover",
            },
            Behavior::Charger(s) => match s.phase {
                ChargerPhase::Ready => "chase",
                ChargerPhase::Windup { .. } => "windup",
                ChargerPhase::Dashing { .. } => "dash",
            },
            Behavior::WallGuy(_) => "shield",
            Behavior::Turret(_) => "turret",
            Behavior::Artillery(s) => {
                if s.shots_left > 0 {
                    "barrage"
                } else {
                    "reload"
                }
            }
            Behavior::Boss(s) => {
                if s.burst_remaining > 0.0 {
                    "burst"
                } else {
                    "boss"
                }
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct WanderState {
    pub goal: Option<Vec2>,
    pub pause: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PreAggro {
    pub goal: Vec2,
    pub until_ms: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ObjectiveMode {
    pub active: bool,
    pub next_roll_ms: u64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PathFollow {
    pub waypoints: Vec<Vec2>,
    pub next: usize,
    pub goal: Vec2,
    pub computed_at_ms: u64,
}

impl PathFollow {
    pub fn current(&self) -> Option<Vec2> {
        self.waypoints.get(self.next).copied()
    }

    pub fn clear(&mut self) {
        self.waypoints.clear();
        self.next = 0;
    }
}

#[derive(Clone, Debug)]
pub struct Enemy {
    pub id: EnemyId,
    pub kind: EnemyKind,
    pub pos: Vec2,
    pub radius: f32,
    pub health: f32,
    pub health_max: f32,
    pub alive: bool,
    pub speed: f32,
    pub speed_multiplier: f32,
    pub contact_dps: f32,
    pub armor: f32,
    pub facing: f32,
    pub knockback: Knockback,
    pub dots: Vec<DotStack>,
    pub behavior: Behavior,
    pub wander: WanderState,
    pub pre_aggro: Option<PreAggro>,
    pub objective_mode: ObjectiveMode,
    pub path: PathFollow,
    pub spawned_at_ms: u64,
}

impl Enemy {
    pub fn new(id: EnemyId, kind: EnemyKind, pos: Vec2, now_ms: u64) -> Self {
        let stats = enemy_stats(kind);
        Self {
            id,
            kind,
            pos,
            radius: stats.radius,
            health: stats.health,
            health_max: stats.health,
            alive: true,
            speed: stats.speed,
            speed_multiplier: 1.0,
            contact_dps: stats.contact_dps,
            armor: stats.armor,
            facing: 0.0,
            knockback: Knockback::default(),
            dots: Vec::new(),
            behavior: Behavior::for_kind(kind),
            wander: WanderState::default(),
            pre_aggro: None,
            objective_mode: ObjectiveMode {
                active: false,
                next_roll_ms: now_ms + OBJECTIVE_REROLL_MS,
            },
            path: PathFollow::default(),
            spawned_at_ms: now_ms,
        }
    }

    pub fn effective_speed(&self) -> f32 {
        self.speed * self.speed_multiplier
    }

    pub fn shield_shape(&self) -> Option<ShapeId> {
        match &self.behavior {
            Behavior::WallGuy(state) => state.shield,
            _ => None,
        }
    }

    pub fn health_fraction(&self) -> f32 {
        if self.health_max <= 0.0 {
            0.0
        } else {
            (self.health / self.health_max).clamp(0.0, 1.0)
        }
    }
}

#[derive(Clone, Debug)]
pub struct Troop {
    pub id: TroopId,
    pub owner: Option<PlayerId>,
    pub pos: Vec2,
    pub radius: f32,
    pub health: f32,
    pub health_max: f32,
    pub alive: bool,
    pub speed: f32,
    pub contact_dps: f32,
    pub knockback: Knockback,
    pub dots: Vec<DotStack>,
}

impl Troop {
    pub fn new(id: TroopId, owner: Option<PlayerId>, pos: Vec2) -> Self {
        Self {
            id,
            owner,
            pos,
            radius: TROOP_RADIUS,
            health: TROOP_HEALTH,
            health_max: TROOP_HEALTH,
            alive: true,
            speed: TROOP_SPEED,
            contact_dps: TROOP_DPS,
            knockback: Knockback::default(),
            dots: Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Npc {
    pub id: NpcId,
    pub name: String,
    pub pos: Vec2,
    pub radius: f32,
    pub health: f32,
    pub health_max: f32,
    pub alive: bool,
}

#[derive(Clone, Debug)]
pub struct Hazard {
    pub id: HazardId,
    pub kind: HazardKind,
    pub source: DamageSource,
    pub pos: Vec2,
    pub radius: f32,
    pub dps: f32,
    /// Applied once on the first tick (slams).
    pub burst_damage: f32,
    pub slow: Option<f32>,
    pub remaining: f32,
    pub fired: bool,
}

#[derive(Clone, Debug)]
pub struct Ability {
    pub id: AbilityId,
    pub kind: AbilityKind,
    pub owner: PlayerId,
    pub pos: Vec2,
    pub facing: f32,
    pub radius: f32,
    pub health: f32,
    pub health_max: f32,
    /// `None` lives until destroyed.
    pub expires_at_ms: Option<u64>,
    pub shape: Option<ShapeId>,
    pub cooldown: f32,
    pub arm_remaining: f32,
}

impl Ability {
    pub fn is_alive(&self) -> bool {
        self.health > 0.0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChestState {
    Closed,
    Opening { by: PlayerId, remaining_ms: u64 },
    Opened,
}

impl ChestState {
    pub fn phase(&self) -> ChestPhase {
        match self {
            ChestState::Closed => ChestPhase::Closed,
            ChestState::Opening { .. } => ChestPhase::Opening,
            ChestState::Opened => ChestPhase::Opened,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Chest {
    pub id: ChestId,
    pub pos: Vec2,
    pub radius: f32,
    pub health: f32,
    pub health_max: f32,
    pub state: ChestState,
}

/// Reward placed on the ground. Loot tables only decide which of these exist.
#[derive(Clone, Debug, PartialEq)]
pub enum LootDrop {
    Coins(u32),
    Stat(InventoryItem),
    /// Mission item carried by hand (one per player).
    Carried(String),
}

impl LootDrop {
    pub fn label(&self) -> String {
        match self {
            LootDrop::Coins(n) => format!("{n} coins"),
            LootDrop::Stat(item) => item.name.clone(),
            LootDrop::Carried(name) => name.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct GroundItem {
    pub id: ItemId,
    pub pos: Vec2,
    pub drop: LootDrop,
    pub dropped_at_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ProjectileKind {
    Bullet,
    /// Artillery shell: homes on an aim point and bursts there.
    Shell { aim: Vec2, turn_rate: f32 },
}

#[derive(Clone, Debug)]
pub struct Projectile {
    pub id: ProjectileId,
    pub source: DamageSource,
    pub faction: Faction,
    pub kind: ProjectileKind,
    pub pos: Vec2,
    pub vel: Vec2,
    pub radius: f32,
    pub damage: f32,
    pub life: f32,
    pub pierce: u8,
    pub hits: Vec<VictimRef>,
}

#[derive(Clone, Debug)]
pub struct Objective {
    pub id: ObjectiveId,
    pub name: String,
    pub pos: Vec2,
    pub radius: f32,
    pub health: f32,
    pub health_max: f32,
    /// Phase-gated vulnerability; `None` means always vulnerable.
    pub vulnerable: Option<bool>,
    pub destroyed: bool,
}

impl Objective {
    pub fn is_vulnerable(&self) -> bool {
        !self.destroyed && self.vulnerable.unwrap_or(true)
    }
}

/// Authoritative entity maps for one room. `BTreeMap` keeps iteration order
/// stable so a room replays identically from its seed.
#[derive(Clone, Debug, Default)]
pub struct EntityRegistries {
    next_id: u32,
    pub players: BTreeMap<PlayerId, Player>,
    pub enemies: BTreeMap<EnemyId, Enemy>,
    pub troops: BTreeMap<TroopId, Troop>,
    pub npcs: BTreeMap<NpcId, Npc>,
    pub hazards: BTreeMap<HazardId, Hazard>,
    pub abilities: BTreeMap<AbilityId, Ability>,
    pub chests: BTreeMap<ChestId, Chest>,
    pub items: BTreeMap<ItemId, GroundItem>,
    pub projectiles: BTreeMap<ProjectileId, Projectile>,
    pub objectives: BTreeMap<ObjectiveId, Objective>,
}

impl EntityRegistries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    /// Drops everything except players (scene change).
    pub fn clear_world(&mut self) {
        self.enemies.clear();
        self.troops.clear();
        self.npcs.clear();
        self.hazards.clear();
        self.abilities.clear();
        self.chests.clear();
        self.items.clear();
        self.projectiles.clear();
        self.objectives.clear();
    }

    /// Position and radius of a live victim.
    pub fn victim_body(&self, victim: VictimRef) -> Option<(Vec2, f32)> {
        match victim {
            VictimRef::Player(id) => self.players.get(&id).map(|p| (p.pos, p.radius)),
            VictimRef::Enemy(id) => self
                .enemies
                .get(&id)
                .filter(|e| e.alive)
                .map(|e| (e.pos, e.radius)),
            VictimRef::Troop(id) => self
                .troops
                .get(&id)
                .filter(|t| t.alive)
                .map(|t| (t.pos, t.radius)),
            VictimRef::Npc(id) => self
                .npcs
                .get(&id)
                .filter(|n| n.alive)
                .map(|n| (n.pos, n.radius)),
            VictimRef::Ability(id) => self
                .abilities
                .get(&id)
                .filter(|a| a.is_alive())
                .map(|a| (a.pos, a.radius)),
            VictimRef::Chest(id) => self
                .chests
                .get(&id)
                .filter(|c| c.state != ChestState::Opened)
                .map(|c| (c.pos, c.radius)),
            VictimRef::Objective(id) => self
                .objectives
                .get(&id)
                .filter(|o| !o.destroyed)
                .map(|o| (o.pos, o.radius)),
        }
    }

    /// Every victim a source of `faction` may damage.
    pub fn victims_for(&self, faction: Faction) -> Vec<VictimRef> {
        let mut out = Vec::new();
        match faction {
            Faction::Hostile => {
                out.extend(
                    self.players
                        .values()
                        .filter(|p| !p.downed)
                        .map(|p| VictimRef::Player(p.id)),
                );
                out.extend(
                    self.troops
                        .values()
                        .filter(|t| t.alive)
                        .map(|t| VictimRef::Troop(t.id)),
                );
                out.extend(
                    self.npcs
                        .values()
                        .filter(|n| n.alive)
                        .map(|n| VictimRef::Npc(n.id)),
                );
                out.extend(
                    self.abilities
                        .values()
                        .filter(|a| a.is_alive() && a.kind != AbilityKind::Mine)
                        .map(|a| VictimRef::Ability(a.id)),
                );
                out.extend(
                    self.objectives
                        .values()
                        .filter(|o| o.is_vulnerable())
                        .map(|o| VictimRef::Objective(o.id)),
                );
            }
            Faction::Friendly => {
                out.extend(
                    self.enemies
                        .values()
                        .filter(|e| e.alive)
                        .map(|e| VictimRef::Enemy(e.id)),
                );
            }
        }
        out.extend(
            self.chests
                .values()
                .filter(|c| c.state == ChestState::Closed)
                .map(|c| VictimRef::Chest(c.id)),
        );
        out
    }

    pub fn living_player_count(&self) -> usize {
        self.players.values().filter(|p| !p.downed).count()
    }
}
