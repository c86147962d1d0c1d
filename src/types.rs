use serde::Serialize;
use serde_json::{Map, Value};

use crate::navigation::NavMesh;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelType {
    Survival,
    Trenches,
    Boss,
}

impl LevelType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "survival" => Some(Self::Survival),
            "trenches" => Some(Self::Trenches),
            "boss" => Some(Self::Boss),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scene {
    Lobby,
    Level,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionPhase {
    Lobby,
    InProgress,
    Extracted,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EnemyKind {
    Basic,
    Projectile,
    Boomer,
    Licker,
    BigBoy,
    WallGuy,
    DefenseTurret,
    ArtilleryGun,
    Boss,
}

impl EnemyKind {
    pub fn is_stationary(self) -> bool {
        matches!(self, Self::DefenseTurret | Self::ArtilleryGun)
    }

    /// Always replicated regardless of distance to the viewer.
    pub fn always_visible(self) -> bool {
        matches!(self, Self::Boss | Self::DefenseTurret | Self::ArtilleryGun)
    }

    /// Whether attractors and objective mode can pull this kind off living targets.
    pub fn respects_structures(self) -> bool {
        !matches!(
            self,
            Self::Licker | Self::DefenseTurret | Self::ArtilleryGun
        )
    }

    pub fn targets_troops(self) -> bool {
        !matches!(self, Self::Licker)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbilityKind {
    ShieldWall,
    Turret,
    Mine,
    HealingBox,
    Attractor,
}

impl AbilityKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "shield_wall" => Some(Self::ShieldWall),
            "turret" => Some(Self::Turret),
            "mine" => Some(Self::Mine),
            "healing_box" => Some(Self::HealingBox),
            "attractor" => Some(Self::Attractor),
            _ => None,
        }
    }

    /// Structures enemies may chew on in objective mode.
    pub fn is_destructible_structure(self) -> bool {
        matches!(self, Self::ShieldWall | Self::Turret | Self::HealingBox)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HazardKind {
    Acid,
    Fire,
    Slam,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChestPhase {
    Closed,
    Opening,
    Opened,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatsView {
    pub armor: f32,
    #[serde(rename = "attackSpeed")]
    pub attack_speed: f32,
    #[serde(rename = "attackPower")]
    pub attack_power: f32,
    #[serde(rename = "critChance")]
    pub crit_chance: f32,
    #[serde(rename = "critMultiplier")]
    pub crit_multiplier: f32,
    #[serde(rename = "speedMultiplier")]
    pub speed_multiplier: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlayerView {
    pub id: String,
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub aim: f32,
    pub health: f32,
    #[serde(rename = "healthMax")]
    pub health_max: f32,
    pub stamina: f32,
    #[serde(rename = "staminaMax")]
    pub stamina_max: f32,
    pub exhausted: bool,
    pub stats: StatsView,
    pub coins: u32,
    pub kills: u32,
    pub inventory: Vec<String>,
    #[serde(rename = "carriedItem")]
    pub carried_item: Option<String>,
    pub downed: bool,
    #[serde(rename = "reviveProgress")]
    pub revive_progress: Option<f32>,
    pub ensnared: bool,
    pub slowed: bool,
    pub invulnerable: bool,
    pub dashing: bool,
    #[serde(rename = "inDialogue")]
    pub in_dialogue: bool,
    pub invisible: bool,
    #[serde(rename = "evilProgress")]
    pub evil_progress: f32,
    pub cosmetic: String,
    #[serde(rename = "lastInputSeq")]
    pub last_input_seq: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct EnemyView {
    pub id: String,
    pub kind: EnemyKind,
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub facing: f32,
    pub health: f32,
    #[serde(rename = "healthMax")]
    pub health_max: f32,
    pub state: &'static str,
}

#[derive(Clone, Debug, Serialize)]
pub struct TroopView {
    pub id: String,
    pub owner: Option<String>,
    pub x: f32,
    pub y: f32,
    pub health: f32,
    #[serde(rename = "healthMax")]
    pub health_max: f32,
}

#[derive(Clone, Debug, Serialize)]
pub struct NpcView {
    pub id: String,
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub health: f32,
}

#[derive(Clone, Debug, Serialize)]
pub struct ProjectileView {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub hostile: bool,
    pub shell: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct AbilityView {
    pub id: String,
    pub kind: AbilityKind,
    pub owner: String,
    pub x: f32,
    pub y: f32,
    pub health: f32,
    #[serde(rename = "healthMax")]
    pub health_max: f32,
    #[serde(rename = "expiresAtMs")]
    pub expires_at_ms: Option<u64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChestView {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub phase: ChestPhase,
    pub health: f32,
}

#[derive(Clone, Debug, Serialize)]
pub struct GroundItemView {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub label: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct HazardView {
    pub id: String,
    pub kind: HazardKind,
    pub x: f32,
    pub y: f32,
    pub radius: f32,
}

#[derive(Clone, Debug, Serialize)]
pub struct ObjectiveView {
    pub id: String,
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub health: f32,
    #[serde(rename = "healthMax")]
    pub health_max: f32,
    pub vulnerable: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct FullState {
    pub tick: u64,
    #[serde(rename = "nowMs")]
    pub now_ms: u64,
    pub players: Vec<PlayerView>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlayerDelta {
    pub id: String,
    pub fields: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StateDelta {
    pub tick: u64,
    pub full: bool,
    pub players: Vec<PlayerDelta>,
    pub removed: Vec<String>,
}

/// Entities near one viewer.
#[derive(Clone, Debug, Default, Serialize)]
pub struct EntitySnapshot {
    pub tick: u64,
    pub enemies: Vec<EnemyView>,
    pub troops: Vec<TroopView>,
    pub npcs: Vec<NpcView>,
    pub projectiles: Vec<ProjectileView>,
    pub abilities: Vec<AbilityView>,
    pub chests: Vec<ChestView>,
    pub items: Vec<GroundItemView>,
    pub hazards: Vec<HazardView>,
    pub objectives: Vec<ObjectiveView>,
}

#[derive(Clone, Debug, Serialize)]
pub struct UiSnapshot {
    pub scene: Scene,
    #[serde(rename = "levelType")]
    pub level_type: LevelType,
    pub phase: MissionPhase,
    #[serde(rename = "lobbyCountdownMs")]
    pub lobby_countdown_ms: Option<u64>,
    #[serde(rename = "survivalRemainingMs")]
    pub survival_remaining_ms: u64,
    #[serde(rename = "extractionCountdownMs")]
    pub extraction_countdown_ms: Option<u64>,
    #[serde(rename = "extractionUnlocked")]
    pub extraction_unlocked: bool,
    #[serde(rename = "enemyCount")]
    pub enemy_count: usize,
    pub kills: u32,
    #[serde(rename = "navGeneration")]
    pub nav_generation: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct WorldInit {
    #[serde(rename = "roomId")]
    pub room_id: String,
    #[serde(rename = "playerId")]
    pub player_id: String,
    pub scene: Scene,
    #[serde(rename = "levelType")]
    pub level_type: LevelType,
    pub seed: u32,
    #[serde(rename = "tickRate")]
    pub tick_rate: u32,
    pub boundary: crate::spatial::Boundary,
    pub circles: Vec<crate::spatial::CircleObstacle>,
    pub boxes: Vec<crate::spatial::OrientedBox>,
    pub navmesh: Option<NavMesh>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEvent {
    PlayerJoined {
        #[serde(rename = "playerId")]
        player_id: String,
        name: String,
    },
    PlayerLeft {
        #[serde(rename = "playerId")]
        player_id: String,
    },
    PlayerDowned {
        #[serde(rename = "playerId")]
        player_id: String,
    },
    PlayerRevived {
        #[serde(rename = "playerId")]
        player_id: String,
        by: String,
    },
    EnemySpawned {
        #[serde(rename = "enemyId")]
        enemy_id: String,
        kind: EnemyKind,
    },
    EnemyKilled {
        #[serde(rename = "enemyId")]
        enemy_id: String,
        kind: EnemyKind,
        x: f32,
        y: f32,
    },
    Explosion {
        x: f32,
        y: f32,
        radius: f32,
    },
    Ensnared {
        #[serde(rename = "playerId")]
        player_id: String,
        #[serde(rename = "enemyId")]
        enemy_id: String,
    },
    Released {
        #[serde(rename = "playerId")]
        player_id: String,
        #[serde(rename = "enemyId")]
        enemy_id: String,
    },
    ChargerWindup {
        #[serde(rename = "enemyId")]
        enemy_id: String,
        dx: f32,
        dy: f32,
    },
    ShieldSlam {
        #[serde(rename = "enemyId")]
        enemy_id: String,
        x: f32,
        y: f32,
    },
    HordeSpawned {
        count: usize,
    },
    ChestOpened {
        #[serde(rename = "chestId")]
        chest_id: String,
    },
    ItemPicked {
        #[serde(rename = "itemId")]
        item_id: String,
        by: String,
    },
    AbilityExpired {
        #[serde(rename = "abilityId")]
        ability_id: String,
    },
    ObjectiveDestroyed {
        #[serde(rename = "objectiveId")]
        objective_id: String,
    },
    SceneChanged {
        scene: Scene,
    },
    MissionEnded {
        phase: MissionPhase,
    },
    Toast {
        message: String,
    },
}
