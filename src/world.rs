//! Collaborators the room consumes but does not define: level layouts,
//! per-mode wave settings and loot tables. The defaults here are seeded and
//! deterministic so a room replays identically from its seed.

use crate::constants::*;
use crate::entities::{InventoryItem, LootDrop, StatBonus};
use crate::geometry::Vec2;
use crate::rng::Rng;
use crate::spatial::{Boundary, BoxTags, CircleObstacle, SpatialEnvironment};
use crate::types::{EnemyKind, LevelType};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoxSpec {
    pub center: Vec2,
    pub half_width: f32,
    pub half_height: f32,
    pub angle: f32,
    pub tags: BoxTags,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ObjectiveSpec {
    pub name: String,
    pub pos: Vec2,
    pub radius: f32,
    pub health: f32,
    pub vulnerable: Option<bool>,
}

/// Everything a scene starts with.
#[derive(Clone, Debug, PartialEq)]
pub struct WorldLayout {
    pub boundary: Boundary,
    pub circles: Vec<CircleObstacle>,
    pub boxes: Vec<BoxSpec>,
    pub player_spawns: Vec<Vec2>,
    pub enemy_spawns: Vec<Vec2>,
    /// Enemies placed at scene start regardless of wave timing.
    pub fixed_enemies: Vec<(EnemyKind, Vec2)>,
    pub chests: Vec<Vec2>,
    pub npcs: Vec<(String, Vec2)>,
    pub objectives: Vec<ObjectiveSpec>,
    pub extraction_zone: Option<Vec2>,
}

impl WorldLayout {
    pub fn build_environment(&self) -> SpatialEnvironment {
        let mut env = SpatialEnvironment::new(self.boundary);
        for circle in &self.circles {
            env.add_circle(circle.center, circle.radius);
        }
        for b in &self.boxes {
            env.add_box(b.center, b.half_width, b.half_height, b.angle, b.tags);
        }
        env
    }

    pub fn player_spawn(&self, index: usize) -> Vec2 {
        if self.player_spawns.is_empty() {
            return self.boundary.center();
        }
        self.player_spawns[index % self.player_spawns.len()]
    }
}

/// Produces the collision world for a scene.
pub trait WorldSource: Send {
    fn lobby(&self) -> WorldLayout;
    fn level(&self, level_type: LevelType, seed: u32) -> WorldLayout;
}

/// Procedural layouts driven only by the seed.
#[derive(Clone, Copy, Debug, Default)]
pub struct SeededWorld;

const SPAWN_CLEARING: f32 = 320.0;

impl WorldSource for SeededWorld {
    fn lobby(&self) -> WorldLayout {
        let boundary = Boundary::Rect {
            center: Vec2::ZERO,
            half_width: 500.0,
            half_height: 400.0,
        };
        WorldLayout {
            boundary,
            circles: Vec::new(),
            boxes: Vec::new(),
            player_spawns: ring_points(Vec2::ZERO, 120.0, MAX_PLAYERS_PER_ROOM, 0.0),
            enemy_spawns: Vec::new(),
            fixed_enemies: Vec::new(),
            chests: Vec::new(),
            npcs: vec![("quartermaster".to_string(), Vec2::new(0.0, -300.0))],
            objectives: Vec::new(),
            extraction_zone: None,
        }
    }

    fn level(&self, level_type: LevelType, seed: u32) -> WorldLayout {
        let mut rng = Rng::new(seed ^ 0x5eed_1a7e);
        match level_type {
            LevelType::Survival => survival_layout(&mut rng),
            LevelType::Trenches => trenches_layout(&mut rng),
            LevelType::Boss => boss_layout(&mut rng),
        }
    }
}

fn ring_points(center: Vec2, radius: f32, count: usize, phase: f32) -> Vec<Vec2> {
    let count = count.max(1);
    (0..count)
        .map(|i| {
            let angle = phase + std::f32::consts::TAU * i as f32 / count as f32;
            center + Vec2::from_angle(angle) * radius
        })
        .collect()
}

fn scatter_obstacles(rng: &mut Rng, half: f32, circles: usize, boxes: usize) -> (Vec<CircleObstacle>, Vec<BoxSpec>) {
    let mut out_circles = Vec::new();
    while out_circles.len() < circles {
        let center = Vec2::new(rng.range(-half, half), rng.range(-half, half));
        if center.length() < SPAWN_CLEARING {
            continue;
        }
        out_circles.push(CircleObstacle {
            center,
            radius: rng.range(30.0, 80.0),
        });
    }
    let mut out_boxes = Vec::new();
    while out_boxes.len() < boxes {
        let center = Vec2::new(rng.range(-half, half), rng.range(-half, half));
        if center.length() < SPAWN_CLEARING {
            continue;
        }
        out_boxes.push(BoxSpec {
            center,
            half_width: rng.range(60.0, 160.0),
            half_height: rng.range(14.0, 30.0),
            angle: rng.angle(),
            tags: BoxTags::default(),
        });
    }
    (out_circles, out_boxes)
}

fn survival_layout(rng: &mut Rng) -> WorldLayout {
    let half = 1_400.0;
    let (circles, boxes) = scatter_obstacles(rng, half - 150.0, 14, 10);
    let corners = [
        Vec2::new(-half + 120.0, -half + 120.0),
        Vec2::new(half - 120.0, -half + 120.0),
        Vec2::new(-half + 120.0, half - 120.0),
        Vec2::new(half - 120.0, half - 120.0),
    ];
    WorldLayout {
        boundary: Boundary::Rect {
            center: Vec2::ZERO,
            half_width: half,
            half_height: half,
        },
        circles,
        boxes,
        player_spawns: ring_points(Vec2::ZERO, 90.0, MAX_PLAYERS_PER_ROOM, rng.angle()),
        enemy_spawns: corners.to_vec(),
        fixed_enemies: vec![
            (EnemyKind::DefenseTurret, Vec2::new(0.0, -half + 300.0)),
            (EnemyKind::ArtilleryGun, Vec2::new(half - 300.0, 0.0)),
        ],
        chests: ring_points(Vec2::ZERO, 700.0, 4, rng.angle()),
        npcs: vec![("survivor".to_string(), Vec2::new(180.0, 0.0))],
        objectives: vec![ObjectiveSpec {
            name: "generator".to_string(),
            pos: Vec2::new(0.0, 200.0),
            radius: 36.0,
            health: 600.0,
            vulnerable: None,
        }],
        extraction_zone: Some(Vec2::new(0.0, half - 220.0)),
    }
}

fn trenches_layout(rng: &mut Rng) -> WorldLayout {
    let half_w = 1_800.0;
    let half_h = 1_000.0;
    let mut boxes = Vec::new();
    for column in [-1_200.0_f32, -600.0, 600.0, 1_200.0] {
        let gap = rng.range(-half_h + 250.0, half_h - 250.0);
        // One trench wall per column, split around a crossing gap.
        let top = (gap - 90.0 + half_h) * 0.5;
        let bottom = (half_h - (gap + 90.0)) * 0.5;
        boxes.push(BoxSpec {
            center: Vec2::new(column, -half_h + top),
            half_width: 18.0,
            half_height: top,
            angle: 0.0,
            tags: BoxTags {
                trench: true,
                ..BoxTags::default()
            },
        });
        boxes.push(BoxSpec {
            center: Vec2::new(column, half_h - bottom),
            half_width: 18.0,
            half_height: bottom,
            angle: 0.0,
            tags: BoxTags {
                trench: true,
                ..BoxTags::default()
            },
        });
    }
    boxes.push(BoxSpec {
        center: Vec2::new(-half_w + 150.0, 0.0),
        half_width: 120.0,
        half_height: 160.0,
        angle: 0.0,
        tags: BoxTags {
            keepout: true,
            ..BoxTags::default()
        },
    });
    WorldLayout {
        boundary: Boundary::Rect {
            center: Vec2::ZERO,
            half_width: half_w,
            half_height: half_h,
        },
        circles: Vec::new(),
        boxes,
        player_spawns: ring_points(Vec2::new(-half_w + 150.0, 0.0), 60.0, MAX_PLAYERS_PER_ROOM, 0.0),
        enemy_spawns: vec![
            Vec2::new(half_w - 150.0, -half_h + 150.0),
            Vec2::new(half_w - 150.0, half_h - 150.0),
            Vec2::new(0.0, -half_h + 120.0),
            Vec2::new(0.0, half_h - 120.0),
        ],
        fixed_enemies: vec![
            (EnemyKind::ArtilleryGun, Vec2::new(half_w - 250.0, 0.0)),
            (EnemyKind::DefenseTurret, Vec2::new(900.0, 0.0)),
        ],
        chests: vec![Vec2::new(-900.0, -600.0), Vec2::new(0.0, 0.0), Vec2::new(900.0, 600.0)],
        npcs: Vec::new(),
        objectives: vec![ObjectiveSpec {
            name: "relay".to_string(),
            pos: Vec2::new(300.0, 0.0),
            radius: 40.0,
            health: 800.0,
            vulnerable: Some(true),
        }],
        extraction_zone: Some(Vec2::new(half_w - 200.0, 0.0)),
    }
}

fn boss_layout(rng: &mut Rng) -> WorldLayout {
    let radius = 1_300.0;
    let circles = ring_points(Vec2::ZERO, 650.0, 6, rng.angle())
        .into_iter()
        .map(|center| CircleObstacle { center, radius: 55.0 })
        .collect();
    WorldLayout {
        boundary: Boundary::Circle {
            center: Vec2::ZERO,
            radius,
        },
        circles,
        boxes: Vec::new(),
        player_spawns: ring_points(Vec2::new(0.0, radius - 200.0), 60.0, MAX_PLAYERS_PER_ROOM, 0.0),
        enemy_spawns: ring_points(Vec2::ZERO, radius - 150.0, 6, 0.3),
        fixed_enemies: vec![(EnemyKind::Boss, Vec2::new(0.0, -radius + 300.0))],
        chests: vec![Vec2::new(-400.0, 300.0), Vec2::new(400.0, 300.0)],
        npcs: Vec::new(),
        objectives: Vec::new(),
        extraction_zone: Some(Vec2::new(0.0, radius - 200.0)),
    }
}

/// Wave timing and enemy mix for one level type.
#[derive(Clone, Debug, PartialEq)]
pub struct ModeConfig {
    pub level_type: LevelType,
    pub survival_ms: u64,
    pub ambient_interval_ms: u64,
    pub horde_size: usize,
    pub extraction_radius: f32,
    pub spawn_weights: Vec<(EnemyKind, u32)>,
}

impl ModeConfig {
    pub fn for_level(level_type: LevelType) -> Self {
        let spawn_weights = match level_type {
            LevelType::Survival => vec![
                (EnemyKind::Basic, 50),
                (EnemyKind::Projectile, 18),
                (EnemyKind::Boomer, 12),
                (EnemyKind::Licker, 8),
                (EnemyKind::BigBoy, 7),
                (EnemyKind::WallGuy, 5),
            ],
            LevelType::Trenches => vec![
                (EnemyKind::Basic, 40),
                (EnemyKind::Projectile, 25),
                (EnemyKind::WallGuy, 15),
                (EnemyKind::BigBoy, 10),
                (EnemyKind::Boomer, 10),
            ],
            LevelType::Boss => vec![
                (EnemyKind::Basic, 60),
                (EnemyKind::Boomer, 20),
                (EnemyKind::Projectile, 20),
            ],
        };
        Self {
            level_type,
            survival_ms: get_survival_time_ms(level_type),
            ambient_interval_ms: AMBIENT_SPAWN_INTERVAL_MS,
            horde_size: HORDE_SIZE,
            extraction_radius: EXTRACTION_ZONE_RADIUS,
            spawn_weights,
        }
    }

    pub fn pick_kind(&self, rng: &mut Rng) -> EnemyKind {
        let total: u32 = self.spawn_weights.iter().map(|(_, w)| *w).sum();
        if total == 0 {
            return EnemyKind::Basic;
        }
        let mut roll = rng.int(0, total as i32 - 1) as u32;
        for (kind, weight) in &self.spawn_weights {
            if roll < *weight {
                return *kind;
            }
            roll -= weight;
        }
        EnemyKind::Basic
    }
}

/// Decides which rewards exist. Gameplay only cares that drops exist, not
/// what they are.
pub trait LootTable: Send {
    fn enemy_drops(&self, kind: EnemyKind, rng: &mut Rng) -> Vec<LootDrop>;
    fn chest_drops(&self, rng: &mut Rng) -> Vec<LootDrop>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultLoot;

fn stat_item(rng: &mut Rng) -> InventoryItem {
    let (name, bonus) = match rng.int(0, 4) {
        0 => (
            "plated vest",
            StatBonus {
                armor: 15.0,
                ..StatBonus::default()
            },
        ),
        1 => (
            "trigger spring",
            StatBonus {
                attack_speed: 0.15,
                ..StatBonus::default()
            },
        ),
        2 => (
            "hollow points",
            StatBonus {
                attack_power: 3.0,
                ..StatBonus::default()
            },
        ),
        3 => (
            "lucky charm",
            StatBonus {
                crit_chance: 0.05,
                crit_multiplier: 0.25,
                ..StatBonus::default()
            },
        ),
        _ => (
            "field rations",
            StatBonus {
                health_max: 20.0,
                ..StatBonus::default()
            },
        ),
    };
    InventoryItem {
        name: name.to_string(),
        bonus,
    }
}

impl LootTable for DefaultLoot {
    fn enemy_drops(&self, kind: EnemyKind, rng: &mut Rng) -> Vec<LootDrop> {
        match kind {
            EnemyKind::Boss => vec![LootDrop::Coins(50), LootDrop::Stat(stat_item(rng))],
            EnemyKind::BigBoy | EnemyKind::WallGuy | EnemyKind::ArtilleryGun => {
                vec![LootDrop::Coins(rng.int(3, 8) as u32)]
            }
            _ if rng.bool(0.3) => vec![LootDrop::Coins(rng.int(1, 4) as u32)],
            _ => Vec::new(),
        }
    }

    fn chest_drops(&self, rng: &mut Rng) -> Vec<LootDrop> {
        let mut drops = vec![LootDrop::Coins(rng.int(10, 30) as u32), LootDrop::Stat(stat_item(rng))];
        if rng.bool(0.25) {
            drops.push(LootDrop::Carried("data core".to_string()));
        }
        drops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::QueryFilter;

    #[test]
    fn same_seed_same_layout() {
        let a = SeededWorld.level(LevelType::Survival, 99);
        let b = SeededWorld.level(LevelType::Survival, 99);
        assert_eq!(a, b);
        let c = SeededWorld.level(LevelType::Survival, 100);
        assert_ne!(a.circles, c.circles);
    }

    #[test]
    fn player_spawns_are_clear_in_every_level() {
        for level in [LevelType::Survival, LevelType::Trenches, LevelType::Boss] {
            let layout = SeededWorld.level(level, 7);
            let env = layout.build_environment();
            for spawn in &layout.player_spawns {
                assert!(
                    env.is_clear(*spawn, PLAYER_RADIUS, &QueryFilter::default()),
                    "{level:?} spawn {spawn:?} is blocked"
                );
            }
        }
    }

    #[test]
    fn trench_walls_leave_a_crossing() {
        let layout = SeededWorld.level(LevelType::Trenches, 3);
        let walls: Vec<_> = layout.boxes.iter().filter(|b| b.tags.trench).collect();
        assert_eq!(walls.len(), 8);
        for pair in walls.chunks(2) {
            let top_end = pair[0].center.y + pair[0].half_height;
            let bottom_start = pair[1].center.y - pair[1].half_height;
            assert!(bottom_start - top_end >= 170.0);
        }
    }

    #[test]
    fn weighted_pick_only_returns_listed_kinds() {
        let mode = ModeConfig::for_level(LevelType::Boss);
        let mut rng = Rng::new(5);
        for _ in 0..200 {
            let kind = mode.pick_kind(&mut rng);
            assert!(mode.spawn_weights.iter().any(|(k, _)| *k == kind));
        }
    }

    #[test]
    fn boss_always_drops_loot() {
        let mut rng = Rng::new(1);
        assert!(!DefaultLoot.enemy_drops(EnemyKind::Boss, &mut rng).is_empty());
        assert!(DefaultLoot.chest_drops(&mut rng).len() >= 2);
    }
}
