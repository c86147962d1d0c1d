use crate::types::LevelType;

pub const TICK_RATE: u32 = 30;
pub const TICK_MS: u64 = 1000 / TICK_RATE as u64;
pub const HIGH_BROADCAST_RATE: u32 = 30;
pub const LOW_BROADCAST_RATE: u32 = 4;
pub const FULL_RESYNC_FRAMES: u32 = 60;
pub const INTEREST_RADIUS: f32 = 1_600.0;
pub const MAX_PLAYERS_PER_ROOM: usize = 8;

/// Largest displacement handed to the collision resolver in one call.
pub const MAX_MOVE_SUBSTEP: f32 = 10.0;
pub const CLEAR_POSITION_ATTEMPTS: u32 = 24;

// Players.
pub const PLAYER_RADIUS: f32 = 20.0;
pub const PLAYER_HEALTH: f32 = 100.0;
pub const PLAYER_SPEED: f32 = 220.0;
pub const SPRINT_MULTIPLIER: f32 = 1.5;
pub const STAMINA_MAX: f32 = 100.0;
pub const STAMINA_DRAIN_PER_SEC: f32 = 25.0;
pub const STAMINA_RECHARGE_PER_SEC: f32 = 18.0;
pub const STAMINA_EXHAUST_LOCK_MS: u64 = 1_500;
pub const DASH_STAMINA_COST: f32 = 30.0;
pub const DASH_COOLDOWN_MS: u64 = 900;
pub const DASH_DURATION: f32 = 0.18;
pub const DASH_SPEED: f32 = 900.0;
pub const ENSNARED_SPEED_MULTIPLIER: f32 = 0.35;

pub const ARMOR_CAP: f32 = 150.0;
pub const ARMOR_MITIGATION_CAP: f32 = 0.75;
pub const ATTACK_SPEED_CAP: f32 = 3.0;
pub const CRIT_CHANCE_CAP: f32 = 1.0;
pub const CRIT_MULTIPLIER_CAP: f32 = 5.0;
pub const BASE_ATTACK_POWER: f32 = 10.0;
pub const BASE_CRIT_CHANCE: f32 = 0.05;
pub const BASE_CRIT_MULTIPLIER: f32 = 1.5;
pub const WEAPON_RANGE: f32 = 600.0;
pub const WEAPON_BASE_INTERVAL: f32 = 0.35;
pub const WEAPON_KNOCKBACK_SPEED: f32 = 160.0;
pub const WEAPON_KNOCKBACK_TIME: f32 = 0.12;

pub const REVIVE_RANGE: f32 = 70.0;
pub const REVIVE_CHANNEL_MS: u64 = 4_000;
pub const REVIVE_HEALTH_FRACTION: f32 = 0.3;
pub const INTERACT_RANGE: f32 = 70.0;
pub const CHEST_OPEN_MS: u64 = 2_000;
pub const CHEST_HEALTH: f32 = 80.0;
pub const LOOT_SCATTER: f32 = 30.0;

// Targeting.
pub const ATTRACTOR_PULL_RADIUS: f32 = 600.0;
pub const OBJECTIVE_MODE_CHANCE: f32 = 0.15;
pub const OBJECTIVE_REROLL_MS: u64 = 5_000;
pub const TROOP_DISTANCE_PENALTY: f32 = 1.6;
pub const WANDER_RADIUS: f32 = 200.0;
pub const WANDER_PAUSE_MIN: f32 = 1.0;
pub const WANDER_PAUSE_MAX: f32 = 2.5;
pub const WANDER_SPEED_FACTOR: f32 = 0.45;
pub const PRE_AGGRO_RELEASE_DIST: f32 = 80.0;
pub const PRE_AGGRO_PLAYER_DIST: f32 = 500.0;
pub const PRE_AGGRO_MAX_MS: u64 = 6_000;
pub const OBJECTIVE_DAMAGE_PER_SEC: f32 = 12.0;

// Navigation.
pub const LOS_SAMPLE_STEP: f32 = 16.0;
pub const NAV_PROBE_RADIUS: f32 = 12.0;
pub const NAV_MAX_CELLS: usize = 40_000;
pub const NAV_MIN_CELL: f32 = 16.0;
pub const NAV_MAX_CELL: f32 = 64.0;
pub const NAV_MAX_EXPANSIONS: usize = 1_000;
pub const NAV_REPATH_MS: u64 = 500;
pub const NAV_WAYPOINT_REACHED: f32 = 12.0;

// Steering.
pub const MELEE_BREATHING_ROOM: f32 = 4.0;
pub const RANGED_BREATHING_ROOM: f32 = 180.0;
pub const SEPARATION_PADDING: f32 = 6.0;
pub const RING_SLOT_ARC: f32 = 0.45;
pub const STRAFE_FACTOR: f32 = 0.6;

// Enemy kinds.
pub const BOOMER_FUSE: f32 = 0.6;
pub const BOOMER_ARM_MARGIN: f32 = 10.0;
pub const BOOMER_INNER_RADIUS: f32 = 20.0;
pub const BOOMER_BLAST_RADIUS: f32 = 100.0;
pub const BOOMER_CENTER_DAMAGE: f32 = 65.0;
pub const BOOMER_EDGE_DAMAGE: f32 = 15.0;

pub const RANGED_MIN_RANGE: f32 = 140.0;
pub const RANGED_MAX_RANGE: f32 = 460.0;
pub const RANGED_MODE_REROLL_MS: u64 = 4_000;
pub const RANGED_RUSH_CHANCE: f32 = 0.3;
pub const RANGED_BURST_MIN: i32 = 2;
pub const RANGED_BURST_MAX: i32 = 4;
pub const RANGED_SHOT_GAP: f32 = 0.2;
pub const RANGED_BURST_PAUSE_MIN: f32 = 1.2;
pub const RANGED_BURST_PAUSE_MAX: f32 = 2.2;
pub const ENEMY_BULLET_SPEED: f32 = 420.0;
pub const ENEMY_BULLET_DAMAGE: f32 = 8.0;
pub const ENEMY_BULLET_LIFE: f32 = 2.0;
pub const PROJECTILE_RADIUS: f32 = 5.0;

pub const CHARGER_DASH_RANGE: f32 = 320.0;
pub const CHARGER_WINDUP: f32 = 0.6;
pub const CHARGER_DASH_SPEED: f32 = 700.0;
pub const CHARGER_DASH_TIME: f32 = 0.45;
pub const CHARGER_COOLDOWN: f32 = 4.0;
pub const CHARGER_DASH_DAMAGE: f32 = 25.0;

pub const SHIELD_TURN_RATE: f32 = 1.6;
pub const SHIELD_HALF_WIDTH: f32 = 6.0;
pub const SHIELD_HALF_HEIGHT: f32 = 30.0;
pub const SHIELD_OFFSET: f32 = 10.0;
pub const SHIELD_CONE_HALF_ANGLE: f32 = 0.6;
pub const SHIELD_CONE_RANGE: f32 = 90.0;
pub const SHIELD_ATTACK_COOLDOWN: f32 = 1.8;
pub const SHIELD_ATTACK_DAMAGE: f32 = 20.0;
pub const SLAM_HAZARD_LIFE: f32 = 0.25;

pub const TURRET_RANGE: f32 = 550.0;
pub const TURRET_TURN_RATE: f32 = 3.0;
pub const TURRET_COOLDOWN: f32 = 1.2;
pub const TURRET_AIM_TOLERANCE: f32 = 0.15;
pub const ARTILLERY_RANGE: f32 = 900.0;
pub const ARTILLERY_MIN_RANGE: f32 = 150.0;
pub const ARTILLERY_TURN_RATE: f32 = 1.2;
pub const ARTILLERY_BURST: i32 = 4;
pub const ARTILLERY_SHOT_GAP: f32 = 0.35;
pub const ARTILLERY_COOLDOWN: f32 = 6.0;
pub const ARTILLERY_RING_MIN: f32 = 40.0;
pub const ARTILLERY_RING_MAX: f32 = 120.0;
pub const ARTILLERY_SHELL_SPEED: f32 = 300.0;
pub const ARTILLERY_SHELL_TURN_RATE: f32 = 1.5;
pub const ARTILLERY_INNER_RADIUS: f32 = 15.0;
pub const ARTILLERY_BLAST_RADIUS: f32 = 80.0;
pub const ARTILLERY_CENTER_DAMAGE: f32 = 40.0;
pub const ARTILLERY_EDGE_DAMAGE: f32 = 10.0;

pub const BOSS_ACTIVATION_RANGE: f32 = 700.0;
pub const BOSS_THREAT_RANGE: f32 = 140.0;
pub const BOSS_DASH_COOLDOWN: f32 = 5.0;
pub const BOSS_DASH_SPEED: f32 = 600.0;
pub const BOSS_DASH_TIME: f32 = 0.35;
pub const BOSS_SHOT_INTERVAL: f32 = 1.4;
pub const BOSS_BURST_CHANCE: f32 = 0.25;
pub const BOSS_BURST_WINDOW: f32 = 2.5;
pub const BOSS_BURST_SHOT_INTERVAL: f32 = 0.15;
pub const BOSS_BURST_SPREAD: f32 = 0.35;
pub const BOSS_HEALTH_THRESHOLDS: [f32; 3] = [0.75, 0.5, 0.25];
pub const BOSS_REINFORCEMENTS: usize = 6;

pub const LICKER_GRAPPLE_RANGE: f32 = 260.0;
pub const LICKER_TONGUE_SPEED: f32 = 650.0;
pub const LICKER_ENSNARE_TIME: f32 = 3.0;
pub const LICKER_PULL_SPEED: f32 = 90.0;
pub const LICKER_DRAIN_PER_SEC: f32 = 6.0;
pub const LICKER_COOLDOWN: f32 = 5.0;

// Allies and structures.
pub const TROOP_RADIUS: f32 = 16.0;
pub const TROOP_HEALTH: f32 = 60.0;
pub const TROOP_SPEED: f32 = 200.0;
pub const TROOP_DPS: f32 = 15.0;
pub const TROOP_FOLLOW_DIST: f32 = 80.0;
pub const TROOP_AGGRO_RANGE: f32 = 300.0;
pub const NPC_RADIUS: f32 = 18.0;
pub const NPC_HEALTH: f32 = 80.0;

pub const SHIELD_WALL_HEALTH: f32 = 200.0;
pub const SHIELD_WALL_HALF_WIDTH: f32 = 50.0;
pub const SHIELD_WALL_HALF_HEIGHT: f32 = 8.0;
pub const SHIELD_WALL_LIFE_MS: u64 = 20_000;
pub const ABILITY_TURRET_HEALTH: f32 = 120.0;
pub const ABILITY_TURRET_RANGE: f32 = 500.0;
pub const ABILITY_TURRET_COOLDOWN: f32 = 0.5;
pub const ABILITY_TURRET_DAMAGE: f32 = 8.0;
pub const ABILITY_TURRET_LIFE_MS: u64 = 25_000;
pub const ABILITY_TURRET_BULLET_SPEED: f32 = 900.0;
pub const MINE_ARM_TIME: f32 = 1.0;
pub const MINE_TRIGGER_RADIUS: f32 = 40.0;
pub const MINE_INNER_RADIUS: f32 = 15.0;
pub const MINE_BLAST_RADIUS: f32 = 90.0;
pub const MINE_CENTER_DAMAGE: f32 = 80.0;
pub const MINE_EDGE_DAMAGE: f32 = 20.0;
pub const HEALING_BOX_RADIUS: f32 = 120.0;
pub const HEALING_BOX_RATE: f32 = 12.0;
pub const HEALING_BOX_LIFE_MS: u64 = 15_000;
pub const HEALING_BOX_HEALTH: f32 = 100.0;
pub const ATTRACTOR_HEALTH: f32 = 150.0;
pub const ATTRACTOR_DRAIN_PER_SEC: f32 = 10.0;
pub const STRUCTURE_RADIUS: f32 = 22.0;

pub const ACID_DPS: f32 = 10.0;
pub const ACID_SLOW: f32 = 0.5;
pub const FIRE_DPS: f32 = 15.0;
pub const ACID_RADIUS: f32 = 60.0;
pub const ACID_LIFE: f32 = 4.0;
pub const FIRE_RADIUS: f32 = 45.0;
pub const FIRE_LIFE: f32 = 2.5;

// Spawning and mission.
pub const AMBIENT_SPAWN_INTERVAL_MS: u64 = 3_000;
pub const SPAWN_MIN_PLAYER_DIST: f32 = 500.0;
pub const HORDE_SIZE: usize = 10;
pub const LOBBY_COUNTDOWN_MS: u64 = 5_000;
pub const EXTRACTION_COUNTDOWN_MS: u64 = 10_000;
pub const EXTRACTION_ZONE_RADIUS: f32 = 150.0;

pub fn get_initial_enemy_count(level_type: LevelType, player_count: usize) -> usize {
    let base = match level_type {
        LevelType::Survival => 10,
        LevelType::Trenches => 14,
        LevelType::Boss => 6,
    };
    base + 3 * player_count.saturating_sub(1)
}

pub fn get_ambient_enemy_cap(player_count: usize) -> usize {
    if player_count <= 1 {
        return 30;
    }
    if player_count <= 4 {
        return 45;
    }
    60
}

pub fn get_survival_time_ms(level_type: LevelType) -> u64 {
    match level_type {
        LevelType::Survival => 5 * 60 * 1000,
        LevelType::Trenches => 6 * 60 * 1000,
        LevelType::Boss => 8 * 60 * 1000,
    }
}

/// `appliedDamage = raw * (1 - min(cap, armor / 100))`, negative armor ignored.
pub fn armor_factor(armor_percent: f32) -> f32 {
    let armor = if armor_percent.is_finite() {
        armor_percent.max(0.0)
    } else {
        0.0
    };
    1.0 - (armor / 100.0).min(ARMOR_MITIGATION_CAP)
}

pub fn fire_interval(attack_speed: f32) -> f32 {
    WEAPON_BASE_INTERVAL / attack_speed.clamp(0.1, ATTACK_SPEED_CAP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn armor_factor_is_capped() {
        assert!((armor_factor(500.0) - 0.25).abs() < 1e-6);
        assert!((armor_factor(50.0) - 0.5).abs() < 1e-6);
        assert_eq!(armor_factor(-20.0), 1.0);
        assert_eq!(armor_factor(f32::NAN), 1.0);
    }

    #[test]
    fn population_grows_with_party_size() {
        let solo = get_initial_enemy_count(LevelType::Survival, 1);
        let party = get_initial_enemy_count(LevelType::Survival, 4);
        assert!(party > solo);
        assert!(get_ambient_enemy_cap(8) >= get_ambient_enemy_cap(1));
    }
}
