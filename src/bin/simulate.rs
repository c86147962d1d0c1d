use clap::Parser;
use horde_room_server::config::RoomConfig;
use horde_room_server::constants::TICK_MS;
use horde_room_server::entities::{PlayerId, PlayerInput};
use horde_room_server::geometry::Vec2;
use horde_room_server::rng::Rng;
use horde_room_server::room::Room;
use horde_room_server::types::{AbilityKind, LevelType, MissionPhase, RuntimeEvent, Scene};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Runs scripted bot squads through headless rooms")]
struct Cli {
    #[arg(long)]
    single: bool,
    #[arg(long)]
    bots: Option<i32>,
    #[arg(long)]
    minutes: Option<i32>,
    /// survival | trenches | boss
    #[arg(long)]
    level: Option<String>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    match_id: Option<String>,
    #[arg(long)]
    summary_out: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
struct Scenario {
    name: String,
    bots: usize,
    minutes: i32,
    level: LevelType,
    seed: u32,
}

#[derive(Clone, Debug, Serialize)]
struct ScenarioResultLine {
    scenario: String,
    seed: u32,
    bots: usize,
    minutes: i32,
    level: LevelType,
    outcome: String,
    #[serde(rename = "durationMs")]
    duration_ms: u64,
    kills: u32,
    downs: u32,
    revives: u32,
    hordes: u32,
    explosions: u32,
    #[serde(rename = "chestsOpened")]
    chests_opened: u32,
    #[serde(rename = "peakEnemies")]
    peak_enemies: usize,
    anomalies: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
struct AnomalyRecord {
    tick: u64,
    message: String,
}

#[derive(Clone, Debug)]
struct ScenarioRunResult {
    result: ScenarioResultLine,
    anomaly_records: Vec<AnomalyRecord>,
    finished_tick: u64,
}

#[derive(Clone, Debug, Serialize)]
struct RunSummary {
    #[serde(rename = "matchId")]
    match_id: String,
    #[serde(rename = "startedAtMs")]
    started_at_ms: u64,
    #[serde(rename = "finishedAtMs")]
    finished_at_ms: u64,
    #[serde(rename = "scenarioCount")]
    scenario_count: usize,
    #[serde(rename = "anomalyCount")]
    anomaly_count: usize,
    #[serde(rename = "averageDurationMs")]
    average_duration_ms: u64,
    #[serde(rename = "outcomeCounts")]
    outcome_counts: BTreeMap<String, usize>,
    scenarios: Vec<ScenarioResultLine>,
}

fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let scenarios = resolve_scenarios(&cli);
    let run_started_at_ms = now_ms();
    let seed_hint = scenarios.first().map(|scenario| scenario.seed).unwrap_or(0);
    let match_id = cli
        .match_id
        .clone()
        .unwrap_or_else(|| default_match_id(seed_hint, run_started_at_ms));
    let mut has_anomaly = false;
    let mut scenario_results = Vec::new();
    let mut total_anomalies = 0usize;

    for scenario in scenarios {
        info!(
            match_id = %match_id,
            scenario = %scenario.name,
            seed = scenario.seed,
            bots = scenario.bots,
            level = ?scenario.level,
            "scenario started"
        );
        let scenario_run = run_scenario(&scenario);

        for anomaly in &scenario_run.anomaly_records {
            warn!(
                match_id = %match_id,
                scenario = %scenario.name,
                tick = anomaly.tick,
                message = %anomaly.message,
                "anomaly detected"
            );
        }

        if !scenario_run.result.anomalies.is_empty() {
            has_anomaly = true;
        }
        total_anomalies += scenario_run.anomaly_records.len();

        info!(
            match_id = %match_id,
            scenario = %scenario.name,
            tick = scenario_run.finished_tick,
            outcome = %scenario_run.result.outcome,
            duration_ms = scenario_run.result.duration_ms,
            kills = scenario_run.result.kills,
            "scenario finished"
        );

        match serde_json::to_string(&scenario_run.result) {
            Ok(line) => println!("{line}"),
            Err(err) => error!(%err, "scenario result did not serialize"),
        }
        scenario_results.push(scenario_run.result);
    }

    let summary = build_run_summary(
        match_id.clone(),
        (run_started_at_ms, now_ms()),
        scenario_results,
        total_anomalies,
    );

    if let Some(path) = cli.summary_out.as_ref() {
        if let Err(err) = write_summary(path, &summary) {
            error!(match_id = %match_id, path = %path.display(), %err, "summary write failed");
            std::process::exit(2);
        }
    }

    info!(
        match_id = %match_id,
        scenarios = summary.scenario_count,
        anomalies = summary.anomaly_count,
        average_duration_ms = summary.average_duration_ms,
        "run finished"
    );

    if has_anomaly {
        std::process::exit(1);
    }
}

fn run_scenario(scenario: &Scenario) -> ScenarioRunResult {
    let config = RoomConfig {
        level_type: scenario.level,
        ..RoomConfig::default()
    };
    let mut room = Room::with_defaults(scenario.name.clone(), scenario.seed, config);
    let mut bot_rng = Rng::new(scenario.seed ^ 0x5eed);
    let bots: Vec<PlayerId> = (0..scenario.bots)
        .filter_map(|idx| room.add_player(&format!("BOT-{:02}", idx + 1)).ok())
        .collect();
    if let Some(first) = bots.first() {
        let _ = room.start_lobby_countdown(*first);
    }

    let limit_ms = scenario.minutes as u64 * 60_000;
    let mut stats = ScenarioResultLine {
        scenario: scenario.name.clone(),
        seed: scenario.seed,
        bots: bots.len(),
        minutes: scenario.minutes,
        level: scenario.level,
        outcome: "timeout".to_string(),
        duration_ms: 0,
        kills: 0,
        downs: 0,
        revives: 0,
        hordes: 0,
        explosions: 0,
        chests_opened: 0,
        peak_enemies: 0,
        anomalies: Vec::new(),
    };
    let mut anomaly_records = Vec::new();
    let mut anomaly_seen = HashSet::new();
    let mut level_started = false;

    while room.now_ms() < limit_ms {
        for (idx, bot) in bots.iter().enumerate() {
            let input = bot_input(&room, *bot, idx, &mut bot_rng);
            let _ = room.update_player_input(*bot, input);
            drive_bot_commands(&mut room, *bot, &mut bot_rng);
        }
        room.step(TICK_MS);

        for event in room.drain_events() {
            match event {
                RuntimeEvent::EnemyKilled { .. } => stats.kills += 1,
                RuntimeEvent::PlayerDowned { .. } => stats.downs += 1,
                RuntimeEvent::PlayerRevived { .. } => stats.revives += 1,
                RuntimeEvent::HordeSpawned { .. } => stats.hordes += 1,
                RuntimeEvent::Explosion { .. } => stats.explosions += 1,
                RuntimeEvent::ChestOpened { .. } => stats.chests_opened += 1,
                RuntimeEvent::SceneChanged { scene: Scene::Level } => level_started = true,
                _ => {}
            }
        }
        stats.peak_enemies = stats.peak_enemies.max(room.registries().enemies.len());
        for message in collect_room_anomalies(&room) {
            push_anomaly(
                &mut stats.anomalies,
                &mut anomaly_records,
                &mut anomaly_seen,
                room.tick(),
                message,
            );
        }
        if level_started && room.scene() == Scene::Lobby {
            break;
        }
    }

    stats.outcome = match room.phase() {
        MissionPhase::Extracted => "extracted",
        MissionPhase::Failed => "failed",
        MissionPhase::InProgress | MissionPhase::Lobby => "timeout",
    }
    .to_string();
    stats.duration_ms = room.now_ms();
    ScenarioRunResult {
        result: stats,
        anomaly_records,
        finished_tick: room.tick(),
    }
}

/// Kite the nearest enemy: close in when far, back off when close, always
/// shooting. Once extraction opens, head for the zone instead.
fn bot_input(room: &Room, bot: PlayerId, idx: usize, rng: &mut Rng) -> PlayerInput {
    let regs = room.registries();
    let Some(me) = regs.players.get(&bot) else {
        return PlayerInput::default();
    };
    let nearest = regs
        .enemies
        .values()
        .filter(|e| e.alive)
        .map(|e| (e.pos.distance(me.pos), e.pos))
        .min_by(|a, b| a.0.total_cmp(&b.0));

    let mut wish = Vec2::ZERO;
    let mut aim = me.aim;
    let mut fire = false;
    if let Some((dist, at)) = nearest {
        aim = (at - me.pos).angle();
        fire = dist < 600.0;
        let toward = (at - me.pos).normalize_or_zero();
        wish = if dist > 320.0 {
            toward
        } else if dist < 160.0 {
            -toward
        } else {
            toward.perp() * if idx % 2 == 0 { 1.0 } else { -1.0 }
        };
    }
    if room.extraction_unlocked() {
        if let Some(zone) = room.extraction_zone() {
            wish = (zone - me.pos).normalize_or_zero();
        }
    }
    PlayerInput {
        seq: room.tick() as u32,
        client_time_ms: room.now_ms(),
        up: wish.y < -0.3,
        down: wish.y > 0.3,
        left: wish.x < -0.3,
        right: wish.x > 0.3,
        sprint: me.stamina > me.stamina_max * 0.5,
        dash: rng.bool(0.005),
        fire,
        aim,
        ..PlayerInput::default()
    }
}

/// Occasional discrete actions: revives, abilities, chests, extraction.
fn drive_bot_commands(room: &mut Room, bot: PlayerId, rng: &mut Rng) {
    if room.scene() != Scene::Level {
        return;
    }
    let regs = room.registries();
    let Some(me) = regs.players.get(&bot) else {
        return;
    };
    if me.downed {
        let _ = room.accept_revive(bot);
        return;
    }
    let my_pos = me.pos;
    let downed_mate = regs
        .players
        .values()
        .find(|p| p.downed && p.revive.is_none() && p.pos.distance(my_pos) < 200.0)
        .map(|p| p.id.to_string());
    let chest = regs
        .chests
        .values()
        .find(|c| c.pos.distance(my_pos) < 90.0)
        .map(|c| c.id.to_string());
    let item = regs
        .items
        .values()
        .find(|i| i.pos.distance(my_pos) < 60.0)
        .map(|i| i.id.to_string());

    if let Some(target) = downed_mate {
        let _ = room.start_revive(bot, &target);
    }
    if let Some(chest) = chest {
        let _ = room.open_chest(bot, &chest);
    }
    if let Some(item) = item {
        let _ = room.pickup_item(bot, &item);
    }
    if rng.bool(0.002) {
        let kinds = [
            AbilityKind::Turret,
            AbilityKind::Mine,
            AbilityKind::HealingBox,
            AbilityKind::ShieldWall,
        ];
        let _ = room.spawn_ability(bot, kinds[rng.pick_index(kinds.len())]);
    }
    if rng.bool(0.001) {
        let _ = room.spawn_troop(bot);
    }
    if room.extraction_unlocked() {
        let _ = room.start_extraction(bot);
    }
}

fn collect_room_anomalies(room: &Room) -> Vec<String> {
    let mut anomalies = Vec::new();
    let regs = room.registries();
    let env = room.environment();
    for player in regs.players.values() {
        if !player.health.is_finite() || player.health < 0.0 || player.health > player.health_max {
            anomalies.push(format!(
                "player health out of range: {} {}/{}",
                player.id, player.health, player.health_max
            ));
        }
        if !player.pos.is_finite() || !env.is_inside_bounds(player.pos, player.radius - 0.5) {
            anomalies.push(format!("player out of bounds: {}", player.id));
        }
    }
    for enemy in regs.enemies.values() {
        if !enemy.alive || enemy.health <= 0.0 {
            anomalies.push(format!("dead enemy still registered: {}", enemy.id));
        }
        if !enemy.pos.is_finite() {
            anomalies.push(format!("enemy position not finite: {}", enemy.id));
        }
    }
    for player in regs.players.values() {
        for enemy in player.ensnared_by.keys() {
            if !regs.enemies.contains_key(enemy) {
                anomalies.push(format!("ensnare points at missing enemy: {} <- {enemy}", player.id));
            }
        }
    }
    anomalies
}

fn resolve_scenarios(cli: &Cli) -> Vec<Scenario> {
    let seed = normalize_seed(cli.seed.unwrap_or_else(now_ms));
    let level = cli
        .level
        .as_deref()
        .and_then(LevelType::parse)
        .unwrap_or(LevelType::Survival);

    if cli.single || cli.bots.is_some() || cli.minutes.is_some() {
        let bots = cli.bots.unwrap_or(2).clamp(1, 8);
        return vec![Scenario {
            name: format!("custom-bots{bots}"),
            bots: bots as usize,
            minutes: cli.minutes.unwrap_or(3).clamp(1, 15),
            level,
            seed,
        }];
    }

    vec![
        Scenario {
            name: "quick-check-bots2".to_string(),
            bots: 2,
            minutes: 2,
            level: LevelType::Survival,
            seed,
        },
        Scenario {
            name: "boss-check-bots4".to_string(),
            bots: 4,
            minutes: 5,
            level: LevelType::Boss,
            seed: normalize_seed(u64::from(seed) + 1),
        },
    ]
}

fn normalize_seed(seed: u64) -> u32 {
    seed as u32
}

fn push_anomaly(
    anomalies: &mut Vec<String>,
    anomaly_records: &mut Vec<AnomalyRecord>,
    anomaly_seen: &mut HashSet<String>,
    tick: u64,
    message: String,
) {
    anomaly_records.push(AnomalyRecord {
        tick,
        message: message.clone(),
    });
    if anomaly_seen.insert(message.clone()) {
        anomalies.push(message);
    }
}

fn default_match_id(seed: u32, timestamp_ms: u64) -> String {
    format!("sim-{seed}-{timestamp_ms}")
}

/// Folds per-scenario lines into the run summary; `window` is (started, finished).
fn build_run_summary(
    match_id: String,
    window: (u64, u64),
    scenarios: Vec<ScenarioResultLine>,
    anomaly_count: usize,
) -> RunSummary {
    let (started_at_ms, finished_at_ms) = window;
    let scenario_count = scenarios.len();
    let mut outcome_counts: BTreeMap<String, usize> = BTreeMap::new();
    for line in &scenarios {
        *outcome_counts.entry(line.outcome.clone()).or_default() += 1;
    }
    let total_ms: u64 = scenarios.iter().map(|line| line.duration_ms).sum();
    let average_duration_ms = total_ms.checked_div(scenario_count as u64).unwrap_or(0);
    RunSummary {
        match_id,
        started_at_ms,
        finished_at_ms,
        scenario_count,
        anomaly_count,
        average_duration_ms,
        outcome_counts,
        scenarios,
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn write_summary(path: &Path, summary: &RunSummary) -> io::Result<()> {
    let summary_text = serde_json::to_string_pretty(summary).map_err(io::Error::other)?;
    std::fs::write(path, summary_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_scenario_result(outcome: &str, duration_ms: u64) -> ScenarioResultLine {
        ScenarioResultLine {
            scenario: "test".to_string(),
            seed: 42,
            bots: 3,
            minutes: 1,
            level: LevelType::Survival,
            outcome: outcome.to_string(),
            duration_ms,
            kills: 0,
            downs: 0,
            revives: 0,
            hordes: 0,
            explosions: 0,
            chests_opened: 0,
            peak_enemies: 0,
            anomalies: Vec::new(),
        }
    }

    #[test]
    fn default_match_id_contains_seed_and_timestamp() {
        assert_eq!(default_match_id(42, 123456789), "sim-42-123456789");
    }

    #[test]
    fn summary_averages_durations_and_counts_outcomes() {
        let summary = build_run_summary(
            "sim-42-1".to_string(),
            (1, 2),
            vec![
                make_scenario_result("timeout", 60_000),
                make_scenario_result("extracted", 90_000),
                make_scenario_result("extracted", 30_000),
            ],
            1,
        );
        assert_eq!(summary.average_duration_ms, 60_000);
        assert_eq!(summary.scenario_count, 3);
        assert_eq!(summary.outcome_counts.get("extracted"), Some(&2));
    }

    #[test]
    fn empty_run_has_zero_average() {
        let summary = build_run_summary("sim-0-0".to_string(), (0, 0), Vec::new(), 0);
        assert_eq!(summary.average_duration_ms, 0);
        assert!(summary.outcome_counts.is_empty());
    }

    #[test]
    fn write_summary_returns_error_when_parent_does_not_exist() {
        let target = std::env::temp_dir()
            .join(format!("horde-room-missing-{}", now_ms()))
            .join("summary.json");
        let summary = build_run_summary(
            "sim-1-1".to_string(),
            (1, 2),
            vec![make_scenario_result("timeout", 60_000)],
            0,
        );
        assert!(write_summary(&target, &summary).is_err());
    }

    #[test]
    fn push_anomaly_keeps_records_and_deduplicates_summary_messages() {
        let mut anomalies = Vec::new();
        let mut records = Vec::new();
        let mut seen = HashSet::new();
        push_anomaly(&mut anomalies, &mut records, &mut seen, 10, "same".to_string());
        push_anomaly(&mut anomalies, &mut records, &mut seen, 11, "same".to_string());
        assert_eq!(anomalies.len(), 1);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].tick, 11);
    }

    #[test]
    fn short_scenario_is_deterministic_and_clean() {
        let scenario = Scenario {
            name: "det".to_string(),
            bots: 2,
            minutes: 1,
            level: LevelType::Survival,
            seed: 77,
        };
        let a = run_scenario(&scenario);
        let b = run_scenario(&scenario);
        assert_eq!(a.finished_tick, b.finished_tick);
        assert_eq!(a.result.kills, b.result.kills);
        assert_eq!(a.result.peak_enemies, b.result.peak_enemies);
        assert!(a.result.anomalies.is_empty(), "{:?}", a.result.anomalies);
    }
}
