//! Server and per-room configuration.

use clap::Parser;

use crate::constants::*;
use crate::error::ServerError;
use crate::types::LevelType;

#[derive(Clone, Debug, Parser)]
#[command(name = "horde-room-server", about = "Authoritative room server")]
pub struct ServerConfig {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    #[arg(long, env = "TICK_RATE", default_value_t = TICK_RATE)]
    pub tick_rate: u32,

    #[arg(long, env = "HIGH_BROADCAST_RATE", default_value_t = HIGH_BROADCAST_RATE)]
    pub high_broadcast_rate: u32,

    #[arg(long, env = "LOW_BROADCAST_RATE", default_value_t = LOW_BROADCAST_RATE)]
    pub low_broadcast_rate: u32,

    /// Frames between forced full-state resyncs.
    #[arg(long, env = "FULL_RESYNC_FRAMES", default_value_t = FULL_RESYNC_FRAMES)]
    pub full_resync_frames: u32,

    #[arg(long, env = "INTEREST_RADIUS", default_value_t = INTEREST_RADIUS)]
    pub interest_radius: f32,

    #[arg(long, env = "MAX_PLAYERS_PER_ROOM", default_value_t = MAX_PLAYERS_PER_ROOM)]
    pub max_players: usize,

    /// survival | trenches | boss
    #[arg(long, env = "LEVEL_TYPE", default_value = "survival")]
    pub level_type: String,

    /// Enables the debug horde command.
    #[arg(long, env = "DEBUG_COMMANDS", default_value_t = false)]
    pub debug_commands: bool,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn room_config(&self) -> Result<RoomConfig, ServerError> {
        let level_type = LevelType::parse(self.level_type.trim())
            .ok_or_else(|| ServerError::Config(format!("unknown level type '{}'", self.level_type)))?;
        if self.tick_rate == 0 || self.high_broadcast_rate == 0 || self.low_broadcast_rate == 0 {
            return Err(ServerError::Config("rates must be positive".to_string()));
        }
        if !self.interest_radius.is_finite() || self.interest_radius <= 0.0 {
            return Err(ServerError::Config("interest radius must be positive".to_string()));
        }
        Ok(RoomConfig {
            tick_rate: self.tick_rate.min(240),
            high_broadcast_rate: self.high_broadcast_rate.min(240),
            low_broadcast_rate: self.low_broadcast_rate.min(240),
            full_resync_frames: self.full_resync_frames.max(1),
            interest_radius: self.interest_radius,
            max_players: self.max_players.clamp(1, 64),
            level_type,
            debug_commands: self.debug_commands,
        })
    }
}

/// What one room needs, passed explicitly into `Room::new`.
#[derive(Clone, Debug, PartialEq)]
pub struct RoomConfig {
    pub tick_rate: u32,
    pub high_broadcast_rate: u32,
    pub low_broadcast_rate: u32,
    pub full_resync_frames: u32,
    pub interest_radius: f32,
    pub max_players: usize,
    pub level_type: LevelType,
    pub debug_commands: bool,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            tick_rate: TICK_RATE,
            high_broadcast_rate: HIGH_BROADCAST_RATE,
            low_broadcast_rate: LOW_BROADCAST_RATE,
            full_resync_frames: FULL_RESYNC_FRAMES,
            interest_radius: INTEREST_RADIUS,
            max_players: MAX_PLAYERS_PER_ROOM,
            level_type: LevelType::Survival,
            debug_commands: false,
        }
    }
}

impl RoomConfig {
    pub fn tick_ms(&self) -> u64 {
        interval_ms(self.tick_rate)
    }

    pub fn high_broadcast_ms(&self) -> u64 {
        interval_ms(self.high_broadcast_rate)
    }

    pub fn low_broadcast_ms(&self) -> u64 {
        interval_ms(self.low_broadcast_rate)
    }
}

fn interval_ms(rate: u32) -> u64 {
    (1000 / u64::from(rate.max(1))).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_into_room_config() {
        let config = ServerConfig::parse_from(["server"]);
        let room = config.room_config().expect("defaults are valid");
        assert_eq!(room, RoomConfig::default());
        assert_eq!(room.tick_ms(), TICK_MS);
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn flags_override_defaults() {
        let config = ServerConfig::parse_from([
            "server",
            "--port",
            "9000",
            "--level-type",
            "boss",
            "--low-broadcast-rate",
            "2",
            "--debug-commands",
        ]);
        let room = config.room_config().expect("valid");
        assert_eq!(config.port, 9000);
        assert_eq!(room.level_type, LevelType::Boss);
        assert_eq!(room.low_broadcast_ms(), 500);
        assert!(room.debug_commands);
    }

    #[test]
    fn bad_values_are_rejected() {
        let config = ServerConfig::parse_from(["server", "--level-type", "moon"]);
        assert!(matches!(config.room_config(), Err(ServerError::Config(_))));
        let config = ServerConfig::parse_from(["server", "--tick-rate", "0"]);
        assert!(config.room_config().is_err());
    }
}
