//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;

use crate::anticheat::AntiCheatConfig;
use crate::game::economy::EconomyRules;
use crate::game::physics::PhysicsConfig;
use crate::game::round::RoundRules;
use crate::util::time::DEFAULT_TICK_RATE;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS, comma separated
    pub client_origin: String,

    /// Secret used to sign reconnection tokens
    pub session_secret: String,

    /// Base URL of the match record / moderation store; records are only logged when unset
    pub storage_url: Option<String>,
    pub storage_api_key: Option<String>,

    /// Simulation tunables
    pub sim: SimConfig,
}

/// Per-room simulation parameters
#[derive(Clone, Debug)]
pub struct SimConfig {
    pub tick_rate: u32,
    pub max_players_per_room: usize,
    pub reconnect_grace_secs: f32,
    /// A room nobody joins within this window is torn down
    pub empty_room_timeout_secs: f32,
    /// Emit a snapshot every N ticks
    pub snapshot_interval: u32,
    /// Prediction error (world units) above which clients snap to authority
    pub correction_threshold: f32,
    /// Per-player sequencer queue bound
    pub max_pending_commands: usize,
    /// Room input channel bound
    pub input_channel_capacity: usize,
    pub physics: PhysicsConfig,
    pub rules: RoundRules,
    pub economy: EconomyRules,
    pub anticheat: AntiCheatConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            max_players_per_room: 10,
            reconnect_grace_secs: 30.0,
            empty_room_timeout_secs: 120.0,
            snapshot_interval: 1,
            correction_threshold: 5.0,
            max_pending_commands: 32,
            input_channel_capacity: 256,
            physics: PhysicsConfig::default(),
            rules: RoundRules::default(),
            economy: EconomyRules::default(),
            anticheat: AntiCheatConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        let mut sim = SimConfig::default();
        if let Some(rate) = parse_var(&lookup, "TICK_RATE")? {
            if rate == 0 {
                return Err(ConfigError::Invalid {
                    var: "TICK_RATE",
                    value: "0".to_string(),
                });
            }
            sim.tick_rate = rate;
        }
        if let Some(max) = parse_var(&lookup, "MAX_PLAYERS_PER_ROOM")? {
            sim.max_players_per_room = max;
        }
        if let Some(grace) = parse_var(&lookup, "RECONNECT_GRACE_SECS")? {
            sim.reconnect_grace_secs = grace;
        }
        if let Some(window) = parse_var(&lookup, "ANTICHEAT_WINDOW_SECS")? {
            sim.anticheat.window_secs = window;
        }
        if let Some(confidence) = parse_var(&lookup, "ANTICHEAT_AUTO_TERMINATE_CONFIDENCE")? {
            sim.anticheat.auto_terminate_confidence = confidence;
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            client_origin: lookup("CLIENT_ORIGIN")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),

            session_secret: lookup("SESSION_SECRET")
                .filter(|s| !s.is_empty())
                .ok_or(ConfigError::Missing("SESSION_SECRET"))?,

            storage_url: lookup("STORAGE_URL").filter(|s| !s.is_empty()),
            storage_api_key: lookup("STORAGE_API_KEY").filter(|s| !s.is_empty()),

            sim,
        })
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Invalid value {value:?} for {var}")]
    Invalid { var: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_the_secret_is_set() {
        let config = load(&[("SESSION_SECRET", "s3cret")]).unwrap();
        assert_eq!(config.server_addr.port(), 8080);
        assert_eq!(config.log_level, "info");
        assert!(config.storage_url.is_none());
        assert_eq!(config.sim.tick_rate, 64);
        assert_eq!(config.sim.anticheat.auto_terminate_confidence, 0.95);
    }

    #[test]
    fn port_takes_precedence_over_server_addr() {
        let config = load(&[
            ("SESSION_SECRET", "s"),
            ("PORT", "9000"),
            ("SERVER_ADDR", "127.0.0.1:7000"),
        ])
        .unwrap();
        assert_eq!(config.server_addr.port(), 9000);
    }

    #[test]
    fn missing_secret_is_an_error() {
        assert!(matches!(load(&[]), Err(ConfigError::Missing("SESSION_SECRET"))));
    }

    #[test]
    fn simulation_overrides_are_parsed() {
        let config = load(&[
            ("SESSION_SECRET", "s"),
            ("TICK_RATE", "30"),
            ("MAX_PLAYERS_PER_ROOM", "4"),
            ("ANTICHEAT_WINDOW_SECS", "60"),
        ])
        .unwrap();
        assert_eq!(config.sim.tick_rate, 30);
        assert_eq!(config.sim.max_players_per_room, 4);
        assert_eq!(config.sim.anticheat.window_secs, 60.0);
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = load(&[("SESSION_SECRET", "s"), ("TICK_RATE", "fast")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "TICK_RATE", .. }));
        assert!(matches!(
            load(&[("SESSION_SECRET", "s"), ("TICK_RATE", "0")]),
            Err(ConfigError::Invalid { var: "TICK_RATE", .. })
        ));
    }
}
