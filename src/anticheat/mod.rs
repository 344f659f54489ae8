//! Anti-cheat - input plausibility checks and violation escalation

pub mod validator;

pub use validator::{AntiCheat, CommandCheck};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::game::PlayerId;

/// Detection thresholds and escalation policy
#[derive(Debug, Clone, Copy)]
pub struct AntiCheatConfig {
    /// Rolling window violations are counted over
    pub window_secs: f32,
    pub warn_after: usize,
    pub throttle_after: usize,
    pub terminate_after: usize,
    /// How long a throttled player is limited to one command per tick
    pub throttle_secs: f32,
    /// A single violation at or above this confidence ends the session
    pub auto_terminate_confidence: f32,
    /// Allowed overshoot of the nominal movement speed
    pub speed_tolerance: f32,
    /// Single-command displacement treated as a teleport
    pub teleport_distance: f32,
    /// Longest stretch of unused movement a player may catch up on at once
    pub movement_burst_secs: f32,
    /// How far a client clock may run ahead of server time
    pub max_clock_lead_ms: u64,
    /// Fraction of the weapon's shot interval that must elapse between shots
    pub fire_rate_tolerance: f32,
    /// Running speed in world units per second
    pub base_speed: f32,
    pub headshot_min_samples: usize,
    pub headshot_max_count: usize,
    pub headshot_max_rate: f32,
    /// Number of recent hits considered for the headshot rate
    pub headshot_sample_window: usize,
    /// Fastest plausible turn into a shot, degrees per second
    pub max_aim_speed_deg: f32,
    /// A turn wider than this inside `aim_snap_window_ms` is a snap
    pub aim_snap_deg: f32,
    pub aim_snap_window_ms: f32,
}

impl Default for AntiCheatConfig {
    fn default() -> Self {
        Self {
            window_secs: 30.0,
            warn_after: 3,
            throttle_after: 5,
            terminate_after: 8,
            throttle_secs: 10.0,
            auto_terminate_confidence: 0.95,
            speed_tolerance: 1.1,
            teleport_distance: 100.0,
            movement_burst_secs: 0.5,
            max_clock_lead_ms: 1000,
            fire_rate_tolerance: 0.8,
            base_speed: 200.0,
            headshot_min_samples: 10,
            headshot_max_count: 8,
            headshot_max_rate: 0.8,
            headshot_sample_window: 20,
            max_aim_speed_deg: 1800.0,
            aim_snap_deg: 90.0,
            aim_snap_window_ms: 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    SpeedHack,
    Teleport,
    RapidFire,
    ShootingWhileDead,
    ImpossibleHeadshotRate,
    ImpossibleAimSpeed,
    AimSnap,
    /// Client timestamps running ahead of the server clock
    ClockDrift,
}

impl ViolationKind {
    /// Confidence attached to a detection of this kind
    pub fn confidence(self) -> f32 {
        match self {
            ViolationKind::SpeedHack => 0.7,
            ViolationKind::Teleport => 0.95,
            ViolationKind::RapidFire => 0.8,
            ViolationKind::ShootingWhileDead => 0.9,
            ViolationKind::ImpossibleHeadshotRate => 0.85,
            ViolationKind::ImpossibleAimSpeed => 0.6,
            ViolationKind::AimSnap => 0.7,
            ViolationKind::ClockDrift => 0.5,
        }
    }
}

/// Record handed to the moderation sink
#[derive(Debug, Clone, Serialize)]
pub struct ViolationRecord {
    pub user_id: PlayerId,
    pub match_id: Uuid,
    pub kind: ViolationKind,
    pub confidence: f32,
    pub detail: serde_json::Value,
    pub tick: u64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sanction {
    Warn,
    /// One command per tick until `until_tick`
    Throttle { until_tick: u64 },
    Terminate,
}

#[derive(Debug, Clone)]
pub struct Verdict {
    pub record: ViolationRecord,
    pub sanction: Option<Sanction>,
}
