//! Game simulation modules

pub mod combat;
pub mod economy;
pub mod events;
pub mod grenade;
pub mod map;
pub mod r#match;
pub mod math;
pub mod path;
pub mod physics;
pub mod projectile;
pub mod room;
pub mod round;
pub mod shop;
pub mod snapshot;
pub mod spatial;
pub mod state;

pub use r#match::{GameMatch, MatchHandle, MatchRegistry, RoomInput};
pub use room::{Outbound, Room, Target};
pub use state::{MatchError, MatchState, Player};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Player identifier, stable across reconnects
pub type PlayerId = Uuid;

/// Collision radius of a player body in pixels
pub const PLAYER_RADIUS: f32 = 16.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    Ct,
    T,
}

impl Team {
    pub fn opponent(self) -> Team {
        match self {
            Team::Ct => Team::T,
            Team::T => Team::Ct,
        }
    }
}

/// Movement posture, scales the allowed speed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    #[default]
    Running,
    Walking,
    Ducking,
}

impl Stance {
    pub fn speed_multiplier(self) -> f32 {
        match self {
            Stance::Running => 1.0,
            Stance::Walking => 0.5,
            Stance::Ducking => 0.25,
        }
    }
}
