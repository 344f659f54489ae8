//! Network reconciliation layer: command sequencing and client-side prediction

pub mod prediction;
pub mod sequencer;

pub use prediction::{ClientPredictor, Correction};
pub use sequencer::{DrainResult, IngestError, InputSequencer, Rejection};

use crate::game::combat::Slot;
use crate::game::math::Vec2;
use crate::game::shop::ShopItem;
use crate::game::{PlayerId, Stance};

/// What a player asked to do
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Displacement the client moved since its previous command
    Move { delta: Vec2, stance: Stance, aim: f32 },
    Shoot { aim: f32 },
    Reload,
    /// Draw the weapon held in another slot
    Switch { slot: Slot },
    Buy { item: ShopItem },
    /// Plant or defuse, depending on team and position
    Use,
    Chat { text: String },
}

/// A sequenced command from one player
#[derive(Debug, Clone, PartialEq)]
pub struct InputCommand {
    pub player_id: PlayerId,
    /// Strictly increasing by one per player
    pub sequence: u64,
    /// Client clock in milliseconds
    pub timestamp: u64,
    pub action: Action,
}
