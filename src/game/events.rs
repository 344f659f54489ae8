//! Per-tick match event queue

use serde::Serialize;

use super::combat::WeaponKind;
use super::math::Vec2;
use super::round::RoundEndReason;
use super::shop::ShopItem;
use super::{PlayerId, Team};

/// Something observable that happened during a tick
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum MatchEvent {
    PlayerJoined {
        player_id: PlayerId,
        name: String,
        team: Team,
    },
    PlayerLeft {
        player_id: PlayerId,
    },
    PlayerDisconnected {
        player_id: PlayerId,
    },
    PlayerReconnected {
        player_id: PlayerId,
    },
    ShotFired {
        shooter_id: PlayerId,
        weapon: WeaponKind,
        origin: Vec2,
        direction: Vec2,
    },
    Hit {
        attacker_id: PlayerId,
        victim_id: PlayerId,
        damage: f32,
        headshot: bool,
    },
    Kill {
        killer_id: Option<PlayerId>,
        victim_id: PlayerId,
        weapon: Option<WeaponKind>,
        headshot: bool,
        assister_ids: Vec<PlayerId>,
    },
    Reloaded {
        player_id: PlayerId,
    },
    ItemPurchased {
        player_id: PlayerId,
        item: ShopItem,
        price: u32,
    },
    GrenadeThrown {
        player_id: PlayerId,
        origin: Vec2,
        direction: Vec2,
    },
    GrenadeExploded {
        owner_id: PlayerId,
        position: Vec2,
    },
    ObjectDestroyed {
        object_id: String,
    },
    TileDestroyed {
        x: usize,
        y: usize,
    },
    BombPlanted {
        player_id: PlayerId,
        site: String,
    },
    DefuseStarted {
        player_id: PlayerId,
    },
    DefuseCancelled {
        player_id: PlayerId,
    },
    BombExploded {
        position: Vec2,
    },
    RoundStarted {
        round: u32,
    },
    RoundEnded {
        round: u32,
        winner: Option<Team>,
        reason: RoundEndReason,
    },
    MatchOver {
        winner: Option<Team>,
    },
    MapLoaded {
        name: String,
    },
    Chat {
        player_id: PlayerId,
        text: String,
    },
}

/// Events accumulated during a tick, drained once by the room pipeline
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    events: Vec<MatchEvent>,
}

impl EventQueue {
    pub fn push(&mut self, event: MatchEvent) {
        self.events.push(event);
    }

    pub fn drain(&mut self) -> Vec<MatchEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MatchEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
