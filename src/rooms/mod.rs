//! Lobby-facing room management

pub mod lobby;
pub mod service;

pub use lobby::LobbyEvent;
pub use service::{Participant, RoomInfo, RoomService, ServiceError};
