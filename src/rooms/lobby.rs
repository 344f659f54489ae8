//! Lifecycle events published to the lobby collaborator

use serde::Serialize;
use uuid::Uuid;

use crate::game::{PlayerId, Team};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all_fields = "camelCase")]
pub enum LobbyEvent {
    #[serde(rename = "room:created")]
    RoomCreated { room_id: Uuid, name: String, max_players: usize },

    #[serde(rename = "room:joined")]
    RoomJoined { room_id: Uuid, player_id: PlayerId, name: String, team: Team },

    #[serde(rename = "room:left")]
    RoomLeft { room_id: Uuid, player_id: PlayerId },

    #[serde(rename = "game:started")]
    GameStarted { room_id: Uuid },

    #[serde(rename = "game:ended")]
    GameEnded { room_id: Uuid, reason: String, winner: Option<Team> },
}

impl LobbyEvent {
    /// SSE event name
    pub fn name(&self) -> &'static str {
        match self {
            LobbyEvent::RoomCreated { .. } => "room:created",
            LobbyEvent::RoomJoined { .. } => "room:joined",
            LobbyEvent::RoomLeft { .. } => "room:left",
            LobbyEvent::GameStarted { .. } => "game:started",
            LobbyEvent::GameEnded { .. } => "game:ended",
        }
    }

    pub fn room_id(&self) -> Uuid {
        match self {
            LobbyEvent::RoomCreated { room_id, .. }
            | LobbyEvent::RoomJoined { room_id, .. }
            | LobbyEvent::RoomLeft { room_id, .. }
            | LobbyEvent::GameStarted { room_id }
            | LobbyEvent::GameEnded { room_id, .. } => *room_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged_with_their_lobby_name() {
        let event = LobbyEvent::GameEnded {
            room_id: Uuid::nil(),
            reason: "match over".into(),
            winner: Some(Team::T),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], event.name());
        assert_eq!(json["roomId"], Uuid::nil().to_string());
        assert_eq!(json["winner"], "t");
    }
}
