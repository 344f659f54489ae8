//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::combat::{Slot, WeaponKind};
use crate::game::events::MatchEvent;
use crate::game::math::Vec2;
use crate::game::projectile::ProjectileId;
use crate::game::round::{RoundPhase, Score};
use crate::game::shop::ShopItem;
use crate::game::{PlayerId, Stance, Team};
use crate::netcode::{Action, InputCommand};
use crate::store::MatchSummary;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovePayload {
    /// Displacement since the previous move command
    pub delta: Vec2,
    #[serde(default)]
    pub stance: Stance,
    /// Facing in radians
    #[serde(default)]
    pub aim: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShootPayload {
    pub aim: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchPayload {
    pub slot: Slot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyPayload {
    /// Buy menu id, e.g. `"ak47"` or `"kevlar_helmet"`
    pub item: ShopItem,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub text: String,
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    Move {
        sequence: u64,
        timestamp: u64,
        payload: MovePayload,
    },

    Shoot {
        sequence: u64,
        timestamp: u64,
        payload: ShootPayload,
    },

    Reload {
        sequence: u64,
        timestamp: u64,
    },

    Switch {
        sequence: u64,
        timestamp: u64,
        payload: SwitchPayload,
    },

    Buy {
        sequence: u64,
        timestamp: u64,
        payload: BuyPayload,
    },

    /// Plant or defuse
    Use {
        sequence: u64,
        timestamp: u64,
    },

    Chat {
        sequence: u64,
        timestamp: u64,
        payload: ChatPayload,
    },

    /// Ping for latency measurement (not sequenced)
    Ping {
        /// Client timestamp
        t: u64,
    },
}

impl ClientMsg {
    /// Sequenced command for the room, or `None` for control messages
    pub fn into_command(self, player_id: PlayerId) -> Option<InputCommand> {
        let (sequence, timestamp, action) = match self {
            ClientMsg::Move {
                sequence,
                timestamp,
                payload,
            } => (
                sequence,
                timestamp,
                Action::Move {
                    delta: payload.delta,
                    stance: payload.stance,
                    aim: payload.aim,
                },
            ),
            ClientMsg::Shoot {
                sequence,
                timestamp,
                payload,
            } => (sequence, timestamp, Action::Shoot { aim: payload.aim }),
            ClientMsg::Reload {
                sequence,
                timestamp,
            } => (sequence, timestamp, Action::Reload),
            ClientMsg::Switch {
                sequence,
                timestamp,
                payload,
            } => (sequence, timestamp, Action::Switch { slot: payload.slot }),
            ClientMsg::Buy {
                sequence,
                timestamp,
                payload,
            } => (sequence, timestamp, Action::Buy { item: payload.item }),
            ClientMsg::Use {
                sequence,
                timestamp,
            } => (sequence, timestamp, Action::Use),
            ClientMsg::Chat {
                sequence,
                timestamp,
                payload,
            } => (sequence, timestamp, Action::Chat { text: payload.text }),
            ClientMsg::Ping { .. } => return None,
        };
        Some(InputCommand {
            player_id,
            sequence,
            timestamp,
            action,
        })
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMsg {
    /// Sent once a connection is attached to its player
    Welcome {
        player_id: PlayerId,
        room_id: Uuid,
        server_time: u64,
        tick_rate: u32,
        /// Last command the server accepted; the next one must be this + 1
        ack_sequence: u64,
        correction_threshold: f32,
    },

    /// Authoritative state (sent every snapshot interval)
    State(StateSnapshot),

    Chat {
        player_id: PlayerId,
        name: String,
        text: String,
    },

    /// Anti-cheat warning
    Warning {
        message: String,
        violations: usize,
    },

    /// A sequence gap was detected; resend starting from `expected_sequence`
    Resync {
        expected_sequence: u64,
    },

    /// The session was ended by the server
    Kicked {
        reason: String,
    },

    /// The room hit a fatal error; clients should rejoin through the lobby
    RoomAborted {
        reason: String,
    },

    MatchEnd {
        summary: MatchSummary,
    },

    Error {
        code: String,
        message: String,
    },

    Pong {
        /// Echo back client timestamp
        t: u64,
        server_time: u64,
    },
}

impl ServerMsg {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMsg::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub tick: u64,
    pub players: Vec<PlayerSnapshot>,
    pub projectiles: Vec<ProjectileSnapshot>,
    pub grenades: Vec<GrenadeSnapshot>,
    pub score: Score,
    pub round: u32,
    pub round_phase: RoundPhase,
    /// Seconds left in the phase, or on the bomb once planted
    pub round_timer: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bomb_state: Option<BombState>,
    pub events: Vec<MatchEvent>,
}

/// Player state in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub id: PlayerId,
    pub name: String,
    pub team: Team,
    pub position: Vec2,
    pub velocity: Vec2,
    pub aim: f32,
    pub health: f32,
    pub armor: f32,
    pub alive: bool,
    pub money: u32,
    /// Drawn weapon
    pub weapon: WeaponKind,
    pub ammo: u32,
    /// Everything carried, in slot order
    pub weapons: Vec<WeaponKind>,
    pub connected: bool,
    /// Last input sequence the server processed for this player
    pub ack_sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectileSnapshot {
    pub id: ProjectileId,
    pub owner: PlayerId,
    pub position: Vec2,
    pub direction: Vec2,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrenadeSnapshot {
    pub owner: PlayerId,
    pub position: Vec2,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BombState {
    pub site: String,
    pub position: Vec2,
    pub defusing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_message_parses_into_a_command() {
        let json = r#"{"type":"move","sequence":7,"timestamp":1200,
            "payload":{"delta":{"x":2.0,"y":-1.0},"stance":"walking","aim":1.5}}"#;
        let msg: ClientMsg = serde_json::from_str(json).unwrap();
        let player = Uuid::new_v4();
        let command = msg.into_command(player).unwrap();

        assert_eq!(command.sequence, 7);
        assert_eq!(command.timestamp, 1200);
        assert_eq!(
            command.action,
            Action::Move {
                delta: Vec2::new(2.0, -1.0),
                stance: Stance::Walking,
                aim: 1.5
            }
        );
    }

    #[test]
    fn reload_needs_no_payload_and_ping_is_not_a_command() {
        let reload: ClientMsg =
            serde_json::from_str(r#"{"type":"reload","sequence":1,"timestamp":5}"#).unwrap();
        assert_eq!(reload.into_command(Uuid::nil()).unwrap().action, Action::Reload);

        let ping: ClientMsg = serde_json::from_str(r#"{"type":"ping","t":99}"#).unwrap();
        assert!(ping.into_command(Uuid::nil()).is_none());
    }

    #[test]
    fn unknown_types_are_rejected() {
        assert!(serde_json::from_str::<ClientMsg>(r#"{"type":"noclip"}"#).is_err());
    }

    #[test]
    fn server_messages_use_camel_case_fields() {
        let json = serde_json::to_value(ServerMsg::Resync { expected_sequence: 12 }).unwrap();
        assert_eq!(json["type"], "resync");
        assert_eq!(json["expectedSequence"], 12);

        let json = serde_json::to_value(ServerMsg::RoomAborted { reason: "map".into() }).unwrap();
        assert_eq!(json["type"], "room_aborted");
    }

    #[test]
    fn state_snapshot_carries_ack_sequence() {
        let snapshot = StateSnapshot {
            tick: 3,
            players: vec![PlayerSnapshot {
                id: Uuid::nil(),
                name: "p".into(),
                team: Team::T,
                position: Vec2::new(1.0, 2.0),
                velocity: Vec2::ZERO,
                aim: 0.0,
                health: 100.0,
                armor: 0.0,
                alive: true,
                money: 800,
                weapon: WeaponKind::Glock,
                ammo: 20,
                weapons: vec![WeaponKind::Glock, WeaponKind::Knife],
                connected: true,
                ack_sequence: 9,
            }],
            projectiles: Vec::new(),
            grenades: Vec::new(),
            score: Score::default(),
            round: 1,
            round_phase: RoundPhase::FreezeTime,
            round_timer: 15.0,
            bomb_state: None,
            events: Vec::new(),
        };
        let json = serde_json::to_value(ServerMsg::State(snapshot)).unwrap();

        assert_eq!(json["type"], "state");
        assert_eq!(json["roundPhase"], "freeze_time");
        assert_eq!(json["players"][0]["ackSequence"], 9);
        assert!(json.get("bombState").is_none());
        assert_eq!(json["players"][0]["weapons"][1], "knife");
    }

    #[test]
    fn buy_accepts_weapons_and_equipment_by_menu_id() {
        use crate::game::shop::Equipment;

        let rifle: ClientMsg = serde_json::from_str(
            r#"{"type":"buy","sequence":2,"timestamp":40,"payload":{"item":"ak47"}}"#,
        )
        .unwrap();
        assert_eq!(
            rifle.into_command(Uuid::nil()).unwrap().action,
            Action::Buy { item: ShopItem::Weapon(WeaponKind::Ak47) }
        );

        let armor: ClientMsg = serde_json::from_str(
            r#"{"type":"buy","sequence":3,"timestamp":56,"payload":{"item":"kevlar_helmet"}}"#,
        )
        .unwrap();
        assert_eq!(
            armor.into_command(Uuid::nil()).unwrap().action,
            Action::Buy { item: ShopItem::Equipment(Equipment::KevlarHelmet) }
        );

        assert!(serde_json::from_str::<ClientMsg>(
            r#"{"type":"buy","sequence":4,"timestamp":70,"payload":{"item":"jetpack"}}"#
        )
        .is_err());
    }

    #[test]
    fn switch_names_a_slot() {
        let msg: ClientMsg = serde_json::from_str(
            r#"{"type":"switch","sequence":5,"timestamp":80,"payload":{"slot":"secondary"}}"#,
        )
        .unwrap();
        assert_eq!(
            msg.into_command(Uuid::nil()).unwrap().action,
            Action::Switch { slot: Slot::Secondary }
        );
    }
}
