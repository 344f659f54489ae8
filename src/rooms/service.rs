//! Room service - creates rooms, seats participants and issues session tokens

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::SimConfig;
use crate::game::combat::WeaponKind;
use crate::game::map::MapData;
use crate::game::{GameMatch, MatchError, MatchHandle, MatchRegistry, PlayerId, Room, RoomInput, Team};
use crate::session::{SessionClaims, SessionError, SessionSigner};
use crate::store::RecordSender;

use super::LobbyEvent;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Room not found: {0}")]
    RoomNotFound(Uuid),

    #[error("Room {0} is shutting down")]
    RoomClosed(Uuid),

    #[error(transparent)]
    Match(#[from] MatchError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Lobby-side bookkeeping for a room
#[derive(Debug, Clone)]
struct RoomMeta {
    name: String,
    map: String,
    max_players: usize,
    started: bool,
    created_at: DateTime<Utc>,
}

/// Room listing entry
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub id: Uuid,
    pub name: String,
    pub map: String,
    pub players: usize,
    pub max_players: usize,
    pub started: bool,
    pub created_at: DateTime<Utc>,
}

/// A seated participant and the token it reconnects with
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub room_id: Uuid,
    pub player_id: PlayerId,
    pub team: Team,
    pub token: String,
}

pub struct RoomService {
    sim: SimConfig,
    signer: SessionSigner,
    registry: Arc<MatchRegistry>,
    rooms: Arc<RwLock<HashMap<Uuid, RoomMeta>>>,
    lobby_tx: broadcast::Sender<LobbyEvent>,
    records: Option<RecordSender>,
}

impl RoomService {
    pub fn new(
        sim: SimConfig,
        signer: SessionSigner,
        registry: Arc<MatchRegistry>,
        records: Option<RecordSender>,
    ) -> Self {
        let (lobby_tx, _) = broadcast::channel(256);
        Self {
            sim,
            signer,
            registry,
            rooms: Arc::new(RwLock::new(HashMap::new())),
            lobby_tx,
            records,
        }
    }

    pub fn registry(&self) -> &Arc<MatchRegistry> {
        &self.registry
    }

    pub fn subscribe_lobby(&self) -> broadcast::Receiver<LobbyEvent> {
        self.lobby_tx.subscribe()
    }

    /// Spawn a room task and register its handle
    pub fn create_room(
        &self,
        name: Option<String>,
        map: Option<MapData>,
        seed: Option<u64>,
    ) -> Result<RoomInfo, ServiceError> {
        let room_id = Uuid::new_v4();
        let seed = seed.unwrap_or_else(rand::random);
        let map = map.unwrap_or_else(MapData::dust);
        let map_name = map.name.clone();

        let room = Room::new(room_id, seed, &self.sim, map)?;
        let (mut game_match, handle) =
            GameMatch::new(room, self.sim.tick_rate, self.sim.input_channel_capacity);
        game_match = game_match.with_lobby(self.lobby_tx.clone());
        if let Some(records) = &self.records {
            game_match = game_match.with_records(records.clone());
        }

        let meta = RoomMeta {
            name: name.unwrap_or_else(|| format!("room-{}", &room_id.simple().to_string()[..8])),
            map: map_name,
            max_players: self.sim.max_players_per_room,
            started: false,
            created_at: Utc::now(),
        };
        let info = room_info(room_id, &meta, 0);

        self.rooms.write().insert(room_id, meta);
        self.registry.insert(handle);

        let registry = self.registry.clone();
        let rooms = self.rooms.clone();
        tokio::spawn(async move {
            game_match.run(registry).await;
            rooms.write().remove(&room_id);
        });

        info!(room_id = %room_id, seed, map = %info.map, "Created room");
        self.notify(LobbyEvent::RoomCreated {
            room_id,
            name: info.name.clone(),
            max_players: info.max_players,
        });

        Ok(info)
    }

    /// Seat a participant and issue its session token
    pub async fn add_participant(
        &self,
        room_id: Uuid,
        name: String,
        team: Option<Team>,
        weapon: Option<WeaponKind>,
    ) -> Result<Participant, ServiceError> {
        let handle = self.handle(room_id)?;
        let player_id = Uuid::new_v4();

        let (reply, rx) = oneshot::channel();
        send(&handle, RoomInput::AddParticipant {
            player_id,
            name: name.clone(),
            team,
            weapon,
            reply,
        })
        .await?;
        let team = rx.await.map_err(|_| ServiceError::RoomClosed(room_id))??;

        let token = self.signer.issue(room_id, player_id)?;
        info!(room_id = %room_id, player_id = %player_id, team = ?team, "Participant joined");
        self.notify(LobbyEvent::RoomJoined {
            room_id,
            player_id,
            name,
            team,
        });

        Ok(Participant {
            room_id,
            player_id,
            team,
            token,
        })
    }

    pub async fn start_match(&self, room_id: Uuid) -> Result<(), ServiceError> {
        let handle = self.handle(room_id)?;

        let (reply, rx) = oneshot::channel();
        send(&handle, RoomInput::Start { reply }).await?;
        rx.await.map_err(|_| ServiceError::RoomClosed(room_id))??;

        if let Some(meta) = self.rooms.write().get_mut(&room_id) {
            meta.started = true;
        }
        self.notify(LobbyEvent::GameStarted { room_id });
        Ok(())
    }

    /// Replace a room's map before its match starts
    pub async fn load_map(&self, room_id: Uuid, map: MapData) -> Result<String, ServiceError> {
        let handle = self.handle(room_id)?;
        let name = map.name.clone();

        let (reply, rx) = oneshot::channel();
        send(&handle, RoomInput::LoadMap { map: Box::new(map), reply }).await?;
        rx.await.map_err(|_| ServiceError::RoomClosed(room_id))??;

        if let Some(meta) = self.rooms.write().get_mut(&room_id) {
            meta.map = name.clone();
        }
        info!(room_id = %room_id, map = %name, "Room map replaced");
        Ok(name)
    }

    /// Rooms still running, oldest first
    pub fn list_rooms(&self) -> Vec<RoomInfo> {
        let rooms = self.rooms.read();
        let mut list: Vec<RoomInfo> = rooms
            .iter()
            .filter_map(|(id, meta)| {
                let handle = self.registry.get(id)?;
                Some(room_info(*id, meta, handle.player_count()))
            })
            .collect();
        list.sort_by_key(|r| r.created_at);
        list
    }

    /// Resolve a session token to the room it belongs to
    pub fn authorize(&self, token: &str) -> Result<(MatchHandle, SessionClaims), ServiceError> {
        let claims = self.signer.verify(token)?;
        let handle = self.handle(claims.room_id)?;
        Ok((handle, claims))
    }

    fn handle(&self, room_id: Uuid) -> Result<MatchHandle, ServiceError> {
        self.registry
            .get(&room_id)
            .ok_or(ServiceError::RoomNotFound(room_id))
    }

    fn notify(&self, event: LobbyEvent) {
        // no lobby listeners is fine
        let _ = self.lobby_tx.send(event);
    }
}

async fn send(handle: &MatchHandle, input: RoomInput) -> Result<(), ServiceError> {
    handle.input_tx.send(input).await.map_err(|_| {
        warn!(room_id = %handle.id, "Room input channel closed");
        ServiceError::RoomClosed(handle.id)
    })
}

fn room_info(id: Uuid, meta: &RoomMeta, players: usize) -> RoomInfo {
    RoomInfo {
        id,
        name: meta.name.clone(),
        map: meta.map.clone(),
        players,
        max_players: meta.max_players,
        started: meta.started,
        created_at: meta.created_at,
    }
}
