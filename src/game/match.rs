//! Async room runner and the registry of live rooms

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::rooms::LobbyEvent;
use crate::store::RecordSender;
use crate::util::time::{tick_duration, Timer};
use crate::ws::protocol::ClientMsg;

use super::combat::WeaponKind;
use super::map::MapData;
use super::room::{Outbound, Room, TickOutput};
use super::state::MatchError;
use super::{PlayerId, Team};

/// Requests delivered to a room task
#[derive(Debug)]
pub enum RoomInput {
    AddParticipant {
        player_id: PlayerId,
        name: String,
        team: Option<Team>,
        weapon: Option<WeaponKind>,
        reply: oneshot::Sender<Result<Team, MatchError>>,
    },
    Start {
        reply: oneshot::Sender<Result<(), MatchError>>,
    },
    /// Swap the map before the match starts
    LoadMap {
        map: Box<MapData>,
        reply: oneshot::Sender<Result<(), MatchError>>,
    },
    Connect {
        player_id: PlayerId,
        connection_id: Uuid,
        reply: oneshot::Sender<Result<(), MatchError>>,
    },
    Client {
        player_id: PlayerId,
        connection_id: Uuid,
        msg: ClientMsg,
    },
    Disconnect {
        player_id: PlayerId,
        connection_id: Uuid,
    },
}

/// Handle to communicate with a running room
#[derive(Clone)]
pub struct MatchHandle {
    pub id: Uuid,
    pub input_tx: mpsc::Sender<RoomInput>,
    pub outbound_tx: broadcast::Sender<Outbound>,
    pub player_count: Arc<AtomicUsize>,
}

impl MatchHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.outbound_tx.subscribe()
    }
}

/// Registry of all active rooms
pub struct MatchRegistry {
    matches: DashMap<Uuid, MatchHandle>,
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self {
            matches: DashMap::new(),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.get(id).map(|m| m.value().clone())
    }

    pub fn insert(&self, handle: MatchHandle) {
        self.matches.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.remove(id).map(|(_, h)| h)
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn total_players(&self) -> usize {
        self.matches
            .iter()
            .map(|m| m.value().player_count())
            .sum()
    }
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns one [`Room`] and drives it at the fixed tick rate
pub struct GameMatch {
    room: Room,
    tick_rate: u32,
    input_rx: mpsc::Receiver<RoomInput>,
    outbound_tx: broadcast::Sender<Outbound>,
    player_count: Arc<AtomicUsize>,
    lobby_tx: Option<broadcast::Sender<LobbyEvent>>,
    records: Option<RecordSender>,
}

impl GameMatch {
    pub fn new(room: Room, tick_rate: u32, input_capacity: usize) -> (Self, MatchHandle) {
        let (input_tx, input_rx) = mpsc::channel(input_capacity.max(1));
        let (outbound_tx, _) = broadcast::channel(256);
        let player_count = Arc::new(AtomicUsize::new(room.player_count()));

        let handle = MatchHandle {
            id: room.id(),
            input_tx,
            outbound_tx: outbound_tx.clone(),
            player_count: player_count.clone(),
        };

        let game_match = Self {
            room,
            tick_rate,
            input_rx,
            outbound_tx,
            player_count,
            lobby_tx: None,
            records: None,
        };

        (game_match, handle)
    }

    /// Publish lifecycle events to the lobby
    pub fn with_lobby(mut self, lobby_tx: broadcast::Sender<LobbyEvent>) -> Self {
        self.lobby_tx = Some(lobby_tx);
        self
    }

    /// Hand summaries and violations to the record sink
    pub fn with_records(mut self, records: RecordSender) -> Self {
        self.records = Some(records);
        self
    }

    /// Run the authoritative tick loop until the room is torn down
    pub async fn run(mut self, registry: Arc<MatchRegistry>) {
        let room_id = self.room.id();
        info!(room_id = %room_id, tick_rate = self.tick_rate, "Room started");

        let budget = tick_duration(self.tick_rate);
        let mut tick_interval = interval(budget);
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let reason = loop {
            tick_interval.tick().await;
            let timer = Timer::new();

            // Drain input queue
            if !self.process_inputs() {
                break "room handle dropped".to_string();
            }

            let output = self.room.tick();
            self.player_count
                .store(self.room.player_count(), Ordering::Relaxed);
            let teardown = self.publish(output);

            let elapsed = timer.elapsed_micros();
            if elapsed > budget.as_micros() as u64 {
                warn!(room_id = %room_id, elapsed_us = elapsed, "Tick overran its budget");
            }

            if let Some(reason) = teardown {
                break reason;
            }
        };

        registry.remove(&room_id);
        self.notify(LobbyEvent::GameEnded {
            room_id,
            reason: reason.clone(),
            winner: self.room.state().clock().winner(),
        });
        info!(room_id = %room_id, reason, "Room closed");
    }

    /// Returns false once every handle is gone and the channel is closed
    fn process_inputs(&mut self) -> bool {
        loop {
            match self.input_rx.try_recv() {
                Ok(input) => self.handle_input(input),
                Err(mpsc::error::TryRecvError::Empty) => return true,
                Err(mpsc::error::TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn handle_input(&mut self, input: RoomInput) {
        match input {
            RoomInput::AddParticipant {
                player_id,
                name,
                team,
                weapon,
                reply,
            } => {
                let result = self.room.add_participant(player_id, name, team, weapon);
                self.player_count
                    .store(self.room.player_count(), Ordering::Relaxed);
                let _ = reply.send(result);
            }
            RoomInput::Start { reply } => {
                let _ = reply.send(self.room.start());
            }
            RoomInput::LoadMap { map, reply } => {
                let _ = reply.send(self.room.load_map(*map));
            }
            RoomInput::Connect {
                player_id,
                connection_id,
                reply,
            } => {
                let result = self.room.connect(player_id, connection_id).map(|out| {
                    for msg in out {
                        let _ = self.outbound_tx.send(msg);
                    }
                });
                let _ = reply.send(result);
            }
            RoomInput::Client {
                player_id,
                connection_id,
                msg,
            } => {
                for out in self.room.ingest(player_id, connection_id, msg) {
                    let _ = self.outbound_tx.send(out);
                }
            }
            RoomInput::Disconnect {
                player_id,
                connection_id,
            } => self.room.disconnect(player_id, connection_id),
        }
    }

    fn publish(&mut self, output: TickOutput) -> Option<String> {
        let room_id = self.room.id();
        for msg in output.outbound {
            // no receivers is fine between connections
            let _ = self.outbound_tx.send(msg);
        }

        if let Some(records) = &self.records {
            for record in output.records {
                if let Err(e) = records.send(record) {
                    warn!(room_id = %room_id, error = %e, "Failed to queue record");
                }
            }
        }

        for player_id in output.left {
            debug!(room_id = %room_id, player_id = %player_id, "Player left room");
            self.notify(LobbyEvent::RoomLeft { room_id, player_id });
        }

        output.teardown
    }

    fn notify(&self, event: LobbyEvent) {
        if let Some(lobby) = &self.lobby_tx {
            let _ = lobby.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::game::map::MapData;
    use crate::ws::protocol::ServerMsg;

    fn spawn_room(config: &SimConfig) -> (MatchHandle, Arc<MatchRegistry>) {
        let room = Room::new(Uuid::new_v4(), 5, config, MapData::dust()).unwrap();
        let (game_match, handle) = GameMatch::new(room, config.tick_rate, 16);
        let registry = Arc::new(MatchRegistry::new());
        registry.insert(handle.clone());
        tokio::spawn(game_match.run(registry.clone()));
        (handle, registry)
    }

    #[tokio::test]
    async fn participants_connect_and_receive_snapshots() {
        let (handle, registry) = spawn_room(&SimConfig::default());
        let player_id = Uuid::new_v4();
        let connection_id = Uuid::new_v4();
        let mut rx = handle.subscribe();

        let (reply, team) = oneshot::channel();
        handle
            .input_tx
            .send(RoomInput::AddParticipant { player_id, name: "p".into(), team: None, weapon: None, reply })
            .await
            .unwrap();
        assert_eq!(team.await.unwrap().unwrap(), Team::Ct);

        let (reply, connected) = oneshot::channel();
        handle
            .input_tx
            .send(RoomInput::Connect { player_id, connection_id, reply })
            .await
            .unwrap();
        connected.await.unwrap().unwrap();

        let mut saw_welcome = false;
        let mut saw_state = false;
        while !(saw_welcome && saw_state) {
            match rx.recv().await.unwrap().msg {
                ServerMsg::Welcome { player_id: id, .. } => saw_welcome = id == player_id,
                ServerMsg::State(_) => saw_state = true,
                _ => {}
            }
        }
        assert_eq!(registry.total_players(), 1);
        assert_eq!(registry.active_matches(), 1);
    }

    #[tokio::test]
    async fn idle_room_removes_itself_from_the_registry() {
        let mut config = SimConfig::default();
        config.empty_room_timeout_secs = 0.05;
        let (handle, registry) = spawn_room(&config);

        for _ in 0..100 {
            if registry.get(&handle.id).is_none() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(registry.active_matches(), 0);
    }
}
