//! Room pipeline: sequencing, anti-cheat gate, simulation and snapshots for one match

use std::collections::HashMap;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::anticheat::{AntiCheat, Sanction, Verdict};
use crate::config::SimConfig;
use crate::netcode::{IngestError, InputSequencer};
use crate::store::{MatchSummary, Record};
use crate::util::time::{secs_to_ticks, tick_delta, unix_millis};
use crate::ws::protocol::{ClientMsg, ServerMsg};

use super::combat::WeaponKind;
use super::events::MatchEvent;
use super::map::MapData;
use super::round::ClockEvent;
use super::snapshot::SnapshotBuilder;
use super::state::{CommandOutcome, MatchError, MatchState};
use super::{PlayerId, Team};

/// Who an outbound message is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    All,
    Player(PlayerId),
    /// A specific socket, regardless of which player it belongs to
    Connection(Uuid),
}

#[derive(Debug, Clone)]
pub struct Outbound {
    pub target: Target,
    pub msg: ServerMsg,
}

impl Outbound {
    pub fn all(msg: ServerMsg) -> Self {
        Self { target: Target::All, msg }
    }

    pub fn to_player(player: PlayerId, msg: ServerMsg) -> Self {
        Self {
            target: Target::Player(player),
            msg,
        }
    }
}

/// Everything a tick produced for the outside world
#[derive(Debug, Default)]
pub struct TickOutput {
    pub outbound: Vec<Outbound>,
    pub records: Vec<Record>,
    /// Players removed this tick (grace expired or kicked)
    pub left: Vec<PlayerId>,
    pub match_over: Option<MatchSummary>,
    /// Set when the room must be torn down
    pub teardown: Option<String>,
}

/// One room's complete authoritative pipeline
pub struct Room {
    state: MatchState,
    sequencer: InputSequencer,
    anticheat: AntiCheat,
    snapshots: SnapshotBuilder,
    /// Live socket per player
    connections: HashMap<PlayerId, Uuid>,
    dt: f32,
    correction_threshold: f32,
    idle_ticks: u64,
    idle_timeout_ticks: u64,
    had_players: bool,
    started_tick: Option<u64>,
    closed: bool,
}

impl Room {
    pub fn new(id: Uuid, seed: u64, config: &SimConfig, map: MapData) -> Result<Self, MatchError> {
        let state = MatchState::new(id, seed, config, map)?;
        Ok(Self {
            state,
            sequencer: InputSequencer::new(config.max_pending_commands),
            anticheat: AntiCheat::new(config.anticheat, id, config.tick_rate),
            snapshots: SnapshotBuilder::new(config.snapshot_interval),
            connections: HashMap::new(),
            dt: tick_delta(config.tick_rate),
            correction_threshold: config.correction_threshold,
            idle_ticks: 0,
            idle_timeout_ticks: secs_to_ticks(config.empty_room_timeout_secs, config.tick_rate).max(1),
            had_players: false,
            started_tick: None,
            closed: false,
        })
    }

    pub fn id(&self) -> Uuid {
        self.state.id()
    }

    pub fn state(&self) -> &MatchState {
        &self.state
    }

    pub fn player_count(&self) -> usize {
        self.state.player_count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn add_participant(
        &mut self,
        player: PlayerId,
        name: String,
        team: Option<Team>,
        weapon: Option<WeaponKind>,
    ) -> Result<Team, MatchError> {
        let team = self.state.add_player(player, name, team, weapon)?.team;
        self.sequencer.register(player, 0);
        self.had_players = true;
        Ok(team)
    }

    pub fn start(&mut self) -> Result<(), MatchError> {
        self.state.start_match()?;
        self.started_tick = Some(self.state.tick());
        self.snapshots.force_next();
        Ok(())
    }

    /// Replace the map during warmup; a map that fails to load leaves the room untouched
    pub fn load_map(&mut self, map: MapData) -> Result<(), MatchError> {
        self.state.load_map(map)?;
        self.snapshots.force_next();
        Ok(())
    }

    /// Attach a socket to a participant, replacing any previous socket
    pub fn connect(&mut self, player: PlayerId, connection: Uuid) -> Result<Vec<Outbound>, MatchError> {
        let ack = self.state.reconnect(player)?;
        let mut out = Vec::new();

        if let Some(old) = self.connections.insert(player, connection) {
            if old != connection {
                info!(room_id = %self.id(), player_id = %player, "Connection replaced");
                out.push(Outbound {
                    target: Target::Connection(old),
                    msg: ServerMsg::Kicked {
                        reason: "connected from another session".to_string(),
                    },
                });
            }
        }
        self.sequencer.register(player, ack);

        out.push(Outbound {
            target: Target::Connection(connection),
            msg: ServerMsg::Welcome {
                player_id: player,
                room_id: self.id(),
                server_time: unix_millis(),
                tick_rate: self.state.tick_rate(),
                ack_sequence: ack,
                correction_threshold: self.correction_threshold,
            },
        });
        self.snapshots.force_next();
        Ok(out)
    }

    /// Detach a socket; stale sockets of a replaced connection are ignored
    pub fn disconnect(&mut self, player: PlayerId, connection: Uuid) {
        if self.connections.get(&player) != Some(&connection) {
            return;
        }
        self.connections.remove(&player);
        self.sequencer.clear(player);
        self.state.mark_disconnected(player);
        info!(room_id = %self.id(), player_id = %player, "Player disconnected, holding slot");
    }

    /// Queue a client message for the next tick
    pub fn ingest(&mut self, player: PlayerId, connection: Uuid, msg: ClientMsg) -> Vec<Outbound> {
        if self.connections.get(&player) != Some(&connection) {
            debug!(room_id = %self.id(), player_id = %player, "Ignoring message from detached socket");
            return Vec::new();
        }

        if let ClientMsg::Ping { t } = msg {
            return vec![Outbound {
                target: Target::Connection(connection),
                msg: ServerMsg::Pong {
                    t,
                    server_time: unix_millis(),
                },
            }];
        }

        let Some(command) = msg.into_command(player) else {
            return Vec::new();
        };
        match self.sequencer.enqueue(command) {
            Ok(()) => Vec::new(),
            Err(IngestError::QueueFull(pending)) => {
                warn!(room_id = %self.id(), player_id = %player, pending, "Input queue full, dropping command");
                Vec::new()
            }
            Err(e @ IngestError::UnknownPlayer(_)) => {
                vec![Outbound::to_player(player, ServerMsg::error("unknown_player", e.to_string()))]
            }
        }
    }

    /// Run one fixed tick: drain → validate → apply → integrate → snapshot
    pub fn tick(&mut self) -> TickOutput {
        let mut out = TickOutput::default();
        if self.closed {
            return out;
        }
        let now = self.state.tick();

        let connected: Vec<PlayerId> = self
            .state
            .players()
            .filter(|p| self.connections.contains_key(&p.id))
            .map(|p| p.id)
            .collect();
        for player in connected {
            self.process_commands(now, player, &mut out);
        }

        let report = match self.state.advance(self.dt) {
            Ok(report) => report,
            Err(e) => {
                self.abort(&e, &mut out);
                return out;
            }
        };

        let events = self.state.drain_events();
        for event in &events {
            if let MatchEvent::Hit {
                attacker_id,
                headshot,
                ..
            } = event
            {
                if let Some(verdict) = self.anticheat.observe_hit(now, *attacker_id, *headshot) {
                    self.sanction(verdict, &mut out);
                }
            }
        }

        for player in report.reclaimed {
            self.forget(player);
            out.left.push(player);
        }

        let match_over = report
            .clock
            .iter()
            .any(|e| matches!(e, ClockEvent::MatchOver { .. }));
        if match_over {
            self.snapshots.force_next();
        }
        if self.snapshots.should_send() {
            out.outbound.push(Outbound::all(self.snapshots.build(&self.state, events)));
        } else {
            self.snapshots.defer(events);
        }

        if match_over {
            let duration = self
                .started_tick
                .map_or(0.0, |start| (self.state.tick() - start) as f32 * self.dt);
            let summary = MatchSummary::from_state(&self.state, duration);
            info!(room_id = %self.id(), winner = ?summary.winner, "Match finished");
            out.outbound.push(Outbound::all(ServerMsg::MatchEnd {
                summary: summary.clone(),
            }));
            out.records.push(Record::MatchSummary(summary.clone()));
            out.match_over = Some(summary);
            self.close("match over", &mut out);
            return out;
        }

        self.check_idle(&mut out);
        out
    }

    fn process_commands(&mut self, now: u64, player: PlayerId, out: &mut TickOutput) {
        let budget = self.anticheat.is_throttled(player, now).then_some(1);
        let drained = self.sequencer.drain(player, budget);

        if drained.gap().is_some() {
            let expected = self.sequencer.last_accepted(player).unwrap_or(0) + 1;
            out.outbound.push(Outbound::to_player(
                player,
                ServerMsg::Resync {
                    expected_sequence: expected,
                },
            ));
        }

        for command in drained.accepted {
            let Some(state) = self.state.player(player) else {
                // kicked earlier in this batch
                break;
            };
            let check = self.anticheat.check_command(now, state, &command);
            if let Some(verdict) = check.verdict {
                let terminated = verdict.sanction == Some(Sanction::Terminate);
                self.sanction(verdict, out);
                if terminated {
                    break;
                }
            }

            if !check.allowed {
                self.state.acknowledge(player, command.sequence);
                continue;
            }

            match self.state.apply_command(&command) {
                Ok(CommandOutcome::Chat(text)) => {
                    let name = self
                        .state
                        .player(player)
                        .map(|p| p.name.clone())
                        .unwrap_or_default();
                    out.outbound.push(Outbound::all(ServerMsg::Chat {
                        player_id: player,
                        name,
                        text,
                    }));
                }
                Ok(CommandOutcome::Ignored(reason)) => {
                    debug!(room_id = %self.id(), player_id = %player, sequence = command.sequence, reason, "Command had no effect");
                }
                Ok(CommandOutcome::Applied) => {}
                Err(e) => {
                    warn!(room_id = %self.id(), player_id = %player, error = %e, "Failed to apply command");
                }
            }
        }
    }

    fn sanction(&mut self, verdict: Verdict, out: &mut TickOutput) {
        let player = verdict.record.user_id;
        let count = self.anticheat.violation_count(player, verdict.record.tick);
        out.records.push(Record::Violation(verdict.record));

        match verdict.sanction {
            None => {}
            Some(Sanction::Warn) => out.outbound.push(Outbound::to_player(
                player,
                ServerMsg::Warning {
                    message: "suspicious input detected".to_string(),
                    violations: count,
                },
            )),
            Some(Sanction::Throttle { .. }) => out.outbound.push(Outbound::to_player(
                player,
                ServerMsg::Warning {
                    message: "input throttled".to_string(),
                    violations: count,
                },
            )),
            Some(Sanction::Terminate) => {
                warn!(room_id = %self.id(), player_id = %player, "Terminating session after anti-cheat verdict");
                out.outbound.push(Outbound::to_player(
                    player,
                    ServerMsg::Kicked {
                        reason: "anti-cheat violation".to_string(),
                    },
                ));
                self.state.remove_player(player);
                self.forget(player);
                out.left.push(player);
            }
        }
    }

    fn forget(&mut self, player: PlayerId) {
        self.sequencer.unregister(player);
        self.anticheat.unregister(player);
        self.connections.remove(&player);
    }

    fn abort(&mut self, err: &MatchError, out: &mut TickOutput) {
        error!(room_id = %self.id(), error = %err, "Fatal simulation error, aborting room");
        out.outbound.push(Outbound::all(ServerMsg::RoomAborted {
            reason: format!("{err}; please rejoin from the lobby"),
        }));
        self.close(&err.to_string(), out);
    }

    fn check_idle(&mut self, out: &mut TickOutput) {
        if self.had_players && self.state.player_count() == 0 {
            self.close("all players left", out);
            return;
        }
        if self.connections.is_empty() {
            self.idle_ticks += 1;
            if self.idle_ticks >= self.idle_timeout_ticks {
                self.close("no connected players", out);
            }
        } else {
            self.idle_ticks = 0;
        }
    }

    fn close(&mut self, reason: &str, out: &mut TickOutput) {
        self.closed = true;
        out.teardown = Some(reason.to_string());
    }
}
