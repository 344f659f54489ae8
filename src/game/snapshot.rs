//! Snapshot building

use crate::ws::protocol::{
    BombState, GrenadeSnapshot, PlayerSnapshot, ProjectileSnapshot, ServerMsg, StateSnapshot,
};

use super::events::MatchEvent;
use super::state::MatchState;

/// Builds authoritative snapshots for network transmission
pub struct SnapshotBuilder {
    /// Tick counter since last snapshot
    ticks_since_snapshot: u32,
    /// Snapshot interval in ticks
    snapshot_interval: u32,
    /// Events gathered on ticks that did not emit a snapshot
    pending_events: Vec<MatchEvent>,
}

impl SnapshotBuilder {
    pub fn new(snapshot_interval: u32) -> Self {
        Self {
            ticks_since_snapshot: 0,
            snapshot_interval: snapshot_interval.max(1),
            pending_events: Vec::new(),
        }
    }

    /// Check if it's time to send a snapshot
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_snapshot += 1;
        if self.ticks_since_snapshot >= self.snapshot_interval {
            self.ticks_since_snapshot = 0;
            true
        } else {
            false
        }
    }

    /// Force snapshot on next check (used for important events)
    pub fn force_next(&mut self) {
        self.ticks_since_snapshot = self.snapshot_interval;
    }

    /// Hold events until the next snapshot goes out
    pub fn defer(&mut self, events: Vec<MatchEvent>) {
        self.pending_events.extend(events);
    }

    /// Build a snapshot message carrying any deferred events plus `events`
    pub fn build(&mut self, state: &MatchState, events: Vec<MatchEvent>) -> ServerMsg {
        let mut all_events = std::mem::take(&mut self.pending_events);
        all_events.extend(events);

        let players = state
            .players()
            .map(|p| PlayerSnapshot {
                id: p.id,
                name: p.name.clone(),
                team: p.team,
                position: p.position,
                velocity: p.velocity,
                aim: p.aim,
                health: p.health,
                armor: p.armor,
                alive: p.alive,
                money: p.money,
                weapon: p.inventory.active().kind,
                ammo: p.inventory.active().ammo,
                weapons: p.inventory.kinds(),
                connected: p.is_connected(),
                ack_sequence: p.last_sequence,
            })
            .collect();

        let projectiles = state
            .projectiles()
            .iter()
            .map(|(id, p)| ProjectileSnapshot {
                id,
                owner: p.owner,
                position: p.position,
                direction: p.direction,
            })
            .collect();

        let grenades = state
            .grenades()
            .iter()
            .map(|g| GrenadeSnapshot {
                owner: g.owner,
                position: g.position,
            })
            .collect();

        let clock = state.clock();
        let bomb_state = clock.bomb().map(|bomb| BombState {
            site: bomb.site.clone(),
            position: bomb.position,
            defusing: bomb.defuse.is_some(),
        });

        ServerMsg::State(StateSnapshot {
            tick: state.tick(),
            players,
            projectiles,
            grenades,
            score: clock.score(),
            round: clock.round(),
            round_phase: clock.phase(),
            round_timer: clock.seconds_remaining(state.tick()),
            bomb_state,
            events: all_events,
        })
    }
}
