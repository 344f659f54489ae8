//! Per-player command queues with strict sequence ordering

use std::collections::{HashMap, VecDeque};
use tracing::debug;

use super::InputCommand;
use crate::game::PlayerId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    #[error("no input queue for player {0}")]
    UnknownPlayer(PlayerId),

    #[error("input queue full ({0} pending)")]
    QueueFull(usize),
}

/// Why a drained command was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Sequence at or below the last accepted one
    Stale,
    /// Sequence skipped ahead; the client must resync
    Gap,
}

#[derive(Debug, Default)]
pub struct DrainResult {
    pub accepted: Vec<InputCommand>,
    pub rejected: Vec<(u64, Rejection)>,
}

impl DrainResult {
    /// First gap rejection, if any
    pub fn gap(&self) -> Option<u64> {
        self.rejected
            .iter()
            .find(|(_, r)| *r == Rejection::Gap)
            .map(|(seq, _)| *seq)
    }
}

#[derive(Debug, Default)]
struct PlayerQueue {
    last_accepted: u64,
    pending: VecDeque<InputCommand>,
    dropped: u64,
}

/// Orders client commands. A command is accepted only if its sequence is
/// exactly one past the last accepted sequence; anything else is dropped.
#[derive(Debug)]
pub struct InputSequencer {
    max_pending: usize,
    queues: HashMap<PlayerId, PlayerQueue>,
}

impl InputSequencer {
    pub fn new(max_pending: usize) -> Self {
        Self {
            max_pending: max_pending.max(1),
            queues: HashMap::new(),
        }
    }

    /// Start (or resume) tracking a player from `last_accepted`
    pub fn register(&mut self, player: PlayerId, last_accepted: u64) {
        let queue = self.queues.entry(player).or_default();
        queue.last_accepted = last_accepted;
        queue.pending.clear();
    }

    pub fn unregister(&mut self, player: PlayerId) {
        self.queues.remove(&player);
    }

    pub fn enqueue(&mut self, command: InputCommand) -> Result<(), IngestError> {
        let queue = self
            .queues
            .get_mut(&command.player_id)
            .ok_or(IngestError::UnknownPlayer(command.player_id))?;
        if queue.pending.len() >= self.max_pending {
            queue.dropped += 1;
            return Err(IngestError::QueueFull(queue.pending.len()));
        }
        queue.pending.push_back(command);
        Ok(())
    }

    /// Drain queued commands in arrival order. With a `budget`, at most that
    /// many commands are examined; the rest stay queued for the next tick.
    pub fn drain(&mut self, player: PlayerId, budget: Option<usize>) -> DrainResult {
        let mut result = DrainResult::default();
        let Some(queue) = self.queues.get_mut(&player) else {
            return result;
        };

        let take = budget.unwrap_or(usize::MAX).min(queue.pending.len());
        for command in queue.pending.drain(..take) {
            let expected = queue.last_accepted + 1;
            if command.sequence == expected {
                queue.last_accepted = command.sequence;
                result.accepted.push(command);
                continue;
            }

            let rejection = if command.sequence < expected {
                Rejection::Stale
            } else {
                Rejection::Gap
            };
            debug!(
                player_id = %player,
                sequence = command.sequence,
                expected,
                ?rejection,
                "Dropping out-of-order command"
            );
            queue.dropped += 1;
            result.rejected.push((command.sequence, rejection));
        }
        result
    }

    pub fn last_accepted(&self, player: PlayerId) -> Option<u64> {
        self.queues.get(&player).map(|q| q.last_accepted)
    }

    pub fn pending(&self, player: PlayerId) -> usize {
        self.queues.get(&player).map_or(0, |q| q.pending.len())
    }

    /// Commands dropped for this player so far
    pub fn dropped(&self, player: PlayerId) -> u64 {
        self.queues.get(&player).map_or(0, |q| q.dropped)
    }

    /// Discard queued commands without touching the accepted sequence
    pub fn clear(&mut self, player: PlayerId) {
        if let Some(queue) = self.queues.get_mut(&player) {
            queue.pending.clear();
        }
    }
}
