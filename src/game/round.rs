//! Round clock: phase transitions, win conditions and the bomb objective

use serde::{Deserialize, Serialize};
use tracing::info;

use super::math::Vec2;
use super::{PlayerId, Team};
use crate::util::time::secs_to_ticks;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    Warmup,
    FreezeTime,
    RoundActive,
    RoundEnd,
    GameOver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundEndReason {
    /// Every counter-terrorist is dead
    CtEliminated,
    /// Every terrorist is dead and no bomb is ticking
    TEliminated,
    BombExploded,
    BombDefused,
    TimeExpired,
    /// Both teams eliminated on the same tick
    Draw,
}

impl RoundEndReason {
    pub fn winner(self) -> Option<Team> {
        match self {
            RoundEndReason::CtEliminated | RoundEndReason::BombExploded => Some(Team::T),
            RoundEndReason::TEliminated
            | RoundEndReason::BombDefused
            | RoundEndReason::TimeExpired => Some(Team::Ct),
            RoundEndReason::Draw => None,
        }
    }
}

/// Round timing and objective parameters
#[derive(Debug, Clone, Copy)]
pub struct RoundRules {
    pub freeze_secs: f32,
    pub round_secs: f32,
    pub bomb_secs: f32,
    pub defuse_secs: f32,
    pub round_end_delay_secs: f32,
    pub max_rounds: u32,
    /// Max distance from the bomb a defuser may stand
    pub defuse_radius: f32,
    pub bomb_damage: f32,
    pub bomb_radius: f32,
    /// Armor handed out on every respawn
    pub spawn_armor: f32,
    /// Seconds after a hit during which an attacker is credited with an assist
    pub assist_window_secs: f32,
    /// Opening seconds of a live round during which the buy menu stays open
    pub buy_secs: f32,
}

impl Default for RoundRules {
    fn default() -> Self {
        Self {
            freeze_secs: 15.0,
            round_secs: 115.0,
            bomb_secs: 40.0,
            defuse_secs: 10.0,
            round_end_delay_secs: 5.0,
            max_rounds: 30,
            defuse_radius: 100.0,
            bomb_damage: 500.0,
            bomb_radius: 500.0,
            spawn_armor: 0.0,
            assist_window_secs: 5.0,
            buy_secs: 10.0,
        }
    }
}

impl RoundRules {
    /// Round wins needed to take the match
    pub fn rounds_to_win(&self) -> u32 {
        self.max_rounds / 2 + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Score {
    pub ct: u32,
    pub t: u32,
}

impl Score {
    pub fn for_team(&self, team: Team) -> u32 {
        match team {
            Team::Ct => self.ct,
            Team::T => self.t,
        }
    }

    fn award(&mut self, team: Team) {
        match team {
            Team::Ct => self.ct += 1,
            Team::T => self.t += 1,
        }
    }

    pub fn leader(&self) -> Option<Team> {
        match self.ct.cmp(&self.t) {
            std::cmp::Ordering::Greater => Some(Team::Ct),
            std::cmp::Ordering::Less => Some(Team::T),
            std::cmp::Ordering::Equal => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Defuse {
    pub player: PlayerId,
    pub done_tick: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlantedBomb {
    pub site: String,
    pub position: Vec2,
    pub planted_by: PlayerId,
    pub explode_tick: u64,
    pub defuse: Option<Defuse>,
}

/// Team headcounts used for elimination checks
#[derive(Debug, Clone, Copy, Default)]
pub struct TeamCounts {
    pub ct_total: usize,
    pub ct_alive: usize,
    pub t_total: usize,
    pub t_alive: usize,
}

impl TeamCounts {
    fn eliminated(&self, team: Team) -> bool {
        match team {
            Team::Ct => self.ct_total > 0 && self.ct_alive == 0,
            Team::T => self.t_total > 0 && self.t_alive == 0,
        }
    }
}

/// Transition reported by [`RoundClock::tick`]
#[derive(Debug, Clone, PartialEq)]
pub enum ClockEvent {
    RoundStarted { round: u32 },
    RoundEnded { round: u32, reason: RoundEndReason },
    /// Freeze time of the next round begins; players must be reset
    NextRound { round: u32 },
    MatchOver { winner: Option<Team> },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ObjectiveError {
    #[error("objectives are only available while the round is live")]
    RoundNotActive,

    #[error("the bomb has already been planted")]
    AlreadyPlanted,

    #[error("no bomb is planted")]
    NoBomb,

    #[error("too far from the bomb")]
    OutOfRange,

    #[error("the bomb is already being defused")]
    DefuseInProgress,
}

#[derive(Debug, Clone)]
pub struct RoundClock {
    rules: RoundRules,
    tick_rate: u32,
    phase: RoundPhase,
    round: u32,
    phase_ends_tick: Option<u64>,
    score: Score,
    bomb: Option<PlantedBomb>,
    winner: Option<Team>,
}

impl RoundClock {
    pub fn new(rules: RoundRules, tick_rate: u32) -> Self {
        Self {
            rules,
            tick_rate,
            phase: RoundPhase::Warmup,
            round: 0,
            phase_ends_tick: None,
            score: Score::default(),
            bomb: None,
            winner: None,
        }
    }

    pub fn rules(&self) -> &RoundRules {
        &self.rules
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn score(&self) -> Score {
        self.score
    }

    pub fn bomb(&self) -> Option<&PlantedBomb> {
        self.bomb.as_ref()
    }

    pub fn winner(&self) -> Option<Team> {
        self.winner
    }

    /// Players may move outside freeze time and after the match is decided
    pub fn movement_allowed(&self) -> bool {
        !matches!(self.phase, RoundPhase::FreezeTime | RoundPhase::GameOver)
    }

    /// Shooting counts for the match during the live round; warmup is practice
    pub fn combat_allowed(&self) -> bool {
        matches!(self.phase, RoundPhase::Warmup | RoundPhase::RoundActive)
    }

    /// Buying is open in warmup, freeze time and the first `buy_secs` of a live round
    pub fn buy_allowed(&self, now: u64) -> bool {
        match self.phase {
            RoundPhase::Warmup | RoundPhase::FreezeTime => true,
            RoundPhase::RoundActive => self.phase_ends_tick.is_some_and(|end| {
                end.saturating_sub(now) + self.ticks(self.rules.buy_secs) > self.ticks(self.rules.round_secs)
            }),
            RoundPhase::RoundEnd | RoundPhase::GameOver => false,
        }
    }

    /// Seconds left in the current phase; bomb timer while planted
    pub fn seconds_remaining(&self, now: u64) -> f32 {
        let end = match (&self.bomb, self.phase) {
            (Some(bomb), RoundPhase::RoundActive) => Some(bomb.explode_tick),
            _ => self.phase_ends_tick,
        };
        end.map(|end| end.saturating_sub(now) as f32 / self.tick_rate as f32)
            .unwrap_or(0.0)
    }

    fn ticks(&self, secs: f32) -> u64 {
        secs_to_ticks(secs, self.tick_rate)
    }

    /// Leave warmup and open the first round's freeze time
    pub fn start(&mut self, now: u64) -> ClockEvent {
        self.score = Score::default();
        self.winner = None;
        self.round = 0;
        self.begin_freeze(now)
    }

    fn begin_freeze(&mut self, now: u64) -> ClockEvent {
        self.round += 1;
        self.bomb = None;
        self.phase = RoundPhase::FreezeTime;
        self.phase_ends_tick = Some(now + self.ticks(self.rules.freeze_secs));
        ClockEvent::NextRound { round: self.round }
    }

    /// Evaluate timers and win conditions for tick `now`
    pub fn tick(&mut self, now: u64, counts: TeamCounts) -> Option<ClockEvent> {
        let due = self.phase_ends_tick.is_some_and(|end| now >= end);
        match self.phase {
            RoundPhase::Warmup | RoundPhase::GameOver => None,
            RoundPhase::FreezeTime => {
                if !due {
                    return None;
                }
                self.phase = RoundPhase::RoundActive;
                self.phase_ends_tick = Some(now + self.ticks(self.rules.round_secs));
                info!(round = self.round, "Round live");
                Some(ClockEvent::RoundStarted { round: self.round })
            }
            RoundPhase::RoundActive => {
                let reason = self.end_condition(now, counts, due)?;
                Some(self.end_round(now, reason))
            }
            RoundPhase::RoundEnd => {
                if !due {
                    return None;
                }
                let to_win = self.rules.rounds_to_win();
                let decided = self.score.ct >= to_win
                    || self.score.t >= to_win
                    || self.score.ct + self.score.t >= self.rules.max_rounds;
                if decided {
                    self.phase = RoundPhase::GameOver;
                    self.phase_ends_tick = None;
                    self.winner = self.score.leader();
                    info!(winner = ?self.winner, ct = self.score.ct, t = self.score.t, "Match over");
                    Some(ClockEvent::MatchOver { winner: self.winner })
                } else {
                    Some(self.begin_freeze(now))
                }
            }
        }
    }

    fn end_condition(&self, now: u64, counts: TeamCounts, due: bool) -> Option<RoundEndReason> {
        if let Some(bomb) = &self.bomb {
            if bomb.defuse.as_ref().is_some_and(|d| now >= d.done_tick) {
                return Some(RoundEndReason::BombDefused);
            }
            if now >= bomb.explode_tick {
                return Some(RoundEndReason::BombExploded);
            }
            // terrorists dying after the plant does not end the round
            if counts.eliminated(Team::Ct) {
                return Some(RoundEndReason::CtEliminated);
            }
            return None;
        }

        match (counts.eliminated(Team::Ct), counts.eliminated(Team::T)) {
            (true, true) => Some(RoundEndReason::Draw),
            (true, false) => Some(RoundEndReason::CtEliminated),
            (false, true) => Some(RoundEndReason::TEliminated),
            (false, false) if due => Some(RoundEndReason::TimeExpired),
            _ => None,
        }
    }

    fn end_round(&mut self, now: u64, reason: RoundEndReason) -> ClockEvent {
        if let Some(winner) = reason.winner() {
            self.score.award(winner);
        }
        self.phase = RoundPhase::RoundEnd;
        self.phase_ends_tick = Some(now + self.ticks(self.rules.round_end_delay_secs));
        info!(round = self.round, ?reason, ct = self.score.ct, t = self.score.t, "Round ended");
        ClockEvent::RoundEnded {
            round: self.round,
            reason,
        }
    }

    pub fn plant(
        &mut self,
        now: u64,
        player: PlayerId,
        site: &str,
        position: Vec2,
    ) -> Result<(), ObjectiveError> {
        if self.phase != RoundPhase::RoundActive {
            return Err(ObjectiveError::RoundNotActive);
        }
        if self.bomb.is_some() {
            return Err(ObjectiveError::AlreadyPlanted);
        }
        self.bomb = Some(PlantedBomb {
            site: site.to_string(),
            position,
            planted_by: player,
            explode_tick: now + self.ticks(self.rules.bomb_secs),
            defuse: None,
        });
        Ok(())
    }

    pub fn begin_defuse(
        &mut self,
        now: u64,
        player: PlayerId,
        position: Vec2,
    ) -> Result<(), ObjectiveError> {
        if self.phase != RoundPhase::RoundActive {
            return Err(ObjectiveError::RoundNotActive);
        }
        let defuse_ticks = self.ticks(self.rules.defuse_secs);
        let radius = self.rules.defuse_radius;
        let bomb = self.bomb.as_mut().ok_or(ObjectiveError::NoBomb)?;
        if bomb.position.distance(position) > radius {
            return Err(ObjectiveError::OutOfRange);
        }
        if bomb.defuse.is_some() {
            return Err(ObjectiveError::DefuseInProgress);
        }
        bomb.defuse = Some(Defuse {
            player,
            done_tick: now + defuse_ticks,
        });
        Ok(())
    }

    /// Abort an in-progress defuse by `player`; returns true if one was cancelled
    pub fn cancel_defuse(&mut self, player: PlayerId) -> bool {
        match self.bomb.as_mut() {
            Some(bomb) if bomb.defuse.as_ref().is_some_and(|d| d.player == player) => {
                bomb.defuse = None;
                true
            }
            _ => false,
        }
    }
}
