//! Round economy: rewards, loss bonus streaks and the money cap

use super::Team;

#[derive(Debug, Clone, Copy)]
pub struct EconomyRules {
    pub start_money: u32,
    pub max_money: u32,
    pub kill_reward: u32,
    pub headshot_bonus: u32,
    pub team_kill_penalty: u32,
    pub win_reward: u32,
    pub loss_base: u32,
    pub loss_step: u32,
    /// Consecutive losses beyond this no longer raise the bonus
    pub loss_streak_cap: u32,
    /// Bomb plant / defuse bonus
    pub objective_reward: u32,
    /// Distance from an own-team spawn within which buying is allowed
    pub buy_zone_radius: f32,
}

impl Default for EconomyRules {
    fn default() -> Self {
        Self {
            start_money: 800,
            max_money: 16_000,
            kill_reward: 300,
            headshot_bonus: 100,
            team_kill_penalty: 300,
            win_reward: 3250,
            loss_base: 1400,
            loss_step: 500,
            loss_streak_cap: 5,
            objective_reward: 300,
            buy_zone_radius: 250.0,
        }
    }
}

impl EconomyRules {
    /// Loss reward after `consecutive_losses` losses in a row (the current one included)
    pub fn loss_bonus(&self, consecutive_losses: u32) -> u32 {
        let streak = consecutive_losses.clamp(1, self.loss_streak_cap.max(1));
        self.loss_base + self.loss_step * (streak - 1)
    }

    /// Signed money change for a kill
    pub fn kill_delta(&self, headshot: bool, team_kill: bool) -> i64 {
        if team_kill {
            return -(self.team_kill_penalty as i64);
        }
        let bonus = if headshot { self.headshot_bonus } else { 0 };
        (self.kill_reward + bonus) as i64
    }

    /// Apply a signed change, clamped to `[0, max_money]`
    pub fn credit(&self, money: u32, delta: i64) -> u32 {
        (money as i64 + delta).clamp(0, self.max_money as i64) as u32
    }
}

/// Consecutive round losses per team
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LossStreaks {
    ct: u32,
    t: u32,
}

impl LossStreaks {
    pub fn get(&self, team: Team) -> u32 {
        match team {
            Team::Ct => self.ct,
            Team::T => self.t,
        }
    }

    fn get_mut(&mut self, team: Team) -> &mut u32 {
        match team {
            Team::Ct => &mut self.ct,
            Team::T => &mut self.t,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Money each team's members receive at round end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundPayout {
    pub ct: u32,
    pub t: u32,
}

impl RoundPayout {
    pub fn for_team(&self, team: Team) -> u32 {
        match team {
            Team::Ct => self.ct,
            Team::T => self.t,
        }
    }
}

impl EconomyRules {
    /// Update streaks for a finished round and compute the payout.
    /// A drawn round pays both sides the base loss reward and leaves streaks alone.
    pub fn settle_round(&self, winner: Option<Team>, streaks: &mut LossStreaks) -> RoundPayout {
        let Some(winner) = winner else {
            return RoundPayout {
                ct: self.loss_base,
                t: self.loss_base,
            };
        };

        let loser = winner.opponent();
        *streaks.get_mut(winner) = 0;
        let streak = streaks.get_mut(loser);
        *streak = (*streak + 1).min(self.loss_streak_cap.max(1));
        let loss = self.loss_bonus(*streak);

        match winner {
            Team::Ct => RoundPayout {
                ct: self.win_reward,
                t: loss,
            },
            Team::T => RoundPayout {
                ct: loss,
                t: self.win_reward,
            },
        }
    }
}
