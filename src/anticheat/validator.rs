//! Per-room validator: movement, fire rate, headshot rate and escalation

use chrono::Utc;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::f32::consts::TAU;
use tracing::warn;
use uuid::Uuid;

use super::{AntiCheatConfig, Sanction, Verdict, ViolationKind, ViolationRecord};
use crate::game::math::Vec2;
use crate::game::state::Player;
use crate::game::{PlayerId, Stance};
use crate::netcode::{Action, InputCommand};
use crate::util::time::{secs_to_ticks, tick_delta};

/// Slack for float error when a command spends exactly the saved budget
const BUDGET_EPSILON: f32 = 1e-3;

/// Result of gating one accepted command
#[derive(Debug, Clone)]
pub struct CommandCheck {
    /// Whether the command may be applied
    pub allowed: bool,
    pub verdict: Option<Verdict>,
}

impl CommandCheck {
    fn pass() -> Self {
        Self {
            allowed: true,
            verdict: None,
        }
    }
}

#[derive(Debug, Default)]
struct Track {
    /// Ticks at which violations were recorded
    violations: VecDeque<u64>,
    /// Unspent movement, in ticks of full-speed travel
    move_budget: f32,
    /// Tick the movement budget was last refilled
    budget_tick: Option<u64>,
    /// (client timestamp, server ms) the client clock is measured against
    clock_anchor: Option<(u64, u64)>,
    last_timestamp: Option<u64>,
    last_shot: Option<u64>,
    /// (client timestamp, facing) of the last aimed command
    last_aim: Option<(u64, f32)>,
    hits: VecDeque<bool>,
    throttled_until: Option<u64>,
}

pub struct AntiCheat {
    config: AntiCheatConfig,
    match_id: Uuid,
    tick_rate: u32,
    window_ticks: u64,
    players: HashMap<PlayerId, Track>,
}

impl AntiCheat {
    pub fn new(config: AntiCheatConfig, match_id: Uuid, tick_rate: u32) -> Self {
        Self {
            config,
            match_id,
            tick_rate,
            window_ticks: secs_to_ticks(config.window_secs, tick_rate).max(1),
            players: HashMap::new(),
        }
    }

    pub fn config(&self) -> &AntiCheatConfig {
        &self.config
    }

    pub fn unregister(&mut self, player: PlayerId) {
        self.players.remove(&player);
    }

    /// True while the player is limited to one command per tick
    pub fn is_throttled(&self, player: PlayerId, now: u64) -> bool {
        self.players
            .get(&player)
            .and_then(|t| t.throttled_until)
            .is_some_and(|until| now < until)
    }

    /// Violations inside the rolling window
    pub fn violation_count(&self, player: PlayerId, now: u64) -> usize {
        self.players.get(&player).map_or(0, |t| {
            t.violations
                .iter()
                .filter(|at| now.saturating_sub(**at) < self.window_ticks)
                .count()
        })
    }

    /// Gate a sequenced command against the player's authoritative state
    pub fn check_command(&mut self, now: u64, player: &Player, command: &InputCommand) -> CommandCheck {
        if let Some(check) = self.check_clock(now, player.id, command.timestamp) {
            return check;
        }

        match &command.action {
            Action::Move { delta, stance, aim } => {
                let check = self.check_move(now, player, *delta, *stance);
                if check.allowed {
                    self.track_aim(player.id, command.timestamp, *aim);
                }
                check
            }
            Action::Shoot { aim } => self.check_shot(now, player, command.timestamp, *aim),
            _ => {
                let track = self.players.entry(player.id).or_default();
                if track.last_timestamp.map_or(true, |last| command.timestamp >= last) {
                    track.last_timestamp = Some(command.timestamp);
                }
                CommandCheck::pass()
            }
        }
    }

    /// Client time may not outrun server time by more than the allowed lead
    fn check_clock(&mut self, now: u64, player: PlayerId, timestamp: u64) -> Option<CommandCheck> {
        let server_ms = now * 1000 / self.tick_rate.max(1) as u64;
        let limit = self.config.max_clock_lead_ms;
        let track = self.players.entry(player).or_default();

        let Some((client_start, server_start)) = track.clock_anchor else {
            track.clock_anchor = Some((timestamp, server_ms));
            return None;
        };
        let lead = (timestamp as i64 - client_start as i64) - (server_ms as i64 - server_start as i64);
        if lead <= limit as i64 {
            return None;
        }

        // re-anchor so one jump is reported once
        track.clock_anchor = Some((timestamp, server_ms));
        Some(self.reject(
            now,
            player,
            ViolationKind::ClockDrift,
            json!({ "leadMs": lead, "limitMs": limit }),
        ))
    }

    /// Movement is paid from a budget refilled by elapsed server ticks, so
    /// input bunched by network jitter spends what the quiet ticks saved
    fn check_move(&mut self, now: u64, player: &Player, delta: Vec2, stance: Stance) -> CommandCheck {
        let config = self.config;
        let step = delta.length();
        if !step.is_finite() {
            return self.reject(now, player.id, ViolationKind::SpeedHack, json!({ "reason": "non-finite movement" }));
        }
        if step > config.teleport_distance {
            return self.reject(
                now,
                player.id,
                ViolationKind::Teleport,
                json!({ "distance": step, "limit": config.teleport_distance }),
            );
        }

        let max_speed = config.base_speed
            * stance.speed_multiplier()
            * player.inventory.active().kind.stats().move_speed
            * config.speed_tolerance;
        let per_tick = max_speed * tick_delta(self.tick_rate);
        let burst = (config.movement_burst_secs * self.tick_rate as f32).max(1.0);

        let track = self.players.entry(player.id).or_default();
        let refill = track
            .budget_tick
            .map_or(burst, |last| now.saturating_sub(last) as f32);
        track.budget_tick = Some(now);
        track.move_budget = (track.move_budget + refill).min(burst);

        let cost = step / per_tick;
        if cost > track.move_budget + BUDGET_EPSILON {
            let budget = track.move_budget * per_tick;
            return self.reject(
                now,
                player.id,
                ViolationKind::SpeedHack,
                json!({ "distance": step, "budget": budget, "maxSpeed": max_speed, "stance": stance }),
            );
        }
        track.move_budget = (track.move_budget - cost).max(0.0);
        CommandCheck::pass()
    }

    fn check_shot(&mut self, now: u64, player: &Player, timestamp: u64, aim: f32) -> CommandCheck {
        if !player.alive {
            return self.reject(now, player.id, ViolationKind::ShootingWhileDead, json!({}));
        }
        let config = self.config;
        let weapon = player.inventory.active().kind;

        let track = self.players.entry(player.id).or_default();
        if let Some(last) = track.last_timestamp.filter(|last| timestamp < *last) {
            return self.reject(
                now,
                player.id,
                ViolationKind::RapidFire,
                json!({ "reason": "timestamp regressed", "timestamp": timestamp, "previous": last }),
            );
        }
        track.last_timestamp = Some(timestamp);

        let min_interval = weapon.stats().shot_interval_ms() * config.fire_rate_tolerance;
        if let Some(last) = track.last_shot {
            let interval = timestamp.saturating_sub(last) as f32;
            if interval < min_interval {
                return self.reject(
                    now,
                    player.id,
                    ViolationKind::RapidFire,
                    json!({ "intervalMs": interval, "minIntervalMs": min_interval, "weapon": weapon }),
                );
            }
        }
        track.last_shot = Some(timestamp);

        // aim is only judged on shots: a cursor crossing the player flips
        // the facing of ordinary movement
        let turn = self.track_aim(player.id, timestamp, aim);
        let verdict = turn.and_then(|(degrees, elapsed_ms)| {
            let speed = degrees / (elapsed_ms / 1000.0);
            if speed > config.max_aim_speed_deg {
                Some(self.record(
                    now,
                    player.id,
                    ViolationKind::ImpossibleAimSpeed,
                    json!({ "degPerSec": speed, "limit": config.max_aim_speed_deg }),
                ))
            } else if degrees > config.aim_snap_deg && elapsed_ms < config.aim_snap_window_ms {
                Some(self.record(
                    now,
                    player.id,
                    ViolationKind::AimSnap,
                    json!({ "degrees": degrees, "elapsedMs": elapsed_ms }),
                ))
            } else {
                None
            }
        });

        CommandCheck {
            allowed: true,
            verdict,
        }
    }

    /// Remember the facing; returns (degrees turned, ms elapsed) since the
    /// previous aimed command when the client clock moved forward
    fn track_aim(&mut self, player: PlayerId, timestamp: u64, aim: f32) -> Option<(f32, f32)> {
        if !aim.is_finite() {
            return None;
        }
        let track = self.players.entry(player).or_default();
        let (last_timestamp, last_aim) = track.last_aim.replace((timestamp, aim))?;
        if timestamp <= last_timestamp {
            return None;
        }
        let turned = (aim - last_aim).rem_euclid(TAU);
        let degrees = turned.min(TAU - turned).to_degrees();
        Some((degrees, (timestamp - last_timestamp) as f32))
    }

    /// Feed a landed hit into the attacker's headshot-rate sample
    pub fn observe_hit(&mut self, now: u64, attacker: PlayerId, headshot: bool) -> Option<Verdict> {
        let config = self.config;
        let track = self.players.entry(attacker).or_default();
        track.hits.push_back(headshot);
        while track.hits.len() > config.headshot_sample_window {
            track.hits.pop_front();
        }

        let samples = track.hits.len();
        let headshots = track.hits.iter().filter(|h| **h).count();
        let rate = headshots as f32 / samples as f32;
        if samples > config.headshot_min_samples
            && headshots > config.headshot_max_count
            && rate > config.headshot_max_rate
        {
            // start a fresh sample so one streak is reported once
            track.hits.clear();
            return Some(self.record(
                now,
                attacker,
                ViolationKind::ImpossibleHeadshotRate,
                json!({ "samples": samples, "headshots": headshots, "rate": rate }),
            ));
        }
        None
    }

    fn reject(&mut self, now: u64, player: PlayerId, kind: ViolationKind, detail: serde_json::Value) -> CommandCheck {
        CommandCheck {
            allowed: false,
            verdict: Some(self.record(now, player, kind, detail)),
        }
    }

    /// Record a violation and decide the sanction
    pub fn record(&mut self, now: u64, player: PlayerId, kind: ViolationKind, detail: serde_json::Value) -> Verdict {
        let config = self.config;
        let window = self.window_ticks;
        let throttle_ticks = secs_to_ticks(config.throttle_secs, self.tick_rate);
        let track = self.players.entry(player).or_default();

        track.violations.push_back(now);
        while track
            .violations
            .front()
            .is_some_and(|at| now.saturating_sub(*at) >= window)
        {
            track.violations.pop_front();
        }
        let count = track.violations.len();
        let confidence = kind.confidence();

        let sanction = if confidence >= config.auto_terminate_confidence || count >= config.terminate_after {
            Some(Sanction::Terminate)
        } else if count >= config.throttle_after {
            let until_tick = now + throttle_ticks;
            track.throttled_until = Some(until_tick);
            Some(Sanction::Throttle { until_tick })
        } else if count >= config.warn_after {
            Some(Sanction::Warn)
        } else {
            None
        };

        warn!(
            match_id = %self.match_id,
            player_id = %player,
            ?kind,
            confidence,
            count,
            ?sanction,
            "Anti-cheat violation"
        );

        Verdict {
            record: ViolationRecord {
                user_id: player,
                match_id: self.match_id,
                kind,
                confidence,
                detail,
                tick: now,
                recorded_at: Utc::now(),
            },
            sanction,
        }
    }
}
