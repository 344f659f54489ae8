//! Boundary records produced by rooms

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::anticheat::ViolationRecord;
use crate::game::round::Score;
use crate::game::state::MatchState;
use crate::game::{PlayerId, Team};

/// Final per-player statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSummary {
    pub player_id: PlayerId,
    pub name: String,
    pub team: Team,
    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
    pub damage_dealt: f32,
    pub headshots: u32,
    pub shots_fired: u32,
    pub money: u32,
}

/// Sent once when a match reaches game over
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSummary {
    pub match_id: Uuid,
    pub map: String,
    pub winner: Option<Team>,
    pub score: Score,
    pub rounds_played: u32,
    pub duration_secs: f32,
    pub players: Vec<PlayerSummary>,
    pub ended_at: DateTime<Utc>,
}

impl MatchSummary {
    pub fn from_state(state: &MatchState, duration_secs: f32) -> Self {
        let score = state.score();
        Self {
            match_id: state.id(),
            map: state.map().name().to_string(),
            winner: state.clock().winner(),
            score,
            rounds_played: score.ct + score.t,
            duration_secs,
            players: state
                .players()
                .map(|p| PlayerSummary {
                    player_id: p.id,
                    name: p.name.clone(),
                    team: p.team,
                    kills: p.stats.kills,
                    deaths: p.stats.deaths,
                    assists: p.stats.assists,
                    damage_dealt: p.stats.damage_dealt,
                    headshots: p.stats.headshots,
                    shots_fired: p.stats.shots_fired,
                    money: p.money,
                })
                .collect(),
            ended_at: Utc::now(),
        }
    }
}

/// Anything a room hands to the persistence boundary
#[derive(Debug, Clone)]
pub enum Record {
    MatchSummary(MatchSummary),
    Violation(ViolationRecord),
}

impl Record {
    /// Collection the record is written to
    pub fn collection(&self) -> &'static str {
        match self {
            Record::MatchSummary(_) => "match_summaries",
            Record::Violation(_) => "violations",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Record::MatchSummary(summary) => serde_json::to_value(summary),
            Record::Violation(violation) => serde_json::to_value(violation),
        }
    }
}
