use serde::Serialize;

use crate::{
    dto::phase::VisibleGamePhase,
    state::{
        election::{ElectionPhase, ElectionStatus},
        game::GameSnapshot,
        station::StationId,
    },
};

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Election phase of this instance.
    pub election: ElectionPhase,
    /// Best-known leader address.
    pub leader: Option<String>,
    /// Game summary, only while this instance leads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game: Option<GameSummary>,
}

impl HealthResponse {
    /// Healthy when a leader is known and, if we are it, the game answers.
    pub fn new(election: ElectionStatus, game: Option<GameSummary>) -> Self {
        let healthy = match election.phase {
            ElectionPhase::Leader => game.is_some(),
            _ => election.known_leader.is_some(),
        };
        Self {
            status: if healthy { "ok" } else { "degraded" }.to_string(),
            election: election.phase,
            leader: election.known_leader,
            game,
        }
    }
}

/// Compact view of the game state.
#[derive(Debug, Serialize)]
pub struct GameSummary {
    /// Current phase.
    pub phase: VisibleGamePhase,
    /// Registered stations.
    pub stations: Vec<String>,
    /// Stations currently held.
    pub pressed: Vec<String>,
    /// Station to press.
    pub correct: Option<String>,
    /// Station to avoid.
    pub wrong: Option<String>,
}

impl From<GameSnapshot> for GameSummary {
    fn from(snapshot: GameSnapshot) -> Self {
        let names = |ids: Vec<StationId>| ids.into_iter().map(|id| id.to_string()).collect();
        Self {
            phase: snapshot.phase.into(),
            stations: names(snapshot.stations),
            pressed: names(snapshot.pressed),
            correct: snapshot.correct.map(|id| id.to_string()),
            wrong: snapshot.wrong.map(|id| id.to_string()),
        }
    }
}
