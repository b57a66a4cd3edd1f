use serde::Serialize;

use crate::state::game::Phase;

/// Game phase as exposed by the health endpoint.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VisibleGamePhase {
    /// No station connected.
    NoStations,
    /// One station waiting to be pressed.
    PreGameSingle,
    /// Several stations, invitation cycling.
    PreGameMultiple,
    /// Round running.
    Playing,
    /// Round running, nobody holding a button.
    PlayingAllReleased,
    /// Round over, waiting for releases.
    WaitRelease,
}

impl From<Phase> for VisibleGamePhase {
    fn from(value: Phase) -> Self {
        match value {
            Phase::NoStations => VisibleGamePhase::NoStations,
            Phase::PreGameSingle => VisibleGamePhase::PreGameSingle,
            Phase::PreGameMultiple => VisibleGamePhase::PreGameMultiple,
            Phase::Playing => VisibleGamePhase::Playing,
            Phase::PlayingAllReleased => VisibleGamePhase::PlayingAllReleased,
            Phase::WaitRelease => VisibleGamePhase::WaitRelease,
        }
    }
}
