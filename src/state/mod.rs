pub mod election;
pub mod game;
pub mod station;
pub mod timer;
pub mod turns;

use std::sync::Arc;

use tokio::sync::{RwLock, watch};

use crate::{
    clock::Clock, config::Settings, services::game_service::GameHandle,
    state::election::ElectionStatus,
};

pub type SharedState = Arc<AppState>;

/// State shared by the station and peer listeners.
pub struct AppState {
    settings: Arc<Settings>,
    clock: Clock,
    election: watch::Receiver<ElectionStatus>,
    game: RwLock<Option<GameHandle>>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// Station sockets are refused until a game is installed.
    pub fn new(
        settings: Arc<Settings>,
        clock: Clock,
        election: watch::Receiver<ElectionStatus>,
    ) -> SharedState {
        Arc::new(Self {
            settings,
            clock,
            election,
            game: RwLock::new(None),
        })
    }

    /// Process settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Clock used to stamp station commands.
    pub fn clock(&self) -> Clock {
        self.clock
    }

    /// Latest published election status.
    pub fn election(&self) -> ElectionStatus {
        self.election.borrow().clone()
    }

    /// Subscribe to election updates.
    pub fn election_watcher(&self) -> watch::Receiver<ElectionStatus> {
        self.election.clone()
    }

    /// Handle to the running game, if this instance leads.
    pub async fn game(&self) -> Option<GameHandle> {
        let guard = self.game.read().await;
        guard.as_ref().cloned()
    }

    /// Install the game once leadership is acquired.
    pub async fn install_game(&self, game: GameHandle) {
        let mut guard = self.game.write().await;
        *guard = Some(game);
    }
}
