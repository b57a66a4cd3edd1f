//! The game actor: a single task applying [`ControlEvent`]s to the [`Game`] in order.

use std::sync::Arc;

use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{error, info};

use crate::{
    config::GameConfig,
    error::GameError,
    state::{
        game::{ControlEvent, Game, GameSnapshot},
        station::{ConnectionId, StationId, StationSession},
    },
};

/// Cheap, cloneable sender side of the game actor.
#[derive(Debug, Clone)]
pub struct GameHandle {
    events: mpsc::UnboundedSender<ControlEvent>,
}

impl GameHandle {
    /// Queue an event for the actor.
    pub fn send(&self, event: ControlEvent) -> Result<(), GameError> {
        self.events.send(event).map_err(|_| GameError::Stopped)
    }

    /// Hand a freshly identified station to the game.
    pub fn register(&self, session: StationSession) -> Result<(), GameError> {
        self.send(ControlEvent::Register(session))
    }

    /// Report that a station's connection ended.
    pub fn unregister(&self, id: StationId, connection: ConnectionId) -> Result<(), GameError> {
        self.send(ControlEvent::Unregister { id, connection })
    }

    /// Report a button press.
    pub fn button_pressed(&self, id: StationId, connection: ConnectionId) -> Result<(), GameError> {
        self.send(ControlEvent::ButtonPressed { id, connection })
    }

    /// Report a button release.
    pub fn button_released(
        &self,
        id: StationId,
        connection: ConnectionId,
    ) -> Result<(), GameError> {
        self.send(ControlEvent::ButtonReleased { id, connection })
    }

    /// Ask the actor for a copy of the game state.
    pub async fn snapshot(&self) -> Result<GameSnapshot, GameError> {
        let (reply, response) = oneshot::channel();
        self.send(ControlEvent::Snapshot(reply))?;
        response.await.map_err(|_| GameError::Stopped)
    }
}

/// Start the game actor.
///
/// The returned task only completes when an invariant violation stops the game.
pub fn spawn(config: Arc<GameConfig>) -> (GameHandle, JoinHandle<Result<(), GameError>>) {
    let (events, inbox) = mpsc::unbounded_channel();
    let game = Game::new(config, events.clone());
    let task = tokio::spawn(run(game, inbox));
    (GameHandle { events }, task)
}

/// Apply events one at a time until the queue closes or the game breaks.
pub async fn run(
    mut game: Game,
    mut inbox: mpsc::UnboundedReceiver<ControlEvent>,
) -> Result<(), GameError> {
    info!("game actor started");
    while let Some(event) = inbox.recv().await {
        if let Err(err) = game.handle(event) {
            error!(error = %err, snapshot = ?game.snapshot(), "game actor stopped");
            return Err(err);
        }
    }
    info!("game actor finished");
    Ok(())
}
