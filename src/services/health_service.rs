use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Build the health payload, asking the game for a snapshot when leading.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let game = match state.game().await {
        Some(game) => match game.snapshot().await {
            Ok(snapshot) => Some(snapshot.into()),
            Err(err) => {
                warn!(error = %err, "game snapshot unavailable");
                None
            }
        },
        None => None,
    };

    HealthResponse::new(state.election(), game)
}
