use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use tracing::info;

use crate::{error::AppError, services::websocket_service, state::SharedState};

/// Upgrade a station connection, or send the station to the leader.
///
/// Only the leader runs a game; other instances answer with a temporary
/// redirect to the leader's station port, or `503` while no leader is known.
pub async fn ws_handler(
    State(state): State<SharedState>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    if let Some(game) = state.game().await {
        let shared_state = state.clone();
        return Ok(ws
            .on_upgrade(move |socket| websocket_service::handle_socket(shared_state, game, socket))
            .into_response());
    }

    let election = state.election();
    match election.known_leader {
        Some(leader) if leader != state.settings().advertised_addr => {
            let location = state.settings().station_url_for(&leader);
            info!(%location, "redirecting station to leader");
            Ok(Redirect::temporary(&location).into_response())
        }
        _ => Err(AppError::ServiceUnavailable(
            "no game-master is leading yet".into(),
        )),
    }
}

/// Configure the station WebSocket endpoint.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/ws", get(ws_handler))
}
