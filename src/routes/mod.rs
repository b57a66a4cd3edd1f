use axum::Router;

use crate::state::SharedState;

pub mod health;
pub mod peer;
pub mod websocket;

/// Routes served on the station port.
pub fn station_router(state: SharedState) -> Router<()> {
    websocket::router().with_state(state)
}

/// Routes served on the peer port.
pub fn peer_router(state: SharedState) -> Router<()> {
    peer::router().merge(health::router()).with_state(state)
}
