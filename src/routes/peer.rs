use axum::{Router, extract::State, routing::get};

use crate::{dto::peer::PeerReply, state::SharedState};

/// `/alive` and `/gamemaster`: who leads?
pub async fn leader_query(State(state): State<SharedState>) -> PeerReply {
    state
        .election()
        .leader_query_reply(&state.settings().advertised_addr)
}

/// `/request_gamemaster`: may the caller lead?
pub async fn leadership_request(State(state): State<SharedState>) -> PeerReply {
    let settings = state.settings();
    state
        .election()
        .leadership_request_reply(&settings.advertised_addr, settings.priority)
}

/// Configure the peer election routes.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/alive", get(leader_query))
        .route("/gamemaster", get(leader_query))
        .route("/request_gamemaster", get(leadership_request))
}
