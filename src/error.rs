use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;

/// Failures raised by the game actor.
///
/// These indicate the single-writer assumptions around the game state have been
/// broken and are never recovered from.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GameError {
    /// A game-state invariant no longer holds.
    #[error("game invariant violated: {0}")]
    InvariantViolation(String),
    /// The game actor is no longer running.
    #[error("game actor stopped")]
    Stopped,
}

/// Failures when queueing a command for a station.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Writer side of the station connection is gone.
    #[error("station connection closed")]
    Closed,
    /// Command could not be serialized (bug in the command construction).
    #[error("failed to encode station command")]
    Encode(#[from] serde_json::Error),
}

/// Failures while talking to a peer game-master.
///
/// The election treats every variant the same way: the peer is absent.
#[derive(Debug, Error)]
pub enum PeerError {
    /// The HTTP request could not be completed (timeout, refused, reset).
    #[error("peer request failed")]
    Request(#[from] reqwest::Error),
    /// The peer answered with a status code outside the protocol.
    #[error("unexpected peer status {0}")]
    UnexpectedStatus(StatusCode),
    /// The peer answered with a body that could not be decoded.
    #[error("invalid peer reply body `{0}`")]
    InvalidBody(String),
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Station traffic reached an instance that is not leading.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}
