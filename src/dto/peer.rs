//! Replies exchanged between game-master instances on the peer port.
//!
//! The encoding is deliberately minimal: the status code carries the verdict
//! and the plain-text body carries a single value (an address or a priority),
//! terminated by a newline.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::error::PeerError;

/// Answer given by a peer to `/alive`, `/gamemaster` or `/request_gamemaster`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerReply {
    /// The peer does not object; carries its best-known leader address, if any.
    Ok {
        /// Leader address known to the peer.
        leader: Option<String>,
    },
    /// The peer is contending for leadership with the given priority.
    Conflict {
        /// Priority of the contending peer.
        priority: i64,
    },
    /// The peer is the leader; carries its own address.
    Redirect {
        /// Address of the leader.
        leader: String,
    },
}

impl PeerReply {
    /// Decode a reply from the status code and body of an HTTP response.
    pub fn decode(status: StatusCode, body: &str) -> Result<Self, PeerError> {
        let body = body.trim();
        match status {
            StatusCode::OK => Ok(PeerReply::Ok {
                leader: (!body.is_empty()).then(|| body.to_string()),
            }),
            StatusCode::CONFLICT => body
                .parse()
                .map(|priority| PeerReply::Conflict { priority })
                .map_err(|_| PeerError::InvalidBody(body.to_string())),
            StatusCode::FOUND if !body.is_empty() => Ok(PeerReply::Redirect {
                leader: body.to_string(),
            }),
            StatusCode::FOUND => Err(PeerError::InvalidBody(body.to_string())),
            other => Err(PeerError::UnexpectedStatus(other)),
        }
    }
}

impl IntoResponse for PeerReply {
    fn into_response(self) -> Response {
        match self {
            PeerReply::Ok { leader } => {
                (StatusCode::OK, format!("{}\n", leader.unwrap_or_default())).into_response()
            }
            PeerReply::Conflict { priority } => {
                (StatusCode::CONFLICT, format!("{priority}\n")).into_response()
            }
            PeerReply::Redirect { leader } => {
                (StatusCode::FOUND, format!("{leader}\n")).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_each_verdict() {
        assert_eq!(
            PeerReply::decode(StatusCode::OK, "\n").unwrap(),
            PeerReply::Ok { leader: None }
        );
        assert_eq!(
            PeerReply::decode(StatusCode::OK, "gm-2:8002\n").unwrap(),
            PeerReply::Ok {
                leader: Some("gm-2:8002".into())
            }
        );
        assert_eq!(
            PeerReply::decode(StatusCode::CONFLICT, "9\n").unwrap(),
            PeerReply::Conflict { priority: 9 }
        );
        assert_eq!(
            PeerReply::decode(StatusCode::FOUND, "gm-1:8002\n").unwrap(),
            PeerReply::Redirect {
                leader: "gm-1:8002".into()
            }
        );
    }

    #[test]
    fn rejects_malformed_replies() {
        assert!(matches!(
            PeerReply::decode(StatusCode::CONFLICT, "high"),
            Err(PeerError::InvalidBody(_))
        ));
        assert!(matches!(
            PeerReply::decode(StatusCode::FOUND, ""),
            Err(PeerError::InvalidBody(_))
        ));
        assert!(matches!(
            PeerReply::decode(StatusCode::NOT_FOUND, ""),
            Err(PeerError::UnexpectedStatus(StatusCode::NOT_FOUND))
        ));
    }
}
