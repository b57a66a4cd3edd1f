//! Leader election between game-master instances.
//!
//! [`ElectionState`] holds the pure verdict logic; the I/O lives in
//! `services::election_service`. The rest of the process only ever sees the
//! published [`ElectionStatus`].

use serde::Serialize;
use tracing::{debug, info};

use crate::dto::peer::PeerReply;

/// Phases of the election.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ElectionPhase {
    /// Looking for an existing leader.
    Initial,
    /// No leader found; contending with the other instances.
    Intent,
    /// This instance runs the game.
    Leader,
    /// Another instance leads or outranks us.
    Deferred,
}

/// Election outcome published to the HTTP handlers and the game supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionStatus {
    /// Current phase.
    pub phase: ElectionPhase,
    /// Best-known leader address; our own address while leading.
    pub known_leader: Option<String>,
}

impl ElectionStatus {
    /// Status of a freshly started instance.
    pub fn initial() -> Self {
        Self {
            phase: ElectionPhase::Initial,
            known_leader: None,
        }
    }

    /// Whether this instance is the leader.
    pub fn is_leader(&self) -> bool {
        self.phase == ElectionPhase::Leader
    }

    /// Reply to `/alive` and `/gamemaster`.
    pub fn leader_query_reply(&self, own_addr: &str) -> PeerReply {
        match self.phase {
            ElectionPhase::Leader => PeerReply::Redirect {
                leader: own_addr.to_string(),
            },
            _ => PeerReply::Ok {
                leader: self.known_leader.clone(),
            },
        }
    }

    /// Reply to `/request_gamemaster`.
    pub fn leadership_request_reply(&self, own_addr: &str, priority: i64) -> PeerReply {
        match self.phase {
            ElectionPhase::Initial | ElectionPhase::Deferred => PeerReply::Ok {
                leader: self.known_leader.clone(),
            },
            ElectionPhase::Intent => PeerReply::Conflict { priority },
            ElectionPhase::Leader => PeerReply::Redirect {
                leader: own_addr.to_string(),
            },
        }
    }
}

/// One peer's answer to a probe; `None` when the peer was unreachable or answered garbage.
pub type PeerVote = (String, Option<PeerReply>);

/// Election state machine of this instance.
#[derive(Debug, Clone)]
pub struct ElectionState {
    own_addr: String,
    priority: i64,
    phase: ElectionPhase,
    known_leader: Option<String>,
}

impl ElectionState {
    /// Start in [`ElectionPhase::Initial`].
    pub fn new(own_addr: impl Into<String>, priority: i64) -> Self {
        Self {
            own_addr: own_addr.into(),
            priority,
            phase: ElectionPhase::Initial,
            known_leader: None,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> ElectionPhase {
        self.phase
    }

    /// Best-known leader address.
    pub fn known_leader(&self) -> Option<&str> {
        self.known_leader.as_deref()
    }

    /// Snapshot for publication.
    pub fn status(&self) -> ElectionStatus {
        ElectionStatus {
            phase: self.phase,
            known_leader: self.known_leader.clone(),
        }
    }

    /// Apply the answers to "who is the leader?".
    pub fn apply_discovery(&mut self, votes: &[PeerVote]) -> ElectionPhase {
        match first_redirect(votes) {
            Some(leader) => {
                self.known_leader = Some(leader.to_string());
                self.set_phase(ElectionPhase::Deferred);
            }
            None => self.set_phase(ElectionPhase::Intent),
        }
        self.phase
    }

    /// Apply the answers to "may I become leader?".
    ///
    /// Yields to a peer already leading or contending with a priority at least
    /// equal to ours; unreachable peers do not object.
    pub fn apply_contention(&mut self, votes: &[PeerVote]) -> ElectionPhase {
        if let Some(leader) = first_redirect(votes) {
            self.known_leader = Some(leader.to_string());
            self.set_phase(ElectionPhase::Deferred);
            return self.phase;
        }

        let outranked_by = votes.iter().find_map(|(peer, reply)| match reply {
            Some(PeerReply::Conflict { priority }) if *priority >= self.priority => {
                Some((peer, *priority))
            }
            _ => None,
        });
        match outranked_by {
            Some((peer, priority)) => {
                info!(%peer, priority, own = self.priority, "outranked by contending peer");
                self.set_phase(ElectionPhase::Deferred);
            }
            None => {
                self.known_leader = Some(self.own_addr.clone());
                self.set_phase(ElectionPhase::Leader);
            }
        }
        self.phase
    }

    /// The followed leader moved: remember the new address.
    pub fn follow(&mut self, leader: String) {
        if self.known_leader.as_deref() != Some(leader.as_str()) {
            info!(%leader, "following new leader");
            self.known_leader = Some(leader);
        }
    }

    /// Go back to discovery after losing track of the leader.
    pub fn restart(&mut self) {
        self.known_leader = None;
        self.set_phase(ElectionPhase::Initial);
    }

    fn set_phase(&mut self, next: ElectionPhase) {
        if self.phase == next {
            debug!(phase = ?next, "election phase unchanged");
            return;
        }
        info!(from = ?self.phase, to = ?next, leader = ?self.known_leader, "election transition");
        self.phase = next;
    }
}

fn first_redirect(votes: &[PeerVote]) -> Option<&str> {
    votes.iter().find_map(|(_, reply)| match reply {
        Some(PeerReply::Redirect { leader }) => Some(leader.as_str()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conflicts(priorities: &[i64]) -> Vec<PeerVote> {
        priorities
            .iter()
            .enumerate()
            .map(|(n, priority)| {
                (
                    format!("gm-{n}:8002"),
                    Some(PeerReply::Conflict {
                        priority: *priority,
                    }),
                )
            })
            .collect()
    }

    fn contend(own_priority: i64, votes: &[PeerVote]) -> ElectionState {
        let mut state = ElectionState::new("gm-self:8002", own_priority);
        assert_eq!(state.apply_discovery(&[]), ElectionPhase::Intent);
        state.apply_contention(votes);
        state
    }

    #[test]
    fn higher_contending_peer_forces_deferral() {
        let state = contend(7, &conflicts(&[5, 3, 9]));
        assert_eq!(state.phase(), ElectionPhase::Deferred);
        assert_eq!(state.known_leader(), None);
    }

    #[test]
    fn outranking_every_contender_wins() {
        let state = contend(10, &conflicts(&[5, 3, 9]));
        assert_eq!(state.phase(), ElectionPhase::Leader);
        assert_eq!(state.known_leader(), Some("gm-self:8002"));
    }

    #[test]
    fn equal_priority_yields() {
        let state = contend(9, &conflicts(&[9]));
        assert_eq!(state.phase(), ElectionPhase::Deferred);
    }

    #[test]
    fn unreachable_peers_do_not_object() {
        let votes = vec![
            ("gm-1:8002".to_string(), None),
            ("gm-2:8002".to_string(), Some(PeerReply::Ok { leader: None })),
        ];
        assert_eq!(contend(1, &votes).phase(), ElectionPhase::Leader);
    }

    #[test]
    fn existing_leader_is_followed() {
        let mut state = ElectionState::new("gm-self:8002", 100);
        let votes = vec![
            ("gm-1:8002".to_string(), Some(PeerReply::Ok { leader: None })),
            (
                "gm-2:8002".to_string(),
                Some(PeerReply::Redirect {
                    leader: "gm-2:8002".into(),
                }),
            ),
        ];
        assert_eq!(state.apply_discovery(&votes), ElectionPhase::Deferred);
        assert_eq!(state.known_leader(), Some("gm-2:8002"));

        state.restart();
        assert_eq!(state.status(), ElectionStatus::initial());
    }

    #[test]
    fn replies_follow_the_phase() {
        let mut status = ElectionStatus::initial();
        assert_eq!(
            status.leadership_request_reply("me:8002", 4),
            PeerReply::Ok { leader: None }
        );

        status.phase = ElectionPhase::Intent;
        assert_eq!(
            status.leadership_request_reply("me:8002", 4),
            PeerReply::Conflict { priority: 4 }
        );
        assert_eq!(
            status.leader_query_reply("me:8002"),
            PeerReply::Ok { leader: None }
        );

        status.phase = ElectionPhase::Leader;
        let redirect = PeerReply::Redirect {
            leader: "me:8002".into(),
        };
        assert_eq!(status.leadership_request_reply("me:8002", 4), redirect);
        assert_eq!(status.leader_query_reply("me:8002"), redirect);

        status = ElectionStatus {
            phase: ElectionPhase::Deferred,
            known_leader: Some("gm-2:8002".into()),
        };
        assert_eq!(
            status.leader_query_reply("me:8002"),
            PeerReply::Ok {
                leader: Some("gm-2:8002".into())
            }
        );
    }
}
