//! Drives the election state machine against the peers.

use std::time::Duration;

use futures::future::join_all;
use rand::{Rng, SeedableRng, rngs::StdRng};
use tokio::{sync::watch, time::sleep};
use tracing::{debug, info, warn};

use crate::{
    config::{Settings, Timings},
    dto::peer::PeerReply,
    services::peer_client::PeerTransport,
    state::election::{ElectionPhase, ElectionState, ElectionStatus, PeerVote},
};

const BACKOFF_MIN_MS: u64 = 500;
const BACKOFF_MAX_MS: u64 = 1500;

#[derive(Debug, Clone, Copy)]
enum Probe {
    LeaderQuery,
    LeadershipRequest,
}

/// Owns the election state and publishes every change on a watch channel.
pub struct ElectionDriver<T> {
    state: ElectionState,
    peers: Vec<String>,
    transport: T,
    status: watch::Sender<ElectionStatus>,
    follow_interval: Duration,
    rng: StdRng,
}

impl<T: PeerTransport> ElectionDriver<T> {
    /// Create a driver for this instance and the receiver observing its status.
    pub fn new(
        settings: &Settings,
        timings: &Timings,
        transport: T,
    ) -> (Self, watch::Receiver<ElectionStatus>) {
        let (status, receiver) = watch::channel(ElectionStatus::initial());
        let driver = Self {
            state: ElectionState::new(settings.advertised_addr.clone(), settings.priority),
            peers: settings.peers.clone(),
            transport,
            status,
            follow_interval: timings.leader_follow_interval,
            rng: StdRng::from_os_rng(),
        };
        (driver, receiver)
    }

    /// Run one transition of the election; a leader stays put.
    pub async fn step(&mut self) -> ElectionPhase {
        match self.state.phase() {
            ElectionPhase::Initial => {
                let votes = self.poll(Probe::LeaderQuery).await;
                self.state.apply_discovery(&votes);
            }
            ElectionPhase::Intent => {
                let votes = self.poll(Probe::LeadershipRequest).await;
                self.state.apply_contention(&votes);
            }
            ElectionPhase::Leader => {}
            ElectionPhase::Deferred => {
                self.follow_leader().await;
                self.back_off().await;
                self.state.restart();
            }
        }
        self.publish();
        self.state.phase()
    }

    /// Run the election until leadership is acquired, then hold it.
    pub async fn run(mut self) {
        self.publish();
        loop {
            if self.state.phase() == ElectionPhase::Leader {
                info!("leadership acquired");
                std::future::pending::<()>().await;
            }
            self.step().await;
        }
    }

    fn publish(&self) {
        self.status.send_replace(self.state.status());
    }

    async fn poll(&self, probe: Probe) -> Vec<PeerVote> {
        let requests = self.peers.iter().map(|peer| {
            let request = match probe {
                Probe::LeaderQuery => self.transport.leader_query(peer),
                Probe::LeadershipRequest => self.transport.leadership_request(peer),
            };
            let peer = peer.clone();
            async move {
                match request.await {
                    Ok(reply) => {
                        debug!(%peer, ?probe, ?reply, "peer replied");
                        (peer, Some(reply))
                    }
                    Err(err) => {
                        debug!(%peer, ?probe, error = %err, "peer absent");
                        (peer, None)
                    }
                }
            }
        });
        join_all(requests).await
    }

    /// Poll the known leader until it stops claiming leadership.
    async fn follow_leader(&mut self) {
        while let Some(leader) = self.state.known_leader().map(str::to_owned) {
            sleep(self.follow_interval).await;
            match self.transport.leader_query(&leader).await {
                Ok(PeerReply::Redirect { leader: current }) => {
                    self.state.follow(current);
                    self.publish();
                }
                Ok(reply) => {
                    info!(%leader, ?reply, "leader stepped down");
                    break;
                }
                Err(err) => {
                    warn!(%leader, error = %err, "lost contact with leader");
                    break;
                }
            }
        }
    }

    async fn back_off(&mut self) {
        let delay = Duration::from_millis(self.rng.random_range(BACKOFF_MIN_MS..=BACKOFF_MAX_MS));
        debug!(?delay, "election back-off");
        sleep(delay).await;
    }
}
