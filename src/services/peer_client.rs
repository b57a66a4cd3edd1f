//! Outbound half of the peer protocol.

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::{Client, redirect};

use crate::{dto::peer::PeerReply, error::PeerError};

/// Transport used by the election to question peers.
pub trait PeerTransport: Send + Sync {
    /// Ask `peer` (`host:port`) who the leader is (`/gamemaster`).
    fn leader_query(&self, peer: &str) -> BoxFuture<'static, Result<PeerReply, PeerError>>;
    /// Ask `peer` whether this instance may lead (`/request_gamemaster`).
    fn leadership_request(&self, peer: &str)
    -> BoxFuture<'static, Result<PeerReply, PeerError>>;
}

/// Plain HTTP transport with a short per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpPeerTransport {
    client: Client,
}

impl HttpPeerTransport {
    /// Build a client; redirects are part of the protocol and must not be followed.
    pub fn new(timeout: Duration) -> Result<Self, PeerError> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }

    fn get(&self, peer: &str, route: &'static str) -> BoxFuture<'static, Result<PeerReply, PeerError>> {
        let client = self.client.clone();
        let url = format!("http://{peer}/{route}");
        Box::pin(async move {
            let response = client.get(&url).send().await?;
            let status = response.status();
            let body = response.text().await?;
            PeerReply::decode(status, &body)
        })
    }
}

impl PeerTransport for HttpPeerTransport {
    fn leader_query(&self, peer: &str) -> BoxFuture<'static, Result<PeerReply, PeerError>> {
        self.get(peer, "gamemaster")
    }

    fn leadership_request(
        &self,
        peer: &str,
    ) -> BoxFuture<'static, Result<PeerReply, PeerError>> {
        self.get(peer, "request_gamemaster")
    }
}
