use std::{
    net::{IpAddr, Ipv4Addr},
    sync::Arc,
    time::Duration,
};

use gamemaster::{
    clock::Clock,
    config::{GameConfig, Settings},
    dto::peer::PeerReply,
    routes,
    services::{
        election_service::ElectionDriver,
        peer_client::{HttpPeerTransport, PeerTransport},
    },
    state::{
        AppState, SharedState,
        election::{ElectionPhase, ElectionStatus},
    },
};
use reqwest::{StatusCode, header, redirect};
use tokio::{net::TcpListener, sync::watch, time::timeout};

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

fn settings(addr: &str, priority: i64, peers: &[&str]) -> Settings {
    Settings {
        advertised_addr: addr.to_string(),
        priority,
        peers: peers.iter().map(|p| p.to_string()).collect(),
        bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
        game_port: 18001,
        peer_port: 8002,
    }
}

fn serve(listener: TcpListener, app: axum::Router) {
    tokio::spawn(async move { axum::serve(listener, app).await });
}

/// Instance with a hand-driven election status.
async fn scripted_instance(
    priority: i64,
) -> (String, SharedState, watch::Sender<ElectionStatus>) {
    let (listener, addr) = bind().await;
    let (status, election) = watch::channel(ElectionStatus::initial());
    let state = AppState::new(
        Arc::new(settings(&addr, priority, &[])),
        Clock::utc(),
        election,
    );
    serve(listener, routes::peer_router(state.clone()));
    (addr, state, status)
}

/// Instance running the real election driver.
fn elected_instance(listener: TcpListener, settings: Settings) -> SharedState {
    let config = GameConfig::default();
    let transport = HttpPeerTransport::new(config.timings.peer_probe_timeout).unwrap();
    let (driver, election) = ElectionDriver::new(&settings, &config.timings, transport);
    let state = AppState::new(Arc::new(settings), Clock::utc(), election);
    tokio::spawn(driver.run());
    serve(listener, routes::peer_router(state.clone()));
    state
}

fn transport() -> HttpPeerTransport {
    HttpPeerTransport::new(Duration::from_secs(1)).unwrap()
}

#[tokio::test]
async fn peer_routes_answer_according_to_the_election_phase() {
    let (addr, _state, status) = scripted_instance(4).await;
    let peers = transport();

    assert_eq!(
        peers.leader_query(&addr).await.unwrap(),
        PeerReply::Ok { leader: None }
    );
    assert_eq!(
        peers.leadership_request(&addr).await.unwrap(),
        PeerReply::Ok { leader: None }
    );

    status.send_replace(ElectionStatus {
        phase: ElectionPhase::Intent,
        known_leader: None,
    });
    assert_eq!(
        peers.leadership_request(&addr).await.unwrap(),
        PeerReply::Conflict { priority: 4 }
    );

    status.send_replace(ElectionStatus {
        phase: ElectionPhase::Leader,
        known_leader: Some(addr.clone()),
    });
    let leading = PeerReply::Redirect {
        leader: addr.clone(),
    };
    assert_eq!(peers.leader_query(&addr).await.unwrap(), leading);
    assert_eq!(peers.leadership_request(&addr).await.unwrap(), leading);

    let client = reqwest::Client::builder()
        .redirect(redirect::Policy::none())
        .build()
        .unwrap();
    let alive = client
        .get(format!("http://{addr}/alive"))
        .send()
        .await
        .unwrap();
    assert_eq!(alive.status(), StatusCode::FOUND);
    assert_eq!(alive.text().await.unwrap(), format!("{addr}\n"));
}

#[tokio::test]
async fn healthcheck_reports_the_election() {
    let (addr, _state, status) = scripted_instance(1).await;
    status.send_replace(ElectionStatus {
        phase: ElectionPhase::Deferred,
        known_leader: Some("10.0.0.9:8002".into()),
    });

    let body = reqwest::get(format!("http://{addr}/healthcheck"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let health: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["election"], "deferred");
    assert_eq!(health["leader"], "10.0.0.9:8002");
    assert!(health.get("game").is_none());
}

#[tokio::test]
async fn unreachable_peer_is_reported_as_an_error() {
    let (listener, addr) = bind().await;
    drop(listener);
    assert!(transport().leader_query(&addr).await.is_err());
}

#[tokio::test]
async fn stations_are_sent_to_the_leader() {
    let (_peer_addr, state, status) = scripted_instance(1).await;
    let (station_listener, station_addr) = bind().await;
    serve(station_listener, routes::station_router(state));

    let client = reqwest::Client::builder()
        .redirect(redirect::Policy::none())
        .build()
        .unwrap();
    let upgrade = || {
        client
            .get(format!("http://{station_addr}/ws"))
            .header(header::CONNECTION, "upgrade")
            .header(header::UPGRADE, "websocket")
            .header(header::SEC_WEBSOCKET_VERSION, "13")
            .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
    };

    let response = upgrade().send().await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    status.send_replace(ElectionStatus {
        phase: ElectionPhase::Deferred,
        known_leader: Some("10.0.0.9:8002".into()),
    });
    let response = upgrade().send().await.unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers()[header::LOCATION],
        "ws://10.0.0.9:18001/ws"
    );
}

#[tokio::test]
async fn late_instance_follows_the_existing_leader() {
    let (first_listener, first_addr) = bind().await;
    let (late_listener, late_addr) = bind().await;

    let first = elected_instance(first_listener, settings(&first_addr, 1, &[&late_addr]));
    let mut first_watch = first.election_watcher();
    timeout(
        Duration::from_secs(10),
        first_watch.wait_for(ElectionStatus::is_leader),
    )
    .await
    .expect("first instance never led")
    .unwrap();

    // A higher priority does not unseat a running leader.
    let late = elected_instance(late_listener, settings(&late_addr, 5, &[&first_addr]));
    let mut late_watch = late.election_watcher();
    timeout(
        Duration::from_secs(10),
        late_watch.wait_for(|status| {
            status.phase == ElectionPhase::Deferred
                && status.known_leader.as_deref() == Some(first_addr.as_str())
        }),
    )
    .await
    .expect("late instance never followed")
    .unwrap();

    assert!(first.election().is_leader());
    assert_eq!(
        transport().leader_query(&late_addr).await.unwrap(),
        PeerReply::Ok {
            leader: Some(first_addr.clone())
        }
    );
}
