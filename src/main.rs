//! Game-master binary: elects a leader among its peers and, when leading, runs the station game.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gamemaster::{
    clock::Clock,
    config::{GameConfig, Settings},
    routes,
    services::{election_service::ElectionDriver, game_service, peer_client::HttpPeerTransport},
    state::{AppState, SharedState, election::ElectionStatus},
};

fn main() -> anyhow::Result<()> {
    // The local offset can only be read while the process is single-threaded.
    let clock = Clock::local();
    init_tracing();

    let settings = Settings::from_env().context("reading settings")?;
    let config = Arc::new(GameConfig::load());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building runtime")?;
    runtime.block_on(serve(settings, config, clock))
}

async fn serve(settings: Settings, config: Arc<GameConfig>, clock: Clock) -> anyhow::Result<()> {
    let transport = HttpPeerTransport::new(config.timings.peer_probe_timeout)
        .context("building peer client")?;
    let (driver, election) = ElectionDriver::new(&settings, &config.timings, transport);
    let settings = Arc::new(settings);
    let state = AppState::new(settings.clone(), clock, election);

    tokio::spawn(driver.run());

    let peer_addr = SocketAddr::new(settings.bind, settings.peer_port);
    let game_addr = SocketAddr::new(settings.bind, settings.game_port);
    info!(
        %peer_addr,
        %game_addr,
        advertised = %settings.advertised_addr,
        priority = settings.priority,
        peers = ?settings.peers,
        "starting game-master"
    );

    let peer_listener = TcpListener::bind(peer_addr)
        .await
        .context("binding peer listener")?;
    let game_listener = TcpListener::bind(game_addr)
        .await
        .context("binding station listener")?;

    let peer_server = axum::serve(
        peer_listener,
        build_router(routes::peer_router(state.clone())).into_make_service(),
    )
    .with_graceful_shutdown(shutdown_signal());
    let game_server = axum::serve(
        game_listener,
        build_router(routes::station_router(state.clone())).into_make_service(),
    )
    .with_graceful_shutdown(shutdown_signal());

    let servers = async {
        tokio::try_join!(
            async { peer_server.await.context("serving peer port") },
            async { game_server.await.context("serving station port") },
        )
        .map(|_| ())
    };

    tokio::select! {
        result = servers => result,
        result = run_game_supervisor(state, config) => result,
    }
}

/// Start the game the first time this instance becomes leader and watch it.
///
/// A broken game invariant ends the process with an error.
async fn run_game_supervisor(state: SharedState, config: Arc<GameConfig>) -> anyhow::Result<()> {
    let mut election = state.election_watcher();
    election
        .wait_for(ElectionStatus::is_leader)
        .await
        .context("election driver stopped")?;

    let (game, task) = game_service::spawn(config);
    state.install_game(game).await;
    info!("leading; accepting stations");

    match task.await {
        Ok(Ok(())) => {
            info!("game finished");
            Ok(())
        }
        Ok(Err(err)) => Err(err).context("game stopped"),
        Err(err) => Err(err).context("game task failed"),
    }
}

/// Attach cross-cutting middleware layers.
fn build_router(router: Router<()>) -> Router<()> {
    router.layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
