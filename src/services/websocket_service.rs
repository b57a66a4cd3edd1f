use std::{sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::ws::{Message, WebSocket},
};
use futures::{StreamExt, stream::SplitStream};
use tokio::{
    task::JoinHandle,
    time::{MissedTickBehavior, timeout},
};
use tracing::{debug, info, warn};

use crate::{
    dto::station::StationMessage,
    error::GameError,
    services::{
        command_channel::{CommandChannel, spawn_writer},
        game_service::GameHandle,
    },
    state::{
        SharedState,
        station::{ConnectionId, LatencyGauge, StationId, StationSession},
    },
};

const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);
const PING_INTERVAL: Duration = Duration::from_secs(5);
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Handle the full lifecycle of one station WebSocket connection.
///
/// The first frame must be a `REGISTER`; afterwards button events are forwarded
/// to the game until the station unregisters or the socket ends, which both
/// unregister the station.
pub async fn handle_socket(state: SharedState, game: GameHandle, socket: WebSocket) {
    let connection = ConnectionId::new();
    let (sender, mut receiver) = socket.split();
    let (channel, outbound) = CommandChannel::new();
    let latency = Arc::new(LatencyGauge::default());

    // Dedicated writer task keeps commands flowing even while we await inbound frames.
    let writer = spawn_writer(sender, outbound, latency.clone());

    let station_id = match timeout(REGISTER_TIMEOUT, await_registration(&mut receiver)).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            let _ = channel.control(Message::Close(None));
            finalize(writer, channel).await;
            return;
        }
        Err(_) => {
            warn!(%connection, "station registration timed out");
            finalize(writer, channel).await;
            return;
        }
    };

    let session = StationSession::new(
        station_id,
        connection,
        channel.clone(),
        latency.clone(),
        state.clock(),
    );
    if let Err(err) = game.register(session) {
        warn!(station = %station_id, error = %err, "cannot register station");
        let _ = channel.control(Message::Close(None));
        finalize(writer, channel).await;
        return;
    }
    info!(station = %station_id, %connection, "station connected");

    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ping.tick() => {
                if channel.control(Message::Ping(Bytes::new())).is_err() {
                    info!(station = %station_id, "writer closed; dropping station");
                    break;
                }
            }
            message = receiver.next() => {
                let Some(message) = message else {
                    break;
                };
                match message {
                    Ok(Message::Text(text)) => {
                        debug!(station = %station_id, payload = %text.as_str(), "received station message");
                        match StationMessage::from_json_str(text.as_str()) {
                            Ok(StationMessage::ButtonPressed) => {
                                if let Err(err) = game.button_pressed(station_id, connection) {
                                    game_gone(station_id, &err);
                                    break;
                                }
                            }
                            Ok(StationMessage::ButtonReleased) => {
                                if let Err(err) = game.button_released(station_id, connection) {
                                    game_gone(station_id, &err);
                                    break;
                                }
                            }
                            Ok(StationMessage::Unregister) => {
                                info!(station = %station_id, "station unregistered");
                                break;
                            }
                            Ok(StationMessage::Register { id }) => {
                                warn!(station = %station_id, %id, "ignoring duplicate registration");
                            }
                            Ok(StationMessage::Unknown) => {
                                warn!(station = %station_id, payload = %text.as_str(), "ignoring unknown station message");
                            }
                            Err(err) => {
                                warn!(station = %station_id, error = %err, "failed to parse station message");
                            }
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        if let Some(rtt) = latency.pong_received() {
                            debug!(station = %station_id, ?rtt, "station latency");
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        let _ = channel.control(Message::Pong(payload));
                    }
                    Ok(Message::Close(frame)) => {
                        info!(station = %station_id, "station closed connection");
                        let _ = channel.control(Message::Close(frame));
                        break;
                    }
                    Ok(Message::Binary(_)) => {}
                    Err(err) => {
                        warn!(station = %station_id, error = %err, "websocket error");
                        break;
                    }
                }
            }
        }
    }

    if let Err(err) = game.unregister(station_id, connection) {
        debug!(station = %station_id, error = %err, "game already stopped");
    }
    info!(station = %station_id, %connection, "station disconnected");

    finalize(writer, channel).await;
}

/// Wait for the `REGISTER` frame and parse the station id it carries.
async fn await_registration(receiver: &mut SplitStream<WebSocket>) -> Option<StationId> {
    loop {
        match receiver.next().await? {
            Ok(Message::Text(text)) => {
                return match StationMessage::from_json_str(text.as_str()) {
                    Ok(StationMessage::Register { id }) => match id.parse() {
                        Ok(station_id) => Some(station_id),
                        Err(err) => {
                            warn!(error = %err, "rejecting station");
                            None
                        }
                    },
                    Ok(other) => {
                        warn!(message = ?other, "first station message was not REGISTER");
                        None
                    }
                    Err(err) => {
                        warn!(error = %err, "failed to parse station message");
                        None
                    }
                };
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Ok(Message::Close(_)) => return None,
            Ok(Message::Binary(_)) => {
                warn!("binary frame before registration");
                return None;
            }
            Err(err) => {
                warn!(error = %err, "websocket receive error");
                return None;
            }
        }
    }
}

fn game_gone(station_id: StationId, err: &GameError) {
    warn!(station = %station_id, error = %err, "game unavailable; closing station connection");
}

/// Give the writer a moment to flush what is queued, then stop it.
async fn finalize(mut writer: JoinHandle<()>, channel: CommandChannel) {
    drop(channel);
    if timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }
}
