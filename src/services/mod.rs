/// Per-station outbound command queue.
pub mod command_channel;
/// Leader election driver.
pub mod election_service;
/// Sequential game actor.
pub mod game_service;
/// Health check service.
pub mod health_service;
/// HTTP client for the peer protocol.
pub mod peer_client;
/// Station WebSocket connection handling.
pub mod websocket_service;
