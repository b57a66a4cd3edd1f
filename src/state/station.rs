//! Connected stations and the actuator commands the game sends them.

use std::{
    fmt,
    str::FromStr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use thiserror::Error;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::{
    clock::Clock,
    dto::station::{CommandKind, Effect, Pattern, StationCommand, Timestamp},
    services::command_channel::CommandChannel,
};

/// Fixed delay added to every command so that all stations can receive it in time.
pub const PROPAGATION_MARGIN: Duration = Duration::from_millis(100);

const CORRECT_PRESSED_BUTTON: (u8, u8, u8) = (0, 200, 0);
const CORRECT_PRESSED_MATRIX: (u8, u8, u8) = (0, 128, 0);
const CORRECT_BUTTON: (u8, u8, u8) = (0, 255, 0);
const CORRECT_MATRIX: (u8, u8, u8) = (0, 255, 0);
const WRONG_BUTTON: (u8, u8, u8) = (255, 0, 0);
const WRONG_MATRIX: (u8, u8, u8) = (180, 0, 0);

/// Identifier a station announces in its `REGISTER` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StationId(pub u64);

/// Station id that is not a hexadecimal number.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid station id `{0}`")]
pub struct InvalidStationId(pub String);

impl FromStr for StationId {
    type Err = InvalidStationId;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        u64::from_str_radix(digits, 16)
            .map(StationId)
            .map_err(|_| InvalidStationId(raw.to_string()))
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Identity of one WebSocket connection, distinguishing a reconnecting station's sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Last measured round-trip time of a station connection.
///
/// The writer marks when a ping leaves the socket, the reader closes the
/// measurement on the matching pong, and commands read the result when stamped.
#[derive(Debug, Default)]
pub struct LatencyGauge {
    micros: AtomicU64,
    ping_written: Mutex<Option<Instant>>,
}

impl LatencyGauge {
    /// Store a new round-trip measurement.
    pub fn record(&self, rtt: Duration) {
        let micros = u64::try_from(rtt.as_micros()).unwrap_or(u64::MAX);
        self.micros.store(micros, Ordering::Relaxed);
    }

    /// A ping frame has just been written to the socket.
    pub fn ping_written(&self) {
        if let Ok(mut slot) = self.ping_written.lock() {
            *slot = Some(Instant::now());
        }
    }

    /// Close the outstanding ping measurement, if any, and record it.
    pub fn pong_received(&self) -> Option<Duration> {
        let sent = self.ping_written.lock().ok()?.take()?;
        let rtt = sent.elapsed();
        self.record(rtt);
        Some(rtt)
    }

    /// Latest round-trip measurement, zero until the first pong.
    pub fn latency(&self) -> Duration {
        Duration::from_micros(self.micros.load(Ordering::Relaxed))
    }
}

/// One connected station as seen by the game.
#[derive(Debug)]
pub struct StationSession {
    id: StationId,
    connection: ConnectionId,
    pressed: bool,
    channel: CommandChannel,
    latency: Arc<LatencyGauge>,
    clock: Clock,
}

impl StationSession {
    /// Wrap a freshly registered connection.
    pub fn new(
        id: StationId,
        connection: ConnectionId,
        channel: CommandChannel,
        latency: Arc<LatencyGauge>,
        clock: Clock,
    ) -> Self {
        Self {
            id,
            connection,
            pressed: false,
            channel,
            latency,
            clock,
        }
    }

    /// Station identifier.
    pub fn id(&self) -> StationId {
        self.id
    }

    /// Connection this session arrived on.
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Mirror of the last press/release event.
    pub fn is_pressed(&self) -> bool {
        self.pressed
    }

    /// Update the button mirror.
    pub fn set_pressed(&mut self, pressed: bool) {
        self.pressed = pressed;
    }

    /// Measured round-trip latency of this station.
    pub fn latency(&self) -> Duration {
        self.latency.latency()
    }

    /// Execution time for a command sent now: `now + margin + latency`.
    pub fn target_time(&self) -> Timestamp {
        let at: OffsetDateTime = self.clock.now() + PROPAGATION_MARGIN + self.latency();
        Timestamp(at)
    }

    fn send(&self, command: StationCommand) {
        if let Err(err) = self.channel.enqueue(&command) {
            debug!(station = %self.id, error = %err, "dropping command for departed station");
        }
    }

    /// Start a pattern on the button backlight.
    pub fn start_button_light(&self, pattern: impl Into<Pattern>) {
        self.start_button_light_at(pattern.into(), self.target_time());
    }

    /// Start a pattern on the LED matrix.
    pub fn start_matrix(&self, pattern: impl Into<Pattern>) {
        self.start_matrix_at(pattern.into(), self.target_time());
    }

    /// Play a sound file.
    pub fn play_sound(&self, filename: &str) {
        self.play_sound_at(filename, self.target_time());
    }

    /// Switch the button backlight off.
    pub fn stop_button_light(&self) {
        self.stop_button_light_at(self.target_time());
    }

    /// Switch the LED matrix off.
    pub fn stop_matrix(&self) {
        self.stop_matrix_at(self.target_time());
    }

    /// Stop sound playback.
    pub fn stop_sound(&self) {
        self.stop_sound_at(self.target_time());
    }

    fn start_button_light_at(&self, pattern: Pattern, at: Timestamp) {
        self.send(StationCommand::light(CommandKind::ButtonLed, pattern, at));
    }

    fn start_matrix_at(&self, pattern: Pattern, at: Timestamp) {
        self.send(StationCommand::light(CommandKind::MatrixLed, pattern, at));
    }

    fn play_sound_at(&self, filename: &str, at: Timestamp) {
        self.send(StationCommand::sound(filename, at));
    }

    fn stop_button_light_at(&self, at: Timestamp) {
        self.send(StationCommand::light_off(CommandKind::ButtonLed, at));
    }

    fn stop_matrix_at(&self, at: Timestamp) {
        self.send(StationCommand::light_off(CommandKind::MatrixLed, at));
    }

    fn stop_sound_at(&self, at: Timestamp) {
        self.send(StationCommand::sound_stop(at));
    }

    /// Round won: rainbow on both lights and a win sound.
    pub fn win(&self, sound: &str) {
        let at = self.target_time();
        self.start_button_light_at(Effect::Colorscroll.into(), at);
        self.start_matrix_at(Effect::Colorscroll.into(), at);
        self.play_sound_at(sound, at);
    }

    /// Round lost: red flash, red swipe and a lose sound.
    pub fn lose(&self, sound: &str) {
        let at = self.target_time();
        self.start_button_light_at(Effect::FlashRed.into(), at);
        self.start_matrix_at(Effect::SwipeRed.into(), at);
        self.play_sound_at(sound, at);
    }

    /// Acknowledge a press of the correct station.
    pub fn correct_pressed(&self, sound: &str) {
        let at = self.target_time();
        self.start_button_light_at(CORRECT_PRESSED_BUTTON.into(), at);
        self.start_matrix_at(CORRECT_PRESSED_MATRIX.into(), at);
        self.play_sound_at(sound, at);
    }

    /// Mark this station as the one to press.
    pub fn correct(&self) {
        let at = self.target_time();
        self.start_button_light_at(CORRECT_BUTTON.into(), at);
        self.start_matrix_at(CORRECT_MATRIX.into(), at);
    }

    /// Mark this station as the one to avoid.
    pub fn wrong(&self) {
        let at = self.target_time();
        self.start_button_light_at(WRONG_BUTTON.into(), at);
        self.start_matrix_at(WRONG_MATRIX.into(), at);
    }

    /// Clear every actuator.
    pub fn stop_all(&self) {
        let at = self.target_time();
        self.stop_button_light_at(at);
        self.stop_matrix_at(at);
        self.stop_sound_at(at);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::extract::ws::Message;
    use serde_json::Value;
    use tokio::sync::mpsc;

    use super::*;

    /// Session wired to a receiver the test can inspect.
    pub(crate) fn session(id: u64) -> (StationSession, mpsc::UnboundedReceiver<Message>) {
        let (channel, rx) = CommandChannel::new();
        let session = StationSession::new(
            StationId(id),
            ConnectionId::new(),
            channel,
            Arc::new(LatencyGauge::default()),
            Clock::utc(),
        );
        (session, rx)
    }

    /// Drain every queued command as JSON.
    pub(crate) fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            if let Message::Text(text) = message {
                out.push(serde_json::from_str(text.as_str()).unwrap());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::{PrimitiveDateTime, macros::format_description};

    use super::{test_support::*, *};

    fn parse_at(value: &serde_json::Value) -> PrimitiveDateTime {
        let format = format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:6]"
        );
        PrimitiveDateTime::parse(value["at"].as_str().unwrap(), format).unwrap()
    }

    #[test]
    fn parses_hex_ids() {
        assert_eq!("1a".parse::<StationId>().unwrap(), StationId(0x1a));
        assert_eq!("0x1A".parse::<StationId>().unwrap(), StationId(0x1a));
        assert_eq!(StationId(0x1a).to_string(), "0x1a");
        assert!("station-1".parse::<StationId>().is_err());
        assert!("".parse::<StationId>().is_err());
    }

    #[test]
    fn composite_burst_shares_one_timestamp() {
        let (session, mut rx) = session(1);
        session.win("sounds/win/win1.wav");

        let commands = drain(&mut rx);
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0]["type"], json!("BUTTON_LED"));
        assert_eq!(commands[0]["pattern"], json!("colorscroll"));
        assert_eq!(commands[1]["type"], json!("MATRIX_LED"));
        assert_eq!(commands[1]["pattern"], json!("colorscroll"));
        assert_eq!(commands[2]["type"], json!("SOUND"));
        assert_eq!(commands[2]["filename"], json!("sounds/win/win1.wav"));
        assert!(commands.iter().all(|c| c["at"] == commands[0]["at"]));
    }

    #[test]
    fn stop_all_clears_every_actuator() {
        let (session, mut rx) = session(1);
        session.stop_all();

        let commands = drain(&mut rx);
        let values: Vec<_> = commands
            .iter()
            .map(|c| (c["type"].clone(), c["value"].clone()))
            .collect();
        assert_eq!(
            values,
            vec![
                (json!("BUTTON_LED"), json!("OFF")),
                (json!("MATRIX_LED"), json!("OFF")),
                (json!("SOUND"), json!("STOP")),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn round_trip_is_timed_from_the_written_ping() {
        let gauge = LatencyGauge::default();
        assert_eq!(gauge.pong_received(), None);

        gauge.ping_written();
        tokio::time::advance(Duration::from_millis(30)).await;
        let rtt = gauge.pong_received().unwrap();
        assert!(rtt >= Duration::from_millis(30));
        assert!(gauge.latency() >= Duration::from_millis(30));

        // A second pong without a new ping changes nothing.
        assert_eq!(gauge.pong_received(), None);
        assert!(gauge.latency() >= Duration::from_millis(30));
    }

    #[test]
    fn target_time_includes_margin_and_latency() {
        let (channel, mut rx) = CommandChannel::new();
        let latency = Arc::new(LatencyGauge::default());
        latency.record(Duration::from_millis(400));
        let session = StationSession::new(
            StationId(2),
            ConnectionId::new(),
            channel,
            latency,
            Clock::utc(),
        );

        let before = OffsetDateTime::now_utc();
        session.correct();
        let commands = drain(&mut rx);

        let at = parse_at(&commands[0]).assume_utc();
        let lead = at - before;
        assert!(lead >= time::Duration::milliseconds(500));
        assert!(lead < time::Duration::milliseconds(1500));
    }
}
