//! Wire format exchanged with stations over their WebSocket connection.

use serde::{Deserialize, Serialize, Serializer};
use time::{OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description};

/// Layout of the `at` field understood by the station firmware.
const AT_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:6]");

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
/// Messages accepted from station WebSocket clients.
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StationMessage {
    /// First message of a session, carrying the station id as a hex string.
    Register { id: String },
    /// The station's button went down.
    ButtonPressed,
    /// The station's button went up.
    ButtonReleased,
    /// The station is leaving; the connection closes afterwards.
    Unregister,
    /// Any message type this game-master does not handle.
    #[serde(other)]
    Unknown,
}

impl StationMessage {
    /// Parse a text frame received from a station.
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Actuator addressed by a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    /// RGB backlight of the push button.
    ButtonLed,
    /// LED matrix around the station.
    MatrixLed,
    /// Sound playback.
    Sound,
}

/// Whether the command starts or stops the actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandValue {
    /// Start a light pattern or a sound.
    Start,
    /// Switch a light off.
    Off,
    /// Stop sound playback.
    Stop,
}

/// Named light effects implemented by the station firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    /// Rainbow scroll used for wins.
    Colorscroll,
    /// Red flashing, used on the button when a round is lost.
    FlashRed,
    /// Blue flashing, reminds a player to release the button.
    FlashBlue,
    /// Red swipe on the matrix when a round is lost.
    SwipeRed,
}

/// Light pattern: either a named effect or a solid RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Pattern {
    /// Named effect.
    Effect(Effect),
    /// Solid color as `[r, g, b]`.
    Rgb([u8; 3]),
}

impl From<Effect> for Pattern {
    fn from(effect: Effect) -> Self {
        Pattern::Effect(effect)
    }
}

impl From<(u8, u8, u8)> for Pattern {
    fn from((r, g, b): (u8, u8, u8)) -> Self {
        Pattern::Rgb([r, g, b])
    }
}

/// Absolute execution time of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(pub OffsetDateTime);

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let formatted = self
            .0
            .format(AT_FORMAT)
            .map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&formatted)
    }
}

/// Command sent to a station, executed at `at` rather than on receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StationCommand {
    /// Target actuator.
    #[serde(rename = "type")]
    pub kind: CommandKind,
    /// Start or stop.
    pub value: CommandValue,
    /// Light pattern for `START` light commands.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<Pattern>,
    /// Sound file for `START` sound commands.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Absolute execution time.
    pub at: Timestamp,
}

impl StationCommand {
    /// Start a light pattern on the given actuator.
    pub fn light(kind: CommandKind, pattern: Pattern, at: Timestamp) -> Self {
        Self {
            kind,
            value: CommandValue::Start,
            pattern: Some(pattern),
            filename: None,
            at,
        }
    }

    /// Switch the given light actuator off.
    pub fn light_off(kind: CommandKind, at: Timestamp) -> Self {
        Self {
            kind,
            value: CommandValue::Off,
            pattern: None,
            filename: None,
            at,
        }
    }

    /// Play a sound file.
    pub fn sound(filename: impl Into<String>, at: Timestamp) -> Self {
        Self {
            kind: CommandKind::Sound,
            value: CommandValue::Start,
            pattern: None,
            filename: Some(filename.into()),
            at,
        }
    }

    /// Stop any sound currently playing.
    pub fn sound_stop(at: Timestamp) -> Self {
        Self {
            kind: CommandKind::Sound,
            value: CommandValue::Stop,
            pattern: None,
            filename: None,
            at,
        }
    }
}
