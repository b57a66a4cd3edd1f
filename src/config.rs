//! Process settings (environment) and gameplay tuning (JSON file with built-in defaults).

use std::{
    env, fs,
    io::ErrorKind,
    net::{IpAddr, Ipv4Addr},
    path::PathBuf,
    time::Duration,
};

use rand::Rng;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

/// Default location on disk where the server looks for the gameplay configuration.
const DEFAULT_CONFIG_PATH: &str = "config/gamemaster.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "GAMEMASTER_CONFIG_PATH";

const ADDR_ENV: &str = "GAMEMASTER_ADDR";
const PRIORITY_ENV: &str = "GAMEMASTER_PRIORITY";
const PEERS_ENV: &str = "GAMEMASTER_PEERS";
const BIND_ENV: &str = "GAMEMASTER_BIND";
const GAME_PORT_ENV: &str = "GAMEMASTER_GAME_PORT";
const PEER_PORT_ENV: &str = "GAMEMASTER_PEER_PORT";

const DEFAULT_GAME_PORT: u16 = 8001;
const DEFAULT_PEER_PORT: u16 = 8002;

/// Failures while reading the process settings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing environment variable `{var}`")]
    Missing { var: &'static str },
    /// Environment variable is present but cannot be parsed.
    #[error("invalid value `{value}` for `{var}`")]
    Invalid { var: &'static str, value: String },
}

/// Immutable process settings: identity of this instance and of its peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Address (`host:port`) under which peers and stations reach this instance's peer port.
    pub advertised_addr: String,
    /// Leadership priority; strictly greater wins.
    pub priority: i64,
    /// Peer addresses (`host:port`), never containing [`Settings::advertised_addr`].
    pub peers: Vec<String>,
    /// IP address both listeners bind to.
    pub bind: IpAddr,
    /// Port of the station WebSocket listener.
    pub game_port: u16,
    /// Port of the peer HTTP listener.
    pub peer_port: u16,
}

impl Settings {
    /// Build settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Build settings from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let peer_port = parse_or(&lookup, PEER_PORT_ENV, DEFAULT_PEER_PORT)?;
        let game_port = parse_or(&lookup, GAME_PORT_ENV, DEFAULT_GAME_PORT)?;
        let bind = parse_or(&lookup, BIND_ENV, IpAddr::V4(Ipv4Addr::UNSPECIFIED))?;

        let advertised_addr = lookup(ADDR_ENV)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(|value| with_default_port(&value, peer_port))
            .ok_or(ConfigError::Missing { var: ADDR_ENV })?;

        let priority = lookup(PRIORITY_ENV).ok_or(ConfigError::Missing { var: PRIORITY_ENV })?;
        let priority = priority
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid {
                var: PRIORITY_ENV,
                value: priority,
            })?;

        let mut peers = Vec::new();
        for peer in lookup(PEERS_ENV).unwrap_or_default().split(',') {
            let peer = peer.trim();
            if peer.is_empty() {
                continue;
            }
            let peer = with_default_port(peer, peer_port);
            if peer != advertised_addr && !peers.contains(&peer) {
                peers.push(peer);
            }
        }

        Ok(Self {
            advertised_addr,
            priority,
            peers,
            bind,
            game_port,
            peer_port,
        })
    }

    /// WebSocket URL stations should use to reach the leader advertised as `leader`.
    pub fn station_url_for(&self, leader: &str) -> String {
        format!("ws://{}:{}/ws", host_of(leader), self.game_port)
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&'static str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        _ => Ok(default),
    }
}

fn with_default_port(addr: &str, port: u16) -> String {
    match addr.rsplit_once(':') {
        Some((_, maybe_port)) if maybe_port.parse::<u16>().is_ok() => addr.to_string(),
        _ => format!("{addr}:{port}"),
    }
}

/// Host part of a `host:port` address.
pub fn host_of(addr: &str) -> &str {
    match addr.rsplit_once(':') {
        Some((host, port)) if port.parse::<u16>().is_ok() => host,
        _ => addr,
    }
}

/// Gameplay tuning shared by the game actor and the election driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameConfig {
    /// Timer durations.
    pub timings: Timings,
    /// Sound files played by the stations.
    pub sounds: SoundLibrary,
}

/// Timer durations used by the game and the election.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Period after which the pre-game invitation moves to another station.
    pub pregame_cycle: Duration,
    /// Delay before a held button after a round is reminded to be released.
    pub hold_reminder: Duration,
    /// Delay without any pressed station before the round is abandoned.
    pub all_released: Duration,
    /// Time the abandon animation plays before returning to pre-game.
    pub all_released_reset: Duration,
    /// Time a win stays on display when no button is held.
    pub win_display: Duration,
    /// Time after which an unanswered peer probe counts as absent.
    pub peer_probe_timeout: Duration,
    /// Period between liveness probes of the known leader while deferred.
    pub leader_follow_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            pregame_cycle: Duration::from_secs(10),
            hold_reminder: Duration::from_secs(10),
            all_released: Duration::from_secs(15),
            all_released_reset: Duration::from_secs(4),
            win_display: Duration::from_secs(10),
            peer_probe_timeout: Duration::from_secs(1),
            leader_follow_interval: Duration::from_secs(1),
        }
    }
}

/// Numbered family of sound files: `<directory>/<stem><n>.wav` for `n` in `1..=count`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SoundSet {
    /// Directory on the station holding the files.
    pub directory: String,
    /// File name before the number.
    pub stem: String,
    /// Number of variants.
    pub count: u32,
}

impl SoundSet {
    fn new(directory: &str, stem: &str, count: u32) -> Self {
        Self {
            directory: directory.into(),
            stem: stem.into(),
            count,
        }
    }

    /// Path of the `n`-th variant.
    pub fn path(&self, n: u32) -> String {
        format!("{}/{}{}.wav", self.directory, self.stem, n)
    }

    /// Path of a uniformly chosen variant.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        self.path(rng.random_range(1..=self.count.max(1)))
    }
}

/// Sounds played for the three audible game events.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SoundLibrary {
    /// Round won.
    pub win: SoundSet,
    /// Round lost.
    pub lose: SoundSet,
    /// Correct station pressed.
    pub correct_press: SoundSet,
}

impl Default for SoundLibrary {
    fn default() -> Self {
        Self {
            win: SoundSet::new("sounds/win", "win", 8),
            lose: SoundSet::new("sounds/lose", "lose", 6),
            correct_press: SoundSet::new("sounds/on_green_press", "green-press", 7),
        }
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            timings: Timings::default(),
            sounds: SoundLibrary::default(),
        }
    }
}

impl GameConfig {
    /// Load the gameplay configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json_str(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), "loaded gameplay config");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a JSON document; absent sections keep their defaults.
    pub fn from_json_str(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }
}

#[derive(Debug, Default, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[serde(default)]
    timings: RawTimings,
    sounds: Option<SoundLibrary>,
}

#[derive(Debug, Default, Deserialize)]
/// Millisecond durations; missing entries keep their default.
struct RawTimings {
    pregame_cycle_ms: Option<u64>,
    hold_reminder_ms: Option<u64>,
    all_released_ms: Option<u64>,
    all_released_reset_ms: Option<u64>,
    win_display_ms: Option<u64>,
    peer_probe_timeout_ms: Option<u64>,
    leader_follow_interval_ms: Option<u64>,
}

impl From<RawConfig> for GameConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = Timings::default();
        let ms = |raw: Option<u64>, default: Duration| raw.map_or(default, Duration::from_millis);
        let raw = value.timings;
        Self {
            timings: Timings {
                pregame_cycle: ms(raw.pregame_cycle_ms, defaults.pregame_cycle),
                hold_reminder: ms(raw.hold_reminder_ms, defaults.hold_reminder),
                all_released: ms(raw.all_released_ms, defaults.all_released),
                all_released_reset: ms(raw.all_released_reset_ms, defaults.all_released_reset),
                win_display: ms(raw.win_display_ms, defaults.win_display),
                peer_probe_timeout: ms(raw.peer_probe_timeout_ms, defaults.peer_probe_timeout),
                leader_follow_interval: ms(
                    raw.leader_follow_interval_ms,
                    defaults.leader_follow_interval,
                ),
            },
            sounds: value.sounds.unwrap_or_default(),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
