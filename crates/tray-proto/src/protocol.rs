use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  The tray UI checks this on connect.
pub const PROTOCOL_VERSION: u32 = 1;

/// Menu text shown when nothing is playing.
pub const NO_STATION_LABEL: &str = "No Station Playing";

// ── stations ──────────────────────────────────────────────────────────────────

/// Station identity.  Explicit when the bookmark carries one, otherwise
/// derived from the name + URL pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationId(pub String);

impl StationId {
    pub fn derived(name: &str, url: &str) -> Self {
        Self(format!("{} <{}>", name, url))
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Station {
    pub id: StationId,
    pub name: String,
    pub url: String,
    /// Bookmark group the station was listed under.
    #[serde(default)]
    pub group: Option<String>,
}

impl Station {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        let name = name.into();
        let url = url.into();
        Self {
            id: StationId::derived(&name, &url),
            name,
            url,
            group: None,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

// ── playback state ────────────────────────────────────────────────────────────

/// Why the last play attempt ended up in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum FailureReason {
    SpawnError { program: String, message: String },
    /// `code` is `None` when the player was killed by a signal.
    PlaybackExitedError { code: Option<i32> },
}

/// Only the two errors a playback attempt can end in convert; anything else
/// is handed back unchanged.
impl<'a> TryFrom<&'a EngineError> for FailureReason {
    type Error = &'a EngineError;

    fn try_from(err: &'a EngineError) -> Result<Self, Self::Error> {
        match err {
            EngineError::Spawn { program, source } => Ok(FailureReason::SpawnError {
                program: program.clone(),
                message: source.to_string(),
            }),
            EngineError::PlaybackExited { code } => {
                Ok(FailureReason::PlaybackExitedError { code: *code })
            }
            other => Err(other),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::SpawnError { program, message } => {
                write!(f, "could not start {}: {}", program, message)
            }
            FailureReason::PlaybackExitedError { code: Some(code) } => {
                write!(f, "player exited with code {}", code)
            }
            FailureReason::PlaybackExitedError { code: None } => {
                write!(f, "player was killed by a signal")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "status")]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing {
        station: Station,
    },
    Failed {
        station: Station,
        reason: FailureReason,
    },
}

impl PlaybackState {
    pub fn is_playing(&self) -> bool {
        matches!(self, PlaybackState::Playing { .. })
    }

    pub fn icon(&self) -> TrayIcon {
        match self {
            PlaybackState::Stopped => TrayIcon::Idle,
            PlaybackState::Playing { .. } => TrayIcon::Playing,
            PlaybackState::Failed { .. } => TrayIcon::Error,
        }
    }

    /// Text for the disabled "now playing" menu entry.
    pub fn menu_label(&self) -> String {
        match self {
            PlaybackState::Playing { station } => station.name.clone(),
            PlaybackState::Failed { station, reason } => {
                format!("{} ({})", station.name, reason)
            }
            PlaybackState::Stopped => NO_STATION_LABEL.to_string(),
        }
    }
}

/// Which waveform the tray shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TrayIcon {
    #[default]
    Idle,
    Playing,
    Error,
}

impl TrayIcon {
    /// Waveform colour the tray renders for this icon.
    pub fn color(self) -> &'static str {
        match self {
            TrayIcon::Idle => "red",
            TrayIcon::Playing => "green",
            TrayIcon::Error => "orange",
        }
    }
}

/// Everything the tray UI renders.  `rev` is a monotonically increasing
/// counter bumped on every change so clients can detect missed updates.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineSnapshot {
    #[serde(default)]
    pub rev: u64,
    pub stations: Vec<Station>,
    pub state: PlaybackState,
    pub icon: TrayIcon,
    pub label: String,
}

// ── wire messages ─────────────────────────────────────────────────────────────

/// Messages sent from the tray UI to the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    Play { station_id: StationId },
    Stop,
    Toggle,
    /// The bookmark editor saved; re-read the bookmark file.
    ReloadBookmarks,
    GetState,
}

/// Messages sent from the engine to the tray UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: protocol version + full snapshot.
    Hello {
        protocol_version: u32,
        rev: u64,
        state: EngineSnapshot,
    },
    State {
        data: EngineSnapshot,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station() -> Station {
        Station::new("FIP", "http://icecast.radiofrance.fr/fip-hifi.aac")
    }

    #[test]
    fn test_play_command_frame() {
        let msg = Message::Command(Command::Play {
            station_id: StationId::from("fip"),
        });
        let encoded = msg.encode().unwrap();
        let (decoded, len) = Message::decode(&encoded).unwrap();
        assert_eq!(len, encoded.len());
        match decoded {
            Message::Command(Command::Play { station_id }) => assert_eq!(station_id.0, "fip"),
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_partial_frame_is_rejected() {
        let encoded = Message::Command(Command::Toggle).encode().unwrap();
        assert!(Message::decode(&encoded[..2]).is_err());
        assert!(Message::decode(&encoded[..encoded.len() - 1]).is_err());
    }

    #[test]
    fn test_hello_carries_failed_state() {
        let state = PlaybackState::Failed {
            station: station(),
            reason: FailureReason::PlaybackExitedError { code: Some(1) },
        };
        let snapshot = EngineSnapshot {
            rev: 7,
            icon: state.icon(),
            label: state.menu_label(),
            state,
            ..Default::default()
        };
        let msg = Message::Broadcast(Broadcast::Hello {
            protocol_version: PROTOCOL_VERSION,
            rev: 7,
            state: snapshot,
        });
        let encoded = msg.encode().unwrap();
        let (decoded, _) = Message::decode(&encoded).unwrap();
        match decoded {
            Message::Broadcast(Broadcast::Hello {
                protocol_version,
                rev,
                state,
            }) => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(rev, 7);
                assert_eq!(state.icon, TrayIcon::Error);
                assert!(matches!(state.state, PlaybackState::Failed { .. }));
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn derived_id_combines_name_and_url() {
        let s = Station::new("FIP", "http://fip");
        assert_eq!(s.id, StationId::from("FIP <http://fip>"));
        assert_ne!(s.id, Station::new("FIP", "http://fip2").id);
    }

    #[test]
    fn icons_track_state() {
        assert_eq!(PlaybackState::Stopped.icon(), TrayIcon::Idle);
        let playing = PlaybackState::Playing { station: station() };
        assert_eq!(playing.icon(), TrayIcon::Playing);
        assert_eq!(playing.menu_label(), "FIP");
        assert_eq!(PlaybackState::Stopped.menu_label(), NO_STATION_LABEL);
        assert_ne!(TrayIcon::Playing.color(), TrayIcon::Error.color());
    }

    #[test]
    fn only_playback_errors_become_failure_reasons() {
        let spawn = EngineError::Spawn {
            program: "mpv".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(matches!(
            FailureReason::try_from(&spawn),
            Ok(FailureReason::SpawnError { ref program, .. }) if program == "mpv"
        ));
        assert_eq!(
            FailureReason::try_from(&EngineError::PlaybackExited { code: None }).ok(),
            Some(FailureReason::PlaybackExitedError { code: None })
        );

        let unknown = EngineError::UnknownStation(StationId::from("gone"));
        assert!(FailureReason::try_from(&unknown).is_err());
        let timeout = EngineError::StopTimeout { pid: 1, grace_ms: 10 };
        assert!(FailureReason::try_from(&timeout).is_err());
    }
}
