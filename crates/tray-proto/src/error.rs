use thiserror::Error;

use crate::protocol::StationId;

/// Failures the playback engine distinguishes.
///
/// Only `UnsupportedPlatform` is fatal; everything else resolves into the
/// `Failed` playback state or a log line.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("failed to spawn player '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("player exited with {}", describe_exit(.code))]
    PlaybackExited { code: Option<i32> },

    #[error("player pid {pid} ignored termination for {grace_ms} ms")]
    StopTimeout { pid: u32, grace_ms: u64 },

    #[error("no station with id '{0}'")]
    UnknownStation(StationId),
}

fn describe_exit(code: &Option<i32>) -> String {
    match *code {
        Some(code) => format!("code {}", code),
        None => "a signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_messages_mention_code_or_signal() {
        let err = EngineError::PlaybackExited { code: Some(2) };
        assert_eq!(err.to_string(), "player exited with code 2");
        let err = EngineError::PlaybackExited { code: None };
        assert_eq!(err.to_string(), "player exited with a signal");
    }
}
