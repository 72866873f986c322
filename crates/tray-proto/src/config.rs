use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform::{self, PlayerTemplate};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub bookmarks: BookmarksConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub socket: SocketConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookmarksConfig {
    #[serde(default = "default_bookmarks_file")]
    pub file: PathBuf,
}

/// Player process settings.  `program`/`args` override the platform's
/// built-in invocation; leave them unset to use the default player.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    /// How long a stopped player may take to exit before it is killed.
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    /// Liveness check interval while playing.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_socket_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
        }
    }
}

impl Default for BookmarksConfig {
    fn default() -> Self {
        Self {
            file: default_bookmarks_file(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: None,
            stop_grace_ms: default_stop_grace_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            bind_address: default_bind_address(),
            port: default_socket_port(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_bind_address(),
            port: default_http_port(),
        }
    }
}

impl PlayerConfig {
    /// Apply the configured overrides on top of the platform template.
    pub fn template(&self, base: PlayerTemplate) -> PlayerTemplate {
        PlayerTemplate {
            program: self.program.clone().unwrap_or(base.program),
            args: self.args.clone().unwrap_or(base.args),
        }
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        // zero would turn the ticker into a busy loop
        Duration::from_millis(self.poll_interval_ms.max(50))
    }
}

fn default_state_file() -> PathBuf {
    platform::data_dir().join("state.json")
}

fn default_bookmarks_file() -> PathBuf {
    platform::config_dir().join("bookmarks.json")
}

fn default_stop_grace_ms() -> u64 {
    2000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_socket_port() -> u16 {
    platform::DAEMON_TCP_PORT
}

fn default_http_port() -> u16 {
    8990
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.socket.enabled);
        assert_eq!(config.socket.port, platform::DAEMON_TCP_PORT);
        assert!(!config.http.enabled);
        assert_eq!(config.player.stop_grace(), Duration::from_secs(2));
        assert!(config.bookmarks.file.ends_with("radio-tray/bookmarks.json"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [player]
            program = "vlc"
            args = ["--intf", "dummy", "{url}"]
            poll_interval_ms = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.player.stop_grace_ms, 2000);
        assert_eq!(config.player.poll_interval(), Duration::from_millis(50));

        let base = PlayerTemplate::new("mpv", ["{url}"]);
        let template = config.player.template(base);
        assert_eq!(template.program, "vlc");
        assert_eq!(template.args_for("http://x"), vec!["--intf", "dummy", "http://x"]);
    }

    #[test]
    fn test_program_override_keeps_default_args() {
        let player = PlayerConfig {
            program: Some("/opt/mpv/bin/mpv".into()),
            ..PlayerConfig::default()
        };
        let template = player.template(PlayerTemplate::new("mpv", ["--no-video", "{url}"]));
        assert_eq!(template.program, "/opt/mpv/bin/mpv");
        assert_eq!(template.args, vec!["--no-video", "{url}"]);
    }
}
