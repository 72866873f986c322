use std::path::PathBuf;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

pub const DAEMON_TCP_PORT: u16 = 9877;

/// Placeholder substituted with the stream URL in player templates.
pub const URL_PLACEHOLDER: &str = "{url}";

// ── backend selection ─────────────────────────────────────────────────────────

/// The closed set of platform audio players the engine knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    MacPlayer,
    LinuxPlayer,
    WindowsPlayer,
}

impl BackendKind {
    /// Built-in invocation for this player.
    pub fn default_template(self) -> PlayerTemplate {
        match self {
            BackendKind::MacPlayer => PlayerTemplate::new("afplay", [URL_PLACEHOLDER]),
            BackendKind::LinuxPlayer => {
                PlayerTemplate::new("mpv", ["--no-video", "--quiet", URL_PLACEHOLDER])
            }
            BackendKind::WindowsPlayer => PlayerTemplate::new("wmplayer.exe", [URL_PLACEHOLDER]),
        }
    }
}

/// Executable plus argument list; one argument may carry `{url}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerTemplate {
    pub program: String,
    pub args: Vec<String>,
}

impl PlayerTemplate {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Arguments with the stream URL substituted.  Templates without a
    /// placeholder get the URL appended as the last argument.
    pub fn args_for(&self, url: &str) -> Vec<String> {
        let mut substituted = false;
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                if arg.contains(URL_PLACEHOLDER) {
                    substituted = true;
                    arg.replace(URL_PLACEHOLDER, url)
                } else {
                    arg.clone()
                }
            })
            .collect();
        if !substituted {
            args.push(url.to_string());
        }
        args
    }
}

/// Map an OS identifier to its player backend.
///
/// Accepts both `std::env::consts::OS` names and the `uname`/`platform`
/// spellings (`darwin`, `win32`).
pub fn select_backend(os: &str) -> Result<(BackendKind, PlayerTemplate), EngineError> {
    let kind = match os.to_ascii_lowercase().as_str() {
        "darwin" | "macos" => BackendKind::MacPlayer,
        "linux" => BackendKind::LinuxPlayer,
        "windows" | "win32" => BackendKind::WindowsPlayer,
        _ => return Err(EngineError::UnsupportedPlatform(os.to_string())),
    };
    Ok((kind, kind.default_template()))
}

static HOST_BACKEND: OnceLock<Option<(BackendKind, PlayerTemplate)>> = OnceLock::new();

/// Backend for the running host, resolved on first use and cached.
pub fn host_backend() -> Result<(BackendKind, PlayerTemplate), EngineError> {
    HOST_BACKEND
        .get_or_init(|| select_backend(std::env::consts::OS).ok())
        .clone()
        .ok_or_else(|| EngineError::UnsupportedPlatform(std::env::consts::OS.to_string()))
}

// ── directories ───────────────────────────────────────────────────────────────

pub fn data_dir() -> PathBuf {
    // XDG-style layout on macOS too, rather than Application Support
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("radio-tray")
    }
    #[cfg(windows)]
    {
        if let Some(portable) = beside_exe_dir("data") {
            return portable;
        }
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("radio-tray")
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(windows)]
    {
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                if exe_dir.join("config.toml").exists() {
                    return exe_dir.to_path_buf();
                }
            }
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("radio-tray")
    }

    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("radio-tray")
    }
}

#[cfg(windows)]
fn beside_exe_dir(name: &str) -> Option<PathBuf> {
    let exe_path = std::env::current_exe().ok()?;
    let dir = exe_path.parent()?.join(name);
    dir.exists().then_some(dir)
}

// ── player binary lookup ──────────────────────────────────────────────────────

fn find_beside_exe(name: &str) -> Option<PathBuf> {
    let current_exe = std::env::current_exe().ok()?;
    let dir = current_exe.parent()?;
    let p = dir.join(name);
    if p.exists() {
        return Some(p);
    }
    let p = dir.join("external").join(name);
    p.exists().then_some(p)
}

fn find_on_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|p| p.is_file())
}

/// Resolve a player program to a concrete path.
///
/// Absolute or relative paths are taken as given.  Bare names are looked up
/// beside the current executable, then on `PATH`; if neither has it the bare
/// name is returned and spawning reports the failure.
pub fn find_player_binary(program: &str) -> PathBuf {
    let as_path = PathBuf::from(program);
    if as_path.components().count() > 1 {
        return as_path;
    }
    find_beside_exe(program)
        .or_else(|| find_on_path(program))
        .unwrap_or(as_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn darwin_selects_mac_player() {
        let (kind, template) = select_backend("darwin").unwrap();
        assert_eq!(kind, BackendKind::MacPlayer);
        assert_eq!(template.program, "afplay");
        assert_eq!(template.args_for("http://a/b"), vec!["http://a/b"]);
    }

    #[test]
    fn linux_selects_linux_player() {
        let (kind, template) = select_backend("linux").unwrap();
        assert_eq!(kind, BackendKind::LinuxPlayer);
        assert_eq!(template.program, "mpv");
        assert_eq!(
            template.args_for("http://stream.example/radio"),
            vec!["--no-video", "--quiet", "http://stream.example/radio"]
        );
    }

    #[test]
    fn windows_aliases_select_windows_player() {
        for os in ["windows", "win32", "Windows"] {
            let (kind, _) = select_backend(os).unwrap();
            assert_eq!(kind, BackendKind::WindowsPlayer);
        }
    }

    #[test]
    fn unknown_platform_is_rejected() {
        match select_backend("plan9") {
            Err(EngineError::UnsupportedPlatform(os)) => assert_eq!(os, "plan9"),
            other => panic!("expected UnsupportedPlatform, got {:?}", other),
        }
    }

    #[test]
    fn template_without_placeholder_appends_url() {
        let template = PlayerTemplate::new("vlc", ["--intf", "dummy"]);
        assert_eq!(
            template.args_for("http://x"),
            vec!["--intf", "dummy", "http://x"]
        );
    }

    #[test]
    fn placeholder_inside_argument_is_substituted() {
        let template = PlayerTemplate::new("player", ["--stream={url}"]);
        assert_eq!(template.args_for("http://x"), vec!["--stream=http://x"]);
    }

    #[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
    #[test]
    fn host_backend_is_stable() {
        let first = host_backend().unwrap();
        let second = host_backend().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn explicit_paths_are_not_searched() {
        assert_eq!(
            find_player_binary("/nonexistent/player"),
            PathBuf::from("/nonexistent/player")
        );
    }
}
