/// External player process management.
///
/// A `PlayerBackend` turns a stream URL into exactly one running child
/// process and can later stop or poll it.  `ProcessBackend` is the real
/// implementation: it fills the platform's invocation template and drives the
/// child through `tokio::process`.
///
/// Stopping is two-phase: a termination request (SIGTERM on Unix), then a
/// forced kill if the player is still around after the grace period.  On
/// Windows the first phase already kills, so `StopTimeout` never fires there.
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};
use tray_proto::config::PlayerConfig;
use tray_proto::error::EngineError;
use tray_proto::platform::{self, BackendKind, PlayerTemplate};

/// Result of a non-blocking liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    ExitedOk,
    /// `None` when the process was terminated by a signal.
    ExitedError(Option<i32>),
}

/// The start/stop/poll capability every player variant provides.
#[async_trait]
pub trait PlayerBackend: Send + Sync {
    type Handle: Send;

    fn kind(&self) -> BackendKind;

    async fn start(&self, url: &str) -> Result<Self::Handle, EngineError>;

    /// Terminate the process behind `handle`.  Stopping a handle whose process
    /// already ended is a no-op.
    async fn stop(&self, handle: &mut Self::Handle);

    fn poll(&self, handle: &mut Self::Handle) -> ProcessStatus;
}

// ── process backend ───────────────────────────────────────────────────────────

/// A spawned player plus the backend kind that started it.
#[derive(Debug)]
pub struct BackendHandle {
    kind: BackendKind,
    pid: Option<u32>,
    child: Option<Child>,
    exit: Option<ProcessStatus>,
}

pub struct ProcessBackend {
    kind: BackendKind,
    template: PlayerTemplate,
    stop_grace: Duration,
}

impl ProcessBackend {
    pub fn new(kind: BackendKind, template: PlayerTemplate, stop_grace: Duration) -> Self {
        Self {
            kind,
            template,
            stop_grace,
        }
    }

    /// Backend for the running host with config overrides applied.
    pub fn for_host(config: &PlayerConfig) -> Result<Self, EngineError> {
        let (kind, base) = platform::host_backend()?;
        Ok(Self::new(kind, config.template(base), config.stop_grace()))
    }

    pub fn template(&self) -> &PlayerTemplate {
        &self.template
    }
}

#[async_trait]
impl PlayerBackend for ProcessBackend {
    type Handle = BackendHandle;

    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn start(&self, url: &str) -> Result<BackendHandle, EngineError> {
        let program = platform::find_player_binary(&self.template.program);
        let args = self.template.args_for(url);
        debug!("player: spawning {:?} {:?}", program, args);

        let child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: self.template.program.clone(),
                source,
            })?;

        let pid = child.id();
        info!("player: started {:?} pid={:?} for {}", self.kind, pid, url);
        Ok(BackendHandle {
            kind: self.kind,
            pid,
            child: Some(child),
            exit: None,
        })
    }

    async fn stop(&self, handle: &mut BackendHandle) {
        let Some(mut child) = handle.child.take() else {
            return;
        };
        let pid = handle.pid.unwrap_or_default();

        if let Ok(Some(status)) = child.try_wait() {
            debug!("player: {:?} pid {} had already exited ({})", handle.kind, pid, status);
            handle.exit = Some(ProcessStatus::ExitedOk);
            return;
        }

        if let Err(e) = request_termination(&mut child) {
            warn!("player: termination request for pid {} failed: {}", pid, e);
        }

        match tokio::time::timeout(self.stop_grace, child.wait()).await {
            Ok(Ok(status)) => debug!("player: {:?} pid {} stopped ({})", handle.kind, pid, status),
            Ok(Err(e)) => warn!("player: waiting for pid {} failed: {}", pid, e),
            Err(_) => {
                let err = EngineError::StopTimeout {
                    pid,
                    grace_ms: self.stop_grace.as_millis() as u64,
                };
                warn!("player: {:?} {}, killing", handle.kind, err);
                if let Err(e) = child.kill().await {
                    warn!("player: kill of pid {} failed: {}", pid, e);
                }
            }
        }
        handle.exit = Some(ProcessStatus::ExitedOk);
    }

    fn poll(&self, handle: &mut BackendHandle) -> ProcessStatus {
        let Some(child) = handle.child.as_mut() else {
            return handle.exit.unwrap_or(ProcessStatus::ExitedOk);
        };

        let status = match child.try_wait() {
            Ok(None) => return ProcessStatus::Running,
            Ok(Some(status)) if status.success() => ProcessStatus::ExitedOk,
            Ok(Some(status)) => {
                match status.code() {
                    Some(code) => warn!("player process exited with code: {}", code),
                    None => warn!("player process terminated by signal"),
                }
                ProcessStatus::ExitedError(status.code())
            }
            Err(e) => {
                warn!("player liveness check failed: {}", e);
                ProcessStatus::ExitedError(None)
            }
        };
        handle.child = None;
        handle.exit = Some(status);
        status
    }
}

#[cfg(unix)]
fn request_termination(child: &mut Child) -> std::io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match child.id() {
        Some(pid) => kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(std::io::Error::from),
        None => Ok(()),
    }
}

/// Windows has no SIGTERM for console-less children, so the request is
/// already a hard kill there and the grace period only bounds the reap.
#[cfg(windows)]
fn request_termination(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh_backend(script: &str, grace_ms: u64) -> ProcessBackend {
        // `sh -c <script> <url>`: the URL lands in $0 and is otherwise ignored
        ProcessBackend::new(
            BackendKind::LinuxPlayer,
            PlayerTemplate::new("sh", ["-c", script, "{url}"]),
            Duration::from_millis(grace_ms),
        )
    }

    async fn wait_for_exit(backend: &ProcessBackend, handle: &mut BackendHandle) -> ProcessStatus {
        for _ in 0..100 {
            let status = backend.poll(handle);
            if status != ProcessStatus::Running {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("player did not exit");
    }

    #[tokio::test]
    async fn missing_executable_is_a_spawn_error() {
        let backend = ProcessBackend::new(
            BackendKind::LinuxPlayer,
            PlayerTemplate::new("/nonexistent/radio-player", ["{url}"]),
            Duration::from_millis(100),
        );
        match backend.start("http://stream.example/radio").await {
            Err(EngineError::Spawn { program, source }) => {
                assert_eq!(program, "/nonexistent/radio-player");
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected spawn error, got {:?}", other.map(|h| h.pid)),
        }
    }

    #[tokio::test]
    async fn stop_terminates_and_is_idempotent() {
        let backend = sh_backend("sleep 30", 2000);
        let mut handle = backend.start("http://stream.example/radio").await.unwrap();
        assert_eq!(handle.kind, BackendKind::LinuxPlayer);
        assert!(handle.pid.is_some());
        assert_eq!(backend.poll(&mut handle), ProcessStatus::Running);

        backend.stop(&mut handle).await;
        assert_eq!(backend.poll(&mut handle), ProcessStatus::ExitedOk);

        backend.stop(&mut handle).await;
        assert_eq!(backend.poll(&mut handle), ProcessStatus::ExitedOk);
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported() {
        let backend = sh_backend("exit 3", 500);
        let mut handle = backend.start("http://x").await.unwrap();
        assert_eq!(
            wait_for_exit(&backend, &mut handle).await,
            ProcessStatus::ExitedError(Some(3))
        );
        // the outcome sticks once observed
        assert_eq!(backend.poll(&mut handle), ProcessStatus::ExitedError(Some(3)));
    }

    #[tokio::test]
    async fn clean_exit_is_reported() {
        let backend = sh_backend("exit 0", 500);
        let mut handle = backend.start("http://x").await.unwrap();
        assert_eq!(wait_for_exit(&backend, &mut handle).await, ProcessStatus::ExitedOk);
    }

    #[tokio::test]
    async fn stubborn_player_is_killed_after_grace() {
        let backend = sh_backend("trap '' TERM; while true; do sleep 1; done", 300);
        let mut handle = backend.start("http://x").await.unwrap();
        // let the shell install its trap
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = Instant::now();
        backend.stop(&mut handle).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(backend.poll(&mut handle), ProcessStatus::ExitedOk);
    }
}
