/// DaemonCore: single-owner event loop for playback state.
///
/// Every input (UI commands from the socket / HTTP bridges, the liveness
/// poll tick, shutdown) arrives as a `DaemonEvent` on one mpsc channel, so
/// transitions are applied strictly one after another.  The loop owns the
/// `PlaybackController`, which in turn exclusively owns the player handle.
///
/// After every transition that changes state, the controller mirrors it into
/// the `StateManager` snapshot and sends `BroadcastMessage::StateUpdated`
/// before returning, so the tray icon never has to poll.
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};
use tray_proto::bookmarks::BookmarkStore;
use tray_proto::config::Config;
use tray_proto::error::EngineError;
use tray_proto::protocol::{
    Command, EngineSnapshot, FailureReason, PlaybackState, Station, StationId,
};
use tray_proto::state::StateManager;

use crate::player::{PlayerBackend, ProcessBackend, ProcessStatus};
use crate::BroadcastMessage;

// ── PlaybackController ────────────────────────────────────────────────────────

/// The stopped / playing / failed state machine.
///
/// Holds at most one backend handle, and only while `Playing`.  Any new start
/// first stops and drops the previous handle.
pub struct PlaybackController<B: PlayerBackend> {
    backend: B,
    state: PlaybackState,
    handle: Option<B::Handle>,
    /// Station most recently passed to `play`; what `toggle` resumes.
    selected: Option<Station>,
    stations: Vec<Station>,
    state_manager: Arc<StateManager>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl<B: PlayerBackend> PlaybackController<B> {
    pub fn new(
        backend: B,
        stations: Vec<Station>,
        state_manager: Arc<StateManager>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> Self {
        Self {
            backend,
            state: PlaybackState::Stopped,
            handle: None,
            selected: None,
            stations,
            state_manager,
            broadcast_tx,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    #[cfg(test)]
    pub fn has_handle(&self) -> bool {
        self.handle.is_some()
    }

    pub fn find_station(&self, id: &StationId) -> Option<&Station> {
        self.stations.iter().find(|s| &s.id == id)
    }

    /// Replace the station list after a bookmark save.  Whatever is playing
    /// keeps playing even if its bookmark is gone.
    pub async fn set_stations(&mut self, stations: Vec<Station>) {
        info!("Controller: {} stations loaded", stations.len());
        self.stations = stations.clone();
        self.state_manager.set_stations(stations).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    /// Start `station`, replacing whatever was playing.
    pub async fn play(&mut self, station: Station) {
        self.selected = Some(station.clone());
        self.release_handle().await;

        match self.backend.start(&station.url).await {
            Ok(handle) => {
                self.handle = Some(handle);
                info!("Controller: playing '{}' ({})", station.name, station.url);
                if let Err(e) = self.state_manager.remember_station(&station).await {
                    warn!("Controller: could not persist last station: {}", e);
                }
                self.transition(PlaybackState::Playing { station }).await;
            }
            Err(e) => match FailureReason::try_from(&e) {
                Ok(reason) => {
                    warn!("Controller: cannot play '{}': {}", station.name, e);
                    self.transition(PlaybackState::Failed { station, reason })
                        .await;
                }
                Err(e) => {
                    error!("Controller: backend error for '{}': {}", station.name, e);
                    self.transition(PlaybackState::Stopped).await;
                }
            },
        }
    }

    pub async fn play_id(&mut self, id: &StationId) -> Result<(), EngineError> {
        let station = self
            .find_station(id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownStation(id.clone()))?;
        self.play(station).await;
        Ok(())
    }

    /// Stop playback.  Only meaningful while `Playing`; otherwise nothing
    /// happens at all.
    pub async fn stop(&mut self) {
        if !self.state.is_playing() {
            debug!("Controller: stop ignored in {:?}", self.state);
            return;
        }
        self.release_handle().await;
        info!("Controller: stopped");
        self.transition(PlaybackState::Stopped).await;
    }

    /// Tray left-click: stop when playing, otherwise (re)start the last or
    /// selected station.
    pub async fn toggle(&mut self) {
        if self.state.is_playing() {
            self.stop().await;
            return;
        }
        match self.resume_target().await {
            Some(station) => self.play(station).await,
            None => info!("Controller: toggle with no station previously played"),
        }
    }

    /// Non-blocking liveness check, driven by the poll ticker.
    pub async fn poll(&mut self) {
        let PlaybackState::Playing { station } = &self.state else {
            return;
        };
        let Some(handle) = self.handle.as_mut() else {
            return;
        };

        let next = match self.backend.poll(handle) {
            ProcessStatus::Running => return,
            ProcessStatus::ExitedOk => {
                info!("Controller: stream '{}' ended", station.name);
                PlaybackState::Stopped
            }
            ProcessStatus::ExitedError(code) => {
                let err = EngineError::PlaybackExited { code };
                warn!("Controller: '{}': {}", station.name, err);
                PlaybackState::Failed {
                    station: station.clone(),
                    reason: FailureReason::PlaybackExitedError { code },
                }
            }
        };
        self.release_handle().await;
        self.transition(next).await;
    }

    /// Force-stop before the application exits.
    pub async fn shutdown(&mut self) {
        self.release_handle().await;
        if self.state != PlaybackState::Stopped {
            self.transition(PlaybackState::Stopped).await;
        }
    }

    async fn resume_target(&self) -> Option<Station> {
        if let Some(station) = &self.selected {
            return Some(station.clone());
        }
        let last = self.state_manager.last_station().await?;
        let known = self
            .stations
            .iter()
            .find(|s| s.url == last.url && s.name == last.name)
            .or_else(|| self.stations.iter().find(|s| s.url == last.url));
        Some(match known {
            Some(station) => station.clone(),
            None => Station::new(last.name, last.url),
        })
    }

    async fn release_handle(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            self.backend.stop(&mut handle).await;
        }
    }

    async fn transition(&mut self, next: PlaybackState) {
        if next == self.state {
            return;
        }
        debug!("Controller: {:?} -> {:?}", self.state, next);
        self.state = next;
        self.state_manager.publish(&self.state).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }
}

// ── DaemonEvent ───────────────────────────────────────────────────────────────

/// All inputs into the DaemonCore loop.
#[derive(Debug)]
pub enum DaemonEvent {
    /// A command from the HTTP API; fire and forget.
    ClientCommand(Command),
    /// A command from a socket client, answered with the snapshot taken
    /// after the command has been applied.
    ClientRequest(Command, oneshot::Sender<EngineSnapshot>),
    /// Liveness check of the player process.
    PollTick,
    /// Shutdown requested.
    Shutdown,
}

// ── DaemonCore ────────────────────────────────────────────────────────────────

pub struct DaemonCore<B: PlayerBackend> {
    config: Config,
    controller: PlaybackController<B>,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl DaemonCore<ProcessBackend> {
    /// Resolve the host player and load bookmarks.  Fails only when the
    /// platform has no supported player or the files cannot be read.
    pub async fn new(
        config: Config,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<DaemonEvent>,
    ) -> anyhow::Result<Self> {
        let backend = ProcessBackend::for_host(&config.player)?;
        info!(
            "Player backend: {:?} ({})",
            backend.kind(),
            backend.template().program
        );
        Self::with_backend(config, backend, broadcast_tx, event_tx)
    }
}

impl<B: PlayerBackend> DaemonCore<B> {
    pub fn with_backend(
        config: Config,
        backend: B,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<DaemonEvent>,
    ) -> anyhow::Result<Self> {
        let stations = BookmarkStore::load(&config.bookmarks.file)?.stations();
        let state_manager = Arc::new(StateManager::new(
            config.daemon.state_file.clone(),
            stations.clone(),
        ));
        let controller = PlaybackController::new(
            backend,
            stations,
            Arc::clone(&state_manager),
            broadcast_tx.clone(),
        );

        Ok(Self {
            config,
            controller,
            state_manager,
            event_tx,
            broadcast_tx,
        })
    }

    /// Borrow the state manager (for the socket and HTTP servers).
    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    /// Run the core event loop.  Returns when a `Shutdown` event is received
    /// or every sender is gone; the player is always stopped on the way out.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        info!("DaemonCore: starting event loop");

        let tick_tx = self.event_tx.clone();
        let interval = self.config.player.poll_interval();
        let ticker = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if tick_tx.send(DaemonEvent::PollTick).await.is_err() {
                    break;
                }
            }
        });

        loop {
            match event_rx.recv().await {
                None => {
                    info!("DaemonCore: event channel closed, shutting down");
                    break;
                }

                Some(DaemonEvent::Shutdown) => {
                    info!("DaemonCore: shutdown requested");
                    break;
                }

                Some(DaemonEvent::ClientCommand(cmd)) => self.apply(cmd).await,

                Some(DaemonEvent::ClientRequest(cmd, reply)) => {
                    self.apply(cmd).await;
                    let _ = reply.send(self.state_manager.get_state().await);
                }

                Some(DaemonEvent::PollTick) => self.controller.poll().await,
            }
        }

        ticker.abort();
        info!("DaemonCore: cleanup, stopping player");
        self.controller.shutdown().await;
        Ok(())
    }

    async fn apply(&mut self, cmd: Command) {
        info!("DaemonCore: command {:?}", cmd);
        if let Err(e) = self.handle_command(cmd).await {
            error!("DaemonCore: command error: {}", e);
            let _ = self.broadcast_tx.send(BroadcastMessage::Error(e.to_string()));
        }
    }

    async fn handle_command(&mut self, cmd: Command) -> anyhow::Result<()> {
        match cmd {
            Command::Play { station_id } => self.controller.play_id(&station_id).await?,
            Command::Stop => self.controller.stop().await,
            Command::Toggle => self.controller.toggle().await,
            Command::ReloadBookmarks => {
                let store = BookmarkStore::load(&self.config.bookmarks.file)?;
                self.controller.set_stations(store.stations()).await;
            }
            Command::GetState => {}
        }
        Ok(())
    }
}
