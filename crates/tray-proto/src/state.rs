use crate::protocol::{EngineSnapshot, PlaybackState, Station};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// The last station the user started, so a toggle after restart resumes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastStation {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersistentState {
    #[serde(default)]
    pub last_station: Option<LastStation>,
}

/// Shared, read-mostly view of the engine for the UI bridges, plus the small
/// bit of state that survives restarts.  Only the playback controller writes.
pub struct StateManager {
    snapshot: Arc<RwLock<EngineSnapshot>>,
    persistent: RwLock<PersistentState>,
    state_file: PathBuf,
}

impl StateManager {
    pub fn new(state_file: PathBuf, stations: Vec<Station>) -> Self {
        let persistent = Self::load_persistent(&state_file);
        let stopped = PlaybackState::Stopped;

        let snapshot = EngineSnapshot {
            rev: 1,
            stations,
            icon: stopped.icon(),
            label: stopped.menu_label(),
            state: stopped,
        };

        Self {
            snapshot: Arc::new(RwLock::new(snapshot)),
            persistent: RwLock::new(persistent),
            state_file,
        }
    }

    pub async fn get_state(&self) -> EngineSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Mirror a playback transition into the snapshot.
    pub async fn publish(&self, playback: &PlaybackState) {
        let mut snapshot = self.snapshot.write().await;
        snapshot.state = playback.clone();
        snapshot.icon = playback.icon();
        snapshot.label = playback.menu_label();
        snapshot.rev += 1;
    }

    pub async fn set_stations(&self, stations: Vec<Station>) {
        let mut snapshot = self.snapshot.write().await;
        snapshot.stations = stations;
        snapshot.rev += 1;
    }

    pub async fn last_station(&self) -> Option<LastStation> {
        self.persistent.read().await.last_station.clone()
    }

    pub async fn remember_station(&self, station: &Station) -> anyhow::Result<()> {
        {
            let mut persistent = self.persistent.write().await;
            persistent.last_station = Some(LastStation {
                name: station.name.clone(),
                url: station.url.clone(),
            });
        }
        self.save().await
    }

    async fn save(&self) -> anyhow::Result<()> {
        let json = {
            let persistent = self.persistent.read().await;
            serde_json::to_string_pretty(&*persistent)?
        };

        if let Some(parent) = self.state_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.state_file, json).await?;
        Ok(())
    }

    fn load_persistent(state_file: &Path) -> PersistentState {
        if let Ok(content) = std::fs::read_to_string(state_file) {
            if let Ok(persistent) = serde_json::from_str::<PersistentState>(&content) {
                return persistent;
            }
        }
        PersistentState::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FailureReason, TrayIcon};

    #[tokio::test]
    async fn publish_bumps_rev_and_derives_icon() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StateManager::new(dir.path().join("state.json"), Vec::new());
        let before = manager.get_state().await;
        assert_eq!(before.icon, TrayIcon::Idle);

        let failed = PlaybackState::Failed {
            station: Station::new("A", "http://a"),
            reason: FailureReason::PlaybackExitedError { code: Some(1) },
        };
        manager.publish(&failed).await;

        let after = manager.get_state().await;
        assert_eq!(after.rev, before.rev + 1);
        assert_eq!(after.icon, TrayIcon::Error);
        assert_eq!(after.state, failed);
    }

    #[tokio::test]
    async fn last_station_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let manager = StateManager::new(path.clone(), Vec::new());
        assert_eq!(manager.last_station().await, None);
        manager
            .remember_station(&Station::new("Nova", "http://nova"))
            .await
            .unwrap();

        let reloaded = StateManager::new(path, Vec::new());
        assert_eq!(
            reloaded.last_station().await,
            Some(LastStation {
                name: "Nova".into(),
                url: "http://nova".into(),
            })
        );
    }

    #[test]
    fn corrupt_state_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        let persistent = StateManager::load_persistent(&path);
        assert!(persistent.last_station.is_none());
    }
}
