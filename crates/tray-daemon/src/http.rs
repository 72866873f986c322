use crate::core::DaemonEvent;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tray_proto::protocol::{Command, PlaybackState, TrayIcon};
use tray_proto::state::StateManager;

#[derive(Clone)]
struct HttpState {
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
}

#[derive(Serialize)]
struct ApiState {
    stations: Vec<StationInfo>,
    state: PlaybackState,
    icon: TrayIcon,
    label: String,
    rev: u64,
}

#[derive(Serialize)]
struct StationInfo {
    idx: usize,
    id: String,
    name: String,
    group: Option<String>,
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(HttpState {
            state_manager,
            event_tx,
        });

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/play/:idx", get(play_station).post(play_station))
        .route("/api/stop", get(stop).post(stop))
        .route("/api/toggle", get(toggle).post(toggle))
        .route("/api/reload", get(reload).post(reload))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn get_state(State(state): State<HttpState>) -> Json<ApiState> {
    let snapshot = state.state_manager.get_state().await;

    let stations = snapshot
        .stations
        .iter()
        .enumerate()
        .map(|(idx, s)| StationInfo {
            idx,
            id: s.id.to_string(),
            name: s.name.clone(),
            group: s.group.clone(),
        })
        .collect();

    Json(ApiState {
        stations,
        state: snapshot.state,
        icon: snapshot.icon,
        label: snapshot.label,
        rev: snapshot.rev,
    })
}

async fn play_station(State(state): State<HttpState>, Path(idx): Path<usize>) -> StatusCode {
    info!("HTTP API: Play station {}", idx);
    let station_id = {
        let snapshot = state.state_manager.get_state().await;
        match snapshot.stations.get(idx) {
            Some(station) => station.id.clone(),
            None => return StatusCode::NOT_FOUND,
        }
    };
    send(&state, Command::Play { station_id }).await
}

async fn stop(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Stop");
    send(&state, Command::Stop).await
}

async fn toggle(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Toggle");
    send(&state, Command::Toggle).await
}

async fn reload(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Reload bookmarks");
    send(&state, Command::ReloadBookmarks).await
}

async fn send(state: &HttpState, cmd: Command) -> StatusCode {
    if state.event_tx.send(DaemonEvent::ClientCommand(cmd)).await.is_err() {
        error!("Failed to forward HTTP command");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::ACCEPTED
}

#[cfg(test)]
mod tests {
    use super::*;
    use tray_proto::protocol::Station;

    fn http_state(stations: Vec<Station>) -> (HttpState, mpsc::Receiver<DaemonEvent>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let state_manager = Arc::new(StateManager::new(dir.path().join("state.json"), stations));
        let (event_tx, event_rx) = mpsc::channel(8);
        (
            HttpState {
                state_manager,
                event_tx,
            },
            event_rx,
            dir,
        )
    }

    #[tokio::test]
    async fn play_by_index_resolves_station_id() {
        let fip = Station::new("FIP", "http://fip");
        let (state, mut rx, _dir) = http_state(vec![fip.clone()]);

        let status = play_station(State(state.clone()), Path(0)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        match rx.recv().await {
            Some(DaemonEvent::ClientCommand(Command::Play { station_id })) => {
                assert_eq!(station_id, fip.id)
            }
            other => panic!("unexpected event {:?}", other),
        }

        assert_eq!(play_station(State(state), Path(5)).await, StatusCode::NOT_FOUND);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn state_lists_stations_with_icon() {
        let (state, _rx, _dir) = http_state(vec![Station::new("FIP", "http://fip").with_group("Eclectic")]);
        let Json(api) = get_state(State(state)).await;
        assert_eq!(api.icon, TrayIcon::Idle);
        assert_eq!(api.stations.len(), 1);
        assert_eq!(api.stations[0].group.as_deref(), Some("Eclectic"));
    }
}
