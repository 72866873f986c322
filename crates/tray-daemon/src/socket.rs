//! TCP bridge for the tray UI process.
//!
//! Frames are `Message`s with a 4-byte length prefix.  A client gets a
//! `Hello` on connect, a `State` once each command it sends has been applied
//! and after every engine transition, plus forwarded log lines and command
//! errors.  Frames over `MAX_FRAME_LEN` close the connection.
use crate::core::DaemonEvent;
use crate::BroadcastMessage;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{error, info, warn};
use tray_proto::protocol::{Broadcast, EngineSnapshot, Message, PROTOCOL_VERSION};
use tray_proto::state::StateManager;

/// Largest payload a client may announce.
const MAX_FRAME_LEN: usize = 1024 * 1024;

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", addr, e);
                return;
            }
        };

        info!("TCP server listening at {}", addr);

        let mut client_id = 0usize;

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    client_id += 1;
                    let id = client_id;
                    info!("Client {} connected from {}", id, peer);

                    let sm = state_manager.clone();
                    let evt_tx = event_tx.clone();
                    let bcast_rx = broadcast_tx.subscribe();

                    tokio::spawn(async move {
                        let (read_half, write_half) = stream.into_split();
                        handle_client(read_half, write_half, sm, id, evt_tx, bcast_rx).await;
                        info!("Client {} disconnected", id);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    })
}

async fn handle_client<R, W>(
    mut read_half: R,
    mut write_half: W,
    state_manager: Arc<StateManager>,
    client_id: usize,
    event_tx: mpsc::Sender<DaemonEvent>,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    if let Ok(encoded) = encode_hello(&state_manager).await {
        if write_half.write_all(&encoded).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        info!("Client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        while read_buf.len() >= 4 {
                            if frame_len(&read_buf) - 4 > MAX_FRAME_LEN {
                                warn!("Client {} announced an oversized frame, closing", client_id);
                                let reply = Broadcast::Error {
                                    message: "frame too large".to_string(),
                                };
                                if let Ok(encoded) = Message::Broadcast(reply).encode() {
                                    let _ = write_half.write_all(&encoded).await;
                                }
                                return;
                            }
                            match Message::decode(&read_buf) {
                                Ok((Message::Command(cmd), consumed)) => {
                                    read_buf.drain(..consumed);
                                    info!("Client {} sent command: {:?}", client_id, cmd);

                                    let (reply_tx, reply_rx) = oneshot::channel();
                                    if event_tx.send(DaemonEvent::ClientRequest(cmd, reply_tx)).await.is_err() {
                                        warn!("DaemonEvent channel closed");
                                        return;
                                    }
                                    let Ok(snapshot) = reply_rx.await else {
                                        warn!("DaemonCore dropped the reply for client {}", client_id);
                                        return;
                                    };

                                    if let Ok(encoded) = encode_snapshot(snapshot) {
                                        if write_half.write_all(&encoded).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                                Ok((_, consumed)) => {
                                    read_buf.drain(..consumed);
                                }
                                Err(_) if frame_complete(&read_buf) => {
                                    // whole frame present but not a valid message
                                    let consumed = frame_len(&read_buf);
                                    read_buf.drain(..consumed);
                                    warn!("Client {} sent an undecodable frame", client_id);
                                    let reply = Broadcast::Error {
                                        message: "invalid message".to_string(),
                                    };
                                    if let Ok(encoded) = Message::Broadcast(reply).encode() {
                                        if write_half.write_all(&encoded).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                                Err(_) => break,
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                let encoded = match msg {
                    Ok(BroadcastMessage::StateUpdated) => encode_state(&state_manager).await,
                    Ok(BroadcastMessage::Log(message)) => {
                        Message::Broadcast(Broadcast::Log { message }).encode()
                    }
                    Ok(BroadcastMessage::Error(message)) => {
                        Message::Broadcast(Broadcast::Error { message }).encode()
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} broadcast messages", client_id, n);
                        encode_state(&state_manager).await
                    }
                    Err(_) => break,
                };
                if let Ok(encoded) = encoded {
                    if write_half.write_all(&encoded).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

fn frame_len(buf: &[u8]) -> usize {
    4 + u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize
}

fn frame_complete(buf: &[u8]) -> bool {
    buf.len() >= 4 && buf.len() >= frame_len(buf)
}

async fn encode_hello(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    let state = state_manager.get_state().await;
    Message::Broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        rev: state.rev,
        state,
    })
    .encode()
}

async fn encode_state(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    encode_snapshot(state_manager.get_state().await)
}

fn encode_snapshot(data: EngineSnapshot) -> anyhow::Result<Vec<u8>> {
    Message::Broadcast(Broadcast::State { data }).encode()
}
