#![allow(dead_code)]

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use podstation_live::{ClientConfig, ContainerState, MergePolicy};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

pub struct BackendOptions {
    pub snapshot_status: StatusCode,
    pub snapshot_body: String,
    pub snapshot_delay: Duration,
    /// Sent to every new stream connection before any broadcast frame.
    pub initial_frame: Option<String>,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            snapshot_status: StatusCode::OK,
            snapshot_body: "[]".to_string(),
            snapshot_delay: Duration::ZERO,
            initial_frame: None,
        }
    }
}

pub struct BackendState {
    options: BackendOptions,
    frames_tx: broadcast::Sender<Frame>,
    connections: AtomicUsize,
}

/// In-process stand-in for the monitoring backend: `GET /containers` and
/// `/containers/ws`.
pub struct TestBackend {
    pub addr: SocketAddr,
    state: Arc<BackendState>,
    server: JoinHandle<()>,
}

impl TestBackend {
    pub async fn spawn(options: BackendOptions) -> Self {
        let (frames_tx, _) = broadcast::channel(64);
        let state = Arc::new(BackendState {
            options,
            frames_tx,
            connections: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/containers", get(containers))
            .route("/containers/ws", get(containers_ws))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            server,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub fn config(&self, merge_policy: MergePolicy) -> ClientConfig {
        ClientConfig {
            base_url: self.base_url(),
            stream_url: None,
            request_timeout: Duration::from_secs(5),
            reconnect_initial: Duration::from_millis(20),
            reconnect_max: Duration::from_millis(100),
            merge_policy,
        }
    }

    pub fn send(&self, frame: Frame) {
        // No subscriber is fine: the frame is simply lost.
        let _ = self.state.frames_tx.send(frame);
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub async fn wait_for_connections(&self, count: usize) {
        tokio::time::timeout(WAIT, async {
            while self.connections() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for stream connections");
    }
}

impl Drop for TestBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn containers(State(state): State<Arc<BackendState>>) -> Response {
    if !state.options.snapshot_delay.is_zero() {
        tokio::time::sleep(state.options.snapshot_delay).await;
    }
    (
        state.options.snapshot_status,
        [(header::CONTENT_TYPE, "application/json")],
        state.options.snapshot_body.clone(),
    )
        .into_response()
}

async fn containers_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<BackendState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<BackendState>) {
    let mut rx = state.frames_tx.subscribe();
    state.connections.fetch_add(1, Ordering::SeqCst);

    if let Some(initial) = &state.options.initial_frame {
        if socket.send(Message::Text(initial.clone().into())).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let sent = match frame {
                    Ok(Frame::Text(text)) => socket.send(Message::Text(text.into())).await,
                    Ok(Frame::Binary(bytes)) => socket.send(Message::Binary(bytes.into())).await,
                    Ok(Frame::Close) => {
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if sent.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

pub fn containers_json(ids: &[&str]) -> String {
    let list: Vec<_> = ids
        .iter()
        .enumerate()
        .map(|(index, id)| {
            serde_json::json!({
                "id": id,
                "name": format!("{id}-svc"),
                "started_at": 1_718_000_000u64 + index as u64,
                "cpu_percent": format!("{}.25%", index),
                "memory_percent": 10.5,
                "memory_usage": "128MiB",
            })
        })
        .collect();
    serde_json::Value::Array(list).to_string()
}

pub fn ids(state: &ContainerState) -> Option<Vec<String>> {
    state
        .containers
        .as_ref()
        .map(|list| list.iter().map(|c| c.id.clone()).collect())
}

pub async fn wait_for_state<F>(rx: &mut watch::Receiver<ContainerState>, predicate: F) -> ContainerState
where
    F: FnMut(&ContainerState) -> bool,
{
    let state = tokio::time::timeout(WAIT, rx.wait_for(predicate))
        .await
        .expect("timed out waiting for container state")
        .expect("reconciler dropped");
    (*state).clone()
}

pub async fn wait_for_snapshot<F>(
    rx: &mut watch::Receiver<podstation_live::client::SnapshotStatus>,
    predicate: F,
) -> podstation_live::client::SnapshotStatus
where
    F: FnMut(&podstation_live::client::SnapshotStatus) -> bool,
{
    let status = tokio::time::timeout(WAIT, rx.wait_for(predicate))
        .await
        .expect("timed out waiting for snapshot status")
        .expect("snapshot status dropped");
    (*status).clone()
}
