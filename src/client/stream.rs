use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::models::parse_container_list;
use crate::reconciler::{ApplyOutcome, Reconciler, Source};

type ContainerSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Doubling reconnect delay with an upper bound.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial.min(max),
        }
    }

    /// Delay to wait now; the following call returns twice as much, up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial.min(self.max);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Applied(ApplyOutcome),
    /// Malformed payload; the held list was left alone.
    Discarded,
    /// The server closed the connection.
    Closed,
    /// Control frame with no payload for us.
    Ignored,
}

/// Feeds one inbound frame to the reconciler. Text frames, and binary frames holding
/// UTF-8, must carry a JSON array of containers.
pub fn handle_frame(reconciler: &Reconciler, frame: WsMessage) -> FrameOutcome {
    match frame {
        WsMessage::Text(text) => handle_payload(reconciler, text.as_str()),
        WsMessage::Binary(bytes) => match std::str::from_utf8(&bytes) {
            Ok(text) => handle_payload(reconciler, text),
            Err(e) => {
                warn!(error = %e, bytes = bytes.len(), "Discarding non UTF-8 binary stream message.");
                FrameOutcome::Discarded
            }
        },
        WsMessage::Close(close_frame) => {
            info!(?close_frame, "Container stream closed by server.");
            FrameOutcome::Closed
        }
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => FrameOutcome::Ignored,
    }
}

fn handle_payload(reconciler: &Reconciler, payload: &str) -> FrameOutcome {
    match parse_container_list(payload) {
        Ok(containers) => {
            let count = containers.len();
            let outcome = reconciler.publish(Source::Stream, containers);
            debug!(count, ?outcome, "Container stream update.");
            FrameOutcome::Applied(outcome)
        }
        Err(e) => {
            warn!(error = %e, bytes = payload.len(), "Discarding malformed container stream message.");
            FrameOutcome::Discarded
        }
    }
}

/// Long-lived WebSocket subscription to full-list container updates.
#[derive(Debug, Clone)]
pub struct LiveStream {
    url: String,
    backoff: Backoff,
    connect_timeout: Duration,
}

impl LiveStream {
    /// `connect_timeout` bounds the TCP connect plus the WebSocket handshake of each attempt.
    pub fn new(url: impl Into<String>, backoff: Backoff, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            backoff,
            connect_timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Connects, forwards frames into `reconciler` and reconnects with backoff until the
    /// shutdown signal fires (or its sender is dropped). The held list keeps its last value
    /// while disconnected.
    pub async fn run(mut self, reconciler: Arc<Reconciler>, mut shutdown_rx: watch::Receiver<()>) {
        loop {
            info!(url = %self.url, "Connecting to container stream.");
            let url = self.url.clone();

            let connected = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    info!("Shutdown signal received, abandoning stream connection attempt.");
                    return;
                }
                result = tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(url)) => match result {
                    Ok(Ok((socket, _response))) => Some(socket),
                    Ok(Err(e)) => {
                        warn!(url = %self.url, error = %e, "Failed to connect to container stream.");
                        None
                    }
                    Err(_) => {
                        warn!(
                            url = %self.url,
                            timeout_ms = self.connect_timeout.as_millis() as u64,
                            "Container stream handshake timed out."
                        );
                        None
                    }
                },
            };

            if let Some(socket) = connected {
                info!(url = %self.url, "Container stream connected.");
                self.backoff.reset();
                if pump(socket, &reconciler, &mut shutdown_rx).await {
                    return;
                }
            }

            let delay = self.backoff.next_delay();
            info!(delay_ms = delay.as_millis() as u64, "Sleeping before reconnecting to container stream.");
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    info!("Shutdown signal received while waiting to reconnect.");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Reads frames until the connection ends. Returns `true` when it stopped because of
/// shutdown.
async fn pump(
    mut socket: ContainerSocket,
    reconciler: &Reconciler,
    shutdown_rx: &mut watch::Receiver<()>,
) -> bool {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                info!("Shutdown signal received, closing container stream.");
                if let Err(e) = socket.close(None).await {
                    debug!(error = %e, "Container stream close handshake failed.");
                }
                return true;
            }
            next = socket.next() => match next {
                Some(Ok(frame)) => {
                    if handle_frame(reconciler, frame) == FrameOutcome::Closed {
                        return false;
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Container stream receive error.");
                    return false;
                }
                None => {
                    info!("Container stream ended.");
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::MergePolicy;

    const ONE_CONTAINER: &str = r#"[{"id":"a","name":"web","started_at":1,"cpu_percent":5.5,"memory_percent":1,"memory_usage":"10MiB"}]"#;

    #[test]
    fn test_backoff_doubles_up_to_cap_and_resets() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(350));

        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_text_frame_replaces_list() {
        let reconciler = Reconciler::default();

        let outcome = handle_frame(&reconciler, WsMessage::text(ONE_CONTAINER.to_string()));

        assert_eq!(outcome, FrameOutcome::Applied(ApplyOutcome::Applied));
        let state = reconciler.current();
        assert_eq!(state.source, Some(Source::Stream));
        assert_eq!(state.containers.unwrap()[0].id, "a");
    }

    #[test]
    fn test_utf8_binary_frame_is_accepted() {
        let reconciler = Reconciler::default();

        let outcome = handle_frame(&reconciler, WsMessage::binary(b"[]".to_vec()));

        assert_eq!(outcome, FrameOutcome::Applied(ApplyOutcome::Applied));
        assert_eq!(reconciler.current().containers, Some(Vec::new()));
    }

    #[test]
    fn test_malformed_frames_leave_state_untouched() {
        let reconciler = Reconciler::new(MergePolicy::LastWriteWins);
        handle_frame(&reconciler, WsMessage::text(ONE_CONTAINER.to_string()));
        let before = reconciler.current();

        for frame in [
            WsMessage::text("{not json".to_string()),
            WsMessage::text(r#"{"id":"a"}"#.to_string()),
            WsMessage::text(r#"[{"id":"a"}]"#.to_string()),
            WsMessage::binary(vec![0xff, 0xfe, 0x00]),
        ] {
            assert_eq!(handle_frame(&reconciler, frame), FrameOutcome::Discarded);
        }

        assert_eq!(reconciler.current(), before);
    }

    #[test]
    fn test_control_frames() {
        let reconciler = Reconciler::default();

        assert_eq!(
            handle_frame(&reconciler, WsMessage::Ping(Default::default())),
            FrameOutcome::Ignored
        );
        assert_eq!(handle_frame(&reconciler, WsMessage::Close(None)), FrameOutcome::Closed);
        assert!(reconciler.current().is_pending());
    }

    #[test]
    fn test_frame_after_close_is_dropped() {
        let reconciler = Reconciler::default();
        reconciler.close();

        let outcome = handle_frame(&reconciler, WsMessage::text(ONE_CONTAINER.to_string()));

        assert_eq!(outcome, FrameOutcome::Applied(ApplyOutcome::Closed));
        assert!(reconciler.current().is_pending());
    }
}
