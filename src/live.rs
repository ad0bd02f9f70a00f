use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::client::{ApiClient, Backoff, LiveStream, SnapshotLoader, SnapshotStatus};
use crate::config::ClientConfig;
use crate::error::StartError;
use crate::reconciler::{ContainerState, MergePolicy, Reconciler};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Running snapshot loader and live stream, reconciled into one observable list.
///
/// Dropping the handle closes the reconciler and aborts both tasks; [`shutdown`] does the
/// same but lets the stream finish its close handshake first.
///
/// [`shutdown`]: LiveContainers::shutdown
pub struct LiveContainers {
    reconciler: Arc<Reconciler>,
    snapshot_rx: watch::Receiver<SnapshotStatus>,
    shutdown_tx: watch::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl LiveContainers {
    /// Spawns both sources on the current tokio runtime.
    pub fn start(config: &ClientConfig) -> Result<Self, StartError> {
        config.validate()?;
        let api = ApiClient::new(&config.base_url, config.request_timeout)?;
        let stream = LiveStream::new(
            config.stream_endpoint()?,
            Backoff::new(config.reconnect_initial, config.reconnect_max),
            config.request_timeout,
        );
        Ok(Self::start_with(
            SnapshotLoader::new(api),
            stream,
            config.merge_policy,
        ))
    }

    pub fn start_with(loader: SnapshotLoader, stream: LiveStream, policy: MergePolicy) -> Self {
        let reconciler = Arc::new(Reconciler::new(policy));
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let (snapshot_tx, snapshot_rx) = watch::channel(SnapshotStatus::Pending);
        info!(
            stream_url = %stream.url(),
            policy = ?reconciler.policy(),
            "Starting live container view."
        );

        let mut tasks = Vec::new();

        let snapshot_reconciler = Arc::clone(&reconciler);
        let snapshot_shutdown_rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            loader
                .run(snapshot_reconciler, snapshot_tx, snapshot_shutdown_rx)
                .await;
        }));

        let stream_reconciler = Arc::clone(&reconciler);
        tasks.push(tokio::spawn(async move {
            stream.run(stream_reconciler, shutdown_rx).await;
            info!("Container stream task ended.");
        }));

        Self {
            reconciler,
            snapshot_rx,
            shutdown_tx,
            tasks,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ContainerState> {
        self.reconciler.subscribe()
    }

    pub fn current(&self) -> ContainerState {
        self.reconciler.current()
    }

    pub fn snapshot_status(&self) -> SnapshotStatus {
        self.snapshot_rx.borrow().clone()
    }

    pub fn watch_snapshot_status(&self) -> watch::Receiver<SnapshotStatus> {
        self.snapshot_rx.clone()
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Stops both sources. No update is applied once this is called.
    pub async fn shutdown(mut self) {
        self.reconciler.close();
        // Errors only when both tasks already finished.
        let _ = self.shutdown_tx.send(());

        for handle in std::mem::take(&mut self.tasks) {
            let abort_handle = handle.abort_handle();
            match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(join_error)) if join_error.is_cancelled() => {}
                Ok(Err(join_error)) => {
                    error!(error = ?join_error, "Live container task panicked.");
                }
                Err(_) => {
                    warn!("Live container task did not stop in time. Aborting.");
                    abort_handle.abort();
                }
            }
        }
        info!("Live container view stopped.");
    }
}

impl Drop for LiveContainers {
    fn drop(&mut self) {
        self.reconciler.close();
        for handle in &self.tasks {
            handle.abort();
        }
    }
}
