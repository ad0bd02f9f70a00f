use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::client::api_fetch::ApiClient;
use crate::config::CONTAINERS_PATH;
use crate::error::{CustomError, FetchError};
use crate::models::ContainerList;
use crate::reconciler::{ApplyOutcome, Reconciler, Source};

/// Outcome of the one-shot snapshot request.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SnapshotStatus {
    #[default]
    Pending,
    Loaded {
        count: usize,
    },
    Failed(CustomError),
}

/// Reads the full container list once from `GET {base}/containers`.
#[derive(Clone, Debug)]
pub struct SnapshotLoader {
    api: ApiClient,
}

impl SnapshotLoader {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn load(&self) -> Result<ContainerList, FetchError> {
        self.api.get_json(CONTAINERS_PATH).await
    }

    /// Loads once and hands the result to `reconciler`. Never retries; a failure is
    /// recorded in `status_tx` and the stream remains the only source.
    ///
    /// The ordering ticket is taken before the request goes out. A shutdown signal drops
    /// the in-flight request.
    pub async fn run(
        self,
        reconciler: Arc<Reconciler>,
        status_tx: watch::Sender<SnapshotStatus>,
        mut shutdown_rx: watch::Receiver<()>,
    ) {
        let ticket = reconciler.ticket();
        info!(base_url = %self.api.base_url(), "Requesting container snapshot.");

        let result = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                info!("Shutdown signal received, cancelling snapshot request.");
                return;
            }
            result = self.load() => result,
        };

        match result {
            Ok(containers) => {
                let count = containers.len();
                let outcome = reconciler.apply(ticket, Source::Snapshot, containers);
                if outcome == ApplyOutcome::Closed {
                    info!(count, "Container snapshot arrived after shutdown. Dropped.");
                    return;
                }
                info!(count, ?outcome, "Container snapshot received.");
                status_tx.send_replace(SnapshotStatus::Loaded { count });
            }
            Err(e) => {
                let custom = e.to_custom_error();
                warn!(
                    error = %e,
                    status_code = custom.status_code,
                    "Container snapshot failed. Relying on the live stream."
                );
                status_tx.send_replace(SnapshotStatus::Failed(custom));
            }
        }
    }
}
