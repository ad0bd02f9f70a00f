use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use tracing::{error, info, warn};

use podstation_live::client::SnapshotStatus;
use podstation_live::config::PartialClientConfig;
use podstation_live::logging::init_logging;
use podstation_live::version::VERSION;
use podstation_live::{ClientConfig, ContainerState, LiveContainers, MergePolicy};

/// Follows the live container list of a podstation backend and logs every change.
#[derive(Parser, Debug)]
#[command(name = "podstation-watch", version = VERSION)]
struct Cli {
    /// TOML config file. Environment variables override it, flags override both.
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(long)]
    base_url: Option<String>,
    /// WebSocket endpoint; derived from the base URL when omitted.
    #[arg(long)]
    stream_url: Option<String>,
    /// Also write JSON logs, rotated daily, into this directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,
    /// Ignore snapshot responses older than the latest stream update.
    #[arg(long)]
    sequenced: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    init_logging(cli.log_dir.as_deref())?;
    info!(version = VERSION, "Starting container watcher...");

    let overrides = PartialClientConfig {
        base_url: cli.base_url,
        stream_url: cli.stream_url,
        merge_policy: cli.sequenced.then_some(MergePolicy::Sequenced),
        ..PartialClientConfig::default()
    };
    let config = match ClientConfig::load_with_overrides(cli.config.as_deref(), overrides) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Critical error loading configuration. Exiting.");
            return Err(e.into());
        }
    };
    info!(base_url = %config.base_url, stream_url = %config.stream_endpoint()?, "Configuration loaded.");

    let live = LiveContainers::start(&config)?;
    let mut updates = live.subscribe();
    let mut snapshot = live.watch_snapshot_status();
    let mut snapshot_open = true;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for Ctrl-C.");
                }
                info!("Shutting down container watcher.");
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = updates.borrow_and_update().clone();
                log_state(&state);
            }
            changed = snapshot.changed(), if snapshot_open => {
                if changed.is_err() {
                    snapshot_open = false;
                    continue;
                }
                if let SnapshotStatus::Failed(custom) = &*snapshot.borrow_and_update() {
                    warn!(
                        status_code = custom.status_code,
                        message = %custom.message,
                        "Snapshot request failed; showing stream data only."
                    );
                }
            }
        }
    }

    live.shutdown().await;
    Ok(())
}

fn log_state(state: &ContainerState) {
    let Some(containers) = &state.containers else {
        return;
    };
    info!(
        count = containers.len(),
        source = ?state.source,
        sequence = state.sequence,
        "Container list updated."
    );
    for container in containers {
        info!(
            id = %container.id,
            name = %container.name,
            cpu_percent = container.cpu_percent,
            memory_percent = container.memory_percent,
            memory_usage = %container.memory_usage,
            started_at = ?container.started_at_utc(),
            "container"
        );
    }
}
