use std::path::Path;
use tracing_appender::rolling;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Human-readable logs on stdout, plus daily rotated JSON files when `log_dir` is given.
/// The level comes from `RUST_LOG` and defaults to `info`.
pub fn init_logging(log_dir: Option<&Path>) -> Result<(), TryInitError> {
    let file_layer = log_dir.map(|dir| {
        fmt::layer()
            .with_writer(rolling::daily(dir, "podstation-watch.log"))
            .with_ansi(false)
            .json()
    });

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
}
