//! Live view of the containers reported by a podstation backend: one REST snapshot and
//! a WebSocket stream of full-list updates, reconciled into a single observable value.
pub mod client;
pub mod config;
pub mod error;
pub mod live;
pub mod logging;
pub mod models;
pub mod reconciler;
pub mod version;

pub use config::ClientConfig;
pub use error::{ConfigError, CustomError, FetchError, StartError};
pub use live::LiveContainers;
pub use models::{Container, ContainerList};
pub use reconciler::{ContainerState, MergePolicy, Reconciler, Source};
