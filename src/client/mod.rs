//! Network sources feeding the reconciler: the one-shot REST snapshot and the
//! WebSocket update stream.
pub mod api_fetch;
pub mod snapshot;
pub mod stream;

pub use self::api_fetch::ApiClient;
pub use self::snapshot::{SnapshotLoader, SnapshotStatus};
pub use self::stream::{Backoff, FrameOutcome, LiveStream, handle_frame};
