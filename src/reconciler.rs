//! Single observed container list fed by the snapshot loader and the live stream.
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::models::ContainerList;

/// Which producer delivered the held value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Snapshot,
    Stream,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Snapshot => write!(f, "snapshot"),
            Source::Stream => write!(f, "stream"),
        }
    }
}

/// How competing updates are ordered.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// The most recently arrived value replaces the held one, whatever its source. A
    /// slow snapshot response can therefore overwrite a newer stream frame.
    #[default]
    LastWriteWins,
    /// Updates carry a ticket taken when their data was requested (snapshot) or
    /// received (stream); older tickets never replace newer ones.
    Sequenced,
}

impl FromStr for MergePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "last_write_wins" => Ok(MergePolicy::LastWriteWins),
            "sequenced" => Ok(MergePolicy::Sequenced),
            other => Err(format!(
                "unknown merge policy {other:?}, expected last_write_wins or sequenced"
            )),
        }
    }
}

/// The value every subscriber observes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContainerState {
    /// `None` until a source has reported; `Some(vec![])` is a reported empty list.
    pub containers: Option<ContainerList>,
    pub source: Option<Source>,
    /// Highest ticket accepted so far. 0 before the first update.
    pub sequence: u64,
}

impl ContainerState {
    pub fn is_pending(&self) -> bool {
        self.containers.is_none()
    }
}

/// Ordering token handed out by [`Reconciler::ticket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticket(u64);

impl Ticket {
    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The held list was replaced and subscribers were notified.
    Applied,
    /// The list equals the held one; nothing observable changed.
    Unchanged,
    /// A newer update is already held (sequenced policy only).
    Stale,
    /// The reconciler was closed; the update was dropped.
    Closed,
}

struct WriteState {
    next_ticket: u64,
    closed: bool,
}

pub struct Reconciler {
    policy: MergePolicy,
    // Guards ordering and the closed flag; every write to `state_tx` happens under it.
    write_state: Mutex<WriteState>,
    state_tx: watch::Sender<ContainerState>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(MergePolicy::default())
    }
}

impl Reconciler {
    pub fn new(policy: MergePolicy) -> Self {
        let (state_tx, _) = watch::channel(ContainerState::default());
        Self {
            policy,
            write_state: Mutex::new(WriteState {
                next_ticket: 1,
                closed: false,
            }),
            state_tx,
        }
    }

    pub fn policy(&self) -> MergePolicy {
        self.policy
    }

    /// Registers a new observer. Dropping the receiver unsubscribes it.
    pub fn subscribe(&self) -> watch::Receiver<ContainerState> {
        self.state_tx.subscribe()
    }

    pub fn current(&self) -> ContainerState {
        self.state_tx.borrow().clone()
    }

    /// Reserves the next position in the update order.
    pub fn ticket(&self) -> Ticket {
        let mut state = self.lock_write_state();
        let ticket = Ticket(state.next_ticket);
        state.next_ticket += 1;
        ticket
    }

    /// Takes a ticket and applies `containers` with it.
    pub fn publish(&self, source: Source, containers: ContainerList) -> ApplyOutcome {
        let ticket = self.ticket();
        self.apply(ticket, source, containers)
    }

    /// Replaces the held list with `containers`, subject to the merge policy.
    pub fn apply(&self, ticket: Ticket, source: Source, containers: ContainerList) -> ApplyOutcome {
        let state = self.lock_write_state();
        if state.closed {
            debug!(%source, ticket = ticket.0, "Dropping update after close.");
            return ApplyOutcome::Closed;
        }

        let mut outcome = ApplyOutcome::Applied;
        self.state_tx.send_if_modified(|held| {
            if self.policy == MergePolicy::Sequenced && ticket.0 < held.sequence {
                debug!(
                    %source,
                    ticket = ticket.0,
                    held = held.sequence,
                    "Ignoring update older than the held value."
                );
                outcome = ApplyOutcome::Stale;
                return false;
            }

            held.sequence = held.sequence.max(ticket.0);
            if held.containers.as_ref() == Some(&containers) {
                outcome = ApplyOutcome::Unchanged;
                return false;
            }

            if self.policy == MergePolicy::LastWriteWins
                && held.source == Some(Source::Stream)
                && source == Source::Snapshot
                && ticket.0 < held.sequence
            {
                warn!(
                    ticket = ticket.0,
                    held = held.sequence,
                    "Snapshot issued before the held stream update is replacing it."
                );
            }

            held.containers = Some(containers);
            held.source = Some(source);
            true
        });
        drop(state);
        outcome
    }

    /// Stops accepting updates. Subscribers keep the last value.
    pub fn close(&self) {
        self.lock_write_state().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lock_write_state().closed
    }

    fn lock_write_state(&self) -> std::sync::MutexGuard<'_, WriteState> {
        // The guarded data stays consistent even if a holder panicked.
        self.write_state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
