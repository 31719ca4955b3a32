//! Cancellation race between a queued task and a client cancel message.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use dashmap::DashMap;

use super::request::InvocationId;

const UNSET: u8 = 0;
const RUNNING: u8 = 1;
const CANCELLED: u8 = 2;
const STATE_MASK: u8 = 0b011;
// Set when a cancel arrives after the task started running.
const CANCEL_REQUESTED: u8 = 0b100;

/// Observable state of a [`CancellationFlag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationState {
    /// Neither party has won yet.
    Unset,
    /// The task started running.
    Running,
    /// The cancel request won.
    Cancelled,
}

/// Single-cell flag deciding whether a queued invocation runs.
///
/// Exactly one of [`try_run`](Self::try_run) and [`cancel`](Self::cancel)
/// wins the transition out of the unset state. A cancel that loses to a
/// running task is still recorded so asynchronous methods can check for it
/// cooperatively.
#[derive(Debug, Default)]
pub struct CancellationFlag {
    state: AtomicU8,
}

impl CancellationFlag {
    /// Creates an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the flag for the running task. Returns `false` if a cancel
    /// already won.
    pub fn try_run(&self) -> bool {
        self.state
            .compare_exchange(UNSET, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claims the flag for the canceller. Returns `false` if the task is
    /// already running or the flag was already cancelled.
    pub fn cancel(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            match current & STATE_MASK {
                UNSET => match self.state.compare_exchange_weak(
                    current,
                    CANCELLED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return true,
                    Err(actual) => current = actual,
                },
                RUNNING => {
                    self.state.fetch_or(CANCEL_REQUESTED, Ordering::AcqRel);
                    return false;
                }
                _ => return false,
            }
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CancellationState {
        match self.state.load(Ordering::Acquire) & STATE_MASK {
            UNSET => CancellationState::Unset,
            RUNNING => CancellationState::Running,
            _ => CancellationState::Cancelled,
        }
    }

    /// Whether a cancel was received, before or after the task started.
    #[must_use]
    pub fn was_cancel_requested(&self) -> bool {
        let state = self.state.load(Ordering::Acquire);
        state & STATE_MASK == CANCELLED || state & CANCEL_REQUESTED != 0
    }
}

/// Outstanding invocations keyed by identifier.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    entries: DashMap<InvocationId, Arc<CancellationFlag>>,
}

impl CancellationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a flag. The entry is removed when the returned guard drops.
    ///
    /// A later registration under the same identifier replaces the entry; the
    /// earlier guard then leaves the newer entry in place.
    pub fn register(self: &Arc<Self>, id: InvocationId, flag: Arc<CancellationFlag>) -> Registration {
        self.entries.insert(id, Arc::clone(&flag));
        Registration {
            registry: Arc::clone(self),
            id,
            flag,
        }
    }

    /// Cancels the invocation if it is registered and has not started.
    pub fn cancel(&self, id: InvocationId) -> bool {
        let flag = self.entries.get(&id).map(|entry| Arc::clone(entry.value()));
        flag.is_some_and(|flag| flag.cancel())
    }

    /// Whether the identifier is registered.
    #[must_use]
    pub fn contains(&self, id: InvocationId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of outstanding invocations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no invocation is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Removes its registry entry on drop.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<CancellationRegistry>,
    id: InvocationId,
    flag: Arc<CancellationFlag>,
}

impl Registration {
    /// Registered identifier.
    #[must_use]
    pub fn id(&self) -> InvocationId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry
            .entries
            .remove_if(&self.id, |_, flag| Arc::ptr_eq(flag, &self.flag));
    }
}

/// Cancel capability returned to the transport for one invocation.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Option<Arc<CancellationFlag>>,
}

impl CancelHandle {
    pub(crate) fn new(flag: Arc<CancellationFlag>) -> Self {
        Self { flag: Some(flag) }
    }

    /// Handle for requests that finished before any work was queued.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Requests cancellation. Returns `true` only if the invocation had not
    /// started.
    pub fn cancel(&self) -> bool {
        self.flag.as_ref().is_some_and(|flag| flag.cancel())
    }

    /// Whether the handle refers to a queued invocation.
    #[must_use]
    pub fn is_cancellable(&self) -> bool {
        self.flag.is_some()
    }
}
