//! Future-like handles returned by asynchronous component methods.

use std::fmt;
use std::sync::mpsc::{self, Receiver, SyncSender};

use serde_json::Value;

use super::InvocationFault;

/// Result handle of an asynchronous method that returns a value.
///
/// The dispatcher blocks on [`PendingResult::wait`] from a worker thread; the
/// client has already been released by the proceed-async notice.
pub struct PendingResult {
    receiver: Receiver<Result<Value, InvocationFault>>,
}

/// Completion side of a [`PendingResult`].
pub struct PendingSender {
    sender: SyncSender<Result<Value, InvocationFault>>,
}

/// Creates a connected sender/result pair.
#[must_use]
pub fn pending_channel() -> (PendingSender, PendingResult) {
    let (sender, receiver) = mpsc::sync_channel(1);
    (PendingSender { sender }, PendingResult { receiver })
}

impl PendingResult {
    /// Builds a handle that is already complete.
    #[must_use]
    pub fn ready(result: Result<Value, InvocationFault>) -> Self {
        let (sender, pending) = pending_channel();
        sender.complete(result);
        pending
    }

    /// Blocks until the result is available.
    ///
    /// A sender dropped without completing is reported as
    /// [`InvocationFault::Cancelled`].
    pub fn wait(self) -> Result<Value, InvocationFault> {
        self.receiver
            .recv()
            .unwrap_or(Err(InvocationFault::Cancelled))
    }
}

impl PendingSender {
    /// Completes the pending result. Returns `false` when nobody is waiting.
    pub fn complete(self, result: Result<Value, InvocationFault>) -> bool {
        self.sender.send(result).is_ok()
    }
}

impl fmt::Debug for PendingResult {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("PendingResult").finish_non_exhaustive()
    }
}

impl fmt::Debug for PendingSender {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("PendingSender").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use serde_json::json;

    use super::*;

    #[test]
    fn ready_result_returns_immediately() {
        let pending = PendingResult::ready(Ok(json!(7)));
        assert_eq!(pending.wait().expect("value"), json!(7));
    }

    #[test]
    fn wait_blocks_until_completed_from_another_thread() {
        let (sender, pending) = pending_channel();
        let producer = thread::spawn(move || sender.complete(Ok(json!("done"))));
        assert_eq!(pending.wait().expect("value"), json!("done"));
        assert!(producer.join().expect("join producer"));
    }

    #[test]
    fn dropped_sender_reports_cancellation() {
        let (sender, pending) = pending_channel();
        drop(sender);
        assert!(matches!(pending.wait(), Err(InvocationFault::Cancelled)));
    }
}
