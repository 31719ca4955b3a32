//! Internal dispatcher failures.
//!
//! None of these reach the caller. Response-path failures are logged and
//! swallowed so that a broken transport cannot take the dispatcher down or
//! leak an in-flight invocation's bookkeeping.

use std::io;

use thiserror::Error;

use super::response::ResponseError;

/// Errors raised inside the dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The transport sink failed to write a response.
    #[error("failed to write {action} response: {source}")]
    ResponseWrite {
        action: &'static str,
        #[source]
        source: ResponseError,
    },

    /// A second response of the same class was attempted.
    #[error("{action} response suppressed: a response was already written")]
    ResponseAlreadyWritten { action: &'static str },

    /// The worker pool no longer accepts tasks.
    #[error("worker pool has shut down")]
    PoolShutDown,

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker {name}: {source}")]
    WorkerSpawn {
        name: String,
        #[source]
        source: io::Error,
    },
}

impl DispatchError {
    /// Creates a response write error.
    pub fn response_write(action: &'static str, source: ResponseError) -> Self {
        Self::ResponseWrite { action, source }
    }

    /// Creates a duplicate response error.
    pub fn already_written(action: &'static str) -> Self {
        Self::ResponseAlreadyWritten { action }
    }

    /// Creates a worker spawn error.
    pub fn worker_spawn(name: impl Into<String>, source: io::Error) -> Self {
        Self::WorkerSpawn {
            name: name.into(),
            source,
        }
    }
}
