//! Execution mode classification and the inline-execution policy.

use std::fmt;

use crate::component::ComponentKind;
use crate::deployment::ViewMethod;

/// How the caller waits for an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// The caller waits for the result.
    Sync,
    /// The caller is released by a proceed-async notice and later receives
    /// the result.
    AsyncWithResult,
    /// The caller is released by an accepted response and receives nothing
    /// else.
    OneWay,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Sync => "sync",
            Self::AsyncWithResult => "async",
            Self::OneWay => "one_way",
        };
        formatter.write_str(label)
    }
}

/// Mode of a resolved method plus what the component kind implies for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    mode: ExecutionMode,
    session_component: bool,
}

impl Classification {
    /// Execution mode.
    #[must_use]
    pub fn mode(self) -> ExecutionMode {
        self.mode
    }

    /// Whether the call is one-way.
    #[must_use]
    pub fn is_one_way(self) -> bool {
        self.mode == ExecutionMode::OneWay
    }

    /// Whether the invoked method receives the cancellation flag.
    ///
    /// Only asynchronous session-component calls that return a result can
    /// check for cooperative cancellation.
    #[must_use]
    pub fn exposes_cancellation(self) -> bool {
        self.mode == ExecutionMode::AsyncWithResult && self.session_component
    }

    /// Whether an asynchronous method was declared on a component that
    /// cannot run asynchronously; such calls run as plain invocations.
    #[must_use]
    pub fn is_async_on_plain_component(self) -> bool {
        self.mode != ExecutionMode::Sync && !self.session_component
    }
}

/// Classifies a resolved method.
///
/// A method is one-way iff it is declared asynchronous and returns nothing,
/// and async-with-result iff declared asynchronous with a return value.
#[must_use]
pub fn classify(method: &ViewMethod, kind: ComponentKind) -> Classification {
    let mode = match (method.is_asynchronous(), method.is_void()) {
        (true, true) => ExecutionMode::OneWay,
        (true, false) => ExecutionMode::AsyncWithResult,
        (false, _) => ExecutionMode::Sync,
    };
    Classification {
        mode,
        session_component: kind.is_session(),
    }
}

/// Decides where a classified invocation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPolicy {
    local_protocol: String,
}

impl ExecutionPolicy {
    /// Builds a policy treating `local_protocol` as the in-process transport.
    #[must_use]
    pub fn new(local_protocol: impl Into<String>) -> Self {
        Self {
            local_protocol: local_protocol.into(),
        }
    }

    /// Protocol tag of the in-process transport.
    #[must_use]
    pub fn local_protocol(&self) -> &str {
        self.local_protocol.as_str()
    }

    /// Whether the call runs on the transport thread.
    ///
    /// Only synchronous calls over the in-process transport qualify; all
    /// others go to the worker pool.
    #[must_use]
    pub fn should_run_inline(&self, protocol: &str, mode: ExecutionMode) -> bool {
        mode == ExecutionMode::Sync && protocol == self.local_protocol
    }
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self::new(courier_config::DEFAULT_LOCAL_PROTOCOL)
    }
}
