//! Contracts implemented by deployed components.
//!
//! The dispatcher never reaches into a component: it hands an assembled
//! [`InvocationContext`] to [`Component::invoke`], which stands in for the
//! component's interceptor chain, and reads back a value, a pending result,
//! or an [`InvocationFault`]. Affinity hints and session creation are exposed
//! through the same trait so a single handle describes everything the
//! dispatcher needs from a deployed unit.

mod affinity;
mod fault;
mod pending;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dispatch::InvocationContext;

pub use affinity::{Affinity, AffinityError};
pub use fault::{ApplicationException, InvocationFault};
pub use pending::{PendingResult, PendingSender, pending_channel};

/// Kinds of deployable component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    /// Stateless session component.
    Stateless,
    /// Stateful session component; calls carry a session identifier.
    Stateful,
    /// Singleton session component.
    Singleton,
    /// Message-driven component.
    MessageDriven,
}

impl ComponentKind {
    /// Returns `true` for the session-component kinds.
    #[must_use]
    pub fn is_session(self) -> bool {
        matches!(self, Self::Stateless | Self::Stateful | Self::Singleton)
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Stateless => "stateless",
            Self::Stateful => "stateful",
            Self::Singleton => "singleton",
            Self::MessageDriven => "message-driven",
        };
        formatter.write_str(label)
    }
}

/// Identifier of a stateful session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Wraps a session identifier.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrowed identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Successful return of [`Component::invoke`].
#[derive(Debug)]
pub enum InvocationReturn {
    /// A plain value; void methods return [`Value::Null`].
    Value(Value),
    /// A future-like handle produced by an asynchronous method.
    Pending(PendingResult),
}

impl InvocationReturn {
    /// Return of a void method.
    #[must_use]
    pub fn void() -> Self {
        Self::Value(Value::Null)
    }
}

/// A deployed, invocable unit.
pub trait Component: Send + Sync {
    /// Component name, unique within its module.
    fn name(&self) -> &str;

    /// Kind of component.
    fn kind(&self) -> ComponentKind;

    /// Runs the invocation through the component's interceptor chain.
    ///
    /// Interceptors may write to the context data; keys the caller asked to
    /// have returned are copied back into the response attachments.
    fn invoke(&self, context: &mut InvocationContext) -> Result<InvocationReturn, InvocationFault>;

    /// Whether the exception type can be rebuilt by remote clients.
    fn is_remotable(&self, _exception: &ApplicationException) -> bool {
        true
    }

    /// Current routing hint, scoped to a session for stateful components.
    fn affinity_hint(&self, _session: Option<&SessionId>) -> Result<Option<Affinity>, AffinityError> {
        Ok(None)
    }

    /// Strict affinity required by the component's session cache.
    fn strict_affinity(&self) -> Result<Option<Affinity>, AffinityError> {
        Ok(None)
    }

    /// Creates a new remote session.
    fn create_session(&self) -> Result<SessionId, InvocationFault> {
        Err(InvocationFault::application(
            "IllegalStateException",
            format!("{} does not support sessions", self.name()),
        ))
    }

    /// Blocks until the component has finished starting.
    fn await_start(&self) {}
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(ComponentKind::Stateless, true)]
    #[case(ComponentKind::Stateful, true)]
    #[case(ComponentKind::Singleton, true)]
    #[case(ComponentKind::MessageDriven, false)]
    fn session_kinds(#[case] kind: ComponentKind, #[case] expected: bool) {
        assert_eq!(kind.is_session(), expected);
    }
}
