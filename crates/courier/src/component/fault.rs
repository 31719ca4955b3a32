//! Failures reported by a component's invocation chain.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A business exception raised by application code.
///
/// Exceptions form a chain through [`ApplicationException::cause`]. The type
/// name is the declared exception type the client uses to rebuild the error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{type_name}: {message}")]
pub struct ApplicationException {
    type_name: String,
    message: String,
    #[source]
    cause: Option<Box<ApplicationException>>,
}

impl ApplicationException {
    /// Builds an exception without a cause.
    #[must_use]
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            cause: None,
        }
    }

    /// Attaches a wrapped cause.
    #[must_use]
    pub fn caused_by(mut self, cause: Self) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Declared exception type.
    #[must_use]
    pub fn type_name(&self) -> &str {
        self.type_name.as_str()
    }

    /// Human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        self.message.as_str()
    }

    /// Wrapped cause, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&Self> {
        self.cause.as_deref()
    }

    /// Returns a copy with the same type and message but no cause.
    #[must_use]
    pub fn without_cause(&self) -> Self {
        Self::new(self.type_name.clone(), self.message.clone())
    }
}

/// Raw failure surface of [`Component::invoke`](super::Component::invoke).
#[derive(Debug, Error)]
pub enum InvocationFault {
    /// The component is shutting down or otherwise cannot accept calls.
    #[error("component {component} is unavailable")]
    ComponentUnavailable {
        /// Component name.
        component: String,
    },
    /// The component has been stopped.
    #[error("component {component} is stopped")]
    ComponentStopped {
        /// Component name.
        component: String,
    },
    /// The pending result was cancelled before it produced a value.
    #[error("invocation was cancelled")]
    Cancelled,
    /// Application code raised a business exception.
    #[error(transparent)]
    Application(#[from] ApplicationException),
}

impl InvocationFault {
    /// Creates an unavailable fault for the named component.
    pub fn unavailable(component: impl Into<String>) -> Self {
        Self::ComponentUnavailable {
            component: component.into(),
        }
    }

    /// Creates a stopped fault for the named component.
    pub fn stopped(component: impl Into<String>) -> Self {
        Self::ComponentStopped {
            component: component.into(),
        }
    }

    /// Creates an application fault.
    pub fn application(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Application(ApplicationException::new(type_name, message))
    }
}
