//! Outcome classification and response encoding.
//!
//! Both steps are pure functions: the executor collects the raw result of the
//! invocation chain, [`classify_outcome`] folds it into an [`ExecutionOutcome`],
//! and [`encode`] picks the single response action the caller receives.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use serde_json::Value;
use tracing::warn;

use super::DISPATCH_TARGET;

use crate::component::{ApplicationException, Component, ComponentKind, InvocationFault, SessionId};
use crate::pool::panic_message;

/// Why a resolved component could not take the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    /// Shutting down or otherwise refusing calls.
    Unavailable,
    /// Already stopped.
    Stopped,
}

/// Infrastructure conditions that prevent a call from reaching application
/// code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfrastructureFailure {
    /// No started module or component matches the target.
    NoSuchTarget,
    /// No view method matches the locator.
    NoSuchMethod,
    /// The view is missing or not remotely invocable.
    WrongViewType,
    /// The component refused the call.
    ComponentUnavailable(UnavailableReason),
    /// A session was requested on a component without sessions.
    NotStateful,
}

impl fmt::Display for InfrastructureFailure {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NoSuchTarget => "no such target",
            Self::NoSuchMethod => "no such method",
            Self::WrongViewType => "wrong view type",
            Self::ComponentUnavailable(UnavailableReason::Unavailable) => "component unavailable",
            Self::ComponentUnavailable(UnavailableReason::Stopped) => "component stopped",
            Self::NotStateful => "not stateful",
        };
        formatter.write_str(label)
    }
}

/// Terminal outcome of one invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The method returned a value (`null` for void methods).
    Success(Value),
    /// Application code raised a business exception.
    ApplicationException {
        exception: ApplicationException,
        /// Whether the exception's cause can be rebuilt by remote clients.
        remotable: bool,
    },
    /// The call never reached application code.
    InfrastructureFailure(InfrastructureFailure),
    /// The call was cancelled before it ran, or its pending result was.
    Cancelled,
}

impl ExecutionOutcome {
    /// Whether the outcome is a success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Short label for logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::ApplicationException { .. } => "application_exception",
            Self::InfrastructureFailure(_) => "infrastructure_failure",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Folds the raw result of the invocation chain into an outcome.
///
/// The component decides whether an exception's cause is remotable.
pub fn classify_outcome(
    result: Result<Value, InvocationFault>,
    component: &dyn Component,
) -> ExecutionOutcome {
    match result {
        Ok(value) => ExecutionOutcome::Success(value),
        Err(InvocationFault::ComponentUnavailable { .. }) => ExecutionOutcome::InfrastructureFailure(
            InfrastructureFailure::ComponentUnavailable(UnavailableReason::Unavailable),
        ),
        Err(InvocationFault::ComponentStopped { .. }) => ExecutionOutcome::InfrastructureFailure(
            InfrastructureFailure::ComponentUnavailable(UnavailableReason::Stopped),
        ),
        Err(InvocationFault::Cancelled) => ExecutionOutcome::Cancelled,
        Err(InvocationFault::Application(exception)) => {
            let remotable = exception
                .cause()
                .is_none_or(|cause| is_remotable(component, cause));
            ExecutionOutcome::ApplicationException {
                exception,
                remotable,
            }
        }
    }
}

/// Asks the component whether `cause` is remotable. A panicking check counts
/// as "not remotable".
fn is_remotable(component: &dyn Component, cause: &ApplicationException) -> bool {
    panic::catch_unwind(AssertUnwindSafe(|| component.is_remotable(cause))).unwrap_or_else(|payload| {
        warn!(
            target: DISPATCH_TARGET,
            component = component.name(),
            exception = cause.type_name(),
            panic = %panic_message(&*payload),
            "remotability check panicked; dropping the cause"
        );
        false
    })
}

/// A single write against the response sink.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseAction {
    /// Invocation result carrying the returned value.
    InvocationResult(Value),
    /// Immediate result of a one-way call.
    Accepted,
    /// Business exception.
    Exception(ApplicationException),
    /// Negative response prompting client failover.
    NoSuchTarget,
    /// Negative response for a non-remote or missing view.
    WrongView,
    /// Negative response for an unmatched locator.
    NoSuchMethod,
    /// Negative response to a session request on a non-stateful component.
    NotStateful,
    /// The invocation was cancelled.
    Cancelled,
    /// Notice that releases a caller waiting on an asynchronous method.
    ProceedAsync,
    /// A new session was created.
    SessionOpened(SessionId),
}

impl ResponseAction {
    /// Short label for logs and errors.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::InvocationResult(_) => "invocation_result",
            Self::Accepted => "accepted",
            Self::Exception(_) => "exception",
            Self::NoSuchTarget => "no_such_target",
            Self::WrongView => "wrong_view",
            Self::NoSuchMethod => "no_such_method",
            Self::NotStateful => "not_stateful",
            Self::Cancelled => "cancelled",
            Self::ProceedAsync => "proceed_async",
            Self::SessionOpened(_) => "session_opened",
        }
    }

    /// Whether the action ends the exchange, as opposed to a notice that
    /// precedes the terminal response.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::ProceedAsync)
    }
}

impl From<InfrastructureFailure> for ResponseAction {
    fn from(failure: InfrastructureFailure) -> Self {
        match failure {
            InfrastructureFailure::NoSuchTarget | InfrastructureFailure::ComponentUnavailable(_) => {
                Self::NoSuchTarget
            }
            InfrastructureFailure::NoSuchMethod => Self::NoSuchMethod,
            InfrastructureFailure::WrongViewType => Self::WrongView,
            InfrastructureFailure::NotStateful => Self::NotStateful,
        }
    }
}

/// Maps an outcome onto the response the caller receives.
///
/// Unavailable and stopped components collapse onto "no such target" so the
/// client fails over. A stateful component's exception whose cause is not
/// remotable is replaced with a cause-free copy of itself.
#[must_use]
pub fn encode(outcome: ExecutionOutcome, kind: ComponentKind) -> ResponseAction {
    match outcome {
        ExecutionOutcome::Success(value) => ResponseAction::InvocationResult(value),
        ExecutionOutcome::ApplicationException {
            exception,
            remotable,
        } => {
            if kind == ComponentKind::Stateful && !remotable && exception.cause().is_some() {
                ResponseAction::Exception(exception.without_cause())
            } else {
                ResponseAction::Exception(exception)
            }
        }
        ExecutionOutcome::InfrastructureFailure(failure) => failure.into(),
        ExecutionOutcome::Cancelled => ResponseAction::Cancelled,
    }
}
