//! Structured observation of the per-invocation state machine.

use std::fmt;
use std::sync::Arc;

use crate::dispatch::{ExecutionOutcome, InvocationId};

const OBSERVER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// States an invocation passes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Looking up component, view and method.
    Resolving,
    /// Deciding the execution mode.
    Classifying,
    /// Writing the accepted or proceed-async notice.
    ImmediateResponse,
    /// Queued behind the cancellation race.
    AwaitingExecutionSlot,
    /// Inside the component's invocation chain.
    Running,
    /// Classifying the outcome and attaching affinity.
    Completing,
    /// Response issued and bookkeeping released.
    Terminal,
}

impl Phase {
    /// Snake-case label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resolving => "resolving",
            Self::Classifying => "classifying",
            Self::ImmediateResponse => "immediate_response",
            Self::AwaitingExecutionSlot => "awaiting_execution_slot",
            Self::Running => "running",
            Self::Completing => "completing",
            Self::Terminal => "terminal",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Identifies an invocation in logs and observer callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvocationLabel {
    id: InvocationId,
    target: String,
    operation: String,
}

impl InvocationLabel {
    /// Builds a label.
    #[must_use]
    pub fn new(id: InvocationId, target: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            id,
            target: target.into(),
            operation: operation.into(),
        }
    }

    /// Invocation identifier.
    #[must_use]
    pub fn id(&self) -> InvocationId {
        self.id
    }

    /// Target component path.
    #[must_use]
    pub fn target(&self) -> &str {
        self.target.as_str()
    }

    /// Invoked method signature, or the session operation.
    #[must_use]
    pub fn operation(&self) -> &str {
        self.operation.as_str()
    }
}

impl fmt::Display for InvocationLabel {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "#{} {}::{}", self.id, self.target, self.operation)
    }
}

/// Observer trait used to surface dispatch lifecycle events.
pub trait DispatchObserver: Send + Sync {
    /// Invoked when an invocation enters a phase.
    fn phase_entered(&self, invocation: &InvocationLabel, phase: Phase);

    /// Invoked once with the invocation's terminal outcome.
    fn outcome(&self, invocation: &InvocationLabel, outcome: &ExecutionOutcome);
}

impl<T> DispatchObserver for Arc<T>
where
    T: DispatchObserver + ?Sized,
{
    fn phase_entered(&self, invocation: &InvocationLabel, phase: Phase) {
        (**self).phase_entered(invocation, phase);
    }

    fn outcome(&self, invocation: &InvocationLabel, outcome: &ExecutionOutcome) {
        (**self).outcome(invocation, outcome);
    }
}

/// Default observer that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredDispatchObserver;

impl StructuredDispatchObserver {
    /// Builds a new observer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl DispatchObserver for StructuredDispatchObserver {
    fn phase_entered(&self, invocation: &InvocationLabel, phase: Phase) {
        tracing::trace!(
            target: OBSERVER_TARGET,
            event = "phase_entered",
            invocation = %invocation,
            phase = %phase,
            "invocation entered phase"
        );
    }

    fn outcome(&self, invocation: &InvocationLabel, outcome: &ExecutionOutcome) {
        match outcome {
            ExecutionOutcome::InfrastructureFailure(failure) => tracing::debug!(
                target: OBSERVER_TARGET,
                event = "outcome",
                invocation = %invocation,
                outcome = outcome.label(),
                failure = %failure,
                "invocation did not reach application code"
            ),
            ExecutionOutcome::ApplicationException { exception, remotable } => tracing::debug!(
                target: OBSERVER_TARGET,
                event = "outcome",
                invocation = %invocation,
                outcome = outcome.label(),
                exception = %exception,
                remotable = *remotable,
                "invocation raised an application exception"
            ),
            ExecutionOutcome::Success(_) | ExecutionOutcome::Cancelled => tracing::debug!(
                target: OBSERVER_TARGET,
                event = "outcome",
                invocation = %invocation,
                outcome = outcome.label(),
                "invocation completed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_displays_id_target_and_operation() {
        let label = InvocationLabel::new(InvocationId::new(42), "app/mod//CounterBean", "increment()");
        assert_eq!(label.to_string(), "#42 app/mod//CounterBean::increment()");
    }

    #[test]
    fn structured_observer_accepts_every_phase() {
        let observer = StructuredDispatchObserver::new();
        let label = InvocationLabel::new(InvocationId::new(1), "t", "m()");
        for phase in [
            Phase::Resolving,
            Phase::Classifying,
            Phase::ImmediateResponse,
            Phase::AwaitingExecutionSlot,
            Phase::Running,
            Phase::Completing,
            Phase::Terminal,
        ] {
            observer.phase_entered(&label, phase);
        }
        observer.outcome(&label, &ExecutionOutcome::Cancelled);
    }
}
