//! Stateful session creation.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::DISPATCH_TARGET;
use super::affinity::best_effort;
use super::cancellation::{CancelHandle, CancellationFlag, Registration};
use super::executor::{COMPONENT_PANIC_TYPE, Dispatcher};
use super::outcome::{ExecutionOutcome, InfrastructureFailure, ResponseAction, classify_outcome, encode};
use super::request::{Attachments, SecurityIdentity, SessionOpenRequest};
use super::response::{ResponseChannel, ResponseSink};
use crate::component::{ComponentKind, InvocationFault, SessionId};
use crate::deployment::DeployedComponent;
use crate::legacy::{CallerConnection, ConnectionScope};
use crate::observer::{DispatchObserver, InvocationLabel, Phase};
use crate::pool::panic_message;

const OPEN_SESSION_OPERATION: &str = "<open-session>";

impl Dispatcher {
    /// Opens a session on a stateful component.
    ///
    /// Resolution failures answer "no such target" and non-stateful
    /// components answer "not stateful" on the calling thread. Session
    /// creation itself always runs on the executor when one is configured.
    pub fn open_session(&self, request: SessionOpenRequest, sink: Arc<dyn ResponseSink>) -> CancelHandle {
        let label = InvocationLabel::new(
            request.id(),
            request.target().to_string(),
            OPEN_SESSION_OPERATION,
        );
        let mut channel = ResponseChannel::new(sink, label.clone());

        self.observer.phase_entered(&label, Phase::Resolving);
        let deployed = match self.resolver.resolve(request.target()) {
            Ok(deployed) => deployed,
            Err(error) => {
                debug!(
                    target: DISPATCH_TARGET,
                    invocation = %label,
                    error = %error,
                    "cannot resolve session target"
                );
                self.terminate_early(&label, &mut channel, error.failure());
                return CancelHandle::none();
            }
        };
        deployed.component().await_start();

        self.observer.phase_entered(&label, Phase::Classifying);
        if deployed.kind() != ComponentKind::Stateful {
            debug!(
                target: DISPATCH_TARGET,
                invocation = %label,
                kind = %deployed.kind(),
                "session requested on a component without sessions"
            );
            self.terminate_early(&label, &mut channel, InfrastructureFailure::NotStateful);
            return CancelHandle::none();
        }

        let flag = Arc::new(CancellationFlag::new());
        let registration = self.registry.register(request.id(), Arc::clone(&flag));
        let task = SessionTask {
            label: label.clone(),
            deployed,
            identity: request.identity,
            protocol: request.protocol,
            flag: Arc::clone(&flag),
            registration,
            channel,
            observer: Arc::clone(&self.observer),
        };

        self.observer.phase_entered(&label, Phase::AwaitingExecutionSlot);
        self.submit(&label, Box::new(move || task.run()), false);
        CancelHandle::new(flag)
    }
}

struct SessionTask {
    label: InvocationLabel,
    deployed: Arc<DeployedComponent>,
    identity: Option<SecurityIdentity>,
    protocol: String,
    flag: Arc<CancellationFlag>,
    registration: Registration,
    channel: ResponseChannel,
    observer: Arc<dyn DispatchObserver>,
}

impl SessionTask {
    fn run(self) {
        if !self.flag.try_run() {
            self.finish(ExecutionOutcome::Cancelled, ResponseAction::Cancelled);
            return;
        }

        self.observer.phase_entered(&self.label, Phase::Running);
        let created = self.create();

        self.observer.phase_entered(&self.label, Phase::Completing);
        let component = self.deployed.component();
        match created {
            Ok(session) => {
                let strong = best_effort(self.deployed.name(), || component.strict_affinity());
                let weak = best_effort(self.deployed.name(), || component.affinity_hint(Some(&session)));
                self.channel.update_affinity(strong.as_ref(), weak.as_ref());
                debug!(
                    target: DISPATCH_TARGET,
                    invocation = %self.label,
                    session = %session,
                    "session opened"
                );
                let outcome = ExecutionOutcome::Success(Value::String(session.as_str().to_owned()));
                self.finish(outcome, ResponseAction::SessionOpened(session));
            }
            Err(fault) => {
                if matches!(
                    fault,
                    InvocationFault::ComponentUnavailable { .. } | InvocationFault::ComponentStopped { .. }
                ) {
                    debug!(
                        target: DISPATCH_TARGET,
                        invocation = %self.label,
                        error = %fault,
                        "component refused session creation; reporting no such target"
                    );
                }
                let outcome = classify_outcome(Err(fault), component.as_ref());
                let action = match &outcome {
                    ExecutionOutcome::ApplicationException { exception, .. } => {
                        warn!(
                            target: DISPATCH_TARGET,
                            invocation = %self.label,
                            error = %exception,
                            "session creation failed"
                        );
                        ResponseAction::Exception(exception.clone())
                    }
                    other => encode(other.clone(), ComponentKind::Stateful),
                };
                self.finish(outcome, action);
            }
        }
    }

    fn create(&self) -> Result<SessionId, InvocationFault> {
        let _connection =
            ConnectionScope::enter(CallerConnection::new(self.identity.clone(), self.protocol.clone()));
        let component = self.deployed.component();
        panic::catch_unwind(AssertUnwindSafe(|| component.create_session())).unwrap_or_else(|payload| {
            let message = panic_message(&*payload);
            warn!(
                target: DISPATCH_TARGET,
                invocation = %self.label,
                panic = %message,
                "component panicked while creating a session"
            );
            Err(InvocationFault::application(COMPONENT_PANIC_TYPE, message))
        })
    }

    fn finish(mut self, outcome: ExecutionOutcome, action: ResponseAction) {
        self.observer.outcome(&self.label, &outcome);
        drop(self.registration);
        self.channel.deliver(&action, &Attachments::new());
        self.observer.phase_entered(&self.label, Phase::Terminal);
    }
}
