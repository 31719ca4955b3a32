//! The invocation state machine.
//!
//! A dispatch walks `Resolving → Classifying → (ImmediateResponse) →
//! AwaitingExecutionSlot → Running → Completing → Terminal`. Resolution
//! failures jump straight to `Terminal`; a task that loses the cancellation
//! race skips `Running` and `Completing`. The phases of one invocation are
//! strictly ordered even when it runs inline on the transport thread.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use courier_config::Config;

use super::DISPATCH_TARGET;
use super::affinity::AffinityUpdate;
use super::cancellation::{CancelHandle, CancellationFlag, CancellationRegistry, Registration};
use super::context::{ContextParts, InvocationContext};
use super::errors::DispatchError;
use super::mode::{Classification, ExecutionMode, ExecutionPolicy, classify};
use super::outcome::{
    ExecutionOutcome, InfrastructureFailure, ResponseAction, classify_outcome, encode,
};
use super::request::{Attachments, InvocationId, InvocationRequest};
use super::resolver::{ComponentResolver, ResolvedTarget};
use super::response::{ResponseChannel, ResponseSink};
use crate::component::{InvocationFault, InvocationReturn};
use crate::deployment::DeploymentSource;
use crate::legacy::{CallerConnection, ConnectionScope};
use crate::observer::{DispatchObserver, InvocationLabel, Phase, StructuredDispatchObserver};
use crate::pool::{Task, TaskExecutor, WorkerPool, panic_message};

/// Exception type reported when a component panics instead of returning.
pub const COMPONENT_PANIC_TYPE: &str = "ComponentPanic";

/// Routes decoded requests to deployed components.
///
/// The dispatcher keeps no per-request state beyond the cancellation
/// registry; deployment state is read through the [`DeploymentSource`]
/// supplied at construction.
pub struct Dispatcher {
    pub(super) resolver: ComponentResolver,
    pub(super) executor: Option<Arc<dyn TaskExecutor>>,
    pub(super) registry: Arc<CancellationRegistry>,
    pub(super) observer: Arc<dyn DispatchObserver>,
    pub(super) policy: ExecutionPolicy,
}

/// Builder for [`Dispatcher`].
pub struct DispatcherBuilder {
    source: Arc<dyn DeploymentSource>,
    executor: Option<Arc<dyn TaskExecutor>>,
    observer: Option<Arc<dyn DispatchObserver>>,
    local_protocol: String,
}

impl DispatcherBuilder {
    /// Hands non-inline work to `executor`. Without one, everything runs on
    /// the calling thread.
    #[must_use]
    pub fn executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Reports lifecycle phases to `observer`.
    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Protocol tag of the in-process transport.
    #[must_use]
    pub fn local_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.local_protocol = protocol.into();
        self
    }

    /// Builds the dispatcher.
    #[must_use]
    pub fn build(self) -> Dispatcher {
        Dispatcher {
            resolver: ComponentResolver::new(self.source),
            executor: self.executor,
            registry: CancellationRegistry::new(),
            observer: self
                .observer
                .unwrap_or_else(|| Arc::new(StructuredDispatchObserver::new())),
            policy: ExecutionPolicy::new(self.local_protocol),
        }
    }
}

impl Dispatcher {
    /// Starts building a dispatcher over `source`.
    pub fn builder(source: Arc<dyn DeploymentSource>) -> DispatcherBuilder {
        DispatcherBuilder {
            source,
            executor: None,
            observer: None,
            local_protocol: courier_config::default_local_protocol().to_owned(),
        }
    }

    /// Builds a dispatcher from configuration, starting a worker pool unless
    /// it is disabled.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::WorkerSpawn`] if the pool cannot start.
    pub fn from_config(config: &Config, source: Arc<dyn DeploymentSource>) -> Result<Self, DispatchError> {
        let mut builder = Self::builder(source).local_protocol(config.local_protocol());
        if let Some(pool) = WorkerPool::from_config(config)? {
            builder = builder.executor(Arc::new(pool));
        }
        Ok(builder.build())
    }

    /// Resolver used by this dispatcher.
    #[must_use]
    pub fn resolver(&self) -> &ComponentResolver {
        &self.resolver
    }

    /// Dispatches one invocation and returns its cancel capability.
    ///
    /// Exactly one terminal response is written to `sink`, preceded by a
    /// proceed-async notice for asynchronous calls. One-way calls receive
    /// only the immediate accepted response.
    pub fn dispatch(&self, request: InvocationRequest, sink: Arc<dyn ResponseSink>) -> CancelHandle {
        let label = InvocationLabel::new(
            request.id(),
            request.target().to_string(),
            request.method().to_string(),
        );
        let mut channel = ResponseChannel::new(sink, label.clone());

        self.observer.phase_entered(&label, Phase::Resolving);
        let target = match self.resolver.resolve_invocation(&request) {
            Ok(target) => target,
            Err(error) => {
                debug!(
                    target: DISPATCH_TARGET,
                    invocation = %label,
                    error = %error,
                    "cannot resolve invocation"
                );
                self.terminate_early(&label, &mut channel, error.failure());
                return CancelHandle::none();
            }
        };

        self.observer.phase_entered(&label, Phase::Classifying);
        let classification = classify(target.method(), target.component().kind());
        let mut outgoing = request.attachments().clone();
        match classification.mode() {
            ExecutionMode::OneWay => {
                self.observer.phase_entered(&label, Phase::ImmediateResponse);
                AffinityUpdate::compute(target.component(), request.session())
                    .apply(&channel, &mut outgoing);
                channel.deliver(&ResponseAction::Accepted, &outgoing);
            }
            ExecutionMode::AsyncWithResult => {
                self.observer.phase_entered(&label, Phase::ImmediateResponse);
                channel.deliver(&ResponseAction::ProceedAsync, &outgoing);
            }
            ExecutionMode::Sync => {}
        }

        let inline = self
            .policy
            .should_run_inline(request.protocol(), classification.mode());
        let flag = Arc::new(CancellationFlag::new());
        let registration = self.registry.register(request.id(), Arc::clone(&flag));
        let task = InvocationTask {
            label: label.clone(),
            request,
            target,
            classification,
            flag: Arc::clone(&flag),
            registration,
            channel,
            outgoing,
            observer: Arc::clone(&self.observer),
        };

        self.observer.phase_entered(&label, Phase::AwaitingExecutionSlot);
        self.submit(&label, Box::new(move || task.run()), inline);
        CancelHandle::new(flag)
    }

    /// Cancels a queued invocation. Returns `false` once it has started or
    /// finished.
    pub fn cancel(&self, id: InvocationId) -> bool {
        let cancelled = self.registry.cancel(id);
        debug!(target: DISPATCH_TARGET, invocation = %id, cancelled, "cancel requested");
        cancelled
    }

    /// Number of invocations registered for cancellation.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.registry.len()
    }

    pub(super) fn submit(&self, label: &InvocationLabel, task: Task, inline: bool) {
        if inline {
            task();
            return;
        }
        let Some(executor) = self.executor.as_ref() else {
            task();
            return;
        };
        if let Err(rejected) = executor.execute(task) {
            warn!(
                target: DISPATCH_TARGET,
                invocation = %label,
                error = %rejected.error(),
                "executor rejected invocation; running inline"
            );
            (rejected.into_task())();
        }
    }

    pub(super) fn terminate_early(
        &self,
        label: &InvocationLabel,
        channel: &mut ResponseChannel,
        failure: InfrastructureFailure,
    ) {
        self.observer
            .outcome(label, &ExecutionOutcome::InfrastructureFailure(failure));
        channel.deliver(&ResponseAction::from(failure), &Attachments::new());
        self.observer.phase_entered(label, Phase::Terminal);
    }
}

struct InvocationTask {
    label: InvocationLabel,
    request: InvocationRequest,
    target: ResolvedTarget,
    classification: Classification,
    flag: Arc<CancellationFlag>,
    registration: Registration,
    channel: ResponseChannel,
    outgoing: Attachments,
    observer: Arc<dyn DispatchObserver>,
}

impl InvocationTask {
    fn run(mut self) {
        if !self.flag.try_run() {
            debug!(
                target: DISPATCH_TARGET,
                invocation = %self.label,
                "invocation cancelled before it started"
            );
            self.finish(ExecutionOutcome::Cancelled);
            return;
        }

        self.observer.phase_entered(&self.label, Phase::Running);
        let result = self.invoke();

        self.observer.phase_entered(&self.label, Phase::Completing);
        let deployed = Arc::clone(self.target.component());
        let outcome = classify_outcome(result, deployed.component().as_ref());
        if let ExecutionOutcome::InfrastructureFailure(failure) = &outcome {
            debug!(
                target: DISPATCH_TARGET,
                invocation = %self.label,
                failure = %failure,
                "component refused the invocation; reporting no such target"
            );
        }
        if outcome.is_success() && !self.classification.is_one_way() {
            AffinityUpdate::compute(&deployed, self.request.session())
                .apply(&self.channel, &mut self.outgoing);
        }
        self.finish(outcome);
    }

    fn invoke(&mut self) -> Result<Value, InvocationFault> {
        let deployed = Arc::clone(self.target.component());
        if self.classification.is_async_on_plain_component() {
            warn!(
                target: DISPATCH_TARGET,
                invocation = %self.label,
                kind = %deployed.kind(),
                "asynchronous method on a component without asynchronous support; invoking synchronously"
            );
        }
        let cancellation = self
            .classification
            .exposes_cancellation()
            .then(|| Arc::clone(&self.flag));
        let mut context = InvocationContext::assemble(ContextParts {
            component: deployed.name(),
            view: self.target.view().name(),
            method: Arc::clone(self.target.method()),
            parameters: std::mem::take(&mut self.request.parameters),
            attachments: &self.request.attachments,
            transaction: self.request.transaction.clone(),
            session: self.request.session.clone(),
            cancellation,
            identity: self.request.identity.clone(),
        });

        let returned = {
            let _connection = ConnectionScope::enter(CallerConnection::new(
                self.request.identity.clone(),
                self.request.protocol.clone(),
            ));
            panic::catch_unwind(AssertUnwindSafe(|| deployed.component().invoke(&mut context)))
        };
        let returned = match returned {
            Ok(returned) => returned?,
            Err(payload) => {
                let message = panic_message(&*payload);
                warn!(
                    target: DISPATCH_TARGET,
                    invocation = %self.label,
                    panic = %message,
                    "component panicked during invocation"
                );
                return Err(InvocationFault::application(COMPONENT_PANIC_TYPE, message));
            }
        };

        self.copy_returned_context_data(&context);
        match returned {
            InvocationReturn::Value(value) => Ok(value),
            InvocationReturn::Pending(pending) => pending.wait(),
        }
    }

    fn copy_returned_context_data(&mut self, context: &InvocationContext) {
        for key in self.request.attachments.returned_keys() {
            if let Some(value) = context.context_data().get(key) {
                self.outgoing.insert(key, value.clone());
            }
        }
    }

    fn finish(self, outcome: ExecutionOutcome) {
        let Self {
            label,
            target,
            classification,
            registration,
            mut channel,
            outgoing,
            observer,
            ..
        } = self;

        observer.outcome(&label, &outcome);
        drop(registration);
        if classification.is_one_way() {
            if !outcome.is_success() {
                debug!(
                    target: DISPATCH_TARGET,
                    invocation = %label,
                    outcome = outcome.label(),
                    "one-way invocation failed; outcome discarded"
                );
            }
        } else {
            let action = encode(outcome, target.component().kind());
            channel.deliver(&action, &outgoing);
        }
        observer.phase_entered(&label, Phase::Terminal);
    }
}
