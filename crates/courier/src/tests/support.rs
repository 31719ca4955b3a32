//! Shared test doubles for the dispatcher.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use mockall::mock;
use serde_json::Value;

use crate::component::{
    Affinity, AffinityError, ApplicationException, Component, ComponentKind, InvocationFault,
    InvocationReturn, SessionId,
};
use crate::deployment::{
    ComponentView, DeployedComponent, DeploymentRepository, MethodLocator, ModuleDeployment,
    ModuleIdentifier, ReturnType, ViewMethod,
};
use crate::dispatch::{
    Attachments, DispatchError, ExecutionOutcome, InvocationContext, InvocationId, ResponseError,
    ResponseSink,
};
use crate::legacy;
use crate::observer::{DispatchObserver, InvocationLabel, Phase};
use crate::pool::{RejectedTask, Task, TaskExecutor};

mock! {
    pub(crate) Sink {}
    impl ResponseSink for Sink {
        fn write_success(&self, value: &Value, attachments: &Attachments) -> Result<(), ResponseError>;
        fn write_exception(&self, exception: &ApplicationException) -> Result<(), ResponseError>;
        fn write_no_such_target(&self) -> Result<(), ResponseError>;
        fn write_wrong_view(&self) -> Result<(), ResponseError>;
        fn write_no_such_method(&self) -> Result<(), ResponseError>;
        fn write_not_stateful(&self) -> Result<(), ResponseError>;
        fn write_cancelled(&self) -> Result<(), ResponseError>;
        fn write_proceed_async(&self) -> Result<(), ResponseError>;
        fn write_session_opened(&self, session: &SessionId) -> Result<(), ResponseError>;
        fn update_strong_affinity(&self, affinity: &Affinity);
        fn update_weak_affinity(&self, affinity: &Affinity);
    }
}

/// Everything a [`RecordingSink`] was asked to write.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SinkEvent {
    Success { value: Value, attachments: Attachments },
    Exception(ApplicationException),
    NoSuchTarget,
    WrongView,
    NoSuchMethod,
    NotStateful,
    Cancelled,
    ProceedAsync,
    SessionOpened(SessionId),
    StrongAffinity(Affinity),
    WeakAffinity(Affinity),
}

impl SinkEvent {
    /// Whether the event is a terminal response.
    pub(crate) fn is_terminal(&self) -> bool {
        !matches!(
            self,
            Self::ProceedAsync | Self::StrongAffinity(_) | Self::WeakAffinity(_)
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum SinkMode {
    #[default]
    Accept,
    Fail,
    Panic,
}

/// Response sink that records every call.
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
    changed: Condvar,
    mode: SinkMode,
}

impl RecordingSink {
    /// A sink whose writes fail after being recorded.
    pub(crate) fn failing() -> Self {
        Self {
            mode: SinkMode::Fail,
            ..Self::default()
        }
    }

    /// A sink whose writes panic after being recorded.
    pub(crate) fn panicking() -> Self {
        Self {
            mode: SinkMode::Panic,
            ..Self::default()
        }
    }

    pub(crate) fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().expect("sink lock").clone()
    }

    pub(crate) fn terminal_events(&self) -> Vec<SinkEvent> {
        self.events()
            .into_iter()
            .filter(SinkEvent::is_terminal)
            .collect()
    }

    /// Blocks until at least `count` terminal events were recorded.
    pub(crate) fn wait_for_terminal(&self, count: usize) -> Vec<SinkEvent> {
        let guard = self.events.lock().expect("sink lock");
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, Duration::from_secs(5), |events| {
                events.iter().filter(|event| event.is_terminal()).count() < count
            })
            .expect("sink lock");
        guard.iter().filter(|event| event.is_terminal()).cloned().collect()
    }

    fn record(&self, event: SinkEvent) -> Result<(), ResponseError> {
        self.events.lock().expect("sink lock").push(event);
        self.changed.notify_all();
        match self.mode {
            SinkMode::Accept => Ok(()),
            SinkMode::Fail => Err(ResponseError::new("connection reset")),
            SinkMode::Panic => panic!("transport bug"),
        }
    }
}

impl ResponseSink for RecordingSink {
    fn write_success(&self, value: &Value, attachments: &Attachments) -> Result<(), ResponseError> {
        self.record(SinkEvent::Success {
            value: value.clone(),
            attachments: attachments.clone(),
        })
    }

    fn write_exception(&self, exception: &ApplicationException) -> Result<(), ResponseError> {
        self.record(SinkEvent::Exception(exception.clone()))
    }

    fn write_no_such_target(&self) -> Result<(), ResponseError> {
        self.record(SinkEvent::NoSuchTarget)
    }

    fn write_wrong_view(&self) -> Result<(), ResponseError> {
        self.record(SinkEvent::WrongView)
    }

    fn write_no_such_method(&self) -> Result<(), ResponseError> {
        self.record(SinkEvent::NoSuchMethod)
    }

    fn write_not_stateful(&self) -> Result<(), ResponseError> {
        self.record(SinkEvent::NotStateful)
    }

    fn write_cancelled(&self) -> Result<(), ResponseError> {
        self.record(SinkEvent::Cancelled)
    }

    fn write_proceed_async(&self) -> Result<(), ResponseError> {
        self.record(SinkEvent::ProceedAsync)
    }

    fn write_session_opened(&self, session: &SessionId) -> Result<(), ResponseError> {
        self.record(SinkEvent::SessionOpened(session.clone()))
    }

    fn update_strong_affinity(&self, affinity: &Affinity) {
        self.events
            .lock()
            .expect("sink lock")
            .push(SinkEvent::StrongAffinity(affinity.clone()));
    }

    fn update_weak_affinity(&self, affinity: &Affinity) {
        self.events
            .lock()
            .expect("sink lock")
            .push(SinkEvent::WeakAffinity(affinity.clone()));
    }
}

/// What a [`ScriptedComponent`] saw on its last invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ObservedContext {
    pub(crate) parameters: Vec<Value>,
    pub(crate) private_data: HashMap<String, Value>,
    pub(crate) context_data: HashMap<String, Value>,
    pub(crate) session: Option<SessionId>,
    pub(crate) has_cancellation: bool,
    pub(crate) transaction_resolved: bool,
    pub(crate) connection_protocol: Option<String>,
}

type Behaviour =
    Arc<dyn Fn(&mut InvocationContext) -> Result<InvocationReturn, InvocationFault> + Send + Sync>;
type SessionBehaviour = Arc<dyn Fn(usize) -> Result<SessionId, InvocationFault> + Send + Sync>;

/// Component whose behaviour is supplied by the test.
pub(crate) struct ScriptedComponent {
    name: String,
    kind: ComponentKind,
    behaviour: Behaviour,
    session_behaviour: SessionBehaviour,
    affinity: Option<Affinity>,
    strict_affinity: Option<Affinity>,
    failing_affinity: bool,
    panicking_affinity: bool,
    panicking_remotability: bool,
    non_remotable: Vec<String>,
    private_keys: Vec<String>,
    invocations: AtomicUsize,
    sessions: AtomicUsize,
    observed: Mutex<Option<ObservedContext>>,
}

impl ScriptedComponent {
    fn with_kind(name: &str, kind: ComponentKind) -> Self {
        Self {
            name: name.to_owned(),
            kind,
            behaviour: Arc::new(|_| Ok(InvocationReturn::void())),
            session_behaviour: Arc::new(|index| Ok(SessionId::new(format!("session-{index}")))),
            affinity: None,
            strict_affinity: None,
            failing_affinity: false,
            panicking_affinity: false,
            panicking_remotability: false,
            non_remotable: Vec::new(),
            private_keys: Vec::new(),
            invocations: AtomicUsize::new(0),
            sessions: AtomicUsize::new(0),
            observed: Mutex::new(None),
        }
    }

    pub(crate) fn stateless(name: &str) -> Self {
        Self::with_kind(name, ComponentKind::Stateless)
    }

    pub(crate) fn stateful(name: &str) -> Self {
        Self::with_kind(name, ComponentKind::Stateful)
    }

    pub(crate) fn singleton(name: &str) -> Self {
        Self::with_kind(name, ComponentKind::Singleton)
    }

    pub(crate) fn message_driven(name: &str) -> Self {
        Self::with_kind(name, ComponentKind::MessageDriven)
    }

    pub(crate) fn with_behaviour(
        mut self,
        behaviour: impl Fn(&mut InvocationContext) -> Result<InvocationReturn, InvocationFault>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.behaviour = Arc::new(behaviour);
        self
    }

    pub(crate) fn returning(self, value: Value) -> Self {
        self.with_behaviour(move |_| Ok(InvocationReturn::Value(value.clone())))
    }

    pub(crate) fn with_session_behaviour(
        mut self,
        behaviour: impl Fn(usize) -> Result<SessionId, InvocationFault> + Send + Sync + 'static,
    ) -> Self {
        self.session_behaviour = Arc::new(behaviour);
        self
    }

    pub(crate) fn with_affinity(mut self, affinity: Affinity) -> Self {
        self.affinity = Some(affinity);
        self
    }

    pub(crate) fn with_strict_affinity(mut self, affinity: Affinity) -> Self {
        self.strict_affinity = Some(affinity);
        self
    }

    pub(crate) fn with_failing_affinity(mut self) -> Self {
        self.failing_affinity = true;
        self
    }

    pub(crate) fn with_panicking_affinity(mut self) -> Self {
        self.panicking_affinity = true;
        self
    }

    pub(crate) fn with_panicking_remotability(mut self) -> Self {
        self.panicking_remotability = true;
        self
    }

    pub(crate) fn with_non_remotable(mut self, type_name: &str) -> Self {
        self.non_remotable.push(type_name.to_owned());
        self
    }

    /// Private-data keys to capture in [`ObservedContext`].
    pub(crate) fn observing_private(mut self, key: &str) -> Self {
        self.private_keys.push(key.to_owned());
        self
    }

    pub(crate) fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub(crate) fn sessions_created(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    pub(crate) fn observed(&self) -> Option<ObservedContext> {
        self.observed.lock().expect("observed lock").clone()
    }
}

impl Component for ScriptedComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        self.kind
    }

    fn invoke(&self, context: &mut InvocationContext) -> Result<InvocationReturn, InvocationFault> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let private_data = self
            .private_keys
            .iter()
            .filter_map(|key| {
                context
                    .private_data()
                    .get(key)
                    .map(|value| (key.clone(), value.clone()))
            })
            .collect();
        let before = ObservedContext {
            parameters: context.parameters().to_vec(),
            private_data,
            context_data: context.context_data().clone(),
            session: context.session().cloned(),
            has_cancellation: context.cancellation().is_some(),
            transaction_resolved: context.transaction().is_some_and(|tx| tx.is_resolved()),
            connection_protocol: legacy::current_connection()
                .map(|connection| connection.protocol().to_owned()),
        };
        *self.observed.lock().expect("observed lock") = Some(before);
        (self.behaviour)(context)
    }

    fn is_remotable(&self, exception: &ApplicationException) -> bool {
        assert!(!self.panicking_remotability, "exception registry corrupted");
        !self
            .non_remotable
            .iter()
            .any(|name| name == exception.type_name())
    }

    fn affinity_hint(&self, _session: Option<&SessionId>) -> Result<Option<Affinity>, AffinityError> {
        assert!(!self.panicking_affinity, "cluster topology lock poisoned");
        if self.failing_affinity {
            return Err(AffinityError::new(&self.name, "cluster view unavailable"));
        }
        Ok(self.affinity.clone())
    }

    fn strict_affinity(&self) -> Result<Option<Affinity>, AffinityError> {
        assert!(!self.panicking_affinity, "session cache lock poisoned");
        if self.failing_affinity {
            return Err(AffinityError::new(&self.name, "cache unavailable"));
        }
        Ok(self.strict_affinity.clone())
    }

    fn create_session(&self) -> Result<SessionId, InvocationFault> {
        let index = self.sessions.fetch_add(1, Ordering::SeqCst);
        (self.session_behaviour)(index)
    }
}

/// Executor that queues tasks until the test runs them.
#[derive(Default)]
pub(crate) struct ManualExecutor {
    queue: Mutex<VecDeque<Task>>,
    rejecting: bool,
}

impl ManualExecutor {
    /// An executor that refuses every task.
    pub(crate) fn rejecting() -> Self {
        Self {
            rejecting: true,
            ..Self::default()
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.queue.lock().expect("queue lock").len()
    }

    /// Runs queued tasks, including any they enqueue, in FIFO order.
    pub(crate) fn run_all(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.queue.lock().expect("queue lock").pop_front();
            let Some(task) = next else {
                return ran;
            };
            task();
            ran += 1;
        }
    }
}

impl TaskExecutor for ManualExecutor {
    fn execute(&self, task: Task) -> Result<(), RejectedTask> {
        if self.rejecting {
            return Err(RejectedTask::new(task, DispatchError::PoolShutDown));
        }
        self.queue.lock().expect("queue lock").push_back(task);
        Ok(())
    }
}

/// Observer that records phases and outcomes per invocation.
#[derive(Debug, Default)]
pub(crate) struct RecordingObserver {
    phases: Mutex<Vec<(InvocationId, Phase)>>,
    outcomes: Mutex<Vec<(InvocationId, ExecutionOutcome)>>,
}

impl RecordingObserver {
    pub(crate) fn phases_for(&self, id: InvocationId) -> Vec<Phase> {
        self.phases
            .lock()
            .expect("phases lock")
            .iter()
            .filter(|(invocation, _)| *invocation == id)
            .map(|(_, phase)| *phase)
            .collect()
    }

    pub(crate) fn outcomes_for(&self, id: InvocationId) -> Vec<ExecutionOutcome> {
        self.outcomes
            .lock()
            .expect("outcomes lock")
            .iter()
            .filter(|(invocation, _)| *invocation == id)
            .map(|(_, outcome)| outcome.clone())
            .collect()
    }
}

impl DispatchObserver for RecordingObserver {
    fn phase_entered(&self, invocation: &InvocationLabel, phase: Phase) {
        self.phases
            .lock()
            .expect("phases lock")
            .push((invocation.id(), phase));
    }

    fn outcome(&self, invocation: &InvocationLabel, outcome: &ExecutionOutcome) {
        self.outcomes
            .lock()
            .expect("outcomes lock")
            .push((invocation.id(), outcome.clone()));
    }
}

/// Module identifier used across dispatcher tests.
pub(crate) fn test_module() -> ModuleIdentifier {
    ModuleIdentifier::new("app", "mod", "")
}

/// Standard remote view exposing the methods the tests call.
pub(crate) fn remote_view(name: &str) -> ComponentView {
    ComponentView::remote(
        name,
        [
            ViewMethod::new(MethodLocator::nullary("increment"), ReturnType::Value),
            ViewMethod::new(MethodLocator::new("add", ["int"]), ReturnType::Value),
            ViewMethod::new(MethodLocator::nullary("notify"), ReturnType::Void).asynchronous(),
            ViewMethod::new(MethodLocator::nullary("compute"), ReturnType::Future).asynchronous(),
        ],
    )
}

/// Deploys components into `test_module()`, optionally starting it.
pub(crate) fn deploy(
    repository: &DeploymentRepository,
    components: impl IntoIterator<Item = (Arc<ScriptedComponent>, &'static str)>,
    started: bool,
) {
    let module = components
        .into_iter()
        .fold(ModuleDeployment::new(test_module()), |module, (component, view)| {
            module.with_component(DeployedComponent::new(component, [remote_view(view)]))
        });
    repository.deploy(module).expect("deploy module");
    if started {
        repository.start(&test_module()).expect("start module");
    }
}
