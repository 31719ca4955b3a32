//! Unit tests for session creation.

use std::sync::Arc;

use rstest::{fixture, rstest};

use super::support::{
    ManualExecutor, RecordingObserver, RecordingSink, ScriptedComponent, SinkEvent, deploy,
};
use crate::component::{Affinity, ApplicationException, InvocationFault, SessionId};
use crate::deployment::DeploymentRepository;
use crate::dispatch::{
    ComponentIdentifier, Dispatcher, ExecutionOutcome, InvocationId, SecurityIdentity,
    SessionOpenRequest,
};
use crate::legacy;
use crate::observer::Phase;

struct Harness {
    repository: Arc<DeploymentRepository>,
    executor: Arc<ManualExecutor>,
    observer: Arc<RecordingObserver>,
    dispatcher: Dispatcher,
}

#[fixture]
fn harness() -> Harness {
    let repository = DeploymentRepository::new();
    let executor = Arc::new(ManualExecutor::default());
    let observer = Arc::new(RecordingObserver::default());
    let dispatcher = Dispatcher::builder(repository.clone())
        .executor(executor.clone())
        .observer(observer.clone())
        .build();
    Harness {
        repository,
        executor,
        observer,
        dispatcher,
    }
}

impl Harness {
    fn deploy(&self, component: &Arc<ScriptedComponent>) {
        deploy(&self.repository, [(Arc::clone(component), "CartRemote")], true);
    }

    fn open(&self, id: u64, component: &str) -> Arc<RecordingSink> {
        let sink = Arc::new(RecordingSink::default());
        self.dispatcher.open_session(
            SessionOpenRequest::new(id, ComponentIdentifier::new("app", "mod", "", component))
                .with_protocol("local"),
            sink.clone(),
        );
        sink
    }
}

#[rstest]
fn stateful_component_opens_session_with_affinity(harness: Harness) {
    let cart = Arc::new(
        ScriptedComponent::stateful("CartBean")
            .with_strict_affinity(Affinity::Node("node-a".into()))
            .with_affinity(Affinity::Node("node-a".into())),
    );
    harness.deploy(&cart);

    let sink = harness.open(1, "CartBean");
    assert!(sink.events().is_empty(), "session creation always queues");
    assert_eq!(harness.executor.pending(), 1);

    harness.executor.run_all();

    assert_eq!(
        sink.events(),
        vec![
            SinkEvent::WeakAffinity(Affinity::Node("node-a".into())),
            SinkEvent::SessionOpened(SessionId::new("session-0")),
        ]
    );
    assert_eq!(cart.sessions_created(), 1);
    assert_eq!(harness.dispatcher.outstanding(), 0);
    assert_eq!(
        harness.observer.outcomes_for(InvocationId::new(1)),
        vec![ExecutionOutcome::Success("session-0".into())]
    );
}

#[rstest]
fn cluster_strict_affinity_is_sent_as_strong(harness: Harness) {
    let cart = Arc::new(
        ScriptedComponent::stateful("CartBean").with_strict_affinity(Affinity::Cluster("ejb".into())),
    );
    harness.deploy(&cart);

    let sink = harness.open(1, "CartBean");
    harness.executor.run_all();

    assert_eq!(
        sink.events(),
        vec![
            SinkEvent::StrongAffinity(Affinity::Cluster("ejb".into())),
            SinkEvent::SessionOpened(SessionId::new("session-0")),
        ]
    );
}

#[rstest]
#[case::stateless(ScriptedComponent::stateless("CartBean"))]
#[case::singleton(ScriptedComponent::singleton("CartBean"))]
#[case::message_driven(ScriptedComponent::message_driven("CartBean"))]
fn sessionless_component_is_not_stateful(harness: Harness, #[case] component: ScriptedComponent) {
    let component = Arc::new(component);
    harness.deploy(&component);

    let sink = harness.open(1, "CartBean");

    assert_eq!(sink.events(), vec![SinkEvent::NotStateful]);
    assert_eq!(harness.executor.pending(), 0);
    assert_eq!(component.sessions_created(), 0);
    assert_eq!(
        harness.observer.phases_for(InvocationId::new(1)),
        vec![Phase::Resolving, Phase::Classifying, Phase::Terminal]
    );
}

#[rstest]
fn unknown_component_is_no_such_target(harness: Harness) {
    let cart = Arc::new(ScriptedComponent::stateful("CartBean"));
    harness.deploy(&cart);

    let sink = harness.open(1, "MissingBean");

    assert_eq!(sink.events(), vec![SinkEvent::NoSuchTarget]);
}

#[rstest]
#[case(InvocationFault::unavailable("CartBean"))]
#[case(InvocationFault::stopped("CartBean"))]
fn refusing_component_is_no_such_target(harness: Harness, #[case] fault: InvocationFault) {
    let fault = std::sync::Mutex::new(Some(fault));
    let cart = Arc::new(ScriptedComponent::stateful("CartBean").with_session_behaviour(move |_| {
        Err(fault.lock().expect("fault lock").take().expect("single call"))
    }));
    harness.deploy(&cart);

    let sink = harness.open(1, "CartBean");
    harness.executor.run_all();

    assert_eq!(sink.events(), vec![SinkEvent::NoSuchTarget]);
}

#[rstest]
fn creation_failure_is_forwarded_unchanged(harness: Harness) {
    let exception = ApplicationException::new("CreateException", "no capacity")
        .caused_by(ApplicationException::new("PoolExhausted", "internal"));
    let raised = exception.clone();
    let cart = Arc::new(
        ScriptedComponent::stateful("CartBean")
            .with_non_remotable("PoolExhausted")
            .with_session_behaviour(move |_| Err(raised.clone().into())),
    );
    harness.deploy(&cart);

    let sink = harness.open(1, "CartBean");
    harness.executor.run_all();

    assert_eq!(sink.events(), vec![SinkEvent::Exception(exception)]);
    assert_eq!(harness.dispatcher.outstanding(), 0);
}

#[rstest]
fn panicking_affinity_query_still_opens_session(harness: Harness) {
    let cart = Arc::new(ScriptedComponent::stateful("CartBean").with_panicking_affinity());
    harness.deploy(&cart);

    let sink = harness.open(1, "CartBean");
    harness.executor.run_all();

    assert_eq!(
        sink.events(),
        vec![SinkEvent::SessionOpened(SessionId::new("session-0"))]
    );
    assert_eq!(harness.dispatcher.outstanding(), 0);
}

#[rstest]
fn cancelled_before_creation(harness: Harness) {
    let cart = Arc::new(ScriptedComponent::stateful("CartBean"));
    harness.deploy(&cart);

    let sink = harness.open(7, "CartBean");
    assert!(harness.dispatcher.cancel(InvocationId::new(7)));
    harness.executor.run_all();

    assert_eq!(sink.events(), vec![SinkEvent::Cancelled]);
    assert_eq!(cart.sessions_created(), 0);
    assert_eq!(harness.dispatcher.outstanding(), 0);
}

#[rstest]
fn caller_connection_is_visible_during_creation(harness: Harness) {
    let cart = Arc::new(ScriptedComponent::stateful("CartBean").with_session_behaviour(|_| {
        let connection = legacy::current_connection().expect("connection installed");
        let principal = connection
            .identity()
            .map(|identity| identity.principal().to_owned())
            .unwrap_or_default();
        Ok(SessionId::new(format!("{}-{principal}", connection.protocol())))
    }));
    harness.deploy(&cart);
    let sink = Arc::new(RecordingSink::default());

    harness.dispatcher.open_session(
        SessionOpenRequest::new(1, ComponentIdentifier::new("app", "mod", "", "CartBean"))
            .with_identity(SecurityIdentity::new("alice", ["buyer"]))
            .with_protocol("http"),
        sink.clone(),
    );
    harness.executor.run_all();

    assert_eq!(
        sink.events(),
        vec![SinkEvent::SessionOpened(SessionId::new("http-alice"))]
    );
    assert!(legacy::current_connection().is_none());
}
