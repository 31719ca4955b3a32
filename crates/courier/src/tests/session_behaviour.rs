//! Behavioural tests for session creation.

use std::cell::RefCell;
use std::sync::Arc;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use super::support::{ManualExecutor, RecordingSink, ScriptedComponent, SinkEvent, deploy};
use crate::component::SessionId;
use crate::deployment::DeploymentRepository;
use crate::dispatch::{ComponentIdentifier, Dispatcher, SessionOpenRequest};

struct SessionWorld {
    repository: Arc<DeploymentRepository>,
    executor: Arc<ManualExecutor>,
    dispatcher: Dispatcher,
    sink: Arc<RecordingSink>,
}

#[fixture]
fn world() -> RefCell<SessionWorld> {
    let repository = DeploymentRepository::new();
    let executor = Arc::new(ManualExecutor::default());
    let dispatcher = Dispatcher::builder(repository.clone())
        .executor(executor.clone())
        .build();
    RefCell::new(SessionWorld {
        repository,
        executor,
        dispatcher,
        sink: Arc::new(RecordingSink::default()),
    })
}

#[given("a deployed stateful component")]
fn given_stateful(world: &RefCell<SessionWorld>) {
    let component = Arc::new(ScriptedComponent::stateful("stateful"));
    deploy(&world.borrow().repository, [(component, "CartRemote")], true);
}

#[given("a deployed stateless component")]
fn given_stateless(world: &RefCell<SessionWorld>) {
    let component = Arc::new(ScriptedComponent::stateless("stateless"));
    deploy(&world.borrow().repository, [(component, "CartRemote")], true);
}

#[when("a session is requested on the {component} component")]
fn when_session_requested(world: &RefCell<SessionWorld>, component: String) {
    let world = world.borrow();
    let request = SessionOpenRequest::new(1, ComponentIdentifier::new("app", "mod", "", component));
    world.dispatcher.open_session(request, world.sink.clone());
}

#[when("the session task is run")]
fn when_tasks_run(world: &RefCell<SessionWorld>) {
    world.borrow().executor.run_all();
}

#[then("the sink received session {session}")]
fn then_session_opened(world: &RefCell<SessionWorld>, session: String) {
    assert_eq!(
        world.borrow().sink.terminal_events(),
        vec![SinkEvent::SessionOpened(SessionId::new(session))]
    );
}

#[then("the sink received not stateful")]
fn then_not_stateful(world: &RefCell<SessionWorld>) {
    assert_eq!(world.borrow().sink.events(), vec![SinkEvent::NotStateful]);
}

#[then("no session task is queued")]
fn then_nothing_queued(world: &RefCell<SessionWorld>) {
    assert_eq!(world.borrow().executor.pending(), 0);
}

#[scenario(
    path = "tests/features/session.feature",
    name = "Opening a session on a stateful component"
)]
fn stateful_session_opens(world: RefCell<SessionWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/session.feature",
    name = "Opening a session on a stateless component"
)]
fn stateless_session_rejected(world: RefCell<SessionWorld>) {
    drop(world);
}
