//! Remote invocation dispatch core for hosted components.
//!
//! A transport decodes inbound calls and hands them to the [`Dispatcher`],
//! which resolves the addressed component against a [`DeploymentSource`],
//! decides how the call executes, runs it through the component's invocation
//! chain, and writes exactly one response through the caller's
//! [`ResponseSink`].
//!
//! ## Execution modes
//!
//! Synchronous calls over the in-process transport run inline on the calling
//! thread. Everything else goes to the configured [`TaskExecutor`] (by
//! default a [`WorkerPool`]), falling back to inline execution when none is
//! configured or the pool refuses work.
//!
//! Asynchronous calls that return a value release the caller with a
//! proceed-async notice before running. One-way calls are answered at once
//! and their eventual outcome is only logged.
//!
//! ## Cancellation
//!
//! Every queued invocation carries a [`CancellationFlag`]. A cancel message
//! wins only if it arrives before the task starts; afterwards it is recorded
//! for cooperative checks by asynchronous methods and otherwise ignored.
//!
//! ## Deployment state
//!
//! The dispatcher never owns deployment state. The in-memory
//! [`DeploymentRepository`] publishes immutable snapshots of started modules
//! and notifies [`ModuleAvailabilityListener`]s as modules come and go.

pub mod component;
pub mod deployment;
pub mod dispatch;
pub mod legacy;
mod observer;
mod pool;
pub mod telemetry;

pub use component::{
    Affinity, AffinityError, ApplicationException, Component, ComponentKind, InvocationFault,
    InvocationReturn, PendingResult, PendingSender, SessionId, pending_channel,
};
pub use deployment::{
    ComponentView, DeployedComponent, DeploymentError, DeploymentRepository, DeploymentSnapshot,
    DeploymentSource, MethodLocator, ModuleAvailabilityListener, ModuleDeployment,
    ModuleIdentifier, ReturnType, Subscription, ViewMethod,
};
pub use dispatch::{
    Attachments, CancelHandle, CancellationFlag, ComponentIdentifier, DispatchError, Dispatcher,
    DispatcherBuilder, ExecutionOutcome, InvocationContext, InvocationId, InvocationRequest,
    ResponseError, ResponseSink, SessionOpenRequest,
};
pub use observer::{DispatchObserver, InvocationLabel, Phase, StructuredDispatchObserver};
pub use pool::{RejectedTask, Task, TaskExecutor, WorkerPool};
pub use serde_json::Value;
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
