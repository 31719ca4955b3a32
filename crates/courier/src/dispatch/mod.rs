//! Remote invocation dispatch.
//!
//! The transport decodes each inbound message into an [`InvocationRequest`]
//! or [`SessionOpenRequest`] and hands it to the [`Dispatcher`] together with
//! a [`ResponseSink`]. The dispatcher resolves the target, classifies the
//! call, races the [`CancellationFlag`], runs the component, and writes
//! exactly one terminal response.
//!
//! ## Responses
//!
//! | outcome                         | response                     |
//! |---------------------------------|------------------------------|
//! | success                         | `write_success`              |
//! | application exception           | `write_exception`            |
//! | no target / unavailable/stopped | `write_no_such_target`       |
//! | non-remote view                 | `write_wrong_view`           |
//! | unmatched locator               | `write_no_such_method`       |
//! | session on non-stateful target  | `write_not_stateful`         |
//! | cancelled                       | `write_cancelled`            |
//!
//! Asynchronous calls with a result first receive `write_proceed_async`.
//! One-way calls receive an immediate `write_success` with a `null` value and
//! nothing afterwards.

mod affinity;
mod cancellation;
mod context;
mod errors;
mod executor;
mod mode;
mod outcome;
mod request;
mod resolver;
mod response;
mod session;

const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

pub use cancellation::{
    CancelHandle, CancellationFlag, CancellationRegistry, CancellationState, Registration,
};
pub use context::{InvocationContext, InvocationType, PrivateData, TransactionSupplier};
pub use errors::DispatchError;
pub use executor::{COMPONENT_PANIC_TYPE, Dispatcher, DispatcherBuilder};
pub use mode::{Classification, ExecutionMode, ExecutionPolicy, classify};
pub use outcome::{
    ExecutionOutcome, InfrastructureFailure, ResponseAction, UnavailableReason, classify_outcome,
    encode,
};
pub use request::{
    Attachments, ComponentIdentifier, DEFAULT_PROTOCOL, InvocationId, InvocationRequest,
    PRIVATE_ATTACHMENTS_KEY, RETURNED_CONTEXT_DATA_KEY, SecurityIdentity, SessionOpenRequest,
    Transaction, TransactionError, TransactionSource, WEAK_AFFINITY_KEY,
};
pub use resolver::{ComponentResolver, ResolutionError, ResolvedTarget};
pub use response::{ResponseError, ResponseSink};
