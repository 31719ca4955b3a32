//! Per-invocation context handed to the component's invocation chain.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde_json::Value;
use tracing::debug;

use super::DISPATCH_TARGET;
use super::cancellation::CancellationFlag;
use super::request::{
    Attachments, PRIVATE_ATTACHMENTS_KEY, SecurityIdentity, Transaction, TransactionError,
    TransactionSource,
};
use crate::component::SessionId;
use crate::deployment::ViewMethod;

/// How the component was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationType {
    /// Through the remote dispatcher.
    Remote,
}

/// Data visible to interceptors but not to application code.
#[derive(Debug, Clone, PartialEq)]
pub struct PrivateData {
    component: String,
    view: String,
    invocation_type: InvocationType,
    entries: HashMap<String, Value>,
}

impl PrivateData {
    /// Invoked component name.
    #[must_use]
    pub fn component(&self) -> &str {
        self.component.as_str()
    }

    /// Invoked view name.
    #[must_use]
    pub fn view(&self) -> &str {
        self.view.as_str()
    }

    /// Invocation type marker.
    #[must_use]
    pub fn invocation_type(&self) -> InvocationType {
        self.invocation_type
    }

    /// Private attachment sent by the caller.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Number of private attachments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no private attachments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Lazily resolved transaction.
///
/// The transaction is imported on the first [`get`](Self::get) and cached;
/// an invocation that never asks never imports it.
pub struct TransactionSupplier {
    source: Arc<dyn TransactionSource>,
    resolved: OnceCell<Result<Transaction, TransactionError>>,
}

impl TransactionSupplier {
    pub(crate) fn new(source: Arc<dyn TransactionSource>) -> Self {
        Self {
            source,
            resolved: OnceCell::new(),
        }
    }

    /// Imports the transaction on first use.
    ///
    /// # Errors
    ///
    /// Returns the source's error; the failure is cached like a success.
    pub fn get(&self) -> Result<&Transaction, &TransactionError> {
        self.resolved.get_or_init(|| self.source.resolve()).as_ref()
    }

    /// Whether the transaction has been imported.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolved.get().is_some()
    }
}

impl fmt::Debug for TransactionSupplier {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TransactionSupplier")
            .field("resolved", &self.is_resolved())
            .finish_non_exhaustive()
    }
}

/// Everything a component sees of one remote invocation.
#[derive(Debug)]
pub struct InvocationContext {
    method: Arc<ViewMethod>,
    parameters: Vec<Value>,
    private_data: PrivateData,
    context_data: HashMap<String, Value>,
    transaction: Option<TransactionSupplier>,
    session: Option<SessionId>,
    cancellation: Option<Arc<CancellationFlag>>,
    identity: Option<SecurityIdentity>,
}

/// Inputs for [`InvocationContext::assemble`].
pub(crate) struct ContextParts<'a> {
    pub(crate) component: &'a str,
    pub(crate) view: &'a str,
    pub(crate) method: Arc<ViewMethod>,
    pub(crate) parameters: Vec<Value>,
    pub(crate) attachments: &'a Attachments,
    pub(crate) transaction: Option<Arc<dyn TransactionSource>>,
    pub(crate) session: Option<SessionId>,
    pub(crate) cancellation: Option<Arc<CancellationFlag>>,
    pub(crate) identity: Option<SecurityIdentity>,
}

impl InvocationContext {
    /// Builds the context, splitting request attachments into private data
    /// and caller-visible context data.
    pub(crate) fn assemble(parts: ContextParts<'_>) -> Self {
        let (entries, context_data) = demultiplex(parts.attachments);
        Self {
            method: parts.method,
            parameters: parts.parameters,
            private_data: PrivateData {
                component: parts.component.to_owned(),
                view: parts.view.to_owned(),
                invocation_type: InvocationType::Remote,
                entries,
            },
            context_data,
            transaction: parts.transaction.map(TransactionSupplier::new),
            session: parts.session,
            cancellation: parts.cancellation,
            identity: parts.identity,
        }
    }

    /// Invoked method.
    #[must_use]
    pub fn method(&self) -> &ViewMethod {
        &self.method
    }

    /// Decoded parameter values.
    #[must_use]
    pub fn parameters(&self) -> &[Value] {
        &self.parameters
    }

    /// Interceptor-only data.
    #[must_use]
    pub fn private_data(&self) -> &PrivateData {
        &self.private_data
    }

    /// Caller-visible context data.
    #[must_use]
    pub fn context_data(&self) -> &HashMap<String, Value> {
        &self.context_data
    }

    /// Mutable context data, for interceptors returning values to the caller.
    pub fn context_data_mut(&mut self) -> &mut HashMap<String, Value> {
        &mut self.context_data
    }

    /// Caller's transaction, resolved on demand.
    #[must_use]
    pub fn transaction(&self) -> Option<&TransactionSupplier> {
        self.transaction.as_ref()
    }

    /// Session identifier for stateful targets.
    #[must_use]
    pub fn session(&self) -> Option<&SessionId> {
        self.session.as_ref()
    }

    /// Cancellation flag, present for asynchronous session-component calls.
    #[must_use]
    pub fn cancellation(&self) -> Option<&CancellationFlag> {
        self.cancellation.as_deref()
    }

    /// Whether the caller asked to cancel this call after it started.
    #[must_use]
    pub fn was_cancel_requested(&self) -> bool {
        self.cancellation
            .as_deref()
            .is_some_and(CancellationFlag::was_cancel_requested)
    }

    /// Authenticated caller.
    #[must_use]
    pub fn identity(&self) -> Option<&SecurityIdentity> {
        self.identity.as_ref()
    }
}

fn demultiplex(attachments: &Attachments) -> (HashMap<String, Value>, HashMap<String, Value>) {
    let mut private = HashMap::new();
    let mut visible = HashMap::new();
    for (key, value) in attachments.iter() {
        if key != PRIVATE_ATTACHMENTS_KEY {
            visible.insert(key.to_owned(), value.clone());
            continue;
        }
        match value {
            Value::Object(entries) => {
                private.extend(entries.iter().map(|(key, value)| (key.clone(), value.clone())));
            }
            other => {
                debug!(
                    target: DISPATCH_TARGET,
                    kind = json_kind(other),
                    "ignoring private attachments that are not an object"
                );
            }
        }
    }
    (private, visible)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
