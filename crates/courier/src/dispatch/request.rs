//! Decoded inbound requests handed to the dispatcher by the transport.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::component::SessionId;
use crate::deployment::{MethodLocator, ModuleIdentifier};

/// Attachment key whose object value is merged into private data rather than
/// the caller-visible context data.
pub const PRIVATE_ATTACHMENTS_KEY: &str = "courier.private-attachments";

/// Attachment key listing context-data keys the caller wants returned.
pub const RETURNED_CONTEXT_DATA_KEY: &str = "courier.returned-keys";

/// Attachment key carrying the legacy weak affinity back to the caller.
pub const WEAK_AFFINITY_KEY: &str = "courier.weak-affinity";

/// Protocol tag used when the transport does not report one.
pub const DEFAULT_PROTOCOL: &str = "remote";

/// Transport-assigned invocation identifier, used to route cancel messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InvocationId(u64);

impl InvocationId {
    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for InvocationId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Application, module, distinct and component name of a call target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentIdentifier {
    module: ModuleIdentifier,
    component: String,
}

impl ComponentIdentifier {
    /// Builds a component identifier.
    #[must_use]
    pub fn new(
        app: impl Into<String>,
        module: impl Into<String>,
        distinct: impl Into<String>,
        component: impl Into<String>,
    ) -> Self {
        Self {
            module: ModuleIdentifier::new(app, module, distinct),
            component: component.into(),
        }
    }

    /// Identifier of the enclosing module.
    #[must_use]
    pub fn module_id(&self) -> &ModuleIdentifier {
        &self.module
    }

    /// Component name.
    #[must_use]
    pub fn component(&self) -> &str {
        self.component.as_str()
    }
}

impl fmt::Display for ComponentIdentifier {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}/{}", self.module, self.component)
    }
}

/// String-keyed opaque values travelling with a request or response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attachments(HashMap<String, Value>);

impl Attachments {
    /// Creates an empty attachment map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an attachment.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    /// Looks up an attachment.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Whether the key is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of attachments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no attachments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the attachments in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Context-data keys the caller asked to have returned.
    ///
    /// Non-string entries are ignored.
    #[must_use]
    pub fn returned_keys(&self) -> Vec<&str> {
        self.get(RETURNED_CONTEXT_DATA_KEY)
            .and_then(Value::as_array)
            .map(|keys| keys.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Attachments {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(key, value)| (key.into(), value)).collect())
    }
}

/// Authenticated caller identity propagated with the call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityIdentity {
    principal: String,
    roles: Vec<String>,
}

impl SecurityIdentity {
    /// Builds an identity with the given roles.
    #[must_use]
    pub fn new<I, S>(principal: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            principal: principal.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// Principal name.
    #[must_use]
    pub fn principal(&self) -> &str {
        self.principal.as_str()
    }

    /// Granted roles.
    #[must_use]
    pub fn roles(&self) -> &[String] {
        &self.roles
    }
}

/// Transaction the call runs under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    id: String,
}

impl Transaction {
    /// Wraps a transaction identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Transaction identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        self.id.as_str()
    }
}

/// Failure importing the caller's transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to resolve transaction: {message}")]
pub struct TransactionError {
    message: String,
}

impl TransactionError {
    /// Builds a transaction error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Lazily imports the caller's transaction.
///
/// The dispatcher never calls [`resolve`](Self::resolve) itself; the
/// component's transaction interceptor does, at most once per invocation.
pub trait TransactionSource: Send + Sync + fmt::Debug {
    /// Imports the transaction.
    fn resolve(&self) -> Result<Transaction, TransactionError>;
}

/// One inbound method invocation.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub(crate) id: InvocationId,
    pub(crate) target: ComponentIdentifier,
    pub(crate) view: String,
    pub(crate) session: Option<SessionId>,
    pub(crate) method: MethodLocator,
    pub(crate) parameters: Vec<Value>,
    pub(crate) attachments: Attachments,
    pub(crate) transaction: Option<Arc<dyn TransactionSource>>,
    pub(crate) identity: Option<SecurityIdentity>,
    pub(crate) protocol: String,
}

impl InvocationRequest {
    /// Builds a request with no parameters, attachments or session.
    #[must_use]
    pub fn new(
        id: impl Into<InvocationId>,
        target: ComponentIdentifier,
        view: impl Into<String>,
        method: MethodLocator,
    ) -> Self {
        Self {
            id: id.into(),
            target,
            view: view.into(),
            session: None,
            method,
            parameters: Vec::new(),
            attachments: Attachments::new(),
            transaction: None,
            identity: None,
            protocol: DEFAULT_PROTOCOL.to_owned(),
        }
    }

    /// Addresses a stateful session.
    #[must_use]
    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session = Some(session);
        self
    }

    /// Sets the decoded parameter values.
    #[must_use]
    pub fn with_parameters(mut self, parameters: impl IntoIterator<Item = Value>) -> Self {
        self.parameters = parameters.into_iter().collect();
        self
    }

    /// Adds one attachment.
    #[must_use]
    pub fn with_attachment(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attachments.insert(key, value);
        self
    }

    /// Replaces the attachments.
    #[must_use]
    pub fn with_attachments(mut self, attachments: Attachments) -> Self {
        self.attachments = attachments;
        self
    }

    /// Supplies the caller's transaction.
    #[must_use]
    pub fn with_transaction(mut self, transaction: Arc<dyn TransactionSource>) -> Self {
        self.transaction = Some(transaction);
        self
    }

    /// Supplies the caller's identity.
    #[must_use]
    pub fn with_identity(mut self, identity: SecurityIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Sets the transport protocol tag.
    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Invocation identifier.
    #[must_use]
    pub fn id(&self) -> InvocationId {
        self.id
    }

    /// Call target.
    #[must_use]
    pub fn target(&self) -> &ComponentIdentifier {
        &self.target
    }

    /// Requested view name.
    #[must_use]
    pub fn view(&self) -> &str {
        self.view.as_str()
    }

    /// Session identifier for stateful targets.
    #[must_use]
    pub fn session(&self) -> Option<&SessionId> {
        self.session.as_ref()
    }

    /// Requested method.
    #[must_use]
    pub fn method(&self) -> &MethodLocator {
        &self.method
    }

    /// Request attachments.
    #[must_use]
    pub fn attachments(&self) -> &Attachments {
        &self.attachments
    }

    /// Transport protocol tag.
    #[must_use]
    pub fn protocol(&self) -> &str {
        self.protocol.as_str()
    }
}

/// Request to create a stateful session.
#[derive(Debug, Clone)]
pub struct SessionOpenRequest {
    pub(crate) id: InvocationId,
    pub(crate) target: ComponentIdentifier,
    pub(crate) identity: Option<SecurityIdentity>,
    pub(crate) protocol: String,
}

impl SessionOpenRequest {
    /// Builds a session-open request.
    #[must_use]
    pub fn new(id: impl Into<InvocationId>, target: ComponentIdentifier) -> Self {
        Self {
            id: id.into(),
            target,
            identity: None,
            protocol: DEFAULT_PROTOCOL.to_owned(),
        }
    }

    /// Supplies the caller's identity.
    #[must_use]
    pub fn with_identity(mut self, identity: SecurityIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Sets the transport protocol tag.
    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Request identifier.
    #[must_use]
    pub fn id(&self) -> InvocationId {
        self.id
    }

    /// Component the session is opened on.
    #[must_use]
    pub fn target(&self) -> &ComponentIdentifier {
        &self.target
    }
}
