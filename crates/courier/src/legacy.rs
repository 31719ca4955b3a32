//! Thread-local view of the calling connection for legacy collaborators.
//!
//! New code reads the caller from the [`InvocationContext`]. Collaborators
//! that can only look at ambient state call [`current_connection`], which is
//! populated for exactly the duration of a component invocation.
//!
//! [`InvocationContext`]: crate::dispatch::InvocationContext

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::dispatch::SecurityIdentity;

thread_local! {
    static CURRENT: RefCell<Option<Arc<CallerConnection>>> = const { RefCell::new(None) };
}

/// The connection an invocation arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerConnection {
    identity: Option<SecurityIdentity>,
    protocol: String,
}

impl CallerConnection {
    /// Describes a caller connection.
    #[must_use]
    pub fn new(identity: Option<SecurityIdentity>, protocol: impl Into<String>) -> Self {
        Self {
            identity,
            protocol: protocol.into(),
        }
    }

    /// Authenticated caller, if any.
    #[must_use]
    pub fn identity(&self) -> Option<&SecurityIdentity> {
        self.identity.as_ref()
    }

    /// Transport protocol tag.
    #[must_use]
    pub fn protocol(&self) -> &str {
        self.protocol.as_str()
    }
}

/// Connection installed on the current thread, if any.
#[must_use]
pub fn current_connection() -> Option<Arc<CallerConnection>> {
    CURRENT.with(|current| current.borrow().clone())
}

/// Installs a connection for the current thread until dropped.
///
/// Dropping restores whatever was installed before, including during
/// unwinding. Scopes must be dropped on the thread that created them.
#[derive(Debug)]
#[must_use = "the connection is cleared as soon as the scope is dropped"]
pub struct ConnectionScope {
    previous: Option<Arc<CallerConnection>>,
    _thread_bound: PhantomData<*const ()>,
}

impl ConnectionScope {
    /// Installs `connection` on the current thread.
    pub fn enter(connection: CallerConnection) -> Self {
        let previous = CURRENT.with(|current| current.replace(Some(Arc::new(connection))));
        Self {
            previous,
            _thread_bound: PhantomData,
        }
    }
}

impl Drop for ConnectionScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| {
            *current.borrow_mut() = previous;
        });
    }
}
