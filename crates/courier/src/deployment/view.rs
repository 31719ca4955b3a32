//! Invocable views and their precomputed method tables.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Caller-supplied method identity: name plus ordered parameter type names.
///
/// Locators are compared by value. Parameter types must match exactly and in
/// order; there is no assignability check.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodLocator {
    name: String,
    parameter_types: Vec<String>,
}

impl MethodLocator {
    /// Builds a locator.
    pub fn new<I, S>(name: impl Into<String>, parameter_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            parameter_types: parameter_types.into_iter().map(Into::into).collect(),
        }
    }

    /// Builds a locator for a method without parameters.
    pub fn nullary(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameter_types: Vec::new(),
        }
    }

    /// Method name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Ordered parameter type names.
    #[must_use]
    pub fn parameter_types(&self) -> &[String] {
        &self.parameter_types
    }
}

impl fmt::Display for MethodLocator {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}({})", self.name, self.parameter_types.join(","))
    }
}

/// Declared return shape of a view method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnType {
    /// No return value.
    Void,
    /// A plain value.
    Value,
    /// A future-like handle resolved after the call returns.
    Future,
}

/// A method exposed by a view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewMethod {
    locator: MethodLocator,
    return_type: ReturnType,
    asynchronous: bool,
}

impl ViewMethod {
    /// Declares a synchronous method.
    #[must_use]
    pub fn new(locator: MethodLocator, return_type: ReturnType) -> Self {
        Self {
            locator,
            return_type,
            asynchronous: false,
        }
    }

    /// Marks the method as declared asynchronous.
    #[must_use]
    pub fn asynchronous(mut self) -> Self {
        self.asynchronous = true;
        self
    }

    /// Method identity.
    #[must_use]
    pub fn locator(&self) -> &MethodLocator {
        &self.locator
    }

    /// Method name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.locator.name()
    }

    /// Declared return shape.
    #[must_use]
    pub fn return_type(&self) -> ReturnType {
        self.return_type
    }

    /// Whether the component declares the method asynchronous.
    #[must_use]
    pub fn is_asynchronous(&self) -> bool {
        self.asynchronous
    }

    /// Whether the method returns nothing.
    #[must_use]
    pub fn is_void(&self) -> bool {
        self.return_type == ReturnType::Void
    }
}

impl fmt::Display for ViewMethod {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.locator.fmt(formatter)
    }
}

/// One invocable interface exposed by a component.
#[derive(Debug, Clone)]
pub struct ComponentView {
    name: String,
    remote: bool,
    methods: HashMap<MethodLocator, Arc<ViewMethod>>,
}

impl ComponentView {
    /// Builds a remotely invocable view.
    pub fn remote(name: impl Into<String>, methods: impl IntoIterator<Item = ViewMethod>) -> Self {
        Self::build(name.into(), true, methods)
    }

    /// Builds a view that is only reachable in-process.
    pub fn local(name: impl Into<String>, methods: impl IntoIterator<Item = ViewMethod>) -> Self {
        Self::build(name.into(), false, methods)
    }

    fn build(name: String, remote: bool, methods: impl IntoIterator<Item = ViewMethod>) -> Self {
        let mut table = HashMap::new();
        for method in methods {
            // First declaration of a signature wins.
            if let Entry::Vacant(slot) = table.entry(method.locator().clone()) {
                slot.insert(Arc::new(method));
            }
        }
        Self {
            name,
            remote,
            methods: table,
        }
    }

    /// View name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Whether remote clients may address this view.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        self.remote
    }

    /// Looks up a method by exact signature.
    #[must_use]
    pub fn find_method(&self, locator: &MethodLocator) -> Option<Arc<ViewMethod>> {
        self.methods.get(locator).cloned()
    }

    /// Number of distinct signatures exposed.
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }
}
