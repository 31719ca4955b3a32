//! Target and method resolution against the started-module snapshot.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use super::outcome::InfrastructureFailure;
use super::request::{ComponentIdentifier, InvocationRequest};
use crate::deployment::{ComponentView, DeployedComponent, DeploymentSource, MethodLocator, ViewMethod};

const RESOLVER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::resolver");

/// Addressing failures raised while resolving a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// No started module holds the component.
    #[error("no such target: {target}")]
    NoSuchTarget { target: String },

    /// The view is missing or not remotely invocable.
    #[error("view {view} of {target} is not a remote view")]
    WrongViewType { target: String, view: String },

    /// No view method matches the locator exactly.
    #[error("no method {method} on view {view} of {target}")]
    NoSuchMethod {
        target: String,
        view: String,
        method: String,
    },
}

impl ResolutionError {
    /// Creates a missing-target error.
    pub fn no_such_target(target: &ComponentIdentifier) -> Self {
        Self::NoSuchTarget {
            target: target.to_string(),
        }
    }

    /// Creates a wrong-view error.
    pub fn wrong_view_type(target: &ComponentIdentifier, view: impl Into<String>) -> Self {
        Self::WrongViewType {
            target: target.to_string(),
            view: view.into(),
        }
    }

    /// Creates a missing-method error.
    pub fn no_such_method(
        target: &ComponentIdentifier,
        view: impl Into<String>,
        method: &MethodLocator,
    ) -> Self {
        Self::NoSuchMethod {
            target: target.to_string(),
            view: view.into(),
            method: method.to_string(),
        }
    }

    /// Infrastructure failure reported to the caller.
    #[must_use]
    pub fn failure(&self) -> InfrastructureFailure {
        match self {
            Self::NoSuchTarget { .. } => InfrastructureFailure::NoSuchTarget,
            Self::WrongViewType { .. } => InfrastructureFailure::WrongViewType,
            Self::NoSuchMethod { .. } => InfrastructureFailure::NoSuchMethod,
        }
    }
}

/// A fully resolved call target. Owned by a single dispatch.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    component: Arc<DeployedComponent>,
    view: Arc<ComponentView>,
    method: Arc<ViewMethod>,
}

impl ResolvedTarget {
    /// Deployed component.
    #[must_use]
    pub fn component(&self) -> &Arc<DeployedComponent> {
        &self.component
    }

    /// Resolved view.
    #[must_use]
    pub fn view(&self) -> &Arc<ComponentView> {
        &self.view
    }

    /// Resolved method.
    #[must_use]
    pub fn method(&self) -> &Arc<ViewMethod> {
        &self.method
    }

    /// Whether the method is declared asynchronous.
    #[must_use]
    pub fn is_asynchronous(&self) -> bool {
        self.method.is_asynchronous()
    }

    /// Whether the method is asynchronous and returns nothing.
    #[must_use]
    pub fn is_one_way(&self) -> bool {
        self.method.is_asynchronous() && self.method.is_void()
    }
}

/// Looks up components in the deployment snapshot.
///
/// Every call loads a fresh snapshot; nothing is cached between requests.
#[derive(Clone)]
pub struct ComponentResolver {
    source: Arc<dyn DeploymentSource>,
}

impl ComponentResolver {
    /// Builds a resolver over the given deployment source.
    pub fn new(source: Arc<dyn DeploymentSource>) -> Self {
        Self { source }
    }

    /// Finds a component in a started module.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::NoSuchTarget`] when the module is absent or
    /// not started, or it holds no component of that name.
    pub fn resolve(
        &self,
        target: &ComponentIdentifier,
    ) -> Result<Arc<DeployedComponent>, ResolutionError> {
        let snapshot = self.source.started_modules();
        let component = snapshot
            .module(target.module_id())
            .and_then(|module| module.component(target.component()))
            .cloned();
        component.ok_or_else(|| {
            debug!(target: RESOLVER_TARGET, %target, "no started module holds the target");
            ResolutionError::no_such_target(target)
        })
    }

    /// Finds a remote view on a resolved component.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::WrongViewType`] when the view is missing or
    /// local-only.
    pub fn resolve_view(
        &self,
        target: &ComponentIdentifier,
        component: &DeployedComponent,
        view: &str,
    ) -> Result<Arc<ComponentView>, ResolutionError> {
        match component.view(view) {
            Some(found) if found.is_remote() => Ok(Arc::clone(found)),
            _ => {
                debug!(target: RESOLVER_TARGET, %target, view, "view is not remotely invocable");
                Err(ResolutionError::wrong_view_type(target, view))
            }
        }
    }

    /// Finds the view method matching the locator's name and exact ordered
    /// parameter type names.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::NoSuchMethod`] when nothing matches.
    pub fn resolve_method(
        &self,
        target: &ComponentIdentifier,
        view: &ComponentView,
        locator: &MethodLocator,
    ) -> Result<Arc<ViewMethod>, ResolutionError> {
        view.find_method(locator).ok_or_else(|| {
            debug!(target: RESOLVER_TARGET, %target, view = view.name(), method = %locator, "no matching method");
            ResolutionError::no_such_method(target, view.name(), locator)
        })
    }

    /// Resolves component, view and method for a request.
    ///
    /// # Errors
    ///
    /// Returns the first addressing failure encountered.
    pub fn resolve_invocation(
        &self,
        request: &InvocationRequest,
    ) -> Result<ResolvedTarget, ResolutionError> {
        let target = request.target();
        let component = self.resolve(target)?;
        let view = self.resolve_view(target, &component, request.view())?;
        let method = self.resolve_method(target, &view, request.method())?;
        Ok(ResolvedTarget {
            component,
            view,
            method,
        })
    }
}
