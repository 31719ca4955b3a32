//! Deployed modules and the snapshot the resolver reads.
//!
//! The dispatcher never owns deployment state. It reads an immutable
//! [`DeploymentSnapshot`] from a [`DeploymentSource`] supplied at construction
//! time; the owner swaps snapshots atomically when modules start or stop. The
//! in-memory [`DeploymentRepository`] is the default owner and also publishes
//! module availability to subscribed listeners.

mod repository;
mod view;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::component::{Component, ComponentKind};

pub use repository::{DeploymentError, DeploymentRepository, ModuleAvailabilityListener, Subscription};
pub use view::{ComponentView, MethodLocator, ReturnType, ViewMethod};

/// Tracing target for deployment events.
pub(crate) const DEPLOYMENT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::deployment");

/// Composite key identifying a deployed module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleIdentifier {
    app: String,
    module: String,
    distinct: String,
}

impl ModuleIdentifier {
    /// Builds a module identifier. Empty strings are valid for the
    /// application and distinct names.
    #[must_use]
    pub fn new(app: impl Into<String>, module: impl Into<String>, distinct: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            module: module.into(),
            distinct: distinct.into(),
        }
    }

    /// Application name.
    #[must_use]
    pub fn app(&self) -> &str {
        self.app.as_str()
    }

    /// Module name.
    #[must_use]
    pub fn module(&self) -> &str {
        self.module.as_str()
    }

    /// Distinct name.
    #[must_use]
    pub fn distinct(&self) -> &str {
        self.distinct.as_str()
    }
}

impl fmt::Display for ModuleIdentifier {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}/{}/{}", self.app, self.module, self.distinct)
    }
}

/// A component together with the views it exposes.
pub struct DeployedComponent {
    component: Arc<dyn Component>,
    views: HashMap<String, Arc<ComponentView>>,
}

impl DeployedComponent {
    /// Pairs a component with its views.
    pub fn new(component: Arc<dyn Component>, views: impl IntoIterator<Item = ComponentView>) -> Self {
        let views = views
            .into_iter()
            .map(|view| (view.name().to_owned(), Arc::new(view)))
            .collect();
        Self { component, views }
    }

    /// Component name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.component.name()
    }

    /// Component kind.
    #[must_use]
    pub fn kind(&self) -> ComponentKind {
        self.component.kind()
    }

    /// Invocable handle.
    #[must_use]
    pub fn component(&self) -> &Arc<dyn Component> {
        &self.component
    }

    /// Looks up a view by name, regardless of remote visibility.
    #[must_use]
    pub fn view(&self, name: &str) -> Option<&Arc<ComponentView>> {
        self.views.get(name)
    }
}

impl fmt::Debug for DeployedComponent {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("DeployedComponent")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .field("views", &self.views.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A deployed module and its components.
#[derive(Debug)]
pub struct ModuleDeployment {
    id: ModuleIdentifier,
    components: HashMap<String, Arc<DeployedComponent>>,
}

impl ModuleDeployment {
    /// Creates an empty module.
    #[must_use]
    pub fn new(id: ModuleIdentifier) -> Self {
        Self {
            id,
            components: HashMap::new(),
        }
    }

    /// Adds a component, replacing any previous component of the same name.
    #[must_use]
    pub fn with_component(mut self, component: DeployedComponent) -> Self {
        self.components
            .insert(component.name().to_owned(), Arc::new(component));
        self
    }

    /// Module identifier.
    #[must_use]
    pub fn id(&self) -> &ModuleIdentifier {
        &self.id
    }

    /// Looks up a component by name.
    #[must_use]
    pub fn component(&self, name: &str) -> Option<&Arc<DeployedComponent>> {
        self.components.get(name)
    }
}

/// Immutable view of the started modules at one point in time.
#[derive(Debug, Default)]
pub struct DeploymentSnapshot {
    modules: HashMap<ModuleIdentifier, Arc<ModuleDeployment>>,
}

impl DeploymentSnapshot {
    /// Builds a snapshot from started modules.
    pub fn from_modules(modules: impl IntoIterator<Item = Arc<ModuleDeployment>>) -> Self {
        Self {
            modules: modules
                .into_iter()
                .map(|module| (module.id().clone(), module))
                .collect(),
        }
    }

    /// Looks up a started module.
    #[must_use]
    pub fn module(&self, id: &ModuleIdentifier) -> Option<&Arc<ModuleDeployment>> {
        self.modules.get(id)
    }

    /// Identifiers of every started module.
    #[must_use]
    pub fn identifiers(&self) -> Vec<ModuleIdentifier> {
        self.modules.keys().cloned().collect()
    }

    /// Number of started modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether no module is started.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Read path onto externally owned deployment state.
///
/// Implementations return a snapshot; callers must not assume it reflects
/// later changes.
pub trait DeploymentSource: Send + Sync {
    /// Current set of started modules.
    fn started_modules(&self) -> Arc<DeploymentSnapshot>;
}

impl<T> DeploymentSource for Arc<T>
where
    T: DeploymentSource + ?Sized,
{
    fn started_modules(&self) -> Arc<DeploymentSnapshot> {
        (**self).started_modules()
    }
}
