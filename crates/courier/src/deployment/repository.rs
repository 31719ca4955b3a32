//! In-memory deployment repository with availability notifications.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use arc_swap::ArcSwap;
use thiserror::Error;
use tracing::debug;

use super::{DEPLOYMENT_TARGET, DeploymentSnapshot, DeploymentSource, ModuleDeployment, ModuleIdentifier};

/// Observer notified when modules become available or unavailable.
pub trait ModuleAvailabilityListener: Send + Sync {
    /// Invoked when modules become invocable.
    fn module_available(&self, modules: &[ModuleIdentifier]);

    /// Invoked when modules stop being invocable.
    fn module_unavailable(&self, modules: &[ModuleIdentifier]);
}

impl<T> ModuleAvailabilityListener for Arc<T>
where
    T: ModuleAvailabilityListener + ?Sized,
{
    fn module_available(&self, modules: &[ModuleIdentifier]) {
        (**self).module_available(modules);
    }

    fn module_unavailable(&self, modules: &[ModuleIdentifier]) {
        (**self).module_unavailable(modules);
    }
}

/// Errors raised by repository mutations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeploymentError {
    /// A module with the same identifier is already deployed.
    #[error("module {id} is already deployed")]
    AlreadyDeployed {
        /// Offending identifier.
        id: ModuleIdentifier,
    },
    /// No module with the identifier is deployed.
    #[error("module {id} is not deployed")]
    UnknownModule {
        /// Missing identifier.
        id: ModuleIdentifier,
    },
}

struct ModuleEntry {
    deployment: Arc<ModuleDeployment>,
    started: bool,
    suspended: bool,
}

impl ModuleEntry {
    fn is_visible(&self) -> bool {
        self.started && !self.suspended
    }
}

struct RepositoryState {
    modules: HashMap<ModuleIdentifier, ModuleEntry>,
    server_running: bool,
    listeners: Vec<(u64, Arc<dyn ModuleAvailabilityListener>)>,
    next_listener: u64,
}

impl RepositoryState {
    fn visible(&self) -> Vec<ModuleIdentifier> {
        self.modules
            .iter()
            .filter(|(_, entry)| entry.is_visible())
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn snapshot(&self) -> DeploymentSnapshot {
        DeploymentSnapshot::from_modules(
            self.modules
                .values()
                .filter(|entry| entry.is_visible())
                .map(|entry| Arc::clone(&entry.deployment)),
        )
    }

    fn announce_available(&self, modules: &[ModuleIdentifier]) {
        if modules.is_empty() {
            return;
        }
        for (_, listener) in &self.listeners {
            listener.module_available(modules);
        }
    }

    fn announce_unavailable(&self, modules: &[ModuleIdentifier]) {
        if modules.is_empty() {
            return;
        }
        for (_, listener) in &self.listeners {
            listener.module_unavailable(modules);
        }
    }

    fn entry_mut(&mut self, id: &ModuleIdentifier) -> Result<&mut ModuleEntry, DeploymentError> {
        self.modules
            .get_mut(id)
            .ok_or_else(|| DeploymentError::UnknownModule { id: id.clone() })
    }
}

/// Default owner of deployment state.
///
/// Mutations take an internal lock and publish a fresh snapshot of the
/// visible (started and not suspended) modules; readers load the snapshot
/// without locking. Listeners are notified under the state lock and must not
/// call back into the repository.
pub struct DeploymentRepository {
    state: Mutex<RepositoryState>,
    started: ArcSwap<DeploymentSnapshot>,
}

impl Default for DeploymentRepository {
    fn default() -> Self {
        Self {
            state: Mutex::new(RepositoryState {
                modules: HashMap::new(),
                server_running: true,
                listeners: Vec::new(),
                next_listener: 0,
            }),
            started: ArcSwap::from_pointee(DeploymentSnapshot::default()),
        }
    }
}

impl DeploymentRepository {
    /// Creates an empty repository for a running server.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, RepositoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &RepositoryState) {
        self.started.store(Arc::new(state.snapshot()));
    }

    /// Registers a deployed module. It is not resolvable or announced until
    /// [`start`](Self::start) is called.
    ///
    /// # Errors
    ///
    /// Returns [`DeploymentError::AlreadyDeployed`] for duplicate identifiers.
    pub fn deploy(&self, deployment: ModuleDeployment) -> Result<(), DeploymentError> {
        let mut state = self.lock();
        let id = deployment.id().clone();
        if state.modules.contains_key(&id) {
            return Err(DeploymentError::AlreadyDeployed { id });
        }
        debug!(target: DEPLOYMENT_TARGET, module = %id, "module deployed");
        state.modules.insert(
            id,
            ModuleEntry {
                deployment: Arc::new(deployment),
                started: false,
                suspended: false,
            },
        );
        Ok(())
    }

    /// Marks a module started and announces it.
    ///
    /// # Errors
    ///
    /// Returns [`DeploymentError::UnknownModule`] if the module is not deployed.
    pub fn start(&self, id: &ModuleIdentifier) -> Result<(), DeploymentError> {
        self.transition(id, |entry| entry.started = true)
    }

    /// Suspends a single module; it stops resolving until resumed.
    ///
    /// # Errors
    ///
    /// Returns [`DeploymentError::UnknownModule`] if the module is not deployed.
    pub fn suspend(&self, id: &ModuleIdentifier) -> Result<(), DeploymentError> {
        self.transition(id, |entry| entry.suspended = true)
    }

    /// Resumes a suspended module.
    ///
    /// # Errors
    ///
    /// Returns [`DeploymentError::UnknownModule`] if the module is not deployed.
    pub fn resume(&self, id: &ModuleIdentifier) -> Result<(), DeploymentError> {
        self.transition(id, |entry| entry.suspended = false)
    }

    fn transition(
        &self,
        id: &ModuleIdentifier,
        change: impl FnOnce(&mut ModuleEntry),
    ) -> Result<(), DeploymentError> {
        let mut state = self.lock();
        let entry = state.entry_mut(id)?;
        let was_visible = entry.is_visible();
        change(entry);
        let now_visible = entry.is_visible();
        if was_visible == now_visible {
            return Ok(());
        }
        self.publish(&state);
        let changed = [id.clone()];
        if now_visible {
            debug!(target: DEPLOYMENT_TARGET, module = %id, "module available");
            state.announce_available(&changed);
        } else {
            debug!(target: DEPLOYMENT_TARGET, module = %id, "module unavailable");
            state.announce_unavailable(&changed);
        }
        Ok(())
    }

    /// Removes a module.
    ///
    /// # Errors
    ///
    /// Returns [`DeploymentError::UnknownModule`] if the module is not deployed.
    pub fn remove(&self, id: &ModuleIdentifier) -> Result<(), DeploymentError> {
        let mut state = self.lock();
        let entry = state
            .modules
            .remove(id)
            .ok_or_else(|| DeploymentError::UnknownModule { id: id.clone() })?;
        debug!(target: DEPLOYMENT_TARGET, module = %id, "module removed");
        if entry.is_visible() {
            self.publish(&state);
            state.announce_unavailable(&[id.clone()]);
        }
        Ok(())
    }

    /// Suspends the server: every visible module is announced unavailable.
    ///
    /// Snapshots are unchanged; components reject calls through their own
    /// suspension handling.
    pub fn suspend_server(&self) {
        let mut state = self.lock();
        if !state.server_running {
            return;
        }
        state.server_running = false;
        let visible = state.visible();
        debug!(
            target: DEPLOYMENT_TARGET,
            modules = visible.len(),
            "announcing module unavailability on server suspend"
        );
        state.announce_unavailable(&visible);
    }

    /// Resumes the server and re-announces every visible module.
    pub fn resume_server(&self) {
        let mut state = self.lock();
        if state.server_running {
            return;
        }
        state.server_running = true;
        let visible = state.visible();
        debug!(
            target: DEPLOYMENT_TARGET,
            modules = visible.len(),
            "announcing module availability on server resume"
        );
        state.announce_available(&visible);
    }

    /// Whether the server is accepting work.
    #[must_use]
    pub fn is_server_running(&self) -> bool {
        self.lock().server_running
    }

    /// Registers a listener. While the server is running the listener
    /// immediately receives the currently visible modules.
    pub fn subscribe(self: &Arc<Self>, listener: Arc<dyn ModuleAvailabilityListener>) -> Subscription {
        let mut state = self.lock();
        let id = state.next_listener;
        state.next_listener += 1;
        if state.server_running {
            let visible = state.visible();
            listener.module_available(&visible);
        }
        state.listeners.push((id, listener));
        Subscription {
            repository: Arc::downgrade(self),
            id: Some(id),
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.lock().listeners.retain(|(listener_id, _)| *listener_id != id);
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }
}

impl DeploymentSource for DeploymentRepository {
    fn started_modules(&self) -> Arc<DeploymentSnapshot> {
        self.started.load_full()
    }
}

/// Handle that unregisters a listener when closed or dropped.
#[derive(Debug)]
pub struct Subscription {
    repository: Weak<DeploymentRepository>,
    id: Option<u64>,
}

impl Subscription {
    /// Unregisters the listener.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let (Some(id), Some(repository)) = (self.id.take(), self.repository.upgrade()) {
            repository.unsubscribe(id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}
