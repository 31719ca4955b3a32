//! Best-effort affinity attachment after an invocation.

use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, warn};

use super::DISPATCH_TARGET;
use super::request::{Attachments, WEAK_AFFINITY_KEY};
use super::response::ResponseChannel;
use crate::component::{Affinity, AffinityError, ComponentKind, SessionId};
use crate::deployment::DeployedComponent;
use crate::pool::panic_message;

/// Affinities computed for one response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct AffinityUpdate {
    strong: Option<Affinity>,
    weak: Option<Affinity>,
    legacy: Option<Affinity>,
}

impl AffinityUpdate {
    /// Queries the component for the affinities of a call.
    ///
    /// Stateful calls carrying a session report the strict affinity as strong
    /// and the session hint as weak. Stateless calls report their unscoped
    /// hint as strong, since clients only follow weak updates naming a node.
    /// Failures are logged and leave the hint out.
    pub(crate) fn compute(component: &DeployedComponent, session: Option<&SessionId>) -> Self {
        let handle = component.component();
        match (component.kind(), session) {
            (ComponentKind::Stateful, Some(session)) => {
                let strong = best_effort(component.name(), || handle.strict_affinity());
                let weak = best_effort(component.name(), || handle.affinity_hint(Some(session)));
                Self {
                    strong,
                    legacy: weak.clone(),
                    weak,
                }
            }
            (ComponentKind::Stateless, _) => {
                let strong = best_effort(component.name(), || handle.affinity_hint(None));
                Self {
                    legacy: strong.clone(),
                    strong,
                    weak: None,
                }
            }
            _ => Self::default(),
        }
    }

    /// Pushes the update to the sink and records the legacy weak affinity in
    /// the outgoing attachments.
    pub(crate) fn apply(&self, channel: &ResponseChannel, attachments: &mut Attachments) {
        channel.update_affinity(self.strong.as_ref(), self.weak.as_ref());
        let Some(legacy) = self.legacy.as_ref().filter(|affinity| !affinity.is_none()) else {
            return;
        };
        match serde_json::to_value(legacy) {
            Ok(value) => {
                attachments.insert(WEAK_AFFINITY_KEY, value);
            }
            Err(error) => warn!(
                target: DISPATCH_TARGET,
                affinity = %legacy,
                error = %error,
                "failed to encode weak affinity attachment"
            ),
        }
        debug!(
            target: DISPATCH_TARGET,
            strong = ?self.strong,
            weak = ?self.weak,
            "affinity attached"
        );
    }
}

/// Runs an affinity query, turning errors and panics into "no hint".
pub(super) fn best_effort(
    component: &str,
    query: impl FnOnce() -> Result<Option<Affinity>, AffinityError>,
) -> Option<Affinity> {
    match panic::catch_unwind(AssertUnwindSafe(query)) {
        Ok(Ok(hint)) => hint,
        Ok(Err(error)) => {
            warn!(
                target: DISPATCH_TARGET,
                component,
                error = %error,
                "failed to compute affinity; responding without it"
            );
            None
        }
        Err(payload) => {
            warn!(
                target: DISPATCH_TARGET,
                component,
                panic = %panic_message(&*payload),
                "affinity query panicked; responding without it"
            );
            None
        }
    }
}
