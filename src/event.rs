//! Change and event types flowing between the external store, the graph, and
//! downstream observers.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::properties::Resource;

/// Indicates the origin of a change for proper handling by the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ChangeOrigin {
    /// Produced by this graph instance (a publish) and already applied to
    /// local state. The store feed will echo it back for confirmation.
    Local,
    /// Delivered by the external store's change feed. Must be applied.
    #[default]
    Remote,
}

/// The lifecycle transition a change describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Changed,
    Removed,
}

/// One record mutation from the store feed. The store delivers the full
/// record state for `Added`/`Changed`; `Removed` carries the last-known
/// state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub kind: ChangeKind,
    pub resource: Resource,
    #[serde(default)]
    pub origin: ChangeOrigin,
}

impl Change {
    pub fn added(resource: Resource) -> Change {
        Change {
            kind: ChangeKind::Added,
            resource,
            origin: ChangeOrigin::default(),
        }
    }

    pub fn changed(resource: Resource) -> Change {
        Change {
            kind: ChangeKind::Changed,
            resource,
            origin: ChangeOrigin::default(),
        }
    }

    pub fn removed(resource: Resource) -> Change {
        Change {
            kind: ChangeKind::Removed,
            resource,
            origin: ChangeOrigin::default(),
        }
    }
}

/// A net-visible graph mutation, dispatched to observers after all derived
/// indexes have been updated. `resource` is the post-state for add/change
/// and the removed state for removals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceEvent {
    pub kind: ChangeKind,
    pub resource: Resource,
    /// Owning application id, for application-scoped observation.
    pub application: String,
}

impl ResourceEvent {
    pub fn new(kind: ChangeKind, resource: Resource) -> ResourceEvent {
        let application = resource.application.clone();
        ResourceEvent {
            kind,
            resource,
            application,
        }
    }
}

impl Display for ResourceEvent {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self.kind {
            ChangeKind::Added => write!(f, "Added({})", self.resource.brl),
            ChangeKind::Changed => write!(f, "Changed({})", self.resource.brl),
            ChangeKind::Removed => write!(f, "Removed({})", self.resource.brl),
        }
    }
}

/// Synchronous graph observer. Runs after index maintenance; an `Err` return
/// is logged and never blocks the other observers.
pub type ObserverFn = Box<dyn Fn(&ResourceEvent) -> Result<(), crate::RelayError> + Send + Sync>;
