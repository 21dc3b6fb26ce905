//! Entity model: the record types published into the resource graph.
//!
//! All entities are plain serde structs keyed by [Brl]. A [Resource] is the
//! unit of publication; [Application] and [Connection] describe the owning
//! namespaces and peer relationships resources are scoped to.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::brl::{Brl, BrlKind};

/// Metadata attached to resources, applications, connections and relay path
/// entries. String keys, arbitrary serializable values.
pub type Meta = BTreeMap<String, serde_json::Value>;

/// Where a resource in the graph came from.
///
/// There is one resource data type; behavior differences between locally
/// published, remotely synced, and application-default records are carried
/// by this tag rather than a type hierarchy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Published by this graph instance; owner of the record.
    Local,
    /// Synced from the external store's change feed.
    #[default]
    Remote,
    /// An application's tagged default resource.
    Static,
}

/// The resolved form of a resource indirection.
///
/// Derived state: produced only by the relay resolver, never set by a
/// client. Chains are flattened at resolution: when the direct target was
/// itself a relay, `brl`/`target_id`/`target_application` describe the
/// *original* non-relay resource at the end of the chain, and the direct
/// target appears in `paths` instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ResolvedRelay {
    pub target_id: String,
    pub target_application: String,
    /// Brl of the effective (flattened) target.
    pub brl: Brl,
    /// Account id of the graph instance that created the relay.
    pub parent: Option<String>,
    /// The target's literal value, captured at resolution time. Feeds the
    /// value index so relays group with what they relay.
    pub value: Option<String>,
    /// Path metadata inherited from the target's other relayers, keyed by
    /// relaying resource Brl.
    pub paths: BTreeMap<Brl, Meta>,
}

/// A published record in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Resource {
    pub brl: Brl,
    pub id: String,
    pub application: String,
    /// Owning account/connection id, when known.
    pub parent: Option<String>,
    /// Either opaque data or another resource's Brl (an indirection).
    pub value: Option<String>,
    pub tag: Option<String>,
    /// Generic description of how the publisher intends the resource to be
    /// employed. Defaults to "get".
    pub action: String,
    pub meta: Meta,
    pub kind: ResourceKind,
    /// Derived: present iff the relay resolver resolved `value` as an
    /// indirection.
    pub relay: Option<ResolvedRelay>,
    /// Server-assigned publication time, when the store provides one.
    pub timestamp: Option<i64>,
}

impl Resource {
    pub fn new(host: &str, application: &str, id: &str) -> Result<Resource, crate::RelayError> {
        Ok(Resource {
            brl: Brl::resource(host, application, id)?,
            id: id.to_string(),
            application: application.to_string(),
            action: "get".to_string(),
            ..Default::default()
        })
    }

    /// Generate a short unique id, in the style of the store's generated
    /// keys.
    pub fn generate_id() -> String {
        Uuid::new_v4().simple().to_string()[..8].to_string()
    }

    /// The value this resource effectively stands for: the relay target's
    /// value when this resource is a relay, else its own.
    pub fn effective_value(&self) -> Option<&str> {
        match &self.relay {
            Some(relay) => relay.value.as_deref(),
            None => self.value.as_deref(),
        }
    }

    /// The Brl this resource effectively points at: the relay target when
    /// relayed, else itself.
    pub fn effective_brl(&self) -> &Brl {
        match &self.relay {
            Some(relay) => &relay.brl,
            None => &self.brl,
        }
    }

    pub fn is_relay(&self) -> bool {
        self.relay.is_some()
    }
}

/// The logical owner/namespace of a set of resources, with the tagged
/// default resources it exposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Application {
    pub id: String,
    pub meta: Meta,
    /// tag -> resource id of the application's default resources.
    pub resources: BTreeMap<String, String>,
}

/// A live peer relationship between two graph instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Connection {
    pub id: String,
    pub application: String,
    pub meta: Meta,
    pub active: bool,
}

/// Parameters for publishing a local resource.
#[derive(Debug, Clone, Default)]
pub struct PublishParams {
    /// Generated when absent.
    pub id: Option<String>,
    pub tag: Option<String>,
    pub value: Option<String>,
    pub action: Option<String>,
    pub meta: Meta,
}

impl PublishParams {
    pub fn with_value(value: impl Into<String>) -> PublishParams {
        PublishParams {
            value: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn with_tag(tag: impl Into<String>) -> PublishParams {
        PublishParams {
            tag: Some(tag.into()),
            ..Default::default()
        }
    }
}

impl Brl {
    /// Whether this Brl can be the target of an indirection. Accounts are
    /// not relayable.
    pub fn is_relayable(&self) -> bool {
        matches!(self.kind, BrlKind::Resource | BrlKind::Application)
    }
}
