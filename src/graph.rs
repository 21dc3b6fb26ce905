//! ResourceGraph: the in-memory shared resource graph.
//!
//! This module contains the canonical resource map, the derived secondary
//! indexes (per-application, value, tag), the local publication surface, and
//! change-feed ingestion with observer dispatch. All derived state is
//! maintained synchronously within the mutating call, so observers and
//! queries always see a consistent post-state.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::{
    brl::{check_tag, Brl},
    config::GraphConfig,
    event::{Change, ChangeKind, ChangeOrigin, ObserverFn, ResourceEvent},
    properties::{Application, Connection, Meta, PublishParams, Resource, ResourceKind},
    relay::RelayIndex,
    store::ResourceStore,
    RelayError,
};

pub struct ResourceGraph {
    pub(crate) config: GraphConfig,
    /// Canonical record state, keyed by Brl. Every other map below is
    /// derived from it and rebuilt within the same mutating call.
    pub(crate) resources: BTreeMap<Brl, Resource>,
    by_application: BTreeMap<String, BTreeSet<Brl>>,
    applications: BTreeMap<String, Application>,
    connections: BTreeMap<String, Connection>,
    /// effective value -> relaying/holding resource -> its meta. Drives
    /// value-keyed grouping and [crate::relay] path discovery.
    pub(crate) values: BTreeMap<String, BTreeMap<Brl, Meta>>,
    /// Local tag -> the one live local resource published under it.
    tags: BTreeMap<String, Brl>,
    /// Local resource id -> Brl, for the publish/remove_local surface.
    local: BTreeMap<String, Brl>,
    /// Local publications awaiting confirmation from the store feed.
    pending: BTreeSet<Brl>,
    /// Records pulled from the store on demand rather than delivered live.
    cached: BTreeSet<Brl>,
    pub(crate) relays: RwLock<RelayIndex>,
    observers: Vec<(String, ObserverFn)>,
    subscribers: Vec<mpsc::UnboundedSender<ResourceEvent>>,
}

impl ResourceGraph {
    pub fn new(config: GraphConfig) -> Result<ResourceGraph, RelayError> {
        config.validate()?;
        Ok(ResourceGraph {
            config,
            resources: BTreeMap::new(),
            by_application: BTreeMap::new(),
            applications: BTreeMap::new(),
            connections: BTreeMap::new(),
            values: BTreeMap::new(),
            tags: BTreeMap::new(),
            local: BTreeMap::new(),
            pending: BTreeSet::new(),
            cached: BTreeSet::new(),
            relays: RwLock::new(RelayIndex::default()),
            observers: Vec::new(),
            subscribers: Vec::new(),
        })
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn application_id(&self) -> &str {
        &self.config.application
    }

    pub fn account(&self) -> &str {
        &self.config.account
    }

    /// The Brl a resource with `id` published by this instance carries.
    pub fn resource_brl(&self, id: &str) -> Result<Brl, RelayError> {
        Brl::resource(&self.config.host, &self.config.application, id)
    }

    pub fn get(&self, brl: &Brl) -> Option<&Resource> {
        self.resources.get(brl)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn by_application(&self, application: &str) -> impl Iterator<Item = &Resource> {
        self.by_application
            .get(application)
            .into_iter()
            .flatten()
            .filter_map(|brl| self.resources.get(brl))
    }

    pub fn application(&self, id: &str) -> Option<&Application> {
        self.applications.get(id)
    }

    pub fn applications(&self) -> impl Iterator<Item = &Application> {
        self.applications.values()
    }

    pub fn connection(&self, id: &str) -> Option<&Connection> {
        self.connections.get(id)
    }

    /// Resources under a value key, with the meta each holder registered.
    pub fn by_value(&self, value: &str) -> Option<&BTreeMap<Brl, Meta>> {
        self.values.get(value)
    }

    pub fn tagged(&self, tag: &str) -> Option<&Resource> {
        self.tags.get(tag).and_then(|brl| self.resources.get(brl))
    }

    /// Whether a local publication is still awaiting store confirmation.
    pub fn is_pending(&self, brl: &Brl) -> bool {
        self.pending.contains(brl)
    }

    /// Whether the record entered the graph via an on-demand store fetch.
    pub fn is_cached(&self, brl: &Brl) -> bool {
        self.cached.contains(brl)
    }

    // ---- mutation -------------------------------------------------------

    /// Insert or replace a record, rebuilding every derived index entry it
    /// participates in. Returns `Added` for an unseen Brl, `Changed`
    /// otherwise.
    pub fn upsert(&mut self, resource: Resource) -> ChangeKind {
        let prior = self.resources.get(&resource.brl).cloned();
        self.unindex_value(prior.as_ref());
        self.index_relay(prior.as_ref(), &resource);

        self.by_application
            .entry(resource.application.clone())
            .or_default()
            .insert(resource.brl.clone());
        if let Some(value) = resource.effective_value() {
            self.values
                .entry(value.to_string())
                .or_default()
                .insert(resource.brl.clone(), resource.meta.clone());
        }
        self.resources.insert(resource.brl.clone(), resource);
        match prior {
            Some(_) => ChangeKind::Changed,
            None => ChangeKind::Added,
        }
    }

    /// Remove a record and purge every derived entry keyed by it in the
    /// same synchronous step.
    pub fn remove(&mut self, brl: &Brl) -> Option<Resource> {
        let removed = self.resources.remove(brl)?;
        self.unindex_value(Some(&removed));
        if let Some(set) = self.by_application.get_mut(&removed.application) {
            set.remove(brl);
            if set.is_empty() {
                self.by_application.remove(&removed.application);
            }
        }
        if let Some(tag) = &removed.tag {
            if self.tags.get(tag) == Some(brl) {
                self.tags.remove(tag);
            }
        }
        if self.local.get(&removed.id) == Some(brl) {
            self.local.remove(&removed.id);
        }
        self.pending.remove(brl);
        self.cached.remove(brl);
        self.purge_relay(&removed);
        Some(removed)
    }

    fn unindex_value(&mut self, prior: Option<&Resource>) {
        let Some(prior) = prior else {
            return;
        };
        if let Some(value) = prior.effective_value() {
            if let Some(holders) = self.values.get_mut(value) {
                holders.remove(&prior.brl);
                if holders.is_empty() {
                    self.values.remove(value);
                }
            }
        }
    }

    /// Insert a record fetched from the store on demand.
    pub(crate) fn upsert_cached(&mut self, resource: Resource) -> ChangeKind {
        self.cached.insert(resource.brl.clone());
        self.upsert(resource)
    }

    // ---- change-feed ingestion ------------------------------------------

    /// Consume one external store change, returning the net-visible events.
    /// Events are also dispatched to registered observers, after all index
    /// maintenance for the change has completed.
    pub fn apply(&mut self, change: Change) -> Vec<ResourceEvent> {
        let mut events = Vec::new();
        match change.kind {
            ChangeKind::Removed => {
                if let Some(removed) = self.remove(&change.resource.brl) {
                    events.push(ResourceEvent::new(ChangeKind::Removed, removed));
                }
            }
            ChangeKind::Added | ChangeKind::Changed => {
                if change.origin == ChangeOrigin::Remote && self.is_relay_echo(&change.resource) {
                    tracing::debug!(
                        "[apply] skipping {}: relayed from this instance",
                        change.resource.brl
                    );
                    return events;
                }
                let mut resource = change.resource;
                let confirmed = self.pending.remove(&resource.brl);
                if confirmed {
                    // Store confirmation of our own publish. Keep the local
                    // record's derived relay state, take the server stamp.
                    if let Some(known) = self.resources.get(&resource.brl) {
                        resource.relay = known.relay.clone();
                        resource.kind = ResourceKind::Local;
                    }
                }
                self.cached.remove(&resource.brl);
                let kind = self.upsert(resource.clone());
                events.push(ResourceEvent::new(kind, resource));
            }
        }
        for event in &events {
            self.dispatch(event);
        }
        events
    }

    /// An inbound remote record that is a relay created by this instance,
    /// or whose relay path already passes through this instance. Applying
    /// it would re-ingest state we originated.
    fn is_relay_echo(&self, resource: &Resource) -> bool {
        let Some(relay) = &resource.relay else {
            return false;
        };
        if relay.parent.as_deref() == Some(self.account()) {
            return true;
        }
        relay.paths.keys().any(|brl| {
            brl.host == self.config.host && brl.application == self.config.application
        })
    }

    // ---- observers ------------------------------------------------------

    /// Register a named observer. Re-registering a live name is a conflict.
    pub fn observe(&mut self, name: &str, callback: ObserverFn) -> Result<(), RelayError> {
        if self.observers.iter().any(|(n, _)| n == name) {
            return Err(RelayError::Conflict(format!(
                "observer '{name}' is already registered"
            )));
        }
        self.observers.push((name.to_string(), callback));
        Ok(())
    }

    pub fn remove_observer(&mut self, name: &str) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(n, _)| n != name);
        self.observers.len() != before
    }

    /// Stream every dispatched event over a channel. Closed receivers are
    /// pruned on the next dispatch.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ResourceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub(crate) fn dispatch(&mut self, event: &ResourceEvent) {
        for (name, callback) in &self.observers {
            if let Err(err) = callback(event) {
                tracing::warn!("[dispatch] observer '{}' failed on {}: {}", name, event, err);
            }
        }
        self.subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    // ---- local publication surface --------------------------------------

    /// Publish a new local resource. The Brl must be unseen; a tag, when
    /// given, must not name another live local resource. Validation happens
    /// before any index write, so a failed publish leaves no partial state.
    pub fn publish(&mut self, params: PublishParams) -> Result<&Resource, RelayError> {
        let id = params.id.unwrap_or_else(Resource::generate_id);
        let brl = self.resource_brl(&id)?;
        if self.resources.contains_key(&brl) {
            return Err(RelayError::Conflict(format!(
                "resource '{id}' already exists"
            )));
        }
        if let Some(tag) = &params.tag {
            check_tag(tag)?;
            if let Some(existing) = self.tags.get(tag) {
                if self.resources.contains_key(existing) {
                    return Err(RelayError::Conflict(format!(
                        "tag '{tag}' already names {existing}"
                    )));
                }
            }
        }

        let resource = Resource {
            brl: brl.clone(),
            id: id.clone(),
            application: self.config.application.clone(),
            parent: Some(self.config.account.clone()),
            value: params.value,
            tag: params.tag.clone(),
            action: params.action.unwrap_or_else(|| "get".to_string()),
            meta: params.meta,
            kind: ResourceKind::Local,
            relay: None,
            timestamp: None,
        };
        let kind = self.upsert(resource.clone());
        if let Some(tag) = params.tag {
            self.tags.insert(tag, brl.clone());
        }
        self.local.insert(id, brl.clone());
        self.pending.insert(brl.clone());

        let event = ResourceEvent::new(kind, resource);
        self.dispatch(&event);
        Ok(&self.resources[&brl])
    }

    /// Publish under a tag, updating the existing tagged resource in place
    /// when one is live.
    pub fn publish_tagged(
        &mut self,
        tag: &str,
        params: PublishParams,
    ) -> Result<&Resource, RelayError> {
        check_tag(tag)?;
        if let Some(existing) = self.tags.get(tag).cloned() {
            if self.resources.contains_key(&existing) {
                let mut updated = self.resources[&existing].clone();
                if params.value.is_some() {
                    updated.value = params.value;
                    updated.relay = None;
                }
                if let Some(action) = params.action {
                    updated.action = action;
                }
                for (key, val) in params.meta {
                    updated.meta.insert(key, val);
                }
                let kind = self.upsert(updated.clone());
                self.pending.insert(existing.clone());
                let event = ResourceEvent::new(kind, updated);
                self.dispatch(&event);
                return Ok(&self.resources[&existing]);
            }
        }
        self.publish(PublishParams {
            tag: Some(tag.to_string()),
            ..params
        })
    }

    /// Remove a local publication by id.
    pub fn remove_local(&mut self, id: &str) -> Result<Resource, RelayError> {
        let brl = self
            .local
            .get(id)
            .cloned()
            .ok_or_else(|| RelayError::NotFound(format!("no local resource '{id}'")))?;
        let removed = self
            .remove(&brl)
            .ok_or_else(|| RelayError::StaleState(format!("local index points at dead {brl}")))?;
        let event = ResourceEvent::new(ChangeKind::Removed, removed.clone());
        self.dispatch(&event);
        Ok(removed)
    }

    /// Replace a local resource's value.
    pub fn set_value(&mut self, id: &str, value: Option<String>) -> Result<(), RelayError> {
        let brl = self
            .local
            .get(id)
            .cloned()
            .ok_or_else(|| RelayError::NotFound(format!("no local resource '{id}'")))?;
        let mut updated = self.resources[&brl].clone();
        updated.value = value;
        updated.relay = None;
        let kind = self.upsert(updated.clone());
        self.pending.insert(brl);
        let event = ResourceEvent::new(kind, updated);
        self.dispatch(&event);
        Ok(())
    }

    /// Merge keys into a local resource's meta.
    pub fn set_meta(&mut self, id: &str, meta: Meta) -> Result<(), RelayError> {
        let brl = self
            .local
            .get(id)
            .cloned()
            .ok_or_else(|| RelayError::NotFound(format!("no local resource '{id}'")))?;
        let mut updated = self.resources[&brl].clone();
        for (key, val) in meta {
            updated.meta.insert(key, val);
        }
        let kind = self.upsert(updated.clone());
        self.pending.insert(brl);
        let event = ResourceEvent::new(kind, updated);
        self.dispatch(&event);
        Ok(())
    }

    // ---- registries and on-demand inclusion ------------------------------

    pub fn register_application(&mut self, application: Application) {
        self.applications
            .insert(application.id.clone(), application);
    }

    pub fn register_connection(&mut self, connection: Connection) {
        self.connections.insert(connection.id.clone(), connection);
    }

    /// Pull a record or application from the store on demand.
    ///
    /// Resource Brls fetch and cache the record. Application Brls register
    /// the application descriptor and materialize its tagged default
    /// resources as static records.
    pub async fn include<S: ResourceStore>(
        &mut self,
        brl: &Brl,
        store: &S,
    ) -> Result<(), RelayError> {
        match brl.kind {
            crate::brl::BrlKind::Resource => {
                let fetched = store
                    .get(brl)
                    .await?
                    .ok_or_else(|| RelayError::NotFound(format!("{brl}")))?;
                self.upsert_cached(fetched);
                Ok(())
            }
            crate::brl::BrlKind::Application => {
                let application = store
                    .get_application(&brl.application)
                    .await?
                    .ok_or_else(|| RelayError::NotFound(format!("{brl}")))?;
                for (tag, id) in &application.resources {
                    let res_brl = Brl::resource(&brl.host, &application.id, id)?;
                    match store.get(&res_brl).await? {
                        Some(mut fetched) => {
                            fetched.kind = ResourceKind::Static;
                            fetched.tag = Some(tag.clone());
                            self.upsert_cached(fetched);
                        }
                        None => {
                            tracing::warn!(
                                "[include] application '{}' advertises '{}' -> '{}' but the \
                                 store has no such record",
                                application.id,
                                tag,
                                id
                            );
                        }
                    }
                }
                self.register_application(application);
                Ok(())
            }
            crate::brl::BrlKind::Account => Err(RelayError::InvalidArgument(format!(
                "cannot include an account: {brl}"
            ))),
        }
    }
}

impl std::fmt::Display for ResourceGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ResourceGraph({} resources, {} applications)",
            self.resources.len(),
            self.by_application.len()
        )
    }
}

impl std::fmt::Debug for ResourceGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGraph")
            .field("config", &self.config)
            .field("resources", &self.resources.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    const HOST: &str = "https://graph.test";

    fn graph() -> ResourceGraph {
        ResourceGraph::new(GraphConfig::new(HOST, "app1", "acct-1")).unwrap()
    }

    fn remote(application: &str, id: &str, value: &str) -> Resource {
        let mut res = Resource::new(HOST, application, id).unwrap();
        res.value = Some(value.to_string());
        res
    }

    #[test]
    fn upsert_maintains_application_and_value_indexes() {
        let mut graph = graph();
        assert_eq!(graph.upsert(remote("app2", "r1", "x")), ChangeKind::Added);
        assert_eq!(graph.upsert(remote("app2", "r1", "y")), ChangeKind::Changed);

        assert_eq!(graph.by_application("app2").count(), 1);
        assert!(graph.by_value("x").is_none(), "old value entry must purge");
        assert!(graph.by_value("y").unwrap().len() == 1);
    }

    #[test]
    fn remove_purges_every_derived_entry() {
        let mut graph = graph();
        let res = remote("app2", "r1", "x");
        let brl = res.brl.clone();
        graph.upsert(res);
        assert!(graph.remove(&brl).is_some());

        assert!(graph.get(&brl).is_none());
        assert_eq!(graph.by_application("app2").count(), 0);
        assert!(graph.by_value("x").is_none());
        assert!(graph.remove(&brl).is_none());
    }

    #[test]
    fn publish_assigns_identity_and_tracks_pending() {
        let mut graph = graph();
        let brl = graph
            .publish(PublishParams::with_value("x"))
            .unwrap()
            .brl
            .clone();
        assert_eq!(brl.application, "app1");
        assert!(graph.is_pending(&brl));

        let mut confirmed = graph.get(&brl).cloned().unwrap();
        confirmed.timestamp = Some(1_700_000_000);
        graph.apply(Change::changed(confirmed));
        assert!(!graph.is_pending(&brl), "store echo must clear pending");
        assert_eq!(graph.get(&brl).unwrap().kind, ResourceKind::Local);
    }

    #[test]
    fn duplicate_tag_publish_conflicts_without_partial_writes() {
        let mut graph = graph();
        graph
            .publish(PublishParams {
                id: Some("first".to_string()),
                tag: Some("default".to_string()),
                ..Default::default()
            })
            .unwrap();
        let before = graph.len();

        let err = graph
            .publish(PublishParams {
                id: Some("second".to_string()),
                tag: Some("default".to_string()),
                value: Some("x".to_string()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, RelayError::Conflict(_)));
        assert_eq!(graph.len(), before, "failed publish must not add state");
        assert!(graph.by_value("x").is_none());
        assert_eq!(graph.tagged("default").unwrap().id, "first");
    }

    #[test]
    fn publish_tagged_updates_in_place() {
        let mut graph = graph();
        let first = graph
            .publish_tagged("default", PublishParams::with_value("x"))
            .unwrap()
            .brl
            .clone();
        let second = graph
            .publish_tagged("default", PublishParams::with_value("y"))
            .unwrap()
            .brl
            .clone();
        assert_eq!(first, second, "tagged publish must upsert, not duplicate");
        assert_eq!(graph.tagged("default").unwrap().value.as_deref(), Some("y"));
        assert!(graph.by_value("x").is_none());
    }

    #[test]
    fn illegal_tag_is_rejected() {
        let mut graph = graph();
        let err = graph
            .publish(PublishParams::with_tag("bad/tag"))
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidArgument(_)));
        assert!(graph.is_empty());
    }

    #[test]
    fn observers_run_after_index_updates_and_errors_are_isolated() {
        let mut graph = graph();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_by_second = seen.clone();
        graph
            .observe(
                "failing",
                Box::new(|_event| Err(RelayError::Custom("observer bug".to_string()))),
            )
            .unwrap();
        graph
            .observe(
                "counting",
                Box::new(move |_event| {
                    seen_by_second.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();
        assert!(matches!(
            graph.observe("counting", Box::new(|_| Ok(()))),
            Err(RelayError::Conflict(_))
        ));

        graph.apply(Change::added(remote("app2", "r1", "x")));
        assert_eq!(
            seen.load(Ordering::SeqCst),
            1,
            "a failing observer must not block later observers"
        );

        assert!(graph.remove_observer("failing"));
        assert!(!graph.remove_observer("failing"));
    }

    #[tokio::test]
    async fn subscribers_stream_dispatched_events() {
        let mut graph = graph();
        let mut rx = graph.subscribe();

        graph.apply(Change::added(remote("app2", "r1", "x")));
        graph.apply(Change::removed(remote("app2", "r1", "x")));

        assert_eq!(rx.recv().await.unwrap().kind, ChangeKind::Added);
        assert_eq!(rx.recv().await.unwrap().kind, ChangeKind::Removed);

        // a dropped receiver is pruned on the next dispatch
        drop(rx);
        graph.apply(Change::added(remote("app2", "r2", "y")));
    }

    #[test]
    fn remove_local_round_trips() {
        let mut graph = graph();
        graph
            .publish(PublishParams {
                id: Some("mine".to_string()),
                value: Some("x".to_string()),
                ..Default::default()
            })
            .unwrap();
        let removed = graph.remove_local("mine").unwrap();
        assert_eq!(removed.id, "mine");
        assert!(matches!(
            graph.remove_local("mine"),
            Err(RelayError::NotFound(_))
        ));
        assert!(graph.by_value("x").is_none());
    }

    #[test]
    fn connections_register_and_link_to_published_parents() {
        let mut graph = graph();
        graph.register_connection(Connection {
            id: "acct-2".to_string(),
            application: "app2".to_string(),
            meta: Meta::new(),
            active: true,
        });

        let mut res = remote("app2", "r1", "x");
        res.parent = Some("acct-2".to_string());
        graph.apply(Change::added(res));

        let peer = graph.by_application("app2").next().unwrap();
        let conn = graph.connection(peer.parent.as_deref().unwrap()).unwrap();
        assert!(conn.active);
        assert_eq!(conn.application, "app2");
    }

    #[tokio::test]
    async fn include_materializes_application_defaults() {
        use crate::store::MemoryStore;

        let mut graph = graph();
        let store = MemoryStore::new();
        store.insert_application(Application {
            id: "app2".to_string(),
            meta: Meta::new(),
            resources: BTreeMap::from([("default".to_string(), "r1".to_string())]),
        });
        store.insert(remote("app2", "r1", "x"));

        let app_brl = Brl::application(HOST, "app2").unwrap();
        graph.include(&app_brl, &store).await.unwrap();

        assert!(graph.application("app2").is_some());
        let res = graph.by_application("app2").next().unwrap();
        assert_eq!(res.kind, ResourceKind::Static);
        assert_eq!(res.tag.as_deref(), Some("default"));
        assert!(graph.is_cached(&res.brl));
    }
}
