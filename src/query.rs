//! Live queries over the resource graph.
//!
//! A [Query] is a persistent filtered view: populated once by a full scan,
//! then maintained incrementally from the change feed. Applying the deltas
//! always yields the same membership a fresh rescan of the final graph
//! would.

use std::{collections::BTreeMap, sync::Arc};

use serde_json::Value;

use crate::{
    brl::Brl,
    event::{Change, ChangeKind, ResourceEvent},
    graph::ResourceGraph,
    group::{Group, GroupSet, KeyFn, MetaFn, RankFn, SortFn},
    properties::{Resource, ResourceKind},
    RelayError,
};

/// Built-in group set partitioning results by owning application (plus the
/// applications reachable through a relay's paths).
pub const GROUP_APPLICATIONS: &str = "applications";

/// Built-in group set partitioning results by effective value.
pub const GROUP_VALUES: &str = "values";

/// The filtering capability a query is built around. Implementations decide
/// membership per record; the engine treats the language as opaque.
pub trait Predicate {
    fn test(&self, resource: &Resource) -> Result<bool, RelayError>;
}

impl<F> Predicate for F
where
    F: Fn(&Resource) -> bool + Send + Sync,
{
    fn test(&self, resource: &Resource) -> Result<bool, RelayError> {
        Ok(self(resource))
    }
}

/// Structural matcher: dotted field paths matched for equality against the
/// record's serialized form. An empty matcher matches every record.
#[derive(Debug, Clone, Default)]
pub struct FieldMatch {
    fields: BTreeMap<String, Value>,
}

impl FieldMatch {
    pub fn new() -> FieldMatch {
        FieldMatch::default()
    }

    pub fn field(mut self, path: impl Into<String>, expected: impl Into<Value>) -> FieldMatch {
        self.fields.insert(path.into(), expected.into());
        self
    }
}

fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

impl Predicate for FieldMatch {
    fn test(&self, resource: &Resource) -> Result<bool, RelayError> {
        if self.fields.is_empty() {
            return Ok(true);
        }
        let serialized = serde_json::to_value(resource)?;
        Ok(self
            .fields
            .iter()
            .all(|(path, expected)| lookup(&serialized, path) == Some(expected)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryState {
    /// No scan has run yet; the view is empty and meaningless.
    #[default]
    Uninitialized,
    /// The first full scan completed.
    Populated,
    /// At least one delta refresh has been applied since population.
    Updated,
}

pub struct QueryOptions {
    /// Include applications' static default resources.
    pub include_default: bool,
    /// Include local publications the store has not yet confirmed.
    pub include_local: bool,
    /// Include records pulled from the store on demand.
    pub include_cache: bool,
    pub rank_fn: Option<RankFn>,
    pub sort_fn: Option<SortFn>,
}

impl Default for QueryOptions {
    fn default() -> QueryOptions {
        QueryOptions {
            include_default: true,
            include_local: false,
            include_cache: true,
            rank_fn: None,
            sort_fn: None,
        }
    }
}

/// Change listener. Runs synchronously, in registration order, for every
/// delta whose record matched the query before or after the change.
pub type ListenerFn = Box<dyn Fn(&ResourceEvent, &Query) -> Result<(), RelayError> + Send + Sync>;

pub struct Query {
    predicate: Box<dyn Predicate + Send + Sync>,
    options: QueryOptions,
    state: QueryState,
    result: Group,
    sets: BTreeMap<String, GroupSet>,
    listeners: Vec<(String, ListenerFn)>,
}

impl Query {
    pub fn new(
        predicate: impl Predicate + Send + Sync + 'static,
        options: QueryOptions,
    ) -> Query {
        let result = Group::new(options.rank_fn.clone(), options.sort_fn.clone());
        let mut sets = BTreeMap::new();

        let application_keys: KeyFn = Arc::new(|res: &Resource, _graph: &ResourceGraph| {
            let mut keys = vec![res.application.clone()];
            if let Some(relay) = &res.relay {
                keys.push(relay.target_application.clone());
                keys.extend(relay.paths.keys().map(|brl| brl.application.clone()));
            }
            keys.sort();
            keys.dedup();
            keys
        });
        let application_meta: MetaFn = Arc::new(|key: &str, graph: &ResourceGraph| {
            graph
                .application(key)
                .map(|app| app.meta.clone())
                .unwrap_or_default()
        });
        sets.insert(
            GROUP_APPLICATIONS.to_string(),
            GroupSet::new(GROUP_APPLICATIONS, application_keys).with_meta_fn(application_meta),
        );

        let value_keys: KeyFn = Arc::new(|res: &Resource, _graph: &ResourceGraph| {
            res.effective_value()
                .map(|value| vec![value.to_string()])
                .unwrap_or_default()
        });
        sets.insert(
            GROUP_VALUES.to_string(),
            GroupSet::new(GROUP_VALUES, value_keys),
        );

        Query {
            predicate: Box::new(predicate),
            options,
            state: QueryState::Uninitialized,
            result,
            sets,
            listeners: Vec::new(),
        }
    }

    pub fn state(&self) -> QueryState {
        self.state
    }

    /// The live result set, in group order.
    pub fn resources(&self) -> &[Resource] {
        self.result.resources()
    }

    pub fn first(&self) -> Option<&Resource> {
        self.result.first()
    }

    pub fn count(&self) -> usize {
        self.result.len()
    }

    pub fn contains(&self, brl: &Brl) -> bool {
        self.result.contains(brl)
    }

    pub fn group_set(&self, name: &str) -> Option<&GroupSet> {
        self.sets.get(name)
    }

    pub fn group(&self, set: &str, key: &str) -> Option<&Group> {
        self.sets.get(set).and_then(|s| s.group(key))
    }

    /// Register an additional named group set. The view must be refreshed
    /// afterwards to populate it.
    pub fn add_group(&mut self, set: GroupSet) -> Result<(), RelayError> {
        if self.sets.contains_key(&set.name) {
            return Err(RelayError::Conflict(format!(
                "group set '{}' is already registered",
                set.name
            )));
        }
        self.sets.insert(set.name.clone(), set);
        Ok(())
    }

    /// Re-rank the result set, dropping members scoring negative.
    pub fn search(&mut self, rank_fn: Option<RankFn>) {
        self.result.search(rank_fn);
    }

    pub fn sort(&mut self, sort_fn: SortFn) {
        self.result.sort(sort_fn);
    }

    // ---- listeners ------------------------------------------------------

    pub fn listen(&mut self, name: &str, callback: ListenerFn) -> Result<(), RelayError> {
        if self.listeners.iter().any(|(n, _)| n == name) {
            return Err(RelayError::Conflict(format!(
                "listener '{name}' is already registered"
            )));
        }
        self.listeners.push((name.to_string(), callback));
        Ok(())
    }

    pub fn remove_listener(&mut self, name: &str) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(n, _)| n != name);
        self.listeners.len() != before
    }

    fn fire(&mut self, events: &[ResourceEvent]) {
        if self.listeners.is_empty() || events.is_empty() {
            return;
        }
        let listeners = std::mem::take(&mut self.listeners);
        for event in events {
            for (name, callback) in &listeners {
                if let Err(err) = callback(event, self) {
                    tracing::warn!("[fire] listener '{}' failed on {}: {}", name, event, err);
                }
            }
        }
        self.listeners = listeners;
    }

    // ---- refresh --------------------------------------------------------

    /// Bring the view up to date.
    ///
    /// With `None` the graph is fully rescanned. With a change slice only
    /// the named records are re-tested; this is equivalent to a rescan of
    /// the post-change graph. Returns whether membership or member state
    /// changed.
    pub fn refresh(&mut self, graph: &ResourceGraph, changes: Option<&[Change]>) -> bool {
        match changes {
            Some(changes) if self.state != QueryState::Uninitialized => {
                let changed = self.refresh_incremental(graph, changes);
                self.state = QueryState::Updated;
                changed
            }
            _ => {
                let changed = self.refresh_full(graph);
                self.state = match self.state {
                    QueryState::Uninitialized => QueryState::Populated,
                    _ => QueryState::Updated,
                };
                changed
            }
        }
    }

    fn refresh_full(&mut self, graph: &ResourceGraph) -> bool {
        let prior: Vec<Brl> = self
            .result
            .resources()
            .iter()
            .map(|res| res.brl.clone())
            .collect();
        let mut result = Group::new(self.options.rank_fn.clone(), self.options.sort_fn.clone());
        for set in self.sets.values_mut() {
            set.clear();
        }
        for resource in graph.resources() {
            if !self.eligible(resource, graph) || !self.matches(resource) {
                continue;
            }
            result.add(resource.clone(), None);
            for set in self.sets.values_mut() {
                set.upsert(resource, graph);
            }
        }
        let changed = prior
            != result
                .resources()
                .iter()
                .map(|res| res.brl.clone())
                .collect::<Vec<_>>();
        self.result = result;
        changed
    }

    fn refresh_incremental(&mut self, graph: &ResourceGraph, changes: &[Change]) -> bool {
        let mut changed = false;
        let mut events = Vec::new();
        for change in changes {
            let brl = &change.resource.brl;
            let matched_before = self.result.contains(brl);
            let post = match change.kind {
                ChangeKind::Removed => None,
                _ => graph.get(brl),
            };
            let live = post.filter(|res| self.eligible(res, graph) && self.matches(res));
            let matches_now = live.is_some();

            if let Some(resource) = live {
                let prior = self.result.get(brl).cloned();
                self.result.update(resource.clone(), None);
                for set in self.sets.values_mut() {
                    set.upsert(resource, graph);
                }
                changed |= prior.as_ref() != Some(resource);
            } else if matched_before {
                self.result.remove(brl);
                for set in self.sets.values_mut() {
                    set.remove(brl);
                }
                changed = true;
            }

            if matched_before || matches_now {
                let resource = post.cloned().unwrap_or_else(|| change.resource.clone());
                events.push(ResourceEvent::new(change.kind, resource));
            }
        }
        self.fire(&events);
        changed
    }

    fn eligible(&self, resource: &Resource, graph: &ResourceGraph) -> bool {
        if resource.is_relay() {
            return false;
        }
        match resource.kind {
            ResourceKind::Static if !self.options.include_default => return false,
            ResourceKind::Local
                if graph.is_pending(&resource.brl) && !self.options.include_local =>
            {
                return false
            }
            _ => {}
        }
        if graph.is_cached(&resource.brl) && !self.options.include_cache {
            return false;
        }
        true
    }

    fn matches(&self, resource: &Resource) -> bool {
        match self.predicate.test(resource) {
            Ok(matched) => matched,
            Err(err) => {
                tracing::warn!(
                    "[matches] predicate failed on {}, treating as non-matching: {}",
                    resource.brl,
                    err
                );
                false
            }
        }
    }
}
