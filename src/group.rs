//! Ordered, ranked partitions of query results.
//!
//! A [Group] is an ordered collection of resources with an explicit position
//! index; a [GroupSet] partitions a query's results into named groups via a
//! key function (one resource may belong to zero, one, or many groups).

use std::{cmp::Ordering, collections::BTreeMap, sync::Arc};

use crate::{
    brl::Brl,
    graph::ResourceGraph,
    properties::{Meta, Resource},
};

/// Scores a resource for ordered insertion. Negative scores drop the member
/// from the group on [Group::search].
pub type RankFn = Arc<dyn Fn(&Resource) -> f64 + Send + Sync>;

/// Comparator for [Group::sort].
pub type SortFn = Arc<dyn Fn(&Resource, &Resource) -> Ordering + Send + Sync>;

/// Maps a resource to the names of the groups it belongs to.
pub type KeyFn = Arc<dyn Fn(&Resource, &ResourceGraph) -> Vec<String> + Send + Sync>;

/// Produces descriptive metadata for a newly created group.
pub type MetaFn = Arc<dyn Fn(&str, &ResourceGraph) -> Meta + Send + Sync>;

/// An ordered collection of resources.
///
/// Ordering is determined at insertion: by explicit or computed rank
/// (descending, ties keep insertion order), else by the stored comparator,
/// else by append. Members without a rank order below every ranked member.
#[derive(Default)]
pub struct Group {
    pub meta: Meta,
    resources: Vec<Resource>,
    positions: BTreeMap<Brl, usize>,
    ranks: BTreeMap<Brl, f64>,
    rank_fn: Option<RankFn>,
    sort_fn: Option<SortFn>,
}

impl Group {
    pub fn new(rank_fn: Option<RankFn>, sort_fn: Option<SortFn>) -> Group {
        Group {
            rank_fn,
            sort_fn,
            ..Default::default()
        }
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn first(&self) -> Option<&Resource> {
        self.resources.first()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn contains(&self, brl: &Brl) -> bool {
        self.positions.contains_key(brl)
    }

    pub fn get(&self, brl: &Brl) -> Option<&Resource> {
        self.positions.get(brl).map(|idx| &self.resources[*idx])
    }

    fn rank_at(&self, idx: usize) -> f64 {
        self.ranks
            .get(&self.resources[idx].brl)
            .copied()
            .unwrap_or(f64::NEG_INFINITY)
    }

    /// Insert a resource at its ordered position. Idempotent: adding an
    /// already-present Brl changes nothing and returns `false`.
    pub fn add(&mut self, resource: Resource, rank: Option<f64>) -> bool {
        if self.positions.contains_key(&resource.brl) {
            return false;
        }
        let rank = rank.or_else(|| self.rank_fn.as_ref().map(|f| f(&resource)));
        let at = if let Some(rank) = rank {
            // Descending by rank; after all equal-ranked members so ties
            // keep insertion order.
            let mut at = self.resources.len();
            for idx in 0..self.resources.len() {
                if self.rank_at(idx) < rank {
                    at = idx;
                    break;
                }
            }
            at
        } else if let Some(cmp) = self.sort_fn.clone() {
            let mut at = self.resources.len();
            for idx in 0..self.resources.len() {
                if cmp(&self.resources[idx], &resource) == Ordering::Greater {
                    at = idx;
                    break;
                }
            }
            at
        } else {
            self.resources.len()
        };
        if let Some(rank) = rank {
            self.ranks.insert(resource.brl.clone(), rank);
        }
        self.resources.insert(at, resource);
        self.reindex(at);
        true
    }

    /// Remove a member, returning it. Positions after the removal point are
    /// recomputed.
    pub fn remove(&mut self, brl: &Brl) -> Option<Resource> {
        let at = self.positions.remove(brl)?;
        self.ranks.remove(brl);
        let removed = self.resources.remove(at);
        self.reindex(at);
        Some(removed)
    }

    /// Replace a member's state (and optionally its rank), preserving the
    /// ordering rules. Inserts when absent.
    pub fn update(&mut self, resource: Resource, rank: Option<f64>) {
        let prior_rank = self.ranks.get(&resource.brl).copied();
        self.remove(&resource.brl);
        self.add(resource, rank.or(prior_rank));
    }

    /// Re-score every member, drop those scoring negative, and re-sort
    /// descending (stable). `None` reapplies the stored rank function.
    pub fn search(&mut self, rank_fn: Option<RankFn>) {
        if let Some(rank_fn) = rank_fn {
            self.rank_fn = Some(rank_fn);
        }
        let Some(rank_fn) = self.rank_fn.clone() else {
            return;
        };
        let members = std::mem::take(&mut self.resources);
        self.positions.clear();
        self.ranks.clear();
        let mut scored: Vec<(f64, Resource)> = members
            .into_iter()
            .filter_map(|res| {
                let rank = rank_fn(&res);
                (rank >= 0.0).then_some((rank, res))
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
        for (rank, res) in scored {
            self.ranks.insert(res.brl.clone(), rank);
            self.resources.push(res);
        }
        self.reindex(0);
    }

    /// Re-sort with a comparator and keep it for subsequent insertions.
    pub fn sort(&mut self, sort_fn: SortFn) {
        self.resources.sort_by(|a, b| sort_fn(a, b));
        self.sort_fn = Some(sort_fn);
        self.reindex(0);
    }

    fn reindex(&mut self, from: usize) {
        for (idx, res) in self.resources.iter().enumerate().skip(from) {
            self.positions.insert(res.brl.clone(), idx);
        }
    }
}

/// A named partition of resources into [Group]s.
pub struct GroupSet {
    pub name: String,
    key_fn: KeyFn,
    meta_fn: Option<MetaFn>,
    rank_fn: Option<RankFn>,
    sort_fn: Option<SortFn>,
    groups: BTreeMap<String, Group>,
    /// Brl -> group names the resource currently belongs to.
    membership: BTreeMap<Brl, Vec<String>>,
}

impl GroupSet {
    pub fn new(name: impl Into<String>, key_fn: KeyFn) -> GroupSet {
        GroupSet {
            name: name.into(),
            key_fn,
            meta_fn: None,
            rank_fn: None,
            sort_fn: None,
            groups: BTreeMap::new(),
            membership: BTreeMap::new(),
        }
    }

    pub fn with_meta_fn(mut self, meta_fn: MetaFn) -> GroupSet {
        self.meta_fn = Some(meta_fn);
        self
    }

    pub fn with_rank_fn(mut self, rank_fn: RankFn) -> GroupSet {
        self.rank_fn = Some(rank_fn);
        self
    }

    pub fn with_sort_fn(mut self, sort_fn: SortFn) -> GroupSet {
        self.sort_fn = Some(sort_fn);
        self
    }

    pub fn groups(&self) -> impl Iterator<Item = (&String, &Group)> {
        self.groups.iter()
    }

    pub fn group(&self, key: &str) -> Option<&Group> {
        self.groups.get(key)
    }

    pub fn clear(&mut self) {
        self.groups.clear();
        self.membership.clear();
    }

    /// Place (or re-place) a resource into the groups its keys name,
    /// removing it from groups it no longer keys into. Empty groups are
    /// pruned.
    pub fn upsert(&mut self, resource: &Resource, graph: &ResourceGraph) {
        let keys = (self.key_fn)(resource, graph);
        let prior = self.membership.remove(&resource.brl).unwrap_or_default();
        for stale in prior.iter().filter(|name| !keys.contains(*name)) {
            self.remove_from(stale, &resource.brl);
        }
        for key in &keys {
            let group = match self.groups.entry(key.clone()) {
                std::collections::btree_map::Entry::Occupied(e) => e.into_mut(),
                std::collections::btree_map::Entry::Vacant(e) => {
                    let mut group = Group::new(self.rank_fn.clone(), self.sort_fn.clone());
                    if let Some(meta_fn) = &self.meta_fn {
                        group.meta = meta_fn(key, graph);
                    }
                    e.insert(group)
                }
            };
            group.update(resource.clone(), None);
        }
        if !keys.is_empty() {
            self.membership.insert(resource.brl.clone(), keys);
        }
    }

    /// Drop a resource from every group it belongs to.
    pub fn remove(&mut self, brl: &Brl) {
        let Some(keys) = self.membership.remove(brl) else {
            return;
        };
        for key in keys {
            self.remove_from(&key, brl);
        }
    }

    fn remove_from(&mut self, key: &str, brl: &Brl) {
        if let Some(group) = self.groups.get_mut(key) {
            group.remove(brl);
            if group.is_empty() {
                self.groups.remove(key);
            }
        }
    }
}
