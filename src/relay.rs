//! Relay resolution: turning a resource whose value names another resource
//! into a registered, flattened indirection.
//!
//! The relay index pair is the one piece of state shared with in-flight
//! resolutions, so it sits behind a single `RwLock`; the conflict check and
//! the registration happen under one write guard.

use std::collections::BTreeMap;

use crate::{
    brl::Brl,
    event::{ChangeKind, ResourceEvent},
    properties::{Meta, PublishParams, ResolvedRelay, Resource},
    store::ResourceStore,
    RelayError, ResourceGraph,
};

/// The guarded relay index pair.
#[derive(Debug, Default)]
pub struct RelayIndex {
    /// Effective target -> the one local resource relaying it.
    pub(crate) local: BTreeMap<Brl, Brl>,
    /// Effective target -> every live relaying resource -> its meta.
    /// Invariant: `remote[t][r]` exists iff `r` is live and `r.relay.brl == t`.
    pub(crate) remote: BTreeMap<Brl, BTreeMap<Brl, Meta>>,
}

impl ResourceGraph {
    /// Maintain the reverse relay index across an upsert. Called before the
    /// canonical map is replaced.
    pub(crate) fn index_relay(&self, prior: Option<&Resource>, next: &Resource) {
        let prior_target = prior.and_then(|p| p.relay.as_ref()).map(|r| &r.brl);
        let next_target = next.relay.as_ref().map(|r| &r.brl);
        if prior_target.is_none() && next_target.is_none() {
            return;
        }
        let mut idx = self.relays.write();
        if let Some(old) = prior_target {
            if Some(old) != next_target {
                if let Some(relayers) = idx.remote.get_mut(old) {
                    relayers.remove(&next.brl);
                    if relayers.is_empty() {
                        idx.remote.remove(old);
                    }
                }
                // The resource stopped relaying `old`; a stale local entry
                // would block the target from ever being relayed again.
                if idx.local.get(old) == Some(&next.brl) {
                    idx.local.remove(old);
                }
            }
        }
        if let Some(target) = next_target {
            idx.remote
                .entry(target.clone())
                .or_default()
                .insert(next.brl.clone(), next.meta.clone());
        }
    }

    /// Drop a removed resource from both relay maps.
    pub(crate) fn purge_relay(&self, removed: &Resource) {
        let Some(relay) = &removed.relay else {
            return;
        };
        let mut idx = self.relays.write();
        if let Some(relayers) = idx.remote.get_mut(&relay.brl) {
            relayers.remove(&removed.brl);
            if relayers.is_empty() {
                idx.remote.remove(&relay.brl);
            }
        }
        if idx.local.get(&relay.brl) == Some(&removed.brl) {
            idx.local.remove(&relay.brl);
        }
    }

    /// Everything currently relaying `target`, with the meta each relayer
    /// registered.
    pub fn relayers(&self, target: &Brl) -> BTreeMap<Brl, Meta> {
        self.relays
            .read()
            .remote
            .get(target)
            .cloned()
            .unwrap_or_default()
    }

    /// Resolve the resource at `brl` as a relay.
    ///
    /// `Ok(None)` means the resource's value is not an indirection, or the
    /// resource disappeared while the target fetch was in flight (the
    /// resolution is dropped without registering anything). A target the
    /// store cannot produce is `NotFound`; a second live local relay for
    /// the same effective target is `Conflict`, with no state changed.
    pub async fn resolve_relay<S: ResourceStore>(
        &mut self,
        store: &S,
        brl: &Brl,
    ) -> Result<Option<ResolvedRelay>, RelayError> {
        let resource = self
            .get(brl)
            .cloned()
            .ok_or_else(|| RelayError::NotFound(format!("{brl}")))?;
        let Some(value) = resource.value.as_deref() else {
            return Ok(None);
        };
        let Some(target_brl) = Brl::parse_value(value) else {
            return Ok(None);
        };
        if !target_brl.is_relayable() {
            return Ok(None);
        }
        if target_brl == resource.brl {
            return Err(RelayError::InvalidArgument(format!(
                "{brl} cannot relay itself"
            )));
        }

        if self.get(&target_brl).is_none() {
            let fetched = store.get(&target_brl).await?;
            // The relaying resource may have been removed while the fetch
            // was in flight. Drop the resolution without registering.
            if self.get(brl).is_none() {
                tracing::debug!("[resolve_relay] {} removed mid-fetch, dropping", brl);
                return Ok(None);
            }
            match fetched {
                Some(record) => {
                    self.upsert_cached(record);
                }
                None => {
                    return Err(RelayError::NotFound(format!(
                        "relay target {target_brl} of {brl}"
                    )))
                }
            }
        }
        let target = self.resources[&target_brl].clone();

        let mut resolved = match &target.relay {
            // The target is itself a relay: adopt its flattened resolution.
            // Depth never exceeds one extra hop because every stored relay
            // is already flattened.
            Some(chained) => ResolvedRelay {
                target_id: chained.target_id.clone(),
                target_application: chained.target_application.clone(),
                brl: chained.brl.clone(),
                parent: Some(self.account().to_string()),
                value: chained.value.clone(),
                paths: chained.paths.clone(),
            },
            None => ResolvedRelay {
                target_id: target.id.clone(),
                target_application: target.application.clone(),
                brl: target_brl.clone(),
                parent: Some(self.account().to_string()),
                value: target.value.clone(),
                paths: BTreeMap::new(),
            },
        };
        for (relayer, meta) in self.relayers(&resolved.brl) {
            resolved.paths.entry(relayer).or_insert(meta);
        }
        resolved.paths.remove(brl);

        {
            let mut idx = self.relays.write();
            if let Some(existing) = idx.local.get(&resolved.brl) {
                if existing != brl && self.resources.contains_key(existing) {
                    return Err(RelayError::Conflict(format!(
                        "{} is already relayed locally by {existing}",
                        resolved.brl
                    )));
                }
            }
            idx.local.insert(resolved.brl.clone(), brl.clone());
            idx.remote
                .entry(resolved.brl.clone())
                .or_default()
                .insert(brl.clone(), resource.meta.clone());
        }

        let mut updated = resource;
        updated.relay = Some(resolved.clone());
        let kind = self.upsert(updated.clone());
        let event = ResourceEvent::new(kind, updated);
        self.dispatch(&event);
        Ok(Some(resolved))
    }

    /// Publish a local resource whose value is `target` and resolve it as a
    /// relay. A failed resolution unwinds the publication.
    pub async fn create_relay<S: ResourceStore>(
        &mut self,
        store: &S,
        target: &Brl,
        meta: Meta,
    ) -> Result<Resource, RelayError> {
        if !target.is_relayable() {
            return Err(RelayError::InvalidArgument(format!(
                "cannot relay {target}"
            )));
        }
        {
            let idx = self.relays.read();
            if let Some(existing) = idx.local.get(target) {
                if self.resources.contains_key(existing) {
                    return Err(RelayError::Conflict(format!(
                        "{target} is already relayed locally by {existing}"
                    )));
                }
            }
        }
        let brl = self
            .publish(PublishParams {
                value: Some(target.to_string()),
                meta,
                ..Default::default()
            })?
            .brl
            .clone();
        match self.resolve_relay(store, &brl).await {
            Ok(_) => Ok(self.resources[&brl].clone()),
            Err(err) => {
                // The publish above already dispatched `Added`; observers
                // need the matching removal when the resolution unwinds.
                if let Some(removed) = self.remove(&brl) {
                    let event = ResourceEvent::new(ChangeKind::Removed, removed);
                    self.dispatch(&event);
                }
                Err(err)
            }
        }
    }

    /// Every other live resource standing for the same effective value,
    /// excluding entries from the resource's own application and the
    /// resource itself. `None` when the resource is unknown or carries no
    /// value.
    pub fn paths(&self, brl: &Brl) -> Option<Vec<&Resource>> {
        let resource = self.get(brl)?;
        let value = resource.effective_value()?;
        let holders = self.values.get(value)?;
        Some(
            holders
                .keys()
                .filter(|holder| *holder != brl && holder.application != resource.application)
                .filter_map(|holder| self.get(holder))
                .collect(),
        )
    }
}
