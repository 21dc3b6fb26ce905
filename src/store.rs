//! The external record store seam.
//!
//! The graph never talks to the network directly: everything durable sits
//! behind [ResourceStore], an async fetch interface the relay resolver and
//! `include` use to pull records the change feed has not delivered yet.
//! [MemoryStore] is the in-process implementation used by tests.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::{
    brl::Brl,
    properties::{Application, Resource},
    RelayError,
};

pub trait ResourceStore: Sync {
    /// Fetch a single record by Brl. `Ok(None)` means the store has no such
    /// record; transport failures are `Err`.
    fn get(
        &self,
        brl: &Brl,
    ) -> impl std::future::Future<Output = Result<Option<Resource>, RelayError>> + Send;

    /// Fetch an application descriptor by id.
    ///
    /// Default implementation returns empty (a store without an application
    /// registry).
    fn get_application(
        &self,
        _application: &str,
    ) -> impl std::future::Future<Output = Result<Option<Application>, RelayError>> + Send {
        async { Ok(None) }
    }
}

/// In-memory [ResourceStore]. Doubles as the change-feed producer in tests:
/// insert records here, then feed the corresponding [crate::event::Change]s
/// to the graph.
#[derive(Default)]
pub struct MemoryStore {
    resources: RwLock<BTreeMap<Brl, Resource>>,
    applications: RwLock<BTreeMap<String, Application>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn insert(&self, resource: Resource) {
        self.resources
            .write()
            .insert(resource.brl.clone(), resource);
    }

    pub fn insert_application(&self, application: Application) {
        self.applications
            .write()
            .insert(application.id.clone(), application);
    }

    pub fn remove(&self, brl: &Brl) -> Option<Resource> {
        self.resources.write().remove(brl)
    }
}

impl ResourceStore for MemoryStore {
    fn get(
        &self,
        brl: &Brl,
    ) -> impl std::future::Future<Output = Result<Option<Resource>, RelayError>> + Send {
        let found = self.resources.read().get(brl).cloned();
        async move { Ok(found) }
    }

    fn get_application(
        &self,
        application: &str,
    ) -> impl std::future::Future<Output = Result<Option<Application>, RelayError>> + Send {
        let found = self.applications.read().get(application).cloned();
        async move { Ok(found) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trips_records() {
        let store = MemoryStore::new();
        let res = Resource::new("https://graph.test", "app1", "r1").unwrap();
        let brl = res.brl.clone();
        store.insert(res.clone());

        assert_eq!(store.get(&brl).await.unwrap(), Some(res));
        assert_eq!(
            store
                .get(&Brl::resource("https://graph.test", "app1", "nope").unwrap())
                .await
                .unwrap(),
            None
        );

        store.remove(&brl);
        assert_eq!(store.get(&brl).await.unwrap(), None);
    }
}
