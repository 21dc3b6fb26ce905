//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use relaygraph::{
    config::GraphConfig,
    event::Change,
    properties::Resource,
    ResourceGraph,
};

pub const HOST: &str = "https://graph.test";

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times — subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// A graph instance identifying as `application` under a same-named account.
#[allow(dead_code)]
pub fn graph_for(application: &str) -> ResourceGraph {
    ResourceGraph::new(GraphConfig::new(
        HOST,
        application,
        format!("acct-{application}"),
    ))
    .unwrap()
}

/// A remote resource carrying a literal value.
#[allow(dead_code)]
pub fn remote(application: &str, id: &str, value: &str) -> Resource {
    let mut res = Resource::new(HOST, application, id).unwrap();
    res.value = Some(value.to_string());
    res
}

/// Apply a change to the graph and return it in feed form, the way a store
/// subscriber would hand deltas to its queries.
#[allow(dead_code)]
pub fn feed(graph: &mut ResourceGraph, change: Change) -> Vec<Change> {
    graph.apply(change.clone());
    vec![change]
}
