//! # relaygraph
//!
//! An in-memory shared resource graph with relay indirection, live queries,
//! and incremental grouping.
//!
//! ## Overview
//!
//! Independent application instances publish named, typed records
//! ("resources") into a shared graph, discover each other's records through
//! live queries, and create indirection pointers ("relays") that let a
//! resource in one application stand in for a resource owned by another,
//! chaining across instances. relaygraph is the client-side engine for that
//! model: the canonical record map, the derived indexes, the relay
//! resolution algorithm, and the query/grouping machinery that keeps
//! filtered views current as changes stream in.
//!
//! ### Key Features
//!
//! - **Canonical identifiers**: every record is keyed by a [brl::Brl], a
//!   URL-shaped locator combining host, kind, application, and id
//! - **Relay flattening**: chains of indirections resolve to the original
//!   resource in a single hop, with the intermediate hops preserved as path
//!   metadata
//! - **Live queries**: populate once with a full scan, then stay current by
//!   re-testing only changed records; deltas and rescans always agree
//! - **Incremental grouping**: results partition into named, rank-ordered
//!   groups maintained alongside the query
//! - **Store agnostic**: everything durable sits behind the async
//!   [store::ResourceStore] trait
//!
//! ## Quick Start
//!
//! ```rust
//! use relaygraph::{
//!     config::GraphConfig,
//!     event::Change,
//!     properties::{PublishParams, Resource},
//!     query::{FieldMatch, Query, QueryOptions},
//!     ResourceGraph,
//! };
//!
//! # fn main() -> Result<(), relaygraph::RelayError> {
//! let config = GraphConfig::new("https://graph.example.com", "notes", "acct-1");
//! let mut graph = ResourceGraph::new(config)?;
//!
//! // publish a local resource
//! graph.publish(PublishParams::with_value("hello"))?;
//!
//! // ingest a change from the store feed
//! let mut remote = Resource::new("https://graph.example.com", "pins", "p1")?;
//! remote.value = Some("hello".to_string());
//! let changes = vec![Change::added(remote)];
//! for change in &changes {
//!     graph.apply(change.clone());
//! }
//!
//! // a live view over everything valued "hello"
//! let mut query = Query::new(
//!     FieldMatch::new().field("value", "hello"),
//!     QueryOptions::default(),
//! );
//! query.refresh(&graph, None);
//! assert_eq!(query.count(), 1);
//! query.refresh(&graph, Some(&changes));
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Guide
//!
//! Start with [graph::ResourceGraph] for the record surface, [query::Query]
//! for live views, and [ResourceGraph::resolve_relay] (in [relay]) for
//! indirections. [properties] holds the entity model, [store] the external
//! seam.

pub mod brl;
pub mod config;
pub mod error;
pub mod event;
pub mod graph;
pub mod group;
pub mod properties;
pub mod query;
pub mod relay;
pub mod store;

pub use error::*;
pub use graph::ResourceGraph;
