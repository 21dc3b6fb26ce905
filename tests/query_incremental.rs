//! Query maintenance integration tests.
//!
//! The central property: a query kept current by applying change deltas one
//! at a time always holds exactly the membership a fresh full scan of the
//! final graph would produce, whatever order the adds, changes, and
//! removals arrive in.

mod common;

use test_log::test;

use relaygraph::{
    brl::Brl,
    event::Change,
    query::{FieldMatch, Query, QueryOptions, GROUP_VALUES},
};

use common::{feed, graph_for, remote};

fn membership(query: &Query) -> Vec<Brl> {
    query.resources().iter().map(|res| res.brl.clone()).collect()
}

/// Run a change sequence through an incrementally maintained query and
/// compare against a query populated from scratch at the end.
fn assert_incremental_matches_rescan(changes: Vec<Change>) {
    let mut graph = graph_for("observer");
    let mut live = Query::new(FieldMatch::new(), QueryOptions::default());
    live.refresh(&graph, None);

    for change in changes {
        let delta = feed(&mut graph, change);
        live.refresh(&graph, Some(&delta));
    }

    let mut rescan = Query::new(FieldMatch::new(), QueryOptions::default());
    rescan.refresh(&graph, None);

    let mut live_members = membership(&live);
    let mut rescan_members = membership(&rescan);
    live_members.sort();
    rescan_members.sort();
    assert_eq!(
        live_members, rescan_members,
        "incremental maintenance diverged from a full rescan"
    );
}

#[test]
fn incremental_equals_rescan_for_adds_changes_and_removals() {
    let r1 = remote("app1", "r1", "x");
    let r2 = remote("app2", "r2", "y");
    let r3 = remote("app2", "r3", "x");

    assert_incremental_matches_rescan(vec![
        Change::added(r1.clone()),
        Change::added(r2.clone()),
        Change::changed(remote("app1", "r1", "z")),
        Change::added(r3.clone()),
        Change::removed(r2.clone()),
        Change::changed(remote("app2", "r3", "y")),
    ]);

    // removal of everything ends empty both ways
    assert_incremental_matches_rescan(vec![
        Change::added(r1.clone()),
        Change::added(r3.clone()),
        Change::removed(r1),
        Change::removed(r3),
    ]);
}

#[test]
fn incremental_equals_rescan_under_a_predicate() {
    let mut graph = graph_for("observer");
    let predicate = || FieldMatch::new().field("value", "x");
    let mut live = Query::new(predicate(), QueryOptions::default());
    live.refresh(&graph, None);

    let sequence = vec![
        Change::added(remote("app1", "r1", "x")),
        Change::added(remote("app2", "r2", "y")),
        // r2 moves into the predicate, r1 moves out
        Change::changed(remote("app2", "r2", "x")),
        Change::changed(remote("app1", "r1", "y")),
        Change::removed(remote("app2", "r2", "x")),
        Change::added(remote("app3", "r3", "x")),
    ];
    for change in sequence {
        let delta = feed(&mut graph, change);
        live.refresh(&graph, Some(&delta));
    }

    let mut rescan = Query::new(predicate(), QueryOptions::default());
    rescan.refresh(&graph, None);
    assert_eq!(membership(&live), membership(&rescan));
    assert_eq!(live.count(), 1);
    assert_eq!(live.first().unwrap().id, "r3");
}

/// Two applications publish resources carrying the same value. A third
/// observer's query sees both, and the values group under that key holds
/// both members.
#[test]
fn shared_values_group_across_applications() {
    let mut graph = graph_for("observer");
    let mut query = Query::new(FieldMatch::new(), QueryOptions::default());
    query.refresh(&graph, None);

    let delta = feed(&mut graph, Change::added(remote("app1", "r1", "x")));
    query.refresh(&graph, Some(&delta));
    let delta = feed(&mut graph, Change::added(remote("app2", "r2", "x")));
    query.refresh(&graph, Some(&delta));

    assert_eq!(query.count(), 2);
    let group = query
        .group(GROUP_VALUES, "x")
        .expect("the shared value must key a group");
    assert_eq!(group.len(), 2);

    // from app1's perspective, the only other path to "x" is r2
    let r1_brl = remote("app1", "r1", "x").brl;
    let paths = graph.paths(&r1_brl).unwrap();
    assert_eq!(paths.len(), 1);
    assert_eq!(paths[0].id, "r2");

    // r2 leaves, the group follows
    let delta = feed(&mut graph, Change::removed(remote("app2", "r2", "x")));
    query.refresh(&graph, Some(&delta));
    assert_eq!(query.group(GROUP_VALUES, "x").unwrap().len(), 1);
    assert!(graph.paths(&r1_brl).unwrap().is_empty());
}

#[test]
fn group_membership_survives_value_moves() {
    let mut graph = graph_for("observer");
    let mut query = Query::new(FieldMatch::new(), QueryOptions::default());
    query.refresh(&graph, None);

    let delta = feed(&mut graph, Change::added(remote("app1", "r1", "x")));
    query.refresh(&graph, Some(&delta));
    let delta = feed(&mut graph, Change::changed(remote("app1", "r1", "y")));
    query.refresh(&graph, Some(&delta));

    assert!(
        query.group(GROUP_VALUES, "x").is_none(),
        "an empty group must be pruned"
    );
    assert_eq!(query.group(GROUP_VALUES, "y").unwrap().len(), 1);
}

#[test]
fn search_drops_negative_ranks_without_touching_the_graph() {
    use std::sync::Arc;

    use relaygraph::properties::Resource;

    let mut graph = graph_for("observer");
    graph.apply(Change::added(remote("app1", "keep", "x")));
    graph.apply(Change::added(remote("app1", "drop", "y")));

    let mut query = Query::new(FieldMatch::new(), QueryOptions::default());
    query.refresh(&graph, None);
    assert_eq!(query.count(), 2);

    query.search(Some(Arc::new(|res: &Resource| {
        if res.id == "keep" {
            1.0
        } else {
            -1.0
        }
    })));
    assert_eq!(query.count(), 1);
    assert_eq!(query.first().unwrap().id, "keep");
    assert_eq!(
        graph.resources().count(),
        2,
        "search filters the view, never the graph"
    );
}

/// Deltas handed to a query that was never populated fall back to a full
/// scan, so consumers cannot observe a partial view.
#[test]
fn uninitialized_query_treats_deltas_as_a_full_scan() {
    let mut graph = graph_for("observer");
    graph.apply(Change::added(remote("app1", "r1", "x")));
    let delta = feed(&mut graph, Change::added(remote("app2", "r2", "y")));

    let mut query = Query::new(FieldMatch::new(), QueryOptions::default());
    query.refresh(&graph, Some(&delta));
    assert_eq!(
        query.count(),
        2,
        "the first refresh must populate the whole view"
    );
}

#[test]
fn observers_and_queries_see_the_same_post_state() {
    use std::sync::{Arc, Mutex};

    let mut graph = graph_for("observer");
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_in = seen.clone();
    graph
        .observe(
            "recorder",
            Box::new(move |event| {
                seen_in.lock().unwrap().push(format!("{event}"));
                Ok(())
            }),
        )
        .unwrap();

    graph.apply(Change::added(remote("app1", "r1", "x")));
    graph.apply(Change::removed(remote("app1", "r1", "x")));

    let log = seen.lock().unwrap();
    assert_eq!(log.len(), 2);
    assert!(log[0].starts_with("Added"));
    assert!(log[1].starts_with("Removed"));
    drop(log);

    let mut query = Query::new(FieldMatch::new(), QueryOptions::default());
    query.refresh(&graph, None);
    assert_eq!(query.count(), 0);
}
