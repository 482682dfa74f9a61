//! Conformance test suite for [`TicketRegistry`] implementations.
//!
//! Every registry, in-memory or distributed, can run the same suite to show
//! it honors the contract the orchestrator relies on.
//!
//! # Usage
//!
//! Enable the `testutil` feature and call each conformance function with a
//! fresh registry:
//!
//! ```no_run
//! use ssobroker_tickets::{MemoryTicketRegistry, conformance};
//!
//! #[tokio::test]
//! async fn add_then_get_roundtrip() {
//!     conformance::add_then_get_roundtrip(&MemoryTicketRegistry::new()).await;
//! }
//! ```
//!
//! # Test Categories
//!
//! | Category | Functions | Contract aspect |
//! |----------|-----------|-----------------|
//! | CRUD | 7 tests | add/get/update/delete semantics, conditional update |
//! | Query | 3 tests | predicate snapshots, kind and parent filters |
//! | Concurrent | 3 tests | atomic delete, atomic conditional update, parallel inserts |

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinSet;

use crate::{
    assert_ticket_error,
    registry::TicketRegistry,
    testutil::{alice, service_ticket_for, tgt_for},
    ticket::{Ticket, TicketKind},
};

// ============================================================================
// CRUD (7 tests)
// ============================================================================

/// `add_ticket` then `get_ticket` returns the same id, creation time, and
/// authentication.
pub async fn add_then_get_roundtrip<R: TicketRegistry>(registry: &R) {
    let authn = alice();
    let tgt = tgt_for("TGT-conf-1", Arc::clone(&authn));
    let created = tgt.creation_time();
    registry.add_ticket(tgt).await.expect("add should succeed");

    let fetched =
        registry.get_ticket("TGT-conf-1", TicketKind::TicketGranting).await.expect("get");
    assert_eq!(fetched.id(), "TGT-conf-1");
    assert_eq!(fetched.creation_time(), created);
    assert_eq!(fetched.authentication().as_ref(), authn.as_ref());
}

/// `get_ticket` on an unknown id is `NotFound`.
pub async fn get_missing_is_not_found<R: TicketRegistry>(registry: &R) {
    let result = registry.get_ticket("TGT-missing", TicketKind::TicketGranting).await;
    assert_ticket_error!(result, NotFound { .. });
}

/// `get_ticket` with the wrong kind is `InvalidTicketClass`.
pub async fn get_wrong_kind_is_invalid_class<R: TicketRegistry>(registry: &R) {
    registry
        .add_ticket(service_ticket_for("ST-conf-1", "TGT-x", "svc", alice()))
        .await
        .expect("add");
    let result = registry.get_ticket("ST-conf-1", TicketKind::ProxyGranting).await;
    assert_ticket_error!(result, InvalidTicketClass { .. });
}

/// A second `add_ticket` with the same id is `DuplicateTicketId` and leaves
/// the original in place.
pub async fn duplicate_add_is_rejected<R: TicketRegistry>(registry: &R) {
    let first = tgt_for("TGT-conf-dup", alice());
    let first_created = first.creation_time();
    registry.add_ticket(first).await.expect("first add");

    let result = registry.add_ticket(tgt_for("TGT-conf-dup", alice())).await;
    assert_ticket_error!(result, DuplicateTicketId { .. });

    let stored = registry.get_ticket("TGT-conf-dup", TicketKind::TicketGranting).await.expect("get");
    assert_eq!(stored.creation_time(), first_created);
}

/// `update_ticket` persists usage state, and fails for a deleted ticket
/// without bringing it back.
pub async fn update_persists_and_never_resurrects<R: TicketRegistry>(registry: &R) {
    let mut tgt = tgt_for("TGT-conf-upd", alice());
    registry.add_ticket(tgt.clone()).await.expect("add");

    tgt.record_use(Utc::now());
    registry.update_ticket(&tgt).await.expect("update");
    let stored = registry.get_ticket("TGT-conf-upd", TicketKind::TicketGranting).await.expect("get");
    assert_eq!(stored.count_of_uses(), 1);

    assert!(registry.delete_ticket("TGT-conf-upd").await.expect("delete"));
    let result = registry.update_ticket(&tgt).await;
    assert_ticket_error!(result, NotFound { .. });
    let result = registry.get_ticket("TGT-conf-upd", TicketKind::TicketGranting).await;
    assert_ticket_error!(result, NotFound { .. });
}

/// `update_ticket_if` writes only while the stored use count matches, and
/// fails for a deleted ticket.
pub async fn update_if_compares_use_count<R: TicketRegistry>(registry: &R) {
    let mut tgt = tgt_for("TGT-conf-cas", alice());
    registry.add_ticket(tgt.clone()).await.expect("add");

    tgt.record_use(Utc::now());
    assert!(registry.update_ticket_if(&tgt, 0).await.expect("first write"));
    assert!(!registry.update_ticket_if(&tgt, 0).await.expect("stale write"));
    let stored = registry.get_ticket("TGT-conf-cas", TicketKind::TicketGranting).await.expect("get");
    assert_eq!(stored.count_of_uses(), 1);

    assert!(registry.delete_ticket("TGT-conf-cas").await.expect("delete"));
    let result = registry.update_ticket_if(&tgt, 1).await;
    assert_ticket_error!(result, NotFound { .. });
}

/// `delete_ticket` reports whether something was removed and is idempotent.
pub async fn delete_is_idempotent<R: TicketRegistry>(registry: &R) {
    registry.add_ticket(tgt_for("TGT-conf-del", alice())).await.expect("add");
    assert!(registry.delete_ticket("TGT-conf-del").await.expect("first delete"));
    assert!(!registry.delete_ticket("TGT-conf-del").await.expect("second delete"));
    assert!(!registry.delete_ticket("TGT-never-existed").await.expect("absent delete"));
}

// ============================================================================
// Query (3 tests)
// ============================================================================

/// `get_tickets` filters by predicate and `delete_all` reports the count.
pub async fn predicate_query_and_delete_all<R: TicketRegistry>(registry: &R) {
    registry.delete_all().await.expect("reset");
    registry.add_ticket(tgt_for("TGT-q-1", alice())).await.expect("add");
    registry.add_ticket(tgt_for("TGT-q-2", alice())).await.expect("add");
    registry.add_ticket(service_ticket_for("ST-q-1", "TGT-q-1", "svc", alice())).await.expect("add");

    let only_tgt_1 = registry
        .get_tickets(&|ticket: &Ticket| ticket.id() == "TGT-q-1")
        .await
        .expect("query");
    assert_eq!(only_tgt_1.count(), 1);

    let tgts = registry.get_tickets_by_kind(TicketKind::TicketGranting).await.expect("by kind");
    assert_eq!(tgts.count(), 2);

    assert_eq!(registry.count().await.expect("count"), 3);
    assert_eq!(registry.delete_all().await.expect("delete_all"), 3);
    assert_eq!(registry.count().await.expect("count"), 0);
}

/// `children_of` returns exactly the tickets whose parent id matches.
pub async fn children_of_matches_parent<R: TicketRegistry>(registry: &R) {
    registry.add_ticket(tgt_for("TGT-c-1", alice())).await.expect("add");
    for (id, parent) in [("ST-c-1", "TGT-c-1"), ("ST-c-2", "TGT-c-1"), ("ST-c-3", "TGT-c-2")] {
        registry.add_ticket(service_ticket_for(id, parent, "svc", alice())).await.expect("add");
    }

    let mut children: Vec<String> = registry
        .children_of("TGT-c-1")
        .await
        .expect("children")
        .map(|ticket| ticket.id().to_owned())
        .collect();
    children.sort();
    assert_eq!(children, vec!["ST-c-1".to_owned(), "ST-c-2".to_owned()]);
}

/// A returned stream does not change when the registry does.
pub async fn query_is_snapshot<R: TicketRegistry>(registry: &R) {
    registry.add_ticket(tgt_for("TGT-snap-1", alice())).await.expect("add");
    let stream = registry
        .get_tickets(&|ticket: &Ticket| ticket.id() == "TGT-snap-1")
        .await
        .expect("query");
    assert!(registry.delete_ticket("TGT-snap-1").await.expect("delete"));
    assert_eq!(stream.count(), 1);
}

// ============================================================================
// Concurrent (3 tests)
// ============================================================================

/// Of many concurrent deletes of one id, exactly one reports `true`.
pub async fn concurrent_delete_has_single_winner<R: TicketRegistry + 'static>(registry: Arc<R>) {
    registry.add_ticket(tgt_for("TGT-race", alice())).await.expect("add");

    let mut tasks = JoinSet::new();
    for _ in 0..32 {
        let registry = Arc::clone(&registry);
        tasks.spawn(async move { registry.delete_ticket("TGT-race").await.expect("delete") });
    }

    let mut winners = 0;
    while let Some(result) = tasks.join_next().await {
        if result.expect("task should not panic") {
            winners += 1;
        }
    }
    assert_eq!(winners, 1, "exactly one delete must observe the ticket");
}

/// Of many concurrent conditional updates from the same read, exactly one
/// is written.
pub async fn concurrent_update_if_has_single_winner<R: TicketRegistry + 'static>(
    registry: Arc<R>,
) {
    let tgt = tgt_for("TGT-cas-race", alice());
    registry.add_ticket(tgt.clone()).await.expect("add");

    let mut tasks = JoinSet::new();
    for _ in 0..32 {
        let registry = Arc::clone(&registry);
        let mut used = tgt.clone();
        tasks.spawn(async move {
            used.record_use(Utc::now());
            registry.update_ticket_if(&used, 0).await.expect("update_if")
        });
    }

    let mut winners = 0;
    while let Some(result) = tasks.join_next().await {
        if result.expect("task should not panic") {
            winners += 1;
        }
    }
    assert_eq!(winners, 1, "exactly one conditional update must land");
    let stored = registry.get_ticket("TGT-cas-race", TicketKind::TicketGranting).await.expect("get");
    assert_eq!(stored.count_of_uses(), 1);
}

/// Concurrent inserts of distinct ids all land.
pub async fn concurrent_adds_all_land<R: TicketRegistry + 'static>(registry: Arc<R>) {
    let mut tasks = JoinSet::new();
    for i in 0..64 {
        let registry = Arc::clone(&registry);
        tasks.spawn(async move {
            registry.add_ticket(tgt_for(&format!("TGT-par-{i}"), alice())).await.expect("add");
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.expect("task should not panic");
    }

    let stored = registry
        .get_tickets(&|ticket: &Ticket| ticket.id().starts_with("TGT-par-"))
        .await
        .expect("query");
    assert_eq!(stored.count(), 64);
}

/// Runs the full suite against one registry.
///
/// Each function uses distinct ids, so they can share a registry. Call the
/// functions individually for finer-grained failure reporting.
pub async fn run_all<R: TicketRegistry + 'static>(registry: Arc<R>) {
    add_then_get_roundtrip(registry.as_ref()).await;
    get_missing_is_not_found(registry.as_ref()).await;
    get_wrong_kind_is_invalid_class(registry.as_ref()).await;
    duplicate_add_is_rejected(registry.as_ref()).await;
    update_persists_and_never_resurrects(registry.as_ref()).await;
    update_if_compares_use_count(registry.as_ref()).await;
    delete_is_idempotent(registry.as_ref()).await;

    predicate_query_and_delete_all(registry.as_ref()).await;
    children_of_matches_parent(registry.as_ref()).await;
    query_is_snapshot(registry.as_ref()).await;

    concurrent_delete_has_single_winner(Arc::clone(&registry)).await;
    concurrent_update_if_has_single_winner(Arc::clone(&registry)).await;
    concurrent_adds_all_land(registry).await;
}
