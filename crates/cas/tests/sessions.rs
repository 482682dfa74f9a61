//! Session reporting and administrative destruction.

#![allow(clippy::expect_used, clippy::panic)]

use std::{sync::Arc, time::Duration};

use ssobroker_cas::{
    CasConfig, CentralAuthenticationService, SessionFilter, SsoSessionsReport,
    sessions::DestroyStatus,
    testutil::{Harness, SVC_A, SVC_B, TestCas, alice, authentication_for, harness, harness_with},
};
use ssobroker_tickets::{MemoryTicketRegistry, TicketRegistry, testutil::FailingRegistry};

struct Fixture {
    alice_tgt: String,
    bob_tgt: String,
    pgt: String,
}

async fn populate<R: TicketRegistry>(h: &Harness<R>) -> Fixture {
    let alice_tgt = h.cas.create_ticket_granting_ticket(alice()).await.expect("alice TGT");
    let bob_tgt = h
        .cas
        .create_ticket_granting_ticket(authentication_for("bob", &[]))
        .await
        .expect("bob TGT");
    let st = h.cas.grant_service_ticket(alice_tgt.id(), SVC_A, None).await.expect("grant");
    let pgt = h
        .cas
        .create_proxy_granting_ticket(st.id(), authentication_for(SVC_A, &[]))
        .await
        .expect("create PGT");

    Fixture {
        alice_tgt: alice_tgt.id().to_owned(),
        bob_tgt: bob_tgt.id().to_owned(),
        pgt: pgt.id().to_owned(),
    }
}

fn report<R: TicketRegistry>(h: &Harness<R>) -> SsoSessionsReport<Arc<TestCas<R>>> {
    SsoSessionsReport::new(Arc::clone(&h.cas), h.shared_clock())
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sessions_are_filtered_by_kind() {
    let h = harness();
    let fixture = populate(&h).await;
    let report = report(&h);

    let all = report.sessions(SessionFilter::All).await.expect("all");
    assert_eq!(all.len(), 3);

    let proxied = report.sessions(SessionFilter::Proxied).await.expect("proxied");
    assert_eq!(proxied.len(), 1);
    assert_eq!(proxied[0].ticket_granting_ticket, fixture.pgt);
    assert_eq!(proxied[0].proxied_by.as_deref(), Some(fixture.alice_tgt.as_str()));
    assert_eq!(proxied[0].principal, "alice");

    let direct = report.sessions(SessionFilter::Direct).await.expect("direct");
    let ids: Vec<&str> = direct.iter().map(|s| s.ticket_granting_ticket.as_str()).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&fixture.alice_tgt.as_str()));
    assert!(ids.contains(&fixture.bob_tgt.as_str()));

    let alice = direct.iter().find(|s| s.principal == "alice").expect("alice session");
    assert_eq!(alice.number_of_uses, 1);
    assert!(alice.services.contains(SVC_A));
    assert!(!alice.is_proxied);
}

#[tokio::test]
async fn summary_totals() {
    let h = harness();
    populate(&h).await;
    let report = report(&h);

    let summary = report.summary(SessionFilter::All).await.expect("summary");
    assert_eq!(summary.total_ticket_granting_tickets, 2);
    assert_eq!(summary.total_proxy_granting_tickets, 1);
    assert_eq!(summary.total_tickets, 3);
    assert_eq!(summary.unique_principals, 2);
    assert_eq!(summary.total_usage_count, 1);

    let proxied = report.summary(SessionFilter::Proxied).await.expect("summary");
    assert_eq!(proxied.total_tickets, 1);
    assert_eq!(proxied.unique_principals, 0);
}

#[tokio::test]
async fn expired_sessions_are_not_listed() {
    let h = harness();
    populate(&h).await;
    let report = report(&h);

    h.clock.advance(Duration::from_secs(3 * 3600));
    assert!(report.sessions(SessionFilter::All).await.expect("sessions").is_empty());
}

// ---------------------------------------------------------------------------
// Destruction
// ---------------------------------------------------------------------------

#[tokio::test]
async fn destroy_one_session() {
    let h = harness();
    let fixture = populate(&h).await;
    let report = report(&h);

    let destruction = report.destroy_session(&fixture.alice_tgt).await;
    assert_eq!(destruction.status, DestroyStatus::Success);
    assert!(destruction.failed.is_empty());
    assert!(destruction.destroyed.contains(&fixture.alice_tgt));
    assert!(destruction.destroyed.contains(&fixture.pgt));

    let remaining = report.sessions(SessionFilter::All).await.expect("sessions");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].ticket_granting_ticket, fixture.bob_tgt);
}

#[tokio::test]
async fn destroy_proxied_sessions_only() {
    let h = harness();
    let fixture = populate(&h).await;
    let report = report(&h);

    let bulk = report.destroy_sessions(SessionFilter::Proxied).await.expect("destroy");
    assert_eq!(bulk.status, DestroyStatus::Success);
    assert_eq!(bulk.destroyed_sessions, vec![fixture.pgt.clone()]);

    let direct = report.sessions(SessionFilter::Direct).await.expect("sessions");
    assert_eq!(direct.len(), 2);
}

#[tokio::test]
async fn destroy_all_sessions() {
    let h = harness();
    populate(&h).await;
    let report = report(&h);

    let bulk = report.destroy_sessions(SessionFilter::All).await.expect("destroy");
    assert_eq!(bulk.status, DestroyStatus::Success);
    assert!(bulk.failed_sessions.is_empty());
    assert_eq!(h.cas.registry().count().await.expect("count"), 0);
}

#[tokio::test]
async fn partial_failure_is_reported() {
    let registry = FailingRegistry::new(MemoryTicketRegistry::new());
    let h = harness_with(registry.clone(), CasConfig::default());
    let tgt = h.cas.create_ticket_granting_ticket(alice()).await.expect("create TGT");
    let st = h.cas.grant_service_ticket(tgt.id(), SVC_B, None).await.expect("grant");
    registry.fail_delete_of(st.id());
    let report = report(&h);

    let destruction = report.destroy_session(tgt.id()).await;
    assert_eq!(destruction.status, DestroyStatus::Failure);
    assert!(destruction.failed.contains_key(st.id()));

    let json = serde_json::to_value(&destruction).expect("serialize");
    assert_eq!(json["status"], "FAILURE");
}

#[tokio::test]
async fn outage_is_reported_not_raised() {
    let registry = FailingRegistry::new(MemoryTicketRegistry::new());
    let h = harness_with(registry.clone(), CasConfig::default());
    let tgt = h.cas.create_ticket_granting_ticket(alice()).await.expect("create TGT");
    let report = report(&h);

    registry.set_unavailable(true);
    let destruction = report.destroy_session(tgt.id()).await;
    assert_eq!(destruction.status, DestroyStatus::Failure);
    assert!(destruction.failed.contains_key(tgt.id()));

    assert!(report.destroy_sessions(SessionFilter::All).await.is_err());
}
