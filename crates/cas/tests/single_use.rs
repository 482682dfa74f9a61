//! Concurrent validation of one service ticket: exactly one caller wins,
//! or exactly as many as a multi-use ticket allows.
//!
//! The heavier round count is ignored by default:
//!
//! ```bash
//! cargo test -p ssobroker-cas --test single_use -- --ignored
//! ```

#![allow(clippy::expect_used, clippy::panic)]

use std::{sync::Arc, time::Duration};

use ssobroker_cas::{
    CasConfig, CasError, CentralAuthenticationService,
    config::UsageLimit,
    testutil::{SVC_A, TestCas, alice, authentication_for, harness, harness_with},
};
use ssobroker_tickets::{
    MemoryTicketRegistry, TicketKind, TicketRegistry, testutil::FailingRegistry,
};
use tokio::task::JoinSet;

/// Number of concurrent validators per ticket.
const CONCURRENCY: usize = 16;

/// Rounds for the default test.
const ROUNDS: usize = 20;

/// Rounds for the ignored soak test.
const SOAK_ROUNDS: usize = 500;

/// Use limit for the multi-use tests.
const MULTI_USES: u32 = 2;

/// Simulated backend round trip, long enough for validators to interleave.
const BACKEND_LATENCY: Duration = Duration::from_millis(5);

async fn race_validations<R: TicketRegistry + 'static>(
    cas: Arc<TestCas<R>>,
    ticket_id: String,
) -> (usize, usize) {
    let mut set = JoinSet::new();
    for _ in 0..CONCURRENCY {
        let cas = Arc::clone(&cas);
        let ticket_id = ticket_id.clone();
        set.spawn(async move { cas.validate_service_ticket(&ticket_id, SVC_A).await });
    }

    let (mut winners, mut losers) = (0, 0);
    while let Some(result) = set.join_next().await {
        match result.expect("task should not panic") {
            Ok(assertion) => {
                assert_eq!(assertion.principal.id, "alice");
                winners += 1;
            },
            Err(CasError::InvalidTicket { .. }) => losers += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    (winners, losers)
}

async fn run_rounds(rounds: usize) {
    let h = harness();
    let tgt = h.cas.create_ticket_granting_ticket(alice()).await.expect("create TGT");

    for round in 0..rounds {
        let st = h.cas.grant_service_ticket(tgt.id(), SVC_A, None).await.expect("grant");
        let (winners, losers) = race_validations(Arc::clone(&h.cas), st.id().to_owned()).await;
        assert_eq!(winners, 1, "round {round}: exactly one validation must succeed");
        assert_eq!(losers, CONCURRENCY - 1, "round {round}");
    }
}

// ---------------------------------------------------------------------------
// Test: one winner per service ticket
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_validation_single_winner() {
    run_rounds(ROUNDS).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "soak test"]
async fn concurrent_validation_single_winner_soak() {
    run_rounds(SOAK_ROUNDS).await;
}

// ---------------------------------------------------------------------------
// Test: a multi-use ticket validates exactly as often as allowed
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_validation_respects_use_limit() {
    let registry = FailingRegistry::new(MemoryTicketRegistry::new());
    let config = CasConfig::builder()
        .service_ticket(UsageLimit { uses: MULTI_USES, time_to_live: Duration::from_secs(10) })
        .build()
        .expect("valid config");
    let h = harness_with(registry.clone(), config);
    let tgt = h.cas.create_ticket_granting_ticket(alice()).await.expect("create TGT");
    registry.set_latency(BACKEND_LATENCY);

    for round in 0..5 {
        let st = h.cas.grant_service_ticket(tgt.id(), SVC_A, None).await.expect("grant");
        let (winners, losers) = race_validations(Arc::clone(&h.cas), st.id().to_owned()).await;
        assert_eq!(winners, MULTI_USES as usize, "round {round}: use limit must hold");
        assert_eq!(losers, CONCURRENCY - MULTI_USES as usize, "round {round}");

        let gone = registry.inner().get_ticket(st.id(), TicketKind::Service).await;
        assert!(gone.is_err(), "round {round}: exhausted ticket must be removed");
    }
}

// ---------------------------------------------------------------------------
// Test: one winner per proxy ticket
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_proxy_validation_single_winner() {
    let h = harness();
    let tgt = h.cas.create_ticket_granting_ticket(alice()).await.expect("create TGT");
    let st = h.cas.grant_service_ticket(tgt.id(), SVC_A, None).await.expect("grant");
    let pgt = h
        .cas
        .create_proxy_granting_ticket(st.id(), authentication_for(SVC_A, &[]))
        .await
        .expect("create PGT");

    for round in 0..ROUNDS {
        let pt = h.cas.grant_proxy_ticket(pgt.id(), SVC_A).await.expect("grant PT");
        let (winners, _) = race_validations(Arc::clone(&h.cas), pt.id().to_owned()).await;
        assert_eq!(winners, 1, "round {round}: exactly one validation must succeed");
    }
}

// ---------------------------------------------------------------------------
// Test: concurrent grants on one session all succeed
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_grants_on_one_session_succeed() {
    let h = harness();
    let tgt = h.cas.create_ticket_granting_ticket(alice()).await.expect("create TGT");

    let mut set = JoinSet::new();
    for _ in 0..CONCURRENCY {
        let cas = Arc::clone(&h.cas);
        let tgt_id = tgt.id().to_owned();
        set.spawn(async move { cas.grant_service_ticket(&tgt_id, SVC_A, None).await });
    }

    let mut granted = Vec::new();
    while let Some(result) = set.join_next().await {
        granted.push(result.expect("task should not panic").expect("grant"));
    }
    assert_eq!(granted.len(), CONCURRENCY);

    // No grant overwrote another's write-back.
    let session = h.cas.get_ticket(tgt.id(), TicketKind::TicketGranting).await.expect("TGT");
    assert_eq!(session.count_of_uses(), CONCURRENCY as u64);
    let recorded = session.granting().expect("granting state").child_ids();
    for st in &granted {
        assert!(recorded.contains(st.id()), "{} missing from the session", st.id());
    }

    for st in &granted {
        h.cas.validate_service_ticket(st.id(), SVC_A).await.expect("each ticket validates once");
    }
}
