//! Expiration boundary tests for tickets stored in `MemoryTicketRegistry`.
//!
//! Covers the idle/hard interplay on login sessions, the single-use rule on
//! service tickets, and the sweeper's treatment of tickets right at their
//! limits.

#![allow(clippy::expect_used, clippy::panic)]

use std::time::Duration;

use ssobroker_tickets::{
    Clock, ExpirationPolicy, ManualClock, MemoryTicketRegistry, Ticket, TicketKind,
    TicketRegistry,
    testutil::{alice, service_ticket_for},
};

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

/// Idle 2, hard 10: valid at 1 with activity, expired after an idle gap of
/// 3, and expired at 11 despite activity every second.
#[tokio::test]
async fn test_idle_two_hard_ten_timeline() {
    let clock = ManualClock::default();
    let registry = MemoryTicketRegistry::new();
    let policy = ExpirationPolicy::IdleAndHardTimeout { max_idle: secs(2), max_lifetime: secs(10) };

    registry
        .add_ticket(Ticket::ticket_granting("TGT-a", alice(), policy, clock.now()))
        .await
        .expect("add");
    registry
        .add_ticket(Ticket::ticket_granting("TGT-b", alice(), policy, clock.now()))
        .await
        .expect("add");

    // Elapsed 1 with activity on both.
    clock.advance(secs(1));
    for id in ["TGT-a", "TGT-b"] {
        let mut tgt = registry.get_ticket(id, TicketKind::TicketGranting).await.expect("get");
        assert!(!tgt.is_expired(clock.now()), "{id} must be valid at elapsed 1");
        tgt.record_use(clock.now());
        registry.update_ticket(&tgt).await.expect("update");
    }

    // TGT-a goes idle for 3; TGT-b keeps being used every second.
    for _ in 0..3 {
        clock.advance(secs(1));
        let mut tgt = registry.get_ticket("TGT-b", TicketKind::TicketGranting).await.expect("get");
        tgt.record_use(clock.now());
        registry.update_ticket(&tgt).await.expect("update");
    }
    let idle = registry.get_ticket("TGT-a", TicketKind::TicketGranting).await.expect("get");
    assert!(idle.is_expired(clock.now()), "idle gap of 3 must expire");

    while (clock.now() - idle.creation_time()).num_seconds() < 10 {
        clock.advance(secs(1));
        let mut tgt = registry.get_ticket("TGT-b", TicketKind::TicketGranting).await.expect("get");
        assert!(!tgt.is_expired(clock.now()), "active ticket valid up to the hard limit");
        tgt.record_use(clock.now());
        registry.update_ticket(&tgt).await.expect("update");
    }

    clock.advance(secs(1));
    let busy = registry.get_ticket("TGT-b", TicketKind::TicketGranting).await.expect("get");
    assert!(busy.is_expired(clock.now()), "hard limit must expire at elapsed 11");
}

/// A ticket exactly at its hard limit is kept by the sweeper; one second
/// later it is removed.
#[tokio::test]
async fn test_sweeper_respects_exact_boundary() {
    let clock = ManualClock::default();
    let registry = MemoryTicketRegistry::new();
    let policy = ExpirationPolicy::HardTimeout { time_to_live: secs(60) };
    registry
        .add_ticket(Ticket::ticket_granting("TGT-edge", alice(), policy, clock.now()))
        .await
        .expect("add");

    clock.advance(secs(60));
    assert_eq!(registry.sweep_expired(&clock), 0);

    clock.advance(secs(1));
    assert_eq!(registry.sweep_expired(&clock), 1);
    assert_eq!(registry.count().await.expect("count"), 0);
}

/// Expired tickets stay retrievable by id; only callers decide to reject them.
#[tokio::test]
async fn test_lookup_does_not_filter_expired() {
    let clock = ManualClock::default();
    let registry = MemoryTicketRegistry::new();
    let mut st = service_ticket_for("ST-used", "TGT-1", "svc", alice());
    st.record_use(clock.now());
    registry.add_ticket(st).await.expect("add");

    let fetched = registry.get_ticket("ST-used", TicketKind::Service).await.expect("get");
    assert!(fetched.is_expired(clock.now()));
}

/// A never-expiring ticket survives any sweep.
#[tokio::test]
async fn test_never_expires_survives_sweeps() {
    let clock = ManualClock::default();
    let registry = MemoryTicketRegistry::new();
    registry
        .add_ticket(Ticket::ticket_granting(
            "TGT-forever",
            alice(),
            ExpirationPolicy::NeverExpires,
            clock.now(),
        ))
        .await
        .expect("add");

    clock.advance(secs(10 * 365 * 24 * 3600));
    assert_eq!(registry.sweep_expired(&clock), 0);
}
