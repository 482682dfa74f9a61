//! Shared test utilities for ticket and registry tests.
//!
//! Feature-gated behind `testutil` so the helpers never reach production
//! builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! ssobroker-tickets = { path = "../tickets", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use ssobroker_tickets::testutil::{alice, tgt_for};
//! ```

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

pub use crate::clock::ManualClock;
use crate::{
    authentication::{Attributes, Authentication, Principal},
    error::{TicketError, TicketResult},
    expiration::ExpirationPolicy,
    registry::{TicketPredicate, TicketRegistry, TicketStream},
    ticket::{ServiceState, Ticket, TicketKind},
};

/// Builds an authentication record for `principal_id` with a password
/// credential and a `memberOf` attribute.
#[must_use]
pub fn authentication_for(principal_id: &str, groups: &[&str]) -> Arc<Authentication> {
    let mut attributes = Attributes::new();
    attributes.insert("memberOf".to_owned(), groups.iter().map(|g| (*g).to_owned()).collect());

    Arc::new(
        Authentication::builder()
            .principal(Principal::builder().id(principal_id).attributes(attributes).build())
            .credential_types(["password".to_owned()].into())
            .build(),
    )
}

/// The authentication record used throughout the test suites: principal
/// `alice`, member of `staff`.
#[must_use]
pub fn alice() -> Arc<Authentication> {
    authentication_for("alice", &["staff"])
}

/// Ticket-granting policy with the broker defaults (2h idle, 8h hard).
#[must_use]
pub fn tgt_policy() -> ExpirationPolicy {
    ExpirationPolicy::IdleAndHardTimeout {
        max_idle: Duration::from_secs(2 * 3600),
        max_lifetime: Duration::from_secs(8 * 3600),
    }
}

/// Single-use, 10 second service ticket policy.
#[must_use]
pub fn st_policy() -> ExpirationPolicy {
    ExpirationPolicy::MultiUseOrTimeout { uses: 1, time_to_live: Duration::from_secs(10) }
}

/// Creates a root ticket-granting ticket created now.
#[must_use]
pub fn tgt_for(id: &str, authentication: Arc<Authentication>) -> Ticket {
    Ticket::ticket_granting(id, authentication, tgt_policy(), Utc::now())
}

/// Creates a single-use service ticket created now.
#[must_use]
pub fn service_ticket_for(
    id: &str,
    granting_ticket: &str,
    service: &str,
    authentication: Arc<Authentication>,
) -> Ticket {
    let state = ServiceState {
        service: service.to_owned(),
        granting_ticket: granting_ticket.to_owned(),
        from_new_login: true,
    };
    Ticket::service_ticket(id, state, authentication, st_policy(), Utc::now())
}

/// Assert that a [`TicketResult`] is an error of the given
/// [`TicketError`](crate::TicketError) variant pattern.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use ssobroker_tickets::{TicketError, TicketResult, assert_ticket_error};
///
/// let result: TicketResult<()> = Err(TicketError::not_found("ST-1"));
/// assert_ticket_error!(result, NotFound { .. });
/// ```
#[macro_export]
macro_rules! assert_ticket_error {
    ($result:expr, $($variant:tt)+) => {
        assert!(
            matches!($result, Err($crate::TicketError::$($variant)+)),
            "expected TicketError::{}, got: {:?}",
            stringify!($($variant)+),
            $result,
        );
    };
}

/// Registry wrapper that injects failures, for partial-failure tests.
///
/// Deletes of ids in `fail_deletes` fail with `Unavailable`. While
/// [`set_unavailable`](Self::set_unavailable) is on, every call fails.
/// [`set_latency`](Self::set_latency) delays reads and writes the way a
/// networked backend would, which widens race windows in concurrency tests.
#[derive(Clone, Debug)]
pub struct FailingRegistry<R> {
    inner: R,
    fail_deletes: Arc<RwLock<HashSet<String>>>,
    unavailable: Arc<AtomicBool>,
    adds: Arc<AtomicUsize>,
    latency_micros: Arc<AtomicU64>,
}

impl<R: TicketRegistry> FailingRegistry<R> {
    /// Wraps `inner` with no failures configured.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            fail_deletes: Arc::default(),
            unavailable: Arc::default(),
            adds: Arc::default(),
            latency_micros: Arc::default(),
        }
    }

    /// Makes every future delete of `id` fail.
    pub fn fail_delete_of(&self, id: impl Into<String>) {
        self.fail_deletes.write().insert(id.into());
    }

    /// Switches the whole registry between available and unavailable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delays every read and write by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.latency_micros.store(micros, Ordering::SeqCst);
    }

    /// Number of successful `add_ticket` calls.
    pub fn adds(&self) -> usize {
        self.adds.load(Ordering::SeqCst)
    }

    /// The wrapped registry.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    async fn latency(&self) {
        let micros = self.latency_micros.load(Ordering::SeqCst);
        if micros > 0 {
            tokio::time::sleep(Duration::from_micros(micros)).await;
        }
    }

    fn check(&self) -> TicketResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TicketError::unavailable("simulated outage"));
        }
        Ok(())
    }
}

#[async_trait]
impl<R: TicketRegistry> TicketRegistry for FailingRegistry<R> {
    async fn add_ticket(&self, ticket: Ticket) -> TicketResult<()> {
        self.check()?;
        self.inner.add_ticket(ticket).await?;
        self.adds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_ticket(&self, id: &str, kind: TicketKind) -> TicketResult<Ticket> {
        self.check()?;
        self.latency().await;
        self.inner.get_ticket(id, kind).await
    }

    async fn get_tickets(&self, predicate: TicketPredicate<'_>) -> TicketResult<TicketStream> {
        self.check()?;
        self.inner.get_tickets(predicate).await
    }

    async fn update_ticket(&self, ticket: &Ticket) -> TicketResult<()> {
        self.check()?;
        self.latency().await;
        self.inner.update_ticket(ticket).await
    }

    async fn update_ticket_if(
        &self,
        ticket: &Ticket,
        expected_count_of_uses: u64,
    ) -> TicketResult<bool> {
        self.check()?;
        self.latency().await;
        self.inner.update_ticket_if(ticket, expected_count_of_uses).await
    }

    async fn delete_ticket(&self, id: &str) -> TicketResult<bool> {
        self.check()?;
        if self.fail_deletes.read().contains(id) {
            return Err(TicketError::unavailable(format!("simulated delete failure for {id}")));
        }
        self.latency().await;
        self.inner.delete_ticket(id).await
    }

    async fn delete_all(&self) -> TicketResult<usize> {
        self.check()?;
        self.inner.delete_all().await
    }

    async fn count(&self) -> TicketResult<usize> {
        self.check()?;
        self.inner.count().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::MemoryTicketRegistry;

    #[test]
    fn test_alice_fixture() {
        let authn = alice();
        assert_eq!(authn.principal.id, "alice");
        assert_eq!(authn.principal.attribute("memberOf"), Some(&["staff".to_owned()][..]));
        assert!(authn.credential_types.contains("password"));
    }

    #[test]
    fn test_assert_ticket_error_macro() {
        let result: TicketResult<()> = Err(TicketError::not_found("ST-1"));
        assert_ticket_error!(result, NotFound { .. });
    }

    #[tokio::test]
    async fn test_failing_registry_delete_injection() {
        let registry = FailingRegistry::new(MemoryTicketRegistry::new());
        registry.add_ticket(tgt_for("TGT-1", alice())).await.unwrap();
        registry.fail_delete_of("TGT-1");

        let result = registry.delete_ticket("TGT-1").await;
        assert_ticket_error!(result, Unavailable { .. });
        assert_eq!(registry.inner().count().await.unwrap(), 1);
        assert_eq!(registry.adds(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_registry_latency_delays_reads() {
        let registry = FailingRegistry::new(MemoryTicketRegistry::new());
        registry.add_ticket(tgt_for("TGT-1", alice())).await.unwrap();
        registry.set_latency(Duration::from_millis(50));

        let started = tokio::time::Instant::now();
        registry.get_ticket("TGT-1", TicketKind::TicketGranting).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_failing_registry_outage() {
        let registry = FailingRegistry::new(MemoryTicketRegistry::new());
        registry.set_unavailable(true);

        let result = registry.count().await;
        assert!(result.as_ref().is_err_and(TicketError::is_transient), "got {result:?}");

        registry.set_unavailable(false);
        assert_eq!(registry.count().await.unwrap(), 0);
    }
}
