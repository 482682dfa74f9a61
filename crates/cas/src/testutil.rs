//! Shared test utilities for the central authentication service.
//!
//! Provides a service catalog with the usual cast of relying parties, a
//! [`Harness`] wiring the orchestrator to a [`ManualClock`] and a recording
//! audit logger, and the [`assert_cas_error!`](crate::assert_cas_error)
//! macro. Feature-gated behind `testutil`.
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use ssobroker_cas::testutil::{SVC_A, harness};
//! ```

use std::sync::Arc;

pub use ssobroker_tickets::testutil::{ManualClock, alice, authentication_for};
use ssobroker_tickets::{
    MemoryTicketRegistry, TicketRegistry, audit::RecordingAuditLogger, clock::Clock,
};

use crate::{
    cas::DefaultCentralAuthenticationService,
    config::CasConfig,
    service::{AccessStrategy, InMemoryServiceCatalog, OAuthClient, ProxyPolicy, RegisteredService},
};

/// Enabled service that may proxy.
pub const SVC_A: &str = "svcA";
/// Enabled service without proxying.
pub const SVC_B: &str = "svcB";
/// Disabled service.
pub const SVC_C: &str = "svcC";
/// Service pattern owned by the OAuth client [`CLIENT_ID`].
pub const OAUTH_SERVICE: &str = "https://api.example.org/*";
/// OAuth client id.
pub const CLIENT_ID: &str = "client-a";
/// OAuth client secret.
pub const CLIENT_SECRET: &str = "secret-a";

/// Catalog holding [`SVC_A`], [`SVC_B`], [`SVC_C`], and the OAuth client.
#[must_use]
pub fn catalog() -> InMemoryServiceCatalog {
    InMemoryServiceCatalog::with_services([
        RegisteredService::builder()
            .id(1)
            .service_id(SVC_A)
            .name("Service A")
            .proxy_policy(ProxyPolicy { allowed: true })
            .build(),
        RegisteredService::builder().id(2).service_id(SVC_B).name("Service B").build(),
        RegisteredService::builder()
            .id(3)
            .service_id(SVC_C)
            .name("Service C")
            .access_strategy(AccessStrategy::builder().enabled(false).build())
            .build(),
        RegisteredService::builder()
            .id(4)
            .service_id(OAUTH_SERVICE)
            .name("API")
            .oauth(OAuthClient::new(CLIENT_ID, CLIENT_SECRET))
            .build(),
    ])
}

/// Orchestrator type used throughout the tests.
pub type TestCas<R = MemoryTicketRegistry> =
    DefaultCentralAuthenticationService<R, InMemoryServiceCatalog, RecordingAuditLogger>;

/// An orchestrator with handles on its clock and audit trail.
#[derive(Debug)]
pub struct Harness<R = MemoryTicketRegistry> {
    /// The orchestrator.
    pub cas: Arc<TestCas<R>>,
    /// Controls the orchestrator's time.
    pub clock: ManualClock,
    /// Every audit event the orchestrator emitted.
    pub audit: RecordingAuditLogger,
}

impl<R: TicketRegistry> Harness<R> {
    /// The clock as the trait object the orchestrator uses.
    #[must_use]
    pub fn shared_clock(&self) -> Arc<dyn Clock> {
        Arc::new(self.clock.clone())
    }
}

/// Harness over a fresh [`MemoryTicketRegistry`] with default configuration.
#[must_use]
pub fn harness() -> Harness {
    harness_with(MemoryTicketRegistry::new(), CasConfig::default())
}

/// Harness over `registry` with `config`.
///
/// # Panics
///
/// Panics if `config` is invalid.
#[must_use]
pub fn harness_with<R: TicketRegistry>(registry: R, config: CasConfig) -> Harness<R> {
    let clock = ManualClock::default();
    let audit = RecordingAuditLogger::default();
    let cas = DefaultCentralAuthenticationService::builder()
        .registry(registry)
        .catalog(catalog())
        .audit_logger(audit.clone())
        .config(config)
        .clock(Arc::new(clock.clone()))
        .build()
        .expect("test configuration should be valid");
    Harness { cas: Arc::new(cas), clock, audit }
}

/// Asserts that a result is an `Err` matching the given [`CasError`](crate::CasError) variant.
///
/// ```no_run
/// # use ssobroker_cas::{assert_cas_error, CasError};
/// let result: Result<(), CasError> = Err(CasError::invalid_ticket("ST-1"));
/// assert_cas_error!(result, InvalidTicket { .. });
/// ```
#[macro_export]
macro_rules! assert_cas_error {
    ($result:expr, $($variant:tt)+) => {
        assert!(
            matches!($result, Err($crate::CasError::$($variant)+)),
            "expected CasError::{}, got: {:?}",
            stringify!($($variant)+),
            $result,
        );
    };
}
