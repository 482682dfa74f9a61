//! Ticket model and ticket registry for the SSO broker.
//!
//! This crate provides the [`Ticket`] model, the [`ExpirationPolicy`] rules
//! that decide when a ticket stops being usable, and the [`TicketRegistry`]
//! trait every storage backend implements. The orchestrator in
//! `ssobroker-cas` builds issuance, validation, and revocation on top of it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Protocol Adapters                          │
//! │          (CAS validation, OAuth, SAML, sessions)            │
//! ├─────────────────────────────────────────────────────────────┤
//! │            CentralAuthenticationService                     │
//! │   (grant, validate, proxy, cascade destroy, access gate)    │
//! ├─────────────────────────────────────────────────────────────┤
//! │                 ssobroker-tickets                           │
//! │        TicketRegistry trait + Ticket + ExpirationPolicy     │
//! ├──────────────────────┬──────────────────────────────────────┤
//! │ MemoryTicketRegistry │    distributed registries            │
//! │ (tests, single node) │    (via codec::PersistedTicket)      │
//! └──────────────────────┴──────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use ssobroker_tickets::{
//!     Authentication, Clock, ExpirationPolicy, MemoryTicketRegistry, Principal, SystemClock,
//!     Ticket, TicketIdGenerator, TicketKind, TicketRegistry,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = MemoryTicketRegistry::new();
//!     let ids = TicketIdGenerator::new("node1");
//!     let authn = Arc::new(
//!         Authentication::builder().principal(Principal::builder().id("alice").build()).build(),
//!     );
//!
//!     let id = ids.next_id(TicketKind::TicketGranting);
//!     let tgt = Ticket::ticket_granting(&id, authn, ExpirationPolicy::NeverExpires, SystemClock.now());
//!     registry.add_ticket(tgt).await?;
//!
//!     let fetched = registry.get_ticket(&id, TicketKind::TicketGranting).await?;
//!     assert_eq!(fetched.authentication().principal.id, "alice");
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` and `conformance` modules (authentication fixtures,
//!   ticket factories, failure-injecting registry, assertion macros, and the registry
//!   conformance suite). Enable this in `[dev-dependencies]` for integration tests.

#![deny(unsafe_code)]

pub mod audit;
pub mod audited;
pub mod authentication;
pub mod clock;
pub mod codec;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod conformance;
pub mod error;
pub mod expiration;
pub mod id;
pub mod memory;
pub mod registry;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod ticket;

// Re-export primary types at crate root for convenience
pub use audit::{AuditAction, AuditEvent, AuditLogger, AuditResult, NoopAuditLogger, TracingAuditLogger};
pub use audited::AuditedTicketRegistry;
pub use authentication::{Attributes, Authentication, Principal};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{BoxError, TicketError, TicketResult};
pub use expiration::ExpirationPolicy;
pub use id::TicketIdGenerator;
pub use memory::MemoryTicketRegistry;
pub use registry::{TicketPredicate, TicketRegistry, TicketStream};
pub use ticket::{
    ArtifactState, GrantingState, ServiceState, Ticket, TicketKind, TicketPayload, TokenState,
};
