//! Central authentication service for the SSO broker.
//!
//! Builds on the ticket model in `ssobroker-tickets`:
//!
//! - [`DefaultCentralAuthenticationService`] issues, validates, proxies, and revokes tickets
//!   against any [`TicketRegistry`](ssobroker_tickets::TicketRegistry).
//! - [`AccessStrategyEnforcer`] decides which registered services may receive tickets.
//! - Protocol adapters sit on top: [`OAuthTokenIssuer`] for OAuth access tokens and
//!   introspection, [`TokenTicketBuilder`] for signed JWTs, [`SamlArtifactStore`] for the SAML
//!   artifact binding, and [`SsoSessionsReport`] for session administration.
//!
//! # Errors
//!
//! Every operation returns [`CasError`]. Absent, expired, and already
//! consumed tickets are all [`CasError::InvalidTicket`]; backend outages
//! are [`CasError::Registry`] and report
//! [`is_transient`](CasError::is_transient).
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module (service catalog fixture, orchestrator harness
//!   with a manual clock, and the `assert_cas_error!` macro).

#![deny(unsafe_code)]

pub mod access;
pub mod assertion;
pub mod cas;
pub mod config;
pub mod error;
pub mod oauth;
pub mod saml;
pub mod service;
pub mod sessions;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod token;

// Re-export primary types at crate root for convenience
pub use access::{AccessContext, AccessDecision, AccessStrategyEnforcer};
pub use assertion::Assertion;
pub use cas::{CentralAuthenticationService, DefaultCentralAuthenticationService, DestroyOutcome};
pub use config::{CasConfig, ExpirationPolicies};
pub use error::{CasError, ConfigError, DenialReason, Result, TokenError};
pub use oauth::{AccessTokenGrant, IntrospectionError, IntrospectionResponse, OAuthTokenIssuer};
pub use saml::{ArtifactResolution, SamlArtifactStore};
pub use service::{
    AccessStrategy, AttributeReleasePolicy, InMemoryServiceCatalog, OAuthClient, ProxyPolicy,
    RegisteredService, ServiceCatalog,
};
pub use sessions::{SessionFilter, SessionsSummary, SsoSession, SsoSessionsReport};
pub use token::{JwtTokenSigner, TokenClaims, TokenSigner, TokenTicketBuilder};
