//! Error types for the central authentication service.
//!
//! [`CasError`] is what protocol adapters see. Registry failures that mean
//! "this ticket is not usable" (absent, wrong kind) are folded into
//! [`CasError::InvalidTicket`]; everything else from the registry stays
//! wrapped in [`CasError::Registry`] so callers can tell a backend outage
//! (retry) from a bad ticket (fail fast).

use std::fmt;

use ssobroker_tickets::{BoxError, TicketError};
use thiserror::Error;

/// Result type alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, CasError>;

/// Machine-readable reason attached to every access denial.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum DenialReason {
    /// No registered service matches the requested identifier.
    ServiceNotRegistered,
    /// The registered service exists but is disabled.
    ServiceDisabled,
    /// The service does not take part in single sign-on and the request
    /// did not come from a fresh login.
    SsoNotAllowed,
    /// The principal lacks an attribute value the service requires.
    RequiredAttributeMissing,
    /// The service may not obtain proxy-granting tickets.
    ProxyingNotAllowed,
    /// The ticket was presented by a service other than the one it was
    /// issued for.
    ServiceMismatch,
}

impl DenialReason {
    /// Stable code used in audit records and protocol error mapping.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ServiceNotRegistered => "service_not_registered",
            Self::ServiceDisabled => "service_disabled",
            Self::SsoNotAllowed => "sso_not_allowed",
            Self::RequiredAttributeMissing => "required_attribute_missing",
            Self::ProxyingNotAllowed => "proxying_not_allowed",
            Self::ServiceMismatch => "service_mismatch",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Errors surfaced by [`CentralAuthenticationService`](crate::CentralAuthenticationService)
/// operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CasError {
    /// The ticket is absent, expired, already consumed, or of the wrong kind.
    #[error("Invalid ticket: {id}")]
    InvalidTicket {
        /// The ticket id that was presented.
        id: String,
    },

    /// The access strategy denied the service, or the service does not
    /// match the ticket it presented.
    #[error("Service {service} is not authorized: {reason}")]
    UnauthorizedService {
        /// The requesting service identifier.
        service: String,
        /// Why access was denied.
        reason: DenialReason,
    },

    /// The service asked for a proxy-granting ticket but may not proxy.
    #[error("Service {service} is not authorized to proxy")]
    UnauthorizedProxying {
        /// The requesting service identifier.
        service: String,
    },

    /// A renewed authentication names a different principal than the
    /// session it is being attached to.
    #[error("Authentication for {actual} cannot renew the session of {expected}")]
    MixedPrincipal {
        /// Principal of the existing session.
        expected: String,
        /// Principal of the renewed authentication.
        actual: String,
    },

    /// A registry operation failed for reasons other than a missing ticket.
    #[error(transparent)]
    Registry(TicketError),

    /// Signing a token failed.
    #[error(transparent)]
    Token(#[from] TokenError),
}

impl CasError {
    /// Creates an [`InvalidTicket`](Self::InvalidTicket) error.
    #[must_use]
    pub fn invalid_ticket(id: impl Into<String>) -> Self {
        Self::InvalidTicket { id: id.into() }
    }

    /// Creates an [`UnauthorizedService`](Self::UnauthorizedService) error.
    #[must_use]
    pub fn unauthorized(service: impl Into<String>, reason: DenialReason) -> Self {
        Self::UnauthorizedService { service: service.into(), reason }
    }

    /// Creates an [`UnauthorizedProxying`](Self::UnauthorizedProxying) error.
    #[must_use]
    pub fn unauthorized_proxying(service: impl Into<String>) -> Self {
        Self::UnauthorizedProxying { service: service.into() }
    }

    /// Creates a [`MixedPrincipal`](Self::MixedPrincipal) error.
    #[must_use]
    pub fn mixed_principal(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::MixedPrincipal { expected: expected.into(), actual: actual.into() }
    }

    /// Returns `true` if retrying the operation may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Registry(err) if err.is_transient())
    }
}

impl From<TicketError> for CasError {
    fn from(err: TicketError) -> Self {
        match err {
            TicketError::NotFound { id } | TicketError::InvalidTicketClass { id, .. } => {
                Self::InvalidTicket { id }
            },
            other => Self::Registry(other),
        }
    }
}

/// Errors from producing or publishing signed tokens.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TokenError {
    /// The signing key could not be loaded.
    #[error("Invalid signing key: {message}")]
    InvalidKey {
        /// Description of the problem.
        message: String,
    },

    /// Signing the claims failed.
    #[error("Token signing failed: {message}")]
    Signing {
        /// Description of the failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// The ticket cannot be turned into a token (e.g. it never expires).
    #[error("Ticket {id} cannot be issued as a token: {reason}")]
    Unsupported {
        /// The ticket id.
        id: String,
        /// Why.
        reason: String,
    },
}

impl TokenError {
    /// Creates an [`InvalidKey`](Self::InvalidKey) error.
    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey { message: message.into() }
    }

    /// Creates a [`Signing`](Self::Signing) error with a source.
    #[must_use]
    pub fn signing_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Signing { message: message.into(), source: Some(std::sync::Arc::new(source)) }
    }

    /// Creates an [`Unsupported`](Self::Unsupported) error.
    #[must_use]
    pub fn unsupported(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unsupported { id: id.into(), reason: reason.into() }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A numeric or duration setting is below its minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// The offending field.
        field: &'static str,
        /// The minimum accepted value.
        min: String,
        /// The configured value.
        value: String,
    },

    /// A setting is malformed.
    #[error("{field} is invalid: {reason}")]
    Invalid {
        /// The offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::error::Error;

    use ssobroker_tickets::TicketKind;

    use super::*;

    #[test]
    fn test_not_found_and_wrong_class_become_invalid_ticket() {
        let err: CasError = TicketError::not_found("ST-1").into();
        assert!(matches!(err, CasError::InvalidTicket { ref id } if id == "ST-1"));

        let err: CasError =
            TicketError::invalid_class("ST-1", TicketKind::TicketGranting, TicketKind::Service)
                .into();
        assert!(matches!(err, CasError::InvalidTicket { ref id } if id == "ST-1"));
    }

    #[test]
    fn test_outage_stays_a_registry_error() {
        let err: CasError = TicketError::unavailable("down").into();
        assert!(matches!(err, CasError::Registry(TicketError::Unavailable { .. })));
        assert!(err.is_transient());
        assert!(!CasError::invalid_ticket("ST-1").is_transient());
    }

    #[test]
    fn test_display() {
        assert_eq!(CasError::invalid_ticket("ST-1").to_string(), "Invalid ticket: ST-1");
        assert_eq!(
            CasError::unauthorized("svcC", DenialReason::ServiceDisabled).to_string(),
            "Service svcC is not authorized: service_disabled"
        );
        assert_eq!(
            CasError::mixed_principal("alice", "bob").to_string(),
            "Authentication for bob cannot renew the session of alice"
        );
        assert_eq!(
            ConfigError::BelowMinimum { field: "service_ticket.uses", min: "1".into(), value: "0".into() }
                .to_string(),
            "service_ticket.uses must be at least 1, got 0"
        );
    }

    #[test]
    fn test_registry_source_is_transparent() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err: CasError = TicketError::unavailable_with_source("write failed", io).into();
        assert_eq!(err.to_string(), "Ticket registry unavailable: write failed");
        assert_eq!(err.source().expect("source").to_string(), "reset by peer");
    }

    #[test]
    fn test_denial_codes() {
        assert_eq!(DenialReason::SsoNotAllowed.to_string(), "sso_not_allowed");
        assert_eq!(DenialReason::RequiredAttributeMissing.code(), "required_attribute_missing");
        assert_eq!(DenialReason::ProxyingNotAllowed.code(), "proxying_not_allowed");
    }
}
