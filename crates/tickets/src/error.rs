//! Ticket registry error types and result alias.
//!
//! Every [`TicketRegistry`](crate::TicketRegistry) implementation maps its
//! backend failures onto [`TicketError`], so callers can tell a missing
//! ticket apart from a backend that is temporarily unreachable.
//!
//! # Error Types
//!
//! - [`TicketError::NotFound`] - No ticket is stored under the id
//! - [`TicketError::InvalidTicketClass`] - A ticket exists but is of another kind
//! - [`TicketError::DuplicateTicketId`] - Insert collided with an existing id
//! - [`TicketError::Unavailable`] - Backend I/O failure (retryable)
//! - [`TicketError::Serialization`] - Stored record could not be encoded or decoded
//! - [`TicketError::Timeout`] - Backend call exceeded its time limit (retryable)
//!
//! # Example
//!
//! ```
//! use ssobroker_tickets::{TicketError, TicketResult};
//!
//! fn lookup(id: &str) -> TicketResult<()> {
//!     Err(TicketError::not_found(id))
//! }
//!
//! assert!(!lookup("ST-1").unwrap_err().is_transient());
//! ```

use std::sync::Arc;

use thiserror::Error;

use crate::ticket::TicketKind;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for ticket registry operations.
pub type TicketResult<T> = Result<T, TicketError>;

/// Errors produced by ticket registries.
///
/// # Non-exhaustive
///
/// New variants may be added without a semver-breaking change. Downstream
/// match expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TicketError {
    /// No ticket is stored under the requested id.
    #[error("Ticket not found: {id}")]
    NotFound {
        /// The ticket id that was looked up.
        id: String,
    },

    /// A ticket exists under the id but is not of the requested kind.
    #[error("Ticket {id} is a {actual}, expected {expected}")]
    InvalidTicketClass {
        /// The ticket id that was looked up.
        id: String,
        /// The kind the caller asked for.
        expected: TicketKind,
        /// The kind actually stored.
        actual: TicketKind,
    },

    /// An insert collided with an id that is already stored.
    #[error("Duplicate ticket id: {id}")]
    DuplicateTicketId {
        /// The colliding ticket id.
        id: String,
    },

    /// The registry backend could not be reached or failed internally.
    #[error("Ticket registry unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
        /// The underlying backend error.
        #[source]
        source: Option<BoxError>,
    },

    /// A stored ticket record could not be encoded or decoded.
    #[error("Ticket serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
        /// The underlying codec error.
        #[source]
        source: Option<BoxError>,
    },

    /// The registry call exceeded its time limit.
    #[error("Ticket registry operation timed out")]
    Timeout,
}

impl TicketError {
    /// Creates a new `NotFound` error for the given ticket id.
    #[must_use]
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates a new `InvalidTicketClass` error.
    #[must_use]
    pub fn invalid_class(id: impl Into<String>, expected: TicketKind, actual: TicketKind) -> Self {
        Self::InvalidTicketClass { id: id.into(), expected, actual }
    }

    /// Creates a new `DuplicateTicketId` error.
    #[must_use]
    pub fn duplicate(id: impl Into<String>) -> Self {
        Self::DuplicateTicketId { id: id.into() }
    }

    /// Creates a new `Unavailable` error with the given message.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable { message: message.into(), source: None }
    }

    /// Creates a new `Unavailable` error with a message and source error.
    #[must_use]
    pub fn unavailable_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Unavailable { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout() -> Self {
        Self::Timeout
    }

    /// Returns `true` when retrying the same call may succeed.
    ///
    /// Only backend availability failures are transient. A missing ticket,
    /// a kind mismatch, or an id collision will fail again on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout)
    }
}
