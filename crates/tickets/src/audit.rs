//! Audit logging for ticket lifecycle operations.
//!
//! Every issuance, validation, access decision, and revocation is recorded
//! as an [`AuditEvent`] so operators can reconstruct who obtained access to
//! which service, and when.
//!
//! # Architecture
//!
//! The [`AuditLogger`] trait enables different audit backends:
//!
//! - [`TracingAuditLogger`]: Emits structured `tracing` events at INFO, suitable for log
//!   aggregation and SIEM integration.
//! - [`NoopAuditLogger`]: Discards events.
//! - Custom implementations can write to databases or external audit services.
//!
//! # Usage
//!
//! ```no_run
//! use ssobroker_tickets::audit::{
//!     AuditAction, AuditEvent, AuditLogger, AuditResult, TracingAuditLogger,
//! };
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let logger = TracingAuditLogger;
//! let event = AuditEvent::builder()
//!     .actor("alice")
//!     .action(AuditAction::GrantServiceTicket)
//!     .resource("https://mail.example.org")
//!     .result(AuditResult::Success)
//!     .build();
//! logger.log(&event).await;
//! # });
//! ```

use std::{collections::HashMap, fmt};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::ticket::TicketKind;

/// Action performed on a ticket or by the broker on a principal's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    /// A ticket was inserted into the registry.
    AddTicket,
    /// A stored ticket's usage state was written back.
    UpdateTicket,
    /// A ticket was removed from the registry.
    DeleteTicket,
    /// Every ticket was removed from the registry.
    DeleteAllTickets,
    /// A login session was created.
    CreateTicketGrantingTicket,
    /// A service ticket was issued.
    GrantServiceTicket,
    /// A service or proxy ticket was validated.
    ValidateServiceTicket,
    /// A proxy-granting ticket was issued.
    CreateProxyGrantingTicket,
    /// A proxy ticket was issued.
    GrantProxyTicket,
    /// A login session and its descendants were destroyed.
    DestroyTicketGrantingTicket,
    /// The access strategy evaluated a service request.
    EvaluateAccess,
    /// An OAuth access token was issued.
    GrantAccessToken,
    /// An OAuth token was introspected.
    IntrospectToken,
    /// A SAML artifact was stored.
    IssueSamlArtifact,
    /// A SAML artifact was redeemed.
    ResolveSamlArtifact,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddTicket => write!(f, "add_ticket"),
            Self::UpdateTicket => write!(f, "update_ticket"),
            Self::DeleteTicket => write!(f, "delete_ticket"),
            Self::DeleteAllTickets => write!(f, "delete_all_tickets"),
            Self::CreateTicketGrantingTicket => write!(f, "create_ticket_granting_ticket"),
            Self::GrantServiceTicket => write!(f, "grant_service_ticket"),
            Self::ValidateServiceTicket => write!(f, "validate_service_ticket"),
            Self::CreateProxyGrantingTicket => write!(f, "create_proxy_granting_ticket"),
            Self::GrantProxyTicket => write!(f, "grant_proxy_ticket"),
            Self::DestroyTicketGrantingTicket => write!(f, "destroy_ticket_granting_ticket"),
            Self::EvaluateAccess => write!(f, "evaluate_access"),
            Self::GrantAccessToken => write!(f, "grant_access_token"),
            Self::IntrospectToken => write!(f, "introspect_token"),
            Self::IssueSamlArtifact => write!(f, "issue_saml_artifact"),
            Self::ResolveSamlArtifact => write!(f, "resolve_saml_artifact"),
        }
    }
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditResult {
    /// Operation completed successfully.
    Success,
    /// Operation failed with the given reason.
    Failure(String),
}

impl fmt::Display for AuditResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure(reason) => write!(f, "failure: {reason}"),
        }
    }
}

/// Structured audit event.
///
/// Each event captures who performed an action, what was affected, when it
/// happened, and whether it succeeded.
#[derive(Debug, Clone, bon::Builder)]
pub struct AuditEvent {
    /// When the event occurred (defaults to now).
    #[builder(default = Utc::now())]
    pub timestamp: DateTime<Utc>,
    /// Principal or component that performed the operation.
    #[builder(into)]
    pub actor: String,
    /// The action that was performed.
    pub action: AuditAction,
    /// Resource identifier (e.g., "kind:ServiceTicket/id:ST-1-…").
    #[builder(into)]
    pub resource: String,
    /// Outcome of the operation.
    pub result: AuditResult,
    /// Additional context (e.g., service, denial reason, descendant count).
    #[builder(default)]
    pub metadata: HashMap<String, String>,
}

/// Trait for audit log backends.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    /// Records an audit event.
    async fn log(&self, event: &AuditEvent);
}

#[async_trait]
impl<L: AuditLogger> AuditLogger for std::sync::Arc<L> {
    async fn log(&self, event: &AuditEvent) {
        (**self).log(event).await;
    }
}

/// Audit logger that emits structured `tracing` events.
///
/// Field mapping:
/// - `audit.timestamp` - RFC 3339 timestamp
/// - `audit.actor` - who performed the action
/// - `audit.action` - the operation (e.g., "grant_service_ticket")
/// - `audit.resource` - what was affected
/// - `audit.result` - "success" or "failure: ..."
/// - `audit.metadata` - additional context as `k=v` pairs
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(&self, event: &AuditEvent) {
        let mut pairs: Vec<String> =
            event.metadata.iter().map(|(k, v)| format!("{k}={v}")).collect();
        pairs.sort();
        let metadata_str = pairs.join(", ");

        tracing::info!(
            audit.timestamp = %event.timestamp.to_rfc3339(),
            audit.actor = %event.actor,
            audit.action = %event.action,
            audit.resource = %event.resource,
            audit.result = %event.result,
            audit.metadata = %metadata_str,
            "audit_event"
        );
    }
}

/// No-op audit logger for tests and deployments without an audit trail.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditLogger;

#[async_trait]
impl AuditLogger for NoopAuditLogger {
    async fn log(&self, _event: &AuditEvent) {}
}

/// Constructs a resource identifier string from a ticket kind and id.
pub fn ticket_resource(kind: TicketKind, id: &str) -> String {
    format!("kind:{kind}/id:{id}")
}

/// Records audit events in memory, for assertions in tests.
#[cfg(any(test, feature = "testutil"))]
#[derive(Debug, Clone, Default)]
pub struct RecordingAuditLogger {
    events: std::sync::Arc<parking_lot::Mutex<Vec<AuditEvent>>>,
}

#[cfg(any(test, feature = "testutil"))]
impl RecordingAuditLogger {
    /// Snapshot of the events logged so far.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Actions logged so far, in order.
    pub fn actions(&self) -> Vec<AuditAction> {
        self.events.lock().iter().map(|event| event.action).collect()
    }
}

#[cfg(any(test, feature = "testutil"))]
#[async_trait]
impl AuditLogger for RecordingAuditLogger {
    async fn log(&self, event: &AuditEvent) {
        self.events.lock().push(event.clone());
    }
}
