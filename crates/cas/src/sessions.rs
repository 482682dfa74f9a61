//! Single sign-on session reporting and administration.
//!
//! Lists live login and proxy sessions and destroys them one at a time or
//! in bulk, using only the [`CentralAuthenticationService`] contract.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ssobroker_tickets::{Attributes, Clock, Ticket};
use tracing::{info, warn};

use crate::{cas::CentralAuthenticationService, error::Result};

/// Which sessions an operation covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionFilter {
    /// Login and proxy sessions.
    #[default]
    All,
    /// Proxy sessions only.
    Proxied,
    /// Login sessions only.
    Direct,
}

impl SessionFilter {
    fn admits(self, is_proxied: bool) -> bool {
        match self {
            Self::All => true,
            Self::Proxied => is_proxied,
            Self::Direct => !is_proxied,
        }
    }
}

/// One live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsoSession {
    /// Session ticket id.
    pub ticket_granting_ticket: String,
    /// Principal id.
    pub principal: String,
    /// Principal attributes.
    pub attributes: Attributes,
    /// When the principal authenticated.
    pub authentication_date: DateTime<Utc>,
    /// Times the session has been used.
    pub number_of_uses: u64,
    /// The session is a proxy-granting ticket.
    pub is_proxied: bool,
    /// Ticket the proxy session was granted from.
    pub proxied_by: Option<String>,
    /// Services the session has issued tickets for.
    pub services: BTreeSet<String>,
}

impl SsoSession {
    fn from_ticket(ticket: &Ticket) -> Option<Self> {
        let granting = ticket.granting()?;
        let authentication = ticket.authentication();
        Some(Self {
            ticket_granting_ticket: ticket.id().to_owned(),
            principal: authentication.principal.id.clone(),
            attributes: authentication.principal.attributes.clone(),
            authentication_date: authentication.authentication_date,
            number_of_uses: ticket.count_of_uses(),
            is_proxied: granting.proxied_by.is_some(),
            proxied_by: granting.proxied_by.clone(),
            services: granting.services.keys().cloned().collect(),
        })
    }
}

/// Totals over the sessions matching a filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionsSummary {
    /// Login sessions.
    pub total_ticket_granting_tickets: usize,
    /// Proxy sessions.
    pub total_proxy_granting_tickets: usize,
    /// All sessions.
    pub total_tickets: usize,
    /// Distinct principals with a login session.
    pub unique_principals: usize,
    /// Sum of session use counts.
    pub total_usage_count: u64,
}

/// Outcome label for destroy operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DestroyStatus {
    /// Everything was removed.
    Success,
    /// At least one ticket could not be removed.
    Failure,
}

impl fmt::Display for DestroyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::Failure => write!(f, "FAILURE"),
        }
    }
}

/// Result of destroying one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDestruction {
    /// Session ticket id.
    pub ticket_granting_ticket: String,
    /// Overall status.
    pub status: DestroyStatus,
    /// Ticket ids removed.
    pub destroyed: Vec<String>,
    /// Ticket ids not removed, with the reason.
    pub failed: BTreeMap<String, String>,
}

/// Result of destroying every session matching a filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkDestruction {
    /// Overall status.
    pub status: DestroyStatus,
    /// Sessions fully destroyed.
    pub destroyed_sessions: Vec<String>,
    /// Sessions with failures, with the first reason.
    pub failed_sessions: BTreeMap<String, String>,
}

/// Reports on and destroys single sign-on sessions.
#[derive(Debug, Clone)]
pub struct SsoSessionsReport<S> {
    cas: S,
    clock: Arc<dyn Clock>,
}

impl<S: CentralAuthenticationService> SsoSessionsReport<S> {
    /// Creates a report over `cas`, judging expiry by `clock`.
    pub fn new(cas: S, clock: Arc<dyn Clock>) -> Self {
        Self { cas, clock }
    }

    /// Live sessions matching `filter`, ordered by ticket id.
    ///
    /// # Errors
    ///
    /// Returns [`CasError::Registry`](crate::CasError::Registry) on backend failure.
    #[tracing::instrument(skip(self))]
    pub async fn sessions(&self, filter: SessionFilter) -> Result<Vec<SsoSession>> {
        let now = self.clock.now();
        let stream = self
            .cas
            .get_tickets(&|ticket: &Ticket| ticket.kind().is_granting() && !ticket.is_expired(now))
            .await?;

        let mut sessions: Vec<SsoSession> = stream
            .filter_map(|ticket| SsoSession::from_ticket(&ticket))
            .filter(|session| filter.admits(session.is_proxied))
            .collect();
        sessions.sort_by(|a, b| a.ticket_granting_ticket.cmp(&b.ticket_granting_ticket));
        Ok(sessions)
    }

    /// Totals over live sessions matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`CasError::Registry`](crate::CasError::Registry) on backend failure.
    pub async fn summary(&self, filter: SessionFilter) -> Result<SessionsSummary> {
        let sessions = self.sessions(filter).await?;
        let proxied = sessions.iter().filter(|session| session.is_proxied).count();
        let principals: BTreeSet<&str> = sessions
            .iter()
            .filter(|session| !session.is_proxied)
            .map(|session| session.principal.as_str())
            .collect();

        Ok(SessionsSummary {
            total_ticket_granting_tickets: sessions.len() - proxied,
            total_proxy_granting_tickets: proxied,
            total_tickets: sessions.len(),
            unique_principals: principals.len(),
            total_usage_count: sessions.iter().map(|session| session.number_of_uses).sum(),
        })
    }

    /// Destroys one session and its descendants.
    ///
    /// Registry failures are reported in the result, never returned.
    #[tracing::instrument(skip(self))]
    pub async fn destroy_session(&self, ticket_granting_ticket_id: &str) -> SessionDestruction {
        let mut destruction = SessionDestruction {
            ticket_granting_ticket: ticket_granting_ticket_id.to_owned(),
            status: DestroyStatus::Success,
            destroyed: Vec::new(),
            failed: BTreeMap::new(),
        };
        match self.cas.destroy_ticket_granting_ticket(ticket_granting_ticket_id).await {
            Ok(outcome) => {
                destruction.destroyed = outcome.destroyed;
                for (id, err) in outcome.failures {
                    destruction.failed.entry(id).or_insert_with(|| err.to_string());
                }
            },
            Err(err) => {
                warn!(error = %err, "Failed to destroy session");
                destruction.failed.insert(ticket_granting_ticket_id.to_owned(), err.to_string());
            },
        }
        if !destruction.failed.is_empty() {
            destruction.status = DestroyStatus::Failure;
        }
        destruction
    }

    /// Destroys every live session matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`CasError::Registry`](crate::CasError::Registry) if the
    /// sessions cannot be listed. Failures on individual sessions are
    /// reported in the result.
    #[tracing::instrument(skip(self))]
    pub async fn destroy_sessions(&self, filter: SessionFilter) -> Result<BulkDestruction> {
        let mut bulk = BulkDestruction {
            status: DestroyStatus::Success,
            destroyed_sessions: Vec::new(),
            failed_sessions: BTreeMap::new(),
        };
        for session in self.sessions(filter).await? {
            let destruction = self.destroy_session(&session.ticket_granting_ticket).await;
            match destruction.failed.into_iter().next() {
                None => bulk.destroyed_sessions.push(destruction.ticket_granting_ticket),
                Some((_, reason)) => {
                    bulk.failed_sessions.insert(destruction.ticket_granting_ticket, reason);
                },
            }
        }
        if !bulk.failed_sessions.is_empty() {
            bulk.status = DestroyStatus::Failure;
        }
        info!(
            destroyed = bulk.destroyed_sessions.len(),
            failed = bulk.failed_sessions.len(),
            "Sessions destroyed"
        );
        Ok(bulk)
    }
}
