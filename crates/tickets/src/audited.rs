//! Audit-logging decorator for [`TicketRegistry`] implementations.
//!
//! Wraps any registry to emit an [`AuditEvent`] for every mutation, without
//! modifying the underlying registry. Reads pass through unaudited.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use crate::{
    audit::{AuditAction, AuditEvent, AuditLogger, AuditResult, ticket_resource},
    error::TicketResult,
    registry::{TicketPredicate, TicketRegistry, TicketStream},
    ticket::{Ticket, TicketKind},
};

/// Decorator that adds audit logging to any [`TicketRegistry`].
///
/// # Usage
///
/// ```no_run
/// use ssobroker_tickets::{AuditedTicketRegistry, MemoryTicketRegistry, audit::TracingAuditLogger};
///
/// let registry = AuditedTicketRegistry::new(MemoryTicketRegistry::new(), TracingAuditLogger, "broker");
/// ```
#[derive(Debug, Clone)]
pub struct AuditedTicketRegistry<R, L> {
    inner: R,
    logger: L,
    actor: Arc<str>,
}

impl<R, L> AuditedTicketRegistry<R, L>
where
    R: TicketRegistry,
    L: AuditLogger,
{
    /// Creates a new audited registry wrapping the given registry and logger.
    pub fn new(inner: R, logger: L, actor: impl Into<Arc<str>>) -> Self {
        Self { inner, logger, actor: actor.into() }
    }

    /// Returns a reference to the inner registry.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    async fn emit(
        &self,
        action: AuditAction,
        resource: String,
        result: AuditResult,
        metadata: HashMap<String, String>,
    ) {
        let event = AuditEvent::builder()
            .actor(self.actor.to_string())
            .action(action)
            .resource(resource)
            .result(result)
            .metadata(metadata)
            .build();
        self.logger.log(&event).await;
    }

    fn result_from<T>(res: &TicketResult<T>) -> AuditResult {
        match res {
            Ok(_) => AuditResult::Success,
            Err(e) => AuditResult::Failure(e.to_string()),
        }
    }
}

#[async_trait]
impl<R, L> TicketRegistry for AuditedTicketRegistry<R, L>
where
    R: TicketRegistry,
    L: AuditLogger,
{
    async fn add_ticket(&self, ticket: Ticket) -> TicketResult<()> {
        let resource = ticket_resource(ticket.kind(), ticket.id());
        let mut metadata = HashMap::new();
        if let Some(parent) = ticket.parent_id() {
            metadata.insert("parent".to_owned(), parent.to_owned());
        }
        if let Some(service) = ticket.service() {
            metadata.insert("service".to_owned(), service.to_owned());
        }

        let res = self.inner.add_ticket(ticket).await;
        self.emit(AuditAction::AddTicket, resource, Self::result_from(&res), metadata).await;
        res
    }

    async fn get_ticket(&self, id: &str, kind: TicketKind) -> TicketResult<Ticket> {
        self.inner.get_ticket(id, kind).await
    }

    async fn get_tickets(&self, predicate: TicketPredicate<'_>) -> TicketResult<TicketStream> {
        self.inner.get_tickets(predicate).await
    }

    async fn update_ticket(&self, ticket: &Ticket) -> TicketResult<()> {
        let res = self.inner.update_ticket(ticket).await;
        let mut metadata = HashMap::new();
        metadata.insert("count_of_uses".to_owned(), ticket.count_of_uses().to_string());
        self.emit(
            AuditAction::UpdateTicket,
            ticket_resource(ticket.kind(), ticket.id()),
            Self::result_from(&res),
            metadata,
        )
        .await;
        res
    }

    async fn update_ticket_if(
        &self,
        ticket: &Ticket,
        expected_count_of_uses: u64,
    ) -> TicketResult<bool> {
        let res = self.inner.update_ticket_if(ticket, expected_count_of_uses).await;
        let mut metadata = HashMap::from([
            ("count_of_uses".to_owned(), ticket.count_of_uses().to_string()),
            ("expected_count_of_uses".to_owned(), expected_count_of_uses.to_string()),
        ]);
        if let Ok(written) = res {
            metadata.insert("written".to_owned(), written.to_string());
        }
        self.emit(
            AuditAction::UpdateTicket,
            ticket_resource(ticket.kind(), ticket.id()),
            Self::result_from(&res),
            metadata,
        )
        .await;
        res
    }

    async fn delete_ticket(&self, id: &str) -> TicketResult<bool> {
        let res = self.inner.delete_ticket(id).await;
        let mut metadata = HashMap::new();
        if let Ok(removed) = res {
            metadata.insert("removed".to_owned(), removed.to_string());
        }
        let resource = match TicketKind::from_id(id) {
            Some(kind) => ticket_resource(kind, id),
            None => format!("id:{id}"),
        };
        self.emit(AuditAction::DeleteTicket, resource, Self::result_from(&res), metadata).await;
        res
    }

    async fn delete_all(&self) -> TicketResult<usize> {
        let res = self.inner.delete_all().await;
        let mut metadata = HashMap::new();
        if let Ok(count) = res {
            metadata.insert("count".to_owned(), count.to_string());
        }
        self.emit(
            AuditAction::DeleteAllTickets,
            "registry".to_owned(),
            Self::result_from(&res),
            metadata,
        )
        .await;
        res
    }

    async fn count(&self) -> TicketResult<usize> {
        self.inner.count().await
    }
}
