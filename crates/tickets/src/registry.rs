//! Ticket registry trait definition.
//!
//! [`TicketRegistry`] is the storage boundary for tickets. The orchestrator
//! only ever talks to this trait, so the same issuance and validation logic
//! runs against the in-process [`MemoryTicketRegistry`](crate::MemoryTicketRegistry)
//! or any distributed backend that maps its records onto [`Ticket`].
//!
//! # Implementing a Registry
//!
//! 1. Implement [`TicketRegistry`]
//! 2. Map backend failures to [`TicketError`](crate::TicketError), keeping
//!    [`Unavailable`](crate::TicketError::Unavailable) for I/O errors so
//!    callers can retry
//! 3. Make [`delete_ticket`](TicketRegistry::delete_ticket) atomic per id
//! 4. Run the [`conformance`](crate::conformance) suite against it

use async_trait::async_trait;

use crate::{
    error::TicketResult,
    ticket::{Ticket, TicketKind},
};

/// Caller-supplied filter for [`TicketRegistry::get_tickets`].
pub type TicketPredicate<'a> = &'a (dyn Fn(&Ticket) -> bool + Send + Sync);

/// A finite snapshot of tickets taken at the time of the call.
///
/// Later registry mutations do not show up in a stream that was already
/// returned.
#[derive(Debug, Default)]
pub struct TicketStream {
    inner: std::vec::IntoIter<Ticket>,
}

impl TicketStream {
    /// Number of tickets left in the stream.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.inner.len()
    }
}

impl From<Vec<Ticket>> for TicketStream {
    fn from(tickets: Vec<Ticket>) -> Self {
        Self { inner: tickets.into_iter() }
    }
}

impl Iterator for TicketStream {
    type Item = Ticket;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for TicketStream {}

/// Storage for tickets of every kind.
///
/// Implementations must be thread-safe and allow concurrent calls from
/// independent tasks. They do not guarantee atomicity across tickets;
/// check-and-mint sequences are the orchestrator's job.
///
/// # Key Operations
///
/// | Method | Description |
/// |--------|-------------|
/// | [`add_ticket`](TicketRegistry::add_ticket) | Insert a new ticket |
/// | [`get_ticket`](TicketRegistry::get_ticket) | Fetch a ticket by id and kind |
/// | [`get_tickets`](TicketRegistry::get_tickets) | Snapshot of tickets matching a filter |
/// | [`update_ticket`](TicketRegistry::update_ticket) | Persist mutations of a stored ticket |
/// | [`update_ticket_if`](TicketRegistry::update_ticket_if) | Persist only if the use count is unchanged |
/// | [`delete_ticket`](TicketRegistry::delete_ticket) | Remove one ticket, atomically per id |
/// | [`delete_all`](TicketRegistry::delete_all) | Remove every ticket |
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use chrono::Utc;
/// use ssobroker_tickets::{
///     Authentication, ExpirationPolicy, MemoryTicketRegistry, Principal, Ticket, TicketKind,
///     TicketRegistry,
/// };
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let registry = MemoryTicketRegistry::new();
/// let authn = Arc::new(
///     Authentication::builder().principal(Principal::builder().id("alice").build()).build(),
/// );
/// let tgt = Ticket::ticket_granting("TGT-1", authn, ExpirationPolicy::NeverExpires, Utc::now());
///
/// registry.add_ticket(tgt).await.unwrap();
/// let fetched = registry.get_ticket("TGT-1", TicketKind::TicketGranting).await.unwrap();
/// assert_eq!(fetched.id(), "TGT-1");
/// assert!(registry.delete_ticket("TGT-1").await.unwrap());
/// assert!(!registry.delete_ticket("TGT-1").await.unwrap());
/// # });
/// ```
#[async_trait]
pub trait TicketRegistry: Send + Sync {
    /// Inserts a new ticket.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateTicketId`](crate::TicketError::DuplicateTicketId)
    /// if a ticket with the same id is already stored.
    #[must_use = "registry operations may fail and errors must be handled"]
    async fn add_ticket(&self, ticket: Ticket) -> TicketResult<()>;

    /// Fetches a ticket by id, requiring it to be of `kind`.
    ///
    /// Expired tickets are returned as stored; callers decide whether an
    /// expired ticket is an error.
    ///
    /// # Errors
    ///
    /// Returns [`NotFound`](crate::TicketError::NotFound) if the id is not
    /// stored and [`InvalidTicketClass`](crate::TicketError::InvalidTicketClass)
    /// if it is stored under another kind.
    #[must_use = "registry operations may fail and errors must be handled"]
    async fn get_ticket(&self, id: &str, kind: TicketKind) -> TicketResult<Ticket>;

    /// Returns a snapshot of every stored ticket matching `predicate`.
    #[must_use = "registry operations may fail and errors must be handled"]
    async fn get_tickets(&self, predicate: TicketPredicate<'_>) -> TicketResult<TicketStream>;

    /// Persists the mutable state of a stored ticket.
    ///
    /// # Errors
    ///
    /// Returns [`NotFound`](crate::TicketError::NotFound) if the ticket was
    /// deleted in the meantime. A deleted ticket is never brought back.
    #[must_use = "registry operations may fail and errors must be handled"]
    async fn update_ticket(&self, ticket: &Ticket) -> TicketResult<()>;

    /// Persists `ticket` only if the stored copy still has
    /// `expected_count_of_uses` uses.
    ///
    /// The comparison and the write are atomic per id. Returns `false` when
    /// the stored count differs, meaning another caller recorded a use
    /// first; the caller re-reads and decides again.
    ///
    /// # Errors
    ///
    /// Returns [`NotFound`](crate::TicketError::NotFound) if the ticket was
    /// deleted in the meantime.
    #[must_use = "registry operations may fail and errors must be handled"]
    async fn update_ticket_if(
        &self,
        ticket: &Ticket,
        expected_count_of_uses: u64,
    ) -> TicketResult<bool>;

    /// Removes a ticket.
    ///
    /// Atomic per id: when several callers delete the same id concurrently,
    /// exactly one observes `true`. Deleting an absent id returns `false`.
    #[must_use = "registry operations may fail and errors must be handled"]
    async fn delete_ticket(&self, id: &str) -> TicketResult<bool>;

    /// Removes every ticket, returning how many were removed.
    #[must_use = "registry operations may fail and errors must be handled"]
    async fn delete_all(&self) -> TicketResult<usize>;

    /// Number of stored tickets, expired ones included.
    #[must_use = "registry operations may fail and errors must be handled"]
    async fn count(&self) -> TicketResult<usize>;

    /// Returns every stored ticket of `kind`.
    async fn get_tickets_by_kind(&self, kind: TicketKind) -> TicketResult<TicketStream> {
        self.get_tickets(&move |ticket: &Ticket| ticket.kind() == kind).await
    }

    /// Returns every stored ticket whose parent is `parent_id`.
    async fn children_of(&self, parent_id: &str) -> TicketResult<TicketStream> {
        self.get_tickets(&|ticket: &Ticket| ticket.parent_id() == Some(parent_id)).await
    }
}

#[async_trait]
impl<R: TicketRegistry + ?Sized> TicketRegistry for std::sync::Arc<R> {
    async fn add_ticket(&self, ticket: Ticket) -> TicketResult<()> {
        (**self).add_ticket(ticket).await
    }

    async fn get_ticket(&self, id: &str, kind: TicketKind) -> TicketResult<Ticket> {
        (**self).get_ticket(id, kind).await
    }

    async fn get_tickets(&self, predicate: TicketPredicate<'_>) -> TicketResult<TicketStream> {
        (**self).get_tickets(predicate).await
    }

    async fn update_ticket(&self, ticket: &Ticket) -> TicketResult<()> {
        (**self).update_ticket(ticket).await
    }

    async fn update_ticket_if(
        &self,
        ticket: &Ticket,
        expected_count_of_uses: u64,
    ) -> TicketResult<bool> {
        (**self).update_ticket_if(ticket, expected_count_of_uses).await
    }

    async fn delete_ticket(&self, id: &str) -> TicketResult<bool> {
        (**self).delete_ticket(id).await
    }

    async fn delete_all(&self) -> TicketResult<usize> {
        (**self).delete_all().await
    }

    async fn count(&self) -> TicketResult<usize> {
        (**self).count().await
    }
}
