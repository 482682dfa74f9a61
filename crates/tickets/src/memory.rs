//! In-memory ticket registry.
//!
//! [`MemoryTicketRegistry`] keeps every ticket in a `HashMap` behind a
//! [`parking_lot::RwLock`]. It is the reference implementation of
//! [`TicketRegistry`] and the backend used by tests and single-node
//! deployments.
//!
//! # Features
//!
//! - **Thread-safe**: one lock per registry, never held across an `.await`
//! - **Atomic delete**: removal and the `bool` result come from a single
//!   `HashMap::remove` under the write lock
//! - **Optional sweeper**: a background task can drop expired tickets on an
//!   interval; lookups stay correct without it
//!
//! # Limitations
//!
//! - Tickets are lost when the process exits
//! - No replication between broker nodes

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::{select, sync::watch, time::sleep};

use crate::{
    clock::Clock,
    error::{TicketError, TicketResult},
    registry::{TicketPredicate, TicketRegistry, TicketStream},
    ticket::{Ticket, TicketKind},
};

/// Holds the shutdown signal sender. When dropped, the watch channel
/// closes and the sweeper task exits.
#[derive(Debug)]
struct ShutdownGuard {
    shutdown_tx: watch::Sender<()>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        // Best-effort signal; the receiver may already be gone.
        let _ = self.shutdown_tx.send(());
    }
}

type TicketMap = Arc<RwLock<HashMap<String, Ticket>>>;

/// In-memory ticket registry.
///
/// # Cloning
///
/// Clones share the same ticket map. The sweeper, when started, stops once
/// every clone is dropped or [`shutdown`](Self::shutdown) is called.
#[derive(Clone, Debug, Default)]
pub struct MemoryTicketRegistry {
    tickets: TicketMap,
    shutdown_guard: Option<Arc<ShutdownGuard>>,
}

impl MemoryTicketRegistry {
    /// Creates an empty registry without a sweeper.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry and spawns a task that removes expired
    /// tickets every `interval`, reading the time from `clock`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_sweeper(clock: Arc<dyn Clock>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let registry = Self {
            tickets: TicketMap::default(),
            shutdown_guard: Some(Arc::new(ShutdownGuard { shutdown_tx })),
        };

        // The task holds the map only, so dropping the last registry handle
        // drops the guard and stops it.
        let tickets = Arc::clone(&registry.tickets);
        tokio::spawn(async move {
            sweep_loop(tickets, clock, interval, shutdown_rx).await;
        });

        registry
    }

    /// Removes every ticket that is expired at `clock.now()`.
    ///
    /// Returns the number of tickets removed.
    pub fn sweep_expired(&self, clock: &dyn Clock) -> usize {
        sweep_once(&self.tickets, clock)
    }

    /// Signals the sweeper task to stop. No-op without a sweeper.
    pub fn shutdown(&self) {
        if let Some(guard) = &self.shutdown_guard {
            let _ = guard.shutdown_tx.send(());
        }
    }
}

async fn sweep_loop(
    tickets: TicketMap,
    clock: Arc<dyn Clock>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<()>,
) {
    loop {
        select! {
            () = sleep(interval) => {}
            _ = shutdown_rx.changed() => {
                return;
            }
        }

        let removed = sweep_once(&tickets, clock.as_ref());
        if removed > 0 {
            tracing::debug!(removed, "Swept expired tickets");
        }
    }
}

fn sweep_once(tickets: &TicketMap, clock: &dyn Clock) -> usize {
    let now = clock.now();

    // Scan under the read lock, then remove in one short write section.
    let expired: Vec<String> = {
        let guard = tickets.read();
        guard.values().filter(|ticket| ticket.is_expired(now)).map(|t| t.id().to_owned()).collect()
    };

    if expired.is_empty() {
        return 0;
    }

    let mut guard = tickets.write();
    let mut removed = 0;
    for id in expired {
        // The ticket may have been updated between the scan and this lock.
        if guard.get(&id).is_some_and(|ticket| ticket.is_expired(now)) {
            guard.remove(&id);
            removed += 1;
        }
    }
    removed
}

#[async_trait]
impl TicketRegistry for MemoryTicketRegistry {
    #[tracing::instrument(skip(self, ticket), fields(ticket_id = %ticket.id(), kind = %ticket.kind()))]
    async fn add_ticket(&self, ticket: Ticket) -> TicketResult<()> {
        let mut tickets = self.tickets.write();
        if tickets.contains_key(ticket.id()) {
            return Err(TicketError::duplicate(ticket.id()));
        }
        tickets.insert(ticket.id().to_owned(), ticket);
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn get_ticket(&self, id: &str, kind: TicketKind) -> TicketResult<Ticket> {
        let tickets = self.tickets.read();
        let ticket = tickets.get(id).ok_or_else(|| TicketError::not_found(id))?;
        if ticket.kind() != kind {
            return Err(TicketError::invalid_class(id, kind, ticket.kind()));
        }
        Ok(ticket.clone())
    }

    #[tracing::instrument(skip(self, predicate))]
    async fn get_tickets(&self, predicate: TicketPredicate<'_>) -> TicketResult<TicketStream> {
        let tickets = self.tickets.read();
        let matching: Vec<Ticket> =
            tickets.values().filter(|ticket| predicate(ticket)).cloned().collect();
        Ok(TicketStream::from(matching))
    }

    #[tracing::instrument(skip(self, ticket), fields(ticket_id = %ticket.id()))]
    async fn update_ticket(&self, ticket: &Ticket) -> TicketResult<()> {
        let mut tickets = self.tickets.write();
        match tickets.get_mut(ticket.id()) {
            Some(stored) => {
                *stored = ticket.clone();
                Ok(())
            },
            None => Err(TicketError::not_found(ticket.id())),
        }
    }

    #[tracing::instrument(skip(self, ticket), fields(ticket_id = %ticket.id()))]
    async fn update_ticket_if(
        &self,
        ticket: &Ticket,
        expected_count_of_uses: u64,
    ) -> TicketResult<bool> {
        let mut tickets = self.tickets.write();
        let stored = tickets.get_mut(ticket.id()).ok_or_else(|| TicketError::not_found(ticket.id()))?;
        if stored.count_of_uses() != expected_count_of_uses {
            return Ok(false);
        }
        *stored = ticket.clone();
        Ok(true)
    }

    #[tracing::instrument(skip(self))]
    async fn delete_ticket(&self, id: &str) -> TicketResult<bool> {
        Ok(self.tickets.write().remove(id).is_some())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_all(&self) -> TicketResult<usize> {
        let mut tickets = self.tickets.write();
        let count = tickets.len();
        tickets.clear();
        Ok(count)
    }

    #[tracing::instrument(skip(self))]
    async fn count(&self) -> TicketResult<usize> {
        Ok(self.tickets.read().len())
    }
}
