//! Ticket id generation.
//!
//! Ids look like `ST-42-Xb3…q9-node1`: the kind prefix, a process-wide
//! sequence number, a random alphanumeric block, and a node suffix that
//! keeps ids from different broker nodes apart.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::{Rng, distributions::Alphanumeric};

use crate::ticket::TicketKind;

/// Length of the random block inside generated ids and handles.
pub const RANDOM_PART_LEN: usize = 32;

/// Suffix used when no node suffix is configured.
pub const DEFAULT_SUFFIX: &str = "sso";

/// Generates globally unique, kind-prefixed ticket ids.
#[derive(Debug)]
pub struct TicketIdGenerator {
    counter: AtomicU64,
    suffix: String,
}

impl TicketIdGenerator {
    /// Creates a generator that appends `suffix` to every id.
    ///
    /// An empty suffix falls back to [`DEFAULT_SUFFIX`].
    #[must_use]
    pub fn new(suffix: impl Into<String>) -> Self {
        let suffix = suffix.into();
        let suffix = if suffix.is_empty() { DEFAULT_SUFFIX.to_owned() } else { suffix };
        Self { counter: AtomicU64::new(1), suffix }
    }

    /// Returns a fresh id for a ticket of the given kind.
    pub fn next_id(&self, kind: TicketKind) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{seq}-{}-{}", kind.prefix(), random_handle(), self.suffix)
    }
}

impl Default for TicketIdGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_SUFFIX)
    }
}

/// Returns a random alphanumeric string of [`RANDOM_PART_LEN`] characters.
pub fn random_handle() -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(RANDOM_PART_LEN).map(char::from).collect()
}
