//! Persisted ticket record codec.
//!
//! Distributed registries cannot share memory with the broker, so they
//! store each ticket as an encoded [`PersistedTicket`]. The record repeats
//! the fields a backend needs for indexing (kind, parent, service,
//! authentication handle) next to the full ticket body.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{TicketError, TicketResult},
    expiration::ExpirationPolicy,
    ticket::{Ticket, TicketKind},
};

/// Wire record for one stored ticket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedTicket {
    /// Ticket id.
    pub id: String,
    /// Kind discriminator.
    pub kind: TicketKind,
    /// Creation timestamp.
    pub creation_time: DateTime<Utc>,
    /// Last-use timestamp.
    pub last_time_used: DateTime<Utc>,
    /// Use count.
    pub count_of_uses: u64,
    /// Id of the issuing ticket, if any.
    pub parent_id: Option<String>,
    /// Bound service or client, if any.
    pub service: Option<String>,
    /// Handle of the shared authentication record.
    pub authentication_handle: String,
    /// Expiration policy.
    pub expiration_policy: ExpirationPolicy,
    /// The complete ticket.
    pub ticket: Ticket,
}

impl From<&Ticket> for PersistedTicket {
    fn from(ticket: &Ticket) -> Self {
        Self {
            id: ticket.id().to_owned(),
            kind: ticket.kind(),
            creation_time: ticket.creation_time(),
            last_time_used: ticket.last_time_used(),
            count_of_uses: ticket.count_of_uses(),
            parent_id: ticket.parent_id().map(str::to_owned),
            service: ticket.service().map(str::to_owned),
            authentication_handle: ticket.authentication().handle.clone(),
            expiration_policy: *ticket.expiration_policy(),
            ticket: ticket.clone(),
        }
    }
}

/// Encodes a ticket into its persisted form.
///
/// # Errors
///
/// Returns [`TicketError::Serialization`] if JSON encoding fails.
pub fn encode(ticket: &Ticket) -> TicketResult<Bytes> {
    let record = PersistedTicket::from(ticket);
    serde_json::to_vec(&record)
        .map(Bytes::from)
        .map_err(|e| TicketError::serialization_with_source("failed to encode ticket", e))
}

/// Decodes a persisted record back into a ticket.
///
/// # Errors
///
/// Returns [`TicketError::Serialization`] if the bytes are not a valid
/// record or the index fields disagree with the ticket body.
pub fn decode(bytes: &[u8]) -> TicketResult<Ticket> {
    let record: PersistedTicket = serde_json::from_slice(bytes)
        .map_err(|e| TicketError::serialization_with_source("failed to decode ticket", e))?;

    if record.id != record.ticket.id() || record.kind != record.ticket.kind() {
        return Err(TicketError::serialization(format!(
            "record header {} ({}) does not match body {} ({})",
            record.id,
            record.kind,
            record.ticket.id(),
            record.ticket.kind()
        )));
    }
    Ok(record.ticket)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::{
        assert_ticket_error,
        testutil::{alice, service_ticket_for},
    };

    #[test]
    fn test_record_carries_index_fields() {
        let authn = alice();
        let st = service_ticket_for("ST-1", "TGT-1", "https://svc-a.example.org", authn.clone());
        let record = PersistedTicket::from(&st);

        assert_eq!(record.kind, TicketKind::Service);
        assert_eq!(record.parent_id.as_deref(), Some("TGT-1"));
        assert_eq!(record.service.as_deref(), Some("https://svc-a.example.org"));
        assert_eq!(record.authentication_handle, authn.handle);
    }

    #[test]
    fn test_decode_restores_ticket() {
        let st = service_ticket_for("ST-1", "TGT-1", "svc", alice());
        let bytes = encode(&st).unwrap();
        assert_eq!(decode(&bytes).unwrap(), st);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_ticket_error!(decode(b"not json"), Serialization { .. });
    }

    #[test]
    fn test_decode_rejects_mismatched_header() {
        let st = service_ticket_for("ST-1", "TGT-1", "svc", alice());
        let mut record = PersistedTicket::from(&st);
        record.id = "ST-2".to_owned();
        let bytes = serde_json::to_vec(&record).unwrap();

        assert_ticket_error!(decode(&bytes), Serialization { .. });
    }
}
