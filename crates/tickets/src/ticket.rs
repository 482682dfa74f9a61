//! Ticket model.
//!
//! A [`Ticket`] carries the fields every kind shares (id, timestamps, use
//! count, expiration policy, authentication) plus a kind-specific
//! [`TicketPayload`]. The payload is a tagged variant, so registries key
//! tickets by id and kind tag rather than by runtime type.
//!
//! # Ticket Graph
//!
//! ```text
//! TicketGrantingTicket ──┬──► ServiceTicket
//!                        ├──► AccessToken / RefreshToken / SamlArtifact
//!                        └──► ProxyGrantingTicket ──► ProxyTicket
//! ```
//!
//! Children hold the id of their granting ticket, never a pointer to it.
//! Granting tickets record the ids of everything they issued so logout can
//! walk the forest from the root.

use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{authentication::Authentication, expiration::ExpirationPolicy};

/// Discriminator for the ticket variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TicketKind {
    /// Login session ticket (TGT).
    TicketGranting,
    /// Single-use credential for one relying service (ST).
    Service,
    /// Session ticket held by a proxying back-end service (PGT).
    ProxyGranting,
    /// Single-use credential minted from a PGT (PT).
    Proxy,
    /// OAuth bearer access token.
    AccessToken,
    /// OAuth refresh token.
    RefreshToken,
    /// SAML artifact holding a pre-built protocol response.
    SamlArtifact,
}

impl TicketKind {
    /// All ticket kinds.
    pub const ALL: [TicketKind; 7] = [
        Self::TicketGranting,
        Self::Service,
        Self::ProxyGranting,
        Self::Proxy,
        Self::AccessToken,
        Self::RefreshToken,
        Self::SamlArtifact,
    ];

    /// Id prefix for tickets of this kind.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::TicketGranting => "TGT",
            Self::Service => "ST",
            Self::ProxyGranting => "PGT",
            Self::Proxy => "PT",
            Self::AccessToken => "AT",
            Self::RefreshToken => "RT",
            Self::SamlArtifact => "SART",
        }
    }

    /// Infers the kind from an id's prefix.
    #[must_use]
    pub fn from_id(id: &str) -> Option<Self> {
        let prefix = id.split('-').next()?;
        Self::ALL.into_iter().find(|kind| kind.prefix() == prefix)
    }

    /// Returns `true` for kinds that can issue child tickets.
    #[must_use]
    pub const fn is_granting(self) -> bool {
        matches!(self, Self::TicketGranting | Self::ProxyGranting)
    }

    /// Returns `true` for kinds redeemed through service validation.
    #[must_use]
    pub const fn is_service(self) -> bool {
        matches!(self, Self::Service | Self::Proxy)
    }
}

impl fmt::Display for TicketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TicketGranting => write!(f, "TicketGrantingTicket"),
            Self::Service => write!(f, "ServiceTicket"),
            Self::ProxyGranting => write!(f, "ProxyGrantingTicket"),
            Self::Proxy => write!(f, "ProxyTicket"),
            Self::AccessToken => write!(f, "AccessToken"),
            Self::RefreshToken => write!(f, "RefreshToken"),
            Self::SamlArtifact => write!(f, "SamlArtifactTicket"),
        }
    }
}

/// State owned by ticket-granting and proxy-granting tickets.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GrantingState {
    /// Relying-service identifier mapped to the service ticket issued for it.
    #[serde(default)]
    pub services: HashMap<String, String>,

    /// Proxy-granting tickets issued from this session, mapped to the
    /// service that holds each one.
    #[serde(default)]
    pub proxy_granting_tickets: HashMap<String, String>,

    /// Other tickets chained to this session (access tokens, artifacts).
    #[serde(default)]
    pub descendant_tickets: BTreeSet<String>,

    /// Id of the granting ticket that authorized proxying, `None` for a
    /// root login session.
    pub proxied_by: Option<String>,

    /// Service that holds this proxy-granting ticket.
    pub proxy_service: Option<String>,

    /// Every authentication that contributed to the session, oldest first.
    #[serde(default)]
    pub chained_authentications: Vec<Arc<Authentication>>,
}

impl GrantingState {
    /// State for a root login session.
    #[must_use]
    pub fn root(authentication: Arc<Authentication>) -> Self {
        Self { chained_authentications: vec![authentication], ..Self::default() }
    }

    /// State for a proxy-granting ticket.
    ///
    /// The chain is the parent session's chain followed by the proxy's own
    /// authentication.
    #[must_use]
    pub fn proxied(
        proxied_by: impl Into<String>,
        proxy_service: impl Into<String>,
        mut chain: Vec<Arc<Authentication>>,
        proxy_authentication: Arc<Authentication>,
    ) -> Self {
        chain.push(proxy_authentication);
        Self {
            proxied_by: Some(proxied_by.into()),
            proxy_service: Some(proxy_service.into()),
            chained_authentications: chain,
            ..Self::default()
        }
    }

    /// Ids of every child recorded on this granting ticket.
    #[must_use]
    pub fn child_ids(&self) -> BTreeSet<String> {
        self.services
            .values()
            .chain(self.proxy_granting_tickets.keys())
            .chain(self.descendant_tickets.iter())
            .cloned()
            .collect()
    }
}

/// State owned by service and proxy tickets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceState {
    /// Relying service the ticket is bound to.
    pub service: String,
    /// Id of the granting ticket that issued it.
    pub granting_ticket: String,
    /// Whether the ticket was issued straight from a fresh login.
    pub from_new_login: bool,
}

/// State owned by OAuth access and refresh tokens.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenState {
    /// OAuth client identifier.
    pub service: String,
    /// Granted scopes.
    #[serde(default)]
    pub scopes: BTreeSet<String>,
    /// Id of the granting ticket, when the token is tied to a session.
    pub granting_ticket: Option<String>,
    /// Refresh token that can renew this access token.
    pub refresh_token: Option<String>,
}

/// State owned by SAML artifact tickets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactState {
    /// Relying party entity id the artifact was issued to.
    pub relying_party_id: String,
    /// Issuer of the stored response.
    pub issuer: String,
    /// The already-built, serialized protocol response.
    pub response: String,
    /// Id of the granting ticket, when the artifact is tied to a session.
    pub granting_ticket: Option<String>,
}

/// Kind-specific ticket payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "state")]
pub enum TicketPayload {
    /// Login session.
    TicketGranting(GrantingState),
    /// Proxy session.
    ProxyGranting(GrantingState),
    /// Service ticket.
    Service(ServiceState),
    /// Proxy ticket.
    Proxy(ServiceState),
    /// OAuth access token.
    AccessToken(TokenState),
    /// OAuth refresh token.
    RefreshToken(TokenState),
    /// SAML artifact.
    SamlArtifact(ArtifactState),
}

impl TicketPayload {
    /// The kind discriminator for this payload.
    #[must_use]
    pub fn kind(&self) -> TicketKind {
        match self {
            Self::TicketGranting(_) => TicketKind::TicketGranting,
            Self::ProxyGranting(_) => TicketKind::ProxyGranting,
            Self::Service(_) => TicketKind::Service,
            Self::Proxy(_) => TicketKind::Proxy,
            Self::AccessToken(_) => TicketKind::AccessToken,
            Self::RefreshToken(_) => TicketKind::RefreshToken,
            Self::SamlArtifact(_) => TicketKind::SamlArtifact,
        }
    }
}

/// A ticket of any kind.
///
/// The id and creation time are fixed at construction. The use count and
/// last-used time only move forward, through [`Ticket::record_use`].
///
/// # Example
///
/// ```
/// use std::{sync::Arc, time::Duration};
///
/// use chrono::Utc;
/// use ssobroker_tickets::{Authentication, ExpirationPolicy, Principal, Ticket, TicketKind};
///
/// let authn = Arc::new(
///     Authentication::builder().principal(Principal::builder().id("alice").build()).build(),
/// );
/// let policy = ExpirationPolicy::IdleAndHardTimeout {
///     max_idle: Duration::from_secs(7200),
///     max_lifetime: Duration::from_secs(28800),
/// };
///
/// let tgt = Ticket::ticket_granting("TGT-1-abc-sso", authn, policy, Utc::now());
/// assert_eq!(tgt.kind(), TicketKind::TicketGranting);
/// assert_eq!(tgt.count_of_uses(), 0);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    id: String,
    creation_time: DateTime<Utc>,
    last_time_used: DateTime<Utc>,
    previous_time_used: Option<DateTime<Utc>>,
    count_of_uses: u64,
    expiration_policy: ExpirationPolicy,
    authentication: Arc<Authentication>,
    payload: TicketPayload,
}

impl Ticket {
    /// Creates a ticket with the given payload, created and last used at `now`.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        payload: TicketPayload,
        authentication: Arc<Authentication>,
        expiration_policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            creation_time: now,
            last_time_used: now,
            previous_time_used: None,
            count_of_uses: 0,
            expiration_policy,
            authentication,
            payload,
        }
    }

    /// Creates a root ticket-granting ticket for a fresh login.
    #[must_use]
    pub fn ticket_granting(
        id: impl Into<String>,
        authentication: Arc<Authentication>,
        expiration_policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        let state = GrantingState::root(Arc::clone(&authentication));
        Self::new(id, TicketPayload::TicketGranting(state), authentication, expiration_policy, now)
    }

    /// Creates a service ticket bound to `service` and issued by `granting_ticket`.
    #[must_use]
    pub fn service_ticket(
        id: impl Into<String>,
        state: ServiceState,
        authentication: Arc<Authentication>,
        expiration_policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(id, TicketPayload::Service(state), authentication, expiration_policy, now)
    }

    /// The ticket id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The kind discriminator.
    #[must_use]
    pub fn kind(&self) -> TicketKind {
        self.payload.kind()
    }

    /// When the ticket was created.
    #[must_use]
    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    /// When the ticket was last used (creation time if never used).
    #[must_use]
    pub fn last_time_used(&self) -> DateTime<Utc> {
        self.last_time_used
    }

    /// The use before the last one, if any.
    #[must_use]
    pub fn previous_time_used(&self) -> Option<DateTime<Utc>> {
        self.previous_time_used
    }

    /// How many times the ticket has been used.
    #[must_use]
    pub fn count_of_uses(&self) -> u64 {
        self.count_of_uses
    }

    /// The policy deciding when this ticket expires.
    #[must_use]
    pub fn expiration_policy(&self) -> &ExpirationPolicy {
        &self.expiration_policy
    }

    /// The shared authentication record.
    #[must_use]
    pub fn authentication(&self) -> &Arc<Authentication> {
        &self.authentication
    }

    /// The kind-specific payload.
    #[must_use]
    pub fn payload(&self) -> &TicketPayload {
        &self.payload
    }

    /// Returns `true` if the ticket's policy considers it expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_policy.is_expired(self, now)
    }

    /// Records one use of the ticket at `now`.
    ///
    /// The last-used time never moves backwards: a `now` earlier than the
    /// recorded time still counts the use but keeps the later timestamp.
    pub fn record_use(&mut self, now: DateTime<Utc>) {
        self.previous_time_used = Some(self.last_time_used);
        if now > self.last_time_used {
            self.last_time_used = now;
        }
        self.count_of_uses = self.count_of_uses.saturating_add(1);
    }

    /// Id of the ticket that issued this one, if any.
    #[must_use]
    pub fn parent_id(&self) -> Option<&str> {
        match &self.payload {
            TicketPayload::TicketGranting(_) => None,
            TicketPayload::ProxyGranting(state) => state.proxied_by.as_deref(),
            TicketPayload::Service(state) | TicketPayload::Proxy(state) => {
                Some(&state.granting_ticket)
            },
            TicketPayload::AccessToken(state) | TicketPayload::RefreshToken(state) => {
                state.granting_ticket.as_deref()
            },
            TicketPayload::SamlArtifact(state) => state.granting_ticket.as_deref(),
        }
    }

    /// Service or client identifier the ticket is bound to, if any.
    #[must_use]
    pub fn service(&self) -> Option<&str> {
        match &self.payload {
            TicketPayload::TicketGranting(_) => None,
            TicketPayload::ProxyGranting(state) => state.proxy_service.as_deref(),
            TicketPayload::Service(state) | TicketPayload::Proxy(state) => Some(&state.service),
            TicketPayload::AccessToken(state) | TicketPayload::RefreshToken(state) => {
                Some(&state.service)
            },
            TicketPayload::SamlArtifact(state) => Some(&state.relying_party_id),
        }
    }

    /// Granting state, for ticket-granting and proxy-granting tickets.
    #[must_use]
    pub fn granting(&self) -> Option<&GrantingState> {
        match &self.payload {
            TicketPayload::TicketGranting(state) | TicketPayload::ProxyGranting(state) => {
                Some(state)
            },
            _ => None,
        }
    }

    /// Mutable granting state, for ticket-granting and proxy-granting tickets.
    pub fn granting_mut(&mut self) -> Option<&mut GrantingState> {
        match &mut self.payload {
            TicketPayload::TicketGranting(state) | TicketPayload::ProxyGranting(state) => {
                Some(state)
            },
            _ => None,
        }
    }

    /// Service state, for service and proxy tickets.
    #[must_use]
    pub fn service_state(&self) -> Option<&ServiceState> {
        match &self.payload {
            TicketPayload::Service(state) | TicketPayload::Proxy(state) => Some(state),
            _ => None,
        }
    }

    /// Token state, for access and refresh tokens.
    #[must_use]
    pub fn token_state(&self) -> Option<&TokenState> {
        match &self.payload {
            TicketPayload::AccessToken(state) | TicketPayload::RefreshToken(state) => Some(state),
            _ => None,
        }
    }

    /// Artifact state, for SAML artifact tickets.
    #[must_use]
    pub fn artifact_state(&self) -> Option<&ArtifactState> {
        match &self.payload {
            TicketPayload::SamlArtifact(state) => Some(state),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use chrono::TimeDelta;

    use super::*;
    use crate::testutil::{alice, service_ticket_for, tgt_policy};

    #[test]
    fn test_kind_prefix_roundtrip() {
        for kind in TicketKind::ALL {
            let id = format!("{}-1-abc-sso", kind.prefix());
            assert_eq!(TicketKind::from_id(&id), Some(kind), "prefix for {kind}");
        }
        assert_eq!(TicketKind::from_id("XYZ-1-abc"), None);
        assert_eq!(TicketKind::from_id(""), None);
    }

    #[test]
    fn test_kind_predicates() {
        assert!(TicketKind::TicketGranting.is_granting());
        assert!(TicketKind::ProxyGranting.is_granting());
        assert!(!TicketKind::Service.is_granting());
        assert!(TicketKind::Service.is_service());
        assert!(TicketKind::Proxy.is_service());
        assert!(!TicketKind::AccessToken.is_service());
    }

    #[test]
    fn test_root_tgt_chain_starts_with_own_authentication() {
        let authn = alice();
        let tgt = Ticket::ticket_granting("TGT-1", Arc::clone(&authn), tgt_policy(), Utc::now());

        let state = tgt.granting().expect("granting state");
        assert_eq!(state.chained_authentications.len(), 1);
        assert!(Arc::ptr_eq(&state.chained_authentications[0], &authn));
        assert!(Arc::ptr_eq(tgt.authentication(), &authn));
        assert!(tgt.parent_id().is_none());
        assert!(tgt.service().is_none());
    }

    #[test]
    fn test_record_use_moves_forward_only() {
        let start = Utc::now();
        let mut tgt = Ticket::ticket_granting("TGT-1", alice(), tgt_policy(), start);

        let later = start + TimeDelta::seconds(5);
        tgt.record_use(later);
        assert_eq!(tgt.count_of_uses(), 1);
        assert_eq!(tgt.last_time_used(), later);
        assert_eq!(tgt.previous_time_used(), Some(start));

        // A stale clock reading still counts but never rewinds the timestamp.
        tgt.record_use(start);
        assert_eq!(tgt.count_of_uses(), 2);
        assert_eq!(tgt.last_time_used(), later);
    }

    #[test]
    fn test_service_ticket_accessors() {
        let st = service_ticket_for("ST-1", "TGT-1", "https://svc-a.example.org", alice());

        assert_eq!(st.kind(), TicketKind::Service);
        assert_eq!(st.parent_id(), Some("TGT-1"));
        assert_eq!(st.service(), Some("https://svc-a.example.org"));
        assert!(st.granting().is_none());
        assert!(st.service_state().expect("service state").from_new_login);
    }

    #[test]
    fn test_proxied_state_extends_chain() {
        let root = alice();
        let proxy = alice();
        let state = GrantingState::proxied(
            "TGT-1",
            "https://proxy.example.org",
            vec![Arc::clone(&root)],
            Arc::clone(&proxy),
        );

        assert_eq!(state.proxied_by.as_deref(), Some("TGT-1"));
        assert_eq!(state.chained_authentications.len(), 2);
        assert!(Arc::ptr_eq(&state.chained_authentications[1], &proxy));

        let pgt = Ticket::new(
            "PGT-1",
            TicketPayload::ProxyGranting(state),
            proxy,
            ExpirationPolicy::HardTimeout { time_to_live: Duration::from_secs(60) },
            Utc::now(),
        );
        assert_eq!(pgt.parent_id(), Some("TGT-1"));
        assert_eq!(pgt.service(), Some("https://proxy.example.org"));
    }

    #[test]
    fn test_child_ids_cover_every_map() {
        let mut state = GrantingState::root(alice());
        state.services.insert("svc-a".to_owned(), "ST-1".to_owned());
        state.proxy_granting_tickets.insert("PGT-1".to_owned(), "svc-b".to_owned());
        state.descendant_tickets.insert("AT-1".to_owned());

        let ids: Vec<String> = state.child_ids().into_iter().collect();
        assert_eq!(ids, vec!["AT-1".to_owned(), "PGT-1".to_owned(), "ST-1".to_owned()]);
    }

    #[test]
    fn test_serde_preserves_payload_tag() {
        let st = service_ticket_for("ST-9", "TGT-9", "svc", alice());
        let json = serde_json::to_value(&st).expect("serialize");
        assert_eq!(json["payload"]["kind"], "Service");

        let back: Ticket = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, st);
    }
}
