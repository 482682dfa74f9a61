//! The central authentication service: ticket issuance, validation, proxy
//! chaining, and cascading revocation.
//!
//! The orchestrator holds no lock of its own. Every guarantee it makes
//! rests on three registry properties: `add_ticket` is all-or-nothing per
//! ticket, `delete_ticket` reports atomically whether it removed anything,
//! and `update_ticket_if` writes only over the use count it was read with.
//! The last use of a ticket is a delete, so of many callers consuming the
//! same single-use ticket exactly one observes `true`. Earlier uses of a
//! multi-use ticket and every write-back of a granting ticket go through
//! the conditional update and are retried on a fresh copy when they lose.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ssobroker_tickets::{
    AuditAction, AuditEvent, AuditLogger, AuditResult, Authentication, Clock, GrantingState,
    Principal, ServiceState, SystemClock, Ticket, TicketError, TicketIdGenerator, TicketKind,
    TicketPayload, TicketPredicate, TicketRegistry, TicketStream, audit::ticket_resource,
};
use tracing::{debug, info, warn};

use crate::{
    access::{AccessContext, AccessStrategyEnforcer},
    assertion::Assertion,
    config::{CasConfig, ExpirationPolicies},
    error::{CasError, ConfigError, DenialReason, Result},
    service::{RegisteredService, ServiceCatalog},
};

/// Actor recorded on audit events that have no principal.
pub(crate) const SYSTEM_ACTOR: &str = "broker";

/// Upper bound on proxy chain length followed during validation.
const MAX_PROXY_DEPTH: usize = 32;

/// Attempts at writing a granting ticket back before giving up on contention.
const MAX_COMMIT_ATTEMPTS: usize = 64;

/// Result of destroying a granting ticket and its descendants.
#[derive(Debug, Default)]
pub struct DestroyOutcome {
    /// Ids actually removed by this call, leaves first, root last.
    pub destroyed: Vec<String>,
    /// Ids that could not be looked up or removed, with the error.
    pub failures: Vec<(String, CasError)>,
}

impl DestroyOutcome {
    /// Returns `true` if nothing failed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Operations protocol adapters call to issue, validate, and revoke tickets.
#[async_trait]
pub trait CentralAuthenticationService: Send + Sync {
    /// Starts a login session for a successful primary authentication.
    ///
    /// # Errors
    ///
    /// Returns [`CasError::Registry`] if the ticket cannot be stored.
    async fn create_ticket_granting_ticket(
        &self,
        authentication: Arc<Authentication>,
    ) -> Result<Ticket>;

    /// Issues a service ticket for `service` from a live session.
    ///
    /// `renewed` is a fresh authentication of the session's principal; it is
    /// appended to the session chain and marks the ticket as coming from a
    /// new login.
    ///
    /// # Errors
    ///
    /// - [`CasError::InvalidTicket`] if the session is absent or expired (an expired session is
    ///   destroyed).
    /// - [`CasError::MixedPrincipal`] if `renewed` names someone else.
    /// - [`CasError::UnauthorizedService`] if the access strategy denies the service. Nothing is
    ///   written in that case.
    async fn grant_service_ticket(
        &self,
        ticket_granting_ticket_id: &str,
        service: &str,
        renewed: Option<Arc<Authentication>>,
    ) -> Result<Ticket>;

    /// Validates a service or proxy ticket presented by `service`.
    ///
    /// A ticket that reaches its use limit is deleted before the assertion
    /// is assembled, so a replay fails even if assembly does not finish.
    ///
    /// # Errors
    ///
    /// - [`CasError::InvalidTicket`] if the ticket is absent, expired, not a service or proxy
    ///   ticket, or consumed by a concurrent validation.
    /// - [`CasError::UnauthorizedService`] if `service` is not the service the ticket was issued
    ///   for. The ticket is left in place.
    async fn validate_service_ticket(&self, ticket_id: &str, service: &str) -> Result<Assertion>;

    /// Mints a proxy-granting ticket for the service holding a service or
    /// proxy ticket.
    ///
    /// # Errors
    ///
    /// - [`CasError::InvalidTicket`] if the ticket is absent or expired.
    /// - [`CasError::UnauthorizedProxying`] if the service may not proxy.
    async fn create_proxy_granting_ticket(
        &self,
        service_ticket_id: &str,
        proxy_authentication: Arc<Authentication>,
    ) -> Result<Ticket>;

    /// Issues a proxy ticket for `service` from a proxy-granting ticket.
    ///
    /// # Errors
    ///
    /// Same as [`grant_service_ticket`](Self::grant_service_ticket).
    async fn grant_proxy_ticket(
        &self,
        proxy_granting_ticket_id: &str,
        service: &str,
    ) -> Result<Ticket>;

    /// Destroys a session and every ticket it produced.
    ///
    /// Destroying a session that no longer exists succeeds; any tickets
    /// still pointing at it are removed.
    ///
    /// # Errors
    ///
    /// Returns [`CasError::Registry`] if the session itself cannot be read.
    /// Failures on descendants are reported in the outcome instead.
    async fn destroy_ticket_granting_ticket(
        &self,
        ticket_granting_ticket_id: &str,
    ) -> Result<DestroyOutcome>;

    /// Fetches a ticket, treating an expired one as invalid.
    ///
    /// # Errors
    ///
    /// Returns [`CasError::InvalidTicket`] if absent, of another kind, or
    /// expired.
    async fn get_ticket(&self, id: &str, kind: TicketKind) -> Result<Ticket>;

    /// Snapshot of stored tickets matching `predicate`, expired included.
    ///
    /// # Errors
    ///
    /// Returns [`CasError::Registry`] on backend failure.
    async fn get_tickets(&self, predicate: TicketPredicate<'_>) -> Result<TicketStream>;

    /// Removes one ticket without cascading.
    ///
    /// # Errors
    ///
    /// Returns [`CasError::Registry`] on backend failure.
    async fn delete_ticket(&self, id: &str) -> Result<bool>;
}

#[async_trait]
impl<S: CentralAuthenticationService> CentralAuthenticationService for Arc<S> {
    async fn create_ticket_granting_ticket(
        &self,
        authentication: Arc<Authentication>,
    ) -> Result<Ticket> {
        (**self).create_ticket_granting_ticket(authentication).await
    }

    async fn grant_service_ticket(
        &self,
        ticket_granting_ticket_id: &str,
        service: &str,
        renewed: Option<Arc<Authentication>>,
    ) -> Result<Ticket> {
        (**self).grant_service_ticket(ticket_granting_ticket_id, service, renewed).await
    }

    async fn validate_service_ticket(&self, ticket_id: &str, service: &str) -> Result<Assertion> {
        (**self).validate_service_ticket(ticket_id, service).await
    }

    async fn create_proxy_granting_ticket(
        &self,
        service_ticket_id: &str,
        proxy_authentication: Arc<Authentication>,
    ) -> Result<Ticket> {
        (**self).create_proxy_granting_ticket(service_ticket_id, proxy_authentication).await
    }

    async fn grant_proxy_ticket(
        &self,
        proxy_granting_ticket_id: &str,
        service: &str,
    ) -> Result<Ticket> {
        (**self).grant_proxy_ticket(proxy_granting_ticket_id, service).await
    }

    async fn destroy_ticket_granting_ticket(
        &self,
        ticket_granting_ticket_id: &str,
    ) -> Result<DestroyOutcome> {
        (**self).destroy_ticket_granting_ticket(ticket_granting_ticket_id).await
    }

    async fn get_ticket(&self, id: &str, kind: TicketKind) -> Result<Ticket> {
        (**self).get_ticket(id, kind).await
    }

    async fn get_tickets(&self, predicate: TicketPredicate<'_>) -> Result<TicketStream> {
        (**self).get_tickets(predicate).await
    }

    async fn delete_ticket(&self, id: &str) -> Result<bool> {
        (**self).delete_ticket(id).await
    }
}

/// Registry-backed [`CentralAuthenticationService`].
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
///
/// use ssobroker_cas::{
///     CentralAuthenticationService, DefaultCentralAuthenticationService, InMemoryServiceCatalog,
///     RegisteredService,
/// };
/// use ssobroker_tickets::{
///     Authentication, MemoryTicketRegistry, Principal, audit::TracingAuditLogger,
/// };
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let catalog = InMemoryServiceCatalog::with_services([RegisteredService::builder()
///     .id(1)
///     .service_id("https://mail.example.org/*")
///     .name("mail")
///     .build()]);
/// let cas = DefaultCentralAuthenticationService::builder()
///     .registry(MemoryTicketRegistry::new())
///     .catalog(catalog)
///     .audit_logger(TracingAuditLogger)
///     .build()?;
///
/// let authn =
///     Arc::new(Authentication::builder().principal(Principal::builder().id("alice").build()).build());
/// let tgt = cas.create_ticket_granting_ticket(authn).await?;
/// let st = cas.grant_service_ticket(tgt.id(), "https://mail.example.org/inbox", None).await?;
/// let assertion = cas.validate_service_ticket(st.id(), "https://mail.example.org/inbox").await?;
/// assert_eq!(assertion.principal.id, "alice");
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct DefaultCentralAuthenticationService<R, C, L> {
    registry: R,
    catalog: C,
    audit: L,
    enforcer: AccessStrategyEnforcer,
    config: CasConfig,
    policies: ExpirationPolicies,
    ids: TicketIdGenerator,
    clock: Arc<dyn Clock>,
}

#[bon::bon]
impl<R, C, L> DefaultCentralAuthenticationService<R, C, L>
where
    R: TicketRegistry,
    C: ServiceCatalog,
    L: AuditLogger,
{
    /// Creates the service.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    #[builder]
    pub fn new(
        registry: R,
        catalog: C,
        audit_logger: L,
        #[builder(default)] config: CasConfig,
        clock: Option<Arc<dyn Clock>>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            registry,
            catalog,
            audit: audit_logger,
            enforcer: AccessStrategyEnforcer,
            policies: ExpirationPolicies::from_config(&config),
            ids: TicketIdGenerator::new(config.ticket_id_suffix.clone()),
            config,
            clock: clock.unwrap_or_else(|| Arc::new(SystemClock)),
        })
    }
}

impl<R, C, L> DefaultCentralAuthenticationService<R, C, L>
where
    R: TicketRegistry,
    C: ServiceCatalog,
    L: AuditLogger,
{
    /// The ticket registry.
    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// The registered-service catalog.
    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// The active configuration.
    pub fn config(&self) -> &CasConfig {
        &self.config
    }

    /// Per-kind expiration policies.
    pub fn policies(&self) -> &ExpirationPolicies {
        &self.policies
    }

    /// Current time according to the injected clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn next_id(&self, kind: TicketKind) -> String {
        self.ids.next_id(kind)
    }

    pub(crate) async fn audit(
        &self,
        actor: &str,
        action: AuditAction,
        resource: String,
        result: AuditResult,
        metadata: HashMap<String, String>,
    ) {
        let event = AuditEvent::builder()
            .timestamp(self.now())
            .actor(actor)
            .action(action)
            .resource(resource)
            .result(result)
            .metadata(metadata)
            .build();
        self.audit.log(&event).await;
    }

    /// Runs the access strategy and audits the decision.
    pub(crate) async fn authorize(
        &self,
        service: &str,
        registered: Option<&RegisteredService>,
        principal: &Principal,
        from_new_login: bool,
        proxying: bool,
    ) -> Result<()> {
        let decision = self.enforcer.evaluate(&AccessContext {
            service,
            registered_service: registered,
            principal,
            from_new_login,
            proxying,
        });
        let result = match decision.reason {
            Some(reason) => AuditResult::Failure(reason.code().to_owned()),
            None => AuditResult::Success,
        };
        let metadata = HashMap::from([
            ("from_new_login".to_owned(), from_new_login.to_string()),
            ("proxying".to_owned(), proxying.to_string()),
        ]);
        self.audit(&principal.id, AuditAction::EvaluateAccess, service.to_owned(), result, metadata)
            .await;

        match decision.reason {
            None => Ok(()),
            Some(reason) => {
                warn!(service, principal = %principal.id, %reason, "Access denied");
                Err(match reason {
                    DenialReason::ProxyingNotAllowed => CasError::unauthorized_proxying(service),
                    reason => CasError::unauthorized(service, reason),
                })
            },
        }
    }

    /// Fetches a granting ticket that has not expired. An expired one is
    /// destroyed along with its descendants.
    pub(crate) async fn live_granting_ticket(&self, id: &str, kind: TicketKind) -> Result<Ticket> {
        let ticket = self.registry.get_ticket(id, kind).await?;
        if ticket.is_expired(self.now()) {
            let outcome = self.cascade(id).await;
            info!(
                ticket_id = id,
                destroyed = outcome.destroyed.len(),
                failures = outcome.failures.len(),
                "Expired granting ticket destroyed"
            );
            return Err(CasError::invalid_ticket(id));
        }
        Ok(ticket)
    }

    /// Stores `children`, then writes `granting` back after `attach` has
    /// recorded them. If any step fails, children already stored are
    /// removed again so nothing half-issued stays visible.
    ///
    /// The write-back only lands over the use count it was read with. When a
    /// concurrent grant wins, the granting ticket is re-read and `attach` is
    /// applied again, so neither grant loses its entry. Children that are
    /// gone or expired are pruned from the maps on every write.
    pub(crate) async fn commit_children<F>(
        &self,
        children: &[Ticket],
        granting: Option<Ticket>,
        record_use: bool,
        attach: F,
    ) -> Result<()>
    where
        F: Fn(&mut GrantingState) + Send + Sync,
    {
        for (stored, child) in children.iter().enumerate() {
            if let Err(err) = self.registry.add_ticket(child.clone()).await {
                self.rollback(&children[..stored]).await;
                return Err(err.into());
            }
        }

        let Some(mut granting) = granting else {
            return Ok(());
        };
        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let expected = granting.count_of_uses();
            let mut updated = granting.clone();
            if record_use {
                updated.record_use(self.now());
            }
            self.prune_children(&mut updated).await;
            if let Some(state) = updated.granting_mut() {
                attach(state);
            }

            match self.registry.update_ticket_if(&updated, expected).await {
                Ok(true) => return Ok(()),
                Ok(false) => {
                    debug!(ticket_id = granting.id(), attempt, "Granting ticket changed, retrying");
                },
                Err(err) => {
                    self.rollback(children).await;
                    return Err(err.into());
                },
            }

            let fresh = self.registry.get_ticket(updated.id(), updated.kind()).await;
            granting = match fresh {
                Ok(fresh) => fresh,
                Err(err) => {
                    self.rollback(children).await;
                    return Err(err.into());
                },
            };
        }

        warn!(ticket_id = granting.id(), "Gave up writing granting ticket under contention");
        self.rollback(children).await;
        Err(CasError::Registry(TicketError::unavailable(format!(
            "write contention on {}",
            granting.id()
        ))))
    }

    /// Drops map entries for children that are no longer stored or have
    /// expired. Expired children still stored are found by the cascade
    /// through their parent id.
    async fn prune_children(&self, granting: &mut Ticket) {
        let Some(state) = granting.granting() else { return };
        let now = self.now();
        let mut dead = HashSet::new();
        for id in state.child_ids() {
            let Some(kind) = TicketKind::from_id(&id) else { continue };
            match self.registry.get_ticket(&id, kind).await {
                Ok(child) if !child.is_expired(now) => {},
                Ok(_) | Err(TicketError::NotFound { .. } | TicketError::InvalidTicketClass { .. }) => {
                    dead.insert(id);
                },
                // Unknown state: keep the entry.
                Err(_) => {},
            }
        }
        if dead.is_empty() {
            return;
        }

        if let Some(state) = granting.granting_mut() {
            state.services.retain(|_, id| !dead.contains(id));
            state.proxy_granting_tickets.retain(|id, _| !dead.contains(id));
            state.descendant_tickets.retain(|id| !dead.contains(id));
        }
        debug!(ticket_id = granting.id(), pruned = dead.len(), "Pruned finished children");
    }

    async fn rollback(&self, tickets: &[Ticket]) {
        for ticket in tickets {
            if let Err(err) = self.registry.delete_ticket(ticket.id()).await {
                warn!(ticket_id = ticket.id(), error = %err, "Failed to roll back issued ticket");
            }
        }
    }

    /// Destroys `root_id` and everything reachable from it.
    ///
    /// Descendants are found through the granting state maps and through
    /// each stored ticket's parent id, so a child whose registration on the
    /// parent was lost to a concurrent update is still found. Deletion runs
    /// leaves first and the root last. Once the root is gone, its parent id
    /// is scanned again: a grant that landed between the first scan and the
    /// root delete is swept, and any later grant fails its write-back on the
    /// missing root and rolls itself back.
    pub(crate) async fn cascade(&self, root_id: &str) -> DestroyOutcome {
        let mut outcome = DestroyOutcome::default();
        let mut seen = HashSet::from([root_id.to_owned()]);

        let order = self.collect_subtree(vec![root_id.to_owned()], &mut seen, &mut outcome).await;
        self.delete_in_order(order, &mut outcome).await;

        let late: Vec<String> = self
            .children_for(root_id, &mut outcome)
            .await
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();
        if !late.is_empty() {
            info!(ticket_id = root_id, late = late.len(), "Sweeping children issued during destroy");
            let order = self.collect_subtree(late, &mut seen, &mut outcome).await;
            self.delete_in_order(order, &mut outcome).await;
        }
        outcome
    }

    /// Walks down from `pending`, returning every id found, parents before
    /// their children.
    async fn collect_subtree(
        &self,
        mut pending: Vec<String>,
        seen: &mut HashSet<String>,
        outcome: &mut DestroyOutcome,
    ) -> Vec<String> {
        let mut order = Vec::new();
        while let Some(id) = pending.pop() {
            for child in self.children_for(&id, outcome).await {
                if seen.insert(child.clone()) {
                    pending.push(child);
                }
            }
            order.push(id);
        }
        order
    }

    async fn delete_in_order(&self, order: Vec<String>, outcome: &mut DestroyOutcome) {
        for id in order.into_iter().rev() {
            match self.registry.delete_ticket(&id).await {
                Ok(true) => outcome.destroyed.push(id),
                Ok(false) => {},
                Err(err) => {
                    warn!(ticket_id = %id, error = %err, "Failed to delete ticket during cascade");
                    outcome.failures.push((id, err.into()));
                },
            }
        }
    }

    async fn children_for(&self, id: &str, outcome: &mut DestroyOutcome) -> BTreeSet<String> {
        let mut children = BTreeSet::new();
        let Some(kind) = TicketKind::from_id(id).filter(|kind| kind.is_granting()) else {
            return children;
        };

        match self.registry.get_ticket(id, kind).await {
            Ok(ticket) => {
                if let Some(state) = ticket.granting() {
                    children.extend(state.child_ids());
                }
            },
            Err(TicketError::NotFound { .. } | TicketError::InvalidTicketClass { .. }) => {},
            Err(err) => {
                warn!(ticket_id = id, error = %err, "Failed to read granting ticket during cascade");
                outcome.failures.push((id.to_owned(), CasError::Registry(err)));
            },
        }

        match self.registry.children_of(id).await {
            Ok(stream) => children.extend(stream.map(|ticket| ticket.id().to_owned())),
            Err(err) => {
                warn!(ticket_id = id, error = %err, "Failed to scan children during cascade");
                outcome.failures.push((id.to_owned(), CasError::Registry(err)));
            },
        }
        children
    }

    /// Issues a service or proxy ticket from a live granting ticket.
    async fn grant(
        &self,
        granting: Ticket,
        kind: TicketKind,
        service: &str,
        renewed: Option<Arc<Authentication>>,
    ) -> Result<Ticket> {
        if let Some(renewed) = &renewed {
            if !renewed.is_same_principal(granting.authentication()) {
                return Err(CasError::mixed_principal(
                    &granting.authentication().principal.id,
                    &renewed.principal.id,
                ));
            }
        }

        let registered = self.catalog.find_by_service_id(service);
        let from_new_login = renewed.is_some() || granting.count_of_uses() == 0;
        self.authorize(
            service,
            registered.as_deref(),
            &granting.authentication().principal,
            from_new_login,
            false,
        )
        .await?;

        let (policy, payload): (_, fn(ServiceState) -> TicketPayload) = match kind {
            TicketKind::Proxy => (self.policies.proxy_ticket, TicketPayload::Proxy),
            _ => (
                self.policies.service_ticket_with_uses(
                    registered.as_ref().and_then(|registered| registered.service_ticket_uses),
                ),
                TicketPayload::Service,
            ),
        };
        let authentication =
            renewed.clone().unwrap_or_else(|| Arc::clone(granting.authentication()));
        let state = ServiceState {
            service: service.to_owned(),
            granting_ticket: granting.id().to_owned(),
            from_new_login,
        };
        let ticket = Ticket::new(
            self.next_id(kind),
            payload(state),
            authentication,
            policy,
            self.now(),
        );

        let ticket_id = ticket.id();
        self.commit_children(std::slice::from_ref(&ticket), Some(granting), true, |state| {
            // A replaced entry must stay reachable for the cascade.
            if let Some(previous) = state.services.insert(service.to_owned(), ticket_id.to_owned()) {
                state.descendant_tickets.insert(previous);
            }
            if let Some(renewed) = &renewed {
                state.chained_authentications.push(Arc::clone(renewed));
            }
        })
        .await?;
        Ok(ticket)
    }

    async fn proxy_chain(&self, mut granting: Ticket) -> Result<Vec<String>> {
        let mut chain = Vec::new();
        for _ in 0..MAX_PROXY_DEPTH {
            let Some(state) = granting.granting() else { break };
            if let Some(service) = &state.proxy_service {
                chain.push(service.clone());
            }
            let Some(parent) = state.proxied_by.as_deref() else { break };
            if TicketKind::from_id(parent) != Some(TicketKind::ProxyGranting) {
                break;
            }
            granting = match self.registry.get_ticket(parent, TicketKind::ProxyGranting).await {
                Ok(ticket) => ticket,
                Err(TicketError::NotFound { .. } | TicketError::InvalidTicketClass { .. }) => break,
                Err(err) => return Err(err.into()),
            };
        }
        Ok(chain)
    }

    /// Fetches the granting ticket behind a service or proxy ticket.
    ///
    /// An absent parent yields `None`. An expired parent invalidates the
    /// ticket: both are destroyed and the ticket is reported invalid.
    async fn granting_parent(&self, ticket: &Ticket, state: &ServiceState) -> Result<Option<Ticket>> {
        let kind = parent_kind(ticket.kind());
        match self.registry.get_ticket(&state.granting_ticket, kind).await {
            Ok(parent) if parent.is_expired(self.now()) => {
                self.registry.delete_ticket(ticket.id()).await?;
                let outcome = self.cascade(parent.id()).await;
                info!(
                    ticket_id = ticket.id(),
                    granting_ticket = parent.id(),
                    destroyed = outcome.destroyed.len(),
                    "Ticket presented after its session expired"
                );
                Err(CasError::invalid_ticket(ticket.id()))
            },
            Ok(parent) => Ok(Some(parent)),
            Err(TicketError::NotFound { .. } | TicketError::InvalidTicketClass { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn assemble_assertion(
        &self,
        ticket: &Ticket,
        state: &ServiceState,
        parent: Option<Ticket>,
    ) -> Result<Assertion> {
        let chained_authentications = parent
            .as_ref()
            .and_then(Ticket::granting)
            .map(|granting| granting.chained_authentications.clone())
            .filter(|chain| !chain.is_empty())
            .unwrap_or_else(|| vec![Arc::clone(ticket.authentication())]);
        let principal = chained_authentications
            .first()
            .map_or_else(|| ticket.authentication().principal.clone(), |root| root.principal.clone());

        let proxy_chain = match parent {
            Some(parent) if parent.kind() == TicketKind::ProxyGranting => {
                self.proxy_chain(parent).await?
            },
            _ => Vec::new(),
        };

        let attributes = self
            .catalog
            .find_by_service_id(&state.service)
            .map(|registered| registered.attribute_release.release(&principal.attributes))
            .unwrap_or_default();

        Ok(Assertion {
            principal,
            chained_authentications,
            service: state.service.clone(),
            from_new_login: state.from_new_login,
            attributes,
            proxy_chain,
        })
    }

    async fn consume_service_ticket(&self, ticket_id: &str, service: &str) -> Result<Assertion> {
        let kind = TicketKind::from_id(ticket_id)
            .filter(|kind| kind.is_service())
            .ok_or_else(|| CasError::invalid_ticket(ticket_id))?;

        // Each pass either records a use or observes that someone else did.
        // The use count only grows and is capped by the policy, so this ends.
        loop {
            let mut ticket = self.registry.get_ticket(ticket_id, kind).await?;

            let now = self.now();
            if ticket.is_expired(now) {
                self.registry.delete_ticket(ticket_id).await?;
                debug!(ticket_id, "Expired service ticket removed");
                return Err(CasError::invalid_ticket(ticket_id));
            }

            let state =
                ticket.service_state().cloned().ok_or_else(|| CasError::invalid_ticket(ticket_id))?;
            if state.service != service {
                warn!(ticket_id, expected = %state.service, presented = service, "Service mismatch");
                return Err(CasError::unauthorized(service, DenialReason::ServiceMismatch));
            }
            let parent = self.granting_parent(&ticket, &state).await?;

            let expected = ticket.count_of_uses();
            ticket.record_use(now);
            if ticket.is_expired(now) {
                // Last permitted use.
                if !self.registry.delete_ticket(ticket_id).await? {
                    return Err(CasError::invalid_ticket(ticket_id));
                }
            } else if !self.registry.update_ticket_if(&ticket, expected).await? {
                debug!(ticket_id, "Concurrent use recorded first, retrying");
                continue;
            }

            return self.assemble_assertion(&ticket, &state, parent).await;
        }
    }
}

pub(crate) fn result_from<T>(res: &Result<T>) -> AuditResult {
    match res {
        Ok(_) => AuditResult::Success,
        Err(e) => AuditResult::Failure(e.to_string()),
    }
}

fn parent_kind(kind: TicketKind) -> TicketKind {
    match kind {
        TicketKind::Proxy => TicketKind::ProxyGranting,
        _ => TicketKind::TicketGranting,
    }
}

#[async_trait]
impl<R, C, L> CentralAuthenticationService for DefaultCentralAuthenticationService<R, C, L>
where
    R: TicketRegistry,
    C: ServiceCatalog,
    L: AuditLogger,
{
    #[tracing::instrument(skip(self, authentication), fields(principal = %authentication.principal.id))]
    async fn create_ticket_granting_ticket(
        &self,
        authentication: Arc<Authentication>,
    ) -> Result<Ticket> {
        let ticket = Ticket::ticket_granting(
            self.next_id(TicketKind::TicketGranting),
            Arc::clone(&authentication),
            self.policies.ticket_granting,
            self.now(),
        );
        let res = self.registry.add_ticket(ticket.clone()).await.map_err(CasError::from);
        self.audit(
            &authentication.principal.id,
            AuditAction::CreateTicketGrantingTicket,
            ticket_resource(TicketKind::TicketGranting, ticket.id()),
            result_from(&res),
            HashMap::new(),
        )
        .await;
        res?;

        info!(ticket_id = ticket.id(), "Ticket-granting ticket created");
        Ok(ticket)
    }

    #[tracing::instrument(skip(self, renewed), fields(renewed = renewed.is_some()))]
    async fn grant_service_ticket(
        &self,
        ticket_granting_ticket_id: &str,
        service: &str,
        renewed: Option<Arc<Authentication>>,
    ) -> Result<Ticket> {
        let granting =
            self.live_granting_ticket(ticket_granting_ticket_id, TicketKind::TicketGranting).await?;
        let actor = granting.authentication().principal.id.clone();

        let res = self.grant(granting, TicketKind::Service, service, renewed).await;
        let mut metadata = HashMap::from([("service".to_owned(), service.to_owned())]);
        if let Ok(ticket) = &res {
            metadata.insert("ticket".to_owned(), ticket.id().to_owned());
        }
        self.audit(
            &actor,
            AuditAction::GrantServiceTicket,
            ticket_resource(TicketKind::TicketGranting, ticket_granting_ticket_id),
            result_from(&res),
            metadata,
        )
        .await;

        let ticket = res?;
        debug!(ticket_id = ticket.id(), "Service ticket granted");
        Ok(ticket)
    }

    #[tracing::instrument(skip(self))]
    async fn validate_service_ticket(&self, ticket_id: &str, service: &str) -> Result<Assertion> {
        let res = self.consume_service_ticket(ticket_id, service).await;
        let actor = match &res {
            Ok(assertion) => assertion.principal.id.clone(),
            Err(_) => SYSTEM_ACTOR.to_owned(),
        };
        let resource = match TicketKind::from_id(ticket_id) {
            Some(kind) => ticket_resource(kind, ticket_id),
            None => format!("id:{ticket_id}"),
        };
        self.audit(
            &actor,
            AuditAction::ValidateServiceTicket,
            resource,
            result_from(&res),
            HashMap::from([("service".to_owned(), service.to_owned())]),
        )
        .await;

        let assertion = res?;
        debug!(principal = %assertion.principal.id, "Service ticket validated");
        Ok(assertion)
    }

    #[tracing::instrument(skip(self, proxy_authentication))]
    async fn create_proxy_granting_ticket(
        &self,
        service_ticket_id: &str,
        proxy_authentication: Arc<Authentication>,
    ) -> Result<Ticket> {
        let kind = TicketKind::from_id(service_ticket_id)
            .filter(|kind| kind.is_service())
            .ok_or_else(|| CasError::invalid_ticket(service_ticket_id))?;
        let service_ticket = self.registry.get_ticket(service_ticket_id, kind).await?;
        if service_ticket.is_expired(self.now()) {
            self.registry.delete_ticket(service_ticket_id).await?;
            return Err(CasError::invalid_ticket(service_ticket_id));
        }
        let state = service_ticket
            .service_state()
            .cloned()
            .ok_or_else(|| CasError::invalid_ticket(service_ticket_id))?;

        let granting =
            self.live_granting_ticket(&state.granting_ticket, parent_kind(kind)).await?;
        let principal = &service_ticket.authentication().principal;
        let registered = self.catalog.find_by_service_id(&state.service);
        self.authorize(&state.service, registered.as_deref(), principal, false, true).await?;

        let chain = granting
            .granting()
            .map(|granting| granting.chained_authentications.clone())
            .unwrap_or_default();
        let proxy_state = GrantingState::proxied(
            granting.id(),
            state.service.clone(),
            chain,
            proxy_authentication,
        );
        let ticket = Ticket::new(
            self.next_id(TicketKind::ProxyGranting),
            TicketPayload::ProxyGranting(proxy_state),
            Arc::clone(granting.authentication()),
            self.policies.proxy_granting,
            self.now(),
        );

        let actor = principal.id.clone();
        let ticket_id = ticket.id();
        let proxy_service = state.service.as_str();
        let res = self
            .commit_children(std::slice::from_ref(&ticket), Some(granting), false, |granting| {
                granting.proxy_granting_tickets.insert(ticket_id.to_owned(), proxy_service.to_owned());
            })
            .await;
        self.audit(
            &actor,
            AuditAction::CreateProxyGrantingTicket,
            ticket_resource(TicketKind::ProxyGranting, ticket.id()),
            result_from(&res),
            HashMap::from([("service".to_owned(), state.service.clone())]),
        )
        .await;
        res?;

        debug!(ticket_id = ticket.id(), "Proxy-granting ticket created");
        Ok(ticket)
    }

    #[tracing::instrument(skip(self))]
    async fn grant_proxy_ticket(
        &self,
        proxy_granting_ticket_id: &str,
        service: &str,
    ) -> Result<Ticket> {
        let granting =
            self.live_granting_ticket(proxy_granting_ticket_id, TicketKind::ProxyGranting).await?;
        let actor = granting.authentication().principal.id.clone();

        let res = self.grant(granting, TicketKind::Proxy, service, None).await;
        self.audit(
            &actor,
            AuditAction::GrantProxyTicket,
            ticket_resource(TicketKind::ProxyGranting, proxy_granting_ticket_id),
            result_from(&res),
            HashMap::from([("service".to_owned(), service.to_owned())]),
        )
        .await;

        let ticket = res?;
        debug!(ticket_id = ticket.id(), "Proxy ticket granted");
        Ok(ticket)
    }

    #[tracing::instrument(skip(self))]
    async fn destroy_ticket_granting_ticket(
        &self,
        ticket_granting_ticket_id: &str,
    ) -> Result<DestroyOutcome> {
        let kind = TicketKind::from_id(ticket_granting_ticket_id)
            .filter(|kind| kind.is_granting())
            .unwrap_or(TicketKind::TicketGranting);
        let actor = match self.registry.get_ticket(ticket_granting_ticket_id, kind).await {
            Ok(ticket) => ticket.authentication().principal.id.clone(),
            // Already gone: still sweep anything that points at it.
            Err(TicketError::NotFound { .. }) => SYSTEM_ACTOR.to_owned(),
            Err(err) => return Err(err.into()),
        };

        let outcome = self.cascade(ticket_granting_ticket_id).await;
        let result = if outcome.is_complete() {
            AuditResult::Success
        } else {
            AuditResult::Failure(format!("{} descendants not removed", outcome.failures.len()))
        };
        let metadata = HashMap::from([
            ("destroyed".to_owned(), outcome.destroyed.len().to_string()),
            ("failures".to_owned(), outcome.failures.len().to_string()),
        ]);
        self.audit(
            &actor,
            AuditAction::DestroyTicketGrantingTicket,
            ticket_resource(kind, ticket_granting_ticket_id),
            result,
            metadata,
        )
        .await;

        info!(
            destroyed = outcome.destroyed.len(),
            failures = outcome.failures.len(),
            "Ticket-granting ticket destroyed"
        );
        Ok(outcome)
    }

    #[tracing::instrument(skip(self))]
    async fn get_ticket(&self, id: &str, kind: TicketKind) -> Result<Ticket> {
        let ticket = self.registry.get_ticket(id, kind).await?;
        if ticket.is_expired(self.now()) {
            return Err(CasError::invalid_ticket(id));
        }
        Ok(ticket)
    }

    async fn get_tickets(&self, predicate: TicketPredicate<'_>) -> Result<TicketStream> {
        Ok(self.registry.get_tickets(predicate).await?)
    }

    #[tracing::instrument(skip(self))]
    async fn delete_ticket(&self, id: &str) -> Result<bool> {
        Ok(self.registry.delete_ticket(id).await?)
    }
}
