//! SAML artifact binding.
//!
//! The protocol layer builds the full response up front and stores it as a
//! [`TicketKind::SamlArtifact`] ticket. The relying party later redeems the
//! artifact over the back channel and gets that exact response back, once.

use std::{collections::HashMap, sync::Arc};

use ssobroker_tickets::{
    ArtifactState, AuditAction, AuditLogger, Authentication, Ticket, TicketKind, TicketPayload,
    TicketRegistry, audit::ticket_resource,
};
use tracing::{debug, warn};

use crate::{
    cas::{DefaultCentralAuthenticationService, SYSTEM_ACTOR, result_from},
    error::{CasError, DenialReason, Result},
    service::ServiceCatalog,
};

/// A redeemed artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactResolution {
    /// The artifact id that was redeemed.
    pub artifact_id: String,
    /// Issuer recorded when the artifact was stored.
    pub issuer: String,
    /// The relying party the response was built for.
    pub in_response_to: String,
    /// The pre-built response.
    pub response: String,
}

/// Stores and redeems SAML artifacts.
#[derive(Debug)]
pub struct SamlArtifactStore<R, C, L> {
    cas: Arc<DefaultCentralAuthenticationService<R, C, L>>,
}

impl<R, C, L> Clone for SamlArtifactStore<R, C, L> {
    fn clone(&self) -> Self {
        Self { cas: Arc::clone(&self.cas) }
    }
}

impl<R, C, L> SamlArtifactStore<R, C, L>
where
    R: TicketRegistry,
    C: ServiceCatalog,
    L: AuditLogger,
{
    /// Creates a store on top of the central authentication service.
    pub fn new(cas: Arc<DefaultCentralAuthenticationService<R, C, L>>) -> Self {
        Self { cas }
    }

    /// Stores a pre-built `response` for `relying_party`.
    ///
    /// With a session id the artifact is chained to that session and dies
    /// with it; without one it stands alone until it expires.
    ///
    /// # Errors
    ///
    /// - [`CasError::InvalidTicket`] if the session is absent or expired.
    /// - [`CasError::Registry`] if the artifact cannot be stored.
    #[tracing::instrument(skip(self, authentication, response))]
    pub async fn issue(
        &self,
        ticket_granting_ticket_id: Option<&str>,
        authentication: Arc<Authentication>,
        relying_party: &str,
        issuer: &str,
        response: String,
    ) -> Result<Ticket> {
        let granting = match ticket_granting_ticket_id {
            Some(id) => Some(self.cas.live_granting_ticket(id, TicketKind::TicketGranting).await?),
            None => None,
        };
        let authentication = granting
            .as_ref()
            .map_or(authentication, |granting| Arc::clone(granting.authentication()));

        let state = ArtifactState {
            relying_party_id: relying_party.to_owned(),
            issuer: issuer.to_owned(),
            response,
            granting_ticket: granting.as_ref().map(|granting| granting.id().to_owned()),
        };
        let artifact = Ticket::new(
            self.cas.next_id(TicketKind::SamlArtifact),
            TicketPayload::SamlArtifact(state),
            Arc::clone(&authentication),
            self.cas.policies().saml_artifact,
            self.cas.now(),
        );

        let artifact_id = artifact.id().to_owned();
        let res = self
            .cas
            .commit_children(std::slice::from_ref(&artifact), granting, false, |state| {
                state.descendant_tickets.insert(artifact_id.clone());
            })
            .await;
        self.cas
            .audit(
                &authentication.principal.id,
                AuditAction::IssueSamlArtifact,
                ticket_resource(TicketKind::SamlArtifact, artifact.id()),
                result_from(&res),
                HashMap::from([("relying_party".to_owned(), relying_party.to_owned())]),
            )
            .await;
        res?;

        debug!(ticket_id = artifact.id(), "SAML artifact issued");
        Ok(artifact)
    }

    /// Redeems an artifact for `relying_party`. Each artifact resolves once.
    ///
    /// # Errors
    ///
    /// - [`CasError::InvalidTicket`] if the artifact is absent, expired, or already redeemed.
    /// - [`CasError::UnauthorizedService`] if another relying party presents it. The artifact is
    ///   left in place.
    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self, artifact_id: &str, relying_party: &str) -> Result<ArtifactResolution> {
        let res = self.redeem(artifact_id, relying_party).await;
        self.cas
            .audit(
                SYSTEM_ACTOR,
                AuditAction::ResolveSamlArtifact,
                ticket_resource(TicketKind::SamlArtifact, artifact_id),
                result_from(&res),
                HashMap::from([("relying_party".to_owned(), relying_party.to_owned())]),
            )
            .await;
        res
    }

    async fn redeem(&self, artifact_id: &str, relying_party: &str) -> Result<ArtifactResolution> {
        let registry = self.cas.registry();
        let ticket = registry.get_ticket(artifact_id, TicketKind::SamlArtifact).await?;
        if ticket.is_expired(self.cas.now()) {
            registry.delete_ticket(artifact_id).await?;
            return Err(CasError::invalid_ticket(artifact_id));
        }
        let state =
            ticket.artifact_state().cloned().ok_or_else(|| CasError::invalid_ticket(artifact_id))?;
        if state.relying_party_id != relying_party {
            warn!(artifact_id, expected = %state.relying_party_id, relying_party, "Relying party mismatch");
            return Err(CasError::unauthorized(relying_party, DenialReason::ServiceMismatch));
        }

        if !registry.delete_ticket(artifact_id).await? {
            return Err(CasError::invalid_ticket(artifact_id));
        }
        Ok(ArtifactResolution {
            artifact_id: artifact_id.to_owned(),
            issuer: state.issuer,
            in_response_to: state.relying_party_id,
            response: state.response,
        })
    }
}
