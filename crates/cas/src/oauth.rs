//! OAuth access tokens backed by the ticket registry.
//!
//! Access and refresh tokens are tickets chained to the login session, so
//! destroying the session revokes them. Introspection never fails because a
//! token is unknown or expired; it reports `active: false` instead.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use ssobroker_tickets::{
    AuditAction, AuditLogger, AuditResult, Ticket, TicketError, TicketKind, TicketPayload,
    TicketRegistry, TokenState,
    audit::ticket_resource,
    authentication::{AUTHENTICATION_METHOD_ATTRIBUTE, GRANT_TYPE_ATTRIBUTE},
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    cas::{DefaultCentralAuthenticationService, result_from},
    error::{CasError, Result},
    service::ServiceCatalog,
};

/// Tokens minted by [`OAuthTokenIssuer::grant_access_token`].
#[derive(Debug, Clone, PartialEq)]
pub struct AccessTokenGrant {
    /// The access token ticket.
    pub access_token: Ticket,
    /// The refresh token ticket, when requested.
    pub refresh_token: Option<Ticket>,
}

/// RFC 7662 style introspection result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrospectionResponse {
    /// Whether the token is currently usable.
    pub active: bool,
    /// Client the token was issued to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Principal id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Space-separated scopes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Registered service identifier of the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    /// Issuer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Issued at, seconds since the epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Expiry, seconds since the epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Authentication methods used, comma separated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realm_name: Option<String>,
    /// Always `bearer` for active tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Grant type recorded at authentication, lowercase.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant_type: Option<String>,
}

impl IntrospectionResponse {
    /// The response for an unknown, expired, or revoked token.
    #[must_use]
    pub fn inactive() -> Self {
        Self::default()
    }
}

/// Why an introspection request was refused.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IntrospectionError {
    /// Unknown client or wrong secret.
    #[error("Invalid client credentials for {client_id}")]
    InvalidClient {
        /// The presented client id.
        client_id: String,
    },

    /// The client is known but its service is disabled.
    #[error("Client {client_id} is not authorized")]
    UnauthorizedClient {
        /// The presented client id.
        client_id: String,
    },

    /// The registry failed.
    #[error(transparent)]
    Cas(#[from] CasError),
}

/// Issues and introspects OAuth tokens.
#[derive(Debug)]
pub struct OAuthTokenIssuer<R, C, L> {
    cas: Arc<DefaultCentralAuthenticationService<R, C, L>>,
}

impl<R, C, L> Clone for OAuthTokenIssuer<R, C, L> {
    fn clone(&self) -> Self {
        Self { cas: Arc::clone(&self.cas) }
    }
}

impl<R, C, L> OAuthTokenIssuer<R, C, L>
where
    R: TicketRegistry,
    C: ServiceCatalog,
    L: AuditLogger,
{
    /// Creates an issuer on top of the central authentication service.
    pub fn new(cas: Arc<DefaultCentralAuthenticationService<R, C, L>>) -> Self {
        Self { cas }
    }

    /// Issues an access token (and optionally a refresh token) for
    /// `client_id` from a live login session.
    ///
    /// # Errors
    ///
    /// - [`CasError::InvalidTicket`] if the session is absent or expired.
    /// - [`CasError::UnauthorizedService`] if the client is unknown or its access strategy denies
    ///   the principal.
    #[tracing::instrument(skip(self, scopes))]
    pub async fn grant_access_token(
        &self,
        ticket_granting_ticket_id: &str,
        client_id: &str,
        scopes: BTreeSet<String>,
        with_refresh: bool,
    ) -> Result<AccessTokenGrant> {
        let granting = self
            .cas
            .live_granting_ticket(ticket_granting_ticket_id, TicketKind::TicketGranting)
            .await?;
        let authentication = Arc::clone(granting.authentication());
        let registered = self.cas.catalog().find_by_client_id(client_id);
        self.cas
            .authorize(
                client_id,
                registered.as_deref(),
                &authentication.principal,
                granting.count_of_uses() == 0,
                false,
            )
            .await?;

        let policies = *self.cas.policies();
        let now = self.cas.now();
        let refresh_token = with_refresh.then(|| {
            let state = TokenState {
                service: client_id.to_owned(),
                scopes: scopes.clone(),
                granting_ticket: Some(granting.id().to_owned()),
                refresh_token: None,
            };
            Ticket::new(
                self.cas.next_id(TicketKind::RefreshToken),
                TicketPayload::RefreshToken(state),
                Arc::clone(&authentication),
                policies.refresh_token,
                now,
            )
        });
        let state = TokenState {
            service: client_id.to_owned(),
            scopes,
            granting_ticket: Some(granting.id().to_owned()),
            refresh_token: refresh_token.as_ref().map(|rt| rt.id().to_owned()),
        };
        let access_token = Ticket::new(
            self.cas.next_id(TicketKind::AccessToken),
            TicketPayload::AccessToken(state),
            Arc::clone(&authentication),
            policies.access_token,
            now,
        );

        let mut minted: Vec<Ticket> = refresh_token.iter().cloned().collect();
        minted.push(access_token.clone());
        let ids: Vec<String> = minted.iter().map(|ticket| ticket.id().to_owned()).collect();
        let res = self
            .cas
            .commit_children(&minted, Some(granting), true, |state| {
                state.descendant_tickets.extend(ids.iter().cloned());
            })
            .await;

        self.cas
            .audit(
                &authentication.principal.id,
                AuditAction::GrantAccessToken,
                ticket_resource(TicketKind::AccessToken, access_token.id()),
                result_from(&res),
                HashMap::from([
                    ("client_id".to_owned(), client_id.to_owned()),
                    ("refresh".to_owned(), with_refresh.to_string()),
                ]),
            )
            .await;
        res?;

        debug!(ticket_id = access_token.id(), "Access token granted");
        Ok(AccessTokenGrant { access_token, refresh_token })
    }

    /// Introspects `token` on behalf of an authenticated client.
    ///
    /// # Errors
    ///
    /// - [`IntrospectionError::InvalidClient`] for unknown clients or bad secrets.
    /// - [`IntrospectionError::UnauthorizedClient`] if the client's service is disabled.
    /// - [`IntrospectionError::Cas`] if the registry is unavailable.
    #[tracing::instrument(skip(self, client_secret, token))]
    pub async fn introspect(
        &self,
        client_id: &str,
        client_secret: &str,
        token: &str,
    ) -> std::result::Result<IntrospectionResponse, IntrospectionError> {
        let res = self.introspect_inner(client_id, client_secret, token).await;
        let result = match &res {
            Ok(_) => AuditResult::Success,
            Err(err) => AuditResult::Failure(err.to_string()),
        };
        let active = res.as_ref().is_ok_and(|response| response.active);
        self.cas
            .audit(
                client_id,
                AuditAction::IntrospectToken,
                format!("client:{client_id}"),
                result,
                HashMap::from([("active".to_owned(), active.to_string())]),
            )
            .await;
        res
    }

    async fn introspect_inner(
        &self,
        client_id: &str,
        client_secret: &str,
        token: &str,
    ) -> std::result::Result<IntrospectionResponse, IntrospectionError> {
        let registered = self
            .cas
            .catalog()
            .find_by_client_id(client_id)
            .filter(|registered| {
                registered.oauth.as_ref().is_some_and(|client| client.verify_secret(client_secret))
            })
            .ok_or_else(|| {
                warn!(client_id, "Introspection with invalid client credentials");
                IntrospectionError::InvalidClient { client_id: client_id.to_owned() }
            })?;
        if !registered.access_strategy.enabled {
            return Err(IntrospectionError::UnauthorizedClient { client_id: client_id.to_owned() });
        }

        let Some(kind) = TicketKind::from_id(token)
            .filter(|kind| matches!(kind, TicketKind::AccessToken | TicketKind::RefreshToken))
        else {
            return Ok(IntrospectionResponse::inactive());
        };
        let ticket = match self.cas.registry().get_ticket(token, kind).await {
            Ok(ticket) => ticket,
            Err(TicketError::NotFound { .. } | TicketError::InvalidTicketClass { .. }) => {
                return Ok(IntrospectionResponse::inactive());
            },
            Err(err) => return Err(CasError::from(err).into()),
        };
        if ticket.is_expired(self.cas.now()) {
            return Ok(IntrospectionResponse::inactive());
        }
        let Some(state) = ticket.token_state() else {
            return Ok(IntrospectionResponse::inactive());
        };

        let authentication = ticket.authentication();
        let audience = self
            .cas
            .catalog()
            .find_by_client_id(&state.service)
            .map_or_else(|| state.service.clone(), |owner| owner.service_id.clone());
        let realm_name = authentication
            .attribute(AUTHENTICATION_METHOD_ATTRIBUTE)
            .filter(|methods| !methods.is_empty())
            .map(|methods| methods.join(","));
        let grant_type = authentication
            .attribute(GRANT_TYPE_ATTRIBUTE)
            .and_then(|values| values.first())
            .map(|grant| grant.to_lowercase());

        Ok(IntrospectionResponse {
            active: true,
            client_id: Some(state.service.clone()),
            sub: Some(authentication.principal.id.clone()),
            scope: Some(state.scopes.iter().cloned().collect::<Vec<_>>().join(" ")),
            aud: Some(audience),
            iss: Some(self.cas.config().issuer.clone()),
            iat: Some(ticket.creation_time().timestamp()),
            exp: ticket.expiration_policy().expires_at(&ticket).map(|at| at.timestamp()),
            realm_name,
            token_type: Some("bearer".to_owned()),
            grant_type,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_inactive_serializes_to_active_only() {
        let json = serde_json::to_value(IntrospectionResponse::inactive()).unwrap();
        assert_eq!(json, serde_json::json!({ "active": false }));
    }

    #[test]
    fn test_introspection_error_display() {
        let err = IntrospectionError::InvalidClient { client_id: "c1".into() };
        assert_eq!(err.to_string(), "Invalid client credentials for c1");
        let err: IntrospectionError = CasError::invalid_ticket("AT-1").into();
        assert_eq!(err.to_string(), "Invalid ticket: AT-1");
    }
}
