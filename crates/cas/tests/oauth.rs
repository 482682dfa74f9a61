//! OAuth access token issuance and introspection.

#![allow(clippy::expect_used, clippy::panic)]

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use ssobroker_cas::{
    CentralAuthenticationService, DenialReason, IntrospectionError, OAuthTokenIssuer,
    RegisteredService, assert_cas_error,
    service::OAuthClient,
    testutil::{CLIENT_ID, CLIENT_SECRET, Harness, OAUTH_SERVICE, harness},
};
use ssobroker_tickets::{
    Attributes, Authentication, Principal, TicketKind, TicketRegistry,
    authentication::{AUTHENTICATION_METHOD_ATTRIBUTE, GRANT_TYPE_ATTRIBUTE},
};

fn scopes(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|scope| (*scope).to_owned()).collect()
}

async fn login(h: &Harness) -> String {
    let mut attributes = Attributes::new();
    attributes
        .insert(AUTHENTICATION_METHOD_ATTRIBUTE.to_owned(), vec!["password".into(), "otp".into()]);
    attributes.insert(GRANT_TYPE_ATTRIBUTE.to_owned(), vec!["AUTHORIZATION_CODE".into()]);
    let authentication = Authentication::builder()
        .principal(Principal::builder().id("alice").build())
        .attributes(attributes)
        .build();

    let tgt = h
        .cas
        .create_ticket_granting_ticket(Arc::new(authentication))
        .await
        .expect("create TGT");
    tgt.id().to_owned()
}

// ---------------------------------------------------------------------------
// Issuance
// ---------------------------------------------------------------------------

#[tokio::test]
async fn access_token_is_chained_to_session() {
    let h = harness();
    let tgt = login(&h).await;
    let issuer = OAuthTokenIssuer::new(Arc::clone(&h.cas));

    let grant = issuer
        .grant_access_token(&tgt, CLIENT_ID, scopes(&["openid", "profile"]), true)
        .await
        .expect("grant");
    let refresh = grant.refresh_token.as_ref().expect("refresh token requested");

    assert!(grant.access_token.id().starts_with("AT-"));
    assert!(refresh.id().starts_with("RT-"));
    let state = grant.access_token.token_state().expect("token state");
    assert_eq!(state.refresh_token.as_deref(), Some(refresh.id()));
    assert_eq!(state.granting_ticket.as_deref(), Some(tgt.as_str()));

    let session = h.cas.get_ticket(&tgt, TicketKind::TicketGranting).await.expect("TGT");
    let descendants = &session.granting().expect("granting state").descendant_tickets;
    assert!(descendants.contains(grant.access_token.id()));
    assert!(descendants.contains(refresh.id()));
}

#[tokio::test]
async fn refresh_token_is_optional() {
    let h = harness();
    let tgt = login(&h).await;
    let issuer = OAuthTokenIssuer::new(Arc::clone(&h.cas));

    let grant = issuer.grant_access_token(&tgt, CLIENT_ID, scopes(&[]), false).await.expect("grant");
    assert!(grant.refresh_token.is_none());
    assert_eq!(h.cas.registry().count().await.expect("count"), 2);
}

#[tokio::test]
async fn unknown_client_is_denied() {
    let h = harness();
    let tgt = login(&h).await;
    let issuer = OAuthTokenIssuer::new(Arc::clone(&h.cas));

    let result = issuer.grant_access_token(&tgt, "client-x", scopes(&["openid"]), true).await;
    assert_cas_error!(
        result,
        UnauthorizedService { reason: DenialReason::ServiceNotRegistered, .. }
    );
    assert_eq!(h.cas.registry().count().await.expect("count"), 1);
}

#[tokio::test]
async fn expired_session_cannot_mint_tokens() {
    let h = harness();
    let tgt = login(&h).await;
    let issuer = OAuthTokenIssuer::new(Arc::clone(&h.cas));

    h.clock.advance(Duration::from_secs(9 * 3600));
    let result = issuer.grant_access_token(&tgt, CLIENT_ID, scopes(&["openid"]), true).await;
    assert_cas_error!(result, InvalidTicket { .. });
}

// ---------------------------------------------------------------------------
// Introspection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn active_token_introspection() {
    let h = harness();
    let tgt = login(&h).await;
    let issuer = OAuthTokenIssuer::new(Arc::clone(&h.cas));
    let grant = issuer
        .grant_access_token(&tgt, CLIENT_ID, scopes(&["openid", "profile"]), false)
        .await
        .expect("grant");

    let response = issuer
        .introspect(CLIENT_ID, CLIENT_SECRET, grant.access_token.id())
        .await
        .expect("introspect");

    assert!(response.active);
    assert_eq!(response.client_id.as_deref(), Some(CLIENT_ID));
    assert_eq!(response.sub.as_deref(), Some("alice"));
    assert_eq!(response.scope.as_deref(), Some("openid profile"));
    assert_eq!(response.aud.as_deref(), Some(OAUTH_SERVICE));
    assert_eq!(response.iss.as_deref(), Some(h.cas.config().issuer.as_str()));
    assert_eq!(response.realm_name.as_deref(), Some("password,otp"));
    assert_eq!(response.token_type.as_deref(), Some("bearer"));
    assert_eq!(response.grant_type.as_deref(), Some("authorization_code"));
    assert_eq!(response.exp.zip(response.iat).map(|(exp, iat)| exp - iat), Some(2 * 3600));
}

#[tokio::test]
async fn unknown_or_expired_tokens_are_inactive() {
    let h = harness();
    let tgt = login(&h).await;
    let issuer = OAuthTokenIssuer::new(Arc::clone(&h.cas));
    let grant =
        issuer.grant_access_token(&tgt, CLIENT_ID, scopes(&["openid"]), false).await.expect("grant");

    for token in ["AT-1-missing-sso", "not-a-ticket", tgt.as_str()] {
        let response = issuer.introspect(CLIENT_ID, CLIENT_SECRET, token).await.expect("introspect");
        assert!(!response.active, "{token} should be inactive");
        assert!(response.sub.is_none());
    }

    h.clock.advance(Duration::from_secs(2 * 3600 + 1));
    let response = issuer
        .introspect(CLIENT_ID, CLIENT_SECRET, grant.access_token.id())
        .await
        .expect("introspect");
    assert!(!response.active);
}

#[tokio::test]
async fn revoked_session_deactivates_its_tokens() {
    let h = harness();
    let tgt = login(&h).await;
    let issuer = OAuthTokenIssuer::new(Arc::clone(&h.cas));
    let grant =
        issuer.grant_access_token(&tgt, CLIENT_ID, scopes(&["openid"]), true).await.expect("grant");

    h.cas.destroy_ticket_granting_ticket(&tgt).await.expect("destroy");

    let refresh = grant.refresh_token.expect("refresh token");
    for token in [grant.access_token.id(), refresh.id()] {
        let response = issuer.introspect(CLIENT_ID, CLIENT_SECRET, token).await.expect("introspect");
        assert!(!response.active);
    }
}

#[tokio::test]
async fn bad_client_credentials_are_rejected() {
    let h = harness();
    let issuer = OAuthTokenIssuer::new(Arc::clone(&h.cas));

    let wrong_secret = issuer.introspect(CLIENT_ID, "guess", "AT-1").await;
    assert!(matches!(wrong_secret, Err(IntrospectionError::InvalidClient { .. })));
    let unknown = issuer.introspect("client-x", CLIENT_SECRET, "AT-1").await;
    assert!(matches!(unknown, Err(IntrospectionError::InvalidClient { .. })));
}

#[tokio::test]
async fn disabled_client_is_unauthorized() {
    let h = harness();
    h.cas.catalog().register(
        RegisteredService::builder()
            .id(20)
            .service_id("https://retired.example.org/*")
            .name("Retired")
            .access_strategy(ssobroker_cas::AccessStrategy::builder().enabled(false).build())
            .oauth(OAuthClient::new("client-retired", "secret-r"))
            .build(),
    );
    let issuer = OAuthTokenIssuer::new(Arc::clone(&h.cas));

    let result = issuer.introspect("client-retired", "secret-r", "AT-1").await;
    assert!(matches!(result, Err(IntrospectionError::UnauthorizedClient { .. })));
}

#[tokio::test]
async fn introspection_is_audited() {
    let h = harness();
    let issuer = OAuthTokenIssuer::new(Arc::clone(&h.cas));
    let _ = issuer.introspect(CLIENT_ID, CLIENT_SECRET, "AT-1-missing-sso").await;

    let events = h.audit.events();
    let event = events.last().expect("audit event");
    assert_eq!(event.action, ssobroker_tickets::AuditAction::IntrospectToken);
    assert_eq!(event.actor, CLIENT_ID);
    assert_eq!(event.metadata.get("active").map(String::as_str), Some("false"));
}
