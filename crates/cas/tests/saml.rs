//! SAML artifact issue and one-time resolution.

#![allow(clippy::expect_used, clippy::panic)]

use std::{sync::Arc, time::Duration};

use ssobroker_cas::{
    CentralAuthenticationService, DenialReason, SamlArtifactStore, assert_cas_error,
    testutil::{SVC_A, SVC_B, alice, harness},
};
use ssobroker_tickets::{AuditAction, TicketKind, TicketRegistry};

const IDP: &str = "https://idp.example.org";
const RESPONSE: &str = "<samlp:Response ID=\"_r1\"/>";

#[tokio::test]
async fn artifact_resolves_once() {
    let h = harness();
    let store = SamlArtifactStore::new(Arc::clone(&h.cas));

    let artifact = store.issue(None, alice(), SVC_A, IDP, RESPONSE.into()).await.expect("issue");
    assert!(artifact.id().starts_with("SART-"));

    let resolution = store.resolve(artifact.id(), SVC_A).await.expect("resolve");
    assert_eq!(resolution.artifact_id, artifact.id());
    assert_eq!(resolution.issuer, IDP);
    assert_eq!(resolution.in_response_to, SVC_A);
    assert_eq!(resolution.response, RESPONSE);

    let again = store.resolve(artifact.id(), SVC_A).await;
    assert_cas_error!(again, InvalidTicket { .. });
}

#[tokio::test]
async fn other_relying_party_cannot_redeem() {
    let h = harness();
    let store = SamlArtifactStore::new(Arc::clone(&h.cas));
    let artifact = store.issue(None, alice(), SVC_A, IDP, RESPONSE.into()).await.expect("issue");

    let stolen = store.resolve(artifact.id(), SVC_B).await;
    assert_cas_error!(
        stolen,
        UnauthorizedService { reason: DenialReason::ServiceMismatch, .. }
    );
    store.resolve(artifact.id(), SVC_A).await.expect("owner still redeems");
}

#[tokio::test]
async fn expired_artifact_is_removed() {
    let h = harness();
    let store = SamlArtifactStore::new(Arc::clone(&h.cas));
    let artifact = store.issue(None, alice(), SVC_A, IDP, RESPONSE.into()).await.expect("issue");

    h.clock.advance(Duration::from_secs(61));
    let result = store.resolve(artifact.id(), SVC_A).await;
    assert_cas_error!(result, InvalidTicket { .. });
    assert_eq!(h.cas.registry().count().await.expect("count"), 0);
}

#[tokio::test]
async fn session_artifact_uses_session_authentication() {
    let h = harness();
    let authentication = alice();
    let tgt = h
        .cas
        .create_ticket_granting_ticket(Arc::clone(&authentication))
        .await
        .expect("create TGT");
    let store = SamlArtifactStore::new(Arc::clone(&h.cas));

    let artifact =
        store.issue(Some(tgt.id()), alice(), SVC_A, IDP, RESPONSE.into()).await.expect("issue");
    assert!(Arc::ptr_eq(artifact.authentication(), &authentication));
    assert_eq!(artifact.parent_id(), Some(tgt.id()));

    let session = h.cas.get_ticket(tgt.id(), TicketKind::TicketGranting).await.expect("TGT");
    assert!(session.granting().expect("granting state").descendant_tickets.contains(artifact.id()));
}

#[tokio::test]
async fn issuing_from_missing_session_fails() {
    let h = harness();
    let store = SamlArtifactStore::new(Arc::clone(&h.cas));

    let result = store.issue(Some("TGT-9-missing-sso"), alice(), SVC_A, IDP, RESPONSE.into()).await;
    assert_cas_error!(result, InvalidTicket { .. });
    assert_eq!(h.cas.registry().count().await.expect("count"), 0);
}

#[tokio::test]
async fn artifact_operations_are_audited() {
    let h = harness();
    let store = SamlArtifactStore::new(Arc::clone(&h.cas));
    let artifact = store.issue(None, alice(), SVC_A, IDP, RESPONSE.into()).await.expect("issue");
    store.resolve(artifact.id(), SVC_A).await.expect("resolve");

    assert_eq!(
        h.audit.actions(),
        vec![AuditAction::IssueSamlArtifact, AuditAction::ResolveSamlArtifact]
    );
}
