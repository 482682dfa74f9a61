//! Signed bearer tokens built from tickets.
//!
//! The orchestrator never picks an algorithm. It hands [`TokenClaims`] to a
//! [`TokenSigner`] and gets an opaque string back. [`JwtTokenSigner`] is the
//! bundled signer: EdDSA JWTs over an Ed25519 key whose public half is
//! published as base64url.

use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use ed25519_dalek::SigningKey;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use ssobroker_tickets::{Attributes, Ticket};
use zeroize::Zeroizing;

use crate::error::TokenError;

/// PKCS#8 v1 prefix for a raw 32-byte Ed25519 private key.
const ED25519_PKCS8_PREFIX: [u8; 16] = [
    0x30, 0x2e, // SEQUENCE, 46 bytes
    0x02, 0x01, 0x00, // INTEGER version 0
    0x30, 0x05, // SEQUENCE, 5 bytes (algorithm identifier)
    0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
    0x04, 0x22, // OCTET STRING, 34 bytes
    0x04, 0x20, // OCTET STRING, 32 bytes (the key)
];

/// Claims carried by a token issued for a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Issuer.
    pub iss: String,
    /// Principal id.
    pub sub: String,
    /// The service the token is for.
    pub aud: String,
    /// Issued at, seconds since the epoch.
    pub iat: i64,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
    /// The ticket id.
    pub jti: String,
    /// Principal attributes.
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
}

/// Opaque signing capability.
pub trait TokenSigner: Send + Sync {
    /// Signs `claims` and returns the encoded token.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Signing`] if signing fails.
    fn sign(&self, claims: &TokenClaims) -> Result<String, TokenError>;
}

impl<S: TokenSigner + ?Sized> TokenSigner for std::sync::Arc<S> {
    fn sign(&self, claims: &TokenClaims) -> Result<String, TokenError> {
        (**self).sign(claims)
    }
}

/// EdDSA JWT signer.
pub struct JwtTokenSigner {
    key_id: String,
    encoding_key: EncodingKey,
    public_key: String,
}

impl JwtTokenSigner {
    /// Creates a signer with a freshly generated key.
    #[must_use]
    pub fn generate(key_id: impl Into<String>) -> Self {
        Self::from_signing_key(key_id, &SigningKey::generate(&mut OsRng))
    }

    /// Creates a signer from an existing Ed25519 key.
    #[must_use]
    pub fn from_signing_key(key_id: impl Into<String>, signing_key: &SigningKey) -> Self {
        let private_bytes: Zeroizing<[u8; 32]> = Zeroizing::new(signing_key.to_bytes());
        let mut pkcs8_der = Zeroizing::new(ED25519_PKCS8_PREFIX.to_vec());
        pkcs8_der.extend_from_slice(&*private_bytes);

        Self {
            key_id: key_id.into(),
            encoding_key: EncodingKey::from_ed_der(&pkcs8_der),
            public_key: URL_SAFE_NO_PAD.encode(signing_key.verifying_key().to_bytes()),
        }
    }

    /// Creates a signer from a base64url-encoded 32-byte private key.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::InvalidKey`] if the input is not valid base64url
    /// or not 32 bytes long.
    pub fn from_base64(key_id: impl Into<String>, private_key: &str) -> Result<Self, TokenError> {
        let bytes = Zeroizing::new(
            URL_SAFE_NO_PAD
                .decode(private_key.trim())
                .map_err(|e| TokenError::invalid_key(format!("not base64url: {e}")))?,
        );
        let secret: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            TokenError::invalid_key(format!("expected 32 bytes, got {}", bytes.len()))
        })?;
        let secret = Zeroizing::new(secret);
        Ok(Self::from_signing_key(key_id, &SigningKey::from_bytes(&secret)))
    }

    /// Key id placed in the `kid` header.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Public key, base64url without padding.
    #[must_use]
    pub fn public_key(&self) -> &str {
        &self.public_key
    }
}

impl fmt::Debug for JwtTokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtTokenSigner")
            .field("key_id", &self.key_id)
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

impl TokenSigner for JwtTokenSigner {
    fn sign(&self, claims: &TokenClaims) -> Result<String, TokenError> {
        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(self.key_id.clone());
        jsonwebtoken::encode(&header, claims, &self.encoding_key)
            .map_err(|e| TokenError::signing_with_source("failed to sign token", e))
    }
}

/// Turns tickets into signed tokens.
#[derive(Debug, Clone)]
pub struct TokenTicketBuilder<S> {
    signer: S,
    issuer: String,
}

impl<S: TokenSigner> TokenTicketBuilder<S> {
    /// Creates a builder that signs with `signer` on behalf of `issuer`.
    pub fn new(signer: S, issuer: impl Into<String>) -> Self {
        Self { signer, issuer: issuer.into() }
    }

    /// Claims for `ticket` presented to `service`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Unsupported`] if the ticket never expires.
    pub fn claims(&self, ticket: &Ticket, service: &str) -> Result<TokenClaims, TokenError> {
        let expires_at = ticket
            .expiration_policy()
            .expires_at(ticket)
            .ok_or_else(|| TokenError::unsupported(ticket.id(), "ticket has no expiry"))?;
        let principal = &ticket.authentication().principal;

        Ok(TokenClaims {
            iss: self.issuer.clone(),
            sub: principal.id.clone(),
            aud: service.to_owned(),
            iat: ticket.creation_time().timestamp(),
            exp: expires_at.timestamp(),
            jti: ticket.id().to_owned(),
            attributes: principal.attributes.clone(),
        })
    }

    /// Builds and signs the token for `ticket` presented to `service`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] if the ticket cannot carry an expiry or
    /// signing fails.
    #[tracing::instrument(skip(self, ticket), fields(ticket_id = ticket.id()))]
    pub fn build(&self, ticket: &Ticket, service: &str) -> Result<String, TokenError> {
        let claims = self.claims(ticket, service)?;
        self.signer.sign(&claims)
    }
}
