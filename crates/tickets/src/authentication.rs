//! Authentication records shared by every ticket issued from one login.
//!
//! An [`Authentication`] is built once, after a principal has proven its
//! identity, and is then handed around behind an [`Arc`](std::sync::Arc).
//! Tickets never copy or mutate it; they only hold a reference.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authentication attribute recording the methods used to authenticate.
pub const AUTHENTICATION_METHOD_ATTRIBUTE: &str = "authenticationMethod";

/// Authentication attribute recording the OAuth grant type, when relevant.
pub const GRANT_TYPE_ATTRIBUTE: &str = "grant_type";

/// Multi-valued attribute map, ordered for deterministic serialization.
pub type Attributes = BTreeMap<String, Vec<String>>;

/// The authenticated subject.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
pub struct Principal {
    /// Stable principal identifier (e.g., a username).
    #[builder(into)]
    pub id: String,

    /// Attributes resolved for the principal.
    #[builder(default)]
    #[serde(default)]
    pub attributes: Attributes,
}

impl Principal {
    /// Returns the values of a principal attribute, if present.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&[String]> {
        self.attributes.get(name).map(Vec::as_slice)
    }
}

/// The outcome of one successful authentication event.
///
/// # Example
///
/// ```
/// use ssobroker_tickets::{Authentication, Principal};
///
/// let authn = Authentication::builder()
///     .principal(Principal::builder().id("alice").build())
///     .credential_types(["password".to_owned()].into())
///     .build();
///
/// assert_eq!(authn.principal.id, "alice");
/// assert!(!authn.handle.is_empty());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct Authentication {
    /// Opaque handle under which distributed backends persist this record.
    #[builder(default = crate::id::random_handle(), into)]
    pub handle: String,

    /// Who authenticated.
    pub principal: Principal,

    /// When the authentication happened.
    #[builder(default = Utc::now())]
    pub authentication_date: DateTime<Utc>,

    /// Credential types that were presented (e.g., `password`, `otp`).
    #[builder(default)]
    #[serde(default)]
    pub credential_types: BTreeSet<String>,

    /// Authentication metadata (methods, grant type, etc.).
    #[builder(default)]
    #[serde(default)]
    pub attributes: Attributes,

    /// Authentication realm or context, when the deployment has several.
    #[builder(into)]
    pub realm: Option<String>,
}

impl Authentication {
    /// Returns the values of an authentication attribute, if present.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&[String]> {
        self.attributes.get(name).map(Vec::as_slice)
    }

    /// Returns `true` if both records authenticate the same principal.
    #[must_use]
    pub fn is_same_principal(&self, other: &Authentication) -> bool {
        self.principal.id == other.principal.id
    }
}
