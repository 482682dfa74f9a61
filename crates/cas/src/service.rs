//! Registered services and the catalog that holds them.
//!
//! A [`RegisteredService`] describes one relying party: the identifier
//! pattern it is matched by, whether it may take part in single sign-on,
//! which attributes it may receive, and whether it may proxy. The
//! orchestrator only reads the catalog.

use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    sync::Arc,
};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use ssobroker_tickets::Attributes;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Who may use a service and under which conditions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct AccessStrategy {
    /// Disabled services are denied outright.
    #[builder(default = true)]
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// When `false`, tickets are only issued right after a fresh login.
    #[builder(default = true)]
    #[serde(default = "enabled_by_default")]
    pub sso_enabled: bool,
    /// Principal attributes the service requires. Each entry must be present
    /// on the principal; a non-empty value set additionally requires one of
    /// those values.
    #[builder(default)]
    #[serde(default)]
    pub required_attributes: HashMap<String, BTreeSet<String>>,
}

impl Default for AccessStrategy {
    fn default() -> Self {
        Self { enabled: true, sso_enabled: true, required_attributes: HashMap::new() }
    }
}

fn enabled_by_default() -> bool {
    true
}

/// Whether the service may obtain proxy-granting tickets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyPolicy {
    /// Proxying permitted.
    pub allowed: bool,
}

/// Which principal attributes are released in assertions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "attributes", rename_all = "snake_case")]
pub enum AttributeReleasePolicy {
    /// Release everything.
    #[default]
    ReturnAll,
    /// Release only the named attributes.
    ReturnAllowed(BTreeSet<String>),
    /// Release nothing.
    DenyAll,
}

impl AttributeReleasePolicy {
    /// Filters attributes for release.
    #[must_use]
    pub fn release(&self, attributes: &Attributes) -> Attributes {
        match self {
            Self::ReturnAll => attributes.clone(),
            Self::ReturnAllowed(allowed) => attributes
                .iter()
                .filter(|(name, _)| allowed.contains(*name))
                .map(|(name, values)| (name.clone(), values.clone()))
                .collect(),
            Self::DenyAll => Attributes::new(),
        }
    }
}

/// OAuth client credentials bound to a registered service.
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthClient {
    /// Public client identifier.
    pub client_id: String,
    /// Shared secret, scrubbed on drop.
    pub client_secret: Zeroizing<String>,
}

impl OAuthClient {
    /// Creates client credentials.
    #[must_use]
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self { client_id: client_id.into(), client_secret: Zeroizing::new(client_secret.into()) }
    }

    /// Compares a presented secret in constant time.
    #[must_use]
    pub fn verify_secret(&self, presented: &str) -> bool {
        self.client_secret.as_bytes().ct_eq(presented.as_bytes()).into()
    }
}

impl fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthClient")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

impl PartialEq for OAuthClient {
    fn eq(&self, other: &Self) -> bool {
        self.client_id == other.client_id && other.verify_secret(&self.client_secret)
    }
}

/// One relying party known to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bon::Builder)]
pub struct RegisteredService {
    /// Numeric catalog id.
    pub id: u64,
    /// Identifier the service presents. A trailing `*` matches any
    /// identifier with that prefix.
    #[builder(into)]
    pub service_id: String,
    /// Display name.
    #[builder(into)]
    pub name: String,
    /// Access rules.
    #[builder(default)]
    #[serde(default)]
    pub access_strategy: AccessStrategy,
    /// Proxy rules.
    #[builder(default)]
    #[serde(default)]
    pub proxy_policy: ProxyPolicy,
    /// Attribute release rules.
    #[builder(default)]
    #[serde(default)]
    pub attribute_release: AttributeReleasePolicy,
    /// Overrides the configured service ticket use count.
    pub service_ticket_uses: Option<u32>,
    /// OAuth client credentials, for services that act as OAuth clients.
    pub oauth: Option<OAuthClient>,
}

impl RegisteredService {
    /// Returns `true` if this entry covers the requested service identifier.
    #[must_use]
    pub fn matches(&self, service: &str) -> bool {
        match self.service_id.strip_suffix('*') {
            Some(prefix) => service.starts_with(prefix),
            None => self.service_id == service,
        }
    }

    /// Returns `true` if this entry is the OAuth client with the given id.
    #[must_use]
    pub fn is_client(&self, client_id: &str) -> bool {
        self.oauth.as_ref().is_some_and(|client| client.client_id == client_id)
    }
}

/// Read-only lookup of registered services.
pub trait ServiceCatalog: Send + Sync {
    /// Finds the service whose identifier pattern matches `service`.
    fn find_by_service_id(&self, service: &str) -> Option<Arc<RegisteredService>>;

    /// Finds the service registered as OAuth client `client_id`.
    fn find_by_client_id(&self, client_id: &str) -> Option<Arc<RegisteredService>>;

    /// Every registered service.
    fn all(&self) -> Vec<Arc<RegisteredService>>;
}

impl<C: ServiceCatalog> ServiceCatalog for Arc<C> {
    fn find_by_service_id(&self, service: &str) -> Option<Arc<RegisteredService>> {
        (**self).find_by_service_id(service)
    }

    fn find_by_client_id(&self, client_id: &str) -> Option<Arc<RegisteredService>> {
        (**self).find_by_client_id(client_id)
    }

    fn all(&self) -> Vec<Arc<RegisteredService>> {
        (**self).all()
    }
}

/// Catalog held in memory.
///
/// Exact identifiers win over wildcard patterns. Among wildcard patterns
/// the longest prefix wins.
#[derive(Debug, Clone, Default)]
pub struct InMemoryServiceCatalog {
    services: Arc<RwLock<Vec<Arc<RegisteredService>>>>,
}

impl InMemoryServiceCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog holding the given services.
    #[must_use]
    pub fn with_services(services: impl IntoIterator<Item = RegisteredService>) -> Self {
        let catalog = Self::new();
        for service in services {
            catalog.register(service);
        }
        catalog
    }

    /// Adds a service, replacing any entry with the same catalog id.
    pub fn register(&self, service: RegisteredService) {
        let mut services = self.services.write();
        services.retain(|existing| existing.id != service.id);
        services.push(Arc::new(service));
    }

    /// Removes the service with the given catalog id.
    pub fn remove(&self, id: u64) -> Option<Arc<RegisteredService>> {
        let mut services = self.services.write();
        let index = services.iter().position(|service| service.id == id)?;
        Some(services.remove(index))
    }
}

impl ServiceCatalog for InMemoryServiceCatalog {
    fn find_by_service_id(&self, service: &str) -> Option<Arc<RegisteredService>> {
        let services = self.services.read();
        services
            .iter()
            .filter(|registered| registered.matches(service))
            .max_by_key(|registered| {
                let exact = !registered.service_id.ends_with('*');
                (exact, registered.service_id.len())
            })
            .cloned()
    }

    fn find_by_client_id(&self, client_id: &str) -> Option<Arc<RegisteredService>> {
        self.services.read().iter().find(|registered| registered.is_client(client_id)).cloned()
    }

    fn all(&self) -> Vec<Arc<RegisteredService>> {
        self.services.read().clone()
    }
}
