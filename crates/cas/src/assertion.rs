//! The validated result handed back to a relying service.

use std::sync::Arc;

use ssobroker_tickets::{Attributes, Authentication, Principal};

/// Result of a successful ticket validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Assertion {
    /// The authenticated principal.
    pub principal: Principal,
    /// Every authentication that contributed to the session, oldest first.
    pub chained_authentications: Vec<Arc<Authentication>>,
    /// The service the ticket was validated for.
    pub service: String,
    /// The ticket was issued right after a fresh login.
    pub from_new_login: bool,
    /// Principal attributes released to this service.
    pub attributes: Attributes,
    /// Services that held each proxy-granting ticket on the way to this
    /// ticket, nearest proxy first. Empty for a direct service ticket.
    pub proxy_chain: Vec<String>,
}

impl Assertion {
    /// The authentication that started the session.
    #[must_use]
    pub fn primary_authentication(&self) -> Option<&Arc<Authentication>> {
        self.chained_authentications.first()
    }

    /// Returns `true` if the ticket was obtained through a proxy.
    #[must_use]
    pub fn is_proxied(&self) -> bool {
        !self.proxy_chain.is_empty()
    }
}
