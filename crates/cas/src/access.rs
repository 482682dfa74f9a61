//! Access strategy enforcement.
//!
//! [`AccessStrategyEnforcer::evaluate`] is a pure function over the request
//! and the registered service. Rules are checked in a fixed order and the
//! first failing rule names the [`DenialReason`]:
//!
//! 1. the service must be registered
//! 2. it must be enabled
//! 3. it must allow SSO, unless the ticket follows a fresh login
//! 4. the principal must carry every required attribute
//! 5. proxy requests need a proxy policy that allows them

use ssobroker_tickets::Principal;

use crate::{error::DenialReason, service::RegisteredService};

/// Inputs to one access decision.
#[derive(Debug, Clone, Copy)]
pub struct AccessContext<'a> {
    /// The identifier the service presented.
    pub service: &'a str,
    /// The catalog entry that matched, if any.
    pub registered_service: Option<&'a RegisteredService>,
    /// Who the ticket would be issued for.
    pub principal: &'a Principal,
    /// The ticket follows a fresh login rather than an existing session.
    pub from_new_login: bool,
    /// The request is for a proxy-granting ticket.
    pub proxying: bool,
}

/// Outcome of [`AccessStrategyEnforcer::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessDecision {
    /// Whether access is granted.
    pub allowed: bool,
    /// Why access was denied; `None` when allowed.
    pub reason: Option<DenialReason>,
}

impl AccessDecision {
    /// A granting decision.
    #[must_use]
    pub const fn allow() -> Self {
        Self { allowed: true, reason: None }
    }

    /// A denying decision.
    #[must_use]
    pub const fn deny(reason: DenialReason) -> Self {
        Self { allowed: false, reason: Some(reason) }
    }
}

/// Evaluates registered-service access strategies.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessStrategyEnforcer;

impl AccessStrategyEnforcer {
    /// Decides whether the request in `context` may proceed.
    #[must_use]
    pub fn evaluate(&self, context: &AccessContext<'_>) -> AccessDecision {
        let Some(registered) = context.registered_service else {
            return AccessDecision::deny(DenialReason::ServiceNotRegistered);
        };
        let strategy = &registered.access_strategy;

        if !strategy.enabled {
            return AccessDecision::deny(DenialReason::ServiceDisabled);
        }
        if !strategy.sso_enabled && !context.from_new_login {
            return AccessDecision::deny(DenialReason::SsoNotAllowed);
        }

        let attributes_satisfied = strategy.required_attributes.iter().all(|(name, accepted)| {
            match context.principal.attribute(name) {
                Some(values) if accepted.is_empty() => !values.is_empty(),
                Some(values) => values.iter().any(|value| accepted.contains(value)),
                None => false,
            }
        });
        if !attributes_satisfied {
            return AccessDecision::deny(DenialReason::RequiredAttributeMissing);
        }

        if context.proxying && !registered.proxy_policy.allowed {
            return AccessDecision::deny(DenialReason::ProxyingNotAllowed);
        }

        AccessDecision::allow()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::collections::{BTreeSet, HashMap};

    use ssobroker_tickets::Attributes;

    use super::*;
    use crate::service::{AccessStrategy, ProxyPolicy};

    fn principal(groups: &[&str]) -> Principal {
        let mut attributes = Attributes::new();
        attributes.insert("memberOf".into(), groups.iter().map(|g| (*g).to_owned()).collect());
        Principal::builder().id("alice").attributes(attributes).build()
    }

    fn registered(strategy: AccessStrategy) -> RegisteredService {
        RegisteredService::builder()
            .id(1)
            .service_id("svcA")
            .name("A")
            .access_strategy(strategy)
            .build()
    }

    fn decide(
        registered: Option<&RegisteredService>,
        principal: &Principal,
        from_new_login: bool,
        proxying: bool,
    ) -> AccessDecision {
        AccessStrategyEnforcer.evaluate(&AccessContext {
            service: "svcA",
            registered_service: registered,
            principal,
            from_new_login,
            proxying,
        })
    }

    #[test]
    fn test_unregistered_is_denied() {
        let decision = decide(None, &principal(&[]), true, false);
        assert_eq!(decision, AccessDecision::deny(DenialReason::ServiceNotRegistered));
    }

    #[test]
    fn test_default_strategy_allows() {
        let svc = registered(AccessStrategy::default());
        assert_eq!(decide(Some(&svc), &principal(&[]), false, false), AccessDecision::allow());
    }

    #[test]
    fn test_disabled_is_denied_before_other_rules() {
        let strategy = AccessStrategy::builder().enabled(false).sso_enabled(false).build();
        let svc = registered(strategy);
        assert_eq!(
            decide(Some(&svc), &principal(&[]), false, false).reason,
            Some(DenialReason::ServiceDisabled)
        );
    }

    #[test]
    fn test_sso_disabled_requires_new_login() {
        let svc = registered(AccessStrategy::builder().sso_enabled(false).build());
        assert_eq!(
            decide(Some(&svc), &principal(&[]), false, false).reason,
            Some(DenialReason::SsoNotAllowed)
        );
        assert!(decide(Some(&svc), &principal(&[]), true, false).allowed);
    }

    #[test]
    fn test_required_attribute_values() {
        let mut required = HashMap::new();
        required.insert("memberOf".to_owned(), BTreeSet::from(["admins".to_owned()]));
        let svc = registered(AccessStrategy::builder().required_attributes(required).build());

        assert_eq!(
            decide(Some(&svc), &principal(&["staff"]), true, false).reason,
            Some(DenialReason::RequiredAttributeMissing)
        );
        assert!(decide(Some(&svc), &principal(&["staff", "admins"]), true, false).allowed);
    }

    #[test]
    fn test_required_attribute_presence_only() {
        let mut required = HashMap::new();
        required.insert("memberOf".to_owned(), BTreeSet::new());
        let svc = registered(AccessStrategy::builder().required_attributes(required).build());

        assert!(decide(Some(&svc), &principal(&["anything"]), true, false).allowed);
        assert!(!decide(Some(&svc), &principal(&[]), true, false).allowed);
        let bare = Principal::builder().id("bob").build();
        assert!(!decide(Some(&svc), &bare, true, false).allowed);
    }

    #[test]
    fn test_proxying_needs_policy() {
        let mut svc = registered(AccessStrategy::default());
        assert_eq!(
            decide(Some(&svc), &principal(&[]), false, true).reason,
            Some(DenialReason::ProxyingNotAllowed)
        );
        svc.proxy_policy = ProxyPolicy { allowed: true };
        assert!(decide(Some(&svc), &principal(&[]), false, true).allowed);
    }
}
