//! Broker configuration and per-kind expiration policy selection.
//!
//! [`CasConfig`] can be deserialized from any serde format (durations use
//! `humantime` strings such as `"2h"` or `"10s"`) or built in code with
//! [`CasConfig::builder`]. Either way it must pass [`CasConfig::validate`]
//! before the orchestrator accepts it.
//!
//! ```
//! use std::time::Duration;
//!
//! use ssobroker_cas::config::{CasConfig, UsageLimit};
//!
//! let config = CasConfig::builder()
//!     .service_ticket(UsageLimit { uses: 1, time_to_live: Duration::from_secs(30) })
//!     .issuer("https://sso.example.org")
//!     .build()?;
//! assert_eq!(config.service_ticket.time_to_live, Duration::from_secs(30));
//! # Ok::<(), ssobroker_cas::ConfigError>(())
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use ssobroker_tickets::ExpirationPolicy;

use crate::error::ConfigError;

const DEFAULT_TGT_MAX_IDLE: Duration = Duration::from_secs(2 * 60 * 60);
const DEFAULT_TGT_MAX_LIFETIME: Duration = Duration::from_secs(8 * 60 * 60);
const DEFAULT_ST_TIME_TO_LIVE: Duration = Duration::from_secs(10);
const DEFAULT_ACCESS_TOKEN_TTL: Duration = Duration::from_secs(2 * 60 * 60);
const DEFAULT_REFRESH_TOKEN_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);
const DEFAULT_SAML_ARTIFACT_TTL: Duration = Duration::from_secs(60);
const DEFAULT_ISSUER: &str = "https://localhost/sso";
const DEFAULT_TICKET_ID_SUFFIX: &str = "sso";

/// Idle and hard limits for session tickets (TGT, PGT).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionTimeouts {
    /// Expire after this long without use.
    #[serde(with = "humantime_serde", default = "default_max_idle")]
    pub max_idle: Duration,
    /// Expire this long after creation regardless of use.
    #[serde(with = "humantime_serde", default = "default_max_lifetime")]
    pub max_lifetime: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self { max_idle: default_max_idle(), max_lifetime: default_max_lifetime() }
    }
}

/// Use count and time window for service and proxy tickets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UsageLimit {
    /// Successful validations allowed before the ticket is consumed.
    #[serde(default = "default_uses")]
    pub uses: u32,
    /// Window from creation in which the ticket may be validated.
    #[serde(with = "humantime_serde", default = "default_st_time_to_live")]
    pub time_to_live: Duration,
}

impl Default for UsageLimit {
    fn default() -> Self {
        Self { uses: default_uses(), time_to_live: default_st_time_to_live() }
    }
}

/// Fixed lifetime for tokens and artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeToLive {
    /// Lifetime measured from creation.
    #[serde(with = "humantime_serde")]
    pub time_to_live: Duration,
}

fn default_max_idle() -> Duration {
    DEFAULT_TGT_MAX_IDLE
}

fn default_max_lifetime() -> Duration {
    DEFAULT_TGT_MAX_LIFETIME
}

fn default_uses() -> u32 {
    1
}

fn default_st_time_to_live() -> Duration {
    DEFAULT_ST_TIME_TO_LIVE
}

fn default_access_token() -> TimeToLive {
    TimeToLive { time_to_live: DEFAULT_ACCESS_TOKEN_TTL }
}

fn default_refresh_token() -> TimeToLive {
    TimeToLive { time_to_live: DEFAULT_REFRESH_TOKEN_TTL }
}

fn default_saml_artifact() -> TimeToLive {
    TimeToLive { time_to_live: DEFAULT_SAML_ARTIFACT_TTL }
}

fn default_issuer() -> String {
    DEFAULT_ISSUER.to_owned()
}

fn default_ticket_id_suffix() -> String {
    DEFAULT_TICKET_ID_SUFFIX.to_owned()
}

/// Configuration for the central authentication service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CasConfig {
    /// Login session limits.
    #[serde(default)]
    pub ticket_granting: SessionTimeouts,
    /// Proxy session limits.
    #[serde(default)]
    pub proxy_granting: SessionTimeouts,
    /// Service ticket usage limit.
    #[serde(default)]
    pub service_ticket: UsageLimit,
    /// Proxy ticket usage limit.
    #[serde(default)]
    pub proxy_ticket: UsageLimit,
    /// OAuth access token lifetime.
    #[serde(default = "default_access_token")]
    pub access_token: TimeToLive,
    /// OAuth refresh token lifetime.
    #[serde(default = "default_refresh_token")]
    pub refresh_token: TimeToLive,
    /// SAML artifact lifetime.
    #[serde(default = "default_saml_artifact")]
    pub saml_artifact: TimeToLive,
    /// Issuer reported in tokens and introspection responses.
    #[serde(default = "default_issuer")]
    pub issuer: String,
    /// Node suffix appended to every ticket id.
    #[serde(default = "default_ticket_id_suffix")]
    pub ticket_id_suffix: String,
}

#[bon::bon]
impl CasConfig {
    /// Creates a validated configuration. Unset fields take the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any duration or use count is zero, a hard
    /// limit is shorter than its idle limit, or the issuer is empty.
    #[builder]
    pub fn new(
        #[builder(default)] ticket_granting: SessionTimeouts,
        #[builder(default)] proxy_granting: SessionTimeouts,
        #[builder(default)] service_ticket: UsageLimit,
        #[builder(default)] proxy_ticket: UsageLimit,
        #[builder(default = default_access_token())] access_token: TimeToLive,
        #[builder(default = default_refresh_token())] refresh_token: TimeToLive,
        #[builder(default = default_saml_artifact())] saml_artifact: TimeToLive,
        #[builder(default = default_issuer(), into)] issuer: String,
        #[builder(default = default_ticket_id_suffix(), into)] ticket_id_suffix: String,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            ticket_granting,
            proxy_granting,
            service_ticket,
            proxy_ticket,
            access_token,
            refresh_token,
            saml_artifact,
            issuer,
            ticket_id_suffix,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks every limit. Deserialized configurations should be passed
    /// through this before use.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        session("ticket_granting.max_idle", "ticket_granting.max_lifetime", &self.ticket_granting)?;
        session("proxy_granting.max_idle", "proxy_granting.max_lifetime", &self.proxy_granting)?;
        usage("service_ticket.uses", "service_ticket.time_to_live", &self.service_ticket)?;
        usage("proxy_ticket.uses", "proxy_ticket.time_to_live", &self.proxy_ticket)?;
        non_zero("access_token.time_to_live", self.access_token.time_to_live)?;
        non_zero("refresh_token.time_to_live", self.refresh_token.time_to_live)?;
        non_zero("saml_artifact.time_to_live", self.saml_artifact.time_to_live)?;
        if self.issuer.trim().is_empty() {
            return Err(ConfigError::Invalid { field: "issuer", reason: "must not be empty".into() });
        }
        if self.ticket_id_suffix.contains(char::is_whitespace) {
            return Err(ConfigError::Invalid {
                field: "ticket_id_suffix",
                reason: "must not contain whitespace".into(),
            });
        }
        Ok(())
    }
}

impl Default for CasConfig {
    fn default() -> Self {
        Self {
            ticket_granting: SessionTimeouts::default(),
            proxy_granting: SessionTimeouts::default(),
            service_ticket: UsageLimit::default(),
            proxy_ticket: UsageLimit::default(),
            access_token: default_access_token(),
            refresh_token: default_refresh_token(),
            saml_artifact: default_saml_artifact(),
            issuer: default_issuer(),
            ticket_id_suffix: default_ticket_id_suffix(),
        }
    }
}

fn non_zero(field: &'static str, value: Duration) -> Result<(), ConfigError> {
    // Expiry compares whole seconds, so anything under one second is zero.
    if value.as_secs() == 0 {
        return Err(ConfigError::BelowMinimum {
            field,
            min: "1s".into(),
            value: format!("{value:?}"),
        });
    }
    Ok(())
}

fn session(
    idle_field: &'static str,
    lifetime_field: &'static str,
    timeouts: &SessionTimeouts,
) -> Result<(), ConfigError> {
    non_zero(idle_field, timeouts.max_idle)?;
    non_zero(lifetime_field, timeouts.max_lifetime)?;
    if timeouts.max_lifetime < timeouts.max_idle {
        return Err(ConfigError::Invalid {
            field: lifetime_field,
            reason: "must not be shorter than max_idle".into(),
        });
    }
    Ok(())
}

fn usage(
    uses_field: &'static str,
    ttl_field: &'static str,
    limit: &UsageLimit,
) -> Result<(), ConfigError> {
    if limit.uses == 0 {
        return Err(ConfigError::BelowMinimum { field: uses_field, min: "1".into(), value: "0".into() });
    }
    non_zero(ttl_field, limit.time_to_live)
}

/// Expiration policy for every ticket kind, derived from a [`CasConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationPolicies {
    /// Login sessions.
    pub ticket_granting: ExpirationPolicy,
    /// Proxy sessions.
    pub proxy_granting: ExpirationPolicy,
    /// Service tickets (before any per-service override).
    pub service_ticket: ExpirationPolicy,
    /// Proxy tickets.
    pub proxy_ticket: ExpirationPolicy,
    /// OAuth access tokens.
    pub access_token: ExpirationPolicy,
    /// OAuth refresh tokens.
    pub refresh_token: ExpirationPolicy,
    /// SAML artifacts.
    pub saml_artifact: ExpirationPolicy,
}

impl ExpirationPolicies {
    /// Builds the policies for a configuration.
    #[must_use]
    pub fn from_config(config: &CasConfig) -> Self {
        Self {
            ticket_granting: idle_and_hard(&config.ticket_granting),
            proxy_granting: idle_and_hard(&config.proxy_granting),
            service_ticket: multi_use(&config.service_ticket),
            proxy_ticket: multi_use(&config.proxy_ticket),
            access_token: ExpirationPolicy::HardTimeout {
                time_to_live: config.access_token.time_to_live,
            },
            refresh_token: ExpirationPolicy::HardTimeout {
                time_to_live: config.refresh_token.time_to_live,
            },
            saml_artifact: ExpirationPolicy::HardTimeout {
                time_to_live: config.saml_artifact.time_to_live,
            },
        }
    }

    /// Service ticket policy with a registered service's use-count override.
    #[must_use]
    pub fn service_ticket_with_uses(&self, uses: Option<u32>) -> ExpirationPolicy {
        match (self.service_ticket, uses) {
            (ExpirationPolicy::MultiUseOrTimeout { time_to_live, .. }, Some(uses)) if uses > 0 => {
                ExpirationPolicy::MultiUseOrTimeout { uses, time_to_live }
            },
            (policy, _) => policy,
        }
    }
}

impl Default for ExpirationPolicies {
    fn default() -> Self {
        Self::from_config(&CasConfig::default())
    }
}

fn idle_and_hard(timeouts: &SessionTimeouts) -> ExpirationPolicy {
    ExpirationPolicy::IdleAndHardTimeout {
        max_idle: timeouts.max_idle,
        max_lifetime: timeouts.max_lifetime,
    }
}

fn multi_use(limit: &UsageLimit) -> ExpirationPolicy {
    ExpirationPolicy::MultiUseOrTimeout { uses: limit.uses, time_to_live: limit.time_to_live }
}
