//! Expiration policies.
//!
//! A policy is a small `Copy` value stored inside each ticket. It never
//! mutates during evaluation, so one policy can be read from any number of
//! tasks at once, and it serializes alongside the ticket for backends that
//! persist records out of process.
//!
//! All comparisons are made on whole seconds: a ticket with a 2 second idle
//! window is still valid exactly 2 seconds after its last use and expired
//! at 3.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::ticket::Ticket;

/// Rule deciding when a ticket stops being usable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExpirationPolicy {
    /// The ticket never expires by time or use.
    NeverExpires,

    /// Expires a fixed time after creation, regardless of use.
    HardTimeout {
        /// Lifetime measured from creation.
        #[serde(with = "humantime_serde")]
        time_to_live: Duration,
    },

    /// Expires when either the idle window or the absolute lifetime lapses.
    IdleAndHardTimeout {
        /// Longest allowed gap since the last use.
        #[serde(with = "humantime_serde")]
        max_idle: Duration,
        /// Lifetime measured from creation.
        #[serde(with = "humantime_serde")]
        max_lifetime: Duration,
    },

    /// Expires after `uses` uses or once `time_to_live` has passed since
    /// creation, whichever comes first. `uses = 1` is a single-use ticket.
    MultiUseOrTimeout {
        /// Number of uses allowed.
        uses: u32,
        /// Lifetime measured from creation.
        #[serde(with = "humantime_serde")]
        time_to_live: Duration,
    },
}

impl ExpirationPolicy {
    /// Returns `true` if `ticket` is expired at `now`.
    #[must_use]
    pub fn is_expired(&self, ticket: &Ticket, now: DateTime<Utc>) -> bool {
        match *self {
            Self::NeverExpires => false,
            Self::HardTimeout { time_to_live } => {
                exceeds(ticket.creation_time(), now, time_to_live)
            },
            Self::IdleAndHardTimeout { max_idle, max_lifetime } => {
                exceeds(ticket.creation_time(), now, max_lifetime)
                    || exceeds(ticket.last_time_used(), now, max_idle)
            },
            Self::MultiUseOrTimeout { uses, time_to_live } => {
                ticket.count_of_uses() >= u64::from(uses)
                    || exceeds(ticket.creation_time(), now, time_to_live)
            },
        }
    }

    /// Absolute lifetime allowed by the policy, if bounded.
    #[must_use]
    pub fn time_to_live(&self) -> Option<Duration> {
        match *self {
            Self::NeverExpires => None,
            Self::HardTimeout { time_to_live } | Self::MultiUseOrTimeout { time_to_live, .. } => {
                Some(time_to_live)
            },
            Self::IdleAndHardTimeout { max_lifetime, .. } => Some(max_lifetime),
        }
    }

    /// Idle window allowed by the policy, if any.
    #[must_use]
    pub fn time_to_idle(&self) -> Option<Duration> {
        match *self {
            Self::IdleAndHardTimeout { max_idle, .. } => Some(max_idle),
            _ => None,
        }
    }

    /// Latest instant at which `ticket` is still valid by time alone.
    ///
    /// Use-count exhaustion is not reflected here. Token issuers use this
    /// for the `exp` claim.
    #[must_use]
    pub fn expires_at(&self, ticket: &Ticket) -> Option<DateTime<Utc>> {
        match *self {
            Self::NeverExpires => None,
            Self::HardTimeout { time_to_live } | Self::MultiUseOrTimeout { time_to_live, .. } => {
                Some(offset(ticket.creation_time(), time_to_live))
            },
            Self::IdleAndHardTimeout { max_idle, max_lifetime } => Some(
                offset(ticket.creation_time(), max_lifetime)
                    .min(offset(ticket.last_time_used(), max_idle)),
            ),
        }
    }
}

/// Whole seconds elapsed from `since` to `now` are strictly greater than `limit`.
fn exceeds(since: DateTime<Utc>, now: DateTime<Utc>, limit: Duration) -> bool {
    let elapsed = (now - since).num_seconds();
    let limit = i64::try_from(limit.as_secs()).unwrap_or(i64::MAX);
    elapsed > limit
}

fn offset(from: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(by)
        .ok()
        .and_then(|delta| from.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::testutil::{alice, service_ticket_for};

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn ticket_with(policy: ExpirationPolicy, created: DateTime<Utc>) -> Ticket {
        Ticket::ticket_granting("TGT-1", alice(), policy, created)
    }

    #[test]
    fn test_never_expires() {
        let start = Utc::now();
        let ticket = ticket_with(ExpirationPolicy::NeverExpires, start);
        assert!(!ticket.is_expired(start + TimeDelta::days(36_500)));
        assert_eq!(ExpirationPolicy::NeverExpires.expires_at(&ticket), None);
    }

    #[test]
    fn test_hard_timeout_ignores_activity() {
        let start = Utc::now();
        let policy = ExpirationPolicy::HardTimeout { time_to_live: secs(10) };
        let mut ticket = ticket_with(policy, start);

        ticket.record_use(start + TimeDelta::seconds(9));
        assert!(!ticket.is_expired(start + TimeDelta::seconds(10)));
        assert!(ticket.is_expired(start + TimeDelta::seconds(11)));
        assert_eq!(policy.expires_at(&ticket), Some(start + TimeDelta::seconds(10)));
    }

    #[test]
    fn test_idle_window_slides_with_use() {
        let start = Utc::now();
        let policy = ExpirationPolicy::IdleAndHardTimeout { max_idle: secs(2), max_lifetime: secs(10) };
        let mut ticket = ticket_with(policy, start);

        ticket.record_use(start + TimeDelta::seconds(1));
        assert!(!ticket.is_expired(start + TimeDelta::seconds(3)));
        assert!(ticket.is_expired(start + TimeDelta::seconds(4)));
        assert_eq!(policy.expires_at(&ticket), Some(start + TimeDelta::seconds(3)));
    }

    #[test]
    fn test_hard_limit_wins_over_continuous_activity() {
        let start = Utc::now();
        let policy = ExpirationPolicy::IdleAndHardTimeout { max_idle: secs(2), max_lifetime: secs(10) };
        let mut ticket = ticket_with(policy, start);

        for elapsed in 1..=11 {
            ticket.record_use(start + TimeDelta::seconds(elapsed));
        }
        assert!(!ticket.is_expired(start + TimeDelta::seconds(10)));
        assert!(ticket.is_expired(start + TimeDelta::seconds(11)));
    }

    #[test]
    fn test_single_use_expires_after_first_use() {
        let start = Utc::now();
        let mut st = service_ticket_for("ST-1", "TGT-1", "svc", alice());
        assert!(!st.is_expired(st.creation_time()));

        st.record_use(start);
        assert!(st.is_expired(st.creation_time()));
    }

    #[test]
    fn test_multi_use_counts_down() {
        let start = Utc::now();
        let policy = ExpirationPolicy::MultiUseOrTimeout { uses: 3, time_to_live: secs(60) };
        let mut ticket = ticket_with(policy, start);

        ticket.record_use(start);
        ticket.record_use(start);
        assert!(!ticket.is_expired(start));
        ticket.record_use(start);
        assert!(ticket.is_expired(start));
    }

    #[test]
    fn test_accessors() {
        let idle = ExpirationPolicy::IdleAndHardTimeout { max_idle: secs(2), max_lifetime: secs(10) };
        assert_eq!(idle.time_to_idle(), Some(secs(2)));
        assert_eq!(idle.time_to_live(), Some(secs(10)));

        let hard = ExpirationPolicy::HardTimeout { time_to_live: secs(30) };
        assert_eq!(hard.time_to_idle(), None);
        assert_eq!(hard.time_to_live(), Some(secs(30)));

        assert_eq!(ExpirationPolicy::NeverExpires.time_to_live(), None);
    }

    #[test]
    fn test_serde_uses_humantime() {
        let policy = ExpirationPolicy::MultiUseOrTimeout { uses: 1, time_to_live: secs(10) };
        let json = serde_json::to_value(policy).expect("serialize");
        assert_eq!(json["type"], "multi_use_or_timeout");
        assert_eq!(json["time_to_live"], "10s");

        let back: ExpirationPolicy = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, policy);
    }

    mod proptest_tests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            /// Gaps of at most `max_idle` never trip the idle clock before the
            /// hard limit, and the hard limit always trips past `max_lifetime`.
            #[test]
            fn prop_idle_and_hard_limits(
                max_idle in 1u64..30,
                extra in 1u64..300,
                gaps in proptest::collection::vec(0u64..30, 0..40),
            ) {
                let max_lifetime = max_idle + extra;
                let policy = ExpirationPolicy::IdleAndHardTimeout {
                    max_idle: secs(max_idle),
                    max_lifetime: secs(max_lifetime),
                };
                let start = Utc::now();
                let mut ticket = ticket_with(policy, start);
                let mut elapsed = 0u64;

                for gap in gaps {
                    let gap = gap.min(max_idle);
                    elapsed += gap;
                    let now = start + TimeDelta::seconds(elapsed as i64);
                    prop_assert_eq!(ticket.is_expired(now), elapsed > max_lifetime);
                    ticket.record_use(now);
                }

                let past_hard = start + TimeDelta::seconds((max_lifetime + 1) as i64);
                prop_assert!(ticket.is_expired(past_hard));
            }

            #[test]
            fn prop_idle_gap_beyond_window_expires(max_idle in 1u64..60, over in 1u64..60) {
                let policy = ExpirationPolicy::IdleAndHardTimeout {
                    max_idle: secs(max_idle),
                    max_lifetime: secs(10_000),
                };
                let start = Utc::now();
                let ticket = ticket_with(policy, start);

                prop_assert!(!ticket.is_expired(start + TimeDelta::seconds(max_idle as i64)));
                prop_assert!(ticket.is_expired(start + TimeDelta::seconds((max_idle + over) as i64)));
            }
        }
    }
}
