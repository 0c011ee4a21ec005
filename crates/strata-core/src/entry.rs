//! Cache entries and their freshness horizons.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::props::CacheProps;

/// A cached value together with its two freshness horizons.
///
/// `live_until` is the dead horizon: once it passes the entry may no longer
/// be served and is treated as absent. `stale_after` is the stale horizon:
/// once it passes the entry is still servable but should be refreshed in the
/// background. `None` means unlimited on either axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub value: T,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub live_until: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub stale_after: Option<OffsetDateTime>,
}

impl<T> CacheEntry<T> {
    /// Wrap a bare value into an entry with unlimited horizons.
    #[must_use]
    pub fn of(value: T) -> Self {
        Self {
            value,
            live_until: None,
            stale_after: None,
        }
    }

    /// Build an entry with explicit horizons.
    #[must_use]
    pub fn new(
        value: T,
        live_until: Option<OffsetDateTime>,
        stale_after: Option<OffsetDateTime>,
    ) -> Self {
        Self {
            value,
            live_until,
            stale_after,
        }
    }

    /// Whether the dead horizon has passed. Dead entries are treated as
    /// absent everywhere.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.live_until
            .is_some_and(|t| OffsetDateTime::now_utc() >= t)
    }

    /// Whether the stale horizon has passed. Stale entries are still served
    /// but want a background refresh.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.stale_after
            .is_some_and(|t| OffsetDateTime::now_utc() >= t)
    }

    /// Neither dead nor stale.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.is_dead() && !self.is_stale()
    }

    /// Tighten the horizons to the bounds a cache policy allows.
    ///
    /// Horizons only ever shrink: a per-write hint can never outlive the
    /// policy of the tier the entry lands in. With both policy bounds unset
    /// the entry passes through unchanged.
    #[must_use]
    pub fn limit(self, props: &CacheProps) -> Self {
        let now = OffsetDateTime::now_utc();
        let live_bound = props.time_to_live.map(|ttl| now + ttl);
        let stale_bound = props.time_to_stale.map(|tts| now + tts);
        Self {
            value: self.value,
            live_until: tighten(self.live_until, live_bound),
            stale_after: tighten(self.stale_after, stale_bound),
        }
    }

    /// Transform the value while keeping both horizons.
    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheEntry<U> {
        CacheEntry {
            value: f(self.value),
            live_until: self.live_until,
            stale_after: self.stale_after,
        }
    }
}

fn tighten(
    current: Option<OffsetDateTime>,
    bound: Option<OffsetDateTime>,
) -> Option<OffsetDateTime> {
    match (current, bound) {
        (Some(c), Some(b)) => Some(c.min(b)),
        (None, bound) => bound,
        (current, None) => current,
    }
}
