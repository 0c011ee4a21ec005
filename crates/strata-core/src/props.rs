//! Cache policies and their defaulting rules.

use std::time::Duration;

use crate::error::{CacheError, Result};

/// Default soft capacity of a tier, in entries.
pub const DEFAULT_MAX_SIZE: u64 = 50_000;

/// Default dead horizon distance for newly written entries.
pub const DEFAULT_TIME_TO_LIVE: Duration = Duration::from_secs(24 * 60 * 60);

/// Default stale horizon distance for newly written entries.
pub const DEFAULT_TIME_TO_STALE: Duration = Duration::from_secs(60 * 60);

/// Resolved policy of a single cache tier.
///
/// `None` means unlimited on that axis. [`CachePropsOptions::build`] keeps at
/// least one of `max_size` and `time_to_live` set, so a tier can never be
/// configured to grow without bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheProps {
    /// Soft capacity in entries. Tiers enforce it opportunistically.
    pub max_size: Option<u64>,
    /// Upper bound on how far in the future a dead horizon may lie.
    pub time_to_live: Option<Duration>,
    /// Upper bound on how far in the future a stale horizon may lie.
    pub time_to_stale: Option<Duration>,
}

impl CacheProps {
    /// The all-defaults policy.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            max_size: Some(DEFAULT_MAX_SIZE),
            time_to_live: Some(DEFAULT_TIME_TO_LIVE),
            time_to_stale: Some(DEFAULT_TIME_TO_STALE),
        }
    }
}

impl Default for CacheProps {
    fn default() -> Self {
        Self::standard()
    }
}

/// Partial cache policy merged over the defaults by [`build`].
///
/// Each knob distinguishes "keep the default" (not set) from "explicitly
/// unlimited" (`no_*`), which is why the plain setters exist instead of
/// public fields.
///
/// [`build`]: CachePropsOptions::build
#[derive(Debug, Clone, Default)]
pub struct CachePropsOptions {
    max_size: Option<Option<u64>>,
    time_to_live: Option<Option<Duration>>,
    time_to_stale: Option<Option<Duration>>,
}

impl CachePropsOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the tier at `limit` entries.
    #[must_use]
    pub fn max_size(mut self, limit: u64) -> Self {
        self.max_size = Some(Some(limit));
        self
    }

    /// Remove the entry cap entirely.
    #[must_use]
    pub fn no_max_size(mut self) -> Self {
        self.max_size = Some(None);
        self
    }

    /// Bound dead horizons at `ttl` from write time.
    #[must_use]
    pub fn time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(Some(ttl));
        self
    }

    /// Let entries live forever unless a write says otherwise.
    #[must_use]
    pub fn no_time_to_live(mut self) -> Self {
        self.time_to_live = Some(None);
        self
    }

    /// Bound stale horizons at `tts` from write time.
    #[must_use]
    pub fn time_to_stale(mut self, tts: Duration) -> Self {
        self.time_to_stale = Some(Some(tts));
        self
    }

    /// Never mark entries stale; revalidation only happens on expiry.
    #[must_use]
    pub fn no_time_to_stale(mut self) -> Self {
        self.time_to_stale = Some(None);
        self
    }

    /// Merge these options over the defaults into a resolved policy.
    ///
    /// # Errors
    ///
    /// Fails when both `max_size` and `time_to_live` resolve to unlimited,
    /// since such a tier would grow without bound.
    pub fn build(self) -> Result<CacheProps> {
        let max_size = self.max_size.unwrap_or(Some(DEFAULT_MAX_SIZE));
        let time_to_live = self.time_to_live.unwrap_or(Some(DEFAULT_TIME_TO_LIVE));
        let time_to_stale = self.time_to_stale.unwrap_or(Some(DEFAULT_TIME_TO_STALE));

        if max_size.is_none() && time_to_live.is_none() {
            return Err(CacheError::configuration(
                "cache policy needs at least one growth bound: set max_size or time_to_live",
            ));
        }

        Ok(CacheProps {
            max_size,
            time_to_live,
            time_to_stale,
        })
    }
}
