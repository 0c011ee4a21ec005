//! Cache metrics, recorded through the `metrics` facade.
//!
//! Nothing here installs an exporter; embedding applications pick one and
//! these counters show up under the names below.

use metrics::counter;

/// Metric names.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "strata_cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "strata_cache_misses_total";
    pub const CACHE_REVALIDATIONS_TOTAL: &str = "strata_cache_revalidations_total";
}

/// Record a hit, labeled with the tier that answered.
pub fn record_cache_hit(tier: &str) {
    counter!(names::CACHE_HITS_TOTAL, "tier" => tier.to_string()).increment(1);
}

/// Record keys no tier could answer.
pub fn record_cache_misses(count: u64) {
    if count > 0 {
        counter!(names::CACHE_MISSES_TOTAL).increment(count);
    }
}

/// Record a spawned background revalidation.
pub fn record_revalidation(cache: &str) {
    counter!(names::CACHE_REVALIDATIONS_TOTAL, "cache" => cache.to_string()).increment(1);
}
