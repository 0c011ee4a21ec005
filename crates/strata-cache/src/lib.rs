pub mod cache;
pub mod manager;
pub mod memory;
pub mod metrics;
pub mod provider;

pub use cache::{fetch_with, Cache, CacheBuilder, FetchFn, Fetcher};
pub use manager::{
    CacheEvictRequest, CacheManager, CacheSummary, CacheWriteEntry, CacheWriteRequest,
    ManagedCache, TierSummary,
};
pub use memory::MemoryCacheProvider;
pub use provider::CacheProvider;
