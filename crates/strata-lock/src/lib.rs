pub mod error;
pub mod local;
pub mod lock;
pub mod provider;
pub mod service;

pub use error::{LockError, Result};
pub use local::LocalLockProvider;
pub use lock::{
    AdvisoryLock, LockOptions, LockProps, ProviderLock, RetryProps, DEFAULT_LOCK_DURATION,
    DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY,
};
pub use provider::AdvisoryLockProvider;
pub use service::LockService;
