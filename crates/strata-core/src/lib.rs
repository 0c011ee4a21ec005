pub mod entry;
pub mod error;
pub mod key;
pub mod props;

pub use entry::CacheEntry;
pub use error::{CacheError, ErrorCategory, Result};
pub use key::{FullKey, KeyPattern, Namespace, ResourceKey, Sector};
pub use props::{CacheProps, CachePropsOptions};
