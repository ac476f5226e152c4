//! Expiring cache for successful reads.
//!
//! Entries live in the shared key-value store under the `cache_` prefix and
//! are checked for freshness when read. Stale entries are deleted on the read
//! that finds them; caching failures never fail the caller.

mod entry;
mod ttl;

pub use entry::CacheEntry;
pub use ttl::{TtlCache, CACHE_PREFIX};
