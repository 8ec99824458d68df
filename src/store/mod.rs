//! Versioned bucket storage for cached responses.
//!
//! Buckets partition the cache by asset class (app shell, api responses,
//! images) and are versioned as a unit: activation deletes every bucket whose
//! name is not in the current version's allow-list. The storage port keeps the
//! serving logic testable against an in-memory fake.

mod memory;
mod sqlite;
mod traits;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{BucketKind, BucketSet, CacheStore};
