//! Keyed cache engine trait.
//!
//! The hot-state store speaks a small Redis-shaped surface: string-keyed
//! hashes, sets, sorted sets, counters, and one scripted read-modify-write
//! per hash key. Implementations guarantee **per-key atomicity**: each call
//! observes and produces a consistent value for its key. Cross-key ordering
//! is the manager layer's responsibility.

use std::collections::HashMap;

use async_trait::async_trait;

/// Closure applied atomically to one hash by [`CacheEngine::update_hash`].
///
/// Returning `false` aborts the update: the stored hash is left untouched.
pub type HashUpdateFn = Box<dyn FnOnce(&mut HashMap<String, String>) -> bool + Send>;

/// Errors from cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An operation was applied to a key holding a different kind of value.
    #[error("wrong value kind at cache key {key}")]
    WrongType { key: String },
    /// The backend is unreachable or failed internally.
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// Redis-shaped keyed store used for all hot game state.
///
/// Used as `Arc<dyn CacheEngine>` by every manager. All methods are async
/// because cache access is a suspension point; the in-memory implementation
/// never actually blocks.
#[async_trait]
pub trait CacheEngine: Send + Sync {
    // --- Hashes ---

    /// Sets the given fields on a hash, creating it if absent.
    async fn hset(&self, key: &str, fields: Vec<(String, String)>) -> Result<(), CacheError>;

    /// Reads one field of a hash.
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError>;

    /// Reads the whole hash. Missing keys read as empty.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, CacheError>;

    /// Deletes fields from a hash, returning how many existed.
    async fn hdel(&self, key: &str, fields: &[&str]) -> Result<u64, CacheError>;

    /// Applies `f` to the hash under the key's lock.
    ///
    /// This is the scripted compare-and-update: `f` sees the current field
    /// map, may mutate it, and returns whether to keep the result. Returns
    /// whether the update was applied.
    async fn update_hash(&self, key: &str, f: HashUpdateFn) -> Result<bool, CacheError>;

    // --- Sets ---

    /// Adds a member, returning `true` if it was not already present.
    async fn sadd(&self, key: &str, member: &str) -> Result<bool, CacheError>;

    /// Removes a member, returning `true` if it was present.
    async fn srem(&self, key: &str, member: &str) -> Result<bool, CacheError>;

    /// All members of a set. Missing keys read as empty.
    async fn smembers(&self, key: &str) -> Result<Vec<String>, CacheError>;

    /// Membership test.
    async fn sismember(&self, key: &str, member: &str) -> Result<bool, CacheError>;

    // --- Sorted sets ---

    /// Inserts or rescores a member.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), CacheError>;

    /// Members with `min <= score <= max`, ascending by score.
    async fn zrangebyscore(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<(String, f64)>, CacheError>;

    /// Removes a member, returning `true` if it was present.
    async fn zrem(&self, key: &str, member: &str) -> Result<bool, CacheError>;

    // --- Counters and keys ---

    /// Increments an integer counter, returning the new value. Missing
    /// counters start at zero.
    async fn incr(&self, key: &str) -> Result<i64, CacheError>;

    /// Removes a key of any kind, returning `true` if it existed.
    async fn del(&self, key: &str) -> Result<bool, CacheError>;

    /// Whether a key exists.
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;
}
