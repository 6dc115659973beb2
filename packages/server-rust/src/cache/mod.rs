//! Hot-state cache: the authoritative copy of mutable game state while a
//! player is online.
//!
//! [`CacheEngine`] is the Redis-shaped keyed store; [`MemoryCache`] is the
//! in-process implementation used by the single-node server and by tests.
//! [`keys`] defines the key layout shared by the managers and the batch
//! sync coordinator.

pub mod engine;
pub mod keys;
pub mod memory;

pub use engine::{CacheEngine, CacheError, HashUpdateFn};
pub use keys::DirtyCategory;
pub use memory::MemoryCache;
