//! In-memory [`CacheEngine`] backed by [`DashMap`].
//!
//! Each key maps to one typed entry; the `DashMap` shard lock makes every
//! operation atomic per key, including the scripted [`update_hash`]
//! closure, which runs entirely under the entry guard.
//!
//! [`update_hash`]: CacheEngine::update_hash

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use dashmap::DashMap;

use super::engine::{CacheEngine, CacheError, HashUpdateFn};

/// One typed value slot. Mirrors the Redis rule that a key holds exactly
/// one kind of value; mixing kinds is a [`CacheError::WrongType`].
enum Entry {
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    Zset(BTreeMap<String, f64>),
    Counter(i64),
}

/// Process-local cache for a single-node server and for tests.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    fn wrong_type(key: &str) -> CacheError {
        CacheError::WrongType {
            key: key.to_string(),
        }
    }
}

#[async_trait]
impl CacheEngine for MemoryCache {
    async fn hset(&self, key: &str, fields: Vec<(String, String)>) -> Result<(), CacheError> {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Hash(HashMap::new()));
        match entry.value_mut() {
            Entry::Hash(map) => {
                for (field, value) in fields {
                    map.insert(field, value);
                }
                Ok(())
            }
            _ => Err(Self::wrong_type(key)),
        }
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, CacheError> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(entry) => match entry.value() {
                Entry::Hash(map) => Ok(map.get(field).cloned()),
                _ => Err(Self::wrong_type(key)),
            },
        }
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        match self.entries.get(key) {
            None => Ok(HashMap::new()),
            Some(entry) => match entry.value() {
                Entry::Hash(map) => Ok(map.clone()),
                _ => Err(Self::wrong_type(key)),
            },
        }
    }

    async fn hdel(&self, key: &str, fields: &[&str]) -> Result<u64, CacheError> {
        match self.entries.get_mut(key) {
            None => Ok(0),
            Some(mut entry) => match entry.value_mut() {
                Entry::Hash(map) => {
                    let mut removed = 0;
                    for field in fields {
                        if map.remove(*field).is_some() {
                            removed += 1;
                        }
                    }
                    Ok(removed)
                }
                _ => Err(Self::wrong_type(key)),
            },
        }
    }

    async fn update_hash(&self, key: &str, f: HashUpdateFn) -> Result<bool, CacheError> {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Hash(HashMap::new()));
        match entry.value_mut() {
            Entry::Hash(map) => {
                // Run the script on a scratch copy so an aborted update
                // leaves the stored hash untouched.
                let mut scratch = map.clone();
                if f(&mut scratch) {
                    *map = scratch;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            _ => Err(Self::wrong_type(key)),
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Set(HashSet::new()));
        match entry.value_mut() {
            Entry::Set(set) => Ok(set.insert(member.to_string())),
            _ => Err(Self::wrong_type(key)),
        }
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        match self.entries.get_mut(key) {
            None => Ok(false),
            Some(mut entry) => match entry.value_mut() {
                Entry::Set(set) => Ok(set.remove(member)),
                _ => Err(Self::wrong_type(key)),
            },
        }
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, CacheError> {
        match self.entries.get(key) {
            None => Ok(Vec::new()),
            Some(entry) => match entry.value() {
                Entry::Set(set) => Ok(set.iter().cloned().collect()),
                _ => Err(Self::wrong_type(key)),
            },
        }
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        match self.entries.get(key) {
            None => Ok(false),
            Some(entry) => match entry.value() {
                Entry::Set(set) => Ok(set.contains(member)),
                _ => Err(Self::wrong_type(key)),
            },
        }
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), CacheError> {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Zset(BTreeMap::new()));
        match entry.value_mut() {
            Entry::Zset(zset) => {
                zset.insert(member.to_string(), score);
                Ok(())
            }
            _ => Err(Self::wrong_type(key)),
        }
    }

    async fn zrangebyscore(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<(String, f64)>, CacheError> {
        match self.entries.get(key) {
            None => Ok(Vec::new()),
            Some(entry) => match entry.value() {
                Entry::Zset(zset) => {
                    let mut members: Vec<(String, f64)> = zset
                        .iter()
                        .filter(|(_, score)| **score >= min && **score <= max)
                        .map(|(member, score)| (member.clone(), *score))
                        .collect();
                    members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
                    Ok(members)
                }
                _ => Err(Self::wrong_type(key)),
            },
        }
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, CacheError> {
        match self.entries.get_mut(key) {
            None => Ok(false),
            Some(mut entry) => match entry.value_mut() {
                Entry::Zset(zset) => Ok(zset.remove(member).is_some()),
                _ => Err(Self::wrong_type(key)),
            },
        }
    }

    async fn incr(&self, key: &str) -> Result<i64, CacheError> {
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert(Entry::Counter(0));
        match entry.value_mut() {
            Entry::Counter(n) => {
                *n += 1;
                Ok(*n)
            }
            _ => Err(Self::wrong_type(key)),
        }
    }

    async fn del(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.contains_key(key))
    }
}
