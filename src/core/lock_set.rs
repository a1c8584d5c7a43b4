//! Advisory locks on cache entries
//!
//! A consumer locks an entry before reading it and unlocks it afterwards.
//! Nothing blocks: the set only records membership so the command loop can
//! refuse to evict or remove entries that are in use.

use std::collections::HashSet;

use super::error::{CacheError, CacheResult};

#[derive(Debug, Default)]
pub struct LockSet {
    locked: HashSet<String>,
}

impl LockSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&mut self, name: &str) -> CacheResult<()> {
        if !self.locked.insert(name.to_string()) {
            return Err(CacheError::AlreadyLocked {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    pub fn unlock(&mut self, name: &str) -> CacheResult<()> {
        if !self.locked.remove(name) {
            return Err(CacheError::NotLocked {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    pub fn is_locked(&self, name: &str) -> bool {
        self.locked.contains(name)
    }

    pub fn len(&self) -> usize {
        self.locked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locked.is_empty()
    }
}
