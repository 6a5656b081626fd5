//! In-process lock registries.
//!
//! Two keyed registries guard shared state:
//!
//! - **run locks** (`tokio::sync::Mutex` per normalized address): at most one
//!   pipeline run or submission per address at a time.
//! - **cache locks** (`tokio::sync::RwLock` per `organization/repository`):
//!   the synchronizer writes the working copy, generation reads it.
//!
//! Entries are created on first use and live as long as the registry. Locks
//! do not extend across processes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, RwLock as AsyncRwLock};

#[derive(Default)]
pub struct LockRegistry {
    runs: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    caches: Mutex<HashMap<String, Arc<AsyncRwLock<()>>>>,
}

// The maps only ever gain entries, so a poisoned guard is still consistent.
fn guard<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run lock for a normalized warehouse address.
    pub fn run_lock(&self, address: &str) -> Arc<AsyncMutex<()>> {
        guard(&self.runs)
            .entry(address.to_string())
            .or_default()
            .clone()
    }

    /// Cache lock for an `organization/repository` key.
    pub fn cache_lock(&self, cache_key: &str) -> Arc<AsyncRwLock<()>> {
        guard(&self.caches)
            .entry(cache_key.to_string())
            .or_default()
            .clone()
    }
}
