//! Per-agent belief store
//!
//! Beliefs are only reachable through explicit get/set calls, never through
//! variable lookup. `set` replaces the entry under the write lock and then
//! nudges the owning agent with [`Notify::notify_one`]. The nudge is issued
//! synchronously before `set` returns and never blocks; the scheduling
//! cycle it triggers runs later on the agent's loop task.

use chariot::runtime::error::lock_poisoned;
use chariot::{RuntimeResult, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Notify;
use tracing::trace;

#[derive(Debug)]
pub struct BeliefStore {
    entries: RwLock<HashMap<String, Value>>,
    wake: Arc<Notify>,
}

impl BeliefStore {
    pub fn new(wake: Arc<Notify>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            wake,
        }
    }

    pub fn get(&self, key: &str) -> RuntimeResult<Option<Value>> {
        Ok(self.entries.read().map_err(lock_poisoned)?.get(key).cloned())
    }

    pub fn set(&self, key: &str, value: Value) -> RuntimeResult<()> {
        self.entries
            .write()
            .map_err(lock_poisoned)?
            .insert(key.to_string(), value);
        trace!(key, "belief updated");
        self.wake.notify_one();
        Ok(())
    }

    pub fn snapshot(&self) -> RuntimeResult<HashMap<String, Value>> {
        Ok(self.entries.read().map_err(lock_poisoned)?.clone())
    }

    pub fn len(&self) -> RuntimeResult<usize> {
        Ok(self.entries.read().map_err(lock_poisoned)?.len())
    }

    pub fn is_empty(&self) -> RuntimeResult<bool> {
        Ok(self.len()? == 0)
    }
}
