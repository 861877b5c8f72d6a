//! Submission locks keyed by resource id
//!
//! At most one submission per resource is in flight, and a resource stays busy for a
//! cooldown after its last submission finished. Locks are in-process only.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use genflow_core::{GenflowError, GenflowResult};

#[derive(Debug, Default)]
struct LockState {
    held: bool,
    released_at: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct ResourceLocks {
    cooldown: Duration,
    entries: Arc<Mutex<HashMap<String, LockState>>>,
}

impl ResourceLocks {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, LockState>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take the lock for `resource_id`, or fail with `ResourceBusy`
    pub fn try_acquire(&self, resource_id: &str) -> GenflowResult<ResourceGuard> {
        let mut entries = self.entries();
        let state = entries.entry(resource_id.to_string()).or_default();

        if state.held {
            return Err(GenflowError::ResourceBusy(format!(
                "a submission for '{}' is already in progress",
                resource_id
            )));
        }
        if let Some(released_at) = state.released_at {
            let since = released_at.elapsed();
            if since < self.cooldown {
                let remaining = self.cooldown - since;
                return Err(GenflowError::ResourceBusy(format!(
                    "'{}' is cooling down, retry in {}s",
                    resource_id,
                    remaining.as_secs().max(1)
                )));
            }
        }

        state.held = true;
        tracing::debug!(resource_id = %resource_id, "Resource lock acquired");
        Ok(ResourceGuard {
            resource_id: resource_id.to_string(),
            locks: self.clone(),
        })
    }

    pub fn is_busy(&self, resource_id: &str) -> bool {
        self.entries().get(resource_id).is_some_and(|state| {
            state.held
                || state
                    .released_at
                    .is_some_and(|at| at.elapsed() < self.cooldown)
        })
    }

    fn release(&self, resource_id: &str) {
        let mut entries = self.entries();
        if let Some(state) = entries.get_mut(resource_id) {
            state.held = false;
            state.released_at = Some(Instant::now());
        }
        // Entries past their cooldown carry no information
        let cooldown = self.cooldown;
        entries.retain(|_, state| {
            state.held || state.released_at.is_some_and(|at| at.elapsed() < cooldown)
        });
    }
}

/// Releases the resource (starting its cooldown) when dropped
#[derive(Debug)]
pub struct ResourceGuard {
    resource_id: String,
    locks: ResourceLocks,
}

impl ResourceGuard {
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        self.locks.release(&self.resource_id);
        tracing::debug!(resource_id = %self.resource_id, "Resource lock released");
    }
}
