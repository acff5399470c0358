//! In-process leases that serialise work on a shared resource.
//!
//! Two events touching the same chart environment must not run helm against
//! it at the same time, and two scopes for the same cluster must not share a
//! credential file. Both are keyed leases with an acquisition timeout.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {waited:?} waiting for lease on {key}")]
    Timeout { key: String, waited: Duration },
}

/// Chart environment a release operation runs against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseKey {
    pub repo: u64,
    pub chart: String,
    pub environment: String,
}

impl fmt::Display for LeaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.repo, self.chart, self.environment)
    }
}

/// Held while the keyed resource is in use; dropping it releases the lease.
#[derive(Debug)]
pub struct Lease {
    _guard: OwnedMutexGuard<()>,
}

#[derive(Debug)]
pub struct LeaseTable<K> {
    slots: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
    timeout: Duration,
}

impl<K> LeaseTable<K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    pub fn new(timeout: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    pub async fn acquire(&self, key: K) -> Result<Lease, LockError> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            // Slots nobody holds or waits on only have the table's reference.
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        debug!(key = ?key, "acquiring lease");
        match tokio::time::timeout(self.timeout, slot.lock_owned()).await {
            Ok(guard) => Ok(Lease { _guard: guard }),
            Err(_) => Err(LockError::Timeout {
                key: format!("{key:?}"),
                waited: self.timeout,
            }),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(env: &str) -> LeaseKey {
        LeaseKey {
            repo: 7,
            chart: "charts/api".to_string(),
            environment: env.to_string(),
        }
    }

    #[tokio::test]
    async fn second_acquire_times_out_while_held() {
        let table = LeaseTable::new(Duration::from_millis(50));
        let _held = table.acquire(key("dev")).await.unwrap();

        let err = table.acquire(key("dev")).await.unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));
    }

    #[tokio::test]
    async fn different_keys_do_not_contend() {
        let table = LeaseTable::new(Duration::from_millis(50));
        let _dev = table.acquire(key("dev")).await.unwrap();
        let _prod = table.acquire(key("prod")).await.unwrap();
    }

    #[tokio::test]
    async fn release_allows_next_holder() {
        let table = Arc::new(LeaseTable::new(Duration::from_secs(5)));
        let held = table.acquire(key("dev")).await.unwrap();

        let waiter = {
            let table = table.clone();
            tokio::spawn(async move { table.acquire(key("dev")).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn idle_slots_are_pruned() {
        let table = LeaseTable::new(Duration::from_millis(50));
        drop(table.acquire(key("dev")).await.unwrap());
        drop(table.acquire(key("prod")).await.unwrap());
        // Acquiring prunes the released slots before inserting its own.
        let _staging = table.acquire(key("staging")).await.unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn lease_key_display() {
        assert_eq!(key("dev").to_string(), "7:charts/api@dev");
    }
}
