//! Per-entity serialization
//!
//! Cleanup followed by registration is not atomic against the provider. Two
//! reconciliations for the same entity id must never interleave, so the
//! engine holds one of these guards for the whole protocol run.
//!
//! The table only serializes callers inside one process. Deployments running
//! several engine processes against the same provider still need an external
//! lock or a provider-side upsert.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

type Table = HashMap<String, Arc<tokio::sync::Mutex<()>>>;

/// Keyed async mutex table; clones share the same table
#[derive(Debug, Clone, Default)]
pub struct EntityLocks {
    table: Arc<Mutex<Table>>,
}

/// Exclusive hold on one entity id, released on drop
#[derive(Debug)]
pub struct EntityGuard {
    entity_id: String,
    table: Arc<Mutex<Table>>,
    _held: OwnedMutexGuard<()>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other holder has `entity_id`, then take it
    pub async fn acquire(&self, entity_id: &str) -> EntityGuard {
        let slot = {
            let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            sweep_idle(&mut table);
            table
                .entry(entity_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };

        let held = slot.lock_owned().await;
        debug!(entity_id = %entity_id, "Entity lock acquired");

        EntityGuard {
            entity_id: entity_id.to_string(),
            table: Arc::clone(&self.table),
            _held: held,
        }
    }

    /// Number of entity ids with a holder or waiter
    pub fn tracked(&self) -> usize {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        sweep_idle(&mut table);
        table.len()
    }
}

/// Drop entries only the table still references.
///
/// Catches slots left behind by waiters that were cancelled after the holder
/// had already released.
fn sweep_idle(table: &mut Table) {
    table.retain(|_, slot| Arc::strong_count(slot) > 1);
}

impl Drop for EntityGuard {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        // The table and this guard hold the only references when nobody waits
        let idle = table
            .get(&self.entity_id)
            .map(|slot| Arc::strong_count(slot) <= 2)
            .unwrap_or(false);
        if idle {
            table.remove(&self.entity_id);
        }
        debug!(entity_id = %self.entity_id, "Entity lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_entity_is_serialized() {
        let locks = EntityLocks::new();
        let guard = locks.acquire("a@test.com").await;

        let contender = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = contender.acquire("a@test.com").await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_leak_entry() {
        let locks = EntityLocks::new();
        let holder = locks.acquire("a@test.com").await;

        let mut waiter = Box::pin(locks.acquire("a@test.com"));
        let timed_out = tokio::time::timeout(Duration::from_millis(10), &mut waiter).await;
        assert!(timed_out.is_err());

        // Holder sees the waiter still queued and leaves the entry in place
        drop(holder);
        drop(waiter);

        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn test_distinct_entities_do_not_block() {
        let locks = EntityLocks::new();
        let _a = locks.acquire("a@test.com").await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.acquire("b@test.com")).await;
        assert!(b.is_ok());
        assert_eq!(locks.tracked(), 2);
    }
}
