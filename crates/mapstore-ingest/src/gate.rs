//! Per-path exclusive execution.
//!
//! Every mutating operation (archive upload, single-file put, patch, delete,
//! move, copy) runs while holding the permit for its canonical stored path.
//! Permits for the same path are granted strictly in request order (tokio's
//! mutex is fair); permits for different paths never wait on each other.
//!
//! Slots are created on first use and evicted as soon as nobody holds or
//! waits for them. The count is maintained by a drop guard, so a caller that
//! gives up while queued still releases its reference.
//!
//! Granularity is the literal path: a permit on `rooms` does not exclude an
//! operation on `rooms/a`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

struct Slot {
    lock: Arc<AsyncMutex<()>>,
    /// Holders plus waiters
    refs: usize,
}

type SlotTable = Arc<Mutex<HashMap<String, Slot>>>;

/// Process-wide table of per-path locks.
#[derive(Clone, Default)]
pub struct PathGate {
    slots: SlotTable,
}

/// Reference on a slot; dropping it decrements the count and evicts the slot at zero.
struct Lease {
    slots: SlotTable,
    key: String,
    lock: Arc<AsyncMutex<()>>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = slots.get_mut(&self.key) {
            slot.refs -= 1;
            if slot.refs == 0 {
                slots.remove(&self.key);
            }
        }
    }
}

/// Exclusive right to mutate one path. Released on drop.
pub struct PathPermit {
    // Field order matters: the guard is released before the lease is dropped.
    _guard: OwnedMutexGuard<()>,
    _lease: Lease,
}

impl PathGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lease(&self, key: &str) -> Lease {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let slot = slots.entry(key.to_string()).or_insert_with(|| Slot {
            lock: Arc::new(AsyncMutex::new(())),
            refs: 0,
        });
        slot.refs += 1;
        Lease {
            slots: self.slots.clone(),
            key: key.to_string(),
            lock: slot.lock.clone(),
        }
    }

    /// Wait for the path's turn. The returned permit is `'static` and can be
    /// moved into a spawned task.
    pub async fn acquire(&self, key: &str) -> PathPermit {
        let lease = self.lease(key);
        let guard = lease.lock.clone().lock_owned().await;
        PathPermit {
            _guard: guard,
            _lease: lease,
        }
    }

    /// Run `op` while holding the path's permit. The result (success or
    /// failure) is returned unchanged; the permit is released either way.
    pub async fn run_exclusive<F, Fut, T>(&self, key: &str, op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = self.acquire(key).await;
        op().await
    }

    /// Number of paths currently held or waited on.
    pub fn tracked_paths(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_path_runs_in_arrival_order() {
        let gate = PathGate::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = gate.acquire("rooms/a").await;
        let mut handles = Vec::new();
        for i in 0..5 {
            let gate = gate.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                gate.run_exclusive("rooms/a", || async {
                    order.lock().unwrap().push(i);
                })
                .await;
            }));
            // let task `i` enqueue before spawning the next one
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(order.lock().unwrap().is_empty(), "nothing runs while held");

        drop(first);
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(gate.tracked_paths(), 0);
    }

    #[tokio::test]
    async fn operations_do_not_interleave() {
        let gate = PathGate::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..4 {
            let gate = gate.clone();
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                gate.run_exclusive("map.wam", || async {
                    log.lock().unwrap().push(format!("start {i}"));
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    log.lock().unwrap().push(format!("end {i}"));
                })
                .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let log = log.lock().unwrap();
        for pair in log.chunks(2) {
            let a = pair[0].strip_prefix("start ").unwrap();
            let b = pair[1].strip_prefix("end ").unwrap();
            assert_eq!(a, b, "interleaved: {log:?}");
        }
    }

    #[tokio::test]
    async fn different_paths_run_concurrently() {
        let gate = PathGate::new();
        let _held = gate.acquire("rooms/a").await;

        let other = tokio::time::timeout(
            Duration::from_millis(200),
            gate.run_exclusive("rooms/b", || async { 42 }),
        )
        .await;
        assert_eq!(other.unwrap(), 42);

        // hierarchical paths are independent too
        let nested = tokio::time::timeout(
            Duration::from_millis(200),
            gate.run_exclusive("rooms/a/map.wam", || async { 7 }),
        )
        .await;
        assert_eq!(nested.unwrap(), 7);
    }

    #[tokio::test]
    async fn failure_does_not_poison_the_path() {
        let gate = PathGate::new();
        let failed: Result<(), String> = gate
            .run_exclusive("x", || async { Err("disk full".to_string()) })
            .await;
        assert_eq!(failed.unwrap_err(), "disk full");

        let ok: Result<u32, String> = gate.run_exclusive("x", || async { Ok(1) }).await;
        assert_eq!(ok.unwrap(), 1);
        assert_eq!(gate.tracked_paths(), 0);
    }

    #[tokio::test]
    async fn abandoned_waiter_releases_its_reference() {
        let gate = PathGate::new();
        let held = gate.acquire("p").await;

        let waiting = tokio::time::timeout(Duration::from_millis(20), gate.acquire("p")).await;
        assert!(waiting.is_err(), "second acquire must wait");
        assert_eq!(gate.tracked_paths(), 1);

        drop(held);
        assert_eq!(gate.tracked_paths(), 0);
    }
}
