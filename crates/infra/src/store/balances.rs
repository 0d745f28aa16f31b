//! Balance store: on-hand quantity per bucket.
//!
//! Each bucket has its own mutex, so callers working on the same bucket
//! serialize while callers on different buckets never wait for each other.
//! A bucket row is created lazily (at zero) the first time it is locked and is
//! never removed.
//!
//! Holding a [`BucketGuard`] gives a consistent read of the bucket. Writing
//! on-hand additionally needs the [`PostingScope`] that only the ledger poster
//! can open, so no other code path can move stock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{ArcMutexGuard, Mutex, RawMutex, RwLock};

use stockledger_core::{BucketKey, DomainError, DomainResult, ProductId, Quantity, WarehouseId};

use crate::error::{StoreError, StoreResult};
use crate::posting::PostingScope;

#[derive(Debug, Default)]
pub struct BucketState {
    on_hand: Quantity,
}

#[derive(Debug, Default)]
pub struct BalanceStore {
    buckets: RwLock<HashMap<BucketKey, Arc<Mutex<BucketState>>>>,
}

impl BalanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, bucket: BucketKey) -> Arc<Mutex<BucketState>> {
        if let Some(slot) = self.buckets.read().get(&bucket) {
            return Arc::clone(slot);
        }
        Arc::clone(self.buckets.write().entry(bucket).or_default())
    }

    /// Exclusive lock on `bucket`, waiting at most `timeout`.
    pub fn lock(&self, bucket: BucketKey, timeout: Duration) -> StoreResult<BucketGuard> {
        let slot = self.slot(bucket);
        match Mutex::try_lock_arc_for(&slot, timeout) {
            Some(state) => Ok(BucketGuard { bucket, state }),
            None => Err(StoreError::LockTimeout {
                bucket,
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Buckets known for a product in one warehouse, in key order.
    pub fn buckets_for_product(&self, warehouse: WarehouseId, product: ProductId) -> Vec<BucketKey> {
        let mut keys: Vec<BucketKey> = self
            .buckets
            .read()
            .keys()
            .filter(|k| k.warehouse_id() == warehouse && k.product_id() == product)
            .copied()
            .collect();
        keys.sort();
        keys
    }

    pub fn contains(&self, bucket: BucketKey) -> bool {
        self.buckets.read().contains_key(&bucket)
    }
}

/// Exclusive hold on one bucket. Released on drop.
pub struct BucketGuard {
    bucket: BucketKey,
    state: ArcMutexGuard<RawMutex, BucketState>,
}

impl BucketGuard {
    pub fn bucket(&self) -> BucketKey {
        self.bucket
    }

    pub fn on_hand(&self) -> Quantity {
        self.state.on_hand
    }

    /// Store a new on-hand. Only valid inside the posting scope opened for this bucket.
    pub(crate) fn write_on_hand(&mut self, scope: &PostingScope, qty: Quantity) -> DomainResult<()> {
        scope.authorize_balance_write(self.bucket)?;
        if qty.is_negative() {
            return Err(DomainError::invariant(format!(
                "on-hand for {} cannot be negative ({qty})",
                self.bucket
            )));
        }
        self.state.on_hand = qty;
        Ok(())
    }
}

impl core::fmt::Debug for BucketGuard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BucketGuard")
            .field("bucket", &self.bucket)
            .field("on_hand", &self.state.on_hand)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Instant;

    fn bucket() -> BucketKey {
        BucketKey::new(WarehouseId::new(), None, ProductId::new(), None)
    }

    #[test]
    fn new_bucket_starts_at_zero() {
        let store = BalanceStore::new();
        let key = bucket();
        assert!(!store.contains(key));
        let guard = store.lock(key, Duration::from_millis(10)).unwrap();
        assert_eq!(guard.on_hand(), Quantity::ZERO);
        assert!(store.contains(key));
    }

    #[test]
    fn contended_bucket_times_out() {
        let store = Arc::new(BalanceStore::new());
        let key = bucket();
        let held = store.lock(key, Duration::from_millis(10)).unwrap();

        let started = Instant::now();
        let err = store.lock(key, Duration::from_millis(30)).unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert!(matches!(err, StoreError::LockTimeout { bucket, timeout_ms: 30 } if bucket == key));
        drop(held);
        store.lock(key, Duration::from_millis(10)).unwrap();
    }

    #[test]
    fn different_buckets_do_not_block() {
        let store = Arc::new(BalanceStore::new());
        let (a, b) = (bucket(), bucket());
        let barrier = Arc::new(Barrier::new(2));

        let _held = store.lock(a, Duration::from_millis(10)).unwrap();
        let handle = {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store.lock(b, Duration::from_millis(50)).map(|g| g.bucket())
            })
        };
        barrier.wait();
        assert_eq!(handle.join().unwrap().unwrap(), b);
    }
}
