use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// RangeLock grants exclusive access to [min, max] time ranges so WAL
/// flushes can run concurrently with compactions. A request overlapping any
/// held range waits until every such range is released; disjoint ranges
/// proceed in parallel.
///
/// Acquisition is serialized so an acquirer cannot miss a range locked
/// concurrently; releases and overlap-free acquires do not contend with each
/// other beyond the short list guard.
pub struct RangeLock {
    acquire: Mutex<()>,
    ranges: StdMutex<Vec<LockedRange>>,
}

struct LockedRange {
    min: i64,
    max: i64,
    lock: Arc<Mutex<()>>,
    // dropping the guard releases every waiter queued on this range
    _guard: OwnedMutexGuard<()>,
}

fn overlaps(a_min: i64, a_max: i64, b_min: i64, b_max: i64) -> bool {
    a_min <= b_max && b_min <= a_max
}

impl Default for RangeLock {
    fn default() -> Self {
        Self::new()
    }
}

impl RangeLock {
    pub fn new() -> Self {
        Self {
            acquire: Mutex::new(()),
            ranges: StdMutex::new(Vec::new()),
        }
    }

    /// lock blocks until [min, max] inclusive is free of overlapping holders
    /// and then takes it. Every lock must be paired with an unlock of the
    /// same range on all exit paths.
    pub async fn lock(&self, min: i64, max: i64) {
        let _serial = self.acquire.lock().await;

        let waiting: Vec<Arc<Mutex<()>>> = {
            let ranges = self.ranges.lock().unwrap();
            ranges
                .iter()
                .filter(|r| overlaps(min, max, r.min, r.max))
                .map(|r| r.lock.clone())
                .collect()
        };

        // wait for each overlapping holder to release, then let go so other
        // waiters of that range can pass
        for l in waiting {
            let _ = l.lock().await;
        }

        let lock = Arc::new(Mutex::new(()));
        let guard = lock
            .clone()
            .try_lock_owned()
            .expect("freshly created range lock");
        self.ranges.lock().unwrap().push(LockedRange {
            min,
            max,
            lock,
            _guard: guard,
        });
    }

    /// unlock releases every held range matching (min, max) exactly and
    /// wakes its waiters.
    pub fn unlock(&self, min: i64, max: i64) {
        let mut ranges = self.ranges.lock().unwrap();
        ranges.retain(|r| !(r.min == min && r.max == max));
    }
}
