use std::collections::{HashSet, VecDeque};

use tokio::sync::Mutex;

/// Job ids a vehicle has already accepted.
///
/// `insert` is the only way in and it checks-and-marks under one lock, so
/// two concurrent deliveries of the same id cannot both win. Unbounded by
/// default; with a capacity the oldest ids are evicted first.
#[derive(Debug, Default)]
pub struct DedupSet {
    inner: Mutex<DedupInner>,
    capacity: Option<usize>,
}

#[derive(Debug, Default)]
struct DedupInner {
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl DedupSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::default(),
            capacity: Some(capacity.max(1)),
        }
    }

    /// Returns `true` when `job_id` was not seen before.
    pub async fn insert(&self, job_id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.seen.contains(job_id) {
            return false;
        }
        inner.seen.insert(job_id.to_string());

        if let Some(capacity) = self.capacity {
            inner.order.push_back(job_id.to_string());
            while inner.order.len() > capacity {
                if let Some(oldest) = inner.order.pop_front() {
                    inner.seen.remove(&oldest);
                }
            }
        }
        true
    }

    pub async fn contains(&self, job_id: &str) -> bool {
        self.inner.lock().await.seen.contains(job_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.seen.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
