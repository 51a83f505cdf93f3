//! Bounded task scheduling
//!
//! A fixed-width worker pool over an ordered list of independent units of
//! work. Workers race for the next unclaimed index on a shared cursor, so
//! every unit runs exactly once and at most `width` run at any instant;
//! completion order across units is unconstrained. Per-unit failures are
//! the unit's own business — one bad file in a drop must not block the
//! others, so units report outcomes through their return value rather than
//! aborting the pool.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// 有界任务调度器
#[derive(Debug, Clone, Copy)]
pub struct BoundedScheduler {
    width: usize,
}

impl BoundedScheduler {
    pub fn new(width: usize) -> Self {
        Self {
            width: width.max(1),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Run all units with at most `min(width, N)` in flight; results come
    /// back in input order. A unit that panics forfeits its own slot in the
    /// output and nothing else: its worker is replaced so the rest of the
    /// queue still drains.
    pub async fn run<F, Fut, R>(&self, units: Vec<F>) -> Vec<R>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: Send + 'static,
    {
        let total = units.len();
        if total == 0 {
            return Vec::new();
        }

        let cursor = Arc::new(AtomicUsize::new(0));
        let slots: Arc<Vec<Mutex<Option<F>>>> =
            Arc::new(units.into_iter().map(|u| Mutex::new(Some(u))).collect());
        let results: Arc<Vec<Mutex<Option<R>>>> =
            Arc::new((0..total).map(|_| Mutex::new(None)).collect());

        let workers = self.width.min(total);
        debug!(total, workers, "scheduler starting");

        let mut pool = JoinSet::new();
        let spawn_worker = |pool: &mut JoinSet<()>| {
            let cursor = Arc::clone(&cursor);
            let slots = Arc::clone(&slots);
            let results = Arc::clone(&results);
            pool.spawn(async move {
                loop {
                    // Claim the next unclaimed unit; fetch_add makes the
                    // claim atomic, so no unit can run twice.
                    let index = cursor.fetch_add(1, Ordering::SeqCst);
                    if index >= total {
                        break;
                    }
                    let unit = slots[index]
                        .lock()
                        .take()
                        .expect("unit claimed twice despite atomic cursor");
                    let output = unit().await;
                    *results[index].lock() = Some(output);
                    debug!(index, "unit finished");
                }
            });
        };
        for _ in 0..workers {
            spawn_worker(&mut pool);
        }

        while let Some(joined) = pool.join_next().await {
            if joined.is_err() {
                // The panicking unit already claimed its index, so only its
                // own result is lost; a replacement worker keeps draining
                // the remaining units.
                warn!("scheduler unit panicked, spawning replacement worker");
                spawn_worker(&mut pool);
            }
        }

        Arc::try_unwrap(results)
            .ok()
            .expect("all workers done, no other result holders")
            .into_iter()
            .filter_map(|slot| slot.into_inner())
            .collect()
    }
}
