//! Cancellable delayed tasks keyed by an identifier
//!
//! Each scheduled task owns a child `CancellationToken` of the scheduler's
//! root token. Cancelling a key stops that task only; `cancel_all` or a
//! cancelled parent stops every pending task.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Registry of pending delayed tasks
pub struct TaskScheduler<K> {
    root: CancellationToken,
    pending: Arc<Mutex<HashMap<K, (u64, CancellationToken)>>>,
    generation: AtomicU64,
}

impl<K> TaskScheduler<K>
where
    K: Eq + Hash + Clone + Send + std::fmt::Debug + 'static,
{
    pub fn new() -> Self {
        Self::with_parent(&CancellationToken::new())
    }

    /// Create a scheduler whose tasks are cancelled along with `parent`
    pub fn with_parent(parent: &CancellationToken) -> Self {
        Self {
            root: parent.child_token(),
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Run `task` after `delay` unless `key` is cancelled first.
    ///
    /// Scheduling an existing key replaces (and cancels) the previous task.
    pub fn schedule<F>(&self, key: K, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.root.child_token();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        if let Some((_, previous)) = self
            .pending
            .lock()
            .insert(key.clone(), (generation, token.clone()))
        {
            previous.cancel();
        }

        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(?key, "Scheduled task cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    {
                        let mut guard = pending.lock();
                        // A reschedule may have replaced our entry.
                        if guard.get(&key).map(|(g, _)| *g) == Some(generation) {
                            guard.remove(&key);
                        }
                    }
                    task.await;
                }
            }
        });
    }

    /// Cancel the task for `key`. Returns true if one was pending.
    pub fn cancel(&self, key: &K) -> bool {
        match self.pending.lock().remove(key) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending task
    pub fn cancel_all(&self) -> usize {
        let mut pending = self.pending.lock();
        let count = pending.len();
        for (_, (_, token)) in pending.drain() {
            token.cancel();
        }
        count
    }

    pub fn is_scheduled(&self, key: &K) -> bool {
        self.pending.lock().contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl<K> Default for TaskScheduler<K>
where
    K: Eq + Hash + Clone + Send + std::fmt::Debug + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Drop for TaskScheduler<K> {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn test_task_fires_after_delay() {
        let scheduler = TaskScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        scheduler.schedule("a", Duration::from_secs(180), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(scheduler.is_scheduled(&"a"));

        tokio::time::sleep(Duration::from_secs(179)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_scheduled(&"a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let scheduler = TaskScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        scheduler.schedule(1u32, Duration::from_secs(10), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(scheduler.cancel(&1));
        assert!(!scheduler.cancel(&1));

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_previous() {
        let scheduler = TaskScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter = Arc::clone(&fired);
            scheduler.schedule("k", Duration::from_secs(5), async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(scheduler.pending_count(), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all() {
        let scheduler = TaskScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        for key in 0..4u8 {
            let counter = Arc::clone(&fired);
            scheduler.schedule(key, Duration::from_secs(1), async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(scheduler.cancel_all(), 4);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
