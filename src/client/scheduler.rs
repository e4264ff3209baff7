//! Keyed periodic refresh.
//!
//! One shared tick drives every registered poll. Disabled keys stay
//! registered but are skipped. Callbacks are spawned without waiting, so a
//! slow or failing callback never delays the others.

use super::error::SyncError;
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

pub type PollCallback = Arc<dyn Fn() -> BoxFuture<'static, Result<(), SyncError>> + Send + Sync>;

struct PollTask {
    id: u64,
    enabled: bool,
    callback: PollCallback,
}

/// Returned by `register`; unregistering with a stale handle is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollHandle {
    id: u64,
    key: String,
}

impl PollHandle {
    pub fn key(&self) -> &str {
        &self.key
    }
}

pub struct PollScheduler {
    interval: Duration,
    tasks: RwLock<HashMap<String, PollTask>>,
    next_id: AtomicU64,
}

impl PollScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            tasks: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Register `callback` under `key`, replacing any existing registration.
    /// New registrations start enabled.
    pub async fn register<F, Fut>(&self, key: impl Into<String>, callback: F) -> PollHandle
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), SyncError>> + Send + 'static,
    {
        let key = key.into();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let callback: PollCallback = Arc::new(move || callback().boxed());

        let replaced = self
            .tasks
            .write()
            .await
            .insert(
                key.clone(),
                PollTask {
                    id,
                    enabled: true,
                    callback,
                },
            )
            .is_some();
        if replaced {
            tracing::debug!("poll '{}' re-registered", key);
        }

        PollHandle { id, key }
    }

    /// Remove the registration `handle` refers to. Returns false when the key
    /// has since been re-registered or already removed.
    pub async fn unregister(&self, handle: &PollHandle) -> bool {
        let mut tasks = self.tasks.write().await;
        match tasks.get(&handle.key) {
            Some(task) if task.id == handle.id => {
                tasks.remove(&handle.key);
                true
            }
            _ => false,
        }
    }

    pub async fn enable(&self, key: &str) -> bool {
        self.set_enabled(key, true).await
    }

    pub async fn disable(&self, key: &str) -> bool {
        self.set_enabled(key, false).await
    }

    async fn set_enabled(&self, key: &str, enabled: bool) -> bool {
        match self.tasks.write().await.get_mut(key) {
            Some(task) => {
                if task.enabled != enabled {
                    tracing::debug!(
                        "poll '{}' {}",
                        key,
                        if enabled { "resumed" } else { "paused" }
                    );
                }
                task.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// `None` when `key` is not registered.
    pub async fn is_enabled(&self, key: &str) -> Option<bool> {
        self.tasks.read().await.get(key).map(|task| task.enabled)
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    /// Fire every enabled callback once. Returns how many were started.
    pub async fn tick(&self) -> usize {
        let due: Vec<(String, PollCallback)> = self
            .tasks
            .read()
            .await
            .iter()
            .filter(|(_, task)| task.enabled)
            .map(|(key, task)| (key.clone(), task.callback.clone()))
            .collect();

        let count = due.len();
        for (key, callback) in due {
            tokio::spawn(async move {
                if let Err(e) = callback().await {
                    tracing::warn!("poll '{}' failed: {}", key, e);
                }
            });
        }
        count
    }

    /// Tick every interval until the handle is aborted. The first tick is one
    /// interval after start.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + scheduler.interval, scheduler.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                scheduler.tick().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    async fn register_counter(
        scheduler: &PollScheduler,
        key: &str,
        count: &Arc<AtomicUsize>,
    ) -> PollHandle {
        let count = count.clone();
        scheduler
            .register(key, move || {
                let count = count.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_fire_enabled_tasks() {
        let scheduler = Arc::new(PollScheduler::new(Duration::from_millis(5000)));
        let list = counter();
        let detail = counter();
        register_counter(&scheduler, "list", &list).await;
        register_counter(&scheduler, "m1", &detail).await;

        let ticker = scheduler.spawn();
        tokio::time::sleep(Duration::from_millis(4999)).await;
        assert_eq!(list.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(10_002)).await;
        assert_eq!(list.load(Ordering::SeqCst), 3);
        assert_eq!(detail.load(Ordering::SeqCst), 3);
        ticker.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_task_is_skipped_until_enabled() {
        let scheduler = PollScheduler::new(Duration::from_secs(5));
        let count = counter();
        register_counter(&scheduler, "m1", &count).await;

        assert!(scheduler.disable("m1").await);
        assert_eq!(scheduler.tick().await, 0);
        assert_eq!(scheduler.is_enabled("m1").await, Some(false));

        assert!(scheduler.enable("m1").await);
        assert_eq!(scheduler.tick().await, 1);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(!scheduler.disable("missing").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_callback_does_not_stop_others() {
        let scheduler = PollScheduler::new(Duration::from_secs(5));
        let count = counter();
        scheduler
            .register("broken", || async {
                Err(SyncError::Transport("down".to_string()))
            })
            .await;
        scheduler
            .register("panicky", || async {
                if true {
                    panic!("poll exploded");
                }
                Ok(())
            })
            .await;
        register_counter(&scheduler, "list", &count).await;

        assert_eq!(scheduler.tick().await, 3);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(scheduler.tick().await, 3);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stale_handle_does_not_remove_replacement() {
        let scheduler = PollScheduler::new(Duration::from_secs(5));
        let count = counter();
        let old = register_counter(&scheduler, "m1", &count).await;
        let new = register_counter(&scheduler, "m1", &count).await;

        assert_eq!(scheduler.len().await, 1);
        assert!(!scheduler.unregister(&old).await);
        assert_eq!(scheduler.len().await, 1);
        assert!(scheduler.unregister(&new).await);
        assert!(scheduler.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregistered_task_is_not_invoked() {
        let scheduler = PollScheduler::new(Duration::from_secs(5));
        let count = counter();
        let handle = register_counter(&scheduler, "m1", &count).await;

        assert_eq!(scheduler.tick().await, 1);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(scheduler.unregister(&handle).await);

        assert_eq!(scheduler.tick().await, 0);
        assert_eq!(scheduler.tick().await, 0);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reregistering_starts_fresh_enabled_task() {
        let scheduler = PollScheduler::new(Duration::from_secs(5));
        let old = counter();
        let handle = register_counter(&scheduler, "m1", &old).await;
        scheduler.unregister(&handle).await;

        let after_unregister = counter();
        register_counter(&scheduler, "m1", &after_unregister).await;
        assert_eq!(scheduler.is_enabled("m1").await, Some(true));
        assert_eq!(scheduler.tick().await, 1);
        tokio::time::sleep(Duration::from_millis(1)).await;

        scheduler.disable("m1").await;
        let after_disable = counter();
        register_counter(&scheduler, "m1", &after_disable).await;
        assert_eq!(scheduler.is_enabled("m1").await, Some(true));
        assert_eq!(scheduler.tick().await, 1);
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(old.load(Ordering::SeqCst), 0);
        assert_eq!(after_unregister.load(Ordering::SeqCst), 1);
        assert_eq!(after_disable.load(Ordering::SeqCst), 1);
    }
}
