use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::ServiceError;
use crate::scope::Mounted;

/// What a screen renders for one piece of remote data.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    pub loading: bool,
    pub data: Option<T>,
    pub error: Option<ServiceError>,
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self {
            loading: false,
            data: None,
            error: None,
        }
    }
}

struct State<T> {
    snapshot: Snapshot<T>,
    /// Bumped per load; only the latest load may write its result.
    generation: u64,
}

/// Loading/data/error container around a service call.
///
/// Overlapping loads resolve last-started-wins, a failed reload keeps the
/// previous data next to the error, and nothing is written after `unmount`.
pub struct Resource<T> {
    state: Arc<Mutex<State<T>>>,
    mounted: Mounted,
}

impl<T> Clone for Resource<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            mounted: self.mounted.clone(),
        }
    }
}

impl<T> Default for Resource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Resource<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                snapshot: Snapshot::default(),
                generation: 0,
            })),
            mounted: Mounted::new(),
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.is_mounted()
    }

    /// Stop applying results and end any polling task.
    pub fn unmount(&self) {
        self.mounted.unmount();
    }

    fn state(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: Clone> Resource<T> {
    pub fn snapshot(&self) -> Snapshot<T> {
        self.state().snapshot.clone()
    }
}

impl<T: Send + 'static> Resource<T> {
    /// Run `fetch` and store its outcome.
    pub async fn load<F>(&self, fetch: F)
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        if !self.mounted.is_mounted() {
            return;
        }
        let generation = {
            let mut state = self.state();
            state.generation += 1;
            state.snapshot.loading = true;
            state.generation
        };

        let result = fetch.await;

        if !self.mounted.is_mounted() {
            return;
        }
        let mut state = self.state();
        if state.generation != generation {
            return;
        }
        state.snapshot.loading = false;
        match result {
            Ok(data) => {
                state.snapshot.data = Some(data);
                state.snapshot.error = None;
            }
            Err(e) => {
                tracing::debug!("Resource load failed: {}", e);
                state.snapshot.error = Some(e);
            }
        }
    }

    /// Reload every `every`, starting immediately, until unmounted.
    pub fn poll<F, Fut>(&self, every: Duration, fetch: F) -> JoinHandle<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ServiceError>> + Send + 'static,
    {
        let resource = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = resource.mounted.unmounted() => break,
                    _ = ticker.tick() => resource.load(fetch()).await,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn failed_reload_keeps_stale_data() {
        let resource = Resource::<u32>::new();
        resource.load(async { Ok(7) }).await;
        resource
            .load(async { Err(ServiceError::Network("offline".into())) })
            .await;

        let snap = resource.snapshot();
        assert!(!snap.loading);
        assert_eq!(snap.data, Some(7));
        assert_eq!(snap.error, Some(ServiceError::Network("offline".into())));

        resource.load(async { Ok(8) }).await;
        assert_eq!(resource.snapshot().error, None);
    }

    #[tokio::test]
    async fn slower_earlier_load_does_not_overwrite() {
        let resource = Resource::<&'static str>::new();
        let (release_old, old_gate) = oneshot::channel::<()>();

        let old = {
            let resource = resource.clone();
            tokio::spawn(async move {
                resource
                    .load(async move {
                        let _ = old_gate.await;
                        Ok("old")
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;

        resource.load(async { Ok("new") }).await;
        let _ = release_old.send(());
        old.await.unwrap();

        assert_eq!(resource.snapshot().data, Some("new"));
    }

    #[tokio::test]
    async fn results_after_unmount_are_dropped() {
        let resource = Resource::<u32>::new();
        let (done, gate) = oneshot::channel::<()>();

        let pending = {
            let resource = resource.clone();
            tokio::spawn(async move {
                resource
                    .load(async move {
                        let _ = gate.await;
                        Ok(1)
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        resource.unmount();
        let _ = done.send(());
        pending.await.unwrap();

        assert_eq!(resource.snapshot().data, None);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_reloads_until_unmounted() {
        let resource = Resource::<u32>::new();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let task = resource.poll(Duration::from_secs(30), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(n) }
        });

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(resource.snapshot().data, Some(3));

        resource.unmount();
        task.await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
