use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Trailing-edge debouncer: the action runs with the latest value once no new
/// value has arrived for `delay`, or once `max_wait` has passed since the first
/// pending value. Pending values are discarded on drop.
pub struct Debouncer<T> {
    tx: mpsc::UnboundedSender<T>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> Debouncer<T> {
    /// Without a max-wait: a steady stream of values never fires.
    pub fn new<F, Fut>(delay: Duration, action: F) -> Self
    where
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::spawn(delay, None, action)
    }

    /// Fires at least once per `max_wait` while values keep arriving.
    pub fn with_max_wait<F, Fut>(delay: Duration, max_wait: Duration, action: F) -> Self
    where
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::spawn(delay, Some(max_wait), action)
    }

    fn spawn<F, Fut>(delay: Duration, max_wait: Option<Duration>, mut action: F) -> Self
    where
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<T>();

        let task = tokio::spawn(async move {
            while let Some(mut latest) = rx.recv().await {
                let hard_deadline = max_wait.map(|wait| Instant::now() + wait);
                loop {
                    let quiet_deadline = Instant::now() + delay;
                    let deadline = match hard_deadline {
                        Some(hard) => quiet_deadline.min(hard),
                        None => quiet_deadline,
                    };
                    tokio::select! {
                        next = rx.recv() => match next {
                            Some(value) => latest = value,
                            None => return,
                        },
                        _ = tokio::time::sleep_until(deadline) => break,
                    }
                }
                action(latest).await;
            }
        });

        Self { tx, task }
    }

    pub fn push(&self, value: T) {
        // Only fails once the task is gone, i.e. during teardown.
        let _ = self.tx.send(value);
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}
