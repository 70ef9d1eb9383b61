use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::scope::Mounted;
use crate::service::WolfpackService;

/// How long a failed toggle's message stays visible.
pub const ERROR_DISPLAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LikeState {
    pub liked: bool,
    pub count: u64,
}

impl LikeState {
    /// The state a click should show before the server answers.
    pub fn optimistic(self) -> Self {
        if self.liked {
            Self {
                liked: false,
                count: self.count.saturating_sub(1),
            }
        } else {
            Self {
                liked: true,
                count: self.count + 1,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// Another toggle was already in flight.
    Ignored,
    Confirmed(LikeState),
    RolledBack(ErrorKind),
    /// The toggle finished after unmount; nothing was applied.
    Discarded,
}

pub fn error_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Unauthenticated => "Please log in to like posts",
        ErrorKind::Network => "Network error. Please check your connection.",
        ErrorKind::NotFound | ErrorKind::Server => "Couldn't update like. Please try again.",
    }
}

struct Notice {
    message: &'static str,
    shown_at: Instant,
}

struct Inner {
    state: LikeState,
    notice: Option<Notice>,
}

/// Like button state for one post.
pub struct LikeToggle {
    service: Arc<dyn WolfpackService>,
    post_id: Uuid,
    inner: Mutex<Inner>,
    busy: AtomicBool,
    mounted: Mounted,
}

/// Clears the busy flag however the toggle ends, including cancellation.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl LikeToggle {
    pub fn new(service: Arc<dyn WolfpackService>, post_id: Uuid, initial: LikeState) -> Self {
        Self {
            service,
            post_id,
            inner: Mutex::new(Inner {
                state: initial,
                notice: None,
            }),
            busy: AtomicBool::new(false),
            mounted: Mounted::new(),
        }
    }

    pub fn state(&self) -> LikeState {
        self.inner().state
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Message from the last failed toggle, while it is still fresh.
    pub fn error(&self) -> Option<&'static str> {
        self.inner()
            .notice
            .as_ref()
            .filter(|n| n.shown_at.elapsed() < ERROR_DISPLAY)
            .map(|n| n.message)
    }

    pub fn unmount(&self) {
        self.mounted.unmount();
    }

    /// Flip the like: show the optimistic state at once, then settle on the
    /// server's answer or roll back to the state before the click.
    pub async fn toggle(&self) -> ToggleOutcome {
        if self.busy.swap(true, Ordering::AcqRel) {
            return ToggleOutcome::Ignored;
        }
        let _busy = BusyGuard(&self.busy);

        if !self.mounted.is_mounted() {
            return ToggleOutcome::Discarded;
        }

        let previous = {
            let mut inner = self.inner();
            let previous = inner.state;
            inner.state = previous.optimistic();
            inner.notice = None;
            previous
        };
        let optimistic = previous.optimistic();

        let liked = match self.service.toggle_like(self.post_id).await {
            Ok(liked) => liked,
            Err(e) => {
                if !self.mounted.is_mounted() {
                    return ToggleOutcome::Discarded;
                }
                let kind = e.kind();
                warn!("Like toggle on {} failed: {}", self.post_id, e);
                let mut inner = self.inner();
                inner.state = previous;
                inner.notice = Some(Notice {
                    message: error_message(kind),
                    shown_at: Instant::now(),
                });
                return ToggleOutcome::RolledBack(kind);
            }
        };
        if !self.mounted.is_mounted() {
            return ToggleOutcome::Discarded;
        }

        let count = match self.service.like_count(self.post_id).await {
            Ok(resp) => resp.count,
            Err(e) => {
                warn!("Like count refresh for {} failed: {}", self.post_id, e);
                optimistic.count
            }
        };
        if !self.mounted.is_mounted() {
            return ToggleOutcome::Discarded;
        }

        let confirmed = LikeState { liked, count };
        self.inner().state = confirmed;
        ToggleOutcome::Confirmed(confirmed)
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::mock::MockService;
    use wolfpack_types::api::LikeCountResponse;

    fn toggle_for(service: &Arc<MockService>, liked: bool, count: u64) -> Arc<LikeToggle> {
        Arc::new(LikeToggle::new(
            service.clone(),
            Uuid::new_v4(),
            LikeState { liked, count },
        ))
    }

    #[test]
    fn optimistic_flip_never_goes_negative() {
        let liked_zero = LikeState { liked: true, count: 0 };
        assert_eq!(liked_zero.optimistic(), LikeState { liked: false, count: 0 });

        let unliked = LikeState { liked: false, count: 4 };
        assert_eq!(unliked.optimistic(), LikeState { liked: true, count: 5 });
        assert_eq!(unliked.optimistic().optimistic(), unliked);
    }

    #[tokio::test]
    async fn success_takes_server_values() {
        let service = Arc::new(MockService::new());
        service.set_toggle(Ok(true));
        service.set_count(Ok(LikeCountResponse { count: 12, liked: true }));
        let toggle = toggle_for(&service, false, 10);

        let outcome = toggle.toggle().await;
        let expected = LikeState { liked: true, count: 12 };
        assert_eq!(outcome, ToggleOutcome::Confirmed(expected));
        assert_eq!(toggle.state(), expected);
        assert!(!toggle.is_busy());
        assert_eq!(toggle.error(), None);
    }

    #[tokio::test]
    async fn optimistic_state_is_visible_while_in_flight() {
        let service = Arc::new(MockService::new());
        service.gated.store(true, Ordering::SeqCst);
        service.set_count(Ok(LikeCountResponse { count: 3, liked: true }));
        let toggle = toggle_for(&service, false, 2);

        let pending = tokio::spawn({
            let toggle = toggle.clone();
            async move { toggle.toggle().await }
        });
        while service.toggles() == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(toggle.state(), LikeState { liked: true, count: 3 });
        assert!(toggle.is_busy());
        assert_eq!(toggle.toggle().await, ToggleOutcome::Ignored);
        assert_eq!(service.toggles(), 1);

        service.gate.notify_one();
        assert!(matches!(pending.await.unwrap(), ToggleOutcome::Confirmed(_)));
        assert!(!toggle.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_restores_exact_prior_state() {
        let service = Arc::new(MockService::new());
        service.set_toggle(Err(ServiceError::Unauthenticated));
        let toggle = toggle_for(&service, true, 0);

        let outcome = toggle.toggle().await;
        assert_eq!(outcome, ToggleOutcome::RolledBack(ErrorKind::Unauthenticated));
        assert_eq!(toggle.state(), LikeState { liked: true, count: 0 });
        assert_eq!(toggle.error(), Some("Please log in to like posts"));

        tokio::time::sleep(ERROR_DISPLAY + Duration::from_millis(1)).await;
        assert_eq!(toggle.error(), None);
    }

    #[tokio::test]
    async fn error_message_follows_kind() {
        let service = Arc::new(MockService::new());
        let toggle = toggle_for(&service, false, 1);

        service.set_toggle(Err(ServiceError::Network("connection reset".into())));
        toggle.toggle().await;
        assert_eq!(
            toggle.error(),
            Some("Network error. Please check your connection.")
        );

        service.set_toggle(Err(ServiceError::Server {
            status: 500,
            message: "Internal server error".into(),
        }));
        toggle.toggle().await;
        assert_eq!(toggle.error(), Some("Couldn't update like. Please try again."));
        assert_eq!(toggle.state(), LikeState { liked: false, count: 1 });
    }

    #[tokio::test]
    async fn count_refresh_failure_keeps_optimistic_count() {
        let service = Arc::new(MockService::new());
        service.set_toggle(Ok(true));
        service.set_count(Err(ServiceError::Network("timeout".into())));
        let toggle = toggle_for(&service, false, 7);

        let outcome = toggle.toggle().await;
        assert_eq!(outcome, ToggleOutcome::Confirmed(LikeState { liked: true, count: 8 }));
        assert_eq!(toggle.error(), None);
    }

    #[tokio::test]
    async fn result_after_unmount_is_discarded() {
        let service = Arc::new(MockService::new());
        service.gated.store(true, Ordering::SeqCst);
        service.set_toggle(Err(ServiceError::Network("offline".into())));
        let toggle = toggle_for(&service, false, 5);

        let pending = tokio::spawn({
            let toggle = toggle.clone();
            async move { toggle.toggle().await }
        });
        while service.toggles() == 0 {
            tokio::task::yield_now().await;
        }

        toggle.unmount();
        service.gate.notify_one();
        assert_eq!(pending.await.unwrap(), ToggleOutcome::Discarded);
        // The optimistic state stays; no rollback or message is applied.
        assert_eq!(toggle.state(), LikeState { liked: true, count: 6 });
        assert_eq!(toggle.error(), None);
    }
}
