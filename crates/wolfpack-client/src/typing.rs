use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};
use uuid::Uuid;

use wolfpack_types::events::{TYPING_EVENT, TypingPayload, typing_channel};

use crate::debounce::Debouncer;
use crate::error::ServiceError;
use crate::realtime::{ChannelHandle, Realtime};
use crate::scope::Mounted;

/// A peer is dropped from the indicator this long after their last update.
pub const TYPING_TIMEOUT: Duration = Duration::from_secs(3);
/// How often stale entries are swept.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);
/// Trailing debounce applied to the local user's typing changes. A steady
/// typist still publishes once per interval, well inside `TYPING_TIMEOUT`.
pub const PUBLISH_DEBOUNCE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingUser {
    pub user_id: Uuid,
    pub display_name: String,
}

struct Entry {
    display_name: String,
    last_seen: Instant,
}

/// Who is typing in one conversation, excluding the local user.
pub struct TypingState {
    local_user: Uuid,
    entries: HashMap<Uuid, Entry>,
}

impl TypingState {
    pub fn new(local_user: Uuid) -> Self {
        Self {
            local_user,
            entries: HashMap::new(),
        }
    }

    /// Apply a peer update. Returns true if the visible set may have changed.
    pub fn apply(&mut self, payload: &TypingPayload, now: Instant) -> bool {
        if payload.user_id == self.local_user {
            return false;
        }
        if payload.is_typing {
            self.entries.insert(
                payload.user_id,
                Entry {
                    display_name: payload.display_name.clone(),
                    last_seen: now,
                },
            );
            true
        } else {
            self.entries.remove(&payload.user_id).is_some()
        }
    }

    /// Drop entries older than `TYPING_TIMEOUT`. Returns how many were removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, e| now.saturating_duration_since(e.last_seen) <= TYPING_TIMEOUT);
        before - self.entries.len()
    }

    /// Typing peers ordered by name. Entries past the timeout are hidden even
    /// if the sweep has not run yet.
    pub fn users(&self, now: Instant) -> Vec<TypingUser> {
        let mut users: Vec<TypingUser> = self
            .entries
            .iter()
            .filter(|(_, e)| now.saturating_duration_since(e.last_seen) <= TYPING_TIMEOUT)
            .map(|(id, e)| TypingUser {
                user_id: *id,
                display_name: e.display_name.clone(),
            })
            .collect();
        users.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        users
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Live resources for the conversation an indicator is attached to.
struct Attachment {
    conversation_id: Uuid,
    handle: Arc<ChannelHandle>,
    mounted: Mounted,
    publisher: Debouncer<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for Attachment {
    fn drop(&mut self) {
        self.mounted.unmount();
        self.handle.release();
        for task in &self.tasks {
            task.abort();
        }
        debug!("Typing indicator detached from {}", self.conversation_id);
    }
}

/// Typing indicator for one conversation at a time.
///
/// Holds exactly one channel subscription while attached; it is released on
/// `retarget`, `unmount` and drop.
pub struct TypingIndicator {
    realtime: Arc<dyn Realtime>,
    local: TypingUser,
    state: Arc<Mutex<TypingState>>,
    attachment: Option<Attachment>,
}

impl TypingIndicator {
    pub async fn mount(
        realtime: Arc<dyn Realtime>,
        local: TypingUser,
        conversation_id: Uuid,
    ) -> Result<Self, ServiceError> {
        let mut indicator = Self {
            state: Arc::new(Mutex::new(TypingState::new(local.user_id))),
            realtime,
            local,
            attachment: None,
        };
        indicator.retarget(conversation_id).await?;
        Ok(indicator)
    }

    pub fn conversation_id(&self) -> Option<Uuid> {
        self.attachment.as_ref().map(|a| a.conversation_id)
    }

    /// Move to another conversation. The old subscription is released before
    /// the new one is joined; on failure the indicator is left detached.
    pub async fn retarget(&mut self, conversation_id: Uuid) -> Result<(), ServiceError> {
        if self.conversation_id() == Some(conversation_id) {
            return Ok(());
        }
        self.unmount();

        let handle = Arc::new(self.realtime.join(&typing_channel(conversation_id)).await?);
        let mounted = Mounted::new();

        let listener = tokio::spawn(listen(handle.clone(), mounted.clone(), self.state.clone()));
        let sweeper = tokio::spawn(sweep(mounted.clone(), self.state.clone()));

        let publisher = {
            let sender = handle.sender();
            let mounted = mounted.clone();
            let local = self.local.clone();
            Debouncer::with_max_wait(PUBLISH_DEBOUNCE, PUBLISH_DEBOUNCE, move |is_typing: bool| {
                if mounted.is_mounted() {
                    let payload = TypingPayload {
                        user_id: local.user_id,
                        display_name: local.display_name.clone(),
                        is_typing,
                    };
                    match serde_json::to_value(&payload) {
                        Ok(value) => {
                            if let Err(e) = sender.send(TYPING_EVENT, value) {
                                warn!("Failed to publish typing state: {}", e);
                            }
                        }
                        Err(e) => warn!("Failed to encode typing payload: {}", e),
                    }
                }
                async {}
            })
        };

        debug!("Typing indicator attached to {}", conversation_id);
        self.attachment = Some(Attachment {
            conversation_id,
            handle,
            mounted,
            publisher,
            tasks: vec![listener, sweeper],
        });
        Ok(())
    }

    /// Report a local typing change; published after `PUBLISH_DEBOUNCE` of quiet,
    /// or at most `PUBLISH_DEBOUNCE` after the first unpublished change.
    pub fn set_typing(&self, is_typing: bool) {
        if let Some(attachment) = &self.attachment {
            attachment.publisher.push(is_typing);
        }
    }

    pub fn typing_users(&self) -> Vec<TypingUser> {
        lock(&self.state).users(Instant::now())
    }

    /// Release the subscription and stop background work.
    pub fn unmount(&mut self) {
        self.attachment = None;
        lock(&self.state).clear();
    }
}

async fn listen(handle: Arc<ChannelHandle>, mounted: Mounted, state: Arc<Mutex<TypingState>>) {
    loop {
        let incoming = tokio::select! {
            _ = mounted.unmounted() => break,
            incoming = handle.recv() => match incoming {
                Some(incoming) => incoming,
                None => break,
            },
        };
        if !mounted.is_mounted() {
            break;
        }
        if incoming.event != TYPING_EVENT {
            continue;
        }
        match serde_json::from_value::<TypingPayload>(incoming.payload) {
            Ok(payload) => {
                lock(&state).apply(&payload, Instant::now());
            }
            Err(e) => debug!("Ignoring malformed typing payload: {}", e),
        }
    }
}

async fn sweep(mounted: Mounted, state: Arc<Mutex<TypingState>>) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = mounted.unmounted() => break,
            _ = ticker.tick() => {
                if !mounted.is_mounted() {
                    break;
                }
                lock(&state).sweep(Instant::now());
            }
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::LocalRealtime;
    use wolfpack_realtime::dispatcher::Dispatcher;

    fn user(name: &str) -> TypingUser {
        TypingUser {
            user_id: Uuid::new_v4(),
            display_name: name.to_string(),
        }
    }

    fn payload(user: &TypingUser, is_typing: bool) -> TypingPayload {
        TypingPayload {
            user_id: user.user_id,
            display_name: user.display_name.clone(),
            is_typing,
        }
    }

    async fn indicator(dispatcher: &Dispatcher, who: TypingUser, conversation: Uuid) -> TypingIndicator {
        let realtime: Arc<dyn Realtime> = Arc::new(LocalRealtime::new(dispatcher.clone()));
        TypingIndicator::mount(realtime, who, conversation).await.unwrap()
    }

    #[test]
    fn state_ignores_local_user_and_expires_entries() {
        let me = user("Me");
        let bella = user("Bella");
        let ben = user("Ben");
        let mut state = TypingState::new(me.user_id);
        let t0 = Instant::now();

        assert!(!state.apply(&payload(&me, true), t0));
        assert!(state.apply(&payload(&ben, true), t0));
        assert!(state.apply(&payload(&bella, true), t0 + Duration::from_secs(2)));

        let names: Vec<_> = state
            .users(t0 + Duration::from_secs(2))
            .into_iter()
            .map(|u| u.display_name)
            .collect();
        assert_eq!(names, vec!["Bella", "Ben"]);

        // Ben is past the timeout at 3.5 s; hidden before and after the sweep.
        let later = t0 + Duration::from_millis(3500);
        assert_eq!(state.users(later), vec![bella.clone()]);
        assert_eq!(state.sweep(later), 1);
        assert_eq!(state.users(later), vec![bella.clone()]);

        assert!(state.apply(&payload(&bella, false), later));
        assert!(state.users(later).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn peer_typing_shows_then_expires() {
        let dispatcher = Dispatcher::new();
        let conversation = Uuid::new_v4();
        let alice = indicator(&dispatcher, user("Alice"), conversation).await;
        let bob_user = user("Bob");
        let bob = indicator(&dispatcher, bob_user.clone(), conversation).await;

        bob.set_typing(true);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(alice.typing_users().is_empty(), "publish is debounced");

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(alice.typing_users(), vec![bob_user]);
        assert!(bob.typing_users().is_empty(), "own updates are not shown");

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(alice.typing_users().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_typing_removes_peer_immediately() {
        let dispatcher = Dispatcher::new();
        let conversation = Uuid::new_v4();
        let alice = indicator(&dispatcher, user("Alice"), conversation).await;
        let bob = indicator(&dispatcher, user("Bob"), conversation).await;

        bob.set_typing(true);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(alice.typing_users().len(), 1);

        bob.set_typing(false);
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert!(alice.typing_users().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn keystroke_burst_publishes_once_per_interval() {
        let dispatcher = Dispatcher::new();
        let conversation = Uuid::new_v4();
        let observer = LocalRealtime::new(dispatcher.clone())
            .join(&typing_channel(conversation))
            .await
            .unwrap();
        let bob = indicator(&dispatcher, user("Bob"), conversation).await;

        // Ten keystrokes over 2 s, then quiet.
        for _ in 0..10 {
            bob.set_typing(true);
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let mut received = 0;
        while let Ok(Some(incoming)) =
            tokio::time::timeout(Duration::from_millis(10), observer.recv()).await
        {
            assert_eq!(incoming.event, TYPING_EVENT);
            received += 1;
        }
        assert_eq!(received, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn steady_typist_stays_visible() {
        let dispatcher = Dispatcher::new();
        let conversation = Uuid::new_v4();
        let alice = indicator(&dispatcher, user("Alice"), conversation).await;
        let bob_user = user("Bob");
        let bob = indicator(&dispatcher, bob_user.clone(), conversation).await;

        // A keystroke every 300 ms for 6 s never leaves a full second of quiet.
        let started = Instant::now();
        for _ in 0..20 {
            bob.set_typing(true);
            tokio::time::sleep(Duration::from_millis(300)).await;
            if started.elapsed() >= PUBLISH_DEBOUNCE + Duration::from_millis(100) {
                assert_eq!(
                    alice.typing_users(),
                    vec![bob_user.clone()],
                    "Bob not visible {:?} into typing",
                    started.elapsed()
                );
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retarget_swaps_the_subscription() {
        let dispatcher = Dispatcher::new();
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());
        let mut alice = indicator(&dispatcher, user("Alice"), first).await;
        assert_eq!(dispatcher.subscriber_count(&typing_channel(first)), 1);

        alice.retarget(second).await.unwrap();
        assert_eq!(dispatcher.subscriber_count(&typing_channel(first)), 0);
        assert_eq!(dispatcher.subscriber_count(&typing_channel(second)), 1);
        assert_eq!(alice.conversation_id(), Some(second));

        // Peers in the old conversation no longer reach Alice.
        let bob = indicator(&dispatcher, user("Bob"), first).await;
        bob.set_typing(true);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(alice.typing_users().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unmount_and_drop_release_the_subscription() {
        let dispatcher = Dispatcher::new();
        let conversation = Uuid::new_v4();
        let channel = typing_channel(conversation);

        let mut alice = indicator(&dispatcher, user("Alice"), conversation).await;
        alice.unmount();
        assert_eq!(dispatcher.subscriber_count(&channel), 0);
        assert_eq!(alice.conversation_id(), None);
        alice.set_typing(true);

        let bob = indicator(&dispatcher, user("Bob"), conversation).await;
        assert_eq!(dispatcher.subscriber_count(&channel), 1);
        drop(bob);
        assert_eq!(dispatcher.subscriber_count(&channel), 0);
    }
}
