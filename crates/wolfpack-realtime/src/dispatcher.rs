use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

/// Channel every connection may join to follow online/offline changes.
pub const PRESENCE_CHANNEL: &str = "presence";
pub const PRESENCE_EVENT: &str = "presence";

/// Longest accepted channel name.
pub const MAX_CHANNEL_LEN: usize = 128;
/// Channels a single session may have joined at once.
pub const MAX_CHANNELS_PER_SESSION: usize = 64;

/// One broadcast on a named channel.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub channel: String,
    pub event: String,
    pub payload: Value,
    /// Session that published the message; `Uuid::nil()` for server-side publishes.
    pub origin: Uuid,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel '{0}' has not been joined")]
    NotJoined(String),
    #[error("invalid channel name")]
    InvalidName,
    #[error("too many joined channels (max {MAX_CHANNELS_PER_SESSION})")]
    TooManyChannels,
}

/// Routes channel broadcasts between sessions and tracks who is online.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Every channel message goes through one broadcast channel; sessions filter
    /// by their joined set.
    broadcast_tx: broadcast::Sender<Arc<ChannelMessage>>,

    /// channel name -> joined session ids
    members: Mutex<HashMap<String, HashSet<Uuid>>>,

    /// user_id -> live session ids; online while non-empty
    online_users: Mutex<HashMap<Uuid, HashSet<Uuid>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                members: Mutex::new(HashMap::new()),
                online_users: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Open a session. Its memberships are released when the `Session` is dropped.
    pub fn open_session(&self) -> (Session, SessionReceiver) {
        let id = Uuid::new_v4();
        let channels = Arc::new(RwLock::new(HashSet::new()));
        let receiver = SessionReceiver {
            id,
            channels: channels.clone(),
            rx: self.inner.broadcast_tx.subscribe(),
        };
        let session = Session {
            id,
            dispatcher: self.clone(),
            channels,
        };
        (session, receiver)
    }

    /// Publish from the server itself (e.g. a REST handler). Delivered to every
    /// session joined to `channel`.
    pub fn publish(&self, channel: &str, event: &str, payload: Value) {
        self.send(ChannelMessage {
            channel: channel.to_string(),
            event: event.to_string(),
            payload,
            origin: Uuid::nil(),
        });
    }

    /// Number of sessions currently joined to `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        lock(&self.inner.members)
            .get(channel)
            .map_or(0, HashSet::len)
    }

    /// Mark a user online for the given session. Announces the transition on
    /// the presence channel only when it is the user's first live session.
    pub fn user_online(&self, user_id: Uuid, session_id: Uuid) {
        let first = {
            let mut online = lock(&self.inner.online_users);
            let sessions = online.entry(user_id).or_default();
            sessions.insert(session_id);
            sessions.len() == 1
        };

        if first {
            self.publish(PRESENCE_CHANNEL, PRESENCE_EVENT, json!({ "userId": user_id, "online": true }));
        }
    }

    /// Drop one session of a user. Returns true if that was the user's last
    /// session, in which case the user is announced offline.
    pub fn user_offline(&self, user_id: Uuid, session_id: Uuid) -> bool {
        let last = {
            let mut online = lock(&self.inner.online_users);
            match online.get_mut(&user_id) {
                Some(sessions) => {
                    sessions.remove(&session_id);
                    if sessions.is_empty() {
                        online.remove(&user_id);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };

        if last {
            self.publish(PRESENCE_CHANNEL, PRESENCE_EVENT, json!({ "userId": user_id, "online": false }));
        }
        last
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        lock(&self.inner.online_users).contains_key(&user_id)
    }

    pub fn online_users(&self) -> HashSet<Uuid> {
        lock(&self.inner.online_users).keys().copied().collect()
    }

    fn send(&self, message: ChannelMessage) {
        // No receivers is not an error: nobody is connected.
        let _ = self.inner.broadcast_tx.send(Arc::new(message));
    }

    fn add_member(&self, channel: &str, session_id: Uuid) {
        lock(&self.inner.members)
            .entry(channel.to_string())
            .or_default()
            .insert(session_id);
    }

    fn remove_member(&self, channel: &str, session_id: Uuid) {
        let mut members = lock(&self.inner.members);
        if let Some(sessions) = members.get_mut(channel) {
            sessions.remove(&session_id);
            if sessions.is_empty() {
                members.remove(channel);
            }
        }
    }
}

/// A realtime session: the set of channels one client has joined.
/// Dropping it leaves every channel.
pub struct Session {
    id: Uuid,
    dispatcher: Dispatcher,
    channels: Arc<RwLock<HashSet<String>>>,
}

impl Session {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Join a channel. Returns false if it was already joined.
    pub fn join(&self, channel: &str) -> Result<bool, ChannelError> {
        if channel.is_empty() || channel.len() > MAX_CHANNEL_LEN {
            return Err(ChannelError::InvalidName);
        }

        let mut channels = write(&self.channels);
        if channels.contains(channel) {
            return Ok(false);
        }
        if channels.len() >= MAX_CHANNELS_PER_SESSION {
            return Err(ChannelError::TooManyChannels);
        }
        channels.insert(channel.to_string());
        drop(channels);

        self.dispatcher.add_member(channel, self.id);
        debug!("Session {} joined {}", self.id, channel);
        Ok(true)
    }

    /// Leave a channel. Returns false if it was not joined.
    pub fn leave(&self, channel: &str) -> bool {
        let removed = write(&self.channels).remove(channel);
        if removed {
            self.dispatcher.remove_member(channel, self.id);
            debug!("Session {} left {}", self.id, channel);
        }
        removed
    }

    pub fn is_joined(&self, channel: &str) -> bool {
        read(&self.channels).contains(channel)
    }

    /// Broadcast to every other session joined to `channel`.
    pub fn publish(&self, channel: &str, event: &str, payload: Value) -> Result<(), ChannelError> {
        if !self.is_joined(channel) {
            return Err(ChannelError::NotJoined(channel.to_string()));
        }
        self.dispatcher.send(ChannelMessage {
            channel: channel.to_string(),
            event: event.to_string(),
            payload,
            origin: self.id,
        });
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let channels: Vec<String> = write(&self.channels).drain().collect();
        for channel in &channels {
            self.dispatcher.remove_member(channel, self.id);
        }
        debug!("Session {} released {} channels", self.id, channels.len());
    }
}

/// Receiving half of a session: yields messages for joined channels that
/// were published by someone else.
pub struct SessionReceiver {
    id: Uuid,
    channels: Arc<RwLock<HashSet<String>>>,
    rx: broadcast::Receiver<Arc<ChannelMessage>>,
}

impl SessionReceiver {
    /// Returns None once the dispatcher is gone.
    pub async fn recv(&mut self) -> Option<Arc<ChannelMessage>> {
        loop {
            let msg = match self.rx.recv().await {
                Ok(msg) => msg,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Session {} lagged by {} messages", self.id, n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            };

            if msg.origin == self.id {
                continue;
            }
            if !read(&self.channels).contains(&msg.channel) {
                continue;
            }
            return Some(msg);
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read<T>(l: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(l: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
