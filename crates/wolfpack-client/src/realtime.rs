use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use wolfpack_realtime::dispatcher::{Dispatcher, Session};
use wolfpack_types::events::{RealtimeCommand, RealtimeEvent};

use crate::error::ServiceError;

/// A broadcast received on a joined channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Incoming {
    pub event: String,
    pub payload: Value,
}

/// Source of channel subscriptions.
#[async_trait]
pub trait Realtime: Send + Sync {
    async fn join(&self, channel: &str) -> Result<ChannelHandle, ServiceError>;
}

/// Transport side of one subscription. `release` must be idempotent.
pub trait ChannelLink: Send + Sync {
    fn send(&self, event: &str, payload: Value) -> Result<(), ServiceError>;
    fn release(&self);
}

/// One subscription to a channel. Released explicitly or on drop.
pub struct ChannelHandle {
    channel: String,
    link: Arc<dyn ChannelLink>,
    inbound: AsyncMutex<mpsc::UnboundedReceiver<Incoming>>,
}

impl ChannelHandle {
    pub fn new(
        channel: impl Into<String>,
        link: Arc<dyn ChannelLink>,
        inbound: mpsc::UnboundedReceiver<Incoming>,
    ) -> Self {
        Self {
            channel: channel.into(),
            link,
            inbound: AsyncMutex::new(inbound),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn send(&self, event: &str, payload: Value) -> Result<(), ServiceError> {
        self.link.send(event, payload)
    }

    /// Next broadcast, or None once the subscription is released or the
    /// transport is gone.
    pub async fn recv(&self) -> Option<Incoming> {
        self.inbound.lock().await.recv().await
    }

    /// Publishing half that can be moved into other tasks. Sends fail after
    /// the handle is released.
    pub fn sender(&self) -> ChannelSender {
        ChannelSender {
            link: self.link.clone(),
        }
    }

    pub fn release(&self) {
        self.link.release();
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.link.release();
    }
}

#[derive(Clone)]
pub struct ChannelSender {
    link: Arc<dyn ChannelLink>,
}

impl ChannelSender {
    pub fn send(&self, event: &str, payload: Value) -> Result<(), ServiceError> {
        self.link.send(event, payload)
    }
}

fn released(channel: &str) -> ServiceError {
    ServiceError::Channel(format!("subscription to {} was released", channel))
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── In-process transport ────────────────────────────────────────────────

/// `Realtime` backed directly by a `Dispatcher`. Every join opens its own
/// session, so a client never receives its own broadcasts.
#[derive(Clone)]
pub struct LocalRealtime {
    dispatcher: Dispatcher,
}

impl LocalRealtime {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl Realtime for LocalRealtime {
    async fn join(&self, channel: &str) -> Result<ChannelHandle, ServiceError> {
        let (session, mut session_rx) = self.dispatcher.open_session();
        session
            .join(channel)
            .map_err(|e| ServiceError::Channel(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(async move {
            while let Some(msg) = session_rx.recv().await {
                let incoming = Incoming {
                    event: msg.event.clone(),
                    payload: msg.payload.clone(),
                };
                if tx.send(incoming).is_err() {
                    break;
                }
            }
        });

        let link = LocalLink {
            channel: channel.to_string(),
            session: Mutex::new(Some(session)),
            forwarder,
        };
        Ok(ChannelHandle::new(channel, Arc::new(link), rx))
    }
}

struct LocalLink {
    channel: String,
    session: Mutex<Option<Session>>,
    forwarder: JoinHandle<()>,
}

impl ChannelLink for LocalLink {
    fn send(&self, event: &str, payload: Value) -> Result<(), ServiceError> {
        match lock(&self.session).as_ref() {
            Some(session) => session
                .publish(&self.channel, event, payload)
                .map_err(|e| ServiceError::Channel(e.to_string())),
            None => Err(released(&self.channel)),
        }
    }

    fn release(&self) {
        // Dropping the session leaves the channel.
        if lock(&self.session).take().is_some() {
            self.forwarder.abort();
        }
    }
}

// ── WebSocket transport ─────────────────────────────────────────────────

type Subscribers = HashMap<String, HashMap<u64, mpsc::UnboundedSender<Incoming>>>;

struct WsShared {
    commands: mpsc::UnboundedSender<RealtimeCommand>,
    subscribers: Mutex<Subscribers>,
    next_id: AtomicU64,
}

/// `Realtime` over the server's `/realtime` socket. Subscriptions to the
/// same channel share one server-side membership: the first subscriber
/// joins and the last one to release leaves.
pub struct WsRealtime {
    shared: Arc<WsShared>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl WsRealtime {
    /// `url` is the full socket URL including the `token` query parameter.
    pub async fn connect(url: &str) -> Result<Self, ServiceError> {
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;
        let (mut ws_tx, mut ws_rx) = ws.split();

        let (commands, mut command_rx) = mpsc::unbounded_channel::<RealtimeCommand>();
        let shared = Arc::new(WsShared {
            commands,
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        });

        let writer = tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                let text = match serde_json::to_string(&command) {
                    Ok(t) => t,
                    Err(e) => {
                        warn!("Failed to encode realtime command: {}", e);
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        let reader_shared = shared.clone();
        let reader = tokio::spawn(async move {
            while let Some(Ok(msg)) = ws_rx.next().await {
                let text = match msg {
                    Message::Text(t) => t,
                    Message::Close(_) => break,
                    _ => continue,
                };
                match serde_json::from_str::<RealtimeEvent>(&text) {
                    Ok(event) => reader_shared.dispatch(event),
                    Err(e) => warn!("Unrecognised realtime frame: {}", e),
                }
            }
            info!("Realtime socket closed");
            // Close every inbound stream so waiting subscribers wake up.
            lock(&reader_shared.subscribers).clear();
        });

        Ok(Self {
            shared,
            writer,
            reader,
        })
    }
}

impl WsShared {
    fn dispatch(&self, event: RealtimeEvent) {
        match event {
            RealtimeEvent::Ready { user_id } => debug!("Realtime ready as {}", user_id),
            RealtimeEvent::Joined { channel } => debug!("Joined {}", channel),
            RealtimeEvent::Left { channel } => debug!("Left {}", channel),
            RealtimeEvent::Error { message } => warn!("Realtime error: {}", message),
            RealtimeEvent::Broadcast {
                channel,
                event,
                payload,
            } => {
                let subscribers = lock(&self.subscribers);
                if let Some(subs) = subscribers.get(&channel) {
                    for tx in subs.values() {
                        let _ = tx.send(Incoming {
                            event: event.clone(),
                            payload: payload.clone(),
                        });
                    }
                }
            }
        }
    }

    fn command(&self, command: RealtimeCommand) -> Result<(), ServiceError> {
        self.commands
            .send(command)
            .map_err(|_| ServiceError::Channel("realtime socket closed".into()))
    }
}

#[async_trait]
impl Realtime for WsRealtime {
    async fn join(&self, channel: &str) -> Result<ChannelHandle, ServiceError> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        let first = {
            let mut subscribers = lock(&self.shared.subscribers);
            let subs = subscribers.entry(channel.to_string()).or_default();
            subs.insert(id, tx);
            subs.len() == 1
        };
        if first {
            self.shared.command(RealtimeCommand::Join {
                channel: channel.to_string(),
            })?;
        }

        let link = WsLink {
            shared: self.shared.clone(),
            channel: channel.to_string(),
            id,
            released: AtomicBool::new(false),
        };
        Ok(ChannelHandle::new(channel, Arc::new(link), rx))
    }
}

impl Drop for WsRealtime {
    fn drop(&mut self) {
        self.writer.abort();
        self.reader.abort();
    }
}

struct WsLink {
    shared: Arc<WsShared>,
    channel: String,
    id: u64,
    released: AtomicBool,
}

impl ChannelLink for WsLink {
    fn send(&self, event: &str, payload: Value) -> Result<(), ServiceError> {
        if self.released.load(Ordering::Acquire) {
            return Err(released(&self.channel));
        }
        self.shared.command(RealtimeCommand::Broadcast {
            channel: self.channel.clone(),
            event: event.to_string(),
            payload,
        })
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }

        let last = {
            let mut subscribers = lock(&self.shared.subscribers);
            match subscribers.get_mut(&self.channel) {
                Some(subs) => {
                    subs.remove(&self.id);
                    if subs.is_empty() {
                        subscribers.remove(&self.channel);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };

        if last {
            let _ = self.shared.command(RealtimeCommand::Leave {
                channel: self.channel.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    async fn next(handle: &ChannelHandle) -> Option<Incoming> {
        tokio::time::timeout(Duration::from_millis(50), handle.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn local_broadcast_skips_sender() {
        let dispatcher = Dispatcher::new();
        let realtime = LocalRealtime::new(dispatcher.clone());

        let alice = realtime.join("typing-1").await.unwrap();
        let bob = realtime.join("typing-1").await.unwrap();
        assert_eq!(dispatcher.subscriber_count("typing-1"), 2);

        alice.send("typing", json!({ "isTyping": true })).unwrap();

        let got = next(&bob).await.expect("bob receives");
        assert_eq!(got.event, "typing");
        assert_eq!(got.payload["isTyping"], true);
        assert!(next(&alice).await.is_none());
    }

    #[tokio::test]
    async fn release_leaves_channel_and_disables_sender() {
        let dispatcher = Dispatcher::new();
        let realtime = LocalRealtime::new(dispatcher.clone());

        let handle = realtime.join("typing-1").await.unwrap();
        let sender = handle.sender();
        handle.release();
        handle.release();

        assert_eq!(dispatcher.subscriber_count("typing-1"), 0);
        assert!(matches!(
            sender.send("typing", Value::Null),
            Err(ServiceError::Channel(_))
        ));
    }

    #[tokio::test]
    async fn dropping_handle_releases() {
        let dispatcher = Dispatcher::new();
        let realtime = LocalRealtime::new(dispatcher.clone());

        let handle = realtime.join("typing-1").await.unwrap();
        drop(handle);
        assert_eq!(dispatcher.subscriber_count("typing-1"), 0);
    }

    #[tokio::test]
    async fn invalid_channel_is_rejected() {
        let realtime = LocalRealtime::new(Dispatcher::new());
        assert!(matches!(
            realtime.join("").await,
            Err(ServiceError::Channel(_))
        ));
    }

    #[tokio::test]
    async fn server_publish_reaches_local_subscriber() {
        let dispatcher = Dispatcher::new();
        let realtime = LocalRealtime::new(dispatcher.clone());
        let handle = realtime.join("post-1").await.unwrap();

        dispatcher.publish("post-1", "like", json!({ "liked": true }));
        assert_eq!(next(&handle).await.unwrap().event, "like");
    }
}
