use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use wolfpack_types::events::{
    RealtimeCommand, RealtimeEvent, TYPING_EVENT, TypingPayload, channel_conversation_id,
    is_conversation_channel,
};

use crate::dispatcher::{Dispatcher, Session};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Authenticated identity attached to a realtime connection.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: Uuid,
    pub display_name: String,
}

/// Decides who may join conversation-scoped channels.
#[async_trait]
pub trait ConversationAccess: Send + Sync {
    async fn is_participant(&self, user_id: Uuid, conversation_id: Uuid) -> bool;
}

/// Handle a pre-authenticated WebSocket connection.
/// The JWT was already validated at the HTTP upgrade layer, so we go straight
/// to Ready + event loop.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    access: Arc<dyn ConversationAccess>,
    identity: Identity,
) {
    let (mut sender, mut receiver) = socket.split();
    let Identity { user_id, display_name } = identity.clone();

    info!("{} ({}) connected to realtime", display_name, user_id);

    if send_event(&mut sender, &RealtimeEvent::Ready { user_id }).await.is_err() {
        return;
    }

    let (session, mut session_rx) = dispatcher.open_session();
    let session_id = session.id();
    dispatcher.user_online(user_id, session_id);

    // Replies generated by the command loop, forwarded by the send task
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<RealtimeEvent>();

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                msg = session_rx.recv() => {
                    let Some(msg) = msg else { break };
                    let event = RealtimeEvent::Broadcast {
                        channel: msg.channel.clone(),
                        event: msg.event.clone(),
                        payload: msg.payload.clone(),
                    };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                reply = reply_rx.recv() => {
                    let Some(reply) = reply else { break };
                    if send_event(&mut sender, &reply).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // The session lives in the command task; aborting the task drops it,
    // which leaves every joined channel.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<RealtimeCommand>(&text) {
                    Ok(cmd) => {
                        if let Some(reply) = handle_command(&session, &identity, access.as_ref(), cmd).await {
                            if reply_tx.send(reply).is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            identity.display_name,
                            identity.user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.user_offline(user_id, session_id);
    info!("{} ({}) disconnected from realtime", display_name, user_id);
}

/// Apply one client command to the session. Returns the reply to send, if any.
pub async fn handle_command(
    session: &Session,
    identity: &Identity,
    access: &dyn ConversationAccess,
    cmd: RealtimeCommand,
) -> Option<RealtimeEvent> {
    match cmd {
        RealtimeCommand::Join { channel } => {
            if is_conversation_channel(&channel) {
                let allowed = match channel_conversation_id(&channel) {
                    Some(conversation_id) => access.is_participant(identity.user_id, conversation_id).await,
                    None => false,
                };
                if !allowed {
                    warn!("{} ({}) denied join to {}", identity.display_name, identity.user_id, channel);
                    return Some(RealtimeEvent::Error {
                        message: format!("not a participant of {}", channel),
                    });
                }
            }
            match session.join(&channel) {
                Ok(_) => Some(RealtimeEvent::Joined { channel }),
                Err(e) => Some(RealtimeEvent::Error { message: e.to_string() }),
            }
        }

        RealtimeCommand::Leave { channel } => {
            session.leave(&channel);
            Some(RealtimeEvent::Left { channel })
        }

        RealtimeCommand::Broadcast { channel, event, payload } => {
            let payload = if event == TYPING_EVENT {
                match stamp_typing_payload(payload, identity) {
                    Some(payload) => payload,
                    None => {
                        return Some(RealtimeEvent::Error {
                            message: "malformed typing payload".to_string(),
                        });
                    }
                }
            } else {
                payload
            };

            debug!("{} ({}) -> {} on {}", identity.display_name, identity.user_id, event, channel);
            session
                .publish(&channel, &event, payload)
                .err()
                .map(|e| RealtimeEvent::Error { message: e.to_string() })
        }
    }
}

/// Typing payloads always carry the sender's real identity, whatever the client claims.
fn stamp_typing_payload(payload: Value, identity: &Identity) -> Option<Value> {
    let mut typing: TypingPayload = serde_json::from_value(payload).ok()?;
    typing.user_id = identity.user_id;
    typing.display_name = identity.display_name.clone();
    serde_json::to_value(typing).ok()
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &RealtimeEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to serialize realtime event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}
