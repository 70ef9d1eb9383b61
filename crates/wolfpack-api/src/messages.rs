use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use wolfpack_types::api::{Claims, MessageResponse, SendMessageRequest};
use wolfpack_types::events::{MESSAGE_EVENT, conversation_channel};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::util::{blocking, caller, now_timestamp, parse_id, parse_timestamp};

const MAX_MESSAGE_CHARS: usize = 4000;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor-based pagination — pass the `created_at` timestamp of the
    /// oldest message from the previous page to fetch older messages.
    pub before: Option<String>,
    /// Id of that same message, so older messages sharing its timestamp
    /// are neither skipped nor repeated.
    pub before_id: Option<Uuid>,
}

fn default_limit() -> u32 {
    50
}

/// Only participants may read or post; anyone else sees a 404.
async fn ensure_participant(
    state: &AppState,
    conversation_id: Uuid,
    claims: &Claims,
) -> Result<wolfpack_db::models::UserRow, ApiError> {
    let me = caller(state, claims.sub).await?;
    let (cid, uid) = (conversation_id.to_string(), me.id.clone());
    if !blocking(state, move |db| db.is_participant(&cid, &uid)).await? {
        warn!("{} is not a participant of {}", me.id, conversation_id);
        return Err(ApiError::NotFound("Conversation"));
    }
    Ok(me)
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = req.content.trim().to_string();
    if content.is_empty() || content.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ApiError::BadRequest(format!(
            "Message must be 1-{} characters",
            MAX_MESSAGE_CHARS
        )));
    }

    let me = ensure_participant(&state, conversation_id, &claims).await?;

    let message_id = Uuid::new_v4();
    let created_at = now_timestamp();
    let (mid, cid, sid, body, at) = (
        message_id.to_string(),
        conversation_id.to_string(),
        me.id.clone(),
        content.clone(),
        created_at.clone(),
    );
    blocking(&state, move |db| db.insert_message(&mid, &cid, &sid, &body, &at)).await?;

    let message = MessageResponse {
        id: message_id,
        conversation_id,
        sender_id: parse_id(&me.id, "user id"),
        sender_display_name: me.display_name,
        content,
        created_at: parse_timestamp(&created_at),
    };

    // Fan out to everyone watching the conversation
    match serde_json::to_value(&message) {
        Ok(payload) => state
            .dispatcher
            .publish(&conversation_channel(conversation_id), MESSAGE_EVENT, payload),
        Err(e) => warn!("Failed to serialize message {}: {}", message_id, e),
    }

    Ok((StatusCode::CREATED, Json(message)))
}

/// Cursors come back from clients in whatever RFC 3339 form they were
/// serialized as; stored timestamps always carry milliseconds.
fn normalize_cursor(raw: &str) -> Result<String, ApiError> {
    raw.parse::<DateTime<Utc>>()
        .map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true))
        .map_err(|_| ApiError::BadRequest(format!("Invalid 'before' cursor: {}", raw)))
}

/// Returns messages oldest-first within the requested page.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<MessageResponse>>, ApiError> {
    ensure_participant(&state, conversation_id, &claims).await?;

    let cid = conversation_id.to_string();
    let limit = query.limit.clamp(1, 200);
    let before = query.before.as_deref().map(normalize_cursor).transpose()?;
    let before_id = query.before_id.map(|id| id.to_string());
    let rows = blocking(&state, move |db| {
        db.get_messages(&cid, limit, before.as_deref(), before_id.as_deref())
    })
    .await?;

    let messages = rows
        .into_iter()
        .rev()
        .map(|row| MessageResponse {
            id: parse_id(&row.id, "message id"),
            conversation_id: parse_id(&row.conversation_id, "conversation id"),
            sender_id: parse_id(&row.sender_id, "sender id"),
            sender_display_name: row.sender_display_name,
            content: row.content,
            created_at: parse_timestamp(&row.created_at),
        })
        .collect();

    Ok(Json(messages))
}
