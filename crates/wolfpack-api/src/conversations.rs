use std::collections::HashMap;

use axum::{Extension, Json, extract::State};
use tracing::info;
use uuid::Uuid;

use wolfpack_types::api::{
    Claims, ConversationSummary, ConversationsResponse, DirectConversationRequest,
    DirectConversationResponse, OtherUser,
};
use wolfpack_types::models::ConversationKind;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::util::{blocking, caller, degraded, parse_enum, parse_id, parse_timestamp};

/// POST /conversations/direct — find or create the caller's direct conversation
/// with another user. Repeating the call, from either side, yields the same id.
pub async fn find_or_create_direct(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<DirectConversationRequest>,
) -> Result<Json<DirectConversationResponse>, ApiError> {
    let other_key = req.other_user_id.trim().to_string();
    if other_key.is_empty() {
        return Err(ApiError::BadRequest("otherUserId is required".into()));
    }

    let me = caller(&state, claims.sub).await?;

    // The client may hold either the internal id or the auth id of the other user
    let other = blocking(&state, move |db| db.resolve_user(&other_key))
        .await?
        .ok_or(ApiError::NotFound("Other user"))?;

    if other.id == me.id {
        return Err(ApiError::BadRequest("Cannot start a conversation with yourself".into()));
    }

    let new_id = Uuid::new_v4().to_string();
    let (my_id, other_id) = (me.id.clone(), other.id.clone());
    let conversation_id = blocking(&state, move |db| {
        db.find_or_create_direct_conversation(&new_id, &my_id, &other_id)
    })
    .await?;

    info!("{} opened direct conversation {} with {}", me.id, conversation_id, other.id);

    Ok(Json(DirectConversationResponse {
        conversation_id: parse_id(&conversation_id, "conversation id"),
        other_user: OtherUser {
            id: parse_id(&other.id, "user id"),
            display_name: other.display_name,
        },
    }))
}

/// GET /conversations — the caller's conversations, most recent first.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ConversationsResponse>, ApiError> {
    let auth_id = claims.sub.to_string();
    let result = blocking(&state, move |db| {
        let Some(me) = db.resolve_user(&auth_id)? else {
            return Ok(None);
        };
        let conversations = db.list_conversations_for_user(&me.id)?;
        let ids: Vec<String> = conversations.iter().map(|c| c.id.clone()).collect();
        let participants = db.get_participants(&ids)?;
        Ok(Some((me.id, conversations, participants)))
    })
    .await;

    let (my_id, rows, participant_rows) = match result {
        Ok(Some(found)) => found,
        Ok(None) => return Err(ApiError::NotFound("User")),
        Err(e) => {
            return Ok(Json(ConversationsResponse {
                conversations: vec![],
                message: degraded("conversations", &e),
            }));
        }
    };

    // Group the other participants by conversation
    let mut by_conversation: HashMap<String, Vec<OtherUser>> = HashMap::new();
    for p in participant_rows.into_iter().filter(|p| p.user_id != my_id) {
        by_conversation.entry(p.conversation_id).or_default().push(OtherUser {
            id: parse_id(&p.user_id, "participant id"),
            display_name: p.display_name,
        });
    }

    let conversations: Vec<ConversationSummary> = rows
        .into_iter()
        .map(|row| ConversationSummary {
            id: parse_id(&row.id, "conversation id"),
            conversation_type: parse_enum(&row.conversation_type, "conversation type", ConversationKind::Direct),
            name: row.name,
            participants: by_conversation.remove(&row.id).unwrap_or_default(),
            last_message_at: row.last_message_at.as_deref().map(parse_timestamp),
        })
        .collect();

    let message = format!("Found {} conversations", conversations.len());
    Ok(Json(ConversationsResponse { conversations, message }))
}
