use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use wolfpack_types::api::{Claims, FeedPost, FeedResponse, LikeCountResponse, ToggleLikeResponse};
use wolfpack_types::events::{LIKE_EVENT, LikePayload, post_channel};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::util::{blocking, caller, degraded, parse_id, parse_timestamp};

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    20
}

/// GET /feed — one page of the video feed, newest first.
pub async fn get_feed(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<FeedResponse>, ApiError> {
    let auth_id = claims.sub.to_string();
    let limit = query.limit.clamp(1, 50);
    let offset = query.offset;

    // Fetch one extra row to learn whether another page exists
    let result = blocking(&state, move |db| {
        let Some(me) = db.resolve_user(&auth_id)? else {
            return Ok(None);
        };
        db.list_feed(&me.id, limit + 1, offset).map(Some)
    })
    .await;

    let mut rows = match result {
        Ok(Some(rows)) => rows,
        Ok(None) => return Err(ApiError::NotFound("User")),
        Err(e) => {
            return Ok(Json(FeedResponse {
                posts: vec![],
                has_more: false,
                message: degraded("feed", &e),
            }));
        }
    };

    let has_more = rows.len() > limit as usize;
    rows.truncate(limit as usize);

    let posts: Vec<FeedPost> = rows
        .into_iter()
        .map(|row| FeedPost {
            id: parse_id(&row.id, "post id"),
            user_id: parse_id(&row.user_id, "author id"),
            display_name: row.display_name,
            avatar_url: row.avatar_url,
            caption: row.caption,
            video_url: row.video_url,
            thumbnail_url: row.thumbnail_url,
            likes_count: row.likes_count.max(0) as u64,
            comments_count: row.comments_count.max(0) as u64,
            shares_count: row.shares_count.max(0) as u64,
            liked_by_me: row.liked_by_viewer,
            created_at: parse_timestamp(&row.created_at),
        })
        .collect();

    let message = if posts.is_empty() {
        "No posts yet".to_string()
    } else {
        format!("Loaded {} posts", posts.len())
    };

    Ok(Json(FeedResponse { posts, has_more, message }))
}

/// POST /posts/{post_id}/like — like or unlike; returns the new state.
pub async fn toggle_like(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ToggleLikeResponse>, ApiError> {
    let me = caller(&state, claims.sub).await?;

    let (pid, uid) = (post_id.to_string(), me.id.clone());
    let toggled = blocking(&state, move |db| {
        if !db.post_exists(&pid)? {
            return Ok(None);
        }
        db.toggle_post_like(&pid, &uid).map(Some)
    })
    .await?;

    let (liked, likes_count) = toggled.ok_or(ApiError::NotFound("Post"))?;
    debug!("{} {} post {}", me.id, if liked { "liked" } else { "unliked" }, post_id);

    let payload = LikePayload {
        post_id,
        user_id: parse_id(&me.id, "user id"),
        liked,
        likes_count,
    };
    match serde_json::to_value(&payload) {
        Ok(payload) => state.dispatcher.publish(&post_channel(post_id), LIKE_EVENT, payload),
        Err(e) => warn!("Failed to serialize like event for {}: {}", post_id, e),
    }

    Ok(Json(ToggleLikeResponse { liked }))
}

/// GET /posts/{post_id}/likes — authoritative like count and the caller's flag.
pub async fn like_count(
    State(state): State<AppState>,
    Path(post_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<LikeCountResponse>, ApiError> {
    let me = caller(&state, claims.sub).await?;

    let pid = post_id.to_string();
    let (count, liked) = blocking(&state, move |db| db.post_like_state(&pid, &me.id))
        .await?
        .ok_or(ApiError::NotFound("Post"))?;

    Ok(Json(LikeCountResponse { count, liked }))
}
