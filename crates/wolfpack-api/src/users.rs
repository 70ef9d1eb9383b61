use axum::{
    Extension, Json,
    extract::{Path, State},
};
use tracing::info;

use wolfpack_types::api::{Claims, ToggleFollowResponse, UserProfile};
use wolfpack_types::models::{UserRole, WolfpackStatus};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::util::{blocking, caller, parse_enum, parse_id, parse_timestamp};

/// GET /users/{user_id} — public profile. Accepts either the internal id or
/// the auth id.
pub async fn get_profile(
    State(state): State<AppState>,
    Path(user_key): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserProfile>, ApiError> {
    let me = caller(&state, claims.sub).await?;

    let found = blocking(&state, move |db| {
        let Some(user) = db.resolve_user(&user_key)? else {
            return Ok(None);
        };
        let (followers, following) = db.follow_counts(&user.id)?;
        let is_following = user.id != me.id && db.is_following(&me.id, &user.id)?;
        Ok(Some((user, followers, following, is_following)))
    })
    .await?;

    let (user, followers_count, following_count, is_following) =
        found.ok_or(ApiError::NotFound("User"))?;

    Ok(Json(UserProfile {
        id: parse_id(&user.id, "user id"),
        display_name: user.display_name,
        first_name: user.first_name,
        last_name: user.last_name,
        avatar_url: user.avatar_url,
        role: parse_enum(&user.role, "role", UserRole::User),
        wolfpack_status: parse_enum(&user.wolfpack_status, "wolfpack status", WolfpackStatus::Active),
        followers_count,
        following_count,
        is_following,
        created_at: parse_timestamp(&user.created_at),
    }))
}

/// POST /users/{user_id}/follow — follow or unfollow.
pub async fn toggle_follow(
    State(state): State<AppState>,
    Path(target_key): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ToggleFollowResponse>, ApiError> {
    let me = caller(&state, claims.sub).await?;

    let target = blocking(&state, move |db| db.resolve_user(&target_key))
        .await?
        .ok_or(ApiError::NotFound("User"))?;

    if target.id == me.id {
        return Err(ApiError::BadRequest("Cannot follow yourself".into()));
    }

    let (my_id, target_id) = (me.id.clone(), target.id.clone());
    let (following, followers_count) = blocking(&state, move |db| {
        let following = db.toggle_follow(&my_id, &target_id)?;
        let (followers, _) = db.follow_counts(&target_id)?;
        Ok((following, followers))
    })
    .await?;

    info!("{} {} {}", me.id, if following { "followed" } else { "unfollowed" }, target.id);

    Ok(Json(ToggleFollowResponse {
        following,
        followers_count,
    }))
}
