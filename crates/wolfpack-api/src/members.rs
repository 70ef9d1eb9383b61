use axum::{
    Extension, Json,
    extract::{Query, State},
};
use serde::Deserialize;
use uuid::Uuid;

use wolfpack_types::api::{Claims, MemberSummary, MembersResponse};
use wolfpack_types::models::{UserRole, WolfpackStatus};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::util::{blocking, degraded, parse_enum, parse_id, parse_timestamp};

#[derive(Debug, Deserialize)]
pub struct MembersQuery {
    pub search: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

/// GET /members — active members the caller can message.
///
/// A failing query never surfaces as a 500 here: the caller gets an empty list
/// and a message explaining why.
pub async fn list_members(
    State(state): State<AppState>,
    Query(query): Query<MembersQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MembersResponse>, ApiError> {
    let auth_id = claims.sub.to_string();
    let search = query
        .search
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let limit = query.limit.clamp(1, 200);

    let result = blocking(&state, move |db| {
        let Some(me) = db.resolve_user(&auth_id)? else {
            return Ok(None);
        };
        let rows = db.list_active_members(&me.id, search.as_deref(), limit)?;
        let total = db.count_active_members(&me.id, search.as_deref())?;
        Ok(Some((me.id, rows, total)))
    })
    .await;

    let (my_id, rows, total_count) = match result {
        Ok(Some(found)) => found,
        Ok(None) => return Err(ApiError::NotFound("User")),
        Err(e) => {
            return Ok(Json(MembersResponse {
                members: vec![],
                total_count: 0,
                current_user_id: None,
                message: degraded("members", &e),
            }));
        }
    };

    let members: Vec<MemberSummary> = rows
        .into_iter()
        .map(|row| {
            let id = parse_id(&row.id, "user id");
            MemberSummary {
                id,
                display_name: row.display_name,
                avatar_url: row.avatar_url,
                role: parse_enum(&row.role, "role", UserRole::User),
                wolfpack_status: parse_enum(&row.wolfpack_status, "wolfpack status", WolfpackStatus::Active),
                is_online: row.is_online || state.dispatcher.is_online(id),
                last_activity: row.last_activity.as_deref().map(parse_timestamp),
            }
        })
        .collect();

    let message = if members.is_empty() {
        "No other active members yet".to_string()
    } else {
        format!("Found {} active members", total_count)
    };

    Ok(Json(MembersResponse {
        members,
        total_count,
        current_user_id: Some(parse_id(&my_id, "user id")).filter(|id| *id != Uuid::default()),
        message,
    }))
}
