use axum::{
    Json, Router, middleware,
    routing::{get, post},
};
use serde_json::{Value, json};

use crate::auth::{self, AppState};
use crate::middleware::require_auth;
use crate::{conversations, feed, members, menu, messages, users};

/// REST surface. The realtime upgrade route is mounted by the server binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/menu", get(menu::get_menu))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/conversations", get(conversations::list_conversations))
        .route("/conversations/direct", post(conversations::find_or_create_direct))
        .route(
            "/conversations/{conversation_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/members", get(members::list_members))
        .route("/feed", get(feed::get_feed))
        .route("/posts/{post_id}/like", post(feed::toggle_like))
        .route("/posts/{post_id}/likes", get(feed::like_count))
        .route("/users/{user_id}", get(users::get_profile))
        .route("/users/{user_id}/follow", post(users::toggle_follow))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
