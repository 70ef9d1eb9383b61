use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use wolfpack_api::auth::{AppState, AppStateInner, create_token};
use wolfpack_api::routes::router;
use wolfpack_db::Database;
use wolfpack_db::models::NewUser;
use wolfpack_realtime::dispatcher::Dispatcher;

const SECRET: &str = "test-secret";

struct TestUser {
    id: String,
    auth_id: String,
    token: String,
}

fn test_state() -> AppState {
    Arc::new(AppStateInner {
        db: Database::open_in_memory().unwrap(),
        jwt_secret: SECRET.to_string(),
        token_ttl: chrono::Duration::hours(1),
        dispatcher: Dispatcher::new(),
    })
}

fn add_user(state: &AppState, name: &str) -> TestUser {
    let id = Uuid::new_v4();
    let auth_id = Uuid::new_v4();
    let email = format!("{}@wolfpack.test", name.to_lowercase());
    state
        .db
        .create_user(&NewUser {
            id: &id.to_string(),
            auth_id: &auth_id.to_string(),
            email: &email,
            password_hash: "unused",
            display_name: name,
        })
        .unwrap();

    TestUser {
        id: id.to_string(),
        auth_id: auth_id.to_string(),
        token: create_token(SECRET, chrono::Duration::hours(1), auth_id, &email).unwrap(),
    }
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn unauthenticated_calls_get_401_without_data() {
    let app = router(test_state());

    let (status, body) = send(
        &app,
        Method::POST,
        "/conversations/direct",
        None,
        Some(json!({ "otherUserId": Uuid::new_v4() })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body.get("conversationId").is_none());
    assert_eq!(body["error"], "Unauthorized");

    let (status, body) = send(&app, Method::GET, "/members", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body.get("members").is_none());

    let (status, _) = send(&app, Method::GET, "/members", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn direct_conversation_is_idempotent_from_both_sides() {
    let state = test_state();
    let app = router(state.clone());
    let ana = add_user(&state, "Ana");
    let ben = add_user(&state, "Ben");

    let (status, first) = send(
        &app,
        Method::POST,
        "/conversations/direct",
        Some(&ana.token),
        Some(json!({ "otherUserId": ben.id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["otherUser"]["display_name"], "Ben");
    assert_eq!(first["otherUser"]["id"], ben.id.as_str());

    // Reverse direction, addressing Ana by her auth id this time
    let (status, second) = send(
        &app,
        Method::POST,
        "/conversations/direct",
        Some(&ben.token),
        Some(json!({ "otherUserId": ana.auth_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["conversationId"], first["conversationId"]);
    assert_eq!(second["otherUser"]["id"], ana.id.as_str());

    let (_, listed) = send(&app, Method::GET, "/conversations", Some(&ana.token), None).await;
    assert_eq!(listed["conversations"].as_array().unwrap().len(), 1);
    assert_eq!(listed["conversations"][0]["participants"][0]["display_name"], "Ben");
}

#[tokio::test]
async fn direct_conversation_with_unknown_or_self_user() {
    let state = test_state();
    let app = router(state.clone());
    let ana = add_user(&state, "Ana");

    let (status, body) = send(
        &app,
        Method::POST,
        "/conversations/direct",
        Some(&ana.token),
        Some(json!({ "otherUserId": Uuid::new_v4() })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Other user not found");

    let (status, _) = send(
        &app,
        Method::POST,
        "/conversations/direct",
        Some(&ana.token),
        Some(json!({ "otherUserId": ana.id })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn members_listing_excludes_caller() {
    let state = test_state();
    let app = router(state.clone());
    let ana = add_user(&state, "Ana");
    add_user(&state, "Ben");
    add_user(&state, "Bella");

    let (status, body) = send(&app, Method::GET, "/members", Some(&ana.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalCount"], 2);
    assert_eq!(body["currentUserId"], ana.id.as_str());
    let names: Vec<&str> = body["members"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["display_name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["Bella", "Ben"]);

    let (_, body) = send(&app, Method::GET, "/members?search=bel", Some(&ana.token), None).await;
    assert_eq!(body["totalCount"], 1);
}

#[tokio::test]
async fn members_listing_degrades_instead_of_failing() {
    let state = test_state();
    let app = router(state.clone());
    let ana = add_user(&state, "Ana");

    state
        .db
        .with_conn(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = OFF; DROP TABLE users;")?;
            Ok(())
        })
        .unwrap();

    let (status, body) = send(&app, Method::GET, "/members", Some(&ana.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["members"], json!([]));
    assert!(!body["message"].as_str().unwrap().is_empty());

    let (status, body) = send(&app, Method::GET, "/feed", Some(&ana.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["posts"], json!([]));
}

#[tokio::test]
async fn like_toggle_and_authoritative_count() {
    let state = test_state();
    let app = router(state.clone());
    let ana = add_user(&state, "Ana");
    let ben = add_user(&state, "Ben");
    let post_id = Uuid::new_v4().to_string();
    state
        .db
        .insert_post(&post_id, &ana.id, Some("taco tuesday"), Some("https://cdn.test/v.mp4"), None)
        .unwrap();

    let like_uri = format!("/posts/{}/like", post_id);
    let count_uri = format!("/posts/{}/likes", post_id);

    let (status, body) = send(&app, Method::POST, &like_uri, Some(&ben.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["liked"], true);

    let (_, body) = send(&app, Method::GET, &count_uri, Some(&ben.token), None).await;
    assert_eq!(body, json!({ "count": 1, "liked": true }));

    let (_, feed) = send(&app, Method::GET, "/feed", Some(&ben.token), None).await;
    assert_eq!(feed["posts"][0]["liked_by_me"], true);
    assert_eq!(feed["hasMore"], false);

    let (_, body) = send(&app, Method::POST, &like_uri, Some(&ben.token), None).await;
    assert_eq!(body["liked"], false);
    let (_, body) = send(&app, Method::GET, &count_uri, Some(&ben.token), None).await;
    assert_eq!(body["count"], 0);

    let missing = format!("/posts/{}/like", Uuid::new_v4());
    let (status, _) = send(&app, Method::POST, &missing, Some(&ben.token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn messages_are_limited_to_participants() {
    let state = test_state();
    let app = router(state.clone());
    let ana = add_user(&state, "Ana");
    let ben = add_user(&state, "Ben");
    let eve = add_user(&state, "Eve");

    let (_, conv) = send(
        &app,
        Method::POST,
        "/conversations/direct",
        Some(&ana.token),
        Some(json!({ "otherUserId": ben.id })),
    )
    .await;
    let uri = format!("/conversations/{}/messages", conv["conversationId"].as_str().unwrap());

    let (status, sent) = send(&app, Method::POST, &uri, Some(&ana.token), Some(json!({ "content": "first round?" }))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(sent["sender_display_name"], "Ana");

    let (status, _) = send(&app, Method::POST, &uri, Some(&ana.token), Some(json!({ "content": "   " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, listed) = send(&app, Method::GET, &uri, Some(&ben.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed[0]["content"], "first round?");

    let (status, _) = send(&app, Method::GET, &uri, Some(&eve.token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn message_pages_follow_the_returned_cursor() {
    let state = test_state();
    let app = router(state.clone());
    let ana = add_user(&state, "Ana");
    let ben = add_user(&state, "Ben");

    let (_, conv) = send(
        &app,
        Method::POST,
        "/conversations/direct",
        Some(&ana.token),
        Some(json!({ "otherUserId": ben.id })),
    )
    .await;
    let conv_id = conv["conversationId"].as_str().unwrap().to_string();
    let (older, newer) = (Uuid::new_v4().to_string(), Uuid::new_v4().to_string());
    state.db.insert_message(&older, &conv_id, &ana.id, "first", "2026-01-01T10:00:00.000Z").unwrap();
    state.db.insert_message(&newer, &conv_id, &ben.id, "second", "2026-01-01T10:00:05.000Z").unwrap();

    let uri = format!("/conversations/{}/messages", conv_id);
    let (status, page) = send(&app, Method::GET, &format!("{}?limit=1", uri), Some(&ana.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page[0]["id"], newer.as_str());
    // Whole seconds serialize without a fraction
    let cursor = page[0]["created_at"].as_str().unwrap().to_string();
    assert_eq!(cursor, "2026-01-01T10:00:05Z");

    let (status, next) = send(
        &app,
        Method::GET,
        &format!("{}?limit=1&before={}", uri, cursor),
        Some(&ana.token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(next.as_array().unwrap().len(), 1);
    assert_eq!(next[0]["id"], older.as_str());

    let (status, next) = send(
        &app,
        Method::GET,
        &format!("{}?limit=1&before={}&before_id={}", uri, cursor, newer),
        Some(&ana.token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(next[0]["id"], older.as_str());

    let (status, _) = send(
        &app,
        Method::GET,
        &format!("{}?before=last-tuesday", uri),
        Some(&ana.token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn follow_toggle_and_profile() {
    let state = test_state();
    let app = router(state.clone());
    let ana = add_user(&state, "Ana");
    let ben = add_user(&state, "Ben");

    let (status, _) = send(&app, Method::POST, &format!("/users/{}/follow", ana.id), Some(&ana.token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, Method::POST, &format!("/users/{}/follow", ben.auth_id), Some(&ana.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "following": true, "followersCount": 1 }));

    let (status, profile) = send(&app, Method::GET, &format!("/users/{}", ben.id), Some(&ana.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["followers_count"], 1);
    assert_eq!(profile["is_following"], true);

    let (status, _) = send(&app, Method::GET, &format!("/users/{}", Uuid::new_v4()), Some(&ana.token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn register_then_login() {
    let app = router(test_state());
    let registration = json!({
        "email": "Wolf@Venue.test",
        "password": "correct horse",
        "displayName": "Wolf",
    });

    let (status, created) = send(&app, Method::POST, "/auth/register", None, Some(registration.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(created["token"].is_string());

    let (status, _) = send(&app, Method::POST, "/auth/register", None, Some(registration)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({ "email": "wolf@venue.test", "password": "wrong horse" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, login) = send(
        &app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({ "email": "wolf@venue.test", "password": "correct horse" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(login["userId"], created["userId"]);

    let token = login["token"].as_str().unwrap();
    let (status, _) = send(&app, Method::GET, "/members", Some(token), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn menu_is_public() {
    let state = test_state();
    let app = router(state.clone());

    let (status, body) = send(&app, Method::GET, "/menu?kind=drink", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let categories = body["categories"].as_array().unwrap();
    assert_eq!(categories.len(), 1);
    assert_eq!(categories[0]["kind"], "drink");

    let (status, _) = send(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
}
