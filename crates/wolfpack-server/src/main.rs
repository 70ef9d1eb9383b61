mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use async_trait::async_trait;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use wolfpack_api::auth::{AppState, AppStateInner};
use wolfpack_api::middleware::decode_token;
use wolfpack_realtime::connection::{self, ConversationAccess, Identity};
use wolfpack_realtime::dispatcher::Dispatcher;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wolfpack=debug,wolfpack_api=debug,wolfpack_realtime=info,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = wolfpack_db::Database::open(&config.db_path)?;

    // Shared state
    let state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret.clone(),
        token_ttl: chrono::Duration::days(config.token_ttl_days),
        dispatcher: Dispatcher::new(),
    });

    let realtime_route = Router::new()
        .route("/realtime", get(realtime_upgrade))
        .with_state(state.clone());

    let app = wolfpack_api::routes::router(state)
        .merge(realtime_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Wolfpack server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

#[derive(Debug, Deserialize)]
struct RealtimeQuery {
    token: String,
}

/// GET /realtime?token=... — browsers cannot set headers on a WebSocket
/// handshake, so the JWT travels as a query parameter.
async fn realtime_upgrade(
    State(state): State<AppState>,
    Query(query): Query<RealtimeQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let claims = decode_token(&state.jwt_secret, &query.token).map_err(|_| StatusCode::UNAUTHORIZED)?;

    let db_state = state.clone();
    let auth_id = claims.sub.to_string();
    let user = tokio::task::spawn_blocking(move || db_state.db.resolve_user(&auth_id))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map_err(|e| {
            warn!("Realtime user lookup failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    let user_id: Uuid = user.id.parse().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let identity = Identity {
        user_id,
        display_name: user.display_name,
    };

    Ok(ws.on_upgrade(move |socket| async move {
        let online_since = record_online(&state, &identity).await;
        let access = Arc::new(DbAccess { state: state.clone() });
        connection::handle_connection(socket, state.dispatcher.clone(), access, identity.clone()).await;
        if let Some(since) = online_since {
            if !state.dispatcher.is_online(identity.user_id) {
                record_offline(&state, &identity, since).await;
            }
        }
    }))
}

/// Membership lookups for conversation channels, answered from the database.
struct DbAccess {
    state: AppState,
}

#[async_trait]
impl ConversationAccess for DbAccess {
    async fn is_participant(&self, user_id: Uuid, conversation_id: Uuid) -> bool {
        let state = self.state.clone();
        let (cid, uid) = (conversation_id.to_string(), user_id.to_string());
        match tokio::task::spawn_blocking(move || state.db.is_participant(&cid, &uid)).await {
            Ok(Ok(member)) => member,
            Ok(Err(e)) => {
                warn!("Participant lookup failed for {}: {}", user_id, e);
                false
            }
            Err(e) => {
                warn!("spawn_blocking join error: {}", e);
                false
            }
        }
    }
}

fn presence_stamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Persist the online flag so listings survive restarts. Returns the
/// `last_activity` stamp written, which the matching offline write keys on.
async fn record_online(state: &AppState, identity: &Identity) -> Option<String> {
    let state = state.clone();
    let user_id = identity.user_id.to_string();
    let at = presence_stamp();
    let stamp = at.clone();
    let result = tokio::task::spawn_blocking(move || state.db.set_presence(&user_id, true, &at)).await;
    match result {
        Ok(Ok(())) => Some(stamp),
        Ok(Err(e)) => {
            warn!("Failed to record presence for {}: {}", identity.user_id, e);
            None
        }
        Err(e) => {
            warn!("spawn_blocking join error: {}", e);
            None
        }
    }
}

/// A reconnect that raced this disconnect has already rewritten
/// `last_activity`, in which case the offline write is skipped.
async fn record_offline(state: &AppState, identity: &Identity, since: String) {
    let state = state.clone();
    let user_id = identity.user_id.to_string();
    let at = presence_stamp();
    let result =
        tokio::task::spawn_blocking(move || state.db.set_offline_if_unchanged(&user_id, &since, &at)).await;
    match result {
        Ok(Ok(true)) => {}
        Ok(Ok(false)) => info!("{} reconnected, keeping them online", identity.user_id),
        Ok(Err(e)) => warn!("Failed to record presence for {}: {}", identity.user_id, e),
        Err(e) => warn!("spawn_blocking join error: {}", e),
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    ctrl_c.await.ok();
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
