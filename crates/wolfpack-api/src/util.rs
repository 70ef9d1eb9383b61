use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{error, warn};
use uuid::Uuid;

use wolfpack_db::Database;
use wolfpack_db::models::UserRow;

use crate::auth::AppState;
use crate::error::ApiError;

/// Run blocking DB work off the async runtime.
pub(crate) async fn blocking<F, T>(state: &AppState, f: F) -> anyhow::Result<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))?
}

/// Resolve the caller's user row from their auth subject.
pub(crate) async fn caller(state: &AppState, auth_id: Uuid) -> Result<UserRow, ApiError> {
    let key = auth_id.to_string();
    blocking(state, move |db| db.resolve_user(&key))
        .await?
        .ok_or(ApiError::NotFound("User"))
}

/// Message attached to an empty listing when the underlying query failed.
/// Listing endpoints prefer a degraded 200 over a 500.
pub(crate) fn degraded(what: &str, err: &anyhow::Error) -> String {
    error!("Listing {} failed, returning empty result: {:#}", what, err);
    format!("Unable to load {} right now", what)
}

pub(crate) fn parse_id(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        Uuid::default()
    })
}

/// Stored enum columns fall back to `fallback` when the value is unknown.
pub(crate) fn parse_enum<T>(raw: &str, what: &str, fallback: T) -> T
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        fallback
    })
}

/// Timestamps are written as RFC 3339; older rows may use SQLite's
/// "YYYY-MM-DD HH:MM:SS" form without timezone.
pub(crate) fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc()))
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}

pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
