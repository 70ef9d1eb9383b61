use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::info;
use uuid::Uuid;

use wolfpack_db::Database;
use wolfpack_db::models::NewUser;
use wolfpack_realtime::dispatcher::Dispatcher;
use wolfpack_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

use crate::error::ApiError;
use crate::util::{blocking, parse_id};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    pub dispatcher: Dispatcher,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();
    let display_name = req.display_name.trim().to_string();

    // Validate input
    if !email.contains('@') || email.len() > 254 {
        return Err(ApiError::BadRequest("Invalid email address".into()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::BadRequest("Password must be at least 8 characters".into()));
    }
    if display_name.is_empty() || display_name.chars().count() > 50 {
        return Err(ApiError::BadRequest("Display name must be 1-50 characters".into()));
    }

    // Check if the email is taken
    let lookup = email.clone();
    if blocking(&state, move |db| db.get_user_by_email(&lookup)).await?.is_some() {
        return Err(ApiError::Conflict("Email already registered".into()));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();

    let user_id = Uuid::new_v4();
    let auth_id = Uuid::new_v4();

    let (uid, aid, mail, name) = (user_id.to_string(), auth_id.to_string(), email.clone(), display_name.clone());
    blocking(&state, move |db| {
        db.create_user(&NewUser {
            id: &uid,
            auth_id: &aid,
            email: &mail,
            password_hash: &password_hash,
            display_name: &name,
        })
    })
    .await?;

    let token = create_token(&state.jwt_secret, state.token_ttl, auth_id, &email)?;
    info!("Registered {} ({})", display_name, user_id);

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();
    let user = blocking(&state, move |db| db.get_user_by_email(&email))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| anyhow::anyhow!("stored password hash is invalid: {}", e))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    let auth_id: Uuid = user
        .auth_id
        .parse()
        .map_err(|e| anyhow::anyhow!("corrupt auth_id for {}: {}", user.id, e))?;

    let token = create_token(&state.jwt_secret, state.token_ttl, auth_id, &user.email)?;

    Ok(Json(LoginResponse {
        user_id: parse_id(&user.id, "user id"),
        display_name: user.display_name,
        token,
    }))
}

pub fn create_token(
    secret: &str,
    ttl: chrono::Duration,
    auth_id: Uuid,
    email: &str,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: auth_id,
        email: email.to_string(),
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
