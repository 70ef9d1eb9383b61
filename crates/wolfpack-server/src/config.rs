use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

/// Placeholder JWT secrets that must not reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl_days: i64,
}

impl Config {
    /// Read configuration from the environment (after `.env` has been loaded).
    pub fn from_env() -> Result<Self> {
        let jwt_secret = env::var("WOLFPACK_JWT_SECRET").unwrap_or_default();
        let allow_dev = env::var("WOLFPACK_ALLOW_DEV_SECRET").is_ok_and(|v| v == "1");
        check_secret(&jwt_secret, allow_dev)?;

        Ok(Self {
            host: try_load("WOLFPACK_HOST", "0.0.0.0")?,
            port: try_load("WOLFPACK_PORT", "3000")?,
            db_path: try_load::<String>("WOLFPACK_DB_PATH", "wolfpack.db")?.into(),
            jwt_secret,
            token_ttl_days: try_load("WOLFPACK_TOKEN_TTL_DAYS", "30")?,
        })
    }
}

fn check_secret(secret: &str, allow_dev: bool) -> Result<()> {
    if secret.is_empty() {
        bail!("WOLFPACK_JWT_SECRET is unset");
    }
    if PLACEHOLDER_SECRETS.contains(&secret) {
        if !allow_dev {
            bail!("WOLFPACK_JWT_SECRET is still a placeholder; set WOLFPACK_ALLOW_DEV_SECRET=1 to run anyway");
        }
        warn!("Running with a placeholder JWT secret");
    }
    Ok(())
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    raw.parse()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("Invalid {key} value '{raw}'"))
}
