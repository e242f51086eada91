use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub server_addr: String,
    pub access_token_ttl: usize,
    pub refresh_token_ttl: usize,

    // Rate limiting
    pub rate_login_per_min: u32,
    pub rate_refresh_per_min: u32,
    pub rate_protected_per_min: u32,

    pub api_prefix: String,

    /// Upper bound on any single transaction.
    pub tx_timeout: Duration,

    // Attendance photos
    pub photo_dir: String,
    pub photo_url_ttl: Duration,
    pub photo_max_bytes: usize,
    pub public_base_url: String,

    /// Seed admin `(email, password)` created at startup when absent.
    pub bootstrap_admin: Option<(String, String)>,

    pub log_dir: String,
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, String>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| format!("{key} is invalid ({raw}): {e}")),
        None => Ok(default),
    }
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String, String> {
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| format!("{key} must be set"))
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let server_addr = required(&lookup, "SERVER_ADDR")?;
        let bootstrap_admin = match (
            lookup("BOOTSTRAP_ADMIN_EMAIL"),
            lookup("BOOTSTRAP_ADMIN_PASSWORD"),
        ) {
            (Some(email), Some(password)) => Some((email, password)),
            (None, None) => None,
            _ => {
                return Err(
                    "BOOTSTRAP_ADMIN_EMAIL and BOOTSTRAP_ADMIN_PASSWORD must be set together"
                        .to_string(),
                );
            }
        };

        Ok(Self {
            database_url: required(&lookup, "DATABASE_URL")?,
            jwt_secret: required(&lookup, "JWT_SECRET")?,
            access_token_ttl: parsed(&lookup, "ACCESS_TOKEN_TTL", 900)?, // 15 min
            refresh_token_ttl: parsed(&lookup, "REFRESH_TOKEN_TTL", 604_800)?, // 7 days

            rate_login_per_min: parsed(&lookup, "RATE_LOGIN_PER_MIN", 60)?,
            rate_refresh_per_min: parsed(&lookup, "RATE_REFRESH_PER_MIN", 30)?,
            rate_protected_per_min: parsed(&lookup, "RATE_PROTECTED_PER_MIN", 1000)?,

            api_prefix: lookup("API_PREFIX").unwrap_or_else(|| "/api".to_string()),
            tx_timeout: Duration::from_millis(parsed(&lookup, "TX_TIMEOUT_MS", 5000)?),

            photo_dir: lookup("PHOTO_DIR").unwrap_or_else(|| "photos".to_string()),
            photo_url_ttl: Duration::from_secs(parsed(&lookup, "PHOTO_URL_TTL", 86_400)?),
            photo_max_bytes: parsed(&lookup, "PHOTO_MAX_BYTES", 5 * 1024 * 1024)?,
            public_base_url: lookup("PUBLIC_BASE_URL")
                .unwrap_or_else(|| format!("http://{server_addr}")),

            bootstrap_admin,
            log_dir: lookup("LOG_DIR").unwrap_or_else(|| "logs".to_string()),
            server_addr,
        })
    }
}
