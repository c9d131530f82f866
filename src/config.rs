use std::{env, fmt::Display, str::FromStr};

use tracing::warn;

pub const MAX_POST_LENGTH: usize = 5000;
pub const MAX_COMMENT_LENGTH: usize = 2000;
pub const MAX_BIO_TEXT_LENGTH: usize = 500;
pub const MAX_BIO_FIELD_LENGTH: usize = 100;
pub const MAX_NAME_LENGTH: usize = 50;
pub const MIN_PASSWORD_LENGTH: usize = 6;
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
pub const POSTS_PER_PAGE: usize = 20;
pub const MAX_TOKEN_EXPIRATION_HOURS: i64 = 24 * 365;

pub const SESSION_COOKIE: &str = "token";
pub const FEED_KEY: &str = "feed";

const DEV_SESSION_SECRET: &str = "socialite-dev-secret-change-me-in-production";

// === Key layout ===

pub fn account_key(id: &str) -> String {
    format!("account:{}", id)
}

pub fn account_email_key(email: &str) -> String {
    format!("account_email:{}", email)
}

pub fn account_posts_key(id: &str) -> String {
    format!("account:{}:posts", id)
}

pub fn bio_key(id: &str) -> String {
    format!("bio:{}", id)
}

pub fn bio_owner_key(account_id: &str) -> String {
    format!("bio_owner:{}", account_id)
}

pub fn post_key(id: &str) -> String {
    format!("post:{}", id)
}

pub fn post_comments_key(id: &str) -> String {
    format!("post:{}:comments", id)
}

pub fn post_likes_key(id: &str) -> String {
    format!("post:{}:likes", id)
}

pub fn comment_key(id: &str) -> String {
    format!("comment:{}", id)
}

pub fn comment_likes_key(id: &str) -> String {
    format!("comment:{}:likes", id)
}

pub fn media_key(file: &str) -> String {
    format!("media:{}", file)
}

pub const REVOKED_SESSION_PREFIX: &str = "session_revoked:";

pub fn revoked_session_key(jti: &str) -> String {
    format!("{}{}", REVOKED_SESSION_PREFIX, jti)
}

// === Runtime configuration ===

#[derive(Clone, Debug)]
pub struct Config {
    pub session_secret: String,
    pub token_expiration_hours: i64,
    pub media_base_url: String,
    pub bind_address: String,
    /// Browser origin allowed to call the native server with credentials.
    pub cors_origin: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        let session_secret = env::var("SOCIAL_SESSION_SECRET").unwrap_or_else(|_| {
            warn!("SOCIAL_SESSION_SECRET not set, using the development secret");
            DEV_SESSION_SECRET.to_string()
        });

        Self {
            session_secret,
            token_expiration_hours: token_hours(try_load("SOCIAL_TOKEN_EXPIRATION_HOURS", 24)),
            media_base_url: env::var("SOCIAL_MEDIA_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_default(),
            bind_address: env::var("SOCIAL_BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            cors_origin: env::var("SOCIAL_CORS_ORIGIN")
                .ok()
                .map(|origin| origin.trim().trim_end_matches('/').to_string())
                .filter(|origin| !origin.is_empty()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_secret: DEV_SESSION_SECRET.to_string(),
            token_expiration_hours: 24,
            media_base_url: String::new(),
            bind_address: "0.0.0.0:3000".to_string(),
            cors_origin: None,
        }
    }
}

/// Session lifetime in hours, kept between one hour and a year.
fn token_hours(hours: i64) -> i64 {
    let clamped = hours.clamp(1, MAX_TOKEN_EXPIRATION_HOURS);
    if clamped != hours {
        warn!("SOCIAL_TOKEN_EXPIRATION_HOURS={hours} out of range, using {clamped}");
    }
    clamped
}

fn try_load<T: FromStr>(key: &str, default: T) -> T
where
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|e| {
            warn!("Invalid {key} value {raw:?}: {e}, using default");
            default
        }),
        Err(_) => default,
    }
}
