use std::{env, fmt::Display, str::FromStr};

use tracing::{info, warn};

pub const MIN_NAME_LENGTH: usize = 1;
pub const MAX_NAME_LENGTH: usize = 50;
pub const MIN_PASSWORD_LENGTH: usize = 6;
pub const MAX_CAPTION_LENGTH: usize = 2200;
pub const MAX_COMMENT_LENGTH: usize = 1000;

pub const USERS_LIST_KEY: &str = "users_list";
pub const FEED_KEY: &str = "feed";
pub const DELETIONS_LIST_KEY: &str = "deletions_list";

pub const AVATAR_FOLDER: &str = "avatars";
pub const POST_FOLDER: &str = "posts";

pub const SESSION_COOKIE: &str = "token";

pub fn user_key(id: &str) -> String {
    format!("user:{}", id)
}

pub fn post_key(id: &str) -> String {
    format!("post:{}", id)
}

pub fn email_key(email: &str) -> String {
    format!("email:{}", email)
}

pub fn reset_key(token_hash: &str) -> String {
    format!("reset:{}", token_hash)
}

pub fn token_key(token: &str) -> String {
    format!("token:{}", token)
}

pub fn user_tokens_key(user_id: &str) -> String {
    format!("tokens:{}", user_id)
}

pub fn deletion_key(user_id: &str) -> String {
    format!("deletion:{}", user_id)
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    /// Snapshot file for the document store. `None` keeps everything in memory.
    pub data_path: Option<String>,
    /// Directory for uploaded media. Defaults to `{data_path}.media` when the
    /// store persists; with neither set, media lives in memory.
    pub media_path: Option<String>,
    pub token_expiration_hours: i64,
    pub reset_token_ttl_minutes: i64,
    pub purge_batch_size: usize,
    pub mail_webhook_url: Option<String>,
    pub public_url: Option<String>,
    pub secure_cookies: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
            data_path: None,
            media_path: None,
            token_expiration_hours: 90 * 24,
            reset_token_ttl_minutes: 10,
            purge_batch_size: 100,
            mail_webhook_url: None,
            public_url: None,
            secure_cookies: false,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let purge_batch_size: usize = try_load("BORD_PURGE_BATCH_SIZE", defaults.purge_batch_size)?;
        if purge_batch_size == 0 {
            anyhow::bail!("BORD_PURGE_BATCH_SIZE must be at least 1");
        }

        Ok(Self {
            bind: try_load("BORD_BIND", defaults.bind)?,
            port: try_load("BORD_PORT", defaults.port)?,
            data_path: optional("BORD_DATA_PATH"),
            media_path: optional("BORD_MEDIA_PATH"),
            token_expiration_hours: try_load(
                "BORD_TOKEN_EXPIRATION_HOURS",
                defaults.token_expiration_hours,
            )?,
            reset_token_ttl_minutes: try_load(
                "BORD_RESET_TOKEN_TTL_MINUTES",
                defaults.reset_token_ttl_minutes,
            )?,
            purge_batch_size,
            mail_webhook_url: optional("BORD_MAIL_WEBHOOK_URL"),
            public_url: optional("BORD_PUBLIC_URL").map(|u| u.trim_end_matches('/').to_string()),
            secure_cookies: try_load("BORD_SECURE_COOKIES", defaults.secure_cookies)?,
        })
    }

    pub fn media_dir(&self) -> Option<String> {
        self.media_path
            .clone()
            .or_else(|| self.data_path.as_ref().map(|p| format!("{}.media", p)))
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn try_load<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e| {
            warn!("Invalid {key} value: {e}");
            anyhow::anyhow!("invalid value for {key}: {e}")
        }),
        Err(_) => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}
