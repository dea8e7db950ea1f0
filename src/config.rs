use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

pub const DEFAULT_TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";
pub const DEFAULT_HELIX_URL: &str = "https://api.twitch.tv/helix";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("failed to load {path}: {source}")]
    Dotenv {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
}

/// Channel subscribed to when no streamer has signed up yet.
#[derive(Debug, Clone)]
pub struct FallbackChannel {
    pub channel_id: String,
    pub access_token: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// `host:port` to listen on. Host names are resolved at bind time.
    pub bind_address: String,
    pub client_id: String,
    pub client_secret: String,
    pub webhook_secret: String,
    pub webhook_callback: Url,
    pub database_url: String,
    pub fallback_channel: Option<FallbackChannel>,
    pub discord_webhook_url: Option<Url>,
    pub token_url: Url,
    pub helix_url: Url,
    pub http_timeout: Duration,
    /// `None` keeps subscriptions boot-only.
    pub reconcile_every: Option<Duration>,
}

/// Returns the path of the per-user `.env` file, if a config dir exists.
fn config_path() -> Option<PathBuf> {
    let mut path = dirs::config_dir()?;
    path.push("twitch-points");
    path.push(".env");
    Some(path)
}

/// Loads `.env` from the working directory and from the user config dir.
/// Variables already present in the environment win.
pub fn load_dotenv() -> Result<(), ConfigError> {
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            return Err(ConfigError::Dotenv {
                path: PathBuf::from(".env"),
                source: err,
            });
        }
    }

    if let Some(path) = config_path() {
        if path.exists() {
            dotenvy::from_path(&path).map_err(|source| ConfigError::Dotenv {
                path: path.clone(),
                source,
            })?;
        }
    }
    Ok(())
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let bind_address = listen_address(get("HOST").as_deref().unwrap_or("0.0.0.0:8080"));

        let webhook_secret = require("TWITCH_WEBHOOK_SECRET")?;
        if !(10..=100).contains(&webhook_secret.len()) {
            return Err(ConfigError::Invalid {
                key: "TWITCH_WEBHOOK_SECRET",
                reason: "must be between 10 and 100 characters".into(),
            });
        }

        let webhook_callback = parse_url("TWITCH_WEBHOOK_URL", &require("TWITCH_WEBHOOK_URL")?)?;

        let database_url = match get("DATABASE_URL") {
            Some(url) => url,
            None => database_url_from_parts(&get)?,
        };

        let fallback_channel = match (get("MY_CHANNEL_ID"), get("MY_ACCESS_TOKEN")) {
            (Some(channel_id), Some(access_token)) => Some(FallbackChannel {
                channel_id,
                access_token,
            }),
            _ => None,
        };

        let discord_webhook_url = get("DISCORD_WEBHOOK_URL")
            .map(|raw| parse_url("DISCORD_WEBHOOK_URL", &raw))
            .transpose()?;

        let token_url = parse_url(
            "TWITCH_TOKEN_URL",
            &get("TWITCH_TOKEN_URL").unwrap_or_else(|| DEFAULT_TOKEN_URL.into()),
        )?;
        let helix_url = parse_url(
            "TWITCH_HELIX_URL",
            &get("TWITCH_HELIX_URL").unwrap_or_else(|| DEFAULT_HELIX_URL.into()),
        )?;

        let timeout_secs: u64 = parse_or(&get, "HTTP_TIMEOUT_SECS", "10")?;
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "HTTP_TIMEOUT_SECS",
                reason: "must be greater than zero".into(),
            });
        }

        let reconcile_secs: u64 = parse_or(&get, "SUBSCRIPTION_RECONCILE_SECS", "3600")?;

        Ok(Config {
            bind_address,
            client_id: require("CLIENT_ID")?,
            client_secret: require("CLIENT_SECRET")?,
            webhook_secret,
            webhook_callback,
            database_url,
            fallback_channel,
            discord_webhook_url,
            token_url,
            helix_url,
            http_timeout: Duration::from_secs(timeout_secs),
            reconcile_every: (reconcile_secs > 0).then(|| Duration::from_secs(reconcile_secs)),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    let raw = get(key).unwrap_or_else(|| default.to_string());
    raw.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
        key,
        reason: err.to_string(),
    })
}

/// A bare `:port` listens on every interface.
fn listen_address(raw: &str) -> String {
    let raw = raw.trim();
    match raw.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => raw.to_string(),
    }
}

fn database_url_from_parts<G>(get: &G) -> Result<String, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let user = get("DB_USER").ok_or(ConfigError::Missing("DB_USER"))?;
    let name = get("DB_NAME").ok_or(ConfigError::Missing("DB_NAME"))?;
    let host = get("DB_HOST").unwrap_or_else(|| "localhost".into());
    let port: u16 = parse_or(get, "DB_PORT", "5432")?;
    let sslmode = get("DB_SSLMODE").unwrap_or_else(|| "disable".into());

    let invalid = |key: &'static str| ConfigError::Invalid {
        key,
        reason: "cannot be used in a connection URL".into(),
    };

    let mut url = parse_url("DB_HOST", &format!("postgres://{}", host.trim()))?;
    url.set_port(Some(port)).map_err(|_| invalid("DB_PORT"))?;
    url.set_username(&user).map_err(|_| invalid("DB_USER"))?;
    if let Some(password) = get("DB_PASSWORD") {
        url.set_password(Some(&password))
            .map_err(|_| invalid("DB_PASSWORD"))?;
    }
    url.set_path(&format!("/{name}"));
    url.query_pairs_mut().append_pair("sslmode", &sslmode);
    Ok(url.into())
}

fn parse_url(key: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|err| ConfigError::Invalid {
        key,
        reason: err.to_string(),
    })
}
