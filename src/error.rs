use thiserror::Error;
use twitch_oauth2::tokens::errors::RefreshTokenError;
use twitch_oauth2::RequestParseError;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Twitch answered with a non-success status.
    #[error("Twitch API error: status {status}, message: {message}")]
    Twitch { status: u16, message: String },

    #[error("Token refresh failed: {0}")]
    TokenRefresh(String),

    #[error("Streamer {0} has no refresh token")]
    MissingRefreshToken(String),

    #[error("Streamer {0} not found")]
    StreamerNotFound(String),

    #[error("Notification error: {0}")]
    Notify(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl From<RefreshTokenError<reqwest::Error>> for Error {
    fn from(err: RefreshTokenError<reqwest::Error>) -> Self {
        match err {
            RefreshTokenError::RequestError(err) => Error::Http(err),
            RefreshTokenError::RequestParseError(RequestParseError::TwitchError(response)) => {
                Error::Twitch {
                    status: response.status.as_u16(),
                    message: response.message,
                }
            }
            other => Error::TokenRefresh(other.to_string()),
        }
    }
}

impl Error {
    /// Builds a [`Error::Twitch`] from a failed response, preferring the
    /// `message` field of Twitch's JSON error body.
    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        #[derive(serde::Deserialize)]
        struct TwitchErrorBody {
            message: String,
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<TwitchErrorBody>(&body) {
            Ok(parsed) => parsed.message,
            Err(_) => body,
        };
        Error::Twitch { status, message }
    }
}
