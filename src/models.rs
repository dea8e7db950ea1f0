use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Streamer {
    pub twitch_id: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub verified: bool,
    pub profile_image_url: Option<String>,
}

impl Streamer {
    /// The access token, if one is stored and non-empty.
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct NewStreamer {
    pub twitch_id: String,
    pub username: String,
    pub access_token: String,
    pub refresh_token: String,
    pub profile_image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Reward {
    pub reward_id: String,
    pub streamer_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Viewer {
    pub twitch_id: String,
    pub username: String,
    pub registered_in: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewViewer {
    pub twitch_id: String,
    pub username: String,
    pub registered_in: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Redemption {
    pub message_id: String,
    pub viewer_id: String,
    pub streamer_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRedemption {
    pub message_id: String,
    pub viewer_id: String,
    pub streamer_id: String,
}

/// Result of writing one ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    Recorded {
        redemption: Redemption,
        viewer_created: bool,
    },
    /// The message id was already in the ledger.
    Duplicate,
}
