//! Storage collaborator.
//!
//! Every lookup distinguishes "not found" (`Ok(None)` / empty `Vec`) from a
//! failure, and key violations surface as [`StoreError::Duplicate`] so that
//! callers can treat redelivered events as benign.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{
    EntryOutcome, NewRedemption, NewStreamer, NewViewer, Redemption, Reward, Streamer, Viewer,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate {entity} {key}")]
    Duplicate { entity: &'static str, key: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::Duplicate { .. })
    }

    /// Maps a unique violation to [`StoreError::Duplicate`], anything else to
    /// [`StoreError::Database`].
    pub(crate) fn classify(err: sqlx::Error, entity: &'static str, key: &str) -> Self {
        let unique = err
            .as_database_error()
            .map(|db| db.is_unique_violation())
            .unwrap_or(false);
        if unique {
            StoreError::Duplicate {
                entity,
                key: key.to_string(),
            }
        } else {
            StoreError::Database(err)
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Streamers holding both an access and a refresh token.
    async fn streamers_with_tokens(&self) -> Result<Vec<Streamer>, StoreError>;

    async fn get_streamer(&self, twitch_id: &str) -> Result<Option<Streamer>, StoreError>;

    async fn create_streamer(&self, streamer: &NewStreamer) -> Result<Streamer, StoreError>;

    /// Returns `None` when no streamer has this id.
    async fn update_streamer_tokens(
        &self,
        twitch_id: &str,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<Option<Streamer>, StoreError>;

    async fn rewards_for_streamer(&self, streamer_id: &str) -> Result<Vec<Reward>, StoreError>;

    /// Deletes every reward of the streamer and inserts the new one atomically.
    async fn replace_reward(&self, streamer_id: &str, reward_id: &str) -> Result<Reward, StoreError>;

    async fn get_viewer(&self, twitch_id: &str) -> Result<Option<Viewer>, StoreError>;

    async fn create_viewer(&self, viewer: &NewViewer) -> Result<Viewer, StoreError>;

    async fn create_redemption(&self, redemption: &NewRedemption) -> Result<Redemption, StoreError>;

    /// Creates the viewer if missing and appends the redemption, in one
    /// transaction. A redemption whose message id already exists yields
    /// [`EntryOutcome::Duplicate`].
    async fn record_entry(
        &self,
        viewer: &NewViewer,
        redemption: &NewRedemption,
    ) -> Result<EntryOutcome, StoreError>;

    async fn redemption_count(&self, streamer_id: Option<&str>) -> Result<i64, StoreError>;
}
