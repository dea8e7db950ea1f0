use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::{Store, StoreError};
use crate::models::{
    EntryOutcome, NewRedemption, NewStreamer, NewViewer, Redemption, Reward, Streamer, Viewer,
};

#[derive(Default)]
struct Tables {
    // BTreeMap keeps listing order stable.
    streamers: BTreeMap<String, Streamer>,
    rewards: Vec<Reward>,
    viewers: HashMap<String, Viewer>,
    redemptions: HashMap<String, Redemption>,
}

impl Tables {
    fn insert_viewer(&mut self, viewer: &NewViewer) -> Result<Viewer, StoreError> {
        if self.viewers.contains_key(&viewer.twitch_id) {
            return Err(StoreError::Duplicate {
                entity: "viewer",
                key: viewer.twitch_id.clone(),
            });
        }
        let row = Viewer {
            twitch_id: viewer.twitch_id.clone(),
            username: viewer.username.clone(),
            registered_in: Some(viewer.registered_in.clone()),
            created_at: Utc::now(),
        };
        self.viewers.insert(row.twitch_id.clone(), row.clone());
        Ok(row)
    }

    fn insert_redemption(&mut self, redemption: &NewRedemption) -> Result<Redemption, StoreError> {
        if self.redemptions.contains_key(&redemption.message_id) {
            return Err(StoreError::Duplicate {
                entity: "redemption",
                key: redemption.message_id.clone(),
            });
        }
        let row = Redemption {
            message_id: redemption.message_id.clone(),
            viewer_id: redemption.viewer_id.clone(),
            streamer_id: redemption.streamer_id.clone(),
            created_at: Utc::now(),
        };
        self.redemptions.insert(row.message_id.clone(), row.clone());
        Ok(row)
    }
}

/// In-process [`Store`] with the same key constraints as the Postgres schema.
/// Each call holds a single lock, so `record_entry` is atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites a streamer row as-is.
    pub fn put_streamer(&self, streamer: Streamer) {
        self.tables
            .lock()
            .streamers
            .insert(streamer.twitch_id.clone(), streamer);
    }

    pub fn viewers(&self) -> Vec<Viewer> {
        self.tables.lock().viewers.values().cloned().collect()
    }

    pub fn redemptions(&self) -> Vec<Redemption> {
        self.tables.lock().redemptions.values().cloned().collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn streamers_with_tokens(&self) -> Result<Vec<Streamer>, StoreError> {
        Ok(self
            .tables
            .lock()
            .streamers
            .values()
            .filter(|s| s.access_token().is_some() && s.refresh_token().is_some())
            .cloned()
            .collect())
    }

    async fn get_streamer(&self, twitch_id: &str) -> Result<Option<Streamer>, StoreError> {
        Ok(self.tables.lock().streamers.get(twitch_id).cloned())
    }

    async fn create_streamer(&self, streamer: &NewStreamer) -> Result<Streamer, StoreError> {
        let mut tables = self.tables.lock();
        if tables.streamers.contains_key(&streamer.twitch_id) {
            return Err(StoreError::Duplicate {
                entity: "streamer",
                key: streamer.twitch_id.clone(),
            });
        }
        let row = Streamer {
            twitch_id: streamer.twitch_id.clone(),
            username: streamer.username.clone(),
            access_token: Some(streamer.access_token.clone()),
            refresh_token: Some(streamer.refresh_token.clone()),
            verified: false,
            profile_image_url: streamer.profile_image_url.clone(),
        };
        tables.streamers.insert(row.twitch_id.clone(), row.clone());
        Ok(row)
    }

    async fn update_streamer_tokens(
        &self,
        twitch_id: &str,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<Option<Streamer>, StoreError> {
        let mut tables = self.tables.lock();
        Ok(tables.streamers.get_mut(twitch_id).map(|streamer| {
            streamer.access_token = Some(access_token.to_string());
            streamer.refresh_token = Some(refresh_token.to_string());
            streamer.clone()
        }))
    }

    async fn rewards_for_streamer(&self, streamer_id: &str) -> Result<Vec<Reward>, StoreError> {
        Ok(self
            .tables
            .lock()
            .rewards
            .iter()
            .rev()
            .filter(|r| r.streamer_id == streamer_id)
            .cloned()
            .collect())
    }

    async fn replace_reward(&self, streamer_id: &str, reward_id: &str) -> Result<Reward, StoreError> {
        let mut tables = self.tables.lock();
        tables.rewards.retain(|r| r.streamer_id != streamer_id);
        if tables.rewards.iter().any(|r| r.reward_id == reward_id) {
            return Err(StoreError::Duplicate {
                entity: "reward",
                key: reward_id.to_string(),
            });
        }
        let reward = Reward {
            reward_id: reward_id.to_string(),
            streamer_id: streamer_id.to_string(),
            created_at: Utc::now(),
        };
        tables.rewards.push(reward.clone());
        Ok(reward)
    }

    async fn get_viewer(&self, twitch_id: &str) -> Result<Option<Viewer>, StoreError> {
        Ok(self.tables.lock().viewers.get(twitch_id).cloned())
    }

    async fn create_viewer(&self, viewer: &NewViewer) -> Result<Viewer, StoreError> {
        self.tables.lock().insert_viewer(viewer)
    }

    async fn create_redemption(&self, redemption: &NewRedemption) -> Result<Redemption, StoreError> {
        self.tables.lock().insert_redemption(redemption)
    }

    async fn record_entry(
        &self,
        viewer: &NewViewer,
        redemption: &NewRedemption,
    ) -> Result<EntryOutcome, StoreError> {
        let mut tables = self.tables.lock();
        if tables.redemptions.contains_key(&redemption.message_id) {
            return Ok(EntryOutcome::Duplicate);
        }

        let viewer_created = !tables.viewers.contains_key(&viewer.twitch_id);
        if viewer_created {
            tables.insert_viewer(viewer)?;
        }
        let redemption = tables.insert_redemption(redemption)?;

        Ok(EntryOutcome::Recorded {
            redemption,
            viewer_created,
        })
    }

    async fn redemption_count(&self, streamer_id: Option<&str>) -> Result<i64, StoreError> {
        let tables = self.tables.lock();
        let count = tables
            .redemptions
            .values()
            .filter(|r| streamer_id.map_or(true, |id| r.streamer_id == id))
            .count();
        Ok(count as i64)
    }
}
