use std::sync::Arc;

use tracing::{error, info, warn};

use crate::events::RedemptionAdd;
use crate::models::{EntryOutcome, NewRedemption, NewViewer};
use crate::notify::Notifier;
use crate::store::Store;
use crate::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedemptionOutcome {
    /// The broadcaster has no giveaway reward configured.
    NoActiveReward,
    /// Redemption of some other reward on the same channel.
    OtherReward,
    Recorded { viewer_created: bool },
    /// Redelivery of an event already in the ledger.
    Duplicate,
}

/// Turns a channel points redemption into at most one ledger entry.
#[derive(Clone)]
pub struct RedemptionProcessor {
    store: Arc<dyn Store>,
    notifier: Notifier,
}

impl RedemptionProcessor {
    pub fn new(store: Arc<dyn Store>, notifier: Notifier) -> Self {
        Self { store, notifier }
    }

    pub async fn process(&self, event: &RedemptionAdd) -> Result<RedemptionOutcome, Error> {
        let rewards = match self.store.rewards_for_streamer(&event.broadcaster_user_id).await {
            Ok(rewards) => rewards,
            Err(err) => {
                error!(
                    error = %err,
                    streamer_id = %event.broadcaster_user_id,
                    streamer_username = %event.broadcaster_user_login,
                    reward = %event.reward.title,
                    viewer_id = %event.user_id,
                    viewer_username = %event.user_login,
                    "Error getting a reward for a streamer from db"
                );
                self.notifier.spawn(format!(
                    "Error getting a reward for a streamer from db {}",
                    event.broadcaster_user_login
                ));
                return Err(err.into());
            }
        };

        let Some(active) = rewards.first() else {
            warn!(streamer_id = %event.broadcaster_user_id, "No rewards found for streamer");
            return Ok(RedemptionOutcome::NoActiveReward);
        };

        if event.reward.id != active.reward_id {
            return Ok(RedemptionOutcome::OtherReward);
        }

        let viewer = NewViewer {
            twitch_id: event.user_id.clone(),
            username: event.user_login.clone(),
            registered_in: event.broadcaster_user_id.clone(),
        };
        let redemption = NewRedemption {
            message_id: event.id.clone(),
            viewer_id: event.user_id.clone(),
            streamer_id: event.broadcaster_user_id.clone(),
        };

        match self.store.record_entry(&viewer, &redemption).await {
            Ok(EntryOutcome::Recorded { viewer_created, .. }) => {
                if viewer_created {
                    info!(
                        viewer_id = %event.user_id,
                        viewer_username = %event.user_login,
                        streamer_id = %event.broadcaster_user_id,
                        "Registered a new viewer"
                    );
                }
                info!(
                    user_id = %event.user_id,
                    username = %event.user_login,
                    channel = %event.broadcaster_user_login,
                    message_id = %event.id,
                    "User redeemed a reward"
                );
                self.notifier.spawn(format!(
                    "{} redeemed an entry in {}",
                    event.user_login, event.broadcaster_user_login
                ));
                Ok(RedemptionOutcome::Recorded { viewer_created })
            }
            Ok(EntryOutcome::Duplicate) => {
                info!(message_id = %event.id, streamer_id = %event.broadcaster_user_id, "Ignoring redelivered redemption");
                Ok(RedemptionOutcome::Duplicate)
            }
            Err(err) => {
                error!(
                    error = %err,
                    streamer_id = %event.broadcaster_user_id,
                    viewer_id = %event.user_id,
                    message_id = %event.id,
                    "Error adding a redemption to db"
                );
                self.notifier.spawn(format!(
                    "Error adding a redemption to db {}",
                    event.broadcaster_user_login
                ));
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Streamer;
    use crate::store::MemoryStore;
    use futures_util::future::join_all;
    use serde_json::json;

    fn streamer(id: &str) -> Streamer {
        Streamer {
            twitch_id: id.into(),
            username: format!("streamer{id}"),
            access_token: Some("access".into()),
            refresh_token: Some("refresh".into()),
            verified: false,
            profile_image_url: None,
        }
    }

    async fn setup() -> (Arc<MemoryStore>, RedemptionProcessor) {
        let store = Arc::new(MemoryStore::new());
        store.put_streamer(streamer("123"));
        store.replace_reward("123", "R1").await.unwrap();
        let processor = RedemptionProcessor::new(store.clone(), Notifier::disabled());
        (store, processor)
    }

    fn event(broadcaster: &str, viewer: &str, message_id: &str, reward: &str) -> RedemptionAdd {
        serde_json::from_value(json!({
            "broadcaster_user_id": broadcaster,
            "user_id": viewer,
            "user_login": format!("viewer{viewer}"),
            "id": message_id,
            "reward": {"id": reward}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_records_entry_and_ignores_redelivery() {
        let (store, processor) = setup().await;
        let delivery = event("123", "456", "MSG1", "R1");

        let first = processor.process(&delivery).await.unwrap();
        assert_eq!(first, RedemptionOutcome::Recorded { viewer_created: true });

        let viewer = store.get_viewer("456").await.unwrap().unwrap();
        assert_eq!(viewer.registered_in.as_deref(), Some("123"));

        let second = processor.process(&delivery).await.unwrap();
        assert_eq!(second, RedemptionOutcome::Duplicate);

        let redemptions = store.redemptions();
        assert_eq!(redemptions.len(), 1);
        assert_eq!(redemptions[0].message_id, "MSG1");
        assert_eq!(redemptions[0].viewer_id, "456");
        assert_eq!(redemptions[0].streamer_id, "123");
    }

    #[tokio::test]
    async fn test_wrong_reward_produces_no_rows() {
        let (store, processor) = setup().await;

        let outcome = processor.process(&event("123", "456", "MSG1", "R2")).await.unwrap();

        assert_eq!(outcome, RedemptionOutcome::OtherReward);
        assert!(store.redemptions().is_empty());
        assert!(store.viewers().is_empty());
    }

    #[tokio::test]
    async fn test_streamer_without_reward_produces_no_rows() {
        let (store, processor) = setup().await;
        store.put_streamer(streamer("777"));

        let outcome = processor.process(&event("777", "456", "MSG1", "R1")).await.unwrap();

        assert_eq!(outcome, RedemptionOutcome::NoActiveReward);
        assert!(store.redemptions().is_empty());
    }

    #[tokio::test]
    async fn test_existing_viewer_keeps_registration_origin() {
        let (store, processor) = setup().await;
        store.put_streamer(streamer("789"));
        store.replace_reward("789", "R7").await.unwrap();

        processor.process(&event("123", "456", "MSG1", "R1")).await.unwrap();
        let outcome = processor.process(&event("789", "456", "MSG2", "R7")).await.unwrap();

        assert_eq!(outcome, RedemptionOutcome::Recorded { viewer_created: false });
        let viewers = store.viewers();
        assert_eq!(viewers.len(), 1);
        assert_eq!(viewers[0].registered_in.as_deref(), Some("123"));
        assert_eq!(store.redemptions().len(), 2);
    }

    #[tokio::test]
    async fn test_only_the_latest_reward_counts() {
        let (store, processor) = setup().await;
        store.replace_reward("123", "R2").await.unwrap();

        let old = processor.process(&event("123", "456", "MSG1", "R1")).await.unwrap();
        let new = processor.process(&event("123", "456", "MSG2", "R2")).await.unwrap();

        assert_eq!(old, RedemptionOutcome::OtherReward);
        assert_eq!(new, RedemptionOutcome::Recorded { viewer_created: true });
        assert_eq!(store.redemption_count(Some("123")).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_duplicate_deliveries_write_once() {
        let (store, processor) = setup().await;
        let delivery = event("123", "456", "MSG1", "R1");

        let handles = (0..8).map(|_| {
            let processor = processor.clone();
            let delivery = delivery.clone();
            tokio::spawn(async move { processor.process(&delivery).await.unwrap() })
        });
        let outcomes: Vec<_> = join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        let recorded = outcomes
            .iter()
            .filter(|o| matches!(o, RedemptionOutcome::Recorded { .. }))
            .count();
        assert_eq!(recorded, 1);
        assert_eq!(outcomes.len() - recorded, 7);
        assert_eq!(store.redemptions().len(), 1);
        assert_eq!(store.viewers().len(), 1);
    }
}
