use std::collections::HashSet;

use tracing::{error, info, warn};
use twitch_oauth2::AccessToken;

use crate::config::FallbackChannel;
use crate::dispatch::EventKind;
use crate::models::Streamer;
use crate::twitch::{SubscribeOutcome, TwitchClient};

/// Per-pass summary of subscription calls.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RegisterReport {
    pub created: usize,
    pub existing: usize,
    pub failed: usize,
    /// Streamers skipped for lack of an access token.
    pub skipped: usize,
}

impl RegisterReport {
    fn merge(&mut self, other: RegisterReport) {
        self.created += other.created;
        self.existing += other.existing;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

/// Keeps EventSub delivering the configured event types for each streamer.
#[derive(Clone)]
pub struct SubscriptionManager {
    client: TwitchClient,
    events: Vec<EventKind>,
    fallback: Option<FallbackChannel>,
}

impl SubscriptionManager {
    pub fn new(client: TwitchClient, events: Vec<EventKind>, fallback: Option<FallbackChannel>) -> Self {
        Self {
            client,
            events,
            fallback,
        }
    }

    /// Subscribes one streamer to every configured event. Failures are
    /// logged per event and do not stop the loop.
    pub async fn register(&self, streamer: &Streamer) -> RegisterReport {
        let Some(token) = streamer.access_token() else {
            warn!(streamer_id = %streamer.twitch_id, "Streamer has no access token, not subscribing");
            return RegisterReport {
                skipped: 1,
                ..Default::default()
            };
        };
        self.register_events(
            &streamer.twitch_id,
            &streamer.username,
            &AccessToken::new(token.to_string()),
            &self.events,
        )
        .await
    }

    /// Subscribes every streamer, or the fallback channel when there are none.
    pub async fn register_all(&self, streamers: &[Streamer]) -> RegisterReport {
        let mut report = RegisterReport::default();

        if streamers.is_empty() {
            if let Some(fallback) = &self.fallback {
                info!(channel_id = %fallback.channel_id, "No streamers enrolled, subscribing own channel");
                let token = AccessToken::new(fallback.access_token.clone());
                report.merge(
                    self.register_events(&fallback.channel_id, "own channel", &token, &self.events)
                        .await,
                );
            }
            return report;
        }

        for streamer in streamers {
            report.merge(self.register(streamer).await);
        }
        report
    }

    /// Registers only the (streamer, event) pairs Twitch does not currently
    /// hold a live subscription for. With no streamers, the fallback channel
    /// is reconciled instead.
    pub async fn reconcile(&self, streamers: &[Streamer]) -> RegisterReport {
        let mut report = RegisterReport::default();

        if streamers.is_empty() {
            if let Some(fallback) = &self.fallback {
                let token = AccessToken::new(fallback.access_token.clone());
                report.merge(
                    self.reconcile_channel(&fallback.channel_id, "own channel", &token)
                        .await,
                );
            }
            return report;
        }

        for streamer in streamers {
            let Some(token) = streamer.access_token() else {
                report.skipped += 1;
                continue;
            };
            let token = AccessToken::new(token.to_string());
            report.merge(
                self.reconcile_channel(&streamer.twitch_id, &streamer.username, &token)
                    .await,
            );
        }

        report
    }

    async fn reconcile_channel(
        &self,
        broadcaster_id: &str,
        username: &str,
        token: &AccessToken,
    ) -> RegisterReport {
        let live: HashSet<String> = match self.client.list_subscriptions(broadcaster_id, token).await {
            Ok(subscriptions) => subscriptions
                .into_iter()
                .filter(|s| s.is_live())
                .filter(|s| s.condition.broadcaster_user_id.as_deref() == Some(broadcaster_id))
                .map(|s| s.event_type)
                .collect(),
            Err(err) => {
                error!(error = %err, streamer_id = %broadcaster_id, "Error listing subscriptions");
                return RegisterReport {
                    failed: 1,
                    ..Default::default()
                };
            }
        };

        let missing: Vec<EventKind> = self
            .events
            .iter()
            .copied()
            .filter(|kind| !live.contains(kind.as_str()))
            .collect();
        if missing.is_empty() {
            return RegisterReport::default();
        }

        info!(
            streamer_id = %broadcaster_id,
            missing = missing.len(),
            "Re-establishing missing subscriptions"
        );
        self.register_events(broadcaster_id, username, token, &missing)
            .await
    }

    async fn register_events(
        &self,
        broadcaster_id: &str,
        username: &str,
        token: &AccessToken,
        events: &[EventKind],
    ) -> RegisterReport {
        let mut report = RegisterReport::default();

        for &kind in events {
            info!(streamer_id = %broadcaster_id, streamer_username = %username, event = %kind, "Subscribing to an event");

            match self.client.create_subscription(kind, broadcaster_id, token).await {
                Ok(SubscribeOutcome::Created) => {
                    info!(event = %kind, streamer_id = %broadcaster_id, "Successfully subscribed to event");
                    report.created += 1;
                }
                Ok(SubscribeOutcome::AlreadyExists) => {
                    info!(event = %kind, streamer_id = %broadcaster_id, "Subscription already exists");
                    report.existing += 1;
                }
                Err(err) => {
                    error!(event = %kind, error = %err, streamer_id = %broadcaster_id, "Error subscribing to an event");
                    report.failed += 1;
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::twitch::testing::{spawn, FakeTwitchState, Shared};

    fn streamer(id: &str, token: Option<&str>) -> Streamer {
        Streamer {
            twitch_id: id.into(),
            username: format!("streamer{id}"),
            access_token: token.map(str::to_string),
            refresh_token: Some("refresh".into()),
            verified: false,
            profile_image_url: None,
        }
    }

    async fn manager(state: Shared, fallback: Option<FallbackChannel>) -> SubscriptionManager {
        let config = spawn(state).await;
        SubscriptionManager::new(
            TwitchClient::new(&config).unwrap(),
            EventKind::ALL.to_vec(),
            fallback,
        )
    }

    #[tokio::test]
    async fn test_registers_every_event_with_streamer_token() {
        let state = Shared::default();
        let manager = manager(state.clone(), None).await;

        let report = manager.register(&streamer("123", Some("tok-123"))).await;

        assert_eq!(report.created, EventKind::ALL.len());
        let calls = &state.lock().subscribe_calls;
        assert_eq!(calls.len(), EventKind::ALL.len());
        assert!(calls
            .iter()
            .all(|(broadcaster, _, bearer)| broadcaster == "123" && bearer == "tok-123"));
    }

    #[tokio::test]
    async fn test_failure_for_one_streamer_continues_with_the_next() {
        let state = Shared::new(parking_lot::Mutex::new(FakeTwitchState {
            failing_broadcasters: ["A".to_string()].into(),
            ..Default::default()
        }));
        let manager = manager(state.clone(), None).await;

        let report = manager
            .register_all(&[
                streamer("A", Some("tok-a")),
                streamer("B", Some("tok-b")),
                streamer("C", None),
            ])
            .await;

        assert_eq!(report.failed, EventKind::ALL.len());
        assert_eq!(report.created, EventKind::ALL.len());
        assert_eq!(report.skipped, 1);
        let state = state.lock();
        assert_eq!(
            state.existing.iter().filter(|(b, _)| b == "B").count(),
            EventKind::ALL.len()
        );
    }

    #[tokio::test]
    async fn test_registering_twice_is_harmless() {
        let state = Shared::default();
        let manager = manager(state.clone(), None).await;
        let s = streamer("123", Some("tok"));

        manager.register(&s).await;
        let again = manager.register(&s).await;

        assert_eq!(again.created, 0);
        assert_eq!(again.existing, EventKind::ALL.len());
        assert_eq!(again.failed, 0);
    }

    #[tokio::test]
    async fn test_fallback_channel_used_when_no_streamers() {
        let state = Shared::default();
        let manager = manager(
            state.clone(),
            Some(FallbackChannel {
                channel_id: "77738069".into(),
                access_token: "own-token".into(),
            }),
        )
        .await;

        let report = manager.register_all(&[]).await;

        assert_eq!(report.created, EventKind::ALL.len());
        assert!(state
            .lock()
            .subscribe_calls
            .iter()
            .all(|(b, _, bearer)| b == "77738069" && bearer == "own-token"));
    }

    #[tokio::test]
    async fn test_reconcile_registers_only_missing_pairs() {
        let state = Shared::new(parking_lot::Mutex::new(FakeTwitchState {
            existing: [
                ("123".to_string(), EventKind::StreamOnline.as_str().to_string()),
                ("123".to_string(), EventKind::RedemptionAdd.as_str().to_string()),
            ]
            .into(),
            ..Default::default()
        }));
        let manager = manager(state.clone(), None).await;

        let report = manager.reconcile(&[streamer("123", Some("tok"))]).await;

        assert_eq!(report.created, EventKind::ALL.len() - 2);
        assert_eq!(report.existing, 0);
        let state = state.lock();
        assert!(!state
            .subscribe_calls
            .iter()
            .any(|(_, kind, _)| kind == EventKind::RedemptionAdd.as_str()));
        assert_eq!(state.existing.len(), EventKind::ALL.len());
    }

    #[tokio::test]
    async fn test_reconcile_covers_fallback_channel_when_no_streamers() {
        let state = Shared::new(parking_lot::Mutex::new(FakeTwitchState {
            existing: [(
                "77738069".to_string(),
                EventKind::RedemptionAdd.as_str().to_string(),
            )]
            .into(),
            ..Default::default()
        }));
        let manager = manager(
            state.clone(),
            Some(FallbackChannel {
                channel_id: "77738069".into(),
                access_token: "own-token".into(),
            }),
        )
        .await;

        let report = manager.reconcile(&[]).await;

        assert_eq!(report.created, EventKind::ALL.len() - 1);
        let state = state.lock();
        assert!(state
            .subscribe_calls
            .iter()
            .all(|(b, kind, bearer)| b == "77738069"
                && bearer == "own-token"
                && kind != EventKind::RedemptionAdd.as_str()));
        assert_eq!(state.existing.len(), EventKind::ALL.len());
    }
}
