use std::sync::Arc;

use tracing::{error, info, warn};
use twitch_oauth2::RefreshToken;

use crate::models::Streamer;
use crate::store::Store;
use crate::twitch::{TokenPair, TwitchClient};
use crate::Error;

/// Outcome of one refresh pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    pub refreshed: Vec<String>,
    pub failed: Vec<String>,
}

/// Exchanges streamers' refresh tokens for fresh credential pairs.
#[derive(Clone)]
pub struct TokenRefresher {
    client: TwitchClient,
    store: Arc<dyn Store>,
}

impl TokenRefresher {
    pub fn new(client: TwitchClient, store: Arc<dyn Store>) -> Self {
        Self { client, store }
    }

    /// Refreshes and persists one streamer's tokens.
    pub async fn refresh(&self, streamer: &Streamer) -> Result<TokenPair, Error> {
        let refresh_token = streamer
            .refresh_token()
            .ok_or_else(|| Error::MissingRefreshToken(streamer.twitch_id.clone()))?;

        let pair = self
            .client
            .refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .await?;

        let updated = self
            .store
            .update_streamer_tokens(
                &streamer.twitch_id,
                pair.access_token.secret(),
                pair.refresh_token.secret(),
            )
            .await?;
        if updated.is_none() {
            warn!(id = %streamer.twitch_id, "Refreshed tokens for a streamer that no longer exists");
        }

        Ok(pair)
    }

    /// Refreshes every streamer in turn, updating the slice in place so the
    /// following subscription calls use the new access tokens. A failure only
    /// skips that streamer.
    pub async fn refresh_all(&self, streamers: &mut [Streamer]) -> RefreshReport {
        let mut report = RefreshReport::default();

        for streamer in streamers.iter_mut() {
            match self.refresh(streamer).await {
                Ok(pair) => {
                    streamer.access_token = Some(pair.access_token.secret().to_string());
                    streamer.refresh_token = Some(pair.refresh_token.secret().to_string());
                    info!(
                        id = %streamer.twitch_id,
                        username = %streamer.username,
                        expires_in_secs = pair.expires_in.as_secs(),
                        "Refreshed streamer token"
                    );
                    report.refreshed.push(streamer.twitch_id.clone());
                }
                Err(err) => {
                    error!(
                        error = %err,
                        id = %streamer.twitch_id,
                        username = %streamer.username,
                        "Failed to refresh token"
                    );
                    report.failed.push(streamer.twitch_id.clone());
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::twitch::testing::{spawn, FakeTwitchState, Shared};

    fn streamer(id: &str, refresh: Option<&str>) -> Streamer {
        Streamer {
            twitch_id: id.into(),
            username: format!("streamer{id}"),
            access_token: Some(format!("old-access-{id}")),
            refresh_token: refresh.map(str::to_string),
            verified: false,
            profile_image_url: None,
        }
    }

    #[tokio::test]
    async fn test_failure_for_one_streamer_does_not_stop_the_batch() {
        let state = Shared::new(parking_lot::Mutex::new(FakeTwitchState {
            rejected_refresh_tokens: ["revoked-a".to_string()].into(),
            ..Default::default()
        }));
        let config = spawn(state.clone()).await;
        let store = Arc::new(MemoryStore::new());
        let mut streamers = vec![
            streamer("A", Some("revoked-a")),
            streamer("B", Some("valid-b")),
        ];
        for s in &streamers {
            store.put_streamer(s.clone());
        }

        let refresher = TokenRefresher::new(TwitchClient::new(&config).unwrap(), store.clone());
        let report = refresher.refresh_all(&mut streamers).await;

        assert_eq!(report.refreshed, vec!["B".to_string()]);
        assert_eq!(report.failed, vec!["A".to_string()]);

        // In-memory copy updated for B only.
        assert_eq!(streamers[0].access_token.as_deref(), Some("old-access-A"));
        assert_eq!(streamers[1].access_token.as_deref(), Some("access-from-valid-b"));

        let stored_b = store.get_streamer("B").await.unwrap().unwrap();
        assert_eq!(stored_b.access_token.as_deref(), Some("access-from-valid-b"));
        assert_eq!(stored_b.refresh_token.as_deref(), Some("next-valid-b"));
        let stored_a = store.get_streamer("A").await.unwrap().unwrap();
        assert_eq!(stored_a.refresh_token.as_deref(), Some("revoked-a"));
    }

    #[tokio::test]
    async fn test_empty_refresh_token_skips_network_call() {
        let state = Shared::default();
        let config = spawn(state.clone()).await;
        let store = Arc::new(MemoryStore::new());
        let refresher = TokenRefresher::new(TwitchClient::new(&config).unwrap(), store);

        let err = refresher.refresh(&streamer("C", Some(""))).await.unwrap_err();

        assert!(matches!(err, Error::MissingRefreshToken(id) if id == "C"));
        assert!(state.lock().refresh_calls.is_empty());
    }
}
