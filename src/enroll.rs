//! Streamer sign-up hook, called by the login flow after a successful OAuth
//! code exchange.

use std::sync::Arc;

use tracing::{error, info};

use crate::models::{NewStreamer, Streamer};
use crate::store::Store;
use crate::subscriptions::{RegisterReport, SubscriptionManager};
use crate::Error;

/// What the login flow learned about the user.
#[derive(Debug, Clone)]
pub struct StreamerLogin {
    pub twitch_id: String,
    pub username: String,
    pub access_token: String,
    pub refresh_token: String,
    pub profile_image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollOutcome {
    Created {
        streamer: Streamer,
        subscriptions: RegisterReport,
    },
    Updated(Streamer),
}

#[derive(Clone)]
pub struct Enrollment {
    store: Arc<dyn Store>,
    subscriptions: SubscriptionManager,
}

impl Enrollment {
    pub fn new(store: Arc<dyn Store>, subscriptions: SubscriptionManager) -> Self {
        Self {
            store,
            subscriptions,
        }
    }

    /// Creates the streamer and subscribes it on first login; otherwise
    /// stores the new tokens.
    pub async fn enroll(&self, login: StreamerLogin) -> Result<EnrollOutcome, Error> {
        if self.store.get_streamer(&login.twitch_id).await?.is_some() {
            return self.update_tokens(&login).await;
        }

        let new = NewStreamer {
            twitch_id: login.twitch_id.clone(),
            username: login.username.clone(),
            access_token: login.access_token.clone(),
            refresh_token: login.refresh_token.clone(),
            profile_image_url: login.profile_image_url.clone(),
        };

        let streamer = match self.store.create_streamer(&new).await {
            Ok(streamer) => streamer,
            // A concurrent login created the row first.
            Err(err) if err.is_duplicate() => return self.update_tokens(&login).await,
            Err(err) => {
                error!(error = %err, id = %login.twitch_id, username = %login.username, "Error creating a new user");
                return Err(err.into());
            }
        };

        let subscriptions = self.subscriptions.register(&streamer).await;
        info!(id = %streamer.twitch_id, username = %streamer.username, "Created a new user");

        Ok(EnrollOutcome::Created {
            streamer,
            subscriptions,
        })
    }

    async fn update_tokens(&self, login: &StreamerLogin) -> Result<EnrollOutcome, Error> {
        let updated = self
            .store
            .update_streamer_tokens(&login.twitch_id, &login.access_token, &login.refresh_token)
            .await?;

        match updated {
            Some(streamer) => {
                info!(id = %login.twitch_id, username = %login.username, "User logged in");
                Ok(EnrollOutcome::Updated(streamer))
            }
            None => Err(Error::StreamerNotFound(login.twitch_id.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::EventKind;
    use crate::store::MemoryStore;
    use crate::twitch::testing::{spawn, Shared};
    use crate::twitch::TwitchClient;

    fn login(token: &str) -> StreamerLogin {
        StreamerLogin {
            twitch_id: "123".into(),
            username: "streamer".into(),
            access_token: token.into(),
            refresh_token: format!("refresh-{token}"),
            profile_image_url: None,
        }
    }

    async fn enrollment(state: Shared) -> (Arc<MemoryStore>, Enrollment) {
        let config = spawn(state).await;
        let store = Arc::new(MemoryStore::new());
        let manager = SubscriptionManager::new(
            TwitchClient::new(&config).unwrap(),
            EventKind::ALL.to_vec(),
            None,
        );
        (store.clone(), Enrollment::new(store, manager))
    }

    #[tokio::test]
    async fn test_first_login_creates_and_subscribes() {
        let state = Shared::default();
        let (store, enrollment) = enrollment(state.clone()).await;

        let outcome = enrollment.enroll(login("tok-1")).await.unwrap();

        match outcome {
            EnrollOutcome::Created {
                streamer,
                subscriptions,
            } => {
                assert!(!streamer.verified);
                assert_eq!(subscriptions.created, EventKind::ALL.len());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(store.get_streamer("123").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_second_login_only_updates_tokens() {
        let state = Shared::default();
        let (store, enrollment) = enrollment(state.clone()).await;

        enrollment.enroll(login("tok-1")).await.unwrap();
        let outcome = enrollment.enroll(login("tok-2")).await.unwrap();

        assert!(matches!(outcome, EnrollOutcome::Updated(_)));
        assert_eq!(state.lock().subscribe_calls.len(), EventKind::ALL.len());
        let stored = store.get_streamer("123").await.unwrap().unwrap();
        assert_eq!(stored.access_token.as_deref(), Some("tok-2"));
        assert_eq!(stored.refresh_token.as_deref(), Some("refresh-tok-2"));
    }
}
