use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use crate::Error;

#[derive(Serialize)]
struct WebhookMessage<'a> {
    content: &'a str,
}

/// Posts human-readable summaries to a Discord-style webhook.
#[derive(Clone)]
pub struct Notifier {
    http: reqwest::Client,
    url: Option<Url>,
}

impl Notifier {
    pub fn new(url: Option<Url>, timeout: Duration) -> Result<Self, Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, url })
    }

    /// A notifier with no target; every send fails with [`Error::Notify`].
    pub fn disabled() -> Self {
        Self {
            http: reqwest::Client::new(),
            url: None,
        }
    }

    /// Succeeds only on `204 No Content`.
    pub async fn send(&self, content: &str) -> Result<(), Error> {
        let url = self
            .url
            .clone()
            .ok_or_else(|| Error::Notify("DISCORD_WEBHOOK_URL is not set".into()))?;

        let response = self
            .http
            .post(url)
            .json(&WebhookMessage { content })
            .send()
            .await?;

        if response.status() != StatusCode::NO_CONTENT {
            return Err(Error::Notify(format!(
                "failed to send webhook, status: {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Sends on a detached task; failures are only logged.
    pub fn spawn(&self, content: String) {
        let notifier = self.clone();
        tokio::spawn(async move {
            match notifier.send(&content).await {
                Ok(()) => {}
                Err(Error::Notify(reason)) if notifier.url.is_none() => {
                    debug!(%reason, "Notification skipped");
                }
                Err(err) => warn!(error = %err, "Failed to send notification"),
            }
        });
    }
}
