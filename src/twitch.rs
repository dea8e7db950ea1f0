//! HTTP client for the Twitch token endpoint and the Helix EventSub
//! subscription endpoints.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;
use twitch_oauth2::{AccessToken, ClientId, ClientSecret, RefreshToken};
use url::Url;

use crate::config::Config;
use crate::dispatch::EventKind;
use crate::Error;

/// Struct for the condition in the subscription payload.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Condition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcaster_user_id: Option<String>,
}

/// Webhook transport. Twitch signs every delivery with `secret`.
#[derive(Serialize)]
struct WebhookTransport<'a> {
    method: &'static str,
    callback: &'a str,
    secret: &'a str,
}

#[derive(Serialize)]
struct SubscriptionPayload<'a> {
    #[serde(rename = "type")]
    event_type: &'static str,
    version: &'static str,
    condition: Condition,
    transport: WebhookTransport<'a>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub status: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub version: String,
    #[serde(default)]
    pub condition: Condition,
}

impl Subscription {
    /// Whether Twitch will (or is about to) deliver events for it.
    pub fn is_live(&self) -> bool {
        matches!(
            self.status.as_str(),
            "enabled" | "webhook_callback_verification_pending"
        )
    }
}

#[derive(Deserialize)]
struct Pagination {
    cursor: Option<String>,
}

#[derive(Deserialize)]
struct SubscriptionList {
    data: Vec<Subscription>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

/// Fresh credential pair returned by the token endpoint.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
    pub expires_in: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Created,
    AlreadyExists,
}

/// Sends the token requests `twitch_oauth2` builds to the configured token
/// endpoint instead of its built-in one.
struct TokenEndpoint<'a> {
    http: &'a reqwest::Client,
    url: &'a Url,
}

impl twitch_oauth2::client::Client for TokenEndpoint<'_> {
    type Error = reqwest::Error;

    fn req(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> Pin<Box<dyn Future<Output = Result<http::Response<Vec<u8>>, reqwest::Error>> + Send + '_>>
    {
        let (parts, body) = request.into_parts();
        let mut url = self.url.clone();
        url.set_query(parts.uri.query());

        let pending = self
            .http
            .request(parts.method, url)
            .headers(parts.headers)
            .body(body)
            .send();

        Box::pin(async move {
            let response = pending.await?;
            let mut result = http::Response::new(Vec::new());
            *result.status_mut() = response.status();
            *result.version_mut() = response.version();
            *result.headers_mut() = response.headers().clone();
            *result.body_mut() = response.bytes().await?.to_vec();
            Ok(result)
        })
    }
}

#[derive(Clone)]
pub struct TwitchClient {
    http: reqwest::Client,
    client_id: ClientId,
    client_secret: ClientSecret,
    token_url: Url,
    helix_url: Url,
    callback: Url,
    webhook_secret: String,
}

impl TwitchClient {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.http_timeout)
            .build()?;

        Ok(Self {
            http,
            client_id: ClientId::new(config.client_id.clone()),
            client_secret: ClientSecret::new(config.client_secret.clone()),
            token_url: config.token_url.clone(),
            helix_url: config.helix_url.clone(),
            callback: config.webhook_callback.clone(),
            webhook_secret: config.webhook_secret.clone(),
        })
    }

    fn subscriptions_url(&self) -> String {
        format!(
            "{}/eventsub/subscriptions",
            self.helix_url.as_str().trim_end_matches('/')
        )
    }

    /// Exchanges a refresh token for a new access/refresh pair. Twitch
    /// normally rotates the refresh token; if it does not, the old one stays
    /// valid.
    pub async fn refresh_token(&self, refresh_token: &RefreshToken) -> Result<TokenPair, Error> {
        let endpoint = TokenEndpoint {
            http: &self.http,
            url: &self.token_url,
        };

        let (access_token, expires_in, rotated) = refresh_token
            .refresh_token(&endpoint, &self.client_id, Some(&self.client_secret))
            .await?;

        Ok(TokenPair {
            access_token,
            refresh_token: rotated.unwrap_or_else(|| refresh_token.clone()),
            expires_in,
        })
    }

    /// Registers a webhook subscription for `kind` on `broadcaster_id`.
    /// A 409 means the same subscription already exists.
    pub async fn create_subscription(
        &self,
        kind: EventKind,
        broadcaster_id: &str,
        token: &AccessToken,
    ) -> Result<SubscribeOutcome, Error> {
        let payload = SubscriptionPayload {
            event_type: kind.as_str(),
            version: kind.version(),
            condition: Condition {
                broadcaster_user_id: Some(broadcaster_id.to_string()),
            },
            transport: WebhookTransport {
                method: "webhook",
                callback: self.callback.as_str(),
                secret: &self.webhook_secret,
            },
        };

        let response = self
            .http
            .post(self.subscriptions_url())
            .header("Client-Id", self.client_id.as_str())
            .bearer_auth(token.secret())
            .json(&payload)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(SubscribeOutcome::Created),
            StatusCode::CONFLICT => Ok(SubscribeOutcome::AlreadyExists),
            _ => Err(Error::from_response(response).await),
        }
    }

    /// Lists every subscription Twitch holds for `user_id`, following the
    /// pagination cursor.
    pub async fn list_subscriptions(
        &self,
        user_id: &str,
        token: &AccessToken,
    ) -> Result<Vec<Subscription>, Error> {
        let mut subscriptions = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(self.subscriptions_url())
                .header("Client-Id", self.client_id.as_str())
                .bearer_auth(token.secret())
                .query(&[("user_id", user_id)]);
            if let Some(after) = cursor.as_deref() {
                request = request.query(&[("after", after)]);
            }

            let response = request.send().await?;
            if !response.status().is_success() {
                return Err(Error::from_response(response).await);
            }

            let page: SubscriptionList = response.json().await?;
            debug!(user_id, count = page.data.len(), "Fetched subscription page");
            subscriptions.extend(page.data);

            cursor = page
                .pagination
                .and_then(|p| p.cursor)
                .filter(|c| !c.is_empty());
            if cursor.is_none() {
                break;
            }
        }

        Ok(subscriptions)
    }
}
