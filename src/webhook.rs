//! Inbound EventSub webhook endpoint.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::dispatch::EventDispatcher;
use crate::events::Envelope;

pub const HEADER_MESSAGE_ID: &str = "Twitch-Eventsub-Message-Id";
pub const HEADER_TIMESTAMP: &str = "Twitch-Eventsub-Message-Timestamp";
pub const HEADER_SIGNATURE: &str = "Twitch-Eventsub-Message-Signature";
pub const HEADER_MESSAGE_TYPE: &str = "Twitch-Eventsub-Message-Type";

/// Twitch considers messages older than this replayable.
const MAX_MESSAGE_AGE_SECS: i64 = 600;

#[derive(Clone)]
pub struct WebhookState {
    secret: Arc<[u8]>,
    dispatcher: EventDispatcher,
}

impl WebhookState {
    pub fn new(secret: &str, dispatcher: EventDispatcher) -> Self {
        Self {
            secret: Arc::from(secret.as_bytes()),
            dispatcher,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageType {
    Verification,
    Notification,
    Revocation,
}

impl TryFrom<&str> for MessageType {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "webhook_callback_verification" => Ok(Self::Verification),
            "notification" => Ok(Self::Notification),
            "revocation" => Ok(Self::Revocation),
            _ => Err(()),
        }
    }
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/eventsub", post(handle))
        .route("/health", get(|| async { "OK" }))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn required<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, Response> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("missing header {name}")).into_response())
}

/// Checks `sha256=<hex hmac(id || timestamp || body)>` in constant time.
pub fn verify_signature(
    secret: &[u8],
    message_id: &str,
    timestamp: &str,
    body: &[u8],
    provided: &str,
) -> bool {
    let Some(provided) = provided
        .strip_prefix("sha256=")
        .and_then(|hex_part| hex::decode(hex_part).ok())
    else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret) else {
        return false;
    };
    mac.update(message_id.as_bytes());
    mac.update(timestamp.as_bytes());
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    constant_time_eq::constant_time_eq(expected.as_slice(), provided.as_slice())
}

async fn handle(State(state): State<WebhookState>, headers: HeaderMap, body: Bytes) -> Response {
    match receive(&state, &headers, &body).await {
        Ok(response) | Err(response) => response,
    }
}

async fn receive(state: &WebhookState, headers: &HeaderMap, body: &Bytes) -> Result<Response, Response> {
    let message_id = required(headers, HEADER_MESSAGE_ID)?;
    let timestamp = required(headers, HEADER_TIMESTAMP)?;
    let signature = required(headers, HEADER_SIGNATURE)?;
    let message_type = required(headers, HEADER_MESSAGE_TYPE)?;

    if !verify_signature(&state.secret, message_id, timestamp, body, signature) {
        warn!(%message_id, "Rejected EventSub message with invalid signature");
        return Err(StatusCode::FORBIDDEN.into_response());
    }

    let sent_at = DateTime::parse_from_rfc3339(timestamp)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| (StatusCode::BAD_REQUEST, "invalid timestamp").into_response())?;
    let age = Utc::now().signed_duration_since(sent_at).num_seconds().abs();
    if age > MAX_MESSAGE_AGE_SECS {
        warn!(%message_id, %timestamp, "Rejected EventSub message outside the replay window");
        return Err((StatusCode::BAD_REQUEST, "timestamp outside the allowed window").into_response());
    }

    let message_type = MessageType::try_from(message_type).map_err(|_| {
        (StatusCode::BAD_REQUEST, format!("unsupported message type {message_type}")).into_response()
    })?;

    match message_type {
        MessageType::Verification => {
            #[derive(serde::Deserialize)]
            struct Challenge {
                challenge: String,
            }
            let challenge: Challenge = serde_json::from_slice(body)
                .map_err(|_| (StatusCode::BAD_REQUEST, "missing challenge").into_response())?;
            Ok((
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/plain")],
                challenge.challenge,
            )
                .into_response())
        }
        MessageType::Revocation => {
            match serde_json::from_slice::<Envelope>(body) {
                Ok(envelope) => warn!(
                    event = %envelope.subscription.event_type,
                    status = envelope.subscription.status.as_deref().unwrap_or("unknown"),
                    condition = %envelope.subscription.condition,
                    "Twitch revoked a subscription"
                ),
                Err(err) => warn!(error = %err, "Twitch revoked a subscription (unparseable body)"),
            }
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        MessageType::Notification => {
            let envelope: Envelope = serde_json::from_slice(body).map_err(|err| {
                error!(%message_id, error = %err, "Malformed EventSub notification");
                (StatusCode::BAD_REQUEST, "invalid notification body").into_response()
            })?;
            state
                .dispatcher
                .dispatch(&envelope.subscription.event_type, envelope.event)
                .await;
            Ok(StatusCode::NO_CONTENT.into_response())
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::models::Streamer;
    use crate::notify::Notifier;
    use crate::redemption::RedemptionProcessor;
    use crate::store::{MemoryStore, Store};
    use http_body_util::BodyExt;
    use serde_json::json;
    use tower::ServiceExt;

    async fn app() -> (Arc<MemoryStore>, Router) {
        let store = Arc::new(MemoryStore::new());
        store.put_streamer(Streamer {
            twitch_id: "123".into(),
            username: "streamer".into(),
            access_token: None,
            refresh_token: None,
            verified: false,
            profile_image_url: None,
        });
        store.replace_reward("123", "R1").await.unwrap();
        let notifier = Notifier::disabled();
        let processor = RedemptionProcessor::new(store.clone(), notifier.clone());
        let state = WebhookState::new(SECRET, EventDispatcher::new(processor, notifier));
        (store, router(state))
    }

    fn notification_body(message_id: &str) -> String {
        json!({
            "subscription": {
                "id": "sub-1",
                "type": "channel.channel_points_custom_reward_redemption.add",
                "version": "1",
                "status": "enabled",
                "condition": {"broadcaster_user_id": "123"}
            },
            "event": {
                "id": message_id,
                "broadcaster_user_id": "123",
                "broadcaster_user_login": "streamer",
                "user_id": "456",
                "user_login": "viewera",
                "reward": {"id": "R1", "title": "1 Giveaway Entry", "cost": 100}
            }
        })
        .to_string()
    }

    #[test]
    fn test_verify_signature() {
        let signature = sign(SECRET, "m1", "2025-04-01T00:00:00Z", "{}");
        assert!(verify_signature(
            SECRET.as_bytes(),
            "m1",
            "2025-04-01T00:00:00Z",
            b"{}",
            &signature
        ));
        assert!(!verify_signature(
            SECRET.as_bytes(),
            "m1",
            "2025-04-01T00:00:00Z",
            b"{ }",
            &signature
        ));
        assert!(!verify_signature(
            SECRET.as_bytes(),
            "m1",
            "2025-04-01T00:00:00Z",
            b"{}",
            "md5=abc"
        ));
    }

    #[tokio::test]
    async fn test_verification_returns_challenge() {
        let (_store, app) = app().await;
        let body = json!({
            "challenge": "pogchamp-kappa-360noscope-vohiyo",
            "subscription": {"type": "stream.online", "condition": {"broadcaster_user_id": "123"}}
        })
        .to_string();

        let response = app
            .oneshot(signed("webhook_callback_verification", "v1", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"pogchamp-kappa-360noscope-vohiyo");
    }

    #[tokio::test]
    async fn test_notification_records_redemption_once() {
        let (store, app) = app().await;

        let first = app
            .clone()
            .oneshot(signed("notification", "d1", notification_body("MSG1")))
            .await
            .unwrap();
        // Twitch retries with a new delivery id but the same event.
        let retry = app
            .oneshot(signed("notification", "d2", notification_body("MSG1")))
            .await
            .unwrap();

        assert_eq!(first.status(), StatusCode::NO_CONTENT);
        assert_eq!(retry.status(), StatusCode::NO_CONTENT);
        assert_eq!(store.redemption_count(Some("123")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rejects_invalid_signature() {
        let (store, app) = app().await;
        let timestamp = Utc::now().to_rfc3339();
        let body = notification_body("MSG1");
        let signature = sign("some-other-secret", "d1", &timestamp, &body);

        let response = app
            .oneshot(request("notification", "d1", &timestamp, &signature, body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(store.redemption_count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejects_stale_timestamp() {
        let (store, app) = app().await;
        let timestamp = (Utc::now() - chrono::Duration::minutes(15)).to_rfc3339();
        let body = notification_body("MSG1");
        let signature = sign(SECRET, "d1", &timestamp, &body);

        let response = app
            .oneshot(request("notification", "d1", &timestamp, &signature, body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(store.redemption_count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_headers_are_rejected() {
        let (_store, app) = app().await;
        let request = axum::http::Request::builder()
            .method(axum::http::Method::POST)
            .uri("/eventsub")
            .body(axum::body::Body::from(notification_body("MSG1")))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_revocation_is_acknowledged() {
        let (_store, app) = app().await;
        let body = json!({
            "subscription": {
                "type": "stream.online",
                "status": "authorization_revoked",
                "condition": {"broadcaster_user_id": "123"}
            }
        })
        .to_string();

        let response = app.oneshot(signed("revocation", "r1", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_unparseable_notification_is_bad_request() {
        let (_store, app) = app().await;
        let response = app
            .oneshot(signed("notification", "d1", "not json".to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health() {
        let (_store, app) = app().await;
        let request = axum::http::Request::builder()
            .uri("/health")
            .body(axum::body::Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
