//! Typed payloads of the EventSub events this service handles. Only the
//! fields read by the handlers are declared.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// Outer notification body. `event` stays untyped until the subscription
/// type is known.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub subscription: EnvelopeSubscription,
    #[serde(default)]
    pub event: Value,
}

#[derive(Debug, Deserialize)]
pub struct EnvelopeSubscription {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub condition: Value,
}

// ------------------------------------------------------------------------
// "stream.online" / "stream.offline"
// ------------------------------------------------------------------------
#[derive(Debug, Clone, Deserialize)]
pub struct StreamStatus {
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
    #[serde(default)]
    pub broadcaster_user_name: String,
}

// ------------------------------------------------------------------------
// "channel.update"
// ------------------------------------------------------------------------
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelUpdate {
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
    #[serde(default)]
    pub title: String,
}

// ------------------------------------------------------------------------
// "channel.channel_points_custom_reward_redemption.add"
// ------------------------------------------------------------------------
#[derive(Debug, Clone, Deserialize)]
pub struct RedemptionAdd {
    /// Redemption id, unique per redemption across redeliveries.
    pub id: String,
    pub broadcaster_user_id: String,
    #[serde(default)]
    pub broadcaster_user_login: String,
    #[serde(default)]
    pub broadcaster_user_name: String,
    pub user_id: String,
    #[serde(default)]
    pub user_login: String,
    #[serde(default)]
    pub user_name: String,
    pub reward: RewardRef,
    #[serde(default)]
    pub redeemed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RewardRef {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub cost: u64,
}

// ------------------------------------------------------------------------
// "channel.channel_points_custom_reward.update"
// ------------------------------------------------------------------------
#[derive(Debug, Clone, Deserialize)]
pub struct RewardUpdate {
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub cost: u64,
}
