use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::events::{ChannelUpdate, RedemptionAdd, RewardUpdate, StreamStatus};
use crate::notify::Notifier;
use crate::redemption::RedemptionProcessor;

/// EventSub subscription types this service subscribes to and handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StreamOnline,
    StreamOffline,
    ChannelUpdate,
    RedemptionAdd,
    RewardUpdate,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::StreamOnline,
        EventKind::StreamOffline,
        EventKind::ChannelUpdate,
        EventKind::RedemptionAdd,
        EventKind::RewardUpdate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::StreamOnline => "stream.online",
            EventKind::StreamOffline => "stream.offline",
            EventKind::ChannelUpdate => "channel.update",
            EventKind::RedemptionAdd => "channel.channel_points_custom_reward_redemption.add",
            EventKind::RewardUpdate => "channel.channel_points_custom_reward.update",
        }
    }

    /// Subscription version requested from Twitch.
    pub fn version(self) -> &'static str {
        match self {
            EventKind::ChannelUpdate => "2",
            _ => "1",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEventKind(pub String);

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownEventKind(s.to_string()))
    }
}

/// Routes a notification's `event` payload to the handler for its type.
#[derive(Clone)]
pub struct EventDispatcher {
    redemptions: RedemptionProcessor,
    notifier: Notifier,
}

impl EventDispatcher {
    pub fn new(redemptions: RedemptionProcessor, notifier: Notifier) -> Self {
        Self {
            redemptions,
            notifier,
        }
    }

    /// Returns the handled kind, or `None` when the type is not ours.
    pub async fn dispatch(&self, event_type: &str, event: Value) -> Option<EventKind> {
        let kind = match event_type.parse::<EventKind>() {
            Ok(kind) => kind,
            Err(UnknownEventKind(other)) => {
                debug!(event = %other, "Ignoring event without a handler");
                return None;
            }
        };

        match kind {
            EventKind::StreamOnline => self.stream_online(event),
            EventKind::StreamOffline => stream_offline(event),
            EventKind::ChannelUpdate => channel_update(event),
            EventKind::RedemptionAdd => self.redemption_add(event).await,
            EventKind::RewardUpdate => self.reward_update(event),
        }
        Some(kind)
    }

    fn stream_online(&self, event: Value) {
        let Some(data) = parse::<StreamStatus>(EventKind::StreamOnline, event) else {
            return;
        };
        info!(user_id = %data.broadcaster_user_id, username = %data.broadcaster_user_login, "Streamer went live");
        self.notifier
            .spawn(format!("{} went live", data.broadcaster_user_login));
    }

    async fn redemption_add(&self, event: Value) {
        let Some(data) = parse::<RedemptionAdd>(EventKind::RedemptionAdd, event) else {
            return;
        };
        // Failures are logged inside the processor.
        let _ = self.redemptions.process(&data).await;
    }

    fn reward_update(&self, event: Value) {
        let Some(data) = parse::<RewardUpdate>(EventKind::RewardUpdate, event) else {
            return;
        };
        warn!(
            streamer = %data.broadcaster_user_login,
            reward = %data.title,
            cost = data.cost,
            "Streamer updated a channel point reward"
        );
        self.notifier.spawn(format!(
            "{} updated a channel point reward, title={}",
            data.broadcaster_user_login, data.title
        ));
    }
}

fn stream_offline(event: Value) {
    if let Some(data) = parse::<StreamStatus>(EventKind::StreamOffline, event) {
        info!(user_id = %data.broadcaster_user_id, username = %data.broadcaster_user_login, "Streamer went offline");
    }
}

fn channel_update(event: Value) {
    if let Some(data) = parse::<ChannelUpdate>(EventKind::ChannelUpdate, event) {
        info!(channel = %data.broadcaster_user_login, title = %data.title, "Channel updated");
    }
}

fn parse<T: DeserializeOwned>(kind: EventKind, event: Value) -> Option<T> {
    match serde_json::from_value(event) {
        Ok(data) => Some(data),
        Err(err) => {
            error!(event = %kind, error = %err, "Error parsing event payload");
            None
        }
    }
}
