//! Background task started at boot: refresh every streamer's tokens,
//! subscribe them, then keep subscriptions reconciled.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::models::Streamer;
use crate::store::Store;
use crate::subscriptions::{RegisterReport, SubscriptionManager};
use crate::tokens::{RefreshReport, TokenRefresher};

pub struct Lifecycle {
    store: Arc<dyn Store>,
    refresher: TokenRefresher,
    subscriptions: SubscriptionManager,
}

impl Lifecycle {
    pub fn new(store: Arc<dyn Store>, refresher: TokenRefresher, subscriptions: SubscriptionManager) -> Self {
        Self {
            store,
            refresher,
            subscriptions,
        }
    }

    async fn load_streamers(&self) -> Option<Vec<Streamer>> {
        match self.store.streamers_with_tokens().await {
            Ok(streamers) => Some(streamers),
            Err(err) => {
                error!(error = %err, "Error getting streamers from the database");
                None
            }
        }
    }

    /// Refreshes all tokens, then subscribes every streamer (or the fallback
    /// channel).
    pub async fn startup(&self) -> Option<(RefreshReport, RegisterReport)> {
        let mut streamers = self.load_streamers().await?;
        let refreshed = self.refresher.refresh_all(&mut streamers).await;
        let registered = self.subscriptions.register_all(&streamers).await;
        info!(
            streamers = streamers.len(),
            refreshed = refreshed.refreshed.len(),
            refresh_failed = refreshed.failed.len(),
            created = registered.created,
            existing = registered.existing,
            failed = registered.failed,
            "Initial subscription pass finished"
        );
        Some((refreshed, registered))
    }

    /// One reconciliation pass against freshly loaded streamers.
    pub async fn reconcile_once(&self) -> Option<RegisterReport> {
        let mut streamers = self.load_streamers().await?;
        self.refresher.refresh_all(&mut streamers).await;
        let report = self.subscriptions.reconcile(&streamers).await;
        info!(
            created = report.created,
            failed = report.failed,
            "Subscription reconciliation finished"
        );
        Some(report)
    }

    /// Runs the startup pass, then reconciles every `reconcile_every` until
    /// the task is dropped. `None` stops after startup.
    pub async fn run(self, reconcile_every: Option<Duration>) {
        self.startup().await;

        let Some(period) = reconcile_every else {
            return;
        };
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; startup already covered it.
        interval.tick().await;

        loop {
            interval.tick().await;
            self.reconcile_once().await;
        }
    }
}
