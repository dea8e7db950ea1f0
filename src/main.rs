use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use twitch_points::config::{load_dotenv, Config};
use twitch_points::dispatch::{EventDispatcher, EventKind};
use twitch_points::lifecycle::Lifecycle;
use twitch_points::notify::Notifier;
use twitch_points::redemption::RedemptionProcessor;
use twitch_points::store::{PgStore, Store};
use twitch_points::subscriptions::SubscriptionManager;
use twitch_points::tokens::TokenRefresher;
use twitch_points::twitch::TwitchClient;
use twitch_points::webhook::{router, WebhookState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    load_dotenv()?;
    let config = Config::from_env().context("invalid configuration")?;

    let pg = PgStore::connect(&config.database_url)
        .await
        .context("error connecting to the database")?;
    pg.migrate().await?;
    let store: Arc<dyn Store> = Arc::new(pg);

    let notifier = Notifier::new(config.discord_webhook_url.clone(), config.http_timeout)?;
    let twitch = TwitchClient::new(&config)?;

    let subscriptions = SubscriptionManager::new(
        twitch.clone(),
        EventKind::ALL.to_vec(),
        config.fallback_channel.clone(),
    );
    let refresher = TokenRefresher::new(twitch, store.clone());

    // Token refresh and subscription setup run beside the server.
    let lifecycle = Lifecycle::new(store.clone(), refresher, subscriptions);
    tokio::spawn(lifecycle.run(config.reconcile_every));

    let processor = RedemptionProcessor::new(store, notifier.clone());
    let state = WebhookState::new(&config.webhook_secret, EventDispatcher::new(processor, notifier));

    let listener = tokio::net::TcpListener::bind(config.bind_address.as_str())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address))?;
    info!(host = %config.bind_address, "Server listening");
    axum::serve(listener, router(state)).await?;

    Ok(())
}
