use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;

use super::{Store, StoreError};
use crate::models::{
    EntryOutcome, NewRedemption, NewStreamer, NewViewer, Redemption, Reward, Streamer, Viewer,
};
use crate::Error;

const STREAMER_COLUMNS: &str =
    "twitch_id, username, access_token, refresh_token, verified, profile_image_url";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        info!("Connected to Postgres");
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), Error> {
        info!("Applying migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn viewer_in(
        tx: &mut Transaction<'_, Postgres>,
        twitch_id: &str,
    ) -> Result<Option<Viewer>, StoreError> {
        let viewer = sqlx::query_as::<_, Viewer>(
            "SELECT twitch_id, username, registered_in, created_at FROM viewers WHERE twitch_id = $1",
        )
        .bind(twitch_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(viewer)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn streamers_with_tokens(&self) -> Result<Vec<Streamer>, StoreError> {
        let rows = sqlx::query_as::<_, Streamer>(&format!(
            r#"
            SELECT {STREAMER_COLUMNS}
            FROM streamers
            WHERE access_token IS NOT NULL AND access_token <> ''
              AND refresh_token IS NOT NULL AND refresh_token <> ''
            ORDER BY created_at ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_streamer(&self, twitch_id: &str) -> Result<Option<Streamer>, StoreError> {
        let row = sqlx::query_as::<_, Streamer>(&format!(
            "SELECT {STREAMER_COLUMNS} FROM streamers WHERE twitch_id = $1"
        ))
        .bind(twitch_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn create_streamer(&self, streamer: &NewStreamer) -> Result<Streamer, StoreError> {
        sqlx::query_as::<_, Streamer>(&format!(
            r#"
            INSERT INTO streamers (
                twitch_id, username, access_token, refresh_token, verified, profile_image_url
            )
            VALUES ($1, $2, $3, $4, FALSE, $5)
            RETURNING {STREAMER_COLUMNS}
            "#
        ))
        .bind(&streamer.twitch_id)
        .bind(&streamer.username)
        .bind(&streamer.access_token)
        .bind(&streamer.refresh_token)
        .bind(&streamer.profile_image_url)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| StoreError::classify(err, "streamer", &streamer.twitch_id))
    }

    async fn update_streamer_tokens(
        &self,
        twitch_id: &str,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<Option<Streamer>, StoreError> {
        let row = sqlx::query_as::<_, Streamer>(&format!(
            r#"
            UPDATE streamers
            SET access_token = $2,
                refresh_token = $3,
                updated_at = NOW()
            WHERE twitch_id = $1
            RETURNING {STREAMER_COLUMNS}
            "#
        ))
        .bind(twitch_id)
        .bind(access_token)
        .bind(refresh_token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn rewards_for_streamer(&self, streamer_id: &str) -> Result<Vec<Reward>, StoreError> {
        let rows = sqlx::query_as::<_, Reward>(
            r#"
            SELECT reward_id, streamer_id, created_at
            FROM rewards
            WHERE streamer_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(streamer_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn replace_reward(&self, streamer_id: &str, reward_id: &str) -> Result<Reward, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM rewards WHERE streamer_id = $1")
            .bind(streamer_id)
            .execute(&mut *tx)
            .await?;

        let reward = sqlx::query_as::<_, Reward>(
            r#"
            INSERT INTO rewards (reward_id, streamer_id)
            VALUES ($1, $2)
            RETURNING reward_id, streamer_id, created_at
            "#,
        )
        .bind(reward_id)
        .bind(streamer_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| StoreError::classify(err, "reward", reward_id))?;

        tx.commit().await?;
        Ok(reward)
    }

    async fn get_viewer(&self, twitch_id: &str) -> Result<Option<Viewer>, StoreError> {
        let row = sqlx::query_as::<_, Viewer>(
            "SELECT twitch_id, username, registered_in, created_at FROM viewers WHERE twitch_id = $1",
        )
        .bind(twitch_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn create_viewer(&self, viewer: &NewViewer) -> Result<Viewer, StoreError> {
        sqlx::query_as::<_, Viewer>(
            r#"
            INSERT INTO viewers (twitch_id, username, registered_in)
            VALUES ($1, $2, $3)
            RETURNING twitch_id, username, registered_in, created_at
            "#,
        )
        .bind(&viewer.twitch_id)
        .bind(&viewer.username)
        .bind(&viewer.registered_in)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| StoreError::classify(err, "viewer", &viewer.twitch_id))
    }

    async fn create_redemption(&self, redemption: &NewRedemption) -> Result<Redemption, StoreError> {
        sqlx::query_as::<_, Redemption>(
            r#"
            INSERT INTO redemptions (message_id, viewer_id, streamer_id)
            VALUES ($1, $2, $3)
            RETURNING message_id, viewer_id, streamer_id, created_at
            "#,
        )
        .bind(&redemption.message_id)
        .bind(&redemption.viewer_id)
        .bind(&redemption.streamer_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| StoreError::classify(err, "redemption", &redemption.message_id))
    }

    async fn record_entry(
        &self,
        viewer: &NewViewer,
        redemption: &NewRedemption,
    ) -> Result<EntryOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        // ON CONFLICT waits for a concurrent first insert of the same viewer
        // to settle, so the later transaction sees zero rows affected.
        let mut viewer_created = false;
        if Self::viewer_in(&mut tx, &viewer.twitch_id).await?.is_none() {
            let inserted = sqlx::query(
                r#"
                INSERT INTO viewers (twitch_id, username, registered_in)
                VALUES ($1, $2, $3)
                ON CONFLICT (twitch_id) DO NOTHING
                "#,
            )
            .bind(&viewer.twitch_id)
            .bind(&viewer.username)
            .bind(&viewer.registered_in)
            .execute(&mut *tx)
            .await?;
            viewer_created = inserted.rows_affected() == 1;
        }

        let inserted = sqlx::query_as::<_, Redemption>(
            r#"
            INSERT INTO redemptions (message_id, viewer_id, streamer_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (message_id) DO NOTHING
            RETURNING message_id, viewer_id, streamer_id, created_at
            "#,
        )
        .bind(&redemption.message_id)
        .bind(&redemption.viewer_id)
        .bind(&redemption.streamer_id)
        .fetch_optional(&mut *tx)
        .await?;

        match inserted {
            Some(redemption) => {
                tx.commit().await?;
                Ok(EntryOutcome::Recorded {
                    redemption,
                    viewer_created,
                })
            }
            None => {
                tx.rollback().await?;
                Ok(EntryOutcome::Duplicate)
            }
        }
    }

    async fn redemption_count(&self, streamer_id: Option<&str>) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM redemptions WHERE $1::TEXT IS NULL OR streamer_id = $1",
        )
        .bind(streamer_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
