use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

use crate::models::{Cat, Matchup, PairKey, PendingMatch, RatingChange, UnorderedPair, VoteRecord};
use crate::services::{PendingMatchStore, RatingStore, StoreError, VoteCounter, VoteLedger};

const TOTAL_VOTES: &str = "total_votes";

/// Errors that can occur when interacting with PostgreSQL
#[derive(Debug, Error)]
pub enum PostgresError {
    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrateError(#[from] sqlx::migrate::MigrateError),
}

/// PostgreSQL client backing cats, the vote ledger, pending matches and stats
///
/// The ledger relies on the `(voter_id, cat_low, cat_high)` primary key:
/// `INSERT .. ON CONFLICT DO NOTHING` is the atomic create-if-absent that keeps
/// two concurrent votes on the same pair from both being admitted.
pub struct PostgresClient {
    pool: PgPool,
}

impl PostgresClient {
    /// Create a new PostgreSQL client from a connection string
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
        acquire_timeout: Duration,
        idle_timeout: Duration,
    ) -> Result<Self, PostgresError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(acquire_timeout)
            .idle_timeout(idle_timeout)
            .test_before_acquire(true)
            .connect(database_url)
            .await?;

        // Run migrations on startup
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Create a new PostgreSQL client from settings
    pub async fn from_settings(
        url: &str,
        max_connections: Option<u32>,
        min_connections: Option<u32>,
        acquire_timeout_secs: Option<u64>,
        idle_timeout_secs: Option<u64>,
    ) -> Result<Self, PostgresError> {
        tracing::info!("Connecting to PostgreSQL");

        Self::new(
            url,
            max_connections.unwrap_or(10),
            min_connections.unwrap_or(1),
            Duration::from_secs(acquire_timeout_secs.unwrap_or(5)),
            Duration::from_secs(idle_timeout_secs.unwrap_or(600)),
        )
        .await
    }

    /// Health check for the database connection
    pub async fn health_check(&self) -> Result<bool, PostgresError> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| true)
            .map_err(Into::into)
    }
}

fn cat_from_row(row: &PgRow) -> Result<Cat, sqlx::Error> {
    Ok(Cat {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        image_url: row.try_get("image_url")?,
        rating: row.try_get("rating")?,
        match_count: match_count_from_column(row.try_get("match_count")?)?,
    })
}

fn match_count_from_column(value: i32) -> Result<u32, sqlx::Error> {
    u32::try_from(value).map_err(|e| sqlx::Error::ColumnDecode {
        index: "match_count".to_string(),
        source: Box::new(e),
    })
}

fn match_count_to_column(value: u32) -> Result<i32, sqlx::Error> {
    i32::try_from(value).map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

/// Add `delta` to one cat's rating and bump its match count in a single statement
async fn shift_rating(conn: &mut PgConnection, cat_id: &str, delta: i32) -> Result<Cat, StoreError> {
    let query = r#"
        UPDATE cats
        SET rating = rating + $2, match_count = match_count + 1
        WHERE id = $1
        RETURNING id, name, image_url, rating, match_count
    "#;

    let row = sqlx::query(query)
        .bind(cat_id)
        .bind(delta)
        .fetch_optional(&mut *conn)
        .await
        .map_err(PostgresError::from)?
        .ok_or_else(|| StoreError::NotFound(cat_id.to_string()))?;

    Ok(cat_from_row(&row).map_err(PostgresError::from)?)
}

#[async_trait]
impl RatingStore for PostgresClient {
    async fn list_all(&self) -> Result<Vec<Cat>, StoreError> {
        let query = r#"
            SELECT id, name, image_url, rating, match_count
            FROM cats
        "#;

        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .await
            .map_err(PostgresError::from)?;

        let cats = rows
            .iter()
            .map(cat_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(PostgresError::from)?;

        Ok(cats)
    }

    async fn get(&self, cat_id: &str) -> Result<Option<Cat>, StoreError> {
        let query = r#"
            SELECT id, name, image_url, rating, match_count
            FROM cats
            WHERE id = $1
        "#;

        let row = sqlx::query(query)
            .bind(cat_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(PostgresError::from)?;

        row.as_ref()
            .map(cat_from_row)
            .transpose()
            .map_err(|e| PostgresError::from(e).into())
    }

    async fn apply_delta(&self, cat_id: &str, delta: i32) -> Result<Cat, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(PostgresError::from)?;
        let cat = shift_rating(&mut conn, cat_id, delta).await?;

        tracing::debug!("Applied rating delta {} to cat {}", delta, cat_id);

        Ok(cat)
    }

    async fn apply_pair(&self, winner: &RatingChange, loser: &RatingChange) -> Result<(Cat, Cat), StoreError> {
        let mut tx = self.pool.begin().await.map_err(PostgresError::from)?;

        // Lock rows in id order so opposing votes on one pair cannot deadlock
        let (first, second) = if winner.cat_id <= loser.cat_id {
            (winner, loser)
        } else {
            (loser, winner)
        };
        let updated_first = shift_rating(&mut tx, &first.cat_id, first.delta).await?;
        let updated_second = shift_rating(&mut tx, &second.cat_id, second.delta).await?;

        tx.commit().await.map_err(PostgresError::from)?;

        if first.cat_id == winner.cat_id {
            Ok((updated_first, updated_second))
        } else {
            Ok((updated_second, updated_first))
        }
    }

    async fn insert_if_absent(&self, cat: Cat) -> Result<bool, StoreError> {
        let query = r#"
            INSERT INTO cats (id, name, image_url, rating, match_count)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
        "#;

        let result = sqlx::query(query)
            .bind(&cat.id)
            .bind(&cat.name)
            .bind(&cat.image_url)
            .bind(cat.rating)
            .bind(match_count_to_column(cat.match_count).map_err(PostgresError::from)?)
            .execute(&self.pool)
            .await
            .map_err(PostgresError::from)?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl VoteLedger for PostgresClient {
    async fn exists(&self, key: &PairKey) -> Result<bool, StoreError> {
        let query = r#"
            SELECT EXISTS (
                SELECT 1 FROM votes
                WHERE voter_id = $1 AND cat_low = $2 AND cat_high = $3
            ) AS present
        "#;

        let row = sqlx::query(query)
            .bind(&key.voter_id)
            .bind(&key.pair.low)
            .bind(&key.pair.high)
            .fetch_one(&self.pool)
            .await
            .map_err(PostgresError::from)?;

        Ok(row.try_get("present").map_err(PostgresError::from)?)
    }

    async fn record(&self, record: &VoteRecord) -> Result<bool, StoreError> {
        let query = r#"
            INSERT INTO votes (voter_id, cat_low, cat_high, winner_id, loser_id, voted_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (voter_id, cat_low, cat_high) DO NOTHING
        "#;

        let result = sqlx::query(query)
            .bind(&record.key.voter_id)
            .bind(&record.key.pair.low)
            .bind(&record.key.pair.high)
            .bind(&record.winner_id)
            .bind(&record.loser_id)
            .bind(record.voted_at)
            .execute(&self.pool)
            .await
            .map_err(PostgresError::from)?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, key: &PairKey) -> Result<(), StoreError> {
        let query = r#"
            DELETE FROM votes
            WHERE voter_id = $1 AND cat_low = $2 AND cat_high = $3
        "#;

        sqlx::query(query)
            .bind(&key.voter_id)
            .bind(&key.pair.low)
            .bind(&key.pair.high)
            .execute(&self.pool)
            .await
            .map_err(PostgresError::from)?;

        Ok(())
    }

    async fn resolved_pairs(&self, voter_id: &str) -> Result<HashSet<UnorderedPair>, StoreError> {
        let query = r#"
            SELECT cat_low, cat_high
            FROM votes
            WHERE voter_id = $1
        "#;

        let rows = sqlx::query(query)
            .bind(voter_id)
            .fetch_all(&self.pool)
            .await
            .map_err(PostgresError::from)?;

        let pairs = rows
            .iter()
            .map(|row| -> Result<UnorderedPair, sqlx::Error> {
                Ok(UnorderedPair {
                    low: row.try_get("cat_low")?,
                    high: row.try_get("cat_high")?,
                })
            })
            .collect::<Result<HashSet<_>, _>>()
            .map_err(PostgresError::from)?;

        tracing::debug!("Voter {} has resolved {} pairs", voter_id, pairs.len());

        Ok(pairs)
    }
}

#[async_trait]
impl PendingMatchStore for PostgresClient {
    async fn get(&self, voter_id: &str) -> Result<Option<PendingMatch>, StoreError> {
        let query = r#"
            SELECT voter_id, cat1_id, cat2_id, token, created_at
            FROM pending_matches
            WHERE voter_id = $1
        "#;

        let row = sqlx::query(query)
            .bind(voter_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(PostgresError::from)?;

        let pending = row
            .map(|row| -> Result<PendingMatch, sqlx::Error> {
                Ok(PendingMatch {
                    voter_id: row.try_get("voter_id")?,
                    matchup: Matchup::new(
                        row.try_get::<String, _>("cat1_id")?,
                        row.try_get::<String, _>("cat2_id")?,
                    ),
                    token: row.try_get("token")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .transpose()
            .map_err(PostgresError::from)?;

        Ok(pending)
    }

    async fn set(&self, pending: &PendingMatch) -> Result<(), StoreError> {
        let query = r#"
            INSERT INTO pending_matches (voter_id, cat1_id, cat2_id, token, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (voter_id)
            DO UPDATE SET
                cat1_id = EXCLUDED.cat1_id,
                cat2_id = EXCLUDED.cat2_id,
                token = EXCLUDED.token,
                created_at = EXCLUDED.created_at
        "#;

        sqlx::query(query)
            .bind(&pending.voter_id)
            .bind(&pending.matchup.cat1_id)
            .bind(&pending.matchup.cat2_id)
            .bind(&pending.token)
            .bind(pending.created_at)
            .execute(&self.pool)
            .await
            .map_err(PostgresError::from)?;

        Ok(())
    }

    async fn set_if_absent(&self, pending: &PendingMatch) -> Result<bool, StoreError> {
        let query = r#"
            INSERT INTO pending_matches (voter_id, cat1_id, cat2_id, token, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (voter_id) DO NOTHING
        "#;

        let result = sqlx::query(query)
            .bind(&pending.voter_id)
            .bind(&pending.matchup.cat1_id)
            .bind(&pending.matchup.cat2_id)
            .bind(&pending.token)
            .bind(pending.created_at)
            .execute(&self.pool)
            .await
            .map_err(PostgresError::from)?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, voter_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM pending_matches WHERE voter_id = $1")
            .bind(voter_id)
            .execute(&self.pool)
            .await
            .map_err(PostgresError::from)?;

        Ok(())
    }
}

#[async_trait]
impl VoteCounter for PostgresClient {
    async fn increment(&self) -> Result<(), StoreError> {
        let query = r#"
            INSERT INTO stats (name, value) VALUES ($1, 1)
            ON CONFLICT (name) DO UPDATE SET value = stats.value + 1
        "#;

        sqlx::query(query)
            .bind(TOTAL_VOTES)
            .execute(&self.pool)
            .await
            .map_err(PostgresError::from)?;

        Ok(())
    }

    async fn read(&self) -> Result<u64, StoreError> {
        let value: Option<i64> = sqlx::query_scalar("SELECT value FROM stats WHERE name = $1")
            .bind(TOTAL_VOTES)
            .fetch_optional(&self.pool)
            .await
            .map_err(PostgresError::from)?;

        let total = value
            .map(|v| {
                u64::try_from(v).map_err(|e| sqlx::Error::ColumnDecode {
                    index: "value".to_string(),
                    source: Box::new(e),
                })
            })
            .transpose()
            .map_err(PostgresError::from)?;

        Ok(total.unwrap_or(0))
    }
}
