// src/db.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::MigrateError;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Pool, Postgres};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::StoreError;
use crate::models::{ConflictTarget, ExistingVote, NewVote, Poll, PollId, Vote, VoteId};
use crate::store::VoteBackend;

pub async fn create_pool(config: &Config) -> Result<Pool<Postgres>, sqlx::Error> {
    info!(max_connections = config.max_connections, "Connecting to database");

    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
}

/// Create the `polls` and `votes` tables and the `(poll_id, voter_token)` unique index.
pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// [`VoteBackend`] over a PostgreSQL pool.
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn upsert_sql(target: &ConflictTarget) -> String {
    format!(
        "INSERT INTO votes (poll_id, voter_token, room_token, choice, updated_at) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT ({}) DO UPDATE \
         SET choice = EXCLUDED.choice, updated_at = EXCLUDED.updated_at",
        target.columns().join(", ")
    )
}

#[async_trait]
impl VoteBackend for PgStore {
    async fn find_polls(
        &self,
        public_token: &str,
        room_token: Option<&str>,
    ) -> Result<Vec<Poll>, StoreError> {
        let polls = sqlx::query_as::<_, Poll>(
            "SELECT id, public_token, room_token, title, description, created_at \
             FROM polls \
             WHERE public_token = $1 AND ($2::text IS NULL OR room_token = $2)",
        )
        .bind(public_token)
        .bind(room_token)
        .fetch_all(&self.pool)
        .await?;

        Ok(polls)
    }

    async fn list_votes(&self, poll_id: PollId) -> Result<Vec<Vote>, StoreError> {
        let votes = sqlx::query_as::<_, Vote>(
            "SELECT id, poll_id, voter_token, room_token, choice, updated_at \
             FROM votes WHERE poll_id = $1 ORDER BY id ASC",
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(votes)
    }

    async fn upsert_vote(
        &self,
        vote: &NewVote,
        target: &ConflictTarget,
    ) -> Result<(), StoreError> {
        let sql = upsert_sql(target);
        debug!(%target, "Upserting vote");

        sqlx::query(&sql)
            .bind(vote.poll_id)
            .bind(&vote.voter_token)
            .bind(&vote.room_token)
            .bind(&vote.choice)
            .bind(vote.updated_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn find_vote(
        &self,
        poll_id: PollId,
        voter_token: &str,
    ) -> Result<Option<ExistingVote>, StoreError> {
        let existing = sqlx::query_as::<_, ExistingVote>(
            "SELECT id, choice FROM votes \
             WHERE poll_id = $1 AND voter_token = $2 \
             ORDER BY id ASC LIMIT 1",
        )
        .bind(poll_id)
        .bind(voter_token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(existing)
    }

    async fn update_vote_choice(
        &self,
        id: VoteId,
        choice: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE votes SET choice = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(choice)
            .bind(updated_at)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Backend(format!("vote {id} no longer exists")));
        }

        Ok(())
    }

    async fn insert_vote(&self, vote: &NewVote) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO votes (poll_id, voter_token, room_token, choice, updated_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(vote.poll_id)
        .bind(&vote.voter_token)
        .bind(&vote.room_token)
        .bind(&vote.choice)
        .bind(vote.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_targets_poll_and_voter() {
        let sql = upsert_sql(&ConflictTarget::POLL_VOTER);
        assert!(sql.contains("ON CONFLICT (poll_id, voter_token) DO UPDATE"));
        assert!(sql.contains("SET choice = EXCLUDED.choice, updated_at = EXCLUDED.updated_at"));
    }
}
