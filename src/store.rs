// store.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{ConflictTarget, ExistingVote, NewVote, Poll, PollId, Vote, VoteId};

/// Remote poll/vote storage, consumed as a small query/upsert API.
///
/// Every method is one round trip. Implementations classify failures into
/// [`StoreError`] kinds so callers never inspect message text.
#[async_trait]
pub trait VoteBackend: Send + Sync {
    /// Every poll with `public_token`, narrowed to `room_token` when given.
    async fn find_polls(
        &self,
        public_token: &str,
        room_token: Option<&str>,
    ) -> Result<Vec<Poll>, StoreError>;

    /// Votes of a poll in arrival order.
    async fn list_votes(&self, poll_id: PollId) -> Result<Vec<Vote>, StoreError>;

    /// Insert `vote`, or overwrite `choice`/`updated_at` of the row matching `target`.
    async fn upsert_vote(&self, vote: &NewVote, target: &ConflictTarget)
        -> Result<(), StoreError>;

    /// First row for the pair, if any.
    async fn find_vote(
        &self,
        poll_id: PollId,
        voter_token: &str,
    ) -> Result<Option<ExistingVote>, StoreError>;

    async fn update_vote_choice(
        &self,
        id: VoteId,
        choice: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn insert_vote(&self, vote: &NewVote) -> Result<(), StoreError>;
}
