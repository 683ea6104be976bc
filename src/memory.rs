// memory.rs
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::models::{ConflictTarget, ExistingVote, NewVote, Poll, PollId, Vote, VoteId};
use crate::store::VoteBackend;

/// How the in-memory `votes` table enforces `(poll_id, voter_token)` uniqueness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueMode {
    /// A unique index the upsert can name as its conflict target.
    Enforced,
    /// Duplicates are rejected, but by an index the upsert cannot target.
    Untargetable,
    /// No uniqueness at all.
    Absent,
}

/// Backend operations, for fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    FindPolls,
    ListVotes,
    UpsertVote,
    FindVote,
    UpdateVote,
    InsertVote,
}

#[derive(Default)]
struct Tables {
    polls: Vec<Poll>,
    votes: Vec<Vote>,
    next_vote_id: VoteId,
    faults: HashMap<StoreOp, StoreError>,
    competing_insert: Option<NewVote>,
}

impl Tables {
    fn take_fault(&mut self, op: StoreOp) -> Result<(), StoreError> {
        match self.faults.remove(&op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn position(&self, poll_id: PollId, voter_token: &str) -> Option<usize> {
        self.votes
            .iter()
            .position(|v| v.poll_id == poll_id && v.voter_token == voter_token)
    }

    fn push(&mut self, vote: &NewVote) -> VoteId {
        self.next_vote_id += 1;
        let id = self.next_vote_id;
        self.votes.push(Vote {
            id,
            poll_id: vote.poll_id,
            voter_token: vote.voter_token.clone(),
            room_token: vote.room_token.clone(),
            choice: vote.choice.clone(),
            updated_at: vote.updated_at,
        });
        id
    }
}

/// In-process [`VoteBackend`] with a configurable uniqueness mode.
pub struct MemoryStore {
    mode: UniqueMode,
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new(mode: UniqueMode) -> Self {
        Self {
            mode,
            tables: Mutex::new(Tables::default()),
        }
    }

    pub fn mode(&self) -> UniqueMode {
        self.mode
    }

    pub async fn add_poll(&self, poll: Poll) {
        self.tables.lock().await.polls.push(poll);
    }

    /// Every stored vote row, across polls.
    pub async fn vote_rows(&self) -> Vec<Vote> {
        self.tables.lock().await.votes.clone()
    }

    /// Make the next call of `op` fail with `err`.
    pub async fn fail_next(&self, op: StoreOp, err: StoreError) {
        self.tables.lock().await.faults.insert(op, err);
    }

    /// Commit `vote` immediately before the next `insert_vote`, as a concurrent writer would.
    pub async fn race_next_insert(&self, vote: NewVote) {
        self.tables.lock().await.competing_insert = Some(vote);
    }

    fn check_unique(&self, tables: &Tables, vote: &NewVote) -> Result<(), StoreError> {
        if self.mode != UniqueMode::Absent
            && tables.position(vote.poll_id, &vote.voter_token).is_some()
        {
            return Err(StoreError::UniqueViolation(format!(
                "key (poll_id, voter_token)=({}, {}) already exists",
                vote.poll_id, vote.voter_token
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl VoteBackend for MemoryStore {
    async fn find_polls(
        &self,
        public_token: &str,
        room_token: Option<&str>,
    ) -> Result<Vec<Poll>, StoreError> {
        let mut tables = self.tables.lock().await;
        tables.take_fault(StoreOp::FindPolls)?;

        Ok(tables
            .polls
            .iter()
            .filter(|p| p.public_token == public_token)
            .filter(|p| room_token.is_none() || p.room_token.as_deref() == room_token)
            .cloned()
            .collect())
    }

    async fn list_votes(&self, poll_id: PollId) -> Result<Vec<Vote>, StoreError> {
        let mut tables = self.tables.lock().await;
        tables.take_fault(StoreOp::ListVotes)?;

        Ok(tables
            .votes
            .iter()
            .filter(|v| v.poll_id == poll_id)
            .cloned()
            .collect())
    }

    async fn upsert_vote(
        &self,
        vote: &NewVote,
        target: &ConflictTarget,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.take_fault(StoreOp::UpsertVote)?;

        if self.mode != UniqueMode::Enforced || *target != ConflictTarget::POLL_VOTER {
            return Err(StoreError::NoConflictConstraint(format!(
                "there is no unique or exclusion constraint matching ({target})"
            )));
        }

        match tables.position(vote.poll_id, &vote.voter_token) {
            Some(idx) => {
                let row = &mut tables.votes[idx];
                row.choice = vote.choice.clone();
                row.updated_at = vote.updated_at;
            }
            None => {
                tables.push(vote);
            }
        }
        Ok(())
    }

    async fn find_vote(
        &self,
        poll_id: PollId,
        voter_token: &str,
    ) -> Result<Option<ExistingVote>, StoreError> {
        let mut tables = self.tables.lock().await;
        tables.take_fault(StoreOp::FindVote)?;

        Ok(tables.position(poll_id, voter_token).map(|idx| {
            let row = &tables.votes[idx];
            ExistingVote {
                id: row.id,
                choice: row.choice.clone(),
            }
        }))
    }

    async fn update_vote_choice(
        &self,
        id: VoteId,
        choice: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.take_fault(StoreOp::UpdateVote)?;

        let row = tables
            .votes
            .iter_mut()
            .find(|v| v.id == id)
            .ok_or_else(|| StoreError::Backend(format!("vote {id} no longer exists")))?;
        row.choice = choice.to_string();
        row.updated_at = updated_at;
        Ok(())
    }

    async fn insert_vote(&self, vote: &NewVote) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.take_fault(StoreOp::InsertVote)?;

        if let Some(competitor) = tables.competing_insert.take() {
            self.check_unique(&tables, &competitor)?;
            tables.push(&competitor);
        }

        self.check_unique(&tables, vote)?;
        tables.push(vote);
        Ok(())
    }
}
