// submit.rs
//! Idempotent vote submission.
//!
//! A vote is written with one upsert on the `(poll_id, voter_token)` conflict
//! target. That is race-free only when the store has a unique index it can
//! target. Stores without one reject the upsert with a constraint-mismatch
//! error, and the submitter falls back to select-then-update-or-insert.
//!
//! The fallback has a check-to-use window: two concurrent first votes from the
//! same token can both see no row and both insert. If a unique index exists
//! underneath (just not one the upsert can name), the losing insert fails with
//! a unique violation and is retried once as an update. With no index at all
//! both inserts succeed. Closing that gap needs a backend constraint, which is
//! what the bundled migration creates.
use rand::RngCore;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{StoreError, SubmitError};
use crate::identity::{TokenStore, VoterIdentityProvider};
use crate::models::{ConflictTarget, IssuedToken, NewVote, Poll, Vote, VoteId};
use crate::poll::PollDataAccess;
use crate::store::VoteBackend;

/// Existence re-checks allowed after a fallback insert loses a race.
const MAX_RECHECKS: u8 = 1;

/// The write that committed a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePath {
    Upsert,
    FallbackUpdate,
    FallbackInsert,
}

#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    /// Votes after the submission, or the last known votes when they could not be fetched.
    pub votes: Vec<Vote>,
    pub error: Option<SubmitError>,
    pub path: Option<WritePath>,
    pub voter: IssuedToken,
}

impl SubmitOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug)]
enum Step {
    AttemptAtomicUpsert,
    CheckExisting,
    UpdateExisting(VoteId),
    InsertNew,
    Refresh(WritePath),
    Failed(StoreError),
}

pub struct VoteSubmitter<B> {
    access: PollDataAccess<B>,
}

impl<B: VoteBackend> VoteSubmitter<B> {
    pub fn new(access: PollDataAccess<B>) -> Self {
        Self { access }
    }

    /// Record `choice` as this client's vote on `poll`.
    ///
    /// Storage failures never escape: they come back in
    /// [`SubmitOutcome::error`] with `votes` falling back to `last_known`.
    pub async fn submit<S, R>(
        &self,
        poll: &Poll,
        choice: &str,
        identity: &VoterIdentityProvider<S, R>,
        last_known: &[Vote],
    ) -> SubmitOutcome
    where
        S: TokenStore,
        R: RngCore,
    {
        let voter = identity.get_or_create_token(poll.id);
        let payload = NewVote::for_poll(poll, &voter.token, choice);
        let backend = self.access.backend();
        let mut rechecks_left = MAX_RECHECKS;
        let mut step = Step::AttemptAtomicUpsert;

        loop {
            debug!(poll_id = poll.id, ?step, "Vote submission step");

            step = match step {
                Step::AttemptAtomicUpsert => {
                    match backend
                        .upsert_vote(&payload, &ConflictTarget::POLL_VOTER)
                        .await
                    {
                        Ok(()) => Step::Refresh(WritePath::Upsert),
                        Err(e) if e.is_constraint_mismatch() => {
                            warn!(
                                poll_id = poll.id,
                                error = %e,
                                "Upsert rejected, falling back to check-then-write"
                            );
                            Step::CheckExisting
                        }
                        Err(e) => Step::Failed(e),
                    }
                }
                Step::CheckExisting => {
                    match backend.find_vote(poll.id, &payload.voter_token).await {
                        Ok(Some(existing)) => Step::UpdateExisting(existing.id),
                        Ok(None) => Step::InsertNew,
                        Err(e) => Step::Failed(e),
                    }
                }
                Step::UpdateExisting(id) => {
                    match backend
                        .update_vote_choice(id, &payload.choice, payload.updated_at)
                        .await
                    {
                        Ok(()) => Step::Refresh(WritePath::FallbackUpdate),
                        Err(e) => Step::Failed(e),
                    }
                }
                Step::InsertNew => match backend.insert_vote(&payload).await {
                    Ok(()) => Step::Refresh(WritePath::FallbackInsert),
                    Err(e @ StoreError::UniqueViolation(_)) if rechecks_left > 0 => {
                        rechecks_left -= 1;
                        warn!(
                            poll_id = poll.id,
                            error = %e,
                            "Concurrent vote for the same token, checking again"
                        );
                        Step::CheckExisting
                    }
                    Err(e) => Step::Failed(e),
                },
                Step::Refresh(path) => {
                    info!(poll_id = poll.id, ?path, "Vote recorded");
                    return match self.access.fetch_votes(poll.id).await {
                        Ok(votes) => SubmitOutcome {
                            votes,
                            error: None,
                            path: Some(path),
                            voter,
                        },
                        Err(e) => {
                            warn!(poll_id = poll.id, error = %e, "Could not refresh votes");
                            SubmitOutcome {
                                votes: last_known.to_vec(),
                                error: Some(SubmitError::Refresh(e)),
                                path: Some(path),
                                voter,
                            }
                        }
                    };
                }
                Step::Failed(e) => {
                    warn!(poll_id = poll.id, error = %e, "Vote submission failed");
                    let votes = match self.access.fetch_votes(poll.id).await {
                        Ok(votes) => votes,
                        Err(_) => last_known.to_vec(),
                    };
                    return SubmitOutcome {
                        votes,
                        error: Some(SubmitError::Write(e)),
                        path: None,
                        voter,
                    };
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::identity::MemoryTokenStore;
    use crate::memory::{MemoryStore, StoreOp, UniqueMode};

    fn poll() -> Poll {
        Poll {
            id: 1,
            public_token: "pub".into(),
            room_token: None,
            title: "Best editor".into(),
            description: None,
            created_at: Utc::now(),
        }
    }

    fn submitter(mode: UniqueMode) -> VoteSubmitter<MemoryStore> {
        VoteSubmitter::new(PollDataAccess::new(Arc::new(MemoryStore::new(mode))))
    }

    #[tokio::test]
    async fn upsert_path_when_index_is_targetable() {
        let submitter = submitter(UniqueMode::Enforced);
        let identity = VoterIdentityProvider::new(MemoryTokenStore::new());

        let outcome = submitter.submit(&poll(), "A", &identity, &[]).await;

        assert!(outcome.is_ok());
        assert_eq!(outcome.path, Some(WritePath::Upsert));
        assert_eq!(outcome.votes.len(), 1);
        assert_eq!(outcome.votes[0].voter_token, outcome.voter.token.as_str());
    }

    #[tokio::test]
    async fn backend_error_on_upsert_skips_fallback() {
        let submitter = submitter(UniqueMode::Enforced);
        let identity = VoterIdentityProvider::new(MemoryTokenStore::new());
        let backend = submitter.access.backend();
        backend
            .fail_next(StoreOp::UpsertVote, StoreError::Backend("timeout".into()))
            .await;

        let outcome = submitter.submit(&poll(), "A", &identity, &[]).await;

        assert_eq!(
            outcome.error,
            Some(SubmitError::Write(StoreError::Backend("timeout".into())))
        );
        assert_eq!(outcome.path, None);
        assert!(backend.vote_rows().await.is_empty());
    }

    #[tokio::test]
    async fn failed_check_is_reported() {
        let submitter = submitter(UniqueMode::Absent);
        let identity = VoterIdentityProvider::new(MemoryTokenStore::new());
        submitter
            .access
            .backend()
            .fail_next(StoreOp::FindVote, StoreError::Backend("reset".into()))
            .await;

        let outcome = submitter.submit(&poll(), "A", &identity, &[]).await;

        assert!(matches!(outcome.error, Some(SubmitError::Write(_))));
        assert!(outcome.votes.is_empty());
    }

    #[tokio::test]
    async fn failure_keeps_last_known_votes_when_refresh_also_fails() {
        let submitter = submitter(UniqueMode::Enforced);
        let identity = VoterIdentityProvider::new(MemoryTokenStore::new());
        let first = submitter.submit(&poll(), "A", &identity, &[]).await;

        let backend = submitter.access.backend();
        backend
            .fail_next(StoreOp::UpsertVote, StoreError::Backend("down".into()))
            .await;
        backend
            .fail_next(StoreOp::ListVotes, StoreError::Backend("down".into()))
            .await;

        let outcome = submitter.submit(&poll(), "B", &identity, &first.votes).await;

        assert!(matches!(outcome.error, Some(SubmitError::Write(_))));
        assert_eq!(outcome.votes, first.votes);
    }

    #[tokio::test]
    async fn duplicate_key_on_upsert_takes_fallback() {
        let submitter = submitter(UniqueMode::Enforced);
        let identity = VoterIdentityProvider::new(MemoryTokenStore::new());
        let backend = submitter.access.backend();
        let first = submitter.submit(&poll(), "A", &identity, &[]).await;
        assert_eq!(first.path, Some(WritePath::Upsert));

        backend
            .fail_next(
                StoreOp::UpsertVote,
                StoreError::UniqueViolation("votes_poll_id_voter_token_key".into()),
            )
            .await;
        let outcome = submitter.submit(&poll(), "B", &identity, &first.votes).await;

        assert!(outcome.is_ok());
        assert_eq!(outcome.path, Some(WritePath::FallbackUpdate));
        let rows = backend.vote_rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].choice, "B");
    }

    #[tokio::test]
    async fn refresh_failure_after_commit() {
        let submitter = submitter(UniqueMode::Enforced);
        let identity = VoterIdentityProvider::new(MemoryTokenStore::new());
        let backend = submitter.access.backend();
        backend
            .fail_next(StoreOp::ListVotes, StoreError::Backend("down".into()))
            .await;

        let outcome = submitter.submit(&poll(), "A", &identity, &[]).await;

        assert_eq!(outcome.path, Some(WritePath::Upsert));
        assert!(matches!(outcome.error, Some(SubmitError::Refresh(_))));
        assert!(outcome.votes.is_empty());
        assert_eq!(backend.vote_rows().await.len(), 1);
    }
}
