// src/poll.rs
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{PollError, StoreError};
use crate::models::{Poll, PollId, Vote};
use crate::store::VoteBackend;

/// Reads polls and their votes from a [`VoteBackend`].
pub struct PollDataAccess<B> {
    backend: Arc<B>,
}

impl<B> Clone for PollDataAccess<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: VoteBackend> PollDataAccess<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Resolve a poll by public token, only within `room_token` when one is given.
    pub async fn fetch_poll(
        &self,
        public_token: &str,
        room_token: Option<&str>,
    ) -> Result<Poll, PollError> {
        let mut polls = self.backend.find_polls(public_token, room_token).await?;

        match polls.len() {
            0 => Err(PollError::NotFound {
                public_token: public_token.to_string(),
                room_token: room_token.map(str::to_string),
            }),
            1 => {
                let poll = polls.remove(0);
                debug!(poll_id = poll.id, public_token, "Loaded poll");
                Ok(poll)
            }
            count => {
                warn!(public_token, count, "Public token matches several polls");
                Err(PollError::Ambiguous {
                    public_token: public_token.to_string(),
                    count,
                })
            }
        }
    }

    /// All votes for a poll in arrival order; empty when nobody has voted yet.
    pub async fn fetch_votes(&self, poll_id: PollId) -> Result<Vec<Vote>, StoreError> {
        let votes = self.backend.list_votes(poll_id).await?;
        debug!(poll_id, count = votes.len(), "Fetched votes");
        Ok(votes)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::memory::{MemoryStore, StoreOp, UniqueMode};

    fn poll(id: PollId, public_token: &str, room_token: Option<&str>) -> Poll {
        Poll {
            id,
            public_token: public_token.into(),
            room_token: room_token.map(str::to_string),
            title: format!("poll {id}"),
            description: None,
            created_at: Utc::now(),
        }
    }

    async fn access_with(polls: Vec<Poll>) -> PollDataAccess<MemoryStore> {
        let store = MemoryStore::new(UniqueMode::Enforced);
        for p in polls {
            store.add_poll(p).await;
        }
        PollDataAccess::new(Arc::new(store))
    }

    #[tokio::test]
    async fn fetch_poll_by_public_token() {
        let access = access_with(vec![poll(1, "abc", None), poll(2, "def", None)]).await;

        let found = access.fetch_poll("def", None).await.unwrap();
        assert_eq!(found.id, 2);
    }

    #[tokio::test]
    async fn room_token_narrows_lookup() {
        let access = access_with(vec![poll(1, "abc", Some("room-a"))]).await;

        assert_eq!(access.fetch_poll("abc", Some("room-a")).await.unwrap().id, 1);
        assert!(matches!(
            access.fetch_poll("abc", Some("room-b")).await,
            Err(PollError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn missing_poll_is_not_found() {
        let access = access_with(vec![]).await;

        let err = access.fetch_poll("nope", None).await.unwrap_err();
        assert_eq!(
            err,
            PollError::NotFound {
                public_token: "nope".into(),
                room_token: None,
            }
        );
    }

    #[tokio::test]
    async fn duplicate_public_tokens_are_ambiguous() {
        let access = access_with(vec![poll(1, "abc", None), poll(2, "abc", Some("r"))]).await;

        let err = access.fetch_poll("abc", None).await.unwrap_err();
        assert!(matches!(err, PollError::Ambiguous { count: 2, .. }));
    }

    #[tokio::test]
    async fn store_failure_is_reported() {
        let access = access_with(vec![poll(1, "abc", None)]).await;
        access
            .backend()
            .fail_next(StoreOp::FindPolls, StoreError::Backend("offline".into()))
            .await;

        assert!(matches!(
            access.fetch_poll("abc", None).await,
            Err(PollError::Store(StoreError::Backend(_)))
        ));
    }

    #[tokio::test]
    async fn no_votes_is_empty() {
        let access = access_with(vec![poll(1, "abc", None)]).await;
        assert!(access.fetch_votes(1).await.unwrap().is_empty());
    }
}
