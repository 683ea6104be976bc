// session.rs
use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::info;

use crate::error::SessionError;
use crate::identity::{TokenStore, VoterIdentityProvider};
use crate::models::{IssuedToken, Poll, Vote};
use crate::poll::PollDataAccess;
use crate::routes::PollRoute;
use crate::store::VoteBackend;
use crate::submit::{SubmitOutcome, VoteSubmitter};

/// The poll a client is looking at, plus the latest votes it has seen.
pub struct PollSession<B, S, R = OsRng> {
    access: PollDataAccess<B>,
    submitter: VoteSubmitter<B>,
    identity: VoterIdentityProvider<S, R>,
    poll: Option<Poll>,
    votes: Vec<Vote>,
}

impl<B: VoteBackend, S: TokenStore> PollSession<B, S> {
    pub fn new(backend: Arc<B>, tokens: S) -> Self {
        Self::with_identity(backend, VoterIdentityProvider::new(tokens))
    }
}

impl<B, S, R> PollSession<B, S, R>
where
    B: VoteBackend,
    S: TokenStore,
    R: RngCore,
{
    pub fn with_identity(backend: Arc<B>, identity: VoterIdentityProvider<S, R>) -> Self {
        let access = PollDataAccess::new(backend);
        Self {
            submitter: VoteSubmitter::new(access.clone()),
            access,
            identity,
            poll: None,
            votes: Vec::new(),
        }
    }

    pub fn poll(&self) -> Option<&Poll> {
        self.poll.as_ref()
    }

    pub fn votes(&self) -> &[Vote] {
        &self.votes
    }

    /// Load a poll and its votes, replacing whatever was loaded before.
    pub async fn load(
        &mut self,
        public_token: &str,
        room_token: Option<&str>,
    ) -> Result<&Poll, SessionError> {
        let poll = self.access.fetch_poll(public_token, room_token).await?;
        let votes = self
            .access
            .fetch_votes(poll.id)
            .await
            .map_err(|source| SessionError::Refresh {
                poll_id: poll.id,
                source,
            })?;

        info!(poll_id = poll.id, votes = votes.len(), "Poll session loaded");
        self.votes = votes;
        Ok(self.poll.insert(poll))
    }

    pub async fn load_route(&mut self, route: &PollRoute) -> Result<&Poll, SessionError> {
        self.load(&route.public_token, route.room_token.as_deref())
            .await
    }

    /// Re-fetch votes. Empty when no poll is loaded; the old votes are kept on error.
    pub async fn refresh_votes(&mut self) -> Result<&[Vote], SessionError> {
        let Some(poll) = &self.poll else {
            self.votes.clear();
            return Ok(&self.votes);
        };

        self.votes = self
            .access
            .fetch_votes(poll.id)
            .await
            .map_err(|source| SessionError::Refresh {
                poll_id: poll.id,
                source,
            })?;
        Ok(&self.votes)
    }

    /// This client's token for the loaded poll, created on first use.
    pub fn current_voter_token(&self) -> Option<IssuedToken> {
        self.poll
            .as_ref()
            .map(|poll| self.identity.get_or_create_token(poll.id))
    }

    /// The loaded vote belonging to this client, if it has voted.
    pub fn my_vote(&self) -> Option<&Vote> {
        let issued = self.current_voter_token()?;
        self.votes
            .iter()
            .find(|v| v.voter_token == issued.token.as_str())
    }

    /// Cast or overwrite this client's vote.
    ///
    /// Fails fast before any I/O when no poll is loaded or `choice` is blank.
    /// Non-blank choices are written as given.
    /// Storage failures are returned inside the outcome, and the session keeps
    /// the votes the outcome reports.
    pub async fn cast_vote(&mut self, choice: &str) -> Result<SubmitOutcome, SessionError> {
        let poll = self.poll.as_ref().ok_or(SessionError::PollNotLoaded)?;
        if choice.trim().is_empty() {
            return Err(SessionError::EmptyChoice);
        }

        let outcome = self
            .submitter
            .submit(poll, choice, &self.identity, &self.votes)
            .await;
        self.votes = outcome.votes.clone();
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::error::{PollError, StoreError};
    use crate::identity::MemoryTokenStore;
    use crate::memory::{MemoryStore, StoreOp, UniqueMode};

    async fn session() -> (Arc<MemoryStore>, PollSession<MemoryStore, MemoryTokenStore>) {
        let store = Arc::new(MemoryStore::new(UniqueMode::Enforced));
        store
            .add_poll(Poll {
                id: 1,
                public_token: "abc".into(),
                room_token: Some("room".into()),
                title: "Friday lunch".into(),
                description: Some("pick one".into()),
                created_at: Utc::now(),
            })
            .await;
        let session = PollSession::new(Arc::clone(&store), MemoryTokenStore::new());
        (store, session)
    }

    #[tokio::test]
    async fn operations_before_load() {
        let (_, mut session) = session().await;

        assert!(session.current_voter_token().is_none());
        assert!(session.refresh_votes().await.unwrap().is_empty());
        assert_eq!(session.cast_vote("A").await.unwrap_err(), SessionError::PollNotLoaded);
    }

    #[tokio::test]
    async fn blank_choice_is_rejected() {
        let (store, mut session) = session().await;
        session.load("abc", None).await.unwrap();

        assert_eq!(session.cast_vote("  ").await.unwrap_err(), SessionError::EmptyChoice);
        assert!(store.vote_rows().await.is_empty());
    }

    #[tokio::test]
    async fn choice_is_written_as_given() {
        let (store, mut session) = session().await;
        session.load("abc", None).await.unwrap();

        session.cast_vote(" Thai ").await.unwrap();

        assert_eq!(store.vote_rows().await[0].choice, " Thai ");
    }

    #[tokio::test]
    async fn load_route_respects_room() {
        let (_, mut session) = session().await;

        let route: PollRoute = "/r/other/p/abc".parse().unwrap();
        assert!(matches!(
            session.load_route(&route).await,
            Err(SessionError::Poll(PollError::NotFound { .. }))
        ));

        let route: PollRoute = "/r/room/p/abc/results".parse().unwrap();
        assert_eq!(session.load_route(&route).await.unwrap().id, 1);
    }

    #[tokio::test]
    async fn cast_vote_republishes_votes() {
        let (_, mut session) = session().await;
        session.load("abc", Some("room")).await.unwrap();

        let outcome = session.cast_vote("pizza").await.unwrap();

        assert!(outcome.is_ok());
        assert_eq!(session.votes().len(), 1);
        let mine = session.my_vote().unwrap();
        assert_eq!(mine.choice, "pizza");
        assert_eq!(mine.room_token.as_deref(), Some("room"));
        assert_eq!(
            session.current_voter_token().unwrap().token,
            outcome.voter.token
        );
    }

    #[tokio::test]
    async fn refresh_error_keeps_snapshot() {
        let (store, mut session) = session().await;
        session.load("abc", None).await.unwrap();
        session.cast_vote("A").await.unwrap();

        store
            .fail_next(StoreOp::ListVotes, StoreError::Backend("gone".into()))
            .await;

        assert!(matches!(
            session.refresh_votes().await,
            Err(SessionError::Refresh { poll_id: 1, .. })
        ));
        assert_eq!(session.votes().len(), 1);
    }
}
