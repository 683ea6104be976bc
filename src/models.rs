// models.rs
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type PollId = i64;
pub type VoteId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Poll {
    pub id: PollId,
    pub public_token: String,
    pub room_token: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Vote {
    pub id: VoteId,
    pub poll_id: PollId,
    pub voter_token: String,
    pub room_token: Option<String>,
    pub choice: String,
    pub updated_at: DateTime<Utc>,
}

/// Row payload written by the upsert and the fallback insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewVote {
    pub poll_id: PollId,
    pub voter_token: String,
    pub room_token: Option<String>,
    pub choice: String,
    pub updated_at: DateTime<Utc>,
}

impl NewVote {
    /// Build the payload for `poll`, carrying its room token when the poll is room-scoped.
    pub fn for_poll(poll: &Poll, voter: &VoterToken, choice: &str) -> Self {
        Self {
            poll_id: poll.id,
            voter_token: voter.as_str().to_string(),
            room_token: poll.room_token.clone(),
            choice: choice.to_string(),
            updated_at: Utc::now(),
        }
    }
}

/// The `(id, choice)` projection selected by the fallback existence check.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ExistingVote {
    pub id: VoteId,
    pub choice: String,
}

/// Opaque per-poll voter identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoterToken(String);

impl VoterToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VoterToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether an issued token survives past the current process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Persistence {
    /// Read back from durable storage.
    Stored,
    /// Freshly generated and written to durable storage.
    Created,
    /// Generated but the store refused it; a later lookup may yield a different token.
    Ephemeral,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedToken {
    pub token: VoterToken,
    pub persistence: Persistence,
}

impl IssuedToken {
    pub fn is_ephemeral(&self) -> bool {
        self.persistence == Persistence::Ephemeral
    }
}

/// Column set an upsert uses to detect an existing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictTarget(&'static [&'static str]);

impl ConflictTarget {
    pub const POLL_VOTER: ConflictTarget = ConflictTarget(&["poll_id", "voter_token"]);

    pub fn columns(&self) -> &'static [&'static str] {
        self.0
    }
}

impl fmt::Display for ConflictTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poll(room_token: Option<&str>) -> Poll {
        Poll {
            id: 7,
            public_token: "pub".into(),
            room_token: room_token.map(str::to_string),
            title: "Lunch".into(),
            description: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn conflict_target_is_comma_joined() {
        assert_eq!(ConflictTarget::POLL_VOTER.to_string(), "poll_id,voter_token");
    }

    #[test]
    fn new_vote_copies_room_token() {
        let voter = VoterToken::new("abc");
        let scoped = NewVote::for_poll(&poll(Some("room-1")), &voter, "A");
        assert_eq!(scoped.room_token.as_deref(), Some("room-1"));
        assert_eq!(scoped.poll_id, 7);
        assert_eq!(scoped.voter_token, "abc");

        let open = NewVote::for_poll(&poll(None), &voter, "A");
        assert!(open.room_token.is_none());
    }
}
