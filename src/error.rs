// error.rs
use thiserror::Error;

use crate::models::PollId;

/// SQLSTATE raised by PostgreSQL when no unique index matches an ON CONFLICT target.
pub const SQLSTATE_NO_CONFLICT_CONSTRAINT: &str = "42P10";
/// SQLSTATE for `unique_violation`.
pub const SQLSTATE_UNIQUE_VIOLATION: &str = "23505";

/// Failures reported by a [`VoteBackend`](crate::store::VoteBackend).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("no unique constraint matches the conflict target: {0}")]
    NoConflictConstraint(String),

    #[error("duplicate key: {0}")]
    UniqueViolation(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// True for the class of failures that sends the submitter down the fallback path.
    pub fn is_constraint_mismatch(&self) -> bool {
        matches!(
            self,
            StoreError::NoConflictConstraint(_) | StoreError::UniqueViolation(_)
        )
    }

    pub(crate) fn from_sqlstate(code: Option<&str>, message: String) -> Self {
        match code {
            Some(SQLSTATE_NO_CONFLICT_CONSTRAINT) => StoreError::NoConflictConstraint(message),
            Some(SQLSTATE_UNIQUE_VIOLATION) => StoreError::UniqueViolation(message),
            _ => StoreError::Backend(message),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => {
                StoreError::from_sqlstate(db.code().as_deref(), db.message().to_string())
            }
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    #[error("no poll found for public token {public_token:?}")]
    NotFound {
        public_token: String,
        room_token: Option<String>,
    },

    #[error("{count} polls match public token {public_token:?}")]
    Ambiguous { public_token: String, count: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenStoreError {
    #[error("token storage unavailable: {0}")]
    Unavailable(String),
}

/// Storage failure captured during a submission.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("vote was not recorded: {0}")]
    Write(StoreError),

    #[error("vote recorded but votes could not be refreshed: {0}")]
    Refresh(StoreError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("poll not loaded")]
    PollNotLoaded,

    #[error("choice must not be empty")]
    EmptyChoice,

    #[error("votes for poll {poll_id} could not be fetched: {source}")]
    Refresh { poll_id: PollId, source: StoreError },

    #[error(transparent)]
    Poll(#[from] PollError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlstate_classification() {
        let err = StoreError::from_sqlstate(Some("42P10"), "no unique".into());
        assert_eq!(err, StoreError::NoConflictConstraint("no unique".into()));
        assert!(err.is_constraint_mismatch());

        let err = StoreError::from_sqlstate(Some("23505"), "dup".into());
        assert_eq!(err, StoreError::UniqueViolation("dup".into()));
        assert!(err.is_constraint_mismatch());

        let err = StoreError::from_sqlstate(Some("42P01"), "no table".into());
        assert_eq!(err, StoreError::Backend("no table".into()));
        assert!(!err.is_constraint_mismatch());

        assert!(!StoreError::from_sqlstate(None, "io".into()).is_constraint_mismatch());
    }

    #[test]
    fn non_database_sqlx_errors_are_backend_errors() {
        let err: StoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, StoreError::Backend(_)));
    }
}
