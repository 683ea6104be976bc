//! Anonymous, overwritable poll voting.
//!
//! Each device holds one voter token per poll and every vote it casts is
//! written so that a `(poll, voter token)` pair owns at most one row. The write
//! prefers a single upsert and falls back to select-then-update-or-insert on
//! stores that lack a targetable unique index; see [`submit`] for the caveats.
//!
//! [`session::PollSession`] ties the pieces together for a caller.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod memory;
pub mod models;
pub mod poll;
pub mod routes;
pub mod session;
pub mod store;
pub mod submit;

pub use error::{PollError, SessionError, StoreError, SubmitError, TokenStoreError};
pub use models::{IssuedToken, Persistence, Poll, Vote, VoterToken};
pub use session::PollSession;
pub use submit::{SubmitOutcome, WritePath};

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global `tracing` subscriber, writing to stderr.
///
/// `RUST_LOG` overrides the default `poll_vote=info` filter.
pub fn init_tracing() {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("poll_vote=info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
