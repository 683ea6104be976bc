// handlers.rs
use rand::RngCore;
use serde_json::{json, Value};

use crate::error::SessionError;
use crate::identity::TokenStore;
use crate::routes::{PollRoute, RouteView};
use crate::session::PollSession;
use crate::store::VoteBackend;

/// Poll details and votes for a route; the voter's own vote on vote pages.
pub async fn show<B, S, R>(
    session: &mut PollSession<B, S, R>,
    route: &PollRoute,
) -> Result<Value, SessionError>
where
    B: VoteBackend,
    S: TokenStore,
    R: RngCore,
{
    let poll = session.load_route(route).await?.clone();

    Ok(match route.view {
        RouteView::Results => json!({
            "poll": poll,
            "votes": session.votes(),
        }),
        RouteView::Vote => json!({
            "poll": poll,
            "votes": session.votes(),
            "your_vote": session.my_vote().map(|v| &v.choice),
        }),
    })
}

/// Cast a vote and report the refreshed votes, or the failure inline.
pub async fn vote<B, S, R>(
    session: &mut PollSession<B, S, R>,
    route: &PollRoute,
    choice: &str,
) -> Result<Value, SessionError>
where
    B: VoteBackend,
    S: TokenStore,
    R: RngCore,
{
    session.load_route(route).await?;
    let outcome = session.cast_vote(choice).await?;
    let status = if outcome.is_ok() { "recorded" } else { "failed" };

    Ok(json!({
        "status": status,
        "error": outcome.error.as_ref().map(|e| e.to_string()),
        "path": outcome.path,
        "voter": outcome.voter,
        "votes": outcome.votes,
    }))
}

/// The voter token this device uses for a poll.
pub async fn token<B, S, R>(
    session: &mut PollSession<B, S, R>,
    route: &PollRoute,
) -> Result<Value, SessionError>
where
    B: VoteBackend,
    S: TokenStore,
    R: RngCore,
{
    let poll_id = session.load_route(route).await?.id;

    Ok(json!({
        "poll_id": poll_id,
        "voter": session.current_voter_token(),
    }))
}
