// routes.rs
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Page a route points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteView {
    Vote,
    Results,
}

/// A parsed poll path:
///
/// - `/p/:public_token`
/// - `/p/:public_token/results`
/// - `/r/:room_token/p/:public_token`
/// - `/r/:room_token/p/:public_token/results`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollRoute {
    pub public_token: String,
    pub room_token: Option<String>,
    pub view: RouteView,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("not a poll route: {0:?}")]
pub struct RouteError(pub String);

impl FromStr for PollRoute {
    type Err = RouteError;

    fn from_str(path: &str) -> Result<Self, Self::Err> {
        let invalid = || RouteError(path.to_string());

        let trimmed = path.strip_prefix('/').ok_or_else(invalid)?;
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
        let segments: Vec<&str> = trimmed.split('/').collect();

        if segments.iter().any(|s| s.is_empty()) {
            return Err(invalid());
        }

        let (room_token, rest) = match segments.as_slice() {
            ["r", room, rest @ ..] => (Some(room.to_string()), rest),
            rest => (None, rest),
        };

        let (public_token, view) = match rest {
            ["p", token] => (token, RouteView::Vote),
            ["p", token, "results"] => (token, RouteView::Results),
            _ => return Err(invalid()),
        };

        Ok(PollRoute {
            public_token: public_token.to_string(),
            room_token,
            view,
        })
    }
}

impl fmt::Display for PollRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(room) = &self.room_token {
            write!(f, "/r/{room}")?;
        }
        write!(f, "/p/{}", self.public_token)?;
        if self.view == RouteView::Results {
            f.write_str("/results")?;
        }
        Ok(())
    }
}
