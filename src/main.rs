// src/main.rs
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info};

use poll_vote::config::{Config, ConfigError};
use poll_vote::db::{self, PgStore};
use poll_vote::handlers;
use poll_vote::identity::{DisabledTokenStore, FileTokenStore, TokenStore};
use poll_vote::routes::{PollRoute, RouteError};
use poll_vote::{init_tracing, PollSession, SessionError};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Do not persist voter tokens; every run votes as a new voter
    #[arg(long, global = true)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(flatten)]
    Poll(PollCommand),
    /// Create the polls and votes tables
    Migrate,
}

#[derive(Subcommand, Debug)]
enum PollCommand {
    /// Show a poll and its votes, e.g. `/p/abc` or `/r/room/p/abc/results`
    Show { route: String },
    /// Cast or change this device's vote
    Vote { route: String, choice: String },
    /// Print this device's voter token for a poll
    Token { route: String },
}

#[derive(Error, Debug)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("could not encode output: {0}")]
    Output(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();

    run(args).await.inspect_err(|e| error!("{e}"))
}

async fn run(args: Args) -> Result<(), AppError> {
    let config = Config::from_env()?;
    let pool = db::create_pool(&config).await?;

    let command = match args.command {
        Command::Migrate => {
            db::run_migrations(&pool).await?;
            info!("Migrations applied");
            return Ok(());
        }
        Command::Poll(command) => command,
    };

    let backend = Arc::new(PgStore::new(pool));

    let output = if args.ephemeral {
        dispatch(PollSession::new(backend, DisabledTokenStore), command).await?
    } else {
        let tokens = FileTokenStore::new(&config.token_store_path);
        info!(path = %tokens.path().display(), "Using voter token store");
        dispatch(PollSession::new(backend, tokens), command).await?
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn dispatch<S: TokenStore>(
    mut session: PollSession<PgStore, S>,
    command: PollCommand,
) -> Result<Value, AppError> {
    let output = match command {
        PollCommand::Show { route } => {
            handlers::show(&mut session, &route.parse::<PollRoute>()?).await?
        }
        PollCommand::Vote { route, choice } => {
            handlers::vote(&mut session, &route.parse::<PollRoute>()?, &choice).await?
        }
        PollCommand::Token { route } => {
            handlers::token(&mut session, &route.parse::<PollRoute>()?).await?
        }
    };

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_is_not_a_poll_command() {
        let args = Args::try_parse_from(["poll-vote", "migrate"]).unwrap();
        assert!(matches!(args.command, Command::Migrate));
    }

    #[test]
    fn vote_parses_route_and_choice() {
        let args = Args::try_parse_from(["poll-vote", "--ephemeral", "vote", "/p/tea", "tea"]).unwrap();
        assert!(args.ephemeral);
        match args.command {
            Command::Poll(PollCommand::Vote { route, choice }) => {
                assert_eq!(route, "/p/tea");
                assert_eq!(choice, "tea");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
