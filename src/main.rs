use log::{error, info};
use movie_poll::config::Config;
use movie_poll::db::Database;
use movie_poll::format::format_votes;
use movie_poll::tasks::snapshot;
use movie_poll::{Error, Result};
use std::env;
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    env_logger::init();
    let config = Config::from_env();

    let database = match Database::new(&config.database_url).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let poll_ids: Vec<String> = env::args().skip(1).collect();
    if poll_ids.is_empty() {
        info!("No poll ids given, running snapshot task");
        snapshot::run(database, config.snapshot_interval).await;
        return ExitCode::SUCCESS;
    }

    let mut status = ExitCode::SUCCESS;
    for poll_id in &poll_ids {
        if let Err(e) = print_results(&database, poll_id).await {
            error!("Failed to report poll {}: {}", poll_id, e);
            status = ExitCode::FAILURE;
        }
    }
    status
}

async fn print_results(database: &Database, poll_id: &str) -> Result<()> {
    let (poll, results, ballot_count) = database
        .load_results(poll_id)
        .await?
        .ok_or_else(|| Error::PollNotFound(poll_id.to_string()))?;

    println!("# {} ({} vote)", poll.title, poll.voting_method);
    for movie in &poll.movies {
        match movie.votes {
            Some(votes) => println!("- {} ({}), {} votes on IMDb", movie.title, movie.year, format_votes(votes)),
            None => println!("- {} ({})", movie.title, movie.year),
        }
    }
    println!();
    println!("{}", results.summary(&poll.movies, ballot_count));
    println!();
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
