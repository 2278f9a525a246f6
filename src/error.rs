use crate::validation::{BallotError, PollError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid stored data: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid vote: {0}")]
    InvalidBallot(#[from] BallotError),

    #[error("Invalid poll: {0}")]
    InvalidPoll(#[from] PollError),

    #[error("Poll not found: {0}")]
    PollNotFound(String),

    #[error("Unknown voting method: {0}")]
    UnknownVotingMethod(String),

    #[error("Invalid timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("Metadata lookup failed: {0}")]
    Lookup(String),
}

pub type Result<T> = std::result::Result<T, Error>;
