//! Vote tallying and poster lookup for movie-night polls.

pub mod config;
pub mod db;
pub mod error;
pub mod format;
pub mod models;
pub mod posters;
pub mod search_terms;
pub mod tasks;
pub mod validation;
pub mod voting;

pub use error::{Error, Result};
pub use models::{Ballot, Candidate, Poll, VotingMethod};
pub use voting::{tally, PollResults};
