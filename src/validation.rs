//! Validation for new polls and incoming votes.
//!
//! Tallying tolerates stale or unknown ids, so the strict checks happen here,
//! before anything is stored.

use crate::models::{Ballot, Candidate, VotingMethod};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

pub const MIN_RATING: i64 = 1;
pub const MAX_RATING: i64 = 5;
pub const MIN_POLL_MOVIES: usize = 2;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    #[error("Title is required")]
    MissingTitle,
    #[error("At least 2 movies required")]
    TooFewMovies,
}

/// Check a new poll's title and movie list, returning the trimmed title.
pub fn validate_poll<'a>(title: &'a str, movies: &[Candidate]) -> Result<&'a str, PollError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(PollError::MissingTitle);
    }
    if movies.len() < MIN_POLL_MOVIES {
        return Err(PollError::TooFewMovies);
    }
    Ok(title)
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BallotError {
    #[error("Approval vote must be an array")]
    ApprovalNotArray,
    #[error("Must approve at least one movie")]
    NothingApproved,
    #[error("Invalid movie ID in vote")]
    InvalidApproval,
    #[error("Single vote must be a string")]
    SingleNotString,
    #[error("Invalid movie ID")]
    InvalidChoice,
    #[error("Ranked vote must be an array")]
    RankedNotArray,
    #[error("Must rank all movies")]
    IncompleteRanking,
    #[error("Invalid movie ID in ranking")]
    InvalidRanking,
    #[error("Duplicate movie in ranking")]
    DuplicateRanking,
    #[error("Rating vote must be an object")]
    RatingNotObject,
    #[error("Must rate all movies")]
    IncompleteRatings,
    #[error("Invalid movie ID in ratings")]
    InvalidRatingId,
    #[error("Ratings must be integers from 1 to 5")]
    RatingOutOfRange,
}

/// Check raw vote data against the poll's method and movie ids, returning
/// the typed ballot on success.
pub fn validate_vote_data(
    vote_data: &Value,
    method: VotingMethod,
    valid_ids: &HashSet<&str>,
) -> Result<Ballot, BallotError> {
    match method {
        VotingMethod::Approval => {
            let items = vote_data.as_array().ok_or(BallotError::ApprovalNotArray)?;
            if items.is_empty() {
                return Err(BallotError::NothingApproved);
            }
            let ids = valid_id_list(items, valid_ids).ok_or(BallotError::InvalidApproval)?;
            Ok(Ballot::Ids(ids))
        }
        VotingMethod::Single => {
            let id = vote_data.as_str().ok_or(BallotError::SingleNotString)?;
            if !valid_ids.contains(id) {
                return Err(BallotError::InvalidChoice);
            }
            Ok(Ballot::Choice(id.to_string()))
        }
        VotingMethod::Ranked => {
            let items = vote_data.as_array().ok_or(BallotError::RankedNotArray)?;
            if items.len() != valid_ids.len() {
                return Err(BallotError::IncompleteRanking);
            }
            let ids = valid_id_list(items, valid_ids).ok_or(BallotError::InvalidRanking)?;
            let mut seen = HashSet::new();
            if !ids.iter().all(|id| seen.insert(id.as_str())) {
                return Err(BallotError::DuplicateRanking);
            }
            Ok(Ballot::Ids(ids))
        }
        VotingMethod::Rating => {
            let entries = vote_data.as_object().ok_or(BallotError::RatingNotObject)?;
            if entries.len() != valid_ids.len() {
                return Err(BallotError::IncompleteRatings);
            }
            let mut scores = HashMap::with_capacity(entries.len());
            for (id, rating) in entries {
                if !valid_ids.contains(id.as_str()) {
                    return Err(BallotError::InvalidRatingId);
                }
                let score = rating
                    .as_i64()
                    .filter(|r| (MIN_RATING..=MAX_RATING).contains(r))
                    .ok_or(BallotError::RatingOutOfRange)?;
                // Bounded to 1..=5 above
                scores.insert(id.clone(), score as i32);
            }
            Ok(Ballot::Scores(scores))
        }
    }
}

/// Every item must be a string naming a valid movie.
fn valid_id_list(items: &[Value], valid_ids: &HashSet<&str>) -> Option<Vec<String>> {
    items
        .iter()
        .map(|item| {
            item.as_str()
                .filter(|id| valid_ids.contains(id))
                .map(str::to_string)
        })
        .collect()
}
