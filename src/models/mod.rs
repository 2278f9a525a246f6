use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A movie entry in a poll. Identity is the external (IMDb) identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "imdbID")]
    pub id: String,
    pub title: String,
    pub year: String,
    #[serde(default)]
    pub poster: Option<String>,
    /// External popularity rating, only ever used to break ties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub votes: Option<u64>,
}

impl Candidate {
    pub fn new(id: impl Into<String>, title: impl Into<String>, year: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            year: year.into(),
            poster: None,
            rating: None,
            votes: None,
        }
    }

    pub fn with_rating(mut self, rating: f64) -> Self {
        self.rating = Some(rating);
        self
    }

    /// Rating used by the tie-break chain; unrated movies sort as 0.
    pub fn tie_break_rating(&self) -> f64 {
        self.rating.unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VotingMethod {
    Approval,
    Single,
    Ranked,
    Rating,
}

impl VotingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            VotingMethod::Approval => "approval",
            VotingMethod::Single => "single",
            VotingMethod::Ranked => "ranked",
            VotingMethod::Rating => "rating",
        }
    }
}

impl fmt::Display for VotingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VotingMethod {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approval" => Ok(VotingMethod::Approval),
            "single" => Ok(VotingMethod::Single),
            "ranked" => Ok(VotingMethod::Ranked),
            "rating" => Ok(VotingMethod::Rating),
            other => Err(crate::error::Error::UnknownVotingMethod(other.to_string())),
        }
    }
}

/// One voter's raw submission.
///
/// Ballots come out of storage and are not trusted: they are decoded
/// leniently from JSON and anything that doesn't fit a known shape becomes
/// [`Ballot::Empty`]. The tally functions ignore ballots whose shape doesn't
/// match the poll's method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged, from = "Value")]
pub enum Ballot {
    /// `single`: the chosen id.
    Choice(String),
    /// `approval` (order irrelevant) or `ranked` (most preferred first).
    Ids(Vec<String>),
    /// `rating`: id -> score.
    Scores(HashMap<String, i32>),
    Empty,
}

impl Ballot {
    pub fn choice(id: impl Into<String>) -> Self {
        Ballot::Choice(id.into())
    }

    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ballot::Ids(ids.into_iter().map(Into::into).collect())
    }

    pub fn scores<I, S>(scores: I) -> Self
    where
        I: IntoIterator<Item = (S, i32)>,
        S: Into<String>,
    {
        Ballot::Scores(scores.into_iter().map(|(id, s)| (id.into(), s)).collect())
    }

    pub fn as_ids(&self) -> &[String] {
        match self {
            Ballot::Ids(ids) => ids,
            _ => &[],
        }
    }

    pub fn as_choice(&self) -> Option<&str> {
        match self {
            Ballot::Choice(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_scores(&self) -> Option<&HashMap<String, i32>> {
        match self {
            Ballot::Scores(scores) => Some(scores),
            _ => None,
        }
    }
}

impl From<Value> for Ballot {
    fn from(value: Value) -> Self {
        match value {
            Value::String(id) => Ballot::Choice(id),
            Value::Array(items) => Ballot::Ids(
                items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::String(id) => Some(id),
                        _ => None,
                    })
                    .collect(),
            ),
            Value::Object(map) => Ballot::Scores(
                map.into_iter()
                    .filter_map(|(id, score)| {
                        let score = i32::try_from(score.as_i64()?).ok()?;
                        Some((id, score))
                    })
                    .collect(),
            ),
            _ => Ballot::Empty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    pub id: String,
    pub title: String,
    pub voting_method: VotingMethod,
    pub movies: Vec<Candidate>,
    pub created_at: DateTime<Utc>,
}

impl Poll {
    pub fn new(title: String, voting_method: VotingMethod, movies: Vec<Candidate>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title,
            voting_method,
            movies,
            created_at: Utc::now(),
        }
    }
}

/// A ballot as stored, keyed by poll and voter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredVote {
    pub poll_id: String,
    pub voter_fingerprint: String,
    pub vote_data: Ballot,
    pub created_at: DateTime<Utc>,
}
