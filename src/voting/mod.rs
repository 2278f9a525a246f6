pub mod approval;
pub mod plurality;
pub mod ranked;
pub mod rating;
mod tiebreak;

use crate::models::{Ballot, Candidate, VotingMethod};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tallied outcome of a poll, tagged by voting method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum PollResults {
    Approval {
        results: Vec<CountResult>,
        winner: Option<Candidate>,
    },
    Single {
        results: Vec<CountResult>,
        winner: Option<Candidate>,
    },
    Ranked {
        results: RankedResult,
        winner: Option<Candidate>,
    },
    Rating {
        results: Vec<RatingResult>,
        winner: Option<Candidate>,
    },
}

// Vote count for one movie (approval and single)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountResult {
    pub movie: Candidate,
    pub count: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedRound {
    /// First-preference counts of the candidates active in this round.
    pub counts: BTreeMap<String, u64>,
    pub eliminated: Option<String>,
    pub remaining: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub rounds: Vec<RankedRound>,
    pub winner: Option<Candidate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingResult {
    pub movie: Candidate,
    pub median: f64,
    pub mean: f64,
    pub ratings: Vec<i32>,
}

/// Tally `ballots` for a poll using `method`.
///
/// Never fails: references to ids outside `candidates` are ignored, and a
/// ballot whose shape doesn't belong to `method` contributes nothing.
pub fn tally(method: VotingMethod, candidates: &[Candidate], ballots: &[Ballot]) -> PollResults {
    match method {
        VotingMethod::Approval => approval::calculate_results(candidates, ballots),
        VotingMethod::Single => plurality::calculate_results(candidates, ballots),
        VotingMethod::Ranked => ranked::calculate_results(candidates, ballots),
        VotingMethod::Rating => rating::calculate_results(candidates, ballots),
    }
}

impl PollResults {
    pub fn method(&self) -> VotingMethod {
        match self {
            PollResults::Approval { .. } => VotingMethod::Approval,
            PollResults::Single { .. } => VotingMethod::Single,
            PollResults::Ranked { .. } => VotingMethod::Ranked,
            PollResults::Rating { .. } => VotingMethod::Rating,
        }
    }

    pub fn winner(&self) -> Option<&Candidate> {
        match self {
            PollResults::Approval { winner, .. }
            | PollResults::Single { winner, .. }
            | PollResults::Ranked { winner, .. }
            | PollResults::Rating { winner, .. } => winner.as_ref(),
        }
    }

    /// Human-readable results, one line per movie (or per round for ranked).
    /// `movies` supplies display titles for the ids recorded in ranked rounds.
    pub fn summary(&self, movies: &[Candidate], ballot_count: usize) -> String {
        match self {
            PollResults::Approval { results, winner } => {
                approval::summarize(results, winner.as_ref(), ballot_count)
            }
            PollResults::Single { results, winner } => {
                plurality::summarize(results, winner.as_ref(), ballot_count)
            }
            PollResults::Ranked { results, .. } => ranked::summarize(results, movies, ballot_count),
            PollResults::Rating { results, winner } => {
                rating::summarize(results, winner.as_ref(), ballot_count)
            }
        }
    }
}

/// Build count results for every candidate, in candidate order, then sort
/// them by count with the rating tie-break.
fn rank_counts(candidates: &[Candidate], counts: &[u64], ballot_count: usize) -> Vec<CountResult> {
    let mut results: Vec<CountResult> = candidates
        .iter()
        .zip(counts)
        .map(|(movie, &count)| CountResult {
            movie: movie.clone(),
            count,
            percentage: percentage(count, ballot_count),
        })
        .collect();

    // Stable sort: exact ties keep candidate-list order
    results.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| tiebreak::by_rating_desc(&a.movie, &b.movie))
    });
    results
}

fn percentage(count: u64, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64 * 100.0
    }
}

fn count_winner(results: &[CountResult]) -> Option<Candidate> {
    results
        .first()
        .filter(|top| top.count > 0)
        .map(|top| top.movie.clone())
}

fn movie_label(movie: &Candidate) -> String {
    if movie.year.is_empty() {
        movie.title.clone()
    } else {
        format!("{} ({})", movie.title, movie.year)
    }
}

/// `label` in bold when `movie` is the winner.
fn bold_if_winner(label: String, movie: &Candidate, winner: Option<&Candidate>) -> String {
    if winner.is_some_and(|w| w.id == movie.id) {
        format!("**{}**", label)
    } else {
        label
    }
}

fn participation_line(ballot_count: usize) -> String {
    match ballot_count {
        1 => "1 voter participated.".to_string(),
        n => format!("{} voters participated.", n),
    }
}
