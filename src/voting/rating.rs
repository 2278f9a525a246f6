use crate::models::{Ballot, Candidate};
use crate::voting::tiebreak::by_rating_desc;
use crate::voting::{bold_if_winner, movie_label, participation_line, PollResults, RatingResult};
use std::collections::HashMap;

/// Score voting ranked by median, then mean, then external rating.
pub fn calculate_results(movies: &[Candidate], ballots: &[Ballot]) -> PollResults {
    let index: HashMap<&str, usize> = movies
        .iter()
        .enumerate()
        .map(|(i, movie)| (movie.id.as_str(), i))
        .collect();

    let mut ratings: Vec<Vec<i32>> = vec![Vec::new(); movies.len()];

    for scores in ballots.iter().filter_map(Ballot::as_scores) {
        for (id, &score) in scores {
            if let Some(&i) = index.get(id.as_str()) {
                ratings[i].push(score);
            }
        }
    }

    let mut results: Vec<RatingResult> = movies
        .iter()
        .zip(ratings)
        .map(|(movie, ratings)| RatingResult {
            movie: movie.clone(),
            median: median(&ratings),
            mean: mean(&ratings),
            ratings,
        })
        .collect();

    results.sort_by(|a, b| {
        b.median
            .total_cmp(&a.median)
            .then_with(|| b.mean.total_cmp(&a.mean))
            .then_with(|| by_rating_desc(&a.movie, &b.movie))
    });

    let winner = results
        .first()
        .filter(|top| top.median > 0.0)
        .map(|top| top.movie.clone());

    PollResults::Rating { results, winner }
}

/// Middle value of the sorted ratings, averaging the middle pair for even
/// lengths. An empty list has median 0.
pub fn median(ratings: &[i32]) -> f64 {
    if ratings.is_empty() {
        return 0.0;
    }
    let mut sorted = ratings.to_vec();
    sorted.sort_unstable();

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] as f64 + sorted[mid] as f64) / 2.0
    } else {
        sorted[mid] as f64
    }
}

pub fn mean(ratings: &[i32]) -> f64 {
    if ratings.is_empty() {
        return 0.0;
    }
    ratings.iter().map(|&r| r as f64).sum::<f64>() / ratings.len() as f64
}

pub fn summarize(results: &[RatingResult], winner: Option<&Candidate>, ballot_count: usize) -> String {
    if ballot_count == 0 {
        return "No votes were cast in this poll.".to_string();
    }

    let mut summary = String::new();

    for result in results {
        let name = bold_if_winner(movie_label(&result.movie), &result.movie, winner);
        let noun = if result.ratings.len() == 1 { "rating" } else { "ratings" };
        summary.push_str(&format!(
            "{}: median {:.1} stars, mean {:.2} ({} {})",
            name,
            result.median,
            result.mean,
            result.ratings.len(),
            noun
        ));
        summary.push('\n');
    }

    summary.push('\n');
    summary.push_str(&participation_line(ballot_count));
    summary
}
