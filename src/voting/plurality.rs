use crate::models::{Ballot, Candidate};
use crate::voting::{bold_if_winner, count_winner, movie_label, participation_line, rank_counts, CountResult, PollResults};
use std::collections::HashMap;

/// Single-choice voting: each ballot names at most one movie.
pub fn calculate_results(movies: &[Candidate], ballots: &[Ballot]) -> PollResults {
    let index: HashMap<&str, usize> = movies
        .iter()
        .enumerate()
        .map(|(i, movie)| (movie.id.as_str(), i))
        .collect();

    let mut counts = vec![0u64; movies.len()];

    for choice in ballots.iter().filter_map(Ballot::as_choice) {
        if let Some(&i) = index.get(choice) {
            counts[i] += 1;
        }
    }

    let results = rank_counts(movies, &counts, ballots.len());
    let winner = count_winner(&results);

    PollResults::Single { results, winner }
}

pub fn summarize(results: &[CountResult], winner: Option<&Candidate>, ballot_count: usize) -> String {
    if ballot_count == 0 {
        return "No votes were cast in this poll.".to_string();
    }

    let mut summary = String::new();

    for result in results {
        let name = bold_if_winner(movie_label(&result.movie), &result.movie, winner);
        let noun = if result.count == 1 { "vote" } else { "votes" };
        summary.push_str(&format!("{}: {} {} ({:.1}%)", name, result.count, noun, result.percentage));
        summary.push('\n');
    }

    summary.push('\n');
    summary.push_str(&participation_line(ballot_count));
    summary
}
