use crate::models::{Ballot, Candidate};
use crate::voting::tiebreak::by_rating_asc;
use crate::voting::{movie_label, participation_line, PollResults, RankedResult, RankedRound};
use log::debug;
use std::collections::{BTreeMap, HashMap};

/// Instant-runoff tally.
///
/// Each round every ballot counts for its highest-ranked movie that is still
/// in the running; ballots with no such movie are exhausted and drop out of
/// the round's total. A movie with more than half of the round's total wins
/// outright. Otherwise the movie with the fewest votes is eliminated: ties go
/// against the lower external rating, then against the movie listed earlier
/// in the poll. When a single movie is left it gets one confirming round.
///
/// Ballots are never modified; the round history is only appended to.
pub fn calculate_results(movies: &[Candidate], ballots: &[Ballot]) -> PollResults {
    let mut rounds: Vec<RankedRound> = Vec::new();
    let mut remaining: Vec<&Candidate> = movies.iter().collect();
    let mut winner: Option<&Candidate> = None;

    while !ballots.is_empty() && !remaining.is_empty() {
        let (counts, total) = count_first_preferences(ballots, &remaining);

        if total == 0 {
            debug!("All ballots exhausted with {} movies remaining", remaining.len());
            break;
        }

        let round_counts: BTreeMap<String, u64> = remaining
            .iter()
            .zip(&counts)
            .map(|(movie, &count)| (movie.id.clone(), count))
            .collect();

        if remaining.len() == 1 {
            rounds.push(RankedRound {
                counts: round_counts,
                eliminated: None,
                remaining: ids(&remaining),
            });
            winner = Some(remaining[0]);
            break;
        }

        // Strictly greater keeps the first of equal leaders, though two
        // movies can't both hold a majority.
        let mut leader = 0;
        for i in 1..remaining.len() {
            if counts[i] > counts[leader] {
                leader = i;
            }
        }

        if counts[leader] * 2 > total {
            rounds.push(RankedRound {
                counts: round_counts,
                eliminated: None,
                remaining: vec![remaining[leader].id.clone()],
            });
            winner = Some(remaining[leader]);
            break;
        }

        // min_by returns the first of several equal minimums, which pins
        // fully tied eliminations to candidate-list order.
        let Some(loser) = (0..remaining.len()).min_by(|&a, &b| {
            counts[a]
                .cmp(&counts[b])
                .then_with(|| by_rating_asc(remaining[a], remaining[b]))
        }) else {
            break;
        };

        debug!(
            "Round {}: eliminating {} with {} votes",
            rounds.len() + 1,
            remaining[loser].id,
            counts[loser]
        );

        rounds.push(RankedRound {
            counts: round_counts,
            eliminated: Some(remaining[loser].id.clone()),
            remaining: ids(&remaining),
        });
        remaining.remove(loser);
    }

    let winner = winner.cloned();

    PollResults::Ranked {
        results: RankedResult {
            rounds,
            winner: winner.clone(),
        },
        winner,
    }
}

/// Count each ballot's top still-active preference.
/// Returns counts parallel to `remaining` and the number of non-exhausted ballots.
fn count_first_preferences(ballots: &[Ballot], remaining: &[&Candidate]) -> (Vec<u64>, u64) {
    let position: HashMap<&str, usize> = remaining
        .iter()
        .enumerate()
        .map(|(i, movie)| (movie.id.as_str(), i))
        .collect();

    let mut counts = vec![0u64; remaining.len()];
    let mut total = 0u64;

    for ballot in ballots {
        let first_choice = ballot
            .as_ids()
            .iter()
            .find_map(|id| position.get(id.as_str()).copied());
        if let Some(i) = first_choice {
            counts[i] += 1;
            total += 1;
        }
    }

    (counts, total)
}

fn ids(movies: &[&Candidate]) -> Vec<String> {
    movies.iter().map(|movie| movie.id.clone()).collect()
}

pub fn summarize(result: &RankedResult, movies: &[Candidate], ballot_count: usize) -> String {
    if result.rounds.is_empty() {
        return "No valid rankings were submitted.".to_string();
    }

    let names: HashMap<&str, String> = movies
        .iter()
        .map(|movie| (movie.id.as_str(), movie_label(movie)))
        .collect();
    let name_of = |id: &str| names.get(id).cloned().unwrap_or_else(|| id.to_string());

    let mut summary = String::new();

    for (i, round) in result.rounds.iter().enumerate() {
        summary.push_str(&format!("**Round {}**\n", i + 1));

        let total: u64 = round.counts.values().sum();
        let mut counts: Vec<(&String, &u64)> = round.counts.iter().collect();
        counts.sort_by(|a, b| b.1.cmp(a.1));

        for (id, &count) in counts {
            let percentage = if total > 0 {
                count as f64 / total as f64 * 100.0
            } else {
                0.0
            };
            summary.push_str(&format!("• {}: {} votes ({:.1}%)\n", name_of(id), count, percentage));
        }

        match &round.eliminated {
            Some(id) => summary.push_str(&format!("Eliminating: {}\n\n", name_of(id))),
            None => {
                if let Some(winner) = &result.winner {
                    if round.counts.len() == 1 {
                        summary.push_str(&format!("{} wins (last remaining).\n\n", movie_label(winner)));
                    } else {
                        summary.push_str(&format!("{} has reached a majority!\n\n", movie_label(winner)));
                    }
                }
            }
        }
    }

    summary.push_str(&participation_line(ballot_count));
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voting::test_support::{movies, movies_with_ratings};

    fn ranked(results: &PollResults) -> &RankedResult {
        match results {
            PollResults::Ranked { results, .. } => results,
            _ => panic!("expected ranked results"),
        }
    }

    fn winner_id(results: &PollResults) -> Option<&str> {
        results.winner().map(|m| m.id.as_str())
    }

    #[test]
    fn majority_in_first_round() {
        let ballots = vec![
            Ballot::ids(["tt1", "tt2", "tt3"]),
            Ballot::ids(["tt1", "tt3", "tt2"]),
            Ballot::ids(["tt2", "tt1", "tt3"]),
        ];
        let results = calculate_results(&movies(), &ballots);

        let rounds = &ranked(&results).rounds;
        assert_eq!(rounds.len(), 1);
        assert_eq!(rounds[0].counts["tt1"], 2);
        assert_eq!(rounds[0].counts["tt2"], 1);
        assert_eq!(rounds[0].counts["tt3"], 0);
        assert_eq!(rounds[0].eliminated, None);
        assert_eq!(rounds[0].remaining, vec!["tt1"]);
        assert_eq!(winner_id(&results), Some("tt1"));
        assert_eq!(ranked(&results).winner.as_ref().map(|m| m.id.as_str()), Some("tt1"));
    }

    #[test]
    fn eliminates_lowest_and_transfers_votes() {
        let ballots = vec![
            Ballot::ids(["tt1", "tt2", "tt3"]),
            Ballot::ids(["tt2", "tt1", "tt3"]),
            Ballot::ids(["tt3", "tt1", "tt2"]),
            Ballot::ids(["tt3", "tt2", "tt1"]),
        ];
        let results = calculate_results(&movies(), &ballots);
        let rounds = &ranked(&results).rounds;

        // tt1 and tt2 tie on 1 vote with no ratings: the earlier one goes
        assert_eq!(rounds[0].eliminated.as_deref(), Some("tt1"));
        assert_eq!(rounds[0].remaining, vec!["tt1", "tt2", "tt3"]);

        // tt1's ballot moves to tt2: tt2=2, tt3=2, no majority; tt2 listed first goes
        assert_eq!(rounds[1].counts["tt2"], 2);
        assert_eq!(rounds[1].counts["tt3"], 2);
        assert_eq!(rounds[1].eliminated.as_deref(), Some("tt2"));

        assert_eq!(rounds[2].eliminated, None);
        assert_eq!(rounds[2].remaining, vec!["tt3"]);
        assert_eq!(rounds[2].counts["tt3"], 4);
        assert_eq!(winner_id(&results), Some("tt3"));
    }

    #[test]
    fn no_votes_means_no_rounds() {
        let results = calculate_results(&movies(), &[]);
        assert!(ranked(&results).rounds.is_empty());
        assert!(results.winner().is_none());
    }

    #[test]
    fn tied_elimination_goes_against_lowest_rating() {
        let ballots = vec![
            Ballot::ids(["tt1", "tt2", "tt3"]),
            Ballot::ids(["tt2", "tt3", "tt1"]),
            Ballot::ids(["tt3", "tt1", "tt2"]),
        ];
        let results = calculate_results(&movies_with_ratings(), &ballots);
        let rounds = &ranked(&results).rounds;

        assert_eq!(rounds[0].eliminated.as_deref(), Some("tt3"));
        // tt3's ballot goes to tt1: tt1=2 of 3
        assert_eq!(rounds[1].counts["tt1"], 2);
        assert_eq!(winner_id(&results), Some("tt1"));
    }

    #[test]
    fn two_way_tie_resolves_by_rating() {
        let two = vec![
            Candidate::new("tt1", "Movie A", "2020").with_rating(7.0),
            Candidate::new("tt2", "Movie B", "2021").with_rating(8.0),
        ];
        let ballots = vec![Ballot::ids(["tt1", "tt2"]), Ballot::ids(["tt2", "tt1"])];
        let results = calculate_results(&two, &ballots);

        let rounds = &ranked(&results).rounds;
        assert_eq!(rounds[0].eliminated.as_deref(), Some("tt1"));
        assert_eq!(rounds.len(), 2);
        assert_eq!(rounds[1].counts["tt2"], 2);
        assert_eq!(winner_id(&results), Some("tt2"));
    }

    #[test]
    fn partial_and_invalid_rankings_are_tolerated() {
        let ballots = vec![
            Ballot::ids(["tt1", "tt2"]),
            Ballot::ids(["tt999", "tt2", "tt1", "tt3"]),
        ];
        let results = calculate_results(&movies(), &ballots);

        let rounds = &ranked(&results).rounds;
        assert_eq!(rounds[0].counts["tt2"], 1);
        assert_eq!(rounds[0].eliminated.as_deref(), Some("tt3"));
        assert!(results.winner().is_some());
    }

    #[test]
    fn exhausted_ballots_leave_the_total() {
        // Round 1: tt1=2, tt2=1, tt3=2. tt2 is eliminated and its only
        // ballot is exhausted, so round 2 is decided out of 4, not 5.
        let ballots = vec![
            Ballot::ids(["tt1"]),
            Ballot::ids(["tt1"]),
            Ballot::ids(["tt2"]),
            Ballot::ids(["tt3"]),
            Ballot::ids(["tt3"]),
        ];
        let results = calculate_results(&movies(), &ballots);
        let rounds = &ranked(&results).rounds;

        assert_eq!(rounds[0].eliminated.as_deref(), Some("tt2"));
        assert_eq!(rounds[1].counts.values().sum::<u64>(), 4);
        // 2-2: tt1 is eliminated as the earlier listed, tt3 is confirmed
        assert_eq!(rounds[1].eliminated.as_deref(), Some("tt1"));
        assert_eq!(rounds[2].counts["tt3"], 2);
        assert_eq!(winner_id(&results), Some("tt3"));
    }

    #[test]
    fn ballots_with_only_unknown_ids_have_no_winner() {
        let ballots = vec![Ballot::ids(["tt998"]), Ballot::ids(["tt999"]), Ballot::choice("tt1")];
        let results = calculate_results(&movies(), &ballots);
        assert!(ranked(&results).rounds.is_empty());
        assert!(results.winner().is_none());
    }

    #[test]
    fn single_candidate_is_confirmed_in_one_round() {
        let one = vec![Candidate::new("tt1", "Movie A", "2020")];
        let results = calculate_results(&one, &[Ballot::ids(["tt1"])]);

        let rounds = &ranked(&results).rounds;
        assert_eq!(rounds.len(), 1);
        assert_eq!(rounds[0].eliminated, None);
        assert_eq!(winner_id(&results), Some("tt1"));
    }

    #[test]
    fn summary_walks_each_round() {
        let ballots = vec![
            Ballot::ids(["tt1", "tt2", "tt3"]),
            Ballot::ids(["tt2", "tt1", "tt3"]),
            Ballot::ids(["tt3", "tt1", "tt2"]),
            Ballot::ids(["tt3", "tt2", "tt1"]),
        ];
        let movies = movies();
        let results = calculate_results(&movies, &ballots);
        let summary = results.summary(&movies, ballots.len());

        assert!(summary.starts_with("**Round 1**\n• Movie C (2022): 2 votes (50.0%)\n"));
        assert!(summary.contains("Eliminating: Movie A (2020)"));
        assert!(summary.contains("Movie C (2022) wins (last remaining)."));
        assert!(summary.ends_with("4 voters participated."));
    }
}
