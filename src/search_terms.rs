//! Search-term planning for batched poster lookups.
//!
//! The metadata service only answers title searches, one request at a time,
//! so resolving posters for a list of movies is cheapest when a single search
//! word matches several titles. Picking the fewest words that touch every
//! title is set cover; we use the usual greedy approximation.

use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use std::collections::{HashMap, HashSet};

lazy_static! {
    static ref WORD_SEPARATORS: Regex = Regex::new(r"[\s:,;.!?/\-–—]+").unwrap();
    static ref STOP_WORDS: HashSet<&'static str> =
        ["the", "a", "an", "of", "and", "in", "to", "for", "is", "on", "at"]
            .into_iter()
            .collect();
}

const MIN_WORD_LEN: usize = 2;

/// A title that needs a lookup.
#[derive(Debug, Clone, Copy)]
pub struct TitleRef<'a> {
    pub id: &'a str,
    pub title: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPlan {
    /// Search words to issue, best coverage first.
    pub terms: Vec<String>,
    /// Ids no chosen term matches.
    pub uncovered: Vec<String>,
}

/// Lower-cased significant words of a title, in order of appearance.
pub fn extract_words(title: &str) -> Vec<String> {
    WORD_SEPARATORS
        .split(&title.to_lowercase())
        .filter(|word| word.chars().count() >= MIN_WORD_LEN && !STOP_WORDS.contains(*word))
        .map(str::to_string)
        .collect()
}

/// Whether a free-text query has anything worth searching for.
pub fn is_valid_search_query(query: &str) -> bool {
    !extract_words(query).is_empty()
}

/// Greedily choose search words until every title is matched, no word adds
/// coverage, or `max_terms` words have been chosen.
///
/// Coverage ties go to the word seen first in input order, so the plan is
/// the same for the same input.
pub fn find_optimal_search_terms(titles: &[TitleRef<'_>], max_terms: Option<usize>) -> SearchPlan {
    if titles.is_empty() {
        return SearchPlan::default();
    }

    let mut words: Vec<String> = Vec::new();
    let mut word_to_titles: HashMap<String, HashSet<&str>> = HashMap::new();
    for title in titles {
        for word in extract_words(title.title) {
            let covered = word_to_titles.entry(word.clone()).or_insert_with(|| {
                words.push(word.clone());
                HashSet::new()
            });
            covered.insert(title.id);
        }
    }

    let mut uncovered: HashSet<&str> = titles.iter().map(|t| t.id).collect();
    let mut terms: Vec<String> = Vec::new();
    let limit = max_terms.unwrap_or(usize::MAX);

    while !uncovered.is_empty() && terms.len() < limit {
        let mut best: Option<(&str, usize)> = None;
        for word in &words {
            let coverage = word_to_titles[word]
                .iter()
                .filter(|id| uncovered.contains(*id))
                .count();
            if coverage > best.map_or(0, |(_, c)| c) {
                best = Some((word.as_str(), coverage));
            }
        }

        let Some((word, _)) = best else {
            break;
        };
        for id in &word_to_titles[word] {
            uncovered.remove(id);
        }
        terms.push(word.to_string());
    }

    // Report leftovers in input order
    let mut seen = HashSet::new();
    let uncovered: Vec<String> = titles
        .iter()
        .filter(|t| uncovered.contains(t.id) && seen.insert(t.id))
        .map(|t| t.id.to_string())
        .collect();

    debug!(
        "Search terms for {} titles: [{}] ({} uncovered)",
        titles.len(),
        terms.join(", "),
        uncovered.len()
    );

    SearchPlan { terms, uncovered }
}
