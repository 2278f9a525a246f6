//! Tie-break chain shared by the tally methods.
//!
//! Primary and secondary metrics are compared by each method; once those are
//! equal the external rating decides, and the candidate-list position is the
//! final fallback (stable sorts and first-match scans preserve it).

use crate::models::Candidate;
use std::cmp::Ordering;

/// Higher external rating first.
pub(crate) fn by_rating_desc(a: &Candidate, b: &Candidate) -> Ordering {
    b.tie_break_rating().total_cmp(&a.tie_break_rating())
}

/// Lower external rating first, used to pick who is eliminated.
pub(crate) fn by_rating_asc(a: &Candidate, b: &Candidate) -> Ordering {
    a.tie_break_rating().total_cmp(&b.tie_break_rating())
}
