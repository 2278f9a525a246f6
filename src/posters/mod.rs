//! Poster and plot resolution for movie lists.
//!
//! Local title search returns movies without artwork. Posters come from an
//! external metadata service that is slow and rate limited, so lookups are
//! batched through search-term set cover, cached with a TTL, and
//! de-duplicated while in flight.

mod cache;
mod fetch;

pub use cache::TtlCache;
pub use fetch::{MovieDetailsView, PosterFetcher, PosterMerge};

use crate::error::Result;
use crate::models::Candidate;
use async_trait::async_trait;

/// Full record for one movie from the metadata service.
#[derive(Debug, Clone, PartialEq)]
pub struct MovieDetails {
    pub movie: Candidate,
    pub plot: Option<String>,
}

/// The external metadata service (OMDb or similar).
#[async_trait]
pub trait MetadataLookup: Send + Sync {
    /// Title search; results carry poster URLs but no ratings.
    async fn search(&self, query: &str) -> Result<Vec<Candidate>>;

    /// Lookup by external id; `Ok(None)` when the service doesn't know it.
    async fn by_id(&self, id: &str) -> Result<Option<MovieDetails>>;
}
