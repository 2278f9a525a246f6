use log::{info, warn};
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "sqlite:movie_poll.db";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_url: String,
    /// How often the snapshot task re-tallies polls with new votes.
    pub snapshot_interval: Duration,
    pub poster_cache_ttl: chrono::Duration,
    pub poster_cache_capacity: usize,
    /// Upper bound on metadata lookups in flight at once.
    pub lookup_concurrency: usize,
    /// Cap on search terms per poster batch; `None` means cover everything.
    pub max_search_terms: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            snapshot_interval: Duration::from_secs(60),
            poster_cache_ttl: chrono::Duration::days(30),
            poster_cache_capacity: 5_000,
            lookup_concurrency: 4,
            max_search_terms: None,
        }
    }
}

impl Config {
    /// Read configuration from the process environment. The binary loads
    /// `.env` before calling this.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let database_url = get("DATABASE_URL").unwrap_or_else(|| {
            info!("DATABASE_URL not set, using default: {}", DEFAULT_DATABASE_URL);
            defaults.database_url.clone()
        });

        let snapshot_secs = parse_or(&get, "SNAPSHOT_INTERVAL_SECS", defaults.snapshot_interval.as_secs());
        let ttl_days = parse_or(&get, "POSTER_CACHE_TTL_DAYS", defaults.poster_cache_ttl.num_days());
        let lookup_concurrency = parse_or(&get, "LOOKUP_CONCURRENCY", defaults.lookup_concurrency);

        Self {
            database_url,
            snapshot_interval: Duration::from_secs(snapshot_secs.max(1)),
            poster_cache_ttl: chrono::Duration::days(ttl_days.max(0)),
            poster_cache_capacity: parse_or(&get, "POSTER_CACHE_CAPACITY", defaults.poster_cache_capacity),
            lookup_concurrency: lookup_concurrency.max(1),
            max_search_terms: get("MAX_SEARCH_TERMS").and_then(|raw| match raw.trim().parse() {
                Ok(n) => Some(n),
                Err(e) => {
                    warn!("Invalid MAX_SEARCH_TERMS value {:?}: {}", raw, e);
                    None
                }
            }),
        }
    }
}

fn parse_or<F, T>(get: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Display,
    T::Err: Display,
{
    match get(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|e| {
            warn!("Invalid {} value {:?}: {}, using default: {}", key, raw, e, default);
            default
        }),
    }
}
