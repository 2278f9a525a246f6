use super::{MetadataLookup, TtlCache};
use crate::config::Config;
use crate::models::Candidate;
use crate::search_terms::{find_optimal_search_terms, is_valid_search_query, TitleRef};
use chrono::Utc;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

/// Outcome of [`PosterFetcher::fetch_posters_and_merge`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PosterMerge {
    /// The input movies, with every poster we could resolve filled in.
    pub movies: Vec<Candidate>,
    /// Movies the original query found externally that weren't in the input.
    pub new_from_lookup: Vec<Candidate>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MovieDetailsView {
    pub poster: Option<String>,
    pub plot: Option<String>,
}

type InFlight = Mutex<HashMap<String, watch::Receiver<()>>>;

/// Resolves posters through a [`MetadataLookup`], caching results and
/// sharing in-flight work between callers.
pub struct PosterFetcher<L> {
    lookup: Arc<L>,
    posters: Mutex<TtlCache>,
    plots: Mutex<TtlCache>,
    queried_terms: Mutex<HashSet<String>>,
    in_flight: InFlight,
    limiter: Arc<Semaphore>,
    max_search_terms: Option<usize>,
}

impl<L> PosterFetcher<L>
where
    L: MetadataLookup + 'static,
{
    pub fn new(lookup: L, config: &Config) -> Self {
        Self {
            lookup: Arc::new(lookup),
            posters: Mutex::new(TtlCache::new(config.poster_cache_ttl, config.poster_cache_capacity)),
            plots: Mutex::new(TtlCache::new(config.poster_cache_ttl, config.poster_cache_capacity)),
            queried_terms: Mutex::new(HashSet::new()),
            in_flight: Mutex::new(HashMap::new()),
            limiter: Arc::new(Semaphore::new(config.lookup_concurrency.max(1))),
            max_search_terms: config.max_search_terms,
        }
    }

    /// Forget which search terms were already issued, so the next batch may
    /// repeat them. Call between unrelated searches.
    pub fn reset_queried_terms(&self) {
        lock(&self.queried_terms).clear();
    }

    pub fn is_in_flight(&self, id: &str) -> bool {
        lock(&self.in_flight).contains_key(id)
    }

    /// Fill in posters for `movies` and report extra hits for `original_query`.
    ///
    /// Cached posters are applied to every movie. Only the first
    /// `visible_count` movies still missing one drive new lookups: their
    /// titles are reduced to a small set of search words, plus the original
    /// query when it is searchable. Words already issued since the last
    /// [`reset_queried_terms`](Self::reset_queried_terms) are skipped. Lookup
    /// failures are logged and treated as empty results.
    pub async fn fetch_posters_and_merge(
        &self,
        mut movies: Vec<Candidate>,
        original_query: &str,
        visible_count: usize,
    ) -> PosterMerge {
        self.apply_cached_posters(&mut movies);

        let missing: Vec<TitleRef<'_>> = movies
            .iter()
            .take(visible_count)
            .filter(|m| m.poster.is_none())
            .map(|m| TitleRef {
                id: &m.id,
                title: &m.title,
            })
            .collect();
        if missing.is_empty() {
            return PosterMerge {
                movies,
                new_from_lookup: Vec::new(),
            };
        }

        let mut terms = find_optimal_search_terms(&missing, self.max_search_terms).terms;
        let original_lower = original_query.trim().to_lowercase();
        if is_valid_search_query(&original_lower) && !terms.contains(&original_lower) {
            terms.push(original_lower.clone());
        }

        let terms: Vec<String> = {
            let mut queried = lock(&self.queried_terms);
            terms.into_iter().filter(|t| queried.insert(t.clone())).collect()
        };
        if terms.is_empty() {
            debug!("All search terms already queried, nothing to fetch");
            return PosterMerge {
                movies,
                new_from_lookup: Vec::new(),
            };
        }

        let missing_ids: Vec<String> = missing.iter().map(|m| m.id.to_string()).collect();
        let _registration = InFlightGuard::register(&self.in_flight, missing_ids);

        info!("Fetching posters with {} search terms: [{}]", terms.len(), terms.join(", "));
        let results = self.search_all(&terms).await;

        let mut found: HashMap<String, Candidate> = HashMap::new();
        let mut from_original: Vec<Candidate> = Vec::new();
        {
            let now = Utc::now();
            let mut posters = lock(&self.posters);
            for (term, hits) in results {
                let is_original = term == original_lower;
                for hit in hits {
                    if hit.poster.is_some() {
                        posters.insert(&hit.id, hit.poster.clone(), now);
                    }
                    if is_original && !from_original.iter().any(|m| m.id == hit.id) {
                        from_original.push(hit.clone());
                    }
                    found.entry(hit.id.clone()).or_insert(hit);
                }
            }

            for movie in movies.iter_mut().filter(|m| m.poster.is_none()) {
                if let Some(hit) = found.get(&movie.id) {
                    // A hit without a poster is a confirmed absence.
                    posters.insert(&movie.id, hit.poster.clone(), now);
                    movie.poster = hit.poster.clone();
                }
            }
        }

        let local_ids: HashSet<&str> = movies.iter().map(|m| m.id.as_str()).collect();
        let new_from_lookup: Vec<Candidate> = {
            let now = Utc::now();
            let mut posters = lock(&self.posters);
            from_original
                .into_iter()
                .filter(|m| !local_ids.contains(m.id.as_str()))
                .map(|mut m| {
                    // Includes a confirmed absence for hits without a poster.
                    posters.insert(&m.id, m.poster.clone(), now);
                    m.rating = None;
                    m
                })
                .collect()
        };

        let resolved = movies.iter().take(visible_count).filter(|m| m.poster.is_some()).count();
        info!(
            "Poster fetch done: {}/{} visible movies have posters, {} new from lookup",
            resolved,
            visible_count.min(movies.len()),
            new_from_lookup.len()
        );

        PosterMerge {
            movies,
            new_from_lookup,
        }
    }

    /// Poster for one movie: cache first, then any batch already fetching
    /// it, then a direct lookup by id.
    pub async fn fetch_poster_by_id(&self, id: &str) -> Option<String> {
        if let Some(cached) = lock(&self.posters).get(id, Utc::now()) {
            return cached;
        }

        let pending = lock(&self.in_flight).get(id).cloned();
        if let Some(mut rx) = pending {
            debug!("Waiting for in-flight poster fetch of {}", id);
            // Resolves with an error once the batch drops its sender.
            let _ = rx.changed().await;
            if let Some(cached) = lock(&self.posters).get(id, Utc::now()) {
                return cached;
            }
        }

        let _permit = self.limiter.acquire().await.ok();
        match self.lookup.by_id(id).await {
            Ok(details) => {
                let poster = details.and_then(|d| d.movie.poster);
                lock(&self.posters).insert(id, poster.clone(), Utc::now());
                poster
            }
            Err(e) => {
                warn!("Poster lookup for {} failed: {}", id, e);
                None
            }
        }
    }

    /// Poster and plot for one movie, from cache when both are known.
    pub async fn fetch_movie_details_by_id(&self, id: &str) -> MovieDetailsView {
        let now = Utc::now();
        let cached_poster = lock(&self.posters).get(id, now);
        let cached_plot = lock(&self.plots).get(id, now);
        if let (Some(poster), Some(plot)) = (cached_poster, cached_plot) {
            return MovieDetailsView { poster, plot };
        }

        let _permit = self.limiter.acquire().await.ok();
        match self.lookup.by_id(id).await {
            Ok(details) => {
                let (poster, plot) = details.map_or((None, None), |d| (d.movie.poster, d.plot));
                let now = Utc::now();
                lock(&self.posters).insert(id, poster.clone(), now);
                lock(&self.plots).insert(id, plot.clone(), now);
                MovieDetailsView { poster, plot }
            }
            Err(e) => {
                warn!("Details lookup for {} failed: {}", id, e);
                MovieDetailsView::default()
            }
        }
    }

    /// Drop expired entries from both caches.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        lock(&self.posters).purge_expired(now) + lock(&self.plots).purge_expired(now)
    }

    fn apply_cached_posters(&self, movies: &mut [Candidate]) {
        let now = Utc::now();
        let posters = lock(&self.posters);
        for movie in movies.iter_mut().filter(|m| m.poster.is_none()) {
            if let Some(cached) = posters.get(&movie.id, now) {
                movie.poster = cached;
            }
        }
    }

    /// Run every search, at most `lookup_concurrency` at a time. Results
    /// come back in term order.
    async fn search_all(&self, terms: &[String]) -> Vec<(String, Vec<Candidate>)> {
        let mut tasks = JoinSet::new();
        for (index, term) in terms.iter().cloned().enumerate() {
            let lookup = Arc::clone(&self.lookup);
            let limiter = Arc::clone(&self.limiter);
            tasks.spawn(async move {
                let _permit = limiter.acquire_owned().await.ok();
                let result = lookup.search(&term).await;
                (index, term, result)
            });
        }

        let mut collected = Vec::with_capacity(terms.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, term, Ok(hits))) => {
                    debug!("Search {:?} returned {} results", term, hits.len());
                    collected.push((index, term, hits));
                }
                Ok((index, term, Err(e))) => {
                    warn!("Search {:?} failed: {}", term, e);
                    collected.push((index, term, Vec::new()));
                }
                Err(e) => warn!("Search task failed: {}", e),
            }
        }
        collected.sort_by_key(|(index, _, _)| *index);
        collected.into_iter().map(|(_, term, hits)| (term, hits)).collect()
    }
}

/// Marks ids as being fetched until dropped. Waiters hold a receiver and are
/// woken when the sender goes away.
struct InFlightGuard<'a> {
    registry: &'a InFlight,
    ids: Vec<String>,
    _senders: Vec<watch::Sender<()>>,
}

impl<'a> InFlightGuard<'a> {
    fn register(registry: &'a InFlight, candidates: Vec<String>) -> Self {
        let mut map = lock(registry);
        let mut ids = Vec::new();
        let mut senders = Vec::new();
        for id in candidates {
            if map.contains_key(&id) {
                continue;
            }
            let (tx, rx) = watch::channel(());
            map.insert(id.clone(), rx);
            ids.push(id);
            senders.push(tx);
        }
        Self {
            registry,
            ids,
            _senders: senders,
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut map = lock(self.registry);
        for id in &self.ids {
            map.remove(id);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::posters::MovieDetails;
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeLookup {
        search_results: HashMap<String, Vec<Candidate>>,
        details: HashMap<String, MovieDetails>,
        failing_terms: HashSet<String>,
        delay: Option<Duration>,
        searches: Mutex<Vec<String>>,
        id_lookups: Mutex<Vec<String>>,
    }

    impl FakeLookup {
        fn with_search(mut self, term: &str, hits: Vec<Candidate>) -> Self {
            self.search_results.insert(term.to_string(), hits);
            self
        }

        fn with_details(mut self, id: &str, poster: Option<&str>, plot: Option<&str>) -> Self {
            let mut movie = Candidate::new(id, "Some Movie", "2000");
            movie.poster = poster.map(str::to_string);
            self.details.insert(
                id.to_string(),
                MovieDetails {
                    movie,
                    plot: plot.map(str::to_string),
                },
            );
            self
        }
    }

    #[async_trait]
    impl MetadataLookup for FakeLookup {
        async fn search(&self, query: &str) -> Result<Vec<Candidate>> {
            self.searches.lock().unwrap().push(query.to_string());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing_terms.contains(query) {
                return Err(Error::Lookup(format!("search {} timed out", query)));
            }
            Ok(self.search_results.get(query).cloned().unwrap_or_default())
        }

        async fn by_id(&self, id: &str) -> Result<Option<MovieDetails>> {
            self.id_lookups.lock().unwrap().push(id.to_string());
            Ok(self.details.get(id).cloned())
        }
    }

    fn hit(id: &str, title: &str, poster: Option<&str>) -> Candidate {
        let mut movie = Candidate::new(id, title, "2000");
        movie.poster = poster.map(str::to_string);
        movie
    }

    fn fetcher(lookup: FakeLookup) -> PosterFetcher<FakeLookup> {
        PosterFetcher::new(lookup, &Config::default())
    }

    fn sorted(mut terms: Vec<String>) -> Vec<String> {
        terms.sort();
        terms
    }

    #[tokio::test]
    async fn one_shared_word_covers_the_batch() {
        let lookup = FakeLookup::default().with_search(
            "star",
            vec![
                hit("tt1", "Star Wars", Some("p1")),
                hit("tt2", "Star Trek", Some("p2")),
                hit("tt9", "Star Dust", Some("p9")),
            ],
        );
        let fetcher = fetcher(lookup);
        let movies = vec![
            Candidate::new("tt1", "Star Wars", "1977").with_rating(8.6),
            Candidate::new("tt2", "Star Trek", "2009"),
        ];

        let merged = fetcher.fetch_posters_and_merge(movies, "star", 10).await;

        assert_eq!(merged.movies[0].poster.as_deref(), Some("p1"));
        assert_eq!(merged.movies[0].rating, Some(8.6));
        assert_eq!(merged.movies[1].poster.as_deref(), Some("p2"));
        assert_eq!(*fetcher.lookup.searches.lock().unwrap(), vec!["star".to_string()]);

        let new_ids: Vec<&str> = merged.new_from_lookup.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(new_ids, vec!["tt9"]);
        assert_eq!(merged.new_from_lookup[0].rating, None);
    }

    #[tokio::test]
    async fn cached_posters_skip_lookups() {
        let lookup = FakeLookup::default().with_search("alien", vec![hit("tt1", "Alien", Some("p1"))]);
        let fetcher = fetcher(lookup);

        fetcher
            .fetch_posters_and_merge(vec![Candidate::new("tt1", "Alien", "1979")], "", 10)
            .await;
        fetcher.reset_queried_terms();
        let merged = fetcher
            .fetch_posters_and_merge(vec![Candidate::new("tt1", "Alien", "1979")], "", 10)
            .await;

        assert_eq!(merged.movies[0].poster.as_deref(), Some("p1"));
        assert_eq!(fetcher.lookup.searches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn only_visible_movies_drive_lookups() {
        let lookup = FakeLookup::default();
        let fetcher = fetcher(lookup);
        let movies = vec![
            Candidate::new("tt1", "Heat", "1995"),
            Candidate::new("tt2", "Ran", "1985"),
        ];

        fetcher.fetch_posters_and_merge(movies, "", 1).await;

        assert_eq!(*fetcher.lookup.searches.lock().unwrap(), vec!["heat".to_string()]);
    }

    #[tokio::test]
    async fn queried_terms_are_not_repeated_until_reset() {
        let fetcher = fetcher(FakeLookup::default());
        let movies = || vec![Candidate::new("tt1", "Heat", "1995")];

        fetcher.fetch_posters_and_merge(movies(), "heat", 10).await;
        fetcher.fetch_posters_and_merge(movies(), "heat", 10).await;
        assert_eq!(fetcher.lookup.searches.lock().unwrap().len(), 1);

        fetcher.reset_queried_terms();
        fetcher.fetch_posters_and_merge(movies(), "heat", 10).await;
        assert_eq!(fetcher.lookup.searches.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn original_query_is_added_and_lower_cased() {
        let fetcher = fetcher(FakeLookup::default());
        let movies = vec![Candidate::new("tt1", "Heat", "1995")];

        fetcher.fetch_posters_and_merge(movies, "Michael Mann", 10).await;

        let searches = fetcher.lookup.searches.lock().unwrap().clone();
        assert_eq!(sorted(searches), vec!["heat".to_string(), "michael mann".to_string()]);
    }

    #[tokio::test]
    async fn found_without_poster_is_cached_as_absent() {
        let lookup = FakeLookup::default().with_search("heat", vec![hit("tt1", "Heat", None)]);
        let fetcher = fetcher(lookup);

        let merged = fetcher
            .fetch_posters_and_merge(vec![Candidate::new("tt1", "Heat", "1995")], "", 10)
            .await;
        assert_eq!(merged.movies[0].poster, None);

        assert_eq!(fetcher.fetch_poster_by_id("tt1").await, None);
        assert!(fetcher.lookup.id_lookups.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn new_hits_without_poster_are_cached_as_absent() {
        let lookup = FakeLookup::default().with_search(
            "heat",
            vec![hit("tt1", "Heat", Some("p1")), hit("tt7", "Heat Wave", None)],
        );
        let fetcher = fetcher(lookup);

        let merged = fetcher
            .fetch_posters_and_merge(vec![Candidate::new("tt1", "Heat", "1995")], "heat", 10)
            .await;
        let new_ids: Vec<&str> = merged.new_from_lookup.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(new_ids, vec!["tt7"]);

        assert_eq!(fetcher.fetch_poster_by_id("tt7").await, None);
        assert!(fetcher.lookup.id_lookups.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_searches_count_as_empty() {
        let mut lookup = FakeLookup::default()
            .with_search("ran", vec![hit("tt2", "Ran", Some("p2"))]);
        lookup.failing_terms.insert("heat".to_string());
        let fetcher = fetcher(lookup);
        let movies = vec![
            Candidate::new("tt1", "Heat", "1995"),
            Candidate::new("tt2", "Ran", "1985"),
        ];

        let merged = fetcher.fetch_posters_and_merge(movies, "", 10).await;

        assert_eq!(merged.movies[0].poster, None);
        assert_eq!(merged.movies[1].poster.as_deref(), Some("p2"));
        assert!(merged.new_from_lookup.is_empty());
    }

    #[tokio::test]
    async fn by_id_waits_for_in_flight_batch() {
        let mut lookup = FakeLookup::default()
            .with_search("heat", vec![hit("tt1", "Heat", Some("p1"))])
            .with_details("tt1", Some("other"), None);
        lookup.delay = Some(Duration::from_millis(20));
        let fetcher = Arc::new(fetcher(lookup));

        let batch = {
            let fetcher = Arc::clone(&fetcher);
            tokio::spawn(async move {
                fetcher
                    .fetch_posters_and_merge(vec![Candidate::new("tt1", "Heat", "1995")], "", 10)
                    .await
            })
        };
        while !fetcher.is_in_flight("tt1") {
            tokio::task::yield_now().await;
        }

        assert_eq!(fetcher.fetch_poster_by_id("tt1").await.as_deref(), Some("p1"));
        assert!(fetcher.lookup.id_lookups.lock().unwrap().is_empty());

        batch.await.unwrap();
        assert!(!fetcher.is_in_flight("tt1"));
    }

    #[tokio::test]
    async fn by_id_falls_back_to_direct_lookup() {
        let lookup = FakeLookup::default().with_details("tt5", Some("p5"), Some("A plot."));
        let fetcher = fetcher(lookup);

        assert_eq!(fetcher.fetch_poster_by_id("tt5").await.as_deref(), Some("p5"));
        assert_eq!(fetcher.fetch_poster_by_id("tt5").await.as_deref(), Some("p5"));
        assert_eq!(fetcher.lookup.id_lookups.lock().unwrap().len(), 1);
        assert_eq!(fetcher.fetch_poster_by_id("tt404").await, None);
    }

    #[tokio::test]
    async fn details_are_cached_together() {
        let lookup = FakeLookup::default().with_details("tt5", Some("p5"), Some("A plot."));
        let fetcher = fetcher(lookup);

        let first = fetcher.fetch_movie_details_by_id("tt5").await;
        let second = fetcher.fetch_movie_details_by_id("tt5").await;

        assert_eq!(first.poster.as_deref(), Some("p5"));
        assert_eq!(first.plot.as_deref(), Some("A plot."));
        assert_eq!(first, second);
        assert_eq!(fetcher.lookup.id_lookups.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn poster_cache_alone_does_not_satisfy_details() {
        let lookup = FakeLookup::default()
            .with_search("heat", vec![hit("tt1", "Heat", Some("p1"))])
            .with_details("tt1", Some("p1"), Some("Cops and robbers."));
        let fetcher = fetcher(lookup);

        fetcher
            .fetch_posters_and_merge(vec![Candidate::new("tt1", "Heat", "1995")], "", 10)
            .await;
        let details = fetcher.fetch_movie_details_by_id("tt1").await;

        assert_eq!(details.plot.as_deref(), Some("Cops and robbers."));
        assert_eq!(fetcher.lookup.id_lookups.lock().unwrap().len(), 1);
    }
}
