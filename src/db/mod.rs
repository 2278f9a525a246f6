use crate::error::{Error, Result};
use crate::models::{Ballot, Poll, StoredVote, VotingMethod};
use crate::validation::{validate_poll, validate_vote_data};
use crate::voting::{tally, PollResults};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use log::{info, warn};
use serde_json::Value;
use sqlx::{
    migrate::MigrateDatabase,
    sqlite::{SqlitePool, SqlitePoolOptions},
    Row, Sqlite,
};
use std::collections::HashSet;

/// A persisted tally for one poll.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub results: PollResults,
    pub vote_count: usize,
    pub computed_at: DateTime<Utc>,
}

/// A poll tallied from the ballots stored at `tallied_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct PollTally {
    pub poll: Poll,
    pub results: PollResults,
    pub vote_count: usize,
    pub tallied_at: DateTime<Utc>,
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        // Create database if it doesn't exist
        if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            info!("Creating database at {}", db_url);
            Sqlite::create_database(db_url).await?;
        }

        // Each connection to an in-memory database sees its own empty copy
        let in_memory = db_url.contains(":memory:");
        let options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = options.connect(db_url).await?;

        Self::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS polls (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                voting_method TEXT NOT NULL,
                movies TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS votes (
                poll_id TEXT NOT NULL,
                voter_fingerprint TEXT NOT NULL,
                vote_data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (poll_id, voter_fingerprint),
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS poll_results (
                poll_id TEXT PRIMARY KEY,
                results TEXT NOT NULL,
                vote_count INTEGER NOT NULL,
                computed_at TEXT NOT NULL,
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Store a new poll. The title is trimmed and must not be blank, and the
    /// poll needs at least two movies.
    pub async fn create_poll(&self, poll: &Poll) -> Result<()> {
        let title = validate_poll(&poll.title, &poll.movies)?;

        sqlx::query(
            r#"
            INSERT INTO polls (id, title, voting_method, movies, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&poll.id)
        .bind(title)
        .bind(poll.voting_method.as_str())
        .bind(serde_json::to_string(&poll.movies)?)
        .bind(timestamp(poll.created_at))
        .execute(&self.pool)
        .await?;

        info!("Created {} poll {} with {} movies", poll.voting_method, poll.id, poll.movies.len());
        Ok(())
    }

    pub async fn get_poll(&self, poll_id: &str) -> Result<Option<Poll>> {
        let row = sqlx::query(
            r#"
            SELECT id, title, voting_method, movies, created_at
            FROM polls
            WHERE id = ?
            "#,
        )
        .bind(poll_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let voting_method: VotingMethod = row.get::<String, _>("voting_method").parse()?;
        let movies = serde_json::from_str(&row.get::<String, _>("movies"))?;
        let created_at = parse_timestamp(&row.get::<String, _>("created_at"))?;

        Ok(Some(Poll {
            id: row.get("id"),
            title: row.get("title"),
            voting_method,
            movies,
            created_at,
        }))
    }

    /// Every stored vote for a poll, oldest first.
    pub async fn get_votes(&self, poll_id: &str) -> Result<Vec<StoredVote>> {
        let rows = sqlx::query(
            r#"
            SELECT poll_id, voter_fingerprint, vote_data, created_at
            FROM votes
            WHERE poll_id = ?
            ORDER BY created_at, voter_fingerprint
            "#,
        )
        .bind(poll_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<StoredVote> {
                let voter_fingerprint: String = row.get("voter_fingerprint");
                let vote_data = decode_ballot(&row.get::<String, _>("vote_data"), &voter_fingerprint);
                Ok(StoredVote {
                    poll_id: row.get("poll_id"),
                    voter_fingerprint,
                    vote_data,
                    created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
                })
            })
            .collect()
    }

    pub async fn get_ballots(&self, poll_id: &str) -> Result<Vec<Ballot>> {
        Ok(self
            .get_votes(poll_id)
            .await?
            .into_iter()
            .map(|vote| vote.vote_data)
            .collect())
    }

    /// Validate `vote_data` against the poll and store it, replacing any
    /// earlier vote from the same voter.
    pub async fn record_vote(&self, poll_id: &str, voter_fingerprint: &str, vote_data: &Value) -> Result<Ballot> {
        let poll = self
            .get_poll(poll_id)
            .await?
            .ok_or_else(|| Error::PollNotFound(poll_id.to_string()))?;

        let valid_ids: HashSet<&str> = poll.movies.iter().map(|m| m.id.as_str()).collect();
        let ballot = validate_vote_data(vote_data, poll.voting_method, &valid_ids)?;

        sqlx::query(
            r#"
            INSERT INTO votes (poll_id, voter_fingerprint, vote_data, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(poll_id, voter_fingerprint)
            DO UPDATE SET vote_data = excluded.vote_data, created_at = excluded.created_at
            "#,
        )
        .bind(poll_id)
        .bind(voter_fingerprint)
        .bind(serde_json::to_string(&ballot)?)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(ballot)
    }

    /// Tally a poll from its current ballots. `None` when the poll doesn't exist.
    pub async fn load_results(&self, poll_id: &str) -> Result<Option<(Poll, PollResults, usize)>> {
        Ok(self
            .tally_poll(poll_id)
            .await?
            .map(|tally| (tally.poll, tally.results, tally.vote_count)))
    }

    /// Like [`load_results`](Self::load_results), also recording when the
    /// ballots were read so a snapshot can be dated by it.
    pub async fn tally_poll(&self, poll_id: &str) -> Result<Option<PollTally>> {
        let Some(poll) = self.get_poll(poll_id).await? else {
            return Ok(None);
        };
        // Taken before the read: any vote stored later must date after it.
        // Stored timestamps keep microseconds only.
        let tallied_at = Utc::now().trunc_subsecs(6);
        let ballots = self.get_ballots(poll_id).await?;
        let results = tally(poll.voting_method, &poll.movies, &ballots);
        Ok(Some(PollTally {
            poll,
            results,
            vote_count: ballots.len(),
            tallied_at,
        }))
    }

    /// Store the tally for a poll. `computed_at` should be the time its
    /// ballots were read, so votes arriving after that keep the poll stale.
    pub async fn save_snapshot(
        &self,
        poll_id: &str,
        results: &PollResults,
        vote_count: usize,
        computed_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO poll_results (poll_id, results, vote_count, computed_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(poll_id)
            DO UPDATE SET results = excluded.results,
                          vote_count = excluded.vote_count,
                          computed_at = excluded.computed_at
            "#,
        )
        .bind(poll_id)
        .bind(serde_json::to_string(results)?)
        .bind(vote_count as i64)
        .bind(timestamp(computed_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_snapshot(&self, poll_id: &str) -> Result<Option<Snapshot>> {
        let row = sqlx::query(
            r#"
            SELECT results, vote_count, computed_at
            FROM poll_results
            WHERE poll_id = ?
            "#,
        )
        .bind(poll_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<Snapshot> {
            Ok(Snapshot {
                results: serde_json::from_str(&row.get::<String, _>("results"))?,
                vote_count: row.get::<i64, _>("vote_count").max(0) as usize,
                computed_at: parse_timestamp(&row.get::<String, _>("computed_at"))?,
            })
        })
        .transpose()
    }

    /// Ids of polls whose votes changed since their last snapshot, or that
    /// have votes but no snapshot yet.
    pub async fn polls_needing_snapshot(&self) -> Result<Vec<String>> {
        let ids = sqlx::query(
            r#"
            SELECT p.id
            FROM polls p
            JOIN (
                SELECT poll_id, COUNT(*) AS vote_count, MAX(created_at) AS latest
                FROM votes
                GROUP BY poll_id
            ) v ON v.poll_id = p.id
            LEFT JOIN poll_results r ON r.poll_id = p.id
            WHERE r.poll_id IS NULL
               OR r.vote_count != v.vote_count
               OR v.latest >= r.computed_at
            ORDER BY p.created_at, p.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| row.get::<String, _>("id"))
        .collect();
        Ok(ids)
    }
}

/// Fixed-width UTC timestamps so stored values compare correctly as text.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

fn decode_ballot(raw: &str, voter: &str) -> Ballot {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => Ballot::from(value),
        Err(e) => {
            warn!("Unreadable vote data from {}: {}", voter, e);
            Ballot::Empty
        }
    }
}
