use crate::db::Database;
use crate::error::Result;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// Re-tally polls with new votes every `period`, forever.
pub async fn run(database: Arc<Database>, period: Duration) {
    info!("Starting snapshot task, refreshing every {}s", period.as_secs());
    let mut ticker = interval(period);

    loop {
        ticker.tick().await;
        match snapshot_once(&database).await {
            Ok(0) => debug!("No polls needed a new snapshot"),
            Ok(refreshed) => info!("Refreshed {} poll snapshot(s)", refreshed),
            Err(e) => error!("Failed to query polls needing a snapshot: {}", e),
        }
    }
}

/// One pass: tally and persist every poll whose votes changed since its last
/// snapshot. Failures on individual polls are logged and skipped. Returns the
/// number of snapshots written.
pub async fn snapshot_once(database: &Database) -> Result<usize> {
    let poll_ids = database.polls_needing_snapshot().await?;
    let mut refreshed = 0;

    for poll_id in poll_ids {
        match refresh(database, &poll_id).await {
            Ok(true) => refreshed += 1,
            Ok(false) => warn!("Poll {} disappeared before its snapshot", poll_id),
            Err(e) => error!("Error refreshing snapshot for poll {}: {}", poll_id, e),
        }
    }

    Ok(refreshed)
}

async fn refresh(database: &Database, poll_id: &str) -> Result<bool> {
    let Some(tally) = database.tally_poll(poll_id).await? else {
        return Ok(false);
    };
    database
        .save_snapshot(&tally.poll.id, &tally.results, tally.vote_count, tally.tallied_at)
        .await?;
    debug!(
        "Snapshot for poll {} ({} votes): winner {:?}",
        tally.poll.id,
        tally.vote_count,
        tally.results.winner().map(|m| m.title.as_str())
    );
    Ok(true)
}
