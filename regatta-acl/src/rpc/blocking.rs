//! Long-poll query engine.
//!
//! Reads carrying a `min_query_index` block until the watched tables'
//! index exceeds the floor or the wait times out. The watch subscription is
//! taken *before* the evaluation snapshot, so a write racing the first
//! evaluation wakes the loop instead of being missed. Wakeups are coalesced
//! and may be spurious; the loop re-evaluates and only replies once the
//! index actually advanced or the deadline passed.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::AclError;
use crate::state::{Snapshot, StateStore, TableId, WatchSet};

use super::message::QueryOptions;

/// Default block when the caller sets a floor but no explicit wait.
pub(crate) const DEFAULT_QUERY_WAIT: Duration = Duration::from_secs(300);

/// Upper bound on any single long-poll.
pub(crate) const MAX_QUERY_WAIT: Duration = Duration::from_secs(600);

fn wait_duration(opts: &QueryOptions) -> Duration {
    if opts.max_query_time_ms == 0 {
        return DEFAULT_QUERY_WAIT;
    }
    Duration::from_millis(opts.max_query_time_ms).min(MAX_QUERY_WAIT)
}

/// Runs `evaluate` against a fresh snapshot until the reply index exceeds
/// the caller's floor or the wait expires. Returns the result together with
/// the reply index (the maximum index of the watched tables, floored at 1).
pub(crate) async fn blocking_query<T, F>(
    store: &StateStore,
    opts: &QueryOptions,
    tables: &[TableId],
    mut evaluate: F,
) -> Result<(T, u64), AclError>
where
    F: FnMut(&Snapshot) -> Result<T, AclError>,
{
    let blocking = opts.min_query_index > 0;
    let deadline = Instant::now() + wait_duration(opts);

    loop {
        let mut watch_set = WatchSet::new();
        if blocking {
            for &table in tables {
                store.subscribe(&mut watch_set, table);
            }
        }

        let snapshot = store.snapshot();
        let index = tables.iter().map(|&table| snapshot.index(table)).max().unwrap_or(1);
        let result = evaluate(&snapshot)?;

        if !blocking || index > opts.min_query_index {
            return Ok((result, index));
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok((result, index));
        }

        tokio::select! {
            () = watch_set.wait() => {}
            () = tokio::time::sleep_until(deadline) => {
                // Deadline: reply with the current result and index.
                let snapshot = store.snapshot();
                let index = tables.iter().map(|&table| snapshot.index(table)).max().unwrap_or(1);
                let result = evaluate(&snapshot)?;
                return Ok((result, index));
            }
        }
    }
}
