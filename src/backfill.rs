//! History backfill cursor
//!
//! Backfill walks backwards one local day per step, starting at yesterday,
//! until it reaches the configured depth or the day the system came online.

use chrono::{Duration, NaiveDate};
use serde::Serialize;

/// Persisted per-system backfill progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackfillCursor {
    /// Oldest local day already fetched
    pub oldest_day: Option<NaiveDate>,
    pub complete: bool,
}

/// Next day to backfill, or `None` when history is exhausted
pub fn next_backfill_day(
    today: NaiveDate,
    cursor: Option<NaiveDate>,
    max_days: u32,
    earliest: Option<NaiveDate>,
) -> Option<NaiveDate> {
    let candidate = match cursor {
        None => today.pred_opt()?,
        Some(oldest) => oldest.pred_opt()?,
    };

    let limit = today - Duration::days(i64::from(max_days));
    if candidate < limit || candidate >= today {
        return None;
    }
    if let Some(first) = earliest
        && candidate < first
    {
        return None;
    }
    Some(candidate)
}
