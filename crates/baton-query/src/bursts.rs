use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use baton_core::model::LedgerRecord;

use crate::stats::{mean, pstdev, round_to};

/// A fixed-width time bucket with unusually many events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurstWindow {
    pub bucket_index: i64,
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    pub event_count: usize,
    pub z_score: f64,
}

/// Buckets of `bucket_seconds` counted from the earliest timestamp; a bucket
/// is a burst when its count reaches both `mean + 2·stddev` and `min_events`.
pub fn burst_windows<'a>(
    records: impl IntoIterator<Item = &'a LedgerRecord>,
    bucket_seconds: i64,
    min_events: usize,
) -> Vec<BurstWindow> {
    let stamps: Vec<DateTime<Utc>> = records
        .into_iter()
        .map(|r| r.envelope.timestamp_utc)
        .collect();
    if stamps.len() <= 1 || bucket_seconds < 1 {
        return Vec::new();
    }
    let Some(first) = stamps.iter().min().copied() else {
        return Vec::new();
    };

    let mut buckets: BTreeMap<i64, usize> = BTreeMap::new();
    for ts in &stamps {
        let index = (*ts - first).num_seconds() / bucket_seconds;
        *buckets.entry(index).or_default() += 1;
    }
    if buckets.len() <= 1 {
        return Vec::new();
    }

    let counts: Vec<f64> = buckets.values().map(|c| *c as f64).collect();
    let m = mean(&counts);
    let sd = pstdev(&counts);
    let threshold = (m + 2.0 * sd).max(min_events as f64);

    buckets
        .into_iter()
        .filter(|(_, count)| *count as f64 >= threshold)
        .map(|(index, count)| {
            let start_ts = first + Duration::seconds(index * bucket_seconds);
            BurstWindow {
                bucket_index: index,
                start_ts,
                end_ts: start_ts + Duration::seconds(bucket_seconds),
                event_count: count,
                z_score: if sd > 0.0 {
                    round_to((count as f64 - m) / sd, 6)
                } else {
                    0.0
                },
            }
        })
        .collect()
}
