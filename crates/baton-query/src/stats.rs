use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Frequency table keyed by a string. `BTreeMap` keeps iteration order
/// independent of hashing.
pub type Counter = BTreeMap<String, usize>;

/// One row of a top-N listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountEntry {
    pub key: String,
    pub count: usize,
}

pub fn increment(counter: &mut Counter, key: impl Into<String>) {
    *counter.entry(key.into()).or_default() += 1;
}

/// Top `n` entries by count descending, ties broken by key ascending.
pub fn top_counter(counter: &Counter, n: usize) -> Vec<CountEntry> {
    let mut rows: Vec<CountEntry> = counter
        .iter()
        .map(|(key, count)| CountEntry {
            key: key.clone(),
            count: *count,
        })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
    rows.truncate(n);
    rows
}

/// Percentile with linear interpolation between closest ranks.
pub fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = (sorted.len() - 1) as f64 * (pct.clamp(0.0, 100.0) / 100.0);
    let low = rank.floor() as usize;
    let high = (low + 1).min(sorted.len() - 1);
    let fraction = rank - low as f64;
    sorted[low] * (1.0 - fraction) + sorted[high] * fraction
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Population standard deviation.
pub fn pstdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Shannon entropy in bits.
pub fn entropy(counter: &Counter) -> f64 {
    let total: usize = counter.values().sum();
    if total == 0 {
        return 0.0;
    }
    counter
        .values()
        .filter(|c| **c > 0)
        .map(|c| {
            let p = *c as f64 / total as f64;
            -p * p.log2()
        })
        .sum()
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_interpolates() {
        let v = [10.0, 20.0, 30.0, 40.0];
        assert_eq!(percentile(&v, 0.0), 10.0);
        assert_eq!(percentile(&v, 100.0), 40.0);
        assert!((percentile(&v, 50.0) - 25.0).abs() < 1e-9);
        assert_eq!(percentile(&[7.0], 95.0), 7.0);
        assert_eq!(percentile(&[], 95.0), 0.0);
    }

    #[test]
    fn test_top_counter_breaks_ties_by_key() {
        let mut c = Counter::new();
        for key in ["b", "a", "c", "b", "a", "d"] {
            increment(&mut c, key);
        }
        let top = top_counter(&c, 3);
        let keys: Vec<&str> = top.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(top[0].count, 2);
    }

    #[test]
    fn test_entropy_and_spread() {
        let mut c = Counter::new();
        increment(&mut c, "x");
        increment(&mut c, "y");
        assert!((entropy(&c) - 1.0).abs() < 1e-12);
        assert_eq!(entropy(&Counter::new()), 0.0);
        assert!((pstdev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]) - 2.0).abs() < 1e-12);
        assert_eq!(round_to(1.23456, 2), 1.23);
    }
}
