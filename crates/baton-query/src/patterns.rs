//! Event-type motif mining.

use serde::{Deserialize, Serialize};

use crate::stats::{increment, top_counter, CountEntry, Counter};

pub const MOTIF_SEPARATOR: &str = " > ";
pub const TRANSITION_SEPARATOR: &str = "->";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMining {
    pub top_motifs_bigram: Vec<CountEntry>,
    pub top_motifs_trigram: Vec<CountEntry>,
    /// Share of consecutive pairs whose event type changes.
    pub type_switch_ratio: f64,
}

impl PatternMining {
    pub fn mine(event_types: &[&str], top_n: usize) -> Self {
        Self {
            top_motifs_bigram: top_counter(&motif_counts(event_types, 2), top_n),
            top_motifs_trigram: top_counter(&motif_counts(event_types, 3), top_n),
            type_switch_ratio: type_switch_ratio(event_types),
        }
    }
}

/// Counts of consecutive `size`-grams, keyed `A > B > C`.
pub fn motif_counts(event_types: &[&str], size: usize) -> Counter {
    let mut counts = Counter::new();
    if size == 0 {
        return counts;
    }
    for window in event_types.windows(size) {
        increment(&mut counts, window.join(MOTIF_SEPARATOR));
    }
    counts
}

/// Counts of consecutive pairs keyed `A->B`, self pairs included.
pub fn transition_counts(event_types: &[&str]) -> Counter {
    let mut counts = Counter::new();
    for pair in event_types.windows(2) {
        increment(&mut counts, format!("{}{TRANSITION_SEPARATOR}{}", pair[0], pair[1]));
    }
    counts
}

pub fn type_switch_ratio(event_types: &[&str]) -> f64 {
    if event_types.len() <= 1 {
        return 0.0;
    }
    let switches = event_types.windows(2).filter(|w| w[0] != w[1]).count();
    switches as f64 / (event_types.len() - 1) as f64
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OscillationPair {
    /// `A<->B` with `A < B`.
    pub pair: String,
    pub count_forward: usize,
    pub count_reverse: usize,
}

/// Pairs of distinct types that transition back and forth at least
/// `min_count` times in each direction.
pub fn oscillation_pairs(transitions: &Counter, min_count: usize) -> Vec<OscillationPair> {
    let mut pairs = Vec::new();
    for (key, &forward) in transitions {
        let Some((left, right)) = key.split_once(TRANSITION_SEPARATOR) else {
            continue;
        };
        // Each unordered pair once, from its lexicographically smaller side.
        if left >= right {
            continue;
        }
        let reverse = transitions
            .get(&format!("{right}{TRANSITION_SEPARATOR}{left}"))
            .copied()
            .unwrap_or(0);
        if forward >= min_count && reverse >= min_count {
            pairs.push(OscillationPair {
                pair: format!("{left}<->{right}"),
                count_forward: forward,
                count_reverse: reverse,
            });
        }
    }
    pairs
}
