use serde::{Deserialize, Serialize};

use baton_core::config::BatonConfig;
use baton_core::error::CoreError;
use baton_core::model::SessionId;
use baton_core::EventLedger;

use crate::error::QueryError;
use crate::session::{analyze_records, read_window, SessionAnalysis};
use crate::stats::{increment, mean, pstdev, round_to, top_counter, CountEntry, Counter};

/// Parameters of a cross-session analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalQuery {
    pub limit_sessions: usize,
    pub top_n: usize,
    pub raw: bool,
}

impl GlobalQuery {
    pub fn from_config(config: &BatonConfig) -> Self {
        Self {
            limit_sessions: config.global.limit_sessions,
            top_n: config.analysis.top_n,
            raw: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionHealthRow {
    pub session_id: SessionId,
    pub event_count: usize,
    pub health_score: f64,
    pub anomaly_count: usize,
}

/// Key present in more than one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringEntry {
    pub key: String,
    pub sessions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierSession {
    pub session_id: SessionId,
    pub health_score: f64,
    pub anomaly_count: usize,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalAnalysis {
    /// Most recently active first.
    pub selected_session_ids: Vec<SessionId>,
    pub session_count: usize,
    pub total_events: usize,
    pub mean_health_score: f64,
    pub health_stddev: f64,
    pub top_event_types: Vec<CountEntry>,
    pub top_motifs_bigram: Vec<CountEntry>,
    pub recurring_event_types: Vec<RecurringEntry>,
    pub recurring_motifs_bigram: Vec<RecurringEntry>,
    pub outlier_sessions: Vec<OutlierSession>,
    pub session_health: Vec<SessionHealthRow>,
    pub raw: bool,
}

/// Analyze the `limit_sessions` most recently active sessions.
pub fn analyze_global(
    ledger: &EventLedger,
    config: &BatonConfig,
    query: &GlobalQuery,
) -> Result<GlobalAnalysis, QueryError> {
    if query.raw && !config.ledger.allow_raw_reads {
        return Err(CoreError::RawReadsDisabled.into());
    }
    if query.limit_sessions == 0 {
        return Err(QueryError::InvalidQuery("limit_sessions must be positive".into()));
    }

    let selected = ledger.list_sessions(query.limit_sessions);
    let mut analyses = Vec::with_capacity(selected.len());
    for session_id in &selected {
        let records = read_window(ledger, session_id, config, query.raw)?;
        let mut analysis = analyze_records(session_id, &records, &config.scoring, query.top_n);
        analysis.raw = query.raw;
        analyses.push(analysis);
    }

    let mut global = aggregate(&analyses, config, query.top_n);
    global.selected_session_ids = selected;
    global.raw = query.raw;
    tracing::info!(
        sessions = global.session_count,
        events = global.total_events,
        outliers = global.outlier_sessions.len(),
        "Global analysis complete"
    );
    Ok(global)
}

/// Combine per-session analyses. Order of `analyses` only affects
/// `session_health`.
pub fn aggregate(analyses: &[SessionAnalysis], config: &BatonConfig, top_n: usize) -> GlobalAnalysis {
    let mut type_totals = Counter::new();
    let mut motif_totals = Counter::new();
    let mut type_presence = Counter::new();
    let mut motif_presence = Counter::new();
    for a in analyses {
        for (key, count) in &a.distribution.event_type_counts {
            *type_totals.entry(key.clone()).or_default() += count;
            increment(&mut type_presence, key.as_str());
        }
        for (key, count) in &a.bigram_counts {
            *motif_totals.entry(key.clone()).or_default() += count;
            increment(&mut motif_presence, key.as_str());
        }
    }

    let scores: Vec<f64> = analyses.iter().map(|a| a.health_score).collect();
    let mean_health = mean(&scores);
    let settings = &config.global;

    let mut outliers: Vec<OutlierSession> = analyses
        .iter()
        .filter_map(|a| {
            let mut reasons = Vec::new();
            let deviation = a.health_score - mean_health;
            if deviation.abs() > settings.deviation_threshold {
                reasons.push(format!(
                    "health {:.2} deviates {:+.2} from mean {:.2}",
                    a.health_score, deviation, mean_health
                ));
            }
            if a.anomalies.len() > settings.anomaly_ceiling {
                reasons.push(format!(
                    "{} anomalies exceed ceiling {}",
                    a.anomalies.len(),
                    settings.anomaly_ceiling
                ));
            }
            (!reasons.is_empty()).then(|| OutlierSession {
                session_id: a.session_id.clone(),
                health_score: a.health_score,
                anomaly_count: a.anomalies.len(),
                reasons,
            })
        })
        .collect();
    outliers.sort_by(|a, b| {
        a.health_score
            .total_cmp(&b.health_score)
            .then_with(|| a.session_id.cmp(&b.session_id))
    });

    GlobalAnalysis {
        selected_session_ids: analyses.iter().map(|a| a.session_id.clone()).collect(),
        session_count: analyses.len(),
        total_events: analyses.iter().map(|a| a.event_count).sum(),
        mean_health_score: round_to(mean_health, 4),
        health_stddev: round_to(pstdev(&scores), 4),
        top_event_types: top_counter(&type_totals, top_n),
        top_motifs_bigram: top_counter(&motif_totals, top_n),
        recurring_event_types: recurring(&type_presence, top_n),
        recurring_motifs_bigram: recurring(&motif_presence, top_n),
        outlier_sessions: outliers,
        session_health: analyses
            .iter()
            .map(|a| SessionHealthRow {
                session_id: a.session_id.clone(),
                event_count: a.event_count,
                health_score: a.health_score,
                anomaly_count: a.anomalies.len(),
            })
            .collect(),
        raw: false,
    }
}

fn recurring(presence: &Counter, top_n: usize) -> Vec<RecurringEntry> {
    let shared: Counter = presence
        .iter()
        .filter(|(_, sessions)| **sessions > 1)
        .map(|(k, v)| (k.clone(), *v))
        .collect();
    top_counter(&shared, top_n)
        .into_iter()
        .map(|e| RecurringEntry {
            key: e.key,
            sessions: e.count,
        })
        .collect()
}
