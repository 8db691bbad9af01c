use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CoreError;
use crate::model::Severity;

/// File name of the configuration inside a ledger directory.
pub const CONFIG_FILE: &str = "baton.toml";

/// Complete configuration, passed explicitly into every component.
///
/// Every section has a documented default; a TOML file only needs to name
/// the fields it overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatonConfig {
    pub ledger: LedgerSettings,
    pub scoring: ScoringProfile,
    pub analysis: AnalysisSettings,
    pub global: GlobalSettings,
    pub handoff: HandoffPolicy,
    pub gates: GateThresholds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    /// Redact secret-looking payload content on read unless `raw` is requested.
    pub redact_payloads: bool,
    /// Permit `raw=true` reads and raw dataset exports.
    pub allow_raw_reads: bool,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            redact_payloads: true,
            allow_raw_reads: false,
        }
    }
}

/// Weights and thresholds that shape the health score and anomaly rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringProfile {
    pub weights: HealthWeights,
    pub severity_weights: SeverityWeights,
    pub classifier: EventClassifier,
    pub anomalies: AnomalyThresholds,
}

/// Relative weights of the four health penalties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthWeights {
    pub anomaly_density: f64,
    pub churn: f64,
    pub resource_efficiency: f64,
    pub handoff_smoothness: f64,
}

impl Default for HealthWeights {
    fn default() -> Self {
        Self {
            anomaly_density: 0.4,
            churn: 0.2,
            resource_efficiency: 0.2,
            handoff_smoothness: 0.2,
        }
    }
}

impl HealthWeights {
    pub fn total(&self) -> f64 {
        self.anomaly_density + self.churn + self.resource_efficiency + self.handoff_smoothness
    }
}

/// Mass each finding adds to the anomaly density penalty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityWeights {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            low: 0.5,
            medium: 1.0,
            high: 2.0,
        }
    }
}

impl SeverityWeights {
    pub fn weight(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Low => self.low,
            Severity::Medium => self.medium,
            Severity::High => self.high,
        }
    }
}

/// Markers used to classify event types. Matching is case-insensitive
/// substring matching on `event_type`, except `transition_types` which must
/// match exactly (or contain `HANDOFF`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventClassifier {
    pub failure_markers: Vec<String>,
    pub revision_markers: Vec<String>,
    pub transition_types: Vec<String>,
}

impl Default for EventClassifier {
    fn default() -> Self {
        Self {
            failure_markers: ["FAIL", "ERROR", "EXCEPTION", "TIMEOUT", "CRASH"]
                .map(String::from)
                .to_vec(),
            revision_markers: ["REVISION", "REVISE", "RETRY", "REDO", "ROLLBACK"]
                .map(String::from)
                .to_vec(),
            transition_types: ["DELEGATE", "TASK_ASSIGNED", "TASK_RETURNED", "REVIEW_REQUESTED"]
                .map(String::from)
                .to_vec(),
        }
    }
}

impl EventClassifier {
    pub fn is_failure(&self, event_type: &str) -> bool {
        contains_marker(event_type, &self.failure_markers)
    }

    pub fn is_revision(&self, event_type: &str) -> bool {
        contains_marker(event_type, &self.revision_markers)
    }

    pub fn is_transition(&self, event_type: &str) -> bool {
        event_type.to_ascii_uppercase().contains("HANDOFF")
            || self
                .transition_types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(event_type))
    }
}

fn contains_marker(event_type: &str, markers: &[String]) -> bool {
    let upper = event_type.to_ascii_uppercase();
    markers
        .iter()
        .any(|m| !m.is_empty() && upper.contains(&m.to_ascii_uppercase()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyThresholds {
    /// Same failure type this many times within `failure_window_seconds`.
    pub repeated_failure_count: usize,
    pub failure_window_seconds: i64,
    /// Percentile used as the latency baseline for outlier detection.
    pub latency_percentile: f64,
    pub latency_outlier_multiplier: f64,
    /// Latencies below this are never outliers.
    pub latency_floor_ms: u64,
    pub high_p95_latency_ms: f64,
    pub burst_bucket_seconds: i64,
    pub burst_min_events: usize,
    pub reliability_density: f64,
    pub debate_density: f64,
    pub decision_density: f64,
    pub oscillation_min_count: usize,
    /// p95/p50 ratio at which the resource penalty saturates.
    pub resource_spread_cap: f64,
}

impl Default for AnomalyThresholds {
    fn default() -> Self {
        Self {
            repeated_failure_count: 3,
            failure_window_seconds: 300,
            latency_percentile: 95.0,
            latency_outlier_multiplier: 2.0,
            latency_floor_ms: 200,
            high_p95_latency_ms: 800.0,
            burst_bucket_seconds: 60,
            burst_min_events: 3,
            reliability_density: 0.2,
            debate_density: 0.2,
            decision_density: 0.05,
            oscillation_min_count: 2,
            resource_spread_cap: 4.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Clean (non-anomalous) records a session analysis window ends with;
    /// anomalous records inside that tail are always included.
    pub window_events: usize,
    pub top_n: usize,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            window_events: 10_000,
            top_n: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSettings {
    pub limit_sessions: usize,
    /// Absolute health-score distance from the mean that marks an outlier.
    pub deviation_threshold: f64,
    /// Sessions with more anomalies than this are outliers.
    pub anomaly_ceiling: usize,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            limit_sessions: 50,
            deviation_threshold: 20.0,
            anomaly_ceiling: 5,
        }
    }
}

/// Event type names the snapshot step reads semantic content from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffVocabulary {
    pub mission: String,
    pub thread_opened: String,
    pub thread_updated: String,
    pub thread_resolved: String,
    pub decision: String,
    pub artifact: Vec<String>,
    pub risk_identified: String,
    pub risk_mitigated: String,
}

impl Default for HandoffVocabulary {
    fn default() -> Self {
        Self {
            mission: "MISSION_STATEMENT".into(),
            thread_opened: "THREAD_OPENED".into(),
            thread_updated: "THREAD_UPDATED".into(),
            thread_resolved: "THREAD_RESOLVED".into(),
            decision: "DECISION_RECORDED".into(),
            artifact: vec!["ARTIFACT_CREATED".into(), "ARTIFACT_UPDATED".into()],
            risk_identified: "RISK_IDENTIFIED".into(),
            risk_mitigated: "RISK_MITIGATED".into(),
        }
    }
}

/// Trigger, retry and pruning policy of the handoff coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffPolicy {
    /// Context budget in tokens; a handoff triggers at `trigger_ratio` of it.
    pub context_budget_tokens: u64,
    pub trigger_ratio: f64,
    /// Most recent source events eligible as citations on the first attempt.
    pub initial_evidence_budget: usize,
    /// Multiplier applied to the evidence budget on each coverage retry.
    pub budget_growth_factor: f64,
    pub max_coverage_retries: u32,
    pub max_items_per_section: usize,
    pub max_evidence_per_claim: usize,
    /// Consecutive failed transitions that raise an alert and block the session.
    pub repeated_failure_ceiling: u32,
    /// Probe pass rate required before the target session may resume.
    pub resume_threshold: f64,
    pub probe_timeout_ms: u64,
    pub vocabulary: HandoffVocabulary,
}

impl Default for HandoffPolicy {
    fn default() -> Self {
        Self {
            context_budget_tokens: 200_000,
            trigger_ratio: 0.8,
            initial_evidence_budget: 250,
            budget_growth_factor: 2.0,
            max_coverage_retries: 2,
            max_items_per_section: 50,
            max_evidence_per_claim: 8,
            repeated_failure_ceiling: 3,
            resume_threshold: 1.0,
            probe_timeout_ms: 30_000,
            vocabulary: HandoffVocabulary::default(),
        }
    }
}

/// Promotion thresholds shared by the coordinator and the quality gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateThresholds {
    pub min_coverage: f64,
    pub min_confidence: f64,
    pub required_probe_pass_rate: f64,
    /// Allowed increase of the silent-failure rate over the baseline.
    pub silent_failure_tolerance: f64,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            min_coverage: 0.8,
            min_confidence: 0.6,
            required_probe_pass_rate: 1.0,
            silent_failure_tolerance: 0.0,
        }
    }
}

impl BatonConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let config: BatonConfig = toml::from_str(&text)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `baton.toml` from a ledger directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self, CoreError> {
        Self::load(&dir.join(CONFIG_FILE))
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self)
            .map_err(|e| CoreError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let w = &self.scoring.weights;
        for (name, value) in [
            ("anomaly_density", w.anomaly_density),
            ("churn", w.churn),
            ("resource_efficiency", w.resource_efficiency),
            ("handoff_smoothness", w.handoff_smoothness),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(CoreError::Config(format!(
                    "scoring.weights.{name} must be non-negative, got {value}"
                )));
            }
        }
        if w.total() <= 0.0 {
            return Err(CoreError::Config(
                "scoring.weights must not all be zero".into(),
            ));
        }
        let g = &self.gates;
        for (name, value) in [
            ("min_coverage", g.min_coverage),
            ("min_confidence", g.min_confidence),
            ("required_probe_pass_rate", g.required_probe_pass_rate),
            ("handoff.resume_threshold", self.handoff.resume_threshold),
            ("handoff.trigger_ratio", self.handoff.trigger_ratio),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(CoreError::Config(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.handoff.budget_growth_factor <= 1.0 {
            return Err(CoreError::Config(format!(
                "handoff.budget_growth_factor must be greater than 1, got {}",
                self.handoff.budget_growth_factor
            )));
        }
        if self.handoff.initial_evidence_budget == 0 {
            return Err(CoreError::Config(
                "handoff.initial_evidence_budget must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Stable short digest of the configuration, used as a cache key component.
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
    }
}
