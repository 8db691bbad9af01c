pub mod settings;

pub use settings::{
    AnalysisSettings, AnomalyThresholds, BatonConfig, EventClassifier, GateThresholds,
    GlobalSettings, HandoffPolicy, HandoffVocabulary, HealthWeights, LedgerSettings,
    ScoringProfile, SeverityWeights, CONFIG_FILE,
};
