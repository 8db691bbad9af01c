//! AnalyticsEngine: pure, recomputable analytics over ledger reads.

pub mod anomalies;
pub mod bursts;
pub mod cache;
pub mod error;
pub mod global;
pub mod graph;
pub mod health;
pub mod patterns;
pub mod recommendations;
pub mod session;
pub mod signals;
pub mod stats;

pub use anomalies::{Anomaly, AnomalyCode};
pub use cache::AnalysisCache;
pub use error::QueryError;
pub use global::{analyze_global, GlobalAnalysis, GlobalQuery};
pub use graph::{build_interaction_graph, InteractionGraph};
pub use health::HealthBreakdown;
pub use session::{analyze_records, analyze_session, window_start, SessionAnalysis};
pub use stats::CountEntry;
