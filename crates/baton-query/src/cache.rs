use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use baton_core::config::BatonConfig;
use baton_core::model::SessionId;
use baton_core::EventLedger;

use crate::error::QueryError;
use crate::session::{analyze_session, SessionAnalysis};

#[derive(Debug, Clone, PartialEq, Eq)]
struct CacheKey {
    next_sequence: u64,
    fingerprint: String,
    raw: bool,
}

/// Memoizes session analyses. An entry is valid while the session's next
/// sequence and the configuration fingerprint are unchanged; analysis is a
/// pure function of those inputs, so a hit equals a recomputation.
#[derive(Debug, Default)]
pub struct AnalysisCache {
    entries: Mutex<HashMap<SessionId, (CacheKey, Arc<SessionAnalysis>)>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl AnalysisCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compute(
        &self,
        ledger: &EventLedger,
        session_id: &SessionId,
        config: &BatonConfig,
        raw: bool,
    ) -> Result<Arc<SessionAnalysis>, QueryError> {
        let key = CacheKey {
            next_sequence: ledger.next_sequence(session_id),
            fingerprint: config.fingerprint(),
            raw,
        };
        if let Some((cached_key, analysis)) = self.entries.lock().get(session_id) {
            if *cached_key == key {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Arc::clone(analysis));
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let analysis = Arc::new(analyze_session(ledger, session_id, config, raw)?);
        self.entries
            .lock()
            .insert(session_id.clone(), (key, Arc::clone(&analysis)));
        Ok(analysis)
    }

    pub fn invalidate(&self, session_id: &SessionId) {
        self.entries.lock().remove(session_id);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// (hits, misses)
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}
