use serde::{Deserialize, Serialize};

use baton_core::config::HandoffPolicy;
use baton_core::model::lifecycle::{self, CONTEXT_HANDOFF_REQUESTED};
use baton_core::model::{EventId, LedgerRecord};

/// Why a transition was started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerReason {
    /// Tokens used since the last handoff crossed `trigger_ratio` of the budget.
    ContextBudget { used_tokens: u64, budget_tokens: u64 },
    /// An agent appended `CONTEXT_HANDOFF_REQUESTED`.
    ExplicitRequest { event_id: EventId },
    /// Operator or orchestrator outside the ledger.
    External { signal: String },
}

/// Check the trigger conditions over a session's records. Only records
/// after the most recent lifecycle event count, so a completed or failed
/// transition does not re-fire on the same evidence.
pub fn evaluate(records: &[LedgerRecord], policy: &HandoffPolicy) -> Option<TriggerReason> {
    let start = records
        .iter()
        .rposition(|r| lifecycle::is_handoff_lifecycle(r.event_type()))
        .map_or(0, |i| i + 1);
    let recent = &records[start..];

    if let Some(request) = recent
        .iter()
        .find(|r| r.event_type() == CONTEXT_HANDOFF_REQUESTED)
    {
        return Some(TriggerReason::ExplicitRequest {
            event_id: request.event_id().clone(),
        });
    }

    let used_tokens: u64 = recent.iter().map(|r| r.envelope.total_tokens()).sum();
    let threshold = policy.context_budget_tokens as f64 * policy.trigger_ratio;
    if policy.context_budget_tokens > 0 && used_tokens as f64 >= threshold {
        return Some(TriggerReason::ContextBudget {
            used_tokens,
            budget_tokens: policy.context_budget_tokens,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_core::model::{ActorRole, EventEnvelope};

    fn rec(seq: u64, event_type: &str, tokens: u64) -> LedgerRecord {
        LedgerRecord {
            sequence: seq,
            envelope: EventEnvelope::new("s".into(), "a", ActorRole::Worker, event_type)
                .with_tokens(tokens, 0),
        }
    }

    #[test]
    fn test_budget_trigger() {
        let policy = HandoffPolicy {
            context_budget_tokens: 1000,
            trigger_ratio: 0.5,
            ..HandoffPolicy::default()
        };
        let mut records = vec![rec(0, "CODE", 300)];
        assert_eq!(evaluate(&records, &policy), None);
        records.push(rec(1, "CODE", 200));
        assert_eq!(
            evaluate(&records, &policy),
            Some(TriggerReason::ContextBudget {
                used_tokens: 500,
                budget_tokens: 1000
            })
        );
        records.push(rec(2, "CONTEXT_HANDOFF_COMPLETED", 0));
        assert_eq!(evaluate(&records, &policy), None);
    }

    #[test]
    fn test_explicit_request_wins() {
        let records = vec![rec(0, "CODE", 1), rec(1, CONTEXT_HANDOFF_REQUESTED, 0)];
        match evaluate(&records, &HandoffPolicy::default()) {
            Some(TriggerReason::ExplicitRequest { event_id }) => {
                assert_eq!(&event_id, records[1].event_id())
            }
            other => panic!("unexpected trigger: {other:?}"),
        }
    }
}
