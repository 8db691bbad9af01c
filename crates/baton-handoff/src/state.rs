use serde::{Deserialize, Serialize};

/// States of one context-window transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HandoffState {
    Triggered,
    Frozen,
    Snapshotted,
    Compressed,
    Pruned,
    Validated,
    Bootstrapped,
    Verified,
    Completed,
    Failed,
}

impl HandoffState {
    /// The happy path, in order.
    pub const PATH: [HandoffState; 9] = [
        HandoffState::Triggered,
        HandoffState::Frozen,
        HandoffState::Snapshotted,
        HandoffState::Compressed,
        HandoffState::Pruned,
        HandoffState::Validated,
        HandoffState::Bootstrapped,
        HandoffState::Verified,
        HandoffState::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HandoffState::Triggered => "TRIGGERED",
            HandoffState::Frozen => "FROZEN",
            HandoffState::Snapshotted => "SNAPSHOTTED",
            HandoffState::Compressed => "COMPRESSED",
            HandoffState::Pruned => "PRUNED",
            HandoffState::Validated => "VALIDATED",
            HandoffState::Bootstrapped => "BOOTSTRAPPED",
            HandoffState::Verified => "VERIFIED",
            HandoffState::Completed => "COMPLETED",
            HandoffState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, HandoffState::Completed | HandoffState::Failed)
    }

    /// Once the packet is in the target session the run may not be cancelled.
    pub fn is_cancellable(&self) -> bool {
        *self < HandoffState::Bootstrapped
    }

    /// The successor on the happy path; `None` for terminal states.
    pub fn next(&self) -> Option<HandoffState> {
        let i = Self::PATH.iter().position(|s| s == self)?;
        Self::PATH.get(i + 1).copied()
    }

    /// Forward one step on the path, or into `Failed` from any non-terminal state.
    /// `Snapshotted` may be re-entered when the evidence budget is widened.
    pub fn can_transition_to(&self, to: HandoffState) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == HandoffState::Failed
            || self.next() == Some(to)
            || (*self == HandoffState::Snapshotted && to == HandoffState::Snapshotted)
    }
}

impl std::fmt::Display for HandoffState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sequence of states a run has passed through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTrail(Vec<HandoffState>);

impl StateTrail {
    pub fn new() -> Self {
        Self(vec![HandoffState::Triggered])
    }

    pub fn current(&self) -> HandoffState {
        self.0.last().copied().unwrap_or(HandoffState::Triggered)
    }

    /// Record a transition. Illegal transitions are ignored and reported.
    pub fn advance(&mut self, to: HandoffState) -> bool {
        let from = self.current();
        if !from.can_transition_to(to) {
            tracing::error!(from = %from, to = %to, "Illegal handoff state transition");
            return false;
        }
        self.0.push(to);
        true
    }

    pub fn states(&self) -> &[HandoffState] {
        &self.0
    }
}
