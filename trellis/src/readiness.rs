//! Readiness summaries and the debate-state formula.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Per-database readiness as observed by the agent pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Readiness {
    Ready,
    Degraded,
    Unreachable,
}

/// Snapshot of database readiness taken at the start of a debate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessSummary {
    pub ready: BTreeSet<String>,
    pub degraded: BTreeSet<String>,
    /// Databases whose backend is unreachable; no agent exists for them.
    pub blocked: BTreeSet<String>,
}

impl ReadinessSummary {
    /// Databases a debate will attempt: ready plus degraded.
    pub fn attempted(&self) -> Vec<String> {
        self.ready.iter().chain(self.degraded.iter()).cloned().collect()
    }
}

/// Aggregate state of a debate request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebateState {
    /// Every target database is ready.
    Ready,
    /// At least one agent can run but some databases are degraded or down.
    Degraded,
    /// No agent can run; the supervisor may redirect to the semantic flow.
    Blocked,
}

/// `ready` iff nothing is degraded or blocked; `blocked` iff no database is
/// fully ready; `degraded` otherwise (at least one ready plus trouble).
pub fn debate_state(summary: &ReadinessSummary) -> DebateState {
    if summary.ready.is_empty() {
        DebateState::Blocked
    } else if summary.blocked.is_empty() && summary.degraded.is_empty() {
        DebateState::Ready
    } else {
        DebateState::Degraded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    /// **Scenario**: the three-way formula over (ready, degraded, blocked) sets.
    #[test]
    fn debate_state_formula() {
        let all_ready = ReadinessSummary {
            ready: set(&["a", "b"]),
            ..Default::default()
        };
        assert_eq!(debate_state(&all_ready), DebateState::Ready);

        let one_down = ReadinessSummary {
            ready: set(&["a"]),
            blocked: set(&["b"]),
            ..Default::default()
        };
        assert_eq!(debate_state(&one_down), DebateState::Degraded);

        // Without any fully ready database a debate cannot be trusted, even
        // when degraded agents could still answer.
        let stale_only = ReadinessSummary {
            degraded: set(&["a"]),
            ..Default::default()
        };
        assert_eq!(debate_state(&stale_only), DebateState::Blocked);

        let nothing = ReadinessSummary {
            blocked: set(&["a", "b"]),
            ..Default::default()
        };
        assert_eq!(debate_state(&nothing), DebateState::Blocked);
    }
}
