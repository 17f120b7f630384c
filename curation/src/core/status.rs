//! Rule execution status and hook outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution state of a single rule within a stage run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum RuleStatus {
    /// Rule has not started.
    Pending,
    /// `setup_rule` is running.
    Setup,
    /// Query `index` (zero-based) of `total` is running.
    Executing {
        /// Zero-based index of the running query.
        index: usize,
        /// Total number of queries.
        total: usize,
    },
    /// `validate_rule` is running.
    Validating,
    /// Rule completed.
    Succeeded,
    /// Rule failed.
    Failed,
}

impl Default for RuleStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Setup => write!(f, "setup"),
            Self::Executing { index, total } => write!(f, "executing({} of {})", index + 1, total),
            Self::Validating => write!(f, "validating"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl RuleStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Returns true if moving from `self` to `next` is a legal transition.
    ///
    /// Any non-terminal state may fail. Otherwise the order is
    /// pending, setup, executing (ascending index), validating, succeeded.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        match (self, next) {
            (from, Self::Failed) => !from.is_terminal(),
            (Self::Pending, Self::Setup)
            | (Self::Setup | Self::Executing { .. }, Self::Validating)
            | (Self::Validating, Self::Succeeded) => true,
            (Self::Setup, Self::Executing { index, total }) => index == 0 && total > 0,
            (
                Self::Executing { index: from, total },
                Self::Executing {
                    index: to,
                    total: next_total,
                },
            ) => *total == next_total && to == from + 1 && to < next_total,
            _ => false,
        }
    }
}

/// Tagged result of a setup or validation hook.
///
/// `Unverified` is the normal answer of a hook that has no implementation
/// yet. It is reported, never treated as a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum Verification {
    /// The hook ran and its post-condition holds.
    Verified,
    /// The hook is not implemented for this rule.
    Unverified,
    /// The hook ran and reported a problem.
    Failed(String),
}

impl Verification {
    /// Returns true for `Failed`.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for Verification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verified => write!(f, "verified"),
            Self::Unverified => write!(f, "unverified"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            RuleStatus::Pending,
            RuleStatus::Setup,
            RuleStatus::Executing { index: 0, total: 2 },
            RuleStatus::Executing { index: 1, total: 2 },
            RuleStatus::Validating,
            RuleStatus::Succeeded,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_rule_without_queries_skips_executing() {
        assert!(RuleStatus::Setup.can_transition_to(RuleStatus::Validating));
        assert!(!RuleStatus::Setup.can_transition_to(RuleStatus::Executing { index: 0, total: 0 }));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!RuleStatus::Pending.can_transition_to(RuleStatus::Validating));
        assert!(!RuleStatus::Executing { index: 0, total: 3 }
            .can_transition_to(RuleStatus::Executing { index: 2, total: 3 }));
        assert!(!RuleStatus::Succeeded.can_transition_to(RuleStatus::Failed));
        assert!(!RuleStatus::Failed.can_transition_to(RuleStatus::Setup));
    }

    #[test]
    fn test_any_running_state_can_fail() {
        assert!(RuleStatus::Pending.can_transition_to(RuleStatus::Failed));
        assert!(RuleStatus::Executing { index: 1, total: 4 }.can_transition_to(RuleStatus::Failed));
        assert!(RuleStatus::Validating.can_transition_to(RuleStatus::Failed));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(RuleStatus::Executing { index: 0, total: 3 }.to_string(), "executing(1 of 3)");
        assert_eq!(RuleStatus::Succeeded.to_string(), "succeeded");
    }

    #[test]
    fn test_verification_serialize() {
        let json = serde_json::to_string(&Verification::Failed("bad".to_string())).unwrap();
        assert_eq!(json, r#"{"outcome":"failed","reason":"bad"}"#);
        let json = serde_json::to_string(&Verification::Unverified).unwrap();
        assert_eq!(json, r#"{"outcome":"unverified"}"#);
    }
}
