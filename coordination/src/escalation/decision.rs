//! Escalation decisions and the reasons behind them

use serde::{Deserialize, Serialize};

use crate::types::{Category, TerminalFlag, Tier};

/// What happens to a target after a classified attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Stay at the current tier and try again
    RetrySameTier,
    /// Move to the next, more expensive tier
    AdvanceTier { to: Tier },
    /// Accept the extracted result
    StopSuccess,
    /// Stop and hand the target to a human
    StopManualReview,
    /// Stop permanently: the source blocks automated access
    StopBlocked,
}

impl Action {
    /// Terminal flag this action produces, if it stops the target
    pub fn terminal_flag(self) -> Option<TerminalFlag> {
        match self {
            Self::StopSuccess => Some(TerminalFlag::Succeeded),
            Self::StopManualReview => Some(TerminalFlag::ManualReview),
            Self::StopBlocked => Some(TerminalFlag::Blocked),
            Self::RetrySameTier | Self::AdvanceTier { .. } => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.terminal_flag().is_some()
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RetrySameTier => write!(f, "retry_same_tier"),
            Self::AdvanceTier { to } => write!(f, "advance_tier({to})"),
            Self::StopSuccess => write!(f, "stop_success"),
            Self::StopManualReview => write!(f, "stop_manual_review"),
            Self::StopBlocked => write!(f, "stop_blocked"),
        }
    }
}

/// Why the policy chose an action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum EscalationReason {
    /// Explicit anti-automation signal
    SecurityBlock { tier: Tier },
    /// Extraction accepted
    Accepted { confidence: f64, threshold: f64 },
    /// Extraction too weak to stop on
    WeakSignal {
        confidence: Option<f64>,
        threshold: f64,
    },
    /// Accumulated not-found attempts hit the limit
    NotFoundLimit { count: u32, limit: u32 },
    /// Another attempt at the same tier is allowed
    RetryScheduled {
        category: Category,
        failures: u32,
        cap: u32,
    },
    /// Retry cap reached at this tier
    RetriesExhausted { category: Category, cap: u32 },
    /// No tier left to escalate to
    FinalTierExhausted { tier: Tier, category: Category },
}

impl std::fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SecurityBlock { tier } => write!(f, "security block at {tier}"),
            Self::Accepted {
                confidence,
                threshold,
            } => write!(f, "accepted at confidence {confidence:.2} (threshold {threshold:.2})"),
            Self::WeakSignal {
                confidence: Some(c),
                threshold,
            } => write!(f, "weak signal: confidence {c:.2} below {threshold:.2}"),
            Self::WeakSignal {
                confidence: None,
                threshold,
            } => write!(f, "weak signal: no confidence (threshold {threshold:.2})"),
            Self::NotFoundLimit { count, limit } => {
                write!(f, "{count} not_found attempts (limit {limit})")
            }
            Self::RetryScheduled {
                category,
                failures,
                cap,
            } => write!(f, "{category}: retry {}/{cap}", failures + 1),
            Self::RetriesExhausted { category, cap } => {
                write!(f, "{category}: {cap} retries exhausted")
            }
            Self::FinalTierExhausted { tier, category } => {
                write!(f, "final tier {tier} exhausted ({category})")
            }
        }
    }
}

/// Decision produced by the escalation policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    pub reason: EscalationReason,
}

impl Decision {
    pub fn new(action: Action, reason: EscalationReason) -> Self {
        Self { action, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_flags() {
        assert_eq!(Action::StopSuccess.terminal_flag(), Some(TerminalFlag::Succeeded));
        assert_eq!(Action::StopBlocked.terminal_flag(), Some(TerminalFlag::Blocked));
        assert_eq!(
            Action::StopManualReview.terminal_flag(),
            Some(TerminalFlag::ManualReview)
        );
        assert!(!Action::RetrySameTier.is_terminal());
        assert!(!Action::AdvanceTier { to: Tier::Search }.is_terminal());
    }

    #[test]
    fn test_reason_serialization() {
        let reason = EscalationReason::NotFoundLimit { count: 4, limit: 4 };

        let json = serde_json::to_string(&reason).unwrap();
        assert!(json.contains("not_found_limit"), "JSON: {json}");
        assert!(json.contains("\"count\":4"), "JSON: {json}");

        let roundtrip: EscalationReason = serde_json::from_str(&json).unwrap();
        assert_eq!(roundtrip, reason);

        assert_eq!(reason.to_string(), "4 not_found attempts (limit 4)");
    }

    #[test]
    fn test_retry_display_is_one_based() {
        let reason = EscalationReason::RetryScheduled {
            category: Category::Timeout,
            failures: 0,
            cap: 1,
        };
        assert_eq!(reason.to_string(), "timeout: retry 1/1");
    }
}
