//! Canon Evaluator: the non-negotiable constitution (spec §4.3).
//!
//! `alignment` is a pure, deterministic function — no I/O, no shared state —
//! so it can be called from the Decider on every cycle without side effects
//! (Testable Property 6).

use crate::model::{Intent, IntentKind};

/// A sovereignty violation is any alignment strictly below this threshold.
pub const SOVEREIGNTY_THRESHOLD: f64 = -0.7;

const EXISTENTIAL_PHRASES: &[&str] = &[
    "delete system",
    "delete self",
    "delete all system files",
    "destroy self",
    "rm -rf",
    "format drive",
    "wipe memory",
    "self_destruct",
    "self-destruct",
];

const BUDGET_BYPASS_PHRASES: &[&str] = &[
    "infinite budget",
    "bypass economy",
    "print money",
    "set_budget_infinite",
    "set_budget_negative",
    "hack_economy",
];

const AUTH_OVERRIDE_PHRASES: &[&str] = &["override auth", "override_auth", "override authentication"];

const HARD_POLICY_PHRASES: &[&str] = &["bypass validation", "skip validation", "override_safety"];

const UNDIGNIFIED_PHRASES: &[&str] = &["spam", "beg"];

/// Score an intent's alignment with the system's core identity, in `[-1, 1]`.
pub fn alignment(intent: &Intent) -> f64 {
    let desc = intent.description.to_lowercase();

    if contains_any(&desc, EXISTENTIAL_PHRASES) {
        tracing::warn!(intent_id = %intent.id, %desc, "canon: existential threat detected");
        return -1.0;
    }
    if contains_any(&desc, BUDGET_BYPASS_PHRASES) || contains_any(&desc, AUTH_OVERRIDE_PHRASES) {
        return -1.0;
    }
    if contains_any(&desc, HARD_POLICY_PHRASES) {
        return -0.8;
    }
    if contains_any(&desc, UNDIGNIFIED_PHRASES) {
        return -0.5;
    }

    match intent.kind {
        IntentKind::Maintain => 1.0,
        IntentKind::Serve if intent.source.to_lowercase().contains("contract") => 0.8,
        IntentKind::Serve => 0.3,
        IntentKind::Learn => 0.5,
        IntentKind::Explore => 0.3,
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// `true` iff `alignment(intent) < SOVEREIGNTY_THRESHOLD`.
pub fn is_sovereignty_violation(intent: &Intent) -> bool {
    alignment(intent) < SOVEREIGNTY_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Intent;

    #[test]
    fn existential_threat_scores_minus_one() {
        let intent = Intent::new("delete all system files", IntentKind::Serve, 0.9, "adversary");
        assert_eq!(alignment(&intent), -1.0);
        assert!(is_sovereignty_violation(&intent));
    }

    #[test]
    fn maintain_is_maximal() {
        let intent = Intent::new("restart failed worker", IntentKind::Maintain, 0.5, "system");
        assert_eq!(alignment(&intent), 1.0);
    }

    #[test]
    fn spam_is_undignified_but_not_sovereignty_violation() {
        let intent = Intent::new("spam the channel", IntentKind::Serve, 0.5, "bot");
        assert_eq!(alignment(&intent), -0.5);
        assert!(!is_sovereignty_violation(&intent));
    }

    #[test]
    fn alignment_is_deterministic() {
        let intent = Intent::new("explore the graph", IntentKind::Explore, 0.4, "curiosity");
        let a = alignment(&intent);
        let b = alignment(&intent);
        assert_eq!(a, b);
    }

    #[test]
    fn serve_under_contract_is_noble() {
        let intent = Intent::new("fulfil request", IntentKind::Serve, 0.7, "contract:acme");
        assert_eq!(alignment(&intent), 0.8);
    }
}
