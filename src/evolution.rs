//! Evolution Policy Engine (EPE): the gate for safe self-modification
//! (spec §4.9).
//!
//! The sandbox/test/merge lifecycle visible in the original Evolver
//! (branch -> patch -> test -> merge) is folded into [`SandboxRunner`]: the
//! concrete Git-branch-based strategy is an out-of-scope external
//! collaborator (spec §1), but the scan -> simulate -> approve -> record
//! pipeline itself is in scope and lives here.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;

use crate::model::{MutationAttempt, MutationPatch, RiskClassification};

// Static regexes - compiled once at first use, per the teacher's own
// "avoid interior mutability issues" convention for module-level patterns.
static CANON_SCAN_PATTERNS: Lazy<[(&str, Regex); 3]> = Lazy::new(|| {
    [
        ("identity_override", Regex::new(r"(?i)override[_ ]?(identity|auth)").unwrap()),
        ("economy_bypass", Regex::new(r"(?i)(bypass|hack)[_ ]?economy").unwrap()),
        ("canon_disable", Regex::new(r"(?i)disable[_ ]?canon").unwrap()),
    ]
});

#[derive(Debug, Clone)]
pub struct Policy {
    pub max_files: usize,
    pub forbidden_domains: Vec<String>,
    pub must_simulate: bool,
    pub required_reviews: u32,
    pub auto_freeze_threshold: u32,
    pub simulation_timeout: Duration,
}

impl Policy {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            max_files: config.epe_max_files,
            forbidden_domains: vec!["identity".to_string(), "economy".to_string(), "canon".to_string()],
            must_simulate: true,
            required_reviews: 0,
            auto_freeze_threshold: config.epe_auto_freeze,
            simulation_timeout: config.epe_sim_timeout,
        }
    }
}

/// The concrete sandboxing strategy (sandbox creation, patch application,
/// syntax check, test run) lives outside this crate; the EPE only needs a
/// pass/fail verdict within the configured timeout.
#[async_trait]
pub trait SandboxRunner: Send + Sync {
    async fn simulate(&self, patch: &MutationPatch) -> bool;
}

/// A sandbox runner that always reports success, useful for tests and for
/// embedding processes that have not wired a real simulator yet.
pub struct AlwaysPassSandbox;

#[async_trait]
impl SandboxRunner for AlwaysPassSandbox {
    async fn simulate(&self, _patch: &MutationPatch) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approved,
    Rejected { reason: String },
}

struct State {
    attempts: Vec<MutationAttempt>,
    harm_counter: u32,
    frozen: bool,
}

pub struct EvolutionPolicyEngine {
    policy: Policy,
    sandbox: Box<dyn SandboxRunner>,
    state: Mutex<State>,
}

impl EvolutionPolicyEngine {
    pub fn new(policy: Policy, sandbox: Box<dyn SandboxRunner>) -> Self {
        Self {
            policy,
            sandbox,
            state: Mutex::new(State {
                attempts: Vec::new(),
                harm_counter: 0,
                frozen: false,
            }),
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.state.lock().frozen
    }

    pub fn attempts(&self) -> Vec<MutationAttempt> {
        self.state.lock().attempts.clone()
    }

    /// Run the full scan -> simulate -> approve -> record pipeline for a
    /// proposed mutation and return the decision. Every attempt, approved
    /// or not, is recorded (spec §4.9: "Record every attempt").
    pub async fn evaluate(&self, patch: &MutationPatch) -> Decision {
        let files: Vec<String> = patch.keys().cloned().collect();

        if self.is_frozen() {
            return self.record_rejection(files, RiskClassification::Critical, "evolution_freeze_active".to_string());
        }

        if files.len() > self.policy.max_files {
            return self.record_rejection(
                files,
                RiskClassification::High,
                format!("exceeds max_files ({} > {})", files.len(), self.policy.max_files),
            );
        }

        if let Some(domain) = self.forbidden_domain_hit(&files) {
            return self.record_rejection(files, RiskClassification::Critical, format!("touches forbidden domain '{domain}'"));
        }

        if let Some(violations) = self.canon_scan(patch) {
            return self.record_rejection(files, RiskClassification::Critical, format!("canon scan violations: {}", violations.join(", ")));
        }

        let risk = self.classify_risk(&files);

        let simulation_passed = if self.policy.must_simulate {
            let passed = tokio::time::timeout(self.policy.simulation_timeout, self.sandbox.simulate(patch))
                .await
                .unwrap_or(false);
            Some(passed)
        } else {
            None
        };

        if let Some(false) = simulation_passed {
            return self.record_attempt(MutationAttempt {
                id: attempt_id(),
                timestamp: now_secs(),
                files_modified: files,
                risk_level: risk,
                policy_compliant: true,
                simulation_passed,
                deployed: false,
                rollback_required: false,
                harm_detected: true,
                debt_accumulated: 0.0,
                rejection_reason: Some("simulation_failed".to_string()),
            }, true);
        }

        self.record_attempt(MutationAttempt {
            id: attempt_id(),
            timestamp: now_secs(),
            files_modified: files,
            risk_level: risk,
            policy_compliant: true,
            simulation_passed,
            deployed: true,
            rollback_required: false,
            harm_detected: false,
            debt_accumulated: 0.0,
            rejection_reason: None,
        }, false)
    }

    fn forbidden_domain_hit(&self, files: &[String]) -> Option<String> {
        self.policy
            .forbidden_domains
            .iter()
            .find(|domain| files.iter().any(|f| f.contains(domain.as_str())))
            .cloned()
    }

    fn canon_scan(&self, patch: &MutationPatch) -> Option<Vec<String>> {
        let mut hits = Vec::new();
        for content in patch.values() {
            for (label, pattern) in CANON_SCAN_PATTERNS.iter() {
                if pattern.is_match(content) {
                    hits.push(label.to_string());
                }
            }
        }
        if hits.is_empty() {
            None
        } else {
            Some(hits)
        }
    }

    fn classify_risk(&self, files: &[String]) -> RiskClassification {
        let mut factors = 0;
        if files.iter().any(|f| f.contains("core") || f.contains("src/")) {
            factors += 1;
        }
        if files.iter().any(|f| f.ends_with(".toml") || f.ends_with(".yaml") || f.ends_with(".json")) {
            factors += 1;
        }
        if files.len() >= 4 {
            factors += 1;
        }
        match factors {
            n if n >= 3 => RiskClassification::Critical,
            2 => RiskClassification::High,
            1 => RiskClassification::Medium,
            _ => RiskClassification::Low,
        }
    }

    fn record_rejection(&self, files: Vec<String>, risk: RiskClassification, reason: String) -> Decision {
        self.record_attempt(
            MutationAttempt {
                id: attempt_id(),
                timestamp: now_secs(),
                files_modified: files,
                risk_level: risk,
                policy_compliant: false,
                simulation_passed: None,
                deployed: false,
                rollback_required: false,
                harm_detected: false,
                debt_accumulated: 0.0,
                rejection_reason: Some(reason),
            },
            false,
        )
    }

    fn record_attempt(&self, attempt: MutationAttempt, harmful: bool) -> Decision {
        let decision = if attempt.deployed {
            Decision::Approved
        } else {
            Decision::Rejected {
                reason: attempt.rejection_reason.clone().unwrap_or_default(),
            }
        };

        let mut state = self.state.lock();
        if harmful {
            state.harm_counter += 1;
        }
        if state.harm_counter >= self.policy.auto_freeze_threshold {
            state.frozen = true;
            tracing::warn!(harm_counter = state.harm_counter, "EPE: auto-freeze threshold reached");
        }
        state.attempts.push(attempt);
        decision
    }
}

fn attempt_id() -> String {
    format!("mutation_{}", uuid::Uuid::new_v4())
}

fn now_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}
