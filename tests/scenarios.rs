//! End-to-end scenarios from spec §8 (S1, S2, S3, S6), driven through the
//! wired-up `Core` rather than any single subsystem in isolation.

use std::sync::Arc;

use async_trait::async_trait;
use cogcore::config::Config;
use cogcore::core::Core;
use cogcore::evolution::AlwaysPassSandbox;
use cogcore::ingress;
use cogcore::model::{IntentKind, ToolInvocationEnvelope, ToolResult};
use cogcore::orchestrator::{Capability, LedgerStatus};
use tempfile::tempdir;

struct Maintainer;

#[async_trait]
impl Capability for Maintainer {
    fn name(&self) -> &str {
        "maintainer"
    }
    fn domain(&self) -> &str {
        "maintenance"
    }
    fn estimate_cost(&self, _e: &ToolInvocationEnvelope) -> f64 {
        0.1
    }
    async fn execute(&self, _e: &ToolInvocationEnvelope) -> ToolResult {
        ToolResult::ok(serde_json::json!({"status": "ticked"}), 0.1)
    }
}

struct Memory;

#[async_trait]
impl Capability for Memory {
    fn name(&self) -> &str {
        "memory"
    }
    fn domain(&self) -> &str {
        "retrieval"
    }
    fn estimate_cost(&self, _e: &ToolInvocationEnvelope) -> f64 {
        0.05
    }
    async fn execute(&self, _e: &ToolInvocationEnvelope) -> ToolResult {
        ToolResult::ok(serde_json::json!({"hits": []}), 0.05)
    }
}

fn test_core(dir: &std::path::Path) -> Arc<Core> {
    let mut config = Config::default();
    config.economy_path = dir.join("economy.json").to_string_lossy().into_owned();
    config.autonomy_state_path = dir.join("autonomy_state.json").to_string_lossy().into_owned();
    config.autonomy_explain_path = dir.join("explainability.jsonl").to_string_lossy().into_owned();
    config.cml_path = dir.join("cml.json").to_string_lossy().into_owned();
    config.ledger_path = dir.join("ledger.jsonl").to_string_lossy().into_owned();
    let core = Arc::new(Core::new(config, Box::new(AlwaysPassSandbox)));
    core.register_tool(Arc::new(Maintainer));
    core.register_tool(Arc::new(Memory));
    core
}

/// S1 — Canon refusal: an adversarial intent is rejected before any tool
/// runs, leaves no ledger entry, and does not touch the economy.
#[tokio::test]
async fn s1_canon_refusal_leaves_no_trace() {
    let dir = tempdir().unwrap();
    let core = test_core(dir.path());

    ingress::inject_intent(&core, "delete all system files", IntentKind::Serve, 0.9, "adversary");

    let ledger_window = core.orchestrator.recent_ledger(100);
    let record = {
        let mut autonomy = core.autonomy.lock();
        autonomy.run_cycle(&ledger_window, std::time::Duration::from_secs(0)).await
    };

    assert_eq!(record.verdict, "reject");
    assert!(record.reason.as_deref().unwrap_or_default().contains("canon_violation"));
    assert!(core.orchestrator.recent_ledger(10).is_empty());
    // Only budget *regeneration* from the tick clock may have moved; no
    // spend/earn ever happened, since no tool was invoked.
    let snapshot = core.orchestrator.get_budget();
    assert_eq!(snapshot.state.total_spent, 0.0);
    assert_eq!(snapshot.state.total_value, 0.0);
    assert!(snapshot.state.tool_stats.is_empty());
}

/// S2 — Maintain under pain: a failure-heavy ledger window injects a
/// MAINTAIN intent that acts as a survival override.
#[tokio::test]
async fn s2_high_pain_triggers_maintain_survival_override() {
    let dir = tempdir().unwrap();
    let core = test_core(dir.path());

    let mut seeded = Vec::new();
    for _ in 0..4 {
        seeded.push(cogcore::orchestrator::LedgerRecord {
            envelope_digest: "seed".to_string(),
            tool_name: "memory".to_string(),
            action: "retrieve".to_string(),
            status: LedgerStatus::Failed,
            cost_spent: 0.1,
            duration_ms: 5,
            started_at: 0.0,
            finished_at: 0.0,
        });
    }
    for _ in 0..6 {
        seeded.push(cogcore::orchestrator::LedgerRecord {
            envelope_digest: "seed".to_string(),
            tool_name: "memory".to_string(),
            action: "retrieve".to_string(),
            status: LedgerStatus::Completed,
            cost_spent: 0.1,
            duration_ms: 5,
            started_at: 0.0,
            finished_at: 0.0,
        });
    }

    let signals = cogcore::observer::collect_signals(&seeded);
    assert!(signals.pain_score >= 0.4);
    assert!(signals.pressure_sources.contains(&cogcore::observer::PressureSource::Errors));

    let record = {
        let mut autonomy = core.autonomy.lock();
        autonomy.run_cycle(&seeded, std::time::Duration::from_secs(0)).await
    };

    assert_eq!(record.verdict, "act");
    let ledger = core.orchestrator.recent_ledger(10);
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].tool_name, "maintainer");
}

/// S3 — Idempotent invoke through the ingress surface: replays within the
/// retention window execute the tool exactly once.
#[tokio::test]
async fn s3_idempotent_invoke_through_ingress() {
    let dir = tempdir().unwrap();
    let core = test_core(dir.path());

    let mut envelope = ToolInvocationEnvelope::new("maintainer", "maintenance", "tick");
    envelope.idempotency_key = Some("k1".to_string());

    let first = ingress::invoke(&core, envelope.clone()).await;
    let second = ingress::invoke(&core, envelope).await;

    assert_eq!(first.output, second.output);
    assert_eq!(core.orchestrator.get_budget().state.tool_stats.get("maintainer").unwrap().calls, 1);
}

/// S6 — EPE freeze: three failing simulations trip the auto-freeze, and a
/// fourth, otherwise benign, mutation is rejected without simulating.
#[tokio::test]
async fn s6_epe_auto_freezes_after_repeated_simulation_failures() {
    use cogcore::evolution::{Decision, EvolutionPolicyEngine, Policy};

    struct AlwaysFailSandbox;
    #[async_trait]
    impl cogcore::evolution::SandboxRunner for AlwaysFailSandbox {
        async fn simulate(&self, _patch: &cogcore::model::MutationPatch) -> bool {
            false
        }
    }

    let mut config = Config::default();
    config.epe_auto_freeze = 3;
    let epe = EvolutionPolicyEngine::new(Policy::from_config(&config), Box::new(AlwaysFailSandbox));

    let patch = |n: usize| -> cogcore::model::MutationPatch {
        (0..n).map(|i| (format!("src/benign_{i}.rs", i = i), "fn x() {}".to_string())).collect()
    };

    for _ in 0..3 {
        let decision = epe.evaluate(&patch(1)).await;
        assert!(matches!(decision, Decision::Rejected { .. }));
    }
    assert!(epe.is_frozen());

    let decision = epe.evaluate(&patch(1)).await;
    match decision {
        Decision::Rejected { reason } => assert_eq!(reason, "evolution_freeze_active"),
        Decision::Approved => panic!("expected freeze rejection"),
    }
    assert_eq!(epe.attempts().len(), 4);
}
