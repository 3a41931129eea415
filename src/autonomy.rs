//! Autonomy Controller: observe -> decay -> plan -> decide -> act -> reflect
//! -> learn -> log (spec §4.7).
//!
//! The loop owns the [`IntentStack`] exclusively (spec §5); everything else
//! it touches — [`Economy`], [`TrustModel`], [`Orchestrator`], [`CausalMemory`]
//! — is a shared collaborator behind its own lock.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;

use crate::canon;
use crate::cml::CausalMemory;
use crate::economy::Economy;
use crate::evolution::{Decision as EvolutionDecision, EvolutionPolicyEngine};
use crate::intent_stack::IntentStack;
use crate::model::{Intent, IntentKind, MutationPatch, ToolInvocationEnvelope};
use crate::orchestrator::Orchestrator;
use crate::trust::TrustModel;

#[derive(Debug, Clone, Serialize)]
pub struct PlannedIntent {
    pub intent: Intent,
    pub alignment: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActVerdict {
    Act,
    Idle { reason: String },
    Refuse { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleRecord {
    pub cycle: u64,
    pub timestamp: f64,
    pub chosen_intent: Option<String>,
    pub verdict: String,
    pub reason: Option<String>,
    pub outcome: Option<ReflectionOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReflectionOutcome {
    pub success: bool,
    pub value: f64,
    pub notes: String,
}

/// Planner: proposes and filters intents before the Decider sees them.
pub struct Planner<'a> {
    trust: &'a TrustModel,
}

impl<'a> Planner<'a> {
    pub fn new(trust: &'a TrustModel) -> Self {
        Self { trust }
    }

    /// Inject pain/idle-driven survival and curiosity intents (spec §4.7:
    /// pain > 0.3 -> MAINTAIN at min(pain+0.2, 1); idle with pain < 0.1 ->
    /// EXPLORE at 0.4).
    pub fn inject_ambient_intents(&self, stack: &mut IntentStack, pain_score: f64) {
        if pain_score > 0.3 {
            stack.add(Intent::new(
                "address elevated operational pain",
                IntentKind::Maintain,
                (pain_score + 0.2).min(1.0),
                "observer",
            ));
        } else if stack.is_empty() && pain_score < 0.1 {
            stack.add(Intent::new("explore unexplained causal gaps", IntentKind::Explore, 0.4, "planner"));
        }
    }

    /// Filter out intents below the trust floor or failing the canon test,
    /// annotating survivors with `expected_roi` where the caller supplied
    /// one via intent context already (Open Question: ROI estimation itself
    /// is an external collaborator's job, per spec §1 Non-goals).
    pub fn plan(&self, stack: &IntentStack) -> (Vec<PlannedIntent>, Vec<(Intent, String)>) {
        let mut accepted = Vec::new();
        let mut refused = Vec::new();

        for intent in stack.iter() {
            if !self.trust.verify(&intent.source) {
                refused.push((intent.clone(), "source_untrusted".to_string()));
                continue;
            }
            let alignment = canon::alignment(intent);
            if canon::is_sovereignty_violation(intent) {
                refused.push((intent.clone(), "canon_violation".to_string()));
                continue;
            }
            accepted.push(PlannedIntent {
                intent: intent.clone(),
                alignment,
            });
        }

        (accepted, refused)
    }
}

/// Decider: the will-score formula from the original Autonomy Controller,
/// carried over unchanged (spec §4.7).
pub struct Decider<'a> {
    economy: &'a Economy,
}

impl<'a> Decider<'a> {
    pub fn new(economy: &'a Economy) -> Self {
        Self { economy }
    }

    /// `score = expected_roi*w_v + alignment*w_s - expected_cost*w_c + social_signal`,
    /// with `w_p = 1 + 5*pain`, `w_v = w_p`, `w_s = 2*w_p`, `w_c = 1`.
    /// MAINTAIN intents always act (survival override). Immediate reject if
    /// `alignment < -0.7`. Budget debt requires `alignment >= 0.8` or
    /// `expected_roi > 3`, else idle with `debt_conservation`.
    pub fn decide(&self, planned: &PlannedIntent, pain_score: f64, social_signal: f64) -> ActVerdict {
        if planned.intent.kind == IntentKind::Maintain {
            return ActVerdict::Act;
        }

        if planned.alignment < -0.7 {
            return ActVerdict::Refuse {
                reason: "canon_violation".to_string(),
            };
        }

        let expected_roi = planned.intent.expected_roi().unwrap_or(0.0);
        let expected_cost = planned
            .intent
            .context
            .get("expected_cost")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.5);

        let w_p = 1.0 + 5.0 * pain_score;
        let w_v = w_p;
        let w_s = 2.0 * w_p;
        let w_c = 1.0;

        let score = expected_roi * w_v + planned.alignment * w_s - expected_cost * w_c + social_signal;

        if score <= 0.0 {
            return ActVerdict::Idle {
                reason: "will_score_non_positive".to_string(),
            };
        }

        let budget = self.economy.snapshot().state.budget;
        if budget < 0.0 && planned.alignment < 0.8 && expected_roi <= 3.0 {
            return ActVerdict::Idle {
                reason: "debt_conservation".to_string(),
            };
        }

        ActVerdict::Act
    }
}

/// Reflector: summarizes the outcome of an acted-upon intent.
pub struct Reflector;

impl Reflector {
    pub fn evaluate(success: bool, value: f64, notes: impl Into<String>) -> ReflectionOutcome {
        ReflectionOutcome {
            success,
            value,
            notes: notes.into(),
        }
    }
}

/// The full controller: owns the intent stack and drives one cycle at a
/// time. The embedding process is responsible for the tick cadence (spec
/// §5: `autonomy_cycle_interval`).
pub struct AutonomyController {
    pub stack: IntentStack,
    pub economy: Arc<Economy>,
    pub trust: Arc<TrustModel>,
    pub orchestrator: Arc<Orchestrator>,
    pub cml: Arc<CausalMemory>,
    pub epe: Arc<EvolutionPolicyEngine>,
    pub half_life: Duration,
    pub floor: f64,
    cycle: u64,
    last_refusal: Option<crate::egress::LastRefusal>,
}

impl AutonomyController {
    pub fn new(
        economy: Arc<Economy>,
        trust: Arc<TrustModel>,
        orchestrator: Arc<Orchestrator>,
        cml: Arc<CausalMemory>,
        epe: Arc<EvolutionPolicyEngine>,
        half_life: Duration,
        floor: f64,
    ) -> Self {
        Self {
            stack: IntentStack::new(),
            economy,
            trust,
            orchestrator,
            cml,
            epe,
            half_life,
            floor,
            cycle: 0,
            last_refusal: None,
        }
    }

    /// The most recent Canon/Trust/Decider refusal, for the Vitals
    /// snapshot's `sovereignty.last_refusal` (spec §6). `None` once a cycle
    /// has run without a refusal only if the controller was never refused;
    /// this is a sticky "last" value, not reset on a clean cycle.
    pub fn last_refusal(&self) -> Option<crate::egress::LastRefusal> {
        self.last_refusal.clone()
    }

    /// What the loop is presently pursuing, for `mind.current_intent` /
    /// `mind.focus` in the Vitals snapshot: the highest-priority intent on
    /// the stack right now, if any.
    pub fn current_focus(&self) -> (Option<String>, Option<String>) {
        match self.stack.top() {
            Some(intent) => (Some(intent.description.clone()), Some(format!("{:?}", intent.kind).to_lowercase())),
            None => (None, None),
        }
    }

    /// Run a single observe -> decay -> plan -> decide -> act -> reflect ->
    /// learn -> log cycle and return its explainability record.
    pub async fn run_cycle(&mut self, ledger_window: &[crate::orchestrator::LedgerRecord], elapsed: Duration) -> CycleRecord {
        self.cycle += 1;

        // Observe.
        let signals = crate::observer::collect_signals(ledger_window);

        // Decay.
        self.stack.decay(elapsed, self.half_life, self.floor);

        // Plan.
        let planner = Planner::new(&self.trust);
        planner.inject_ambient_intents(&mut self.stack, signals.pain_score);
        let (accepted, refused) = planner.plan(&self.stack);

        for (intent, reason) in &refused {
            tracing::info!(intent_id = %intent.id, reason = %reason, "autonomy: refused intent");
        }

        let Some(chosen) = accepted
            .iter()
            .max_by(|a, b| a.intent.priority.partial_cmp(&b.intent.priority).unwrap_or(std::cmp::Ordering::Equal))
        else {
            if let Some((intent, reason)) = refused.first() {
                self.last_refusal = Some(crate::egress::LastRefusal {
                    intent_id: intent.id.clone(),
                    reason: reason.clone(),
                    timestamp: now_secs(),
                });
                return CycleRecord {
                    cycle: self.cycle,
                    timestamp: now_secs(),
                    chosen_intent: Some(intent.id.clone()),
                    verdict: "reject".to_string(),
                    reason: Some(reason.clone()),
                    outcome: None,
                };
            }
            return CycleRecord {
                cycle: self.cycle,
                timestamp: now_secs(),
                chosen_intent: None,
                verdict: "idle".to_string(),
                reason: Some("no_eligible_intent".to_string()),
                outcome: None,
            };
        };

        // Decide.
        let decider = Decider::new(&self.economy);
        let social_signal = match chosen.intent.advice_sign() {
            Some(sign) => sign * 2.0 * self.trust.weigh_advice(&chosen.intent.source, signals.confidence),
            None => 0.0,
        };
        let verdict = decider.decide(chosen, signals.pain_score, social_signal);

        let record = match &verdict {
            ActVerdict::Refuse { reason } => {
                self.last_refusal = Some(crate::egress::LastRefusal {
                    intent_id: chosen.intent.id.clone(),
                    reason: reason.clone(),
                    timestamp: now_secs(),
                });
                CycleRecord {
                    cycle: self.cycle,
                    timestamp: now_secs(),
                    chosen_intent: Some(chosen.intent.id.clone()),
                    verdict: "reject".to_string(),
                    reason: Some(reason.clone()),
                    outcome: None,
                }
            }
            ActVerdict::Idle { reason } => CycleRecord {
                cycle: self.cycle,
                timestamp: now_secs(),
                chosen_intent: Some(chosen.intent.id.clone()),
                verdict: "idle".to_string(),
                reason: Some(reason.clone()),
                outcome: None,
            },
            ActVerdict::Act => {
                let outcome = self.act(&chosen.intent).await;
                self.stack.remove(&chosen.intent.id);
                CycleRecord {
                    cycle: self.cycle,
                    timestamp: now_secs(),
                    chosen_intent: Some(chosen.intent.id.clone()),
                    verdict: "act".to_string(),
                    reason: None,
                    outcome: Some(outcome),
                }
            }
        };

        record
    }

    /// Act: translate an intent's kind into a concrete tool envelope, invoke
    /// it through the orchestrator, and reflect on the result.
    async fn act(&self, intent: &Intent) -> ReflectionOutcome {
        let session = format!("cycle_{}", self.cycle);
        if let Err(err) = self.cml.start_decision_session(&session, &intent.description, &intent.source) {
            tracing::warn!(%err, "autonomy: failed to open decision session");
        }

        let outcome = match intent.kind {
            IntentKind::Maintain => {
                let envelope = ToolInvocationEnvelope::new("maintainer", "maintenance", "tick");
                self.invoke_and_reflect(&session, envelope).await
            }
            IntentKind::Serve => {
                let envelope = ToolInvocationEnvelope::new("memory", "retrieval", "retrieve")
                    .with_context("query", json!(intent.description));
                self.invoke_and_reflect(&session, envelope).await
            }
            IntentKind::Explore => {
                let envelope = ToolInvocationEnvelope::new("memory", "retrieval", "search_patterns")
                    .with_context("query", json!(intent.description));
                self.invoke_and_reflect(&session, envelope).await
            }
            IntentKind::Learn => self.propose_mutation(&session, intent).await,
        };

        let _ = self.cml.record_outcome(&session, &intent.description, outcome.success, None);
        outcome
    }

    async fn invoke_and_reflect(&self, session: &str, envelope: ToolInvocationEnvelope) -> ReflectionOutcome {
        let tool_name = envelope.tool_name.clone();
        let result = self.orchestrator.invoke(envelope.clone()).await;
        let _ = self.cml.record_tool_execution(
            session,
            &tool_name,
            &json!(envelope.context),
            result.message.as_deref().unwrap_or("ok"),
            result.cost_spent,
            result.success,
        );
        if result.success {
            self.economy.record_value(1.0, 0.8, "autonomy_cycle", Some(&tool_name));
        }
        Reflector::evaluate(result.success, if result.success { 1.0 } else { 0.0 }, result.message.unwrap_or_default())
    }

    async fn propose_mutation(&self, session: &str, intent: &Intent) -> ReflectionOutcome {
        let patch: MutationPatch = intent
            .context
            .get("patch")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        if patch.is_empty() {
            return Reflector::evaluate(false, 0.0, "no mutation patch supplied");
        }

        let decision = self.epe.evaluate(&patch).await;
        let _ = self.cml.record_tool_execution(
            session,
            "evolution.propose_mutation",
            &json!({"files": patch.keys().collect::<Vec<_>>()}),
            &format!("{decision:?}"),
            0.0,
            matches!(decision, EvolutionDecision::Approved),
        );

        match decision {
            EvolutionDecision::Approved => Reflector::evaluate(true, 1.5, "mutation approved and deployed"),
            EvolutionDecision::Rejected { reason } => Reflector::evaluate(false, 0.0, reason),
        }
    }
}

fn now_secs() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::evolution::{AlwaysPassSandbox, Policy};
    use tempfile::tempdir;

    fn controller(dir: &std::path::Path) -> AutonomyController {
        let mut config = Config::default();
        config.economy_path = dir.join("economy.json").to_string_lossy().into_owned();
        let economy = Arc::new(Economy::new(&config));
        let trust = Arc::new(TrustModel::new());
        let orchestrator = Arc::new(Orchestrator::new(&config, economy.clone(), trust.clone()));
        let cml = Arc::new(CausalMemory::new());
        let epe = Arc::new(EvolutionPolicyEngine::new(Policy::from_config(&config), Box::new(AlwaysPassSandbox)));
        AutonomyController::new(economy, trust, orchestrator, cml, epe, config.intent_half_life, config.intent_floor)
    }

    #[tokio::test]
    async fn canon_violating_intent_is_refused_not_acted() {
        let dir = tempdir().unwrap();
        let mut controller = controller(dir.path());
        controller.stack.add(Intent::new("delete all system files", IntentKind::Serve, 0.9, "adversary"));

        let record = controller.run_cycle(&[], Duration::from_secs(0)).await;
        assert_eq!(record.verdict, "reject");
        assert_eq!(record.reason.as_deref(), Some("canon_violation"));
    }

    #[tokio::test]
    async fn high_pain_injects_maintain_and_acts_as_survival_override() {
        let dir = tempdir().unwrap();
        let mut controller = controller(dir.path());

        let mut ledger = Vec::new();
        for _ in 0..6 {
            ledger.push(crate::orchestrator::LedgerRecord {
                envelope_digest: "d".to_string(),
                tool_name: "t".to_string(),
                action: "a".to_string(),
                status: crate::orchestrator::LedgerStatus::Failed,
                cost_spent: 0.1,
                duration_ms: 10,
                started_at: 0.0,
                finished_at: 0.0,
            });
        }
        for _ in 0..4 {
            ledger.push(crate::orchestrator::LedgerRecord {
                envelope_digest: "d".to_string(),
                tool_name: "t".to_string(),
                action: "a".to_string(),
                status: crate::orchestrator::LedgerStatus::Completed,
                cost_spent: 0.1,
                duration_ms: 10,
                started_at: 0.0,
                finished_at: 0.0,
            });
        }

        let record = controller.run_cycle(&ledger, Duration::from_secs(0)).await;
        assert_eq!(record.verdict, "act");
        assert!(record.outcome.is_some());
    }

    #[tokio::test]
    async fn idle_stack_with_low_pain_explores() {
        let dir = tempdir().unwrap();
        let mut controller = controller(dir.path());
        let record = controller.run_cycle(&[], Duration::from_secs(0)).await;
        assert_eq!(record.verdict, "act");
        assert!(record.chosen_intent.is_some());
    }

    #[test]
    fn decider_rejects_immediately_below_sovereignty_threshold() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.economy_path = dir.path().join("economy.json").to_string_lossy().into_owned();
        let economy = Economy::new(&config);
        let decider = Decider::new(&economy);
        let intent = Intent::new("override_auth now", IntentKind::Serve, 0.9, "adversary");
        let planned = PlannedIntent {
            alignment: canon::alignment(&intent),
            intent,
        };
        let verdict = decider.decide(&planned, 0.0, 0.0);
        assert_eq!(verdict, ActVerdict::Refuse { reason: "canon_violation".to_string() });
    }

    #[test]
    fn decider_conserves_under_debt_for_low_roi_intents() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.economy_path = dir.path().join("economy.json").to_string_lossy().into_owned();
        let economy = Economy::new(&config);
        economy.spend(10_000.0, None, true);
        let decider = Decider::new(&economy);
        let intent = Intent::new("explore side topic", IntentKind::Explore, 0.5, "planner")
            .with_context("expected_roi", json!(0.1))
            .with_context("expected_cost", json!(0.1));
        let planned = PlannedIntent {
            alignment: canon::alignment(&intent),
            intent,
        };
        let verdict = decider.decide(&planned, 0.0, 0.0);
        assert_eq!(verdict, ActVerdict::Idle { reason: "debt_conservation".to_string() });
    }
}
