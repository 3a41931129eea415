//! Tool Registry & Orchestrator: the sole execution path for capabilities
//! (spec §4.1).
//!
//! Tools are modeled as a capability interface (`estimate_cost`, `execute`)
//! rather than an inheritance hierarchy (Design Notes item 2): the registry
//! stores a name -> boxed-capability map, no base class required.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::canon;
use crate::config::Config;
use crate::economy::Economy;
use crate::error::ErrorCode;
use crate::model::{ToolInvocationEnvelope, ToolResult};
use crate::trust::TrustModel;

/// A registered capability. Out-of-scope tool bodies (shell execution,
/// vector store clients, LLM wrappers, the Git driver, ...) implement this
/// trait and are handed to [`Orchestrator::register`] by the embedding
/// process at boot; their internals are not part of this crate.
#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;
    fn domain(&self) -> &str;
    fn estimate_cost(&self, envelope: &ToolInvocationEnvelope) -> f64;
    async fn execute(&self, envelope: &ToolInvocationEnvelope) -> ToolResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LedgerStatus {
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerRecord {
    pub envelope_digest: String,
    pub tool_name: String,
    pub action: String,
    pub status: LedgerStatus,
    pub cost_spent: f64,
    pub duration_ms: u64,
    pub started_at: f64,
    pub finished_at: f64,
}

struct IdempotencyEntry {
    result: ToolResult,
    recorded_at: Instant,
}

pub struct Orchestrator {
    tools: Mutex<HashMap<String, Arc<dyn Capability>>>,
    economy: Arc<Economy>,
    trust: Arc<TrustModel>,
    ledger: Mutex<VecDeque<LedgerRecord>>,
    ledger_retention: usize,
    idempotency: Mutex<HashMap<(String, String), IdempotencyEntry>>,
    invocation_retention: Duration,
    in_flight: AtomicUsize,
    queue_depth: usize,
}

impl Orchestrator {
    pub fn new(config: &Config, economy: Arc<Economy>, trust: Arc<TrustModel>) -> Self {
        Self {
            tools: Mutex::new(HashMap::new()),
            economy,
            trust,
            ledger: Mutex::new(VecDeque::new()),
            ledger_retention: config.orchestrator_ledger_retention,
            idempotency: Mutex::new(HashMap::new()),
            invocation_retention: config.invocation_retention,
            in_flight: AtomicUsize::new(0),
            queue_depth: config.orchestrator_queue_depth,
        }
    }

    pub fn register(&self, tool: Arc<dyn Capability>) {
        self.tools.lock().insert(tool.name().to_string(), tool);
    }

    pub fn get_budget(&self) -> crate::economy::EconomySnapshot {
        self.economy.snapshot()
    }

    pub fn recent_ledger(&self, limit: usize) -> Vec<LedgerRecord> {
        let ledger = self.ledger.lock();
        let start = ledger.len().saturating_sub(limit);
        ledger.iter().skip(start).cloned().collect()
    }

    /// The sole execution path for a tool invocation. See spec §4.1 for the
    /// eight-step algorithm implemented here.
    pub async fn invoke(&self, envelope: ToolInvocationEnvelope) -> ToolResult {
        let started_at = now_secs();
        let start_instant = Instant::now();

        // Step 1: validate.
        let tool = {
            let tools = self.tools.lock();
            tools.get(&envelope.tool_name).cloned()
        };
        let Some(tool) = tool else {
            return ToolResult::error(ErrorCode::InvalidRequest, format!("unknown tool '{}'", envelope.tool_name));
        };
        if envelope.action.trim().is_empty() {
            return ToolResult::error(ErrorCode::InvalidRequest, "action must not be empty");
        }

        // Backpressure: unset priority is low-priority and subject to rejection.
        if envelope.priority.is_none() && self.in_flight.load(Ordering::SeqCst) >= self.queue_depth {
            return ToolResult::error(ErrorCode::Overloaded, "orchestrator queue is at capacity");
        }

        // Step 2: idempotency replay.
        if let Some(key) = envelope.idempotency_key.clone() {
            let cache_key = (envelope.tool_name.clone(), key);
            let mut cache = self.idempotency.lock();
            if let Some(entry) = cache.get(&cache_key) {
                if entry.recorded_at.elapsed() <= self.invocation_retention {
                    return entry.result.clone();
                }
                cache.remove(&cache_key);
            }
        }

        // Step 3: cost estimate.
        let est = envelope.estimated_cost.max(tool.estimate_cost(&envelope));

        // Step 5: canon check for human/user-sourced intents.
        if envelope.is_human_sourced() {
            if let Some(desc) = envelope.context.get("intent_description").and_then(|v| v.as_str()) {
                let probe = crate::model::Intent::new(desc, crate::model::IntentKind::Serve, 0.5, "envelope-probe");
                if canon::is_sovereignty_violation(&probe) {
                    return ToolResult::error(ErrorCode::CanonViolation, "intent fails sovereignty test");
                }
            }
        }
        if let Some(source) = envelope.source.as_deref() {
            if !self.trust.verify(source) {
                return ToolResult::error(ErrorCode::TrustRejected, format!("source '{source}' below trust threshold"));
            }
        }

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        // Step 4 & 6: deadline + execution, panics captured as TOOL_CRASH.
        let execution = std::panic::AssertUnwindSafe(tool.execute(&envelope)).catch_unwind();
        let outcome = match envelope.deadline_ms {
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), execution).await {
                Ok(result) => result,
                Err(_) => {
                    let result = ToolResult::error(ErrorCode::Timeout, "deadline expired");
                    self.record(&envelope, &result, started_at, start_instant.elapsed(), LedgerStatus::TimedOut);
                    return result;
                }
            },
            None => execution.await,
        };

        let result = match outcome {
            Ok(result) => result,
            Err(_) => ToolResult::error(ErrorCode::ToolCrash, "tool panicked during execution"),
        };

        // Step 7: accounting.
        let cost_spent = if result.cost_spent > 0.0 { result.cost_spent } else { est };
        self.economy.spend(cost_spent, Some(&envelope.tool_name), !result.success);
        if let Some(idempotency_key) = envelope.idempotency_key.clone() {
            self.idempotency.lock().insert(
                (envelope.tool_name.clone(), idempotency_key),
                IdempotencyEntry {
                    result: result.clone(),
                    recorded_at: Instant::now(),
                },
            );
        }

        let status = if result.success {
            LedgerStatus::Completed
        } else {
            LedgerStatus::Failed
        };
        self.record(&envelope, &result, started_at, start_instant.elapsed(), status);

        result
    }

    fn record(&self, envelope: &ToolInvocationEnvelope, result: &ToolResult, started_at: f64, elapsed: Duration, status: LedgerStatus) {
        let mut ledger = self.ledger.lock();
        ledger.push_back(LedgerRecord {
            envelope_digest: digest(envelope),
            tool_name: envelope.tool_name.clone(),
            action: envelope.action.clone(),
            status,
            cost_spent: result.cost_spent,
            duration_ms: elapsed.as_millis() as u64,
            started_at,
            finished_at: now_secs(),
        });
        while ledger.len() > self.ledger_retention {
            ledger.pop_front();
        }
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);
impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn digest(envelope: &ToolInvocationEnvelope) -> String {
    let mut hasher = Sha256::new();
    hasher.update(envelope.tool_name.as_bytes());
    hasher.update(envelope.action.as_bytes());
    hasher.update(envelope.idempotency_key.as_deref().unwrap_or("").as_bytes());
    hasher.update(envelope.request_id.as_deref().unwrap_or("").as_bytes());
    format!("{:x}", hasher.finalize())
}

fn now_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}
