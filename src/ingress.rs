//! Ingress: the small set of entry points external callers use to talk to
//! the core (spec §6): `invoke`, `inject_intent`, `reset_economy`, `tick`.
//!
//! These are thin wrappers kept separate from [`crate::core::Core`] so the
//! public surface area is easy to audit independently of internal wiring.

use std::sync::Arc;

use crate::core::Core;
use crate::model::{Intent, IntentKind, ToolInvocationEnvelope, ToolResult};

/// Submit a tool invocation through the sole execution path.
pub async fn invoke(core: &Core, envelope: ToolInvocationEnvelope) -> ToolResult {
    core.orchestrator.invoke(envelope).await
}

/// Inject an externally-sourced intent onto the autonomy loop's stack. The
/// intent is subject to the same trust and canon filters as any
/// internally-generated one on the next cycle — injection alone confers no
/// special standing (spec §4.2, §4.3).
pub fn inject_intent(core: &Arc<Core>, description: impl Into<String>, kind: IntentKind, priority: f64, source: impl Into<String>) -> Intent {
    let intent = Intent::new(description, kind, priority, source);
    core.autonomy.lock().stack.add(intent.clone());
    intent
}

/// Reset the economy to a fresh state at the configured defaults. An
/// operational escape hatch, not part of any autonomous cycle.
pub fn reset_economy(core: &Core) {
    core.reset_economy();
}

/// Advance wall-clock-derived state (budget regeneration) without waiting
/// for the next scheduled tick.
pub fn tick(core: &Core) {
    core.economy.tick();
}
