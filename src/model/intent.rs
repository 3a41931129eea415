//! Intent: the unit of work the Autonomy Controller chooses to pursue.
//!
//! See spec §3 and §4.10. `IntentKind` is a closed tagged variant rather
//! than a free-form type string, so the Canon Evaluator matches on the tag
//! instead of scanning `description` substrings (Design Notes item 3).

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntentKind {
    Maintain,
    Serve,
    Learn,
    Explore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentStatus {
    Proposed,
    Active,
    Fulfilled,
    Expired,
    Refused,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub id: String,
    pub description: String,
    pub kind: IntentKind,
    pub priority: f64,
    pub source: String,
    pub created_at: f64,
    #[serde(default)]
    pub context: HashMap<String, Value>,
    #[serde(default = "default_status")]
    pub status: IntentStatus,
}

fn default_status() -> IntentStatus {
    IntentStatus::Proposed
}

impl Intent {
    pub fn new(description: impl Into<String>, kind: IntentKind, priority: f64, source: impl Into<String>) -> Self {
        Self {
            id: format!("intent_{}", uuid::Uuid::new_v4()),
            description: description.into(),
            kind,
            priority: priority.clamp(0.0, 1.0),
            source: source.into(),
            created_at: now_secs(),
            context: HashMap::new(),
            status: IntentStatus::Proposed,
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn expected_roi(&self) -> Option<f64> {
        self.context.get("expected_roi").and_then(|v| v.as_f64())
    }

    /// `Some(sign)` (`+1.0` or `-1.0`) if this intent carries advice from
    /// another source (spec §4.7 step 3: `social_signal = ±2·advice_weight`
    /// "when the intent carries advice"); `None` for intents with no advice
    /// attached, in which case the will score's social term is zero.
    pub fn advice_sign(&self) -> Option<f64> {
        self.context.get("advice_sign").and_then(|v| v.as_f64()).map(|v| if v < 0.0 { -1.0 } else { 1.0 })
    }
}

pub(crate) fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
