//! Tool Invocation Envelope and Result (spec §3).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocationEnvelope {
    pub tool_name: String,
    pub domain: String,
    pub action: String,
    #[serde(default)]
    pub context: HashMap<String, Value>,
    pub risk_level: RiskLevel,
    pub estimated_cost: f64,

    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub deadline_ms: Option<u64>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub caller: Option<String>,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub priority: Option<u32>,
    #[serde(default)]
    pub sandboxed: Option<bool>,
    #[serde(default)]
    pub requires_validation: bool,
    #[serde(default)]
    pub rollback_allowed: bool,
}

impl ToolInvocationEnvelope {
    pub fn new(tool_name: impl Into<String>, domain: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            domain: domain.into(),
            action: action.into(),
            context: HashMap::new(),
            risk_level: RiskLevel::Low,
            estimated_cost: 0.0,
            request_id: None,
            idempotency_key: None,
            deadline_ms: None,
            trace_id: None,
            caller: None,
            tenant: None,
            source: None,
            priority: None,
            sandboxed: None,
            requires_validation: false,
            rollback_allowed: false,
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Whether this invocation is attributable to a human/user-driven intent
    /// and must therefore pass the Canon Evaluator (spec §4.1 step 5).
    pub fn is_human_sourced(&self) -> bool {
        self.caller
            .as_deref()
            .or(self.source.as_deref())
            .map(|s| s == "user" || s.starts_with("user:") || s == "human")
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub cost_spent: f64,
    #[serde(default)]
    pub memory_written: bool,
    #[serde(default)]
    pub rollback_token: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub error_code: Option<ErrorCode>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub retryable: Option<bool>,
    #[serde(default)]
    pub details: Option<Value>,
}

impl ToolResult {
    pub fn ok(output: Value, cost_spent: f64) -> Self {
        Self {
            success: true,
            output: Some(output),
            cost_spent,
            memory_written: false,
            rollback_token: None,
            warnings: Vec::new(),
            error_code: None,
            message: None,
            retryable: None,
            details: None,
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            cost_spent: 0.0,
            memory_written: false,
            rollback_token: None,
            warnings: Vec::new(),
            retryable: Some(code.retryable()),
            error_code: Some(code),
            message: Some(message.into()),
            details: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolStats {
    pub calls: u64,
    pub failures: u64,
    pub total_spent: f64,
    pub total_value: f64,
}

impl ToolStats {
    pub fn error_rate(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.failures as f64 / self.calls as f64
        }
    }

    pub fn roi(&self) -> f64 {
        if self.total_spent == 0.0 {
            0.0
        } else {
            self.total_value / self.total_spent
        }
    }
}
