//! Evolution Policy Engine data types (spec §3, §4.9).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskClassification {
    Low,
    Medium,
    High,
    Critical,
}

/// A proposed self-modification: a map of filepath to new file content.
pub type MutationPatch = HashMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationAttempt {
    pub id: String,
    pub timestamp: f64,
    pub files_modified: Vec<String>,
    pub risk_level: RiskClassification,
    pub policy_compliant: bool,
    pub simulation_passed: Option<bool>,
    pub deployed: bool,
    pub rollback_required: bool,
    pub harm_detected: bool,
    pub debt_accumulated: f64,
    #[serde(default)]
    pub rejection_reason: Option<String>,
}
