//! Boot-time configuration.
//!
//! Environment variables are read exactly once, here, and threaded into the
//! rest of the system as an owned [`Config`] value (Design Notes: no
//! implicit global state for paths/configuration).

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub orchestrator_budget: f64,
    pub orchestrator_reserve: f64,
    pub economy_max_events: usize,
    pub economy_path: String,
    pub autonomy_state_path: String,
    pub autonomy_explain_path: String,
    pub cml_path: String,
    pub ledger_path: String,
    pub orchestrator_ledger_retention: usize,
    pub autonomy_cycle_interval: Duration,
    pub intent_half_life: Duration,
    pub intent_floor: f64,
    pub epe_max_files: usize,
    pub epe_sim_timeout: Duration,
    pub epe_auto_freeze: u32,
    /// Retention window for idempotency replay (Open Question 4: not
    /// centrally defined upstream; we fix it at the documented 24h default
    /// and expose it for override). See DESIGN.md.
    pub invocation_retention: Duration,
    /// Depth at which the orchestrator queue starts rejecting low-priority
    /// invocations with `OVERLOADED` (spec §5 backpressure).
    pub orchestrator_queue_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            orchestrator_budget: 1000.0,
            orchestrator_reserve: 5000.0,
            economy_max_events: 500,
            economy_path: "data/economy.json".to_string(),
            autonomy_state_path: "data/autonomy_state.json".to_string(),
            autonomy_explain_path: "data/explainability.jsonl".to_string(),
            cml_path: "data/cml.json".to_string(),
            ledger_path: "data/ledger.jsonl".to_string(),
            orchestrator_ledger_retention: 5000,
            autonomy_cycle_interval: Duration::from_secs(60),
            intent_half_life: Duration::from_secs(3600),
            intent_floor: 0.05,
            epe_max_files: 5,
            epe_sim_timeout: Duration::from_secs(300),
            epe_auto_freeze: 3,
            invocation_retention: Duration::from_secs(24 * 3600),
            orchestrator_queue_depth: 1024,
        }
    }
}

impl Config {
    /// Read every documented `ORCHESTRATOR_*` / `ECONOMY_*` / `AUTONOMY_*` /
    /// `INTENT_*` / `EPE_*` variable from the environment, falling back to
    /// the spec's documented defaults when unset or unparsable.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            orchestrator_budget: env_f64("ORCHESTRATOR_BUDGET", d.orchestrator_budget),
            orchestrator_reserve: env_f64("ORCHESTRATOR_RESERVE", d.orchestrator_reserve),
            economy_max_events: env_usize("ECONOMY_MAX_EVENTS", d.economy_max_events),
            economy_path: env_string("ECONOMY_PATH", &d.economy_path),
            autonomy_state_path: env_string("AUTONOMY_STATE_PATH", &d.autonomy_state_path),
            autonomy_explain_path: env_string("AUTONOMY_EXPLAIN_PATH", &d.autonomy_explain_path),
            cml_path: env_string("CML_PATH", &d.cml_path),
            ledger_path: env_string("LEDGER_PATH", &d.ledger_path),
            orchestrator_ledger_retention: env_usize(
                "ORCHESTRATOR_LEDGER_RETENTION",
                d.orchestrator_ledger_retention,
            ),
            autonomy_cycle_interval: Duration::from_secs(env_u64(
                "AUTONOMY_CYCLE_INTERVAL_SEC",
                d.autonomy_cycle_interval.as_secs(),
            )),
            intent_half_life: Duration::from_secs(env_u64(
                "INTENT_HALF_LIFE_SEC",
                d.intent_half_life.as_secs(),
            )),
            intent_floor: env_f64("INTENT_FLOOR", d.intent_floor),
            epe_max_files: env_usize("EPE_MAX_FILES", d.epe_max_files),
            epe_sim_timeout: Duration::from_secs(env_u64(
                "EPE_SIM_TIMEOUT_SEC",
                d.epe_sim_timeout.as_secs(),
            )),
            epe_auto_freeze: env_u64("EPE_AUTO_FREEZE", d.epe_auto_freeze as u64) as u32,
            invocation_retention: Duration::from_secs(env_u64(
                "INVOCATION_RETENTION_SEC",
                d.invocation_retention.as_secs(),
            )),
            ..d
        }
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_spec_values() {
        let config = Config::default();
        assert_eq!(config.orchestrator_budget, 1000.0);
        assert_eq!(config.orchestrator_reserve, 5000.0);
        assert_eq!(config.economy_max_events, 500);
        assert_eq!(config.orchestrator_ledger_retention, 5000);
        assert_eq!(config.autonomy_cycle_interval, Duration::from_secs(60));
        assert_eq!(config.intent_half_life, Duration::from_secs(3600));
        assert_eq!(config.intent_floor, 0.05);
        assert_eq!(config.epe_max_files, 5);
        assert_eq!(config.epe_sim_timeout, Duration::from_secs(300));
        assert_eq!(config.epe_auto_freeze, 3);
        assert_eq!(config.invocation_retention, Duration::from_secs(24 * 3600));
        assert_eq!(config.cml_path, "data/cml.json");
        assert_eq!(config.ledger_path, "data/ledger.jsonl");
    }

    #[test]
    fn unparsable_env_value_falls_back_to_default() {
        assert_eq!(env_f64("CONFIG_TEST_MISSING_F64", 42.0), 42.0);
        assert_eq!(env_u64("CONFIG_TEST_MISSING_U64", 7), 7);
        assert_eq!(env_usize("CONFIG_TEST_MISSING_USIZE", 3), 3);
        assert_eq!(env_string("CONFIG_TEST_MISSING_STRING", "fallback"), "fallback");
    }
}
