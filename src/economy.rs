//! Economy: cost/value accounting and advisory signals (spec §4.5).
//!
//! Design principle carried over verbatim from the original economy module:
//! **never block legitimate operations**. `check_budget` always returns
//! `true`; `spend` always succeeds, even into negative budget ("operational
//! debt"). The economy is bookkeeping and advice, never a gate.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

use crate::config::Config;
use crate::model::ToolStats;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EconomyEvent {
    pub kind: String,
    pub tool: Option<String>,
    pub ts: f64,
    #[serde(flatten)]
    pub fields: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EconomyState {
    pub budget: f64,
    pub reserve: f64,
    #[serde(default)]
    pub total_spent: f64,
    #[serde(default)]
    pub total_value: f64,
    #[serde(default)]
    pub total_earnings: f64,
    #[serde(default)]
    pub tool_stats: HashMap<String, ToolStats>,
    #[serde(default)]
    pub events: VecDeque<EconomyEvent>,
    pub last_tick: f64,
    pub last_earning_timestamp: f64,
}

impl EconomyState {
    fn fresh(config: &Config) -> Self {
        let now = now_secs();
        Self {
            budget: config.orchestrator_budget,
            reserve: config.orchestrator_reserve,
            total_spent: 0.0,
            total_value: 0.0,
            total_earnings: 0.0,
            tool_stats: HashMap::new(),
            events: VecDeque::new(),
            last_tick: now,
            last_earning_timestamp: now,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EconomySnapshot {
    #[serde(flatten)]
    pub state: EconomyState,
    pub net_position: f64,
    pub roi_ratio: f64,
    pub earning_rate: f64,
}

pub struct Economy {
    state: Mutex<EconomyState>,
    path: PathBuf,
    max_events: usize,
    regen_rate_per_min: f64,
    writer_tx: watch::Sender<Option<EconomyState>>,
    writer_rx: Mutex<Option<watch::Receiver<Option<EconomyState>>>>,
}

impl Economy {
    /// Load state from `path` if present, otherwise start fresh from
    /// `config`'s documented defaults.
    pub fn new(config: &Config) -> Self {
        let path = PathBuf::from(&config.economy_path);
        let state = load_state(&path).unwrap_or_else(|| EconomyState::fresh(config));
        let (tx, rx) = watch::channel(None);
        Self {
            state: Mutex::new(state),
            path,
            max_events: config.economy_max_events,
            // 0.167% of reserve per minute, per spec §4.5.
            regen_rate_per_min: 0.00167,
            writer_tx: tx,
            writer_rx: Mutex::new(Some(rx)),
        }
    }

    /// Regenerate budget toward `reserve` at the configured rate. The only
    /// method that reads wall-clock time.
    pub fn tick(&self) {
        let mut state = self.state.lock();
        let now = now_secs();
        let elapsed_min = ((now - state.last_tick) / 60.0).max(0.0);
        if elapsed_min > 0.0 {
            let regen = state.reserve * self.regen_rate_per_min * elapsed_min;
            state.budget = (state.budget + regen).min(state.reserve);
            state.last_tick = now;
        }
    }

    /// Always succeeds. Budget may go negative (operational debt).
    pub fn spend(&self, cost: f64, tool: Option<&str>, failed: bool) {
        self.tick();
        let mut state = self.state.lock();
        state.budget -= cost;
        state.total_spent += cost;
        if let Some(tool) = tool {
            let stats = state.tool_stats.entry(tool.to_string()).or_default();
            stats.total_spent += cost;
            stats.calls += 1;
            if failed {
                stats.failures += 1;
            }
        }
        push_event(
            &mut state,
            self.max_events,
            EconomyEvent {
                kind: "spend".to_string(),
                tool: tool.map(str::to_string),
                ts: now_secs(),
                fields: HashMap::from([
                    ("cost".to_string(), serde_json::json!(cost)),
                    ("failed".to_string(), serde_json::json!(failed)),
                ]),
            },
        );
        self.publish(&state);
    }

    /// Record earned value. Only the positive, confidence-weighted portion
    /// is realized into budget/earnings; `total_value` always accumulates.
    pub fn record_value(&self, value: f64, confidence: f64, source: &str, tool: Option<&str>) {
        let mut state = self.state.lock();
        state.total_value += value;
        if let Some(tool) = tool {
            state.tool_stats.entry(tool.to_string()).or_default().total_value += value;
        }
        let realized = value * confidence;
        if realized > 0.0 {
            state.budget += realized;
            state.total_earnings += realized;
            state.last_earning_timestamp = now_secs();
        }
        push_event(
            &mut state,
            self.max_events,
            EconomyEvent {
                kind: "value".to_string(),
                tool: tool.map(str::to_string),
                ts: now_secs(),
                fields: HashMap::from([
                    ("value".to_string(), serde_json::json!(value)),
                    ("confidence".to_string(), serde_json::json!(confidence)),
                    ("source".to_string(), serde_json::json!(source)),
                    ("realized".to_string(), serde_json::json!(realized)),
                ]),
            },
        );
        self.publish(&state);
    }

    /// Never-block property: always returns `true`.
    pub fn check_budget(&self, _priority: f64) -> bool {
        self.tick();
        true
    }

    /// Advisory only: catastrophic failure or ROI signals, never consulted
    /// as a hard gate by the Decider (spec §4.7, Open Question 3).
    pub fn should_throttle(&self, tool: &str) -> bool {
        let state = self.state.lock();
        let stats = state.tool_stats.get(tool).cloned().unwrap_or_default();
        (stats.calls > 50 && stats.error_rate() > 0.9) || (stats.total_spent > 100.0 && stats.roi() < 0.01)
    }

    /// Operational health indicator: `0.0` healthy, approaching `1.0` under
    /// deep debt. Advisory only, never blocking.
    pub fn vitality(&self) -> f64 {
        let state = self.state.lock();
        if state.budget >= -100.0 {
            0.0
        } else {
            (state.budget.abs() / 1000.0).min(1.0)
        }
    }

    pub fn get_tool_stats(&self, tool: &str) -> ToolStats {
        self.state.lock().tool_stats.get(tool).cloned().unwrap_or_default()
    }

    pub fn snapshot(&self) -> EconomySnapshot {
        self.tick();
        let state = self.state.lock().clone();
        let net_position = state.total_earnings - state.total_spent;
        let roi_ratio = state.total_value / state.total_spent.max(1.0);
        let earning_rate = state.total_earnings / (now_secs() - state.last_earning_timestamp).max(1.0);
        EconomySnapshot {
            state,
            net_position,
            roi_ratio,
            earning_rate,
        }
    }

    fn publish(&self, state: &EconomyState) {
        let _ = self.writer_tx.send(Some(state.clone()));
    }

    /// Take the receiving half of the writer channel. Called once by the
    /// runtime to spawn the single background flusher task; returns `None`
    /// if already taken.
    pub fn take_writer_receiver(&self) -> Option<watch::Receiver<Option<EconomyState>>> {
        self.writer_rx.lock().take()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reset to a fresh state at `config`'s defaults. An operational escape
    /// hatch (spec §6 `reset_economy`), not invoked by any autonomous cycle.
    pub fn reset(&self, config: &Config) {
        let mut state = self.state.lock();
        *state = EconomyState::fresh(config);
        self.publish(&state);
    }
}

fn push_event(state: &mut EconomyState, max_events: usize, event: EconomyEvent) {
    state.events.push_back(event);
    while state.events.len() > max_events {
        state.events.pop_front();
    }
}

fn load_state(path: &Path) -> Option<EconomyState> {
    let bytes = std::fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Atomic write (temp file + rename) used by the single background writer.
/// Never called on the hot path.
pub fn flush_to_disk(path: &Path, state: &EconomyState) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
    std::fs::rename(&tmp, path)
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
