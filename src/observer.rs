//! Observer / Signal Summary: aggregates a pain-score signal from the
//! Orchestrator's ledger (spec §4.8).
//!
//! The Observer reads an in-memory ledger snapshot handed to it by the
//! Orchestrator; it never reads files written by another component
//! (Design Notes item 7).

use std::collections::HashSet;

use serde::Serialize;

use crate::orchestrator::{LedgerRecord, LedgerStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PressureSource {
    Cost,
    Errors,
    Latency,
    MemoryPressure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Trend {
    Improving,
    Stable,
    Degrading,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalSummary {
    pub pain_score: f64,
    pub pressure_sources: Vec<PressureSource>,
    pub trend: Trend,
    pub confidence: f64,
    pub raw_metrics: serde_json::Value,
}

/// Aggregate the last `records` (already limited by the caller, default
/// 100) into a [`SignalSummary`]. Pure function of its input: the
/// Orchestrator is the single source of truth for the ledger.
pub fn collect_signals(records: &[LedgerRecord]) -> SignalSummary {
    let total = records.len();
    if total == 0 {
        return SignalSummary {
            pain_score: 0.0,
            pressure_sources: Vec::new(),
            trend: Trend::Stable,
            confidence: 0.5,
            raw_metrics: serde_json::json!({"source": "empty_ledger"}),
        };
    }

    let failures = records
        .iter()
        .filter(|r| matches!(r.status, LedgerStatus::Failed | LedgerStatus::Cancelled))
        .count();
    let error_rate = failures as f64 / total as f64;

    let completed: Vec<&LedgerRecord> = records.iter().filter(|r| r.status == LedgerStatus::Completed).collect();
    let avg_latency = if completed.is_empty() {
        0.0
    } else {
        completed.iter().map(|r| r.duration_ms as f64).sum::<f64>() / completed.len() as f64
    };

    let total_cost: f64 = records.iter().map(|r| r.cost_spent).sum();

    let mut pressure_sources: HashSet<PressureSource> = HashSet::new();
    let mut pain_score = 0.0;

    if error_rate > 0.1 {
        pain_score += 0.4;
        pressure_sources.insert(PressureSource::Errors);
    }
    if error_rate > 0.3 {
        pain_score += 0.3;
    }
    if avg_latency > 2000.0 {
        pain_score += 0.2;
        pressure_sources.insert(PressureSource::Latency);
    }
    if total_cost > 5.0 {
        pain_score += 0.2;
        pressure_sources.insert(PressureSource::Cost);
    }
    pain_score = pain_score.min(1.0);

    let recent_10: Vec<&LedgerRecord> = records.iter().rev().take(10).collect();
    let older_90: Vec<&LedgerRecord> = records.iter().rev().skip(10).collect();

    let recent_errors = recent_10
        .iter()
        .filter(|r| matches!(r.status, LedgerStatus::Failed | LedgerStatus::Cancelled))
        .count();
    let older_errors = older_90
        .iter()
        .filter(|r| matches!(r.status, LedgerStatus::Failed | LedgerStatus::Cancelled))
        .count();

    let recent_error_rate = if recent_10.is_empty() { 0.0 } else { recent_errors as f64 / recent_10.len() as f64 };
    let older_error_rate = if older_90.is_empty() { 0.0 } else { older_errors as f64 / older_90.len() as f64 };

    let trend = if recent_error_rate > older_error_rate * 1.5 && recent_error_rate > 0.1 {
        Trend::Degrading
    } else if recent_error_rate < older_error_rate * 0.5 && older_error_rate > 0.1 {
        Trend::Improving
    } else {
        Trend::Stable
    };

    let confidence = if total >= 20 { 0.9 } else { 0.5 };

    SignalSummary {
        pain_score,
        pressure_sources: pressure_sources.into_iter().collect(),
        trend,
        confidence,
        raw_metrics: serde_json::json!({
            "error_rate": error_rate,
            "avg_latency": avg_latency,
            "total_cost": total_cost,
            "sample_size": total,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: LedgerStatus, cost: f64, duration_ms: u64) -> LedgerRecord {
        LedgerRecord {
            envelope_digest: "d".to_string(),
            tool_name: "t".to_string(),
            action: "a".to_string(),
            status,
            cost_spent: cost,
            duration_ms,
            started_at: 0.0,
            finished_at: 0.0,
        }
    }

    #[test]
    fn empty_ledger_is_low_confidence_and_painless() {
        let summary = collect_signals(&[]);
        assert_eq!(summary.pain_score, 0.0);
        assert_eq!(summary.confidence, 0.5);
    }

    #[test]
    fn high_error_rate_raises_pain_and_errors_pressure() {
        let mut records = Vec::new();
        for _ in 0..6 {
            records.push(record(LedgerStatus::Failed, 0.1, 10));
        }
        for _ in 0..4 {
            records.push(record(LedgerStatus::Completed, 0.1, 10));
        }
        let summary = collect_signals(&records);
        assert!(summary.pain_score >= 0.4);
        assert!(summary.pressure_sources.contains(&PressureSource::Errors));
    }

    #[test]
    fn pain_score_caps_at_one() {
        let mut records = Vec::new();
        for _ in 0..8 {
            records.push(record(LedgerStatus::Failed, 10.0, 5000));
        }
        for _ in 0..2 {
            records.push(record(LedgerStatus::Completed, 10.0, 5000));
        }
        let summary = collect_signals(&records);
        assert_eq!(summary.pain_score, 1.0);
    }
}
