//! Egress: the explainability log and the Vitals snapshot (spec §6).
//!
//! Every cycle's [`crate::autonomy::CycleRecord`] is appended to a JSONL
//! file — one record per line, never a whole-file JSON array — so a reader
//! can tail it without parsing the full history. A legacy deployment whose
//! log is still a single JSON array is migrated to JSONL in place on first
//! append.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use crate::autonomy::CycleRecord;
use crate::cml::CausalMemory;
use crate::economy::Economy;
use crate::error::{CoreError, CoreResult};
use crate::observer::{SignalSummary, Trend};
use crate::orchestrator::LedgerRecord;

/// The Vitals snapshot of spec §6:
/// `{heartbeat:{budget, reserve, status, trend}, mind:{current_intent,
/// stack_depth, focus}, senses:{pain_score, pressure_sources},
/// sovereignty:{last_refusal}, economy:{total_value, total_spent, roi}}`.
#[derive(Debug, Serialize)]
pub struct Vitals {
    pub heartbeat: Heartbeat,
    pub mind: Mind,
    pub senses: SignalSummary,
    pub sovereignty: Sovereignty,
    pub economy: crate::economy::EconomySnapshot,
}

#[derive(Debug, Serialize)]
pub struct Heartbeat {
    pub budget: f64,
    pub reserve: f64,
    pub status: String,
    pub trend: Trend,
}

#[derive(Debug, Serialize)]
pub struct Mind {
    pub current_intent: Option<String>,
    pub stack_depth: usize,
    pub focus: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LastRefusal {
    pub intent_id: String,
    pub reason: String,
    pub timestamp: f64,
}

#[derive(Debug, Serialize)]
pub struct Sovereignty {
    pub last_refusal: Option<LastRefusal>,
}

/// `economy.vitality()` (`0.0` normal, approaching `1.0` under deep debt)
/// collapsed into the coarse status band the Vitals heartbeat surfaces.
fn vitality_status(vitality: f64) -> &'static str {
    if vitality <= 0.0 {
        "nominal"
    } else if vitality < 0.5 {
        "strained"
    } else {
        "critical"
    }
}

pub fn build_vitals(
    economy: &Economy,
    signals: SignalSummary,
    stack_depth: usize,
    current_intent: Option<String>,
    focus: Option<String>,
    last_refusal: Option<LastRefusal>,
) -> Vitals {
    let snapshot = economy.snapshot();
    Vitals {
        heartbeat: Heartbeat {
            budget: snapshot.state.budget,
            reserve: snapshot.state.reserve,
            status: vitality_status(economy.vitality()).to_string(),
            trend: signals.trend,
        },
        mind: Mind {
            current_intent,
            stack_depth,
            focus,
        },
        senses: signals,
        sovereignty: Sovereignty { last_refusal },
        economy: snapshot,
    }
}

/// Append one cycle record as a single JSON line. If `path` currently holds
/// a legacy whole-file JSON array, it is rewritten as JSONL first.
pub fn append_explainability(path: &Path, record: &CycleRecord) -> CoreResult<()> {
    migrate_legacy_array_if_needed(path)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| CoreError::Io {
            path: parent.display().to_string(),
            source,
        })?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| CoreError::Io {
            path: path.display().to_string(),
            source,
        })?;

    let line = serde_json::to_string(record)?;
    writeln!(file, "{line}").map_err(|source| CoreError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(())
}

pub fn read_explainability(path: &Path) -> CoreResult<Vec<Value>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path).map_err(|source| CoreError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|source| CoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

fn migrate_legacy_array_if_needed(path: &Path) -> CoreResult<()> {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return Ok(());
    };
    let trimmed = contents.trim_start();
    if !trimmed.starts_with('[') {
        return Ok(());
    }
    let Ok(Value::Array(records)) = serde_json::from_str::<Value>(&contents) else {
        return Ok(());
    };

    let mut migrated = String::new();
    for record in &records {
        migrated.push_str(&serde_json::to_string(record)?);
        migrated.push('\n');
    }

    let tmp = path.with_extension("jsonl.tmp");
    std::fs::write(&tmp, migrated).map_err(|source| CoreError::Io {
        path: tmp.display().to_string(),
        source,
    })?;
    std::fs::rename(&tmp, path).map_err(|source| CoreError::Io {
        path: path.display().to_string(),
        source,
    })?;
    tracing::info!(path = %path.display(), records = records.len(), "egress: migrated legacy explainability array to JSONL");
    Ok(())
}

/// Append ledger records not yet flushed to the append-only ledger JSONL
/// file (spec §6 persisted state layout). Called by the background ledger
/// flusher, never on the orchestrator's hot path.
pub fn append_ledger_records(path: &Path, records: &[LedgerRecord]) -> CoreResult<()> {
    if records.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| CoreError::Io {
            path: parent.display().to_string(),
            source,
        })?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| CoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
    for record in records {
        let line = serde_json::to_string(record)?;
        writeln!(file, "{line}").map_err(|source| CoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
    }
    Ok(())
}

pub fn export_cml_snapshot(path: &Path, cml: &CausalMemory) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| CoreError::Io {
            path: parent.display().to_string(),
            source,
        })?;
    }
    let export = cml.export();
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(&export)?).map_err(|source| CoreError::Io {
        path: tmp.display().to_string(),
        source,
    })?;
    std::fs::rename(&tmp, path).map_err(|source| CoreError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(())
}

pub fn import_cml_snapshot(path: &Path) -> CoreResult<Option<CausalMemory>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(path).map_err(|source| CoreError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let export = serde_json::from_slice(&bytes)?;
    Ok(Some(CausalMemory::import(export)))
}

fn now_secs() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_record(cycle: u64) -> CycleRecord {
        CycleRecord {
            cycle,
            timestamp: 0.0,
            chosen_intent: Some("intent_1".to_string()),
            verdict: "act".to_string(),
            reason: None,
            outcome: None,
        }
    }

    #[test]
    fn append_then_read_round_trips_jsonl() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("explainability.jsonl");
        append_explainability(&path, &sample_record(1)).unwrap();
        append_explainability(&path, &sample_record(2)).unwrap();

        let records = read_explainability(&path).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn legacy_json_array_is_migrated_to_jsonl_on_append() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("explainability.jsonl");
        std::fs::write(&path, serde_json::to_string(&serde_json::json!([{"cycle": 1}, {"cycle": 2}])).unwrap()).unwrap();

        append_explainability(&path, &sample_record(3)).unwrap();

        let records = read_explainability(&path).unwrap();
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn ledger_records_append_across_multiple_flushes() {
        use crate::orchestrator::LedgerStatus;
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let record = LedgerRecord {
            envelope_digest: "d".to_string(),
            tool_name: "t".to_string(),
            action: "a".to_string(),
            status: LedgerStatus::Completed,
            cost_spent: 1.0,
            duration_ms: 5,
            started_at: 0.0,
            finished_at: 1.0,
        };
        append_ledger_records(&path, &[record.clone()]).unwrap();
        append_ledger_records(&path, &[record]).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn cml_snapshot_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cml.json");
        let cml = CausalMemory::new();
        cml.start_decision_session("s1", "d", "autonomy").unwrap();
        export_cml_snapshot(&path, &cml).unwrap();

        let restored = import_cml_snapshot(&path).unwrap().unwrap();
        assert_eq!(restored.export().nodes.len(), cml.export().nodes.len());
    }
}
