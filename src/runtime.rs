//! Concurrency & resource model: the canonical task layout of spec §5.
//!
//! One **autonomy loop** task runs the observe -> plan -> decide -> act ->
//! reflect -> learn -> log cycle on `autonomy_cycle_interval`. A pool of
//! **tool-execution workers** drains a bounded channel of envelopes, giving
//! external callers backpressure independent of the autonomy loop's own
//! direct calls into the [`crate::orchestrator::Orchestrator`]. A handful
//! of **background** tasks persist state without ever blocking the hot
//! path: the economy flusher, the ledger flusher, the CML snapshotter, and
//! a heartbeat. Cancellation is cooperative: every loop selects against a
//! shared shutdown watch and exits cleanly rather than being force-killed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::core::Core;
use crate::model::ToolInvocationEnvelope;
use crate::model::ToolResult;

/// One unit of work submitted to the tool-execution worker pool.
pub struct WorkOrder {
    pub envelope: ToolInvocationEnvelope,
    pub respond_to: oneshot::Sender<ToolResult>,
}

/// Handles to every background task spawned by [`spawn`]. Dropping this
/// value does not stop the tasks; call [`RuntimeHandles::shutdown`]
/// (cooperative: in-flight work still drains) and then `.join().await` the
/// handles you care about.
pub struct RuntimeHandles {
    pub autonomy: JoinHandle<()>,
    pub workers: Vec<JoinHandle<()>>,
    pub economy_flusher: JoinHandle<()>,
    pub ledger_flusher: JoinHandle<()>,
    pub cml_snapshotter: JoinHandle<()>,
    pub heartbeat: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl RuntimeHandles {
    /// Signal every task to stop at its next cooperative checkpoint. Per
    /// spec §5, in-flight tool invocations have their deadlines collapsed to
    /// "now" rather than being aborted; their results still land in the
    /// ledger as `cancelled`/`timed_out`.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

const WORKER_CHANNEL_DEPTH: usize = 256;
const LEDGER_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const CML_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(30);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Wire up the canonical task layout around an already-constructed `Core`
/// (tools must already be registered). Returns the worker-pool submission
/// channel alongside the handles so the embedding process can route
/// external `invoke` calls through the same backpressure path the
/// autonomy loop's own cycle bypasses (it calls the orchestrator directly,
/// as spec §4.7 describes).
pub fn spawn(core: Arc<Core>, worker_count: usize) -> (RuntimeHandles, mpsc::Sender<WorkOrder>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (work_tx, work_rx) = mpsc::channel(WORKER_CHANNEL_DEPTH);

    let workers = spawn_workers(core.clone(), worker_count, work_rx, shutdown_rx.clone());
    let autonomy = spawn_autonomy_loop(core.clone(), shutdown_rx.clone());
    let economy_flusher = spawn_economy_flusher(core.clone(), shutdown_rx.clone());
    let ledger_flusher = spawn_ledger_flusher(core.clone(), shutdown_rx.clone());
    let cml_snapshotter = spawn_cml_snapshotter(core.clone(), shutdown_rx.clone());
    let heartbeat = spawn_heartbeat(core, shutdown_rx);

    (
        RuntimeHandles {
            autonomy,
            workers,
            economy_flusher,
            ledger_flusher,
            cml_snapshotter,
            heartbeat,
            shutdown: shutdown_tx,
        },
        work_tx,
    )
}

/// N tool-execution workers consuming envelopes from a shared channel. Each
/// envelope still goes through [`crate::orchestrator::Orchestrator::invoke`]
/// — the workers add no logic of their own beyond routing and backpressure.
fn spawn_workers(
    core: Arc<Core>,
    worker_count: usize,
    work_rx: mpsc::Receiver<WorkOrder>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let work_rx = Arc::new(tokio::sync::Mutex::new(work_rx));
    (0..worker_count.max(1))
        .map(|worker_id| {
            let core = core.clone();
            let work_rx = work_rx.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let order = {
                        let mut rx = work_rx.lock().await;
                        tokio::select! {
                            biased;
                            _ = shutdown.changed() => None,
                            order = rx.recv() => order,
                        }
                    };
                    let Some(order) = order else { break };
                    let result = core.orchestrator.invoke(order.envelope).await;
                    let _ = order.respond_to.send(result);
                }
                tracing::debug!(worker_id, "runtime: tool-execution worker stopped");
            })
        })
        .collect()
}

/// The autonomy loop: one cycle every `autonomy_cycle_interval`, persisting
/// its explainability record and snapshotting the intent stack on every
/// mutating event (spec §4.7, §6).
fn spawn_autonomy_loop(core: Arc<Core>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = core.config.autonomy_cycle_interval;
        let mut last_tick = tokio::time::Instant::now();
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            if *shutdown.borrow() {
                break;
            }

            let elapsed = last_tick.elapsed();
            last_tick = tokio::time::Instant::now();

            let ledger_window = core.orchestrator.recent_ledger(100);
            let record = {
                let mut autonomy = core.autonomy.lock();
                autonomy.run_cycle(&ledger_window, elapsed).await
            };

            if let Err(err) = crate::egress::append_explainability(std::path::Path::new(&core.config.autonomy_explain_path), &record) {
                tracing::error!(%err, "runtime: failed to append explainability record");
            }
        }
        tracing::info!("runtime: autonomy loop stopped");
    })
}

/// Drain the economy's single-writer channel and flush each new snapshot to
/// disk with an atomic temp-file-then-rename write. Never more than one
/// outstanding write; newer snapshots overwrite older ones (spec §4.5).
fn spawn_economy_flusher(core: Arc<Core>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(mut rx) = core.economy.take_writer_receiver() else {
            tracing::warn!("runtime: economy writer receiver already taken, flusher exiting");
            return;
        };
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }
            let snapshot = rx.borrow_and_update().clone();
            if let Some(state) = snapshot {
                if let Err(err) = crate::economy::flush_to_disk(core.economy.path(), &state) {
                    tracing::error!(%err, "runtime: economy flush failed");
                }
            }
        }
        tracing::info!("runtime: economy flusher stopped");
    })
}

/// Append newly observed ledger records to the append-only ledger file on a
/// fixed interval. The orchestrator's in-memory ring is the source of truth
/// for the Observer; this task only mirrors it to disk for audit/replay.
fn spawn_ledger_flusher(core: Arc<Core>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let path = std::path::PathBuf::from(&core.config.ledger_path);
        let mut last_flushed_finished_at = 0.0f64;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(LEDGER_FLUSH_INTERVAL) => {}
            }
            if *shutdown.borrow() {
                break;
            }
            let window = core.orchestrator.recent_ledger(core.config.orchestrator_ledger_retention);
            let fresh: Vec<_> = window.into_iter().filter(|r| r.finished_at > last_flushed_finished_at).collect();
            if let Some(latest) = fresh.last() {
                last_flushed_finished_at = latest.finished_at;
            }
            if let Err(err) = crate::egress::append_ledger_records(&path, &fresh) {
                tracing::error!(%err, "runtime: ledger flush failed");
            }
        }
        tracing::info!("runtime: ledger flusher stopped");
    })
}

/// Periodically export the CML arena to disk so a restart can rehydrate the
/// causal graph (spec §6 "CML exports/imports").
fn spawn_cml_snapshotter(core: Arc<Core>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let path = std::path::PathBuf::from(&core.config.cml_path);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(CML_SNAPSHOT_INTERVAL) => {}
            }
            if *shutdown.borrow() {
                break;
            }
            if let Err(err) = crate::egress::export_cml_snapshot(&path, &core.cml) {
                tracing::error!(%err, "runtime: cml snapshot failed");
            }
        }
        tracing::info!("runtime: cml snapshotter stopped");
    })
}

/// Liveness signal: logs the Vitals snapshot at a fixed cadence so an
/// external supervisor can tell the loop is still breathing even during a
/// quiet cycle interval.
fn spawn_heartbeat(core: Arc<Core>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {}
            }
            if *shutdown.borrow() {
                break;
            }
            let ledger_window = core.orchestrator.recent_ledger(100);
            let signals = crate::observer::collect_signals(&ledger_window);
            let (current_intent, focus, stack_depth, last_refusal) = {
                let autonomy = core.autonomy.lock();
                let (current_intent, focus) = autonomy.current_focus();
                (current_intent, focus, autonomy.stack.len(), autonomy.last_refusal())
            };
            let vitals = crate::egress::build_vitals(&core.economy, signals, stack_depth, current_intent, focus, last_refusal);
            tracing::info!(
                budget = vitals.heartbeat.budget,
                reserve = vitals.heartbeat.reserve,
                status = %vitals.heartbeat.status,
                trend = ?vitals.heartbeat.trend,
                stack_depth = vitals.mind.stack_depth,
                frozen = core.epe.is_frozen(),
                "runtime: heartbeat"
            );
        }
        tracing::info!("runtime: heartbeat stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::evolution::AlwaysPassSandbox;
    use tempfile::tempdir;

    fn test_core(dir: &std::path::Path) -> Arc<Core> {
        let mut config = Config::default();
        config.economy_path = dir.join("economy.json").to_string_lossy().into_owned();
        config.autonomy_state_path = dir.join("autonomy_state.json").to_string_lossy().into_owned();
        config.autonomy_explain_path = dir.join("explainability.jsonl").to_string_lossy().into_owned();
        config.cml_path = dir.join("cml.json").to_string_lossy().into_owned();
        config.ledger_path = dir.join("ledger.jsonl").to_string_lossy().into_owned();
        config.autonomy_cycle_interval = Duration::from_millis(20);
        Arc::new(Core::new(config, Box::new(AlwaysPassSandbox)))
    }

    #[tokio::test]
    async fn spawned_tasks_drain_and_stop_on_shutdown() {
        let dir = tempdir().unwrap();
        let core = test_core(dir.path());
        let (handles, _work_tx) = spawn(core, 2);

        tokio::time::sleep(Duration::from_millis(60)).await;
        handles.shutdown();

        handles.autonomy.await.unwrap();
        for worker in handles.workers {
            worker.await.unwrap();
        }
        handles.economy_flusher.await.unwrap();
        handles.ledger_flusher.await.unwrap();
        handles.cml_snapshotter.await.unwrap();
        handles.heartbeat.await.unwrap();
    }

    #[tokio::test]
    async fn worker_pool_executes_submitted_envelope() {
        use crate::model::ToolInvocationEnvelope;
        use async_trait::async_trait;

        struct Echo;
        #[async_trait]
        impl crate::orchestrator::Capability for Echo {
            fn name(&self) -> &str {
                "echo"
            }
            fn domain(&self) -> &str {
                "test"
            }
            fn estimate_cost(&self, _e: &ToolInvocationEnvelope) -> f64 {
                0.0
            }
            async fn execute(&self, _e: &ToolInvocationEnvelope) -> ToolResult {
                ToolResult::ok(serde_json::json!({"ok": true}), 0.0)
            }
        }

        let dir = tempdir().unwrap();
        let core = test_core(dir.path());
        core.register_tool(Arc::new(Echo));
        let (handles, work_tx) = spawn(core, 1);

        let (tx, rx) = oneshot::channel();
        work_tx
            .send(WorkOrder {
                envelope: ToolInvocationEnvelope::new("echo", "test", "ping"),
                respond_to: tx,
            })
            .await
            .unwrap();
        let result = rx.await.unwrap();
        assert!(result.success);

        handles.shutdown();
        handles.autonomy.await.unwrap();
        for worker in handles.workers {
            worker.await.unwrap();
        }
        handles.economy_flusher.await.unwrap();
        handles.ledger_flusher.await.unwrap();
        handles.cml_snapshotter.await.unwrap();
        handles.heartbeat.await.unwrap();
    }
}
