//! Export cycle controller.
//!
//! One cycle streams the whole event log to the [`Collector`] and, once the
//! collector has accepted it, deletes every row below the high-water mark the
//! stream observed:
//!
//! ```text
//! Idle ──timer / trigger──▶ Exporting ──2xx──▶ Pruning ──▶ Idle
//!                              │
//!                              └── network error, timeout, non-2xx,
//!                                  answer before `]` was sent ──▶ Idle (nothing deleted)
//! ```
//!
//! A failed cycle keeps every row, so the next one re-sends them; the collector
//! may see duplicates but never misses an event.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error_handling::types::ExportError;
use crate::export::collector::Collector;
use crate::export::json_stream::export;
use crate::storage::storage_trait::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Exporting,
    Pruning,
}

/// Outcome of a completed cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub run_id: Uuid,
    pub rows_sent: u64,
    pub high_water_mark: i64,
    pub status: u16,
    pub pruned: u64,
}

pub struct ExportCycle {
    storage: Arc<dyn Storage>,
    collector: Arc<dyn Collector>,
    state: Mutex<CycleState>,
    // Serializes timer and on-demand runs.
    run_lock: tokio::sync::Mutex<()>,
}

/// Puts the cycle back to `Idle` however a run ends.
struct IdleOnDrop<'a>(&'a ExportCycle);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.set_state(CycleState::Idle);
    }
}

impl ExportCycle {
    pub fn new(storage: Arc<dyn Storage>, collector: Arc<dyn Collector>) -> Self {
        Self {
            storage,
            collector,
            state: Mutex::new(CycleState::Idle),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(CycleState::Idle)
    }

    fn set_state(&self, next: CycleState) {
        if let Ok(mut state) = self.state.lock() {
            *state = next;
        }
    }

    /// Runs one export and, on a 2xx answer, prunes what was sent.
    pub async fn run_once(&self) -> Result<CycleReport, ExportError> {
        let _running = self.run_lock.lock().await;
        let run_id = Uuid::new_v4();

        match self.storage.count().await {
            Ok(pending) => info!("[{}] reporting {} pending events", run_id, pending),
            Err(e) => warn!("[{}] reporting, pending count unavailable: {}", run_id, e),
        }

        self.set_state(CycleState::Exporting);
        let _idle = IdleOnDrop(self);

        let (body, progress) = export(self.storage.as_ref());
        let status = self.collector.submit(body).await.map_err(|e| {
            warn!("[{}] export aborted, keeping all rows: {}", run_id, e);
            e
        })?;

        let high_water_mark = progress.high_water_mark();
        if !(200..300).contains(&status) {
            warn!(
                "[{}] collector answered {}, keeping all rows (last id sent {})",
                run_id, status, high_water_mark
            );
            return Err(ExportError::Rejected(status));
        }
        if !progress.is_complete() {
            warn!(
                "[{}] collector answered {} before the array was closed, keeping all rows",
                run_id, status
            );
            return Err(ExportError::Incomplete {
                rows_sent: progress.rows_sent(),
            });
        }

        let mut pruned = 0;
        if high_water_mark > 0 {
            self.set_state(CycleState::Pruning);
            pruned = self
                .storage
                .delete_up_to(high_water_mark)
                .await
                .map_err(|e| {
                    error!("[{}] prune below {} failed: {}", run_id, high_water_mark, e);
                    ExportError::from(e)
                })?;
        }

        let report = CycleReport {
            run_id,
            rows_sent: progress.rows_sent(),
            high_water_mark,
            status,
            pruned,
        };
        info!(
            "[{}] export done: status={}, rows_sent={}, high_water_mark={}, pruned={}",
            run_id, report.status, report.rows_sent, report.high_water_mark, report.pruned
        );
        Ok(report)
    }
}

/// Handle used to request an export outside the regular schedule.
#[derive(Debug, Clone)]
pub struct ExportTrigger(Arc<Notify>);

impl ExportTrigger {
    pub fn fire(&self) {
        self.0.notify_one();
    }
}

/// Drives an [`ExportCycle`] on a fixed interval for the rest of the process.
pub struct ExportScheduler {
    cycle: Arc<ExportCycle>,
    interval: Duration,
    run_immediately: bool,
    wake: Arc<Notify>,
}

impl ExportScheduler {
    pub fn new(cycle: Arc<ExportCycle>, interval: Duration, run_immediately: bool) -> Self {
        Self {
            cycle,
            interval,
            run_immediately,
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn trigger(&self) -> ExportTrigger {
        ExportTrigger(Arc::clone(&self.wake))
    }

    pub async fn run(self) {
        info!(
            "Export scheduler started, interval {}s",
            self.interval.as_secs()
        );
        if self.run_immediately {
            let _ = self.cycle.run_once().await;
        }
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.wake.notified() => info!("Export requested on demand"),
            }
            // Failures are logged by the cycle and retried on the next tick.
            let _ = self.cycle.run_once().await;
        }
    }
}
