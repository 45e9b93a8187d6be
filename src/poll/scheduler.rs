// src/poll/scheduler.rs
//! Cooperative polling loop across all configured sources.
//!
//! One scheduler instance drives one cycle at a time. Cycles never
//! overlap: the interval tick and `poll_now` both pass through the same
//! busy flag, and a tick that lands mid-cycle is skipped rather than
//! queued. Stopping lets an in-flight cycle finish its current source and
//! prevents the next tick.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::poll::types::Source;
use crate::poll::{record_cycle_metrics, PollCoordinator};
use crate::sink::UpdateSink;

/// Operational snapshot, served by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub sources_total: usize,
    pub sources_processed: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Default)]
struct CycleStats {
    processed: usize,
    errors: Vec<String>,
}

struct SchedulerInner {
    coordinator: PollCoordinator,
    sources: Vec<Source>,
    sink: Arc<dyn UpdateSink>,
    interval_minutes: AtomicU64,
    inter_source_delay: Duration,
    running: AtomicBool,
    cycle_busy: AtomicBool,
    // Invalidates stale loops across stop/start; a loop only keeps
    // running while its own epoch is current.
    epoch: AtomicU64,
    shutdown: Notify,
    last_cycle: RwLock<CycleStats>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SchedulerInner {
    fn stale(&self, my_epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) != my_epoch || !self.running.load(Ordering::SeqCst)
    }
}

/// Drives the poll coordinator on a fixed interval. Cheap to clone;
/// clones share the same loop and state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(
        coordinator: PollCoordinator,
        sources: Vec<Source>,
        interval_minutes: u64,
        inter_source_delay: Duration,
        sink: Arc<dyn UpdateSink>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                coordinator,
                sources,
                sink,
                interval_minutes: AtomicU64::new(interval_minutes.max(1)),
                inter_source_delay,
                running: AtomicBool::new(false),
                cycle_busy: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                shutdown: Notify::new(),
                last_cycle: RwLock::new(CycleStats::default()),
                handle: Mutex::new(None),
            }),
        }
    }

    /// Start the polling loop. Idempotent: a second call while running is
    /// a no-op. The first cycle runs immediately, then the interval arms.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let my_epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = self.inner.clone();
        let handle = tokio::spawn(run_loop(inner, my_epoch));
        if let Ok(mut slot) = self.inner.handle.lock() {
            *slot = Some(handle);
        }
        tracing::info!(
            target: "scheduler",
            interval_minutes = self.inner.interval_minutes.load(Ordering::Relaxed),
            sources = self.inner.sources.len(),
            "scheduler started"
        );
    }

    /// Stop the loop. An in-flight cycle finishes its current source; the
    /// next scheduled tick never fires.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.shutdown.notify_one();
        if let Ok(mut slot) = self.inner.handle.lock() {
            slot.take();
        }
        tracing::info!(target: "scheduler", "scheduler stopped");
    }

    /// Trigger a single out-of-band cycle without disturbing the interval
    /// schedule. Returns false when a cycle is already in flight.
    pub fn poll_now(&self) -> bool {
        if !try_begin_cycle(&self.inner) {
            return false;
        }
        let inner = self.inner.clone();
        tokio::spawn(async move {
            run_cycle(&inner).await;
            end_cycle(&inner);
        });
        true
    }

    /// Update the cadence. When running, restarts the loop so the new
    /// interval applies immediately.
    pub fn set_polling_interval(&self, minutes: u64) {
        self.inner
            .interval_minutes
            .store(minutes.max(1), Ordering::SeqCst);
        if self.inner.running.load(Ordering::SeqCst) {
            self.stop();
            self.start();
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        let running = self.inner.running.load(Ordering::SeqCst);
        let interval = self.inner.interval_minutes.load(Ordering::Relaxed);
        let (processed, errors) = match self.inner.last_cycle.read() {
            Ok(stats) => (stats.processed, stats.errors.clone()),
            Err(_) => (0, Vec::new()),
        };
        SchedulerStatus {
            running,
            last_run: self.inner.coordinator.watermarks().latest(),
            next_run: running.then(|| Utc::now() + ChronoDuration::minutes(interval as i64)),
            sources_total: self.inner.sources.len(),
            sources_processed: processed,
            errors,
        }
    }
}

fn try_begin_cycle(inner: &SchedulerInner) -> bool {
    inner
        .cycle_busy
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
}

fn end_cycle(inner: &SchedulerInner) {
    inner.cycle_busy.store(false, Ordering::SeqCst);
}

async fn run_loop(inner: Arc<SchedulerInner>, my_epoch: u64) {
    // Immediate first cycle, then the timer.
    if try_begin_cycle(&inner) {
        run_cycle(&inner).await;
        end_cycle(&inner);
    }
    loop {
        let minutes = inner.interval_minutes.load(Ordering::Relaxed);
        let sleep = tokio::time::sleep(Duration::from_secs(minutes * 60));
        tokio::select! {
            _ = sleep => {
                if inner.stale(my_epoch) {
                    break;
                }
                if try_begin_cycle(&inner) {
                    run_cycle(&inner).await;
                    end_cycle(&inner);
                } else {
                    tracing::debug!(target: "scheduler", "tick skipped, cycle in flight");
                }
            }
            // A restart can leave a stored permit behind; only a loop
            // whose epoch went stale actually exits on it.
            _ = inner.shutdown.notified() => {
                if inner.stale(my_epoch) {
                    break;
                }
            }
        }
    }
}

/// One full cycle: every source in order, with an inter-source delay to
/// stay under upstream rate limits. Per-source failures are collected and
/// never stop the cycle.
async fn run_cycle(inner: &SchedulerInner) {
    let mut processed = 0usize;
    let mut cycle_errors = Vec::new();

    for (i, source) in inner.sources.iter().enumerate() {
        let result = inner.coordinator.poll_source(source).await;
        processed += 1;
        cycle_errors.extend(result.errors.iter().cloned());

        if !result.updates.is_empty() {
            if let Err(e) = inner.sink.persist(&result.source, &result.updates).await {
                cycle_errors.push(format!("sink failed for `{}`: {e:#}", source.id));
            }
        }

        if i + 1 < inner.sources.len() {
            tokio::time::sleep(inner.inter_source_delay).await;
        }
    }

    record_cycle_metrics();
    if let Ok(mut stats) = inner.last_cycle.write() {
        stats.processed = processed;
        stats.errors = cycle_errors.clone();
    }
    tracing::info!(
        target: "scheduler",
        processed,
        errors = cycle_errors.len(),
        "cycle complete"
    );
}
