//! View-event batcher
//!
//! Collects "form viewed" notifications in memory and applies them to the
//! form store in aggregated batches. Two triggers start a flush:
//! - the queue reaching `batch_size` events
//! - `processing_interval` elapsing after the first queued event
//!
//! The timer only exists while events are pending. At most one flush cycle
//! runs at a time; `record_view` keeps appending while it does.
//!
//! ```text
//!   Idle --record--> Waiting --timer / size--> Flushing
//!    ^                  ^                         |
//!    |                  +---- queue non-empty ----+
//!    +----------------------- queue empty --------+
//! ```

pub mod aggregate;
pub mod event;
pub mod scheduler;

use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::store::{FormStore, FormUpdate, StoreError};
use aggregate::{merge_traffic, FormAggregate, FormTally};
use event::{normalize_referrer, normalize_user_agent, ViewEvent};
use scheduler::{Clock, Scheduler, SystemClock, TimerHandle, TokioScheduler};

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_PROCESSING_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a flush keeps re-merging a form that other writers keep changing
const CONFLICT_RETRY_WINDOW: Duration = Duration::from_secs(2);
const CONFLICT_BACKOFF_INITIAL: Duration = Duration::from_millis(10);
const CONFLICT_BACKOFF_MAX: Duration = Duration::from_millis(200);

/// Batch window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatcherConfig {
    /// Queue length that triggers an immediate flush; also the most events
    /// one flush takes off the queue
    pub batch_size: usize,
    /// Delay between the first queued event and the time-triggered flush
    pub processing_interval: Duration,
    /// Upper bound on the shutdown flush
    pub shutdown_timeout: Duration,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            processing_interval: DEFAULT_PROCESSING_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No timer pending
    Idle,
    /// Time-triggered flush scheduled
    Waiting,
    /// Flush cycle running
    Flushing,
}

/// Outcome of one or more flush cycles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Events taken off the queue
    pub events: usize,
    pub forms_updated: usize,
    /// Forms that no longer exist; their views were dropped
    pub forms_missing: usize,
    /// Forms whose update failed; their views were dropped
    pub forms_failed: usize,
    /// Forms still changing underneath the flush when the retry window
    /// closed; their views were dropped
    pub forms_contended: usize,
}

impl FlushReport {
    fn absorb(&mut self, other: FlushReport) {
        self.events += other.events;
        self.forms_updated += other.forms_updated;
        self.forms_missing += other.forms_missing;
        self.forms_failed += other.forms_failed;
        self.forms_contended += other.forms_contended;
    }
}

/// Point-in-time batcher counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatcherStats {
    pub phase: Phase,
    pub queued: usize,
    /// Timestamp of the oldest queued view, if any
    pub oldest_queued_millis: Option<i64>,
    pub batch_size: usize,
    pub processing_interval_ms: u64,
    pub events_recorded: u64,
    pub events_dropped: u64,
    pub events_flushed: u64,
    pub flushes: u64,
    pub forms_updated: u64,
    pub forms_missing: u64,
    pub update_failures: u64,
    pub update_conflicts: u64,
}

/// Shutdown flush exceeded its time budget
#[derive(Debug, Error)]
#[error("Shutdown flush did not finish within {0:?}")]
pub struct ShutdownTimeout(pub Duration);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FormOutcome {
    Updated,
    Missing,
    Failed,
    Contended,
}

struct Inner {
    queue: VecDeque<ViewEvent>,
    phase: Phase,
    timer: Option<TimerHandle>,
    /// Bumped whenever a timer is armed or disarmed; a firing timer whose
    /// generation is stale does nothing
    timer_generation: u64,
    closed: bool,
}

#[derive(Default)]
struct Counters {
    events_recorded: AtomicU64,
    events_dropped: AtomicU64,
    events_flushed: AtomicU64,
    flushes: AtomicU64,
    forms_updated: AtomicU64,
    forms_missing: AtomicU64,
    update_failures: AtomicU64,
    update_conflicts: AtomicU64,
}

/// Buffers form views and flushes aggregated counts to a [`FormStore`]
pub struct ViewBatcher {
    config: BatcherConfig,
    store: Arc<dyn FormStore>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
    counters: Counters,
    /// Signalled at the end of every flush cycle
    flush_done: Notify,
    this: Weak<ViewBatcher>,
}

impl ViewBatcher {
    /// Create a batcher with explicit scheduling and clock capabilities
    ///
    /// `scheduler` must never run a task synchronously inside
    /// `schedule_after` or `spawn`.
    pub fn new(
        config: BatcherConfig,
        store: Arc<dyn FormStore>,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let config = BatcherConfig {
            batch_size: config.batch_size.max(1),
            ..config
        };

        Arc::new_cyclic(|this| Self {
            config,
            store,
            scheduler,
            clock,
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                phase: Phase::Idle,
                timer: None,
                timer_generation: 0,
                closed: false,
            }),
            counters: Counters::default(),
            flush_done: Notify::new(),
            this: this.clone(),
        })
    }

    /// Batcher on the current tokio runtime with the system clock
    pub fn with_tokio(config: BatcherConfig, store: Arc<dyn FormStore>) -> Arc<Self> {
        Self::new(
            config,
            store,
            Arc::new(TokioScheduler::current()),
            Arc::new(SystemClock),
        )
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every critical section leaves Inner valid, so poisoning is ignored
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a form view
    ///
    /// Never blocks on I/O and never fails: a blank form key or a view
    /// arriving after shutdown is dropped with a log line, a missing or
    /// malformed referrer becomes `"direct"`.
    pub fn record_view(&self, form_key: &str, referrer: Option<&str>, user_agent: Option<&str>) {
        let form_key = form_key.trim();
        if form_key.is_empty() {
            warn!("Dropping view with empty form key");
            self.counters.events_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let event = ViewEvent {
            form_key: form_key.to_string(),
            referrer: normalize_referrer(referrer),
            timestamp_millis: self.clock.now_millis(),
            user_agent: normalize_user_agent(user_agent),
        };

        let flush_now = {
            let mut inner = self.lock();
            if inner.closed {
                debug!(form_key, "Batcher closed, dropping view");
                self.counters.events_dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }

            trace!(form_key, referrer = %event.referrer, "View queued");
            inner.queue.push_back(event);
            self.counters.events_recorded.fetch_add(1, Ordering::Relaxed);

            let full = inner.queue.len() >= self.config.batch_size;
            match inner.phase {
                Phase::Idle | Phase::Waiting if full => {
                    self.disarm_timer(&mut inner);
                    inner.phase = Phase::Flushing;
                    true
                }
                Phase::Idle => {
                    self.arm_timer(&mut inner);
                    false
                }
                Phase::Waiting | Phase::Flushing => false,
            }
        };

        if flush_now {
            debug!(batch_size = self.config.batch_size, "Batch full, flushing early");
            self.spawn_flush_cycle();
        }
    }

    /// Current scheduler state
    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    /// Events waiting for a flush
    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn stats(&self) -> BatcherStats {
        let (phase, queued, oldest_queued_millis) = {
            let inner = self.lock();
            (
                inner.phase,
                inner.queue.len(),
                inner.queue.front().map(|event| event.timestamp_millis),
            )
        };
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        BatcherStats {
            phase,
            queued,
            oldest_queued_millis,
            batch_size: self.config.batch_size,
            processing_interval_ms: self.config.processing_interval.as_millis() as u64,
            events_recorded: load(&self.counters.events_recorded),
            events_dropped: load(&self.counters.events_dropped),
            events_flushed: load(&self.counters.events_flushed),
            flushes: load(&self.counters.flushes),
            forms_updated: load(&self.counters.forms_updated),
            forms_missing: load(&self.counters.forms_missing),
            update_failures: load(&self.counters.update_failures),
            update_conflicts: load(&self.counters.update_conflicts),
        }
    }

    /// Stop accepting views and flush everything still queued
    ///
    /// Waits for an in-flight flush cycle, then drains the queue in
    /// `batch_size` chunks. The whole routine is bounded by `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<FlushReport, ShutdownTimeout> {
        match tokio::time::timeout(timeout, self.drain_for_shutdown()).await {
            Ok(report) => Ok(report),
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    queued = self.queued(),
                    "Shutdown flush timed out, remaining views are lost"
                );
                Err(ShutdownTimeout(timeout))
            }
        }
    }

    /// Arm the processing-interval timer; caller holds the lock
    fn arm_timer(&self, inner: &mut Inner) {
        inner.timer_generation += 1;
        let generation = inner.timer_generation;
        let this = self.this.clone();

        let task = async move {
            if let Some(batcher) = this.upgrade() {
                batcher.on_timer(generation);
            }
        }
        .boxed();

        inner.timer = Some(
            self.scheduler
                .schedule_after(self.config.processing_interval, task),
        );
        inner.phase = Phase::Waiting;
    }

    /// Cancel a pending timer; caller holds the lock
    fn disarm_timer(&self, inner: &mut Inner) {
        inner.timer_generation += 1;
        if let Some(timer) = inner.timer.take() {
            timer.cancel();
        }
    }

    fn on_timer(&self, generation: u64) {
        {
            let mut inner = self.lock();
            if inner.phase != Phase::Waiting || inner.timer_generation != generation {
                trace!(generation, "Ignoring stale flush timer");
                return;
            }
            inner.timer = None;
            inner.phase = Phase::Flushing;
        }

        debug!("Processing interval elapsed, flushing");
        self.spawn_flush_cycle();
    }

    fn spawn_flush_cycle(&self) {
        let Some(batcher) = self.this.upgrade() else {
            return;
        };
        self.scheduler
            .spawn(async move { batcher.run_flush_cycle().await }.boxed());
    }

    /// One flush followed by the transition out of `Flushing`
    async fn run_flush_cycle(self: Arc<Self>) {
        self.flush_batch().await;

        let flush_again = {
            let mut inner = self.lock();
            if inner.closed {
                // Shutdown drains whatever is left
                inner.phase = Phase::Idle;
                false
            } else if inner.queue.is_empty() {
                inner.phase = Phase::Idle;
                false
            } else if inner.queue.len() >= self.config.batch_size {
                true
            } else {
                // Views arrived during the flush
                self.arm_timer(&mut inner);
                false
            }
        };

        self.flush_done.notify_waiters();

        if flush_again {
            debug!("Queue still holds a full batch, flushing again");
            self.spawn_flush_cycle();
        }
    }

    /// Take up to `batch_size` events off the queue and apply them
    async fn flush_batch(&self) -> FlushReport {
        let batch: Vec<ViewEvent> = {
            let mut inner = self.lock();
            let take = inner.queue.len().min(self.config.batch_size);
            inner.queue.drain(..take).collect()
        };

        if batch.is_empty() {
            return FlushReport::default();
        }

        let aggregate = FormAggregate::from_events(&batch);
        debug!(
            events = batch.len(),
            forms = aggregate.len(),
            "Flushing view batch"
        );

        self.counters.flushes.fetch_add(1, Ordering::Relaxed);
        self.counters
            .events_flushed
            .fetch_add(batch.len() as u64, Ordering::Relaxed);

        let outcomes = join_all(
            aggregate
                .into_forms()
                .map(|(form_key, tally)| self.apply_tally(form_key, tally)),
        )
        .await;

        let mut report = FlushReport {
            events: batch.len(),
            ..FlushReport::default()
        };
        for outcome in outcomes {
            match outcome {
                FormOutcome::Updated => report.forms_updated += 1,
                FormOutcome::Missing => report.forms_missing += 1,
                FormOutcome::Failed => report.forms_failed += 1,
                FormOutcome::Contended => report.forms_contended += 1,
            }
        }

        self.counters
            .forms_updated
            .fetch_add(report.forms_updated as u64, Ordering::Relaxed);
        self.counters
            .forms_missing
            .fetch_add(report.forms_missing as u64, Ordering::Relaxed);
        self.counters
            .update_failures
            .fetch_add(report.forms_failed as u64, Ordering::Relaxed);
        self.counters
            .update_conflicts
            .fetch_add(report.forms_contended as u64, Ordering::Relaxed);

        if report.forms_missing > 0 || report.forms_failed > 0 || report.forms_contended > 0 {
            warn!(
                events = report.events,
                updated = report.forms_updated,
                missing = report.forms_missing,
                failed = report.forms_failed,
                contended = report.forms_contended,
                "View batch flushed with dropped forms"
            );
        } else {
            debug!(
                events = report.events,
                updated = report.forms_updated,
                "View batch flushed"
            );
        }

        report
    }

    /// Read-merge-write one form's tally
    ///
    /// A revision conflict re-reads and re-merges at once, then with growing
    /// backoff until `CONFLICT_RETRY_WINDOW` closes. Any other failure drops
    /// the tally for this cycle.
    async fn apply_tally(&self, form_key: String, tally: FormTally) -> FormOutcome {
        let increment = i64::try_from(tally.count).unwrap_or(i64::MAX);
        let deadline = Instant::now() + CONFLICT_RETRY_WINDOW;
        let mut backoff = CONFLICT_BACKOFF_INITIAL;
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let form = match self.store.find_form(&form_key).await {
                Ok(Some(form)) => form,
                Ok(None) => {
                    warn!(
                        form_key = %form_key,
                        views = tally.count,
                        "Form not found, dropping its views"
                    );
                    return FormOutcome::Missing;
                }
                Err(e) => {
                    error!(form_key = %form_key, error = %e, "Form lookup failed");
                    return FormOutcome::Failed;
                }
            };

            let update = FormUpdate {
                increment_views_by: increment,
                traffic: merge_traffic(&form.traffic, &tally.traffic_by_source),
                expected_revision: form.revision,
            };

            match self.store.update_form(form.id, update).await {
                Ok(()) => {
                    trace!(form_key = %form_key, views = tally.count, attempt, "Form views applied");
                    return FormOutcome::Updated;
                }
                Err(StoreError::Conflict(_)) => {}
                Err(StoreError::Missing(_)) => {
                    warn!(
                        form_key = %form_key,
                        views = tally.count,
                        "Form deleted during flush, dropping its views"
                    );
                    return FormOutcome::Missing;
                }
                Err(e) => {
                    error!(
                        form_key = %form_key,
                        views = tally.count,
                        error = %e,
                        "Form update failed, dropping its views"
                    );
                    return FormOutcome::Failed;
                }
            }

            if Instant::now() >= deadline {
                error!(
                    form_key = %form_key,
                    views = tally.count,
                    attempts = attempt,
                    window_ms = CONFLICT_RETRY_WINDOW.as_millis() as u64,
                    "Form kept changing during flush, dropping its views"
                );
                return FormOutcome::Contended;
            }

            debug!(form_key = %form_key, attempt, "Form changed underneath flush, retrying merge");

            // First retry is immediate: the competing write has already landed
            if attempt > 1 {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(CONFLICT_BACKOFF_MAX);
            }
        }
    }

    async fn drain_for_shutdown(&self) -> FlushReport {
        {
            let mut inner = self.lock();
            inner.closed = true;
            self.disarm_timer(&mut inner);
            if inner.phase == Phase::Waiting {
                inner.phase = Phase::Idle;
            }
        }

        // Let an in-flight cycle finish, then take ownership of the queue
        loop {
            let notified = self.flush_done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if inner.phase != Phase::Flushing {
                    inner.phase = Phase::Flushing;
                    break;
                }
            }

            debug!("Waiting for in-flight flush before shutdown flush");
            notified.await;
        }

        let _claim = DrainClaim { batcher: self };

        let mut report = FlushReport::default();
        loop {
            let batch = self.flush_batch().await;
            if batch.events == 0 {
                break;
            }
            report.absorb(batch);
        }

        info!(
            events = report.events,
            updated = report.forms_updated,
            missing = report.forms_missing,
            failed = report.forms_failed,
            contended = report.forms_contended,
            "Shutdown flush complete"
        );
        report
    }
}

/// The shutdown drain's hold on `Flushing`
///
/// Released on drop, so a drain cancelled by its timeout still leaves the
/// batcher `Idle` for a later `shutdown` call.
struct DrainClaim<'a> {
    batcher: &'a ViewBatcher,
}

impl Drop for DrainClaim<'_> {
    fn drop(&mut self) {
        self.batcher.lock().phase = Phase::Idle;
        self.batcher.flush_done.notify_waiters();
    }
}
