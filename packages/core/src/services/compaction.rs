//! Background Compaction Job
//!
//! Purges departments that have been inactive longer than the retention
//! window and splices their descendants into the surviving tree:
//!
//! 1. Every descendant path loses the dead department's segment; depth - 1
//! 2. Direct children are reparented to the dead department's parent (or
//!    become roots)
//! 3. The dead row is deleted
//!
//! ## Scheduling
//!
//! The job is an explicit task that owns its [`Clock`] and
//! [`CompactionConfig`]. It fires every `interval_hours`, or once a day at
//! `daily_time_utc` when the interval is 24 hours and a time is set. The first
//! run starts as soon as the job does. Each tick spawns a run; a run that
//! finds another still in progress is skipped.
//!
//! ## Failure Model
//!
//! Candidates are processed shallowest first, in batches of `batch_size`,
//! one transaction per batch. A failing batch is rolled back and logged; the
//! remaining batches still run. Nothing is retried within a tick: the next
//! tick selects whatever is still past the cutoff.

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::config::{CompactionConfig, ConfigError};
use crate::db::{NodeStore, StoreTransaction};
use crate::models::NodeId;
use crate::services::cache::CACHE_PREFIX;
use crate::services::clock::Clock;
use crate::services::collaborators::CacheInvalidator;
use crate::services::error::DirectoryError;
use crate::services::hierarchy_service::{
    settle, unlocked, HierarchyService, Settled, Step, MAX_LOCK_ATTEMPTS,
};

/// When the job fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Interval(ChronoDuration),
    /// Once per day at this UTC time
    Daily(NaiveTime),
}

impl Schedule {
    pub fn from_config(config: &CompactionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        match config.daily_time()? {
            Some(time) if config.interval_hours == 24 => Ok(Self::Daily(time)),
            _ => Ok(Self::Interval(config.interval()?)),
        }
    }

    /// First run strictly after `now`
    pub fn next_run_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Interval(every) => now + *every,
            Self::Daily(time) => {
                let today = now.date_naive().and_time(*time).and_utc();
                if today > now {
                    today
                } else {
                    today + ChronoDuration::days(1)
                }
            }
        }
    }
}

/// Totals of one compaction run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionReport {
    /// Inactive departments past the cutoff when the run started
    pub selected: usize,
    pub purged: usize,
    pub failed_batches: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// Another run held the job
    Skipped,
    Completed(CompactionReport),
}

/// Purges long-inactive departments on a schedule
pub struct CompactionJob {
    store: NodeStore,
    clock: Arc<dyn Clock>,
    cache: Arc<dyn CacheInvalidator>,
    config: CompactionConfig,
    retention: ChronoDuration,
    schedule: Schedule,
    running: Mutex<()>,
}

impl CompactionJob {
    pub fn new(
        store: NodeStore,
        clock: Arc<dyn Clock>,
        cache: Arc<dyn CacheInvalidator>,
        config: CompactionConfig,
    ) -> Result<Self, ConfigError> {
        let schedule = Schedule::from_config(&config)?;
        let retention = config.retention()?;
        Ok(Self {
            store,
            clock,
            cache,
            config,
            retention,
            schedule,
            running: Mutex::new(()),
        })
    }

    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    /// Deactivation time before which departments are purged
    pub fn cutoff(&self) -> DateTime<Utc> {
        self.clock.now() - self.retention
    }

    /// Run one compaction pass now
    ///
    /// Returns [`CompactionOutcome::Skipped`] without doing anything when a
    /// run is already in progress.
    pub async fn run_once(&self, cancel: &CancelToken) -> Result<CompactionOutcome, DirectoryError> {
        let Ok(_running) = self.running.try_lock() else {
            warn!("Compaction already in progress, skipping this tick");
            return Ok(CompactionOutcome::Skipped);
        };

        let cutoff = self.cutoff();
        let candidates = self.store.compaction_candidates(cutoff).await?;
        let mut report = CompactionReport {
            selected: candidates.len(),
            ..Default::default()
        };

        if candidates.is_empty() {
            debug!("No departments inactive since before {}", cutoff);
            return Ok(CompactionOutcome::Completed(report));
        }

        info!(
            "Compacting {} departments inactive since before {}",
            candidates.len(),
            cutoff
        );

        let batches: Vec<&[NodeId]> = candidates.chunks(self.config.batch_size.max(1)).collect();
        for (index, batch) in batches.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(
                    "Compaction cancelled, {} batches left unprocessed",
                    batches.len() - index
                );
                break;
            }
            match self.purge_batch(batch, cutoff, cancel).await {
                Ok(purged) => report.purged += purged,
                Err(e) => {
                    report.failed_batches += 1;
                    error!("Compaction batch of {} departments failed: {}", batch.len(), e);
                }
            }
        }

        if report.purged > 0 {
            if let Err(e) = self.cache.remove_by_prefix(CACHE_PREFIX).await {
                warn!("Failed to invalidate cached listings: {}", e);
            }
        }

        info!(
            "Compaction finished: {} purged, {} failed batches",
            report.purged, report.failed_batches
        );
        Ok(CompactionOutcome::Completed(report))
    }

    async fn purge_batch(
        &self,
        batch: &[NodeId],
        cutoff: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> Result<usize, DirectoryError> {
        let mut locks = self.store.lock_set();
        for id in batch {
            locks.acquire(*id, cancel).await?;
            locks
                .acquire_all(self.store.descendant_ids(*id).await?, cancel)
                .await?;
        }

        for _ in 0..MAX_LOCK_ATTEMPTS {
            let tx = self.store.begin(locks).await?;
            let step = self.apply_batch(&tx, batch, cutoff).await;
            match settle(tx, step, cancel).await? {
                Settled::Committed(purged) => return Ok(purged),
                Settled::Retry(more) => locks = more,
            }
        }

        Err(HierarchyService::contention(batch[0]))
    }

    async fn apply_batch(
        &self,
        tx: &StoreTransaction,
        batch: &[NodeId],
        cutoff: DateTime<Utc>,
    ) -> Result<Step<usize>, DirectoryError> {
        let now = self.clock.now();
        let mut purged = 0;

        for id in batch {
            // Re-read under lock: the department may have been reactivated,
            // purged, or spliced by an earlier entry of this batch
            let Some(dead) = tx.get_node(*id).await? else {
                continue;
            };
            if dead.active || dead.deactivated_at.map_or(true, |at| at >= cutoff) {
                continue;
            }

            let descendants = tx.descendants(&dead).await?;
            let missing = unlocked(tx, &descendants);
            if !missing.is_empty() {
                return Ok(Step::NeedLocks(missing));
            }

            let ids: Vec<NodeId> = descendants.iter().map(|n| n.id).collect();
            tx.rewrite_subtree(&ids, &dead.path, dead.path.parent_path().as_ref(), -1, now)
                .await?;
            let reparented = tx.reparent_children(dead.id, dead.parent_id, now).await?;
            tx.delete_node(dead.id).await?;

            debug!(
                "Purged '{}', {} descendants spliced, {} children reparented",
                dead.path,
                ids.len(),
                reparented
            );
            purged += 1;
        }

        Ok(Step::Done(purged))
    }

    fn spawn_run(self: &Arc<Self>, cancel: &CancelToken) {
        let job = Arc::clone(self);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = job.run_once(&cancel).await {
                error!("Compaction run failed: {}", e);
            }
        });
    }

    /// Spawn the scheduler loop, starting with an immediate run
    pub fn start(self: Arc<Self>) -> CompactionHandle {
        let (trigger_tx, mut trigger_rx) = mpsc::channel::<()>(4);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let cancel = CancelToken::new();

        info!("Compaction job starting with schedule {:?}", self.schedule);

        let job = Arc::clone(&self);
        let run_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            job.spawn_run(&run_cancel);
            loop {
                let now = job.clock.now();
                let wait = (job.schedule.next_run_after(now) - now)
                    .to_std()
                    .unwrap_or(Duration::ZERO);

                tokio::select! {
                    biased; // Check shutdown first

                    _ = shutdown_rx.recv() => {
                        info!("Compaction job shutting down");
                        break;
                    }

                    Some(_) = trigger_rx.recv() => {
                        debug!("Compaction triggered");
                    }

                    _ = tokio::time::sleep(wait) => {
                        debug!("Compaction tick");
                    }
                }

                job.spawn_run(&run_cancel);
            }
        });

        CompactionHandle {
            trigger_tx,
            shutdown_tx,
            cancel,
            task,
        }
    }
}

/// Control handle of a started [`CompactionJob`]
pub struct CompactionHandle {
    trigger_tx: mpsc::Sender<()>,
    shutdown_tx: mpsc::Sender<()>,
    cancel: CancelToken,
    task: JoinHandle<()>,
}

impl CompactionHandle {
    /// Request a run outside the schedule; coalesced if one is pending
    pub fn trigger(&self) {
        match self.trigger_tx.try_send(()) {
            Ok(_) => debug!("Compaction trigger sent"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Compaction already has a pending trigger")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Compaction job has shut down, trigger ignored")
            }
        }
    }

    /// Stop the scheduler and cancel any batch that has not committed yet
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            warn!("Compaction task ended abnormally: {}", e);
        }
    }
}
