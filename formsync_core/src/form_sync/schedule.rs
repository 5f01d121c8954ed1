//! Keyed interval scheduler for recurring form refreshes.
//!
//! One tokio task per job key. A task waits for its next tick, runs the job inline and
//! loops; cancellation is cooperative through a `CancellationToken`. A scheduler-wide
//! in-flight map keeps two ticks of the same key from overlapping, including across a
//! replacement of the job definition.

use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Work executed on every tick of a scheduled job.
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    async fn run(&self) -> Result<()>;

    /// Serializable description of the job, surfaced in `JobInfo`.
    fn payload(&self) -> serde_json::Value;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleOptions {
    /// Collapse a backlog of missed ticks into a single catch-up run.
    pub coalesce: bool,
    /// Swap out an existing job with the same key instead of rejecting the call.
    pub replace_existing: bool,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            coalesce: true,
            replace_existing: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded,
    Failed { error: String },
}

/// Scheduler-side view of a registered job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub job_key: String,
    pub interval_secs: u64,
    pub payload: serde_json::Value,
    pub registered_at: DateTime<Utc>,
    pub runs: u64,
    pub skipped: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<JobOutcome>,
}

#[derive(Debug, Default)]
struct JobStats {
    runs: u64,
    skipped: u64,
    last_run_at: Option<DateTime<Utc>>,
    last_outcome: Option<JobOutcome>,
}

struct JobEntry {
    interval: Duration,
    payload: serde_json::Value,
    registered_at: DateTime<Utc>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    stats: Arc<Mutex<JobStats>>,
}

pub struct SyncScheduler {
    jobs: RwLock<HashMap<String, JobEntry>>,
    in_flight: Arc<DashMap<String, Instant>>,
    root: CancellationToken,
}

impl Default for SyncScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncScheduler {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            in_flight: Arc::new(DashMap::new()),
            root: CancellationToken::new(),
        }
    }

    /// Register `task` under `job_key`, firing every `interval`. The first tick happens
    /// one interval from now.
    #[tracing::instrument(level = "info", skip(self, task))]
    pub async fn schedule(
        &self,
        job_key: &str,
        interval: Duration,
        task: Arc<dyn ScheduledTask>,
        options: ScheduleOptions,
    ) -> Result<()> {
        if job_key.trim().is_empty() {
            return Err(Error::InvalidInput("job_key is empty".to_string()));
        }
        if interval.is_zero() {
            return Err(Error::InvalidInput("interval must be > 0".to_string()));
        }
        if self.root.is_cancelled() {
            return Err(Error::InvalidInput("scheduler is shut down".to_string()));
        }

        let mut jobs = self.jobs.write().await;
        if let Some(old) = jobs.get(job_key) {
            if !options.replace_existing {
                return Err(Error::InvalidInput(format!(
                    "job '{job_key}' is already scheduled"
                )));
            }
            // An in-flight tick of the old definition runs to completion.
            old.cancel.cancel();
            tracing::info!(job_key, "replacing scheduled job");
        }

        let cancel = self.root.child_token();
        let stats = Arc::new(Mutex::new(JobStats::default()));
        let payload = task.payload();
        let handle = tokio::spawn(run_job(
            job_key.to_string(),
            interval,
            options.coalesce,
            task,
            cancel.clone(),
            self.in_flight.clone(),
            stats.clone(),
        ));

        jobs.insert(
            job_key.to_string(),
            JobEntry {
                interval,
                payload,
                registered_at: Utc::now(),
                cancel,
                handle,
                stats,
            },
        );
        Ok(())
    }

    /// Unregister a job. Returns false when no job has this key.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn cancel(&self, job_key: &str) -> bool {
        let removed = self.jobs.write().await.remove(job_key);
        match removed {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every job and wait for in-flight ticks to finish.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn shutdown(&self) {
        self.root.cancel();
        let entries: Vec<JobEntry> = self.jobs.write().await.drain().map(|(_, e)| e).collect();
        let count = entries.len();
        for entry in entries {
            if let Err(e) = entry.handle.await {
                tracing::warn!(error = %e, "scheduled job task ended abnormally");
            }
        }
        tracing::info!(jobs = count, "scheduler stopped");
    }

    pub async fn job(&self, job_key: &str) -> Option<JobInfo> {
        let jobs = self.jobs.read().await;
        let entry = jobs.get(job_key)?;
        Some(job_info(job_key, entry).await)
    }

    pub async fn jobs(&self) -> Vec<JobInfo> {
        let jobs = self.jobs.read().await;
        let mut out = Vec::with_capacity(jobs.len());
        for (key, entry) in jobs.iter() {
            out.push(job_info(key, entry).await);
        }
        out.sort_by(|a, b| a.job_key.cmp(&b.job_key));
        out
    }

    pub fn is_running(&self, job_key: &str) -> bool {
        self.in_flight.contains_key(job_key)
    }
}

async fn job_info(key: &str, entry: &JobEntry) -> JobInfo {
    let stats = entry.stats.lock().await;
    JobInfo {
        job_key: key.to_string(),
        interval_secs: entry.interval.as_secs(),
        payload: entry.payload.clone(),
        registered_at: entry.registered_at,
        runs: stats.runs,
        skipped: stats.skipped,
        last_run_at: stats.last_run_at,
        last_outcome: stats.last_outcome.clone(),
    }
}

/// Marks a key in flight for as long as it lives.
struct InFlightGuard {
    map: Arc<DashMap<String, Instant>>,
    key: String,
}

impl InFlightGuard {
    fn acquire(map: &Arc<DashMap<String, Instant>>, key: &str) -> Option<Self> {
        match map.entry(key.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                Some(Self {
                    map: map.clone(),
                    key: key.to_string(),
                })
            }
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

async fn run_job(
    job_key: String,
    interval: Duration,
    coalesce: bool,
    task: Arc<dyn ScheduledTask>,
    cancel: CancellationToken,
    in_flight: Arc<DashMap<String, Instant>>,
    stats: Arc<Mutex<JobStats>>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(if coalesce {
        MissedTickBehavior::Delay
    } else {
        MissedTickBehavior::Burst
    });

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if cancel.is_cancelled() {
            break;
        }

        let Some(_guard) = InFlightGuard::acquire(&in_flight, &job_key) else {
            tracing::warn!(job_key = %job_key, "sync still in-flight; skipping scheduled run");
            stats.lock().await.skipped += 1;
            continue;
        };

        let started_at = Utc::now();
        stats.lock().await.runs += 1;
        let outcome = match task.run().await {
            Ok(()) => {
                tracing::debug!(job_key = %job_key, "scheduled sync finished");
                JobOutcome::Succeeded
            }
            Err(e) => {
                tracing::error!(job_key = %job_key, error = %e, "scheduled sync failed");
                JobOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };

        let mut s = stats.lock().await;
        s.last_run_at = Some(started_at);
        s.last_outcome = Some(outcome);
    }
    tracing::debug!(job_key = %job_key, "scheduled job stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Counter {
        runs: AtomicU64,
        fail: bool,
        first_run_takes: Option<Duration>,
        every_run_takes: Option<Duration>,
    }

    impl Counter {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                runs: AtomicU64::new(0),
                fail: false,
                first_run_takes: None,
                every_run_takes: None,
            })
        }

        fn count(&self) -> u64 {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ScheduledTask for Counter {
        async fn run(&self) -> Result<()> {
            let n = self.runs.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                if let Some(d) = self.first_run_takes {
                    tokio::time::sleep(d).await;
                }
            }
            if let Some(d) = self.every_run_takes {
                tokio::time::sleep(d).await;
            }
            if self.fail {
                return Err(Error::ProviderUnavailable("connection refused".to_string()));
            }
            Ok(())
        }

        fn payload(&self) -> serde_json::Value {
            serde_json::json!({"kind": "counter"})
        }
    }

    const MINUTE: Duration = Duration::from_secs(60);

    async fn sleep_secs(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_per_interval() {
        let scheduler = SyncScheduler::new();
        let counter = Counter::new();
        scheduler
            .schedule("acme_F1", MINUTE, counter.clone(), ScheduleOptions::default())
            .await
            .unwrap();

        sleep_secs(59).await;
        assert_eq!(counter.count(), 0);
        sleep_secs(2).await;
        assert_eq!(counter.count(), 1);
        sleep_secs(60).await;
        assert_eq!(counter.count(), 2);

        let info = scheduler.job("acme_F1").await.unwrap();
        assert_eq!(info.runs, 2);
        assert_eq!(info.interval_secs, 60);
        assert_eq!(info.last_outcome, Some(JobOutcome::Succeeded));
        assert_eq!(info.payload["kind"], "counter");
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_bad_arguments() {
        let scheduler = SyncScheduler::new();
        let counter = Counter::new();
        assert!(
            scheduler
                .schedule("", MINUTE, counter.clone(), ScheduleOptions::default())
                .await
                .is_err()
        );
        assert!(
            scheduler
                .schedule("k", Duration::ZERO, counter.clone(), ScheduleOptions::default())
                .await
                .is_err()
        );
        scheduler
            .schedule("k", MINUTE, counter.clone(), ScheduleOptions::default())
            .await
            .unwrap();
        let no_replace = ScheduleOptions {
            replace_existing: false,
            ..Default::default()
        };
        assert!(
            scheduler
                .schedule("k", MINUTE, counter, no_replace)
                .await
                .is_err()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn same_key_replaces_previous_definition() {
        let scheduler = SyncScheduler::new();
        let old = Counter::new();
        let new = Counter::new();
        scheduler
            .schedule("acme_F1", MINUTE, old.clone(), ScheduleOptions::default())
            .await
            .unwrap();
        scheduler
            .schedule("acme_F1", MINUTE, new.clone(), ScheduleOptions::default())
            .await
            .unwrap();

        sleep_secs(61).await;
        assert_eq!(old.count(), 0);
        assert_eq!(new.count(), 1);
        assert_eq!(scheduler.jobs().await.len(), 1);
    }

    struct Tagged {
        runs: AtomicU64,
        form_id: &'static str,
    }

    #[async_trait]
    impl ScheduledTask for Tagged {
        async fn run(&self) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn payload(&self) -> serde_json::Value {
            serde_json::json!({"form_id": self.form_id})
        }
    }

    #[tokio::test(start_paused = true)]
    async fn replacement_reports_new_interval_and_payload() {
        let scheduler = SyncScheduler::new();
        let old = Counter::new();
        let new = Arc::new(Tagged {
            runs: AtomicU64::new(0),
            form_id: "F2",
        });
        scheduler
            .schedule("acme_F1", MINUTE, old.clone(), ScheduleOptions::default())
            .await
            .unwrap();
        scheduler
            .schedule(
                "acme_F1",
                Duration::from_secs(120),
                new.clone(),
                ScheduleOptions::default(),
            )
            .await
            .unwrap();

        let jobs = scheduler.jobs().await;
        assert_eq!(jobs.len(), 1);
        let info = scheduler.job("acme_F1").await.unwrap();
        assert_eq!(info.interval_secs, 120);
        assert_eq!(info.payload, serde_json::json!({"form_id": "F2"}));

        sleep_secs(61).await;
        assert_eq!(old.count(), 0);
        assert_eq!(new.runs.load(Ordering::SeqCst), 0);

        sleep_secs(60).await;
        assert_eq!(new.runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.job("acme_F1").await.unwrap().runs, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_job_never_fires_again() {
        let scheduler = SyncScheduler::new();
        let counter = Counter::new();
        scheduler
            .schedule("acme_F1", MINUTE, counter.clone(), ScheduleOptions::default())
            .await
            .unwrap();
        sleep_secs(61).await;
        assert!(scheduler.cancel("acme_F1").await);
        assert!(!scheduler.cancel("acme_F1").await);

        sleep_secs(600).await;
        assert_eq!(counter.count(), 1);
        assert!(scheduler.job("acme_F1").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failing_tick_keeps_the_job() {
        let scheduler = SyncScheduler::new();
        let counter = Arc::new(Counter {
            runs: AtomicU64::new(0),
            fail: true,
            first_run_takes: None,
            every_run_takes: None,
        });
        scheduler
            .schedule("acme_F1", MINUTE, counter.clone(), ScheduleOptions::default())
            .await
            .unwrap();

        sleep_secs(130).await;
        assert_eq!(counter.count(), 2);
        let info = scheduler.job("acme_F1").await.unwrap();
        assert!(matches!(info.last_outcome, Some(JobOutcome::Failed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn missed_ticks_collapse_into_one_run() {
        let scheduler = SyncScheduler::new();
        let counter = Arc::new(Counter {
            runs: AtomicU64::new(0),
            fail: false,
            first_run_takes: Some(Duration::from_secs(200)),
            every_run_takes: None,
        });
        scheduler
            .schedule("acme_F1", MINUTE, counter.clone(), ScheduleOptions::default())
            .await
            .unwrap();

        // First run spans 60..260 and misses the 120/180/240 ticks.
        sleep_secs(299).await;
        assert_eq!(counter.count(), 2);
        sleep_secs(30).await;
        assert_eq!(counter.count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn replacement_does_not_overlap_in_flight_run() {
        let scheduler = SyncScheduler::new();
        let slow = Arc::new(Counter {
            runs: AtomicU64::new(0),
            fail: false,
            first_run_takes: None,
            every_run_takes: Some(Duration::from_secs(100)),
        });
        let fast = Counter::new();

        scheduler
            .schedule("acme_F1", MINUTE, slow.clone(), ScheduleOptions::default())
            .await
            .unwrap();
        sleep_secs(70).await;
        assert!(scheduler.is_running("acme_F1"));

        scheduler
            .schedule(
                "acme_F1",
                Duration::from_secs(10),
                fast.clone(),
                ScheduleOptions::default(),
            )
            .await
            .unwrap();

        // Old run occupies 60..160; every tick of the new definition before then is skipped.
        sleep_secs(85).await;
        assert_eq!(fast.count(), 0);
        assert!(scheduler.job("acme_F1").await.unwrap().skipped >= 1);

        sleep_secs(50).await;
        assert_eq!(slow.count(), 1);
        assert!(fast.count() >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn different_keys_run_independently() {
        let scheduler = SyncScheduler::new();
        let a = Arc::new(Counter {
            runs: AtomicU64::new(0),
            fail: false,
            first_run_takes: None,
            every_run_takes: Some(Duration::from_secs(30)),
        });
        let b = Counter::new();
        scheduler
            .schedule("acme_F1", MINUTE, a.clone(), ScheduleOptions::default())
            .await
            .unwrap();
        scheduler
            .schedule("acme_F2", MINUTE, b.clone(), ScheduleOptions::default())
            .await
            .unwrap();

        sleep_secs(61).await;
        assert_eq!(a.count(), 1);
        assert_eq!(b.count(), 1);
        assert!(scheduler.is_running("acme_F1"));
        assert!(!scheduler.is_running("acme_F2"));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_everything() {
        let scheduler = SyncScheduler::new();
        let counter = Counter::new();
        scheduler
            .schedule("acme_F1", MINUTE, counter.clone(), ScheduleOptions::default())
            .await
            .unwrap();
        scheduler.shutdown().await;

        sleep_secs(300).await;
        assert_eq!(counter.count(), 0);
        assert!(scheduler.jobs().await.is_empty());
        assert!(
            scheduler
                .schedule("acme_F1", MINUTE, counter, ScheduleOptions::default())
                .await
                .is_err()
        );
    }
}
