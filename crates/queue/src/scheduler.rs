//! Periodic job scheduler.
//!
//! Runs the engine's maintenance jobs on fixed cadences: the retention
//! cleanup and the stale-record purge fire daily at configured wall-clock
//! times; a short-interval sweep handles time-sensitive work. Every job
//! body is guarded so one failed run never stops subsequent runs, and all
//! timers are cancellable as a group on shutdown.

#![allow(missing_docs)]

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tokio::task::JoinHandle;

/// Job error type.
pub type JobError = Box<dyn std::error::Error + Send + Sync>;

/// Job executor trait for scheduled jobs.
#[async_trait::async_trait]
pub trait JobExecutor: Send + Sync {
    /// Run one retention cleanup pass. Returns the number of records deleted.
    async fn run_retention_cleanup(&self) -> Result<u64, JobError>;

    /// Purge stale retired records. Returns the number purged.
    async fn purge_stale_records(&self) -> Result<u64, JobError>;

    /// Time-sensitive sweep (deactivate expired messages). Returns the
    /// number touched.
    async fn run_expiry_sweep(&self) -> Result<u64, JobError>;
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Whether jobs run at all. Disabled under test configurations.
    pub enabled: bool,
    /// IANA timezone for daily wall-clock firing times.
    pub timezone: String,
    /// Daily firing time for the retention cleanup, `(hour, minute)`.
    pub cleanup_at: (u32, u32),
    /// Daily firing time for the stale purge, `(hour, minute)`.
    pub stale_purge_at: (u32, u32),
    /// Interval of the time-sensitive sweep (default: 15 minutes).
    pub sweep_interval: Duration,
    /// Initial kick delay of the sweep after startup.
    pub sweep_initial_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timezone: "UTC".to_string(),
            cleanup_at: (2, 0),
            stale_purge_at: (3, 0),
            sweep_interval: Duration::from_secs(900),
            sweep_initial_delay: Duration::from_secs(30),
        }
    }
}

/// Scheduler status for health checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStatus {
    /// Whether the scheduler is running.
    pub running: bool,
    /// Number of armed jobs.
    pub active_jobs: usize,
}

/// The next UTC instant at which a daily `(hour, minute)` job fires in the
/// given timezone, strictly after `now`.
#[must_use]
pub fn next_daily_run(tz: Tz, hour: u32, minute: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    let local_now = now.with_timezone(&tz);
    let mut date = local_now.date_naive();
    loop {
        // Skipped local times (DST spring-forward) fall through to the
        // next day.
        if let Some(naive) = date.and_hms_opt(hour, minute, 0)
            && let Some(target) = tz.from_local_datetime(&naive).earliest()
        {
            let target = target.with_timezone(&Utc);
            if target > now {
                return target;
            }
        }
        match date.succ_opt() {
            Some(next) => date = next,
            None => return now,
        }
    }
}

/// Periodic job scheduler.
pub struct Scheduler {
    config: SchedulerConfig,
    running: AtomicBool,
    jobs: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a scheduler. No timers are armed until [`Self::start`].
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            running: AtomicBool::new(false),
            jobs: Mutex::new(Vec::new()),
        }
    }

    /// Arm all jobs. Idempotent: a second call while running logs a
    /// warning and changes nothing.
    pub fn start(&self, executor: Arc<dyn JobExecutor>) {
        if !self.config.enabled {
            tracing::info!("Scheduler disabled by configuration, not starting");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("Scheduler already running, ignoring start");
            return;
        }

        let tz: Tz = self.config.timezone.parse().unwrap_or_else(|_| {
            tracing::warn!(timezone = %self.config.timezone, "Unknown timezone, falling back to UTC");
            Tz::UTC
        });

        let mut jobs = self.jobs.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let cleanup_executor = executor.clone();
        jobs.push(Self::schedule_daily(
            "retention_cleanup",
            tz,
            self.config.cleanup_at,
            move || {
                let executor = cleanup_executor.clone();
                async move { executor.run_retention_cleanup().await }
            },
        ));

        let purge_executor = executor.clone();
        jobs.push(Self::schedule_daily(
            "stale_purge",
            tz,
            self.config.stale_purge_at,
            move || {
                let executor = purge_executor.clone();
                async move { executor.purge_stale_records().await }
            },
        ));

        jobs.push(Self::schedule_every(
            "expiry_sweep",
            self.config.sweep_initial_delay,
            self.config.sweep_interval,
            move || {
                let executor = executor.clone();
                async move { executor.run_expiry_sweep().await }
            },
        ));

        tracing::info!(jobs = jobs.len(), timezone = %tz, "Scheduler started");
    }

    /// Cancel all outstanding timers and reset state.
    pub fn stop(&self) {
        let mut jobs = self.jobs.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for job in jobs.drain(..) {
            job.abort();
        }
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("Scheduler stopped, all timers cancelled");
    }

    /// Current status for health checks.
    pub fn status(&self) -> SchedulerStatus {
        let jobs = self.jobs.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        SchedulerStatus {
            running: self.running.load(Ordering::SeqCst),
            active_jobs: jobs.len(),
        }
    }

    /// Arm a job that fires once at the next `(hour, minute)` in `tz`, then
    /// re-arms itself on a fixed 24-hour interval.
    fn schedule_daily<F, Fut>(
        name: &'static str,
        tz: Tz,
        at: (u32, u32),
        body: F,
    ) -> JoinHandle<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<u64, JobError>> + Send,
    {
        tokio::spawn(async move {
            let next = next_daily_run(tz, at.0, at.1, Utc::now());
            let delay = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tracing::info!(
                job = name,
                next_run = %next,
                delay_secs = delay.as_secs(),
                "Armed daily job"
            );
            tokio::time::sleep(delay).await;
            run_guarded(name, &body).await;

            let mut interval = tokio::time::interval(Duration::from_secs(86_400));
            interval.tick().await; // consume the immediate first tick
            loop {
                interval.tick().await;
                run_guarded(name, &body).await;
            }
        })
    }

    /// Arm a fixed-interval job with a short initial kick.
    fn schedule_every<F, Fut>(
        name: &'static str,
        initial_delay: Duration,
        every: Duration,
        body: F,
    ) -> JoinHandle<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<u64, JobError>> + Send,
    {
        tokio::spawn(async move {
            tracing::info!(
                job = name,
                interval_secs = every.as_secs(),
                "Armed interval job"
            );
            tokio::time::sleep(initial_delay).await;
            run_guarded(name, &body).await;

            let mut interval = tokio::time::interval(every);
            interval.tick().await; // consume the immediate first tick
            loop {
                interval.tick().await;
                run_guarded(name, &body).await;
            }
        })
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A failed run is logged and swallowed so subsequent runs stay armed.
async fn run_guarded<F, Fut>(name: &str, body: &F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<u64, JobError>>,
{
    match body().await {
        Ok(count) => {
            if count > 0 {
                tracing::info!(job = name, count, "Job completed");
            }
        }
        Err(e) => {
            tracing::error!(job = name, error = %e, "Job failed");
        }
    }
}
