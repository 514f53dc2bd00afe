//! Scheduler integration tests.
//!
//! These tests verify the scheduler's lifecycle: idempotent start, group
//! cancellation on stop, test-mode disable, and that a failing job never
//! stops subsequent runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use atcloud_queue::{JobError, JobExecutor, Scheduler, SchedulerConfig};

#[derive(Default)]
struct MockExecutor {
    cleanup_runs: AtomicU64,
    purge_runs: AtomicU64,
    sweep_runs: AtomicU64,
    fail_sweeps: AtomicBool,
}

#[async_trait::async_trait]
impl JobExecutor for MockExecutor {
    async fn run_retention_cleanup(&self) -> Result<u64, JobError> {
        self.cleanup_runs.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }

    async fn purge_stale_records(&self) -> Result<u64, JobError> {
        self.purge_runs.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }

    async fn run_expiry_sweep(&self) -> Result<u64, JobError> {
        self.sweep_runs.fetch_add(1, Ordering::SeqCst);
        if self.fail_sweeps.load(Ordering::SeqCst) {
            return Err("sweep blew up".into());
        }
        Ok(1)
    }
}

fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        enabled: true,
        timezone: "UTC".to_string(),
        cleanup_at: (2, 0),
        stale_purge_at: (3, 0),
        sweep_interval: Duration::from_millis(20),
        sweep_initial_delay: Duration::from_millis(1),
    }
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let scheduler = Scheduler::new(fast_config());
    let executor = Arc::new(MockExecutor::default());

    scheduler.start(executor.clone());
    let first = scheduler.status();
    assert!(first.running);
    assert_eq!(first.active_jobs, 3);

    // A second start warns and does not create duplicate timers.
    scheduler.start(executor);
    let second = scheduler.status();
    assert_eq!(second.active_jobs, first.active_jobs);

    scheduler.stop();
}

#[tokio::test]
async fn test_stop_clears_all_timers() {
    let scheduler = Scheduler::new(fast_config());
    scheduler.start(Arc::new(MockExecutor::default()));
    assert_eq!(scheduler.status().active_jobs, 3);

    scheduler.stop();
    let status = scheduler.status();
    assert!(!status.running);
    assert_eq!(status.active_jobs, 0);

    // The scheduler can be started again after a stop.
    scheduler.start(Arc::new(MockExecutor::default()));
    assert!(scheduler.status().running);
    assert_eq!(scheduler.status().active_jobs, 3);
    scheduler.stop();
}

#[tokio::test]
async fn test_disabled_scheduler_is_a_no_op() {
    let config = SchedulerConfig {
        enabled: false,
        ..fast_config()
    };
    let scheduler = Scheduler::new(config);
    scheduler.start(Arc::new(MockExecutor::default()));

    let status = scheduler.status();
    assert!(!status.running);
    assert_eq!(status.active_jobs, 0);
}

#[tokio::test]
async fn test_sweep_runs_on_its_interval() {
    let scheduler = Scheduler::new(fast_config());
    let executor = Arc::new(MockExecutor::default());
    scheduler.start(executor.clone());

    tokio::time::sleep(Duration::from_millis(100)).await;
    scheduler.stop();

    assert!(
        executor.sweep_runs.load(Ordering::SeqCst) >= 2,
        "initial kick plus at least one interval firing"
    );
    // Daily jobs are armed but have not fired yet.
    assert_eq!(executor.cleanup_runs.load(Ordering::SeqCst), 0);
    assert_eq!(executor.purge_runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failing_job_never_stops_subsequent_runs() {
    let scheduler = Scheduler::new(fast_config());
    let executor = Arc::new(MockExecutor::default());
    executor.fail_sweeps.store(true, Ordering::SeqCst);
    scheduler.start(executor.clone());

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(
        executor.sweep_runs.load(Ordering::SeqCst) >= 2,
        "the sweep keeps firing even though every run fails"
    );
    assert!(scheduler.status().running);
    scheduler.stop();
}
