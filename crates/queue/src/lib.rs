//! Realtime distribution and periodic jobs for atcloud.
//!
//! - [`RedisPubSub`]: per-recipient event fan-out over Redis Pub/Sub,
//!   implementing the core `EventPublisher` seam.
//! - [`Scheduler`]: daily and interval maintenance jobs (retention
//!   cleanup, stale purge, expiry sweep).

pub mod pubsub;
pub mod scheduler;

pub use pubsub::{LocalBroadcast, PubSubEvent, RedisPubSub, channels};
pub use scheduler::{
    JobError, JobExecutor, Scheduler, SchedulerConfig, SchedulerStatus, next_daily_run,
};
