//! atcloud server entry point.
//!
//! Wires the notification engine together: storage, realtime pub/sub,
//! email channel, delivery orchestrator, recovery policy, and the
//! maintenance scheduler. Service instances are constructed once here and
//! passed through call sites; nothing is a module-level global.

use std::sync::Arc;

use atcloud_common::{Config, RuntimeSettings};
use atcloud_core::{
    DeliveryOrchestrator, EmailService, NoOpIdentityResolver, RecoveryPolicy,
    RetentionCleanupEngine, SystemMessageService,
};
use atcloud_db::repositories::{MessageStoreHandle, SystemMessageRepository};
use atcloud_queue::{JobError, JobExecutor, RedisPubSub, Scheduler, SchedulerConfig};
use chrono::{Duration as ChronoDuration, Utc};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Days after which a retired (inactive) record is purged outright.
const STALE_PURGE_AFTER_DAYS: i64 = 30;

/// Shared service handles for the transport layer.
///
/// HTTP controllers live outside this crate; they receive these handles
/// rather than importing shared globals.
#[allow(dead_code)]
struct AppState {
    messages: SystemMessageService,
    orchestrator: DeliveryOrchestrator,
    recovery: RecoveryPolicy,
    settings: RuntimeSettings,
}

/// Executes the scheduler's maintenance jobs against the engine.
struct MaintenanceExecutor {
    cleanup: RetentionCleanupEngine,
    repository: SystemMessageRepository,
}

#[async_trait::async_trait]
impl JobExecutor for MaintenanceExecutor {
    async fn run_retention_cleanup(&self) -> Result<u64, JobError> {
        let report = self.cleanup.execute_cleanup().await?;
        Ok(report.deleted_count)
    }

    async fn purge_stale_records(&self) -> Result<u64, JobError> {
        let cutoff = Utc::now() - ChronoDuration::days(STALE_PURGE_AFTER_DAYS);
        Ok(self.repository.purge_inactive_before(cutoff).await?)
    }

    async fn run_expiry_sweep(&self) -> Result<u64, JobError> {
        Ok(self.repository.deactivate_expired(Utc::now()).await?)
    }
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to install signal handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atcloud=debug".into()),
        )
        .init();

    info!("Starting atcloud server...");

    // Load configuration
    let config = Config::load()?;

    // Validate the runtime settings tree before anything consumes it
    let settings = RuntimeSettings::new();
    let report = settings.validate().await;
    if !report.valid {
        for error in &report.errors {
            tracing::error!(error = %error, "Invalid runtime setting");
        }
        return Err("runtime settings validation failed".into());
    }

    // Connect to database and run migrations
    let db = atcloud_db::init(&config).await?;
    info!("Connected to database");
    atcloud_db::migrate(&db).await?;
    info!("Migrations completed");

    // Connect Redis Pub/Sub
    let pubsub = Arc::new(RedisPubSub::new(&config.redis.url, &config.redis.prefix).await?);
    pubsub.start().await?;
    info!("Connected to Redis Pub/Sub");

    // Initialize repositories
    let db = Arc::new(db);
    let repository = SystemMessageRepository::new(Arc::clone(&db));
    let store: MessageStoreHandle = Arc::new(repository.clone());

    // Initialize services
    let mut message_service = SystemMessageService::new(store.clone());
    message_service.set_event_publisher(pubsub.clone());

    let email_service = Arc::new(EmailService::from_config(config.email.as_ref())?);
    if email_service.is_enabled() {
        info!("Email channel configured");
    } else {
        info!("Email channel not configured, deliveries run without email");
    }

    let orchestrator = DeliveryOrchestrator::new(
        store.clone(),
        message_service.clone(),
        pubsub.clone(),
        email_service,
        Arc::new(NoOpIdentityResolver),
        settings.clone(),
    );
    let recovery = RecoveryPolicy::new(settings.clone());
    let cleanup = RetentionCleanupEngine::new(store, settings.clone());

    // Create app state
    let state = AppState {
        messages: message_service,
        orchestrator,
        recovery,
        settings,
    };

    // Start the maintenance scheduler
    let scheduler = Scheduler::new(SchedulerConfig {
        enabled: config.scheduler.enabled,
        timezone: config.scheduler.timezone.clone(),
        ..SchedulerConfig::default()
    });
    scheduler.start(Arc::new(MaintenanceExecutor {
        cleanup,
        repository,
    }));
    let status = scheduler.status();
    info!(
        running = status.running,
        active_jobs = status.active_jobs,
        "Scheduler status"
    );

    // Wait for shutdown
    shutdown_signal().await;

    scheduler.stop();
    let stats = state.recovery.stats().await;
    info!(
        total_errors = stats.total_errors,
        circuits_opened = stats.circuits_opened,
        "Recovery stats at shutdown"
    );
    pubsub.shutdown().await?;

    info!("Server shutdown complete");
    Ok(())
}
