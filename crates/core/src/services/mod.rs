//! Business logic services.

#![allow(missing_docs)]

pub mod cleanup;
pub mod delivery;
pub mod email;
pub mod event_publisher;
pub mod identity;
pub mod recovery;
pub mod system_message;

pub use cleanup::{
    CleanupFailure, CleanupReport, DeletionReason, DeletionsByReason, RetentionCleanupEngine,
    deletion_reason,
};
pub use delivery::{
    DeliveryMetrics, DeliveryOrchestrator, DeliveryOutcome, DeliveryRequest, EmailRequest,
    FailureSeverity, TransactionStatus,
};
pub use email::{
    EmailChannel, EmailChannelHandle, EmailDeliveryResult, EmailMessage, EmailPriority,
    EmailProvider, EmailService, MailgunConfig, SendGridConfig, SmtpConfig,
};
pub use event_publisher::{EventPublisher, EventPublisherService, NoOpEventPublisher};
pub use identity::{
    IdentityResolver, IdentityResolverService, NoOpIdentityResolver, RecipientProfile,
};
pub use recovery::{
    ErrorCategory, FailureContext, RecoveryAction, RecoveryPolicy, RecoveryStats, RetryConfig,
};
pub use system_message::{
    CreateSystemMessageRequest, SystemMessageService, UnreadCounts,
};
