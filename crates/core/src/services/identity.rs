//! Identity resolver.
//!
//! Resolves a recipient id to delivery metadata. The real resolver lives in
//! the user domain; the engine only consumes this seam when composing email
//! for a recipient whose address was not supplied.

use async_trait::async_trait;
use atcloud_common::AppResult;
use std::sync::Arc;

/// Delivery metadata for one recipient.
#[derive(Debug, Clone, Default)]
pub struct RecipientProfile {
    /// Email address, if known.
    pub email: Option<String>,
    /// Display name, if known.
    pub display_name: Option<String>,
}

/// Trait for resolving recipient delivery metadata.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolve one recipient id. `None` means the recipient is unknown.
    async fn resolve(&self, recipient_id: &str) -> AppResult<Option<RecipientProfile>>;
}

/// A no-op implementation for testing or when no resolver is wired.
#[derive(Clone, Default)]
pub struct NoOpIdentityResolver;

#[async_trait]
impl IdentityResolver for NoOpIdentityResolver {
    async fn resolve(&self, _recipient_id: &str) -> AppResult<Option<RecipientProfile>> {
        Ok(None)
    }
}

/// Wrapper for boxed `IdentityResolver` trait object.
pub type IdentityResolverService = Arc<dyn IdentityResolver>;
