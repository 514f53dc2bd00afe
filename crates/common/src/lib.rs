//! Common utilities and shared types for atcloud.
//!
//! This crate provides foundational components used across all atcloud crates:
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Runtime settings**: Validated, auditable operational tuning via [`RuntimeSettings`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`]
//! - **ID Generation**: ULID-based unique identifiers via [`IdGenerator`]
//!
//! # Example
//!
//! ```no_run
//! use atcloud_common::{Config, IdGenerator, AppResult};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     let id_gen = IdGenerator::new();
//!     let id = id_gen.generate();
//!     println!("Generated ID: {}", id);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod id;
pub mod settings;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use id::IdGenerator;
pub use settings::{
    BreakerSettings, ChannelSettings, RetentionSettings, RuntimeSettings, SettingsTree,
    SettingsUpdate, ValidationReport,
};
