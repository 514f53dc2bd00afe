//! Core business logic for atcloud.

pub mod services;

pub use services::*;
