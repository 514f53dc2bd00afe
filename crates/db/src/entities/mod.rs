//! Database entities.

pub mod system_message;

pub use system_message::Entity as SystemMessage;
