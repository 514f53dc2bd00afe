//! Database repositories.

mod store;
mod system_message;

pub use store::{MessageStore, MessageStoreHandle};
pub use system_message::SystemMessageRepository;
