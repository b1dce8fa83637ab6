//! Conversations: claim state machine and persistence

pub mod machine;
pub mod memory;
pub mod postgres;
pub mod store;

pub use machine::{ConversationMachine, Transition};
pub use memory::MemoryConversationStore;
pub use postgres::PgConversationStore;
pub use store::{ConversationStore, StoreError};
