//! Conversation persistence interface

use async_trait::async_trait;
use serde_json::Value;
use supportdesk_shared::{Conversation, ConversationId, DeskError, NotificationEvent, UserId};
use time::OffsetDateTime;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Corrupt row: {0}")]
    Corrupt(String),
    #[error("Conversation not found: {0}")]
    NotFound(ConversationId),
    #[error("Conversation already exists: {0}")]
    Duplicate(ConversationId),
}

impl From<StoreError> for DeskError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => DeskError::ConversationNotFound(id),
            StoreError::Duplicate(id) => DeskError::Conflict(format!("conversation {id} already exists")),
            other => DeskError::Storage(other.to_string()),
        }
    }
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn insert_conversation(&self, conversation: &Conversation) -> Result<(), StoreError>;

    async fn load_conversation(&self, id: ConversationId) -> Result<Option<Conversation>, StoreError>;

    /// Compare-and-swap write. Succeeds only if the stored record is still at
    /// `expected_version`; the stored version becomes `conversation.version`.
    async fn save_conversation(&self, conversation: &Conversation, expected_version: i64) -> Result<bool, StoreError>;

    async fn append_message(&self, conversation_id: ConversationId, sender_id: UserId, content: &str) -> Result<(), StoreError>;

    async fn append_system_message(
        &self,
        conversation_id: ConversationId,
        content: &str,
        metadata: Value,
    ) -> Result<(), StoreError>;

    /// Move the user's read cursor for the conversation to `at`
    async fn mark_read(&self, conversation_id: ConversationId, user_id: UserId, at: OffsetDateTime) -> Result<(), StoreError>;

    /// Messages from others, across every conversation the user takes part
    /// in, newer than the user's read cursor. System messages don't count.
    async fn unread_count(&self, user_id: UserId) -> Result<i64, StoreError>;

    /// Returns false when this notification was already stored for the
    /// recipient.
    async fn persist_notification(&self, notification: &NotificationEvent) -> Result<bool, StoreError>;

    /// Oldest first, strictly after `since` when given
    async fn list_notifications_since(
        &self,
        user_id: UserId,
        since: Option<OffsetDateTime>,
        limit: i64,
    ) -> Result<Vec<NotificationEvent>, StoreError>;
}
