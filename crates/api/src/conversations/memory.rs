//! In-process conversation store
//!
//! Each conversation sits behind its own lock, so writes to different
//! conversations never contend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use supportdesk_shared::{Conversation, ConversationId, NotificationEvent, UserId};
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};

use super::store::{ConversationStore, StoreError};

#[derive(Debug, Clone)]
struct StoredMessage {
    sender_id: Option<UserId>,
    is_system: bool,
    created_at: OffsetDateTime,
}

#[derive(Debug, Default)]
struct ConversationRecord {
    conversation: Option<Conversation>,
    messages: Vec<StoredMessage>,
    system_messages: Vec<(String, Value)>,
}

#[derive(Default)]
pub struct MemoryConversationStore {
    records: RwLock<HashMap<ConversationId, Arc<Mutex<ConversationRecord>>>>,
    reads: RwLock<HashMap<(ConversationId, UserId), OffsetDateTime>>,
    notifications: RwLock<Vec<NotificationEvent>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn record(&self, id: ConversationId) -> Result<Arc<Mutex<ConversationRecord>>, StoreError> {
        self.records
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    /// System messages appended to a conversation, oldest first
    pub async fn system_messages(&self, id: ConversationId) -> Vec<(String, Value)> {
        match self.record(id).await {
            Ok(record) => record.lock().await.system_messages.clone(),
            Err(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn insert_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&conversation.id) {
            return Err(StoreError::Duplicate(conversation.id));
        }
        records.insert(
            conversation.id,
            Arc::new(Mutex::new(ConversationRecord {
                conversation: Some(conversation.clone()),
                ..Default::default()
            })),
        );
        Ok(())
    }

    async fn load_conversation(&self, id: ConversationId) -> Result<Option<Conversation>, StoreError> {
        match self.records.read().await.get(&id) {
            Some(record) => Ok(record.lock().await.conversation.clone()),
            None => Ok(None),
        }
    }

    async fn save_conversation(&self, conversation: &Conversation, expected_version: i64) -> Result<bool, StoreError> {
        let record = self.record(conversation.id).await?;
        let mut record = record.lock().await;
        match &record.conversation {
            Some(stored) if stored.version == expected_version => {
                record.conversation = Some(conversation.clone());
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(conversation.id)),
        }
    }

    async fn append_message(&self, conversation_id: ConversationId, sender_id: UserId, _content: &str) -> Result<(), StoreError> {
        let record = self.record(conversation_id).await?;
        record.lock().await.messages.push(StoredMessage {
            sender_id: Some(sender_id),
            is_system: false,
            created_at: OffsetDateTime::now_utc(),
        });
        Ok(())
    }

    async fn append_system_message(
        &self,
        conversation_id: ConversationId,
        content: &str,
        metadata: Value,
    ) -> Result<(), StoreError> {
        let record = self.record(conversation_id).await?;
        let mut record = record.lock().await;
        record.messages.push(StoredMessage {
            sender_id: None,
            is_system: true,
            created_at: OffsetDateTime::now_utc(),
        });
        record.system_messages.push((content.to_string(), metadata));
        Ok(())
    }

    async fn mark_read(&self, conversation_id: ConversationId, user_id: UserId, at: OffsetDateTime) -> Result<(), StoreError> {
        self.reads.write().await.insert((conversation_id, user_id), at);
        Ok(())
    }

    async fn unread_count(&self, user_id: UserId) -> Result<i64, StoreError> {
        let records: Vec<(ConversationId, Arc<Mutex<ConversationRecord>>)> = self
            .records
            .read()
            .await
            .iter()
            .map(|(id, record)| (*id, Arc::clone(record)))
            .collect();
        let reads = self.reads.read().await;

        let mut unread = 0;
        for (id, record) in records {
            let record = record.lock().await;
            let participant = record
                .conversation
                .as_ref()
                .map_or(false, |c| c.customer_id == user_id || c.staff_id == Some(user_id));
            if !participant {
                continue;
            }
            let cursor = reads.get(&(id, user_id)).copied();
            unread += record
                .messages
                .iter()
                .filter(|m| !m.is_system && m.sender_id != Some(user_id))
                .filter(|m| cursor.map_or(true, |read_at| m.created_at > read_at))
                .count() as i64;
        }
        Ok(unread)
    }

    async fn persist_notification(&self, notification: &NotificationEvent) -> Result<bool, StoreError> {
        let mut notifications = self.notifications.write().await;
        let exists = notifications
            .iter()
            .any(|n| n.id == notification.id && n.recipient_user_id == notification.recipient_user_id);
        if exists {
            return Ok(false);
        }
        notifications.push(notification.clone());
        Ok(true)
    }

    async fn list_notifications_since(
        &self,
        user_id: UserId,
        since: Option<OffsetDateTime>,
        limit: i64,
    ) -> Result<Vec<NotificationEvent>, StoreError> {
        let mut matching: Vec<NotificationEvent> = self
            .notifications
            .read()
            .await
            .iter()
            .filter(|n| n.recipient_user_id == user_id)
            .filter(|n| since.map_or(true, |since| n.created_at > since))
            .cloned()
            .collect();
        matching.sort_by_key(|n| n.created_at);
        matching.truncate(usize::try_from(limit.max(0)).unwrap_or(0));
        Ok(matching)
    }
}
