//! PostgreSQL conversation store

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use supportdesk_shared::{
    Conversation, ConversationId, ConversationMode, ConversationStatus, NotificationEvent, NotificationType, UserId,
};
use time::OffsetDateTime;
use uuid::Uuid;

use super::store::{ConversationStore, StoreError};

#[derive(Debug, sqlx::FromRow)]
struct ConversationRow {
    id: Uuid,
    customer_id: Uuid,
    staff_id: Option<Uuid>,
    status: String,
    mode: String,
    region: String,
    rating_submitted_at: Option<OffsetDateTime>,
    rating_score: Option<i16>,
    rating_comment: Option<String>,
    version: i64,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<ConversationRow> for Conversation {
    type Error = StoreError;

    fn try_from(row: ConversationRow) -> Result<Self, Self::Error> {
        let status = ConversationStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Corrupt(format!("conversation {} has status {}", row.id, row.status)))?;
        let mode = ConversationMode::parse(&row.mode)
            .ok_or_else(|| StoreError::Corrupt(format!("conversation {} has mode {}", row.id, row.mode)))?;

        Ok(Conversation {
            id: ConversationId(row.id),
            customer_id: UserId(row.customer_id),
            staff_id: row.staff_id.map(UserId),
            status,
            mode,
            region: row.region,
            rating_submitted_at: row.rating_submitted_at,
            rating_score: row.rating_score,
            rating_comment: row.rating_comment,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct NotificationRow {
    id: String,
    recipient_user_id: Uuid,
    notification_type: String,
    title: String,
    body: String,
    data: Value,
    created_at: OffsetDateTime,
}

impl TryFrom<NotificationRow> for NotificationEvent {
    type Error = StoreError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        let notification_type = NotificationType::parse(&row.notification_type)
            .ok_or_else(|| StoreError::Corrupt(format!("notification {} has type {}", row.id, row.notification_type)))?;

        Ok(NotificationEvent {
            id: row.id,
            notification_type,
            recipient_user_id: UserId(row.recipient_user_id),
            title: row.title,
            body: row.body,
            data: row.data,
            created_at: row.created_at,
        })
    }
}

#[derive(Clone)]
pub struct PgConversationStore {
    pool: PgPool,
}

impl PgConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn insert_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO conversations (
                id, customer_id, staff_id, status, mode, region,
                rating_submitted_at, rating_score, rating_comment,
                version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(conversation.id.0)
        .bind(conversation.customer_id.0)
        .bind(conversation.staff_id.map(|s| s.0))
        .bind(conversation.status.as_str())
        .bind(conversation.mode.as_str())
        .bind(&conversation.region)
        .bind(conversation.rating_submitted_at)
        .bind(conversation.rating_score)
        .bind(&conversation.rating_comment)
        .bind(conversation.version)
        .bind(conversation.created_at)
        .bind(conversation.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate(conversation.id));
        }
        Ok(())
    }

    async fn load_conversation(&self, id: ConversationId) -> Result<Option<Conversation>, StoreError> {
        let row: Option<ConversationRow> = sqlx::query_as(
            r#"
            SELECT id, customer_id, staff_id, status, mode, region,
                   rating_submitted_at, rating_score, rating_comment,
                   version, created_at, updated_at
            FROM conversations
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Conversation::try_from).transpose()
    }

    async fn save_conversation(&self, conversation: &Conversation, expected_version: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET staff_id = $3,
                status = $4,
                mode = $5,
                region = $6,
                rating_submitted_at = $7,
                rating_score = $8,
                rating_comment = $9,
                version = $10,
                updated_at = $11
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(conversation.id.0)
        .bind(expected_version)
        .bind(conversation.staff_id.map(|s| s.0))
        .bind(conversation.status.as_str())
        .bind(conversation.mode.as_str())
        .bind(&conversation.region)
        .bind(conversation.rating_submitted_at)
        .bind(conversation.rating_score)
        .bind(&conversation.rating_comment)
        .bind(conversation.version)
        .bind(conversation.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn append_message(&self, conversation_id: ConversationId, sender_id: UserId, content: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO conversation_messages (id, conversation_id, sender_id, is_system, content)
            VALUES ($1, $2, $3, FALSE, $4)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(conversation_id.0)
        .bind(sender_id.0)
        .bind(content)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_system_message(
        &self,
        conversation_id: ConversationId,
        content: &str,
        metadata: Value,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO conversation_messages (id, conversation_id, sender_id, is_system, content, metadata)
            VALUES ($1, $2, NULL, TRUE, $3, $4)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(conversation_id.0)
        .bind(content)
        .bind(metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_read(&self, conversation_id: ConversationId, user_id: UserId, at: OffsetDateTime) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO conversation_reads (conversation_id, user_id, last_read_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (conversation_id, user_id) DO UPDATE SET
                last_read_at = GREATEST(conversation_reads.last_read_at, EXCLUDED.last_read_at)
            "#,
        )
        .bind(conversation_id.0)
        .bind(user_id.0)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unread_count(&self, user_id: UserId) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM conversation_messages m
            JOIN conversations c ON c.id = m.conversation_id
            LEFT JOIN conversation_reads r
                   ON r.conversation_id = m.conversation_id AND r.user_id = $1
            WHERE (c.customer_id = $1 OR c.staff_id = $1)
              AND m.is_system = FALSE
              AND m.sender_id IS DISTINCT FROM $1
              AND (r.last_read_at IS NULL OR m.created_at > r.last_read_at)
            "#,
        )
        .bind(user_id.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn persist_notification(&self, notification: &NotificationEvent) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO notifications (id, recipient_user_id, notification_type, title, body, data, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id, recipient_user_id) DO NOTHING
            "#,
        )
        .bind(&notification.id)
        .bind(notification.recipient_user_id.0)
        .bind(notification.notification_type.as_str())
        .bind(&notification.title)
        .bind(&notification.body)
        .bind(&notification.data)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_notifications_since(
        &self,
        user_id: UserId,
        since: Option<OffsetDateTime>,
        limit: i64,
    ) -> Result<Vec<NotificationEvent>, StoreError> {
        let rows: Vec<NotificationRow> = sqlx::query_as(
            r#"
            SELECT id, recipient_user_id, notification_type, title, body, data, created_at
            FROM notifications
            WHERE recipient_user_id = $1
              AND ($2::timestamptz IS NULL OR created_at > $2)
            ORDER BY created_at ASC
            LIMIT $3
            "#,
        )
        .bind(user_id.0)
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(NotificationEvent::try_from).collect()
    }
}
