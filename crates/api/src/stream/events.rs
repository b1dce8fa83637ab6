//! Stream event types and serialization
//!
//! Every event pushed to a live stream has the same envelope:
//! `{ id, type, conversation_id?, data, timestamp }`. `id` is stable for the
//! underlying change so clients (and the hub) can drop repeats.

use serde::Serialize;
use serde_json::{json, Value};
use supportdesk_shared::{Conversation, ConversationId, NotificationEvent, UserId};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Connected,
    ConversationClaimed,
    ConversationUpdated,
    ConversationRegionChanged,
    UnreadCountUpdated,
    Notification,
    Timeout,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::ConversationClaimed => "conversation_claimed",
            EventKind::ConversationUpdated => "conversation_updated",
            EventKind::ConversationRegionChanged => "conversation_region_changed",
            EventKind::UnreadCountUpdated => "unread_count_updated",
            EventKind::Notification => "notification",
            EventKind::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    pub data: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl StreamEvent {
    fn new(id: String, kind: EventKind, conversation_id: Option<ConversationId>, data: Value) -> Self {
        Self {
            id,
            kind,
            conversation_id,
            data,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn connected(session_id: Uuid) -> Self {
        Self::new(
            format!("connected:{session_id}"),
            EventKind::Connected,
            None,
            json!({ "session_id": session_id }),
        )
    }

    pub fn timeout(session_id: Uuid) -> Self {
        Self::new(
            format!("timeout:{session_id}"),
            EventKind::Timeout,
            None,
            json!({ "reason": "idle", "reconnect": true }),
        )
    }

    /// Conversation change events are keyed by the record version they
    /// describe.
    fn conversation(kind: EventKind, conversation: &Conversation, extra: Value) -> Self {
        let mut data = json!({
            "status": conversation.status,
            "mode": conversation.mode,
            "staff_id": conversation.staff_id,
            "region": conversation.region,
            "version": conversation.version,
        });
        if let (Some(target), Value::Object(fields)) = (data.as_object_mut(), extra) {
            target.extend(fields);
        }
        Self::new(
            format!("{}:{}:{}", kind.as_str(), conversation.id, conversation.version),
            kind,
            Some(conversation.id),
            data,
        )
    }

    pub fn conversation_claimed(conversation: &Conversation) -> Self {
        Self::conversation(EventKind::ConversationClaimed, conversation, Value::Null)
    }

    pub fn conversation_updated(conversation: &Conversation) -> Self {
        Self::conversation(EventKind::ConversationUpdated, conversation, Value::Null)
    }

    pub fn region_changed(conversation: &Conversation, previous_region: &str, reason: Option<&str>) -> Self {
        Self::conversation(
            EventKind::ConversationRegionChanged,
            conversation,
            json!({ "previous_region": previous_region, "reason": reason }),
        )
    }

    /// Keyed on the read time, not the count: a later read may land on a
    /// count the client has already seen.
    pub fn unread_count(
        conversation_id: ConversationId,
        reader: UserId,
        unread_count: i64,
        read_at: OffsetDateTime,
    ) -> Self {
        Self::new(
            format!(
                "unread_count_updated:{conversation_id}:{reader}:{}",
                read_at.unix_timestamp_nanos()
            ),
            EventKind::UnreadCountUpdated,
            Some(conversation_id),
            json!({ "unread_count": unread_count }),
        )
    }

    pub fn notification(notification: &NotificationEvent) -> Self {
        Self::new(
            notification.id.clone(),
            EventKind::Notification,
            None,
            json!({
                "type": notification.notification_type,
                "title": notification.title,
                "body": notification.body,
                "data": notification.data,
                "created_at": notification.created_at.unix_timestamp(),
            }),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let session_id = Uuid::new_v4();
        let json = serde_json::to_value(StreamEvent::connected(session_id)).unwrap();
        assert_eq!(json["type"], "connected");
        assert_eq!(json["data"]["session_id"], session_id.to_string());
        assert!(json.get("conversation_id").is_none());
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_region_change_carries_both_regions() {
        let mut conversation = Conversation::new(UserId::new(), "europe-zone-1");
        conversation.version = 3;
        let event = StreamEvent::region_changed(&conversation, "asia-pacific", Some("customer moved"));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "conversation_region_changed");
        assert_eq!(json["data"]["region"], "europe-zone-1");
        assert_eq!(json["data"]["previous_region"], "asia-pacific");
        assert_eq!(json["conversation_id"], conversation.id.to_string());
        assert_eq!(
            event.id,
            format!("conversation_region_changed:{}:3", conversation.id)
        );
    }

    #[test]
    fn test_same_change_has_same_id() {
        let conversation = Conversation::new(UserId::new(), "asia-pacific");
        assert_eq!(
            StreamEvent::conversation_claimed(&conversation).id,
            StreamEvent::conversation_claimed(&conversation).id
        );
    }
}
