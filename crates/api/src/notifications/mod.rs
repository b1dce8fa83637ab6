//! Notification fan-out
//!
//! Expands domain events into per-user notifications, stores them for the
//! reconciliation poll and pushes them to whoever is connected. Each
//! notification id is derived from the underlying event, so the live push
//! and a later poll describe the same thing and clients can drop the repeat.

mod directory;

use std::sync::Arc;

use serde_json::json;
use supportdesk_shared::{
    AgentId, BackendUserId, DeskError, GroupId, NotificationEvent, NotificationType, UserId, WorkItemId,
};
use time::OffsetDateTime;

pub use directory::{MemoryUserDirectory, PgUserDirectory, UserDirectory};

use crate::conversations::ConversationStore;
use crate::stream::{BroadcastHub, StreamEvent, Targets};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    /// Notifies the previous owner only
    TicketReassigned {
        work_item_id: WorkItemId,
        title: String,
        previous_owner: AgentId,
        new_owner: AgentId,
        /// A ticket can bounce between the same two agents more than once
        reassigned_at: OffsetDateTime,
    },
    /// Notifies the ticket's customer
    TicketReplied {
        work_item_id: WorkItemId,
        title: String,
        customer: BackendUserId,
        article_id: i64,
    },
    /// Notifies every admin
    RoutingFailed {
        work_item_id: WorkItemId,
        title: String,
        group_id: GroupId,
        region: Option<String>,
        reason: String,
        occurred_at: OffsetDateTime,
    },
}

impl DomainEvent {
    pub fn notification_type(&self) -> NotificationType {
        match self {
            DomainEvent::TicketReassigned { .. } => NotificationType::TicketReassigned,
            DomainEvent::TicketReplied { .. } => NotificationType::TicketReplied,
            DomainEvent::RoutingFailed { .. } => NotificationType::RoutingFailed,
        }
    }

    /// Same underlying event, same id
    pub fn stable_id(&self) -> String {
        let kind = self.notification_type().as_str();
        match self {
            DomainEvent::TicketReassigned {
                work_item_id,
                previous_owner,
                new_owner,
                reassigned_at,
                ..
            } => format!(
                "{kind}:{work_item_id}:{previous_owner}:{new_owner}:{}",
                reassigned_at.unix_timestamp_nanos()
            ),
            DomainEvent::TicketReplied {
                work_item_id, article_id, ..
            } => format!("{kind}:{work_item_id}:{article_id}"),
            DomainEvent::RoutingFailed {
                work_item_id,
                occurred_at,
                ..
            } => format!("{kind}:{work_item_id}:{}", occurred_at.unix_timestamp_nanos()),
        }
    }

    fn render(&self) -> (String, String, serde_json::Value) {
        match self {
            DomainEvent::TicketReassigned {
                work_item_id,
                title,
                new_owner,
                ..
            } => (
                "Ticket reassigned".to_string(),
                format!("Ticket #{work_item_id} \"{title}\" was reassigned to another agent"),
                json!({ "work_item_id": work_item_id, "new_owner": new_owner }),
            ),
            DomainEvent::TicketReplied {
                work_item_id,
                title,
                article_id,
                ..
            } => (
                "New reply on your ticket".to_string(),
                format!("Support replied to ticket #{work_item_id} \"{title}\""),
                json!({ "work_item_id": work_item_id, "article_id": article_id }),
            ),
            DomainEvent::RoutingFailed {
                work_item_id,
                title,
                group_id,
                region,
                reason,
                ..
            } => (
                "Ticket could not be routed".to_string(),
                format!("Ticket #{work_item_id} \"{title}\" needs manual assignment: {reason}"),
                json!({
                    "work_item_id": work_item_id,
                    "group_id": group_id,
                    "region": region,
                    "reason": reason,
                }),
            ),
        }
    }
}

#[derive(Clone)]
pub struct NotificationFanout {
    directory: Arc<dyn UserDirectory>,
    store: Arc<dyn ConversationStore>,
    hub: BroadcastHub,
}

impl NotificationFanout {
    pub fn new(directory: Arc<dyn UserDirectory>, store: Arc<dyn ConversationStore>, hub: BroadcastHub) -> Self {
        Self { directory, store, hub }
    }

    async fn recipients(&self, event: &DomainEvent) -> Result<Vec<UserId>, DeskError> {
        let mut recipients = match event {
            DomainEvent::TicketReassigned { previous_owner, .. } => {
                self.directory.resolve_external(*previous_owner).await?
            }
            DomainEvent::TicketReplied { customer, .. } => self.directory.resolve_external(*customer).await?,
            DomainEvent::RoutingFailed { .. } => self.directory.admins().await?,
        };
        recipients.sort();
        recipients.dedup();
        Ok(recipients)
    }

    /// One notification per local recipient. Zero recipients is valid.
    pub async fn fan_out(&self, event: &DomainEvent) -> Result<Vec<NotificationEvent>, DeskError> {
        let recipients = self.recipients(event).await?;
        let id = event.stable_id();
        let (title, body, data) = event.render();
        let created_at = OffsetDateTime::now_utc();

        Ok(recipients
            .into_iter()
            .map(|recipient_user_id| NotificationEvent {
                id: id.clone(),
                notification_type: event.notification_type(),
                recipient_user_id,
                title: title.clone(),
                body: body.clone(),
                data: data.clone(),
                created_at,
            })
            .collect())
    }

    /// Fan out, store, and push live.
    ///
    /// A notification that cannot be stored is still pushed; the poll just
    /// won't return it later.
    pub async fn deliver(&self, event: &DomainEvent) -> Result<Vec<NotificationEvent>, DeskError> {
        let notifications = self.fan_out(event).await?;
        if notifications.is_empty() {
            tracing::debug!(event_id = %event.stable_id(), "Domain event has no local recipients");
            return Ok(notifications);
        }

        for notification in &notifications {
            match self.store.persist_notification(notification).await {
                Ok(true) => {}
                Ok(false) => tracing::debug!(
                    notification_id = %notification.id,
                    recipient = %notification.recipient_user_id,
                    "Notification already stored"
                ),
                Err(e) => tracing::error!(
                    notification_id = %notification.id,
                    recipient = %notification.recipient_user_id,
                    error = %e,
                    "Failed to persist notification"
                ),
            }

            self.hub
                .publish(
                    &StreamEvent::notification(notification),
                    &Targets::user(notification.recipient_user_id),
                )
                .await;
        }

        tracing::info!(
            event_id = %event.stable_id(),
            notification_type = event.notification_type().as_str(),
            recipients = notifications.len(),
            "Notifications delivered"
        );

        Ok(notifications)
    }
}
