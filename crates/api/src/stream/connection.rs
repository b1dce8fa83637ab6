//! Live stream connection
//!
//! One registered stream per user. Delivery never blocks: a full buffer
//! drops the event for this connection only, a closed channel marks the
//! connection dead so the hub can evict it. Closing drops the sender, so the
//! transport drains what is queued and then ends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use supportdesk_shared::{DeskError, Role, UserId};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use super::dedup::DedupWindow;
use super::events::StreamEvent;

/// Upper bound on ids remembered per connection
const DEDUP_CAPACITY: usize = 1024;

/// What the transport writes to the client
#[derive(Debug, Clone)]
pub enum HubFrame {
    Event(StreamEvent),
    KeepAlive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Same event id already pushed inside the dedup window
    Duplicate,
    /// Buffer full; the client catches up through the notification poll
    Dropped,
}

#[derive(Debug)]
pub struct Connection {
    /// Unique per registration; a reconnect gets a fresh one
    pub session_id: Uuid,
    pub user_id: UserId,
    pub role: Role,
    /// Taken on close
    sender: Mutex<Option<mpsc::Sender<HubFrame>>>,
    last_activity: Mutex<Instant>,
    dedup: Mutex<DedupWindow>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl Connection {
    pub fn new(user_id: UserId, role: Role, sender: mpsc::Sender<HubFrame>, dedup_window: Duration) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            role,
            sender: Mutex::new(Some(sender)),
            last_activity: Mutex::new(Instant::now()),
            dedup: Mutex::new(DedupWindow::new(dedup_window, DEDUP_CAPACITY)),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Push an event unless it is a repeat.
    ///
    /// Returns `ConnectionDead` once the client side has gone away or the
    /// connection was closed.
    pub fn deliver(&self, event: &StreamEvent) -> Result<Delivery, DeskError> {
        if self.is_closed() {
            return Err(DeskError::ConnectionDead(self.user_id));
        }

        let mut dedup = self.dedup.lock().unwrap_or_else(PoisonError::into_inner);
        if dedup.contains(&event.id) {
            return Ok(Delivery::Duplicate);
        }

        match self.try_send(HubFrame::Event(event.clone())) {
            Ok(()) => {
                dedup.record(&event.id);
                self.touch();
                Ok(Delivery::Sent)
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    user_id = %self.user_id,
                    event_id = %event.id,
                    "Stream buffer full, dropping event"
                );
                Ok(Delivery::Dropped)
            }
            Err(TrySendError::Closed(_)) => Err(DeskError::ConnectionDead(self.user_id)),
        }
    }

    fn try_send(&self, frame: HubFrame) -> Result<(), TrySendError<HubFrame>> {
        match self.sender.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            Some(sender) => sender.try_send(frame),
            None => Err(TrySendError::Closed(frame)),
        }
    }

    /// Heartbeat frame. Does not count as activity.
    pub fn keep_alive(&self) -> Result<Delivery, DeskError> {
        if self.is_closed() {
            return Err(DeskError::ConnectionDead(self.user_id));
        }
        match self.try_send(HubFrame::KeepAlive) {
            Ok(()) => Ok(Delivery::Sent),
            Err(TrySendError::Full(_)) => Ok(Delivery::Dropped),
            Err(TrySendError::Closed(_)) => Err(DeskError::ConnectionDead(self.user_id)),
        }
    }

    pub fn touch(&self) {
        *self.last_activity.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub fn idle_deadline(&self, idle_timeout: Duration) -> Instant {
        *self.last_activity.lock().unwrap_or_else(PoisonError::into_inner) + idle_timeout
    }

    /// Stop the connection's timers, refuse further deliveries and end the
    /// client's stream once it has drained.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.cancel.cancel();
            self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use supportdesk_shared::NotificationEvent;
    use supportdesk_shared::NotificationType;
    use time::OffsetDateTime;

    fn notification(id: &str) -> StreamEvent {
        StreamEvent::notification(&NotificationEvent {
            id: id.to_string(),
            notification_type: NotificationType::TicketReplied,
            recipient_user_id: UserId::new(),
            title: "Reply".to_string(),
            body: String::new(),
            data: json!({}),
            created_at: OffsetDateTime::now_utc(),
        })
    }

    fn connection(buffer: usize) -> (Connection, mpsc::Receiver<HubFrame>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Connection::new(UserId::new(), Role::Staff, tx, Duration::from_secs(60)), rx)
    }

    #[tokio::test]
    async fn test_duplicate_event_is_suppressed() {
        let (conn, mut rx) = connection(8);

        assert_eq!(conn.deliver(&notification("n1")).unwrap(), Delivery::Sent);
        assert_eq!(conn.deliver(&notification("n1")).unwrap(), Delivery::Duplicate);
        assert_eq!(conn.deliver(&notification("n2")).unwrap(), Delivery::Sent);

        let mut ids = Vec::new();
        while let Ok(HubFrame::Event(event)) = rx.try_recv() {
            ids.push(event.id);
        }
        assert_eq!(ids, vec!["n1", "n2"]);
    }

    #[tokio::test]
    async fn test_full_buffer_drops_without_blocking() {
        let (conn, _rx) = connection(1);

        assert_eq!(conn.deliver(&notification("n1")).unwrap(), Delivery::Sent);
        assert_eq!(conn.deliver(&notification("n2")).unwrap(), Delivery::Dropped);
        assert_eq!(conn.keep_alive().unwrap(), Delivery::Dropped);
    }

    #[tokio::test]
    async fn test_dropped_event_can_be_retried() {
        let (conn, mut rx) = connection(1);
        conn.deliver(&notification("n1")).unwrap();
        assert_eq!(conn.deliver(&notification("n2")).unwrap(), Delivery::Dropped);

        rx.recv().await.unwrap();
        assert_eq!(conn.deliver(&notification("n2")).unwrap(), Delivery::Sent);
    }

    #[tokio::test]
    async fn test_closed_receiver_is_dead() {
        let (conn, rx) = connection(4);
        drop(rx);

        assert!(matches!(
            conn.deliver(&notification("n1")),
            Err(DeskError::ConnectionDead(_))
        ));
    }

    #[tokio::test]
    async fn test_close_cancels_and_refuses_delivery() {
        let (conn, _rx) = connection(4);
        conn.close();

        assert!(conn.is_closed());
        conn.cancelled().await;
        assert!(conn.deliver(&notification("n1")).is_err());
    }

    #[tokio::test]
    async fn test_close_ends_receiver_after_queued_frames() {
        let (conn, mut rx) = connection(4);
        conn.deliver(&notification("last")).unwrap();
        conn.close();

        match rx.recv().await {
            Some(HubFrame::Event(event)) => assert_eq!(event.id, "last"),
            other => panic!("expected queued event, got {other:?}"),
        }
        assert!(rx.recv().await.is_none());
    }
}
