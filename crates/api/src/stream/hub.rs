//! Broadcast hub
//!
//! Registry of live streams keyed by user, with a role index so cohort
//! broadcasts touch only the matching connections. Each connection gets a
//! timer task that sends heartbeats and closes the stream once idle.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use supportdesk_shared::{Role, UserId};
use tokio::sync::{mpsc, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use super::connection::{Connection, Delivery, HubFrame};
use super::events::StreamEvent;

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub heartbeat_interval: Duration,
    pub idle_timeout: Duration,
    pub buffer: usize,
    pub dedup_window: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(300),
            buffer: 64,
            dedup_window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cohort {
    /// Staff and admins
    Staff,
    Admins,
    Everyone,
}

impl Cohort {
    fn roles(&self) -> &'static [Role] {
        match self {
            Cohort::Staff => &[Role::Staff, Role::Admin],
            Cohort::Admins => &[Role::Admin],
            Cohort::Everyone => &[Role::Customer, Role::Staff, Role::Admin],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Targets {
    Users(Vec<UserId>),
    Cohort(Cohort),
}

impl Targets {
    pub fn user(user_id: UserId) -> Self {
        Targets::Users(vec![user_id])
    }
}

/// Per-publish outcome counts
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub duplicates: usize,
    pub dropped: usize,
    pub evicted: usize,
    /// Explicit recipients with no live stream
    pub offline: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct HubStats {
    pub active_connections: usize,
    pub staff_connections: usize,
    pub admin_connections: usize,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<UserId, Arc<Connection>>,
    by_role: HashMap<Role, HashSet<UserId>>,
}

impl Registry {
    fn insert(&mut self, conn: Arc<Connection>) -> Option<Arc<Connection>> {
        let previous = self.connections.insert(conn.user_id, Arc::clone(&conn));
        if let Some(previous) = &previous {
            self.unindex(previous);
        }
        self.by_role.entry(conn.role).or_default().insert(conn.user_id);
        previous
    }

    fn remove_session(&mut self, user_id: UserId, session_id: Uuid) -> Option<Arc<Connection>> {
        match self.connections.get(&user_id) {
            Some(current) if current.session_id == session_id => {
                // Timers stop before the entry disappears
                current.close();
            }
            _ => return None,
        }
        let removed = self.connections.remove(&user_id)?;
        self.unindex(&removed);
        Some(removed)
    }

    fn unindex(&mut self, conn: &Connection) {
        if let Some(users) = self.by_role.get_mut(&conn.role) {
            users.remove(&conn.user_id);
            if users.is_empty() {
                self.by_role.remove(&conn.role);
            }
        }
    }

    fn cohort_size(&self, role: Role) -> usize {
        self.by_role.get(&role).map_or(0, HashSet::len)
    }
}

#[derive(Clone)]
pub struct BroadcastHub {
    registry: Arc<RwLock<Registry>>,
    config: HubConfig,
}

impl BroadcastHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry::default())),
            config,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Bounded channel sized for one stream
    pub fn channel(&self) -> (mpsc::Sender<HubFrame>, mpsc::Receiver<HubFrame>) {
        mpsc::channel(self.config.buffer.max(1))
    }

    /// Register a live stream for `user_id`, replacing any previous one.
    ///
    /// The replaced stream is closed and its timers stop. The new stream
    /// receives a `connected` event first.
    pub async fn register(&self, user_id: UserId, role: Role, sender: mpsc::Sender<HubFrame>) -> Arc<Connection> {
        let conn = Arc::new(Connection::new(user_id, role, sender, self.config.dedup_window));

        let total = {
            let mut registry = self.registry.write().await;
            if let Some(previous) = registry.insert(Arc::clone(&conn)) {
                previous.close();
                tracing::info!(
                    user_id = %user_id,
                    replaced_session = %previous.session_id,
                    "Replacing existing stream"
                );
            }
            registry.connections.len()
        };

        tracing::info!(
            session_id = %conn.session_id,
            user_id = %user_id,
            role = role.as_str(),
            total_connections = total,
            "Stream registered"
        );

        if let Err(e) = conn.deliver(&StreamEvent::connected(conn.session_id)) {
            tracing::debug!(session_id = %conn.session_id, error = %e, "Connected event not delivered");
        }

        tokio::spawn(supervise(self.clone(), Arc::clone(&conn)));
        conn
    }

    /// Remove the stream for `user_id` if it is still `session_id`.
    ///
    /// A late unregister from a replaced stream leaves the newer one alone.
    pub async fn unregister(&self, user_id: UserId, session_id: Uuid) -> bool {
        let mut registry = self.registry.write().await;
        match registry.remove_session(user_id, session_id) {
            Some(_) => {
                tracing::info!(
                    session_id = %session_id,
                    user_id = %user_id,
                    remaining_connections = registry.connections.len(),
                    "Stream unregistered"
                );
                true
            }
            None => false,
        }
    }

    /// Push `event` to every target without blocking on slow clients.
    ///
    /// Dead connections found along the way are evicted.
    pub async fn publish(&self, event: &StreamEvent, targets: &Targets) -> PublishReport {
        let mut report = PublishReport::default();
        let mut dead = Vec::new();

        {
            let registry = self.registry.read().await;
            let recipients: Vec<&Arc<Connection>> = match targets {
                Targets::Users(users) => {
                    let mut unique = HashSet::new();
                    users
                        .iter()
                        .filter(|user| unique.insert(**user))
                        .filter_map(|user| {
                            let conn = registry.connections.get(user);
                            if conn.is_none() {
                                report.offline += 1;
                            }
                            conn
                        })
                        .collect()
                }
                Targets::Cohort(cohort) => cohort
                    .roles()
                    .iter()
                    .filter_map(|role| registry.by_role.get(role))
                    .flatten()
                    .filter_map(|user| registry.connections.get(user))
                    .collect(),
            };

            for conn in recipients {
                match conn.deliver(event) {
                    Ok(Delivery::Sent) => report.delivered += 1,
                    Ok(Delivery::Duplicate) => report.duplicates += 1,
                    Ok(Delivery::Dropped) => report.dropped += 1,
                    Err(_) => {
                        report.evicted += 1;
                        dead.push((conn.user_id, conn.session_id));
                    }
                }
            }
        }

        for (user_id, session_id) in dead {
            tracing::warn!(user_id = %user_id, session_id = %session_id, "Evicting dead stream");
            self.unregister(user_id, session_id).await;
        }

        tracing::debug!(
            event_id = %event.id,
            event_type = event.kind.as_str(),
            delivered = report.delivered,
            duplicates = report.duplicates,
            dropped = report.dropped,
            evicted = report.evicted,
            "Event published"
        );

        report
    }

    /// Close every stream; used on server shutdown so open responses finish
    pub async fn close_all(&self) -> usize {
        let mut registry = self.registry.write().await;
        let closed = registry.connections.len();
        for conn in registry.connections.values() {
            conn.close();
        }
        registry.connections.clear();
        registry.by_role.clear();
        tracing::info!(closed, "Closed all streams");
        closed
    }

    pub async fn is_connected(&self, user_id: UserId) -> bool {
        self.registry.read().await.connections.contains_key(&user_id)
    }

    pub async fn connection(&self, user_id: UserId) -> Option<Arc<Connection>> {
        self.registry.read().await.connections.get(&user_id).cloned()
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.read().await.connections.len()
    }

    pub async fn stats(&self) -> HubStats {
        let registry = self.registry.read().await;
        HubStats {
            active_connections: registry.connections.len(),
            staff_connections: registry.cohort_size(Role::Staff),
            admin_connections: registry.cohort_size(Role::Admin),
        }
    }
}

/// Heartbeat and idle timer for one connection. Exits when the connection
/// is closed, times out, or turns out to be dead.
async fn supervise(hub: BroadcastHub, conn: Arc<Connection>) {
    let heartbeat = hub.config.heartbeat_interval;
    let idle_timeout = hub.config.idle_timeout;
    let mut ticker = tokio::time::interval_at(Instant::now() + heartbeat, heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let deadline = conn.idle_deadline(idle_timeout);
        tokio::select! {
            biased;
            _ = conn.cancelled() => break,
            _ = tokio::time::sleep_until(deadline) => {
                // Activity may have moved the deadline while we slept
                if Instant::now() < conn.idle_deadline(idle_timeout) {
                    continue;
                }
                tracing::info!(
                    session_id = %conn.session_id,
                    user_id = %conn.user_id,
                    idle_secs = idle_timeout.as_secs(),
                    "Closing idle stream"
                );
                let _ = conn.deliver(&StreamEvent::timeout(conn.session_id));
                hub.unregister(conn.user_id, conn.session_id).await;
                conn.close();
                break;
            }
            _ = ticker.tick() => {
                if conn.keep_alive().is_err() {
                    tracing::debug!(session_id = %conn.session_id, "Heartbeat found dead stream");
                    hub.unregister(conn.user_id, conn.session_id).await;
                    conn.close();
                    break;
                }
            }
        }
    }
}

/// Unregisters a stream when the transport drops it
pub struct StreamGuard {
    hub: BroadcastHub,
    conn: Arc<Connection>,
}

impl StreamGuard {
    pub fn new(hub: BroadcastHub, conn: Arc<Connection>) -> Self {
        Self { hub, conn }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.conn.close();
        let hub = self.hub.clone();
        let (user_id, session_id) = (self.conn.user_id, self.conn.session_id);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                hub.unregister(user_id, session_id).await;
            });
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::stream::events::EventKind;
    use supportdesk_shared::{Conversation, NotificationEvent, NotificationType};
    use time::OffsetDateTime;

    fn hub() -> BroadcastHub {
        BroadcastHub::new(HubConfig {
            heartbeat_interval: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(300),
            buffer: 8,
            dedup_window: Duration::from_secs(60),
        })
    }

    fn notification(id: &str, recipient: UserId) -> StreamEvent {
        StreamEvent::notification(&NotificationEvent {
            id: id.to_string(),
            notification_type: NotificationType::TicketReassigned,
            recipient_user_id: recipient,
            title: "Ticket reassigned".to_string(),
            body: String::new(),
            data: serde_json::json!({}),
            created_at: OffsetDateTime::now_utc(),
        })
    }

    async fn connect(hub: &BroadcastHub, role: Role) -> (Arc<Connection>, mpsc::Receiver<HubFrame>) {
        let (tx, mut rx) = hub.channel();
        let conn = hub.register(UserId::new(), role, tx).await;
        // Drain the connected event
        match rx.recv().await {
            Some(HubFrame::Event(event)) => assert_eq!(event.kind, EventKind::Connected),
            other => panic!("expected connected event, got {other:?}"),
        }
        (conn, rx)
    }

    fn next_event(rx: &mut mpsc::Receiver<HubFrame>) -> Option<StreamEvent> {
        loop {
            match rx.try_recv() {
                Ok(HubFrame::Event(event)) => return Some(event),
                Ok(HubFrame::KeepAlive) => continue,
                Err(_) => return None,
            }
        }
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let hub = hub();
        let (conn, _rx) = connect(&hub, Role::Staff).await;

        assert!(hub.is_connected(conn.user_id).await);
        assert_eq!(hub.stats().await.staff_connections, 1);

        assert!(hub.unregister(conn.user_id, conn.session_id).await);
        assert!(!hub.is_connected(conn.user_id).await);
        assert!(conn.is_closed());
        assert_eq!(hub.stats().await.staff_connections, 0);
    }

    #[tokio::test]
    async fn test_reconnect_replaces_and_stale_unregister_is_ignored() {
        let hub = hub();
        let user_id = UserId::new();

        let (tx1, mut rx1) = hub.channel();
        let first = hub.register(user_id, Role::Customer, tx1).await;
        let (tx2, _rx2) = hub.channel();
        let second = hub.register(user_id, Role::Customer, tx2).await;

        assert!(first.is_closed());
        assert_eq!(hub.connection_count().await, 1);

        // The replaced stream drains its connected event, then ends
        assert!(matches!(rx1.recv().await, Some(HubFrame::Event(_))));
        assert!(rx1.recv().await.is_none());

        // Late cleanup from the first stream
        assert!(!hub.unregister(user_id, first.session_id).await);
        let current = hub.connection(user_id).await.unwrap();
        assert_eq!(current.session_id, second.session_id);
    }

    #[tokio::test]
    async fn test_cohort_broadcast_reaches_only_matching_roles() {
        let hub = hub();
        let (_staff, mut staff_rx) = connect(&hub, Role::Staff).await;
        let (_admin, mut admin_rx) = connect(&hub, Role::Admin).await;
        let (_customer, mut customer_rx) = connect(&hub, Role::Customer).await;

        let conversation = Conversation::new(UserId::new(), "asia-pacific");
        let report = hub
            .publish(&StreamEvent::conversation_claimed(&conversation), &Targets::Cohort(Cohort::Staff))
            .await;

        assert_eq!(report.delivered, 2);
        assert!(next_event(&mut staff_rx).is_some());
        assert!(next_event(&mut admin_rx).is_some());
        assert!(next_event(&mut customer_rx).is_none());
    }

    #[tokio::test]
    async fn test_admin_cohort_excludes_staff() {
        let hub = hub();
        let (_staff, mut staff_rx) = connect(&hub, Role::Staff).await;
        let (admin, mut admin_rx) = connect(&hub, Role::Admin).await;

        let report = hub
            .publish(&notification("n1", admin.user_id), &Targets::Cohort(Cohort::Admins))
            .await;

        assert_eq!(report.delivered, 1);
        assert!(next_event(&mut admin_rx).is_some());
        assert!(next_event(&mut staff_rx).is_none());
    }

    #[tokio::test]
    async fn test_offline_recipient_is_counted_not_failed() {
        let hub = hub();
        let report = hub
            .publish(&notification("n1", UserId::new()), &Targets::user(UserId::new()))
            .await;

        assert_eq!(report.offline, 1);
        assert_eq!(report.delivered, 0);
    }

    #[tokio::test]
    async fn test_duplicate_publish_delivered_once() {
        let hub = hub();
        let (conn, mut rx) = connect(&hub, Role::Staff).await;
        let event = notification("ticket_reassigned:42", conn.user_id);

        hub.publish(&event, &Targets::user(conn.user_id)).await;
        let report = hub.publish(&event, &Targets::user(conn.user_id)).await;

        assert_eq!(report.duplicates, 1);
        assert!(next_event(&mut rx).is_some());
        assert!(next_event(&mut rx).is_none());
    }

    #[tokio::test]
    async fn test_dead_connection_is_evicted_on_publish() {
        let hub = hub();
        let (dead, dead_rx) = connect(&hub, Role::Staff).await;
        let (_alive, mut alive_rx) = connect(&hub, Role::Staff).await;
        drop(dead_rx);

        let conversation = Conversation::new(UserId::new(), "asia-pacific");
        let report = hub
            .publish(&StreamEvent::conversation_updated(&conversation), &Targets::Cohort(Cohort::Staff))
            .await;

        assert_eq!(report.evicted, 1);
        assert_eq!(report.delivered, 1);
        assert!(!hub.is_connected(dead.user_id).await);
        assert!(next_event(&mut alive_rx).is_some());
    }

    #[tokio::test]
    async fn test_slow_consumer_does_not_block_others() {
        let hub = BroadcastHub::new(HubConfig {
            buffer: 1,
            ..HubConfig::default()
        });
        let (tx, _slow_rx) = hub.channel();
        // Buffer is taken by the connected event and never drained
        let slow = hub.register(UserId::new(), Role::Staff, tx).await;
        let (_fast, mut fast_rx) = connect(&hub, Role::Staff).await;

        let conversation = Conversation::new(UserId::new(), "asia-pacific");
        let report = hub
            .publish(&StreamEvent::conversation_claimed(&conversation), &Targets::Cohort(Cohort::Staff))
            .await;

        assert_eq!(report.dropped, 1);
        assert_eq!(report.delivered, 1);
        assert!(hub.is_connected(slow.user_id).await);
        assert!(next_event(&mut fast_rx).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_is_sent_on_interval() {
        let hub = hub();
        let (_conn, mut rx) = connect(&hub, Role::Customer).await;

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(matches!(rx.try_recv(), Ok(HubFrame::KeepAlive)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_stream_gets_timeout_then_closes() {
        let hub = BroadcastHub::new(HubConfig {
            heartbeat_interval: Duration::from_secs(1000),
            idle_timeout: Duration::from_secs(300),
            buffer: 8,
            dedup_window: Duration::from_secs(60),
        });
        let (conn, mut rx) = connect(&hub, Role::Customer).await;

        tokio::time::sleep(Duration::from_secs(301)).await;

        match rx.recv().await {
            Some(HubFrame::Event(event)) => assert_eq!(event.kind, EventKind::Timeout),
            other => panic!("expected timeout event, got {other:?}"),
        }
        assert!(rx.recv().await.is_none());
        assert!(!hub.is_connected(conn.user_id).await);
        assert!(conn.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_pushes_back_idle_timeout() {
        let hub = BroadcastHub::new(HubConfig {
            heartbeat_interval: Duration::from_secs(1000),
            idle_timeout: Duration::from_secs(300),
            buffer: 8,
            dedup_window: Duration::from_secs(60),
        });
        let (conn, mut rx) = connect(&hub, Role::Customer).await;

        tokio::time::sleep(Duration::from_secs(200)).await;
        hub.publish(&notification("n1", conn.user_id), &Targets::user(conn.user_id))
            .await;
        tokio::time::sleep(Duration::from_secs(200)).await;

        assert!(hub.is_connected(conn.user_id).await);
        let event = next_event(&mut rx).unwrap();
        assert_eq!(event.kind, EventKind::Notification);
    }

    #[tokio::test]
    async fn test_close_all_ends_every_stream() {
        let hub = hub();
        let (_staff, mut staff_rx) = connect(&hub, Role::Staff).await;
        let (_customer, mut customer_rx) = connect(&hub, Role::Customer).await;

        assert_eq!(hub.close_all().await, 2);
        assert_eq!(hub.connection_count().await, 0);
        assert!(staff_rx.recv().await.is_none());
        assert!(customer_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_guard_drop_unregisters() {
        let hub = hub();
        let (conn, _rx) = connect(&hub, Role::Staff).await;
        let user_id = conn.user_id;

        drop(StreamGuard::new(hub.clone(), conn));
        // Closed synchronously; registry cleanup runs on a spawned task
        for _ in 0..10 {
            if !hub.is_connected(user_id).await {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!hub.is_connected(user_id).await);
    }
}
