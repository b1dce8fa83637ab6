//! Common types used across Supportdesk

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// ID Wrappers
// =============================================================================

/// Local user ID wrapper (portal accounts: customers, staff, admins)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Conversation ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub Uuid);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ConversationId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// User identifier inside the ticketing backend (agents and customers alike)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendUserId(pub i64);

impl fmt::Display for BackendUserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Agents are backend users with a staff role.
pub type AgentId = BackendUserId;

/// Backend group (work queue) identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub i64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Backend ticket identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItemId(pub i64);

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// Roles & Actors
// =============================================================================

/// Portal role of an authenticated user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Staff,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Staff => "staff",
            Role::Admin => "admin",
        }
    }

    /// Staff and admins both work the support queue.
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Staff | Role::Admin)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "customer" => Some(Role::Customer),
            "staff" => Some(Role::Staff),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// The user performing an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }
}

// =============================================================================
// Routing
// =============================================================================

/// A business service territory bound to one backend group
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub code: String,
    pub backend_group_id: GroupId,
}

/// Out-of-office window. A window without `end` never lapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VacationWindow {
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub end: Option<OffsetDateTime>,
}

impl VacationWindow {
    pub fn covers(&self, at: OffsetDateTime) -> bool {
        at >= self.start && self.end.map_or(true, |end| at <= end)
    }
}

/// A support agent as seen by the router
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub display_name: String,
    pub email: String,
    pub eligible_group_ids: BTreeSet<GroupId>,
    pub vacation: Option<VacationWindow>,
    /// Derived per routing decision, never persisted
    #[serde(default)]
    pub current_open_load: u32,
}

impl Agent {
    pub fn on_vacation(&self, at: OffsetDateTime) -> bool {
        self.vacation.map_or(false, |v| v.covers(at))
    }
}

/// Backend ticket state, as named by the ticketing system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemState {
    New,
    Open,
    PendingReminder,
    PendingClose,
    Closed,
    Merged,
    Removed,
}

impl WorkItemState {
    /// Name used by the ticketing backend
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkItemState::New => "new",
            WorkItemState::Open => "open",
            WorkItemState::PendingReminder => "pending reminder",
            WorkItemState::PendingClose => "pending close",
            WorkItemState::Closed => "closed",
            WorkItemState::Merged => "merged",
            WorkItemState::Removed => "removed",
        }
    }

    pub fn from_backend(name: &str) -> Option<Self> {
        match name {
            "new" => Some(WorkItemState::New),
            "open" => Some(WorkItemState::Open),
            "pending reminder" => Some(WorkItemState::PendingReminder),
            "pending close" => Some(WorkItemState::PendingClose),
            "closed" => Some(WorkItemState::Closed),
            "merged" => Some(WorkItemState::Merged),
            "removed" => Some(WorkItemState::Removed),
            _ => None,
        }
    }

    /// States that count toward an agent's open load
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            WorkItemState::New
                | WorkItemState::Open
                | WorkItemState::PendingReminder
                | WorkItemState::PendingClose
        )
    }

    pub fn is_unstarted(&self) -> bool {
        matches!(self, WorkItemState::New)
    }
}

/// A ticket awaiting (re)assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkItemId,
    pub title: String,
    pub group_id: GroupId,
    pub current_owner: Option<AgentId>,
    pub customer_id: Option<BackendUserId>,
    pub state: WorkItemState,
}

// =============================================================================
// Conversations
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Waiting,
    Active,
    Closed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Waiting => "waiting",
            ConversationStatus::Active => "active",
            ConversationStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(ConversationStatus::Waiting),
            "active" => Some(ConversationStatus::Active),
            "closed" => Some(ConversationStatus::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationMode {
    Ai,
    Human,
}

impl ConversationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationMode::Ai => "ai",
            ConversationMode::Human => "human",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ai" => Some(ConversationMode::Ai),
            "human" => Some(ConversationMode::Human),
            _ => None,
        }
    }
}

/// A live chat between a customer and (eventually) a staff member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub customer_id: UserId,
    pub staff_id: Option<UserId>,
    pub status: ConversationStatus,
    pub mode: ConversationMode,
    pub region: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub rating_submitted_at: Option<OffsetDateTime>,
    pub rating_score: Option<i16>,
    pub rating_comment: Option<String>,
    /// Record version, bumped on every successful write
    pub version: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Conversation {
    /// A fresh conversation as the customer-facing flow creates it
    pub fn new(customer_id: UserId, region: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: ConversationId::new(),
            customer_id,
            staff_id: None,
            status: ConversationStatus::Waiting,
            mode: ConversationMode::Ai,
            region: region.into(),
            rating_submitted_at: None,
            rating_score: None,
            rating_comment: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Customer owner, or any staff/admin while a human handles the chat
    pub fn is_participant(&self, actor: &Actor) -> bool {
        if actor.user_id == self.customer_id {
            return true;
        }
        self.mode == ConversationMode::Human && actor.role.is_staff()
    }
}

// =============================================================================
// Notifications
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    TicketReassigned,
    TicketReplied,
    RoutingFailed,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::TicketReassigned => "ticket_reassigned",
            NotificationType::TicketReplied => "ticket_replied",
            NotificationType::RoutingFailed => "routing_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ticket_reassigned" => Some(NotificationType::TicketReassigned),
            "ticket_replied" => Some(NotificationType::TicketReplied),
            "routing_failed" => Some(NotificationType::RoutingFailed),
            _ => None,
        }
    }
}

/// A user-visible notification. `id` is stable for the underlying event so
/// live delivery and later polling can be de-duplicated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub recipient_user_id: UserId,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_open_ended_vacation_never_lapses() {
        let window = VacationWindow {
            start: datetime!(2024-01-01 0:00 UTC),
            end: None,
        };
        assert!(!window.covers(datetime!(2023-12-31 23:59 UTC)));
        assert!(window.covers(datetime!(2024-01-01 0:00 UTC)));
        assert!(window.covers(datetime!(2099-06-01 12:00 UTC)));
    }

    #[test]
    fn test_bounded_vacation_is_inclusive() {
        let window = VacationWindow {
            start: datetime!(2024-03-01 0:00 UTC),
            end: Some(datetime!(2024-03-10 0:00 UTC)),
        };
        assert!(window.covers(datetime!(2024-03-10 0:00 UTC)));
        assert!(!window.covers(datetime!(2024-03-10 0:01 UTC)));
    }

    #[test]
    fn test_open_states() {
        assert!(WorkItemState::New.is_open());
        assert!(WorkItemState::PendingClose.is_open());
        assert!(!WorkItemState::Closed.is_open());
        assert!(!WorkItemState::Merged.is_open());
        assert_eq!(
            WorkItemState::from_backend("pending reminder"),
            Some(WorkItemState::PendingReminder)
        );
        assert_eq!(WorkItemState::from_backend("archived"), None);
    }

    #[test]
    fn test_participant_rule() {
        let customer = UserId::new();
        let mut conversation = Conversation::new(customer, "asia-pacific");
        let staff = Actor::new(UserId::new(), Role::Staff);

        assert!(conversation.is_participant(&Actor::new(customer, Role::Customer)));
        // AI mode: staff are not participants yet
        assert!(!conversation.is_participant(&staff));

        conversation.mode = ConversationMode::Human;
        assert!(conversation.is_participant(&staff));
        assert!(!conversation.is_participant(&Actor::new(UserId::new(), Role::Customer)));
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), r#""admin""#);
        assert!(Role::Admin.is_staff());
        assert!(!Role::Customer.is_staff());
    }
}
