//! Routing alerts
//!
//! Escalations that must reach a human when the router cannot place a
//! ticket on its own:
//! - No eligible agent in the ticket's group
//! - Ticketing backend failed during assignment, including writes that
//!   could not be rolled back

use serde::{Deserialize, Serialize};
use serde_json::Value;
use supportdesk_shared::{GroupId, WorkItemId};
use time::OffsetDateTime;
use uuid::Uuid;

mod notifications;

pub use notifications::{AlertError, SlackNotifier};

/// Alert type classification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    NoEligibleAgent,
    BackendUnavailable,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoEligibleAgent => "no_eligible_agent",
            Self::BackendUnavailable => "backend_unavailable",
        }
    }
}

/// Alert severity level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingAlert {
    pub id: Uuid,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub work_item_id: WorkItemId,
    pub group_id: Option<GroupId>,
    pub region: Option<String>,
    pub title: String,
    pub description: String,
    pub metadata: Value,
    pub created_at: OffsetDateTime,
}

impl RoutingAlert {
    pub fn new(alert_type: AlertType, work_item_id: WorkItemId, title: impl Into<String>, description: impl Into<String>) -> Self {
        let severity = match alert_type {
            AlertType::NoEligibleAgent => Severity::High,
            AlertType::BackendUnavailable => Severity::Medium,
        };
        Self {
            id: Uuid::new_v4(),
            alert_type,
            severity,
            work_item_id,
            group_id: None,
            region: None,
            title: title.into(),
            description: description.into(),
            metadata: Value::Null,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn with_group(mut self, group_id: GroupId, region: Option<&str>) -> Self {
        self.group_id = Some(group_id);
        self.region = region.map(str::to_string);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}
