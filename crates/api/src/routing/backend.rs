//! Ticketing backend interface
//!
//! The router reads agents and open tickets from the backend and writes
//! ownership and state changes back to it.

use async_trait::async_trait;
use supportdesk_shared::{Agent, AgentId, DeskError, WorkItem, WorkItemId};
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Unexpected backend response: {0}")]
    InvalidResponse(String),
    #[error("Work item not found: {0}")]
    NotFound(WorkItemId),
    #[error("Work item {work_item} left partially updated: {reason}")]
    PartialWrite { work_item: WorkItemId, reason: String },
}

impl BackendError {
    /// Network failures and 5xx responses are worth another read attempt
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            BackendError::Status { status, .. } => *status >= 500 || *status == 429,
            BackendError::InvalidResponse(_)
            | BackendError::NotFound(_)
            | BackendError::PartialWrite { .. } => false,
        }
    }
}

impl From<BackendError> for DeskError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound(id) => DeskError::WorkItemNotFound(id),
            other => DeskError::BackendUnavailable(other.to_string()),
        }
    }
}

#[async_trait]
pub trait TicketBackend: Send + Sync {
    /// Every agent; `include_vacation = false` drops those currently away
    async fn list_agents(&self, include_vacation: bool) -> Result<Vec<Agent>, BackendError>;

    /// Live snapshot of tickets in an open-ish state
    async fn list_open_work_items(&self) -> Result<Vec<WorkItem>, BackendError>;

    /// `None` returns the ticket to the unassigned pool
    async fn set_owner(&self, work_item: WorkItemId, agent: Option<AgentId>) -> Result<(), BackendError>;

    /// Move an unstarted ticket to "open"
    async fn advance_state(&self, work_item: WorkItemId) -> Result<(), BackendError>;

    /// Give `item` to `agent`, advancing it out of "new" in the same logical
    /// step. Returns whether the state was advanced.
    ///
    /// If the advance fails the previous owner is restored, so the ticket is
    /// never left owned while still new.
    async fn assign_owner(&self, item: &WorkItem, agent: AgentId) -> Result<bool, BackendError> {
        self.set_owner(item.id, Some(agent)).await?;

        if !item.state.is_unstarted() {
            return Ok(false);
        }

        if let Err(advance_err) = self.advance_state(item.id).await {
            error!(
                work_item = %item.id,
                agent_id = %agent,
                error = %advance_err,
                "State advance failed, restoring previous owner"
            );
            if let Err(rollback_err) = self.set_owner(item.id, item.current_owner).await {
                error!(
                    work_item = %item.id,
                    error = %rollback_err,
                    "Owner rollback failed"
                );
                return Err(BackendError::PartialWrite {
                    work_item: item.id,
                    reason: format!(
                        "state advance failed ({advance_err}) and owner rollback failed ({rollback_err})"
                    ),
                });
            }
            return Err(advance_err);
        }

        Ok(true)
    }
}
