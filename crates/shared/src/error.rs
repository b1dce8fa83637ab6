//! Error types for Supportdesk

use thiserror::Error;

use crate::types::{ConversationId, UserId, WorkItemId};

/// Failures of the routing, claim and broadcast engine.
///
/// `NoEligibleAgent` is not listed here: it is a valid assignment outcome and
/// travels as a result value, never as an error.
#[derive(Debug, Error)]
pub enum DeskError {
    #[error("Unknown region: {0}")]
    UnknownRegion(String),

    #[error("Conversation {conversation_id} is already claimed by {staff_id}")]
    AlreadyClaimed {
        conversation_id: ConversationId,
        staff_id: UserId,
    },

    #[error("Ticketing backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Connection dead for user {0}")]
    ConnectionDead(UserId),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(ConversationId),

    #[error("Work item not found or not open: {0}")]
    WorkItemNotFound(WorkItemId),

    #[error("Not allowed: {0}")]
    Forbidden(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Concurrent modification: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

pub type DeskResult<T> = Result<T, DeskError>;
