//! In-process ticketing backend
//!
//! Holds agents and tickets in memory. Used by tests and by local runs
//! without a ticketing system; failure switches simulate backend outages.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use supportdesk_shared::{Agent, AgentId, WorkItem, WorkItemId, WorkItemState};
use time::OffsetDateTime;
use tokio::sync::RwLock;

use super::backend::{BackendError, TicketBackend};

#[derive(Default)]
pub struct MemoryTicketBackend {
    agents: RwLock<Vec<Agent>>,
    work_items: RwLock<BTreeMap<WorkItemId, WorkItem>>,
    fail_reads: AtomicBool,
    fail_advance: AtomicBool,
    fail_set_owner: AtomicBool,
}

impl MemoryTicketBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_agent(&self, agent: Agent) {
        self.agents.write().await.push(agent);
    }

    pub async fn upsert_work_item(&self, item: WorkItem) {
        self.work_items.write().await.insert(item.id, item);
    }

    /// Current backend view of a ticket, whatever its state
    pub async fn work_item(&self, id: WorkItemId) -> Option<WorkItem> {
        self.work_items.read().await.get(&id).cloned()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_advance(&self, fail: bool) {
        self.fail_advance.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_set_owner(&self, fail: bool) {
        self.fail_set_owner.store(fail, Ordering::SeqCst);
    }

    fn unavailable() -> BackendError {
        BackendError::Status {
            status: 503,
            body: "simulated outage".to_string(),
        }
    }
}

#[async_trait]
impl TicketBackend for MemoryTicketBackend {
    async fn list_agents(&self, include_vacation: bool) -> Result<Vec<Agent>, BackendError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        let now = OffsetDateTime::now_utc();
        Ok(self
            .agents
            .read()
            .await
            .iter()
            .filter(|agent| include_vacation || !agent.on_vacation(now))
            .cloned()
            .collect())
    }

    async fn list_open_work_items(&self) -> Result<Vec<WorkItem>, BackendError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        Ok(self
            .work_items
            .read()
            .await
            .values()
            .filter(|item| item.state.is_open())
            .cloned()
            .collect())
    }

    async fn set_owner(&self, work_item: WorkItemId, agent: Option<AgentId>) -> Result<(), BackendError> {
        if self.fail_set_owner.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        let mut items = self.work_items.write().await;
        let item = items.get_mut(&work_item).ok_or(BackendError::NotFound(work_item))?;
        item.current_owner = agent;
        Ok(())
    }

    async fn advance_state(&self, work_item: WorkItemId) -> Result<(), BackendError> {
        if self.fail_advance.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        let mut items = self.work_items.write().await;
        let item = items.get_mut(&work_item).ok_or(BackendError::NotFound(work_item))?;
        if item.state == WorkItemState::New {
            item.state = WorkItemState::Open;
        }
        Ok(())
    }
}
