//! Load-aware assignment engine
//!
//! Picks the eligible, available agent with the fewest open tickets. Load is
//! computed from a fresh backend snapshot on every call and never cached.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use supportdesk_shared::{Agent, AgentId, DeskError, GroupId, WorkItem, WorkItemId};
use time::OffsetDateTime;

use super::backend::TicketBackend;
use super::eligibility::{eligible_agents, partition};

/// Outcome of a routing decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AssignmentResult {
    Assigned {
        work_item_id: WorkItemId,
        agent_id: AgentId,
        previous_owner: Option<AgentId>,
        /// Whether the ticket moved out of "new" with this assignment
        advanced: bool,
        open_load: u32,
    },
    /// The least-loaded agent already owns the ticket; nothing was written
    AlreadyAssigned {
        work_item_id: WorkItemId,
        agent_id: AgentId,
    },
    /// Nobody can take the ticket. Must be escalated, never retried silently.
    NoEligibleAgent {
        work_item_id: WorkItemId,
        group_id: GroupId,
        unavailable_agents: usize,
    },
}

#[derive(Clone)]
pub struct AssignmentEngine {
    backend: Arc<dyn TicketBackend>,
}

impl AssignmentEngine {
    pub fn new(backend: Arc<dyn TicketBackend>) -> Self {
        Self { backend }
    }

    pub async fn assign(&self, work_item_id: WorkItemId) -> Result<(WorkItem, AssignmentResult), DeskError> {
        self.assign_at(work_item_id, OffsetDateTime::now_utc()).await
    }

    /// Route `work_item_id` as of `now`. Returns the pre-assignment view of
    /// the ticket alongside the decision.
    pub async fn assign_at(
        &self,
        work_item_id: WorkItemId,
        now: OffsetDateTime,
    ) -> Result<(WorkItem, AssignmentResult), DeskError> {
        let (work_items, roster) = tokio::try_join!(
            self.backend.list_open_work_items(),
            self.backend.list_agents(true),
        )?;

        let item = work_items
            .iter()
            .find(|item| item.id == work_item_id)
            .cloned()
            .ok_or(DeskError::WorkItemNotFound(work_item_id))?;

        let loads = open_load_by_owner(&work_items, work_item_id);
        let roster: Vec<Agent> = roster
            .into_iter()
            .map(|mut agent| {
                agent.current_open_load = loads.get(&agent.id).copied().unwrap_or(0);
                agent
            })
            .collect();

        let (available, unavailable) = partition(eligible_agents(&roster, item.group_id, now));

        let Some(chosen) = select_least_loaded(&available) else {
            tracing::warn!(
                work_item = %work_item_id,
                group_id = %item.group_id,
                unavailable = unavailable.len(),
                "No eligible agent available for work item"
            );
            let result = AssignmentResult::NoEligibleAgent {
                work_item_id,
                group_id: item.group_id,
                unavailable_agents: unavailable.len(),
            };
            return Ok((item, result));
        };

        if item.current_owner == Some(chosen.id) {
            tracing::debug!(
                work_item = %work_item_id,
                agent_id = %chosen.id,
                "Work item already owned by least-loaded agent"
            );
            let result = AssignmentResult::AlreadyAssigned {
                work_item_id,
                agent_id: chosen.id,
            };
            return Ok((item, result));
        }

        let advanced = self.backend.assign_owner(&item, chosen.id).await?;

        tracing::info!(
            work_item = %work_item_id,
            agent_id = %chosen.id,
            previous_owner = ?item.current_owner,
            open_load = chosen.current_open_load,
            advanced,
            "Work item assigned"
        );

        let result = AssignmentResult::Assigned {
            work_item_id,
            agent_id: chosen.id,
            previous_owner: item.current_owner,
            advanced,
            open_load: chosen.current_open_load,
        };
        Ok((item, result))
    }
}

/// Count open tickets per owner, leaving out the ticket being routed so its
/// current owner is not penalised for holding it.
pub fn open_load_by_owner(work_items: &[WorkItem], routing: WorkItemId) -> HashMap<AgentId, u32> {
    let mut loads = HashMap::new();
    for item in work_items {
        if item.id == routing || !item.state.is_open() {
            continue;
        }
        if let Some(owner) = item.current_owner {
            *loads.entry(owner).or_insert(0) += 1;
        }
    }
    loads
}

/// argmin over open load; ties go to the lowest agent id
pub fn select_least_loaded(available: &[Agent]) -> Option<&Agent> {
    available
        .iter()
        .min_by_key(|agent| (agent.current_open_load, agent.id))
}
