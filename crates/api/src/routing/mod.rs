//! Ticket routing
//!
//! Chooses an owner for a ticket from the agents serving the ticket's
//! group and writes the decision back to the ticketing backend:
//! - **Eligibility**: group membership and vacation availability
//! - **Assignment**: least open load wins, ties by lowest agent id
//! - **Backend**: the ticketing system seam, with a REST client and an
//!   in-memory double
//!
//! Failures that leave a ticket unowned are escalated to admins.

mod assignment;
mod backend;
mod eligibility;
mod memory;
mod zammad;

use std::sync::Arc;

use supportdesk_shared::{DeskError, WorkItem, WorkItemId};
use time::OffsetDateTime;

pub use assignment::{open_load_by_owner, select_least_loaded, AssignmentEngine, AssignmentResult};
pub use backend::{BackendError, TicketBackend};
pub use eligibility::{eligible_agents, partition, EligibleAgent};
pub use memory::MemoryTicketBackend;
pub use zammad::ZammadClient;

use crate::alerting::{AlertType, RoutingAlert, SlackNotifier};
use crate::notifications::{DomainEvent, NotificationFanout};
use crate::regions::RegionDirectory;

/// Assignment plus everything that must happen around it
#[derive(Clone)]
pub struct RoutingService {
    engine: AssignmentEngine,
    fanout: NotificationFanout,
    alerts: SlackNotifier,
    regions: Arc<RegionDirectory>,
}

impl RoutingService {
    pub fn new(
        backend: Arc<dyn TicketBackend>,
        fanout: NotificationFanout,
        alerts: SlackNotifier,
        regions: Arc<RegionDirectory>,
    ) -> Self {
        Self {
            engine: AssignmentEngine::new(backend),
            fanout,
            alerts,
            regions,
        }
    }

    /// Route a ticket. `NoEligibleAgent` comes back as a result after the
    /// admins have been told; backend failures are escalated and returned.
    pub async fn assign(&self, work_item_id: WorkItemId) -> Result<AssignmentResult, DeskError> {
        let (item, result) = match self.engine.assign(work_item_id).await {
            Ok(outcome) => outcome,
            Err(DeskError::BackendUnavailable(reason)) => {
                tracing::error!(work_item = %work_item_id, reason = %reason, "Assignment failed on backend");
                self.alert(
                    RoutingAlert::new(
                        AlertType::BackendUnavailable,
                        work_item_id,
                        format!("Assignment of ticket #{work_item_id} failed"),
                        reason.clone(),
                    ),
                )
                .await;
                return Err(DeskError::BackendUnavailable(reason));
            }
            Err(other) => return Err(other),
        };

        match &result {
            AssignmentResult::Assigned {
                agent_id,
                previous_owner: Some(previous_owner),
                ..
            } if previous_owner != agent_id => {
                let event = DomainEvent::TicketReassigned {
                    work_item_id,
                    title: item.title.clone(),
                    previous_owner: *previous_owner,
                    new_owner: *agent_id,
                    reassigned_at: OffsetDateTime::now_utc(),
                };
                if let Err(e) = self.fanout.deliver(&event).await {
                    tracing::error!(work_item = %work_item_id, error = %e, "Failed to notify previous owner");
                }
            }
            AssignmentResult::NoEligibleAgent {
                group_id,
                unavailable_agents,
                ..
            } => {
                self.escalate_unroutable(&item, *unavailable_agents).await;
                tracing::warn!(work_item = %work_item_id, group_id = %group_id, "Escalated unroutable ticket");
            }
            _ => {}
        }

        Ok(result)
    }

    async fn escalate_unroutable(&self, item: &WorkItem, unavailable_agents: usize) {
        let region = self.regions.region_for(item.group_id).map(|r| r.code.clone());
        let reason = if unavailable_agents == 0 {
            "no agents serve this group".to_string()
        } else {
            format!("all {unavailable_agents} agents serving this group are on vacation")
        };

        let event = DomainEvent::RoutingFailed {
            work_item_id: item.id,
            title: item.title.clone(),
            group_id: item.group_id,
            region: region.clone(),
            reason: reason.clone(),
            occurred_at: OffsetDateTime::now_utc(),
        };
        if let Err(e) = self.fanout.deliver(&event).await {
            tracing::error!(work_item = %item.id, error = %e, "Failed to notify admins of unroutable ticket");
        }

        self.alert(
            RoutingAlert::new(
                AlertType::NoEligibleAgent,
                item.id,
                format!("Ticket #{} has no eligible agent", item.id),
                reason,
            )
            .with_group(item.group_id, region.as_deref())
            .with_metadata(serde_json::json!({ "unavailable_agents": unavailable_agents })),
        )
        .await;
    }

    async fn alert(&self, alert: RoutingAlert) {
        if let Err(e) = self.alerts.send_alert(&alert).await {
            tracing::error!(alert_id = %alert.id, error = %e, "Failed to send routing alert");
        }
    }
}
