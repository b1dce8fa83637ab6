//! Staff eligibility filter
//!
//! Narrows the agent roster to the members of a target group and tags each
//! one with whether they can take work right now.

use serde::Serialize;
use supportdesk_shared::{Agent, GroupId};
use time::OffsetDateTime;

/// An agent allowed to receive work for the group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EligibleAgent {
    pub agent: Agent,
    pub available: bool,
}

/// Filter `roster` down to members of `group_id`, as of `now`.
///
/// An empty result is a valid outcome; deciding what to do about it is the
/// caller's job.
pub fn eligible_agents(roster: &[Agent], group_id: GroupId, now: OffsetDateTime) -> Vec<EligibleAgent> {
    roster
        .iter()
        .filter(|agent| agent.eligible_group_ids.contains(&group_id))
        .map(|agent| EligibleAgent {
            agent: agent.clone(),
            available: !agent.on_vacation(now),
        })
        .collect()
}

/// Split the filter output into (available, unavailable)
pub fn partition(eligible: Vec<EligibleAgent>) -> (Vec<Agent>, Vec<Agent>) {
    let (available, unavailable): (Vec<_>, Vec<_>) =
        eligible.into_iter().partition(|entry| entry.available);
    (
        available.into_iter().map(|entry| entry.agent).collect(),
        unavailable.into_iter().map(|entry| entry.agent).collect(),
    )
}
