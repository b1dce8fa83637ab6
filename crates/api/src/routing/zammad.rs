//! Zammad REST client
//!
//! Reads agents and open tickets, writes owner/state changes. Reads are
//! retried with exponential backoff on transient failures; writes are not.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use supportdesk_shared::{
    Agent, AgentId, BackendUserId, GroupId, VacationWindow, WorkItem, WorkItemId, WorkItemState,
};
use time::{macros::format_description, Date, OffsetDateTime};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use super::backend::{BackendError, TicketBackend};

/// Zammad's placeholder owner for unassigned tickets
const UNASSIGNED_OWNER_ID: i64 = 1;
/// Built-in "Agent" role
const AGENT_ROLE_ID: i64 = 2;
const PAGE_SIZE: usize = 100;
const MAX_PAGES: usize = 50;

const RETRY_BASE_DELAY_MS: u64 = 100;
const RETRY_MAX_DELAY: Duration = Duration::from_secs(2);
const MAX_RETRIES: usize = 3;

const OPEN_STATES_QUERY: &str =
    r#"state.name:(new OR open OR "pending reminder" OR "pending close")"#;

#[derive(Clone)]
pub struct ZammadClient {
    client: Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ZammadUser {
    id: i64,
    #[serde(default)]
    firstname: String,
    #[serde(default)]
    lastname: String,
    #[serde(default)]
    email: String,
    #[serde(default = "default_true")]
    active: bool,
    #[serde(default)]
    group_ids: HashMap<String, Vec<String>>,
    #[serde(default)]
    out_of_office: bool,
    out_of_office_start_at: Option<String>,
    out_of_office_end_at: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ZammadTicket {
    id: i64,
    #[serde(default)]
    title: String,
    group_id: i64,
    owner_id: Option<i64>,
    customer_id: Option<i64>,
    state: String,
}

#[derive(Debug, Serialize)]
struct TicketUpdate<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    owner_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<&'a str>,
}

impl ZammadClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, BackendError> {
        let retry_strategy = ExponentialBackoff::from_millis(RETRY_BASE_DELAY_MS)
            .max_delay(RETRY_MAX_DELAY)
            .take(MAX_RETRIES)
            .map(jitter);

        Retry::spawn(retry_strategy, || async {
            let result = self.get_json_once(path, query).await;
            match &result {
                Ok(_) => Ok(result),
                Err(e) if e.is_transient() => {
                    tracing::debug!(path, error = %e, "Transient backend error - will retry");
                    Err(result)
                }
                Err(_) => Ok(result),
            }
        })
        .await
        .unwrap_or_else(|e| e)
    }

    async fn get_json_once<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, BackendError> {
        let response = self
            .client
            .get(self.url(path))
            .header("Authorization", format!("Token token={}", self.token))
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }

    async fn update_ticket(&self, work_item: WorkItemId, update: &TicketUpdate<'_>) -> Result<(), BackendError> {
        let response = self
            .client
            .put(self.url(&format!("tickets/{}", work_item.0)))
            .header("Authorization", format!("Token token={}", self.token))
            .json(update)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(BackendError::NotFound(work_item));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(work_item = %work_item, status = %status, body = %body, "Ticket update rejected");
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    /// Page through a search endpoint until a short page comes back
    async fn search_all<T: DeserializeOwned>(&self, path: &str, query: &str) -> Result<Vec<T>, BackendError> {
        let mut all = Vec::new();
        for page in 1..=MAX_PAGES {
            let batch: Vec<T> = self
                .get_json(
                    path,
                    &[
                        ("query", query.to_string()),
                        ("expand", "true".to_string()),
                        ("limit", PAGE_SIZE.to_string()),
                        ("page", page.to_string()),
                    ],
                )
                .await?;
            let done = batch.len() < PAGE_SIZE;
            all.extend(batch);
            if done {
                break;
            }
        }
        Ok(all)
    }
}

/// Group access levels that allow owning tickets; "read" and "overview" don't
const OWNER_ACCESS: &[&str] = &["full", "change"];

fn parse_day(raw: &str) -> Option<Date> {
    Date::parse(raw, format_description!("[year]-[month]-[day]")).ok()
}

impl From<ZammadUser> for Agent {
    fn from(user: ZammadUser) -> Self {
        // Vacation days are inclusive: the end date covers the whole day
        let vacation = if user.out_of_office {
            user.out_of_office_start_at
                .as_deref()
                .and_then(parse_day)
                .map(|start| VacationWindow {
                    start: start.midnight().assume_utc(),
                    end: user
                        .out_of_office_end_at
                        .as_deref()
                        .and_then(parse_day)
                        .map(|end| {
                            end.midnight().assume_utc() + time::Duration::days(1)
                                - time::Duration::seconds(1)
                        }),
                })
        } else {
            None
        };

        let display_name = format!("{} {}", user.firstname, user.lastname).trim().to_string();

        Agent {
            id: BackendUserId(user.id),
            display_name,
            email: user.email,
            eligible_group_ids: user
                .group_ids
                .iter()
                .filter(|(_, access)| access.iter().any(|level| OWNER_ACCESS.contains(&level.as_str())))
                .filter_map(|(key, _)| key.parse().ok().map(GroupId))
                .collect::<BTreeSet<_>>(),
            vacation,
            current_open_load: 0,
        }
    }
}

#[async_trait]
impl TicketBackend for ZammadClient {
    async fn list_agents(&self, include_vacation: bool) -> Result<Vec<Agent>, BackendError> {
        let users: Vec<ZammadUser> = self
            .search_all("users/search", &format!("role_ids:{AGENT_ROLE_ID}"))
            .await?;

        let now = OffsetDateTime::now_utc();
        Ok(users
            .into_iter()
            .filter(|user| user.active)
            .map(Agent::from)
            .filter(|agent| include_vacation || !agent.on_vacation(now))
            .collect())
    }

    async fn list_open_work_items(&self) -> Result<Vec<WorkItem>, BackendError> {
        let tickets: Vec<ZammadTicket> = self.search_all("tickets/search", OPEN_STATES_QUERY).await?;

        Ok(tickets
            .into_iter()
            .filter_map(|ticket| {
                let Some(state) = WorkItemState::from_backend(&ticket.state) else {
                    tracing::warn!(ticket_id = ticket.id, state = %ticket.state, "Skipping ticket with unknown state");
                    return None;
                };
                Some(WorkItem {
                    id: WorkItemId(ticket.id),
                    title: ticket.title,
                    group_id: GroupId(ticket.group_id),
                    current_owner: ticket
                        .owner_id
                        .filter(|owner| *owner != UNASSIGNED_OWNER_ID)
                        .map(BackendUserId),
                    customer_id: ticket.customer_id.map(BackendUserId),
                    state,
                })
            })
            .filter(|item| item.state.is_open())
            .collect())
    }

    async fn set_owner(&self, work_item: WorkItemId, agent: Option<AgentId>) -> Result<(), BackendError> {
        let update = TicketUpdate {
            owner_id: Some(agent.map_or(UNASSIGNED_OWNER_ID, |a| a.0)),
            state: None,
        };
        self.update_ticket(work_item, &update).await
    }

    async fn advance_state(&self, work_item: WorkItemId) -> Result<(), BackendError> {
        let update = TicketUpdate {
            owner_id: None,
            state: Some(WorkItemState::Open.as_str()),
        };
        self.update_ticket(work_item, &update).await
    }

    /// Owner and state travel in one request, so the backend applies both
    /// or neither.
    async fn assign_owner(&self, item: &WorkItem, agent: AgentId) -> Result<bool, BackendError> {
        let advance = item.state.is_unstarted();
        let update = TicketUpdate {
            owner_id: Some(agent.0),
            state: advance.then(|| WorkItemState::Open.as_str()),
        };
        self.update_ticket(item.id, &update).await?;
        Ok(advance)
    }
}
