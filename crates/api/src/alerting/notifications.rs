//! Alert notification delivery
//!
//! Sends routing alerts via Slack-compatible webhooks

use serde_json::json;

use super::{RoutingAlert, Severity};

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Webhook returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Slack webhook notifier
#[derive(Clone)]
pub struct SlackNotifier {
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            webhook_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.webhook_url.is_some()
    }

    /// Send alert to Slack
    pub async fn send_alert(&self, alert: &RoutingAlert) -> Result<(), AlertError> {
        let Some(ref webhook_url) = self.webhook_url else {
            tracing::debug!(alert_id = %alert.id, "Alert webhook not configured, skipping notification");
            return Ok(());
        };

        let emoji = match alert.severity {
            Severity::Critical => ":rotating_light:",
            Severity::High => ":warning:",
            Severity::Medium => ":large_orange_diamond:",
            Severity::Low => ":information_source:",
        };

        let color = match alert.severity {
            Severity::Critical => "#FF0000", // Red
            Severity::High => "#FFA500",     // Orange
            Severity::Medium => "#FFFF00",   // Yellow
            Severity::Low => "#00BFFF",      // Blue
        };

        let mut fields = vec![
            json!({ "title": "Severity", "value": alert.severity.as_str(), "short": true }),
            json!({ "title": "Type", "value": alert.alert_type.as_str(), "short": true }),
            json!({ "title": "Ticket", "value": alert.work_item_id.to_string(), "short": true }),
        ];
        if let Some(region) = &alert.region {
            fields.push(json!({ "title": "Region", "value": region, "short": true }));
        }
        fields.push(json!({ "title": "Description", "value": alert.description, "short": false }));

        let payload = json!({
            "text": format!("{} *Routing Alert: {}*", emoji, alert.title),
            "attachments": [{
                "color": color,
                "fields": fields,
                "footer": "Supportdesk Routing",
                "ts": alert.created_at.unix_timestamp()
            }]
        });

        let response = self.client.post(webhook_url).json(&payload).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                status = %status,
                body = %body,
                "Failed to send alert webhook"
            );
            return Err(AlertError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!(alert_id = %alert.id, alert_type = alert.alert_type.as_str(), "Sent routing alert");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::alerting::AlertType;
    use supportdesk_shared::{GroupId, WorkItemId};

    #[tokio::test]
    async fn test_alert_posted_to_webhook() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hooks/routing")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "attachments": [{ "footer": "Supportdesk Routing" }]
            })))
            .with_status(200)
            .create_async()
            .await;

        let notifier = SlackNotifier::new(Some(format!("{}/hooks/routing", server.url())));
        let alert = RoutingAlert::new(AlertType::NoEligibleAgent, WorkItemId(42), "No agent", "Group empty")
            .with_group(GroupId(3), Some("europe-zone-2"));

        notifier.send_alert(&alert).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_webhook_is_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/hooks/routing")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let notifier = SlackNotifier::new(Some(format!("{}/hooks/routing", server.url())));
        let alert = RoutingAlert::new(AlertType::BackendUnavailable, WorkItemId(1), "Down", "503");

        assert!(matches!(
            notifier.send_alert(&alert).await,
            Err(AlertError::Rejected { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_unconfigured_is_noop() {
        let notifier = SlackNotifier::new(None);
        let alert = RoutingAlert::new(AlertType::NoEligibleAgent, WorkItemId(1), "t", "d");
        assert!(notifier.send_alert(&alert).await.is_ok());
    }
}
