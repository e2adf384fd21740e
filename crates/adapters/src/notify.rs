// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Webhook notification adapter (§6, §2.2).

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// One incident-lifecycle notification (§7: "every significant transition
/// emits a webhook notification with `IncidentID`, database name, and project").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub incident_id: String,
    pub sql_master_instance: String,
    pub project: String,
    pub message: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Posts notifications to a webhook URL assembled from three env-provided
/// segments (§2.2), keeping the transport agnostic to any particular chat
/// platform's URL shape while matching a Slack-incoming-webhook layout.
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(http: reqwest::Client, first_segment: &str, second_segment: &str, third_segment: &str) -> Self {
        let url = format!("https://hooks.slack.com/services/{first_segment}/{second_segment}/{third_segment}");
        Self { http, url }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let body = serde_json::json!({
            "text": format!(
                "[{}] {} (project={}): {}",
                notification.incident_id,
                notification.sql_master_instance,
                notification.project,
                notification.message
            ),
        });
        let resp = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::SendFailed(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(NotifyError::SendFailed(format!("webhook returned {}", resp.status())));
        }
        Ok(())
    }
}

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::{NotifyError, Notification, Notifier};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct FakeNotifierState {
        calls: Vec<Notification>,
    }

    #[derive(Clone)]
    pub struct FakeNotifier {
        inner: Arc<Mutex<FakeNotifierState>>,
    }

    impl Default for FakeNotifier {
        fn default() -> Self {
            Self {
                inner: Arc::new(Mutex::new(FakeNotifierState { calls: Vec::new() })),
            }
        }
    }

    impl FakeNotifier {
        pub fn calls(&self) -> Vec<Notification> {
            self.inner.lock().calls.clone()
        }
    }

    #[async_trait]
    impl Notifier for FakeNotifier {
        async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.inner.lock().calls.push(notification.clone());
            Ok(())
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeNotifier;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Notification {
        Notification {
            incident_id: "i1".to_string(),
            sql_master_instance: "db-a".to_string(),
            project: "proj".to_string(),
            message: "scale-up received".to_string(),
        }
    }

    #[tokio::test]
    async fn fake_notifier_records_calls() {
        let notifier = FakeNotifier::default();
        notifier.notify(&sample()).await.unwrap();
        let calls = notifier.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].incident_id, "i1");
    }

    #[test]
    fn webhook_url_is_assembled_from_three_segments() {
        let notifier = WebhookNotifier::new(reqwest::Client::new(), "T000", "B111", "tok222");
        assert_eq!(notifier.url, "https://hooks.slack.com/services/T000/B111/tok222");
    }
}
