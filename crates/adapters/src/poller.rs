// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Polls a provisioning operation to completion (§4.3).

use async_trait::async_trait;
use chester_core::Sleeper;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum PollError {
    #[error("operation {operation_id} failed: {message}")]
    OperationFailed { operation_id: String, message: String },
    #[error("operation {operation_id} did not reach DONE within {timeout_secs}s")]
    Timeout { operation_id: String, timeout_secs: u64 },
    #[error("transport error polling {1}: {0}")]
    Transport(String, String),
}

/// One poll of the cloud provider's operations endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Done { errors: Vec<String> },
}

/// Fetches the current status of a single operation. Implemented by the
/// provisioning adapter; kept separate from [`ProvisioningClient`] so the
/// poller can be unit-tested against a bare status source.
///
/// [`ProvisioningClient`]: crate::provisioning::ProvisioningClient
#[async_trait]
pub trait OperationStatusSource: Send + Sync {
    async fn poll_status(&self, operation_id: &str) -> Result<OperationStatus, String>;
}

/// Polls an operation every 5s until `DONE`, bounded by an overall timeout
/// (§4.3, §9 REDESIGN FLAGS — the original poll had no such bound).
pub struct OperationPoller {
    sleeper: Arc<dyn Sleeper>,
    timeout: Duration,
}

impl OperationPoller {
    pub fn new(sleeper: Arc<dyn Sleeper>, timeout: Duration) -> Self {
        Self { sleeper, timeout }
    }

    pub async fn wait(
        &self,
        source: &dyn OperationStatusSource,
        operation_id: &str,
    ) -> Result<(), PollError> {
        let mut elapsed = Duration::ZERO;
        loop {
            match source.poll_status(operation_id).await {
                Ok(OperationStatus::Done { errors }) if errors.is_empty() => return Ok(()),
                Ok(OperationStatus::Done { errors }) => {
                    return Err(PollError::OperationFailed {
                        operation_id: operation_id.to_string(),
                        message: errors.join(", "),
                    })
                }
                Ok(OperationStatus::Pending) => {}
                Err(e) => {
                    return Err(PollError::Transport(e, operation_id.to_string()));
                }
            }

            if elapsed >= self.timeout {
                return Err(PollError::Timeout {
                    operation_id: operation_id.to_string(),
                    timeout_secs: self.timeout.as_secs(),
                });
            }
            self.sleeper.sleep(POLL_INTERVAL).await;
            elapsed += POLL_INTERVAL;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chester_core::FakeSleeper;
    use parking_lot::Mutex;

    struct ScriptedSource {
        responses: Mutex<Vec<Result<OperationStatus, String>>>,
    }

    #[async_trait]
    impl OperationStatusSource for ScriptedSource {
        async fn poll_status(&self, _operation_id: &str) -> Result<OperationStatus, String> {
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                Ok(OperationStatus::Pending)
            } else {
                responses.remove(0)
            }
        }
    }

    #[tokio::test]
    async fn wait_returns_ok_on_done_with_no_errors() {
        let source = ScriptedSource {
            responses: Mutex::new(vec![
                Ok(OperationStatus::Pending),
                Ok(OperationStatus::Done { errors: vec![] }),
            ]),
        };
        let sleeper = Arc::new(FakeSleeper::default());
        let poller = OperationPoller::new(sleeper.clone(), Duration::from_secs(1800));

        poller.wait(&source, "op-1").await.unwrap();
        assert_eq!(sleeper.sleep_count(), 1);
    }

    #[tokio::test]
    async fn wait_surfaces_embedded_operation_errors() {
        let source = ScriptedSource {
            responses: Mutex::new(vec![Ok(OperationStatus::Done {
                errors: vec!["disk full".to_string(), "quota exceeded".to_string()],
            })]),
        };
        let sleeper = Arc::new(FakeSleeper::default());
        let poller = OperationPoller::new(sleeper, Duration::from_secs(1800));

        let err = poller.wait(&source, "op-1").await.unwrap_err();
        assert!(matches!(err, PollError::OperationFailed { .. }));
        assert!(err.to_string().contains("disk full"));
    }

    #[tokio::test]
    async fn wait_times_out_without_blocking_real_time() {
        let source = ScriptedSource {
            responses: Mutex::new(Vec::new()),
        };
        let sleeper = Arc::new(FakeSleeper::default());
        let poller = OperationPoller::new(sleeper.clone(), Duration::from_secs(10));

        let err = poller.wait(&source, "op-1").await.unwrap_err();
        assert!(matches!(err, PollError::Timeout { .. }));
        // Never actually slept 10 real seconds; the fake recorded 5s ticks.
        assert!(sleeper.sleep_count() >= 2);
    }
}
