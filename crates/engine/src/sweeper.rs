// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Boot-time reclassification of open/closed incidents by age (§4.7).

use chester_adapters::{EventError, EventPublisher};
use chester_core::{Clock, Incident, IncidentState};
use chester_storage::{IncidentStore, StoreError};
use std::sync::Arc;

const STALE_AFTER_SECS: u64 = 3 * 60 * 60;

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("publish error: {0}")]
    Publish(#[from] EventError),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub closed: usize,
    pub republished: usize,
}

pub struct StartupSweeper {
    store: Arc<dyn IncidentStore>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl StartupSweeper {
    pub fn new(store: Arc<dyn IncidentStore>, publisher: Arc<dyn EventPublisher>, clock: Arc<dyn Clock>) -> Self {
        Self { store, publisher, clock }
    }

    /// Runs once, before ingestion starts (§4.7). Any `open` incident older
    /// than 3 hours is treated as abandoned and deleted alongside the
    /// already-`closed` set; the rest are republished so the reconciler
    /// resumes them at their persisted `LastProcess`.
    pub async fn run(&self) -> Result<SweepReport, SweepError> {
        let now = self.clock.epoch_secs();
        let mut to_close: Vec<Incident> = self.store.query_incidents(Some(IncidentState::Closed))?;
        let open = self.store.query_incidents(Some(IncidentState::Open))?;

        let mut runnable = Vec::new();
        for incident in open {
            if incident.age_secs(now) > STALE_AFTER_SECS {
                to_close.push(incident);
            } else {
                runnable.push(incident);
            }
        }

        let mut report = SweepReport::default();
        for incident in &to_close {
            self.store.delete_incident(&incident.incident_id)?;
            report.closed += 1;
        }
        for incident in &runnable {
            self.publisher.publish(incident).await?;
            report.republished += 1;
        }

        tracing::info!(closed = report.closed, republished = report.republished, "startup sweep complete");
        Ok(report)
    }
}
