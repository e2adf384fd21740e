// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized state rebuilt from WAL replay (§3.1).

use crate::wal::WalEvent;
use chester_core::{ChesterMetaData, Incident, IncidentState, ProxyConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// In-memory projection of every incident and proxy config. Rebuilt by
/// replaying [`WalEvent`]s in order; never written to directly outside of
/// `apply_event`.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MaterializedState {
    pub incidents: HashMap<String, Incident>,
    pub proxy_configs: HashMap<String, ProxyConfig>,
    pub metadata: HashMap<String, ChesterMetaData>,
}

impl MaterializedState {
    /// Apply one durable mutation. Idempotent: replaying the same event
    /// twice (as happens on crash-resume, where the last entry before a
    /// crash may already be reflected) must leave state unchanged.
    pub fn apply_event(&mut self, event: &WalEvent) {
        match event {
            WalEvent::PutIncident(incident) => {
                self.incidents.insert(incident.incident_id.clone(), incident.clone());
            }
            WalEvent::DeleteIncident { incident_id } => {
                self.incidents.remove(incident_id);
            }
            WalEvent::PutProxyConfig(config) => {
                self.proxy_configs.insert(config.instance_group.clone(), config.clone());
            }
            WalEvent::PutMetadata {
                instance_group,
                metadata,
            } => {
                self.metadata.insert(instance_group.clone(), *metadata);
            }
        }
    }

    pub fn query_incidents(&self, state: Option<IncidentState>) -> Vec<Incident> {
        self.incidents
            .values()
            .filter(|i| state.map(|s| i.state == s).unwrap_or(true))
            .cloned()
            .collect()
    }
}
