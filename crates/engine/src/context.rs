// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Injected dependencies for the reconciler and sweeper (§9 DESIGN NOTES:
//! "global mutable process state → explicit context").

use chester_adapters::{
    Decryptor, Notifier, OperationPoller, OperationStatusSource, ProvisioningClient, ProxyConfigWriter,
};
use chester_core::{Clock, Sleeper};
use chester_storage::IncidentStore;
use std::sync::Arc;
use std::time::Duration;

/// Tunables with defaults matching §6 (env-configurable in the daemon).
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub network_project_id: String,
    pub network_name: String,
    pub cooldown: Duration,
    /// Cap used when an instance group has no `ChesterMetaData` row yet.
    /// An unconfigured group should not be artificially blocked from
    /// scaling, so this defaults to effectively unbounded.
    pub default_max_instances: usize,
}

impl ReconcilerConfig {
    pub fn new(network_project_id: impl Into<String>, network_name: impl Into<String>) -> Self {
        Self {
            network_project_id: network_project_id.into(),
            network_name: network_name.into(),
            cooldown: Duration::from_secs(300),
            default_max_instances: usize::MAX,
        }
    }
}

/// Every external collaborator the reconciler and sweeper depend on,
/// bundled behind trait objects so tests can swap in fakes (§4.2–§4.6).
pub struct ReconcilerContext {
    pub store: Arc<dyn IncidentStore>,
    pub provisioning: Arc<dyn ProvisioningClient>,
    /// Same underlying client as `provisioning`, exposed as the narrower
    /// port `OperationPoller::wait` needs (see `split_provisioning_backend`).
    pub operation_source: Arc<dyn OperationStatusSource>,
    pub proxy_writer: Arc<dyn ProxyConfigWriter>,
    pub notifier: Arc<dyn Notifier>,
    pub decryptor: Arc<dyn Decryptor>,
    pub poller: OperationPoller,
    pub clock: Arc<dyn Clock>,
    pub sleeper: Arc<dyn Sleeper>,
    pub config: ReconcilerConfig,
}
