// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shapes exchanged with the provisioning collaborator (§4.4). Kept in
//! `chester-core` because the reconciler reasons about them directly, even
//! though the HTTP client that produces them lives in `chester-adapters`.

use std::collections::HashMap;

/// A daemon-owned (or primary) database instance as returned by the
/// provisioning API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaInstance {
    pub name: String,
    pub private_ip: Option<String>,
    pub public_ip: Option<String>,
}

impl ReplicaInstance {
    /// Extract the private address: the first entry whose type tag is
    /// `PRIVATE` (§4.4 helper). Modeled directly, not via an address list,
    /// since that's the only shape the reconciler needs.
    pub fn private_ip(&self) -> Option<&str> {
        self.private_ip.as_deref()
    }
}

/// The primary's settings, fetched before creating a replica so the new
/// instance inherits region/tier/disk/flags/labels (§4.1.1 DaemonAck).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PrimaryInstance {
    pub name: String,
    pub region: String,
    pub tier: String,
    pub data_disk_size_gb: i64,
    pub database_flags: Vec<(String, String)>,
    pub user_labels: HashMap<String, String>,
}
