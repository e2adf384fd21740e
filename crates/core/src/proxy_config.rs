// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Proxy routing configuration model (§3).

use serde::{Deserialize, Serialize};

/// Comment tag applied to every routing entry the daemon adds. ProxyConfig
/// entries carrying this tag are the only ones the daemon may remove (§3
/// invariants).
pub const ADDED_BY_CHESTER: &str = "added-by-chester";

/// One backend entry in the proxy's routing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySqlServer {
    pub address: String,
    pub port: u16,
    pub hostgroup: i32,
    pub max_connections: u32,
    pub use_ssl: bool,
    pub comment: String,
}

impl ProxySqlServer {
    /// Build a routing entry the way the daemon creates one: fixed port
    /// 3306, max 100 connections, tagged as daemon-owned (§4.1.1 InstanceInsert).
    pub fn daemon_owned(address: impl Into<String>, hostgroup: i32, use_ssl: bool) -> Self {
        Self {
            address: address.into(),
            port: 3306,
            hostgroup,
            max_connections: 100,
            use_ssl,
            comment: ADDED_BY_CHESTER.to_string(),
        }
    }

    pub fn is_daemon_owned(&self) -> bool {
        self.comment == ADDED_BY_CHESTER
    }
}

/// Routing config for one instance group (§3), keyed by instance-group name
/// in the store. Credential material is held encrypted and decrypted only
/// when rendering (§4.5).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub instance_group: String,
    #[serde(default)]
    pub mysql_servers: Vec<ProxySqlServer>,
    pub read_host_group: i32,
    pub write_host_group: i32,
    pub use_ssl: bool,
    pub username: String,
    /// Ciphertext from the key-management collaborator; never decrypted at rest.
    pub encrypted_password: Vec<u8>,
}

impl ProxyConfig {
    pub fn new(instance_group: impl Into<String>) -> Self {
        Self {
            instance_group: instance_group.into(),
            mysql_servers: Vec::new(),
            read_host_group: 1,
            write_host_group: 0,
            use_ssl: true,
            username: String::new(),
            encrypted_password: Vec::new(),
        }
    }

    /// Append a daemon-owned read replica entry (§4.1.1 InstanceInsert).
    pub fn add_read_replica(&mut self, address: impl Into<String>) {
        self.mysql_servers.push(ProxySqlServer::daemon_owned(
            address,
            self.read_host_group,
            self.use_ssl,
        ));
    }

    /// Remove the entry bound to `address`, preserving order of the rest
    /// (§8 property 7: "config removal selects by IP").
    pub fn remove_by_address(&mut self, address: &str) {
        self.mysql_servers.retain(|s| s.address != address);
    }
}

/// Per-instance-group tuning (§3). Stored as a child of the proxy config key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChesterMetaData {
    pub max_chester_instances: usize,
}
