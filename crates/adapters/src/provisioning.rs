// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Provisioning collaborator: creates/deletes read replicas and looks up
//! instance metadata (§4.4).

use crate::poller::{OperationStatus, OperationStatusSource};
use async_trait::async_trait;
use chester_core::{PrimaryInstance, ReplicaInstance, Sleeper};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const CONFLICT_RETRY_ATTEMPTS: u32 = 120;
const CONFLICT_RETRY_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("instance not found: {0}")]
    NotFound(String),
    #[error("provisioning API error: {0}")]
    Api(String),
    #[error("gave up retrying {operation} after {attempts} attempts on repeated 409s")]
    ConflictRetriesExhausted { operation: String, attempts: u32 },
}

/// Where to look when listing daemon-owned replicas (§4.4: label filter,
/// optionally narrowed by a free-text name match).
#[derive(Debug, Clone, Default)]
pub struct InstanceFilter {
    pub label: Option<(String, String)>,
    pub name_contains: Option<String>,
}

impl InstanceFilter {
    pub fn chester_owned() -> Self {
        Self {
            label: Some(("chester".to_string(), "true".to_string())),
            name_contains: None,
        }
    }

    fn matches(&self, instance: &ReplicaInstance, labels: &HashMap<String, String>) -> bool {
        if let Some((key, value)) = &self.label {
            if labels.get(key).map(String::as_str) != Some(value.as_str()) {
                return false;
            }
        }
        if let Some(needle) = &self.name_contains {
            if !instance.name.contains(needle.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Fixed replica settings the daemon always requests (§4.4, §2.2).
#[derive(Debug, Clone)]
pub struct ReplicaRequest {
    pub name: String,
    pub primary: PrimaryInstance,
    pub network_project_id: String,
    pub network_name: String,
}

/// Port to the database provisioning API (§4.4). All mutating methods
/// retry on HTTP 409 up to [`CONFLICT_RETRY_ATTEMPTS`] times, 30s apart.
#[async_trait]
pub trait ProvisioningClient: Send + Sync {
    async fn create_replica(&self, request: &ReplicaRequest) -> Result<String, ProvisioningError>;
    async fn delete_replica(&self, name: &str) -> Result<String, ProvisioningError>;
    async fn list_instances(
        &self,
        filter: &InstanceFilter,
    ) -> Result<Vec<ReplicaInstance>, ProvisioningError>;
    async fn get_instance(&self, name: &str) -> Result<ReplicaInstance, ProvisioningError>;
    async fn get_primary(&self, name: &str) -> Result<PrimaryInstance, ProvisioningError>;
}

/// Splits one concrete client into the two trait-object handles the
/// reconciler context needs. Both point at the same allocation, so
/// completing an operation through the provisioning handle is visible to
/// anything polling through the status-source handle.
pub fn split_provisioning_backend<T>(
    client: Arc<T>,
) -> (Arc<dyn ProvisioningClient>, Arc<dyn OperationStatusSource>)
where
    T: ProvisioningClient + OperationStatusSource + 'static,
{
    (client.clone(), client)
}

/// Retries `op` on a 409-shaped conflict, honoring §4.4's fixed cadence.
/// `is_conflict` lets callers distinguish a retryable conflict from a
/// terminal API error without this helper knowing about HTTP status codes.
pub(crate) async fn retry_on_conflict<T, F, Fut>(
    sleeper: &dyn Sleeper,
    operation: &str,
    is_conflict: impl Fn(&ProvisioningError) -> bool,
    mut op: F,
) -> Result<T, ProvisioningError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ProvisioningError>>,
{
    for attempt in 0..CONFLICT_RETRY_ATTEMPTS {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_conflict(&e) => {
                tracing::warn!(operation, attempt, "provisioning conflict, retrying");
                sleeper.sleep(CONFLICT_RETRY_INTERVAL).await;
            }
            Err(e) => return Err(e),
        }
    }
    Err(ProvisioningError::ConflictRetriesExhausted {
        operation: operation.to_string(),
        attempts: CONFLICT_RETRY_ATTEMPTS,
    })
}

/// Real HTTP client against the SQL admin API.
pub struct HttpProvisioningClient {
    http: reqwest::Client,
    base_url: String,
    sleeper: Arc<dyn Sleeper>,
}

impl HttpProvisioningClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            sleeper,
        }
    }

    fn is_conflict(e: &ProvisioningError) -> bool {
        matches!(e, ProvisioningError::Api(msg) if msg.contains("409"))
    }
}

#[async_trait]
impl ProvisioningClient for HttpProvisioningClient {
    async fn create_replica(&self, request: &ReplicaRequest) -> Result<String, ProvisioningError> {
        let mut labels = request.primary.user_labels.clone();
        labels.insert("chester".to_string(), "true".to_string());

        let body = serde_json::json!({
            "name": request.name,
            "masterInstanceName": request.primary.name,
            "region": request.primary.region,
            "settings": {
                "tier": request.primary.tier,
                "dataDiskType": "PD_SSD",
                "dataDiskSizeGb": request.primary.data_disk_size_gb,
                "storageAutoResize": true,
                "backupConfiguration": { "enabled": false },
                "databaseFlags": request.primary.database_flags,
                "userLabels": labels,
                "replicationType": "SYNCHRONOUS",
                "ipConfiguration": {
                    "ipv4Enabled": false,
                    "privateNetwork": format!(
                        "projects/{}/global/networks/{}",
                        request.network_project_id, request.network_name
                    ),
                    "requireSsl": true,
                },
            },
        });

        retry_on_conflict(self.sleeper.as_ref(), "create_replica", Self::is_conflict, || {
            let http = self.http.clone();
            let url = format!("{}/instances", self.base_url);
            let body = body.clone();
            async move {
                let resp = http
                    .post(&url)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| ProvisioningError::Api(e.to_string()))?;
                if !resp.status().is_success() {
                    return Err(ProvisioningError::Api(format!("{}", resp.status())));
                }
                let parsed: serde_json::Value =
                    resp.json().await.map_err(|e| ProvisioningError::Api(e.to_string()))?;
                parsed
                    .get("operationId")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .ok_or_else(|| ProvisioningError::Api("missing operationId".to_string()))
            }
        })
        .await
    }

    async fn delete_replica(&self, name: &str) -> Result<String, ProvisioningError> {
        retry_on_conflict(self.sleeper.as_ref(), "delete_replica", Self::is_conflict, || {
            let http = self.http.clone();
            let url = format!("{}/instances/{}", self.base_url, name);
            async move {
                let resp = http
                    .delete(&url)
                    .send()
                    .await
                    .map_err(|e| ProvisioningError::Api(e.to_string()))?;
                if !resp.status().is_success() {
                    return Err(ProvisioningError::Api(format!("{}", resp.status())));
                }
                let parsed: serde_json::Value =
                    resp.json().await.map_err(|e| ProvisioningError::Api(e.to_string()))?;
                parsed
                    .get("operationId")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .ok_or_else(|| ProvisioningError::Api("missing operationId".to_string()))
            }
        })
        .await
    }

    async fn list_instances(
        &self,
        filter: &InstanceFilter,
    ) -> Result<Vec<ReplicaInstance>, ProvisioningError> {
        let mut query = Vec::new();
        if let Some((key, value)) = &filter.label {
            query.push(format!("settings.userLabels.{key}:{value}"));
        }
        let url = format!("{}/instances", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("filter", query.join(" "))])
            .send()
            .await
            .map_err(|e| ProvisioningError::Api(e.to_string()))?;
        let body: ListInstancesResponse =
            resp.json().await.map_err(|e| ProvisioningError::Api(e.to_string()))?;

        Ok(body
            .items
            .into_iter()
            .map(|i| i.into_instance())
            .filter(|(instance, labels)| filter.matches(instance, labels))
            .map(|(instance, _)| instance)
            .collect())
    }

    async fn get_instance(&self, name: &str) -> Result<ReplicaInstance, ProvisioningError> {
        let url = format!("{}/instances/{}", self.base_url, name);
        let resp = self.http.get(&url).send().await.map_err(|e| ProvisioningError::Api(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ProvisioningError::NotFound(name.to_string()));
        }
        let wire: InstanceWire = resp.json().await.map_err(|e| ProvisioningError::Api(e.to_string()))?;
        Ok(wire.into_instance().0)
    }

    async fn get_primary(&self, name: &str) -> Result<PrimaryInstance, ProvisioningError> {
        let url = format!("{}/instances/{}", self.base_url, name);
        let resp = self.http.get(&url).send().await.map_err(|e| ProvisioningError::Api(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ProvisioningError::NotFound(name.to_string()));
        }
        let wire: PrimaryWire = resp.json().await.map_err(|e| ProvisioningError::Api(e.to_string()))?;
        Ok(PrimaryInstance {
            name: wire.name,
            region: wire.region,
            tier: wire.settings.tier,
            data_disk_size_gb: wire.settings.data_disk_size_gb,
            database_flags: wire
                .settings
                .database_flags
                .into_iter()
                .map(|f| (f.name, f.value))
                .collect(),
            user_labels: wire.settings.user_labels,
        })
    }
}

/// Poll adapter on top of the same HTTP client, for [`crate::poller::OperationPoller`].
#[async_trait]
impl OperationStatusSource for HttpProvisioningClient {
    async fn poll_status(&self, operation_id: &str) -> Result<OperationStatus, String> {
        let url = format!("{}/operations/{}", self.base_url, operation_id);
        let resp = self.http.get(&url).send().await.map_err(|e| e.to_string())?;
        let body: OperationWire = resp.json().await.map_err(|e| e.to_string())?;
        if body.status == "DONE" {
            Ok(OperationStatus::Done { errors: body.errors })
        } else {
            Ok(OperationStatus::Pending)
        }
    }
}

#[derive(serde::Deserialize)]
struct OperationWire {
    status: String,
    #[serde(default)]
    errors: Vec<String>,
}

#[derive(serde::Deserialize)]
struct ListInstancesResponse {
    #[serde(default)]
    items: Vec<InstanceWire>,
}

#[derive(serde::Deserialize)]
struct InstanceWire {
    name: String,
    #[serde(default)]
    ip_addresses: Vec<IpAddressWire>,
    #[serde(default)]
    settings: InstanceSettingsWire,
}

impl InstanceWire {
    fn into_instance(self) -> (ReplicaInstance, HashMap<String, String>) {
        let private_ip = self
            .ip_addresses
            .iter()
            .find(|a| a.ip_type == "PRIVATE")
            .map(|a| a.ip_address.clone());
        let public_ip = self
            .ip_addresses
            .iter()
            .find(|a| a.ip_type == "PRIMARY")
            .map(|a| a.ip_address.clone());
        let labels = self.settings.user_labels.clone();
        (
            ReplicaInstance {
                name: self.name,
                private_ip,
                public_ip,
            },
            labels,
        )
    }
}

#[derive(serde::Deserialize)]
struct IpAddressWire {
    #[serde(rename = "type")]
    ip_type: String,
    #[serde(rename = "ipAddress")]
    ip_address: String,
}

#[derive(serde::Deserialize, Default)]
struct InstanceSettingsWire {
    #[serde(default, rename = "userLabels")]
    user_labels: HashMap<String, String>,
}

#[derive(serde::Deserialize)]
struct PrimaryWire {
    name: String,
    region: String,
    settings: PrimarySettingsWire,
}

#[derive(serde::Deserialize)]
struct PrimarySettingsWire {
    tier: String,
    #[serde(rename = "dataDiskSizeGb")]
    data_disk_size_gb: i64,
    #[serde(default, rename = "databaseFlags")]
    database_flags: Vec<DatabaseFlagWire>,
    #[serde(default, rename = "userLabels")]
    user_labels: HashMap<String, String>,
}

#[derive(serde::Deserialize)]
struct DatabaseFlagWire {
    name: String,
    value: String,
}

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Clone)]
    pub struct FakeInstance {
        pub instance: ReplicaInstance,
        pub labels: HashMap<String, String>,
    }

    struct State {
        instances: HashMap<String, FakeInstance>,
        primary: PrimaryInstance,
        next_operation: u64,
        pending_operations: HashMap<String, bool>,
        conflicts_remaining: u32,
        auto_complete: bool,
    }

    /// In-memory provisioning fake: operations complete on the next
    /// `complete_operation` call rather than immediately, so tests can
    /// exercise the poller's pending state. Call `auto_complete_operations`
    /// for tests that don't care about the pending window.
    pub struct FakeProvisioningClient {
        state: Mutex<State>,
    }

    impl FakeProvisioningClient {
        pub fn new(primary: PrimaryInstance) -> Self {
            Self {
                state: Mutex::new(State {
                    instances: HashMap::new(),
                    primary,
                    next_operation: 0,
                    pending_operations: HashMap::new(),
                    conflicts_remaining: 0,
                    auto_complete: false,
                }),
            }
        }

        /// The next `create_replica`/`delete_replica` call fails with a 409
        /// `n` times before succeeding.
        pub fn fail_next_with_conflicts(&self, n: u32) {
            self.state.lock().conflicts_remaining = n;
        }

        pub fn complete_operation(&self, operation_id: &str) {
            self.state.lock().pending_operations.insert(operation_id.to_string(), true);
        }

        /// Every operation this client issues from now on reports `DONE`
        /// on its first poll.
        pub fn auto_complete_operations(&self) {
            self.state.lock().auto_complete = true;
        }

        pub fn seed_instance(&self, instance: ReplicaInstance, labels: HashMap<String, String>) {
            let name = instance.name.clone();
            self.state.lock().instances.insert(name, FakeInstance { instance, labels });
        }

        fn next_op_id(&self) -> String {
            let mut state = self.state.lock();
            state.next_operation += 1;
            let id = format!("op-{}", state.next_operation);
            let done = state.auto_complete;
            state.pending_operations.insert(id.clone(), done);
            id
        }

        fn take_conflict(&self) -> bool {
            let mut state = self.state.lock();
            if state.conflicts_remaining > 0 {
                state.conflicts_remaining -= 1;
                true
            } else {
                false
            }
        }
    }

    #[async_trait]
    impl ProvisioningClient for FakeProvisioningClient {
        async fn create_replica(&self, request: &ReplicaRequest) -> Result<String, ProvisioningError> {
            if self.take_conflict() {
                return Err(ProvisioningError::Api("409 Conflict".to_string()));
            }
            let mut labels = request.primary.user_labels.clone();
            labels.insert("chester".to_string(), "true".to_string());
            let instance = ReplicaInstance {
                name: request.name.clone(),
                private_ip: Some(format!("10.0.0.{}", self.state.lock().instances.len() + 1)),
                public_ip: None,
            };
            self.seed_instance(instance, labels);
            Ok(self.next_op_id())
        }

        async fn delete_replica(&self, name: &str) -> Result<String, ProvisioningError> {
            if self.take_conflict() {
                return Err(ProvisioningError::Api("409 Conflict".to_string()));
            }
            self.state.lock().instances.remove(name);
            Ok(self.next_op_id())
        }

        async fn list_instances(
            &self,
            filter: &InstanceFilter,
        ) -> Result<Vec<ReplicaInstance>, ProvisioningError> {
            Ok(self
                .state
                .lock()
                .instances
                .values()
                .filter(|fi| filter.matches(&fi.instance, &fi.labels))
                .map(|fi| fi.instance.clone())
                .collect())
        }

        async fn get_instance(&self, name: &str) -> Result<ReplicaInstance, ProvisioningError> {
            self.state
                .lock()
                .instances
                .get(name)
                .map(|fi| fi.instance.clone())
                .ok_or_else(|| ProvisioningError::NotFound(name.to_string()))
        }

        async fn get_primary(&self, _name: &str) -> Result<PrimaryInstance, ProvisioningError> {
            Ok(self.state.lock().primary.clone())
        }
    }

    #[async_trait]
    impl OperationStatusSource for FakeProvisioningClient {
        async fn poll_status(&self, operation_id: &str) -> Result<OperationStatus, String> {
            let done = self.state.lock().pending_operations.get(operation_id).copied().unwrap_or(false);
            if done {
                Ok(OperationStatus::Done { errors: vec![] })
            } else {
                Ok(OperationStatus::Pending)
            }
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeInstance, FakeProvisioningClient};

#[cfg(test)]
mod tests {
    use super::*;
    use chester_core::FakeSleeper;

    fn primary() -> PrimaryInstance {
        PrimaryInstance {
            name: "db-a".to_string(),
            region: "us-central1".to_string(),
            tier: "db-n1-standard-2".to_string(),
            data_disk_size_gb: 100,
            database_flags: vec![],
            user_labels: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn fake_create_then_list_returns_the_new_replica() {
        let client = FakeProvisioningClient::new(primary());
        let request = ReplicaRequest {
            name: "db-a-r-xyz".to_string(),
            primary: primary(),
            network_project_id: "net-proj".to_string(),
            network_name: "shared-vpc".to_string(),
        };
        client.create_replica(&request).await.unwrap();

        let found = client.list_instances(&InstanceFilter::chester_owned()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "db-a-r-xyz");
    }

    #[tokio::test]
    async fn create_replica_retries_past_transient_conflicts() {
        let client = FakeProvisioningClient::new(primary());
        client.fail_next_with_conflicts(2);
        let request = ReplicaRequest {
            name: "db-a-r-xyz".to_string(),
            primary: primary(),
            network_project_id: "net-proj".to_string(),
            network_name: "shared-vpc".to_string(),
        };

        // The fake's conflict counter is decremented per call, not wrapped
        // in the real retry loop, so drive it directly the way the reconciler
        // would: retry_on_conflict around a closure calling create_replica.
        let sleeper = Arc::new(FakeSleeper::default());
        let result = retry_on_conflict(
            sleeper.as_ref(),
            "create_replica",
            |e| matches!(e, ProvisioningError::Api(m) if m.contains("409")),
            || client.create_replica(&request),
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(sleeper.sleep_count(), 2);
    }
}
