// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Writes rendered proxy routing config to Kubernetes and triggers a
//! rolling restart of the proxy Deployment (§4.5).

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, EnvVar};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
use std::collections::BTreeMap;
use thiserror::Error;

pub const PROXY_NAMESPACE: &str = "proxysql";
pub const CONFIGMAP_DATA_KEY: &str = "proxysql.cnf";
const RESTART_ENV_VAR: &str = "refresh";
const MAX_UPDATE_CONFLICT_RETRIES: u32 = 5;

#[derive(Debug, Error)]
pub enum ProxyWriteError {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("no deployment found for instance group {0}")]
    DeploymentNotFound(String),
    #[error("gave up updating deployment after {0} optimistic-concurrency conflicts")]
    ConflictRetriesExhausted(u32),
}

/// Renders a `ProxyConfig` to the Kubernetes objects the proxy reads.
#[async_trait]
pub trait ProxyConfigWriter: Send + Sync {
    /// Replace the ConfigMap for `instance_group` with `rendered` bytes.
    async fn write_config(&self, instance_group: &str, rendered: &str) -> Result<(), ProxyWriteError>;

    /// Rotate the `refresh` env var on the matching Deployment to trigger a
    /// rolling restart.
    async fn trigger_restart(&self, instance_group: &str) -> Result<(), ProxyWriteError>;
}

pub struct KubernetesProxyConfigWriter {
    client: Client,
}

impl KubernetesProxyConfigWriter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn configmaps(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), PROXY_NAMESPACE)
    }

    fn deployments(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), PROXY_NAMESPACE)
    }

    async fn find_configmap(&self, instance_group: &str) -> Result<Option<ConfigMap>, ProxyWriteError> {
        let lp = ListParams::default().labels(&format!("instancegroup={instance_group}"));
        let list = self.configmaps().list(&lp).await?;
        Ok(list.items.into_iter().next())
    }

    async fn find_deployment(&self, instance_group: &str) -> Result<Deployment, ProxyWriteError> {
        let lp = ListParams::default().labels(&format!("instancegroup={instance_group}"));
        let list = self.deployments().list(&lp).await?;
        list.items
            .into_iter()
            .next()
            .ok_or_else(|| ProxyWriteError::DeploymentNotFound(instance_group.to_string()))
    }
}

#[async_trait]
impl ProxyConfigWriter for KubernetesProxyConfigWriter {
    async fn write_config(&self, instance_group: &str, rendered: &str) -> Result<(), ProxyWriteError> {
        let configmaps = self.configmaps();

        // Not-found is not an error (§4.5): delete if present, then recreate.
        if let Some(existing) = self.find_configmap(instance_group).await? {
            if let Some(name) = existing.metadata.name.clone() {
                match configmaps.delete(&name, &DeleteParams::default()).await {
                    Ok(_) => {}
                    Err(kube::Error::Api(e)) if e.code == 404 => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        let mut labels = BTreeMap::new();
        labels.insert("instancegroup".to_string(), instance_group.to_string());
        let mut data = BTreeMap::new();
        data.insert(CONFIGMAP_DATA_KEY.to_string(), rendered.to_string());

        let configmap = ConfigMap {
            metadata: ObjectMeta {
                name: Some(format!("proxysql-{instance_group}")),
                namespace: Some(PROXY_NAMESPACE.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        };

        configmaps.create(&PostParams::default(), &configmap).await?;
        Ok(())
    }

    async fn trigger_restart(&self, instance_group: &str) -> Result<(), ProxyWriteError> {
        for attempt in 0..MAX_UPDATE_CONFLICT_RETRIES {
            let mut deployment = self.find_deployment(instance_group).await?;
            let token = uuid::Uuid::new_v4().to_string();

            let Some(spec) = deployment.spec.as_mut() else {
                return Err(ProxyWriteError::DeploymentNotFound(instance_group.to_string()));
            };
            let Some(container) = spec.template.spec.as_mut().and_then(|s| s.containers.first_mut())
            else {
                return Err(ProxyWriteError::DeploymentNotFound(instance_group.to_string()));
            };
            let env = container.env.get_or_insert_with(Vec::new);
            if let Some(pos) = env.iter().position(|e| e.name == RESTART_ENV_VAR) {
                env.swap_remove(pos);
            }
            env.push(EnvVar {
                name: RESTART_ENV_VAR.to_string(),
                value: Some(token),
                value_from: None,
            });

            let name = deployment.metadata.name.clone().unwrap_or_default();
            match self.deployments().replace(&name, &PostParams::default(), &deployment).await {
                Ok(_) => return Ok(()),
                Err(kube::Error::Api(e)) if e.code == 409 => {
                    tracing::warn!(instance_group, attempt, "deployment update conflict, retrying");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ProxyWriteError::ConflictRetriesExhausted(MAX_UPDATE_CONFLICT_RETRIES))
    }
}

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct State {
        configs: HashMap<String, String>,
        restart_count: HashMap<String, u32>,
    }

    #[derive(Default)]
    pub struct FakeProxyConfigWriter {
        state: Mutex<State>,
    }

    impl FakeProxyConfigWriter {
        pub fn rendered_config(&self, instance_group: &str) -> Option<String> {
            self.state.lock().configs.get(instance_group).cloned()
        }

        pub fn restart_count(&self, instance_group: &str) -> u32 {
            self.state.lock().restart_count.get(instance_group).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl ProxyConfigWriter for FakeProxyConfigWriter {
        async fn write_config(&self, instance_group: &str, rendered: &str) -> Result<(), ProxyWriteError> {
            self.state.lock().configs.insert(instance_group.to_string(), rendered.to_string());
            Ok(())
        }

        async fn trigger_restart(&self, instance_group: &str) -> Result<(), ProxyWriteError> {
            *self.state.lock().restart_count.entry(instance_group.to_string()).or_insert(0) += 1;
            Ok(())
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeProxyConfigWriter;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_writer_records_rendered_config_and_restart_count() {
        let writer = FakeProxyConfigWriter::default();
        writer.write_config("db-a", "server=10.0.0.1").await.unwrap();
        writer.trigger_restart("db-a").await.unwrap();
        writer.trigger_restart("db-a").await.unwrap();

        assert_eq!(writer.rendered_config("db-a").as_deref(), Some("server=10.0.0.1"));
        assert_eq!(writer.restart_count("db-a"), 2);
    }
}
