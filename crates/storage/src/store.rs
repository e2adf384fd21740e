// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `IncidentStore` port: the reconciler's only durable dependency (§4.2).

use crate::state::MaterializedState;
use crate::wal::{Wal, WalError, WalEvent};
use chester_core::{ChesterMetaData, Incident, IncidentState, ProxyConfig};
use parking_lot::Mutex;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("wal error: {0}")]
    Wal(#[from] WalError),
}

/// Durable storage for incidents and proxy routing config. Every mutating
/// method must persist (append + fsync) before the materialized state is
/// updated, so a failure here leaves the handler able to retry from the
/// last-known-good step rather than silently drifting (§4.1.4).
pub trait IncidentStore: Send + Sync {
    fn get_incident(&self, incident_id: &str) -> Result<Option<Incident>, StoreError>;
    fn put_incident(&self, incident: &Incident) -> Result<(), StoreError>;

    /// Read-modify-write a single incident under the store's lock. Returns
    /// `None` if the incident does not exist; `mutate` is never called in
    /// that case and nothing is persisted.
    fn update_incident(
        &self,
        incident_id: &str,
        mutate: &mut dyn FnMut(&mut Incident),
    ) -> Result<Option<Incident>, StoreError>;

    fn delete_incident(&self, incident_id: &str) -> Result<(), StoreError>;
    fn query_incidents(&self, state: Option<IncidentState>) -> Result<Vec<Incident>, StoreError>;

    fn get_proxy_config(&self, instance_group: &str) -> Result<Option<ProxyConfig>, StoreError>;
    fn put_proxy_config(&self, config: &ProxyConfig) -> Result<(), StoreError>;

    fn get_metadata(&self, instance_group: &str) -> Result<Option<ChesterMetaData>, StoreError>;
    fn put_metadata(
        &self,
        instance_group: &str,
        metadata: ChesterMetaData,
    ) -> Result<(), StoreError>;
}

struct Inner {
    wal: Wal,
    state: MaterializedState,
}

impl Inner {
    fn persist(&mut self, event: WalEvent) -> Result<(), StoreError> {
        let seq = self.wal.append(&event)?;
        self.wal.flush()?;
        self.state.apply_event(&event);
        self.wal.mark_processed(seq);
        Ok(())
    }
}

/// WAL-backed implementation: survives process restarts by replaying the
/// log on [`WalIncidentStore::open`].
pub struct WalIncidentStore {
    inner: Mutex<Inner>,
}

impl WalIncidentStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut wal = Wal::open(path, 0)?;
        let mut state = MaterializedState::default();
        while let Some(entry) = wal.next_unprocessed()? {
            state.apply_event(&entry.event);
            wal.mark_processed(entry.seq);
        }
        Ok(Self {
            inner: Mutex::new(Inner { wal, state }),
        })
    }
}

impl IncidentStore for WalIncidentStore {
    fn get_incident(&self, incident_id: &str) -> Result<Option<Incident>, StoreError> {
        Ok(self.inner.lock().state.incidents.get(incident_id).cloned())
    }

    fn put_incident(&self, incident: &Incident) -> Result<(), StoreError> {
        self.inner.lock().persist(WalEvent::PutIncident(incident.clone()))
    }

    fn update_incident(
        &self,
        incident_id: &str,
        mutate: &mut dyn FnMut(&mut Incident),
    ) -> Result<Option<Incident>, StoreError> {
        let mut guard = self.inner.lock();
        let Some(mut incident) = guard.state.incidents.get(incident_id).cloned() else {
            return Ok(None);
        };
        mutate(&mut incident);
        guard.persist(WalEvent::PutIncident(incident.clone()))?;
        Ok(Some(incident))
    }

    fn delete_incident(&self, incident_id: &str) -> Result<(), StoreError> {
        self.inner.lock().persist(WalEvent::DeleteIncident {
            incident_id: incident_id.to_string(),
        })
    }

    fn query_incidents(&self, state: Option<IncidentState>) -> Result<Vec<Incident>, StoreError> {
        Ok(self.inner.lock().state.query_incidents(state))
    }

    fn get_proxy_config(&self, instance_group: &str) -> Result<Option<ProxyConfig>, StoreError> {
        Ok(self.inner.lock().state.proxy_configs.get(instance_group).cloned())
    }

    fn put_proxy_config(&self, config: &ProxyConfig) -> Result<(), StoreError> {
        self.inner.lock().persist(WalEvent::PutProxyConfig(config.clone()))
    }

    fn get_metadata(&self, instance_group: &str) -> Result<Option<ChesterMetaData>, StoreError> {
        Ok(self.inner.lock().state.metadata.get(instance_group).copied())
    }

    fn put_metadata(
        &self,
        instance_group: &str,
        metadata: ChesterMetaData,
    ) -> Result<(), StoreError> {
        self.inner.lock().persist(WalEvent::PutMetadata {
            instance_group: instance_group.to_string(),
            metadata,
        })
    }
}

/// In-memory-only store for tests: same semantics, no file I/O.
#[cfg(any(test, feature = "test-support"))]
pub struct InMemoryIncidentStore {
    state: Mutex<MaterializedState>,
}

#[cfg(any(test, feature = "test-support"))]
impl Default for InMemoryIncidentStore {
    fn default() -> Self {
        Self {
            state: Mutex::new(MaterializedState::default()),
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
impl IncidentStore for InMemoryIncidentStore {
    fn get_incident(&self, incident_id: &str) -> Result<Option<Incident>, StoreError> {
        Ok(self.state.lock().incidents.get(incident_id).cloned())
    }

    fn put_incident(&self, incident: &Incident) -> Result<(), StoreError> {
        self.state
            .lock()
            .incidents
            .insert(incident.incident_id.clone(), incident.clone());
        Ok(())
    }

    fn update_incident(
        &self,
        incident_id: &str,
        mutate: &mut dyn FnMut(&mut Incident),
    ) -> Result<Option<Incident>, StoreError> {
        let mut guard = self.state.lock();
        let Some(incident) = guard.incidents.get_mut(incident_id) else {
            return Ok(None);
        };
        mutate(incident);
        Ok(Some(incident.clone()))
    }

    fn delete_incident(&self, incident_id: &str) -> Result<(), StoreError> {
        self.state.lock().incidents.remove(incident_id);
        Ok(())
    }

    fn query_incidents(&self, state: Option<IncidentState>) -> Result<Vec<Incident>, StoreError> {
        Ok(self.state.lock().query_incidents(state))
    }

    fn get_proxy_config(&self, instance_group: &str) -> Result<Option<ProxyConfig>, StoreError> {
        Ok(self.state.lock().proxy_configs.get(instance_group).cloned())
    }

    fn put_proxy_config(&self, config: &ProxyConfig) -> Result<(), StoreError> {
        self.state
            .lock()
            .proxy_configs
            .insert(config.instance_group.clone(), config.clone());
        Ok(())
    }

    fn get_metadata(&self, instance_group: &str) -> Result<Option<ChesterMetaData>, StoreError> {
        Ok(self.state.lock().metadata.get(instance_group).copied())
    }

    fn put_metadata(
        &self,
        instance_group: &str,
        metadata: ChesterMetaData,
    ) -> Result<(), StoreError> {
        self.state
            .lock()
            .metadata
            .insert(instance_group.to_string(), metadata);
        Ok(())
    }
}
