// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The step-indexed state machine that drives one incident to terminal
//! deletion (§4.1). An explicit loop, not recursion (§9 DESIGN NOTES): the
//! cooldown cycle can re-dispatch an unbounded number of times and must not
//! grow the call stack.

use crate::context::ReconcilerContext;
use chester_adapters::{DecryptError, Notification, PollError, ProvisioningError, ProxyWriteError};
use chester_core::{Action, Incident, IncidentState, PrimaryInstance, ProcessStep, ProxyConfig};
use chester_storage::StoreError;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("provisioning error: {0}")]
    Provisioning(#[from] ProvisioningError),
    #[error("poll error: {0}")]
    Poll(#[from] PollError),
    #[error("proxy write error: {0}")]
    ProxyWrite(#[from] ProxyWriteError),
    #[error("decrypt error: {0}")]
    Decrypt(#[from] DecryptError),
    #[error("{instance_group} has reached its instance cap")]
    CapacityExceeded { instance_group: String },
    #[error("invariant violated: {0}")]
    InvariantViolated(String),
    #[error("unrecognized step {0:?}")]
    UnknownStep(ProcessStep),
}

/// Best-effort: a notification failure is logged, never propagated. The
/// webhook channel is not a ledger (§9 DESIGN NOTES open-question decision).
async fn notify_best_effort(ctx: &ReconcilerContext, incident: &Incident, message: &str) {
    let notification = Notification {
        incident_id: incident.incident_id.clone(),
        sql_master_instance: incident.sql_master_instance.clone(),
        project: incident.sql_master_instance.clone(),
        message: message.to_string(),
    };
    if let Err(e) = ctx.notifier.notify(&notification).await {
        tracing::warn!(incident = %incident.incident_id, error = %e, "notification send failed");
    }
}

enum Next {
    Continue(Incident),
    Stop,
}

pub struct Reconciler {
    ctx: Arc<ReconcilerContext>,
}

impl Reconciler {
    pub fn new(ctx: Arc<ReconcilerContext>) -> Self {
        Self { ctx }
    }

    /// Runs the incident to completion (deletion) or to a parked failure.
    /// Property 4 (closed short-circuit): an incident whose `State` is
    /// already `closed` on entry never touches a collaborator.
    pub async fn run(&self, incident: Incident) -> Result<(), ReconcileError> {
        if incident.state == IncidentState::Closed {
            tracing::info!(incident = %incident.incident_id, "incident already closed, skipping");
            return Ok(());
        }

        if incident.action == Action::Restart {
            return self.step_restart(&incident).await;
        }

        // Termination rule (§4.1.1): `Clear` on entry means a prior attempt
        // already reached the terminal step; stop without dispatching.
        // Thereafter the loop always dispatches — `Clear` itself is a step
        // the dispatch table handles (it performs the deletion).
        if incident.last_process.is_terminal() {
            return Ok(());
        }

        let mut current = incident;
        loop {
            match self.dispatch(&current).await? {
                Next::Continue(updated) => current = updated,
                Next::Stop => return Ok(()),
            }
        }
    }

    async fn dispatch(&self, incident: &Incident) -> Result<Next, ReconcileError> {
        match incident.last_process.clone() {
            ProcessStep::GcfPush => self.step_gcf_push(incident).await,
            ProcessStep::DaemonAck => match incident.action {
                Action::Add => self.step_daemon_ack_add(incident).await,
                Action::Remove => self.step_daemon_ack_remove(incident).await,
                Action::Restart => unreachable!("restart never enters the loop"),
            },
            ProcessStep::InstanceInsert => match incident.action {
                Action::Add => self.step_instance_insert_add(incident).await,
                Action::Remove => self.step_instance_delete_remove(incident).await,
                Action::Restart => unreachable!("restart never enters the loop"),
            },
            ProcessStep::ConfigUpdate => self.step_config_update(incident).await,
            ProcessStep::ProxysqlRestart => self.step_proxysql_restart(incident).await,
            ProcessStep::StatusCheck => match incident.action {
                Action::Add => self.step_status_check_add(incident).await,
                Action::Remove => self.step_status_check_remove(incident).await,
                Action::Restart => unreachable!("restart never enters the loop"),
            },
            ProcessStep::Closed => self.step_closed(incident).await,
            ProcessStep::Clear => self.step_clear(incident).await,
            other => Err(ReconcileError::UnknownStep(other)),
        }
    }

    async fn persist_step(
        &self,
        incident: &Incident,
        next_step: ProcessStep,
    ) -> Result<Incident, ReconcileError> {
        let updated = self
            .ctx
            .store
            .update_incident(&incident.incident_id, &mut |i| {
                i.mark_updated_by_daemon();
                i.last_process = next_step.clone();
            })?
            .ok_or_else(|| {
                ReconcileError::InvariantViolated(format!(
                    "incident {} vanished mid-reconcile",
                    incident.incident_id
                ))
            })?;
        Ok(updated)
    }

    // §4.1.1 / §4.1.2 GCFPush: shared verbatim across add and remove — the
    // spec's transition table only overrides steps from DaemonAck onward.
    async fn step_gcf_push(&self, incident: &Incident) -> Result<Next, ReconcileError> {
        notify_best_effort(&self.ctx, incident, "scale-up received").await;
        let updated = self.persist_step(incident, ProcessStep::DaemonAck).await?;
        Ok(Next::Continue(updated))
    }

    async fn owned_instances(
        &self,
        incident: &Incident,
    ) -> Result<Vec<chester_core::ReplicaInstance>, ReconcileError> {
        let filter = chester_adapters::InstanceFilter {
            label: Some(("chester".to_string(), "true".to_string())),
            name_contains: Some(incident.replica_base_name.clone()),
        };
        Ok(self.ctx.provisioning.list_instances(&filter).await?)
    }

    async fn step_daemon_ack_add(&self, incident: &Incident) -> Result<Next, ReconcileError> {
        // Property 3 (no-double-create): identifiers already present means
        // this attempt already issued the insert; just advance.
        if incident.last_read_replica_name.is_some() && incident.operation_id.is_some() {
            let updated = self.persist_step(incident, ProcessStep::InstanceInsert).await?;
            return Ok(Next::Continue(updated));
        }

        let instances = self.owned_instances(incident).await?;
        let max_instances = self
            .ctx
            .store
            .get_metadata(&incident.sql_master_instance)?
            .map(|m| m.max_chester_instances)
            .unwrap_or(self.ctx.config.default_max_instances);

        if instances.len() >= max_instances {
            notify_best_effort(
                &self.ctx,
                incident,
                &format!("Too many instances for {}", incident.sql_master_instance),
            )
            .await;
            return Err(ReconcileError::CapacityExceeded {
                instance_group: incident.sql_master_instance.clone(),
            });
        }

        let primary: PrimaryInstance =
            self.ctx.provisioning.get_primary(&incident.sql_master_instance).await?;
        let name = format!(
            "{}{}",
            incident.replica_base_name,
            uuid::Uuid::new_v4().simple().to_string().chars().take(8).collect::<String>()
        );
        let operation_id = self
            .ctx
            .provisioning
            .create_replica(&chester_adapters::ReplicaRequest {
                name: name.clone(),
                primary,
                network_project_id: self.ctx.config.network_project_id.clone(),
                network_name: self.ctx.config.network_name.clone(),
            })
            .await?;

        let updated = self
            .ctx
            .store
            .update_incident(&incident.incident_id, &mut |i| {
                i.mark_updated_by_daemon();
                i.last_read_replica_name = Some(name.clone());
                i.operation_id = Some(operation_id.clone());
                i.last_process = ProcessStep::InstanceInsert;
            })?
            .ok_or_else(|| {
                ReconcileError::InvariantViolated(format!("incident {} vanished", incident.incident_id))
            })?;
        Ok(Next::Continue(updated))
    }

    async fn step_instance_insert_add(&self, incident: &Incident) -> Result<Next, ReconcileError> {
        let operation_id = incident.operation_id.as_deref().ok_or_else(|| {
            ReconcileError::InvariantViolated("InstanceInsert entered without an OperationID".to_string())
        })?;
        let name = incident.last_read_replica_name.as_deref().ok_or_else(|| {
            ReconcileError::InvariantViolated(
                "InstanceInsert entered without a LastReadReplicaName".to_string(),
            )
        })?;

        self.ctx
            .poller
            .wait(self.ctx.operation_source.as_ref(), operation_id)
            .await?;

        let instance = self.ctx.provisioning.get_instance(name).await?;
        let ip = instance.private_ip().ok_or_else(|| {
            ReconcileError::InvariantViolated(format!("replica {name} has no private IP"))
        })?;

        let mut config = self
            .ctx
            .store
            .get_proxy_config(&incident.sql_master_instance)?
            .unwrap_or_else(|| ProxyConfig::new(incident.sql_master_instance.clone()));
        if !config.mysql_servers.iter().any(|s| s.address == ip) {
            config.add_read_replica(ip);
            self.ctx.store.put_proxy_config(&config)?;
        }

        let ip = ip.to_string();
        let updated = self
            .ctx
            .store
            .update_incident(&incident.incident_id, &mut |i| {
                i.mark_updated_by_daemon();
                i.last_ip_address = Some(ip.clone());
                i.last_process = ProcessStep::ConfigUpdate;
            })?
            .ok_or_else(|| {
                ReconcileError::InvariantViolated(format!("incident {} vanished", incident.incident_id))
            })?;
        Ok(Next::Continue(updated))
    }

    async fn step_daemon_ack_remove(&self, incident: &Incident) -> Result<Next, ReconcileError> {
        if incident.last_read_replica_name.is_some() {
            let updated = self.persist_step(incident, ProcessStep::ConfigUpdate).await?;
            return Ok(Next::Continue(updated));
        }

        let instances = self.owned_instances(incident).await?;
        let Some(victim) = instances.into_iter().next() else {
            notify_best_effort(&self.ctx, incident, "Scale down failed: nothing to remove").await;
            let updated = self.persist_step(incident, ProcessStep::Closed).await?;
            return Ok(Next::Continue(updated));
        };

        let ip = victim.private_ip().ok_or_else(|| {
            ReconcileError::InvariantViolated(format!("replica {} has no private IP", victim.name))
        })?;

        let mut config = self
            .ctx
            .store
            .get_proxy_config(&incident.sql_master_instance)?
            .unwrap_or_else(|| ProxyConfig::new(incident.sql_master_instance.clone()));
        config.remove_by_address(ip);
        self.ctx.store.put_proxy_config(&config)?;

        let name = victim.name.clone();
        let ip = ip.to_string();
        let updated = self
            .ctx
            .store
            .update_incident(&incident.incident_id, &mut |i| {
                i.mark_updated_by_daemon();
                i.last_read_replica_name = Some(name.clone());
                i.last_ip_address = Some(ip.clone());
                i.last_process = ProcessStep::ConfigUpdate;
            })?
            .ok_or_else(|| {
                ReconcileError::InvariantViolated(format!("incident {} vanished", incident.incident_id))
            })?;
        Ok(Next::Continue(updated))
    }

    async fn step_instance_delete_remove(&self, incident: &Incident) -> Result<Next, ReconcileError> {
        if incident.operation_id.is_some() {
            let updated = self.persist_step(incident, ProcessStep::StatusCheck).await?;
            return Ok(Next::Continue(updated));
        }

        let name = incident.last_read_replica_name.as_deref().ok_or_else(|| {
            ReconcileError::InvariantViolated(
                "remove InstanceInsert entered without a LastReadReplicaName".to_string(),
            )
        })?;
        let operation_id = self.ctx.provisioning.delete_replica(name).await?;

        let updated = self
            .ctx
            .store
            .update_incident(&incident.incident_id, &mut |i| {
                i.mark_updated_by_daemon();
                i.operation_id = Some(operation_id.clone());
                i.last_process = ProcessStep::StatusCheck;
            })?
            .ok_or_else(|| {
                ReconcileError::InvariantViolated(format!("incident {} vanished", incident.incident_id))
            })?;
        Ok(Next::Continue(updated))
    }

    // §4.1.1 / §4.1.2 ConfigUpdate and ProxysqlRestart: identical
    // render-and-restart behavior for both actions; only the step each one
    // advances to afterward differs (handled in `dispatch`/`step_proxysql_restart`).
    async fn step_config_update(&self, incident: &Incident) -> Result<Next, ReconcileError> {
        let config = self
            .ctx
            .store
            .get_proxy_config(&incident.sql_master_instance)?
            .ok_or_else(|| {
                ReconcileError::InvariantViolated(format!(
                    "no proxy config for {}",
                    incident.sql_master_instance
                ))
            })?;
        let password = self.ctx.decryptor.decrypt(&config.encrypted_password).await?;
        let rendered = crate::render::render_proxysql_cnf(&config, &password);
        self.ctx.proxy_writer.write_config(&incident.sql_master_instance, &rendered).await?;

        let updated = self.persist_step(incident, ProcessStep::ProxysqlRestart).await?;
        Ok(Next::Continue(updated))
    }

    async fn step_proxysql_restart(&self, incident: &Incident) -> Result<Next, ReconcileError> {
        self.ctx.proxy_writer.trigger_restart(&incident.sql_master_instance).await?;
        let next = match incident.action {
            Action::Add => ProcessStep::StatusCheck,
            Action::Remove => ProcessStep::InstanceInsert,
            Action::Restart => unreachable!("restart never enters the loop"),
        };
        let updated = self.persist_step(incident, next).await?;
        Ok(Next::Continue(updated))
    }

    async fn step_status_check_add(&self, incident: &Incident) -> Result<Next, ReconcileError> {
        self.ctx.sleeper.sleep(self.ctx.config.cooldown).await;
        self.advance_past_cooldown(incident).await
    }

    async fn step_status_check_remove(&self, incident: &Incident) -> Result<Next, ReconcileError> {
        let operation_id = incident.operation_id.as_deref().ok_or_else(|| {
            ReconcileError::InvariantViolated("remove StatusCheck entered without an OperationID".to_string())
        })?;
        self.ctx
            .poller
            .wait(self.ctx.operation_source.as_ref(), operation_id)
            .await?;
        self.ctx.sleeper.sleep(self.ctx.config.cooldown).await;
        self.advance_past_cooldown(incident).await
    }

    /// Cooldown honors only a change in externally-set `State` (§8 property
    /// 6); the freshest snapshot is re-read from the store, not the one
    /// passed into this step, so a concurrent close during cooldown wins.
    ///
    /// Looping back to `DaemonAck` starts a fresh add/remove cycle, so the
    /// previous cycle's identifiers are cleared here rather than carried
    /// over — otherwise the next `DaemonAck` would read them as already set
    /// and skip straight past its own work (the no-double-create guard is
    /// for resuming *this* cycle, not for skipping the next one).
    async fn advance_past_cooldown(&self, incident: &Incident) -> Result<Next, ReconcileError> {
        let latest = self.ctx.store.get_incident(&incident.incident_id)?.ok_or_else(|| {
            ReconcileError::InvariantViolated(format!("incident {} vanished", incident.incident_id))
        })?;
        let closed = latest.state == IncidentState::Closed;
        let updated = self
            .ctx
            .store
            .update_incident(&incident.incident_id, &mut |i| {
                i.mark_updated_by_daemon();
                if closed {
                    i.last_process = ProcessStep::Closed;
                } else {
                    i.operation_id = None;
                    i.last_read_replica_name = None;
                    i.last_ip_address = None;
                    i.last_process = ProcessStep::DaemonAck;
                }
            })?
            .ok_or_else(|| {
                ReconcileError::InvariantViolated(format!("incident {} vanished", incident.incident_id))
            })?;
        Ok(Next::Continue(updated))
    }

    async fn step_closed(&self, incident: &Incident) -> Result<Next, ReconcileError> {
        notify_best_effort(&self.ctx, incident, "closed").await;
        let updated = self.persist_step(incident, ProcessStep::Clear).await?;
        Ok(Next::Continue(updated))
    }

    async fn step_clear(&self, incident: &Incident) -> Result<Next, ReconcileError> {
        self.ctx.store.delete_incident(&incident.incident_id)?;
        Ok(Next::Stop)
    }

    /// §4.1.3: stateless, non-resumable by design (§9 DESIGN NOTES — a
    /// crash mid-restart silently loses the request, matching the source).
    async fn step_restart(&self, incident: &Incident) -> Result<(), ReconcileError> {
        let config = self
            .ctx
            .store
            .get_proxy_config(&incident.sql_master_instance)?
            .ok_or_else(|| {
                ReconcileError::InvariantViolated(format!(
                    "no proxy config for {}",
                    incident.sql_master_instance
                ))
            })?;
        let password = self.ctx.decryptor.decrypt(&config.encrypted_password).await?;
        let rendered = crate::render::render_proxysql_cnf(&config, &password);
        self.ctx.proxy_writer.write_config(&incident.sql_master_instance, &rendered).await?;
        self.ctx.proxy_writer.trigger_restart(&incident.sql_master_instance).await?;
        self.ctx.store.delete_incident(&incident.incident_id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ReconcilerConfig;
    use chester_adapters::{
        split_provisioning_backend, FakeDecryptor, FakeNotifier, FakeProvisioningClient,
        FakeProxyConfigWriter, ProvisioningClient,
    };
    use chester_core::{ChesterMetaData, FakeClock, FakeSleeper, IncidentBuilder};
    use chester_storage::{IncidentStore, InMemoryIncidentStore};
    use std::collections::HashMap;
    use std::time::Duration;

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

    struct Fixture {
        ctx: Arc<ReconcilerContext>,
        store: Arc<InMemoryIncidentStore>,
        provisioning: Arc<FakeProvisioningClient>,
        proxy_writer: Arc<FakeProxyConfigWriter>,
        notifier: Arc<FakeNotifier>,
    }

    fn fixture(max_chester_instances: usize) -> Fixture {
        let store = Arc::new(InMemoryIncidentStore::default());
        store
            .put_proxy_config(&chester_core::ProxyConfig {
                username: "chester".to_string(),
                encrypted_password: b"hunter2".to_vec(),
                ..ProxyConfig::new("db-a")
            })
            .unwrap();
        store
            .put_metadata("db-a", ChesterMetaData { max_chester_instances })
            .unwrap();

        let provisioning = Arc::new(FakeProvisioningClient::new(primary()));
        provisioning.auto_complete_operations();
        let (provisioning_port, operation_source) =
            split_provisioning_backend(provisioning.clone());
        let proxy_writer = Arc::new(FakeProxyConfigWriter::default());
        let notifier = Arc::new(FakeNotifier::default());
        let sleeper = Arc::new(FakeSleeper::default());

        let ctx = Arc::new(ReconcilerContext {
            store: store.clone(),
            provisioning: provisioning_port,
            operation_source,
            proxy_writer: proxy_writer.clone(),
            notifier: notifier.clone(),
            decryptor: Arc::new(FakeDecryptor),
            poller: chester_adapters::OperationPoller::new(sleeper.clone(), Duration::from_secs(1800)),
            clock: Arc::new(FakeClock::default()),
            sleeper,
            config: ReconcilerConfig::new("net-proj", "shared-vpc"),
        });

        Fixture { ctx, store, provisioning, proxy_writer, notifier }
    }

    #[tokio::test]
    async fn closed_incident_short_circuits_without_any_side_effect() {
        let fx = fixture(3);
        let incident = IncidentBuilder::new("i1", Action::Add)
            .state(IncidentState::Closed)
            .sql_master_instance("db-a")
            .build();

        let reconciler = Reconciler::new(fx.ctx.clone());
        reconciler.run(incident).await.unwrap();

        assert!(fx.proxy_writer.rendered_config("db-a").is_none());
        assert!(fx.notifier.calls().is_empty());
    }

    #[tokio::test]
    async fn add_happy_path_loops_until_capacity_then_parks_the_incident() {
        let fx = fixture(1);
        let incident = IncidentBuilder::new("i1", Action::Add)
            .sql_master_instance("db-a")
            .replica_base_name("db-a-r-")
            .build();
        fx.store.put_incident(&incident).unwrap();

        let reconciler = Reconciler::new(fx.ctx.clone());
        let err = reconciler.run(incident).await.unwrap_err();

        assert!(matches!(err, ReconcileError::CapacityExceeded { .. }));

        let parked = fx.store.get_incident("i1").unwrap().unwrap();
        assert_eq!(parked.last_process, ProcessStep::DaemonAck);

        let rendered = fx.proxy_writer.rendered_config("db-a").unwrap();
        assert!(rendered.contains("10.0.0.1"));
        assert_eq!(fx.proxy_writer.restart_count("db-a"), 1);
        assert!(fx.notifier.calls().iter().any(|c| c.message.contains("Too many instances")));
    }

    #[tokio::test]
    async fn daemon_ack_add_is_a_noop_when_identifiers_are_already_set() {
        let fx = fixture(3);
        let incident = IncidentBuilder::new("i1", Action::Add)
            .sql_master_instance("db-a")
            .last_read_replica_name("db-a-r-existing")
            .operation_id("op-existing")
            .build();
        fx.store.put_incident(&incident).unwrap();

        let reconciler = Reconciler::new(fx.ctx.clone());
        let next = reconciler.step_daemon_ack_add(&incident).await.unwrap();

        let Next::Continue(updated) = next else { panic!("expected Continue") };
        assert_eq!(updated.last_process, ProcessStep::InstanceInsert);
        assert_eq!(updated.operation_id.as_deref(), Some("op-existing"));
        assert!(fx.provisioning.list_instances(&Default::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cooldown_advance_honors_a_state_flip_to_closed() {
        let fx = fixture(3);
        let mut incident = IncidentBuilder::new("i1", Action::Add)
            .sql_master_instance("db-a")
            .last_process(ProcessStep::StatusCheck)
            .build();
        fx.store.put_incident(&incident).unwrap();
        fx.store
            .update_incident("i1", &mut |i| i.state = IncidentState::Closed)
            .unwrap();

        let reconciler = Reconciler::new(fx.ctx.clone());
        let next = reconciler.advance_past_cooldown(&incident).await.unwrap();

        let Next::Continue(updated) = next else { panic!("expected Continue") };
        assert_eq!(updated.last_process, ProcessStep::Closed);
        incident.last_process = ProcessStep::Closed;
        let _ = incident;
    }

    #[tokio::test]
    async fn remove_happy_path_deletes_the_only_replica_then_closes() {
        let fx = fixture(3);
        fx.provisioning.seed_instance(
            chester_core::ReplicaInstance {
                name: "db-a-r-abc".to_string(),
                private_ip: Some("10.0.0.7".to_string()),
                public_ip: None,
            },
            HashMap::from([("chester".to_string(), "true".to_string())]),
        );
        fx.store
            .put_proxy_config(&{
                let mut config = fx.store.get_proxy_config("db-a").unwrap().unwrap();
                config.add_read_replica("10.0.0.7");
                config
            })
            .unwrap();

        let incident = IncidentBuilder::new("i1", Action::Remove)
            .sql_master_instance("db-a")
            .replica_base_name("db-a-r-")
            .build();
        fx.store.put_incident(&incident).unwrap();

        let reconciler = Reconciler::new(fx.ctx.clone());
        reconciler.run(incident).await.unwrap();

        assert!(fx.store.get_incident("i1").unwrap().is_none());
        let config = fx.store.get_proxy_config("db-a").unwrap().unwrap();
        assert!(config.mysql_servers.is_empty());
        assert!(fx.notifier.calls().iter().any(|c| c.message.contains("Scale down failed")));
    }
}
