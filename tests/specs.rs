// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios driving the reconciler and the startup sweeper
//! purely through their public ports, without reaching into either
//! crate's private step handlers.

use chester_adapters::{
    split_provisioning_backend, FakeEventBus, FakeNotifier, FakeProvisioningClient,
    FakeProxyConfigWriter, OperationPoller, ProvisioningClient,
};
use chester_core::{
    Action, ChesterMetaData, FakeClock, FakeSleeper, IncidentBuilder, IncidentState,
    PrimaryInstance, ProcessStep, ProxyConfig,
};
use chester_engine::{ReconcilerConfig, ReconcilerContext, Reconciler, StartupSweeper};
use chester_storage::{IncidentStore, InMemoryIncidentStore};
use std::collections::HashMap;
use std::sync::Arc;
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

struct Harness {
    ctx: Arc<ReconcilerContext>,
    store: Arc<InMemoryIncidentStore>,
    provisioning: Arc<FakeProvisioningClient>,
    proxy_writer: Arc<FakeProxyConfigWriter>,
    notifier: Arc<FakeNotifier>,
}

fn harness(max_chester_instances: usize) -> Harness {
    let store = Arc::new(InMemoryIncidentStore::default());
    store
        .put_proxy_config(&ProxyConfig {
            username: "chester".to_string(),
            encrypted_password: b"hunter2".to_vec(),
            ..ProxyConfig::new("db-a")
        })
        .unwrap();
    store.put_metadata("db-a", ChesterMetaData { max_chester_instances }).unwrap();

    let provisioning = Arc::new(FakeProvisioningClient::new(primary()));
    provisioning.auto_complete_operations();
    let (provisioning_port, operation_source) = split_provisioning_backend(provisioning.clone());

    let proxy_writer = Arc::new(FakeProxyConfigWriter::default());
    let notifier = Arc::new(FakeNotifier::default());
    let sleeper = Arc::new(FakeSleeper::default());

    let ctx = Arc::new(ReconcilerContext {
        store: store.clone(),
        provisioning: provisioning_port,
        operation_source,
        proxy_writer: proxy_writer.clone(),
        notifier: notifier.clone(),
        decryptor: Arc::new(chester_adapters::FakeDecryptor),
        poller: OperationPoller::new(sleeper.clone(), Duration::from_secs(1800)),
        clock: Arc::new(FakeClock::default()),
        sleeper,
        config: ReconcilerConfig::new("net-proj", "shared-vpc"),
    });

    Harness { ctx, store, provisioning, proxy_writer, notifier }
}

/// S1 (add, cold): a fresh incident at `GCFPush` runs straight through to
/// completion — one insert, the rendered config gains the new private IP,
/// the deployment is restarted, and the incident is deleted once closed.
#[tokio::test]
async fn s1_add_cold_runs_to_completion() {
    let h = harness(3);
    let incident = IncidentBuilder::new("i1", Action::Add).build();
    h.store.put_incident(&incident).unwrap();

    let reconciler = Reconciler::new(h.ctx.clone());
    reconciler.run(incident).await.unwrap();

    assert!(h.store.get_incident("i1").unwrap().is_none());
    let rendered = h.proxy_writer.rendered_config("db-a").expect("config was written");
    assert!(rendered.contains("10.0.0.1"));
    assert_eq!(h.proxy_writer.restart_count("db-a"), 1);

    let instances = h.provisioning.list_instances(&Default::default()).await.unwrap();
    assert_eq!(instances.len(), 1);
}

/// S2 (add, resume mid-insert): an incident that crashed right after
/// issuing the create (identifiers already persisted, `LastProcess` at
/// `InstanceInsert`) does not issue a second create; it resumes by
/// polling the existing operation and finishes the same way S1 does.
#[tokio::test]
async fn s2_add_resumes_from_instance_insert_without_a_second_create() {
    let h = harness(3);

    // Seed the replica and operation exactly as a crashed first attempt
    // would have left them: the create already landed, only the
    // checkpoint advance was lost.
    h.provisioning.seed_instance(
        chester_core::ReplicaInstance {
            name: "db-a-r-xyz".to_string(),
            private_ip: Some("10.0.0.9".to_string()),
            public_ip: None,
        },
        HashMap::from([("chester".to_string(), "true".to_string())]),
    );
    h.provisioning.complete_operation("op-1");
    let incident = IncidentBuilder::new("i1", Action::Add)
        .last_process(ProcessStep::InstanceInsert)
        .operation_id("op-1")
        .last_read_replica_name("db-a-r-xyz")
        .build();
    h.store.put_incident(&incident).unwrap();

    let reconciler = Reconciler::new(h.ctx.clone());
    reconciler.run(incident).await.unwrap();

    assert!(h.store.get_incident("i1").unwrap().is_none());
    let instances = h.provisioning.list_instances(&Default::default()).await.unwrap();
    assert_eq!(instances.len(), 1, "no second replica was created");
    let rendered = h.proxy_writer.rendered_config("db-a").expect("config was written");
    assert!(rendered.contains("10.0.0.9"));
}

/// S3 (add, cap reached): with the instance group already at its cap, the
/// reconciler notifies and parks the incident at `DaemonAck` instead of
/// provisioning anything.
#[tokio::test]
async fn s3_add_at_capacity_notifies_and_parks() {
    let h = harness(2);
    h.provisioning.seed_instance(
        chester_core::ReplicaInstance { name: "db-a-r-1".to_string(), private_ip: Some("10.0.0.1".to_string()), public_ip: None },
        HashMap::from([("chester".to_string(), "true".to_string())]),
    );
    h.provisioning.seed_instance(
        chester_core::ReplicaInstance { name: "db-a-r-2".to_string(), private_ip: Some("10.0.0.2".to_string()), public_ip: None },
        HashMap::from([("chester".to_string(), "true".to_string())]),
    );

    let incident = IncidentBuilder::new("i1", Action::Add).build();
    h.store.put_incident(&incident).unwrap();
    let reconciler = Reconciler::new(h.ctx.clone());
    let err = reconciler.run(incident).await.unwrap_err();
    assert!(matches!(err, chester_engine::ReconcileError::CapacityExceeded { .. }));

    let parked = h.store.get_incident("i1").unwrap().expect("incident stays parked");
    assert_eq!(parked.last_process, ProcessStep::DaemonAck);
    assert!(h.notifier.calls().iter().any(|c| c.message.contains("Too many instances")));
    assert_eq!(h.proxy_writer.restart_count("db-a"), 0);
}

/// S4 (remove, happy): the one existing replica is removed from the
/// config before its deployment restart and deletion, and the incident
/// is deleted once the second `DaemonAck` visit finds nothing left to do.
#[tokio::test]
async fn s4_remove_happy_path_deletes_replica_then_closes() {
    let h = harness(3);
    h.provisioning.seed_instance(
        chester_core::ReplicaInstance { name: "db-a-r-1".to_string(), private_ip: Some("10.0.0.7".to_string()), public_ip: None },
        HashMap::from([("chester".to_string(), "true".to_string())]),
    );
    let mut config = h.store.get_proxy_config("db-a").unwrap().unwrap();
    config.mysql_servers.push(chester_core::ProxySqlServer::daemon_owned("10.0.0.7", 1, true));
    h.store.put_proxy_config(&config).unwrap();

    let incident = IncidentBuilder::new("i1", Action::Remove).build();
    h.store.put_incident(&incident).unwrap();
    let reconciler = Reconciler::new(h.ctx.clone());
    reconciler.run(incident).await.unwrap();

    assert!(h.store.get_incident("i1").unwrap().is_none());
    let remaining = h.store.get_proxy_config("db-a").unwrap().unwrap();
    assert!(remaining.mysql_servers.iter().all(|s| s.address != "10.0.0.7"));
    assert_eq!(h.proxy_writer.restart_count("db-a"), 1);
}

/// S5 (remove, none to remove): with zero replicas to remove, the
/// reconciler notifies a scale-down failure and still closes the incident.
#[tokio::test]
async fn s5_remove_with_nothing_to_remove_notifies_and_closes() {
    let h = harness(3);
    let incident = IncidentBuilder::new("i1", Action::Remove).build();
    h.store.put_incident(&incident).unwrap();

    let reconciler = Reconciler::new(h.ctx.clone());
    reconciler.run(incident).await.unwrap();

    assert!(h.store.get_incident("i1").unwrap().is_none());
    assert!(h.notifier.calls().iter().any(|c| c.message.contains("Scale down failed")));
    assert_eq!(h.proxy_writer.restart_count("db-a"), 0);
}

/// S6 (startup sweep): a stale open incident is closed alongside the
/// already-closed one, and the one still within the sweep window is
/// republished so ingestion will pick it back up.
#[tokio::test]
async fn s6_startup_sweep_ages_out_stale_incidents() {
    let now = 1_700_100_000u64;
    let store: Arc<dyn IncidentStore> = Arc::new(InMemoryIncidentStore::default());
    let bus = Arc::new(FakeEventBus::default());
    let clock = Arc::new(FakeClock::new(now));

    let stale = IncidentBuilder::new("stale", Action::Add).state(IncidentState::Open).started_at(now - 4 * 60 * 60).build();
    let fresh = IncidentBuilder::new("fresh", Action::Add).state(IncidentState::Open).started_at(now - 60 * 60).build();
    let closed = IncidentBuilder::new("done", Action::Add).state(IncidentState::Closed).started_at(now - 10).build();
    store.put_incident(&stale).unwrap();
    store.put_incident(&fresh).unwrap();
    store.put_incident(&closed).unwrap();

    let sweeper = StartupSweeper::new(store.clone(), bus.clone(), clock);
    let report = sweeper.run().await.unwrap();

    assert_eq!(report.closed, 2);
    assert_eq!(report.republished, 1);
    assert!(store.get_incident("stale").unwrap().is_none());
    assert!(store.get_incident("done").unwrap().is_none());
    assert!(store.get_incident("fresh").unwrap().is_some());
    assert_eq!(bus.published().iter().map(|i| i.incident_id.clone()).collect::<Vec<_>>(), vec!["fresh".to_string()]);
}
