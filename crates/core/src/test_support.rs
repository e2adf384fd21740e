// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test fixtures for other crates' test suites.

use crate::{Action, Incident, IncidentBuilder, ProcessStep};

/// A fresh `add` incident at the entry step of the happy path (§4.1.1, S1).
pub fn cold_add_incident(incident_id: &str) -> Incident {
    IncidentBuilder::new(incident_id, Action::Add)
        .last_process(ProcessStep::GcfPush)
        .sql_master_instance("db-a")
        .replica_base_name("db-a-r-")
        .started_at(1_700_000_000)
        .build()
}

/// An `add` incident resumed mid-insert, with the identifiers already
/// persisted from a prior attempt (§4.1.4, S2).
pub fn resumed_add_incident(incident_id: &str) -> Incident {
    IncidentBuilder::new(incident_id, Action::Add)
        .last_process(ProcessStep::InstanceInsert)
        .operation_id("op-42")
        .last_read_replica_name("db-a-r-xyz")
        .sql_master_instance("db-a")
        .replica_base_name("db-a-r-")
        .started_at(1_700_000_000)
        .build()
}

/// A fresh `remove` incident at the entry step (S4, S5).
pub fn cold_remove_incident(incident_id: &str) -> Incident {
    IncidentBuilder::new(incident_id, Action::Remove)
        .last_process(ProcessStep::GcfPush)
        .sql_master_instance("db-a")
        .started_at(1_700_000_000)
        .build()
}
