// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The incident record and its step-cursor vocabulary (§3, §4.1).

use serde::{Deserialize, Serialize};

/// What the incident wants the daemon to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Add,
    Remove,
    Restart,
}

crate::simple_display! {
    Action {
        Add => "add",
        Remove => "remove",
        Restart => "restart",
    }
}

/// Whether the external originator still wants the incident progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentState {
    Open,
    Closed,
}

crate::simple_display! {
    IncidentState {
        Open => "open",
        Closed => "closed",
    }
}

/// Step cursor for the reconciler's state machine (§4.1).
///
/// Represents the *next* step to execute on resume. `Unknown` preserves an
/// unrecognized wire value so the reconciler can report it rather than
/// silently discarding it (§4.1.1's "unknown status" error).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessStep {
    GcfPush,
    DaemonAck,
    InstanceInsert,
    ConfigUpdate,
    ProxysqlRestart,
    StatusCheck,
    Closed,
    Clear,
    Fail,
    Unknown(String),
}

impl ProcessStep {
    pub fn as_str(&self) -> &str {
        match self {
            ProcessStep::GcfPush => "GCFPush",
            ProcessStep::DaemonAck => "DaemonAck",
            ProcessStep::InstanceInsert => "InstanceInsert",
            ProcessStep::ConfigUpdate => "ConfigUpdate",
            ProcessStep::ProxysqlRestart => "ProxysqlRestart",
            ProcessStep::StatusCheck => "StatusCheck",
            ProcessStep::Closed => "Closed",
            ProcessStep::Clear => "Clear",
            ProcessStep::Fail => "Fail",
            ProcessStep::Unknown(s) => s,
        }
    }

    /// Whether the reconciler loop should stop on entry without error (§4.1.1).
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessStep::Clear)
    }
}

impl std::fmt::Display for ProcessStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessStep {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "GCFPush" => ProcessStep::GcfPush,
            "DaemonAck" => ProcessStep::DaemonAck,
            "InstanceInsert" => ProcessStep::InstanceInsert,
            "ConfigUpdate" => ProcessStep::ConfigUpdate,
            "ProxysqlRestart" => ProcessStep::ProxysqlRestart,
            "StatusCheck" => ProcessStep::StatusCheck,
            "Closed" => ProcessStep::Closed,
            "Clear" => ProcessStep::Clear,
            "Fail" => ProcessStep::Fail,
            other => ProcessStep::Unknown(other.to_string()),
        })
    }
}

impl Serialize for ProcessStep {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ProcessStep {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        // Infallible: unrecognized values become ProcessStep::Unknown.
        Ok(s.parse().unwrap_or_else(|_: std::convert::Infallible| unreachable!()))
    }
}

/// A durable record of one scaling request, carrying its progress cursor (§3).
///
/// Field names mirror the wire format emitted by the event producer so the
/// JSON the daemon decodes off the subscription matches what it writes back
/// to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    #[serde(rename = "IncidentID")]
    pub incident_id: String,
    #[serde(rename = "Action")]
    pub action: Action,
    #[serde(rename = "State")]
    pub state: IncidentState,
    #[serde(rename = "LastProcess")]
    pub last_process: ProcessStep,
    #[serde(rename = "LastUpdatedBy", default)]
    pub last_updated_by: Option<String>,
    #[serde(rename = "OperationID", default)]
    pub operation_id: Option<String>,
    #[serde(rename = "LastReadReplicaName", default)]
    pub last_read_replica_name: Option<String>,
    #[serde(rename = "LastIPAddress", default)]
    pub last_ip_address: Option<String>,
    #[serde(rename = "SqlMasterInstance")]
    pub sql_master_instance: String,
    #[serde(rename = "ReplicaBaseName", default)]
    pub replica_base_name: String,
    #[serde(rename = "StartedAt")]
    pub started_at: u64,
}

impl Incident {
    /// Age of the incident relative to `now`, in seconds. Saturates at zero
    /// if `started_at` is in the future (clock skew from the event producer).
    pub fn age_secs(&self, now: u64) -> u64 {
        now.saturating_sub(self.started_at)
    }

    pub fn mark_updated_by_daemon(&mut self) {
        self.last_updated_by = Some("daemon".to_string());
    }
}

#[cfg(any(test, feature = "test-support"))]
mod builder {
    use super::*;

    pub struct IncidentBuilder {
        incident: Incident,
    }

    impl IncidentBuilder {
        pub fn new(incident_id: impl Into<String>, action: Action) -> Self {
            Self {
                incident: Incident {
                    incident_id: incident_id.into(),
                    action,
                    state: IncidentState::Open,
                    last_process: ProcessStep::GcfPush,
                    last_updated_by: None,
                    operation_id: None,
                    last_read_replica_name: None,
                    last_ip_address: None,
                    sql_master_instance: "db-a".to_string(),
                    replica_base_name: "db-a-r-".to_string(),
                    started_at: 1_700_000_000,
                },
            }
        }

        pub fn state(mut self, state: IncidentState) -> Self {
            self.incident.state = state;
            self
        }

        pub fn last_process(mut self, step: ProcessStep) -> Self {
            self.incident.last_process = step;
            self
        }

        pub fn operation_id(mut self, id: impl Into<String>) -> Self {
            self.incident.operation_id = Some(id.into());
            self
        }

        pub fn last_read_replica_name(mut self, name: impl Into<String>) -> Self {
            self.incident.last_read_replica_name = Some(name.into());
            self
        }

        pub fn last_ip_address(mut self, ip: impl Into<String>) -> Self {
            self.incident.last_ip_address = Some(ip.into());
            self
        }

        pub fn sql_master_instance(mut self, name: impl Into<String>) -> Self {
            self.incident.sql_master_instance = name.into();
            self
        }

        pub fn replica_base_name(mut self, name: impl Into<String>) -> Self {
            self.incident.replica_base_name = name.into();
            self
        }

        pub fn started_at(mut self, secs: u64) -> Self {
            self.incident.started_at = secs;
            self
        }

        pub fn build(self) -> Incident {
            self.incident
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use builder::IncidentBuilder;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_step_round_trips_known_values() {
        for (step, text) in [
            (ProcessStep::GcfPush, "GCFPush"),
            (ProcessStep::DaemonAck, "DaemonAck"),
            (ProcessStep::InstanceInsert, "InstanceInsert"),
            (ProcessStep::ConfigUpdate, "ConfigUpdate"),
            (ProcessStep::ProxysqlRestart, "ProxysqlRestart"),
            (ProcessStep::StatusCheck, "StatusCheck"),
            (ProcessStep::Closed, "Closed"),
            (ProcessStep::Clear, "Clear"),
            (ProcessStep::Fail, "Fail"),
        ] {
            assert_eq!(step.as_str(), text);
            assert_eq!(text.parse::<ProcessStep>().unwrap(), step);
        }
    }

    #[test]
    fn process_step_preserves_unknown_value() {
        let parsed: ProcessStep = "SomethingElse".parse().unwrap();
        assert_eq!(parsed, ProcessStep::Unknown("SomethingElse".to_string()));
        assert!(!parsed.is_terminal());
    }

    #[test]
    fn clear_is_the_only_terminal_step() {
        assert!(ProcessStep::Clear.is_terminal());
        assert!(!ProcessStep::Closed.is_terminal());
        assert!(!ProcessStep::Fail.is_terminal());
    }

    #[test]
    fn incident_decodes_from_producer_wire_format() {
        let json = serde_json::json!({
            "IncidentID": "i1",
            "Action": "add",
            "State": "open",
            "LastProcess": "GCFPush",
            "SqlMasterInstance": "db-a",
            "ReplicaBaseName": "db-a-r-",
            "StartedAt": 1_700_000_000u64,
            "SomeFieldTheDaemonDoesNotKnowAbout": true,
        });
        let incident: Incident = serde_json::from_value(json).unwrap();
        assert_eq!(incident.incident_id, "i1");
        assert_eq!(incident.action, Action::Add);
        assert_eq!(incident.last_process, ProcessStep::GcfPush);
        assert_eq!(incident.operation_id, None);
    }

    #[test]
    fn age_secs_saturates_on_future_started_at() {
        let incident = IncidentBuilder::new("i1", Action::Add).started_at(200).build();
        assert_eq!(incident.age_secs(100), 0);
        assert_eq!(incident.age_secs(500), 300);
    }
}
