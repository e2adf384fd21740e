// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate (§6).

use crate::error::DaemonError;
use std::path::PathBuf;
use std::time::Duration;

/// Everything the daemon needs to boot, collected eagerly so a missing or
/// malformed variable fails fast instead of surfacing mid-run (§7:
/// Configuration errors are fatal at boot).
#[derive(Debug, Clone)]
pub struct Config {
    pub project_id: String,
    pub network_project_id: String,
    pub network_name: String,

    pub pubsub_creds: PathBuf,
    pub datastore_creds: PathBuf,
    pub sqladmin_creds: PathBuf,
    pub kms_creds: PathBuf,

    pub pubsub_topic: String,
    pub pubsub_subscription: String,

    pub in_cluster: bool,

    pub first_segment: String,
    pub second_segment: String,
    pub third_segment: String,

    pub state_dir: PathBuf,
    pub operation_timeout: Duration,
    pub cooldown: Duration,
    pub log_filter: String,
}

fn require_env(name: &'static str) -> Result<String, DaemonError> {
    std::env::var(name).map_err(|_| DaemonError::MissingEnv(name))
}

fn require_path(name: &'static str) -> Result<PathBuf, DaemonError> {
    require_env(name).map(PathBuf::from)
}

fn optional_secs(name: &'static str, default: u64) -> Result<Duration, DaemonError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| DaemonError::InvalidEnv { name, value: raw }),
        Err(_) => Ok(Duration::from_secs(default)),
    }
}

/// `$XDG_STATE_HOME/chester`, falling back to `~/.local/state/chester`.
/// Overridable with `CHESTER_STATE_DIR` (§6).
fn default_state_dir() -> Result<PathBuf, DaemonError> {
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("chester"));
    }
    let home = std::env::var("HOME").map_err(|_| DaemonError::NoStateDir)?;
    Ok(PathBuf::from(home).join(".local/state/chester"))
}

impl Config {
    pub fn load() -> Result<Self, DaemonError> {
        let state_dir = match std::env::var("CHESTER_STATE_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => default_state_dir()?,
        };

        Ok(Self {
            project_id: require_env("PROJECT_ID")?,
            network_project_id: require_env("NETWORK_PROJECT_ID")?,
            network_name: require_env("NETWORK_NAME")?,

            pubsub_creds: require_path("PUBSUB_CREDS")?,
            datastore_creds: require_path("DATASTORE_CREDS")?,
            sqladmin_creds: require_path("SQLADMIN_CREDS")?,
            kms_creds: require_path("KMS_CREDS")?,

            pubsub_topic: require_env("PUBSUB_TOPIC")?,
            pubsub_subscription: require_env("PUBSUB_SUBSCRIPTION")?,

            in_cluster: require_env("IN_CLUSTER")?.eq_ignore_ascii_case("true"),

            first_segment: require_env("FIRST_SEGMENT")?,
            second_segment: require_env("SECOND_SEGMENT")?,
            third_segment: require_env("THIRD_SEGMENT")?,

            state_dir,
            operation_timeout: optional_secs("CHESTER_OPERATION_TIMEOUT_SECS", 1800)?,
            cooldown: optional_secs("CHESTER_COOLDOWN_SECS", 300)?,
            log_filter: std::env::var("CHESTER_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.state_dir.join("chester.wal")
    }

    /// Base URL for the SQL admin API. Overridable with
    /// `CHESTER_SQLADMIN_URL` so integration tests can point at a local stub.
    pub fn sqladmin_base_url(&self) -> String {
        std::env::var("CHESTER_SQLADMIN_URL")
            .unwrap_or_else(|_| format!("https://sqladmin.googleapis.com/sql/v1beta4/projects/{}", self.project_id))
    }

    pub fn pubsub_base_url(&self) -> String {
        std::env::var("CHESTER_PUBSUB_URL")
            .unwrap_or_else(|_| format!("https://pubsub.googleapis.com/v1/projects/{}", self.project_id))
    }

    pub fn kms_endpoint(&self) -> String {
        std::env::var("CHESTER_KMS_URL").unwrap_or_else(|_| {
            format!(
                "https://cloudkms.googleapis.com/v1/projects/{}/locations/global/keyRings/chester/cryptoKeys/chester:decrypt",
                self.project_id
            )
        })
    }
}
