// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fatal daemon errors (§6 exit codes, §7 Configuration kind).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("missing required environment variable {0}")]
    MissingEnv(&'static str),

    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("could not determine state directory: $HOME is not set")]
    NoStateDir,

    #[error("failed to create state directory {0}: {1}")]
    StateDirCreate(std::path::PathBuf, std::io::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("kubernetes client error: {0}")]
    Kube(#[from] kube::Error),

    #[error("incident store error: {0}")]
    Store(#[from] chester_storage::StoreError),

    #[error("startup sweep failed: {0}")]
    Sweep(#[from] chester_engine::SweepError),

    #[error("event subscription terminated: {0}")]
    Subscription(#[from] chester_adapters::EventError),
}
