// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! chester-storage: durable incident and proxy-config persistence (§3.1, §4.2).
//!
//! Mutations are appended to a write-ahead log and fsynced before the
//! in-memory projection is updated, so [`WalIncidentStore::open`] can
//! rebuild exact pre-crash state by replaying the log. The schema carries
//! a version tag (see `chester-core`'s wire types) but no migration
//! machinery: today there is exactly one schema version.

mod state;
mod store;
mod wal;

pub use state::MaterializedState;
pub use store::{IncidentStore, StoreError, WalIncidentStore};
pub use wal::{Wal, WalEntry, WalError, WalEvent};

#[cfg(any(test, feature = "test-support"))]
pub use store::InMemoryIncidentStore;
