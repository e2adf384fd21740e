// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! chester-adapters: ports to every external collaborator the reconciler
//! depends on (§4.2–§4.6), plus real and fake implementations of each.

pub mod events;
pub mod kms;
pub mod notify;
pub mod poller;
pub mod provisioning;
pub mod proxy_writer;

pub use events::{DeliveredEvent, EventError, EventPublisher, EventSource, HttpPubSub};
pub use kms::{DecryptError, Decryptor, HttpDecryptor};
pub use notify::{NotifyError, Notification, Notifier, WebhookNotifier};
pub use poller::{OperationPoller, OperationStatus, OperationStatusSource, PollError};
pub use provisioning::{
    split_provisioning_backend, HttpProvisioningClient, InstanceFilter, ProvisioningClient,
    ProvisioningError, ReplicaRequest,
};
pub use proxy_writer::{KubernetesProxyConfigWriter, ProxyConfigWriter, ProxyWriteError};

#[cfg(any(test, feature = "test-support"))]
pub use events::FakeEventBus;
#[cfg(any(test, feature = "test-support"))]
pub use kms::FakeDecryptor;
#[cfg(any(test, feature = "test-support"))]
pub use notify::FakeNotifier;
#[cfg(any(test, feature = "test-support"))]
pub use provisioning::{FakeInstance, FakeProvisioningClient};
#[cfg(any(test, feature = "test-support"))]
pub use proxy_writer::FakeProxyConfigWriter;
