// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Builds the per-collaborator HTTP clients used by the real adapters.
//! Each client authenticates with the bearer token read from its own
//! credential file (§6: `PUBSUB_CREDS`/`SQLADMIN_CREDS`/`KMS_CREDS`), kept
//! separate so rotating one credential never touches the others.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use std::path::Path;

pub fn bearer_client(creds_path: &Path) -> std::io::Result<reqwest::Client> {
    let token = std::fs::read_to_string(creds_path)?;
    let token = token.trim();

    let mut headers = HeaderMap::new();
    let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
        .unwrap_or_else(|_| HeaderValue::from_static("Bearer invalid"));
    value.set_sensitive(true);
    headers.insert(AUTHORIZATION, value);

    reqwest::Client::builder()
        .default_headers(headers)
        .build()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
}
