// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Key-management collaborator used to decrypt `ProxyConfig` credentials
//! before rendering (§4.5). A thin wrapper by design (§9 Non-goals): the
//! daemon never generates or rotates keys, only decrypts on render.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecryptError {
    #[error("decrypt failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait Decryptor: Send + Sync {
    async fn decrypt(&self, ciphertext: &[u8]) -> Result<String, DecryptError>;
}

/// Real KMS-backed decryptor. Calls the provider's `decrypt` RPC over the
/// same HTTP client used for provisioning; ciphertext and plaintext both
/// travel base64-encoded on the wire.
pub struct HttpDecryptor {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpDecryptor {
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Decryptor for HttpDecryptor {
    async fn decrypt(&self, ciphertext: &[u8]) -> Result<String, DecryptError> {
        use base64::Engine;
        let body = serde_json::json!({
            "ciphertext": base64::engine::general_purpose::STANDARD.encode(ciphertext),
        });
        let resp = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| DecryptError::Failed(e.to_string()))?;
        let parsed: serde_json::Value =
            resp.json().await.map_err(|e| DecryptError::Failed(e.to_string()))?;
        let plaintext_b64 = parsed
            .get("plaintext")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DecryptError::Failed("missing plaintext in response".to_string()))?;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(plaintext_b64)
            .map_err(|e| DecryptError::Failed(e.to_string()))?;
        String::from_utf8(decoded).map_err(|e| DecryptError::Failed(e.to_string()))
    }
}

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;

    /// Returns the ciphertext bytes decoded as UTF-8, unmodified: good
    /// enough for tests that only need decrypt to round-trip a known
    /// plaintext through `ProxyConfig::encrypted_password`.
    #[derive(Default)]
    pub struct FakeDecryptor;

    #[async_trait]
    impl Decryptor for FakeDecryptor {
        async fn decrypt(&self, ciphertext: &[u8]) -> Result<String, DecryptError> {
            String::from_utf8(ciphertext.to_vec()).map_err(|e| DecryptError::Failed(e.to_string()))
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeDecryptor;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_decryptor_round_trips_plaintext_bytes() {
        let decryptor = FakeDecryptor;
        let plaintext = decryptor.decrypt(b"hunter2").await.unwrap();
        assert_eq!(plaintext, "hunter2");
    }
}
