//! services/api/src/adapters/firebase.rs
//!
//! This module contains the adapter for Firebase Authentication. It implements
//! the `IdentityVerifier` port by asking the Identity Toolkit API which
//! account an ID token belongs to; Google checks signature and expiry.

use async_trait::async_trait;
use ebook_hub_core::ports::{IdentityVerifier, PortError, PortResult, VerifiedIdentity};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const LOOKUP_URL: &str = "https://identitytoolkit.googleapis.com/v1/accounts:lookup";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Carries the API key, so it never appears in a logged URL.
const API_KEY_HEADER: &str = "X-Goog-Api-Key";

//=========================================================================================
// Wire Types
//=========================================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupRequest<'a> {
    id_token: &'a str,
}

#[derive(Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<AccountInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountInfo {
    local_id: String,
    email: Option<String>,
    display_name: Option<String>,
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `IdentityVerifier` port using Firebase.
#[derive(Clone)]
pub struct FirebaseVerifier {
    client: reqwest::Client,
    api_key: String,
    lookup_url: String,
}

impl FirebaseVerifier {
    /// Creates a new `FirebaseVerifier`.
    pub fn new(api_key: String) -> Result<Self, PortError> {
        Self::with_endpoint(api_key, LOOKUP_URL.to_string())
    }

    /// Points the verifier at a different lookup endpoint (e.g. the auth emulator).
    pub fn with_endpoint(api_key: String, lookup_url: String) -> Result<Self, PortError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(Self {
            client,
            api_key,
            lookup_url,
        })
    }
}

//=========================================================================================
// `IdentityVerifier` Trait Implementation
//=========================================================================================

#[async_trait]
impl IdentityVerifier for FirebaseVerifier {
    async fn verify(&self, id_token: &str) -> PortResult<VerifiedIdentity> {
        let response = self
            .client
            .post(&self.lookup_url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&LookupRequest { id_token })
            .send()
            .await
            .map_err(|e| {
                PortError::Unexpected(format!("lookup request failed: {}", e.without_url()))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PortError::Unauthorized(format!(
                "token rejected with status {}",
                status
            )));
        }

        let body: LookupResponse = response
            .json()
            .await
            .map_err(|e| {
                PortError::Unexpected(format!("unreadable lookup response: {}", e.without_url()))
            })?;

        let account = body
            .users
            .into_iter()
            .next()
            .ok_or_else(|| PortError::Unauthorized("token matches no account".to_string()))?;

        Ok(VerifiedIdentity {
            subject_id: account.local_id,
            email: account.email,
            display_name: account.display_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transport_failures_do_not_leak_the_api_key() {
        let verifier = FirebaseVerifier::with_endpoint(
            "firebase-secret-key".to_string(),
            "http://127.0.0.1:1/v1/accounts:lookup".to_string(),
        )
        .unwrap();

        match verifier.verify("some-token").await {
            Err(PortError::Unexpected(message)) => {
                assert!(!message.contains("firebase-secret-key"), "{}", message);
            }
            other => panic!("expected a transport failure, got {:?}", other.map(|_| ())),
        }
    }
}
