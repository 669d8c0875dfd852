//! crates/ebook_hub_core/src/identity.rs
//!
//! Resolves inbound credentials to an `Identity`.
//!
//! Two paths exist: the single static admin (username and password checked
//! against a configured argon2 hash) and federated login, where an external
//! verifier vouches for the caller and a reader account is provisioned on
//! first sight of a verified email.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::{Identity, NewUser, Principal};
use crate::error::{AuthFailure, LibraryError, LibraryResult};
use crate::ports::{IdentityVerifier, LibraryStore};

const FALLBACK_DISPLAY_NAME: &str = "User";

#[derive(Debug, thiserror::Error)]
#[error("Invalid admin credential: {0}")]
pub struct CredentialError(String);

/// The one static admin account. The password is only ever held hashed.
#[derive(Clone)]
pub struct AdminCredential {
    username: String,
    password_hash: String,
}

impl std::fmt::Debug for AdminCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminCredential")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl AdminCredential {
    /// Hashes a plain password at startup.
    pub fn from_password(username: &str, password: &str) -> Result<Self, CredentialError> {
        if password.is_empty() {
            return Err(CredentialError("password must not be empty".to_string()));
        }
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| CredentialError(e.to_string()))?
            .to_string();
        Self::from_hash(username, &password_hash)
    }

    /// Accepts a pre-computed argon2 PHC string.
    pub fn from_hash(username: &str, password_hash: &str) -> Result<Self, CredentialError> {
        if username.trim().is_empty() {
            return Err(CredentialError("username must not be empty".to_string()));
        }
        PasswordHash::new(password_hash).map_err(|e| CredentialError(e.to_string()))?;
        Ok(Self {
            username: username.to_string(),
            password_hash: password_hash.to_string(),
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    fn matches(&self, username: &str, password: &str) -> bool {
        // Checked in full even on a username mismatch.
        let password_ok = PasswordHash::new(&self.password_hash)
            .map(|parsed| {
                Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok()
            })
            .unwrap_or(false);
        password_ok && username == self.username
    }
}

/// A federated login attempt. `email` and `name` are whatever the client
/// claims; they are only ever used as display fallbacks.
#[derive(Debug, Clone, Default)]
pub struct FederatedLogin {
    pub id_token: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

pub struct IdentityResolver {
    admin: AdminCredential,
    verifier: Arc<dyn IdentityVerifier>,
    store: Arc<dyn LibraryStore>,
}

impl IdentityResolver {
    pub fn new(
        admin: AdminCredential,
        verifier: Arc<dyn IdentityVerifier>,
        store: Arc<dyn LibraryStore>,
    ) -> Self {
        Self {
            admin,
            verifier,
            store,
        }
    }

    pub fn login_admin(&self, username: &str, password: &str) -> LibraryResult<Principal> {
        if username.is_empty() || password.is_empty() {
            return Err(LibraryError::Unauthenticated(AuthFailure::MissingCredential));
        }
        if !self.admin.matches(username, password) {
            warn!("Rejected admin login");
            return Err(LibraryError::Unauthenticated(AuthFailure::Unauthorized));
        }
        info!("Admin logged in");
        Ok(Principal {
            identity: Identity::admin(),
            display_name: self.admin.username.clone(),
        })
    }

    pub async fn login_federated(&self, login: FederatedLogin) -> LibraryResult<Principal> {
        let id_token = login.id_token.trim();
        if id_token.is_empty() {
            return Err(LibraryError::Unauthenticated(AuthFailure::MissingCredential));
        }

        let verified = self.verifier.verify(id_token).await.map_err(|e| {
            warn!("Identity verification failed: {}", e);
            LibraryError::Unauthenticated(AuthFailure::VerificationFailed)
        })?;

        // The trust source for the account key is the verifier alone.
        let email = verified
            .email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .ok_or_else(|| {
                warn!(
                    "Verified identity {} carries no email claim",
                    verified.subject_id
                );
                LibraryError::Unauthenticated(AuthFailure::VerificationFailed)
            })?
            .to_string();

        let display_name = verified
            .display_name
            .or(login.name)
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| FALLBACK_DISPLAY_NAME.to_string());

        let user = match self
            .store
            .find_user_by_email(&email)
            .await
            .map_err(LibraryError::from_store)?
        {
            Some(existing) => existing,
            None => {
                let user = self
                    .store
                    .get_or_create_user(NewUser {
                        email,
                        display_name,
                        external_id: Some(verified.subject_id),
                    })
                    .await
                    .map_err(LibraryError::from_store)?;
                info!("Provisioned reader account {}", user.id);
                user
            }
        };

        Ok(Principal {
            identity: Identity::user(user.id),
            display_name: user.display_name,
        })
    }
}
