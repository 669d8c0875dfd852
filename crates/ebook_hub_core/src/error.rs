//! crates/ebook_hub_core/src/error.rs
//!
//! The error taxonomy every library operation reports in.

use crate::ports::PortError;

/// Why a caller could not be authenticated. Never tells the caller whether
/// the rejected identifier exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthFailure {
    #[error("credential missing")]
    MissingCredential,
    #[error("identity verification failed")]
    VerificationFailed,
    #[error("invalid credentials")]
    Unauthorized,
    #[error("invalid or expired session")]
    InvalidSession,
}

#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("Not authenticated: {0}")]
    Unauthenticated(AuthFailure),

    #[error("Forbidden")]
    Forbidden,

    /// Absent, or owned by someone else. The two are not distinguished.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The identity verifier or the asset gateway failed.
    #[error("Dependency failure: {0}")]
    DependencyFailure(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

pub type LibraryResult<T> = Result<T, LibraryError>;

impl LibraryError {
    /// Maps a failure reported by the relational store.
    pub fn from_store(err: PortError) -> Self {
        match err {
            PortError::NotFound(what) => LibraryError::NotFound(what),
            PortError::Unavailable(msg) | PortError::Unexpected(msg) => {
                LibraryError::StoreUnavailable(msg)
            }
            PortError::Unauthorized(msg) => LibraryError::StoreUnavailable(msg),
        }
    }

    /// Maps a failure reported by a non-store collaborator.
    pub fn from_dependency(err: PortError) -> Self {
        LibraryError::DependencyFailure(err.to_string())
    }
}
