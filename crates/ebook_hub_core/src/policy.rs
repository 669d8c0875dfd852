//! crates/ebook_hub_core/src/policy.rs
//!
//! The access policy: a pure decision over (caller, operation) consulted
//! before every store access.
//!
//! Library-wide operations are open to any authenticated caller or to admins
//! only. Reading artifacts (progress, highlights, sketches) are scoped to the
//! caller's own user id, which is taken from the session and nothing else.
//! The static admin is not a store-backed user, so it owns no artifacts.

use crate::domain::{Identity, Role, UserId};
use crate::error::{LibraryError, LibraryResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ListDocuments,
    GetDocument,
    CreateDocument,
    DeleteDocument,
    GetProgress,
    SaveProgress,
    ListHighlights,
    SaveHighlight,
    ListSketches,
    SaveSketch,
}

impl Operation {
    fn is_admin_only(self) -> bool {
        matches!(self, Operation::CreateDocument | Operation::DeleteDocument)
    }

    fn is_owner_scoped(self) -> bool {
        matches!(
            self,
            Operation::GetProgress
                | Operation::SaveProgress
                | Operation::ListHighlights
                | Operation::SaveHighlight
                | Operation::ListSketches
                | Operation::SaveSketch
        )
    }
}

/// What an allowed operation may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The shared document catalogue.
    Library,
    /// Only rows owned by this user.
    Owner(UserId),
}

pub fn authorize(identity: &Identity, operation: Operation) -> LibraryResult<Scope> {
    if operation.is_admin_only() {
        return match identity.role {
            Role::Admin => Ok(Scope::Library),
            Role::User => Err(LibraryError::Forbidden),
        };
    }

    if operation.is_owner_scoped() {
        return match identity.role {
            Role::User => Ok(Scope::Owner(identity.user_id)),
            Role::Admin => Err(LibraryError::Forbidden),
        };
    }

    Ok(Scope::Library)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Operation; 10] = [
        Operation::ListDocuments,
        Operation::GetDocument,
        Operation::CreateDocument,
        Operation::DeleteDocument,
        Operation::GetProgress,
        Operation::SaveProgress,
        Operation::ListHighlights,
        Operation::SaveHighlight,
        Operation::ListSketches,
        Operation::SaveSketch,
    ];

    #[test]
    fn catalogue_reads_are_open_to_every_role() {
        for identity in [Identity::admin(), Identity::user(3)] {
            assert_eq!(
                authorize(&identity, Operation::ListDocuments).unwrap(),
                Scope::Library
            );
            assert_eq!(
                authorize(&identity, Operation::GetDocument).unwrap(),
                Scope::Library
            );
        }
    }

    #[test]
    fn catalogue_writes_need_admin() {
        let reader = Identity::user(3);
        for op in [Operation::CreateDocument, Operation::DeleteDocument] {
            assert!(matches!(authorize(&reader, op), Err(LibraryError::Forbidden)));
            assert_eq!(authorize(&Identity::admin(), op).unwrap(), Scope::Library);
        }
    }

    #[test]
    fn artifacts_are_scoped_to_the_session_user() {
        let reader = Identity::user(42);
        for op in ALL.into_iter().filter(|op| op.is_owner_scoped()) {
            assert_eq!(authorize(&reader, op).unwrap(), Scope::Owner(42));
            assert!(matches!(
                authorize(&Identity::admin(), op),
                Err(LibraryError::Forbidden)
            ));
        }
    }
}
