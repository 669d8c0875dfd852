//! crates/ebook_hub_core/src/domain.rs
//!
//! Defines the pure, core data structures for the library.
//! These structs are independent of any database or wire format.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type DocumentId = i64;

/// The reserved, non-store-backed user id carried by the static admin session.
pub const ADMIN_USER_ID: UserId = -1;

//=========================================================================================
// Identity
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::User => "User",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Admin" => Ok(Role::Admin),
            "User" => Ok(Role::User),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// The authenticated caller. Built only from a validated session credential
/// and passed explicitly into every library operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub role: Role,
}

impl Identity {
    pub fn admin() -> Self {
        Self {
            user_id: ADMIN_USER_ID,
            role: Role::Admin,
        }
    }

    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::User,
        }
    }
}

/// A successful login: who the caller is plus a name to greet them with.
#[derive(Debug, Clone)]
pub struct Principal {
    pub identity: Identity,
    pub display_name: String,
}

// Represents a store-backed reader account.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub display_name: String,
    pub external_id: Option<String>,
    pub role: Role,
}

// Only used when provisioning a user from a federated login.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub display_name: String,
    pub external_id: Option<String>,
}

//=========================================================================================
// Documents
//=========================================================================================

/// An uploaded readable work.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub author: Option<String>,
    pub asset_ref: String,
    pub cover_ref: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

/// The row written once the document's blobs are durable.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub title: String,
    pub author: Option<String>,
    pub asset_ref: String,
    pub cover_ref: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

/// A binary part received from a client.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Bytes,
}

/// A validated-at-the-boundary admin upload request.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub title: String,
    pub author: Option<String>,
    pub file: Upload,
    pub cover: Option<Upload>,
}

/// A blob already written to the asset gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAsset {
    pub asset_ref: String,
    pub size: u64,
}

/// An upload whose parts were streamed into storage as they arrived and
/// which still needs its row.
#[derive(Debug, Clone)]
pub struct DocumentDraft {
    pub title: String,
    pub author: Option<String>,
    pub file: StoredAsset,
    pub cover: Option<StoredAsset>,
}

//=========================================================================================
// Reading artifacts
//=========================================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ReadingProgress {
    pub user_id: UserId,
    pub document_id: DocumentId,
    pub last_position: i32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub document_id: DocumentId,
    pub last_position: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Highlight {
    pub id: i64,
    pub user_id: UserId,
    pub document_id: DocumentId,
    pub selected_text: String,
    pub note: Option<String>,
    pub page_number: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewHighlight {
    pub document_id: DocumentId,
    pub selected_text: String,
    pub note: Option<String>,
    pub page_number: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sketch {
    pub id: i64,
    pub user_id: UserId,
    pub document_id: DocumentId,
    pub page_number: i32,
    pub canvas_data: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SketchUpdate {
    pub document_id: DocumentId,
    pub page_number: i32,
    pub canvas_data: String,
}
