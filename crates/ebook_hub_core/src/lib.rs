pub mod domain;
pub mod error;
pub mod identity;
pub mod memory;
pub mod policy;
pub mod ports;
pub mod service;

pub use domain::{
    Document, DocumentDraft, DocumentId, Highlight, Identity, NewDocument, NewHighlight,
    Principal, ProgressUpdate, ReadingProgress, Role, Sketch, SketchUpdate, StoredAsset, Upload,
    User, UserId, ADMIN_USER_ID,
};
pub use error::{AuthFailure, LibraryError, LibraryResult};
pub use identity::{AdminCredential, FederatedLogin, IdentityResolver};
pub use ports::{
    AssetGateway, ChunkStream, IdentityVerifier, LibraryStore, PortError, PortResult,
    VerifiedIdentity,
};
pub use service::LibraryService;
