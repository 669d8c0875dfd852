//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::web::session::SessionSigner;
use ebook_hub_core::{IdentityResolver, LibraryService};
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
/// Holds no per-caller data: the caller's identity travels with each request.
#[derive(Clone)]
pub struct AppState {
    pub library: Arc<LibraryService>,
    pub identity: Arc<IdentityResolver>,
    pub sessions: Arc<SessionSigner>,
}
