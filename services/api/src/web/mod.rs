pub mod auth;
pub mod middleware;
pub mod reading;
pub mod rest;
pub mod session;
pub mod state;

use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

pub use middleware::require_auth;
pub use session::SessionSigner;
pub use state::AppState;

/// Builds the `/api` routes. Everything except the two login endpoints sits
/// behind `require_auth`. Static files, CORS and Swagger are layered on by
/// the binary.
pub fn create_router(state: Arc<AppState>) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/api/auth/admin-login", post(auth::admin_login_handler))
        .route("/api/auth/google-login", post(auth::federated_login_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route(
            "/api/documents",
            get(rest::list_documents_handler).post(rest::create_document_handler),
        )
        .route(
            "/api/documents/{id}",
            get(rest::get_document_handler).delete(rest::delete_document_handler),
        )
        .route("/api/progress", post(reading::save_progress_handler))
        .route("/api/progress/{document_id}", get(reading::get_progress_handler))
        .route("/api/highlights", post(reading::save_highlight_handler))
        .route(
            "/api/highlights/{document_id}",
            get(reading::list_highlights_handler),
        )
        .route("/api/sketches", post(reading::save_sketch_handler))
        .route(
            "/api/sketches/{document_id}/{page_number}",
            get(reading::list_sketches_handler),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        // Document uploads have no size ceiling.
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}
