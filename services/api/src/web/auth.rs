//! services/api/src/web/auth.rs
//!
//! Authentication endpoints: the static admin login and the federated
//! (Firebase) login. Both answer with a bearer session token.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use chrono::{DateTime, Utc};
use ebook_hub_core::{AuthFailure, FederatedLogin, LibraryError, Principal, Role, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::web::state::AppState;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct AdminLoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize, ToSchema)]
pub struct FederatedLoginRequest {
    /// The ID token issued by the identity provider.
    #[serde(default)]
    pub id_token: String,
    /// Display fallback only; never used to pick the account.
    pub email: Option<String>,
    /// Display fallback only.
    pub name: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    #[schema(value_type = String, example = "User")]
    pub role: Role,
    pub username: String,
    /// Absent for the static admin, which has no account row.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    pub expires_at: DateTime<Utc>,
}

fn session_response(state: &AppState, principal: Principal) -> Result<Json<AuthResponse>, ApiError> {
    let issued = state.sessions.issue(&principal.identity)?;
    let user_id = match principal.identity.role {
        Role::User => Some(principal.identity.user_id),
        Role::Admin => None,
    };
    Ok(Json(AuthResponse {
        token: issued.token,
        role: principal.identity.role,
        username: principal.display_name,
        user_id,
        expires_at: issued.expires_at,
    }))
}

/// An absent or unreadable login body counts as a missing credential.
fn missing_credential() -> ApiError {
    LibraryError::Unauthenticated(AuthFailure::MissingCredential).into()
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /api/auth/admin-login - Log in as the static administrator
#[utoipa::path(
    post,
    path = "/api/auth/admin-login",
    request_body = AdminLoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials")
    ),
    tag = "auth"
)]
pub async fn admin_login_handler(
    State(state): State<Arc<AppState>>,
    req: Result<Json<AdminLoginRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, ApiError> {
    let Json(req) = req.map_err(|_| missing_credential())?;
    let principal = state.identity.login_admin(&req.username, &req.password)?;
    session_response(&state, principal)
}

/// POST /api/auth/google-login - Log in with a Firebase ID token
///
/// The account is looked up by the email the provider verified, and created
/// on first login.
#[utoipa::path(
    post,
    path = "/api/auth/google-login",
    request_body = FederatedLoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Token missing or verification failed")
    ),
    tag = "auth"
)]
pub async fn federated_login_handler(
    State(state): State<Arc<AppState>>,
    req: Result<Json<FederatedLoginRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, ApiError> {
    let Json(req) = req.map_err(|_| missing_credential())?;
    let principal = state
        .identity
        .login_federated(FederatedLogin {
            id_token: req.id_token,
            email: req.email,
            name: req.name,
        })
        .await?;
    session_response(&state, principal)
}
