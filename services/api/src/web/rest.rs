//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the document catalogue and the master
//! definition for the OpenAPI specification.

use crate::error::ApiError;
use crate::web::{auth, reading, state::AppState};
use axum::{
    extract::{multipart::Field, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, Utc};
use ebook_hub_core::policy::{authorize, Operation};
use ebook_hub_core::{
    Document, DocumentDraft, DocumentId, Identity, LibraryService, PortError, StoredAsset,
};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    IntoParams, Modify, OpenApi, ToSchema,
};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::admin_login_handler,
        auth::federated_login_handler,
        list_documents_handler,
        get_document_handler,
        create_document_handler,
        delete_document_handler,
        reading::get_progress_handler,
        reading::save_progress_handler,
        reading::list_highlights_handler,
        reading::save_highlight_handler,
        reading::list_sketches_handler,
        reading::save_sketch_handler,
    ),
    components(
        schemas(
            auth::AdminLoginRequest,
            auth::FederatedLoginRequest,
            auth::AuthResponse,
            DocumentResponse,
            reading::SaveProgressRequest,
            reading::ProgressResponse,
            reading::SaveHighlightRequest,
            reading::HighlightResponse,
            reading::SaveSketchRequest,
            reading::SketchResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Admin and federated login."),
        (name = "documents", description = "The shared document catalogue."),
        (name = "reading", description = "Per-reader progress, highlights and sketches.")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct DocumentResponse {
    pub id: DocumentId,
    pub title: String,
    pub author: Option<String>,
    pub asset_ref: String,
    pub cover_ref: Option<String>,
    pub file_url: String,
    pub cover_url: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

impl DocumentResponse {
    fn new(library: &LibraryService, document: Document) -> Self {
        Self {
            file_url: library.asset_url(&document.asset_ref),
            cover_url: document.cover_ref.as_deref().map(|c| library.asset_url(c)),
            id: document.id,
            title: document.title,
            author: document.author,
            asset_ref: document.asset_ref,
            cover_ref: document.cover_ref,
            uploaded_at: document.uploaded_at,
        }
    }
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DocumentSearch {
    /// Case-insensitive substring of the title.
    pub search: Option<String>,
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// List the catalogue, newest upload first.
#[utoipa::path(
    get,
    path = "/api/documents",
    params(DocumentSearch),
    responses(
        (status = 200, description = "Matching documents", body = [DocumentResponse]),
        (status = 401, description = "Not authenticated")
    ),
    security(("bearer" = [])),
    tag = "documents"
)]
pub async fn list_documents_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    Query(query): Query<DocumentSearch>,
) -> Result<Json<Vec<DocumentResponse>>, ApiError> {
    let documents = state
        .library
        .list_documents(&caller, query.search.as_deref())
        .await?;
    Ok(Json(
        documents
            .into_iter()
            .map(|d| DocumentResponse::new(&state.library, d))
            .collect(),
    ))
}

#[utoipa::path(
    get,
    path = "/api/documents/{id}",
    params(("id" = i64, Path, description = "Document id")),
    responses(
        (status = 200, description = "The document", body = DocumentResponse),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "No such document")
    ),
    security(("bearer" = [])),
    tag = "documents"
)]
pub async fn get_document_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    Path(id): Path<DocumentId>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let document = state.library.get_document(&caller, id).await?;
    Ok(Json(DocumentResponse::new(&state.library, document)))
}

/// Upload a document (admin only).
///
/// Accepts multipart/form-data with parts `file` (required), `cover`
/// (optional image), `title` (required) and `author` (optional).
#[utoipa::path(
    post,
    path = "/api/documents",
    request_body(content_type = "multipart/form-data", description = "The document file, optional cover, title and author."),
    responses(
        (status = 201, description = "Document created", body = DocumentResponse),
        (status = 400, description = "Missing title or empty file"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Caller is not an admin")
    ),
    security(("bearer" = [])),
    tag = "documents"
)]
pub async fn create_document_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    // Refuse non-admins before reading the upload.
    authorize(&caller, Operation::CreateDocument)?;

    let mut form = UploadForm::default();
    if let Err(e) = read_upload_form(&state, &caller, &mut multipart, &mut form).await {
        state.library.discard_uploads(&form.staged()).await;
        return Err(e);
    }

    let Some(file) = form.file else {
        state.library.discard_uploads(&form.cover.into_iter().collect::<Vec<_>>()).await;
        return Err(ApiError::BadRequest("No file uploaded.".to_string()));
    };
    let draft = DocumentDraft {
        title: form.title.unwrap_or_default(),
        author: form.author,
        file,
        cover: form.cover,
    };
    let document = state.library.publish_document(&caller, draft).await?;

    Ok((
        StatusCode::CREATED,
        Json(DocumentResponse::new(&state.library, document)),
    ))
}

/// What has been read from an upload form so far. File parts are already
/// in storage.
#[derive(Default)]
struct UploadForm {
    title: Option<String>,
    author: Option<String>,
    file: Option<StoredAsset>,
    cover: Option<StoredAsset>,
}

impl UploadForm {
    fn staged(&self) -> Vec<StoredAsset> {
        self.file.iter().chain(self.cover.iter()).cloned().collect()
    }
}

async fn read_upload_form(
    state: &AppState,
    caller: &Identity,
    multipart: &mut Multipart,
    form: &mut UploadForm,
) -> Result<(), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read multipart data: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "title" => form.title = Some(read_text(field).await?),
            "author" => form.author = Some(read_text(field).await?),
            "file" | "cover" => {
                let stored = stage_part(state, caller, field).await?;
                let slot = if name == "file" { &mut form.file } else { &mut form.cover };
                // A repeated part replaces the earlier one.
                if let Some(replaced) = slot.replace(stored) {
                    state.library.discard_uploads(&[replaced]).await;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Streams one file part into storage without buffering it.
async fn stage_part(
    state: &AppState,
    caller: &Identity,
    field: Field<'_>,
) -> Result<StoredAsset, ApiError> {
    let file_name = field.file_name().unwrap_or("upload").to_string();
    let mut read_error: Option<String> = None;

    let chunks = stream::unfold((field, &mut read_error), |(mut field, read_error)| async move {
        match field.chunk().await {
            Ok(Some(chunk)) => Some((Ok(chunk), (field, read_error))),
            Ok(None) => None,
            Err(e) => {
                let message = e.to_string();
                *read_error = Some(message.clone());
                Some((Err(PortError::Unexpected(message)), (field, read_error)))
            }
        }
    })
    .boxed();
    let staged = state.library.stage_upload(caller, chunks, &file_name).await;

    match read_error {
        Some(e) => Err(ApiError::BadRequest(format!("Failed to read file bytes: {}", e))),
        None => Ok(staged?),
    }
}

async fn read_text(field: Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read form field: {}", e)))
}

/// Delete a document, its stored files and every reader's notes on it (admin only).
#[utoipa::path(
    delete,
    path = "/api/documents/{id}",
    params(("id" = i64, Path, description = "Document id")),
    responses(
        (status = 204, description = "Document deleted"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Caller is not an admin"),
        (status = 404, description = "No such document")
    ),
    security(("bearer" = [])),
    tag = "documents"
)]
pub async fn delete_document_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    Path(id): Path<DocumentId>,
) -> Result<StatusCode, ApiError> {
    state.library.delete_document(&caller, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
