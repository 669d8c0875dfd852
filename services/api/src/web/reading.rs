//! services/api/src/web/reading.rs
//!
//! Handlers for a reader's own progress, highlights and sketches.
//!
//! The owner of every row is the caller recovered from the session token.
//! Request bodies carry no owner field; anything extra a client sends
//! (a `user_id`, say) is ignored by deserialization.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use ebook_hub_core::{
    DocumentId, Highlight, Identity, NewHighlight, ProgressUpdate, ReadingProgress, Sketch,
    SketchUpdate,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::web::state::AppState;

/// Unwraps a JSON body, turning missing fields or bad types into a 400.
fn body<T>(req: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    req.map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct SaveProgressRequest {
    pub document_id: DocumentId,
    pub last_position: i32,
}

#[derive(Serialize, ToSchema)]
pub struct ProgressResponse {
    pub document_id: DocumentId,
    pub last_position: i32,
    pub updated_at: DateTime<Utc>,
}

impl From<ReadingProgress> for ProgressResponse {
    fn from(p: ReadingProgress) -> Self {
        Self {
            document_id: p.document_id,
            last_position: p.last_position,
            updated_at: p.updated_at,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct SaveHighlightRequest {
    pub document_id: DocumentId,
    pub selected_text: String,
    pub note: Option<String>,
    pub page_number: Option<i32>,
}

#[derive(Serialize, ToSchema)]
pub struct HighlightResponse {
    pub id: i64,
    pub document_id: DocumentId,
    pub selected_text: String,
    pub note: Option<String>,
    pub page_number: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl From<Highlight> for HighlightResponse {
    fn from(h: Highlight) -> Self {
        Self {
            id: h.id,
            document_id: h.document_id,
            selected_text: h.selected_text,
            note: h.note,
            page_number: h.page_number,
            created_at: h.created_at,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct SaveSketchRequest {
    pub document_id: DocumentId,
    pub page_number: i32,
    /// Serialized drawing, stored as-is.
    pub canvas_data: String,
}

#[derive(Serialize, ToSchema)]
pub struct SketchResponse {
    pub id: i64,
    pub document_id: DocumentId,
    pub page_number: i32,
    pub canvas_data: String,
    pub created_at: DateTime<Utc>,
}

impl From<Sketch> for SketchResponse {
    fn from(s: Sketch) -> Self {
        Self {
            id: s.id,
            document_id: s.document_id,
            page_number: s.page_number,
            canvas_data: s.canvas_data,
            created_at: s.created_at,
        }
    }
}

//=========================================================================================
// Reading Progress
//=========================================================================================

#[utoipa::path(
    get,
    path = "/api/progress/{document_id}",
    params(("document_id" = i64, Path, description = "Document id")),
    responses(
        (status = 200, description = "The caller's saved position", body = ProgressResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Caller has no reader account"),
        (status = 404, description = "Nothing saved yet")
    ),
    security(("bearer" = [])),
    tag = "reading"
)]
pub async fn get_progress_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    Path(document_id): Path<DocumentId>,
) -> Result<Json<ProgressResponse>, ApiError> {
    let progress = state.library.get_progress(&caller, document_id).await?;
    Ok(Json(progress.into()))
}

/// Save the caller's position, replacing any earlier one for the document.
#[utoipa::path(
    post,
    path = "/api/progress",
    request_body = SaveProgressRequest,
    responses(
        (status = 200, description = "Saved", body = ProgressResponse),
        (status = 400, description = "Invalid body"),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "No such document")
    ),
    security(("bearer" = [])),
    tag = "reading"
)]
pub async fn save_progress_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    req: Result<Json<SaveProgressRequest>, JsonRejection>,
) -> Result<Json<ProgressResponse>, ApiError> {
    let req = body(req)?;
    let progress = state
        .library
        .save_progress(
            &caller,
            ProgressUpdate {
                document_id: req.document_id,
                last_position: req.last_position,
            },
        )
        .await?;
    Ok(Json(progress.into()))
}

//=========================================================================================
// Highlights
//=========================================================================================

#[utoipa::path(
    get,
    path = "/api/highlights/{document_id}",
    params(("document_id" = i64, Path, description = "Document id")),
    responses(
        (status = 200, description = "The caller's highlights, by page", body = [HighlightResponse]),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "No such document")
    ),
    security(("bearer" = [])),
    tag = "reading"
)]
pub async fn list_highlights_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    Path(document_id): Path<DocumentId>,
) -> Result<Json<Vec<HighlightResponse>>, ApiError> {
    let highlights = state.library.list_highlights(&caller, document_id).await?;
    Ok(Json(highlights.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    post,
    path = "/api/highlights",
    request_body = SaveHighlightRequest,
    responses(
        (status = 200, description = "Highlight stored", body = HighlightResponse),
        (status = 400, description = "Invalid body"),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "No such document")
    ),
    security(("bearer" = [])),
    tag = "reading"
)]
pub async fn save_highlight_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    req: Result<Json<SaveHighlightRequest>, JsonRejection>,
) -> Result<Json<HighlightResponse>, ApiError> {
    let req = body(req)?;
    let highlight = state
        .library
        .save_highlight(
            &caller,
            NewHighlight {
                document_id: req.document_id,
                selected_text: req.selected_text,
                note: req.note,
                page_number: req.page_number,
            },
        )
        .await?;
    Ok(Json(highlight.into()))
}

//=========================================================================================
// Sketches
//=========================================================================================

#[utoipa::path(
    get,
    path = "/api/sketches/{document_id}/{page_number}",
    params(
        ("document_id" = i64, Path, description = "Document id"),
        ("page_number" = i32, Path, description = "Page number")
    ),
    responses(
        (status = 200, description = "The caller's sketches on that page", body = [SketchResponse]),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "No such document")
    ),
    security(("bearer" = [])),
    tag = "reading"
)]
pub async fn list_sketches_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    Path((document_id, page_number)): Path<(DocumentId, i32)>,
) -> Result<Json<Vec<SketchResponse>>, ApiError> {
    let sketches = state
        .library
        .list_sketches(&caller, document_id, page_number)
        .await?;
    Ok(Json(sketches.into_iter().map(Into::into).collect()))
}

/// Save the drawing for a page, replacing the caller's previous one.
#[utoipa::path(
    post,
    path = "/api/sketches",
    request_body = SaveSketchRequest,
    responses(
        (status = 200, description = "Sketch stored", body = SketchResponse),
        (status = 400, description = "Invalid body"),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "No such document")
    ),
    security(("bearer" = [])),
    tag = "reading"
)]
pub async fn save_sketch_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Identity>,
    req: Result<Json<SaveSketchRequest>, JsonRejection>,
) -> Result<Json<SketchResponse>, ApiError> {
    let req = body(req)?;
    let sketch = state
        .library
        .save_sketch(
            &caller,
            SketchUpdate {
                document_id: req.document_id,
                page_number: req.page_number,
                canvas_data: req.canvas_data,
            },
        )
        .await?;
    Ok(Json(sketch.into()))
}
