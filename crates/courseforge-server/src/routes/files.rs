use axum::extract::{Multipart, Path, Query, State};
use axum::http::header::{
    HeaderMap, ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE,
};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const MAX_DOCUMENT_SIZE: usize = 30 * 1024 * 1024;
const MAX_IMAGE_SIZE: usize = 5 * 1024 * 1024;

const ALLOWED_DOCUMENT_TYPES: &[(&str, &[&str])] = &[
    ("application/pdf", &[".pdf"]),
    ("text/plain", &[".txt"]),
    ("application/json", &[".json"]),
    ("text/csv", &[".csv"]),
    ("application/msword", &[".doc"]),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        &[".docx"],
    ),
];

const ALLOWED_IMAGE_TYPES: &[(&str, &[&str])] = &[
    ("image/jpeg", &[".jpg", ".jpeg"]),
    ("image/png", &[".png"]),
    ("image/gif", &[".gif"]),
    ("image/webp", &[".webp"]),
];

#[derive(Debug, Serialize)]
pub struct FileInfoResponse {
    pub id: i64,
    pub filename: String,
    pub content_type: String,
    pub size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct FileListQuery {
    pub course_id: Option<i64>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/documents", post(upload_document).get(list_documents))
        .route("/documents/{id}", get(download_document))
        .route("/images", post(upload_image).get(list_images))
        .route("/images/{id}", get(download_image))
}

/// Content type must be in the allow list and the filename extension must
/// match it.
fn validate_file_type(
    filename: &str,
    content_type: &str,
    allowed: &[(&str, &[&str])],
) -> Result<(), ApiError> {
    let extensions = allowed
        .iter()
        .find(|(mime, _)| *mime == content_type)
        .map(|(_, exts)| *exts)
        .ok_or_else(|| ApiError::Validation(format!("file type {content_type} not allowed")))?;

    let lowered = filename.to_lowercase();
    if !extensions.iter().any(|ext| lowered.ends_with(ext)) {
        return Err(ApiError::Validation(format!(
            "filename {filename} does not match content type {content_type}"
        )));
    }
    Ok(())
}

async fn read_upload(
    mut multipart: Multipart,
    max_size: usize,
) -> ApiResult<(String, String, Vec<u8>)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("invalid multipart payload: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::Validation("missing filename".into()))?;
        let content_type = field
            .content_type()
            .map(str::to_string)
            .ok_or_else(|| ApiError::Validation("missing content type".into()))?;
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::Validation(format!("failed to read upload: {e}")))?;
        if data.len() > max_size {
            return Err(ApiError::Validation(format!(
                "file exceeds the maximum size of {max_size} bytes"
            )));
        }
        return Ok((filename, content_type, data.to_vec()));
    }
    Err(ApiError::Validation("missing file field".into()))
}

async fn upload_document(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    multipart: Multipart,
) -> ApiResult<Json<FileInfoResponse>> {
    let (filename, content_type, data) = read_upload(multipart, MAX_DOCUMENT_SIZE).await?;
    validate_file_type(&filename, &content_type, ALLOWED_DOCUMENT_TYPES)?;

    let stored = state
        .store
        .insert_document(&user.id, &filename, &content_type, data)
        .await?;
    Ok(Json(FileInfoResponse {
        id: stored.id,
        filename: stored.filename,
        content_type: stored.content_type,
        size: stored.data.len(),
        course_id: stored.course_id,
    }))
}

async fn upload_image(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    multipart: Multipart,
) -> ApiResult<Json<FileInfoResponse>> {
    let (filename, content_type, data) = read_upload(multipart, MAX_IMAGE_SIZE).await?;
    validate_file_type(&filename, &content_type, ALLOWED_IMAGE_TYPES)?;

    let stored = state
        .store
        .insert_image(&user.id, &filename, &content_type, data)
        .await?;
    Ok(Json(FileInfoResponse {
        id: stored.id,
        filename: stored.filename,
        content_type: stored.content_type,
        size: stored.data.len(),
        course_id: stored.course_id,
    }))
}

async fn list_documents(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(query): Query<FileListQuery>,
) -> ApiResult<Json<Vec<FileInfoResponse>>> {
    let documents = state.store.list_documents(&user.id, query.course_id).await?;
    Ok(Json(
        documents
            .into_iter()
            .map(|doc| FileInfoResponse {
                id: doc.id,
                filename: doc.filename,
                content_type: doc.content_type,
                size: doc.data.len(),
                course_id: doc.course_id,
            })
            .collect(),
    ))
}

async fn list_images(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(query): Query<FileListQuery>,
) -> ApiResult<Json<Vec<FileInfoResponse>>> {
    let images = state.store.list_images(&user.id, query.course_id).await?;
    Ok(Json(
        images
            .into_iter()
            .map(|img| FileInfoResponse {
                id: img.id,
                filename: img.filename,
                content_type: img.content_type,
                size: img.data.len(),
                course_id: img.course_id,
            })
            .collect(),
    ))
}

/// Byte range from a `Range: bytes=a-b` header, clamped to the resource
/// size. `None` means no (usable) range was requested; an unsatisfiable
/// range yields an error.
fn parse_range(headers: &HeaderMap, size: usize) -> Result<Option<(usize, usize)>, ()> {
    let Some(raw) = headers.get(RANGE).and_then(|v| v.to_str().ok()) else {
        return Ok(None);
    };
    let Some(spec) = raw.strip_prefix("bytes=") else {
        return Ok(None);
    };
    // Only the first range of a multi-range request is honored.
    let first = spec.split(',').next().unwrap_or("").trim();
    let Some((start_raw, end_raw)) = first.split_once('-') else {
        return Err(());
    };

    if size == 0 {
        return Err(());
    }

    let (start, end) = if start_raw.is_empty() {
        // Suffix form: last N bytes.
        let suffix: usize = end_raw.parse().map_err(|_| ())?;
        if suffix == 0 {
            return Err(());
        }
        (size.saturating_sub(suffix), size - 1)
    } else {
        let start: usize = start_raw.parse().map_err(|_| ())?;
        let end = if end_raw.is_empty() {
            size - 1
        } else {
            end_raw.parse::<usize>().map_err(|_| ())?.min(size - 1)
        };
        (start, end)
    };

    if start > end || start >= size {
        return Err(());
    }
    Ok(Some((start, end)))
}

fn serve_file(
    headers: &HeaderMap,
    content_type: &str,
    data: Vec<u8>,
) -> Response {
    let size = data.len();
    match parse_range(headers, size) {
        Err(()) => (
            StatusCode::RANGE_NOT_SATISFIABLE,
            [(CONTENT_RANGE, format!("bytes */{size}"))],
        )
            .into_response(),
        Ok(Some((start, end))) => {
            let body = data[start..=end].to_vec();
            (
                StatusCode::PARTIAL_CONTENT,
                [
                    (CONTENT_TYPE, content_type.to_string()),
                    (CONTENT_RANGE, format!("bytes {start}-{end}/{size}")),
                    (CONTENT_LENGTH, body.len().to_string()),
                    (ACCEPT_RANGES, "bytes".to_string()),
                ],
                body,
            )
                .into_response()
        }
        Ok(None) => (
            StatusCode::OK,
            [
                (CONTENT_TYPE, content_type.to_string()),
                (CONTENT_LENGTH, size.to_string()),
                (ACCEPT_RANGES, "bytes".to_string()),
            ],
            data,
        )
            .into_response(),
    }
}

async fn download_document(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let document = state
        .store
        .get_document(id)
        .await?
        .filter(|doc| doc.user_id == user.id || user.is_admin)
        .ok_or_else(|| ApiError::not_found("document"))?;
    Ok(serve_file(&headers, &document.content_type, document.data))
}

async fn download_image(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let image = state
        .store
        .get_image(id)
        .await?
        .filter(|img| img.user_id == user.id || user.is_admin)
        .ok_or_else(|| ApiError::not_found("image"))?;
    Ok(serve_file(&headers, &image.content_type, image.data))
}
