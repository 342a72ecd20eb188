use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue},
    response::IntoResponse,
};
use std::sync::Arc;
use bytes::Bytes;
use chrono::Utc;

use crate::error::ApiError;
use crate::models::StorageQuery;
use crate::AppState;

fn content_type_for(path: &str) -> &'static str {
    let ext = path.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "txt" => "text/plain; charset=utf-8",
        "json" => "application/json",
        "dcm" => "application/dicom",
        _ => "application/octet-stream",
    }
}

/// Serves a blob to anyone holding a valid signed token for it.
pub async fn signed_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, path)): Path<(String, String)>,
    Query(query): Query<StorageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    state.signer.verify(&bucket, &path, &query.token, Utc::now())?;
    let data = state.blobs.download(&bucket, &path)?;

    let filename = path.rsplit('/').next().unwrap_or("file");
    let disposition = if query.download.is_some() {
        format!("attachment; filename=\"{}\"", filename)
    } else {
        format!("inline; filename=\"{}\"", filename)
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(&path)),
    );
    if let Ok(v) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, v);
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("private, no-store"));

    tracing::debug!("Served {}/{} ({} bytes)", bucket, path, data.len());
    Ok((headers, Bytes::from(data)))
}
