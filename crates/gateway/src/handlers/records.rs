use axum::{
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use chrono::{NaiveDate, Utc};
use healthchain_protocol::{
    record_blob_path, HealthRecord, RecordEdit, Role, RECORDS_BUCKET,
};
use uuid::Uuid;

use crate::error::ApiError;
use crate::session::AuthUser;
use crate::signing::SignedUrl;
use crate::AppState;

/// A fresh short-lived link to a record's file.
pub(crate) fn sign_record(state: &AppState, record: &HealthRecord) -> Result<SignedUrl, ApiError> {
    Ok(state
        .signer
        .sign(RECORDS_BUCKET, &record.file_url, Utc::now())?)
}

fn multipart_error(err: MultipartError, limit: usize) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(limit)
    } else {
        ApiError::BadRequest(format!("malformed upload: {}", err.body_text()))
    }
}

async fn owned_record(state: &AppState, user: &AuthUser, id: Uuid) -> Result<HealthRecord, ApiError> {
    match state.store.get_record(id).await? {
        Some(record) if record.patient_email == user.email => Ok(record),
        _ => Err(ApiError::NotFound("record not found".to_string())),
    }
}

#[derive(Default)]
struct UploadForm {
    record_name: Option<String>,
    record_type: Option<String>,
    record_date: Option<String>,
    file: Option<(String, Vec<u8>)>,
}

pub async fn upload(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    user.require(Role::Patient)?;
    let limit = state.max_upload_bytes;

    let mut form = UploadForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("file").to_string();
                let data = field.bytes().await.map_err(|e| multipart_error(e, limit))?;
                if data.len() > limit {
                    return Err(ApiError::PayloadTooLarge(limit));
                }
                form.file = Some((filename, data.to_vec()));
            }
            "record_name" | "record_type" | "record_date" => {
                let value = field.text().await.map_err(|e| multipart_error(e, limit))?;
                let slot = match name.as_str() {
                    "record_name" => &mut form.record_name,
                    "record_type" => &mut form.record_type,
                    _ => &mut form.record_date,
                };
                *slot = Some(value);
            }
            other => tracing::debug!("Ignoring unexpected upload field {}", other),
        }
    }

    let edit = RecordEdit {
        record_name: form.record_name.unwrap_or_default(),
        record_type: form.record_type.unwrap_or_default(),
    }
    .validate()?;
    let raw_date = form
        .record_date
        .ok_or_else(|| ApiError::BadRequest("missing required field: record_date".to_string()))?;
    let record_date = NaiveDate::parse_from_str(raw_date.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest("record_date must be YYYY-MM-DD".to_string()))?;
    let (filename, data) = form
        .file
        .ok_or_else(|| ApiError::BadRequest("missing required field: file".to_string()))?;

    let now = Utc::now();
    let path = record_blob_path(now, &filename);
    state.blobs.upload(RECORDS_BUCKET, &path, &data)?;

    let record = HealthRecord {
        id: Uuid::new_v4(),
        patient_email: user.email.clone(),
        record_name: edit.record_name,
        record_type: edit.record_type,
        record_date,
        file_url: path.clone(),
        created_at: now,
    };

    if let Err(e) = state.store.insert_record(&record).await {
        if let Err(cleanup) = state.blobs.remove(RECORDS_BUCKET, &path) {
            tracing::warn!("Orphaned blob {} after failed insert: {}", path, cleanup);
        }
        return Err(e.into());
    }

    tracing::info!(
        "Stored record {} for {} ({} bytes at {})",
        record.id,
        user.email,
        data.len(),
        path
    );
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<HealthRecord>>, ApiError> {
    user.require(Role::Patient)?;
    Ok(Json(state.store.list_records(&user.email).await?))
}

pub async fn edit(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<RecordEdit>,
) -> Result<Json<HealthRecord>, ApiError> {
    let edit = payload.validate()?;
    owned_record(&state, &user, id).await?;
    Ok(Json(state.store.update_record(id, &edit).await?))
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    owned_record(&state, &user, id).await?;
    let record = state.store.delete_record(id).await?;

    match state.blobs.remove(RECORDS_BUCKET, &record.file_url) {
        Ok(true) => {}
        Ok(false) => tracing::warn!("Record {} had no blob at {}", id, record.file_url),
        Err(e) => tracing::warn!("Failed to remove blob {}: {}", record.file_url, e),
    }
    tracing::info!("Deleted record {} for {}", id, user.email);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn signed_url(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<SignedUrl>, ApiError> {
    let record = owned_record(&state, &user, id).await?;
    Ok(Json(sign_record(&state, &record)?))
}
