use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProtocolError;

/// Object-storage bucket holding uploaded record files.
pub const RECORDS_BUCKET: &str = "patient-records";

/// Lifetime of a signed preview/download link.
pub const SIGNED_URL_TTL_SECS: i64 = 60;

pub const STANDARD_RECORD_TYPES: [&str; 5] = [
    "Complete Medical History",
    "Laboratory Results",
    "Medication History",
    "Imaging & Radiology",
    "Surgical History",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub id: Uuid,
    pub patient_email: String,
    pub record_name: String,
    pub record_type: String,
    pub record_date: NaiveDate,
    /// Blob path inside [`RECORDS_BUCKET`].
    pub file_url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RecordEdit {
    pub record_name: String,
    pub record_type: String,
}

impl RecordEdit {
    pub fn validate(self) -> Result<Self, ProtocolError> {
        let record_name = self.record_name.trim().to_string();
        let record_type = self.record_type.trim().to_string();
        if record_name.is_empty() {
            return Err(ProtocolError::MissingField("record_name"));
        }
        if record_type.is_empty() {
            return Err(ProtocolError::MissingField("record_type"));
        }
        Ok(Self {
            record_name,
            record_type,
        })
    }
}

/// Storage path for an upload: `public/<unix-millis>-<filename>`.
///
/// Anything outside `[A-Za-z0-9._-]` in the filename becomes `_`, so the path
/// never needs URL escaping and cannot climb out of `public/`.
pub fn record_blob_path(uploaded_at: DateTime<Utc>, filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or_default();
    let mut clean: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if clean.trim_matches('.').is_empty() {
        clean = "file".to_string();
    }
    format!("public/{}-{}", uploaded_at.timestamp_millis(), clean)
}
