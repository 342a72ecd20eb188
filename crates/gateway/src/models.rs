use chrono::{DateTime, NaiveDate, Utc};
use healthchain_protocol::{
    AccessRequest, AccessStatus, Grant, HealthRecord, Role, UserProfile,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::StoreError;

// ── Table rows ──────────────────────────────────────────────────
#[derive(Debug, sqlx::FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub role: String,
    pub name: String,
    pub age: Option<i32>,
    pub sex: Option<String>,
    pub nationality: Option<String>,
    pub national_id: Option<String>,
}

impl TryFrom<UserRow> for UserProfile {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role: Role = row
            .role
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("users.role: {}", e)))?;
        Ok(UserProfile {
            id: row.id,
            email: row.email,
            role,
            name: row.name,
            age: row.age,
            sex: row.sex,
            nationality: row.nationality,
            national_id: row.national_id,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct IdentityRow {
    #[sqlx(flatten)]
    pub user: UserRow,
    pub password_hash: String,
}

#[derive(Debug, sqlx::FromRow)]
pub struct RecordRow {
    pub id: Uuid,
    pub patient_email: String,
    pub record_name: String,
    pub record_type: String,
    pub record_date: NaiveDate,
    pub file_url: String,
    pub created_at: DateTime<Utc>,
}

impl From<RecordRow> for HealthRecord {
    fn from(row: RecordRow) -> Self {
        HealthRecord {
            id: row.id,
            patient_email: row.patient_email,
            record_name: row.record_name,
            record_type: row.record_type,
            record_date: row.record_date,
            file_url: row.file_url,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct AccessRow {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub owner_id: Uuid,
    pub status: String,
    pub reason: String,
    pub requested_record_types: Vec<String>,
    pub requested_duration: i32,
    pub requested_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<AccessRow> for AccessRequest {
    type Error = StoreError;

    fn try_from(row: AccessRow) -> Result<Self, Self::Error> {
        let status: AccessStatus = row
            .status
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("access_control.status: {}", e)))?;
        Ok(AccessRequest {
            id: row.id,
            requester_id: row.requester_id,
            owner_id: row.owner_id,
            status,
            reason: row.reason,
            requested_record_types: row.requested_record_types,
            requested_duration: row.requested_duration,
            requested_at: row.requested_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct GrantRow {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub patient_id: Uuid,
    pub access_request_id: Uuid,
    pub valid_till: DateTime<Utc>,
}

impl From<GrantRow> for Grant {
    fn from(row: GrantRow) -> Self {
        Grant {
            id: row.id,
            provider_id: row.provider_id,
            patient_id: row.patient_id,
            access_request_id: row.access_request_id,
            valid_till: row.valid_till,
        }
    }
}

// ── API Payloads ────────────────────────────────────────────────
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SessionUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: Role,
}

impl From<&UserProfile> for SessionUser {
    fn from(p: &UserProfile) -> Self {
        SessionUser {
            id: p.id,
            email: p.email.clone(),
            name: p.name.clone(),
            role: p.role,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub role: Role,
    pub exp: usize,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateAccessPayload {
    pub owner_id: Uuid,
    pub reason: String,
    #[serde(default)]
    pub requested_record_types: Vec<String>,
    /// `24h`, `7d`, `30d` or `custom`.
    pub access_duration: String,
    pub custom_days: Option<u32>,
    #[serde(default)]
    pub consent: bool,
}

/// A counterpart's public directory entry.
#[derive(Debug, Clone, Serialize)]
pub struct PartySummary {
    pub id: Uuid,
    pub name: String,
    pub national_id: Option<String>,
}

impl From<&UserProfile> for PartySummary {
    fn from(p: &UserProfile) -> Self {
        PartySummary {
            id: p.id,
            name: p.name.clone(),
            national_id: p.national_id.clone(),
        }
    }
}

/// What a provider sees of a patient in search results.
#[derive(Debug, Clone, Serialize)]
pub struct PatientMatch {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub national_id: Option<String>,
    pub sex: Option<String>,
    pub age: Option<i32>,
}

impl From<UserProfile> for PatientMatch {
    fn from(p: UserProfile) -> Self {
        PatientMatch {
            id: p.id,
            name: p.name,
            email: p.email,
            national_id: p.national_id,
            sex: p.sex,
            age: p.age,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AccessRequestView {
    #[serde(flatten)]
    pub request: AccessRequest,
    /// The other side of the request, from the caller's point of view.
    pub counterpart: Option<PartySummary>,
}

#[derive(Debug, Serialize)]
pub struct DecisionView {
    pub request: AccessRequest,
    pub grant: Option<Grant>,
}

#[derive(Debug, Serialize)]
pub struct GrantedRecordsView {
    pub request: AccessRequest,
    pub grant: Grant,
    pub records: Vec<HealthRecord>,
}

#[derive(Debug, Serialize)]
pub struct MyPatientView {
    pub grant_id: Uuid,
    pub access_request_id: Uuid,
    pub valid_till: DateTime<Utc>,
    pub patient: UserProfile,
}

#[derive(Debug, Serialize)]
pub struct PatientDashboard {
    pub total_records: usize,
    pub last_updated: Option<NaiveDate>,
    pub recent_records: Vec<HealthRecord>,
    pub pending_requests: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct RequestCounts {
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
}

#[derive(Debug, Serialize)]
pub struct ProviderDashboard {
    pub requests: RequestCounts,
    pub active_patients: usize,
}

#[derive(Debug, Deserialize)]
pub struct StorageQuery {
    pub token: String,
    /// Present (any value) to receive the file as an attachment.
    pub download: Option<String>,
}
