//! Persistence for the portal's tables.
//!
//! [`PortalStore`] is implemented by [`PgStore`] for production and by
//! [`MemoryStore`] for tests and database-less local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use healthchain_protocol::{
    AccessRequest, AccessStatus, DirectoryQuery, Grant, HealthRecord, ProfileUpdate, RecordEdit,
    UserProfile,
};
use thiserror::Error;
use uuid::Uuid;

mod memory;
mod postgres;
#[cfg(test)]
pub(crate) mod testing;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Outcome of an approval: the updated request and the grant it produced
/// (or refreshed, when the pair already had an active one).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Approval {
    pub request: AccessRequest,
    pub grant: Grant,
}

#[async_trait]
pub trait PortalStore: Send + Sync {
    // ── users / auth identities ─────────────────────────────────────
    /// Creates the auth identity and its directory profile together.
    /// Fails with `Conflict` when the email is taken.
    async fn create_user(&self, profile: &UserProfile, password_hash: &str) -> Result<(), StoreError>;

    /// Profile and password hash for a (normalized) email.
    async fn find_identity(&self, email: &str) -> Result<Option<(UserProfile, String)>, StoreError>;

    async fn get_user(&self, id: Uuid) -> Result<Option<UserProfile>, StoreError>;

    async fn get_users(&self, ids: &[Uuid]) -> Result<Vec<UserProfile>, StoreError>;

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<UserProfile, StoreError>;

    async fn search_users(&self, query: &DirectoryQuery) -> Result<Vec<UserProfile>, StoreError>;

    // ── patient_records ─────────────────────────────────────────────
    async fn insert_record(&self, record: &HealthRecord) -> Result<(), StoreError>;

    /// Newest first.
    async fn list_records(&self, patient_email: &str) -> Result<Vec<HealthRecord>, StoreError>;

    async fn get_record(&self, id: Uuid) -> Result<Option<HealthRecord>, StoreError>;

    async fn update_record(&self, id: Uuid, edit: &RecordEdit) -> Result<HealthRecord, StoreError>;

    /// Removes the metadata row and returns it.
    async fn delete_record(&self, id: Uuid) -> Result<HealthRecord, StoreError>;

    /// Records of `owner_id` whose type equals `record_type`, newest first.
    async fn fetch_patient_records(
        &self,
        owner_id: Uuid,
        record_type: &str,
    ) -> Result<Vec<HealthRecord>, StoreError>;

    // ── access_control ──────────────────────────────────────────────
    async fn insert_access_request(&self, request: &AccessRequest) -> Result<(), StoreError>;

    async fn get_access_request(&self, id: Uuid) -> Result<Option<AccessRequest>, StoreError>;

    /// Requests sent by `requester_id`, newest first.
    async fn list_requests_by_requester(&self, requester_id: Uuid) -> Result<Vec<AccessRequest>, StoreError>;

    /// Requests addressed to `owner_id`, optionally filtered by status,
    /// most recently updated first.
    async fn list_requests_by_owner(
        &self,
        owner_id: Uuid,
        status: Option<AccessStatus>,
    ) -> Result<Vec<AccessRequest>, StoreError>;

    /// Pending → rejected. `Conflict` if the row is no longer pending.
    async fn reject_request(&self, id: Uuid, now: DateTime<Utc>) -> Result<AccessRequest, StoreError>;

    /// Pending → approved plus the grant, as one unit.
    async fn approve_request(
        &self,
        id: Uuid,
        valid_till: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Approval, StoreError>;

    /// Hard-deletes a pending request. `Conflict` if it was already decided.
    async fn delete_pending_request(&self, id: Uuid) -> Result<(), StoreError>;

    // ── provider_patient ────────────────────────────────────────────
    async fn active_grant(
        &self,
        provider_id: Uuid,
        patient_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Grant>, StoreError>;

    async fn active_grants_for_provider(
        &self,
        provider_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Grant>, StoreError>;

    async fn grants_for_request(&self, access_request_id: Uuid) -> Result<Vec<Grant>, StoreError>;
}

/// Error for a conditional status update that matched nothing.
pub(crate) fn transition_miss(current: Option<AccessStatus>) -> StoreError {
    match current {
        Some(status) => StoreError::Conflict(format!("access request is already {}", status)),
        None => StoreError::NotFound("access request"),
    }
}
