//! Domain types shared by the HealthChain gateway and its clients.
//!
//! Everything here is pure: validation, state transitions and naming rules.
//! Persistence and transport live in `healthchain-gateway`.

pub mod access;
pub mod directory;
pub mod error;
pub mod records;

pub use access::{
    grant_valid_till, AccessDuration, AccessRequest, AccessStatus, Decision, Grant,
    NewAccessRequest, GRANT_VALIDITY_DAYS,
};
pub use directory::{DirectoryQuery, ProfileUpdate, Role, SignUp, UserProfile};
pub use error::ProtocolError;
pub use records::{
    record_blob_path, HealthRecord, RecordEdit, RECORDS_BUCKET, SIGNED_URL_TTL_SECS,
    STANDARD_RECORD_TYPES,
};

/// Lowercases and trims an email address the way every lookup expects it.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

pub fn is_reasonable_email(email: &str) -> bool {
    if email.len() < 5 || email.len() > 254 {
        return false;
    }
    let mut parts = email.split('@');
    let local = parts.next().unwrap_or_default();
    let domain = parts.next().unwrap_or_default();
    parts.next().is_none()
        && !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}
