use thiserror::Error;

use crate::access::AccessStatus;

/// Validation and workflow rule violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("invalid email format")]
    InvalidEmail,

    #[error("password must be between 8 and 128 characters")]
    WeakPassword,

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("unknown access status: {0}")]
    UnknownStatus(String),

    #[error("unknown access duration: {0}")]
    UnknownDuration(String),

    #[error("access duration must be at least one day")]
    InvalidDuration,

    #[error("at least one record type must be requested")]
    NoRecordTypes,

    #[error("requester must confirm a legitimate reason for access")]
    ConsentRequired,

    #[error("access request is already {0}")]
    AlreadyDecided(AccessStatus),

    #[error("only rejected requests can be resent (current status: {0})")]
    NotResendable(AccessStatus),
}
