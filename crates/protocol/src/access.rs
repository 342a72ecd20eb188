use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProtocolError;

/// Approved access always lasts this long, whatever duration was requested.
pub const GRANT_VALIDITY_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessStatus {
    Pending,
    Approved,
    Rejected,
}

impl AccessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessStatus::Pending => "pending",
            AccessStatus::Approved => "approved",
            AccessStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AccessStatus::Pending)
    }

    /// Applies an owner's decision. Only pending requests can be decided.
    pub fn decide(self, decision: Decision) -> Result<AccessStatus, ProtocolError> {
        if self.is_terminal() {
            return Err(ProtocolError::AlreadyDecided(self));
        }
        Ok(match decision {
            Decision::Approve => AccessStatus::Approved,
            Decision::Reject => AccessStatus::Rejected,
        })
    }
}

impl fmt::Display for AccessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessStatus {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AccessStatus::Pending),
            "approved" => Ok(AccessStatus::Approved),
            "rejected" => Ok(AccessStatus::Rejected),
            other => Err(ProtocolError::UnknownStatus(other.to_string())),
        }
    }
}

impl TryFrom<String> for AccessStatus {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

/// Duration presets offered when requesting access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDuration {
    Day,
    Week,
    Month,
    Custom(u32),
}

impl AccessDuration {
    /// Parses a preset (`24h`, `7d`, `30d`, `custom`); `custom` takes its day
    /// count from `custom_days`.
    pub fn parse(preset: &str, custom_days: Option<u32>) -> Result<Self, ProtocolError> {
        match preset {
            "24h" => Ok(AccessDuration::Day),
            "7d" => Ok(AccessDuration::Week),
            "30d" => Ok(AccessDuration::Month),
            "custom" => match custom_days {
                Some(days) if days >= 1 => Ok(AccessDuration::Custom(days)),
                _ => Err(ProtocolError::InvalidDuration),
            },
            other => Err(ProtocolError::UnknownDuration(other.to_string())),
        }
    }

    pub fn days(&self) -> u32 {
        match self {
            AccessDuration::Day => 1,
            AccessDuration::Week => 7,
            AccessDuration::Month => 30,
            AccessDuration::Custom(days) => *days,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub owner_id: Uuid,
    pub status: AccessStatus,
    pub reason: String,
    pub requested_record_types: Vec<String>,
    /// Requested access length in days. Stored for the owner to read; grants
    /// ignore it.
    pub requested_duration: i32,
    pub requested_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validated input for a new access request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccessRequest {
    pub owner_id: Uuid,
    pub reason: String,
    pub requested_record_types: Vec<String>,
    pub requested_duration: i32,
}

impl NewAccessRequest {
    pub fn new(
        owner_id: Uuid,
        reason: &str,
        record_types: &[String],
        duration: AccessDuration,
        consent: bool,
    ) -> Result<Self, ProtocolError> {
        if !consent {
            return Err(ProtocolError::ConsentRequired);
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ProtocolError::MissingField("reason"));
        }

        let mut requested_record_types: Vec<String> = Vec::new();
        for kind in record_types.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
            if !requested_record_types.iter().any(|t| t == kind) {
                requested_record_types.push(kind.to_string());
            }
        }
        if requested_record_types.is_empty() {
            return Err(ProtocolError::NoRecordTypes);
        }

        let requested_duration =
            i32::try_from(duration.days()).map_err(|_| ProtocolError::InvalidDuration)?;
        if requested_duration < 1 {
            return Err(ProtocolError::InvalidDuration);
        }

        Ok(Self {
            owner_id,
            reason: reason.to_string(),
            requested_record_types,
            requested_duration,
        })
    }

    /// Builds the pending row a requester submits.
    pub fn into_pending(self, requester_id: Uuid, now: DateTime<Utc>) -> AccessRequest {
        AccessRequest {
            id: Uuid::new_v4(),
            requester_id,
            owner_id: self.owner_id,
            status: AccessStatus::Pending,
            reason: self.reason,
            requested_record_types: self.requested_record_types,
            requested_duration: self.requested_duration,
            requested_at: now,
            updated_at: now,
        }
    }
}

impl AccessRequest {
    /// A fresh pending copy of a rejected request. The original is left as is.
    pub fn resend(&self, now: DateTime<Utc>) -> Result<AccessRequest, ProtocolError> {
        if self.status != AccessStatus::Rejected {
            return Err(ProtocolError::NotResendable(self.status));
        }
        Ok(AccessRequest {
            id: Uuid::new_v4(),
            status: AccessStatus::Pending,
            requested_at: now,
            updated_at: now,
            ..self.clone()
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub patient_id: Uuid,
    pub access_request_id: Uuid,
    pub valid_till: DateTime<Utc>,
}

impl Grant {
    pub fn for_request(request: &AccessRequest, approved_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider_id: request.requester_id,
            patient_id: request.owner_id,
            access_request_id: request.id,
            valid_till: grant_valid_till(approved_at),
        }
    }

    /// Expiry is checked at read time; nothing sweeps old grants.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.valid_till >= now
    }
}

pub fn grant_valid_till(approved_at: DateTime<Utc>) -> DateTime<Utc> {
    approved_at + Duration::days(GRANT_VALIDITY_DAYS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn pending_can_be_approved_or_rejected_once() {
        assert_eq!(
            AccessStatus::Pending.decide(Decision::Approve),
            Ok(AccessStatus::Approved)
        );
        assert_eq!(
            AccessStatus::Pending.decide(Decision::Reject),
            Ok(AccessStatus::Rejected)
        );
        assert_eq!(
            AccessStatus::Approved.decide(Decision::Reject),
            Err(ProtocolError::AlreadyDecided(AccessStatus::Approved))
        );
        assert_eq!(
            AccessStatus::Rejected.decide(Decision::Approve),
            Err(ProtocolError::AlreadyDecided(AccessStatus::Rejected))
        );
    }

    #[test]
    fn status_strings_match_storage_values() {
        for status in [AccessStatus::Pending, AccessStatus::Approved, AccessStatus::Rejected] {
            assert_eq!(status.as_str().parse::<AccessStatus>(), Ok(status));
        }
        assert!("revoked".parse::<AccessStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&AccessStatus::Approved).unwrap(),
            "\"approved\""
        );
    }

    #[test]
    fn duration_presets() {
        assert_eq!(AccessDuration::parse("24h", None).unwrap().days(), 1);
        assert_eq!(AccessDuration::parse("7d", Some(99)).unwrap().days(), 7);
        assert_eq!(AccessDuration::parse("30d", None).unwrap().days(), 30);
        assert_eq!(AccessDuration::parse("custom", Some(12)).unwrap().days(), 12);
        assert_eq!(
            AccessDuration::parse("custom", Some(0)),
            Err(ProtocolError::InvalidDuration)
        );
        assert_eq!(
            AccessDuration::parse("custom", None),
            Err(ProtocolError::InvalidDuration)
        );
        assert!(matches!(
            AccessDuration::parse("1y", None),
            Err(ProtocolError::UnknownDuration(_))
        ));
    }

    #[test]
    fn new_request_requires_consent_reason_and_types() {
        let owner = Uuid::new_v4();
        let labs = types(&["Laboratory Results"]);
        assert_eq!(
            NewAccessRequest::new(owner, "follow-up", &labs, AccessDuration::Week, false),
            Err(ProtocolError::ConsentRequired)
        );
        assert_eq!(
            NewAccessRequest::new(owner, "   ", &labs, AccessDuration::Week, true),
            Err(ProtocolError::MissingField("reason"))
        );
        assert_eq!(
            NewAccessRequest::new(owner, "follow-up", &types(&[" ", ""]), AccessDuration::Week, true),
            Err(ProtocolError::NoRecordTypes)
        );
    }

    #[test]
    fn new_request_dedupes_record_types_and_starts_pending() {
        let owner = Uuid::new_v4();
        let requester = Uuid::new_v4();
        let now = Utc::now();
        let input = NewAccessRequest::new(
            owner,
            "  cardiology referral ",
            &types(&["Laboratory Results", "Imaging & Radiology", "Laboratory Results"]),
            AccessDuration::Custom(3),
            true,
        )
        .unwrap();
        assert_eq!(input.reason, "cardiology referral");
        assert_eq!(input.requested_record_types.len(), 2);

        let row = input.into_pending(requester, now);
        assert_eq!(row.status, AccessStatus::Pending);
        assert_eq!(row.requester_id, requester);
        assert_eq!(row.owner_id, owner);
        assert_eq!(row.requested_duration, 3);
        assert_eq!(row.requested_at, now);
    }

    #[test]
    fn resend_copies_a_rejected_request_only() {
        let now = Utc::now();
        let mut original = NewAccessRequest::new(
            Uuid::new_v4(),
            "second opinion",
            &types(&["Surgical History"]),
            AccessDuration::Month,
            true,
        )
        .unwrap()
        .into_pending(Uuid::new_v4(), now);

        assert_eq!(
            original.resend(now),
            Err(ProtocolError::NotResendable(AccessStatus::Pending))
        );

        original.status = AccessStatus::Rejected;
        let later = now + Duration::hours(2);
        let copy = original.resend(later).unwrap();
        assert_ne!(copy.id, original.id);
        assert_eq!(copy.status, AccessStatus::Pending);
        assert_eq!(copy.reason, original.reason);
        assert_eq!(copy.requested_record_types, original.requested_record_types);
        assert_eq!(copy.requested_duration, original.requested_duration);
        assert_eq!(copy.requested_at, later);
        assert_eq!(original.status, AccessStatus::Rejected);
    }

    #[test]
    fn grants_last_thirty_days_regardless_of_request() {
        let now = Utc::now();
        let request = NewAccessRequest::new(
            Uuid::new_v4(),
            "triage",
            &types(&["Medication History"]),
            AccessDuration::Day,
            true,
        )
        .unwrap()
        .into_pending(Uuid::new_v4(), now);

        let grant = Grant::for_request(&request, now);
        assert_eq!(grant.provider_id, request.requester_id);
        assert_eq!(grant.patient_id, request.owner_id);
        assert_eq!(grant.access_request_id, request.id);
        assert_eq!(grant.valid_till - now, Duration::days(30));
        assert!(grant.is_active(now + Duration::days(30)));
        assert!(!grant.is_active(now + Duration::days(30) + Duration::seconds(1)));
    }
}
