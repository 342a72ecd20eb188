//! The access-request lifecycle, independent of HTTP.
//!
//! ```text
//! create ──► pending ──approve──► approved (+ grant, 30 days)
//!               │ └────reject───► rejected ──resend──► new pending row
//!               └──cancel──► (row deleted)
//! ```

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use healthchain_protocol::{
    grant_valid_till, AccessDuration, AccessRequest, AccessStatus, Decision, HealthRecord,
    NewAccessRequest, Role,
};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{CreateAccessPayload, DecisionView, GrantedRecordsView};
use crate::session::AuthUser;
use crate::store::PortalStore;

pub async fn create_request(
    store: &dyn PortalStore,
    requester: &AuthUser,
    payload: CreateAccessPayload,
    now: DateTime<Utc>,
) -> Result<AccessRequest, ApiError> {
    requester.require(Role::Provider)?;

    let duration = AccessDuration::parse(&payload.access_duration, payload.custom_days)?;
    let input = NewAccessRequest::new(
        payload.owner_id,
        &payload.reason,
        &payload.requested_record_types,
        duration,
        payload.consent,
    )?;

    let owner = store
        .get_user(input.owner_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("patient not found".to_string()))?;
    if owner.role != Role::Patient {
        return Err(ApiError::BadRequest(
            "access can only be requested from a patient".to_string(),
        ));
    }

    let request = input.into_pending(requester.id, now);
    store.insert_access_request(&request).await?;
    tracing::info!(
        "access request {} created: provider {} -> patient {} ({} types, {} days)",
        request.id,
        request.requester_id,
        request.owner_id,
        request.requested_record_types.len(),
        request.requested_duration
    );
    Ok(request)
}

async fn load(store: &dyn PortalStore, id: Uuid) -> Result<AccessRequest, ApiError> {
    store
        .get_access_request(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("access request not found".to_string()))
}

/// Owner approves or rejects a pending request.
pub async fn decide(
    store: &dyn PortalStore,
    owner: &AuthUser,
    id: Uuid,
    decision: Decision,
    now: DateTime<Utc>,
) -> Result<DecisionView, ApiError> {
    owner.require(Role::Patient)?;
    let request = load(store, id).await?;
    if request.owner_id != owner.id {
        return Err(ApiError::Forbidden(
            "only the record owner can decide this request".to_string(),
        ));
    }
    // Fails fast on a decided row; the store re-checks atomically.
    request.status.decide(decision)?;

    match decision {
        Decision::Approve => {
            let approval = store
                .approve_request(id, grant_valid_till(now), now)
                .await?;
            tracing::info!(
                "access request {} approved; grant {} valid till {}",
                id,
                approval.grant.id,
                approval.grant.valid_till
            );
            Ok(DecisionView {
                request: approval.request,
                grant: Some(approval.grant),
            })
        }
        Decision::Reject => {
            let request = store.reject_request(id, now).await?;
            tracing::info!("access request {} rejected", id);
            Ok(DecisionView {
                request,
                grant: None,
            })
        }
    }
}

/// Requester withdraws a pending request. The row is removed outright.
pub async fn cancel(store: &dyn PortalStore, requester: &AuthUser, id: Uuid) -> Result<(), ApiError> {
    let request = load(store, id).await?;
    if request.requester_id != requester.id {
        return Err(ApiError::Forbidden(
            "only the requester can cancel this request".to_string(),
        ));
    }
    if request.status != AccessStatus::Pending {
        return Err(ApiError::Conflict(format!(
            "only pending requests can be cancelled (current status: {})",
            request.status
        )));
    }
    store.delete_pending_request(id).await?;
    tracing::info!("access request {} cancelled by requester", id);
    Ok(())
}

/// Requester re-submits a rejected request as a new pending row.
pub async fn resend(
    store: &dyn PortalStore,
    requester: &AuthUser,
    id: Uuid,
    now: DateTime<Utc>,
) -> Result<AccessRequest, ApiError> {
    let original = load(store, id).await?;
    if original.requester_id != requester.id {
        return Err(ApiError::Forbidden(
            "only the requester can resend this request".to_string(),
        ));
    }
    let copy = original.resend(now)?;
    store.insert_access_request(&copy).await?;
    tracing::info!("access request {} resent as {}", original.id, copy.id);
    Ok(copy)
}

/// Records a requester may see through an approved request with a live grant.
pub async fn granted_records(
    store: &dyn PortalStore,
    requester: &AuthUser,
    id: Uuid,
    now: DateTime<Utc>,
) -> Result<GrantedRecordsView, ApiError> {
    let request = load(store, id).await?;
    if request.requester_id != requester.id {
        return Err(ApiError::Forbidden(
            "this access request belongs to another provider".to_string(),
        ));
    }
    if request.status != AccessStatus::Approved {
        return Err(ApiError::Forbidden(format!(
            "access request is {}",
            request.status
        )));
    }
    let grant = store
        .active_grant(request.requester_id, request.owner_id, now)
        .await?
        .ok_or_else(|| ApiError::Forbidden("access grant has expired".to_string()))?;

    let mut records: Vec<HealthRecord> = Vec::new();
    for record_type in &request.requested_record_types {
        records.extend(store.fetch_patient_records(request.owner_id, record_type).await?);
    }
    let mut seen = HashSet::new();
    records.retain(|r| seen.insert(r.id));
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Ok(GrantedRecordsView {
        request,
        grant,
        records,
    })
}

/// The record, if `requester` may currently open it through request `id`.
pub async fn granted_record(
    store: &dyn PortalStore,
    requester: &AuthUser,
    id: Uuid,
    record_id: Uuid,
    now: DateTime<Utc>,
) -> Result<HealthRecord, ApiError> {
    granted_records(store, requester, id, now)
        .await?
        .records
        .into_iter()
        .find(|r| r.id == record_id)
        .ok_or_else(|| ApiError::NotFound("record not found under this grant".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{Duration, NaiveDate};
    use healthchain_protocol::UserProfile;

    struct Fixture {
        store: MemoryStore,
        patient: AuthUser,
        doctor: AuthUser,
        other_doctor: AuthUser,
    }

    fn caller(p: &UserProfile) -> AuthUser {
        AuthUser {
            id: p.id,
            email: p.email.clone(),
            role: p.role,
        }
    }

    fn profile(role: Role, name: &str, email: &str) -> UserProfile {
        UserProfile {
            id: Uuid::new_v4(),
            email: email.to_string(),
            role,
            name: name.to_string(),
            age: None,
            sex: None,
            nationality: None,
            national_id: None,
        }
    }

    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let patient = profile(Role::Patient, "Kavya Menon", "kavya@example.com");
        let doctor = profile(Role::Provider, "Dr. Bose", "bose@clinic.org");
        let other = profile(Role::Provider, "Dr. Pillai", "pillai@clinic.org");
        for p in [&patient, &doctor, &other] {
            store.create_user(p, "argon2-hash").await.unwrap();
        }
        Fixture {
            store,
            patient: caller(&patient),
            doctor: caller(&doctor),
            other_doctor: caller(&other),
        }
    }

    fn payload(owner: Uuid, duration: &str) -> CreateAccessPayload {
        CreateAccessPayload {
            owner_id: owner,
            reason: "pre-surgery assessment".into(),
            requested_record_types: vec!["Laboratory Results".into(), "Imaging & Radiology".into()],
            access_duration: duration.into(),
            custom_days: None,
            consent: true,
        }
    }

    async fn add_record(store: &MemoryStore, email: &str, kind: &str, at: DateTime<Utc>) -> HealthRecord {
        let record = HealthRecord {
            id: Uuid::new_v4(),
            patient_email: email.to_string(),
            record_name: format!("{} scan", kind),
            record_type: kind.to_string(),
            record_date: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            file_url: format!("public/{}-f.pdf", at.timestamp_millis()),
            created_at: at,
        };
        store.insert_record(&record).await.unwrap();
        record
    }

    #[tokio::test]
    async fn new_requests_start_pending() {
        let f = fixture().await;
        let now = Utc::now();
        let req = create_request(&f.store, &f.doctor, payload(f.patient.id, "7d"), now)
            .await
            .unwrap();
        assert_eq!(req.status, AccessStatus::Pending);
        assert_eq!(req.requester_id, f.doctor.id);
        assert_eq!(req.owner_id, f.patient.id);
        assert_eq!(req.requested_duration, 7);
    }

    #[tokio::test]
    async fn only_providers_request_and_only_from_patients() {
        let f = fixture().await;
        let now = Utc::now();
        let as_patient = create_request(&f.store, &f.patient, payload(f.patient.id, "7d"), now).await;
        assert!(matches!(as_patient, Err(ApiError::Forbidden(_))));

        let at_provider = create_request(&f.store, &f.doctor, payload(f.other_doctor.id, "7d"), now).await;
        assert!(matches!(at_provider, Err(ApiError::BadRequest(_))));

        let nobody = create_request(&f.store, &f.doctor, payload(Uuid::new_v4(), "7d"), now).await;
        assert!(matches!(nobody, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn approval_grants_thirty_days_whatever_was_requested() {
        let f = fixture().await;
        let now = Utc::now();
        let req = create_request(&f.store, &f.doctor, payload(f.patient.id, "24h"), now)
            .await
            .unwrap();

        let view = decide(&f.store, &f.patient, req.id, Decision::Approve, now)
            .await
            .unwrap();
        assert_eq!(view.request.status, AccessStatus::Approved);
        let grant = view.grant.unwrap();
        assert_eq!(grant.provider_id, f.doctor.id);
        assert_eq!(grant.patient_id, f.patient.id);
        assert_eq!(grant.valid_till, now + Duration::days(30));

        let grants = f.store.grants_for_request(req.id).await.unwrap();
        assert_eq!(grants.len(), 1);
    }

    #[tokio::test]
    async fn rejection_creates_no_grant_and_is_final() {
        let f = fixture().await;
        let now = Utc::now();
        let req = create_request(&f.store, &f.doctor, payload(f.patient.id, "30d"), now)
            .await
            .unwrap();

        let view = decide(&f.store, &f.patient, req.id, Decision::Reject, now)
            .await
            .unwrap();
        assert_eq!(view.request.status, AccessStatus::Rejected);
        assert!(view.grant.is_none());
        assert!(f.store.grants_for_request(req.id).await.unwrap().is_empty());

        let again = decide(&f.store, &f.patient, req.id, Decision::Approve, now).await;
        assert!(matches!(again, Err(ApiError::Conflict(_))));
    }

    #[tokio::test]
    async fn only_the_owner_decides() {
        let f = fixture().await;
        let now = Utc::now();
        let req = create_request(&f.store, &f.doctor, payload(f.patient.id, "7d"), now)
            .await
            .unwrap();
        let by_doctor = decide(&f.store, &f.doctor, req.id, Decision::Approve, now).await;
        assert!(matches!(by_doctor, Err(ApiError::Forbidden(_))));
    }

    #[tokio::test]
    async fn cancel_removes_the_row_for_everyone() {
        let f = fixture().await;
        let now = Utc::now();
        let req = create_request(&f.store, &f.doctor, payload(f.patient.id, "7d"), now)
            .await
            .unwrap();

        let stranger = cancel(&f.store, &f.other_doctor, req.id).await;
        assert!(matches!(stranger, Err(ApiError::Forbidden(_))));

        cancel(&f.store, &f.doctor, req.id).await.unwrap();
        assert!(f.store.get_access_request(req.id).await.unwrap().is_none());
        assert!(f.store.list_requests_by_requester(f.doctor.id).await.unwrap().is_empty());
        assert!(f
            .store
            .list_requests_by_owner(f.patient.id, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn decided_requests_cannot_be_cancelled() {
        let f = fixture().await;
        let now = Utc::now();
        let req = create_request(&f.store, &f.doctor, payload(f.patient.id, "7d"), now)
            .await
            .unwrap();
        decide(&f.store, &f.patient, req.id, Decision::Approve, now).await.unwrap();
        assert!(matches!(
            cancel(&f.store, &f.doctor, req.id).await,
            Err(ApiError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn resend_creates_a_new_pending_row() {
        let f = fixture().await;
        let now = Utc::now();
        let mut body = payload(f.patient.id, "custom");
        body.custom_days = Some(12);
        let req = create_request(&f.store, &f.doctor, body, now).await.unwrap();

        let early = resend(&f.store, &f.doctor, req.id, now).await;
        assert!(matches!(early, Err(ApiError::Conflict(_))));

        decide(&f.store, &f.patient, req.id, Decision::Reject, now).await.unwrap();
        let later = now + Duration::minutes(5);
        let copy = resend(&f.store, &f.doctor, req.id, later).await.unwrap();

        assert_ne!(copy.id, req.id);
        assert_eq!(copy.status, AccessStatus::Pending);
        assert_eq!(copy.reason, req.reason);
        assert_eq!(copy.requested_record_types, req.requested_record_types);
        assert_eq!(copy.requested_duration, 12);

        let original = f.store.get_access_request(req.id).await.unwrap().unwrap();
        assert_eq!(original.status, AccessStatus::Rejected);
        assert_eq!(f.store.list_requests_by_requester(f.doctor.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn granted_records_cover_requested_types_only() {
        let f = fixture().await;
        let now = Utc::now();
        let lab = add_record(&f.store, &f.patient.email, "Laboratory Results", now).await;
        let scan = add_record(
            &f.store,
            &f.patient.email,
            "Imaging & Radiology",
            now + Duration::seconds(1),
        )
        .await;
        let meds = add_record(
            &f.store,
            &f.patient.email,
            "Medication History",
            now + Duration::seconds(2),
        )
        .await;

        let req = create_request(&f.store, &f.doctor, payload(f.patient.id, "7d"), now)
            .await
            .unwrap();

        let before = granted_records(&f.store, &f.doctor, req.id, now).await;
        assert!(matches!(before, Err(ApiError::Forbidden(_))));

        decide(&f.store, &f.patient, req.id, Decision::Approve, now).await.unwrap();
        let view = granted_records(&f.store, &f.doctor, req.id, now).await.unwrap();
        let ids: Vec<Uuid> = view.records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![scan.id, lab.id]);
        assert!(!ids.contains(&meds.id));

        let other = granted_records(&f.store, &f.other_doctor, req.id, now).await;
        assert!(matches!(other, Err(ApiError::Forbidden(_))));

        let hidden = granted_record(&f.store, &f.doctor, req.id, meds.id, now).await;
        assert!(matches!(hidden, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn expired_grants_hide_records() {
        let f = fixture().await;
        let now = Utc::now();
        add_record(&f.store, &f.patient.email, "Laboratory Results", now).await;
        let req = create_request(&f.store, &f.doctor, payload(f.patient.id, "7d"), now)
            .await
            .unwrap();
        decide(&f.store, &f.patient, req.id, Decision::Approve, now).await.unwrap();

        let expired = granted_records(&f.store, &f.doctor, req.id, now + Duration::days(31)).await;
        assert!(matches!(expired, Err(ApiError::Forbidden(_))));
    }
}
