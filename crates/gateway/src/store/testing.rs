use chrono::{DateTime, Duration, NaiveDate, Utc};
use healthchain_protocol::{
    grant_valid_till, AccessDuration, AccessRequest, AccessStatus, DirectoryQuery, HealthRecord,
    NewAccessRequest, ProfileUpdate, RecordEdit, Role, UserProfile,
};
use uuid::Uuid;

use super::{PortalStore, StoreError};

/// Names and emails carry a per-run tag so the suite can share a database
/// with other runs.
struct Cast {
    tag: String,
    patient: UserProfile,
    doctor: UserProfile,
}

fn user(role: Role, name: &str, email: &str) -> UserProfile {
    UserProfile {
        id: Uuid::new_v4(),
        email: email.to_string(),
        role,
        name: name.to_string(),
        age: Some(40),
        sex: None,
        nationality: Some("Indian".into()),
        national_id: None,
    }
}

async fn cast(store: &dyn PortalStore) -> Result<Cast, StoreError> {
    let tag = Uuid::new_v4().simple().to_string()[..10].to_string();
    let mut patient = user(
        Role::Patient,
        &format!("Meera Iyer {}", tag),
        &format!("meera.{}@example.com", tag),
    );
    patient.national_id = Some(format!("AAD-{}", tag));
    let mut doctor = user(
        Role::Provider,
        &format!("Dr. Sen {}", tag),
        &format!("sen.{}@clinic.org", tag),
    );
    doctor.national_id = Some(format!("MCI-{}", tag));
    store.create_user(&patient, "hash-p").await?;
    store.create_user(&doctor, "hash-d").await?;
    Ok(Cast {
        tag,
        patient,
        doctor,
    })
}

fn pending(c: &Cast, now: DateTime<Utc>) -> AccessRequest {
    NewAccessRequest::new(
        c.patient.id,
        "post-op review",
        &["Surgical History".to_string()],
        AccessDuration::Week,
        true,
    )
    .unwrap()
    .into_pending(c.doctor.id, now)
}

fn record(owner: &UserProfile, name: &str, kind: &str, created_at: DateTime<Utc>) -> HealthRecord {
    HealthRecord {
        id: Uuid::new_v4(),
        patient_email: owner.email.clone(),
        record_name: name.to_string(),
        record_type: kind.to_string(),
        record_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        file_url: format!("public/{}-{}.pdf", created_at.timestamp_millis(), Uuid::new_v4().simple()),
        created_at,
    }
}

// Postgres keeps microseconds; compare timestamps at that resolution.
fn micros(t: DateTime<Utc>) -> i64 {
    t.timestamp_micros()
}

/// Runs every store behaviour the portal relies on against `store`.
pub(crate) async fn run_store_conformance_tests(store: &dyn PortalStore) -> Result<(), StoreError> {
    test_duplicate_emails_conflict(store).await?;
    test_identity_lookup(store).await?;
    test_profile_update(store).await?;
    test_directory_search(store).await?;
    test_record_crud(store).await?;
    test_fetch_patient_records(store).await?;
    test_owner_listing_filters_by_status(store).await?;
    test_second_decision_conflicts(store).await?;
    test_approval_refreshes_active_grant(store).await?;
    test_concurrent_approvals_share_one_grant(store).await?;
    test_only_pending_rows_are_deleted(store).await?;
    test_expired_grants_filtered(store).await?;
    Ok(())
}

async fn test_duplicate_emails_conflict(store: &dyn PortalStore) -> Result<(), StoreError> {
    let c = cast(store).await?;
    let twin = UserProfile {
        id: Uuid::new_v4(),
        ..c.patient.clone()
    };
    assert!(matches!(
        store.create_user(&twin, "hash").await,
        Err(StoreError::Conflict(_))
    ));
    Ok(())
}

async fn test_identity_lookup(store: &dyn PortalStore) -> Result<(), StoreError> {
    let c = cast(store).await?;
    let (found, hash) = store
        .find_identity(&c.patient.email)
        .await?
        .expect("identity should exist");
    assert_eq!(found, c.patient);
    assert_eq!(hash, "hash-p");
    assert!(store
        .find_identity(&format!("nobody.{}@example.com", c.tag))
        .await?
        .is_none());

    let both = store.get_users(&[c.patient.id, c.doctor.id]).await?;
    assert_eq!(both.len(), 2);
    Ok(())
}

async fn test_profile_update(store: &dyn PortalStore) -> Result<(), StoreError> {
    let c = cast(store).await?;
    let update = ProfileUpdate {
        name: format!("Meera R. Iyer {}", c.tag),
        age: 41,
        sex: "F".into(),
        nationality: "Indian".into(),
        national_id: format!("AAD-{}", c.tag),
    };
    let updated = store.update_profile(c.patient.id, &update).await?;
    assert_eq!(updated.age, Some(41));
    assert_eq!(updated.sex.as_deref(), Some("F"));
    assert_eq!(store.get_user(c.patient.id).await?, Some(updated));
    assert!(matches!(
        store.update_profile(Uuid::new_v4(), &update).await,
        Err(StoreError::NotFound(_))
    ));
    Ok(())
}

async fn test_directory_search(store: &dyn PortalStore) -> Result<(), StoreError> {
    let c = cast(store).await?;

    // Unlimited, matched through email.
    let by_email = DirectoryQuery::patients(&format!("meera.{}@", c.tag)).unwrap();
    let hits = store.search_users(&by_email).await?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, c.patient.id);

    // Provider search ignores email but sees the licence number.
    let by_email = DirectoryQuery::providers(&format!("sen.{}@", c.tag)).unwrap();
    assert!(store.search_users(&by_email).await?.is_empty());
    let by_licence = DirectoryQuery::providers(&format!("mci-{}", c.tag)).unwrap();
    let hits = store.search_users(&by_licence).await?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, c.doctor.id);

    // LIKE wildcards in the term are literal.
    let wildcard = DirectoryQuery::patients(&format!("%{}", c.tag)).unwrap();
    assert!(store.search_users(&wildcard).await?.is_empty());
    Ok(())
}

async fn test_record_crud(store: &dyn PortalStore) -> Result<(), StoreError> {
    let c = cast(store).await?;
    let now = Utc::now();
    let older = record(&c.patient, "CBC", "Laboratory Results", now);
    let newer = record(&c.patient, "MRI", "Imaging & Radiology", now + Duration::seconds(5));
    store.insert_record(&older).await?;
    store.insert_record(&newer).await?;

    let listed = store.list_records(&c.patient.email).await?;
    let ids: Vec<Uuid> = listed.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![newer.id, older.id]);

    let edit = RecordEdit {
        record_name: "CBC (repeat)".into(),
        record_type: "Laboratory Results".into(),
    };
    let edited = store.update_record(older.id, &edit).await?;
    assert_eq!(edited.record_name, "CBC (repeat)");
    assert_eq!(edited.file_url, older.file_url);

    let removed = store.delete_record(older.id).await?;
    assert_eq!(removed.id, older.id);
    assert!(store.get_record(older.id).await?.is_none());
    assert!(matches!(
        store.delete_record(older.id).await,
        Err(StoreError::NotFound(_))
    ));
    Ok(())
}

async fn test_fetch_patient_records(store: &dyn PortalStore) -> Result<(), StoreError> {
    let c = cast(store).await?;
    let now = Utc::now();
    for (i, kind) in ["Laboratory Results", "Laboratory Results", "Imaging & Radiology"]
        .iter()
        .enumerate()
    {
        let r = record(&c.patient, &format!("record {}", i), kind, now + Duration::seconds(i as i64));
        store.insert_record(&r).await?;
    }

    let labs = store
        .fetch_patient_records(c.patient.id, "Laboratory Results")
        .await?;
    assert_eq!(labs.len(), 2);
    assert_eq!(labs[0].record_name, "record 1");
    assert!(store
        .fetch_patient_records(Uuid::new_v4(), "Laboratory Results")
        .await?
        .is_empty());
    Ok(())
}

async fn test_owner_listing_filters_by_status(store: &dyn PortalStore) -> Result<(), StoreError> {
    let c = cast(store).await?;
    let now = Utc::now();
    let kept = pending(&c, now);
    let refused = pending(&c, now + Duration::seconds(1));
    store.insert_access_request(&kept).await?;
    store.insert_access_request(&refused).await?;
    store.reject_request(refused.id, now + Duration::seconds(2)).await?;

    let all = store.list_requests_by_owner(c.patient.id, None).await?;
    let ids: Vec<Uuid> = all.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![refused.id, kept.id]);

    let open = store
        .list_requests_by_owner(c.patient.id, Some(AccessStatus::Pending))
        .await?;
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, kept.id);

    let sent = store.list_requests_by_requester(c.doctor.id).await?;
    assert_eq!(sent.len(), 2);
    Ok(())
}

async fn test_second_decision_conflicts(store: &dyn PortalStore) -> Result<(), StoreError> {
    let c = cast(store).await?;
    let now = Utc::now();
    let req = pending(&c, now);
    store.insert_access_request(&req).await?;

    let rejected = store.reject_request(req.id, now).await?;
    assert_eq!(rejected.status, AccessStatus::Rejected);
    let again = store.approve_request(req.id, grant_valid_till(now), now).await;
    assert!(matches!(again, Err(StoreError::Conflict(_))));
    assert!(store.grants_for_request(req.id).await?.is_empty());

    let missing = store.reject_request(Uuid::new_v4(), now).await;
    assert!(matches!(missing, Err(StoreError::NotFound(_))));
    Ok(())
}

async fn test_approval_refreshes_active_grant(store: &dyn PortalStore) -> Result<(), StoreError> {
    let c = cast(store).await?;
    let t0 = Utc::now();
    let first = pending(&c, t0);
    store.insert_access_request(&first).await?;
    let a = store.approve_request(first.id, grant_valid_till(t0), t0).await?;
    assert_eq!(a.request.status, AccessStatus::Approved);

    let t1 = t0 + Duration::days(10);
    let second = pending(&c, t1);
    store.insert_access_request(&second).await?;
    let b = store.approve_request(second.id, grant_valid_till(t1), t1).await?;

    assert_eq!(a.grant.id, b.grant.id);
    assert_eq!(b.grant.access_request_id, second.id);
    assert_eq!(micros(b.grant.valid_till), micros(grant_valid_till(t1)));
    assert_eq!(store.active_grants_for_provider(c.doctor.id, t1).await?.len(), 1);
    Ok(())
}

async fn test_concurrent_approvals_share_one_grant(store: &dyn PortalStore) -> Result<(), StoreError> {
    let c = cast(store).await?;
    let now = Utc::now();
    let a = pending(&c, now);
    let b = pending(&c, now);
    store.insert_access_request(&a).await?;
    store.insert_access_request(&b).await?;

    let valid_till = grant_valid_till(now);
    let (ra, rb) = tokio::join!(
        store.approve_request(a.id, valid_till, now),
        store.approve_request(b.id, valid_till, now),
    );
    ra?;
    rb?;

    let active = store.active_grants_for_provider(c.doctor.id, now).await?;
    assert_eq!(active.len(), 1, "one provider/patient pair holds one active grant");
    assert_eq!(active[0].patient_id, c.patient.id);
    Ok(())
}

async fn test_only_pending_rows_are_deleted(store: &dyn PortalStore) -> Result<(), StoreError> {
    let c = cast(store).await?;
    let now = Utc::now();
    let approved = pending(&c, now);
    store.insert_access_request(&approved).await?;
    store.approve_request(approved.id, grant_valid_till(now), now).await?;
    assert!(matches!(
        store.delete_pending_request(approved.id).await,
        Err(StoreError::Conflict(_))
    ));
    assert!(matches!(
        store.delete_pending_request(Uuid::new_v4()).await,
        Err(StoreError::NotFound(_))
    ));

    let open = pending(&c, now);
    store.insert_access_request(&open).await?;
    store.delete_pending_request(open.id).await?;
    assert!(store.get_access_request(open.id).await?.is_none());
    Ok(())
}

async fn test_expired_grants_filtered(store: &dyn PortalStore) -> Result<(), StoreError> {
    let c = cast(store).await?;
    let now = Utc::now();
    let req = pending(&c, now);
    store.insert_access_request(&req).await?;
    store.approve_request(req.id, grant_valid_till(now), now).await?;
    assert!(store.active_grant(c.doctor.id, c.patient.id, now).await?.is_some());

    let later = now + Duration::days(31);
    assert!(store.active_grant(c.doctor.id, c.patient.id, later).await?.is_none());
    assert!(store.active_grants_for_provider(c.doctor.id, later).await?.is_empty());
    assert_eq!(store.grants_for_request(req.id).await?.len(), 1);
    Ok(())
}
