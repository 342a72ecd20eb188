use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use healthchain_protocol::{
    AccessRequest, AccessStatus, DirectoryQuery, Grant, HealthRecord, ProfileUpdate, RecordEdit,
    UserProfile,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{transition_miss, Approval, PortalStore, StoreError};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, UserProfile>,
    password_hashes: HashMap<Uuid, String>,
    records: HashMap<Uuid, HealthRecord>,
    access: HashMap<Uuid, AccessRequest>,
    grants: HashMap<Uuid, Grant>,
}

/// In-process tables behind one lock. Multi-row operations hold the write
/// lock for their whole duration.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_records_first(records: &mut [HealthRecord]) {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

#[async_trait]
impl PortalStore for MemoryStore {
    async fn create_user(&self, profile: &UserProfile, password_hash: &str) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        if t.users.values().any(|u| u.email == profile.email) || t.users.contains_key(&profile.id) {
            return Err(StoreError::Conflict("User already exists".to_string()));
        }
        t.users.insert(profile.id, profile.clone());
        t.password_hashes.insert(profile.id, password_hash.to_string());
        Ok(())
    }

    async fn find_identity(&self, email: &str) -> Result<Option<(UserProfile, String)>, StoreError> {
        let t = self.tables.read().await;
        let found = t.users.values().find(|u| u.email == email).and_then(|u| {
            t.password_hashes
                .get(&u.id)
                .map(|hash| (u.clone(), hash.clone()))
        });
        Ok(found)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn get_users(&self, ids: &[Uuid]) -> Result<Vec<UserProfile>, StoreError> {
        let t = self.tables.read().await;
        Ok(ids.iter().filter_map(|id| t.users.get(id).cloned()).collect())
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<UserProfile, StoreError> {
        let mut t = self.tables.write().await;
        let profile = t.users.get_mut(&id).ok_or(StoreError::NotFound("user"))?;
        update.apply(profile);
        Ok(profile.clone())
    }

    async fn search_users(&self, query: &DirectoryQuery) -> Result<Vec<UserProfile>, StoreError> {
        let t = self.tables.read().await;
        let mut hits: Vec<UserProfile> = t
            .users
            .values()
            .filter(|u| query.matches(u))
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(limit) = query.limit {
            hits.truncate(limit);
        }
        Ok(hits)
    }

    async fn insert_record(&self, record: &HealthRecord) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        if t.records.contains_key(&record.id) {
            return Err(StoreError::Conflict("record already exists".to_string()));
        }
        t.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn list_records(&self, patient_email: &str) -> Result<Vec<HealthRecord>, StoreError> {
        let t = self.tables.read().await;
        let mut rows: Vec<HealthRecord> = t
            .records
            .values()
            .filter(|r| r.patient_email == patient_email)
            .cloned()
            .collect();
        newest_records_first(&mut rows);
        Ok(rows)
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<HealthRecord>, StoreError> {
        Ok(self.tables.read().await.records.get(&id).cloned())
    }

    async fn update_record(&self, id: Uuid, edit: &RecordEdit) -> Result<HealthRecord, StoreError> {
        let mut t = self.tables.write().await;
        let record = t.records.get_mut(&id).ok_or(StoreError::NotFound("record"))?;
        record.record_name = edit.record_name.clone();
        record.record_type = edit.record_type.clone();
        Ok(record.clone())
    }

    async fn delete_record(&self, id: Uuid) -> Result<HealthRecord, StoreError> {
        self.tables
            .write()
            .await
            .records
            .remove(&id)
            .ok_or(StoreError::NotFound("record"))
    }

    async fn fetch_patient_records(
        &self,
        owner_id: Uuid,
        record_type: &str,
    ) -> Result<Vec<HealthRecord>, StoreError> {
        let t = self.tables.read().await;
        let Some(owner) = t.users.get(&owner_id) else {
            return Ok(Vec::new());
        };
        let mut rows: Vec<HealthRecord> = t
            .records
            .values()
            .filter(|r| r.patient_email == owner.email && r.record_type == record_type)
            .cloned()
            .collect();
        newest_records_first(&mut rows);
        Ok(rows)
    }

    async fn insert_access_request(&self, request: &AccessRequest) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        for party in [request.requester_id, request.owner_id] {
            if !t.users.contains_key(&party) {
                return Err(StoreError::NotFound("user"));
            }
        }
        t.access.insert(request.id, request.clone());
        Ok(())
    }

    async fn get_access_request(&self, id: Uuid) -> Result<Option<AccessRequest>, StoreError> {
        Ok(self.tables.read().await.access.get(&id).cloned())
    }

    async fn list_requests_by_requester(&self, requester_id: Uuid) -> Result<Vec<AccessRequest>, StoreError> {
        let t = self.tables.read().await;
        let mut rows: Vec<AccessRequest> = t
            .access
            .values()
            .filter(|r| r.requester_id == requester_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(rows)
    }

    async fn list_requests_by_owner(
        &self,
        owner_id: Uuid,
        status: Option<AccessStatus>,
    ) -> Result<Vec<AccessRequest>, StoreError> {
        let t = self.tables.read().await;
        let mut rows: Vec<AccessRequest> = t
            .access
            .values()
            .filter(|r| r.owner_id == owner_id && status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(rows)
    }

    async fn reject_request(&self, id: Uuid, now: DateTime<Utc>) -> Result<AccessRequest, StoreError> {
        let mut t = self.tables.write().await;
        match t.access.get_mut(&id) {
            Some(row) if row.status == AccessStatus::Pending => {
                row.status = AccessStatus::Rejected;
                row.updated_at = now;
                Ok(row.clone())
            }
            other => Err(transition_miss(other.map(|r| r.status))),
        }
    }

    async fn approve_request(
        &self,
        id: Uuid,
        valid_till: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Approval, StoreError> {
        let mut t = self.tables.write().await;
        let request = match t.access.get_mut(&id) {
            Some(row) if row.status == AccessStatus::Pending => {
                row.status = AccessStatus::Approved;
                row.updated_at = now;
                row.clone()
            }
            other => return Err(transition_miss(other.map(|r| r.status))),
        };

        let existing = t
            .grants
            .values_mut()
            .find(|g| {
                g.provider_id == request.requester_id
                    && g.patient_id == request.owner_id
                    && g.is_active(now)
            });

        let grant = match existing {
            Some(grant) => {
                grant.access_request_id = request.id;
                grant.valid_till = valid_till;
                grant.clone()
            }
            None => {
                let grant = Grant {
                    id: Uuid::new_v4(),
                    provider_id: request.requester_id,
                    patient_id: request.owner_id,
                    access_request_id: request.id,
                    valid_till,
                };
                t.grants.insert(grant.id, grant.clone());
                grant
            }
        };

        Ok(Approval { request, grant })
    }

    async fn delete_pending_request(&self, id: Uuid) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        match t.access.get(&id).map(|r| r.status) {
            Some(AccessStatus::Pending) => {
                t.access.remove(&id);
                Ok(())
            }
            other => Err(transition_miss(other)),
        }
    }

    async fn active_grant(
        &self,
        provider_id: Uuid,
        patient_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Grant>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.grants
            .values()
            .find(|g| g.provider_id == provider_id && g.patient_id == patient_id && g.is_active(now))
            .cloned())
    }

    async fn active_grants_for_provider(
        &self,
        provider_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Grant>, StoreError> {
        let t = self.tables.read().await;
        let mut rows: Vec<Grant> = t
            .grants
            .values()
            .filter(|g| g.provider_id == provider_id && g.is_active(now))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.valid_till.cmp(&b.valid_till));
        Ok(rows)
    }

    async fn grants_for_request(&self, access_request_id: Uuid) -> Result<Vec<Grant>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.grants
            .values()
            .filter(|g| g.access_request_id == access_request_id)
            .cloned()
            .collect())
    }
}
