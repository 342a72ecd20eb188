use async_trait::async_trait;
use chrono::{DateTime, Utc};
use healthchain_protocol::{
    AccessRequest, AccessStatus, DirectoryQuery, Grant, HealthRecord, ProfileUpdate, RecordEdit,
    UserProfile,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use super::{transition_miss, Approval, PortalStore, StoreError};
use crate::models::{AccessRow, GrantRow, IdentityRow, RecordRow, UserRow};

const USER_COLUMNS: &str = "id, email, role, name, age, sex, nationality, national_id";
const RECORD_COLUMNS: &str =
    "id, patient_email, record_name, record_type, record_date, file_url, created_at";
const ACCESS_COLUMNS: &str = "id, requester_id, owner_id, status, reason, requested_record_types, \
     requested_duration, requested_at, updated_at";
const GRANT_COLUMNS: &str = "id, provider_id, patient_id, access_request_id, valid_till";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Provisions the schema (tables plus the `fetch_patient_records` function).
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn current_status(&self, id: Uuid) -> Result<Option<AccessStatus>, StoreError> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM access_control WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        status
            .map(|s| {
                s.parse::<AccessStatus>()
                    .map_err(|e| StoreError::Corrupt(format!("access_control.status: {}", e)))
            })
            .transpose()
    }
}

fn conflict_on_unique(err: sqlx::Error, message: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(message.to_string())
        }
        _ => StoreError::Database(err),
    }
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn users(rows: Vec<UserRow>) -> Result<Vec<UserProfile>, StoreError> {
    rows.into_iter().map(UserProfile::try_from).collect()
}

fn requests(rows: Vec<AccessRow>) -> Result<Vec<AccessRequest>, StoreError> {
    rows.into_iter().map(AccessRequest::try_from).collect()
}

#[async_trait]
impl PortalStore for PgStore {
    async fn create_user(&self, profile: &UserProfile, password_hash: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO users (id, email, role, name, age, sex, nationality, national_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(profile.id)
        .bind(&profile.email)
        .bind(profile.role.as_str())
        .bind(&profile.name)
        .bind(profile.age)
        .bind(&profile.sex)
        .bind(&profile.nationality)
        .bind(&profile.national_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_on_unique(e, "User already exists"))?;

        sqlx::query("INSERT INTO auth_identities (user_id, password_hash) VALUES ($1, $2)")
            .bind(profile.id)
            .bind(password_hash)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_identity(&self, email: &str) -> Result<Option<(UserProfile, String)>, StoreError> {
        let row = sqlx::query_as::<_, IdentityRow>(
            "SELECT u.id, u.email, u.role, u.name, u.age, u.sex, u.nationality, u.national_id, \
                    a.password_hash \
             FROM users u JOIN auth_identities a ON a.user_id = u.id \
             WHERE u.email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some((UserProfile::try_from(r.user)?, r.password_hash))),
            None => Ok(None),
        }
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<UserProfile>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(UserProfile::try_from).transpose()
    }

    async fn get_users(&self, ids: &[Uuid]) -> Result<Vec<UserProfile>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        users(rows)
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> Result<UserProfile, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET name = $2, age = $3, sex = $4, nationality = $5, national_id = $6 \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(&update.name)
        .bind(update.age)
        .bind(&update.sex)
        .bind(&update.nationality)
        .bind(&update.national_id)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or(StoreError::NotFound("user"))?.try_into()
    }

    async fn search_users(&self, query: &DirectoryQuery) -> Result<Vec<UserProfile>, StoreError> {
        let pattern = format!("%{}%", escape_like(&query.term));
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE role = $1 \
               AND (name ILIKE $2 OR ($3 AND email ILIKE $2) OR national_id ILIKE $2) \
             ORDER BY name \
             LIMIT $4"
        ))
        .bind(query.role.as_str())
        .bind(&pattern)
        .bind(query.include_email)
        .bind(query.limit.map(|l| l as i64))
        .fetch_all(&self.pool)
        .await?;
        users(rows)
    }

    async fn insert_record(&self, record: &HealthRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO patient_records \
               (id, patient_email, record_name, record_type, record_date, file_url, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(record.id)
        .bind(&record.patient_email)
        .bind(&record.record_name)
        .bind(&record.record_type)
        .bind(record.record_date)
        .bind(&record.file_url)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "record already exists"))?;
        Ok(())
    }

    async fn list_records(&self, patient_email: &str) -> Result<Vec<HealthRecord>, StoreError> {
        let rows = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM patient_records \
             WHERE patient_email = $1 ORDER BY created_at DESC"
        ))
        .bind(patient_email)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(HealthRecord::from).collect())
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<HealthRecord>, StoreError> {
        let row = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM patient_records WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(HealthRecord::from))
    }

    async fn update_record(&self, id: Uuid, edit: &RecordEdit) -> Result<HealthRecord, StoreError> {
        let row = sqlx::query_as::<_, RecordRow>(&format!(
            "UPDATE patient_records SET record_name = $2, record_type = $3 \
             WHERE id = $1 RETURNING {RECORD_COLUMNS}"
        ))
        .bind(id)
        .bind(&edit.record_name)
        .bind(&edit.record_type)
        .fetch_optional(&self.pool)
        .await?;
        row.map(HealthRecord::from).ok_or(StoreError::NotFound("record"))
    }

    async fn delete_record(&self, id: Uuid) -> Result<HealthRecord, StoreError> {
        let row = sqlx::query_as::<_, RecordRow>(&format!(
            "DELETE FROM patient_records WHERE id = $1 RETURNING {RECORD_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(HealthRecord::from).ok_or(StoreError::NotFound("record"))
    }

    async fn fetch_patient_records(
        &self,
        owner_id: Uuid,
        record_type: &str,
    ) -> Result<Vec<HealthRecord>, StoreError> {
        let rows = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM fetch_patient_records($1, $2)"
        ))
        .bind(owner_id)
        .bind(record_type)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(HealthRecord::from).collect())
    }

    async fn insert_access_request(&self, request: &AccessRequest) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO access_control \
               (id, requester_id, owner_id, status, reason, requested_record_types, \
                requested_duration, requested_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(request.id)
        .bind(request.requester_id)
        .bind(request.owner_id)
        .bind(request.status.as_str())
        .bind(&request.reason)
        .bind(&request.requested_record_types)
        .bind(request.requested_duration)
        .bind(request.requested_at)
        .bind(request.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => StoreError::NotFound("user"),
            _ => StoreError::Database(e),
        })?;
        Ok(())
    }

    async fn get_access_request(&self, id: Uuid) -> Result<Option<AccessRequest>, StoreError> {
        let row = sqlx::query_as::<_, AccessRow>(&format!(
            "SELECT {ACCESS_COLUMNS} FROM access_control WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AccessRequest::try_from).transpose()
    }

    async fn list_requests_by_requester(&self, requester_id: Uuid) -> Result<Vec<AccessRequest>, StoreError> {
        let rows = sqlx::query_as::<_, AccessRow>(&format!(
            "SELECT {ACCESS_COLUMNS} FROM access_control \
             WHERE requester_id = $1 ORDER BY requested_at DESC"
        ))
        .bind(requester_id)
        .fetch_all(&self.pool)
        .await?;
        requests(rows)
    }

    async fn list_requests_by_owner(
        &self,
        owner_id: Uuid,
        status: Option<AccessStatus>,
    ) -> Result<Vec<AccessRequest>, StoreError> {
        let rows = sqlx::query_as::<_, AccessRow>(&format!(
            "SELECT {ACCESS_COLUMNS} FROM access_control \
             WHERE owner_id = $1 AND ($2::text IS NULL OR status = $2) \
             ORDER BY updated_at DESC"
        ))
        .bind(owner_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;
        requests(rows)
    }

    async fn reject_request(&self, id: Uuid, now: DateTime<Utc>) -> Result<AccessRequest, StoreError> {
        let row = sqlx::query_as::<_, AccessRow>(&format!(
            "UPDATE access_control SET status = 'rejected', updated_at = $2 \
             WHERE id = $1 AND status = 'pending' RETURNING {ACCESS_COLUMNS}"
        ))
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(transition_miss(self.current_status(id).await?)),
        }
    }

    async fn approve_request(
        &self,
        id: Uuid,
        valid_till: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Approval, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, AccessRow>(&format!(
            "UPDATE access_control SET status = 'approved', updated_at = $2 \
             WHERE id = $1 AND status = 'pending' RETURNING {ACCESS_COLUMNS}"
        ))
        .bind(id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Err(transition_miss(self.current_status(id).await?));
        };
        let request = AccessRequest::try_from(row)?;

        // FOR UPDATE below locks nothing while the pair has no grant yet, so
        // concurrent approvals for one pair queue on this lock instead.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text || ':' || $2::text, 0))")
            .bind(request.requester_id)
            .bind(request.owner_id)
            .execute(&mut *tx)
            .await?;

        let existing = sqlx::query_as::<_, GrantRow>(&format!(
            "SELECT {GRANT_COLUMNS} FROM provider_patient \
             WHERE provider_id = $1 AND patient_id = $2 AND valid_till >= $3 \
             ORDER BY valid_till DESC LIMIT 1 FOR UPDATE"
        ))
        .bind(request.requester_id)
        .bind(request.owner_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let grant_row = match existing {
            Some(active) => {
                sqlx::query_as::<_, GrantRow>(&format!(
                    "UPDATE provider_patient SET access_request_id = $2, valid_till = $3 \
                     WHERE id = $1 RETURNING {GRANT_COLUMNS}"
                ))
                .bind(active.id)
                .bind(request.id)
                .bind(valid_till)
                .fetch_one(&mut *tx)
                .await?
            }
            None => {
                sqlx::query_as::<_, GrantRow>(&format!(
                    "INSERT INTO provider_patient (id, provider_id, patient_id, access_request_id, valid_till) \
                     VALUES ($1, $2, $3, $4, $5) RETURNING {GRANT_COLUMNS}"
                ))
                .bind(Uuid::new_v4())
                .bind(request.requester_id)
                .bind(request.owner_id)
                .bind(request.id)
                .bind(valid_till)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        tx.commit().await?;
        Ok(Approval {
            request,
            grant: Grant::from(grant_row),
        })
    }

    async fn delete_pending_request(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM access_control WHERE id = $1 AND status = 'pending'")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(transition_miss(self.current_status(id).await?));
        }
        Ok(())
    }

    async fn active_grant(
        &self,
        provider_id: Uuid,
        patient_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Grant>, StoreError> {
        let row = sqlx::query_as::<_, GrantRow>(&format!(
            "SELECT {GRANT_COLUMNS} FROM provider_patient \
             WHERE provider_id = $1 AND patient_id = $2 AND valid_till >= $3 \
             ORDER BY valid_till DESC LIMIT 1"
        ))
        .bind(provider_id)
        .bind(patient_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Grant::from))
    }

    async fn active_grants_for_provider(
        &self,
        provider_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Grant>, StoreError> {
        let rows = sqlx::query_as::<_, GrantRow>(&format!(
            "SELECT {GRANT_COLUMNS} FROM provider_patient \
             WHERE provider_id = $1 AND valid_till >= $2 ORDER BY valid_till"
        ))
        .bind(provider_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Grant::from).collect())
    }

    async fn grants_for_request(&self, access_request_id: Uuid) -> Result<Vec<Grant>, StoreError> {
        let rows = sqlx::query_as::<_, GrantRow>(&format!(
            "SELECT {GRANT_COLUMNS} FROM provider_patient WHERE access_request_id = $1"
        ))
        .bind(access_request_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Grant::from).collect())
    }
}
