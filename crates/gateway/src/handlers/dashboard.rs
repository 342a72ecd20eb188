use axum::{extract::State, Json};
use std::sync::Arc;
use chrono::Utc;
use healthchain_protocol::{AccessStatus, Role};

use crate::error::ApiError;
use crate::models::{PatientDashboard, ProviderDashboard, RequestCounts};
use crate::session::AuthUser;
use crate::AppState;

const RECENT_RECORDS: usize = 3;

pub async fn patient(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<PatientDashboard>, ApiError> {
    user.require(Role::Patient)?;
    let records = state.store.list_records(&user.email).await?;
    let pending = state
        .store
        .list_requests_by_owner(user.id, Some(AccessStatus::Pending))
        .await?;

    Ok(Json(PatientDashboard {
        total_records: records.len(),
        last_updated: records.first().map(|r| r.record_date),
        recent_records: records.into_iter().take(RECENT_RECORDS).collect(),
        pending_requests: pending.len(),
    }))
}

pub async fn provider(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<ProviderDashboard>, ApiError> {
    user.require(Role::Provider)?;
    let requests = state.store.list_requests_by_requester(user.id).await?;
    let mut counts = RequestCounts::default();
    for request in &requests {
        match request.status {
            AccessStatus::Pending => counts.pending += 1,
            AccessStatus::Approved => counts.approved += 1,
            AccessStatus::Rejected => counts.rejected += 1,
        }
    }
    let active = state
        .store
        .active_grants_for_provider(user.id, Utc::now())
        .await?;

    Ok(Json(ProviderDashboard {
        requests: counts,
        active_patients: active.len(),
    }))
}
