use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::collections::HashMap;
use std::sync::Arc;
use chrono::Utc;
use healthchain_protocol::{AccessRequest, AccessStatus, Decision, Role};
use uuid::Uuid;

use crate::error::ApiError;
use crate::handlers::records::sign_record;
use crate::models::{
    AccessRequestView, CreateAccessPayload, DecisionView, GrantedRecordsView, PartySummary,
};
use crate::session::AuthUser;
use crate::signing::SignedUrl;
use crate::store::PortalStore;
use crate::workflow;
use crate::AppState;

/// Pairs each request with the directory entry picked out by `counterpart`.
async fn with_counterparts(
    store: &dyn PortalStore,
    requests: Vec<AccessRequest>,
    counterpart: fn(&AccessRequest) -> Uuid,
) -> Result<Vec<AccessRequestView>, ApiError> {
    let mut ids: Vec<Uuid> = requests.iter().map(counterpart).collect();
    ids.sort();
    ids.dedup();
    let people: HashMap<Uuid, PartySummary> = store
        .get_users(&ids)
        .await?
        .iter()
        .map(|p| (p.id, PartySummary::from(p)))
        .collect();

    Ok(requests
        .into_iter()
        .map(|request| AccessRequestView {
            counterpart: people.get(&counterpart(&request)).cloned(),
            request,
        })
        .collect())
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(payload): Json<CreateAccessPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let request = workflow::create_request(state.store.as_ref(), &user, payload, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

/// Requests this provider has sent, newest first.
pub async fn outgoing(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<AccessRequestView>>, ApiError> {
    user.require(Role::Provider)?;
    let requests = state.store.list_requests_by_requester(user.id).await?;
    let views = with_counterparts(state.store.as_ref(), requests, |r| r.owner_id).await?;
    Ok(Json(views))
}

/// Requests awaiting this patient's decision.
pub async fn pending(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<AccessRequestView>>, ApiError> {
    user.require(Role::Patient)?;
    let mut requests = state
        .store
        .list_requests_by_owner(user.id, Some(AccessStatus::Pending))
        .await?;
    requests.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
    let views = with_counterparts(state.store.as_ref(), requests, |r| r.requester_id).await?;
    Ok(Json(views))
}

pub async fn history(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<AccessRequestView>>, ApiError> {
    user.require(Role::Patient)?;
    let requests = state.store.list_requests_by_owner(user.id, None).await?;
    let views = with_counterparts(state.store.as_ref(), requests, |r| r.requester_id).await?;
    Ok(Json(views))
}

pub async fn approve(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<DecisionView>, ApiError> {
    let view = workflow::decide(state.store.as_ref(), &user, id, Decision::Approve, Utc::now()).await?;
    Ok(Json(view))
}

pub async fn reject(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<DecisionView>, ApiError> {
    let view = workflow::decide(state.store.as_ref(), &user, id, Decision::Reject, Utc::now()).await?;
    Ok(Json(view))
}

pub async fn cancel(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    workflow::cancel(state.store.as_ref(), &user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn resend(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let request = workflow::resend(state.store.as_ref(), &user, id, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn records(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<GrantedRecordsView>, ApiError> {
    let view = workflow::granted_records(state.store.as_ref(), &user, id, Utc::now()).await?;
    Ok(Json(view))
}

pub async fn record_signed_url(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((id, record_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<SignedUrl>, ApiError> {
    let record =
        workflow::granted_record(state.store.as_ref(), &user, id, record_id, Utc::now()).await?;
    tracing::info!("Provider {} opened record {} via request {}", user.id, record.id, id);
    Ok(Json(sign_record(&state, &record)?))
}
