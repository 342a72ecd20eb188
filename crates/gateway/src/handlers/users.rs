use axum::{
    extract::{Query, State},
    Json,
};
use std::sync::Arc;
use healthchain_protocol::{DirectoryQuery, ProfileUpdate, Role, UserProfile};

use crate::error::ApiError;
use crate::models::{PartySummary, PatientMatch, SearchQuery};
use crate::session::AuthUser;
use crate::AppState;

pub async fn me(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<UserProfile>, ApiError> {
    let profile = state
        .store
        .get_user(user.id)
        .await?
        .ok_or_else(|| ApiError::NotFound("profile not found".to_string()))?;
    Ok(Json(profile))
}

pub async fn update_me(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(payload): Json<ProfileUpdate>,
) -> Result<Json<UserProfile>, ApiError> {
    let update = payload.validate()?;
    let profile = state.store.update_profile(user.id, &update).await?;
    tracing::debug!("Profile updated for {}", user.id);
    Ok(Json(profile))
}

/// Provider-side patient lookup by name, email or national id. Empty terms
/// return nothing.
pub async fn search_patients(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Vec<PatientMatch>>, ApiError> {
    user.require(Role::Provider)?;
    let Some(query) = DirectoryQuery::patients(&params.q) else {
        return Ok(Json(Vec::new()));
    };
    let hits = state.store.search_users(&query).await?;
    Ok(Json(hits.into_iter().map(PatientMatch::from).collect()))
}

/// Patient-side provider lookup by name or licence number; needs two characters.
pub async fn search_providers(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Vec<PartySummary>>, ApiError> {
    user.require(Role::Patient)?;
    let Some(query) = DirectoryQuery::providers(&params.q) else {
        return Ok(Json(Vec::new()));
    };
    let hits = state.store.search_users(&query).await?;
    Ok(Json(hits.iter().map(PartySummary::from).collect()))
}
