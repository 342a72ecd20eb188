use axum::{extract::State, Json};
use std::collections::HashMap;
use std::sync::Arc;
use chrono::Utc;
use healthchain_protocol::Role;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::MyPatientView;
use crate::session::AuthUser;
use crate::AppState;

/// Patients this provider currently holds a live grant for.
pub async fn my_patients(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<MyPatientView>>, ApiError> {
    user.require(Role::Provider)?;
    let grants = state
        .store
        .active_grants_for_provider(user.id, Utc::now())
        .await?;

    let ids: Vec<Uuid> = grants.iter().map(|g| g.patient_id).collect();
    let mut patients: HashMap<Uuid, _> = state
        .store
        .get_users(&ids)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    let views = grants
        .into_iter()
        .filter_map(|grant| {
            let patient = patients.remove(&grant.patient_id)?;
            Some(MyPatientView {
                grant_id: grant.id,
                access_request_id: grant.access_request_id,
                valid_till: grant.valid_till,
                patient,
            })
        })
        .collect();
    Ok(Json(views))
}
