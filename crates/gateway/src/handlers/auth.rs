use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tokio::task;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::Utc;
use healthchain_protocol::{is_reasonable_email, normalize_email, SignUp, UserProfile};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{LoginRequest, SessionUser};
use crate::session::{build_cookie, clear_cookie, AuthUser, AUTH_COOKIE, LAST_EMAIL_COOKIE};
use crate::AppState;

/// The last-login hint outlives any single session.
const LAST_EMAIL_MAX_AGE_SECS: i64 = 30 * 24 * 60 * 60;

async fn hash_password(password: String) -> Result<String, ApiError> {
    task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
    })
    .await
    .map_err(|_| ApiError::Internal("password hashing worker failed".to_string()))?
    .map_err(|_| ApiError::Internal("password hashing failed".to_string()))
}

async fn verify_password(password: String, hash: String) -> Result<bool, ApiError> {
    task::spawn_blocking(move || match PasswordHash::new(&hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    })
    .await
    .map_err(|_| ApiError::Internal("password verification worker failed".to_string()))
}

fn append_cookie(headers: &mut HeaderMap, cookie: &str) {
    if let Ok(v) = HeaderValue::from_str(cookie) {
        headers.append(SET_COOKIE, v);
    }
}

fn auth_response(
    state: &AppState,
    status: StatusCode,
    user: &UserProfile,
    remember_email: bool,
) -> Result<impl IntoResponse, ApiError> {
    let token = state.sessions.issue(user, Utc::now())?;
    let max_age = state.sessions.ttl_secs();

    let mut headers = HeaderMap::new();
    append_cookie(
        &mut headers,
        &build_cookie(AUTH_COOKIE, &token, max_age, state.cookie_secure, true),
    );
    if remember_email {
        append_cookie(
            &mut headers,
            &build_cookie(
                LAST_EMAIL_COOKIE,
                &user.email,
                LAST_EMAIL_MAX_AGE_SECS,
                state.cookie_secure,
                false,
            ),
        );
    }

    let body = serde_json::json!({
        "token": token,
        "user": SessionUser::from(user),
    });

    Ok((status, headers, Json(body)))
}

pub async fn signup(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SignUp>,
) -> Result<impl IntoResponse, ApiError> {
    let (profile, password) = payload.into_profile(Uuid::new_v4())?;
    tracing::info!("Sign-up request received for {} ({})", profile.email, profile.role);

    if state.store.find_identity(&profile.email).await?.is_some() {
        return Err(ApiError::Conflict("User already exists".to_string()));
    }

    let password_hash = hash_password(password).await?;
    state.store.create_user(&profile, &password_hash).await?;

    auth_response(&state, StatusCode::CREATED, &profile, false)
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&payload.email);
    if !is_reasonable_email(&email) || payload.password.is_empty() || payload.password.len() > 128 {
        return Err(ApiError::InvalidCredentials);
    }

    let Some((profile, hash)) = state.store.find_identity(&email).await? else {
        return Err(ApiError::InvalidCredentials);
    };

    if !verify_password(payload.password, hash).await? {
        tracing::debug!("Failed login for {}", email);
        return Err(ApiError::InvalidCredentials);
    }

    auth_response(&state, StatusCode::OK, &profile, true)
}

pub async fn session(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let profile = state
        .store
        .get_user(user.id)
        .await?
        .ok_or(ApiError::Unauthorized)?;
    Ok(Json(serde_json::json!({
        "user": SessionUser::from(&profile),
    })))
}

pub async fn logout(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    append_cookie(&mut headers, &clear_cookie(AUTH_COOKIE, state.cookie_secure, true));

    (StatusCode::OK, headers, Json(serde_json::json!({ "success": true })))
}
