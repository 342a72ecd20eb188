use axum::{
    extract::{DefaultBodyLimit, State},
    routing::{get, patch, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod blob;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod models;
pub mod session;
pub mod signing;
pub mod store;
pub mod workflow;

use blob::BlobStore;
use session::SessionKeys;
use signing::UrlSigner;
use store::PortalStore;

/// Room for multipart framing and the text fields around the file.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

pub struct AppState {
    pub store: Arc<dyn PortalStore>,
    pub blobs: BlobStore,
    pub signer: UrlSigner,
    pub sessions: SessionKeys,
    pub cookie_secure: bool,
    pub max_upload_bytes: usize,
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);
    let body_limit = state.max_upload_bytes.saturating_add(FORM_OVERHEAD_BYTES);

    Router::new()
        .route("/readyz", get(health_check))
        .route("/auth/signup", post(handlers::auth::signup))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/session", get(handlers::auth::session))
        .route("/users/me", get(handlers::users::me).put(handlers::users::update_me))
        .route("/users/search/patients", get(handlers::users::search_patients))
        .route("/users/search/providers", get(handlers::users::search_providers))
        .route("/records", get(handlers::records::list).post(handlers::records::upload))
        .route("/records/:id", patch(handlers::records::edit).delete(handlers::records::remove))
        .route("/records/:id/signed-url", post(handlers::records::signed_url))
        .route("/access", post(handlers::access::create))
        .route("/access/outgoing", get(handlers::access::outgoing))
        .route("/access/pending", get(handlers::access::pending))
        .route("/access/history", get(handlers::access::history))
        .route("/access/:id", axum::routing::delete(handlers::access::cancel))
        .route("/access/:id/approve", post(handlers::access::approve))
        .route("/access/:id/reject", post(handlers::access::reject))
        .route("/access/:id/resend", post(handlers::access::resend))
        .route("/access/:id/records", get(handlers::access::records))
        .route(
            "/access/:id/records/:record_id/signed-url",
            post(handlers::access::record_signed_url),
        )
        .route("/grants/patients", get(handlers::grants::my_patients))
        .route("/dashboard/patient", get(handlers::dashboard::patient))
        .route("/dashboard/provider", get(handlers::dashboard::provider))
        .route(
            "/storage/v1/object/sign/:bucket/*path",
            get(handlers::storage::signed_object),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "healthchain-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "blob_bytes": state.blobs.used_bytes(),
    }))
}
