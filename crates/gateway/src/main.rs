use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use healthchain_gateway::blob::BlobStore;
use healthchain_gateway::config::GatewayConfig;
use healthchain_gateway::session::SessionKeys;
use healthchain_gateway::signing::UrlSigner;
use healthchain_gateway::store::{MemoryStore, PgStore, PortalStore};
use healthchain_gateway::{router, AppState};
use healthchain_protocol::SIGNED_URL_TTL_SECS;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,healthchain_gateway=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = GatewayConfig::from_env()?;

    let store: Arc<dyn PortalStore> = match &config.database_url {
        Some(url) => {
            info!("Connecting to PostgreSQL...");
            let pg = PgStore::connect(url, config.db_max_connections).await?;
            pg.migrate().await?;
            info!("Connected to database, migrations applied.");
            Arc::new(pg)
        }
        None => {
            warn!("DATABASE_URL not set; portal data is kept in memory and lost on exit");
            Arc::new(MemoryStore::new())
        }
    };

    let blobs = BlobStore::open(&config.blob_path, &config.storage_secret)?;
    info!(
        "Blob store at {} ({} bytes in use)",
        config.blob_path.display(),
        blobs.used_bytes()
    );

    let state = Arc::new(AppState {
        store,
        blobs,
        signer: UrlSigner::new(&config.storage_secret, SIGNED_URL_TTL_SECS),
        sessions: SessionKeys::new(&config.jwt_secret, config.session_hours),
        cookie_secure: config.cookie_secure,
        max_upload_bytes: config.max_upload_bytes,
    });

    let app = router(state);

    info!("HealthChain gateway listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
