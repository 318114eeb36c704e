use anyhow::{Context, Result};
use axum::Router;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod dates;
mod db;
mod errors;
mod files;
mod handlers;
mod models;
mod repository;
mod routes;
mod services;
mod state;
mod store;

use config::ProviderKind;
use services::{CosService, ServiceSettings};
use state::AppState;
use store::{ClientFactory, CosClientFactory, LocalClientFactory, local::LocalObjectStore};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting cos-sync with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)
            .with_context(|| format!("creating storage directory {}", cfg.storage_dir))?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db = Arc::new(db::connect(&cfg.database_url, 5).await?);
    db::apply_schema(&db).await?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Object store backend ---
    let storage_dir = Path::new(&cfg.storage_dir);
    let (factory, local): (Arc<dyn ClientFactory>, Option<Arc<LocalObjectStore>>) = match cfg.provider {
        ProviderKind::Cos => (
            Arc::new(CosClientFactory {
                endpoint_override: cfg.cos_endpoint.clone(),
            }),
            None,
        ),
        ProviderKind::Local => {
            let store = Arc::new(LocalObjectStore::new(
                storage_dir.join("objects"),
                cfg.public_url.clone(),
                cfg.signing_key.clone(),
            ));
            tracing::info!("Serving objects from {:?}", storage_dir.join("objects"));
            (
                Arc::new(LocalClientFactory {
                    store: store.clone(),
                }),
                Some(store),
            )
        }
    };

    // --- Initialize core service ---
    let service = CosService::new(
        db.clone(),
        factory,
        ServiceSettings {
            max_upload_mb: cfg.max_upload_mb,
            staging_dir: storage_dir.join("staging"),
            provider_timeout: cfg.provider_timeout,
        },
    );

    // --- Build router ---
    let max_upload_bytes = usize::try_from(cfg.max_upload_mb.saturating_mul(files::MIB))
        .unwrap_or(usize::MAX);
    let app: Router = routes::routes::routes(max_upload_bytes).with_state(AppState { service, local });

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err).with_context(|| format!("binding {}", addr)),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
