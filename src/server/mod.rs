//! Same-origin HTTP relay.
//!
//! Serves the cached podcast feed and the catalog to the site's own pages,
//! so browsers never talk to the feed host or a third-party proxy.

mod error;
mod handlers;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::feed::{build_client, FeedCache, FeedSource, FetchSettings};

pub use error::ApiError;
pub use handlers::{CatalogResponse, EpisodesResponse, SearchParams};

/// Shared state handed to every handler. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct AppState {
    pub feed: Arc<FeedCache>,
    pub catalog: Arc<Catalog>,
    /// External podcast page linked from the fallback UI.
    pub podcast_page_url: Arc<str>,
}

impl AppState {
    pub fn new(feed: FeedCache, catalog: Catalog, podcast_page_url: &str) -> Self {
        Self {
            feed: Arc::new(feed),
            catalog: Arc::new(catalog),
            podcast_page_url: Arc::from(podcast_page_url),
        }
    }

    /// Builds the HTTP client, feed cache and catalog described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = build_client(&config.user_agent).context("Failed to build HTTP client")?;
        let source = FeedSource::new(
            client,
            config.feed_url.clone(),
            FetchSettings::from_config(config),
        );
        let cache = FeedCache::new(source, Duration::from_secs(config.cache_ttl_secs));

        let catalog = match &config.catalog_path {
            Some(path) => Catalog::load(path)
                .with_context(|| format!("Failed to load catalog: {}", path.display()))?,
            None => Catalog::builtin().context("Built-in catalog is invalid")?,
        };

        Ok(Self::new(cache, catalog, &config.podcast_page_url))
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/api/podcast/episodes", get(handlers::episodes))
        .route("/podcast", get(handlers::podcast_page))
        .route("/api/catalog/{section}", get(handlers::catalog_search))
        .route("/resources", get(handlers::resources_page))
        .route("/tools", get(handlers::tools_page))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds `config.bind_addr` and serves until Ctrl-C.
pub async fn serve(config: &Config, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;

    tracing::info!(
        addr = %listener.local_addr().context("Listener has no local address")?,
        feed = %config.feed_url,
        "Relay listening"
    );

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    tracing::info!("Relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
