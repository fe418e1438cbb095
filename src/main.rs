use anyhow::Result;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod browser;
mod config;
mod db;
mod index;
mod lookup;
mod models;
mod playback;
mod scanner;
mod services;
mod tree;
mod upnp;

use config::AppConfig;
use index::MediaIndex;
use lookup::cache::{AssociationCache, AssociationKind};
use lookup::{LookupService, MovieLookup, TvLookup};
use playback::PlaybackQueue;
use scanner::{ScanJobs, ScanMode, Scanner};
use services::rate_limit::RateGate;
use services::{tmdb::TmdbClient, tvdb::TvdbClient};

/// Tracks all background task handles for graceful shutdown
struct BackgroundTasks {
    handles: Vec<(&'static str, JoinHandle<()>)>,
    shutdown: CancellationToken,
}

impl BackgroundTasks {
    fn new() -> Self {
        Self {
            handles: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    fn token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn spawn<F>(&mut self, name: &'static str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.handles.push((name, handle));
    }

    async fn shutdown(self) {
        tracing::info!("Initiating graceful shutdown...");

        // Also cancels every scan job, their tokens are children of this one
        self.shutdown.cancel();

        for (name, handle) in self.handles {
            tracing::debug!("Waiting for {} to finish...", name);
            match tokio::time::timeout(Duration::from_secs(10), handle).await {
                Ok(Ok(())) => tracing::debug!("{} finished cleanly", name),
                Ok(Err(e)) => tracing::warn!("{} panicked: {}", name, e),
                Err(_) => tracing::warn!("{} timed out during shutdown", name),
            }
        }

        tracing::info!("All background tasks stopped");
    }
}

pub struct AppState {
    pub config: AppConfig,
    pub index: MediaIndex,
    pub jobs: Arc<ScanJobs>,
    /// The single active playback session
    pub playback: tokio::sync::Mutex<PlaybackQueue>,
}

/// Lookup clients for whichever providers have API keys
fn build_lookup(config: &AppConfig, index: &MediaIndex) -> LookupService {
    let pool = index.pool().clone();
    let window = config.rate_limit_window();
    let language = config.metadata.language.clone();

    let movies = config.metadata.tmdb_api_key.clone().map(|key| {
        let gate = Arc::new(RateGate::new("tmdb", window));
        let client = TmdbClient::new(key, language.clone(), config.http_timeout(), gate);
        MovieLookup::new(
            index.clone(),
            Arc::new(client),
            Arc::new(AssociationCache::new(AssociationKind::Movie, pool.clone())),
        )
    });

    let tv = config.metadata.tvdb_api_key.clone().map(|key| {
        let gate = Arc::new(RateGate::new("tvdb", window));
        let client = TvdbClient::new(key, language.clone(), config.http_timeout(), gate);
        TvLookup::new(
            index.clone(),
            Arc::new(client),
            Arc::new(AssociationCache::new(AssociationKind::Series, pool.clone())),
        )
    });

    LookupService::new(movies, tv)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "theia=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = AppConfig::load();
    config.paths.ensure_dirs().await?;
    config.log_config();

    let database_url = config.database_url();
    tracing::debug!("Database URL: {}", database_url);

    let pool = db::connect(&database_url).await?;
    db::migrate(&pool).await?;

    let index = MediaIndex::new(pool.clone());
    let lookup = build_lookup(&config, &index);
    let scanner = Arc::new(Scanner::new(
        index.clone(),
        Arc::new(browser::LocalShareBrowser::new()),
        Arc::new(lookup),
        &config.scanner.scan_settings(),
    ));

    let mut bg_tasks = BackgroundTasks::new();
    let shutdown_token = bg_tasks.token();
    let jobs = Arc::new(ScanJobs::new(scanner.clone(), shutdown_token.clone()));

    let state = Arc::new(AppState {
        config: config.clone(),
        index: index.clone(),
        jobs,
        playback: tokio::sync::Mutex::new(PlaybackQueue::new()),
    });

    // Register configured shares; new ones get their first scan right away
    if !config.shares.is_empty() || config.scanner.scan_on_startup {
        let init_scanner = scanner.clone();
        let init_config = config.clone();
        let cancel = shutdown_token.clone();
        bg_tasks.spawn("share-init", async move {
            tokio::time::sleep(Duration::from_millis(500)).await;

            for share in &init_config.shares {
                let known = match init_scanner.index().get(&share.uri).await {
                    Ok(existing) => existing.is_some_and(|r| r.is_indexed),
                    Err(e) => {
                        tracing::error!("Failed to check share '{}': {}", share.name, e);
                        continue;
                    }
                };

                let root = match init_scanner.add_root(&share.uri, &share.name).await {
                    Ok(root) => root,
                    Err(e) => {
                        tracing::error!("Failed to register share '{}': {}", share.name, e);
                        continue;
                    }
                };

                if known && !init_config.scanner.scan_on_startup {
                    continue;
                }

                tracing::info!("Background: Scanning share '{}'...", share.name);
                match init_scanner.scan(&root, ScanMode::Isolated, &cancel).await {
                    Ok(report) => tracing::info!(
                        "Share '{}' scan complete: {} added, {} removed, {} errors",
                        share.name,
                        report.inserted,
                        report.removed,
                        report.errors.len()
                    ),
                    Err(scanner::ScanError::Cancelled) => break,
                    Err(e) => tracing::error!("Failed to scan share '{}': {}", share.name, e),
                }
            }

            if let Err(e) = db::rebuild_search_index(init_scanner.index().pool()).await {
                tracing::error!("Failed to rebuild search index: {}", e);
            }
            tracing::info!("Background: Share initialization complete");
        });
    }

    // Scheduled rescans isolate failures so one bad share does not stop the rest
    if config.scanner.enabled && config.scanner.rescan_interval_minutes > 0 {
        let rescan_scanner = scanner.clone();
        let cancel = shutdown_token.clone();
        let interval = Duration::from_secs(config.scanner.rescan_interval_minutes * 60);
        bg_tasks.spawn("periodic-rescan", async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("Rescan task received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        match rescan_scanner.rescan_all(ScanMode::Isolated, &cancel).await {
                            Ok(_) => {}
                            Err(scanner::ScanError::Cancelled) => break,
                            Err(e) => tracing::error!("Scheduled rescan failed: {}", e),
                        }
                        if let Err(e) = db::shrink_memory(rescan_scanner.index().pool()).await {
                            tracing::debug!("Failed to shrink SQLite memory: {}", e);
                        }
                    }
                }
            }
        });
    } else {
        tracing::info!("Scheduled rescans disabled");
    }

    let app = Router::new()
        .merge(api::routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let ip: std::net::IpAddr = config
        .bind_address
        .parse()
        .unwrap_or(std::net::IpAddr::from([0, 0, 0, 0]));
    let addr = SocketAddr::new(ip, config.port);
    tracing::info!("Starting server on {}", addr);

    let shutdown_signal = async {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
            _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
        }
    };

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    bg_tasks.shutdown().await;

    tracing::info!("Server shutdown complete");
    Ok(())
}
