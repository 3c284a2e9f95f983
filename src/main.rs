//! raster-tileserver - Dynamic tiles from GeoTIFF and COG rasters.
//!
//! This binary starts the HTTP server and configures all components.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use raster_tileserver::{
    config::Config,
    io::{create_http_client, create_s3_client},
    raster::{DatasetRegistry, UriSource},
    server::create_router,
    tile::TileService,
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    print_banner();

    info!("Configuration:");
    match &config.data_root {
        Some(root) => info!("  Data root: {}", root.display()),
        None => info!("  Data root: unrestricted"),
    }
    if let Some(ref endpoint) = config.s3_endpoint {
        info!("  S3 endpoint: {}", endpoint);
    }
    info!("  S3 region: {}", config.s3_region);
    info!(
        "  Remote reads: {}s timeout, {} attempt(s)",
        config.http_timeout, config.retry_attempts
    );
    info!(
        "  Cache: {} datasets, {} blocks/dataset, {}MB / {} tiles",
        config.cache_datasets,
        config.cache_blocks,
        config.tile_cache_bytes / (1024 * 1024),
        config.tile_cache_entries
    );
    info!(
        "  Rendering: {}px tiles, {} resampling, {:?} overviews",
        config.tile_size,
        config.resampling.name(),
        config.overview_policy
    );

    let http = match create_http_client(config.http_timeout()) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to create HTTP client: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let s3 = create_s3_client(config.s3_endpoint.as_deref(), &config.s3_region).await;

    let mut source = UriSource::new(http)
        .with_s3(s3)
        .with_timeout(config.http_timeout())
        .with_retry(config.retry_policy());
    if let Some(root) = &config.data_root {
        source = source.with_data_root(root.clone());
    }

    let registry = DatasetRegistry::with_options(source, config.registry_options());
    let tile_service = TileService::with_options(
        Arc::new(registry),
        config.tile_cache_options(),
        config.service_options(),
    );
    let router = create_router(tile_service, config.router_config());

    let addr = config.bind_address();

    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Server listening on: http://{}", addr);
    info!("");
    info!("  Try these endpoints:");
    info!("    curl http://{}/health", addr);
    info!("    curl 'http://{}/api/metadata?filename=<path|url|s3://>'", addr);
    info!("    curl 'http://{}/api/tiles/0/0/0.png?filename=<...>'", addr);
    info!("────────────────────────────────────────────────────────────────");
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Server stopped");
    ExitCode::SUCCESS
}

/// Print the startup banner.
fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");
    info!("");
    info!("┏━┓┏━┓┏━┓╺┳╸┏━╸┏━┓   ╺┳╸╻╻  ┏━╸┏━┓┏━╸┏━┓╻ ╻┏━╸┏━┓");
    info!("┣┳┛┣━┫┗━┓ ┃ ┣╸ ┣┳┛    ┃ ┃┃  ┣╸ ┗━┓┣╸ ┣┳┛┃┏┛┣╸ ┣┳┛");
    info!("╹┗╸╹ ╹┗━┛ ╹ ┗━╸╹┗╸    ╹ ╹┗━╸┗━╸┗━┛┗━╸╹┗╸┗┛ ┗━╸╹┗╸");
    info!("                                             v{}", version);
    info!("");
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "raster_tileserver=debug,tower_http=debug"
    } else {
        "raster_tileserver=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Resolve on Ctrl-C so in-flight requests can finish.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
