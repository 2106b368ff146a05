//! Photo Mosaic - admin API, scheduler and one-shot pipeline runner.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use photo_mosaic::{
    config::{Cli, Command, RunConfig, ServeConfig, StorageConfig},
    create_router, create_s3_client, HttpFetcher, MemoryStore, MosaicService, MosaicStore,
    RouterConfig, S3ObjectStore, Scheduler, SqliteStore,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Run(config) => run_once(config).await,
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "photo_mosaic=debug,tower_http=debug"
    } else {
        "photo_mosaic=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wire the store, fetcher and object storage into a service.
async fn build_service(storage: &StorageConfig) -> Result<MosaicService, String> {
    let store: Arc<dyn MosaicStore> = match storage.database {
        Some(ref path) => {
            info!("  Database: {}", path.display());
            Arc::new(SqliteStore::open(path).map_err(|e| e.to_string())?)
        }
        None => {
            warn!("  Database: in-memory, nothing survives a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let settings = storage.service_settings();
    let fetcher = HttpFetcher::new(settings.fetch_timeout).map_err(|e| e.to_string())?;

    let client = create_s3_client(storage.s3_endpoint.as_deref(), &storage.s3_region).await;
    let objects = S3ObjectStore::new(
        client,
        storage.s3_bucket.clone(),
        storage.public_base_url(),
    );

    info!("  S3 bucket: {}", objects.bucket());
    if let Some(ref endpoint) = storage.s3_endpoint {
        info!("  S3 endpoint: {}", endpoint);
    }
    info!("  S3 region: {}", storage.s3_region);
    info!("  Public URL: {}", storage.public_base_url());
    info!(
        "  Render defaults: {}/ as {}, {} workers",
        settings.default_folder,
        settings.default_format.extension(),
        settings.default_concurrency
    );

    Ok(MosaicService::new(
        store,
        Arc::new(fetcher),
        Arc::new(objects),
        settings,
    ))
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Photo Mosaic v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");

    let service = match build_service(&config.storage).await {
        Ok(service) => service,
        Err(e) => {
            error!("Failed to initialize: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if config.scheduler {
        info!("  Scheduler: every {}s", config.poll_interval);
        Scheduler::new(service.clone(), config.poll_interval()).spawn();
    } else {
        warn!("  Scheduler: DISABLED - mosaics only render on request");
    }

    let mut router_config = RouterConfig::new().with_tracing(!config.no_tracing);
    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }
    let router = create_router(service, router_config);

    let addr = config.bind_address();
    info!("");
    info!("  Server listening on: http://{}", addr);
    info!("    curl http://{}/health", addr);
    info!("    curl http://{}/config", addr);
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Run Command
// =============================================================================

async fn run_once(config: RunConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let service = match build_service(&config.storage).await {
        Ok(service) => service,
        Err(e) => {
            error!("Failed to initialize: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match service.run_once().await {
        Ok(snapshot) => match serde_json::to_string_pretty(&snapshot) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Failed to serialize snapshot: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            error!("Mosaic run failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
