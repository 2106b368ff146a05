//! Command-line and environment configuration.
//!
//! Process-level settings only: where to listen, where to persist, where to
//! publish. Run parameters for the pipeline itself live in the persisted
//! [`MosaicConfig`](crate::model::MosaicConfig) and are edited over HTTP.
//!
//! # Environment Variables
//!
//! Every option can be set with the `MOSAIC_` prefix:
//!
//! - `MOSAIC_HOST` - Server bind address (default: 0.0.0.0)
//! - `MOSAIC_PORT` - Server port (default: 3000)
//! - `MOSAIC_DATABASE` - SQLite file; in-memory storage when unset
//! - `MOSAIC_S3_BUCKET` - Bucket rendered mosaics are published to (required)
//! - `MOSAIC_S3_ENDPOINT` - Custom endpoint for S3-compatible services
//! - `MOSAIC_S3_REGION` - AWS region (default: us-east-1)
//! - `MOSAIC_PUBLIC_BASE_URL` - Base URL objects are served from
//! - `MOSAIC_POLL_INTERVAL` - Scheduler poll interval in seconds (default: 60)
//! - `MOSAIC_RENDER_FOLDER` - Default render folder (default: Mosaic/renders)
//! - `MOSAIC_RENDER_FORMAT` - Default output format (default: jpg)
//! - `MOSAIC_RENDER_CONCURRENCY` - Default tile workers (default: 6)
//! - `MOSAIC_FETCH_TIMEOUT` - Per-image fetch timeout in seconds (default: 30)
//! - `MOSAIC_SCHEDULER` - Run the interval scheduler (default: true)
//! - `MOSAIC_CORS_ORIGINS` - Allowed CORS origins, comma-separated

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::model::DEFAULT_RENDER_CONCURRENCY;
use crate::mosaic::render::{DEFAULT_RENDER_FOLDER, MAX_CONCURRENCY, MIN_CONCURRENCY};
use crate::mosaic::{OutputFormat, ServiceSettings};

// =============================================================================
// Default Values
// =============================================================================

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Photo Mosaic - builds mosaics of a reference image from a photo pool.
#[derive(Parser, Debug, Clone)]
#[command(name = "photo-mosaic")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve the admin API and run the scheduler
    Serve(ServeConfig),

    /// Run the pipeline once for the saved configuration and exit
    Run(RunConfig),
}

/// Storage options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct StorageConfig {
    /// SQLite database file. Uses in-memory storage when not set.
    #[arg(long, env = "MOSAIC_DATABASE")]
    pub database: Option<PathBuf>,

    /// S3 bucket rendered mosaics and main images are published to.
    #[arg(long, env = "MOSAIC_S3_BUCKET")]
    pub s3_bucket: String,

    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    #[arg(long, env = "MOSAIC_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_REGION, env = "MOSAIC_S3_REGION")]
    pub s3_region: String,

    /// Base URL published objects are reachable under.
    ///
    /// Defaults to the endpoint (path-style) or the virtual-hosted AWS URL.
    #[arg(long, env = "MOSAIC_PUBLIC_BASE_URL")]
    pub public_base_url: Option<String>,

    /// Default folder renders are uploaded to.
    #[arg(long, default_value = DEFAULT_RENDER_FOLDER, env = "MOSAIC_RENDER_FOLDER")]
    pub render_folder: String,

    /// Default output format (jpg or png).
    #[arg(long, default_value = "jpg", env = "MOSAIC_RENDER_FORMAT")]
    pub render_format: String,

    /// Default number of concurrent tile workers (1-16).
    #[arg(long, default_value_t = DEFAULT_RENDER_CONCURRENCY, env = "MOSAIC_RENDER_CONCURRENCY")]
    pub render_concurrency: usize,

    /// Timeout for a single image fetch, in seconds.
    #[arg(long, default_value_t = DEFAULT_FETCH_TIMEOUT_SECS, env = "MOSAIC_FETCH_TIMEOUT")]
    pub fetch_timeout: u64,
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.s3_bucket.is_empty() {
            return Err(
                "S3 bucket name is required. Set --s3-bucket or MOSAIC_S3_BUCKET".to_string(),
            );
        }
        if OutputFormat::parse(&self.render_format).is_none() {
            return Err(format!(
                "render_format must be jpg or png, got '{}'",
                self.render_format
            ));
        }
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.render_concurrency) {
            return Err(format!(
                "render_concurrency must be between {} and {}",
                MIN_CONCURRENCY, MAX_CONCURRENCY
            ));
        }
        if self.fetch_timeout == 0 {
            return Err("fetch_timeout must be greater than 0".to_string());
        }
        if let Some(ref base) = self.public_base_url {
            url::Url::parse(base)
                .map_err(|e| format!("public_base_url is not a valid URL: {}", e))?;
        }
        Ok(())
    }

    /// Base URL for published objects, falling back to the storage endpoint.
    pub fn public_base_url(&self) -> String {
        if let Some(ref base) = self.public_base_url {
            return base.trim_end_matches('/').to_string();
        }
        match self.s3_endpoint {
            Some(ref endpoint) => format!("{}/{}", endpoint.trim_end_matches('/'), self.s3_bucket),
            None => format!(
                "https://{}.s3.{}.amazonaws.com",
                self.s3_bucket, self.s3_region
            ),
        }
    }

    /// Render defaults for the service. Call `validate()` first.
    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            default_folder: self.render_folder.clone(),
            default_format: OutputFormat::parse(&self.render_format).unwrap_or_default(),
            default_concurrency: self.render_concurrency,
            fetch_timeout: Duration::from_secs(self.fetch_timeout),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "MOSAIC_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "MOSAIC_PORT")]
    pub port: u16,

    #[command(flatten)]
    pub storage: StorageConfig,

    /// Seconds between scheduler polls.
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_SECS, env = "MOSAIC_POLL_INTERVAL")]
    pub poll_interval: u64,

    /// Run the interval scheduler alongside the API.
    #[arg(long, default_value_t = true, env = "MOSAIC_SCHEDULER", action = clap::ArgAction::Set)]
    pub scheduler: bool,

    /// Allowed CORS origins (comma-separated). Any origin when not set.
    #[arg(long, env = "MOSAIC_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;
        if self.poll_interval == 0 {
            return Err("poll_interval must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }
}

#[derive(Args, Debug, Clone)]
pub struct RunConfig {
    #[command(flatten)]
    pub storage: StorageConfig,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================
