use crate::services::{
    enumerator::DEFAULT_EXTENSIONS,
    importer::{FailurePolicy, ImportOptions},
};
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, path::PathBuf, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub dirs: Vec<PathBuf>,
    pub dry_run: bool,
    pub bucket: String,
    pub region: String,
    pub store_dir: PathBuf,
    pub database_url: String,
    pub key_prefix: Option<String>,
    pub extensions: Vec<String>,
    pub concurrency: usize,
    pub file_timeout: Duration,
    pub fail_fast: bool,
    pub json: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(
    author,
    version,
    about = "Upload spreadsheet files to an object store, skipping unchanged ones"
)]
pub struct Args {
    /// Directories to import (default: SHEETSYNC_DEFAULT_DIR or ./Data)
    pub dirs: Vec<PathBuf>,

    /// Decide what would be uploaded without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Bucket name (overrides SHEETSYNC_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Bucket region (overrides SHEETSYNC_REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// Directory where object payloads are stored (overrides SHEETSYNC_STORE_DIR)
    #[arg(long)]
    pub store_dir: Option<PathBuf>,

    /// Metadata database URL (overrides SHEETSYNC_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Prefix prepended to every storage key
    #[arg(long)]
    pub prefix: Option<String>,

    /// File extension to import, without the dot; repeatable (default: xls, xlsx, xlsm)
    #[arg(long = "ext", value_name = "EXT")]
    pub extensions: Vec<String>,

    /// Files reconciled concurrently (overrides SHEETSYNC_CONCURRENCY)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Per-file time limit in seconds (overrides SHEETSYNC_TIMEOUT_SECS)
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Stop scheduling files after the first backend failure
    #[arg(long)]
    pub fail_fast: bool,

    /// Emit one JSON object per file instead of text lines
    #[arg(long)]
    pub json: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::from_sources(Args::parse(), |name| env::var(name))
    }

    /// Merge `args` over values from `lookup` over built-in defaults.
    pub fn from_sources<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let var = |name: &str, default: &str| -> Result<String> {
            match lookup(name) {
                Ok(value) => Ok(value),
                Err(env::VarError::NotPresent) => Ok(default.to_string()),
                Err(err) => Err(err).with_context(|| format!("reading {}", name)),
            }
        };
        let parsed = |name: &str, default: &str| -> Result<u64> {
            let value = var(name, default)?;
            value
                .parse::<u64>()
                .with_context(|| format!("parsing {} value `{}`", name, value))
        };

        // --- Environment fallback ---
        let env_bucket = var("SHEETSYNC_BUCKET", "laserchron-data")?;
        let env_region = var("SHEETSYNC_REGION", "local")?;
        let env_store = var("SHEETSYNC_STORE_DIR", "./data/objects")?;
        let env_db = var("SHEETSYNC_DATABASE_URL", "sqlite://./data/meta/sheetsync.db")?;
        let env_dir = var("SHEETSYNC_DEFAULT_DIR", "./Data")?;
        let env_concurrency = parsed("SHEETSYNC_CONCURRENCY", "4")?;
        let env_timeout = parsed("SHEETSYNC_TIMEOUT_SECS", "300")?;

        // --- Merge ---
        let dirs = if args.dirs.is_empty() {
            vec![PathBuf::from(env_dir)]
        } else {
            args.dirs
        };
        let concurrency = args.concurrency.unwrap_or(usize::try_from(env_concurrency)?);
        if concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        let timeout_secs = args.timeout_secs.unwrap_or(env_timeout);
        if timeout_secs == 0 {
            bail!("per-file timeout must be at least 1 second");
        }
        let extensions = if args.extensions.is_empty() {
            DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect()
        } else {
            args.extensions
                .into_iter()
                .map(|ext| ext.trim_start_matches('.').to_string())
                .collect()
        };

        Ok(Self {
            dirs,
            dry_run: args.dry_run,
            bucket: args.bucket.unwrap_or(env_bucket),
            region: args.region.unwrap_or(env_region),
            store_dir: args
                .store_dir
                .unwrap_or_else(|| PathBuf::from(env_store)),
            database_url: args.database_url.unwrap_or(env_db),
            key_prefix: args.prefix.filter(|p| !p.trim_matches('/').is_empty()),
            extensions,
            concurrency,
            file_timeout: Duration::from_secs(timeout_secs),
            fail_fast: args.fail_fast,
            json: args.json,
        })
    }

    pub fn import_options(&self) -> ImportOptions {
        ImportOptions {
            extensions: self.extensions.clone(),
            key_prefix: self.key_prefix.clone(),
            dry_run: self.dry_run,
            concurrency: self.concurrency,
            file_timeout: self.file_timeout,
            failure_policy: if self.fail_fast {
                FailurePolicy::Abort
            } else {
                FailurePolicy::Continue
            },
        }
    }
}
