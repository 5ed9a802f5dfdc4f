//! Build-time companion for swkit workers.
//!
//! Provides commands for:
//! - Stamping a fresh build identity and publishing `version.json`
//! - Showing the cache generation a worker config maps to
//! - Checking a deployed origin for version skew
//!
//! ## Usage
//!
//! ```bash
//! # Stamp a build and write dist/version.json plus the worker config
//! version-stamp stamp 1.4.0 --out-dir dist --config dist/worker.json
//!
//! # Print the generation name for a config
//! version-stamp show dist/worker.json
//!
//! # Compare a deployment with a config
//! version-stamp check dist/worker.json
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use swkit_common::{init_logging, LogConfig, LogFormat};
use swkit_net::{HttpFetcher, LoaderConfig};
use swkit_worker::{BuildIdentity, VersionDescriptor, VersionOracle, VersionStatus, WorkerConfig};
use tracing::info;

#[derive(Parser)]
#[command(name = "version-stamp")]
#[command(about = "Stamps build identities and publishes version.json for swkit workers")]
struct Cli {
    /// Log output format (pretty, compact, json)
    #[arg(long, global = true, default_value = "compact")]
    log_format: LogFormat,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stamp a new build identity and write version.json
    Stamp {
        /// Application version, e.g. 1.4.0
        app_version: String,
        /// Directory version.json is written to
        #[arg(short, long, default_value = "public")]
        out_dir: PathBuf,
        /// Worker config to update with the new identity (created if missing)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the cache generation of a worker config
    Show {
        /// Worker config path
        config: PathBuf,
    },

    /// Compare the published version.json with a worker config
    Check {
        /// Worker config path
        config: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let logging = if cli.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default()
    };
    init_logging(logging.with_format(cli.log_format));

    match cli.command {
        Commands::Stamp {
            app_version,
            out_dir,
            config,
        } => {
            let identity = stamp(&app_version, &out_dir, config.as_deref(), Utc::now())?;
            println!("Build date:     {}", identity.build_date);
            println!("Version:        {}", identity.manual_version);
        }

        Commands::Show { config } => {
            let config = WorkerConfig::load(&config)?;
            println!("Origin:         {}", config.origin);
            println!("Version:        {}", config.build.manual_version);
            println!("Cache:          {}", config.generation_name());
        }

        Commands::Check { config } => {
            let config = WorkerConfig::load(&config)?;
            let runtime = tokio::runtime::Runtime::new()?;
            match runtime.block_on(check(&config))? {
                VersionStatus::Current => println!("Up to date: {}", config.build.manual_version),
                VersionStatus::Outdated(remote) => {
                    println!(
                        "Outdated: running {}, published {}",
                        config.build.manual_version, remote.version
                    );
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

/// Stamp an identity, write `version.json` into `out_dir` and record the
/// identity in `config` when given.
fn stamp(
    app_version: &str,
    out_dir: &Path,
    config: Option<&Path>,
    now: DateTime<Utc>,
) -> anyhow::Result<BuildIdentity> {
    let identity = BuildIdentity::stamp(app_version, now);
    let descriptor = VersionDescriptor::for_build(&identity, app_version, now);

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;
    let descriptor_path = out_dir.join("version.json");
    write_json(&descriptor_path, &serde_json::to_value(&descriptor)?)?;
    info!(path = %descriptor_path.display(), version = %identity.manual_version, "Wrote version descriptor");

    if let Some(path) = config {
        let mut worker = if path.exists() {
            WorkerConfig::load(path)?
        } else {
            WorkerConfig::default()
        };
        worker.build = identity.clone();
        write_json(path, &serde_json::to_value(&worker)?)?;
        info!(path = %path.display(), cache = %worker.generation_name(), "Updated worker config");
    }

    Ok(identity)
}

fn write_json(path: &Path, value: &serde_json::Value) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))
}

async fn check(config: &WorkerConfig) -> anyhow::Result<VersionStatus> {
    let origin = config.origin_url()?;
    let endpoint = origin.join(&config.version_endpoint)?;
    let fetcher = Arc::new(HttpFetcher::new(LoaderConfig::new(origin))?);
    let oracle = VersionOracle::new(fetcher, endpoint, config.build.manual_version.clone());
    Ok(oracle.check().await?)
}
