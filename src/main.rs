//! Replicator command-line entry point
//!
//! `replicate` mirrors a site into a directory; `verify` re-hashes a finished
//! replica against its manifest.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kodegen_tools_replicator::{
    CompressionPolicy, ImagePolicy, ReplicationOptions, Replicator, verify,
};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Exit code after SIGINT/SIGTERM
const INTERRUPTED: u8 = 130;

/// Memory-aware website replication
#[derive(Parser, Debug)]
#[command(name = "kodegen-replicator")]
#[command(version)]
#[command(about = "Mirror a website into a verifiable offline replica", long_about = None)]
struct Cli {
    /// Log at debug level (RUST_LOG still wins)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replicate a site starting at URL
    Replicate(ReplicateArgs),
    /// Check every manifest entry against the file on disk
    Verify {
        /// Directory holding manifest.json
        output_dir: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct ReplicateArgs {
    /// Entry URL
    url: String,

    /// Output directory
    #[arg(default_value = "./replicated-site")]
    output_dir: PathBuf,

    /// JSON options file; flags below override its values
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Maximum link depth from the entry URL
    #[arg(long)]
    depth: Option<u32>,

    /// Reuse the existing manifest and send conditional requests
    #[arg(long)]
    incremental: bool,

    /// Capture a full-page screenshot at every breakpoint
    #[arg(long)]
    responsive: bool,

    /// Raster image target format: avif, webp or none
    #[arg(long, value_name = "FORMAT")]
    images: Option<ImagePolicy>,

    /// Text asset compression: none or brotli
    #[arg(long, value_name = "MODE")]
    compression: Option<CompressionPolicy>,

    #[arg(long)]
    page_concurrency: Option<usize>,

    #[arg(long)]
    base_asset_concurrency: Option<usize>,

    #[arg(long)]
    domain_asset_concurrency: Option<usize>,

    /// Extra hostname assets may be fetched from (repeatable)
    #[arg(long = "allow", value_name = "HOST")]
    allow: Vec<String>,

    /// Ignore robots.txt; forces low concurrency and a 1 s request interval
    #[arg(long)]
    ignore_robots: bool,

    /// Largest asset to keep, in bytes
    #[arg(long, value_name = "BYTES")]
    max_size: Option<u64>,

    /// Per-asset request timeout in milliseconds
    #[arg(long, value_name = "MS")]
    req_timeout: Option<u64>,

    /// Permit fetches from loopback and private networks
    #[arg(long)]
    allow_private_network: bool,

    /// Show the browser window
    #[arg(long)]
    headful: bool,

    /// Leave automation fingerprints in place
    #[arg(long)]
    no_stealth: bool,
}

impl ReplicateArgs {
    fn options(&self) -> Result<ReplicationOptions> {
        let base = match &self.config {
            Some(path) => ReplicationOptions::from_json_file(path)?,
            None => ReplicationOptions::default(),
        };
        let mut builder = base.into_builder();

        if let Some(depth) = self.depth {
            builder = builder.max_crawl_depth(depth);
        }
        if self.incremental {
            builder = builder.incremental(true);
        }
        if self.responsive {
            builder = builder.responsive(true);
        }
        if let Some(policy) = self.images {
            builder = builder.image_policy(policy);
        }
        if let Some(compression) = self.compression {
            builder = builder.compression(compression);
        }
        if let Some(n) = self.page_concurrency {
            builder = builder.page_concurrency(n);
        }
        if let Some(n) = self.base_asset_concurrency {
            builder = builder.base_asset_concurrency(n);
        }
        if let Some(n) = self.domain_asset_concurrency {
            builder = builder.domain_asset_concurrency(n);
        }
        if !self.allow.is_empty() {
            builder = builder.allowed_domains(self.allow.iter().cloned());
        }
        if let Some(bytes) = self.max_size {
            builder = builder.max_asset_size(bytes);
        }
        if let Some(ms) = self.req_timeout {
            builder = builder.request_timeout_ms(ms);
        }
        if self.allow_private_network {
            builder = builder.allow_private_network(true);
        }
        if self.headful {
            builder = builder.headless(false);
        }
        if self.no_stealth {
            builder = builder.stealth(false);
        }
        // last, so it overrides any concurrency given above
        if self.ignore_robots {
            warn!("Ignoring robots.txt! Crawl responsibly.");
            builder = builder.ignore_robots();
        }

        Ok(builder.build()?)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let outcome = match cli.command {
        Command::Replicate(args) => run_replicate(args).await,
        Command::Verify { output_dir } => run_verify(&output_dir).await,
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

async fn run_replicate(args: ReplicateArgs) -> Result<ExitCode> {
    let options = args.options()?;
    let replicator = Replicator::new(options);

    tokio::select! {
        result = replicator.replicate(&args.url, &args.output_dir) => {
            let stats = result.context("Replication failed")?;
            info!(
                "Done: {} pages ({} failed), {} assets, {} skipped, {} failed, {:.1}% success, \
                 {:.0} ms average asset latency",
                stats.crawled_pages,
                stats.failed_pages,
                stats.total_assets,
                stats.skipped_assets,
                stats.failed_assets,
                stats.success_rate(),
                stats.average_latency_ms()
            );
            Ok(ExitCode::SUCCESS)
        }
        () = shutdown_signal() => {
            warn!("Interrupted, shutting down");
            replicator.shutdown().await;
            Ok(ExitCode::from(INTERRUPTED))
        }
    }
}

async fn run_verify(output_dir: &Path) -> Result<ExitCode> {
    let report = verify(output_dir)
        .await
        .with_context(|| format!("Failed to verify {}", output_dir.display()))?;

    for entry in &report.problems {
        println!("INVALID {}: {}", entry.local_path, entry.problem);
    }
    println!(
        "{} valid, {} invalid ({})",
        report.valid,
        report.invalid,
        if report.is_ok() { "OK" } else { "FAILED" }
    );

    Ok(if report.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
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
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
