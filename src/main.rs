//! Sumi-Fetch main entry point
//!
//! This is the command-line interface for the Sumi-Fetch polite fetcher.

use anyhow::Context;
use clap::Parser;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use sumi_fetch::config::{load_config_with_hash, Config};
use sumi_fetch::crawler::{run_fetch, user_agent_string, FetchServices};
use sumi_fetch::output::{print_statistics, shared, StatusLineSink};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Sumi-Fetch: a polite URL fetcher
///
/// Sumi-Fetch fetches a list of URLs while respecting robots.txt, per-host
/// crawl delays and an optional crawl deadline, and writes one status line
/// per URL.
#[derive(Parser, Debug)]
#[command(name = "sumi-fetch")]
#[command(version = "1.0.0")]
#[command(about = "A polite URL fetcher", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// File with one URL per line
    #[arg(value_name = "URL_FILE")]
    urls: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and URL file without fetching anything
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, _config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let urls = read_urls(&cli.urls)?;

    if cli.dry_run {
        handle_dry_run(&config, &urls);
        Ok(())
    } else {
        handle_fetch(config, urls).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_fetch=info,warn"),
            1 => EnvFilter::new("sumi_fetch=debug,info"),
            2 => EnvFilter::new("sumi_fetch=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Reads the URL list, skipping blank lines and `#` comments
fn read_urls(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read URL file {}", path.display()))?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Handles the --dry-run mode: shows the effective settings
fn handle_dry_run(config: &Config, urls: &[String]) {
    println!("=== Sumi-Fetch Dry Run ===\n");

    let fetcher = &config.fetcher;
    println!("Fetcher Configuration:");
    println!("  Max threads: {}", fetcher.max_threads);
    println!("  Max URLs per batch: {}", fetcher.max_urls_per_batch);
    println!("  Default crawl delay: {}ms", fetcher.default_crawl_delay);
    println!("  Fetch interval: {}ms", fetcher.fetch_interval);
    match fetcher.crawl_end_time {
        Some(end) => println!("  Crawl end time: {}", end.to_rfc3339()),
        None => println!("  Crawl end time: none"),
    }
    match fetcher.min_response_rate {
        Some(rate) => println!("  Min response rate: {} bytes/s", rate),
        None => println!("  Min response rate: none"),
    }
    println!("  Max content size: {} bytes", fetcher.max_content_size);
    println!("  Max redirects: {}", fetcher.max_redirects);
    match &fetcher.valid_mime_types {
        Some(types) => println!("  Valid MIME types: {}", types.join(", ")),
        None => println!("  Valid MIME types: any"),
    }
    println!("  Accept-Language: {}", fetcher.accept_language);
    println!("  Request timeout: {}ms", fetcher.request_timeout);
    println!(
        "  Grouping: {}",
        if fetcher.use_pld { "paid-level domain" } else { "IP address" }
    );

    println!("\nUser Agent:");
    println!("  {}", user_agent_string(&config.user_agent));

    println!("\nOutput:");
    println!(
        "  Status lines: {}",
        config.output.status_path.as_deref().unwrap_or("stdout")
    );

    println!("\n✓ Configuration is valid");
    println!("✓ Would fetch {} URLs", urls.len());
}

/// Handles the main fetch operation
async fn handle_fetch(config: Config, urls: Vec<String>) -> anyhow::Result<()> {
    let writer: Box<dyn Write + Send> = match &config.output.status_path {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {}", path))?,
        )),
        None => Box::new(std::io::stdout()),
    };
    let services = FetchServices::from_config(&config, shared(StatusLineSink::new(writer)))?;
    let counters = services.counters.clone();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping after running batches");
            let _ = shutdown_tx.send(true);
        }
    });

    tracing::info!(
        "Fetching {} URLs with {} threads",
        urls.len(),
        config.fetcher.max_threads
    );

    match run_fetch(&config, urls, services, shutdown_rx).await {
        Ok(report) => {
            if report.aborted_batches > 0 || report.dropped_batches > 0 {
                tracing::warn!(
                    "Fetch stopped early ({} batches aborted, {} never started)",
                    report.aborted_batches,
                    report.dropped_batches
                );
            } else {
                tracing::info!("Fetch completed successfully");
            }
        }
        Err(e) => {
            tracing::error!("Fetch failed: {}", e);
            return Err(e.into());
        }
    }

    print_statistics(&counters.snapshot());
    Ok(())
}
