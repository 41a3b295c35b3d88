//! Policy-Trawl main entry point
//!
//! This is the command-line interface for the Policy-Trawl harvester.

use clap::Parser;
use policy_trawl::config::{load_config_with_hash, Config, SourceKind};
use policy_trawl::crawler::{run_crawl, RunOptions};
use policy_trawl::source::{PolicySource, PortalSource, ProvincialSource};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use tracing_subscriber::EnvFilter;

/// Policy-Trawl: a resilient policy-document harvester
///
/// Policy-Trawl crawls government policy portals, validates and
/// deduplicates the documents it finds, and stores them with their
/// attachments for later review.
#[derive(Parser, Debug)]
#[command(name = "policy-trawl")]
#[command(version = "1.0.0")]
#[command(about = "A resilient policy-document harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,

    /// Crawl only the source with this name
    #[arg(long, value_name = "NAME")]
    source: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Some(name) = &cli.source {
        if !config.sources.iter().any(|s| &s.name == name) {
            return Err(format!("Unknown source '{}'", name).into());
        }
    }

    if cli.dry_run {
        handle_dry_run(&config, cli.source.as_deref())?;
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_crawl(&config, &config_hash, cli.source).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("policy_trawl=info,warn"),
            1 => EnvFilter::new("policy_trawl=debug,info"),
            2 => EnvFilter::new("policy_trawl=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn print_classifications<S: PolicySource>(source: &S) {
    for classification in source.classifications() {
        println!("    * {} (code '{}')", classification.label, classification.code);
    }
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config, only: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Policy-Trawl Dry Run ===\n");

    println!("Requests:");
    println!("  Delay between pages: {}ms", config.request.delay_ms);
    println!("  Timeout: {}s", config.request.timeout_secs);
    println!("  Max retries: {}", config.request.max_retries);
    println!(
        "  Session rotation: every {} requests",
        config.request.session_rotate_interval
    );

    println!("\nPagination:");
    println!("  Page size: {}", config.pagination.page_size);
    println!("  Max pages: {}", config.pagination.max_pages);
    println!("  Max empty pages: {}", config.pagination.max_empty_pages);

    println!("\nProxy: {}", if config.proxy.enabled { "enabled" } else { "disabled" });

    println!("\nOutput:");
    println!("  Directory: {}", config.output.directory);
    println!("  Database: {}", config.output.database_path);
    println!(
        "  Attachments: {}",
        if config.output.download_attachments { "download" } else { "skip" }
    );

    let sources: Vec<_> = config
        .enabled_sources()
        .filter(|s| only.map_or(true, |name| name == s.name))
        .collect();
    println!("\nSources ({}):", sources.len());
    for source in &sources {
        println!("  - {} [{:?}] {}", source.name, source.kind, source.base_url);
        match source.kind {
            SourceKind::Portal => print_classifications(&PortalSource::new(source, config)?),
            SourceKind::Provincial => {
                print_classifications(&ProvincialSource::new(source, config)?)
            }
        }
    }

    println!("\n✓ Configuration is valid");

    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    use policy_trawl::output::{load_statistics, print_statistics};
    use policy_trawl::storage::open_store;

    println!("Database: {}\n", config.output.database_path);

    let store = open_store(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&store)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(
    config: &Config,
    config_hash: &str,
    only_source: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let options = RunOptions {
        only_source,
        ..Default::default()
    };

    let stop = options.stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing current page");
            stop.store(true, Ordering::SeqCst);
        }
    });

    match run_crawl(config, config_hash, &options).await {
        Ok(summary) => {
            for source in &summary.sources {
                tracing::info!(
                    "{}: {} policies, {} ({})",
                    source.source,
                    source.policies,
                    source.report,
                    source.status.to_db_string()
                );
            }
            Ok(())
        }
        Err(e) => {
            tracing::error!("Crawl failed: {}", e);
            Err(e.into())
        }
    }
}
