//! Feedpace main entry point
//!
//! This is the command-line interface for the Feedpace collectors and workers.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use feedpace::config::{load_config_with_hash, Config};
use feedpace::output::{self, load_statistics, print_statistics, stats::DEFAULT_RECENT_ACTIONS};
use feedpace::storage::SqliteStorage;
use feedpace::{AutomationSet, ItemStatus, StartOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Environment variable consulted when the config has no access token
const TOKEN_ENV: &str = "FEEDPACE_ACCESS_TOKEN";

/// How often `run` checks whether every worker stopped on its own
const WATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Feedpace: a rate-limited worker and pagination engine
///
/// Feedpace collects items from paginated platform feeds into persistent
/// queues and drains each queue with a paced background worker.
#[derive(Parser, Debug)]
#[command(name = "feedpace")]
#[command(version)]
#[command(about = "A rate-limited worker and pagination engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, value_name = "CONFIG", default_value = "feedpace.toml")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the config and show what is configured
    Validate,

    /// Collect one feed into its queue
    Collect {
        /// Feed source name
        source: String,

        /// Page budget for this run (defaults to the feed's max-pages)
        #[arg(long)]
        max_pages: Option<u32>,

        /// Start from offset 0 instead of the stored cursor
        #[arg(long)]
        from_start: bool,
    },

    /// Run workers until Ctrl-C or until they all stop
    Run {
        /// Queues to run (all configured queues when omitted)
        #[arg(long = "queue")]
        queues: Vec<String>,

        /// Use this template instead of a random one
        #[arg(long)]
        template: Option<String>,
    },

    /// Show queue statistics and recent actions
    Status {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,

        /// Number of recent actions to show
        #[arg(long, default_value_t = DEFAULT_RECENT_ACTIONS)]
        recent: u32,
    },

    /// List items of a queue
    List {
        queue: String,

        /// Only items with this status (pending, done, failed)
        #[arg(long, value_parser = parse_status, default_value = "pending")]
        status: ItemStatus,

        /// List every status
        #[arg(long, conflicts_with = "status")]
        all: bool,

        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// Return failed items of a queue to pending
    ResetFailed { queue: String },

    /// Delete items from a queue
    Clear {
        queue: String,

        /// Only delete items with this status
        #[arg(long, value_parser = parse_status)]
        status: Option<ItemStatus>,
    },

    /// Delete specific items from a queue
    Remove {
        queue: String,

        #[arg(required = true)]
        keys: Vec<String>,
    },
}

fn parse_status(value: &str) -> Result<ItemStatus, String> {
    ItemStatus::from_db_string(value).ok_or_else(|| {
        let known: Vec<_> = ItemStatus::all_states()
            .iter()
            .map(|s| s.to_db_string())
            .collect();
        format!("unknown status '{}' (expected one of: {})", value, known.join(", "))
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    match cli.command {
        Command::Validate => handle_validate(&config),
        Command::Status { json, recent } => handle_status(&config, json, recent),
        Command::Collect {
            source,
            max_pages,
            from_start,
        } => handle_collect(&config, &source, max_pages, from_start).await,
        Command::Run { queues, template } => handle_run(&config, &queues, template).await,
        Command::List {
            queue,
            status,
            all,
            limit,
        } => {
            let set = automations(&config, false)?;
            let automation = set.get(&queue)?;
            let items = automation.list_queue((!all).then_some(status), limit)?;
            output::print_items(&queue, &items);
            Ok(())
        }
        Command::ResetFailed { queue } => {
            let set = automations(&config, false)?;
            let reset = set.get(&queue)?.reset_failed()?;
            println!("Reset {} failed item(s) in '{}' to pending", reset, queue);
            Ok(())
        }
        Command::Clear { queue, status } => {
            let set = automations(&config, false)?;
            let removed = set.get(&queue)?.clear_queue(status)?;
            println!("Removed {} item(s) from '{}'", removed, queue);
            Ok(())
        }
        Command::Remove { queue, keys } => {
            let set = automations(&config, false)?;
            let removed = set.get(&queue)?.remove(&keys)?;
            println!("Removed {} of {} item(s) from '{}'", removed, keys.len(), queue);
            Ok(())
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("feedpace=info,warn"),
            1 => EnvFilter::new("feedpace=debug,info"),
            2 => EnvFilter::new("feedpace=trace,debug"),
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

/// Resolves the access token from the config or the environment
fn access_token(config: &Config) -> Option<String> {
    config
        .api
        .access_token
        .clone()
        .filter(|t| !t.is_empty())
        .or_else(|| std::env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty()))
}

/// Builds the automations; remote commands require a token
fn automations(config: &Config, needs_token: bool) -> anyhow::Result<AutomationSet> {
    let token = match access_token(config) {
        Some(token) => token,
        None if needs_token => bail!(
            "No access token: set api.access-token in the config or {}",
            TOKEN_ENV
        ),
        None => String::new(),
    };
    Ok(AutomationSet::from_config(config, &token)?)
}

/// Handles `validate`: shows the validated configuration
fn handle_validate(config: &Config) -> anyhow::Result<()> {
    println!("=== Feedpace Configuration ===\n");

    println!("API:");
    println!("  Base URL: {}", config.api.base_url);
    println!("  User agent: {}", config.api.user_agent);
    println!(
        "  Access token: {}",
        if access_token(config).is_some() {
            "set"
        } else {
            "missing"
        }
    );

    println!("\nPacing:");
    println!("  Default delay: {}ms", config.rate_limit.default_delay_ms);
    println!(
        "  Retry-After cap: {}ms",
        config.rate_limit.max_retry_after_ms
    );
    println!(
        "  Shared between categories: {}",
        config.rate_limit.shared_pacing
    );

    println!("\nWorkers:");
    println!("  Max attempts: {}", config.worker.max_attempts);
    println!(
        "  Max consecutive failures: {}",
        config.worker.max_consecutive_failures
    );

    println!("\nActions ({}):", config.actions.len());
    for action in &config.actions {
        println!(
            "  - {} ({}) -> {} [{} template(s)]",
            action.queue,
            action.kind.as_str(),
            action.path,
            config.templates_for(&action.queue).count()
        );
    }

    println!("\nFeeds ({}):", config.feeds.len());
    for feed in &config.feeds {
        let pages = feed
            .max_pages
            .map(|p| p.to_string())
            .unwrap_or_else(|| "unlimited".to_string());
        println!(
            "  - {} -> {} ({} per page, {} pages)",
            feed.source, feed.queue, feed.page_limit, pages
        );
    }

    println!("\nDatabase: {}", config.storage.database_path);
    println!("\n✓ Configuration is valid");
    Ok(())
}

/// Handles `status`: shows statistics from the database
fn handle_status(config: &Config, json: bool, recent: u32) -> anyhow::Result<()> {
    let storage = SqliteStorage::new(Path::new(&config.storage.database_path))?;
    let stats = load_statistics(&storage, recent)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("Database: {}\n", config.storage.database_path);
        print_statistics(&stats);
    }
    Ok(())
}

/// Handles `collect`: runs one feed to completion
async fn handle_collect(
    config: &Config,
    source: &str,
    max_pages: Option<u32>,
    from_start: bool,
) -> anyhow::Result<()> {
    let set = automations(config, true)?;
    let automation = set.for_source(source)?;

    if from_start {
        automation.reset_cursor(source)?;
        tracing::info!("Cursor for '{}' reset to offset 0", source);
    }

    match automation.collect(source, max_pages).await {
        Ok(report) => {
            output::print_collect_report(&report);
            Ok(())
        }
        Err(feedpace::FeedpaceError::Collect { report, cause, .. }) => {
            output::print_collect_report(&report);
            Err(anyhow::Error::new(*cause).context(format!("Collection of '{}' aborted", source)))
        }
        Err(e) => Err(e.into()),
    }
}

/// Handles `run`: starts workers and waits for Ctrl-C
async fn handle_run(
    config: &Config,
    queues: &[String],
    template: Option<String>,
) -> anyhow::Result<()> {
    let set = automations(config, true)?;
    let options = StartOptions { template };

    let started = set.start_all(queues, &options)?;
    if started.is_empty() {
        bail!("No actions configured");
    }
    tracing::info!("{} worker(s) running, press Ctrl-C to stop", started.len());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut watch = tokio::time::interval(WATCH_INTERVAL);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.context("Failed to listen for Ctrl-C")?;
                tracing::info!("Interrupt received, stopping workers");
                break;
            }
            _ = watch.tick() => {
                if set.all_stopped() {
                    tracing::warn!("Every worker has stopped");
                    break;
                }
            }
        }
    }

    let statuses = set.shutdown_all().await;
    output::print_status(&statuses);
    Ok(())
}
