use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::Instant;

use feedrelay::config::{Config, WEBHOOK_ENV_VAR};
use feedrelay::engine::{EngineSettings, Orchestrator, RunMode, RunReport};
use feedrelay::feed::HttpFeedSource;
use feedrelay::manage::{FeedProbe, Manager, StatusChange};
use feedrelay::notify::{DryRunNotifier, Notifier, WebhookNotifier};
use feedrelay::storage::{Database, DedupStrategy, StateError, Subscription};
use feedrelay::util::{pad_to_width, truncate_to_width};

/// Get the config directory path (~/.config/feedrelay/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedrelay"))
}

#[derive(Parser, Debug)]
#[command(
    name = "feedrelay",
    version,
    about = "Watches RSS/Atom feeds and relays new entries to a chat webhook"
)]
struct Args {
    /// Config file (default: ~/.config/feedrelay/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file, overriding the config
    #[arg(long, global = true, value_name = "FILE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check feeds once and post new entries
    Run {
        /// Only check the feed that has waited longest
        #[arg(long)]
        light: bool,
        /// Log what would be posted instead of posting
        #[arg(long)]
        dry_run: bool,
    },
    /// Run continuously, checking all feeds every interval until Ctrl-C
    Watch {
        /// Minutes between runs, overriding the config
        #[arg(long, value_name = "MINUTES")]
        interval: Option<u64>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Subscribe to a feed
    Add {
        url: String,
        /// Name shown in posts instead of the feed's title
        #[arg(long)]
        name: Option<String>,
        /// How new entries are recognized (default from config)
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,
    },
    /// Unsubscribe from a feed
    Remove { id: i64 },
    /// Stop checking a feed without forgetting it
    Pause { id: i64 },
    /// Resume checking a paused feed
    Resume { id: i64 },
    /// List subscriptions
    List,
    /// Fetch a feed and report its shape without subscribing
    Test { url: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StrategyArg {
    Watermark,
    Identity,
}

impl From<StrategyArg> for DedupStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Watermark => DedupStrategy::Watermark,
            StrategyArg::Identity => DedupStrategy::Identity,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = match args.database.clone().or_else(|| config.database_path.clone()) {
        Some(path) => path,
        None => {
            ensure_private_dir(&config_dir)?;
            config_dir.join("feedrelay.db")
        }
    };
    let db = Arc::new(open_database(&db_path).await?);

    let source = Arc::new(
        HttpFeedSource::with_user_agent(&config.user_agent, config.fetch_timeout())
            .context("Failed to build HTTP client")?,
    );

    match args.command {
        Command::Run { light, dry_run } => {
            let orchestrator = build_orchestrator(&config, db, source, dry_run)?;
            let mode = if light { RunMode::Lightweight } else { RunMode::Full };
            let deadline = config.run_deadline().map(|d| Instant::now() + d);
            let report = orchestrator.run(mode, deadline).await?;
            print_report(&report);
        }
        Command::Watch { interval, dry_run } => {
            let every = match interval {
                Some(minutes) if minutes > 0 => {
                    std::time::Duration::from_secs(minutes.saturating_mul(60))
                }
                Some(_) => anyhow::bail!("--interval must be at least 1 minute"),
                None => config
                    .check_interval()
                    .context("check_interval_minutes is 0; set it or pass --interval")?,
            };
            let orchestrator = build_orchestrator(&config, db, source, dry_run)?;
            tracing::info!(interval_secs = every.as_secs(), "Watching feeds, Ctrl-C to stop");
            orchestrator
                .watch(every, config.run_deadline(), async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                        std::future::pending::<()>().await;
                    }
                })
                .await;
        }
        command => {
            let manager = Manager::new(
                db,
                source,
                config.default_dedup_strategy,
                config.allow_private_hosts,
            );
            if let Err(e) = manage(&manager, command).await {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

async fn open_database(path: &Path) -> Result<Database> {
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    match Database::open(path_str).await {
        Ok(db) => Ok(db),
        Err(StateError::InstanceLocked) => {
            eprintln!(
                "Error: The database at {} is locked by another feedrelay process.",
                path.display()
            );
            std::process::exit(1);
        }
        Err(e) => Err(anyhow::anyhow!("Failed to open database: {}", e)),
    }
}

/// Create the config directory with user-only permissions on Unix.
fn ensure_private_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).context("Failed to create config directory")?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)) {
            tracing::warn!(
                path = %dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }
    Ok(())
}

fn build_orchestrator(
    config: &Config,
    db: Arc<Database>,
    source: Arc<HttpFeedSource>,
    dry_run: bool,
) -> Result<Orchestrator> {
    let (notifier, settings): (Arc<dyn Notifier>, EngineSettings) = if dry_run {
        (Arc::new(DryRunNotifier), EngineSettings::dry_run())
    } else {
        let webhook = config.webhook().with_context(|| {
            format!("No webhook configured: set webhook_url in the config or {WEBHOOK_ENV_VAR}")
        })?;
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .build()
            .context("Failed to build HTTP client")?;
        let notifier = WebhookNotifier::new(
            client,
            webhook,
            config.alert_webhook(),
            config.fetch_timeout(),
        );
        (Arc::new(notifier), EngineSettings::from(config))
    };

    Ok(Orchestrator::new(db, source, notifier, settings))
}

fn print_report(report: &RunReport) {
    let stats = &report.stats;
    println!(
        "Checked {} feed(s): {} entr{} posted, {} error(s){}",
        stats.feeds_processed,
        stats.entries_delivered,
        if stats.entries_delivered == 1 { "y" } else { "ies" },
        stats.errors(),
        if report.timed_out {
            " (stopped at deadline)"
        } else {
            ""
        }
    );
}

async fn manage(manager: &Manager, command: Command) -> Result<(), feedrelay::manage::ManageError> {
    match command {
        Command::Add {
            url,
            name,
            strategy,
        } => {
            let sub = manager
                .add(&url, name.as_deref(), strategy.map(Into::into))
                .await?;
            println!(
                "Added #{}: {} ({}, {} dedup)",
                sub.id,
                sub.name(),
                sub.source_url,
                sub.dedup_strategy
            );
        }
        Command::Remove { id } => {
            let sub = manager.remove(id).await?;
            println!("Removed #{}: {}", sub.id, sub.name());
        }
        Command::Pause { id } => match manager.pause(id).await? {
            StatusChange::Changed(sub) => println!("Paused #{}: {}", sub.id, sub.name()),
            StatusChange::Unchanged(sub) => {
                println!("#{} ({}) is already paused", sub.id, sub.name())
            }
        },
        Command::Resume { id } => match manager.resume(id).await? {
            StatusChange::Changed(sub) => println!("Resumed #{}: {}", sub.id, sub.name()),
            StatusChange::Unchanged(sub) => {
                println!("#{} ({}) is already active", sub.id, sub.name())
            }
        },
        Command::List => print_subscriptions(&manager.list().await?),
        Command::Test { url } => print_probe(&manager.test(&url).await?),
        Command::Run { .. } | Command::Watch { .. } => {}
    }
    Ok(())
}

const NAME_COLUMN_WIDTH: usize = 40;

fn print_subscriptions(subs: &[Subscription]) {
    if subs.is_empty() {
        println!("No subscriptions. Add one with: feedrelay add <URL>");
        return;
    }

    println!(
        "{:>4}  {:<7}  {:<9}  {:<16}  {}",
        "ID", "STATUS", "STRATEGY", "LAST CHECK", "NAME"
    );
    for sub in subs {
        let last_check = sub
            .last_checked_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        let name = truncate_to_width(sub.name(), NAME_COLUMN_WIDTH);
        println!(
            "{:>4}  {:<7}  {:<9}  {:<16}  {}  {}",
            sub.id,
            sub.status.as_str(),
            sub.dedup_strategy.as_str(),
            last_check,
            pad_to_width(&name, NAME_COLUMN_WIDTH),
            sub.source_url
        );
    }
}

fn print_probe(probe: &FeedProbe) {
    println!("Feed OK: {}", probe.url);
    println!("  Title:   {}", probe.title.as_deref().unwrap_or("(none)"));
    println!("  Entries: {} ({} dated)", probe.entries, probe.dated);
    if let Some(newest) = probe.newest {
        println!("  Newest:  {}", newest.to_rfc3339());
    }
    for title in &probe.sample {
        println!("    - {title}");
    }
    for warning in probe.warnings() {
        println!("  Warning: {warning}");
    }
}
