//! `tidemarkd`: operator tooling for the tidemark repair scheduler.
//!
//! # Usage
//!
//! ```text
//! tidemarkd check -c tidemark.toml                    # validate config, print policies
//! tidemarkd plan ks.tbl --topology ring.toml          # due repair groups for a table
//! tidemarkd history ks.tbl --since-days 7             # stored repair facts
//! tidemarkd locks                                     # lock records and their leases
//! ```

mod config;
mod topology;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tidemark_lock::LockKey;
use tidemark_meta::{LockStore, MetaStore, RepairHistory};
use tidemark_repair::{VnodeStateTracker, escalate};
use tidemark_types::{
    Clock, HistoryProvider, RepairConfigurationProvider, RepairStatus, SystemClock,
    TableReference,
};
use tracing::{debug, error, warn};

use config::CliConfig;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "tidemarkd",
    version,
    about = "tidemark anti-entropy repair scheduler"
)]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true, env = "TIDEMARK_CONFIG")]
    config: Option<PathBuf>,

    /// Override the data directory.
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and print the effective policies.
    Check,

    /// Print the repair groups currently due for a table.
    Plan {
        /// Table as `keyspace.table`.
        table: String,

        /// TOML file describing token ownership.
        #[arg(short, long)]
        topology: PathBuf,
    },

    /// List stored repair history for a table.
    History {
        /// Table as `keyspace.table`.
        table: String,

        /// Only entries newer than this many days.
        #[arg(long, default_value = "30")]
        since_days: u64,
    },

    /// List lock records.
    Locks {
        /// Include expired records.
        #[arg(short, long)]
        all: bool,
    },
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    setup_tracing(&config.log.level);

    if let Some(dir) = cli.data_dir {
        config.node.data_dir = dir;
    }

    match cli.command {
        Commands::Check => cmd_check(&config),
        Commands::Plan { table, topology } => cmd_plan(&config, &table, &topology).await,
        Commands::History { table, since_days } => cmd_history(&config, &table, since_days).await,
        Commands::Locks { all } => cmd_locks(&config, all).await,
    }
}

/// Initialize the `tracing` subscriber with the given level filter.
///
/// Respects `RUST_LOG` env var if set, otherwise uses the config value.
fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn open_store(path: &Path) -> Result<MetaStore> {
    MetaStore::open(path).map_err(|e| {
        error!(path = %path.display(), %e, "failed to open metadata store");
        anyhow::anyhow!("cannot open metadata at {}: {e}", path.display())
    })
}

fn open_history(config: &CliConfig) -> Result<MetaStore> {
    if config.history_provider()? == HistoryProvider::Native {
        warn!("native history provider reads through the tidemark history keyspace");
    }
    open_store(&config.history_path())
}

/// `3d 4h`, `12m`, `now`.
fn format_age(ms: i64) -> String {
    if ms <= 0 {
        return "now".to_string();
    }
    let secs = ms / 1000;
    let (days, hours, mins) = (secs / 86_400, (secs % 86_400) / 3600, (secs % 3600) / 60);
    match (days, hours, mins) {
        (0, 0, 0) => format!("{secs}s"),
        (0, 0, m) => format!("{m}m"),
        (0, h, m) => format!("{h}h {m}m"),
        (d, h, _) => format!("{d}d {h}h"),
    }
}

// -----------------------------------------------------------------------
// tidemarkd check
// -----------------------------------------------------------------------

fn cmd_check(config: &CliConfig) -> Result<()> {
    let default = config.default_policy().context("invalid [repair] policy")?;
    let tables = config.table_policies().context("invalid [tables] policy")?;
    let scheduler = config.scheduler_config()?;
    let provider = config.history_provider()?;

    println!("Configuration OK");
    println!("  instance:   {}", config.instance_id());
    println!("  data_dir:   {}", config.node.data_dir.display());
    println!(
        "  history:    {provider:?} ({})",
        config.history_path().display()
    );
    println!("  locks:      {}", config.lock_path().display());
    println!(
        "  scheduler:  every {}s, {} tables at once, lease {}s, lookback {}",
        scheduler.frequency.as_secs(),
        scheduler.max_concurrent_tables,
        scheduler.lease.as_secs(),
        format_age(scheduler.history_lookback.as_millis() as i64),
    );
    println!();
    println!("Default policy:");
    print_policy(&default);

    for (table, policy) in &tables {
        println!();
        match policy {
            Some(policy) => {
                println!("{table}:");
                print_policy(policy);
            }
            None => println!("{table}: disabled"),
        }
    }
    Ok(())
}

fn print_policy(policy: &tidemark_types::RepairConfiguration) {
    println!(
        "  interval {} / warning {} / error {}",
        format_age(policy.repair_interval_ms()),
        format_age(policy.warning_time_ms()),
        format_age(policy.error_time_ms()),
    );
    println!(
        "  parallelism {} / lock {} / unwind {} / target {}",
        policy.parallelism(),
        policy.lock_type(),
        policy.unwind_ratio(),
        policy.target_repair_size(),
    );
}

// -----------------------------------------------------------------------
// tidemarkd plan
// -----------------------------------------------------------------------

async fn cmd_plan(config: &CliConfig, table: &str, topology_path: &Path) -> Result<()> {
    let table: TableReference = table.parse()?;
    let policy = config
        .policies()?
        .for_table(&table)
        .with_context(|| format!("table {table} is not configured for repair"))?;
    let ownership = topology::load(topology_path)?;
    let lookback = config.scheduler_config()?.history_lookback;

    let store = open_history(config)?;
    let now = SystemClock::new().now_millis();
    let entries = store
        .entries_since(&table, now.saturating_sub(lookback.as_millis() as i64))
        .await?;
    debug!(%table, entries = entries.len(), "history loaded");

    let tracker = VnodeStateTracker::new();
    tracker.apply_history(&table, &entries);
    tracker.sync_topology(&table, &ownership);
    let snapshot = tracker.snapshot(&table, &policy, now);

    let status = escalate(
        RepairStatus::InQueue,
        snapshot.last_completed_at_ms(),
        now,
        &policy,
    );
    println!(
        "{table}: {} vnodes, {:.0}% repaired within interval, status {status}",
        snapshot.vnode_states().len(),
        snapshot.repaired_fraction() * 100.0,
    );

    let groups = snapshot.replica_repair_groups();
    if groups.is_empty() {
        println!("Nothing due.");
        return Ok(());
    }

    for (i, group) in groups.iter().enumerate() {
        let keys = LockKey::for_group(policy.lock_type(), group.replica_sets());
        let keys: Vec<&str> = keys.iter().map(LockKey::as_str).collect();
        println!(
            "group {i}: {} vnodes on {} (locks: {})",
            group.len(),
            group.replicas(),
            keys.join(", "),
        );
        for vnode in group.vnodes() {
            let age = match vnode.last_repaired_at_ms() {
                0 => "never repaired".to_string(),
                at => format!("repaired {} ago", format_age(now - at)),
            };
            println!("  {} {age}", vnode.range());
        }
    }
    Ok(())
}

// -----------------------------------------------------------------------
// tidemarkd history
// -----------------------------------------------------------------------

async fn cmd_history(config: &CliConfig, table: &str, since_days: u64) -> Result<()> {
    let table: TableReference = table.parse()?;
    let store = open_history(config)?;
    let now = SystemClock::new().now_millis();
    let since = now.saturating_sub(Duration::from_secs(since_days * 86_400).as_millis() as i64);

    let entries = store.entries_since(&table, since).await?;
    println!("{table}: {} repairs in the last {since_days} days", entries.len());
    for entry in &entries {
        println!(
            "  {} on {} finished {} ago (took {}ms)",
            entry.range,
            entry.replicas,
            format_age(now - entry.repaired_at_ms),
            entry.repaired_at_ms - entry.started_at_ms,
        );
    }
    Ok(())
}

// -----------------------------------------------------------------------
// tidemarkd locks
// -----------------------------------------------------------------------

async fn cmd_locks(config: &CliConfig, all: bool) -> Result<()> {
    let store = open_store(&config.lock_path())?;
    let now = SystemClock::new().now_millis();

    let records = store.list().await?;
    let shown: Vec<_> = records
        .iter()
        .filter(|r| all || r.is_live(now))
        .collect();
    if shown.is_empty() {
        println!("No locks held.");
        return Ok(());
    }
    for record in shown {
        let lease = if record.is_live(now) {
            format!("expires in {}", format_age(record.expires_at_ms - now))
        } else {
            format!("expired {} ago", format_age(now - record.expires_at_ms))
        };
        println!("  {} held by {} ({lease})", record.key, record.holder);
    }
    Ok(())
}
