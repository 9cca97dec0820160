//! slotgrid: operator command line for the slot-matrix reward engine.
//!
//! Opens the RocksDB ledger under the configured data directory and runs one
//! engine operation per invocation: batch intake, operator entries, VIP
//! overrides, recycling, inspection, and reward parameter edits.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use slotgrid_core::constants::reward_config_keys;
use slotgrid_core::traits::LedgerStore;
use slotgrid_core::types::{DepositEvent, UserId};
use slotgrid_engine::Engine;
use slotgrid_node::{LogFormat, NodeConfig, RocksLedger};
use tracing::info;

/// SlotGrid placement and reward engine.
#[derive(Parser, Debug)]
#[command(name = "slotgrid", version, about = "Slot-matrix placement and tiered reward distribution")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory, overriding the configuration
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log level, overriding the configuration
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format ("text" or "json"), overriding the configuration
    #[arg(long, global = true)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register a user under an optional referrer.
    Register(RegisterArgs),
    /// Apply a batch of deposit events read from a JSON file.
    Ingest(IngestArgs),
    /// Operator entry of a manual deposit.
    Insert(InsertArgs),
    /// Force a user's VIP tier.
    Vip(VipArgs),
    /// Compact gaps left by stopped slots.
    Compact,
    /// Show a user's slots.
    Slot(UserArgs),
    /// Show a user's balance and area totals.
    Balance(UserArgs),
    /// Read or change reward parameters.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print reward parameters, all of them when no key is given.
    Get { keys: Vec<String> },
    /// Set one reward parameter.
    Set { key: String, value: i64 },
}

#[derive(Args, Debug)]
struct RegisterArgs {
    #[arg(long)]
    user: UserId,
    #[arg(long)]
    referrer: Option<UserId>,
}

#[derive(Args, Debug)]
struct IngestArgs {
    /// JSON array of deposit events, `-` for stdin.
    #[arg(long)]
    events: PathBuf,
}

#[derive(Args, Debug)]
struct InsertArgs {
    #[arg(long)]
    user: UserId,
    /// Operator amount (50, 100 or 300).
    #[arg(long)]
    amount: u64,
    /// Unique reference for this entry.
    #[arg(long)]
    reference: String,
}

#[derive(Args, Debug)]
struct VipArgs {
    #[arg(long)]
    user: UserId,
    #[arg(long)]
    tier: u8,
}

#[derive(Args, Debug)]
struct UserArgs {
    #[arg(long)]
    user: UserId,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = NodeConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    match cli.log_format.as_deref() {
        None => {}
        Some("text") => config.log_format = LogFormat::Text,
        Some("json") => config.log_format = LogFormat::Json,
        Some(other) => bail!("unknown log format: {other}"),
    }

    init_logging(&config.log_level, config.log_format);

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create data_dir {}", config.data_dir.display()))?;
    let store = Arc::new(RocksLedger::open(config.db_path()).context("failed to open ledger")?);
    info!(data_dir = %config.data_dir.display(), "ledger opened");

    let engine = Engine::with_system_clock(store.clone(), config.engine.clone());

    match cli.command {
        Commands::Register(args) => {
            engine.register(args.user, args.referrer)?;
            println!("registered user {}", args.user);
        }
        Commands::Ingest(args) => {
            let events = read_events(&args.events)?;
            let report = engine.process_batch(&events)?;
            println!("{report:#?}");
        }
        Commands::Insert(args) => {
            let applied = engine.insert_manual(args.user, args.amount, &args.reference)?;
            println!(
                "slot {} at {} (carried {}, residual {})",
                applied.slot.id, applied.slot.coord, applied.carried, applied.distribution.residual
            );
        }
        Commands::Vip(args) => {
            let info = engine.force_tier(args.user, args.tier)?;
            println!("user {} vip {} (referrals {})", info.user, info.vip, info.history_referrals);
        }
        Commands::Compact => {
            let report = engine.compact()?;
            println!("{report:#?}");
        }
        Commands::Slot(args) => {
            let slots = store.user_slots(args.user)?;
            println!("{}", serde_json::to_string_pretty(&slots)?);
        }
        Commands::Balance(args) => {
            let balance = store.balance(args.user)?.unwrap_or_default();
            let area = store.area(args.user)?.unwrap_or_default();
            let out = serde_json::json!({ "balance": balance, "area": area });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Config { action } => match action {
            ConfigAction::Get { keys } => {
                let keys: Vec<&str> = if keys.is_empty() {
                    reward_config_keys()
                } else {
                    keys.iter().map(String::as_str).collect()
                };
                let values = store.config_values(&keys)?;
                for key in keys {
                    match values.get(key) {
                        Some(v) => println!("{key} = {v}"),
                        None => println!("{key} = (unset)"),
                    }
                }
            }
            ConfigAction::Set { key, value } => {
                if !reward_config_keys().contains(&key.as_str()) {
                    bail!("unknown reward parameter: {key}");
                }
                store.set_config_value(&key, value)?;
                info!(%key, value, "reward parameter updated");
            }
        },
    }

    store.flush()?;
    Ok(())
}

fn read_events(path: &Path) -> Result<Vec<DepositEvent>> {
    let raw = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).context("failed to read stdin")?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?
    };
    serde_json::from_str(&raw).context("invalid deposit events")
}

/// Initialize the tracing subscriber.
fn init_logging(level_str: &str, format: LogFormat) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true).with_writer(std::io::stderr))
            .init(),
    }
}
