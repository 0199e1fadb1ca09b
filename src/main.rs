use chrono::{DateTime, Duration, Utc};
use clap::{Args, Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use rust_decimal::Decimal;
use srvana::application::marketplace::Marketplace;
use srvana::application::stores::Stores;
use srvana::config::{
    DEFAULT_AUTO_RELEASE_HOURS, DEFAULT_CURRENCY, MarketplaceConfig, PAYMOB_API_BASE,
    PaymobConfig,
};
use srvana::domain::commission::CommissionPolicy;
use srvana::domain::ports::Clock;
use srvana::infrastructure::clock::{ManualClock, SystemClock};
use srvana::infrastructure::paymob::PaymobClient;
use srvana::interfaces::csv::ledger_writer::LedgerWriter;
use srvana::interfaces::csv::wallet_writer::WalletWriter;
use srvana::interfaces::jsonl::command_reader::CommandReader;
use srvana::interfaces::jsonl::runner::CommandRunner;
use srvana::telemetry;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(flatten)]
    settings: Settings,
}

#[derive(Subcommand)]
enum Commands {
    /// Replays a JSONL command file and prints the resulting wallets as CSV
    Run {
        /// Input commands, one JSON object per line
        input: PathBuf,
    },
    /// Releases escrow for every order past its auto-release date
    AutoRelease {
        /// Instant to sweep at (RFC 3339). Defaults to now.
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// Prints the ledger as CSV
    Ledger,
}

#[derive(Args)]
struct Settings {
    /// Platform commission taken on manual releases, in percent
    #[arg(long, global = true, env = "SRVANA_COMMISSION_PERCENT", default_value = "5.00")]
    commission: Decimal,

    /// Hours after acceptance or completion before funds auto-release
    #[arg(long, global = true, env = "SRVANA_AUTO_RELEASE_HOURS", default_value_t = DEFAULT_AUTO_RELEASE_HOURS)]
    auto_release_hours: i64,

    #[arg(long, global = true, env = "SRVANA_CURRENCY", default_value = DEFAULT_CURRENCY)]
    currency: String,

    #[arg(long, global = true, env = "PAYMOB_API_BASE", default_value = PAYMOB_API_BASE)]
    paymob_api_base: String,

    #[arg(long, global = true, env = "PAYMOB_API_KEY", hide_env_values = true)]
    paymob_api_key: Option<String>,

    #[arg(long, global = true, env = "PAYMOB_INTEGRATION_ID")]
    paymob_integration_id: Option<String>,

    #[arg(long, global = true, env = "PAYMOB_IFRAME_ID")]
    paymob_iframe_id: Option<String>,

    #[arg(long, global = true, env = "PAYMOB_HMAC_SECRET", hide_env_values = true)]
    paymob_hmac_secret: Option<String>,
}

impl Settings {
    fn marketplace(&self) -> MarketplaceConfig {
        MarketplaceConfig {
            commission: CommissionPolicy::new(self.commission),
            auto_release_after: Duration::hours(self.auto_release_hours),
            currency: self.currency.clone(),
        }
    }

    /// `None` when no Paymob credential is configured at all.
    fn paymob(&self) -> Option<PaymobConfig> {
        if self.paymob_api_key.is_none() && self.paymob_hmac_secret.is_none() {
            return None;
        }
        Some(PaymobConfig {
            api_base: self.paymob_api_base.clone(),
            api_key: self.paymob_api_key.clone(),
            integration_id: self.paymob_integration_id.clone(),
            iframe_id: self.paymob_iframe_id.clone(),
            hmac_secret: self.paymob_hmac_secret.clone(),
        })
    }
}

fn open_stores(db_path: Option<&Path>) -> Result<Stores> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            let store =
                srvana::infrastructure::rocksdb::RocksDBStore::open(path).into_diagnostic()?;
            Ok(Stores::rocksdb(store))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            eprintln!(
                "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
            Ok(Stores::in_memory())
        }
        None => Ok(Stores::in_memory()),
    }
}

fn build_market(cli: &Cli, clock: Box<dyn Clock>) -> Result<Marketplace> {
    let stores = open_stores(cli.db_path.as_deref())?;
    let market = Marketplace::new(stores, clock, cli.settings.marketplace());
    Ok(match cli.settings.paymob() {
        Some(paymob) => market.with_gateway(Box::new(PaymobClient::new(paymob))),
        None => market,
    })
}

async fn print_wallets(market: &Marketplace) -> Result<()> {
    let users = market.wallets().await.into_diagnostic()?;
    let stdout = io::stdout();
    WalletWriter::new(stdout.lock())
        .write_wallets(users)
        .into_diagnostic()
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run { input } => {
            let clock = ManualClock::new(Utc::now());
            let market = build_market(&cli, Box::new(clock.clone()))?;
            let runner = CommandRunner::new(&market, clock);

            let file = File::open(input).into_diagnostic()?;
            for line in CommandReader::new(BufReader::new(file)).commands() {
                match line {
                    Ok(line) => match runner.execute(line).await {
                        Ok(summary) => info!("{summary}"),
                        Err(e) => warn!(error = %e, "command rejected"),
                    },
                    Err(e) => warn!(error = %e, "command skipped"),
                }
            }
            print_wallets(&market).await?;
        }
        Commands::AutoRelease { now } => {
            let market = build_market(&cli, Box::new(SystemClock))?;
            let now = now.unwrap_or_else(Utc::now);
            let report = market.run_auto_release(now).await.into_diagnostic()?;
            for (order_id, reason) in &report.skipped {
                warn!(order_id, %reason, "order not released");
            }
            print_wallets(&market).await?;
        }
        Commands::Ledger => {
            let market = build_market(&cli, Box::new(SystemClock))?;
            let entries = market.ledger().await.into_diagnostic()?;
            let stdout = io::stdout();
            LedgerWriter::new(stdout.lock())
                .write_entries(&entries)
                .into_diagnostic()?;
        }
    }

    Ok(())
}
