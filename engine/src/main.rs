//! FundFlow command-line front end.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fundflow_common::{AccountId, UserId};
use fundflow_engine::{EngineConfig, Fixture, TransactionEngine, TransferRequest};
use fundflow_fx::{ExchangeRateApiProvider, RateProvider, RateService};
use fundflow_ledger::{PgStore, Store};

#[derive(Parser)]
#[command(name = "fundflow", version, about = "Fund transfers with conversion and distribution")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute one transfer and print the transaction record as JSON
    Transfer {
        /// Source account id
        #[arg(long)]
        source: i64,
        /// Gateway account id
        #[arg(long)]
        gateway: i64,
        /// Amount in source currency, e.g. 100.00
        #[arg(long)]
        amount: String,
        /// Initiating user id
        #[arg(long)]
        user: i64,
        /// Run against an in-memory ledger loaded from this JSON fixture
        #[arg(long)]
        fixture: Option<PathBuf>,
    },
    /// Apply database migrations
    Migrate,
    /// Load a fixture's accounts and rules into the database
    Seed {
        #[arg(long)]
        fixture: PathBuf,
    },
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG")
        .or_else(|_| std::env::var("LOG_LEVEL"))
        .unwrap_or_else(|_| "info".into());
    let json = std::env::var("FUNDFLOW_LOG_JSON")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(EnvFilter::new(filter));
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn connect(config: &EngineConfig) -> anyhow::Result<PgStore> {
    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set")?;
    let store = PgStore::connect(url)
        .await
        .context("failed to connect to database")?;
    Ok(store.with_lock_timeout(config.lock_timeout))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = EngineConfig::from_env().context("invalid configuration")?;

    match cli.command {
        Command::Transfer {
            source,
            gateway,
            amount,
            user,
            fixture,
        } => {
            let (store, provider): (Arc<dyn Store>, Arc<dyn RateProvider>) = match fixture {
                Some(path) => {
                    let fixture = Fixture::from_path(&path)
                        .with_context(|| format!("loading {}", path.display()))?;
                    let provider: Arc<dyn RateProvider> =
                        if fixture.rates.is_empty() && config.rates.api_key.is_some() {
                            Arc::new(ExchangeRateApiProvider::new(
                                config.exchange_rate_api_config()?,
                            )?)
                        } else {
                            Arc::new(fixture.rate_provider())
                        };
                    let store: Arc<dyn Store> = Arc::new(fixture.build_store()?);
                    (store, provider)
                }
                None => {
                    let store: Arc<dyn Store> = Arc::new(connect(&config).await?);
                    let provider: Arc<dyn RateProvider> = Arc::new(ExchangeRateApiProvider::new(
                        config.exchange_rate_api_config()?,
                    )?);
                    (store, provider)
                }
            };

            info!(
                fee_percentage = %config.fee_percentage,
                remainder_policy = %config.remainder_policy,
                provider = provider.name(),
                "Engine ready"
            );

            let rates = Arc::new(RateService::new(provider, config.rate_service_config()));
            let engine = TransactionEngine::new(store, rates, config);
            let request = TransferRequest::new(
                AccountId::new(source),
                AccountId::new(gateway),
                amount,
                UserId::new(user),
            );

            match engine.execute(request).await {
                Ok(record) => {
                    println!("{}", serde_json::to_string_pretty(&record)?);
                }
                Err(e) => {
                    let body = serde_json::json!({
                        "error_code": e.error_code(),
                        "message": e.public_message(),
                        "retryable": e.is_retryable(),
                    });
                    println!("{}", serde_json::to_string_pretty(&body)?);
                    bail!("transfer failed: {}", e.error_code());
                }
            }
        }
        Command::Migrate => {
            connect(&config).await?.migrate().await?;
        }
        Command::Seed { fixture } => {
            let fixture = Fixture::from_path(&fixture)
                .with_context(|| format!("loading {}", fixture.display()))?;
            connect(&config).await?.seed(&fixture.ledger).await?;
        }
    }

    Ok(())
}
