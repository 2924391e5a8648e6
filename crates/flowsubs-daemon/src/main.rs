use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use flowsubs_core::request::{
    CancelSubscriptionRequest, CreateSubscriptionRequest, RegisterProviderRequest,
};
use flowsubs_core::{FlowSubsConfig, SubscriptionId};
use flowsubs_ledger::SqliteLedger;
use flowsubs_scheduler::{Clock, PaymentOutcome, SchedulerEngine, SystemClock};
use tracing::{info, warn};

mod cli;
mod report;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "flowsubs_daemon=info,flowsubs_scheduler=info,flowsubs_ledger=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // config: --config > FLOWSUBS_CONFIG env > ~/.flowsubs/flowsubs.toml
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("FLOWSUBS_CONFIG").ok());
    let config = FlowSubsConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        FlowSubsConfig::default()
    });

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite ledger");
    let db = rusqlite::Connection::open(db_path)
        .with_context(|| format!("cannot open ledger database {db_path}"))?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

    let clock = Arc::new(SystemClock);
    let ledger = Arc::new(SqliteLedger::new(
        db,
        clock.clone(),
        config.scheduler.min_interval_secs,
    )?);

    match cli.command {
        Command::Run => run(config, ledger, clock).await?,
        Command::Tick => {
            let engine = SchedulerEngine::new(ledger, clock, config.scheduler.clone())?;
            let tally = engine.tick().await?;
            println!("{}", serde_json::to_string_pretty(&tally)?);
        }
        Command::RegisterProvider {
            address,
            name,
            description,
        } => {
            let provider = ledger.register_provider(RegisterProviderRequest {
                address,
                name,
                description,
            })?;
            println!("registered provider {} ({})", provider.address, provider.name);
        }
        Command::DeactivateProvider { address } => {
            ledger.deactivate_provider(&address)?;
            println!("provider {address} deactivated");
        }
        Command::ReactivateProvider { address } => {
            ledger.reactivate_provider(&address)?;
            println!("provider {address} reactivated");
        }
        Command::Deposit { address, amount } => {
            let balance = ledger.deposit(&address, amount)?;
            println!("{address} balance: {balance}");
        }
        Command::Subscribe {
            subscriber,
            provider,
            amount,
            interval,
        } => {
            let sub = ledger.create_subscription(CreateSubscriptionRequest {
                subscriber,
                provider,
                amount,
                interval_secs: interval,
            })?;
            println!(
                "subscription {} created; first payment of {} at {}",
                sub.id,
                sub.amount,
                report::format_time(sub.next_payment_time)
            );
        }
        Command::Cancel { id, subscriber } => {
            let sub = ledger.cancel_subscription(CancelSubscriptionRequest {
                subscription_id: SubscriptionId(id),
                subscriber,
            })?;
            println!("subscription {} cancelled", sub.id);
        }
        Command::List { address, provider } => {
            let subs = if provider {
                ledger.list_subscriptions_for_provider(&address)?
            } else {
                ledger.list_subscriptions_for(&address)?
            };
            if subs.is_empty() {
                println!("no subscriptions");
            }
            let now = clock.now();
            for sub in &subs {
                println!("{}", report::subscription_line(sub));
                for line in report::schedule_lines(sub, now) {
                    println!("{line}");
                }
            }
        }
        Command::ProviderStats { address } => {
            let stats = ledger.provider_stats(&address)?;
            for line in report::stats_lines(&address, &stats) {
                println!("{line}");
            }
        }
        Command::History { id } => {
            let id = SubscriptionId(id);
            if ledger.get_subscription(id)?.is_none() {
                anyhow::bail!("subscription {id} not found");
            }
            for event in ledger.payment_history(id)? {
                println!("{}", report::event_line(&event));
            }
        }
        Command::Account { address, limit } => {
            println!("balance: {}", ledger.balance(&address)?);
            for event in ledger.payments_for_account(&address, limit)? {
                println!("{}", report::event_line(&event));
            }
        }
    }
    Ok(())
}

/// Run the scheduler loop until Ctrl-C.
async fn run(
    config: FlowSubsConfig,
    ledger: Arc<SqliteLedger>,
    clock: Arc<SystemClock>,
) -> anyhow::Result<()> {
    // Outcome channel: SchedulerEngine → payment feed task
    let (outcome_tx, mut outcome_rx) = tokio::sync::mpsc::channel::<PaymentOutcome>(256);
    let engine = SchedulerEngine::new(ledger, clock, config.scheduler.clone())?
        .with_outcome_channel(outcome_tx);

    tokio::spawn(async move {
        while let Some(outcome) = outcome_rx.recv().await {
            match serde_json::to_string(&outcome) {
                Ok(line) => info!(target: "flowsubs_daemon::feed", "{line}"),
                Err(e) => warn!("payment feed: cannot encode outcome: {e}"),
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let scheduler = tokio::spawn(async move { engine.run(shutdown_rx).await });
    info!(
        tick_secs = config.scheduler.tick_secs,
        "FlowSubs daemon running, Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    scheduler.await?;
    Ok(())
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
