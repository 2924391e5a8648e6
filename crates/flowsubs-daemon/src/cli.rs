use clap::{Parser, Subcommand};
use flowsubs_core::Amount;

#[derive(Debug, Parser)]
#[command(name = "flowsubs-daemon")]
#[command(about = "Recurring-payment scheduler over a local ledger")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Config file (default: $FLOWSUBS_CONFIG, then ~/.flowsubs/flowsubs.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the scheduler until Ctrl-C
    Run,

    /// Run a single scheduler pass and print its report
    Tick,

    /// Register an address as a service provider
    RegisterProvider {
        address: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },

    /// Stop charging for a provider; its subscriptions skip cycles meanwhile
    DeactivateProvider { address: String },

    /// Re-enable a deactivated provider
    ReactivateProvider { address: String },

    /// Credit an account
    Deposit { address: String, amount: Amount },

    /// Open a subscription; the first charge is one interval from now
    Subscribe {
        #[arg(long)]
        subscriber: String,
        #[arg(long)]
        provider: String,
        #[arg(long)]
        amount: Amount,
        /// Billing interval in seconds
        #[arg(long)]
        interval: u64,
    },

    /// Cancel a subscription as its subscriber
    Cancel {
        id: u64,
        #[arg(long)]
        subscriber: String,
    },

    /// Subscriptions paid by (or, with --provider, paying) an address
    List {
        address: String,
        #[arg(long)]
        provider: bool,
    },

    /// Subscriber count and revenue of a provider
    ProviderStats { address: String },

    /// Payments of one subscription
    History { id: u64 },

    /// Recent payments sent or received by an address, plus its balance
    Account {
        address: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}
