use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "refnet")]
#[command(about = "Referral network reward engine", long_about = None)]
pub struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = "refnet.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Seed a sample referral forest and walk it through rank promotions
    /// and a withdrawal lifecycle
    Demo,
    /// Replay every ledger account and compare against the cached balances
    Verify,
    /// Recompute every rank bottom-up and persist the corrections
    Reconcile,
    /// Print forest and ledger statistics
    Stats,
}
