use clap::Parser;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

use refnet::cli::{Cli, Commands};
use refnet::config::RefnetConfig;
use refnet::ledger::TxKind;
use refnet::service::RefnetService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = RefnetConfig::load_or_default(&cli.config);
    let snapshot_path = config.service.snapshot_path.clone();

    match cli.command.unwrap_or(Commands::Stats) {
        Commands::Demo => run_demo(&config).await?,
        Commands::Verify => {
            let service = RefnetService::load(&snapshot_path, &config)?;
            let mismatches = service.verify_ledger()?;
            if mismatches.is_empty() {
                info!("Ledger OK: every cached balance matches log replay");
            } else {
                warn!("Ledger mismatch on {} account(s): {:?}", mismatches.len(), mismatches);
                std::process::exit(1);
            }
        }
        Commands::Reconcile => {
            let service = RefnetService::load(&snapshot_path, &config)?;
            let corrected = service.reconcile_ranks()?;
            info!("Reconcile sweep corrected {} node(s)", corrected);
            if corrected > 0 {
                service.save(&snapshot_path)?;
            }
        }
        Commands::Stats => {
            let service = RefnetService::load(&snapshot_path, &config)?;
            let stats = service.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }
    Ok(())
}

/// Seed a small forest, drive it through a promotion and a full withdrawal
/// lifecycle, then snapshot the result
async fn run_demo(config: &RefnetConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut service = RefnetService::new(config);
    service.spawn_worker(config.service.rank_worker_shards);

    info!("Seeding demo forest...");
    let root = "demo_root".to_string();
    service.register_user(&root, None)?;
    service.set_active_member(&root, true)?;
    for i in 0..10 {
        let id = format!("demo_member_{}", i);
        service.register_user(&id, Some(&root))?;
        service.set_active_member(&id, true)?;
    }

    // Let the worker drain the recompute queue
    tokio::time::sleep(Duration::from_millis(200)).await;

    let rank = service.query_rank(&root)?;
    println!("{}", serde_json::to_string_pretty(&rank)?);
    let team = service.query_team_structure(&root)?;
    println!("{}", serde_json::to_string_pretty(&team)?);

    info!("Crediting commission and walking a withdrawal through approval...");
    service.credit(&root, 50_000, TxKind::Earn, "demo-commission-1", HashMap::new())?;
    let request_id = service.create_withdrawal(&root, 15_000)?;
    service.admin_approve(&request_id, Some("demo approval".to_string()))?;
    service.admin_complete(&request_id, "utr:demo".to_string())?;

    let balance = service.get_balance(&root)?;
    println!("{}", serde_json::to_string_pretty(&balance)?);

    service.save(&config.service.snapshot_path)?;
    info!("Demo complete");
    Ok(())
}
