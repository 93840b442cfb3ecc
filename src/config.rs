use serde::{Deserialize, Serialize};

use crate::withdrawal::WithdrawalPolicy;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RefnetConfig {
    pub service: ServiceConfig,
    pub withdrawal: WithdrawalConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    pub snapshot_path: String,
    pub log_level: String,
    /// Cap on the transaction list returned by the balance query
    #[serde(default = "default_recent_transactions")]
    pub recent_transactions: usize,
    /// Shard count for the async rank recompute worker
    #[serde(default = "default_rank_worker_shards")]
    pub rank_worker_shards: usize,
}

fn default_recent_transactions() -> usize {
    20
}

fn default_rank_worker_shards() -> usize {
    4
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WithdrawalConfig {
    /// Smallest coin unit
    pub min_amount: i64,
    pub max_amount: i64,
}

impl Default for RefnetConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                snapshot_path: "./data/refnet.json".to_string(),
                log_level: "info".to_string(),
                recent_transactions: 20,
                rank_worker_shards: 4,
            },
            withdrawal: WithdrawalConfig {
                min_amount: 1_000,
                max_amount: 10_000_000,
            },
        }
    }
}

impl RefnetConfig {
    pub fn load_or_default(path: &str) -> Self {
        if std::path::Path::new(path).exists() {
            match std::fs::read_to_string(path) {
                Ok(s) => match toml::from_str(&s) {
                    Ok(c) => {
                        println!("Config loaded from {}", path);
                        c
                    }
                    Err(e) => {
                        eprintln!("Error parsing config: {}. Using Defaults.", e);
                        Self::default()
                    }
                },
                Err(e) => {
                    eprintln!("Error reading config: {}. Using Defaults.", e);
                    Self::default()
                }
            }
        } else {
            println!("Config file not found at '{}'. Creating default.", path);
            let config = Self::default();
            if let Ok(s) = toml::to_string_pretty(&config) {
                let _ = std::fs::write(path, s);
            }
            config
        }
    }

    pub fn withdrawal_policy(&self) -> WithdrawalPolicy {
        WithdrawalPolicy {
            min_amount: self.withdrawal.min_amount,
            max_amount: self.withdrawal.max_amount,
        }
    }
}
