//! Async recompute work-queue, sharded by user id
//!
//! Rank mutations enqueue `recompute(user)` jobs; each shard owns one task
//! that drains its channel in order, so jobs for the same user (and thus the
//! same ancestor chain) are serialized while distinct shards run in parallel.
//! A job takes the state write lock only for the duration of its chain walk.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::graph::UserId;
use crate::service::RefnetState;

#[derive(Clone)]
pub struct RankWorker {
    shards: Vec<mpsc::UnboundedSender<UserId>>,
}

impl RankWorker {
    /// Spawn `shards` drain tasks over the shared state. Must be called from
    /// within a tokio runtime.
    pub fn spawn(state: Arc<RwLock<RefnetState>>, shards: usize) -> Self {
        let shards = shards.max(1);
        let mut senders = Vec::with_capacity(shards);
        for shard in 0..shards {
            let (tx, mut rx) = mpsc::unbounded_channel::<UserId>();
            let state = state.clone();
            tokio::spawn(async move {
                info!("Rank worker shard {} started", shard);
                while let Some(user) = rx.recv().await {
                    let result = match state.write() {
                        Ok(mut guard) => guard.recompute(&user),
                        Err(e) => {
                            error!("Rank worker shard {}: state lock poisoned: {}", shard, e);
                            break;
                        }
                    };
                    if let Err(e) = result {
                        warn!("Recompute failed for {}: {}", user, e);
                    }
                }
                info!("Rank worker shard {} stopped", shard);
            });
            senders.push(tx);
        }
        Self { shards: senders }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Queue a recompute job. Dropped (with a warning) if the shard task has
    /// already stopped.
    pub fn enqueue(&self, user: UserId) {
        let idx = self.shard_for(&user);
        if self.shards[idx].send(user).is_err() {
            warn!("Rank worker shard {} is gone, job dropped", idx);
        }
    }

    fn shard_for(&self, user: &UserId) -> usize {
        let mut hasher = DefaultHasher::new();
        user.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rank::Rank;
    use crate::withdrawal::WithdrawalPolicy;
    use std::time::Duration;

    fn seeded_state() -> Arc<RwLock<RefnetState>> {
        let mut state = RefnetState::new(WithdrawalPolicy::default(), 20);
        state.graph.register("root".to_string(), true).unwrap();
        for i in 0..10 {
            let id = format!("m{}", i);
            state.graph.register(id.clone(), true).unwrap();
            state.graph.attach(&id, &"root".to_string()).unwrap();
        }
        Arc::new(RwLock::new(state))
    }

    async fn wait_for_rank(state: &Arc<RwLock<RefnetState>>, user: &str, rank: Rank) -> bool {
        for _ in 0..200 {
            {
                let guard = state.read().unwrap();
                if guard.graph.get(&user.to_string()).unwrap().rank == rank {
                    return true;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_worker_drains_recompute_jobs() {
        let state = seeded_state();
        let worker = RankWorker::spawn(state.clone(), 4);

        worker.enqueue("root".to_string());
        assert!(wait_for_rank(&state, "root", Rank::TeamLeader).await);
    }

    #[tokio::test]
    async fn test_same_user_jobs_hit_same_shard() {
        let state = seeded_state();
        let worker = RankWorker::spawn(state.clone(), 4);
        assert_eq!(worker.shard_count(), 4);
        let a = worker.shard_for(&"root".to_string());
        let b = worker.shard_for(&"root".to_string());
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_unknown_user_job_is_logged_not_fatal() {
        let state = seeded_state();
        let worker = RankWorker::spawn(state.clone(), 1);

        worker.enqueue("ghost".to_string());
        worker.enqueue("root".to_string());
        // The bad job is skipped and the shard keeps draining
        assert!(wait_for_rank(&state, "root", Rank::TeamLeader).await);
    }
}
