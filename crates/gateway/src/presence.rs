use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {
    tokio::{
        sync::mpsc::{self, error::TrySendError},
        time::MissedTickBehavior,
    },
    tracing::{debug, warn},
};

use {
    tern_config::schema::PresenceConfig,
    tern_rpc::{UserService, types::OnlineStatusChange},
};

use crate::{usermap::UserMap, webhook::WebhookEmitter};

/// Cadence at which non-full shard buffers are handed to their workers.
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Deadline on each `set_user_online_status` batch call.
const USER_SERVICE_TIMEOUT: Duration = Duration::from_secs(5);

/// The presence engine: coalesces online/offline events per user shard,
/// reports batches to the user service, and fires lifecycle webhooks.
///
/// A user hashes to a stable shard (salted so clients cannot construct hot
/// shards), which gives per-user ordering at the user service. Lost events
/// (channel overflow, failed batches) are reconverged by the renewal sweep,
/// which re-emits every stale user's live platform set each interval.
pub struct PresenceEngine;

impl PresenceEngine {
    /// Spawn the shard workers and the batching loop. Tasks run for the
    /// life of the process; they exit when `rx`'s sender side is dropped.
    pub fn spawn(
        cfg: &PresenceConfig,
        renewal_interval: Duration,
        registry: Arc<UserMap>,
        user_svc: Arc<dyn UserService>,
        webhooks: Arc<WebhookEmitter>,
        mut rx: mpsc::Receiver<OnlineStatusChange>,
    ) {
        let shards = cfg.concurrency.max(1);
        let batch_max = cfg.batch_max.max(1);
        let salt: u64 = rand::random();
        let op_counter = Arc::new(AtomicU64::new(0));

        let mut shard_txs = Vec::with_capacity(shards);
        for shard_id in 0..shards {
            let (tx, shard_rx) = mpsc::channel::<Vec<OnlineStatusChange>>(cfg.shard_queue.max(1));
            shard_txs.push(tx);
            tokio::spawn(Self::run_worker(
                shard_id,
                shard_rx,
                Arc::clone(&registry),
                Arc::clone(&user_svc),
                Arc::clone(&webhooks),
                Arc::clone(&op_counter),
            ));
        }

        tokio::spawn(async move {
            let mut buffers: Vec<Vec<OnlineStatusChange>> =
                (0..shards).map(|_| Vec::with_capacity(batch_max)).collect();

            let mut flush = tokio::time::interval(FLUSH_INTERVAL);
            flush.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut renewal = tokio::time::interval(renewal_interval);
            renewal.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    maybe = rx.recv() => {
                        let Some(change) = maybe else { break };
                        let s = shard_of(&change.user_id, salt, shards);
                        buffers[s].push(change);
                        if buffers[s].len() >= batch_max {
                            hand_off(&mut buffers[s], &shard_txs[s], s);
                        }
                    },
                    _ = flush.tick() => {
                        for s in 0..shards {
                            if !buffers[s].is_empty() {
                                hand_off(&mut buffers[s], &shard_txs[s], s);
                            }
                        }
                    },
                    _ = renewal.tick() => {
                        let now = Instant::now();
                        let deadline = now.checked_sub(renewal_interval).unwrap_or(now);
                        let stale = registry.get_all_user_status(deadline, now);
                        if !stale.is_empty() {
                            debug!(users = stale.len(), "presence renewal sweep");
                        }
                        for change in stale {
                            let s = shard_of(&change.user_id, salt, shards);
                            buffers[s].push(change);
                            if buffers[s].len() >= batch_max {
                                hand_off(&mut buffers[s], &shard_txs[s], s);
                            }
                        }
                    },
                }
            }
        });
    }

    async fn run_worker(
        shard_id: usize,
        mut rx: mpsc::Receiver<Vec<OnlineStatusChange>>,
        registry: Arc<UserMap>,
        user_svc: Arc<dyn UserService>,
        webhooks: Arc<WebhookEmitter>,
        op_counter: Arc<AtomicU64>,
    ) {
        while let Some(batch) = rx.recv().await {
            let seq = op_counter.fetch_add(1, Ordering::Relaxed) + 1;
            let operation_id = format!("p_{}_{}", std::process::id(), seq);

            let res = tokio::time::timeout(
                USER_SERVICE_TIMEOUT,
                user_svc.set_user_online_status(&batch, &operation_id),
            )
            .await;
            match res {
                Ok(Ok(())) => {},
                Ok(Err(e)) => warn!(
                    shard = shard_id,
                    operation_id,
                    error = %e,
                    "online status batch failed; renewal sweep will re-announce"
                ),
                Err(_) => warn!(
                    shard = shard_id,
                    operation_id,
                    "online status batch timed out; renewal sweep will re-announce"
                ),
            }

            for change in &batch {
                for platform_id in &change.offline_platform_ids {
                    webhooks.after_user_offline(&change.user_id, *platform_id, &change.conn_id);
                }
                for platform_id in &change.online_platform_ids {
                    let is_background = registry
                        .get(&change.user_id, *platform_id)
                        .0
                        .first()
                        .map(|c| c.is_background())
                        .unwrap_or(false);
                    webhooks.after_user_online(
                        &change.user_id,
                        *platform_id,
                        is_background,
                        &change.conn_id,
                    );
                }
            }
        }
    }
}

/// Stable, salted shard assignment for a user.
fn shard_of(user_id: &str, salt: u64, shards: usize) -> usize {
    let d = md5::compute(user_id);
    let h = u64::from_be_bytes([d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]]);
    (h.wrapping_add(salt) % shards as u64) as usize
}

/// Swap the filled buffer out and enqueue it without blocking. A full
/// worker queue keeps the batch in place to retry on the next flush tick.
fn hand_off(
    buffer: &mut Vec<OnlineStatusChange>,
    tx: &mpsc::Sender<Vec<OnlineStatusChange>>,
    shard: usize,
) {
    let batch = std::mem::take(buffer);
    match tx.try_send(batch) {
        Ok(()) => {},
        Err(TrySendError::Full(batch)) => {
            warn!(shard, pending = batch.len(), "presence processing too slow");
            *buffer = batch;
        },
        Err(TrySendError::Closed(_)) => {},
    }
}

#[cfg(test)]
mod tests {
    use tern_rpc::mock::RecordingUserService;

    use super::*;

    fn test_cfg(concurrency: usize) -> PresenceConfig {
        PresenceConfig {
            concurrency,
            // Hand off every event immediately so tests never wait for the
            // one-second flush tick.
            batch_max: 1,
            shard_queue: 64,
            event_buffer: 1024,
            online_expire_secs: 180,
        }
    }

    fn change(user: &str, online: Vec<i32>, offline: Vec<i32>) -> OnlineStatusChange {
        OnlineStatusChange {
            user_id: user.into(),
            online_platform_ids: online,
            offline_platform_ids: offline,
            conn_id: "c".into(),
        }
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 2s");
    }

    #[tokio::test]
    async fn per_user_events_reach_user_service_in_order() {
        let (registry, _reg_rx) = UserMap::new(64);
        let user_svc = Arc::new(RecordingUserService::default());
        let (tx, rx) = mpsc::channel(64);
        PresenceEngine::spawn(
            &test_cfg(4),
            Duration::from_secs(600),
            Arc::new(registry),
            user_svc.clone(),
            Arc::new(WebhookEmitter::new(Default::default())),
            rx,
        );

        // online(P1) then offline(P2)-shaped updates for the same user.
        tx.send(change("alice", vec![1], vec![])).await.unwrap();
        tx.send(change("alice", vec![1, 2], vec![])).await.unwrap();
        tx.send(change("alice", vec![1], vec![2])).await.unwrap();

        wait_for(|| user_svc.changes().len() == 3).await;
        let seen = user_svc.changes();
        assert_eq!(seen[0].online_platform_ids, vec![1]);
        assert_eq!(seen[1].online_platform_ids, vec![1, 2]);
        assert_eq!(seen[2].offline_platform_ids, vec![2]);
    }

    #[tokio::test]
    async fn renewal_sweep_reports_live_users_even_with_no_events() {
        let (registry, _reg_rx) = UserMap::new(64);
        let registry = Arc::new(registry);
        // A live session the engine never saw an event for: the event
        // channel below is a fresh one, simulating 100% drop.
        registry.insert(crate::test_util::test_client("bob", 2, "c1"));

        let user_svc = Arc::new(RecordingUserService::default());
        let (_tx, rx) = mpsc::channel(64);
        PresenceEngine::spawn(
            &test_cfg(2),
            Duration::from_millis(100),
            Arc::clone(&registry),
            user_svc.clone(),
            Arc::new(WebhookEmitter::new(Default::default())),
            rx,
        );

        wait_for(|| {
            user_svc
                .changes()
                .iter()
                .any(|c| c.user_id == "bob" && c.online_platform_ids == vec![2])
        })
        .await;
    }

    #[tokio::test]
    async fn failed_batches_are_reannounced_by_renewal() {
        let (registry, _reg_rx) = UserMap::new(64);
        let registry = Arc::new(registry);
        registry.insert(crate::test_util::test_client("carol", 1, "c1"));

        let user_svc = Arc::new(RecordingUserService::default());
        user_svc.set_failing(true);

        let (_tx, rx) = mpsc::channel(64);
        PresenceEngine::spawn(
            &test_cfg(1),
            Duration::from_millis(100),
            Arc::clone(&registry),
            user_svc.clone(),
            Arc::new(WebhookEmitter::new(Default::default())),
            rx,
        );

        // Failures are logged, not recorded.
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(user_svc.changes().is_empty());

        // Once the backend recovers, the next sweep re-announces carol.
        user_svc.set_failing(false);
        wait_for(|| user_svc.changes().iter().any(|c| c.user_id == "carol")).await;
    }

    #[test]
    fn shard_assignment_is_stable_and_in_range() {
        let salt = 0xfeed_beef;
        for user in ["a", "b", "carol", "用户"] {
            let s1 = shard_of(user, salt, 7);
            let s2 = shard_of(user, salt, 7);
            assert_eq!(s1, s2);
            assert!(s1 < 7);
        }
    }
}
