//! Worker manager (spec §4.4): shards the bot fleet into fixed-size groups,
//! dispatches each inspect to a shard chosen by weighted-random selection
//! over ready-bot counts, and retries transient failures across shards up
//! to a fixed cap. Grounded on `der_headend`'s `AppState` fan-out pattern
//! (`create_dispatch` in `http.rs`, pushing to many agents from one
//! coordinating task) generalized from "all agents" to "one chosen shard".

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tracing::warn;

use crate::descriptor::InspectDescriptor;
use crate::error::GatewayError;
use crate::metrics::{BotCounts, MetricsRecorder, QueueSnapshot, ShardSnapshot, StatsResponse};
use crate::models::InspectResult;
use crate::shard::{InspectRequest, ShardMessage};

pub const BOTS_PER_WORKER: usize = 50;
pub const MAX_RETRIES: u32 = 3;

type DispatchReply = oneshot::Sender<Result<InspectResult, GatewayError>>;

pub struct WorkerManager {
    shards: Vec<mpsc::Sender<ShardMessage>>,
    stats_cache: Arc<RwLock<Vec<ShardSnapshot>>>,
    /// In-flight requests already dispatched to a shard, keyed by asset id
    /// (§4.4, §8 invariant 1: at most one concurrent inspect per asset id
    /// fleet-wide). Distinct from the admission queue's own coalescing,
    /// which only covers requests still waiting to be dispatched (§4.3).
    /// The first caller for an asset id becomes the leader and performs the
    /// dispatch; every later caller attaches its own reply channel here and
    /// is woken when the leader's dispatch resolves.
    in_flight: Arc<Mutex<HashMap<u64, Vec<DispatchReply>>>>,
    metrics: Arc<Mutex<MetricsRecorder>>,
    max_retries: u32,
}

impl WorkerManager {
    pub fn new(shards: Vec<mpsc::Sender<ShardMessage>>, max_retries: u32) -> Self {
        let stats_cache = Arc::new(RwLock::new(
            (0..shards.len())
                .map(|id| ShardSnapshot {
                    id,
                    counts: BotCounts::default(),
                    bots: Vec::new(),
                })
                .collect(),
        ));
        Self {
            shards,
            stats_cache,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            metrics: Arc::new(Mutex::new(MetricsRecorder::new())),
            max_retries,
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// A request answered from the coordinator's cache never reaches a
    /// shard; still counted in `/stats`' `totals.cached` (§3 `FleetMetrics`).
    pub async fn record_cached(&self) {
        self.metrics.lock().await.record_cached();
    }

    /// Background loop refreshing the ready-bot-count cache every `period`
    /// — the manager's weighted dispatch reads the cache rather than
    /// polling every shard synchronously on each request (§4.2's 3s stats
    /// cadence feeding §4.4's dispatch weighting).
    pub async fn run_stats_refresh(&self, period: Duration) {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let mut snapshots = Vec::with_capacity(self.shards.len());
            for (id, shard) in self.shards.iter().enumerate() {
                let (tx, rx) = oneshot::channel();
                if shard.send(ShardMessage::GetStats(tx)).await.is_err() {
                    snapshots.push(ShardSnapshot {
                        id,
                        counts: BotCounts::default(),
                        bots: Vec::new(),
                    });
                    continue;
                }
                snapshots.push(rx.await.unwrap_or(ShardSnapshot {
                    id,
                    counts: BotCounts::default(),
                    bots: Vec::new(),
                }));
            }
            *self.stats_cache.write().await = snapshots;
        }
    }

    async fn pick_shard(&self, exclude: &[usize]) -> Option<usize> {
        let cache = self.stats_cache.read().await;
        let weights: Vec<(usize, usize)> = cache
            .iter()
            .enumerate()
            .filter(|(idx, _)| !exclude.contains(idx))
            .map(|(idx, snapshot)| (idx, snapshot.counts.ready))
            .filter(|(_, ready)| *ready > 0)
            .collect();
        let total: usize = weights.iter().map(|(_, w)| w).sum();
        if total == 0 {
            return None;
        }
        let mut pick = rand::thread_rng().gen_range(0..total);
        for (idx, weight) in weights {
            if pick < weight {
                return Some(idx);
            }
            pick -= weight;
        }
        None
    }

    /// Dispatch one inspect, de-duplicating concurrent requests for the
    /// same asset id onto a single physical inspect (§4.4, §8 invariant 1)
    /// and retrying transient failures on a different shard up to
    /// `max_retries` additional attempts. `NoBotsReady` returned because the
    /// whole fleet has zero ready bots right now is not itself retried here
    /// — the caller (coordinator) is responsible for deciding whether to
    /// leave the request queued.
    pub async fn dispatch(
        &self,
        descriptor: InspectDescriptor,
        timeout: Duration,
    ) -> Result<InspectResult, GatewayError> {
        let (tx, rx) = oneshot::channel();
        let is_leader = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get_mut(&descriptor.a) {
                Some(waiters) => {
                    waiters.push(tx);
                    false
                }
                None => {
                    in_flight.insert(descriptor.a, vec![tx]);
                    true
                }
            }
        };
        if !is_leader {
            return rx.await.map_err(|_| GatewayError::ShuttingDown)?;
        }

        let started = std::time::Instant::now();
        let (result, attempts_used) = self.dispatch_with_retries(descriptor, timeout).await;
        let waiters = self
            .in_flight
            .lock()
            .await
            .remove(&descriptor.a)
            .unwrap_or_default();

        match &result {
            Ok(_) => {
                self.metrics
                    .lock()
                    .await
                    .record_success(started.elapsed(), attempts_used > 0);
            }
            Err(err) => {
                let timed_out = matches!(err, GatewayError::InspectTimeout);
                self.metrics.lock().await.record_failure(timed_out);
            }
        }
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
        result
    }

    /// Returns the outcome plus how many retries ran before it, so the
    /// caller can credit `successAfterRetry` (§4.4).
    async fn dispatch_with_retries(
        &self,
        descriptor: InspectDescriptor,
        timeout: Duration,
    ) -> (Result<InspectResult, GatewayError>, u32) {
        let mut excluded = Vec::new();
        let mut last_err = GatewayError::NoBotsReady;

        for attempt in 0..=self.max_retries {
            let Some(shard_idx) = self.pick_shard(&excluded).await else {
                return (Err(GatewayError::NoBotsReady), attempt);
            };
            let (reply_tx, reply_rx) = oneshot::channel();
            let req = InspectRequest {
                descriptor,
                timeout,
                reply: reply_tx,
            };
            if self.shards[shard_idx]
                .send(ShardMessage::Inspect(req))
                .await
                .is_err()
            {
                excluded.push(shard_idx);
                continue;
            }
            match reply_rx.await {
                Ok(Ok(result)) => return (Ok(result), attempt),
                Ok(Err(err)) if err.is_transient() && attempt < self.max_retries => {
                    warn!(attempt, shard = shard_idx, error = %err, "retrying inspect on another shard");
                    self.metrics.lock().await.record_retry();
                    excluded.push(shard_idx);
                    last_err = err;
                }
                Ok(Err(err)) => return (Err(err), attempt),
                Err(_) => {
                    excluded.push(shard_idx);
                    last_err = GatewayError::TransportDrop;
                }
            }
        }
        (Err(last_err), self.max_retries)
    }

    pub async fn full_stats(&self, queue_depth: usize, queue_capacity: usize) -> StatsResponse {
        let shards = self.stats_cache.read().await.clone();
        let mut bot_totals = BotCounts::default();
        for s in &shards {
            bot_totals.ready += s.counts.ready;
            bot_totals.busy += s.counts.busy;
            bot_totals.cooldown += s.counts.cooldown;
            bot_totals.disconnected += s.counts.disconnected;
            bot_totals.permanently_failed += s.counts.permanently_failed;
        }
        let mut metrics = self.metrics.lock().await;
        StatsResponse {
            shards,
            queue: QueueSnapshot {
                depth: queue_depth,
                capacity: queue_capacity,
            },
            totals: metrics.totals(bot_totals),
            latency_ms: metrics.latency(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pick_shard_returns_none_when_all_cold() {
        let manager = WorkerManager::new(vec![], MAX_RETRIES);
        assert!(manager.pick_shard(&[]).await.is_none());
    }

    #[tokio::test]
    async fn pick_shard_excludes_named_indices() {
        let (tx, _rx) = mpsc::channel(1);
        let manager = WorkerManager::new(vec![tx], MAX_RETRIES);
        *manager.stats_cache.write().await = vec![ShardSnapshot {
            id: 0,
            counts: BotCounts {
                ready: 5,
                ..Default::default()
            },
            bots: Vec::new(),
        }];
        assert_eq!(manager.pick_shard(&[]).await, Some(0));
        assert_eq!(manager.pick_shard(&[0]).await, None);
    }

    #[tokio::test]
    async fn dispatch_fails_fast_with_no_shards() {
        let manager = WorkerManager::new(vec![], MAX_RETRIES);
        let desc = InspectDescriptor::new(1, 2, 3, 0).unwrap();
        let err = manager
            .dispatch(desc, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::NoBotsReady);
    }

    #[tokio::test]
    async fn concurrent_dispatch_for_same_asset_hits_the_shard_once() {
        let (tx, mut rx) = mpsc::channel(8);
        let manager = Arc::new(WorkerManager::new(vec![tx], MAX_RETRIES));
        *manager.stats_cache.write().await = vec![ShardSnapshot {
            id: 0,
            counts: BotCounts {
                ready: 1,
                ..Default::default()
            },
            bots: Vec::new(),
        }];
        let desc = InspectDescriptor::new(1, 42, 3, 0).unwrap();

        let leader = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.dispatch(desc, Duration::from_secs(5)).await })
        };
        let follower = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.dispatch(desc, Duration::from_secs(5)).await })
        };

        let ShardMessage::Inspect(req) = rx.recv().await.unwrap() else {
            panic!("expected an Inspect message");
        };
        let result = InspectResult {
            asset_id: 42,
            def_index: 1,
            paint_index: 1,
            rarity: 1,
            quality: 1,
            paint_seed: None,
            paint_wear: None,
            quest_id: None,
            origin: 0,
            owner_id: None,
            stickers: Vec::new(),
            keychains: Vec::new(),
            extra: serde_json::Map::new(),
        };
        let _ = req.reply.send(Ok(result));

        assert_eq!(leader.await.unwrap().unwrap().asset_id, 42);
        assert_eq!(follower.await.unwrap().unwrap().asset_id, 42);
        // The shard should never have received a second Inspect for the same
        // asset id — the follower attached to the leader's in-flight entry.
        assert!(rx.try_recv().is_err());
    }
}
