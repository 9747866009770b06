//! Inspect coordinator (spec §4.5): parse → cache → enqueue → await or
//! background → persist → format. Grounded on `der_headend`'s
//! `create_dispatch` handler shape (validate input, fan out to a
//! collaborator, persist the outcome, return a view) and on §9's
//! "background: reply:false" design note — a fire-and-forget request is
//! enqueued and returns immediately without a result channel anyone reads.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{Mutex, Notify, RwLock, oneshot};
use tracing::error;

use crate::descriptor::InspectDescriptor;
use crate::error::GatewayError;
use crate::formatter::{format_float_response, format_inspect_response};
use crate::history::{self, PriorAsset};
use crate::manager::WorkerManager;
use crate::models::{AssetRecord, HistoryRecord, InspectResult, Priority, derive_unique_id};
use crate::queue::AdmissionQueue;
use crate::store::Store;

#[derive(Debug)]
pub enum InspectOutcome {
    /// Result ready now, either served from cache or awaited synchronously.
    Ready(serde_json::Value),
    /// `reply:false` request accepted into the queue; nothing to return but
    /// the asset id so the caller can echo it back (§6).
    Accepted(u64),
}

struct CachedResult {
    result: InspectResult,
    cached_at: Instant,
}

pub struct InspectCoordinator {
    queue: Arc<Mutex<AdmissionQueue>>,
    notify: Arc<Notify>,
    manager: Arc<WorkerManager>,
    store: Arc<dyn Store>,
    inspect_timeout: Duration,
    cache: Arc<RwLock<HashMap<u64, CachedResult>>>,
    cache_ttl: Duration,
}

impl InspectCoordinator {
    pub fn with_queue_limits(
        manager: Arc<WorkerManager>,
        store: Arc<dyn Store>,
        inspect_timeout: Duration,
        cache_ttl: Duration,
        queue_capacity: usize,
        queue_deadline: Duration,
    ) -> Self {
        Self {
            queue: Arc::new(Mutex::new(AdmissionQueue::with_limits(
                queue_capacity,
                queue_deadline,
            ))),
            notify: Arc::new(Notify::new()),
            manager,
            store,
            inspect_timeout,
            cache: Arc::new(RwLock::new(HashMap::new())),
            cache_ttl,
        }
    }

    pub async fn queue_depth(&self) -> usize {
        self.queue.lock().await.len()
    }

    async fn cached(&self, asset_id: u64) -> Option<InspectResult> {
        let cache = self.cache.read().await;
        let entry = cache.get(&asset_id)?;
        if entry.cached_at.elapsed() <= self.cache_ttl {
            Some(entry.result.clone())
        } else {
            None
        }
    }

    pub async fn submit(
        &self,
        descriptor: InspectDescriptor,
        priority: Priority,
    ) -> Result<InspectOutcome, GatewayError> {
        if !descriptor.refresh
            && let Some(result) = self.cached(descriptor.a).await
        {
            self.manager.record_cached().await;
            let unique_id = derive_unique_id(
                result.paint_seed,
                result.paint_index,
                result.paint_wear,
                result.def_index,
            );
            return Ok(InspectOutcome::Ready(serde_json::json!({
                "iteminfo": format_inspect_response(&result, &unique_id, &descriptor)
            })));
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut queue = self.queue.lock().await;
            queue.enqueue(descriptor, priority, reply_tx)?;
        }
        self.notify.notify_one();

        if !descriptor.reply {
            return Ok(InspectOutcome::Accepted(descriptor.a));
        }

        let result = reply_rx.await.map_err(|_| GatewayError::ShuttingDown)??;
        let unique_id = derive_unique_id(
            result.paint_seed,
            result.paint_index,
            result.paint_wear,
            result.def_index,
        );
        Ok(InspectOutcome::Ready(serde_json::json!({
            "iteminfo": format_inspect_response(&result, &unique_id, &descriptor)
        })))
    }

    pub async fn submit_float(
        &self,
        descriptor: InspectDescriptor,
        priority: Priority,
    ) -> Result<serde_json::Value, GatewayError> {
        if !descriptor.refresh
            && let Some(result) = self.cached(descriptor.a).await
        {
            self.manager.record_cached().await;
            return Ok(format_float_response(&result));
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut queue = self.queue.lock().await;
            queue.enqueue(descriptor, priority, reply_tx)?;
        }
        self.notify.notify_one();
        let result = reply_rx.await.map_err(|_| GatewayError::ShuttingDown)??;
        Ok(format_float_response(&result))
    }

    /// Pulls ready entries off the queue and dispatches each to the
    /// manager on its own task, so one slow inspect never blocks the next
    /// dispatch. Runs for the lifetime of the process.
    pub async fn run_dispatch_loop(self: Arc<Self>) {
        loop {
            let next = { self.queue.lock().await.pop_ready() };
            let Some((descriptor, waiters, wait)) = next else {
                self.notify.notified().await;
                continue;
            };
            tracing::debug!(
                asset_id = descriptor.a,
                wait_ms = wait.as_millis() as u64,
                "dequeued inspect"
            );
            let this = self.clone();
            tokio::spawn(async move {
                this.dispatch_and_settle(descriptor, waiters).await;
            });
        }
    }

    async fn dispatch_and_settle(
        &self,
        descriptor: InspectDescriptor,
        waiters: Vec<oneshot::Sender<Result<InspectResult, GatewayError>>>,
    ) {
        let result = self
            .manager
            .dispatch(descriptor, self.inspect_timeout)
            .await;
        if let Ok(ref r) = result {
            self.cache.write().await.insert(
                descriptor.a,
                CachedResult {
                    result: r.clone(),
                    cached_at: Instant::now(),
                },
            );
            if let Err(err) = self.persist(r).await {
                error!(error = %err, asset_id = descriptor.a, "failed to persist inspect result");
            }
        }
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }

    async fn persist(&self, result: &InspectResult) -> Result<(), GatewayError> {
        let unique_id = derive_unique_id(
            result.paint_seed,
            result.paint_index,
            result.paint_wear,
            result.def_index,
        );

        // Read the prior record before writing the new one so the history
        // classifier compares against what was true an instant ago, not
        // the value we're about to write (open question: this read-then-
        // write is not transactional, so a concurrent inspect of the same
        // asset could still race; acceptable here since the classifier's
        // output is advisory history, not a ledger of record).
        let prior = self
            .store
            .find_asset(&unique_id)
            .await
            .map_err(|e| GatewayError::PersistenceUnavailable(e.to_string()))?;

        let prior_asset = prior.as_ref().map(|p| PriorAsset {
            owner_id: p.owner_id.clone(),
            stickers: p.stickers.clone(),
            keychains: p.keychains.clone(),
        });
        let event_type = history::classify(
            result.owner_id.as_deref(),
            &result.stickers,
            &result.keychains,
            result.origin,
            prior_asset.as_ref(),
        );

        let now = Utc::now();
        let first_seen_at = prior.as_ref().map(|p| p.first_seen_at).unwrap_or(now);
        let record = AssetRecord {
            unique_id: unique_id.clone(),
            asset_id: result.asset_id,
            def_index: result.def_index,
            paint_index: result.paint_index,
            rarity: result.rarity,
            quality: result.quality,
            paint_seed: result.paint_seed,
            paint_wear: result.paint_wear,
            quest_id: result.quest_id,
            origin: result.origin,
            owner_id: result.owner_id.clone(),
            stickers: result.stickers.clone(),
            keychains: result.keychains.clone(),
            first_seen_at,
            updated_at: now,
        };
        self.store
            .upsert_asset(&record)
            .await
            .map_err(|e| GatewayError::PersistenceUnavailable(e.to_string()))?;
        self.store
            .append_history(&HistoryRecord {
                unique_id,
                asset_id: result.asset_id,
                event_type,
                owner_id: result.owner_id.clone(),
                created_at: now,
            })
            .await
            .map_err(|e| GatewayError::PersistenceUnavailable(e.to_string()))?;
        Ok(())
    }

    /// Sweeps queue entries past their deadline, failing them with
    /// `InspectTimeout` (§4.3's 10s boundary case). Runs for the lifetime
    /// of the process alongside `run_dispatch_loop`.
    pub async fn run_deadline_sweep(self: Arc<Self>, period: Duration) {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let expired = { self.queue.lock().await.sweep_expired() };
            for entry in expired {
                for waiter in entry.into_waiters() {
                    let _ = waiter.send(Err(GatewayError::InspectTimeout));
                }
            }
        }
    }
}
