//! Worker shard (spec §4.2): owns a fixed set of bots, selects one
//! uniformly at random among the ready ones per inspect, and runs its own
//! health-check and stats timers. Grounded on `doorway`'s `worker_task`
//! loop shape (a single task looping over an inbound `mpsc` channel) and
//! on `der_headend`'s `AppState` pattern of wrapping shared state behind a
//! task rather than a lock taken from many call sites.

use std::collections::HashMap;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::bot::{Bot, BotState};
use crate::descriptor::InspectDescriptor;
use crate::error::GatewayError;
use crate::metrics::{BotCounts, ShardSnapshot};
use crate::models::InspectResult;

pub struct InspectRequest {
    pub descriptor: InspectDescriptor,
    pub timeout: Duration,
    pub reply: oneshot::Sender<Result<InspectResult, GatewayError>>,
}

pub enum ShardMessage {
    Inspect(InspectRequest),
    GetStats(oneshot::Sender<ShardSnapshot>),
    Shutdown,
}

pub struct WorkerShard {
    pub id: usize,
    bots: HashMap<String, Bot>,
    inbox: mpsc::Receiver<ShardMessage>,
    health_check_interval: Duration,
    health_check_initial_delay: Duration,
}

impl WorkerShard {
    pub fn new(
        id: usize,
        bots: HashMap<String, Bot>,
        inbox: mpsc::Receiver<ShardMessage>,
        health_check_interval: Duration,
        health_check_initial_delay: Duration,
    ) -> Self {
        Self {
            id,
            bots,
            inbox,
            health_check_interval,
            health_check_initial_delay,
        }
    }

    fn bot_counts(&self) -> BotCounts {
        let mut counts = BotCounts::default();
        for bot in self.bots.values() {
            match &bot.state {
                BotState::Ready => counts.ready += 1,
                BotState::Busy => counts.busy += 1,
                BotState::Cooldown => counts.cooldown += 1,
                BotState::Disconnected | BotState::Initializing => counts.disconnected += 1,
                BotState::PermanentlyFailed { .. } => counts.permanently_failed += 1,
            }
        }
        counts
    }

    fn snapshot(&self) -> ShardSnapshot {
        ShardSnapshot {
            id: self.id,
            counts: self.bot_counts(),
            bots: self.bots.values().map(Bot::snapshot).collect(),
        }
    }

    fn pick_ready_bot(&mut self) -> Option<&mut Bot> {
        let ready_usernames: Vec<String> = self
            .bots
            .iter()
            .filter(|(_, b)| b.is_ready())
            .map(|(name, _)| name.clone())
            .collect();
        let chosen = ready_usernames.choose(&mut rand::thread_rng())?.clone();
        self.bots.get_mut(&chosen)
    }

    async fn handle_inspect(&mut self, req: InspectRequest) {
        let Some(bot) = self.pick_ready_bot() else {
            let _ = req.reply.send(Err(GatewayError::NoBotsReady));
            return;
        };
        let result = bot.inspect(&req.descriptor, req.timeout).await;
        let _ = req.reply.send(result);
    }

    /// Walks every bot without blocking on any reconnect backoff (§5: no
    /// suspension point may block the shard's event loop indefinitely).
    /// `Disconnected` bots with no reconnect scheduled get one scheduled;
    /// bots whose scheduled delay has already elapsed get a reconnect
    /// attempt. Both are instantaneous checks against a stored timestamp,
    /// never a `sleep` in this loop.
    async fn run_health_check(&mut self) {
        for bot in self.bots.values_mut() {
            bot.tick();
            if matches!(bot.state, BotState::Disconnected) {
                bot.ensure_reconnect_scheduled();
            }
        }

        let due: Vec<String> = self
            .bots
            .iter()
            .filter(|(_, bot)| bot.due_for_reconnect())
            .map(|(name, _)| name.clone())
            .collect();
        for name in due {
            if let Some(bot) = self.bots.get_mut(&name)
                && bot.connect().await.is_err()
            {
                warn!(shard = self.id, bot = %bot.username, "reconnect attempt failed");
            }
        }
    }

    pub async fn run(mut self) {
        tokio::time::sleep(self.health_check_initial_delay).await;
        let mut health_check = tokio::time::interval(self.health_check_interval);
        health_check.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                msg = self.inbox.recv() => {
                    match msg {
                        Some(ShardMessage::Inspect(req)) => self.handle_inspect(req).await,
                        Some(ShardMessage::GetStats(reply)) => {
                            let _ = reply.send(self.snapshot());
                        }
                        Some(ShardMessage::Shutdown) | None => break,
                    }
                }
                _ = health_check.tick() => {
                    self.run_health_check().await;
                }
            }
        }

        self.shutdown().await;
    }

    /// Best-effort teardown of every bot, including ones that are
    /// `PermanentlyFailed` — normal shutdown still releases transport
    /// resources for all of them even though it won't reconnect any.
    async fn shutdown(&mut self) {
        let already_failed = self.bots.values().filter(|b| b.state.is_terminal()).count();
        let results =
            futures_util::future::join_all(self.bots.values_mut().map(|bot| bot.destroy())).await;
        info!(
            shard = self.id,
            bots = results.len(),
            already_permanently_failed = already_failed,
            "shard shut down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::ReconnectPolicy;
    use crate::transport::SimulatedTransport;

    async fn ready_bot(name: &str) -> Bot {
        let mut bot = Bot::new(
            name,
            "pw",
            Box::new(SimulatedTransport::new()),
            ReconnectPolicy::default(),
            Duration::from_millis(0),
        );
        bot.connect().await.unwrap();
        bot
    }

    #[tokio::test]
    async fn inspect_fails_fast_with_no_ready_bots() {
        let (_tx, rx) = mpsc::channel(8);
        let mut shard = WorkerShard::new(
            0,
            HashMap::new(),
            rx,
            Duration::from_secs(60),
            Duration::from_secs(0),
        );
        let (reply_tx, reply_rx) = oneshot::channel();
        let desc = InspectDescriptor::new(1, 2, 3, 0).unwrap();
        shard
            .handle_inspect(InspectRequest {
                descriptor: desc,
                timeout: Duration::from_secs(1),
                reply: reply_tx,
            })
            .await;
        let result = reply_rx.await.unwrap();
        assert_eq!(result.unwrap_err(), GatewayError::NoBotsReady);
    }

    #[tokio::test]
    async fn inspect_dispatches_to_a_ready_bot() {
        let mut bots = HashMap::new();
        bots.insert("bot1".to_string(), ready_bot("bot1").await);
        let (_tx, rx) = mpsc::channel(8);
        let mut shard =
            WorkerShard::new(0, bots, rx, Duration::from_secs(60), Duration::from_secs(0));
        let (reply_tx, reply_rx) = oneshot::channel();
        let desc = InspectDescriptor::new(1, 2, 3, 0).unwrap();
        shard
            .handle_inspect(InspectRequest {
                descriptor: desc,
                timeout: Duration::from_secs(1),
                reply: reply_tx,
            })
            .await;
        let result = reply_rx.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn bot_counts_reflect_state_distribution() {
        let mut bots = HashMap::new();
        bots.insert("a".to_string(), ready_bot("a").await);
        let mut failed = ready_bot("b").await;
        failed.state = BotState::PermanentlyFailed {
            reason: "ACCOUNT_DISABLED".into(),
        };
        bots.insert("b".to_string(), failed);
        let (_tx, rx) = mpsc::channel(8);
        let shard = WorkerShard::new(0, bots, rx, Duration::from_secs(60), Duration::from_secs(0));
        let counts = shard.bot_counts();
        assert_eq!(counts.ready, 1);
        assert_eq!(counts.permanently_failed, 1);
    }
}
