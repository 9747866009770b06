//! Bot state machine and reconnect policy (spec §4.1) — the core of this
//! specification. Grounded on the reconnect-event pattern in
//! `emotiv-cortex-rs`'s `reconnect/mod.rs` (typed connection events over a
//! broadcast channel, attempt counters) and the jittered-backoff routine in
//! `doorway`'s `worker-pool.rs` (`backoff_with_jitter`), generalized to the
//! spec's exact full-jitter formula and its three-way permanent/transient/
//! timeout error split.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};

use crate::descriptor::InspectDescriptor;
use crate::error::GatewayError;
use crate::models::InspectResult;
use crate::transport::{GameTransport, TransportError};

/// Tagged state a single bot account can be in (§3 `BotState`, §4.1).
#[derive(Debug, Clone, PartialEq)]
pub enum BotState {
    Initializing,
    Ready,
    Busy,
    Cooldown,
    Disconnected,
    PermanentlyFailed { reason: String },
}

impl BotState {
    pub fn is_ready(&self) -> bool {
        matches!(self, BotState::Ready)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BotState::PermanentlyFailed { .. })
    }
}

impl std::fmt::Display for BotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BotState::Initializing => write!(f, "initializing"),
            BotState::Ready => write!(f, "ready"),
            BotState::Busy => write!(f, "busy"),
            BotState::Cooldown => write!(f, "cooldown"),
            BotState::Disconnected => write!(f, "disconnected"),
            BotState::PermanentlyFailed { .. } => write!(f, "permanently_failed"),
        }
    }
}

/// `ReconnectStatus` (§3): the reconnect-facing half of a bot's state,
/// reported per-bot in `/stats` (§4.2 stats rows).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectStatus {
    pub attempts: u32,
    pub scheduled: bool,
    pub can_reconnect: bool,
    pub permanently_failed: bool,
    pub last_error: Option<String>,
}

/// Per-bot counters reported alongside state in `/stats` (§3 `BotState`).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BotSnapshot {
    pub username: String,
    pub state: String,
    pub inspect_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_inspect_time: Option<DateTime<Utc>>,
    pub reconnect: ReconnectStatus,
}

/// Error codes that retire a bot for good rather than triggering a
/// reconnect attempt (§4.1).
const PERMANENT_ERROR_CODES: &[&str] = &[
    "ACCOUNT_DISABLED",
    "INVALID_PASSWORD",
    "RATE_LIMIT_EXCEEDED_PERMANENT",
];

pub fn is_permanent_error(code: &str) -> bool {
    PERMANENT_ERROR_CODES.contains(&code)
}

/// Reconnect backoff parameters (§4.1 defaults: base 30s, max 600s, 10
/// attempts before the bot is parked as permanently failed).
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(600),
            max_attempts: 10,
        }
    }
}

/// Full-jitter exponential backoff: `delay = min(max, base * 2^attempt) *
/// rand(0.5, 1.0)` (§4.1). `attempt` is zero-based (the delay before the
/// *first* retry uses `attempt = 0`).
pub fn backoff_delay(policy: &ReconnectPolicy, attempt: u32) -> Duration {
    let exp_secs = policy.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
    let capped_secs = exp_secs.min(policy.max_delay.as_secs_f64());
    let jitter = rand::thread_rng().gen_range(0.5..1.0_f64);
    Duration::from_secs_f64(capped_secs * jitter)
}

/// Default per-inspect timeout (§4.1, §6).
pub const DEFAULT_INSPECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Shard-level cooldown applied on `LOGIN_THROTTLED` (§4.1, §4.2): 30
/// minutes, distinct from the much shorter post-success `Cooldown`.
pub const LOGIN_THROTTLE_COOLDOWN: Duration = Duration::from_secs(30 * 60);

/// One logged-in (or attempting-to-log-in) game account, owned exclusively
/// by a single worker shard (§9: `Map<username, Bot>` ownership, no shared
/// mutable state between shards).
pub struct Bot {
    pub username: String,
    password: String,
    proxy: Option<String>,
    transport: Box<dyn GameTransport>,
    pub state: BotState,
    attempt: u32,
    reconnect_policy: ReconnectPolicy,
    cooldown: Duration,
    cooldown_until: Option<std::time::Instant>,
    /// Non-blocking reconnect scheduling (§4.1 `scheduleReconnect`): the
    /// shard's health check sets this instead of sleeping inline, and only
    /// calls `connect()` again once it has elapsed (§5: no suspension point
    /// may block the shard's event loop for the backoff duration).
    reconnect_scheduled_at: Option<std::time::Instant>,
    last_error: Option<String>,
    inspect_count: u64,
    success_count: u64,
    failure_count: u64,
    last_inspect_time: Option<DateTime<Utc>>,
}

impl Bot {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        transport: Box<dyn GameTransport>,
        reconnect_policy: ReconnectPolicy,
        cooldown: Duration,
    ) -> Self {
        Self::with_proxy(
            username,
            password,
            None,
            transport,
            reconnect_policy,
            cooldown,
        )
    }

    pub fn with_proxy(
        username: impl Into<String>,
        password: impl Into<String>,
        proxy: Option<String>,
        transport: Box<dyn GameTransport>,
        reconnect_policy: ReconnectPolicy,
        cooldown: Duration,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            proxy,
            transport,
            state: BotState::Initializing,
            attempt: 0,
            reconnect_policy,
            cooldown,
            cooldown_until: None,
            reconnect_scheduled_at: None,
            last_error: None,
            inspect_count: 0,
            success_count: 0,
            failure_count: 0,
            last_inspect_time: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    /// Attempt (or re-attempt) login. On a permanent error code the bot is
    /// retired for good; on `LOGIN_THROTTLED` the bot is parked in a 30
    /// minute shard-level cooldown rather than scheduled for reconnect;
    /// on anything else it stays `Disconnected` and the caller should
    /// schedule a retry after `next_backoff()`.
    pub async fn connect(&mut self) -> Result<(), GatewayError> {
        self.reconnect_scheduled_at = None;
        match self
            .transport
            .login(&self.username, &self.password, self.proxy.as_deref())
            .await
        {
            Ok(()) => {
                self.state = BotState::Ready;
                self.attempt = 0;
                self.last_error = None;
                info!(bot = %self.log_name(), "bot ready");
                Ok(())
            }
            Err(TransportError::Permanent(code)) => {
                self.state = BotState::PermanentlyFailed {
                    reason: code.clone(),
                };
                self.last_error = Some(code.clone());
                warn!(bot = %self.log_name(), reason = %code, "bot permanently failed");
                Err(permanent_error(&code))
            }
            Err(TransportError::Throttled(code)) => {
                self.state = BotState::Cooldown;
                self.cooldown_until = Some(std::time::Instant::now() + LOGIN_THROTTLE_COOLDOWN);
                self.last_error = Some(code.clone());
                warn!(bot = %self.log_name(), "bot login throttled, cooling down 30m");
                Err(GatewayError::TransportDrop)
            }
            Err(TransportError::Transient(msg)) => {
                self.attempt += 1;
                self.state = BotState::Disconnected;
                self.last_error = Some(msg.clone());
                warn!(bot = %self.log_name(), attempt = self.attempt, error = %msg, "bot reconnect failed");
                Err(GatewayError::TransportDrop)
            }
        }
    }

    /// `None` once `max_attempts` reconnects have all failed — the caller
    /// should stop retrying and treat the bot as lost for this session
    /// (distinct from `PermanentlyFailed`, which is a named terminal code).
    pub fn next_backoff(&self) -> Option<Duration> {
        if self.attempt >= self.reconnect_policy.max_attempts {
            None
        } else {
            Some(backoff_delay(&self.reconnect_policy, self.attempt))
        }
    }

    /// Schedule (but don't perform) the next reconnect attempt for a
    /// `Disconnected` bot, without blocking the caller. Once `max_attempts`
    /// is exhausted the bot is parked as `PermanentlyFailed` instead
    /// (§4.1: "maxReconnectAttemptsReached"). A no-op if a reconnect is
    /// already scheduled or the bot isn't `Disconnected`.
    pub fn ensure_reconnect_scheduled(&mut self) {
        if !matches!(self.state, BotState::Disconnected) || self.reconnect_scheduled_at.is_some() {
            return;
        }
        match self.next_backoff() {
            Some(delay) => {
                self.reconnect_scheduled_at = Some(std::time::Instant::now() + delay);
            }
            None => {
                self.state = BotState::PermanentlyFailed {
                    reason: "RECONNECT_ATTEMPTS_EXHAUSTED".into(),
                };
                warn!(bot = %self.log_name(), "reconnect attempts exhausted, bot parked");
            }
        }
    }

    /// Whether a scheduled reconnect's delay has elapsed and `connect()`
    /// should be called again.
    pub fn due_for_reconnect(&self) -> bool {
        matches!(self.state, BotState::Disconnected)
            && self
                .reconnect_scheduled_at
                .is_some_and(|at| std::time::Instant::now() >= at)
    }

    pub fn reconnect_status(&self) -> ReconnectStatus {
        ReconnectStatus {
            attempts: self.attempt,
            scheduled: self.reconnect_scheduled_at.is_some(),
            can_reconnect: !self.state.is_terminal(),
            permanently_failed: self.state.is_terminal(),
            last_error: self.last_error.clone(),
        }
    }

    pub fn snapshot(&self) -> BotSnapshot {
        BotSnapshot {
            username: self.log_name(),
            state: self.state.to_string(),
            inspect_count: self.inspect_count,
            success_count: self.success_count,
            failure_count: self.failure_count,
            last_inspect_time: self.last_inspect_time,
            reconnect: self.reconnect_status(),
        }
    }

    pub async fn inspect(
        &mut self,
        descriptor: &InspectDescriptor,
        timeout: Duration,
    ) -> Result<InspectResult, GatewayError> {
        if !self.is_ready() {
            return Err(GatewayError::NoBotsReady);
        }
        self.state = BotState::Busy;
        self.inspect_count += 1;
        self.last_inspect_time = Some(Utc::now());

        let outcome = tokio::time::timeout(timeout, self.transport.inspect(descriptor)).await;
        match outcome {
            Ok(Ok(result)) => {
                self.success_count += 1;
                self.enter_cooldown();
                Ok(result)
            }
            Ok(Err(TransportError::Permanent(code))) => {
                self.failure_count += 1;
                self.state = BotState::PermanentlyFailed {
                    reason: code.clone(),
                };
                self.last_error = Some(code.clone());
                Err(permanent_error(&code))
            }
            Ok(Err(TransportError::Throttled(code))) => {
                self.failure_count += 1;
                self.state = BotState::Cooldown;
                self.cooldown_until = Some(std::time::Instant::now() + LOGIN_THROTTLE_COOLDOWN);
                self.last_error = Some(code.clone());
                Err(GatewayError::TransportDrop)
            }
            Ok(Err(TransportError::Transient(msg))) => {
                self.failure_count += 1;
                self.state = BotState::Disconnected;
                self.last_error = Some(msg.clone());
                warn!(bot = %self.log_name(), error = %msg, "inspect transport error");
                Err(GatewayError::TransportDrop)
            }
            Err(_elapsed) => {
                self.failure_count += 1;
                self.enter_cooldown();
                Err(GatewayError::InspectTimeout)
            }
        }
    }

    fn enter_cooldown(&mut self) {
        if self.cooldown.is_zero() {
            self.state = BotState::Ready;
        } else {
            self.state = BotState::Cooldown;
            self.cooldown_until = Some(std::time::Instant::now() + self.cooldown);
        }
    }

    /// Advance time-based transitions: `Cooldown` back to `Ready` once the
    /// cooldown window elapses. Called from the shard's periodic tick.
    pub fn tick(&mut self) {
        if let BotState::Cooldown = self.state
            && let Some(until) = self.cooldown_until
            && std::time::Instant::now() >= until
        {
            self.state = BotState::Ready;
            self.cooldown_until = None;
        }
    }

    /// Best-effort teardown, called on shutdown for every bot including
    /// ones that are `PermanentlyFailed` (open question 3: normal shutdown
    /// still releases the transport's session resources for all bots, it
    /// just doesn't attempt reconnects for the permanently-failed ones).
    pub async fn destroy(&mut self) {
        self.transport.logout().await;
    }

    fn log_name(&self) -> String {
        truncate_username(&self.username)
    }
}

/// Bot usernames shouldn't appear in full in logs or `/stats` output
/// (credentials-adjacent); keep a short, stable prefix instead.
pub fn truncate_username(username: &str) -> String {
    let keep = username.chars().take(4).collect::<String>();
    format!("{keep}***")
}

fn permanent_error(code: &str) -> GatewayError {
    match code {
        "ACCOUNT_DISABLED" => GatewayError::AccountDisabled,
        "INVALID_PASSWORD" => GatewayError::InvalidPassword,
        _ => GatewayError::PermanentRateLimit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SimulatedTransport;

    fn bot(username: &str, password: &str) -> Bot {
        Bot::new(
            username,
            password,
            Box::new(SimulatedTransport::new()),
            ReconnectPolicy::default(),
            Duration::from_millis(0),
        )
    }

    #[test]
    fn backoff_never_exceeds_max_delay() {
        let policy = ReconnectPolicy::default();
        for attempt in 0..20 {
            let delay = backoff_delay(&policy, attempt);
            assert!(delay <= policy.max_delay);
        }
    }

    #[test]
    fn backoff_is_monotone_in_expectation_until_cap() {
        let policy = ReconnectPolicy::default();
        // attempt 0 upper bound is base_delay; attempt 3 upper bound is 8x that.
        let low = backoff_delay(&policy, 0);
        assert!(low <= policy.base_delay);
        let high_cap = policy.base_delay.as_secs_f64() * 8.0;
        let high = backoff_delay(&policy, 3);
        assert!(high.as_secs_f64() <= high_cap);
    }

    #[test]
    fn permanent_error_codes_are_recognized() {
        assert!(is_permanent_error("ACCOUNT_DISABLED"));
        assert!(is_permanent_error("INVALID_PASSWORD"));
        assert!(is_permanent_error("RATE_LIMIT_EXCEEDED_PERMANENT"));
        assert!(!is_permanent_error("TIMEOUT"));
    }

    #[tokio::test]
    async fn connect_success_transitions_to_ready() {
        let mut b = bot("bot1", "pw");
        b.connect().await.unwrap();
        assert!(b.is_ready());
    }

    #[tokio::test]
    async fn connect_permanent_error_retires_bot() {
        let mut b = bot("disabled", "pw");
        let err = b.connect().await.unwrap_err();
        assert_eq!(err, GatewayError::AccountDisabled);
        assert!(b.state.is_terminal());
    }

    #[tokio::test]
    async fn connect_invalid_password_is_permanent() {
        let mut b = bot("someone", "");
        let err = b.connect().await.unwrap_err();
        assert_eq!(err, GatewayError::InvalidPassword);
        assert!(b.state.is_terminal());
    }

    #[tokio::test]
    async fn connect_throttled_parks_bot_in_cooldown_not_disconnected() {
        let mut b = bot("throttled", "pw");
        assert!(b.connect().await.is_err());
        assert_eq!(b.state, BotState::Cooldown);
        assert!(!b.is_ready());
    }

    #[test]
    fn reconnect_schedule_is_set_without_blocking() {
        let mut b = bot("bot1", "pw");
        b.state = BotState::Disconnected;
        b.ensure_reconnect_scheduled();
        assert!(!b.due_for_reconnect()); // backoff is at least 15s, can't be due yet
        assert!(b.reconnect_status().scheduled);
    }

    #[test]
    fn exhausted_reconnect_attempts_parks_bot_permanently() {
        let mut b = bot("bot1", "pw");
        b.state = BotState::Disconnected;
        b.attempt = b.reconnect_policy.max_attempts;
        b.ensure_reconnect_scheduled();
        assert!(b.state.is_terminal());
    }

    #[tokio::test]
    async fn inspect_requires_ready_state() {
        let mut b = bot("bot1", "pw");
        let desc = InspectDescriptor::new(1, 2, 3, 0).unwrap();
        let err = b.inspect(&desc, DEFAULT_INSPECT_TIMEOUT).await.unwrap_err();
        assert_eq!(err, GatewayError::NoBotsReady);
    }

    #[tokio::test]
    async fn inspect_success_returns_to_ready_with_zero_cooldown() {
        let mut b = bot("bot1", "pw");
        b.connect().await.unwrap();
        let desc = InspectDescriptor::new(1, 2, 3, 0).unwrap();
        let result = b.inspect(&desc, DEFAULT_INSPECT_TIMEOUT).await.unwrap();
        assert_eq!(result.asset_id, 2);
        assert!(b.is_ready());
    }

    #[tokio::test]
    async fn inspect_enters_cooldown_then_ticks_back_to_ready() {
        let mut b = Bot::new(
            "bot1",
            "pw",
            Box::new(SimulatedTransport::new()),
            ReconnectPolicy::default(),
            Duration::from_millis(20),
        );
        b.connect().await.unwrap();
        let desc = InspectDescriptor::new(1, 2, 3, 0).unwrap();
        b.inspect(&desc, DEFAULT_INSPECT_TIMEOUT).await.unwrap();
        assert_eq!(b.state, BotState::Cooldown);
        tokio::time::sleep(Duration::from_millis(30)).await;
        b.tick();
        assert!(b.is_ready());
    }

    #[test]
    fn truncated_username_never_reveals_full_credential() {
        let short = truncate_username("ab");
        let long = truncate_username("averylongusername");
        assert!(short.ends_with("***"));
        assert!(long.ends_with("***"));
        assert!(!long.contains("longusername"));
    }
}
