//! Game transport seam (spec §5, Non-goal (a)). The real CS2 game-network
//! protocol is explicitly out of scope; this trait is the boundary a real
//! implementation would sit behind, mirroring how `der_headend` treats the
//! field device link as a collaborator behind `AgentStream` rather than
//! inlining its wire format into `Simulator`.

use async_trait::async_trait;

use crate::descriptor::InspectDescriptor;
use crate::models::InspectResult;

/// Error surfaced by a transport operation, already classified into the
/// buckets bot.rs needs to drive the state machine (§7's `BotPermanent` vs.
/// everything else).
#[derive(Debug, Clone)]
pub enum TransportError {
    /// One of the permanent error codes (§4.1): `ACCOUNT_DISABLED`,
    /// `INVALID_PASSWORD`, `RATE_LIMIT_EXCEEDED_PERMANENT`.
    Permanent(String),
    /// Anything recoverable by reconnecting: dropped session, transient
    /// rate limit, network blip.
    Transient(String),
    /// `LOGIN_THROTTLED` (§4.1, §4.2): the account itself isn't broken, the
    /// game network is rate-limiting new logins. Distinct from `Transient`
    /// because the recovery isn't "reconnect with backoff" but "go cold for
    /// a fixed 30 minutes" (a shard-level cooldown, not a reconnect attempt).
    Throttled(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Permanent(msg) => write!(f, "permanent: {msg}"),
            TransportError::Transient(msg) => write!(f, "transient: {msg}"),
            TransportError::Throttled(msg) => write!(f, "throttled: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// A logged-in connection to the game network, scoped to one bot account.
/// Shards own one of these per `Bot`; nothing is shared across bots.
#[async_trait]
pub trait GameTransport: Send + Sync {
    async fn login(
        &mut self,
        username: &str,
        password: &str,
        proxy: Option<&str>,
    ) -> Result<(), TransportError>;

    async fn inspect(
        &mut self,
        descriptor: &InspectDescriptor,
    ) -> Result<InspectResult, TransportError>;

    async fn logout(&mut self);
}

/// Transport standing in for the real game protocol (Non-goal (a) leaves
/// the wire encoding a black box). Answers deterministically so the rest
/// of the pipeline — queueing, dispatch, history classification,
/// persistence — can be exercised end to end without a live account.
pub struct SimulatedTransport {
    logged_in: bool,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self { logged_in: false }
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GameTransport for SimulatedTransport {
    async fn login(
        &mut self,
        username: &str,
        password: &str,
        _proxy: Option<&str>,
    ) -> Result<(), TransportError> {
        if password.is_empty() {
            return Err(TransportError::Permanent("INVALID_PASSWORD".into()));
        }
        if username == "disabled" {
            return Err(TransportError::Permanent("ACCOUNT_DISABLED".into()));
        }
        if username == "rate-limited" {
            return Err(TransportError::Permanent(
                "RATE_LIMIT_EXCEEDED_PERMANENT".into(),
            ));
        }
        if username == "throttled" {
            return Err(TransportError::Throttled("LOGIN_THROTTLED".into()));
        }
        self.logged_in = true;
        Ok(())
    }

    async fn inspect(
        &mut self,
        descriptor: &InspectDescriptor,
    ) -> Result<InspectResult, TransportError> {
        if !self.logged_in {
            return Err(TransportError::Transient("not logged in".into()));
        }
        Ok(InspectResult {
            asset_id: descriptor.a,
            def_index: 7,
            paint_index: 44,
            rarity: 4,
            quality: 4,
            paint_seed: Some((descriptor.a % 1000) as u32),
            paint_wear: Some(0.07),
            quest_id: None,
            origin: 8,
            owner_id: if descriptor.is_market() {
                None
            } else {
                Some(descriptor.s.to_string())
            },
            stickers: Vec::new(),
            keychains: Vec::new(),
            extra: serde_json::Map::new(),
        })
    }

    async fn logout(&mut self) {
        self.logged_in = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_empty_password() {
        let mut t = SimulatedTransport::new();
        let err = t.login("someone", "", None).await.unwrap_err();
        assert!(matches!(err, TransportError::Permanent(_)));
    }

    #[tokio::test]
    async fn throttled_login_is_a_distinct_error() {
        let mut t = SimulatedTransport::new();
        let err = t.login("throttled", "pw", None).await.unwrap_err();
        assert!(matches!(err, TransportError::Throttled(_)));
    }

    #[tokio::test]
    async fn inspect_requires_login() {
        let mut t = SimulatedTransport::new();
        let desc = InspectDescriptor::new(1, 2, 3, 0).unwrap();
        assert!(t.inspect(&desc).await.is_err());
    }

    #[tokio::test]
    async fn login_then_inspect_succeeds() {
        let mut t = SimulatedTransport::new();
        t.login("bot1", "pw", None).await.unwrap();
        let desc = InspectDescriptor::new(1, 2, 3, 0).unwrap();
        let result = t.inspect(&desc).await.unwrap();
        assert_eq!(result.asset_id, 2);
    }
}
