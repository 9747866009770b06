//! Error taxonomy for the gateway (spec §7).
//!
//! Two layers: internal plumbing uses `anyhow::Error` with context at I/O
//! boundaries (db connect, credential file reads); anything that can reach
//! an HTTP response is a `GatewayError` variant with a fixed status code.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GatewayError {
    #[error("malformed inspect descriptor: {0}")]
    BadDescriptor(String),

    #[error("admission queue is full")]
    QueueFull,

    #[error("no bots are ready to service this request")]
    NoBotsReady,

    #[error("inspect request timed out")]
    InspectTimeout,

    #[error("game transport connection dropped mid-inspect")]
    TransportDrop,

    #[error("bot account disabled")]
    AccountDisabled,

    #[error("bot account password rejected")]
    InvalidPassword,

    #[error("bot account permanently rate limited")]
    PermanentRateLimit,

    #[error("persistence store unavailable: {0}")]
    PersistenceUnavailable(String),

    #[error("shutting down")]
    ShuttingDown,
}

impl GatewayError {
    /// `true` for the `TransientInspect` kind (§7): recovered internally by
    /// the coordinator/manager retry policy, never the bot's fault.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::NoBotsReady | GatewayError::InspectTimeout | GatewayError::TransportDrop
        )
    }

    pub fn status(&self) -> StatusCode {
        use GatewayError::*;
        match self {
            BadDescriptor(_) => StatusCode::BAD_REQUEST,
            QueueFull => StatusCode::TOO_MANY_REQUESTS,
            NoBotsReady | InspectTimeout | TransportDrop => StatusCode::GATEWAY_TIMEOUT,
            ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            AccountDisabled | InvalidPassword | PermanentRateLimit | PersistenceUnavailable(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds_match_spec_taxonomy() {
        assert!(GatewayError::NoBotsReady.is_transient());
        assert!(GatewayError::InspectTimeout.is_transient());
        assert!(GatewayError::TransportDrop.is_transient());
        assert!(!GatewayError::QueueFull.is_transient());
        assert!(!GatewayError::AccountDisabled.is_transient());
    }

    #[test]
    fn status_codes_match_spec_table() {
        assert_eq!(
            GatewayError::BadDescriptor("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::QueueFull.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            GatewayError::NoBotsReady.status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::InspectTimeout.status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::TransportDrop.status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::PersistenceUnavailable("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
