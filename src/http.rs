//! HTTP surface (spec §6, non-core). Handler shapes and the `TraceLayer`
//! span/on_request/on_response/on_failure wiring are carried over directly
//! from `der_headend/src/main.rs`; the routes themselves are new.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};

use crate::coordinator::{InspectCoordinator, InspectOutcome};
use crate::descriptor::{InspectDescriptor, parse_inspect_link};
use crate::error::GatewayError;
use crate::manager::WorkerManager;
use crate::models::Priority;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<InspectCoordinator>,
    pub manager: Arc<WorkerManager>,
    pub queue_capacity: usize,
    pub allow_refresh: bool,
    pub store: Arc<dyn Store>,
}

/// Accepts either a raw steam inspect link (`url`) or its four decomposed
/// fields (`s`, `a`, `d`, `m`) directly (§6) — the CS2 client's context menu
/// hands out the former, but some integrations already have the latter
/// parsed out and shouldn't have to re-assemble a link just to inspect.
#[derive(Deserialize)]
pub struct InspectQuery {
    pub url: Option<String>,
    pub s: Option<u64>,
    pub a: Option<u64>,
    pub d: Option<u64>,
    pub m: Option<u64>,
    #[serde(default)]
    pub refresh: bool,
    #[serde(default)]
    pub reply: Option<bool>,
    #[serde(default)]
    pub low_priority: bool,
}

fn priority_of(low_priority: bool) -> Priority {
    if low_priority {
        Priority::Low
    } else {
        Priority::Normal
    }
}

fn descriptor_of(q: &InspectQuery) -> Result<InspectDescriptor, GatewayError> {
    if let Some(url) = &q.url {
        return parse_inspect_link(url);
    }
    match (q.a, q.d) {
        (Some(a), Some(d)) => InspectDescriptor::new(q.s.unwrap_or(0), a, d, q.m.unwrap_or(0)),
        _ => Err(GatewayError::BadDescriptor(
            "provide either url or the s/a/d/m fields".into(),
        )),
    }
}

pub async fn root() -> Html<&'static str> {
    Html(
        r#"<!doctype html>
<html lang="en">
<head><meta charset="utf-8" /><title>CS2 Inspect Gateway</title></head>
<body>
  <h1>CS2 Inspect Gateway</h1>
  <p>GET <code>/inspect?url=...</code>, <code>/float?url=...</code>, <code>/stats</code>.</p>
</body>
</html>"#,
    )
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    db: &'static str,
}

pub async fn health(State(state): State<AppState>) -> Response {
    match state.store.ping().await {
        Ok(()) => (
            axum::http::StatusCode::OK,
            Json(HealthBody {
                status: "ok",
                db: "ok",
            }),
        )
            .into_response(),
        Err(_) => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthBody {
                status: "degraded",
                db: "unreachable",
            }),
        )
            .into_response(),
    }
}

pub async fn inspect(State(state): State<AppState>, Query(q): Query<InspectQuery>) -> Response {
    match handle_inspect(&state, q).await {
        Ok(body) => (axum::http::StatusCode::OK, Json(body)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn handle_inspect(
    state: &AppState,
    q: InspectQuery,
) -> Result<serde_json::Value, GatewayError> {
    let mut descriptor = descriptor_of(&q)?;
    descriptor.refresh = q.refresh && state.allow_refresh;
    descriptor.low_priority = q.low_priority;
    descriptor.reply = q.reply.unwrap_or(true);
    let priority = priority_of(descriptor.low_priority);

    match state.coordinator.submit(descriptor, priority).await? {
        InspectOutcome::Ready(body) => Ok(body),
        InspectOutcome::Accepted(asset_id) => {
            Ok(serde_json::json!({ "accepted": true, "assetId": asset_id }))
        }
    }
}

pub async fn float(State(state): State<AppState>, Query(q): Query<InspectQuery>) -> Response {
    match handle_float(&state, q).await {
        Ok(body) => (axum::http::StatusCode::OK, Json(body)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn handle_float(
    state: &AppState,
    q: InspectQuery,
) -> Result<serde_json::Value, GatewayError> {
    let mut descriptor = descriptor_of(&q)?;
    descriptor.refresh = q.refresh && state.allow_refresh;
    descriptor.low_priority = q.low_priority;
    descriptor.reply = true;
    let priority = priority_of(descriptor.low_priority);
    state.coordinator.submit_float(descriptor, priority).await
}

pub async fn stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let depth = state.coordinator.queue_depth().await;
    let stats = state.manager.full_stats(depth, state.queue_capacity).await;
    Json(serde_json::to_value(stats).unwrap_or_default())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/inspect", get(inspect))
        .route("/float", get(float))
        .route("/stats", get(stats))
        .with_state(state)
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %req.method(),
                        path = %req.uri().path(),
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        tracing::info!(
                            parent: span,
                            status = %res.status(),
                            latency_ms = %latency.as_millis(),
                            "response sent"
                        );
                    },
                )
                .on_failure(
                    |error: tower_http::classify::ServerErrorsFailureClass,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        tracing::error!(
                            parent: span,
                            error = %error,
                            latency_ms = %latency.as_millis(),
                            "request failed"
                        );
                    },
                ),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_of_accepts_raw_sadm_fields() {
        let q = InspectQuery {
            url: None,
            s: Some(111),
            a: Some(222),
            d: Some(333),
            m: None,
            refresh: false,
            reply: None,
            low_priority: false,
        };
        let desc = descriptor_of(&q).unwrap();
        assert_eq!((desc.s, desc.a, desc.d, desc.m), (111, 222, 333, 0));
    }

    #[test]
    fn descriptor_of_requires_url_or_raw_fields() {
        let q = InspectQuery {
            url: None,
            s: None,
            a: None,
            d: None,
            m: None,
            refresh: false,
            reply: None,
            low_priority: false,
        };
        assert!(descriptor_of(&q).is_err());
    }
}
