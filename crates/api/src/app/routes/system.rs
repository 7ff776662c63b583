use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use scribe_core::CorrelationId;
use scribe_infra::jobs::JobStore;

use crate::app::services::AppServices;

/// Readiness: a credential can be obtained and the queue answers.
pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    let credentials = match services.credentials.get(CorrelationId::new()).await {
        Ok(_) => None,
        Err(e) => Some(e.to_string()),
    };
    let queue = match services.store.ping().await {
        Ok(()) => None,
        Err(e) => Some(e.to_string()),
    };

    let healthy = credentials.is_none() && queue.is_none();
    if !healthy {
        tracing::warn!(
            credentials = credentials.as_deref().unwrap_or("ok"),
            queue = queue.as_deref().unwrap_or("ok"),
            "health check failed"
        );
    }

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if healthy { "ok" } else { "degraded" },
            "checks": {
                "credentials": credentials.unwrap_or_else(|| "ok".to_string()),
                "queue": queue.unwrap_or_else(|| "ok".to_string()),
            },
        })),
    )
}

pub async fn live() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn metrics(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    let queue = match services.queue_stats().await {
        Ok(stats) => serde_json::to_value(stats).unwrap_or_default(),
        Err(e) => {
            tracing::warn!(error = %e, "queue stats unavailable");
            serde_json::Value::Null
        }
    };

    Json(json!({
        "minutes": services.metrics.snapshot(),
        "executor": services.executor_stats(),
        "queue": queue,
    }))
}
