//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the session registry

use crate::services::upload_service::UploadService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Very small liveness probe — always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Pings the session registry and reports how many uploads are in flight.
/// HTTP 200 when the registry answers, HTTP 503 otherwise.
pub async fn readyz(State(service): State<UploadService>) -> impl IntoResponse {
    let registry = service.registry();
    let (registry_check, active_sessions) = match registry.ping().await {
        Ok(()) => match registry.count().await {
            Ok(count) => ((true, None::<String>), Some(count)),
            Err(e) => ((false, Some(format!("error: {}", e))), None),
        },
        Err(e) => ((false, Some(format!("error: {}", e))), None),
    };

    let overall_ok = registry_check.0;

    let mut checks = HashMap::new();
    checks.insert(
        "registry",
        CheckStatus {
            ok: registry_check.0,
            error: registry_check.1,
        },
    );

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
        active_sessions,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
    active_sessions: Option<usize>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
