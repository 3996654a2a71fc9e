//! Defines routes for the multipart upload API.
//!
//! ## Structure
//! - `GET  /`                          — endpoint catalog
//! - `GET  /healthz`, `GET /readyz`    — probes
//! - `POST /start-multipart-upload`    — begin an upload, returns `uploadId`
//! - `POST /get-upload-url`            — pre-signed URL for one part
//! - `POST /complete-multipart-upload` — assemble uploaded parts
//! - `POST /abort-multipart-upload`    — discard an unfinished upload

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        upload_handlers::{
            abort_multipart_upload, complete_multipart_upload, get_upload_url, index,
            start_multipart_upload,
        },
    },
    services::upload_service::UploadService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{get, post},
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

/// Request bodies are small JSON documents; part payloads go straight to storage.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build and return the router for all upload routes.
///
/// The router carries shared state (`UploadService`) to all handlers.
pub fn routes() -> Router<UploadService> {
    Router::new()
        .route("/", get(index))
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/start-multipart-upload", post(start_multipart_upload))
        .route("/get-upload-url", post(get_upload_url))
        .route("/complete-multipart-upload", post(complete_multipart_upload))
        .route("/abort-multipart-upload", post(abort_multipart_upload))
}

/// Full application: routes, state, CORS, body limit and request tracing.
pub fn app(service: UploadService, cors_origins: &[String]) -> Router {
    routes()
        .with_state(service)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
}

/// `*` (or an empty list) allows any origin; otherwise only the listed ones.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }

    let allowed = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!("ignoring invalid CORS origin {}: {}", origin, err);
                None
            }
        })
        .collect::<Vec<_>>();
    base.allow_origin(AllowOrigin::list(allowed))
}
