//! UploadService: the three-phase multipart upload protocol.
//!
//! 1. `start_upload` asks the backend for an upload id and records a session.
//! 2. `part_url` signs a part upload against the session's object key.
//! 3. `complete_upload` finalizes the upload and drops the session.
//!
//! `abort_upload` and `sweep_expired` end sessions that will never complete.
//!
//! Registry calls are short and never span a backend call. A session stays
//! registered until its backend completion or abort succeeds; while one is
//! running the upload id is held in an in-flight set so no second finalize
//! starts. Backend and registry failures are logged here and surface as
//! generic errors.

use crate::{
    config::AppConfig,
    models::session::UploadSession,
    services::{
        gateway::{CompletedPart, GatewayError, PresignedPart, StorageGateway},
        session_registry::{RegistryError, SessionRegistry},
    },
};
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use std::{collections::HashMap, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const COMPLETED_MESSAGE: &str = "Upload completed successfully!";
pub const ABORTED_MESSAGE: &str = "Upload aborted";

const MISSING_PARAMETERS: &str = "Missing required parameters";
const INVALID_FILE_TYPE: &str = "Invalid file type";
const INVALID_PART_NUMBER: &str = "Invalid part number";

/// Metadata values escape `%` too so the stored name decodes unambiguously.
const METADATA_VALUE: &AsciiSet = &CONTROLS.add(b'%');

/// S3 accepts part numbers 1 through 10,000.
const MAX_PART_NUMBER: i64 = 10_000;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("{0}")]
    Validation(String),
    #[error("upload `{0}` not found")]
    NotFound(String),
    #[error("upload `{0}` is already being finalized")]
    InProgress(String),
    #[error("{public}: {source}")]
    Backend {
        public: &'static str,
        source: GatewayError,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub type UploadResult<T> = Result<T, UploadError>;

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub key_prefix: String,
    pub allowed_content_types: Vec<String>,
    pub part_url_ttl: Duration,
    pub session_ttl: Duration,
}

impl UploadSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            key_prefix: cfg.key_prefix.clone(),
            allowed_content_types: cfg.allowed_content_types.clone(),
            part_url_ttl: cfg.part_url_ttl(),
            session_ttl: cfg.session_ttl(),
        }
    }

    fn accepts(&self, content_type: &str) -> bool {
        self.allowed_content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(content_type))
    }
}

#[derive(Clone)]
pub struct UploadService {
    gateway: Arc<dyn StorageGateway>,
    registry: Arc<dyn SessionRegistry>,
    settings: Arc<UploadSettings>,
    finalizing: Arc<DashSet<String>>,
}

impl UploadService {
    pub fn new(
        gateway: Arc<dyn StorageGateway>,
        registry: Arc<dyn SessionRegistry>,
        settings: UploadSettings,
    ) -> Self {
        Self {
            gateway,
            registry,
            settings: Arc::new(settings),
            finalizing: Arc::new(DashSet::new()),
        }
    }

    pub fn registry(&self) -> &Arc<dyn SessionRegistry> {
        &self.registry
    }

    /// Begin a multipart upload for `file_name` and record its session.
    pub async fn start_upload(
        &self,
        file_name: &str,
        content_type: &str,
    ) -> UploadResult<UploadSession> {
        let file_name = file_name.trim();
        let content_type = content_type.trim();
        if file_name.is_empty() || content_type.is_empty() {
            return Err(UploadError::Validation(MISSING_PARAMETERS.into()));
        }
        if !self.settings.accepts(content_type) {
            return Err(UploadError::Validation(INVALID_FILE_TYPE.into()));
        }

        let created_at = Utc::now();
        let key = object_key(&self.settings.key_prefix, file_name, created_at);

        let mut metadata = HashMap::new();
        metadata.insert(
            "original-file-name".to_string(),
            utf8_percent_encode(file_name, METADATA_VALUE).to_string(),
        );
        metadata.insert("uploaded-at".to_string(), created_at.to_rfc3339());

        let upload_id = self
            .gateway
            .begin_upload(&key, content_type, metadata)
            .await
            .map_err(|source| {
                error!(key = %key, error = %source, "Error starting multipart upload");
                UploadError::Backend {
                    public: "Failed to start upload",
                    source,
                }
            })?;

        let session = UploadSession::new(upload_id, key, file_name, content_type, created_at);
        self.registry
            .put(session.clone())
            .await
            .map_err(|err| registry_failure("store session", err))?;

        info!(
            upload_id = %session.upload_id,
            key = %session.object_key,
            "started multipart upload"
        );
        Ok(session)
    }

    /// Sign an upload URL for one part of a live session.
    pub async fn part_url(
        &self,
        upload_id: &str,
        part_number: Option<i64>,
    ) -> UploadResult<PresignedPart> {
        let upload_id = upload_id.trim();
        let Some(part_number) = part_number.filter(|_| !upload_id.is_empty()) else {
            return Err(UploadError::Validation(MISSING_PARAMETERS.into()));
        };
        if !(1..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(UploadError::Validation(INVALID_PART_NUMBER.into()));
        }

        let session = self
            .registry
            .get(upload_id)
            .await
            .map_err(|err| registry_failure("look up session", err))?
            .ok_or_else(|| UploadError::NotFound(upload_id.to_string()))?;

        let presigned = self
            .gateway
            .presign_part(
                &session.object_key,
                &session.upload_id,
                part_number as i32,
                self.settings.part_url_ttl,
            )
            .await
            .map_err(|source| {
                error!(upload_id, part_number, error = %source, "Error getting signed URL");
                UploadError::Backend {
                    public: "Failed to get signed URL",
                    source,
                }
            })?;

        debug!(upload_id, part_number, "issued part upload url");
        Ok(presigned)
    }

    /// Finalize a live session with the client's part list.
    ///
    /// The session is removed only once the backend accepts the parts. A
    /// completion that fails leaves it untouched for a retry, and a second
    /// finalize of the same id while one is running gets `InProgress`.
    pub async fn complete_upload(
        &self,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> UploadResult<UploadSession> {
        let upload_id = upload_id.trim();
        if upload_id.is_empty() || parts.is_empty() {
            return Err(UploadError::Validation(MISSING_PARAMETERS.into()));
        }

        let _guard = self.begin_finalize(upload_id)?;
        let session = self.live_session(upload_id).await?;

        if let Err(source) = self
            .gateway
            .complete_upload(&session.object_key, &session.upload_id, &parts)
            .await
        {
            error!(upload_id, error = %source, "Error completing upload");
            return Err(UploadError::Backend {
                public: "Failed to complete upload",
                source,
            });
        }

        self.forget(upload_id).await;
        info!(
            upload_id,
            key = %session.object_key,
            parts = parts.len(),
            "completed multipart upload"
        );
        Ok(session)
    }

    /// Abandon a live session and discard its parts at the backend.
    pub async fn abort_upload(&self, upload_id: &str) -> UploadResult<UploadSession> {
        let upload_id = upload_id.trim();
        if upload_id.is_empty() {
            return Err(UploadError::Validation(MISSING_PARAMETERS.into()));
        }

        let _guard = self.begin_finalize(upload_id)?;
        let session = self.live_session(upload_id).await?;

        if let Err(source) = self
            .gateway
            .abort_upload(&session.object_key, &session.upload_id)
            .await
        {
            error!(upload_id, error = %source, "Error aborting upload");
            return Err(UploadError::Backend {
                public: "Failed to abort upload",
                source,
            });
        }

        self.forget(upload_id).await;
        info!(upload_id, key = %session.object_key, "aborted multipart upload");
        Ok(session)
    }

    /// Evict and abort every session older than the configured session TTL.
    pub async fn sweep_expired(&self) -> UploadResult<usize> {
        let cutoff = chrono::Duration::from_std(self.settings.session_ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl));
        match cutoff {
            Some(cutoff) => self.sweep_started_before(cutoff).await,
            None => Ok(0),
        }
    }

    /// Evict and abort every session created before `cutoff`.
    ///
    /// A session whose backend abort fails is still evicted; the bucket's
    /// lifecycle rules are the last line for those parts.
    pub async fn sweep_started_before(&self, cutoff: DateTime<Utc>) -> UploadResult<usize> {
        let stale = self
            .registry
            .started_before(cutoff)
            .await
            .map_err(|err| registry_failure("list stale sessions", err))?;

        let mut swept = 0;
        for session in stale {
            // A client is finishing this one right now.
            let Ok(_guard) = self.begin_finalize(&session.upload_id) else {
                continue;
            };
            let removed = self
                .registry
                .delete(&session.upload_id)
                .await
                .map_err(|err| registry_failure("evict session", err))?;
            // Completed or aborted since the listing.
            if removed.is_none() {
                continue;
            }
            swept += 1;

            if let Err(err) = self
                .gateway
                .abort_upload(&session.object_key, &session.upload_id)
                .await
            {
                warn!(
                    upload_id = %session.upload_id,
                    error = %err,
                    "failed to abort expired upload"
                );
            }
        }

        if swept > 0 {
            info!(swept, cutoff = %cutoff, "swept expired upload sessions");
        }
        Ok(swept)
    }

    /// Mark `upload_id` as being finalized until the guard drops.
    fn begin_finalize(&self, upload_id: &str) -> UploadResult<FinalizeGuard> {
        if !self.finalizing.insert(upload_id.to_string()) {
            return Err(UploadError::InProgress(upload_id.to_string()));
        }
        Ok(FinalizeGuard {
            finalizing: Arc::clone(&self.finalizing),
            upload_id: upload_id.to_string(),
        })
    }

    async fn live_session(&self, upload_id: &str) -> UploadResult<UploadSession> {
        self.registry
            .get(upload_id)
            .await
            .map_err(|err| registry_failure("look up session", err))?
            .ok_or_else(|| UploadError::NotFound(upload_id.to_string()))
    }

    /// Drop a session the backend has already finalized.
    ///
    /// The backend outcome stands even if the registry write fails; the
    /// leftover session is evicted by the next sweep.
    async fn forget(&self, upload_id: &str) {
        if let Err(err) = self.registry.delete(upload_id).await {
            error!(upload_id, error = %err, "failed to drop finalized upload session");
        }
    }
}

/// Clears the in-flight marker when a finalize ends, including on cancellation.
struct FinalizeGuard {
    finalizing: Arc<DashSet<String>>,
    upload_id: String,
}

impl Drop for FinalizeGuard {
    fn drop(&mut self) {
        self.finalizing.remove(&self.upload_id);
    }
}

fn registry_failure(action: &str, err: RegistryError) -> UploadError {
    error!(error = %err, "session registry failed to {}", action);
    UploadError::Registry(err)
}

/// Build the storage key for a new upload:
/// `<prefix>/<unix millis>-<random token>-<safe file name>`.
pub fn object_key(prefix: &str, file_name: &str, at: DateTime<Utc>) -> String {
    let token = Uuid::new_v4().simple().to_string();
    let name = format!(
        "{}-{}-{}",
        at.timestamp_millis(),
        &token[..8],
        safe_file_name(file_name)
    );
    if prefix.is_empty() {
        name
    } else {
        format!("{prefix}/{name}")
    }
}

/// Reduce a client file name to a single key segment of `[A-Za-z0-9._-]`.
fn safe_file_name(file_name: &str) -> String {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        gateway::testing::{Call, MockGateway},
        session_registry::InMemorySessionRegistry,
    };
    use std::collections::HashSet;

    struct Harness {
        service: UploadService,
        gateway: Arc<MockGateway>,
        registry: Arc<InMemorySessionRegistry>,
    }

    fn harness() -> Harness {
        let gateway = Arc::new(MockGateway::new());
        let registry = Arc::new(InMemorySessionRegistry::new());
        let settings = UploadSettings {
            key_prefix: "uploads".into(),
            allowed_content_types: vec!["image/png".into(), "video/mp4".into()],
            part_url_ttl: Duration::from_secs(3600),
            session_ttl: Duration::from_secs(3600),
        };
        let service = UploadService::new(gateway.clone(), registry.clone(), settings);
        Harness {
            service,
            gateway,
            registry,
        }
    }

    fn part(n: i32, etag: &str) -> CompletedPart {
        CompletedPart {
            part_number: n,
            e_tag: etag.into(),
        }
    }

    #[tokio::test]
    async fn start_registers_session_under_backend_id() {
        let h = harness();
        let session = h.service.start_upload("cat.png", "image/png").await.unwrap();

        assert_eq!(session.upload_id, "U1");
        assert!(session.object_key.starts_with("uploads/"));
        assert!(session.object_key.ends_with("-cat.png"));
        assert_eq!(h.registry.get("U1").await.unwrap(), Some(session.clone()));

        match &h.gateway.calls()[0] {
            Call::Begin {
                key,
                content_type,
                metadata,
            } => {
                assert_eq!(key, &session.object_key);
                assert_eq!(content_type, "image/png");
                assert_eq!(metadata["original-file-name"], "cat.png");
                assert!(metadata.contains_key("uploaded-at"));
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[tokio::test]
    async fn original_name_metadata_escapes_percent() {
        let h = harness();
        h.service.start_upload("100%.png", "image/png").await.unwrap();
        h.service.start_upload("100%25.png", "image/png").await.unwrap();

        let names: Vec<_> = h
            .gateway
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Begin { metadata, .. } => Some(metadata["original-file-name"].clone()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["100%25.png", "100%2525.png"]);
    }

    #[tokio::test]
    async fn start_rejects_unlisted_type_without_side_effects() {
        let h = harness();
        let err = h
            .service
            .start_upload("evil.exe", "application/x-msdownload")
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Validation(ref m) if m == "Invalid file type"));
        assert!(h.gateway.calls().is_empty());
        assert_eq!(h.registry.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn start_requires_name_and_type() {
        let h = harness();
        for (name, ty) in [("", "image/png"), ("cat.png", ""), ("  ", " ")] {
            let err = h.service.start_upload(name, ty).await.unwrap_err();
            assert!(
                matches!(err, UploadError::Validation(ref m) if m == "Missing required parameters")
            );
        }
        assert!(h.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn start_backend_failure_creates_no_session() {
        let h = harness();
        h.gateway.set_failing(true);

        let err = h.service.start_upload("cat.png", "image/png").await.unwrap_err();
        assert!(matches!(
            err,
            UploadError::Backend {
                public: "Failed to start upload",
                ..
            }
        ));
        assert_eq!(h.registry.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn part_url_for_unknown_upload_is_not_found_without_backend_call() {
        let h = harness();
        let err = h
            .service
            .part_url("does-not-exist", Some(1))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::NotFound(ref id) if id == "does-not-exist"));
        assert!(h.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn part_url_uses_session_key_and_configured_ttl() {
        let h = harness();
        let session = h.service.start_upload("cat.png", "image/png").await.unwrap();

        let before = Utc::now();
        let presigned = h.service.part_url("U1", Some(3)).await.unwrap();
        let after = Utc::now();

        assert!(presigned.url.contains(&session.object_key));
        assert!(presigned.expires_at >= before + chrono::Duration::seconds(3600));
        assert!(presigned.expires_at <= after + chrono::Duration::seconds(3600));

        assert_eq!(
            h.gateway.calls()[1],
            Call::Presign {
                key: session.object_key.clone(),
                upload_id: "U1".into(),
                part_number: 3,
                ttl: Duration::from_secs(3600),
            }
        );
        // Read-only with respect to the registry.
        assert_eq!(h.registry.get("U1").await.unwrap(), Some(session));
    }

    #[tokio::test]
    async fn part_url_validates_inputs() {
        let h = harness();
        h.service.start_upload("cat.png", "image/png").await.unwrap();

        for n in [0, -1, 10_001] {
            let err = h.service.part_url("U1", Some(n)).await.unwrap_err();
            assert!(matches!(err, UploadError::Validation(ref m) if m == "Invalid part number"));
        }
        let err = h.service.part_url("U1", None).await.unwrap_err();
        assert!(matches!(err, UploadError::Validation(_)));
        let err = h.service.part_url("", Some(1)).await.unwrap_err();
        assert!(matches!(err, UploadError::Validation(_)));
        assert_eq!(h.gateway.calls().len(), 1);
    }

    #[tokio::test]
    async fn second_completion_short_circuits_at_not_found() {
        let h = harness();
        h.service.start_upload("cat.png", "image/png").await.unwrap();

        h.service
            .complete_upload("U1", vec![part(1, "abc")])
            .await
            .unwrap();
        let err = h
            .service
            .complete_upload("U1", vec![part(1, "abc")])
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::NotFound(_)));
        assert_eq!(h.gateway.complete_calls(), 1);
        assert!(h.registry.get("U1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_completions_reach_backend_once() {
        let h = harness();
        h.service.start_upload("cat.png", "image/png").await.unwrap();

        let a = h.service.clone();
        let b = h.service.clone();
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.complete_upload("U1", vec![part(1, "abc")]).await }),
            tokio::spawn(async move { b.complete_upload("U1", vec![part(1, "abc")]).await }),
        );
        let results = [ra.unwrap(), rb.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(UploadError::NotFound(_)) | Err(UploadError::InProgress(_))
        )));
        assert_eq!(h.gateway.complete_calls(), 1);
    }

    #[tokio::test]
    async fn session_stays_live_while_failing_completion_runs() {
        let h = harness();
        let session = h.service.start_upload("cat.png", "image/png").await.unwrap();
        h.gateway.set_finalize_delay(Duration::from_millis(200));
        h.gateway.set_failing_finalize(true);

        let completing = {
            let service = h.service.clone();
            tokio::spawn(async move { service.complete_upload("U1", vec![part(1, "bad")]).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(h.service.part_url("U1", Some(2)).await.is_ok());
        assert_eq!(h.registry.get("U1").await.unwrap(), Some(session.clone()));

        let err = completing.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            UploadError::Backend {
                public: "Failed to complete upload",
                ..
            }
        ));

        assert!(h.service.part_url("U1", Some(2)).await.is_ok());
        assert_eq!(h.registry.get("U1").await.unwrap(), Some(session));
    }

    #[tokio::test]
    async fn second_finalize_during_completion_is_in_progress() {
        let h = harness();
        h.service.start_upload("cat.png", "image/png").await.unwrap();
        h.gateway.set_finalize_delay(Duration::from_millis(200));

        let completing = {
            let service = h.service.clone();
            tokio::spawn(async move { service.complete_upload("U1", vec![part(1, "abc")]).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(h.service.part_url("U1", Some(2)).await.is_ok());
        let err = h
            .service
            .complete_upload("U1", vec![part(1, "abc")])
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InProgress(ref id) if id == "U1"));
        let err = h.service.abort_upload("U1").await.unwrap_err();
        assert!(matches!(err, UploadError::InProgress(_)));

        completing.await.unwrap().unwrap();
        assert_eq!(h.gateway.complete_calls(), 1);
        assert!(h.registry.get("U1").await.unwrap().is_none());
        assert!(matches!(
            h.service.complete_upload("U1", vec![part(1, "abc")]).await,
            Err(UploadError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn failed_abort_keeps_session() {
        let h = harness();
        let session = h.service.start_upload("cat.png", "image/png").await.unwrap();
        h.gateway.set_failing(true);

        let err = h.service.abort_upload("U1").await.unwrap_err();
        assert!(matches!(
            err,
            UploadError::Backend {
                public: "Failed to abort upload",
                ..
            }
        ));
        assert_eq!(h.registry.get("U1").await.unwrap(), Some(session));
    }

    #[tokio::test]
    async fn failed_completion_keeps_session_for_retry() {
        let h = harness();
        let session = h.service.start_upload("cat.png", "image/png").await.unwrap();

        h.gateway.set_failing(true);
        let err = h
            .service
            .complete_upload("U1", vec![part(1, "wrong")])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UploadError::Backend {
                public: "Failed to complete upload",
                ..
            }
        ));
        assert_eq!(h.registry.get("U1").await.unwrap(), Some(session.clone()));

        h.gateway.set_failing(false);
        let done = h
            .service
            .complete_upload("U1", vec![part(1, "abc")])
            .await
            .unwrap();
        assert_eq!(done.object_key, session.object_key);
        assert!(h.registry.get("U1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn complete_requires_parts() {
        let h = harness();
        h.service.start_upload("cat.png", "image/png").await.unwrap();

        let err = h.service.complete_upload("U1", vec![]).await.unwrap_err();
        assert!(matches!(err, UploadError::Validation(_)));
        assert!(h.registry.get("U1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn end_to_end_cat_png() {
        let h = harness();
        let session = h.service.start_upload("cat.png", "image/png").await.unwrap();
        let upload_id = session.upload_id.clone();

        let presigned = h.service.part_url(&upload_id, Some(1)).await.unwrap();
        assert!(presigned.url.contains("cat.png"));

        let done = h
            .service
            .complete_upload(&upload_id, vec![part(1, "abc")])
            .await
            .unwrap();
        assert_eq!(done.object_key, session.object_key);

        assert_eq!(
            h.gateway.calls().last(),
            Some(&Call::Complete {
                key: session.object_key.clone(),
                upload_id: upload_id.clone(),
                parts: vec![part(1, "abc")],
            })
        );
        assert!(h.registry.get(&upload_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_starts_with_same_name_get_distinct_keys() {
        let h = harness();
        let a = h.service.clone();
        let b = h.service.clone();
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.start_upload("cat.png", "image/png").await }),
            tokio::spawn(async move { b.start_upload("cat.png", "image/png").await }),
        );
        let (sa, sb) = (ra.unwrap().unwrap(), rb.unwrap().unwrap());

        assert_ne!(sa.upload_id, sb.upload_id);
        assert_ne!(sa.object_key, sb.object_key);
        assert_eq!(h.registry.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn abort_removes_session_and_discards_parts() {
        let h = harness();
        let session = h.service.start_upload("cat.png", "image/png").await.unwrap();

        let aborted = h.service.abort_upload("U1").await.unwrap();
        assert_eq!(aborted, session);
        assert_eq!(
            h.gateway.calls().last(),
            Some(&Call::Abort {
                key: session.object_key.clone(),
                upload_id: "U1".into(),
            })
        );

        let err = h.service.abort_upload("U1").await.unwrap_err();
        assert!(matches!(err, UploadError::NotFound(_)));
    }

    #[tokio::test]
    async fn sweep_evicts_only_stale_sessions() {
        let h = harness();
        let old = UploadSession::new(
            "OLD",
            "uploads/1-aaaa-old.png",
            "old.png",
            "image/png",
            Utc::now() - chrono::Duration::hours(3),
        );
        h.registry.put(old.clone()).await.unwrap();
        h.service.start_upload("cat.png", "image/png").await.unwrap();

        let swept = h.service.sweep_expired().await.unwrap();

        assert_eq!(swept, 1);
        assert!(h.registry.get("OLD").await.unwrap().is_none());
        assert!(h.registry.get("U1").await.unwrap().is_some());
        assert!(h.gateway.calls().contains(&Call::Abort {
            key: old.object_key,
            upload_id: "OLD".into(),
        }));
    }

    #[tokio::test]
    async fn sweep_skips_session_being_finalized() {
        let h = harness();
        h.registry
            .put(UploadSession::new(
                "OLD",
                "uploads/1-aaaa-old.png",
                "old.png",
                "image/png",
                Utc::now() - chrono::Duration::days(2),
            ))
            .await
            .unwrap();

        let _guard = h.service.begin_finalize("OLD").unwrap();
        assert_eq!(h.service.sweep_expired().await.unwrap(), 0);
        assert!(h.registry.get("OLD").await.unwrap().is_some());
        assert!(h.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn sweep_evicts_even_when_backend_abort_fails() {
        let h = harness();
        h.registry
            .put(UploadSession::new(
                "OLD",
                "uploads/1-aaaa-old.png",
                "old.png",
                "image/png",
                Utc::now() - chrono::Duration::days(2),
            ))
            .await
            .unwrap();
        h.gateway.set_failing(true);

        assert_eq!(h.service.sweep_expired().await.unwrap(), 1);
        assert_eq!(h.registry.count().await.unwrap(), 0);
    }

    #[test]
    fn object_keys_are_unique_and_path_safe() {
        let now = Utc::now();
        let keys: HashSet<_> = (0..100)
            .map(|_| object_key("uploads", "cat.png", now))
            .collect();
        assert_eq!(keys.len(), 100);

        let key = object_key("uploads", "../../etc/pass wd", now);
        assert!(key.starts_with(&format!("uploads/{}-", now.timestamp_millis())));
        assert!(key.ends_with("-pass_wd"));
        assert!(!key.contains(".."));

        assert!(object_key("", "cat.png", now).ends_with("-cat.png"));
    }

    #[test]
    fn safe_file_name_falls_back_for_empty_names() {
        assert_eq!(safe_file_name("dir/"), "file");
        assert_eq!(safe_file_name("..."), "file");
        assert_eq!(safe_file_name(r"C:\photos\cat.png"), "cat.png");
        assert_eq!(safe_file_name("café.png"), "caf_.png");
    }
}
