//! Capability interface to the remote object store.
//!
//! The orchestrator only talks to storage through [`StorageGateway`]; the S3
//! implementation lives in `s3_gateway` and tests use [`testing::MockGateway`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{collections::HashMap, time::Duration};
use thiserror::Error;

/// A part reference sent to the backend when finalizing an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: i32,
    pub e_tag: String,
}

/// A pre-signed part upload URL and the instant it stops being valid.
#[derive(Debug, Clone)]
pub struct PresignedPart {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{operation} failed: {message}")]
    Backend {
        operation: &'static str,
        message: String,
    },
    #[error("backend did not return an upload id")]
    MissingUploadId,
    #[error("invalid presign expiry: {0}")]
    InvalidExpiry(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Start a multipart upload for `key` and return the backend upload id.
    async fn begin_upload(
        &self,
        key: &str,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> GatewayResult<String>;

    /// Produce a URL that authorizes uploading one part for `ttl`.
    async fn presign_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        ttl: Duration,
    ) -> GatewayResult<PresignedPart>;

    /// Assemble the uploaded parts into the final object.
    async fn complete_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> GatewayResult<()>;

    /// Discard an upload and any parts stored for it.
    async fn abort_upload(&self, key: &str, upload_id: &str) -> GatewayResult<()>;
}
