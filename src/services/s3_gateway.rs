//! `StorageGateway` backed by Amazon S3 (or any S3-compatible endpoint).
//!
//! The SDK client is built once at startup. Credentials come either from the
//! static keys in `AppConfig` or from the default AWS provider chain, and the
//! SDK's standard retry policy is capped at `max_attempts`.

use crate::{
    config::AppConfig,
    services::gateway::{
        CompletedPart, GatewayError, GatewayResult, PresignedPart, StorageGateway,
    },
};
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, retry::RetryConfig},
    error::DisplayErrorContext,
    presigning::PresigningConfig,
    types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart},
};
use chrono::Utc;
use std::{collections::HashMap, time::{Duration, SystemTime}};
use tracing::debug;

#[derive(Clone, Debug)]
pub struct S3Gateway {
    client: Client,
    bucket: String,
}

impl S3Gateway {
    /// Wrap an already configured SDK client.
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Resolve region, credentials, endpoint and retry policy from `cfg`.
    pub async fn from_config(cfg: &AppConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .retry_config(RetryConfig::standard().with_max_attempts(cfg.max_attempts));

        if let Some(endpoint) = &cfg.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(key_id), Some(secret)) = (&cfg.access_key_id, &cfg.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                key_id,
                secret,
                None,
                None,
                "upload-gateway-config",
            ));
        }

        let shared = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(cfg.force_path_style)
            .build();

        Self::new(Client::from_conf(s3_config), cfg.bucket.clone())
    }
}

fn backend_error(operation: &'static str, err: impl std::error::Error) -> GatewayError {
    GatewayError::Backend {
        operation,
        message: DisplayErrorContext(err).to_string(),
    }
}

#[async_trait]
impl StorageGateway for S3Gateway {
    async fn begin_upload(
        &self,
        key: &str,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> GatewayResult<String> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .set_metadata(Some(metadata))
            .send()
            .await
            .map_err(|err| backend_error("CreateMultipartUpload", err))?;

        let upload_id = output
            .upload_id()
            .map(str::to_string)
            .ok_or(GatewayError::MissingUploadId)?;
        debug!(bucket = %self.bucket, key, upload_id, "created multipart upload");
        Ok(upload_id)
    }

    async fn presign_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        ttl: Duration,
    ) -> GatewayResult<PresignedPart> {
        let issued_at = Utc::now();
        let presigning = PresigningConfig::builder()
            .start_time(SystemTime::from(issued_at))
            .expires_in(ttl)
            .build()
            .map_err(|err| GatewayError::InvalidExpiry(err.to_string()))?;
        let expires_at = issued_at
            + chrono::Duration::from_std(ttl)
                .map_err(|err| GatewayError::InvalidExpiry(err.to_string()))?;

        let request = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .presigned(presigning)
            .await
            .map_err(|err| backend_error("UploadPart presign", err))?;

        Ok(PresignedPart {
            url: request.uri().to_string(),
            expires_at,
        })
    }

    async fn complete_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> GatewayResult<()> {
        let parts = parts
            .iter()
            .map(|p| {
                S3CompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(&p.e_tag)
                    .build()
            })
            .collect::<Vec<_>>();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|err| backend_error("CompleteMultipartUpload", err))?;

        debug!(bucket = %self.bucket, key, upload_id, "completed multipart upload");
        Ok(())
    }

    async fn abort_upload(&self, key: &str, upload_id: &str) -> GatewayResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|err| backend_error("AbortMultipartUpload", err))?;

        debug!(bucket = %self.bucket, key, upload_id, "aborted multipart upload");
        Ok(())
    }
}
