//! JSON request and response bodies of the upload API.
//!
//! Request fields are optional at the serde level so that a missing field is
//! reported as a validation error by the service instead of a generic
//! deserialization failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::services::gateway::CompletedPart;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartUploadRequest {
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartUploadResponse {
    pub upload_id: String,
    pub start_date_time: DateTime<Utc>,
}

/// Body of `POST /get-upload-url`.
///
/// Clients may still send `fileName`; it is ignored because the object key
/// always comes from the session.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartUrlRequest {
    #[serde(default)]
    pub part_number: Option<i64>,
    #[serde(default)]
    pub upload_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartUrlResponse {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// One uploaded part as echoed back by the client.
#[derive(Debug, Clone, Deserialize)]
pub struct PartInput {
    #[serde(rename = "ETag", alias = "eTag", alias = "etag")]
    pub e_tag: String,
    #[serde(rename = "PartNumber", alias = "partNumber")]
    pub part_number: i32,
}

impl From<PartInput> for CompletedPart {
    fn from(part: PartInput) -> Self {
        CompletedPart {
            part_number: part.part_number,
            e_tag: part.e_tag,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadRequest {
    #[serde(default)]
    pub upload_id: Option<String>,
    #[serde(default)]
    pub parts: Vec<PartInput>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadResponse {
    pub message: &'static str,
    pub end_date_time: DateTime<Utc>,
    pub key: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortUploadRequest {
    #[serde(default)]
    pub upload_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortUploadResponse {
    pub message: &'static str,
    pub key: String,
}
