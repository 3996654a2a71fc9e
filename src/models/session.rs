//! Represents an in-flight multipart upload tracked between API calls.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// A multipart upload session, created when an upload is started and removed
/// when it is completed, aborted or swept.
#[derive(Clone, FromRow, Debug, PartialEq, Eq)]
pub struct UploadSession {
    /// Upload identifier issued by the storage backend.
    pub upload_id: String,

    /// Storage key every part and the final object are written to.
    /// Fixed when the session is created.
    pub object_key: String,

    /// File name as supplied by the client. Metadata only, never used as a path.
    pub file_name: String,

    /// Declared MIME type of the object.
    pub content_type: String,

    /// When the upload was started.
    pub created_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn new(
        upload_id: impl Into<String>,
        object_key: impl Into<String>,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            upload_id: upload_id.into(),
            object_key: object_key.into(),
            file_name: file_name.into(),
            content_type: content_type.into(),
            created_at,
        }
    }

    /// True when the session was created strictly before `cutoff`.
    pub fn started_before(&self, cutoff: DateTime<Utc>) -> bool {
        self.created_at < cutoff
    }
}
