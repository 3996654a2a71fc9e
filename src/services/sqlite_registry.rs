//! SQLite-backed `SessionRegistry` so in-flight uploads survive a restart.

use crate::{
    models::session::UploadSession,
    services::session_registry::{RegistryError, RegistryResult, SessionRegistry},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Clone, Debug)]
pub struct SqliteSessionRegistry {
    db: Arc<SqlitePool>,
}

impl SqliteSessionRegistry {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema. Safe to run repeatedly.
    pub async fn migrate(&self) -> RegistryResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} migration statements...", statements.len());

        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl SessionRegistry for SqliteSessionRegistry {
    async fn put(&self, session: UploadSession) -> RegistryResult<()> {
        let result = sqlx::query(
            "INSERT INTO upload_sessions (upload_id, object_key, file_name, content_type, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&session.upload_id)
        .bind(&session.object_key)
        .bind(&session.file_name)
        .bind(&session.content_type)
        .bind(session.created_at)
        .execute(&*self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                Err(RegistryError::DuplicateUpload(session.upload_id))
            }
            Err(err) => Err(RegistryError::Sqlx(err)),
        }
    }

    async fn get(&self, upload_id: &str) -> RegistryResult<Option<UploadSession>> {
        let session = sqlx::query_as::<_, UploadSession>(
            "SELECT upload_id, object_key, file_name, content_type, created_at
             FROM upload_sessions WHERE upload_id = ?",
        )
        .bind(upload_id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(session)
    }

    async fn delete(&self, upload_id: &str) -> RegistryResult<Option<UploadSession>> {
        let session = sqlx::query_as::<_, UploadSession>(
            "DELETE FROM upload_sessions WHERE upload_id = ?
             RETURNING upload_id, object_key, file_name, content_type, created_at",
        )
        .bind(upload_id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(session)
    }

    async fn started_before(&self, cutoff: DateTime<Utc>) -> RegistryResult<Vec<UploadSession>> {
        let sessions = sqlx::query_as::<_, UploadSession>(
            "SELECT upload_id, object_key, file_name, content_type, created_at
             FROM upload_sessions
             WHERE julianday(created_at) < julianday(?)
             ORDER BY created_at ASC",
        )
        .bind(cutoff)
        .fetch_all(&*self.db)
        .await?;
        Ok(sessions)
    }

    async fn count(&self) -> RegistryResult<usize> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM upload_sessions")
            .fetch_one(&*self.db)
            .await?;
        Ok(count.max(0) as usize)
    }

    async fn ping(&self) -> RegistryResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
