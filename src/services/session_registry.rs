//! Session Registry: where in-flight upload sessions live between API calls.
//!
//! The orchestrator depends on the [`SessionRegistry`] trait only, so the
//! in-process [`InMemorySessionRegistry`] can be swapped for the SQLite-backed
//! store (see `sqlite_registry`) without touching request handling.

use crate::models::session::UploadSession;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("upload `{0}` is already registered")]
    DuplicateUpload(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Insert a new session. Fails if the upload id is already present.
    async fn put(&self, session: UploadSession) -> RegistryResult<()>;

    async fn get(&self, upload_id: &str) -> RegistryResult<Option<UploadSession>>;

    /// Remove a session, returning it if it was present.
    async fn delete(&self, upload_id: &str) -> RegistryResult<Option<UploadSession>>;

    /// Sessions created strictly before `cutoff`.
    async fn started_before(&self, cutoff: DateTime<Utc>) -> RegistryResult<Vec<UploadSession>>;

    async fn count(&self) -> RegistryResult<usize>;

    /// Cheap reachability check for readiness probes.
    async fn ping(&self) -> RegistryResult<()> {
        Ok(())
    }
}

/// Process-local registry. Sessions are lost on restart.
///
/// All operations go through `DashMap` shard locks that are released before
/// returning, so nothing is held across an await point.
#[derive(Debug, Default)]
pub struct InMemorySessionRegistry {
    sessions: DashMap<String, UploadSession>,
}

impl InMemorySessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRegistry for InMemorySessionRegistry {
    async fn put(&self, session: UploadSession) -> RegistryResult<()> {
        match self.sessions.entry(session.upload_id.clone()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateUpload(session.upload_id)),
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(())
            }
        }
    }

    async fn get(&self, upload_id: &str) -> RegistryResult<Option<UploadSession>> {
        Ok(self.sessions.get(upload_id).map(|s| s.value().clone()))
    }

    async fn delete(&self, upload_id: &str) -> RegistryResult<Option<UploadSession>> {
        Ok(self.sessions.remove(upload_id).map(|(_, s)| s))
    }

    async fn started_before(&self, cutoff: DateTime<Utc>) -> RegistryResult<Vec<UploadSession>> {
        Ok(self
            .sessions
            .iter()
            .filter(|entry| entry.value().started_before(cutoff))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn count(&self) -> RegistryResult<usize> {
        Ok(self.sessions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    fn session(id: &str, created_at: DateTime<Utc>) -> UploadSession {
        UploadSession::new(id, format!("uploads/1-{id}-cat.png"), "cat.png", "image/png", created_at)
    }

    #[tokio::test]
    async fn put_get_delete() {
        let registry = InMemorySessionRegistry::new();
        let s = session("U1", Utc::now());

        registry.put(s.clone()).await.unwrap();
        assert_eq!(registry.get("U1").await.unwrap(), Some(s.clone()));
        assert_eq!(registry.count().await.unwrap(), 1);

        assert_eq!(registry.delete("U1").await.unwrap(), Some(s));
        assert!(registry.get("U1").await.unwrap().is_none());
        assert!(registry.delete("U1").await.unwrap().is_none());
        assert_eq!(registry.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_put_is_rejected_and_keeps_original() {
        let registry = InMemorySessionRegistry::new();
        let original = session("U1", Utc::now());
        registry.put(original.clone()).await.unwrap();

        let mut other = session("U1", Utc::now());
        other.object_key = "uploads/other".into();
        let err = registry.put(other).await.unwrap_err();

        assert!(matches!(err, RegistryError::DuplicateUpload(id) if id == "U1"));
        assert_eq!(registry.get("U1").await.unwrap(), Some(original));
    }

    #[tokio::test]
    async fn started_before_filters_by_creation_time() {
        let registry = InMemorySessionRegistry::new();
        let now = Utc::now();
        registry.put(session("old", now - Duration::hours(2))).await.unwrap();
        registry.put(session("new", now)).await.unwrap();

        let stale = registry.started_before(now - Duration::hours(1)).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].upload_id, "old");
    }

    #[tokio::test]
    async fn concurrent_inserts_and_deletes() {
        let registry = Arc::new(InMemorySessionRegistry::new());
        let mut handles = Vec::new();
        for i in 0..64 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let id = format!("U{i}");
                registry.put(session(&id, Utc::now())).await.unwrap();
                if i % 2 == 0 {
                    registry.delete(&id).await.unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(registry.count().await.unwrap(), 32);
    }
}
