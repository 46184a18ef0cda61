//! External collaborators the orchestrator calls at stage boundaries.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::models::job::{Job, StyleId};

/// Persisted outcome of a job, keyed by the remote job id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestyleRecord {
    pub job_id: String,
    pub original_url: Option<String>,
    pub empty_url: Option<String>,
    pub styled_url: Option<String>,
    pub style_id: Option<StyleId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RestyleRecord {
    /// Build a record from a job snapshot. Returns `None` before upload.
    pub fn from_job(job: &Job) -> Option<Self> {
        let now = Utc::now();
        Some(Self {
            job_id: job.job_id.clone()?,
            original_url: job.original_url.clone(),
            empty_url: job.first_stage_result_url.clone(),
            styled_url: job.second_stage_result_url.clone(),
            style_id: job.selected_style.clone(),
            created_at: now,
            updated_at: now,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("No record for job {0}")]
    NotFound(String),

    #[error("Invalid stored value: {0}")]
    Invalid(String),
}

/// Local persistence of job outcomes.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn save(&self, record: &RestyleRecord) -> Result<(), StoreError>;

    async fn load(&self, job_id: &str) -> Result<Option<RestyleRecord>, StoreError>;

    async fn update(&self, record: &RestyleRecord) -> Result<(), StoreError>;

    async fn delete(&self, job_id: &str) -> Result<(), StoreError>;
}

/// User-visible completion signal.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn job_completed(&self, job: &Job);
}

/// [`ResultStore`] kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    records: RwLock<HashMap<String, RestyleRecord>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn save(&self, record: &RestyleRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(record.job_id.clone(), record.clone());
        Ok(())
    }

    async fn load(&self, job_id: &str) -> Result<Option<RestyleRecord>, StoreError> {
        Ok(self.records.read().await.get(job_id).cloned())
    }

    async fn update(&self, record: &RestyleRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let existing = records
            .get_mut(&record.job_id)
            .ok_or_else(|| StoreError::NotFound(record.job_id.clone()))?;

        *existing = RestyleRecord {
            created_at: existing.created_at,
            updated_at: Utc::now(),
            ..record.clone()
        };
        Ok(())
    }

    async fn delete(&self, job_id: &str) -> Result<(), StoreError> {
        self.records.write().await.remove(job_id);
        Ok(())
    }
}

/// [`Notifier`] that writes the completion to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn job_completed(&self, job: &Job) {
        tracing::info!(
            job_id = job.job_id.as_deref().unwrap_or_default(),
            styled_url = job.second_stage_result_url.as_deref().unwrap_or_default(),
            "Restyled room is ready"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(job_id: &str) -> RestyleRecord {
        let job = Job {
            job_id: Some(job_id.to_string()),
            first_stage_result_url: Some("https://cdn/empty.jpg".to_string()),
            ..Default::default()
        };
        RestyleRecord::from_job(&job).unwrap()
    }

    #[test]
    fn no_record_before_upload() {
        assert!(RestyleRecord::from_job(&Job::default()).is_none());
    }

    #[tokio::test]
    async fn save_load_update_delete() {
        let store = MemoryResultStore::new();
        let saved = record("J1");
        store.save(&saved).await.unwrap();

        let loaded = store.load("J1").await.unwrap().unwrap();
        assert_eq!(loaded.empty_url.as_deref(), Some("https://cdn/empty.jpg"));

        let finished = RestyleRecord {
            styled_url: Some("https://cdn/final.jpg".to_string()),
            ..saved.clone()
        };
        store.update(&finished).await.unwrap();
        let loaded = store.load("J1").await.unwrap().unwrap();
        assert_eq!(loaded.styled_url.as_deref(), Some("https://cdn/final.jpg"));
        assert_eq!(loaded.created_at, saved.created_at);

        store.delete("J1").await.unwrap();
        assert!(store.load("J1").await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn update_of_unknown_record_fails() {
        let store = MemoryResultStore::new();
        let result = store.update(&record("missing")).await;
        assert!(matches!(result, Err(StoreError::NotFound(id)) if id == "missing"));
    }
}
