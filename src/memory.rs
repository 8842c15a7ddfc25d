//! In-process host store.
//!
//! Implements `JobStore` and `RemoteMappingStore` over plain collections
//! behind a mutex. Suitable for embedding the gateway in small tools and for
//! tests; a real host plugs in its own persistence.

use crate::host::{
    Job, JobId, JobItem, JobItemId, JobItemState, JobStore, MessageLevel, RemoteMapping,
    RemoteMappingStore, TranslatedData,
};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Unprocessed,
    Submitted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub level: MessageLevel,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    jobs: BTreeMap<JobId, Job>,
    statuses: BTreeMap<JobId, JobStatus>,
    job_messages: BTreeMap<JobId, Vec<Message>>,
    item_messages: BTreeMap<JobItemId, Vec<Message>>,
    translations: BTreeMap<JobItemId, TranslatedData>,
    mappings: Vec<RemoteMapping>,
}

#[derive(Clone, Default)]
pub struct InMemoryHost {
    state: Arc<Mutex<State>>,
}

impl InMemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("In-memory host state lock poisoned"))
    }

    /// Register a job (and its items) as unprocessed.
    pub fn insert_job(&self, job: Job) -> Result<()> {
        let mut state = self.lock()?;
        state.statuses.insert(job.id, JobStatus::Unprocessed);
        state.jobs.insert(job.id, job);
        Ok(())
    }

    pub fn job_status(&self, id: JobId) -> Result<Option<JobStatus>> {
        Ok(self.lock()?.statuses.get(&id).copied())
    }

    pub fn job_messages(&self, id: JobId) -> Result<Vec<Message>> {
        Ok(self.lock()?.job_messages.get(&id).cloned().unwrap_or_default())
    }

    pub fn item_messages(&self, id: JobItemId) -> Result<Vec<Message>> {
        Ok(self
            .lock()?
            .item_messages
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    pub fn translation(&self, id: JobItemId) -> Result<Option<TranslatedData>> {
        Ok(self.lock()?.translations.get(&id).cloned())
    }

    pub fn mappings(&self) -> Result<Vec<RemoteMapping>> {
        Ok(self.lock()?.mappings.clone())
    }

    fn item_mut<'a>(state: &'a mut State, id: JobItemId) -> Option<&'a mut JobItem> {
        state
            .jobs
            .values_mut()
            .flat_map(|job| job.items.iter_mut())
            .find(|item| item.id == id)
    }
}

fn message(level: MessageLevel, text: &str) -> Message {
    Message {
        level,
        text: text.to_string(),
        created_at: Utc::now(),
    }
}

#[async_trait]
impl JobStore for InMemoryHost {
    async fn load_job(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.lock()?.jobs.get(&id).cloned())
    }

    async fn load_item(&self, id: JobItemId) -> Result<Option<JobItem>> {
        let mut state = self.lock()?;
        Ok(Self::item_mut(&mut state, id).map(|item| item.clone()))
    }

    async fn add_item_message(
        &self,
        id: JobItemId,
        level: MessageLevel,
        text: &str,
    ) -> Result<()> {
        self.lock()?
            .item_messages
            .entry(id)
            .or_default()
            .push(message(level, text));
        Ok(())
    }

    async fn add_job_message(&self, id: JobId, level: MessageLevel, text: &str) -> Result<()> {
        self.lock()?
            .job_messages
            .entry(id)
            .or_default()
            .push(message(level, text));
        Ok(())
    }

    async fn mark_submitted(&self, id: JobId, text: &str) -> Result<()> {
        let mut state = self.lock()?;
        if !state.jobs.contains_key(&id) {
            bail!("Unknown job {}", id);
        }
        state.statuses.insert(id, JobStatus::Submitted);
        state
            .job_messages
            .entry(id)
            .or_default()
            .push(message(MessageLevel::Status, text));
        Ok(())
    }

    async fn mark_rejected(&self, id: JobId, text: &str) -> Result<()> {
        let mut state = self.lock()?;
        if !state.jobs.contains_key(&id) {
            bail!("Unknown job {}", id);
        }
        state.statuses.insert(id, JobStatus::Rejected);
        state
            .job_messages
            .entry(id)
            .or_default()
            .push(message(MessageLevel::Error, text));
        Ok(())
    }

    async fn add_translated_data(&self, id: JobItemId, data: TranslatedData) -> Result<()> {
        let mut state = self.lock()?;
        let item = Self::item_mut(&mut state, id).ok_or_else(|| anyhow!("Unknown job item {}", id))?;
        if item.state == JobItemState::Active {
            item.state = JobItemState::Review;
        }
        // Overwrite: re-delivery of the same content is a no-op in effect
        state.translations.insert(id, data);
        Ok(())
    }

    async fn jobs_awaiting_translation(&self) -> Result<Vec<JobId>> {
        let state = self.lock()?;
        Ok(state
            .jobs
            .values()
            .filter(|job| state.statuses.get(&job.id) == Some(&JobStatus::Submitted))
            .filter(|job| job.items.iter().any(JobItem::is_active))
            .map(|job| job.id)
            .collect())
    }
}

#[async_trait]
impl RemoteMappingStore for InMemoryHost {
    async fn create(&self, mapping: RemoteMapping) -> Result<()> {
        let mut state = self.lock()?;
        let duplicate = state.mappings.iter().any(|existing| {
            existing.job_item_id == mapping.job_item_id
                && existing.remote_project_id == mapping.remote_project_id
        });
        if duplicate {
            bail!(
                "Remote mapping for job item {} and project {:?} already exists",
                mapping.job_item_id,
                mapping.remote_project_id
            );
        }
        state.mappings.push(mapping);
        Ok(())
    }

    async fn load_by_job(&self, job_id: JobId) -> Result<Vec<RemoteMapping>> {
        Ok(self
            .lock()?
            .mappings
            .iter()
            .filter(|m| m.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn load_by_item(&self, job_item_id: JobItemId) -> Result<Vec<RemoteMapping>> {
        Ok(self
            .lock()?
            .mappings
            .iter()
            .filter(|m| m.job_item_id == job_item_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::JobSettings;

    fn sample_job() -> Job {
        Job {
            id: JobId(1),
            source_language: "en".to_string(),
            target_language: "de".to_string(),
            settings: JobSettings::default(),
            word_count: 10,
            items: vec![
                JobItem {
                    id: JobItemId(10),
                    job_id: JobId(1),
                    state: JobItemState::Active,
                },
                JobItem {
                    id: JobItemId(11),
                    job_id: JobId(1),
                    state: JobItemState::Active,
                },
            ],
        }
    }

    fn mapping(item: u64, project: &str) -> RemoteMapping {
        RemoteMapping {
            job_id: JobId(1),
            job_item_id: JobItemId(item),
            remote_project_id: Some(project.to_string()),
            remote_resource_uuid: Some("rsc-1".to_string()),
            word_count: 5,
            credits: 1.0,
        }
    }

    #[tokio::test]
    async fn test_insert_and_load_job() {
        let host = InMemoryHost::new();
        host.insert_job(sample_job()).unwrap();

        let job = host.load_job(JobId(1)).await.unwrap().unwrap();
        assert_eq!(job.items.len(), 2);
        assert_eq!(host.job_status(JobId(1)).unwrap(), Some(JobStatus::Unprocessed));
        assert!(host.load_job(JobId(2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_translated_data_moves_item_to_review() {
        let host = InMemoryHost::new();
        host.insert_job(sample_job()).unwrap();

        let data = TranslatedData(serde_json::json!({"title": "Hallo"}));
        host.add_translated_data(JobItemId(10), data.clone())
            .await
            .unwrap();

        let item = host.load_item(JobItemId(10)).await.unwrap().unwrap();
        assert_eq!(item.state, JobItemState::Review);
        assert_eq!(host.translation(JobItemId(10)).unwrap(), Some(data));
    }

    #[tokio::test]
    async fn test_translated_data_import_is_idempotent() {
        let host = InMemoryHost::new();
        host.insert_job(sample_job()).unwrap();

        let data = TranslatedData(serde_json::json!({"title": "Hallo"}));
        host.add_translated_data(JobItemId(10), data.clone())
            .await
            .unwrap();
        host.add_translated_data(JobItemId(10), data.clone())
            .await
            .unwrap();

        assert_eq!(host.translation(JobItemId(10)).unwrap(), Some(data));
    }

    #[tokio::test]
    async fn test_duplicate_mapping_rejected() {
        let host = InMemoryHost::new();
        host.create(mapping(10, "P1")).await.unwrap();

        assert!(host.create(mapping(10, "P1")).await.is_err());
        // A different project for the same item is a distinct pair
        host.create(mapping(10, "P2")).await.unwrap();
        assert_eq!(host.load_by_item(JobItemId(10)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_mark_rejected_records_message() {
        let host = InMemoryHost::new();
        host.insert_job(sample_job()).unwrap();

        host.mark_rejected(JobId(1), "Job has been rejected")
            .await
            .unwrap();

        assert_eq!(host.job_status(JobId(1)).unwrap(), Some(JobStatus::Rejected));
        let messages = host.job_messages(JobId(1)).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].level, MessageLevel::Error);
    }

    #[tokio::test]
    async fn test_jobs_awaiting_translation() {
        let host = InMemoryHost::new();
        host.insert_job(sample_job()).unwrap();
        assert!(host.jobs_awaiting_translation().await.unwrap().is_empty());

        host.mark_submitted(JobId(1), "submitted").await.unwrap();
        assert_eq!(host.jobs_awaiting_translation().await.unwrap(), vec![JobId(1)]);

        let data = TranslatedData(serde_json::json!({}));
        host.add_translated_data(JobItemId(10), data.clone())
            .await
            .unwrap();
        host.add_translated_data(JobItemId(11), data).await.unwrap();
        assert!(host.jobs_awaiting_translation().await.unwrap().is_empty());
    }
}
