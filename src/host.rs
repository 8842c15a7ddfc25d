//! The host application's side of the contract.
//!
//! The gateway never owns jobs, work items, remote mappings or translated
//! content. It reads and updates them through the traits below, which the
//! host implements on top of its own storage.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobItemId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for JobItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a work item as far as the gateway cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobItemState {
    /// Waiting for a translation
    Active,
    /// A translation has been imported and awaits review
    Review,
    Accepted,
    Aborted,
}

/// Per-job checkout settings forwarded to the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSettings {
    /// Instructions for the translator
    pub notes: Option<String>,
    /// OHT expertise code
    pub expertise: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobItem {
    pub id: JobItemId,
    pub job_id: JobId,
    pub state: JobItemState,
}

impl JobItem {
    pub fn is_active(&self) -> bool {
        self.state == JobItemState::Active
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Local language tag, e.g. "en"
    pub source_language: String,
    /// Local language tag, e.g. "zh-hans"
    pub target_language: String,
    pub settings: JobSettings,
    pub word_count: u64,
    pub items: Vec<JobItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageLevel {
    Status,
    Warning,
    Error,
}

/// Link between a local work item and the provider-side project.
///
/// Created once at submission, read by every reconciliation sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteMapping {
    pub job_id: JobId,
    pub job_item_id: JobItemId,
    pub remote_project_id: Option<String>,
    pub remote_resource_uuid: Option<String>,
    /// As reported by the provider
    pub word_count: u64,
    /// As reported by the provider
    pub credits: f64,
}

/// Structured translation produced by the document converter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslatedData(pub serde_json::Value);

/// Serializes work items to the interchange document and back.
pub trait DocumentConverter: Send + Sync {
    /// Export the job's translatable content. `item` restricts the export to
    /// one work item; `None` exports the whole job.
    fn export(&self, job: &Job, item: Option<JobItemId>) -> Result<String>;

    /// Import a downloaded document. The bytes are exactly what the provider
    /// sent; the document's own XML declaration names its encoding.
    fn import(&self, document: &[u8]) -> Result<TranslatedData>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn load_job(&self, id: JobId) -> Result<Option<Job>>;

    async fn load_item(&self, id: JobItemId) -> Result<Option<JobItem>>;

    async fn add_item_message(&self, id: JobItemId, level: MessageLevel, message: &str)
        -> Result<()>;

    async fn add_job_message(&self, id: JobId, level: MessageLevel, message: &str) -> Result<()>;

    async fn mark_submitted(&self, id: JobId, message: &str) -> Result<()>;

    async fn mark_rejected(&self, id: JobId, message: &str) -> Result<()>;

    /// Store translated content for a work item.
    ///
    /// Must be idempotent: the provider retries its webhooks and the polling
    /// sweep may deliver the same resource again, so importing identical
    /// content twice has to overwrite, never duplicate.
    async fn add_translated_data(&self, id: JobItemId, data: TranslatedData) -> Result<()>;

    /// Jobs submitted to the provider that still wait for translations.
    async fn jobs_awaiting_translation(&self) -> Result<Vec<JobId>>;
}

#[async_trait]
pub trait RemoteMappingStore: Send + Sync {
    /// Persist a new mapping. At most one mapping may exist per
    /// (job item, remote project) pair.
    async fn create(&self, mapping: RemoteMapping) -> Result<()>;

    async fn load_by_job(&self, job_id: JobId) -> Result<Vec<RemoteMapping>>;

    async fn load_by_item(&self, job_item_id: JobItemId) -> Result<Vec<RemoteMapping>>;
}
