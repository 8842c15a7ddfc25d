//! Submission Orchestrator.
//!
//! Each work item goes through export, upload, project creation and mapping
//! persistence in that order. The batch is not transactional: a failure on
//! one item stops the job, but items already submitted keep their mappings
//! because the provider has no cancel operation and has already charged for
//! them. Nothing here retries a POST.

use crate::client::{NewProject, OhtClient};
use crate::error::{GatewayError, GatewayResult};
use crate::host::{
    DocumentConverter, Job, JobId, JobItem, JobItemId, JobStore, MessageLevel, RemoteMapping,
    RemoteMappingStore,
};
use crate::language::LanguageMapper;
use crate::security::compute_token;
use tracing::{info, warn};

/// One successfully submitted work item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemSubmission {
    pub job_item_id: JobItemId,
    pub project_id: String,
    pub resource_uuid: String,
    pub word_count: u64,
    pub credits: f64,
}

#[derive(Debug)]
pub struct SubmissionReport {
    pub job_id: JobId,
    pub submitted: Vec<ItemSubmission>,
    /// Items that already had a remote project and were left alone
    pub skipped: Vec<JobItemId>,
    /// The error that stopped the batch, if any
    pub failure: Option<GatewayError>,
}

impl SubmissionReport {
    fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            submitted: Vec::new(),
            skipped: Vec::new(),
            failure: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn total_credits(&self) -> f64 {
        self.submitted.iter().map(|s| s.credits).sum()
    }
}

/// Borrowed view over the collaborators one submission needs.
pub struct Submitter<'a> {
    pub client: &'a OhtClient,
    pub mapper: &'a LanguageMapper,
    pub jobs: &'a dyn JobStore,
    pub mappings: &'a dyn RemoteMappingStore,
    pub converter: &'a dyn DocumentConverter,
    pub callback_url: &'a str,
    pub callback_secret: &'a str,
}

impl Submitter<'_> {
    /// Submit every work item of `job` that has no remote project yet.
    ///
    /// Stops at the first failing item and records the error in the report;
    /// host notifications (submitted/rejected) are left to the caller.
    pub async fn submit(&self, job: &Job) -> SubmissionReport {
        let mut report = SubmissionReport::new(job.id);

        let languages = self
            .mapper
            .to_remote(&job.source_language)
            .and_then(|source| Ok((source, self.mapper.to_remote(&job.target_language)?)));
        let (source, target) = match languages {
            Ok(pair) => pair,
            Err(e) => {
                report.failure = Some(e);
                return report;
            }
        };

        if job.items.is_empty() {
            warn!("Job {} has no work items to submit", job.id);
        }

        for item in &job.items {
            match self.has_remote_project(item.id).await {
                Ok(true) => {
                    warn!(
                        "Wrong call for submitting translation for job item {}",
                        item.id
                    );
                    report.skipped.push(item.id);
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    report.failure = Some(e);
                    break;
                }
            }

            match self.submit_item(job, item, source, target).await {
                Ok(submission) => report.submitted.push(submission),
                Err(e) => {
                    warn!("Submission of job item {} failed: {}", item.id, e);
                    report.failure = Some(e);
                    break;
                }
            }
        }

        report
    }

    async fn has_remote_project(&self, item: JobItemId) -> GatewayResult<bool> {
        let existing = self.mappings.load_by_item(item).await?;
        Ok(existing.iter().any(|m| m.remote_project_id.is_some()))
    }

    async fn submit_item(
        &self,
        job: &Job,
        item: &JobItem,
        source: &str,
        target: &str,
    ) -> GatewayResult<ItemSubmission> {
        let document = self.converter.export(job, Some(item.id))?;

        let file_name = format!(
            "JobID_{}_JobItemID_{}_{}_{}",
            job.id, item.id, source, target
        );
        let resource = self
            .client
            .upload_file_resource(&file_name, &document)
            .await?;

        let project = self
            .client
            .create_translation_project(NewProject {
                source_language: source.to_string(),
                target_language: target.to_string(),
                sources: vec![resource.uuid.clone()],
                notes: job.settings.notes.clone(),
                expertise: job.settings.expertise.clone(),
                callback_url: self.callback_url.to_string(),
                custom0: item.id.to_string(),
                custom1: compute_token(item.id, self.callback_secret),
            })
            .await?;

        // From here on the provider has charged for the item
        self.mappings
            .create(RemoteMapping {
                job_id: job.id,
                job_item_id: item.id,
                remote_project_id: Some(project.project_id.clone()),
                remote_resource_uuid: Some(resource.uuid.clone()),
                word_count: project.wordcount,
                credits: project.credits,
            })
            .await?;

        self.jobs
            .add_item_message(
                item.id,
                MessageLevel::Status,
                &format!(
                    "OHT project {} created. {} credits reduced from your account.",
                    project.project_id, project.credits
                ),
            )
            .await?;

        info!(
            "Job item {} submitted as OHT project {} ({} words, {} credits)",
            item.id, project.project_id, project.wordcount, project.credits
        );

        Ok(ItemSubmission {
            job_item_id: item.id,
            project_id: project.project_id,
            resource_uuid: resource.uuid,
            word_count: project.wordcount,
            credits: project.credits,
        })
    }
}
