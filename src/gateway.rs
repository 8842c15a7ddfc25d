//! Gateway Facade.
//!
//! The host talks to OHT only through [`Gateway`]: `submit` for outbound
//! jobs, `handle_notification` for webhooks and the `reconcile*` family for
//! polling. Every failure that reaches job or item scope ends up as a host
//! message; only host-side failures and inbound rejections surface as `Err`.

use crate::client::{
    is_valid_remote_id, AccountDetails, LanguagePair, OhtClient, ProjectComment, QuoteRequest,
    RemoteLanguage,
};
use crate::config::Config;
use crate::error::{GatewayError, GatewayResult};
use crate::host::{DocumentConverter, JobId, JobItemId, JobStore, RemoteMappingStore};
use crate::language::{LanguageCache, LanguageMapper};
use crate::retrieval::{RetrievalOutcome, Retriever};
use crate::security::{parse_job_item_id, verify_token};
use crate::submission::{SubmissionReport, Submitter};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{error, info, warn};

const EVENT_RESOURCES_NEW: &str = "project.resources.new";
const RESOURCE_TYPE_TRANSLATION: &str = "translation";

/// The host's side of the gateway.
#[derive(Clone)]
pub struct Collaborators {
    pub jobs: Arc<dyn JobStore>,
    pub mappings: Arc<dyn RemoteMappingStore>,
    pub converter: Arc<dyn DocumentConverter>,
}

/// Raw webhook fields as the provider posts them. Every field is optional
/// here; validation happens in [`Gateway::handle_notification`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackFields {
    pub event: Option<String>,
    pub resource_type: Option<String>,
    /// Local job item id
    pub custom0: Option<String>,
    /// Callback token
    pub custom1: Option<String>,
    pub resource_uuid: Option<String>,
    pub project_id: Option<String>,
}

#[derive(Debug)]
pub enum NotificationOutcome {
    /// Event type the gateway does not act on
    Ignored,
    Retrieved(RetrievalOutcome),
}

pub struct Gateway {
    config: Config,
    client: OhtClient,
    mapper: LanguageMapper,
    languages: LanguageCache,
    host: Collaborators,
}

impl Gateway {
    pub fn new(config: Config, host: Collaborators) -> GatewayResult<Self> {
        let client = OhtClient::new(&config)?;
        let mapper = LanguageMapper::with_overrides(&config.language_overrides);

        Ok(Self {
            config,
            client,
            mapper,
            languages: LanguageCache::new(),
            host,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn client(&self) -> &OhtClient {
        &self.client
    }

    pub fn mapper(&self) -> &LanguageMapper {
        &self.mapper
    }

    pub fn check_available(&self) -> bool {
        self.config.is_available()
    }

    fn retriever(&self) -> Retriever<'_> {
        Retriever {
            client: &self.client,
            jobs: self.host.jobs.as_ref(),
            mappings: self.host.mappings.as_ref(),
            converter: self.host.converter.as_ref(),
        }
    }

    // ==================== Submission ====================

    /// Submit a job and mark it submitted or rejected on the host.
    ///
    /// Provider failures are folded into the report (`failure`) and the
    /// job's rejection message; `Err` means the host itself failed or the
    /// job does not exist.
    pub async fn submit(&self, job_id: JobId) -> GatewayResult<SubmissionReport> {
        let job = self
            .host
            .jobs
            .load_job(job_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("job {}", job_id)))?;

        if !self.check_available() {
            let message = "Job has been rejected with following error: OHT translator is not available. Check the API keys.";
            error!("Job {} rejected: translator not configured", job_id);
            self.host.jobs.mark_rejected(job_id, message).await?;
            return Ok(SubmissionReport {
                job_id,
                submitted: Vec::new(),
                skipped: Vec::new(),
                failure: Some(GatewayError::Validation {
                    code: 0,
                    message: "OHT translator is not available".to_string(),
                }),
            });
        }

        info!(
            "Submitting job {} ({} items, {} -> {})",
            job_id,
            job.items.len(),
            job.source_language,
            job.target_language
        );

        let submitter = Submitter {
            client: &self.client,
            mapper: &self.mapper,
            jobs: self.host.jobs.as_ref(),
            mappings: self.host.mappings.as_ref(),
            converter: self.host.converter.as_ref(),
            callback_url: &self.config.callback_url,
            callback_secret: &self.config.callback_secret,
        };
        let report = submitter.submit(&job).await;

        match &report.failure {
            Some(e) => {
                error!(
                    "Job {} rejected after {} submitted items: {}",
                    job_id,
                    report.submitted.len(),
                    e
                );
                self.host
                    .jobs
                    .mark_rejected(
                        job_id,
                        &format!("Job has been rejected with following error: {}", e),
                    )
                    .await?;
            }
            None => {
                info!(
                    "Job {} submitted: {} items, {} credits",
                    job_id,
                    report.submitted.len(),
                    report.total_credits()
                );
                self.host
                    .jobs
                    .mark_submitted(job_id, "Job has been successfully submitted for translation.")
                    .await?;
            }
        }

        Ok(report)
    }

    // ==================== Inbound notifications ====================

    /// Process one webhook delivery.
    ///
    /// Unrecognized events are accepted without side effects. A failed
    /// token check is `Auth`, an unknown job item or missing resource is
    /// `NotFound`; both are meant to become a not-found response.
    pub async fn handle_notification(
        &self,
        fields: &CallbackFields,
    ) -> GatewayResult<NotificationOutcome> {
        let is_translation_event = fields.event.as_deref() == Some(EVENT_RESOURCES_NEW)
            && fields.resource_type.as_deref() == Some(RESOURCE_TYPE_TRANSLATION);
        if !is_translation_event {
            return Ok(NotificationOutcome::Ignored);
        }

        let raw_item_id = fields.custom0.as_deref();
        if !verify_token(
            raw_item_id,
            &self.config.callback_secret,
            fields.custom1.as_deref(),
        ) {
            let job_item_id = raw_item_id.unwrap_or("<missing>").to_string();
            warn!(
                "Rejected OHT callback for job item {}: invalid token",
                job_item_id
            );
            return Err(GatewayError::Auth { job_item_id });
        }

        // verify_token already rejected anything that does not parse
        let item_id = raw_item_id
            .and_then(parse_job_item_id)
            .ok_or_else(|| GatewayError::NotFound("job item".to_string()))?;

        let item = self
            .host
            .jobs
            .load_item(item_id)
            .await?
            .ok_or_else(|| {
                warn!("OHT callback for unknown job item {}", item_id);
                GatewayError::NotFound(format!("job item {}", item_id))
            })?;

        let uuid = fields
            .resource_uuid
            .as_deref()
            .filter(|uuid| is_valid_remote_id(uuid))
            .ok_or_else(|| {
                warn!("OHT callback for job item {} without a usable resource", item_id);
                GatewayError::NotFound(format!("resource for job item {}", item_id))
            })?;
        let project_id = fields.project_id.as_deref().filter(|id| !id.is_empty());

        info!(
            "OHT callback: new translation {} for job item {}",
            uuid, item_id
        );
        let outcome = self
            .retriever()
            .retrieve(&[uuid.to_string()], &item, project_id)
            .await;

        Ok(NotificationOutcome::Retrieved(outcome))
    }

    // ==================== Reconciliation ====================

    /// Poll the provider for one job. Returns whether any mapping failed.
    pub async fn reconcile(&self, job_id: JobId) -> GatewayResult<bool> {
        self.retriever().reconcile(job_id).await
    }

    /// Reconcile several jobs, distinct jobs concurrently, each job's
    /// mappings sequentially. Duplicate ids are reconciled once.
    pub async fn reconcile_many(&self, job_ids: &[JobId]) -> Vec<(JobId, GatewayResult<bool>)> {
        let unique: BTreeSet<JobId> = job_ids.iter().copied().collect();
        let concurrency = self.config.reconcile_concurrency.max(1);

        stream::iter(unique)
            .map(|job_id| async move { (job_id, self.reconcile(job_id).await) })
            .buffer_unordered(concurrency)
            .collect()
            .await
    }

    /// Reconcile every job the host reports as awaiting translations.
    pub async fn reconcile_pending(&self) -> GatewayResult<Vec<(JobId, GatewayResult<bool>)>> {
        let pending = self.host.jobs.jobs_awaiting_translation().await?;
        if pending.is_empty() {
            return Ok(Vec::new());
        }
        info!("Reconciling {} jobs awaiting translation", pending.len());
        Ok(self.reconcile_many(&pending).await)
    }

    // ==================== Provider information ====================

    /// The provider's language list, fetched once per gateway.
    pub async fn supported_languages(&self) -> GatewayResult<&[RemoteLanguage]> {
        self.languages.get_or_fetch(&self.client).await
    }

    pub async fn supported_language_pairs(&self) -> GatewayResult<Vec<LanguagePair>> {
        self.client.supported_language_pairs().await
    }

    pub async fn account_details(&self) -> GatewayResult<AccountDetails> {
        self.client.account_details().await
    }

    /// Expertise options for the job's language pair.
    pub async fn expertise(&self, job_id: JobId) -> GatewayResult<BTreeMap<String, String>> {
        let job = self
            .host
            .jobs
            .load_job(job_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("job {}", job_id)))?;
        let source = self.mapper.to_remote(&job.source_language)?;
        let target = self.mapper.to_remote(&job.target_language)?;
        self.client.expertise(Some(source), Some(target)).await
    }

    /// Upload the whole job as one resource and ask the provider for a
    /// translation quote.
    pub async fn quotation(&self, job_id: JobId) -> GatewayResult<Value> {
        let job = self
            .host
            .jobs
            .load_job(job_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("job {}", job_id)))?;
        let source = self.mapper.to_remote(&job.source_language)?;
        let target = self.mapper.to_remote(&job.target_language)?;

        let document = self.host.converter.export(&job, None)?;
        let file_name = format!("JobID_{}_{}_{}", job.id, source, target);
        let resource = self
            .client
            .upload_file_resource(&file_name, &document)
            .await?;

        self.client
            .quotation(QuoteRequest {
                resources: vec![resource.uuid],
                word_count: job.word_count,
                source_language: source.to_string(),
                target_language: target.to_string(),
                service: "translation".to_string(),
                expertise: job.settings.expertise.clone(),
                currency: None,
            })
            .await
    }

    // ==================== Comments ====================

    async fn project_for_item(&self, item_id: JobItemId) -> GatewayResult<String> {
        self.host
            .mappings
            .load_by_item(item_id)
            .await?
            .into_iter()
            .find_map(|m| m.remote_project_id.filter(|id| !id.is_empty()))
            .ok_or_else(|| GatewayError::NotFound(format!("OHT project for job item {}", item_id)))
    }

    pub async fn add_comment(&self, item_id: JobItemId, content: &str) -> GatewayResult<()> {
        let project_id = self.project_for_item(item_id).await?;
        self.client.add_project_comment(&project_id, content).await?;
        info!("Comment added to OHT project {} for job item {}", project_id, item_id);
        Ok(())
    }

    pub async fn comments(&self, item_id: JobItemId) -> GatewayResult<Vec<ProjectComment>> {
        let project_id = self.project_for_item(item_id).await?;
        self.client.project_comments(&project_id).await
    }
}
