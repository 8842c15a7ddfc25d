//! Retrieval Reconciler.
//!
//! Downloads translated resources, keeps anything that is not an XML document
//! away from the importer, and hands the rest to the host. Errors are
//! recorded on the work item and never stop the remaining resources or
//! mappings; only a transport outage while fetching project details ends a
//! sweep early.

use crate::client::OhtClient;
use crate::error::{ErrorKind, GatewayError, GatewayResult};
use crate::host::{DocumentConverter, JobId, JobItem, JobStore, MessageLevel, RemoteMappingStore};
use tracing::{debug, info, warn};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const XML_PROLOGUE: &[u8] = b"<?xml";

/// Whether a downloaded body is an interchange document rather than an
/// error payload dressed up as a download.
pub fn looks_like_document(body: &[u8]) -> bool {
    let body = body.strip_prefix(UTF8_BOM).unwrap_or(body);
    let start = body
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(body.len());
    body[start..].starts_with(XML_PROLOGUE)
}

/// How one resource ended up.
#[derive(Debug)]
pub enum Delivery {
    /// First translation for an item that was still waiting
    Received(String),
    /// Re-delivery for an item that already had a translation
    Updated(String),
    /// Not a document; never reached the importer
    Skipped(String),
    Failed { uuid: String, error: GatewayError },
}

#[derive(Debug, Default)]
pub struct RetrievalOutcome {
    pub deliveries: Vec<Delivery>,
}

impl RetrievalOutcome {
    pub fn had_errors(&self) -> bool {
        self.deliveries
            .iter()
            .any(|d| matches!(d, Delivery::Failed { .. }))
    }

    pub fn imported(&self) -> usize {
        self.deliveries
            .iter()
            .filter(|d| matches!(d, Delivery::Received(_) | Delivery::Updated(_)))
            .count()
    }
}

pub struct Retriever<'a> {
    pub client: &'a OhtClient,
    pub jobs: &'a dyn JobStore,
    pub mappings: &'a dyn RemoteMappingStore,
    pub converter: &'a dyn DocumentConverter,
}

impl Retriever<'_> {
    /// Download and import each resource in order.
    pub async fn retrieve(
        &self,
        resource_uuids: &[String],
        item: &JobItem,
        project_id: Option<&str>,
    ) -> RetrievalOutcome {
        let mut outcome = RetrievalOutcome::default();

        for uuid in resource_uuids {
            let delivery = match self.retrieve_one(uuid, item, project_id).await {
                Ok(delivery) => delivery,
                Err(error) => {
                    warn!(
                        "Could not retrieve resource {} for job item {}: {}",
                        uuid, item.id, error
                    );
                    self.item_message(
                        item,
                        MessageLevel::Error,
                        &format!("Could not get translation from OHT. Message error: {}", error),
                    )
                    .await;
                    Delivery::Failed {
                        uuid: uuid.clone(),
                        error,
                    }
                }
            };
            outcome.deliveries.push(delivery);
        }

        outcome
    }

    async fn retrieve_one(
        &self,
        uuid: &str,
        item: &JobItem,
        project_id: Option<&str>,
    ) -> GatewayResult<Delivery> {
        let body = self.client.download_resource(uuid, project_id).await?;

        if !looks_like_document(&body) {
            warn!(
                "Skipping resource {} for job item {}: payload is not a translation document",
                uuid, item.id
            );
            return Ok(Delivery::Skipped(uuid.to_string()));
        }

        let data = self.converter.import(&body)?;

        // The state may have moved since the caller loaded the item
        let was_active = self
            .jobs
            .load_item(item.id)
            .await?
            .map(|current| current.is_active())
            .ok_or_else(|| GatewayError::NotFound(format!("job item {}", item.id)))?;

        self.jobs.add_translated_data(item.id, data).await?;

        if was_active {
            self.jobs
                .add_item_message(
                    item.id,
                    MessageLevel::Status,
                    "The translation has been received.",
                )
                .await?;
            info!("Translation {} received for job item {}", uuid, item.id);
            Ok(Delivery::Received(uuid.to_string()))
        } else {
            self.jobs
                .add_item_message(
                    item.id,
                    MessageLevel::Status,
                    "The translation has been updated.",
                )
                .await?;
            info!("Translation {} updated for job item {}", uuid, item.id);
            Ok(Delivery::Updated(uuid.to_string()))
        }
    }

    /// Poll the provider for every mapping of `job_id`.
    ///
    /// Returns whether any mapping produced an error. Mappings are processed
    /// one after another so repeated deliveries for one project keep their
    /// order.
    pub async fn reconcile(&self, job_id: JobId) -> GatewayResult<bool> {
        let mappings = self.mappings.load_by_job(job_id).await?;
        debug!("Reconciling job {} over {} mappings", job_id, mappings.len());

        let mut had_errors = false;

        for mapping in mappings {
            let Some(item) = self.jobs.load_item(mapping.job_item_id).await? else {
                warn!(
                    "Mapping for job {} references unknown job item {}",
                    job_id, mapping.job_item_id
                );
                had_errors = true;
                continue;
            };

            let Some(project_id) = mapping.remote_project_id.filter(|id| !id.is_empty()) else {
                self.item_message(
                    &item,
                    MessageLevel::Error,
                    "Could not retrieve project information.",
                )
                .await;
                had_errors = true;
                continue;
            };

            let details = match self.client.project_details(&project_id).await {
                Ok(details) => details,
                Err(e) if e.kind() == ErrorKind::Transport => {
                    warn!(
                        "Stopping reconciliation of job {}: project {} unreachable: {}",
                        job_id, project_id, e
                    );
                    self.jobs
                        .add_job_message(
                            job_id,
                            MessageLevel::Error,
                            "Could not pull translation resources.",
                        )
                        .await?;
                    return Ok(true);
                }
                Err(e) => {
                    self.item_message(
                        &item,
                        MessageLevel::Error,
                        &format!("Could not get translation from OHT. Message error: {}", e),
                    )
                    .await;
                    had_errors = true;
                    continue;
                }
            };

            match details.resources.translations {
                None => {
                    self.item_message(
                        &item,
                        MessageLevel::Error,
                        "Could not retrieve translation resources.",
                    )
                    .await;
                    had_errors = true;
                }
                Some(translations) if translations.is_empty() => {
                    debug!("Project {} has no translations yet", project_id);
                }
                Some(translations) => {
                    let outcome = self
                        .retrieve(&translations, &item, Some(&project_id))
                        .await;
                    had_errors |= outcome.had_errors();
                }
            }
        }

        Ok(had_errors)
    }

    /// Append an item message, logging instead of failing when the host
    /// cannot record it.
    async fn item_message(&self, item: &JobItem, level: MessageLevel, text: &str) {
        if let Err(e) = self.jobs.add_item_message(item.id, level, text).await {
            warn!("Failed to record message on job item {}: {}", item.id, e);
        }
    }
}
