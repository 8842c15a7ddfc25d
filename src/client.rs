//! Transport Client for the OHT REST API.
//!
//! Every request carries the credential pair, added last so it overrides any
//! caller-supplied `public_key`/`secret_key`. JSON responses are decoded once
//! into an [`EnvelopeOutcome`] so nothing past this module ever looks at a
//! raw envelope. Download endpoints return the body untouched.

use crate::config::{Config, RemoteCredential};
use crate::error::{GatewayError, GatewayResult};
use crate::retry::{retry_read, RetryConfig};
use regex::Regex;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::{debug, warn};

pub type Params = Vec<(String, String)>;

static REMOTE_ID_REGEX: OnceLock<Option<Regex>> = OnceLock::new();

/// Whether `raw` can be a provider-issued project id or resource uuid.
///
/// Remote ids are spliced into request paths, so anything outside
/// `[A-Za-z0-9_-]` is refused before it reaches the wire.
pub fn is_valid_remote_id(raw: &str) -> bool {
    REMOTE_ID_REGEX
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,127}$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(raw))
}

fn checked_remote_id<'a>(raw: &'a str, what: &str) -> GatewayResult<&'a str> {
    if is_valid_remote_id(raw) {
        Ok(raw)
    } else {
        Err(GatewayError::NotFound(format!("OHT {} '{}'", what, raw)))
    }
}

/// A document sent as the multipart `upload` field.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub file_name: String,
    pub content: String,
}

/// What `call` hands back: the untouched body bytes for downloads, the
/// envelope's `results` otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum RawResult {
    Binary(Vec<u8>),
    Results(Value),
}

/// The provider's envelope after validation.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvelopeOutcome {
    Ok(Value),
    ProviderError { code: i64, message: String },
    Errors { message: String, errors: Vec<String> },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    status: EnvelopeStatus,
    #[serde(default)]
    errors: Option<Vec<Value>>,
    #[serde(default)]
    results: Value,
}

#[derive(Debug, Deserialize)]
struct EnvelopeStatus {
    #[serde(deserialize_with = "de_i64")]
    code: i64,
    #[serde(default)]
    msg: Option<String>,
}

/// Decode a JSON body into an [`EnvelopeOutcome`]. A body that is not an
/// envelope at all is a transport-level failure.
pub fn decode_envelope(body: &[u8]) -> GatewayResult<EnvelopeOutcome> {
    let envelope: Envelope = serde_json::from_slice(body).map_err(|e| {
        GatewayError::transport(None, format!("malformed response envelope: {}", e))
    })?;

    let message = envelope.status.msg.unwrap_or_default();
    if envelope.status.code != 0 {
        return Ok(EnvelopeOutcome::ProviderError {
            code: envelope.status.code,
            message,
        });
    }

    let errors: Vec<String> = envelope
        .errors
        .unwrap_or_default()
        .into_iter()
        .map(|e| match e {
            Value::String(s) => s,
            other => other.to_string(),
        })
        .collect();
    if !errors.is_empty() {
        return Ok(EnvelopeOutcome::Errors { message, errors });
    }

    Ok(EnvelopeOutcome::Ok(envelope.results))
}

fn into_results(outcome: EnvelopeOutcome) -> GatewayResult<Value> {
    match outcome {
        EnvelopeOutcome::Ok(results) => Ok(results),
        EnvelopeOutcome::ProviderError { code, message } => {
            Err(GatewayError::Validation { code, message })
        }
        EnvelopeOutcome::Errors { message, errors } => {
            warn!("OHT error: {}", errors.join("; "));
            let message = if message.is_empty() {
                errors.join("; ")
            } else {
                message
            };
            Err(GatewayError::Remote { message, errors })
        }
    }
}

fn decode_results<T: DeserializeOwned>(results: Value, what: &str) -> GatewayResult<T> {
    serde_json::from_value(results).map_err(|e| {
        GatewayError::transport(None, format!("malformed {} in OHT response: {}", what, e))
    })
}

// ==================== Typed results ====================

/// Provider-side content handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteResource {
    pub uuid: String,
}

/// Parameters for `projects/translation`.
#[derive(Debug, Clone, Default)]
pub struct NewProject {
    pub source_language: String,
    pub target_language: String,
    pub sources: Vec<String>,
    pub notes: Option<String>,
    pub expertise: Option<String>,
    pub callback_url: String,
    /// Echoed back as `custom0`
    pub custom0: String,
    /// Echoed back as `custom1`
    pub custom1: String,
}

impl NewProject {
    fn into_params(self) -> Params {
        let mut params = vec![
            param("source_language", self.source_language),
            param("target_language", self.target_language),
            param("sources", self.sources.join(",")),
        ];
        if let Some(notes) = self.notes.filter(|n| !n.trim().is_empty()) {
            params.push(param("notes", notes));
        }
        params.push(param("callback_url", self.callback_url));
        params.push(param("custom0", self.custom0));
        params.push(param("custom1", self.custom1));
        if let Some(expertise) = self.expertise.filter(|e| !e.trim().is_empty()) {
            params.push(param("expertise", expertise));
        }
        params
    }
}

/// A freshly created translation project.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteProject {
    #[serde(deserialize_with = "de_string")]
    pub project_id: String,
    #[serde(default, deserialize_with = "de_u64")]
    pub wordcount: u64,
    #[serde(default, deserialize_with = "de_f64")]
    pub credits: f64,
    #[serde(default, alias = "project_status")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProjectResources {
    #[serde(default)]
    pub sources: Vec<String>,
    /// `None` when the provider does not list translations at all
    #[serde(default)]
    pub translations: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProjectDetails {
    #[serde(deserialize_with = "de_string")]
    pub project_id: String,
    #[serde(default, alias = "status")]
    pub project_status: Option<String>,
    #[serde(default)]
    pub resources: ProjectResources,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProjectComment {
    #[serde(deserialize_with = "de_string")]
    pub id: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub commenter_name: Option<String>,
    #[serde(default)]
    pub commenter_role: Option<String>,
    #[serde(default)]
    pub comment_content: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AccountDetails {
    #[serde(default, deserialize_with = "de_opt_string")]
    pub account_id: Option<String>,
    #[serde(default)]
    pub account_username: Option<String>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub credits: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteLanguage {
    pub code: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguagePair {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Deserialize)]
struct LanguagePairEntry {
    source: RemoteLanguage,
    #[serde(default)]
    targets: Vec<RemoteLanguage>,
}

#[derive(Debug, Deserialize)]
struct ExpertiseEntry {
    code: String,
    #[serde(default)]
    name: String,
}

/// Parameters for `tools/quote`.
#[derive(Debug, Clone)]
pub struct QuoteRequest {
    pub resources: Vec<String>,
    pub word_count: u64,
    pub source_language: String,
    pub target_language: String,
    /// translation, proofreading, transproof or transcription
    pub service: String,
    pub expertise: Option<String>,
    pub currency: Option<String>,
}

// ==================== Client ====================

pub struct OhtClient {
    http: reqwest::Client,
    api_root: String,
    credential: RemoteCredential,
    retry: RetryConfig,
    debug: bool,
}

impl OhtClient {
    pub fn new(config: &Config) -> GatewayResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        let credential = config.credential();
        Ok(Self {
            http,
            api_root: config.api_root_for(&credential),
            credential,
            retry: config.retry.clone(),
            debug: config.debug,
        })
    }

    /// Issue one request against `{api_root}/{path}`.
    ///
    /// GET parameters travel in the query string, POST parameters as a form
    /// body, or as multipart fields when `upload` is present. GET requests
    /// are retried on transient transport failures; POST requests never are.
    pub async fn call(
        &self,
        path: &str,
        method: Method,
        params: Params,
        upload: Option<FileUpload>,
        expect_binary: bool,
    ) -> GatewayResult<RawResult> {
        let body = self.fetch(path, method, params, upload).await?;
        if expect_binary {
            return Ok(RawResult::Binary(body));
        }
        into_results(decode_envelope(&body)?).map(RawResult::Results)
    }

    async fn call_results(&self, path: &str, method: Method, params: Params) -> GatewayResult<Value> {
        let body = self.fetch(path, method, params, None).await?;
        into_results(decode_envelope(&body)?)
    }

    /// Send the request (retrying GETs) and return the body bytes as received.
    async fn fetch(
        &self,
        path: &str,
        method: Method,
        params: Params,
        upload: Option<FileUpload>,
    ) -> GatewayResult<Vec<u8>> {
        let params = self.with_credentials(params);
        if method == Method::GET {
            retry_read(&self.retry, &format!("OHT GET {}", path), || {
                self.execute(path, Method::GET, &params, None)
            })
            .await
        } else {
            self.execute(path, method, &params, upload).await
        }
    }

    fn with_credentials(&self, mut params: Params) -> Params {
        params.retain(|(key, _)| key != "public_key" && key != "secret_key");
        params.push(param("public_key", self.credential.public_key.clone()));
        params.push(param("secret_key", self.credential.secret_key.clone()));
        params
    }

    async fn execute(
        &self,
        path: &str,
        method: Method,
        params: &Params,
        upload: Option<FileUpload>,
    ) -> GatewayResult<Vec<u8>> {
        let url = format!("{}/{}", self.api_root, path.trim_start_matches('/'));

        if self.debug {
            let keys: Vec<&str> = params
                .iter()
                .filter(|(key, _)| key != "secret_key")
                .map(|(key, _)| key.as_str())
                .collect();
            debug!("Sending request to OHT at {} method {} with params {:?}", url, method, keys);
        }

        let request = if method == Method::GET {
            self.http.get(&url).query(params)
        } else if let Some(upload) = upload {
            let mut form = Form::new().part(
                "upload",
                Part::text(upload.content)
                    .file_name(upload.file_name)
                    .mime_str("text/plain")?,
            );
            for (key, value) in params {
                form = form.text(key.clone(), value.clone());
            }
            self.http.request(method, &url).multipart(form)
        } else {
            self.http.request(method, &url).form(params)
        };

        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?.to_vec();

        if self.debug {
            debug!("OHT response from {}: {} ({} bytes)", url, status, body.len());
        }

        if !status.is_success() {
            return Err(non_success_error(status, &body));
        }

        Ok(body)
    }

    // ==================== Endpoints ====================

    /// Upload an XLIFF document as a file resource (`resources/file`). The
    /// provider receives it as `{name}.xliff`.
    pub async fn upload_file_resource(
        &self,
        name: &str,
        document: &str,
    ) -> GatewayResult<RemoteResource> {
        let upload = FileUpload {
            file_name: xliff_file_name(name),
            content: document.to_string(),
        };
        let body = self
            .fetch("resources/file", Method::POST, Vec::new(), Some(upload))
            .await?;
        first_resource(into_results(decode_envelope(&body)?)?)
    }

    /// Upload plain text as a resource (`resources/text`).
    pub async fn upload_text_resource(&self, text: &str) -> GatewayResult<RemoteResource> {
        let results = self
            .call_results("resources/text", Method::POST, vec![param("text", text)])
            .await?;
        first_resource(results)
    }

    /// Download a resource body byte for byte. The body is usually a
    /// document, but some sandbox edge cases answer 200 with a JSON error
    /// instead.
    pub async fn download_resource(
        &self,
        uuid: &str,
        project_id: Option<&str>,
    ) -> GatewayResult<Vec<u8>> {
        let params = project_id
            .filter(|id| !id.is_empty())
            .map(|id| vec![param("project_id", id)])
            .unwrap_or_default();
        let path = format!("resources/{}/download", checked_remote_id(uuid, "resource")?);

        self.fetch(&path, Method::GET, params, None).await
    }

    pub async fn create_translation_project(
        &self,
        project: NewProject,
    ) -> GatewayResult<RemoteProject> {
        let results = self
            .call_results("projects/translation", Method::POST, project.into_params())
            .await?;
        decode_results(results, "project")
    }

    pub async fn project_details(&self, project_id: &str) -> GatewayResult<ProjectDetails> {
        let results = self
            .call_results(
                &format!("projects/{}", checked_remote_id(project_id, "project")?),
                Method::GET,
                Vec::new(),
            )
            .await?;
        decode_results(results, "project details")
    }

    pub async fn add_project_comment(&self, project_id: &str, content: &str) -> GatewayResult<Value> {
        self.call_results(
            &format!("projects/{}/comments", checked_remote_id(project_id, "project")?),
            Method::POST,
            vec![param("content", content)],
        )
        .await
    }

    pub async fn project_comments(&self, project_id: &str) -> GatewayResult<Vec<ProjectComment>> {
        let results = self
            .call_results(
                &format!("projects/{}/comments", checked_remote_id(project_id, "project")?),
                Method::GET,
                Vec::new(),
            )
            .await?;
        if results.is_null() {
            return Ok(Vec::new());
        }
        decode_results(results, "comments")
    }

    pub async fn wordcount(&self, uuids: &[String]) -> GatewayResult<Value> {
        self.call_results(
            "tools/wordcount",
            Method::GET,
            vec![param("resources", uuids.join(","))],
        )
        .await
    }

    pub async fn account_details(&self) -> GatewayResult<AccountDetails> {
        let results = self.call_results("account", Method::GET, Vec::new()).await?;
        decode_results(results, "account details")
    }

    pub async fn quotation(&self, request: QuoteRequest) -> GatewayResult<Value> {
        let mut params = vec![
            param("resources", request.resources.join(",")),
            param("word_count", request.word_count.to_string()),
            param("source_language", request.source_language),
            param("target_language", request.target_language),
            param("service", request.service),
        ];
        if let Some(expertise) = request.expertise.filter(|e| !e.is_empty()) {
            params.push(param("expertise", expertise));
        }
        if let Some(currency) = request.currency.filter(|c| !c.is_empty()) {
            params.push(param("currency", currency));
        }
        self.call_results("tools/quote", Method::GET, params).await
    }

    /// Expertise options keyed by code. Both languages are optional, but
    /// the provider requires one whenever the other is given.
    pub async fn expertise(
        &self,
        source_language: Option<&str>,
        target_language: Option<&str>,
    ) -> GatewayResult<BTreeMap<String, String>> {
        let mut params = Vec::new();
        if let Some(source) = source_language {
            params.push(param("source_language", source));
        }
        if let Some(target) = target_language {
            params.push(param("target_language", target));
        }
        let results = self
            .call_results("discover/expertise", Method::GET, params)
            .await?;
        let entries: Vec<ExpertiseEntry> = decode_results(results, "expertise list")?;
        Ok(entries.into_iter().map(|e| (e.code, e.name)).collect())
    }

    pub async fn supported_languages(&self) -> GatewayResult<Vec<RemoteLanguage>> {
        let results = self
            .call_results("discover/languages", Method::GET, Vec::new())
            .await?;
        decode_results(results, "language list")
    }

    pub async fn supported_language_pairs(&self) -> GatewayResult<Vec<LanguagePair>> {
        let results = self
            .call_results("discover/language_pairs", Method::GET, Vec::new())
            .await?;
        let entries: Vec<LanguagePairEntry> = decode_results(results, "language pairs")?;

        Ok(entries
            .into_iter()
            .flat_map(|entry| {
                let source = entry.source.code;
                entry.targets.into_iter().map(move |target| LanguagePair {
                    source: source.clone(),
                    target: target.code,
                })
            })
            .collect())
    }
}

/// Map a non-2xx response. A parseable envelope with a status code still
/// counts as a validation answer; anything else is a transport failure.
fn non_success_error(status: StatusCode, body: &[u8]) -> GatewayError {
    if let Ok(EnvelopeOutcome::ProviderError { code, message }) = decode_envelope(body) {
        return GatewayError::Validation { code, message };
    }
    let reason = status.canonical_reason().unwrap_or("unknown status");
    GatewayError::transport(Some(status.as_u16()), format!("{} {}", status.as_u16(), reason))
}

fn first_resource(results: Value) -> GatewayResult<RemoteResource> {
    let uuids: Vec<String> = decode_results(results, "resource list")?;
    uuids
        .into_iter()
        .find(|uuid| !uuid.is_empty())
        .map(|uuid| RemoteResource { uuid })
        .ok_or_else(|| GatewayError::transport(None, "OHT returned no resource uuid"))
}

fn xliff_file_name(name: &str) -> String {
    if name.to_ascii_lowercase().ends_with(".xliff") {
        name.to_string()
    } else {
        format!("{}.xliff", name)
    }
}

fn param(key: &str, value: impl Into<String>) -> (String, String) {
    (key.to_string(), value.into())
}

// ==================== Lenient number decoding ====================
// OHT is inconsistent about quoting numbers; accept both forms.

fn de_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

fn de_opt_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

fn de_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom(format!("expected integer, got {}", n))),
        Value::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
        other => Err(serde::de::Error::custom(format!(
            "expected integer, got {}",
            other
        ))),
    }
}

fn de_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(0),
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| serde::de::Error::custom(format!("expected count, got {}", n))),
        Value::String(s) if s.trim().is_empty() => Ok(0),
        Value::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
        other => Err(serde::de::Error::custom(format!(
            "expected count, got {}",
            other
        ))),
    }
}

fn de_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(de_opt_f64(deserializer)?.unwrap_or(0.0))
}

fn de_opt_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64()),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
        other => Err(serde::de::Error::custom(format!(
            "expected number, got {}",
            other
        ))),
    }
}
