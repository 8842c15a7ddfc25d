//! Integration tests for the OHT gateway
//!
//! These tests drive the public API end to end: the gateway facade against a
//! mocked OHT server, the in-memory host store, and the webhook router.

use oht_gateway::memory::{InMemoryHost, JobStatus};
use oht_gateway::retry::RetryConfig;
use oht_gateway::security::compute_token;
use oht_gateway::server::router;
use oht_gateway::{
    CallbackFields, Collaborators, Config, DocumentConverter, Gateway, GatewayError, Job, JobId,
    JobItem, JobItemId, JobItemState, JobSettings, JobStore, MessageLevel, NotificationOutcome,
    RemoteMapping, RemoteMappingStore, TranslatedData,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::{
    matchers::{body_string_contains, method, path},
    Mock, MockServer, ResponseTemplate,
};

const XLIFF: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?><xliff version=\"1.2\"><file><body><trans-unit id=\"1\"><target>Hallo Welt</target></trans-unit></body></file></xliff>";

// ==================== Test Helpers ====================

/// Converter that counts imports so tests can prove a payload never reached it
#[derive(Default)]
struct CountingConverter {
    imports: AtomicUsize,
}

impl DocumentConverter for CountingConverter {
    fn export(&self, job: &Job, item: Option<JobItemId>) -> anyhow::Result<String> {
        Ok(format!(
            "<?xml version=\"1.0\"?><xliff job=\"{}\" item=\"{}\"/>",
            job.id,
            item.map(|i| i.to_string()).unwrap_or_default()
        ))
    }

    fn import(&self, document: &[u8]) -> anyhow::Result<TranslatedData> {
        self.imports.fetch_add(1, Ordering::SeqCst);
        Ok(TranslatedData(
            serde_json::json!({ "document": String::from_utf8_lossy(document) }),
        ))
    }
}

fn create_test_config(base_url: &str) -> Config {
    Config {
        oht_public_key: "test-public".to_string(),
        oht_secret_key: "test-secret".to_string(),
        use_sandbox: true,
        api_base_url: Some(base_url.to_string()),
        request_timeout: Duration::from_secs(5),
        debug: true,
        callback_url: "https://cms.example.com/oht/callback".to_string(),
        callback_secret: "integration-salt".to_string(),
        reconcile_interval_minutes: 15,
        reconcile_concurrency: 4,
        language_overrides: vec![("pt".to_string(), "pt-br".to_string())],
        retry: RetryConfig::disabled(),
        port: 8080,
    }
}

struct Fixture {
    gateway: Arc<Gateway>,
    host: InMemoryHost,
    converter: Arc<CountingConverter>,
}

fn fixture(base_url: &str, target_language: &str, items: &[u64]) -> Fixture {
    let host = InMemoryHost::new();
    host.insert_job(Job {
        id: JobId(1),
        source_language: "en".to_string(),
        target_language: target_language.to_string(),
        settings: JobSettings {
            notes: Some("Marketing copy, informal tone".to_string()),
            expertise: Some("marketing-consumer-media".to_string()),
        },
        word_count: 120,
        items: items
            .iter()
            .map(|id| JobItem {
                id: JobItemId(*id),
                job_id: JobId(1),
                state: JobItemState::Active,
            })
            .collect(),
    })
    .expect("Failed to insert job");

    let converter = Arc::new(CountingConverter::default());
    let gateway = Gateway::new(
        create_test_config(base_url),
        Collaborators {
            jobs: Arc::new(host.clone()),
            mappings: Arc::new(host.clone()),
            converter: converter.clone(),
        },
    )
    .expect("Failed to build gateway");

    Fixture {
        gateway: Arc::new(gateway),
        host,
        converter,
    }
}

fn envelope(results: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "status": {"code": 0, "msg": "ok"},
        "errors": [],
        "results": results
    }))
}

fn translation_callback(item: u64, token: &str, uuid: &str) -> CallbackFields {
    CallbackFields {
        event: Some("project.resources.new".to_string()),
        resource_type: Some("translation".to_string()),
        custom0: Some(item.to_string()),
        custom1: Some(token.to_string()),
        resource_uuid: Some(uuid.to_string()),
        project_id: Some("P1".to_string()),
    }
}

fn item_texts(host: &InMemoryHost, item: u64) -> Vec<String> {
    host.item_messages(JobItemId(item))
        .unwrap()
        .into_iter()
        .map(|m| m.text)
        .collect()
}

// ==================== Submission Scenarios ====================

#[tokio::test]
async fn test_submit_single_item_creates_mapping() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/2/resources/file"))
        .and(body_string_contains("filename=\"JobID_1_JobItemID_10_en-us_de-de.xliff\""))
        .respond_with(envelope(serde_json::json!(["rsc-uuid-1"])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2/projects/translation"))
        .and(body_string_contains("source_language=en-us"))
        .and(body_string_contains("target_language=de-de"))
        .and(body_string_contains("sources=rsc-uuid-1"))
        .and(body_string_contains("expertise=marketing-consumer-media"))
        .and(body_string_contains("public_key=test-public"))
        .respond_with(envelope(serde_json::json!({
            "project_id": "P1",
            "wordcount": 120,
            "credits": 5
        })))
        .expect(1)
        .mount(&server)
        .await;

    let fx = fixture(&server.uri(), "de", &[10]);
    let report = fx.gateway.submit(JobId(1)).await.expect("Submit should not fail");

    assert!(report.is_success());
    let mappings = fx.host.mappings().unwrap();
    assert_eq!(
        mappings,
        vec![RemoteMapping {
            job_id: JobId(1),
            job_item_id: JobItemId(10),
            remote_project_id: Some("P1".to_string()),
            remote_resource_uuid: Some("rsc-uuid-1".to_string()),
            word_count: 120,
            credits: 5.0,
        }]
    );
    assert_eq!(fx.host.job_status(JobId(1)).unwrap(), Some(JobStatus::Submitted));
}

#[tokio::test]
async fn test_submit_invalid_language_rejects_job() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/2/resources/file"))
        .respond_with(envelope(serde_json::json!(["rsc-uuid-1"])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2/projects/translation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": {"code": 7, "msg": "invalid language"}
        })))
        .mount(&server)
        .await;

    let fx = fixture(&server.uri(), "de", &[10]);
    let report = fx.gateway.submit(JobId(1)).await.unwrap();

    assert!(matches!(
        report.failure,
        Some(GatewayError::Validation { code: 7, .. })
    ));
    assert!(fx.host.mappings().unwrap().is_empty());
    assert_eq!(fx.host.job_status(JobId(1)).unwrap(), Some(JobStatus::Rejected));

    let messages = fx.host.job_messages(JobId(1)).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].level, MessageLevel::Error);
    assert!(messages[0].text.contains("invalid language"));
}

#[tokio::test]
async fn test_partial_batch_is_not_rolled_back() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/2/resources/file"))
        .respond_with(envelope(serde_json::json!(["rsc-uuid"])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2/projects/translation"))
        .and(body_string_contains("custom0=10"))
        .respond_with(envelope(serde_json::json!({
            "project_id": "P10", "wordcount": 60, "credits": 3
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2/projects/translation"))
        .and(body_string_contains("custom0=11"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&server)
        .await;

    let fx = fixture(&server.uri(), "de", &[10, 11]);
    let report = fx.gateway.submit(JobId(1)).await.unwrap();

    assert!(matches!(
        report.failure,
        Some(GatewayError::Transport { status: Some(502), .. })
    ));
    // Item 10 was charged and keeps its mapping
    let mappings = fx.host.mappings().unwrap();
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].remote_project_id.as_deref(), Some("P10"));
    assert_eq!(fx.host.job_status(JobId(1)).unwrap(), Some(JobStatus::Rejected));
}

#[tokio::test]
async fn test_language_override_reaches_provider() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/2/resources/file"))
        .respond_with(envelope(serde_json::json!(["rsc-uuid-1"])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2/projects/translation"))
        .and(body_string_contains("target_language=pt-br"))
        .respond_with(envelope(serde_json::json!({
            "project_id": "P1", "wordcount": 10, "credits": 1
        })))
        .expect(1)
        .mount(&server)
        .await;

    let fx = fixture(&server.uri(), "pt", &[10]);
    let report = fx.gateway.submit(JobId(1)).await.unwrap();
    assert!(report.is_success());
}

// ==================== Notification Scenarios ====================

#[tokio::test]
async fn test_forged_callback_returns_not_found_without_retrieval() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(XLIFF))
        .expect(0)
        .mount(&server)
        .await;

    let fx = fixture(&server.uri(), "de", &[10]);
    let app = router(fx.gateway.clone());

    let forged = compute_token(JobItemId(10), "wrong-secret");
    let body = format!(
        "event=project.resources.new&resource_type=translation&custom0=10&custom1={}&resource_uuid=rsc-t1&project_id=P1",
        forged
    );
    let response = app
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/oht/callback")
                .header("content-type", "application/x-www-form-urlencoded")
                .body(axum::body::Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
    assert_eq!(fx.converter.imports.load(Ordering::SeqCst), 0);
    assert!(item_texts(&fx.host, 10).is_empty());
}

#[tokio::test]
async fn test_json_payload_never_reaches_importer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/2/resources/rsc-t1/download"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"status":{"code":403,"msg":"Resource is not ready"}}"#),
        )
        .mount(&server)
        .await;

    let fx = fixture(&server.uri(), "de", &[10]);
    let token = compute_token(JobItemId(10), "integration-salt");

    let outcome = fx
        .gateway
        .handle_notification(&translation_callback(10, &token, "rsc-t1"))
        .await
        .unwrap();

    match outcome {
        NotificationOutcome::Retrieved(outcome) => {
            assert_eq!(outcome.imported(), 0);
            assert!(!outcome.had_errors());
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(fx.converter.imports.load(Ordering::SeqCst), 0);
    assert!(fx.host.translation(JobItemId(10)).unwrap().is_none());
}

#[tokio::test]
async fn test_redelivery_reports_updated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/2/resources/rsc-t1/download"))
        .respond_with(ResponseTemplate::new(200).set_body_string(XLIFF))
        .expect(2)
        .mount(&server)
        .await;

    let fx = fixture(&server.uri(), "de", &[10]);
    let token = compute_token(JobItemId(10), "integration-salt");
    let fields = translation_callback(10, &token, "rsc-t1");

    fx.gateway.handle_notification(&fields).await.unwrap();
    fx.gateway.handle_notification(&fields).await.unwrap();

    assert_eq!(
        item_texts(&fx.host, 10),
        vec![
            "The translation has been received.".to_string(),
            "The translation has been updated.".to_string()
        ]
    );
    assert_eq!(fx.converter.imports.load(Ordering::SeqCst), 2);
    let item = fx.host.load_item(JobItemId(10)).await.unwrap().unwrap();
    assert_eq!(item.state, JobItemState::Review);
}

// ==================== Reconciliation Scenarios ====================

#[tokio::test]
async fn test_submit_then_poll_end_to_end() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/2/resources/file"))
        .respond_with(envelope(serde_json::json!(["rsc-src"])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/2/projects/translation"))
        .respond_with(envelope(serde_json::json!({
            "project_id": "P1", "wordcount": "120", "credits": "5"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/2/projects/P1"))
        .respond_with(envelope(serde_json::json!({
            "project_id": "P1",
            "project_status": "completed",
            "resources": {"sources": ["rsc-src"], "translations": ["rsc-t1"]}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/2/resources/rsc-t1/download"))
        .respond_with(ResponseTemplate::new(200).set_body_string(XLIFF))
        .mount(&server)
        .await;

    let fx = fixture(&server.uri(), "de", &[10]);
    fx.gateway.submit(JobId(1)).await.unwrap();

    let results = fx.gateway.reconcile_pending().await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(!results[0].1.as_ref().unwrap());

    let translation = fx.host.translation(JobItemId(10)).unwrap().unwrap();
    assert_eq!(translation.0["document"], XLIFF);

    // Nothing left to poll once every item is in review
    assert!(fx.gateway.reconcile_pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reconcile_with_missing_project_id_still_processes_rest() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/2/projects/P11"))
        .respond_with(envelope(serde_json::json!({
            "project_id": "P11",
            "resources": {"sources": ["s"], "translations": ["rsc-t11"]}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/2/resources/rsc-t11/download"))
        .respond_with(ResponseTemplate::new(200).set_body_string(XLIFF))
        .mount(&server)
        .await;

    let fx = fixture(&server.uri(), "de", &[10, 11]);
    for (item, project) in [(10, None), (11, Some("P11"))] {
        fx.host
            .create(RemoteMapping {
                job_id: JobId(1),
                job_item_id: JobItemId(item),
                remote_project_id: project.map(str::to_string),
                remote_resource_uuid: Some("s".to_string()),
                word_count: 10,
                credits: 1.0,
            })
            .await
            .unwrap();
    }

    let had_errors = fx.gateway.reconcile(JobId(1)).await.unwrap();

    assert!(had_errors);
    assert_eq!(
        item_texts(&fx.host, 10),
        vec!["Could not retrieve project information.".to_string()]
    );
    assert!(fx.host.translation(JobItemId(11)).unwrap().is_some());
}
