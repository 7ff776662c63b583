use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;

use scribe_api::app::services::AppServices;
use scribe_core::{CorrelationId, JobId, MeetingContext};
use scribe_infra::backoff::RetryPolicy;
use scribe_infra::config::{Secret, WebhookValidation};
use scribe_infra::credentials::{AuthError, CredentialCache, CredentialProvider, IssuedToken};
use scribe_infra::external::CallError;
use scribe_infra::jobs::{
    InMemoryJobStore, Job, JobExecutor, JobExecutorConfig, JobExecutorHandle, JobStats,
    JobStatus, JobStore, JobStoreError,
};
use scribe_infra::metrics::MetricsAggregator;
use scribe_infra::poll::PollPolicy;
use scribe_infra::ports::{
    CallContext, ChatDelivery, MeetingDirectory, MinutesGenerator, TranscriptRef,
    TranscriptSource,
};
use scribe_infra::processor::{Collaborators, MeetingProcessor, ProcessorSettings};
use scribe_minutes::{Document, MinutesFormat, StructuredMinutes};

const CLIENT_STATE: &str = "shared-secret";

struct TestProvider {
    fail: bool,
}

#[async_trait]
impl CredentialProvider for TestProvider {
    async fn issue(&self, _correlation_id: CorrelationId) -> Result<IssuedToken, AuthError> {
        if self.fail {
            return Err(AuthError::Rejected {
                status: 401,
                message: "invalid client secret".to_string(),
            });
        }
        Ok(IssuedToken {
            access_token: "token".to_string(),
            expires_in: Duration::from_secs(3600),
        })
    }
}

/// Stand-in for the meetings, transcripts, generation and chat services.
#[derive(Default)]
struct FakeWorld {
    empty_lists_before_ready: u32,
    list_calls: AtomicU32,
    fail_generation: bool,
    correlation_ids: Mutex<Vec<CorrelationId>>,
    posted: Mutex<Vec<(String, Document)>>,
}

#[async_trait]
impl MeetingDirectory for FakeWorld {
    async fn meeting_context(
        &self,
        ctx: &CallContext,
        _user_id: &str,
        _meeting_id: &str,
    ) -> Result<MeetingContext, CallError> {
        self.correlation_ids.lock().unwrap().push(ctx.correlation_id);
        Ok(MeetingContext {
            subject: "Quarterly planning".to_string(),
            ..Default::default()
        })
    }
}

#[async_trait]
impl TranscriptSource for FakeWorld {
    async fn list_transcripts(
        &self,
        ctx: &CallContext,
        _user_id: &str,
        _meeting_id: &str,
    ) -> Result<Vec<TranscriptRef>, CallError> {
        self.correlation_ids.lock().unwrap().push(ctx.correlation_id);
        if self.list_calls.fetch_add(1, Ordering::SeqCst) < self.empty_lists_before_ready {
            return Ok(vec![]);
        }
        Ok(vec![TranscriptRef {
            id: "t-1".to_string(),
            created_at: None,
        }])
    }

    async fn transcript_content(
        &self,
        ctx: &CallContext,
        _user_id: &str,
        _meeting_id: &str,
        _transcript_id: &str,
    ) -> Result<String, CallError> {
        self.correlation_ids.lock().unwrap().push(ctx.correlation_id);
        Ok("WEBVTT\n\n00:00:01.000 --> 00:00:03.000\n<v Ada>Budget approved.</v>\n".to_string())
    }
}

#[async_trait]
impl MinutesGenerator for FakeWorld {
    async fn generate(
        &self,
        correlation_id: CorrelationId,
        _transcript: &str,
        _context: &MeetingContext,
    ) -> Result<StructuredMinutes, CallError> {
        self.correlation_ids.lock().unwrap().push(correlation_id);
        if self.fail_generation {
            return Err(CallError::Status {
                service: "openai",
                status: 400,
                message: "context length exceeded".to_string(),
                retry_after: None,
            });
        }
        Ok(StructuredMinutes {
            summary: "Budget approved for Q3.".to_string(),
            decisions: vec!["Approve the Q3 budget".to_string()],
            ..Default::default()
        })
    }
}

#[async_trait]
impl ChatDelivery for FakeWorld {
    async fn post_message(
        &self,
        ctx: &CallContext,
        chat_id: &str,
        document: &Document,
    ) -> Result<(), CallError> {
        self.correlation_ids.lock().unwrap().push(ctx.correlation_id);
        self.posted
            .lock()
            .unwrap()
            .push((chat_id.to_string(), document.clone()));
        Ok(())
    }
}

/// In-memory store whose `fail_on`-th enqueue fails.
struct FlakyStore {
    inner: InMemoryJobStore,
    enqueues: AtomicU32,
    fail_on: u32,
}

impl FlakyStore {
    fn failing_enqueue(fail_on: u32) -> Self {
        Self {
            inner: InMemoryJobStore::new(),
            enqueues: AtomicU32::new(0),
            fail_on,
        }
    }
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        if self.enqueues.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
            return Err(JobStoreError::Storage("connection reset".to_string()));
        }
        self.inner.enqueue(job).await
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        self.inner.get(job_id).await
    }

    async fn claim_next(&self, lease: Duration) -> Result<Option<Job>, JobStoreError> {
        self.inner.claim_next(lease).await
    }

    async fn finish_attempt(&self, job: &Job) -> Result<(), JobStoreError> {
        self.inner.finish_attempt(job).await
    }

    async fn extend_lease(
        &self,
        job_id: JobId,
        attempts_made: u32,
        lease: Duration,
    ) -> Result<(), JobStoreError> {
        self.inner.extend_lease(job_id, attempts_made, lease).await
    }

    async fn mark_delivered(&self, job_id: JobId) -> Result<(), JobStoreError> {
        self.inner.mark_delivered(job_id).await
    }

    async fn list_by_status(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError> {
        self.inner.list_by_status(status, limit).await
    }

    async fn requeue_failed(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        self.inner.requeue_failed(job_id).await
    }

    async fn stats(&self) -> Result<JobStats, JobStoreError> {
        self.inner.stats().await
    }

    async fn ping(&self) -> Result<(), JobStoreError> {
        self.inner.ping().await
    }
}

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
    executor: Option<JobExecutorHandle>,
    world: Arc<FakeWorld>,
}

impl TestServer {
    /// Router only; submitted jobs stay queued.
    async fn spawn(credentials_fail: bool) -> Self {
        Self::spawn_over(InMemoryJobStore::arc(), credentials_fail).await
    }

    async fn spawn_over(store: Arc<dyn JobStore>, credentials_fail: bool) -> Self {
        let credentials = Arc::new(CredentialCache::new(
            Arc::new(TestProvider {
                fail: credentials_fail,
            }),
            Duration::from_secs(300),
        ));
        let services = AppServices::new(
            store,
            credentials,
            Arc::new(MetricsAggregator::new()),
            WebhookValidation::Required {
                client_state: Secret::new(CLIENT_STATE),
            },
        );
        Self::serve(services, None, Arc::new(FakeWorld::default())).await
    }

    /// Router plus a worker pool driving the processor against `world`.
    async fn spawn_with_workers(world: FakeWorld, job_attempts: u32) -> Self {
        let world = Arc::new(world);
        let store = InMemoryJobStore::arc();
        let metrics = Arc::new(MetricsAggregator::new());
        let credentials = Arc::new(CredentialCache::new(
            Arc::new(TestProvider { fail: false }),
            Duration::from_secs(300),
        ));

        let processor = MeetingProcessor::new(
            Collaborators {
                credentials: credentials.clone(),
                meetings: world.clone(),
                transcripts: world.clone(),
                generator: world.clone(),
                formatter: Arc::new(MinutesFormat::Markdown),
                delivery: world.clone(),
                ledger: store.clone(),
                metrics: metrics.clone(),
            },
            ProcessorSettings {
                call_retry: RetryPolicy::exponential(3, Duration::from_millis(5)),
                transcript_poll: PollPolicy {
                    max_attempts: 5,
                    unit_wait: Duration::from_millis(10),
                    max_wait: Duration::from_millis(50),
                },
                max_input_chars: 10_000,
            },
        );
        let executor = JobExecutor::new(store.clone(), Arc::new(processor)).spawn(
            JobExecutorConfig::default()
                .with_workers(2)
                .with_poll_interval(Duration::from_millis(10))
                .with_retry_policy(RetryPolicy::exponential(job_attempts, Duration::ZERO)),
        );

        let services = AppServices::new(
            store,
            credentials,
            metrics,
            WebhookValidation::Disabled,
        )
        .with_executor_stats(executor.stats_handle());
        Self::serve(services, Some(executor), world).await
    }

    async fn serve(
        services: AppServices,
        executor: Option<JobExecutorHandle>,
        world: Arc<FakeWorld>,
    ) -> Self {
        let app = scribe_api::app::build_app(Arc::new(services));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            handle,
            executor,
            world,
        }
    }

    async fn shutdown(mut self) {
        if let Some(executor) = self.executor.take() {
            executor.shutdown().await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn notification(client_state: &str, meeting_id: &str) -> serde_json::Value {
    json!({
        "subscriptionId": "sub-1",
        "clientState": client_state,
        "changeType": "updated",
        "resource": format!("communications/onlineMeetings/{meeting_id}"),
        "resourceData": {
            "meetingId": meeting_id,
            "chatId": "19:chat@thread.v2",
            "organizerId": "user-1"
        }
    })
}

async fn job_eventually(
    client: &reqwest::Client,
    base_url: &str,
    id: &str,
    status: &str,
) -> serde_json::Value {
    // Workers run in the background; poll until the job settles.
    for _ in 0..200 {
        let res = client
            .get(format!("{}/jobs/{}", base_url, id))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: serde_json::Value = res.json().await.unwrap();
        if body["status"] == status {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("job {id} did not reach status {status} within timeout");
}

async fn metrics_eventually(
    client: &reqwest::Client,
    base_url: &str,
    pointer: &str,
    expected: u64,
) -> serde_json::Value {
    // Executor counters are updated after the job row settles.
    for _ in 0..200 {
        let res = client.get(format!("{}/metrics", base_url)).send().await.unwrap();
        let body: serde_json::Value = res.json().await.unwrap();
        if body.pointer(pointer).and_then(|v| v.as_u64()) == Some(expected) {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("metric {pointer} did not reach {expected} within timeout");
}

#[tokio::test]
async fn webhook_validation_handshake_echoes_token() {
    let srv = TestServer::spawn(false).await;

    let client = reqwest::Client::new();
    let res = client
        .post(format!(
            "{}/webhooks/meetings?validationToken=Validation%3A%20abc",
            srv.base_url
        ))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    assert_eq!(res.text().await.unwrap(), "Validation: abc");
}

#[tokio::test]
async fn webhook_enqueues_valid_notifications_and_counts_the_rest() {
    let srv = TestServer::spawn(false).await;

    let client = reqwest::Client::new();
    let res = client
        .post(format!("{}/webhooks/meetings", srv.base_url))
        .json(&json!({
            "value": [
                notification(CLIENT_STATE, "meeting-1"),
                notification("forged", "meeting-2"),
                { "subscriptionId": "sub-1", "lifecycleEvent": "reauthorizationRequired" },
                { "clientState": CLIENT_STATE, "resourceData": { "meetingId": "meeting-3" } },
                notification(CLIENT_STATE, "meeting-4"),
            ]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["accepted"], 2);
    assert_eq!(body["rejected"], 1);
    assert_eq!(body["skipped"], 2);
    let jobs = body["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 2);

    let id = jobs[0]["id"].as_str().unwrap();
    let res = client
        .get(format!("{}/jobs/{}", srv.base_url, id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let job: serde_json::Value = res.json().await.unwrap();
    assert_eq!(job["status"], "queued");
    assert_eq!(job["meeting_id"], "meeting-1");
    assert_eq!(job["correlation_id"], jobs[0]["correlation_id"]);

    let res = client
        .get(format!("{}/jobs?status=queued", srv.base_url))
        .send()
        .await
        .unwrap();
    let listed: serde_json::Value = res.json().await.unwrap();
    assert_eq!(listed["count"], 2);
}

#[tokio::test]
async fn redelivered_batch_after_enqueue_failure_creates_no_duplicates() {
    let store = Arc::new(FlakyStore::failing_enqueue(2));
    let srv = TestServer::spawn_over(store.clone(), false).await;
    let client = reqwest::Client::new();
    let batch = json!({
        "value": [
            notification(CLIENT_STATE, "meeting-1"),
            notification(CLIENT_STATE, "meeting-2"),
        ]
    });

    let res = client
        .post(format!("{}/webhooks/meetings", srv.base_url))
        .json(&batch)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "enqueue_failed");
    let stored = store.inner.list_by_status(None, 10).await.unwrap();
    assert_eq!(stored.len(), 1);
    let first = stored[0].clone();

    // The sender retries the whole batch after a 5xx.
    let res = client
        .post(format!("{}/webhooks/meetings", srv.base_url))
        .json(&batch)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["accepted"], 2);
    assert_eq!(body["jobs"][0]["id"], first.id.to_string());
    assert_eq!(body["jobs"][0]["correlation_id"], first.correlation_id.to_string());

    assert_eq!(store.inner.stats().await.unwrap().queued, 2);
}

#[tokio::test]
async fn malformed_webhook_body_is_a_bad_request() {
    let srv = TestServer::spawn(false).await;

    let res = reqwest::Client::new()
        .post(format!("{}/webhooks/meetings", srv.base_url))
        .body("not json")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_body");
}

#[tokio::test]
async fn job_endpoints_validate_input() {
    let srv = TestServer::spawn(false).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/jobs", srv.base_url))
        .json(&json!({ "meeting_id": "m-1", "chat_id": " ", "user_id": "u-1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");

    let res = client
        .get(format!("{}/jobs/not-a-uuid", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .get(format!("{}/jobs/{}", srv.base_url, JobId::new()))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(format!("{}/jobs?status=paused", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_status");
}

#[tokio::test]
async fn retrying_a_job_that_has_not_failed_conflicts() {
    let srv = TestServer::spawn(false).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/jobs", srv.base_url))
        .json(&json!({ "meetingId": "m-1", "chatId": "c-1", "userId": "u-1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: serde_json::Value = res.json().await.unwrap();
    let id = body["id"].as_str().unwrap();

    let res = client
        .post(format!("{}/jobs/{}/retry", srv.base_url, id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_state");
}

#[tokio::test]
async fn health_reflects_credential_reachability() {
    let client = reqwest::Client::new();

    let ok = TestServer::spawn(false).await;
    let res = client.get(format!("{}/health", ok.base_url)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["checks"]["credentials"], "ok");
    assert_eq!(body["checks"]["queue"], "ok");

    let failing = TestServer::spawn(true).await;
    let res = client
        .get(format!("{}/health", failing.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["checks"]["queue"], "ok");

    let res = client
        .get(format!("{}/health/live", failing.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn webhook_to_posted_minutes_end_to_end() {
    let srv = TestServer::spawn_with_workers(
        FakeWorld {
            empty_lists_before_ready: 2,
            ..Default::default()
        },
        3,
    )
    .await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/webhooks/meetings", srv.base_url))
        .json(&json!({ "value": [notification("", "meeting-9")] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: serde_json::Value = res.json().await.unwrap();
    let id = body["jobs"][0]["id"].as_str().unwrap().to_string();
    let correlation_id = body["jobs"][0]["correlation_id"].as_str().unwrap().to_string();

    let job = job_eventually(&client, &srv.base_url, &id, "succeeded").await;
    assert!(job["delivered_at"].is_string());
    assert_eq!(job["attempts_made"], 1);

    {
        let posted = srv.world.posted.lock().unwrap();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].0, "19:chat@thread.v2");
        assert!(posted[0].1.body.contains("Approve the Q3 budget"));
        let ids = srv.world.correlation_ids.lock().unwrap();
        assert!(!ids.is_empty());
        assert!(ids.iter().all(|c| c.to_string() == correlation_id));
    }
    assert_eq!(srv.world.list_calls.load(Ordering::SeqCst), 3);

    let metrics = metrics_eventually(&client, &srv.base_url, "/executor/jobs_succeeded", 1).await;
    assert_eq!(metrics["minutes"]["total_succeeded"], 1);
    assert_eq!(metrics["minutes"]["total_failed"], 0);
    assert_eq!(metrics["minutes"]["recent"][0]["correlation_id"], correlation_id.as_str());
    assert_eq!(metrics["queue"]["succeeded"], 1);

    srv.shutdown().await;
}

#[tokio::test]
async fn exhausted_job_is_listed_as_failed_and_can_be_retried() {
    let srv = TestServer::spawn_with_workers(
        FakeWorld {
            fail_generation: true,
            ..Default::default()
        },
        2,
    )
    .await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/jobs", srv.base_url))
        .json(&json!({ "meeting_id": "m-1", "chat_id": "c-1", "user_id": "u-1" }))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    let id = body["id"].as_str().unwrap().to_string();

    let job = job_eventually(&client, &srv.base_url, &id, "failed").await;
    assert_eq!(job["attempts_made"], 2);
    assert!(job["last_error"].as_str().unwrap().starts_with("generate failed"));
    assert!(srv.world.posted.lock().unwrap().is_empty());

    let res = client
        .get(format!("{}/jobs?status=failed", srv.base_url))
        .send()
        .await
        .unwrap();
    let listed: serde_json::Value = res.json().await.unwrap();
    assert_eq!(listed["count"], 1);
    assert_eq!(listed["jobs"][0]["id"], id.as_str());

    let metrics =
        metrics_eventually(&client, &srv.base_url, "/executor/jobs_dead_lettered", 1).await;
    assert_eq!(metrics["minutes"]["total_failed"], 2);
    assert_eq!(metrics["minutes"]["total_dead_lettered"], 1);

    let res = client
        .post(format!("{}/jobs/{}/retry", srv.base_url, id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let requeued: serde_json::Value = res.json().await.unwrap();
    assert_eq!(requeued["attempts_made"], 0);

    srv.shutdown().await;
}
