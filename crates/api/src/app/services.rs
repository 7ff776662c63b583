use std::sync::Arc;

use anyhow::Context;

use scribe_infra::config::{Config, WebhookValidation};
use scribe_infra::credentials::{CredentialCache, CredentialProvider};
use scribe_infra::external::{self, AzureAdCredentialProvider, GraphClient, OpenAiGenerator};
use scribe_infra::jobs::{
    ExecutorStats, ExecutorStatsHandle, InMemoryJobStore, JobExecutor, JobExecutorConfig,
    JobExecutorHandle, JobStats, JobStore, JobStoreError, PostgresJobStore,
};
use scribe_infra::metrics::MetricsAggregator;
use scribe_infra::ports::DeliveryLedger;
use scribe_infra::processor::{Collaborators, MeetingProcessor, ProcessorSettings};

/// Shared state handed to every route.
pub struct AppServices {
    pub store: Arc<dyn JobStore>,
    pub credentials: Arc<CredentialCache>,
    pub metrics: Arc<MetricsAggregator>,
    pub webhook: WebhookValidation,
    executor: Option<ExecutorStatsHandle>,
}

impl AppServices {
    pub fn new(
        store: Arc<dyn JobStore>,
        credentials: Arc<CredentialCache>,
        metrics: Arc<MetricsAggregator>,
        webhook: WebhookValidation,
    ) -> Self {
        Self {
            store,
            credentials,
            metrics,
            webhook,
            executor: None,
        }
    }

    pub fn with_executor_stats(mut self, handle: ExecutorStatsHandle) -> Self {
        self.executor = Some(handle);
        self
    }

    pub fn executor_stats(&self) -> Option<ExecutorStats> {
        self.executor.as_ref().map(ExecutorStatsHandle::snapshot)
    }

    pub async fn queue_stats(&self) -> Result<JobStats, JobStoreError> {
        self.store.stats().await
    }
}

/// The job store seen both as a queue and as the delivery ledger.
pub struct Stores {
    pub jobs: Arc<dyn JobStore>,
    pub ledger: Arc<dyn DeliveryLedger>,
}

impl Stores {
    pub fn from_store<S: JobStore + 'static>(store: Arc<S>) -> Self {
        Self {
            jobs: store.clone(),
            ledger: store,
        }
    }
}

/// Postgres when `DATABASE_URL` is set, otherwise an in-memory store.
pub async fn build_stores(config: &Config) -> anyhow::Result<Stores> {
    match &config.database {
        Some(db) => {
            let store = PostgresJobStore::connect(db.url.expose(), db.max_connections)
                .await
                .context("failed to connect job store")?;
            tracing::info!(max_connections = db.max_connections, "using postgres job store");
            Ok(Stores::from_store(Arc::new(store)))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory job store (jobs are lost on restart)");
            Ok(Stores::from_store(InMemoryJobStore::arc()))
        }
    }
}

/// Running application: routes' shared state plus the worker pool.
pub struct Runtime {
    pub services: Arc<AppServices>,
    pub executor: JobExecutorHandle,
}

/// Wire clients, store, processor and executor from configuration.
pub async fn start(config: &Config) -> anyhow::Result<Runtime> {
    let http = external::http_client(config.http_timeout).context("failed to build http client")?;

    let provider: Arc<dyn CredentialProvider> =
        Arc::new(AzureAdCredentialProvider::new(http.clone(), &config.identity));
    let credentials = Arc::new(CredentialCache::new(provider, config.identity.safety_margin));
    let graph = Arc::new(GraphClient::new(http.clone(), &config.graph_base_url));
    let generator = Arc::new(OpenAiGenerator::new(http, &config.generation));
    let metrics = Arc::new(MetricsAggregator::new());
    let stores = build_stores(config).await?;

    if config.webhook == WebhookValidation::Disabled {
        tracing::warn!("WEBHOOK_VALIDATION=disabled; webhook clientState is not checked");
    }

    let processor = MeetingProcessor::new(
        Collaborators {
            credentials: credentials.clone(),
            meetings: graph.clone(),
            transcripts: graph.clone(),
            generator,
            formatter: Arc::new(config.minutes_format),
            delivery: graph,
            ledger: stores.ledger,
            metrics: metrics.clone(),
        },
        ProcessorSettings {
            call_retry: config.call_retry,
            transcript_poll: config.transcript_poll,
            max_input_chars: config.generation.max_input_chars,
        },
    );

    let executor = JobExecutor::new(stores.jobs.clone(), Arc::new(processor)).spawn(
        JobExecutorConfig::default()
            .with_workers(config.queue.workers)
            .with_poll_interval(config.queue.poll_interval)
            .with_lease(config.queue.lease)
            .with_retry_policy(config.queue.retry),
    );

    let services = AppServices::new(stores.jobs, credentials, metrics, config.webhook.clone())
        .with_executor_stats(executor.stats_handle());

    Ok(Runtime {
        services: Arc::new(services),
        executor,
    })
}
