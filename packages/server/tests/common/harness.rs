//! Test harness: the full router over mock collaborators.
//!
//! Requests go through `tower::ServiceExt::oneshot`, so no socket is bound.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Method, Request, StatusCode},
    response::Response,
    Router,
};
use http_body_util::BodyExt;
use research_pipeline::testing::{MockFetcher, MockModel};
use research_pipeline::{
    JobId, JobStatus, LanguageModel, MemoryStore, PipelineConfig, ServerType, StaticModelRegistry,
};
use research_server::kernel::{deps::DepsParts, ServerDeps};
use research_server::server::build_app;
use serde_json::Value;
use tower::ServiceExt;

pub struct TestHarness {
    pub app: Router,
    pub deps: ServerDeps,
    pub fetcher: Arc<MockFetcher>,
}

impl TestHarness {
    pub fn new(fetcher: MockFetcher) -> Self {
        Self::with_retention(fetcher, Duration::from_secs(900))
    }

    /// Harness whose finished jobs are evicted after `retention`.
    pub fn with_retention(fetcher: MockFetcher, retention: Duration) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let store = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(fetcher);
        let model: Arc<dyn LanguageModel> = Arc::new(MockModel::new());
        let models = StaticModelRegistry::new().with_model(ServerType::Ollama, "local", model);

        let mut defaults = PipelineConfig::default();
        defaults.fetch.per_domain_rps = 50;
        defaults.fetch.exhaustion_grace_secs = Some(2);

        let deps = ServerDeps::new(DepsParts {
            records: store.clone(),
            cache_store: store,
            fetcher: fetcher.clone(),
            searchers: Vec::new(),
            models: Arc::new(models),
            defaults,
            cache_global_concurrency: 4,
            job_retention: retention,
        });
        let app = build_app(deps.clone(), &[]);
        Self { app, deps, fetcher }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.app
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    pub async fn json(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self.send(request).await;
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.json(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.json(Method::POST, uri, Some(body)).await
    }

    pub async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        self.json(Method::DELETE, uri, None).await
    }

    /// Poll the registry until the job reaches a terminal status.
    pub async fn wait_terminal(&self, id: JobId) -> JobStatus {
        tokio::time::timeout(Duration::from_secs(30), async {
            loop {
                let job = self.deps.registry.get(id).await.unwrap();
                if job.status.is_terminal() {
                    return job.status;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("job did not finish")
    }
}
