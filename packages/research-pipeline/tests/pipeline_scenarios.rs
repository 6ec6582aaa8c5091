//! End-to-end job runs against mock fetcher, model and searchers.

use std::sync::Arc;
use std::time::Duration;

use research_pipeline::{
    testing::{article_html, MockFetcher, MockModel, MockSearcher},
    ContentCache, Discovery, EventBus, EventKind, FailureReason, JobId, JobRegistry, JobStatus,
    LanguageModel, MemoryStore, Orchestrator, PipelineConfig, ServerType, StartJob,
    StaticModelRegistry, WebSearcher,
};
use serde_json::json;
use tokio::sync::Semaphore;

struct Harness {
    orchestrator: Orchestrator,
    registry: Arc<JobRegistry>,
    fetcher: Arc<MockFetcher>,
}

fn harness(fetcher: MockFetcher, model: MockModel, searchers: Vec<Arc<dyn WebSearcher>>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(fetcher);
    let cache = Arc::new(ContentCache::new(store.clone(), fetcher.clone(), 8));
    let registry = Arc::new(JobRegistry::new(store, EventBus::new()));
    let discovery = Arc::new(Discovery::new(cache.clone(), searchers));
    let model: Arc<dyn LanguageModel> = Arc::new(model);
    let models = StaticModelRegistry::new().with_model(ServerType::Ollama, "local", model);
    let orchestrator = Orchestrator::new(
        registry.clone(),
        cache,
        discovery,
        Arc::new(models),
        PipelineConfig::default(),
    );
    Harness {
        orchestrator,
        registry,
        fetcher,
    }
}

fn request(seeds: &[&str], target: u32) -> StartJob {
    StartJob {
        query: "ransomware attacks".to_string(),
        target_count: target,
        seed_urls: seeds.iter().map(|s| s.to_string()).collect(),
        focus_on_seed: false,
        server_type: ServerType::Ollama,
        server_name: "local".to_string(),
        model_name: "llama3".to_string(),
        config: Some(json!({
            "fetch": { "per_domain_rps": 50, "exhaustion_grace_secs": 2, "global_concurrency": 2 }
        })),
        start_date: None,
        end_date: None,
    }
}

fn incident_page(n: usize) -> String {
    article_html(
        &format!("Council {} hit", n),
        &format!("Ransomware crippled council number {} this week.", n),
    )
}

async fn run(h: &Harness, req: StartJob) -> JobId {
    let id = h.orchestrator.start(req).await.unwrap();
    tokio::time::timeout(Duration::from_secs(30), h.orchestrator.join(id))
        .await
        .expect("job did not finish");
    id
}

async fn statuses(registry: &JobRegistry, id: JobId) -> Vec<JobStatus> {
    registry
        .events()
        .since(id, 0)
        .await
        .into_iter()
        .filter_map(|e| match e.kind {
            EventKind::Status { status, .. } => Some(status),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_exhausted_candidates_finalize_below_target() {
    let fetcher = MockFetcher::new()
        .with_page("https://a.example.com/story", incident_page(1))
        .with_page("https://b.example.com/story", incident_page(2))
        .with_page("https://c.example.com/story", incident_page(3));
    let h = harness(fetcher, MockModel::new(), Vec::new());

    let id = run(
        &h,
        request(
            &[
                "https://a.example.com/story",
                "https://b.example.com/story",
                "https://c.example.com/story",
            ],
            50,
        ),
    )
    .await;

    let job = h.registry.get(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Finalized);
    assert_eq!(job.accepted_count, 3);
    assert_eq!(job.counters.discovered, 3);
    assert_eq!(job.counters.fetched, 3);

    let report = h.registry.research(job.research_id.unwrap()).await.unwrap();
    assert_eq!(report.draft_count, 3);
    assert!(report.result.starts_with("# Cyber Threats and Risks ("));
    assert_eq!(report.result.matches("\n## ").count(), 3);
}

#[tokio::test]
async fn test_no_accepted_drafts_fails_job() {
    let fetcher = MockFetcher::new().with_page("https://a.example.com/story", incident_page(1));
    let model = MockModel::new()
        .with_default_response(MockModel::incident_json("Vendor advisory.", false));
    let h = harness(fetcher, model, Vec::new());

    let id = run(&h, request(&["https://a.example.com/story"], 5)).await;

    let job = h.registry.get(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.failure_reason, Some(FailureReason::NoAcceptedDrafts));
    assert_eq!(job.counters.filtered, 1);
    assert!(job.research_id.is_none());
}

#[tokio::test]
async fn test_aggregator_only_seed_is_never_fetched() {
    let fetcher = MockFetcher::new().with_page(
        "https://a.example.com/weekly-digest",
        incident_page(1),
    );
    let h = harness(fetcher, MockModel::new(), Vec::new());

    let id = run(&h, request(&["https://a.example.com/weekly-digest"], 1)).await;

    let job = h.registry.get(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.failure_reason, Some(FailureReason::NoAcceptedDrafts));
    assert_eq!(job.counters.discovered, 1);
    assert_eq!(job.counters.fetched, 0);
    assert_eq!(job.counters.filtered, 0);
    assert_eq!(job.counters.errors, 0);
    assert_eq!(h.fetcher.call_count(), 0);
}

#[tokio::test]
async fn test_empty_search_fails_with_no_candidates() {
    let searcher: Arc<dyn WebSearcher> = Arc::new(MockSearcher::new("tavily"));
    let h = harness(MockFetcher::new(), MockModel::new(), vec![searcher]);

    let id = run(&h, request(&[], 5)).await;

    let job = h.registry.get(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.failure_reason, Some(FailureReason::NoCandidates));
    assert_eq!(h.fetcher.call_count(), 0);
}

#[tokio::test]
async fn test_search_results_are_processed() {
    let searcher: Arc<dyn WebSearcher> = Arc::new(MockSearcher::new("tavily").with_page(&[
        ("https://a.example.com/story", "Council 1 hit"),
        ("https://b.example.com/story", "Council 2 hit"),
    ]));
    let fetcher = MockFetcher::new()
        .with_page("https://a.example.com/story", incident_page(1))
        .with_page("https://b.example.com/story", incident_page(2));
    let h = harness(fetcher, MockModel::new(), vec![searcher]);

    let id = run(&h, request(&[], 5)).await;

    let job = h.registry.get(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Finalized);
    assert_eq!(job.accepted_count, 2);
}

#[tokio::test]
async fn test_equivalent_seed_urls_fetched_once() {
    let fetcher = MockFetcher::new().with_page("https://a.example.com/story", incident_page(1));
    let h = harness(fetcher, MockModel::new(), Vec::new());

    let id = run(
        &h,
        request(
            &[
                "https://a.example.com/story",
                "https://A.example.com/story/",
                "https://a.example.com/story?utm_source=feed",
            ],
            5,
        ),
    )
    .await;

    let job = h.registry.get(id).await.unwrap();
    assert_eq!(job.counters.discovered, 1);
    assert_eq!(h.fetcher.call_count(), 1);
    assert_eq!(h.registry.drafts(id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_score_at_threshold_passes_and_below_is_filtered() {
    let fetcher = MockFetcher::new()
        .with_page(
            "https://a.example.com/story",
            article_html("Council notice", "A breach was reported at the council."),
        )
        .with_page(
            "https://b.example.com/story",
            article_html("Council notice", "The council opened a new library."),
        );
    let h = harness(fetcher, MockModel::new(), Vec::new());

    let id = run(
        &h,
        request(&["https://a.example.com/story", "https://b.example.com/story"], 5),
    )
    .await;

    let job = h.registry.get(id).await.unwrap();
    assert_eq!(job.accepted_count, 1);
    assert_eq!(job.counters.filtered, 1);
    let drafts = h.registry.drafts(id).await.unwrap();
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].score, 1.0);
}

#[tokio::test]
async fn test_target_reached_stops_dispatch() {
    let mut fetcher = MockFetcher::new();
    let mut seeds = Vec::new();
    for n in 0..6 {
        let url = format!("https://site{}.example.com/story", n);
        fetcher = fetcher.with_page(&url, incident_page(n));
        seeds.push(url);
    }
    let h = harness(fetcher, MockModel::new(), Vec::new());
    let seeds: Vec<&str> = seeds.iter().map(String::as_str).collect();

    let mut req = request(&seeds, 1);
    req.config = Some(json!({
        "fetch": { "per_domain_rps": 50, "exhaustion_grace_secs": 2, "global_concurrency": 1 }
    }));
    let id = run(&h, req).await;

    let job = h.registry.get(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Finalized);
    assert_eq!(job.accepted_count, 1);
    assert_eq!(h.fetcher.call_count(), 1);
}

#[tokio::test]
async fn test_status_events_move_forward() {
    let fetcher = MockFetcher::new().with_page("https://a.example.com/story", incident_page(1));
    let h = harness(fetcher, MockModel::new(), Vec::new());

    let id = run(&h, request(&["https://a.example.com/story"], 1)).await;

    let seen = statuses(&h.registry, id).await;
    assert_eq!(
        seen,
        vec![
            JobStatus::Queued,
            JobStatus::Discovering,
            JobStatus::Fetching,
            JobStatus::Parsing,
            JobStatus::Drafting,
            JobStatus::Qa,
            JobStatus::Finalized,
        ]
    );

    let events = h.registry.events().since(id, 0).await;
    assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));
}

#[tokio::test]
async fn test_cancel_stops_new_work_and_is_idempotent() {
    let gate = Arc::new(Semaphore::new(0));
    let mut fetcher = MockFetcher::new().with_gate(gate.clone());
    let mut seeds = Vec::new();
    for n in 0..5 {
        let url = format!("https://site{}.example.com/story", n);
        fetcher = fetcher.with_page(&url, incident_page(n));
        seeds.push(url);
    }
    let h = harness(fetcher, MockModel::new(), Vec::new());
    let seeds: Vec<&str> = seeds.iter().map(String::as_str).collect();

    let id = h.orchestrator.start(request(&seeds, 10)).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.fetcher.in_flight() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("workers never started");

    h.registry.cancel(id).await.unwrap();
    h.registry.cancel(id).await.unwrap();
    gate.add_permits(100);
    tokio::time::timeout(Duration::from_secs(30), h.orchestrator.join(id))
        .await
        .expect("job did not finish");

    let job = h.registry.get(id).await.unwrap();
    assert!(job.status.is_terminal());
    assert!(job.cancel_requested);
    assert_eq!(h.fetcher.call_count(), 2);

    let cancel_logs = h
        .registry
        .events()
        .since(id, 0)
        .await
        .into_iter()
        .filter(|e| matches!(&e.kind, EventKind::Log { message, .. } if message == "cancellation requested"))
        .count();
    assert_eq!(cancel_logs, 1);
}

#[tokio::test]
async fn test_cancel_before_any_acceptance_ends_canceled() {
    let gate = Arc::new(Semaphore::new(0));
    let fetcher = MockFetcher::new()
        .with_gate(gate.clone())
        .with_page("https://a.example.com/story", incident_page(1));
    let model = MockModel::new()
        .with_default_response(MockModel::incident_json("Vendor advisory.", false));
    let h = harness(fetcher, model, Vec::new());

    let id = h
        .orchestrator
        .start(request(&["https://a.example.com/story"], 3))
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.fetcher.in_flight() < 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("worker never started");

    h.registry.cancel(id).await.unwrap();
    gate.add_permits(10);
    h.orchestrator.join(id).await;

    let job = h.registry.get(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Canceled);
    assert!(job.research_id.is_none());
}

#[tokio::test]
async fn test_unknown_model_server_fails_job() {
    let h = harness(MockFetcher::new(), MockModel::new(), Vec::new());
    let mut req = request(&["https://a.example.com/story"], 1);
    req.server_name = "missing".to_string();

    let id = run(&h, req).await;

    let job = h.registry.get(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.failure_reason, Some(FailureReason::ModelUnavailable));
    assert_eq!(h.fetcher.call_count(), 0);
}

#[tokio::test]
async fn test_invalid_config_rejected_before_queueing() {
    let h = harness(MockFetcher::new(), MockModel::new(), Vec::new());
    let mut req = request(&[], 1);
    req.config = Some(json!({ "discovery": { "crawl_depth": 5 } }));

    assert!(h.orchestrator.start(req).await.is_err());
    assert!(h.registry.list().await.unwrap().is_empty());
}
