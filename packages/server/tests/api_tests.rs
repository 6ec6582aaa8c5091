//! HTTP API tests against the full router.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Request, StatusCode},
};
use common::TestHarness;
use http_body_util::BodyExt;
use research_pipeline::testing::{article_html, MockFetcher, MockResponse};
use research_pipeline::{JobId, JobStatus};
use serde_json::{json, Value};
use tokio::sync::Semaphore;

const STORY: &str = "https://news.example.com/council-ransomware";

fn story_fetcher() -> MockFetcher {
    MockFetcher::new().with_page(
        STORY,
        article_html("Council hit", "Ransomware crippled the council this week."),
    )
}

fn job_body(seeds: &[&str]) -> Value {
    json!({
        "query": "ransomware",
        "server_type": "ollama",
        "server_name": "local",
        "model_name": "llama3",
        "target_count": 1,
        "seed_urls": seeds,
    })
}

async fn start_job(h: &TestHarness, body: Value) -> JobId {
    let (status, value) = h.post("/research/jobs", body).await;
    assert_eq!(status, StatusCode::ACCEPTED, "{}", value);
    value["job_id"].as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn test_health() {
    let h = TestHarness::new(MockFetcher::new());
    let (status, body) = h.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_job_runs_to_report() {
    let h = TestHarness::new(story_fetcher());
    let id = start_job(&h, job_body(&[STORY])).await;
    assert_eq!(h.wait_terminal(id).await, JobStatus::Finalized);

    let (status, job) = h.get(&format!("/research/jobs/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["status"], "finalized");
    assert_eq!(job["accepted_count"], 1);

    let (_, drafts) = h.get(&format!("/research/jobs/{}/drafts", id)).await;
    assert_eq!(drafts.as_array().unwrap().len(), 1);
    assert_eq!(drafts[0]["qa_status"], "accepted");

    let research_id = job["research_id"].as_str().unwrap();
    let (status, report) = h.get(&format!("/research/{}", research_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["draft_count"], 1);
    assert!(report["result"].as_str().unwrap().contains("## 1. Council hit"));

    let (_, jobs) = h.get("/research/jobs").await;
    assert_eq!(jobs.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_config_is_400() {
    let h = TestHarness::new(MockFetcher::new());
    let mut body = job_body(&[STORY]);
    body["config"] = json!({ "fetch": { "global_concurrency": 0 } });

    let (status, value) = h.post("/research/jobs", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(value["error"], "invalid_config");
    assert!(value["message"].as_str().unwrap().contains("global_concurrency"));
}

#[tokio::test]
async fn test_unknown_job_is_404() {
    let h = TestHarness::new(MockFetcher::new());
    let missing = uuid::Uuid::now_v7();

    let (status, value) = h.get(&format!("/research/jobs/{}", missing)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(value["error"], "not_found");

    let (status, _) = h.get(&format!("/research/jobs/{}/stream", missing)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = h.get(&format!("/research/{}", missing)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_is_idempotent() {
    let gate = Arc::new(Semaphore::new(0));
    let h = TestHarness::new(story_fetcher().with_gate(gate.clone()));
    let id = start_job(&h, job_body(&[STORY])).await;

    let uri = format!("/research/jobs/{}/cancel", id);
    let (status, first) = h.post(&uri, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["cancel_requested"], true);
    let (status, second) = h.post(&uri, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["cancel_requested"], true);
    assert_eq!(second["job_id"], id.to_string());

    gate.add_permits(10);
    assert!(h.wait_terminal(id).await.is_terminal());
}

#[tokio::test]
async fn test_events_since_filters_by_seq() {
    let h = TestHarness::new(story_fetcher());
    let id = start_job(&h, job_body(&[STORY])).await;
    h.wait_terminal(id).await;

    let (status, all) = h.get(&format!("/research/jobs/{}/events", id)).await;
    assert_eq!(status, StatusCode::OK);
    let all = all.as_array().unwrap().clone();
    assert!(all.len() > 3);
    assert_eq!(all[0]["seq"], 1);
    assert_eq!(all[0]["type"], "status");

    let (_, tail) = h.get(&format!("/research/jobs/{}/events?since=3", id)).await;
    let tail = tail.as_array().unwrap();
    assert_eq!(tail.len(), all.len() - 3);
    assert_eq!(tail[0]["seq"], 4);
}

#[tokio::test]
async fn test_stream_replays_and_ends_after_terminal_status() {
    let h = TestHarness::new(story_fetcher());
    let id = start_job(&h, job_body(&[STORY])).await;
    h.wait_terminal(id).await;

    let request = Request::builder()
        .uri(format!("/research/jobs/{}/stream", id))
        .body(Body::empty())
        .unwrap();
    let response = h.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let bytes = tokio::time::timeout(Duration::from_secs(5), response.into_body().collect())
        .await
        .expect("stream should end after the terminal event")
        .unwrap()
        .to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.starts_with("event: connected"));
    assert!(text.contains("event: progress"));
    assert!(text.contains("\"status\":\"finalized\""));
}

#[tokio::test]
async fn test_cache_admin_round_trip() {
    let h = TestHarness::new(story_fetcher());

    let (status, first) = h.post("/cache/refetch", json!({ "url": STORY })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["from_cache"], false);
    assert_eq!(first["domain"], "news.example.com");
    assert!(first.get("body").is_none());

    let (_, second) = h.post("/cache/refetch", json!({ "url": STORY })).await;
    assert_eq!(second["from_cache"], true);
    assert_eq!(h.fetcher.call_count(), 1);

    let (_, forced) = h
        .post("/cache/refetch", json!({ "url": STORY, "force_bypass": true }))
        .await;
    assert_eq!(forced["from_cache"], false);
    assert_eq!(h.fetcher.call_count(), 2);

    let (_, domains) = h.get("/cache/domains").await;
    assert_eq!(domains[0]["domain"], "news.example.com");
    assert_eq!(domains[0]["entries"], 1);

    let (_, entries) = h.get("/cache/domains/news.example.com/entries?limit=10").await;
    assert_eq!(entries.as_array().unwrap().len(), 1);

    let (_, summary) = h
        .post("/cache/domains/news.example.com/refetch", json!({ "limit": 5 }))
        .await;
    assert_eq!(summary["attempted"], 1);
    assert_eq!(summary["from_cache"], 1);

    let (_, deleted) = h.delete("/cache/domains/news.example.com").await;
    assert_eq!(deleted["deleted"], 1);
    let (_, deleted) = h.delete("/cache").await;
    assert_eq!(deleted["deleted"], 0);
}

#[tokio::test]
async fn test_refetch_upstream_failure_is_502() {
    let fetcher = MockFetcher::new()
        .with_response("https://down.example.com/a", MockResponse::Status(503));
    let h = TestHarness::new(fetcher);

    let (status, body) = h
        .post("/cache/refetch", json!({ "url": "https://down.example.com/a" }))
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "fetch_failed");
}

#[tokio::test]
async fn test_refetch_with_out_of_range_ttl_is_400() {
    let h = TestHarness::new(story_fetcher());

    let (status, body) = h
        .post("/cache/refetch", json!({ "url": STORY, "ttl_hours": u32::MAX }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_config");

    let (status, _) = h
        .post(
            "/cache/domains/news.example.com/refetch",
            json!({ "limit": 5, "ttl_hours": u32::MAX }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(h.fetcher.call_count(), 0);

    let (status, _) = h.post("/cache/refetch", json!({ "url": STORY })).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_evicted_job_stays_readable_and_streams_final_status() {
    let h = TestHarness::with_retention(story_fetcher(), Duration::ZERO);
    let id = start_job(&h, job_body(&[STORY])).await;
    assert_eq!(h.wait_terminal(id).await, JobStatus::Finalized);

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.deps.registry.is_resident(id).await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job should be evicted");

    let (status, job) = h.get(&format!("/research/jobs/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["status"], "finalized");
    let (_, drafts) = h.get(&format!("/research/jobs/{}/drafts", id)).await;
    assert_eq!(drafts.as_array().unwrap().len(), 1);
    let (_, events) = h.get(&format!("/research/jobs/{}/events", id)).await;
    assert_eq!(events, json!([]));

    let request = Request::builder()
        .uri(format!("/research/jobs/{}/stream", id))
        .body(Body::empty())
        .unwrap();
    let response = h.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = tokio::time::timeout(Duration::from_secs(5), response.into_body().collect())
        .await
        .expect("stream of an evicted job should end at once")
        .unwrap()
        .to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.starts_with("event: connected"));
    assert!(text.contains("event: status"));
    assert!(text.contains("\"status\":\"finalized\""));
}
