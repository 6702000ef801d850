// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot, with the
// fixture feed and a mock analysis delegate.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::json;
use serde_json::Value as Json;
use tower::ServiceExt as _; // for `oneshot`

use doga_analyzer::analyze::ai_adapter::{DynDelegate, MockDelegate};
use doga_analyzer::ingest::DogaRssSource;
use doga_analyzer::{router, AppState, DelegateError};

const BODY_LIMIT: usize = 1024 * 1024; // 1MB, safe for tests
const FEED_XML: &str = include_str!("fixtures/doga_rss.xml");
const FEED_URL: &str = "https://www.xunta.gal/diario-oficial-galicia/rss/Sumario_es.rss";

fn test_router_with(feed_xml: &str, delegate: DynDelegate) -> Router {
    let feed = Arc::new(DogaRssSource::from_fixture(feed_xml, FEED_URL));
    router(AppState::new(feed, delegate, Duration::from_secs(5), 5))
}

fn test_router(delegate: MockDelegate) -> Router {
    test_router_with(FEED_XML, Arc::new(delegate))
}

async fn post_json(app: Router, body: String) -> (StatusCode, Json) {
    let req = Request::builder()
        .method("POST")
        .uri("/analyze-text")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .expect("build POST /analyze-text");
    let resp = app.oneshot(req).await.expect("oneshot /analyze-text");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    let v: Json = serde_json::from_slice(&bytes).expect("parse json body");
    (status, v)
}

/// Reply keyed on the user query embedded in the composed prompt.
fn query_of(prompt: &str) -> &str {
    prompt
        .strip_prefix("User Query: ")
        .and_then(|rest| rest.split("\n\nDOGA Content: ").next())
        .unwrap_or_default()
}

#[tokio::test]
async fn health_returns_ok() {
    let app = test_router(MockDelegate::canned());
    let req = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("build GET /health");
    let resp = app.oneshot(req).await.expect("oneshot /health");
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    assert_eq!(String::from_utf8(bytes.to_vec()).unwrap(), "OK");
}

#[tokio::test]
async fn help_describes_the_contract() {
    let app = test_router(MockDelegate::canned());
    let req = Request::builder()
        .uri("/help")
        .body(Body::empty())
        .expect("build GET /help");
    let resp = app.oneshot(req).await.expect("oneshot /help");
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    let v: Json = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(v["endpoints"]["/analyze-text"]["method"], "POST");
    assert!(v["endpoints"]["/help"].is_object());
}

#[tokio::test]
async fn sparse_model_match_is_fully_defaulted() {
    let app = test_router(MockDelegate::fixed(
        r#"{"matches":[{"document_type":"Resolution","relevance_score":0.9}],"metadata":{}}"#,
    ));
    let (status, v) = post_json(app, json!({ "texts": ["find resolutions"] }).to_string()).await;
    assert_eq!(status, StatusCode::OK);

    let result = &v["results"][0];
    assert_eq!(result["prompt"], "find resolutions");
    let matches = result["matches"].as_array().expect("matches array");
    assert_eq!(matches.len(), 1);
    let m = &matches[0];
    assert_eq!(m["document_type"], "Resolution");
    assert_eq!(m["relevance_score"], 0.9);
    assert_eq!(m["issuing_body"], "Unknown");
    assert_eq!(m["summary"], "No summary available");
    assert_eq!(m["source"], "DOGA");
    // date and link fall back to the feed snapshot
    assert_eq!(m["publication_date"], "2025-01-16");
    assert_eq!(m["source_url"], FEED_URL);
    assert_eq!(result["metadata"]["match_count"], 1);
    assert_eq!(result["metadata"]["max_relevance"], 0.9);
}

#[tokio::test]
async fn response_envelope_carries_feed_info_and_ids() {
    let app = test_router(MockDelegate::canned());
    let body = json!({
        "texts": ["Show orders related to education"],
        "metadata": { "user_id": "u-1", "subscription_id": "s-9", "channel": "email" },
        "date": "2025-01-16"
    });
    let (status, v) = post_json(app, body.to_string()).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(v["query_date"], "2025-01-16");
    assert_eq!(v["doga_info"]["issue_number"], "10");
    assert_eq!(v["doga_info"]["publication_date"], "2025-01-16");
    assert_eq!(v["doga_info"]["source_url"], FEED_URL);

    assert_eq!(v["metadata"]["user_id"], "u-1");
    assert_eq!(v["metadata"]["subscription_id"], "s-9");
    assert_eq!(v["metadata"]["total_items_processed"], 3);
    assert!(v["metadata"]["processing_time_ms"].is_u64());

    let meta = &v["results"][0]["metadata"];
    assert_eq!(meta["user_id"], "u-1");
    assert_eq!(meta["subscription_id"], "s-9");
    assert_eq!(meta["channel"], "email");
    assert_eq!(meta["mock"], true);
}

#[tokio::test]
async fn query_date_defaults_to_today() {
    let app = test_router(MockDelegate::canned());
    let (status, v) = post_json(app, json!({ "texts": ["x"] }).to_string()).await;
    assert_eq!(status, StatusCode::OK);
    let today = chrono::Local::now().format("%Y-%m-%d").to_string();
    assert_eq!(v["query_date"], today.as_str());
    assert_eq!(v["doga_info"]["issue_number"], "10");
}

#[tokio::test]
async fn empty_missing_or_wrong_texts_is_400() {
    for body in [
        json!({ "texts": [] }).to_string(),
        json!({}).to_string(),
        json!({ "texts": "find resolutions" }).to_string(),
        "not json at all".to_string(),
    ] {
        let app = test_router(MockDelegate::canned());
        let (status, v) = post_json(app, body.clone()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body {body}");
        assert_eq!(v, json!({ "error": "Array of text prompts is required" }));
    }
}

#[tokio::test]
async fn results_keep_input_order_when_replies_arrive_out_of_order() {
    let delegate = MockDelegate::from_fn(|prompt| {
        let q = query_of(prompt);
        Ok(json!({ "matches": [{ "title": q }] }).to_string())
    })
    // first query answers last
    .with_latency(|prompt| match query_of(prompt) {
        "first" => Duration::from_millis(60),
        "second" => Duration::from_millis(30),
        _ => Duration::ZERO,
    });
    let app = test_router(delegate);

    let texts = ["first", "second", "  third  query "];
    let (status, v) = post_json(app, json!({ "texts": texts }).to_string()).await;
    assert_eq!(status, StatusCode::OK);

    let results = v["results"].as_array().unwrap();
    assert_eq!(results.len(), texts.len());
    for (r, t) in results.iter().zip(texts) {
        // prompt is the original text; the model saw the cleaned one
        assert_eq!(r["prompt"], t);
        assert_eq!(r["matches"][0]["title"], t.split_whitespace().collect::<Vec<_>>().join(" "));
    }
}

#[tokio::test]
async fn non_json_reply_degrades_only_that_query() {
    let delegate = MockDelegate::from_fn(|prompt| match query_of(prompt) {
        "bad" => Ok("sorry, I cannot help".to_string()),
        _ => Ok(r#"{"matches":[{"title":"ORDEN"}]}"#.to_string()),
    });
    let app = test_router(delegate);

    let (status, v) =
        post_json(app, json!({ "texts": ["good", "bad", "good"] }).to_string()).await;
    assert_eq!(status, StatusCode::OK);

    let results = v["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[1]["matches"], json!([]));
    assert!(results[1]["metadata"]["error"].is_string());
    assert_eq!(results[1]["metadata"]["parse_error"], true);
    for i in [0, 2] {
        assert_eq!(results[i]["matches"][0]["title"], "ORDEN");
        assert!(results[i]["metadata"].get("error").is_none());
    }
}

#[tokio::test]
async fn delegate_failure_is_isolated_per_query() {
    let delegate = MockDelegate::from_fn(|prompt| match query_of(prompt) {
        "down" => Err(DelegateError::Status {
            status: 401,
            body: "invalid api key".into(),
        }),
        _ => Ok(r#"{"matches":[{"title":"ANUNCIO"}]}"#.to_string()),
    });
    let app = test_router(delegate);

    let (status, v) = post_json(app, json!({ "texts": ["up", "down"] }).to_string()).await;
    assert_eq!(status, StatusCode::OK);
    let results = v["results"].as_array().unwrap();
    assert_eq!(results[0]["matches"][0]["title"], "ANUNCIO");
    assert_eq!(results[1]["matches"], json!([]));
    assert_eq!(results[1]["metadata"]["delegate_error"], true);
    assert!(results[1]["metadata"]["error"]
        .as_str()
        .unwrap()
        .contains("401"));
}

#[tokio::test]
async fn limit_truncates_without_reordering() {
    let many = json!({
        "matches": (0..8).map(|i| json!({ "title": format!("doc-{i}") })).collect::<Vec<_>>()
    })
    .to_string();

    for (limit, expected) in [(json!(3), 3), (json!(0), 8), (json!(-1), 8), (json!(20), 8)] {
        let app = test_router(MockDelegate::fixed(many.clone()));
        let body = json!({ "texts": ["q"], "limit": limit });
        let (status, v) = post_json(app, body.to_string()).await;
        assert_eq!(status, StatusCode::OK);
        let matches = v["results"][0]["matches"].as_array().unwrap();
        assert_eq!(matches.len(), expected, "limit {limit}");
        for (i, m) in matches.iter().enumerate() {
            assert_eq!(m["title"], format!("doc-{i}"));
        }
    }

    // default limit is 5
    let app = test_router(MockDelegate::fixed(many));
    let (_, v) = post_json(app, json!({ "texts": ["q"] }).to_string()).await;
    assert_eq!(v["results"][0]["matches"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn malformed_feed_fails_the_batch_with_500() {
    let app = test_router_with("<rss><channel><item></rss>", Arc::new(MockDelegate::canned()));
    let (status, v) = post_json(app, json!({ "texts": ["q"] }).to_string()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(v["status"], "error");
    assert!(v["error"].as_str().unwrap().contains("XML"));
    assert!(v["timestamp"].is_string());
}

#[tokio::test]
async fn unreachable_feed_fails_the_batch_with_500() {
    let feed = DogaRssSource::from_url("http://127.0.0.1:9/rss", Duration::from_secs(2))
        .expect("build feed client");
    let app = router(AppState::new(
        Arc::new(feed),
        Arc::new(MockDelegate::canned()),
        Duration::from_secs(5),
        5,
    ));
    let (status, v) = post_json(app, json!({ "texts": ["q"] }).to_string()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(v["status"], "error");
    assert!(v["error"].as_str().unwrap().contains("failed to fetch feed"));
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let app = test_router(MockDelegate::canned());
    let req = Request::builder()
        .method("POST")
        .uri("/analyze-text")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "texts": ["q"] }).to_string()))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let id = resp
        .headers()
        .get("x-request-id")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");
    assert!(!id.is_empty(), "x-request-id should be set");
}

#[tokio::test]
async fn panic_while_handling_returns_the_error_envelope() {
    let app = test_router(MockDelegate::from_fn(|_| panic!("model client exploded")));
    let (status, v) = post_json(app, json!({ "texts": ["q"] }).to_string()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(v["status"], "error");
    assert_eq!(v["error"], "Internal server error");
    assert!(v["timestamp"].is_string());
}
