use std::sync::{Arc, Mutex};
use std::time::Duration;

use api_server::http::{AppState, build_router};
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use serde_json::{Value, json};
use shared::chat_log_service::ChatLogService;
use shared::context_store::{ContextExpiryPolicy, SessionContextStore};
use shared::evaluation::RiskEvaluationScheduler;
use shared::models::ModelVariant;
use shared::repos::{ChatLogStore, MemoryStore};
use shared::risk::{PredictionLabel, ScorerVerdict};
use shared::scoring::{
    HeuristicError, HeuristicEvaluator, HeuristicFuture, RiskScorer, ScorerError, ScorerFuture,
};
use tokio::sync::{Notify, watch};
use tower::ServiceExt;

/// Returns the same score for every text.
pub struct FixedEvaluator(pub f64);

impl HeuristicEvaluator for FixedEvaluator {
    fn evaluate<'a>(&'a self, _text: &'a str) -> HeuristicFuture<'a> {
        let score = self.0;
        Box::pin(async move { Ok::<f64, HeuristicError>(score) })
    }
}

pub struct UnavailableEvaluator;

impl HeuristicEvaluator for UnavailableEvaluator {
    fn evaluate<'a>(&'a self, _text: &'a str) -> HeuristicFuture<'a> {
        Box::pin(async { Err::<f64, HeuristicError>(HeuristicError::Timeout) })
    }
}

/// Returns one verdict for every text and records the variants it was asked
/// to use.
pub struct RecordingScorer {
    verdict: ScorerVerdict,
    variants: Mutex<Vec<ModelVariant>>,
}

impl RecordingScorer {
    pub fn new(label: PredictionLabel, confidence_percent: f64) -> Self {
        Self {
            verdict: ScorerVerdict {
                label,
                confidence_percent,
            },
            variants: Mutex::new(Vec::new()),
        }
    }

    pub fn variants(&self) -> Vec<ModelVariant> {
        self.variants.lock().expect("variants lock").clone()
    }
}

impl RiskScorer for RecordingScorer {
    fn score<'a>(&'a self, _text: &'a str, variant: ModelVariant) -> ScorerFuture<'a> {
        Box::pin(async move {
            self.variants.lock().expect("variants lock").push(variant);
            Ok::<ScorerVerdict, ScorerError>(self.verdict)
        })
    }
}

/// Signals `entered` on each call, then waits for `release` before returning
/// a fixed verdict.
#[derive(Default)]
pub struct GatedScorer {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl RiskScorer for GatedScorer {
    fn score<'a>(&'a self, _text: &'a str, _variant: ModelVariant) -> ScorerFuture<'a> {
        Box::pin(async move {
            self.entered.notify_one();
            self.release.notified().await;
            Ok::<ScorerVerdict, ScorerError>(ScorerVerdict {
                label: PredictionLabel::Suicide,
                confidence_percent: 80.0,
            })
        })
    }
}

pub struct TestApp {
    pub router: axum::Router,
    pub store: MemoryStore,
    pub contexts: SessionContextStore,
    pub scheduler: RiskEvaluationScheduler,
    pub shutdown: watch::Sender<bool>,
}

pub fn build_test_app(
    evaluator: Arc<dyn HeuristicEvaluator>,
    scorer: Arc<dyn RiskScorer>,
) -> TestApp {
    let store = MemoryStore::new();
    let contexts =
        SessionContextStore::new(Duration::from_secs(30 * 60), ContextExpiryPolicy::AbsoluteAge);
    let shared_store: Arc<dyn ChatLogStore> = Arc::new(store.clone());
    let scheduler = RiskEvaluationScheduler::new(Arc::clone(&shared_store), scorer);
    let (shutdown, shutdown_rx) = watch::channel(false);

    let router = build_router(AppState {
        store: Arc::clone(&shared_store),
        chat_logs: Arc::new(ChatLogService::new(
            Arc::clone(&shared_store),
            evaluator,
            contexts.clone(),
        )),
        scheduler: scheduler.clone(),
        shutdown: shutdown_rx,
    });

    TestApp {
        router,
        store,
        contexts,
        scheduler,
        shutdown,
    }
}

pub struct JsonResponse {
    pub status: StatusCode,
    pub body: Value,
}

pub async fn send_json(app: &axum::Router, request: Request<Body>) -> JsonResponse {
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("request should succeed");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body should read");
    let body = serde_json::from_slice::<Value>(&body).unwrap_or_else(|_| json!({}));

    JsonResponse { status, body }
}

pub fn request(method: Method, uri: &str, json_body: Option<Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);

    match json_body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request should build"),
        None => builder.body(Body::empty()).expect("request should build"),
    }
}

pub async fn start_session(app: &axum::Router, city: &str) -> String {
    let response = send_json(
        app,
        request(
            Method::POST,
            "/v1/sessions",
            Some(json!({
                "latitude": 18.52,
                "longitude": 73.85,
                "city": city,
                "source_address": "203.0.113.10"
            })),
        ),
    )
    .await;
    assert_eq!(response.status, StatusCode::CREATED);

    response
        .body
        .get("session_id")
        .and_then(Value::as_str)
        .expect("start response should include session_id")
        .to_string()
}

pub async fn post_turn(app: &axum::Router, session_id: &str, text: &str) -> JsonResponse {
    send_json(
        app,
        request(
            Method::POST,
            &format!("/v1/sessions/{session_id}/turns"),
            Some(json!({ "text": text })),
        ),
    )
    .await
}
