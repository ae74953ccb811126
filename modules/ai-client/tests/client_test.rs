//! Client tests against in-process fake servers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ai_client::{AiError, Gemini, GenerationRequest, KeyPool, OpenAi, TextGenerator};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

// ---------------------------------------------------------------------------
// OpenAI-compatible host
// ---------------------------------------------------------------------------

async fn chat(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let prompt = body["messages"].as_array().and_then(|m| m.last()).map(|m| m["content"].clone());
    match prompt.as_ref().and_then(Value::as_str) {
        Some("slow down") => (StatusCode::TOO_MANY_REQUESTS, [("retry-after", "2")], "quota").into_response(),
        Some("explode") => (StatusCode::INTERNAL_SERVER_ERROR, "model crashed").into_response(),
        Some(text) => {
            let auth = headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("none")
                .to_string();
            Json(json!({
                "choices": [{"message": {"role": "assistant", "content": format!("{auth}|{text}")}}]
            }))
            .into_response()
        }
        None => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn completions(Json(body): Json<Value>) -> Json<Value> {
    let prompts: Vec<String> = serde_json::from_value(body["prompt"].clone()).unwrap_or_default();
    // Answer out of order; the client must reorder by index.
    let choices: Vec<Value> = prompts
        .iter()
        .enumerate()
        .rev()
        .map(|(i, p)| json!({"index": i, "text": format!("reply to {p}")}))
        .collect();
    Json(json!({ "choices": choices }))
}

async fn openai_host() -> String {
    let app = Router::new()
        .route("/v1/chat/completions", post(chat))
        .route("/v1/completions", post(completions));
    format!("{}/v1", serve(app).await)
}

#[tokio::test]
async fn chat_returns_first_choice_content() {
    let ai = OpenAi::new("sk-test", "gpt-4o-mini").with_base_url(openai_host().await);
    let reply = ai.generate(&GenerationRequest::new("hello")).await.unwrap();
    assert_eq!(reply, "Bearer sk-test|hello");
}

#[tokio::test]
async fn local_host_sends_no_authorization() {
    let ai = OpenAi::local(openai_host().await, "qwen2.5-7b-instruct");
    let reply = ai.generate(&GenerationRequest::new("hello")).await.unwrap();
    assert_eq!(reply, "none|hello");
}

#[tokio::test]
async fn http_429_is_rate_limited_with_retry_after() {
    let ai = OpenAi::new("sk-test", "gpt-4o-mini").with_base_url(openai_host().await);
    let err = ai.generate(&GenerationRequest::new("slow down")).await.unwrap_err();
    match err {
        AiError::RateLimited { retry_after } => assert_eq!(retry_after, Some(Duration::from_secs(2))),
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[tokio::test]
async fn server_error_is_a_hard_api_error() {
    let ai = OpenAi::new("sk-test", "gpt-4o-mini").with_base_url(openai_host().await);
    let err = ai.generate(&GenerationRequest::new("explode")).await.unwrap_err();
    assert!(matches!(err, AiError::Api { status: 500, .. }));
    assert!(!err.is_rate_limited());
}

#[tokio::test]
async fn batch_completion_keeps_prompt_order() {
    let ai = OpenAi::local(openai_host().await, "mistral-7b-instruct");
    let prompts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    let replies = ai.generate_batch(&prompts, &GenerationRequest::new("")).await.unwrap();
    assert_eq!(replies, vec!["reply to a", "reply to b", "reply to c"]);
}

// ---------------------------------------------------------------------------
// Gemini
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct GeminiState {
    keys_seen: Arc<Mutex<Vec<String>>>,
}

async fn generate_content(
    State(state): State<GeminiState>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response {
    let key = query.get("key").cloned().unwrap_or_default();
    state.keys_seen.lock().unwrap().push(key.clone());

    if key == "throttled" {
        return (StatusCode::TOO_MANY_REQUESTS, "RESOURCE_EXHAUSTED").into_response();
    }
    let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap_or_default();
    let mime = body["generationConfig"]["responseMimeType"].as_str().unwrap_or("text/plain");
    Json(json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": format!("{mime}:")}, {"text": prompt}]},
            "finishReason": "STOP"
        }]
    }))
    .into_response()
}

async fn gemini_host(state: GeminiState) -> String {
    let app = Router::new().fallback(generate_content).with_state(state);
    serve(app).await
}

fn pool(keys: &[&str]) -> KeyPool {
    KeyPool::new(keys.iter().map(|k| k.to_string()).collect()).unwrap()
}

#[tokio::test]
async fn gemini_rotates_keys_per_request() {
    let state = GeminiState::default();
    let gemini = Gemini::new(pool(&["k1", "k2"]), "gemini-2.5-flash-lite").with_base_url(gemini_host(state.clone()).await);

    for _ in 0..3 {
        gemini.generate(&GenerationRequest::new("hi")).await.unwrap();
    }
    assert_eq!(*state.keys_seen.lock().unwrap(), vec!["k1", "k2", "k1"]);
}

#[tokio::test]
async fn gemini_joins_text_parts_and_honours_json_mode() {
    let gemini = Gemini::new(pool(&["k1"]), "gemini-2.5-flash-lite")
        .with_base_url(gemini_host(GeminiState::default()).await);
    let reply = gemini
        .generate(&GenerationRequest::new("[1,2]").json())
        .await
        .unwrap();
    assert_eq!(reply, "application/json:[1,2]");
}

#[tokio::test]
async fn gemini_429_is_rate_limited() {
    let gemini = Gemini::new(pool(&["throttled"]), "gemini-2.5-flash-lite")
        .with_base_url(gemini_host(GeminiState::default()).await);
    let err = gemini.generate(&GenerationRequest::new("hi")).await.unwrap_err();
    assert!(err.is_rate_limited());
}
