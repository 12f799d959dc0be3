//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::State,
    http::{header, StatusCode},
    routing::post,
    Json, Router,
};
use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;

use inference_guard::backend::{BackendError, ChunkStream, InferenceBackend, InvokeOptions};
use inference_guard::config::ProxySettings;

/// Backend that replays scripted outcomes and counts calls.
///
/// When the script runs dry every call succeeds with `"ok: <prompt>"`.
#[derive(Default)]
pub struct ScriptedBackend {
    invoke_script: Mutex<VecDeque<Result<String, BackendError>>>,
    stream_script: Mutex<VecDeque<Vec<Result<String, BackendError>>>>,
    latency: Option<Duration>,
    invoke_calls: AtomicUsize,
    stream_calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn push_ok(&self, text: &str) -> &Self {
        self.invoke_script.lock().unwrap().push_back(Ok(text.to_string()));
        self
    }

    pub fn push_err(&self, err: BackendError) -> &Self {
        self.invoke_script.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn push_failures(&self, n: usize) -> &Self {
        for _ in 0..n {
            self.push_err(BackendError::Unavailable("scripted failure".into()));
        }
        self
    }

    /// Queue the items of the next stream.
    pub fn push_stream(&self, items: Vec<Result<String, BackendError>>) -> &Self {
        self.stream_script.lock().unwrap().push_back(items);
        self
    }

    pub fn invoke_calls(&self) -> usize {
        self.invoke_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    async fn invoke(&self, prompt: &str, _options: &InvokeOptions) -> Result<String, BackendError> {
        self.invoke_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let next = self.invoke_script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(format!("ok: {prompt}")))
    }

    async fn stream(&self, prompt: &str, _options: &InvokeOptions) -> Result<ChunkStream, BackendError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        let items = self
            .stream_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![Ok("ok: ".to_string()), Ok(prompt.to_string())]);
        Ok(stream::iter(items).boxed())
    }
}

pub fn settings() -> ProxySettings {
    ProxySettings::default()
}

/// Settings with only the named guard switched on.
pub fn only(cache: bool, rate_limit: bool, breaker: bool) -> ProxySettings {
    ProxySettings {
        cache_enabled: cache,
        rate_limit_enabled: rate_limit,
        circuit_breaker_enabled: breaker,
        ..ProxySettings::default()
    }
}

/// A mock OpenAI-compatible upstream. Every received request body is kept.
pub struct MockUpstream {
    pub addr: SocketAddr,
    pub requests: Arc<Mutex<Vec<Value>>>,
}

impl MockUpstream {
    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

type Responder = Arc<dyn Fn(&Value) -> (u16, &'static str, String) + Send + Sync>;

/// Start a programmable `/v1/chat/completions` upstream on an ephemeral port.
/// `respond` returns status, content type and body for each request.
pub async fn start_mock_openai<F>(respond: F) -> MockUpstream
where
    F: Fn(&Value) -> (u16, &'static str, String) + Send + Sync + 'static,
{
    let requests = Arc::new(Mutex::new(Vec::new()));
    let state: (Responder, Arc<Mutex<Vec<Value>>>) = (Arc::new(respond), requests.clone());

    let app = Router::new()
        .route("/v1/chat/completions", post(handle_completion))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockUpstream { addr, requests }
}

async fn handle_completion(
    State((respond, requests)): State<(Responder, Arc<Mutex<Vec<Value>>>)>,
    Json(body): Json<Value>,
) -> (StatusCode, [(header::HeaderName, &'static str); 1], String) {
    let (status, content_type, payload) = respond(&body);
    requests.lock().unwrap().push(body);
    (
        StatusCode::from_u16(status).unwrap(),
        [(header::CONTENT_TYPE, content_type)],
        payload,
    )
}

/// A chat completion response carrying `content`.
pub fn completion(content: &str) -> (u16, &'static str, String) {
    let body = serde_json::json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }]
    });
    (200, "application/json", body.to_string())
}

/// A server-sent event stream delivering `chunks` then `[DONE]`.
pub fn sse(chunks: &[&str]) -> (u16, &'static str, String) {
    let mut body = String::new();
    for chunk in chunks {
        let event = serde_json::json!({ "choices": [{ "index": 0, "delta": { "content": chunk } }] });
        body.push_str(&format!("data: {event}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    (200, "text/event-stream", body)
}
